//! Instructions

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::opcode::Opcode;
use crate::operand::Operand;

/// `extended_value` flag of `ISSET_ISEMPTY_*`: evaluate `empty()` instead of `isset()`
pub const ISEMPTY: u32 = 1;
/// `extended_value` flag of `CATCH`: last catch arm, rethrow on mismatch
pub const CATCH_LAST: u32 = 1;

/// One bytecode instruction.
///
/// `#[repr(C)]` because runtime handlers receive a pointer to the
/// instruction they execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(C)]
pub struct Instruction {
    /// Operation
    pub opcode: Opcode,
    /// First operand
    pub op1: Operand,
    /// Second operand
    pub op2: Operand,
    /// Result slot
    pub result: Operand,
    /// Opcode-specific payload (flags, second jump target, cache slot)
    pub extended_value: u32,
    /// Source line
    pub lineno: u32,
}

impl Instruction {
    /// Instruction with every operand unused
    pub const fn new(opcode: Opcode) -> Self {
        Self {
            opcode,
            op1: Operand::UNUSED,
            op2: Operand::UNUSED,
            result: Operand::UNUSED,
            extended_value: 0,
            lineno: 0,
        }
    }

    /// Set op1
    pub const fn op1(mut self, op: Operand) -> Self {
        self.op1 = op;
        self
    }

    /// Set op2
    pub const fn op2(mut self, op: Operand) -> Self {
        self.op2 = op;
        self
    }

    /// Set result
    pub const fn result(mut self, op: Operand) -> Self {
        self.result = op;
        self
    }

    /// Set extended value
    pub const fn ext(mut self, value: u32) -> Self {
        self.extended_value = value;
        self
    }

    /// Set source line
    pub const fn line(mut self, lineno: u32) -> Self {
        self.lineno = lineno;
        self
    }

    /// `result = op1 <op> op2`
    pub const fn binary(opcode: Opcode, op1: Operand, op2: Operand, result: Operand) -> Self {
        Self::new(opcode).op1(op1).op2(op2).result(result)
    }

    /// Unconditional jump to `target`
    pub const fn jmp(target: u32) -> Self {
        Self::new(Opcode::Jmp).op1(Operand::num(target))
    }

    /// Conditional jump (`JMPZ` family) on `cond` to `target`
    pub const fn branch(opcode: Opcode, cond: Operand, target: u32) -> Self {
        Self::new(opcode).op1(cond).op2(Operand::num(target))
    }

    /// Explicit jump targets, in successor order.
    pub fn jump_targets(&self) -> SmallVec<[u32; 2]> {
        let mut targets = SmallVec::new();
        match self.opcode {
            Opcode::Jmp | Opcode::FastCall => targets.push(self.op1.num),
            Opcode::Jmpz | Opcode::Jmpnz | Opcode::JmpzEx | Opcode::JmpnzEx | Opcode::New => {
                targets.push(self.op2.num)
            }
            Opcode::Jmpznz => {
                targets.push(self.op2.num);
                targets.push(self.extended_value);
            }
            Opcode::Catch if self.extended_value & CATCH_LAST == 0 => targets.push(self.op2.num),
            _ => {}
        }
        targets
    }

    /// True when control can continue with the next instruction.
    pub fn falls_through(&self) -> bool {
        !self.opcode.is_terminator()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn targets_of_jumps() {
        assert_eq!(Instruction::jmp(7).jump_targets().as_slice(), &[7]);
        let jz = Instruction::branch(Opcode::Jmpz, Operand::tmp(3), 4);
        assert_eq!(jz.jump_targets().as_slice(), &[4]);
        let jznz = Instruction::new(Opcode::Jmpznz)
            .op1(Operand::cv(0))
            .op2(Operand::num(2))
            .ext(9);
        assert_eq!(jznz.jump_targets().as_slice(), &[2, 9]);
        assert!(Instruction::new(Opcode::Add).jump_targets().is_empty());
    }

    #[test]
    fn terminators_do_not_fall_through() {
        assert!(!Instruction::jmp(0).falls_through());
        assert!(Instruction::branch(Opcode::Jmpnz, Operand::cv(0), 0).falls_through());
    }
}
