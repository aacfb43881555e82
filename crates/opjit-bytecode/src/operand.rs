//! Instruction operands

use serde::{Deserialize, Serialize};

/// How an operand slot is addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum OperandKind {
    /// Slot is not used (or carries a plain number)
    #[default]
    Unused = 0,
    /// Index into the literal table
    Const = 1,
    /// Temporary produced and consumed exactly once
    TmpVar = 2,
    /// General variable, may hold an indirect pointer into a container
    Var = 3,
    /// Compiled (named) variable
    Cv = 4,
}

/// One operand of an instruction.
///
/// For `TmpVar`, `Var` and `Cv` operands `num` is the frame slot index:
/// compiled variables occupy `0..last_var` and temporaries follow them.
/// For `Const` it is the literal index; for `Unused` it may carry a plain
/// number such as an argument position or a jump target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(C)]
pub struct Operand {
    /// Addressing kind
    pub kind: OperandKind,
    /// Slot, literal index or plain number
    pub num: u32,
}

impl Operand {
    /// An unused operand
    pub const UNUSED: Self = Self {
        kind: OperandKind::Unused,
        num: 0,
    };

    /// Compiled variable in frame slot `slot`
    #[inline]
    pub const fn cv(slot: u32) -> Self {
        Self {
            kind: OperandKind::Cv,
            num: slot,
        }
    }

    /// Temporary in frame slot `slot`
    #[inline]
    pub const fn tmp(slot: u32) -> Self {
        Self {
            kind: OperandKind::TmpVar,
            num: slot,
        }
    }

    /// General variable in frame slot `slot`
    #[inline]
    pub const fn var(slot: u32) -> Self {
        Self {
            kind: OperandKind::Var,
            num: slot,
        }
    }

    /// Literal `index`
    #[inline]
    pub const fn literal(index: u32) -> Self {
        Self {
            kind: OperandKind::Const,
            num: index,
        }
    }

    /// Unused slot carrying a plain number (jump target, argument number)
    #[inline]
    pub const fn num(value: u32) -> Self {
        Self {
            kind: OperandKind::Unused,
            num: value,
        }
    }

    /// Is this slot unused
    #[inline]
    pub const fn is_unused(self) -> bool {
        matches!(self.kind, OperandKind::Unused)
    }

    /// Is this a literal
    #[inline]
    pub const fn is_const(self) -> bool {
        matches!(self.kind, OperandKind::Const)
    }

    /// Is this a compiled variable
    #[inline]
    pub const fn is_cv(self) -> bool {
        matches!(self.kind, OperandKind::Cv)
    }

    /// Is this a temporary or general variable
    #[inline]
    pub const fn is_tmp_or_var(self) -> bool {
        matches!(self.kind, OperandKind::TmpVar | OperandKind::Var)
    }

    /// Does this operand address a frame slot
    #[inline]
    pub const fn is_slot(self) -> bool {
        matches!(
            self.kind,
            OperandKind::TmpVar | OperandKind::Var | OperandKind::Cv
        )
    }

    /// Same frame slot as `other`
    #[inline]
    pub fn same_slot(self, other: Operand) -> bool {
        self.is_slot() && other.is_slot() && self.num == other.num
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_aliasing() {
        assert!(Operand::cv(2).same_slot(Operand::tmp(2)));
        assert!(!Operand::cv(2).same_slot(Operand::literal(2)));
        assert!(!Operand::UNUSED.is_slot());
    }
}
