//! Register residency.
//!
//! A whole-function pre-pass deciding which SSA variables live in machine
//! registers instead of their frame slot. The decision is made once,
//! before any code is emitted, and the code generator only reads it.
//! A variable is resident for its entire lifetime or not at all.

use opjit_bytecode::{OpArray, Opcode, OperandSlot, SsaFacts, SsaVar, TypeMask, tag};
use rustc_hash::FxHashSet;
use smallvec::SmallVec;

/// Register class of a resident variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RegKind {
    /// Integer payload (`i64`)
    Long,
    /// Double payload (`f64`)
    Double,
    /// `null|false|true`, held as the type tag (`i8`)
    Tag,
}

impl RegKind {
    /// Register class able to hold every value of `types`.
    pub fn for_types(types: TypeMask) -> Option<Self> {
        match types.concrete() {
            Some(tag::LONG) => Some(Self::Long),
            Some(tag::DOUBLE) => Some(Self::Double),
            _ if !types.tags().is_empty() && types.tags().is_subset_of(TypeMask::SIMPLE) => {
                Some(Self::Tag)
            }
            _ => None,
        }
    }
}

/// Whether an instruction's translator accepts a register-resident value
/// in operand position `slot`.
///
/// Argument passing, property destinations, parameter binding and every
/// opcode executed through its interpreter handler need the value in its
/// frame slot.
pub fn supports_reg(opcode: Opcode, slot: OperandSlot) -> bool {
    use OperandSlot::{Op1, Op2, Result};
    match opcode {
        Opcode::Add
        | Opcode::Sub
        | Opcode::Mul
        | Opcode::Div
        | Opcode::Mod
        | Opcode::Sl
        | Opcode::Sr
        | Opcode::BwOr
        | Opcode::BwAnd
        | Opcode::BwXor
        | Opcode::IsIdentical
        | Opcode::IsNotIdentical
        | Opcode::IsEqual
        | Opcode::IsNotEqual
        | Opcode::IsSmaller
        | Opcode::IsSmallerOrEqual
        | Opcode::Case
        | Opcode::Assign => true,
        Opcode::Bool
        | Opcode::BoolNot
        | Opcode::TypeCheck
        | Opcode::QmAssign
        | Opcode::PreInc
        | Opcode::PreDec
        | Opcode::PostInc
        | Opcode::PostDec
        | Opcode::Jmpz
        | Opcode::Jmpnz
        | Opcode::Jmpznz
        | Opcode::JmpzEx
        | Opcode::JmpnzEx => matches!(slot, Op1 | Result),
        Opcode::Return | Opcode::IssetIsemptyCv => slot == Op1,
        Opcode::FetchDimR | Opcode::FetchDimIs | Opcode::IssetIsemptyDimObj => slot == Op2,
        _ => false,
    }
}

/// A copy synthesized on a block edge between a variable's register and
/// its frame slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Move {
    /// Load the slot into the register of the phi's destination
    MemToReg {
        /// Frame slot
        slot: u32,
        /// Destination register class
        kind: RegKind,
    },
    /// Store the register of the phi's source into the slot
    RegToMem {
        /// Frame slot
        slot: u32,
        /// Source register class
        kind: RegKind,
    },
}

/// Residency decision for every SSA variable of one function.
#[derive(Debug, Clone, Default)]
pub struct Residency {
    kinds: Vec<Option<RegKind>>,
    live: Vec<bool>,
}

impl Residency {
    /// Every variable memory-resident.
    pub fn none(facts: &SsaFacts) -> Self {
        Self {
            kinds: vec![None; facts.vars.len()],
            live: liveness(facts),
        }
    }

    /// Run the selection over `op_array` and its facts.
    pub fn select(op_array: &OpArray, facts: &SsaFacts) -> Self {
        let mut kinds: Vec<Option<RegKind>> = facts
            .vars
            .iter()
            .enumerate()
            .map(|(id, var)| candidate(op_array, facts, id as u32, var))
            .collect();

        // Exception landing code reads compiled variables from the frame.
        if !op_array.try_catch.is_empty() {
            for (kind, var) in kinds.iter_mut().zip(&facts.vars) {
                if var.var < op_array.last_var {
                    *kind = None;
                }
            }
        }

        loop {
            let mut changed = false;

            // A compiled variable's slot is shared by all its SSA versions:
            // either every version is resident or none is.
            let demoted: FxHashSet<u32> = facts
                .vars
                .iter()
                .zip(&kinds)
                .filter(|(var, kind)| var.var < op_array.last_var && kind.is_none())
                .map(|(var, _)| var.var)
                .collect();
            for (kind, var) in kinds.iter_mut().zip(&facts.vars) {
                if kind.is_some() && demoted.contains(&var.var) {
                    *kind = None;
                    changed = true;
                }
            }

            // Edges can move between a register and memory, not between
            // two register classes.
            for block in &facts.blocks {
                for phi in &block.phis {
                    let Some(dst) = kinds[phi.ssa_var as usize] else {
                        continue;
                    };
                    let mismatch = phi
                        .sources
                        .iter()
                        .any(|&src| matches!(kinds[src as usize], Some(k) if k != dst));
                    if mismatch {
                        kinds[phi.ssa_var as usize] = None;
                        changed = true;
                    }
                }
            }

            if !changed {
                break;
            }
        }

        let residency = Self {
            kinds,
            live: liveness(facts),
        };
        tracing::debug!(
            target: "opjit::regalloc",
            function = op_array.display_name(),
            vars = facts.vars.len(),
            resident = residency.resident_count(),
            "residency selected"
        );
        residency
    }

    /// Register class of `var`, `None` when it lives in its frame slot.
    #[inline]
    pub fn kind(&self, var: u32) -> Option<RegKind> {
        self.kinds.get(var as usize).copied().flatten()
    }

    /// `var` or a phi it transitively feeds is read.
    #[inline]
    pub fn is_live(&self, var: u32) -> bool {
        self.live.get(var as usize).copied().unwrap_or(true)
    }

    /// Number of resident variables.
    pub fn resident_count(&self) -> usize {
        self.kinds.iter().flatten().count()
    }

    /// Copies needed on the edge `pred -> succ`.
    pub fn edge_moves(&self, facts: &SsaFacts, pred: u32, succ: u32) -> SmallVec<[Move; 4]> {
        let mut moves = SmallVec::new();
        let block = &facts.blocks[succ as usize];
        let Some(index) = block.predecessor_index(pred) else {
            return moves;
        };
        for phi in &block.phis {
            if !self.is_live(phi.ssa_var) {
                continue;
            }
            let Some(&src) = phi.sources.get(index) else {
                continue;
            };
            match (self.kind(phi.ssa_var), self.kind(src)) {
                (Some(kind), None) => moves.push(Move::MemToReg {
                    slot: phi.var,
                    kind,
                }),
                (None, Some(kind)) => moves.push(Move::RegToMem {
                    slot: phi.var,
                    kind,
                }),
                _ => {}
            }
        }
        moves
    }
}

fn candidate(op_array: &OpArray, facts: &SsaFacts, id: u32, var: &SsaVar) -> Option<RegKind> {
    if var.definition.is_none() && var.definition_phi.is_none() {
        return None;
    }
    if var.types.may_be(tag::UNDEF) || var.types.may_be(tag::REFERENCE) {
        return None;
    }
    if var.var < op_array.last_var && op_array.cv_name(var.var) == "this" {
        return None;
    }
    let kind = RegKind::for_types(var.types)?;

    let slots = [OperandSlot::Op1, OperandSlot::Op2, OperandSlot::Result];
    if let Some(pc) = var.definition {
        let insn = op_array.instructions.get(pc as usize)?;
        let op = facts.op(pc as usize);
        for slot in slots {
            if op.def_of(slot) == Some(id) && !supports_reg(insn.opcode, slot) {
                return None;
            }
        }
    }
    for &pc in &var.uses {
        let insn = op_array.instructions.get(pc as usize)?;
        let op = facts.op(pc as usize);
        for slot in slots {
            if op.use_of(slot) == Some(id) && !supports_reg(insn.opcode, slot) {
                return None;
            }
        }
    }
    Some(kind)
}

/// A variable is live when it is read, or when it feeds (through any
/// chain of phis) a phi whose result is read.
fn liveness(facts: &SsaFacts) -> Vec<bool> {
    let mut live: Vec<bool> = facts.vars.iter().map(|v| !v.no_val).collect();
    let mut changed = true;
    while changed {
        changed = false;
        for (id, var) in facts.vars.iter().enumerate() {
            if live[id] {
                continue;
            }
            let feeds_live = var.phi_uses.iter().any(|at| {
                facts
                    .blocks
                    .get(at.block as usize)
                    .and_then(|b| b.phis.get(at.index as usize))
                    .is_some_and(|phi| live[phi.ssa_var as usize])
            });
            if feeds_live {
                live[id] = true;
                changed = true;
            }
        }
    }
    live
}
