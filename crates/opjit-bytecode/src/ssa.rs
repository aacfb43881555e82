//! SSA and type-inference facts
//!
//! The translator treats these as a read-only oracle computed by an
//! earlier pass. [`FactsBuilder`] assembles them on top of the block
//! structure derived from the op array.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::cfg::{self, BasicBlock};
use crate::error::{BytecodeError, Result};
use crate::function::OpArray;
use crate::operand::Operand;
use crate::types::{TypeMask, ValueRange};

/// Which operand of an instruction a def or use refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperandSlot {
    /// op1
    Op1,
    /// op2
    Op2,
    /// result
    Result,
}

/// Location of a phi node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PhiRef {
    /// Block holding the phi
    pub block: u32,
    /// Position in the block's phi list
    pub index: u32,
}

/// Phi node merging one frame slot at a block head.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phi {
    /// Frame slot
    pub var: u32,
    /// SSA variable defined by the phi
    pub ssa_var: u32,
    /// Source SSA variable per predecessor, in predecessor order
    pub sources: SmallVec<[u32; 2]>,
}

/// Facts about the class of an object-typed value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassFacts {
    /// The class is proven to use the standard object handler table
    pub standard_handlers: bool,
    /// The value may be a subclass instance rather than the exact class
    pub is_instanceof: bool,
}

/// One SSA variable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SsaVar {
    /// Frame slot this variable lives in
    pub var: u32,
    /// Defining instruction
    pub definition: Option<u32>,
    /// Defining phi
    pub definition_phi: Option<PhiRef>,
    /// Instructions using this variable
    pub uses: Vec<u32>,
    /// Phis using this variable as a source
    pub phi_uses: Vec<PhiRef>,
    /// Possible types
    pub types: TypeMask,
    /// Proven integer range
    pub range: Option<ValueRange>,
    /// Proven class facts
    pub class: Option<ClassFacts>,
    /// The value is never read
    pub no_val: bool,
}

/// SSA defs and uses of one instruction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SsaOp {
    /// Variable read through op1
    pub op1_use: Option<u32>,
    /// Variable read through op2
    pub op2_use: Option<u32>,
    /// Variable read through result (compound assignment targets)
    pub result_use: Option<u32>,
    /// Variable written through op1
    pub op1_def: Option<u32>,
    /// Variable written through op2
    pub op2_def: Option<u32>,
    /// Variable written through result
    pub result_def: Option<u32>,
}

impl SsaOp {
    /// Use in `slot`
    pub fn use_of(&self, slot: OperandSlot) -> Option<u32> {
        match slot {
            OperandSlot::Op1 => self.op1_use,
            OperandSlot::Op2 => self.op2_use,
            OperandSlot::Result => self.result_use,
        }
    }

    /// Def in `slot`
    pub fn def_of(&self, slot: OperandSlot) -> Option<u32> {
        match slot {
            OperandSlot::Op1 => self.op1_def,
            OperandSlot::Op2 => self.op2_def,
            OperandSlot::Result => self.result_def,
        }
    }
}

/// How a compiled body hands its result back
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReturnConv {
    /// Full frame, returns an execution status code
    #[default]
    Status,
    /// Clone returning nothing
    Void,
    /// Clone returning an integer in a register
    Long,
    /// Clone returning a double in a register
    Double,
    /// Clone returning a `null|false|true` tag in a register
    Bool,
}

impl ReturnConv {
    /// True for register-returning or void clones
    pub const fn is_clone(self) -> bool {
        !matches!(self, Self::Status)
    }
}

/// Whole-function facts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionFacts {
    /// The function never needs frame teardown beyond the basics
    pub no_frame: bool,
    /// Statically resolvable direct callee
    pub direct_callee: bool,
    /// Specialization index (0 for the generic body)
    pub clone_num: u32,
    /// Return convention of this body
    pub return_conv: ReturnConv,
}

/// Entry of an already-compiled register-returning clone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloneEntry {
    /// Address of the clone's native code
    pub entry: usize,
    /// Its return convention
    pub conv: ReturnConv,
}

/// What kind of function a call site resolves to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CalleeKind {
    /// Natively implemented
    Internal {
        /// Native handler address
        handler: usize,
    },
    /// Bytecode function
    User {
        /// Compiled variables
        last_var: u32,
        /// Temporaries
        temporaries: u32,
        /// Generator body
        is_generator: bool,
        /// Variadic last parameter
        is_variadic: bool,
        /// Dispatch slot of the callee's first instruction when it holds
        /// native code compiled in the same batch
        entry_slot: Option<usize>,
        /// Register-returning clone
        clone: Option<CloneEntry>,
    },
}

/// Statically resolved callee
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Callee {
    /// Address of the runtime function object
    pub func: usize,
    /// Function name
    pub name: String,
    /// Internal or user
    pub kind: CalleeKind,
    /// Declared parameters
    pub num_args: u32,
    /// Required parameters
    pub required_num_args: u32,
    /// Parameters carry type declarations
    pub has_type_hints: bool,
    /// Bit `n` set when parameter `n` (0-based) is by reference
    pub by_ref_args: u64,
    /// Returns by reference
    pub returns_reference: bool,
    /// Deprecated function
    pub is_deprecated: bool,
    /// Abstract method
    pub is_abstract: bool,
}

impl Callee {
    /// Parameter `arg_num` (1-based) is by reference
    pub fn arg_by_ref(&self, arg_num: u32) -> bool {
        arg_num >= 1 && arg_num <= 64 && self.by_ref_args & (1 << (arg_num - 1)) != 0
    }

    /// Is an internal function
    pub fn is_internal(&self) -> bool {
        matches!(self.kind, CalleeKind::Internal { .. })
    }
}

/// A paired call-opening and call-invoking instruction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSite {
    /// `INIT_*` / `NEW` instruction
    pub init: u32,
    /// `DO_*` instruction
    pub do_call: u32,
    /// Arguments passed
    pub num_args: u32,
    /// Resolved callee
    pub callee: Option<Callee>,
}

/// Everything the translator knows about one op array.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SsaFacts {
    /// SSA variables
    pub vars: Vec<SsaVar>,
    /// Per-instruction defs and uses
    pub ops: Vec<SsaOp>,
    /// Basic blocks in layout order
    pub blocks: Vec<BasicBlock>,
    /// Block of every instruction
    pub block_of: Vec<u32>,
    /// Call sites
    pub calls: Vec<CallSite>,
    /// Whole-function facts
    pub function: FunctionFacts,
}

impl SsaFacts {
    /// Block structure only; every operand is untyped.
    pub fn untyped(op_array: &OpArray) -> Self {
        let (blocks, block_of) = cfg::build_blocks(op_array);
        Self {
            ops: vec![SsaOp::default(); op_array.instructions.len()],
            blocks,
            block_of,
            ..Self::default()
        }
    }

    /// Variable `id`
    #[inline]
    pub fn var(&self, id: u32) -> &SsaVar {
        &self.vars[id as usize]
    }

    /// Defs and uses of instruction `pc`
    #[inline]
    pub fn op(&self, pc: usize) -> SsaOp {
        self.ops.get(pc).copied().unwrap_or_default()
    }

    /// Block containing instruction `pc`
    #[inline]
    pub fn block_of(&self, pc: usize) -> u32 {
        self.block_of[pc]
    }

    /// Block starting exactly at instruction `pc`
    pub fn block_at(&self, pc: u32) -> Option<u32> {
        let id = *self.block_of.get(pc as usize)?;
        (self.blocks[id as usize].start == pc).then_some(id)
    }

    /// Call site opened by instruction `init`
    pub fn call_by_init(&self, init: u32) -> Option<&CallSite> {
        self.calls.iter().find(|c| c.init == init)
    }

    /// Call site invoked by instruction `do_call`
    pub fn call_by_do(&self, do_call: u32) -> Option<&CallSite> {
        self.calls.iter().find(|c| c.do_call == do_call)
    }

    /// `a` dominates `b` (reflexive)
    pub fn dominates(&self, a: u32, b: u32) -> bool {
        let mut cur = Some(b);
        while let Some(block) = cur {
            if block == a {
                return true;
            }
            cur = self.blocks[block as usize].idom;
        }
        false
    }

    /// Union of the types of every SSA variable living in `slot`
    pub fn slot_types(&self, slot: u32) -> Option<TypeMask> {
        let mut seen = false;
        let mut mask = TypeMask::NONE;
        for v in self.vars.iter().filter(|v| v.var == slot) {
            seen = true;
            mask = mask | v.types;
        }
        seen.then_some(mask)
    }
}

/// Assembles [`SsaFacts`] for an op array.
#[derive(Debug)]
pub struct FactsBuilder<'a> {
    op_array: &'a OpArray,
    facts: SsaFacts,
}

impl<'a> FactsBuilder<'a> {
    /// Start from the op array's block structure
    pub fn new(op_array: &'a OpArray) -> Self {
        Self {
            op_array,
            facts: SsaFacts::untyped(op_array),
        }
    }

    fn operand(&self, pc: u32, slot: OperandSlot) -> Operand {
        let insn = &self.op_array.instructions[pc as usize];
        match slot {
            OperandSlot::Op1 => insn.op1,
            OperandSlot::Op2 => insn.op2,
            OperandSlot::Result => insn.result,
        }
    }

    /// New SSA variable in frame slot `slot`
    pub fn var(&mut self, slot: u32, types: TypeMask) -> u32 {
        self.facts.vars.push(SsaVar {
            var: slot,
            definition: None,
            definition_phi: None,
            uses: Vec::new(),
            phi_uses: Vec::new(),
            types,
            range: None,
            class: None,
            no_val: false,
        });
        (self.facts.vars.len() - 1) as u32
    }

    /// Record that instruction `pc` defines `var` through `slot`
    pub fn define(&mut self, var: u32, pc: u32, slot: OperandSlot) -> &mut Self {
        let op = &mut self.facts.ops[pc as usize];
        match slot {
            OperandSlot::Op1 => op.op1_def = Some(var),
            OperandSlot::Op2 => op.op2_def = Some(var),
            OperandSlot::Result => op.result_def = Some(var),
        }
        self.facts.vars[var as usize].definition = Some(pc);
        self
    }

    /// Record that instruction `pc` reads `var` through `slot`
    pub fn use_var(&mut self, var: u32, pc: u32, slot: OperandSlot) -> &mut Self {
        let op = &mut self.facts.ops[pc as usize];
        match slot {
            OperandSlot::Op1 => op.op1_use = Some(var),
            OperandSlot::Op2 => op.op2_use = Some(var),
            OperandSlot::Result => op.result_use = Some(var),
        }
        let uses = &mut self.facts.vars[var as usize].uses;
        if !uses.contains(&pc) {
            uses.push(pc);
        }
        self
    }

    /// New variable defined by `pc` through `slot`, in that operand's frame slot
    pub fn def(&mut self, pc: u32, slot: OperandSlot, types: TypeMask) -> u32 {
        let frame_slot = self.operand(pc, slot).num;
        let var = self.var(frame_slot, types);
        self.define(var, pc, slot);
        var
    }

    /// New variable read by `pc` through `slot`, with no visible definition
    pub fn input(&mut self, pc: u32, slot: OperandSlot, types: TypeMask) -> u32 {
        let frame_slot = self.operand(pc, slot).num;
        let var = self.var(frame_slot, types);
        self.use_var(var, pc, slot);
        var
    }

    /// Set the proven integer range of `var`
    pub fn range(&mut self, var: u32, range: ValueRange) -> &mut Self {
        self.facts.vars[var as usize].range = Some(range);
        self
    }

    /// Set the class facts of `var`
    pub fn class(&mut self, var: u32, class: ClassFacts) -> &mut Self {
        self.facts.vars[var as usize].class = Some(class);
        self
    }

    /// Mark `var` as never read
    pub fn no_val(&mut self, var: u32) -> &mut Self {
        self.facts.vars[var as usize].no_val = true;
        self
    }

    /// Add a phi at the head of `block` defining `dst` from `sources`
    /// (one per predecessor, in predecessor order)
    pub fn phi(&mut self, block: u32, dst: u32, sources: &[u32]) -> &mut Self {
        let slot = self.facts.vars[dst as usize].var;
        let phis = &mut self.facts.blocks[block as usize].phis;
        let at = PhiRef {
            block,
            index: phis.len() as u32,
        };
        phis.push(Phi {
            var: slot,
            ssa_var: dst,
            sources: sources.iter().copied().collect(),
        });
        self.facts.vars[dst as usize].definition_phi = Some(at);
        for &src in sources {
            let phi_uses = &mut self.facts.vars[src as usize].phi_uses;
            if !phi_uses.contains(&at) {
                phi_uses.push(at);
            }
        }
        self
    }

    /// Add a call site
    pub fn call(&mut self, site: CallSite) -> &mut Self {
        self.facts.calls.push(site);
        self
    }

    /// Set whole-function facts
    pub fn function(&mut self, function: FunctionFacts) -> &mut Self {
        self.facts.function = function;
        self
    }

    /// Validate and return the facts
    pub fn build(self) -> Result<SsaFacts> {
        let facts = self.facts;
        let var_count = facts.vars.len() as u32;
        for (pc, op) in facts.ops.iter().enumerate() {
            let all = [
                op.op1_use,
                op.op2_use,
                op.result_use,
                op.op1_def,
                op.op2_def,
                op.result_def,
            ];
            if all.iter().flatten().any(|&v| v >= var_count) {
                return Err(BytecodeError::InconsistentFacts(format!(
                    "instruction {pc} references an unknown SSA variable"
                )));
            }
        }
        for (id, block) in facts.blocks.iter().enumerate() {
            for phi in &block.phis {
                if phi.sources.len() != block.predecessors.len() {
                    return Err(BytecodeError::InconsistentFacts(format!(
                        "phi of slot {} in block {id} has {} sources for {} predecessors",
                        phi.var,
                        phi.sources.len(),
                        block.predecessors.len()
                    )));
                }
            }
        }
        for call in &facts.calls {
            if call.init as usize >= facts.ops.len() || call.do_call as usize >= facts.ops.len() {
                return Err(BytecodeError::InconsistentFacts(format!(
                    "call site {}..{} outside the function",
                    call.init, call.do_call
                )));
            }
        }
        Ok(facts)
    }
}
