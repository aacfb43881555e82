//! Bytecode to Cranelift IR translation.
//!
//! One [`Translator`] exists per compiled function. It owns the
//! [`FunctionBuilder`] and everything that is only meaningful while the
//! function's IR is being built: block labels, the opline-tracking flag,
//! register variables of resident SSA values, lazily created exception
//! landing blocks and cached helper signatures.
//!
//! # Layout
//!
//! The `impl Translator` blocks are split by concern:
//!
//! - `value`: typed loads and stores of zval fields
//! - `refcount`: add/remove references, destructors, cycle roots
//! - `bridge`: helper signatures, calls, biased branches
//! - `opline`: current-opline tracking and exception checks
//! - `operand`: operand addresses, undefined variables, dereferencing
//! - `arith`, `compare`, `concat`, `assign`: operator families
//! - `dim`, `object`: array dimensions and object properties
//! - `call`: call frames, argument passing, returns, the function epilogue
//! - `driver`: block walk, edge reconciliation, opcode dispatch

mod arith;
mod assign;
mod bridge;
mod call;
mod compare;
mod concat;
mod dim;
mod driver;
mod object;
mod opline;
mod operand;
mod refcount;
mod value;

use cranelift_codegen::ir::{Block, SigRef, StackSlot, Type, Value};
use cranelift_codegen::isa::CallConv;
use cranelift_frontend::{FunctionBuilder, Variable};
use opjit_bytecode::{OpArray, ReturnConv, SsaFacts};
use rustc_hash::FxHashMap;

use crate::helpers::HELPER_COUNT;
use crate::literals::LiteralPool;
use crate::regalloc::{Move, RegKind, Residency};
use crate::runtime::RuntimeContext;

pub(crate) use call::clone_return_type;
pub(crate) use driver::{check_supported, translate};

use bridge::SigKey;

/// Everything a translation reads.
pub(crate) struct TranslateInput<'a> {
    pub op_array: &'a OpArray,
    pub facts: &'a SsaFacts,
    pub rt: &'a RuntimeContext,
    pub literals: &'a LiteralPool,
    pub residency: &'a Residency,
    /// Interpreter handler of every instruction, captured before patching
    pub handlers: &'a [usize],
    /// Helper addresses, indexed by `HelperKind as usize`
    pub helpers: [usize; HELPER_COUNT],
    pub ptr: Type,
    pub call_conv: CallConv,
}

/// Block filled after the main walk.
#[derive(Debug)]
enum Deferred {
    /// Landing block of try/catch entry `index`
    CatchLanding { block: Block, index: usize },
    /// Shared exit for exceptions not caught in this function
    ExceptionExit(Block),
    /// Function epilogue
    FuncExit(Block),
    /// Register/memory copies interposed on one CFG edge
    Edge {
        block: Block,
        moves: smallvec::SmallVec<[Move; 4]>,
        target: Block,
    },
}

/// Per-function translation state.
pub(crate) struct Translator<'a, 'f> {
    b: FunctionBuilder<'f>,
    op_array: &'a OpArray,
    facts: &'a SsaFacts,
    rt: &'a RuntimeContext,
    literals: &'a LiteralPool,
    residency: &'a Residency,
    handlers: &'a [usize],
    helper_addrs: [usize; HELPER_COUNT],
    /// Helpers the emitted code calls
    used_helpers: [bool; HELPER_COUNT],
    ptr: Type,
    call_conv: CallConv,
    conv: ReturnConv,
    /// Frame of the function being executed
    ex: Value,
    /// Instruction whose address `EX(opline)` is known to hold
    opline_valid: Option<usize>,
    regs: FxHashMap<(u32, RegKind), Variable>,
    blocks: Vec<Option<Block>>,
    catch_blocks: Vec<Option<Block>>,
    exception_exit: Option<Block>,
    func_exit: Option<Block>,
    /// `$this` was proven to be an object somewhere in the block
    this_checked: Vec<bool>,
    scratch: Vec<StackSlot>,
    scratch_used: usize,
    sigs: FxHashMap<SigKey, SigRef>,
    deferred: Vec<Deferred>,
    /// Destructor calls can raise; off while deferred blocks are filled
    dtor_checks: bool,
    /// The current instruction ran a destructor that can raise
    dtor_check_due: bool,
    /// Instruction being translated
    pc: usize,
    /// Bytecode block being translated
    block: u32,
}

impl<'a, 'f> Translator<'a, 'f> {
    fn new(b: FunctionBuilder<'f>, input: &TranslateInput<'a>, ex: Value) -> Self {
        let facts = input.facts;
        Self {
            b,
            op_array: input.op_array,
            facts,
            rt: input.rt,
            literals: input.literals,
            residency: input.residency,
            handlers: input.handlers,
            helper_addrs: input.helpers,
            used_helpers: [false; HELPER_COUNT],
            ptr: input.ptr,
            call_conv: input.call_conv,
            conv: facts.function.return_conv,
            ex,
            opline_valid: None,
            regs: FxHashMap::default(),
            blocks: vec![None; facts.blocks.len()],
            catch_blocks: vec![None; input.op_array.try_catch.len()],
            exception_exit: None,
            func_exit: None,
            this_checked: vec![false; facts.blocks.len()],
            scratch: Vec::new(),
            scratch_used: 0,
            sigs: FxHashMap::default(),
            deferred: Vec::new(),
            dtor_checks: true,
            dtor_check_due: false,
            pc: 0,
            block: 0,
        }
    }

    /// Native block of bytecode block `id`.
    fn native_block(&self, id: u32) -> Block {
        match self.blocks.get(id as usize).copied().flatten() {
            Some(block) => block,
            None => panic!("bytecode block {id} has no native block (unreachable?)"),
        }
    }

    /// Native block of the bytecode block starting at `pc`.
    fn block_at_pc(&self, pc: u32) -> Block {
        self.native_block(self.facts.block_of(pc as usize))
    }
}
