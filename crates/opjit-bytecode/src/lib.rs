//! # opjit bytecode
//!
//! Input model of the opjit translator: op arrays of zval-slot bytecode
//! and the SSA / type-inference facts computed for them.
//!
//! ## Design Principles
//!
//! - **Three-address**: instructions read `op1`/`op2` and write `result`
//!   frame slots
//! - **Stable oplines**: instruction addresses never move, so native code
//!   can store them in the frame
//! - **Facts are read-only**: the translator only queries [`SsaFacts`]

#![warn(clippy::all)]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod cfg;
pub mod error;
pub mod function;
pub mod instruction;
pub mod literal;
pub mod opcode;
pub mod operand;
pub mod ssa;
pub mod types;

pub use cfg::{BasicBlock, BlockFlags};
pub use error::BytecodeError;
pub use function::{ArgInfo, DispatchTable, FunctionFlags, OpArray, OpArrayBuilder, TryCatchElement};
pub use instruction::Instruction;
pub use literal::{ArrayKey, Literal};
pub use opcode::Opcode;
pub use operand::{Operand, OperandKind};
pub use ssa::{
    CallSite, Callee, CalleeKind, ClassFacts, CloneEntry, FactsBuilder, FunctionFacts, OperandSlot,
    Phi, PhiRef, ReturnConv, SsaFacts, SsaOp, SsaVar,
};
pub use types::{TypeMask, ValueRange, tag};
