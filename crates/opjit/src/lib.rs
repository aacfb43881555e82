//! # opjit
//!
//! Method-level JIT for zval bytecode. Each op array is translated, with
//! the type and SSA facts computed for it, into Cranelift IR and from
//! there into native code placed in a private executable arena.
//!
//! ## Design Principles
//!
//! - **Interpreter-compatible**: compiled bodies are opcode handlers; they
//!   keep the frame, the current opline and the pending exception exactly
//!   as the interpreter would
//! - **Facts-driven**: every type test the facts rule out is omitted, and
//!   provably scalar values may live in registers
//! - **Total fallback**: a function the translator cannot handle is left
//!   to the interpreter, untouched
//! - **Explicit runtime**: every process-wide slot and helper is reached
//!   through a [`RuntimeContext`] passed in by the host

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod arena;
pub mod compiler;
pub mod error;
pub mod helpers;
pub mod layout;
pub mod literals;
pub mod options;
pub mod regalloc;
pub mod runtime;
mod translate;

pub use arena::CodeArena;
pub use compiler::{CompiledFunction, JitCompiler};
pub use error::{JitError, Result};
pub use helpers::{HelperKind, RuntimeHelpers};
pub use options::{JitOptions, OptLevel};
pub use regalloc::{RegKind, Residency};
pub use runtime::RuntimeContext;
