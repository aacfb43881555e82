//! JIT errors

use cranelift_codegen::CodegenError;

/// Errors produced while compiling an op array.
///
/// Every variant leaves the op array's dispatch slots untouched: the
/// function keeps running in the interpreter.
#[derive(Debug, thiserror::Error)]
pub enum JitError {
    /// Function shape the translator never handles (generator, `finally`).
    #[error("unsupported function: {reason}")]
    Unsupported {
        /// What disqualified the function
        reason: &'static str,
    },

    /// Opcode without a translator or generic fallback.
    #[error("unsupported instruction at pc {pc}: {opcode}")]
    UnsupportedInstruction {
        /// Instruction index
        pc: usize,
        /// Opcode name
        opcode: &'static str,
    },

    /// A runtime helper the generated code needs was not registered.
    #[error("runtime helper {0} is not registered")]
    MissingHelper(&'static str),

    /// Cranelift failed to compile the function.
    #[error("code generation failed: {0}")]
    Codegen(String),

    /// The generated IR failed verification.
    #[error("IR verification failed: {0}")]
    Verifier(String),

    /// Generated code needs relocations; it must be position independent.
    #[error("generated code carries {count} relocations")]
    Relocation {
        /// Number of relocations
        count: usize,
    },

    /// Executable arena is full.
    #[error("code arena exhausted: requested {requested} bytes, {remaining} remaining")]
    ArenaExhausted {
        /// Bytes requested
        requested: usize,
        /// Bytes left
        remaining: usize,
    },

    /// Compilation attempted without a reserved arena.
    #[error("code arena is not reserved")]
    ArenaNotReserved,

    /// Mapping the arena failed.
    #[error("failed to reserve code arena: {0}")]
    ArenaReserve(#[from] std::io::Error),

    /// `begin_batch` / `end_batch` misuse.
    #[error("batch state error: {0}")]
    BatchState(&'static str),

    /// Host ISA could not be configured.
    #[error("target ISA unavailable: {0}")]
    Isa(String),
}

impl From<CodegenError> for JitError {
    fn from(err: CodegenError) -> Self {
        match err {
            CodegenError::Verifier(errors) => Self::Verifier(errors.to_string()),
            other => Self::Codegen(other.to_string()),
        }
    }
}

/// Result alias for JIT operations
pub type Result<T> = std::result::Result<T, JitError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_failure() {
        let err = JitError::UnsupportedInstruction {
            pc: 4,
            opcode: "YIELD",
        };
        assert_eq!(err.to_string(), "unsupported instruction at pc 4: YIELD");
        let err = JitError::ArenaExhausted {
            requested: 128,
            remaining: 16,
        };
        assert!(err.to_string().contains("128"));
    }
}
