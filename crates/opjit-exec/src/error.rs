//! Lifecycle errors

use opjit::JitError;

/// Errors of the process-wide JIT lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    /// The compiler rejected or failed the request.
    #[error(transparent)]
    Jit(#[from] JitError),

    /// [`crate::reserve`] was called twice without a [`crate::release`].
    #[error("JIT is already reserved")]
    AlreadyReserved,

    /// The JIT has not been reserved.
    #[error("JIT is not reserved")]
    NotReserved,

    /// Compilation is switched off, by configuration or after the code
    /// arena ran out.
    #[error("JIT is disabled")]
    Disabled,
}

/// Result type for lifecycle operations
pub type Result<T> = std::result::Result<T, ExecError>;
