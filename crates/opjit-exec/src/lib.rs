//! # opjit-exec
//!
//! Process-wide lifecycle of the method JIT:
//! - environment configuration (`OPJIT_*`)
//! - one compiler per process, reserved and released by the host
//! - compilation and batching on behalf of the interpreter
//! - counters

#![warn(clippy::all)]
#![warn(missing_docs)]

mod config;
mod error;
mod lifecycle;

pub use config::{ExecConfig, config};
pub use error::{ExecError, Result};
pub use lifecycle::{
    ExecStats, begin_batch, compile, end_batch, is_enabled, release, reserve, stats_snapshot,
};

#[cfg(test)]
pub(crate) fn test_lock() -> std::sync::MutexGuard<'static, ()> {
    use std::sync::{Mutex, OnceLock};

    static TEST_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    TEST_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
