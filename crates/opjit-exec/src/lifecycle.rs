use std::sync::{Mutex, MutexGuard, OnceLock};

use opjit::{CompiledFunction, JitCompiler, JitError, RuntimeContext};
use opjit_bytecode::{OpArray, SsaFacts};

use crate::config::config;
use crate::error::{ExecError, Result};

/// Snapshot of the lifecycle counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecStats {
    /// Functions compiled and installed
    pub compiled: u64,
    /// Functions left to the interpreter as unsupported
    pub rejected: u64,
    /// Compilations that failed for any other reason
    pub failed: u64,
    /// Machine code bytes emitted
    pub bytes_emitted: u64,
    /// Batches closed
    pub batches: u64,
}

#[derive(Default)]
struct ExecState {
    compiler: Option<JitCompiler>,
    /// The arena ran out: nothing more is compiled in this process.
    exhausted: bool,
    stats: ExecStats,
}

static EXEC_STATE: OnceLock<Mutex<ExecState>> = OnceLock::new();

fn lock_state() -> MutexGuard<'static, ExecState> {
    EXEC_STATE
        .get_or_init(|| Mutex::new(ExecState::default()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Compilation is possible: not disabled by configuration and the arena
/// has not run out.
pub fn is_enabled() -> bool {
    !config().disabled && !lock_state().exhausted
}

/// Create the process compiler bound to `runtime`, reserving `size`
/// bytes of executable memory (`0`: the configured size).
pub fn reserve(size: usize, runtime: RuntimeContext) -> Result<()> {
    let config = config();
    if config.disabled {
        return Err(ExecError::Disabled);
    }
    let mut state = lock_state();
    if state.compiler.is_some() {
        return Err(ExecError::AlreadyReserved);
    }

    let mut options = config.options;
    if size != 0 {
        options.arena_size = size;
    }
    let compiler = JitCompiler::new(options, runtime)?;
    tracing::info!(
        target: "opjit::exec",
        arena = compiler.arena().capacity(),
        opt_level = ?options.opt_level,
        verify = options.verify,
        "JIT reserved"
    );
    state.compiler = Some(compiler);
    Ok(())
}

/// Drop the process compiler and unmap its code.
///
/// # Safety
///
/// No dispatch slot may still point at code compiled since the matching
/// [`reserve`], and no compiled body may be executing.
pub unsafe fn release() -> Result<()> {
    let mut state = lock_state();
    let compiler = state.compiler.take().ok_or(ExecError::NotReserved)?;
    if config().stats {
        let stats = state.stats;
        tracing::info!(
            target: "opjit::exec",
            compiled = stats.compiled,
            rejected = stats.rejected,
            failed = stats.failed,
            bytes = stats.bytes_emitted,
            batches = stats.batches,
            arena_used = compiler.arena().used(),
            "JIT statistics"
        );
    }
    drop(compiler);
    tracing::info!(target: "opjit::exec", "JIT released");
    Ok(())
}

/// Compile `op_array` with the process compiler and install it.
pub fn compile(op_array: &OpArray, facts: &SsaFacts) -> Result<CompiledFunction> {
    if config().disabled {
        return Err(ExecError::Disabled);
    }
    let mut state = lock_state();
    if state.exhausted {
        return Err(ExecError::Disabled);
    }
    let ExecState {
        compiler,
        exhausted,
        stats,
    } = &mut *state;
    let compiler = compiler.as_mut().ok_or(ExecError::NotReserved)?;

    match compiler.compile(op_array, facts) {
        Ok(compiled) => {
            stats.compiled += 1;
            stats.bytes_emitted += compiled.size as u64;
            Ok(compiled)
        }
        Err(err) => {
            match err {
                JitError::Unsupported { .. } | JitError::UnsupportedInstruction { .. } => {
                    stats.rejected += 1;
                }
                JitError::ArenaExhausted { .. } => {
                    stats.failed += 1;
                    *exhausted = true;
                    tracing::warn!(
                        target: "opjit::exec",
                        function = op_array.display_name(),
                        "code arena exhausted, JIT disabled for the rest of the process"
                    );
                }
                _ => {
                    stats.failed += 1;
                    tracing::debug!(
                        target: "opjit::exec",
                        function = op_array.display_name(),
                        %err,
                        "compilation failed"
                    );
                }
            }
            Err(err.into())
        }
    }
}

/// Start compiling a group of functions; see [`JitCompiler::begin_batch`].
pub fn begin_batch() -> Result<()> {
    let mut state = lock_state();
    let compiler = state.compiler.as_mut().ok_or(ExecError::NotReserved)?;
    compiler.begin_batch()?;
    Ok(())
}

/// Finish the open batch, making its code executable. Returns the number
/// of functions compiled in it.
pub fn end_batch() -> Result<usize> {
    let mut state = lock_state();
    let compiler = state.compiler.as_mut().ok_or(ExecError::NotReserved)?;
    let count = compiler.end_batch()?;
    state.stats.batches += 1;
    Ok(count)
}

/// Current counters.
pub fn stats_snapshot() -> ExecStats {
    lock_state().stats
}

#[cfg(test)]
pub(crate) fn clear_for_tests() {
    *lock_state() = ExecState::default();
}

#[cfg(test)]
mod tests {
    use super::*;
    use opjit::{HelperKind, RuntimeHelpers};
    use opjit_bytecode::{Instruction, Literal, Opcode, Operand};

    extern "C" fn never_called() {
        unreachable!("compiled code is not run in these tests");
    }

    /// Context over leaked slots; nothing compiled against it is run.
    fn context() -> RuntimeContext {
        let slots: &'static mut [u64; 32] = Box::leak(Box::new([0; 32]));
        let base = slots.as_mut_ptr() as usize;
        let at = |i: usize| base + i * size_of::<u64>();
        let mut helpers = RuntimeHelpers::new();
        for &kind in HelperKind::ALL {
            // SAFETY: the helpers are never invoked.
            unsafe { helpers.set(kind, never_called as usize) };
        }
        RuntimeContext {
            exception: at(0),
            exception_op: at(2),
            opline_before_exception: at(6),
            current_execute_data: at(7),
            scope: at(8),
            vm_stack_top: at(9),
            vm_stack_end: at(10),
            uninitialized_zval: at(12),
            error_zval: at(14),
            empty_string: at(16),
            precision: at(24),
            exception_handler: never_called as usize,
            std_object_handlers: None,
            helpers,
        }
    }

    fn returns_null() -> OpArray {
        OpArray::builder()
            .name("null")
            .literal(Literal::Null)
            .instruction(Instruction::new(Opcode::Return).op1(Operand::literal(0)))
            .build()
            .expect("valid op array")
    }

    fn release_for_tests() {
        // SAFETY: nothing compiled in these tests is run.
        let _ = unsafe { release() };
        clear_for_tests();
    }

    #[test]
    fn misuse_is_reported() {
        let _guard = crate::test_lock();
        clear_for_tests();
        let op_array = returns_null();
        let facts = SsaFacts::untyped(&op_array);

        assert!(matches!(compile(&op_array, &facts), Err(ExecError::NotReserved)));
        assert!(matches!(begin_batch(), Err(ExecError::NotReserved)));
        // SAFETY: nothing was compiled.
        assert!(matches!(unsafe { release() }, Err(ExecError::NotReserved)));

        reserve(1 << 16, context()).expect("reserve should succeed");
        assert!(matches!(
            reserve(1 << 16, context()),
            Err(ExecError::AlreadyReserved)
        ));
        assert!(matches!(
            end_batch(),
            Err(ExecError::Jit(JitError::BatchState(_)))
        ));
        release_for_tests();
    }

    #[test]
    fn compiled_and_rejected_functions_are_counted() {
        let _guard = crate::test_lock();
        clear_for_tests();
        reserve(1 << 16, context()).expect("reserve should succeed");

        let op_array = returns_null();
        let compiled = compile(&op_array, &SsaFacts::untyped(&op_array))
            .expect("trivial function should compile");
        assert_eq!(op_array.dispatch().get(0), compiled.entry);

        let generator = OpArray::builder()
            .name("gen")
            .is_generator(true)
            .instruction(Instruction::new(Opcode::GeneratorCreate))
            .instruction(Instruction::new(Opcode::GeneratorReturn))
            .build()
            .expect("valid op array");
        let err = compile(&generator, &SsaFacts::untyped(&generator))
            .expect_err("generators should be rejected");
        assert!(matches!(err, ExecError::Jit(JitError::Unsupported { .. })));

        let stats = stats_snapshot();
        assert_eq!(stats.compiled, 1);
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.bytes_emitted, compiled.size as u64);
        release_for_tests();
    }

    #[test]
    fn batches_count_their_functions() {
        let _guard = crate::test_lock();
        clear_for_tests();
        reserve(1 << 16, context()).expect("reserve should succeed");

        let a = returns_null();
        let b = returns_null();
        begin_batch().expect("batch should open");
        assert!(matches!(
            begin_batch(),
            Err(ExecError::Jit(JitError::BatchState(_)))
        ));
        compile(&a, &SsaFacts::untyped(&a)).expect("first function should compile");
        compile(&b, &SsaFacts::untyped(&b)).expect("second function should compile");
        assert_eq!(end_batch().expect("batch should close"), 2);
        assert_eq!(stats_snapshot().batches, 1);
        release_for_tests();
    }

    #[test]
    fn exhausted_arena_disables_compilation() {
        let _guard = crate::test_lock();
        clear_for_tests();
        // rounded up to a single page
        reserve(1, context()).expect("reserve should succeed");
        assert!(is_enabled());

        let op_array = returns_null();
        let facts = SsaFacts::untyped(&op_array);
        let err = (0..100_000)
            .find_map(|_| compile(&op_array, &facts).err())
            .expect("a single page should fill up");
        assert!(matches!(err, ExecError::Jit(JitError::ArenaExhausted { .. })));
        assert!(!is_enabled());
        assert!(matches!(compile(&op_array, &facts), Err(ExecError::Disabled)));
        assert_eq!(stats_snapshot().failed, 1);

        // a fresh arena does not bring compilation back
        // SAFETY: nothing compiled in this test is run.
        unsafe { release() }.expect("release should succeed");
        reserve(1 << 16, context()).expect("reserve should succeed");
        assert!(!is_enabled());
        assert!(matches!(compile(&op_array, &facts), Err(ExecError::Disabled)));
        release_for_tests();
    }
}
