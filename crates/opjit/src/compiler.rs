//! Per-function compilation lifecycle.
//!
//! [`JitCompiler`] owns the target ISA, the executable arena and the
//! reusable Cranelift contexts. Compiling an op array runs, in order:
//! the up-front support check, residency selection, translation to IR,
//! helper availability checks, Cranelift code generation, the copy into
//! the arena and finally the patch of the op array's dispatch slots.
//! Any failure before the patch leaves the op array untouched.

use cranelift_codegen::control::ControlPlane;
use cranelift_codegen::ir::{AbiParam, Function, Signature, UserFuncName, types};
use cranelift_codegen::isa::OwnedTargetIsa;
use cranelift_codegen::settings::{self, Configurable};
use cranelift_frontend::FunctionBuilderContext;
use opjit_bytecode::{OpArray, ReturnConv, SsaFacts};
use rustc_hash::FxHashMap;

use crate::arena::CodeArena;
use crate::error::{JitError, Result};
use crate::helpers::{HELPER_COUNT, HelperKind};
use crate::literals::LiteralPool;
use crate::options::JitOptions;
use crate::regalloc::Residency;
use crate::runtime::RuntimeContext;
use crate::translate::{self, TranslateInput};

/// Native code produced for one op array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompiledFunction {
    /// Entry address inside the arena
    pub entry: usize,
    /// Code size in bytes
    pub size: usize,
    /// Return convention of the entry
    pub conv: ReturnConv,
}

impl CompiledFunction {
    /// The entry is an opcode handler (`(execute_data, opline) -> status`)
    /// installed in the op array's dispatch table.
    pub fn is_handler(&self) -> bool {
        !self.conv.is_clone()
    }
}

/// State kept per op array across compilations.
///
/// The literal pool backs constants embedded in generated code, so it
/// lives as long as the compiler. The handlers are the dispatch table as
/// it was before the first patch.
struct Prepared {
    literals: LiteralPool,
    handlers: Vec<usize>,
}

impl Prepared {
    fn new(op_array: &OpArray) -> Self {
        let dispatch = op_array.dispatch();
        Self {
            literals: LiteralPool::new(&op_array.literals),
            handlers: (0..dispatch.len()).map(|pc| dispatch.get(pc)).collect(),
        }
    }
}

/// Method-level JIT compiler.
pub struct JitCompiler {
    isa: OwnedTargetIsa,
    options: JitOptions,
    rt: RuntimeContext,
    arena: CodeArena,
    context: cranelift_codegen::Context,
    function_builder_ctx: FunctionBuilderContext,
    prepared: FxHashMap<usize, Prepared>,
    /// Functions compiled since `begin_batch`
    batch: Option<usize>,
    next_function_id: u32,
}

impl JitCompiler {
    /// Configure the host ISA and reserve `options.arena_size` bytes of
    /// executable memory.
    pub fn new(options: JitOptions, rt: RuntimeContext) -> Result<Self> {
        let isa = host_isa(&options)?;
        let arena = CodeArena::reserve(options.arena_size)?;
        Ok(Self {
            isa,
            options,
            rt,
            arena,
            context: cranelift_codegen::Context::new(),
            function_builder_ctx: FunctionBuilderContext::new(),
            prepared: FxHashMap::default(),
            batch: None,
            next_function_id: 0,
        })
    }

    /// Options this compiler was created with.
    pub fn options(&self) -> &JitOptions {
        &self.options
    }

    /// Runtime context compiled code is bound to.
    pub fn runtime(&self) -> &RuntimeContext {
        &self.rt
    }

    /// Executable arena.
    pub fn arena(&self) -> &CodeArena {
        &self.arena
    }

    /// A batch is open.
    pub fn in_batch(&self) -> bool {
        self.batch.is_some()
    }

    /// Open a batch: the arena stays writable until [`Self::end_batch`].
    ///
    /// Functions compiled inside a batch are installed immediately but
    /// must not run before the batch ends.
    pub fn begin_batch(&mut self) -> Result<()> {
        if self.batch.is_some() {
            return Err(JitError::BatchState("batch already open"));
        }
        self.arena.begin_write()?;
        self.batch = Some(0);
        tracing::debug!(target: "opjit::compile", "batch opened");
        Ok(())
    }

    /// Close the batch and make its code executable. Returns the number of
    /// functions compiled in it.
    pub fn end_batch(&mut self) -> Result<usize> {
        let Some(count) = self.batch.take() else {
            return Err(JitError::BatchState("no batch open"));
        };
        self.arena.finish_write()?;
        tracing::debug!(
            target: "opjit::compile",
            functions = count,
            used = self.arena.used(),
            "batch finalized"
        );
        Ok(count)
    }

    /// Compile `op_array` and install the result.
    ///
    /// Status bodies replace the handler of instruction 0 and of every
    /// instruction a caller may start at after skipping leading `RECV`s.
    /// Register-returning clones are not installed; callers reach them
    /// through their [`CompiledFunction`].
    pub fn compile(&mut self, op_array: &OpArray, facts: &SsaFacts) -> Result<CompiledFunction> {
        let name = op_array.display_name();
        if let Err(err) = translate::check_supported(op_array, facts) {
            tracing::debug!(target: "opjit::compile", function = name, %err, "rejected");
            return Err(err);
        }

        let code = self.codegen(op_array, facts)?;
        let conv = facts.function.return_conv;

        if self.batch.is_none() {
            self.arena.begin_write()?;
        }
        let written = self.arena.alloc(&code);
        if self.batch.is_none() {
            // flip back even when the allocation failed
            self.arena.finish_write()?;
        }
        let entry = written?;
        let compiled = CompiledFunction {
            entry,
            size: code.len(),
            conv,
        };

        if compiled.is_handler() {
            // callers entering past k passed parameters start at pc k
            let dispatch = op_array.dispatch();
            let last = op_array.skippable_recv_count().min(dispatch.len() - 1);
            for pc in 0..=last {
                dispatch.set(pc, entry);
            }
        }
        if let Some(count) = self.batch.as_mut() {
            *count += 1;
        }

        tracing::debug!(
            target: "opjit::compile",
            function = name,
            entry = format_args!("{entry:#x}"),
            size = compiled.size,
            clone = conv.is_clone(),
            "compiled"
        );
        Ok(compiled)
    }

    /// Translate and generate machine code without touching the arena.
    fn codegen(&mut self, op_array: &OpArray, facts: &SsaFacts) -> Result<Vec<u8>> {
        let residency = Residency::select(op_array, facts);
        let prepared = self
            .prepared
            .entry(op_array as *const OpArray as usize)
            .or_insert_with(|| Prepared::new(op_array));

        let ptr = self.isa.pointer_type();
        let call_conv = self.isa.default_call_conv();
        let signature = entry_signature(facts.function.return_conv, ptr, call_conv);

        let id = self.next_function_id;
        self.next_function_id = self.next_function_id.wrapping_add(1);
        self.context.clear();
        self.context.func = Function::with_name_signature(UserFuncName::user(0, id), signature);

        let helpers: [usize; HELPER_COUNT] =
            std::array::from_fn(|i| self.rt.helpers.get(HelperKind::ALL[i]).unwrap_or(0));
        let input = TranslateInput {
            op_array,
            facts,
            rt: &self.rt,
            literals: &prepared.literals,
            residency: &residency,
            handlers: &prepared.handlers,
            helpers,
            ptr,
            call_conv,
        };
        let used = translate::translate(
            &mut self.context.func,
            &mut self.function_builder_ctx,
            &input,
        );
        for kind in used {
            self.rt.helpers.require(kind)?;
        }

        let compiled = self
            .context
            .compile(&*self.isa, &mut ControlPlane::default())
            .map_err(|err| JitError::from(err.inner))?;
        let relocs = compiled.buffer.relocs().len();
        if relocs != 0 {
            return Err(JitError::Relocation { count: relocs });
        }
        Ok(compiled.code_buffer().to_vec())
    }
}

impl std::fmt::Debug for JitCompiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JitCompiler")
            .field("isa", &self.isa.name())
            .field("options", &self.options)
            .field("arena", &self.arena)
            .field("batch", &self.batch)
            .finish_non_exhaustive()
    }
}

/// Signature of a compiled body with return convention `conv`.
fn entry_signature(conv: ReturnConv, ptr: types::Type, call_conv: cranelift_codegen::isa::CallConv) -> Signature {
    let mut sig = Signature::new(call_conv);
    sig.params.push(AbiParam::new(ptr));
    if conv.is_clone() {
        if let Some(ty) = translate::clone_return_type(conv) {
            sig.returns.push(AbiParam::new(ty));
        }
    } else {
        sig.params.push(AbiParam::new(ptr));
        sig.returns.push(AbiParam::new(types::I32));
    }
    sig
}

fn host_isa(options: &JitOptions) -> Result<OwnedTargetIsa> {
    let mut flags = settings::builder();
    let verify = if options.verify { "true" } else { "false" };
    for (name, value) in [
        ("opt_level", options.opt_level.as_setting()),
        ("enable_verifier", verify),
        ("is_pic", "false"),
        ("preserve_frame_pointers", "true"),
    ] {
        flags
            .set(name, value)
            .map_err(|e| JitError::Isa(format!("{name}={value}: {e}")))?;
    }
    let builder = cranelift_native::builder().map_err(|e| JitError::Isa(e.to_string()))?;
    builder
        .finish(settings::Flags::new(flags))
        .map_err(|e| JitError::Isa(e.to_string()))
}
