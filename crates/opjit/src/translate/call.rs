//! Call frames, argument passing, parameters and the function epilogue.
//!
//! A call is opened by an `INIT_*` instruction, filled by `SEND_*`
//! instructions and invoked by a `DO_*` instruction. Operand layout:
//!
//! | Opcode | op1 | op2 | result | extended value |
//! |---|---|---|---|---|
//! | `INIT_FCALL`, `INIT_FCALL_BY_NAME` | | name literal | cache slot offset | argument count |
//! | `INIT_METHOD_CALL` | object (unused: `$this`) | name literal | cache slot offset | argument count |
//! | `SEND_*` | value | argument number | | |
//! | `RECV`, `RECV_INIT` | parameter number | default literal | variable | |
//!
//! A frame whose callee is resolved by the call-site facts is pushed
//! inline; everything else goes through the runtime's resolvers, which
//! push and link the frame themselves.

use cranelift_codegen::ir::instructions::BlockArg;
use cranelift_codegen::ir::{Block, InstBuilder, Type, Value, condcodes::IntCC, types};
use opjit_bytecode::{
    CallSite, Callee, CalleeKind, CloneEntry, Instruction, OperandSlot, ReturnConv, SsaFacts,
    TypeMask,
};

use super::bridge::SigKey;
use super::operand::{Fetch, Opnd};
use super::value::{MEM, ZvalAddr};
use super::{Deferred, Translator};
use crate::helpers::HelperKind;
use crate::layout::{
    VAR_RET_REF, acc, arg_offset, call_info, func_kind, offsets, send_mode, status, type_info,
    used_stack, var_offset,
};

/// Register type a clone with convention `conv` returns, `None` for
/// void clones.
pub(crate) fn clone_return_type(conv: ReturnConv) -> Option<Type> {
    match conv {
        ReturnConv::Long => Some(types::I64),
        ReturnConv::Double => Some(types::F64),
        ReturnConv::Bool => Some(types::I8),
        ReturnConv::Void => None,
        ReturnConv::Status => panic!("status bodies are not clones"),
    }
}

/// Where a finished call leaves its result.
#[derive(Debug, Clone, Copy)]
struct CallResult {
    /// Result slot of the `DO_*` instruction, when used
    res: Option<ZvalAddr>,
    /// Pointer handed to the callee: the result slot, or scratch
    /// (internal callees always need one)
    ptr: Value,
    /// Null when the result is unused, for callees that accept that
    ptr_or_null: Value,
}

/// What is known about a callee's attributes.
#[derive(Debug, Clone, Copy)]
enum FuncInfo<'c> {
    /// Resolved while compiling
    Static(&'c Callee),
    /// `fn_flags` loaded from the function at run time
    Loaded(Value),
}

#[derive(Debug, Clone, Copy)]
enum Attr {
    Known(bool),
    /// `I8` condition
    Runtime(Value),
}

impl<'a> Translator<'a, '_> {
    fn facts_ref(&self) -> &'a SsaFacts {
        self.facts
    }

    /// Call site whose arguments the current `SEND_*` fills.
    fn enclosing_call(&self) -> Option<&'a CallSite> {
        let pc = self.pc as u32;
        self.facts_ref()
            .calls
            .iter()
            .filter(|c| c.init < pc && pc < c.do_call)
            .max_by_key(|c| c.init)
    }

    fn open_call(&mut self) -> Value {
        let ex = self.ex;
        self.load_ptr(ex, offsets::EX_CALL)
    }

    fn store_current_execute_data(&mut self, frame: Value) {
        let slot = self.iconst_ptr(self.rt.current_execute_data);
        self.store_at(frame, slot, 0);
    }

    /// `I8` condition: `flags & mask != 0`.
    fn flag_set(&mut self, flags: Value, mask: u32) -> Value {
        let bits = self.b.ins().band_imm(flags, i64::from(mask));
        self.b.ins().icmp_imm(IntCC::NotEqual, bits, 0)
    }

    /// Run `emit` only when `cond` holds, out of line.
    fn when_cold(&mut self, cond: Value, emit: impl FnOnce(&mut Self)) {
        let then = self.cold_block();
        let done = self.b.create_block();
        self.b.ins().brif(cond, then, &[], done, &[]);
        self.b.switch_to_block(then);
        emit(self);
        self.b.ins().jump(done, &[]);
        self.b.switch_to_block(done);
    }

    /// Push a frame of `size` bytes on the VM stack.
    ///
    /// Returns the frame and its allocation flags (`call_info::ALLOCATED`
    /// when a new stack page had to be taken).
    fn alloc_frame(&mut self, size: u32) -> (Value, Value) {
        let top_slot = self.iconst_ptr(self.rt.vm_stack_top);
        let end_slot = self.iconst_ptr(self.rt.vm_stack_end);
        let top = self.load_ptr(top_slot, 0);
        let end = self.load_ptr(end_slot, 0);
        let room = self.b.ins().isub(end, top);
        let short = self
            .b
            .ins()
            .icmp_imm(IntCC::UnsignedLessThan, room, i64::from(size));

        let extend = self.cold_block();
        let bump = self.b.create_block();
        let merge = self.b.create_block();
        self.b.append_block_param(merge, self.ptr);
        self.b.append_block_param(merge, types::I32);
        self.b.ins().brif(short, extend, &[], bump, &[]);

        self.b.switch_to_block(extend);
        let bytes = self.b.ins().iconst(types::I64, i64::from(size));
        let frame = self.helper_ret(HelperKind::VmStackExtend, &[bytes]);
        let allocated = self.b.ins().iconst(types::I32, i64::from(call_info::ALLOCATED));
        self.b
            .ins()
            .jump(merge, &[BlockArg::Value(frame), BlockArg::Value(allocated)]);

        self.b.switch_to_block(bump);
        let new_top = self.b.ins().iadd_imm(top, i64::from(size));
        self.store_at(new_top, top_slot, 0);
        let none = self.b.ins().iconst(types::I32, 0);
        self.b
            .ins()
            .jump(merge, &[BlockArg::Value(top), BlockArg::Value(none)]);

        self.b.switch_to_block(merge);
        let params = self.b.block_params(merge);
        (params[0], params[1])
    }

    /// Push and open a frame for the statically resolved `callee`.
    fn push_call_frame(&mut self, callee: &Callee, num_args: u32) {
        let user_frame = match callee.kind {
            CalleeKind::User {
                last_var,
                temporaries,
                ..
            } => Some((last_var, temporaries, callee.num_args)),
            CalleeKind::Internal { .. } => None,
        };
        let size = used_stack(num_args, user_frame);
        let (call, flags) = self.alloc_frame(size);

        self.store_ptr_const(callee.func, call, offsets::EX_FUNC);
        let no_this = self.b.ins().iconst(types::I64, 0);
        self.store_at(no_this, call, offsets::EX_THIS + offsets::ZVAL_VALUE);
        self.store_at(flags, call, offsets::EX_CALL_INFO);
        let n = self.b.ins().iconst(types::I32, i64::from(num_args));
        self.store_at(n, call, offsets::EX_NUM_ARGS);

        let outer = self.open_call();
        self.store_at(outer, call, offsets::EX_PREV);
        let ex = self.ex;
        self.store_at(call, ex, offsets::EX_CALL);
    }

    /// Pointer to the literal function or method name in op2.
    fn name_operand(&mut self) -> Value {
        let name = self.use_op(OperandSlot::Op2);
        self.zval_ptr(name.addr)
    }

    fn call_cache_slot(&mut self) -> Value {
        let offset = self.insn().result.num;
        let rtc = self.run_time_cache();
        self.gep(rtc, offset as i32)
    }

    // ---- opening calls ----

    /// `INIT_FCALL`: the callee is resolved while compiling the caller.
    pub(super) fn init_fcall(&mut self) {
        let site = self.facts_ref().call_by_init(self.pc as u32);
        match site.and_then(|s| s.callee.as_ref().map(|c| (c, s.num_args))) {
            Some((callee, num_args)) => self.push_call_frame(callee, num_args),
            None => self.init_fcall_by_name(),
        }
    }

    /// `INIT_FCALL_BY_NAME`
    pub(super) fn init_fcall_by_name(&mut self) {
        let ex = self.ex;
        let name = self.name_operand();
        let cache = self.call_cache_slot();
        let extended_value = self.insn().extended_value;
        let n = self
            .b
            .ins()
            .iconst(types::I32, i64::from(extended_value));
        self.helper(HelperKind::InitFcallByName, &[ex, name, cache, n]);
        self.check_exception();
    }

    /// `INIT_METHOD_CALL`
    pub(super) fn init_method_call(&mut self) {
        let raw = self.use_op(OperandSlot::Op1);
        let object = if raw.is_unused() {
            self.this_operand(raw)
        } else {
            let fetched = self.fetch_cv(raw, Fetch::R);
            self.deref(fetched)
        };
        let ex = self.ex;
        let object = self.zval_ptr(object.addr);
        let name = self.name_operand();
        let cache = self.call_cache_slot();
        let extended_value = self.insn().extended_value;
        let n = self
            .b
            .ins()
            .iconst(types::I32, i64::from(extended_value));
        self.helper(HelperKind::InitMethodCall, &[ex, object, name, cache, n]);
        // the frame holds its own reference to the object
        if !raw.is_unused() {
            self.free_op(raw);
        }
        self.check_exception();
    }

    // ---- arguments ----

    fn arg_slot(call: Value, arg_num: u32) -> ZvalAddr {
        ZvalAddr::Mem {
            base: call,
            offset: arg_offset(arg_num),
        }
    }

    fn send_arg_num(&self) -> u32 {
        self.insn().op2.num
    }

    /// `I8` condition: parameter `arg_num` of `func` takes a reference.
    /// `modes` selects the send modes that count (`BY_REF`, optionally
    /// `PREFER_REF`).
    fn arg_by_ref_at_runtime(&mut self, func: Value, arg_num: u32, modes: u64) -> Value {
        if arg_num <= send_mode::QUICK_ARGS {
            let flags = self
                .b
                .ins()
                .load(types::I64, MEM, func, offsets::FUNC_QUICK_ARG_FLAGS);
            let shifted = self.b.ins().ushr_imm(flags, i64::from((arg_num - 1) * 2));
            let bits = self.b.ins().band_imm(shifted, modes as i64);
            return self.b.ins().icmp_imm(IntCC::NotEqual, bits, 0);
        }
        let n = self.b.ins().iconst(types::I32, i64::from(arg_num));
        let by_ref = self.helper_ret(HelperKind::ArgMustBeByRef, &[func, n]);
        self.b.ins().icmp_imm(IntCC::NotEqual, by_ref, 0)
    }

    fn cannot_pass_by_ref(&mut self, raw: Opnd, arg_num: u32) {
        self.free_op(raw);
        self.store_opline_unmarked();
        let n = self.b.ins().iconst(types::I32, i64::from(arg_num));
        self.helper(HelperKind::CannotPassByRef, &[n]);
        let target = self.exception_target();
        self.b.ins().jump(target, &[]);
    }

    /// `SEND_VAL`, and `SEND_VAL_EX` with `checked`: pass a temporary or
    /// literal by value.
    pub(super) fn send_val(&mut self, checked: bool) {
        let raw = self.use_op(OperandSlot::Op1);
        let arg_num = self.send_arg_num();
        let call = self.open_call();
        if checked {
            match self.enclosing_call().and_then(|s| s.callee.as_ref()) {
                Some(callee) if callee.arg_by_ref(arg_num) => {
                    self.cannot_pass_by_ref(raw, arg_num);
                    let dead = self.b.create_block();
                    self.b.switch_to_block(dead);
                    return;
                }
                Some(_) => {}
                None => {
                    let func = self.load_ptr(call, offsets::EX_FUNC);
                    let by_ref = self.arg_by_ref_at_runtime(func, arg_num, send_mode::BY_REF);
                    let fail = self.cold_block();
                    let ok = self.b.create_block();
                    self.b.ins().brif(by_ref, fail, &[], ok, &[]);
                    self.b.switch_to_block(fail);
                    self.cannot_pass_by_ref(raw, arg_num);
                    self.b.switch_to_block(ok);
                }
            }
        }
        let arg = Self::arg_slot(call, arg_num);
        self.move_or_copy(arg, &raw, &raw);
    }

    /// `SEND_VAR`: pass a variable's value.
    pub(super) fn send_var(&mut self) {
        let (raw, value) = self.read_op(OperandSlot::Op1);
        let call = self.open_call();
        let arg = Self::arg_slot(call, self.send_arg_num());
        self.move_or_copy(arg, &raw, &value);
    }

    /// `SEND_REF`: pass a variable by reference, boxing it first.
    pub(super) fn send_ref(&mut self) {
        let raw = self.use_op(OperandSlot::Op1);
        let (target, free) = if raw.is_var() {
            self.var_target(raw)
        } else {
            (self.fetch_cv(raw, Fetch::W), None)
        };
        let cell = self.reference_cell(&target);
        self.addref(cell);
        let call = self.open_call();
        let arg = Self::arg_slot(call, self.send_arg_num());
        self.set_ptr(arg, cell, type_info::REFERENCE);
        self.free_var_target(raw, free);
    }

    /// `SEND_VAR_EX`: by reference when the callee declares it so,
    /// otherwise by value.
    pub(super) fn send_var_ex(&mut self) {
        let arg_num = self.send_arg_num();
        match self.enclosing_call().and_then(|s| s.callee.as_ref()) {
            Some(callee) if callee.arg_by_ref(arg_num) => self.send_ref(),
            Some(_) => self.send_var(),
            None => {
                let call = self.open_call();
                let func = self.load_ptr(call, offsets::EX_FUNC);
                let by_ref = self.arg_by_ref_at_runtime(
                    func,
                    arg_num,
                    send_mode::BY_REF | send_mode::PREFER_REF,
                );
                let by_ref_block = self.b.create_block();
                let by_val_block = self.b.create_block();
                let done = self.b.create_block();
                self.b
                    .ins()
                    .brif(by_ref, by_ref_block, &[], by_val_block, &[]);

                self.b.switch_to_block(by_ref_block);
                self.send_ref();
                self.b.ins().jump(done, &[]);

                self.b.switch_to_block(by_val_block);
                self.send_var();
                self.b.ins().jump(done, &[]);

                self.b.switch_to_block(done);
            }
        }
    }

    // ---- invoking calls ----

    fn call_result(&mut self) -> CallResult {
        let res = self.def_op(OperandSlot::Result);
        if res.is_unused() {
            let scratch = self.scratch_zval();
            let ptr = self.zval_ptr(scratch);
            let null = self.iconst_ptr(0);
            return CallResult {
                res: None,
                ptr,
                ptr_or_null: null,
            };
        }
        let ptr = self.zval_ptr(res.addr);
        CallResult {
            res: Some(res.addr),
            ptr,
            ptr_or_null: ptr,
        }
    }

    /// Drop the frame's reference to `$this`. A constructor that threw
    /// and left the new object otherwise unreferenced marks it as failed
    /// first, so its destructor does not run.
    fn release_frame_this(&mut self, frame: Value, flags: Value) {
        let release = self.flag_set(flags, call_info::RELEASE_THIS);
        self.when_cold(release, |t| {
            let obj = t.load_ptr(frame, offsets::EX_THIS + offsets::ZVAL_VALUE);
            let ctor = t.flag_set(flags, call_info::CTOR);
            let pending = t.exception_pending();
            let failed = t.b.ins().band(ctor, pending);
            t.when_cold(failed, |t| {
                let rc = t.load_u32(obj, offsets::GC_REFCOUNT);
                let last = t.b.ins().icmp_imm(IntCC::Equal, rc, 1);
                t.when_cold(last, |t| {
                    t.helper(HelperKind::ObjectStoreCtorFailed, &[obj]);
                });
            });
            t.release_counted(obj, TypeMask::OBJECT);
        });
    }

    /// Give `frame` back to the VM stack.
    fn free_frame(&mut self, frame: Value, flags: Value) {
        let allocated = self.flag_set(flags, call_info::ALLOCATED);
        let page = self.cold_block();
        let bump = self.b.create_block();
        let done = self.b.create_block();
        self.b.ins().brif(allocated, page, &[], bump, &[]);

        self.b.switch_to_block(page);
        self.helper(HelperKind::VmStackFreeCallFrame, &[frame]);
        self.b.ins().jump(done, &[]);

        self.b.switch_to_block(bump);
        let top_slot = self.iconst_ptr(self.rt.vm_stack_top);
        self.store_at(frame, top_slot, 0);
        self.b.ins().jump(done, &[]);

        self.b.switch_to_block(done);
    }

    /// Tear down the frame of a finished bytecode function: release its
    /// variables (`cvs`: slot and type set of each), its symbol table,
    /// extra arguments, closure and `$this`, make its caller current and
    /// free it. Returns the frame's call info.
    fn destroy_frame(&mut self, frame: Value, cvs: &[(u32, TypeMask)], full: bool) -> Value {
        for &(slot, info) in cvs {
            if info.may_be_refcounted() {
                let var = ZvalAddr::Mem {
                    base: frame,
                    offset: var_offset(slot),
                };
                self.release(var, info);
            }
        }
        let flags = self.load_u32(frame, offsets::EX_CALL_INFO);
        if full {
            let has_table = self.flag_set(flags, call_info::HAS_SYMBOL_TABLE);
            self.when_cold(has_table, |t| {
                t.helper(HelperKind::SymtableCleanCache, &[frame]);
            });
            let extra = self.flag_set(flags, call_info::FREE_EXTRA_ARGS);
            self.when_cold(extra, |t| {
                t.helper(HelperKind::FreeExtraArgs, &[frame]);
            });
        }
        let prev = self.load_ptr(frame, offsets::EX_PREV);
        self.store_current_execute_data(prev);

        let closure = self.flag_set(flags, call_info::CLOSURE);
        self.when_cold(closure, |t| {
            let func = t.load_ptr(frame, offsets::EX_FUNC);
            let object = t.load_ptr(func, offsets::FUNC_PROTOTYPE);
            t.release_counted(object, TypeMask::OBJECT);
        });
        self.release_frame_this(frame, flags);
        self.free_frame(frame, flags);
        flags
    }

    /// Restore the caller's class scope after a call returned or threw.
    fn restore_scope(&mut self) {
        let ex = self.ex;
        let func = self.load_ptr(ex, offsets::EX_FUNC);
        let scope = self.load_ptr(func, offsets::FUNC_SCOPE);
        let slot = self.iconst_ptr(self.rt.scope);
        self.store_at(scope, slot, 0);
    }

    /// `DO_FCALL`, `DO_ICALL`, `DO_UCALL`, `DO_FCALL_BY_NAME`
    pub(super) fn do_call(&mut self) {
        let site = self.facts_ref().call_by_do(self.pc as u32);
        let callee = site.and_then(|s| s.callee.as_ref());
        let num_args = site.map_or(0, |s| s.num_args);
        let result = self.call_result();
        if let Some(res) = result.res {
            self.set_null(res);
        }

        let ex = self.ex;
        let call = self.open_call();
        let outer = self.load_ptr(call, offsets::EX_PREV);
        self.store_at(outer, ex, offsets::EX_CALL);
        self.store_at(ex, call, offsets::EX_PREV);
        self.store_opline();

        let after = self.b.create_block();
        match callee {
            Some(c) if c.is_internal() => {
                let func = self.iconst_ptr(c.func);
                self.call_internal(call, func, FuncInfo::Static(c), result, after);
            }
            Some(c) => {
                let func = self.iconst_ptr(c.func);
                self.call_user(call, func, c, num_args, result, after);
            }
            None => self.call_unknown(call, result, after),
        }

        self.b.switch_to_block(after);
        self.restore_scope();
        let pending = self.exception_pending();
        let unwind = self.cold_block();
        let cont = self.b.create_block();
        self.b.ins().brif(pending, unwind, &[], cont, &[]);
        self.b.switch_to_block(unwind);
        if let Some(res) = result.res {
            self.release(res, TypeMask::ANY | TypeMask::REF);
            self.set_null(res);
        }
        let target = self.exception_target();
        self.b.ins().jump(target, &[]);
        self.b.switch_to_block(cont);
    }

    fn attr(&mut self, func: &FuncInfo<'_>, bit: u32, known: fn(&Callee) -> bool) -> Attr {
        match *func {
            FuncInfo::Static(c) => Attr::Known(known(c)),
            FuncInfo::Loaded(flags) => Attr::Runtime(self.flag_set(flags, bit)),
        }
    }

    /// Run `emit` where `attr` holds: always, never, or behind a cold
    /// branch.
    fn when_attr(&mut self, attr: Attr, emit: impl FnOnce(&mut Self)) {
        match attr {
            Attr::Known(true) => emit(self),
            Attr::Known(false) => {}
            Attr::Runtime(cond) => self.when_cold(cond, emit),
        }
    }

    /// Invoke a natively implemented function.
    fn call_internal(
        &mut self,
        call: Value,
        func: Value,
        info: FuncInfo<'_>,
        result: CallResult,
        after: Block,
    ) {
        let is_abstract = self.attr(&info, acc::ABSTRACT, |c| c.is_abstract);
        self.when_attr(is_abstract, |t| {
            t.helper_fatal(HelperKind::AbstractCall, &[func]);
        });
        let deprecated = self.attr(&info, acc::DEPRECATED, |c| c.is_deprecated);
        if !matches!(deprecated, Attr::Known(false)) {
            self.when_attr(deprecated, |t| {
                t.helper(HelperKind::DeprecatedCall, &[func]);
            });
            self.check_exception();
        }

        self.store_current_execute_data(call);
        let ret = result.ptr;
        if result.res.is_none() {
            self.set_null(ZvalAddr::at(ret));
        }

        let finish = self.b.create_block();
        let invoke = self.b.create_block();
        let check = self.b.create_block();
        match self.attr(&info, acc::HAS_TYPE_HINTS, |c| c.has_type_hints) {
            Attr::Known(true) => {
                self.b.ins().jump(check, &[]);
            }
            Attr::Known(false) => {
                self.b.ins().jump(invoke, &[]);
            }
            Attr::Runtime(typed) => {
                self.b.ins().brif(typed, check, &[], invoke, &[]);
            }
        }
        self.b.switch_to_block(check);
        let ok = self.helper_ret(HelperKind::VerifyInternalArgTypes, &[func, call]);
        let passed = self.b.ins().icmp_imm(IntCC::NotEqual, ok, 0);
        self.b.ins().brif(passed, invoke, &[], finish, &[]);

        self.b.switch_to_block(invoke);
        let handler = match info {
            FuncInfo::Static(Callee {
                kind: CalleeKind::Internal { handler },
                ..
            }) => self.iconst_ptr(*handler),
            _ => self.load_ptr(func, offsets::FUNC_HANDLER),
        };
        self.call_value(SigKey::Internal, handler, &[call, ret]);
        self.b.ins().jump(finish, &[]);

        self.b.switch_to_block(finish);
        let ex = self.ex;
        self.store_current_execute_data(ex);
        let ret_ref = match info {
            FuncInfo::Static(c) => {
                let flag = if c.returns_reference { VAR_RET_REF } else { 0 };
                self.b.ins().iconst(types::I32, i64::from(flag))
            }
            FuncInfo::Loaded(flags) => {
                let bit = self.b.ins().band_imm(flags, i64::from(acc::RETURN_REFERENCE));
                self.b
                    .ins()
                    .ushr_imm(bit, i64::from(acc::RETURN_REFERENCE.trailing_zeros()))
            }
        };
        self.store_at(ret_ref, ret, offsets::ZVAL_U2);

        self.helper(HelperKind::FreeArgs, &[call]);
        let call_flags = self.load_u32(call, offsets::EX_CALL_INFO);
        self.release_frame_this(call, call_flags);
        self.free_frame(call, call_flags);
        if result.res.is_none() {
            self.release(ZvalAddr::at(ret), TypeMask::ANY | TypeMask::REF);
        }
        self.b.ins().jump(after, &[]);
    }

    /// Prepare the frame of a resolved bytecode callee: opline, result
    /// pointer, extra arguments, undefined locals and run-time cache.
    fn init_user_frame(&mut self, call: Value, func: Value, callee: &Callee, num_args: u32, ret: Value) {
        let CalleeKind::User { last_var, .. } = callee.kind else {
            panic!("{} is not a bytecode function", callee.name);
        };
        let declared = callee.num_args;
        if num_args > declared && callee.has_type_hints {
            self.helper(HelperKind::InitFuncExecuteData, &[call, ret]);
            return;
        }

        let opcodes = self.load_ptr(func, offsets::FUNC_OPCODES);
        let entry = if num_args <= declared && !callee.has_type_hints {
            // parameters need no checks: start past their RECVs
            let skip = num_args as usize * std::mem::size_of::<Instruction>();
            self.gep(opcodes, skip as i32)
        } else {
            opcodes
        };
        self.store_at(entry, call, offsets::EX_OPLINE);
        let null = self.iconst_ptr(0);
        self.store_at(null, call, offsets::EX_CALL);
        self.store_at(null, call, offsets::EX_SYMBOL_TABLE);
        self.store_at(ret, call, offsets::EX_RETURN_VALUE);

        if num_args > declared {
            self.helper(HelperKind::CopyExtraArgs, &[call]);
        }
        for slot in num_args.min(declared)..last_var {
            let var = ZvalAddr::Mem {
                base: call,
                offset: var_offset(slot),
            };
            self.store_type_info(var, type_info::UNDEF);
        }

        let cache = self.load_ptr(func, offsets::FUNC_RUN_TIME_CACHE);
        let missing = self.b.ins().icmp_imm(IntCC::Equal, cache, 0);
        let alloc = self.cold_block();
        let merge = self.b.create_block();
        self.b.append_block_param(merge, self.ptr);
        self.b
            .ins()
            .brif(missing, alloc, &[], merge, &[BlockArg::Value(cache)]);
        self.b.switch_to_block(alloc);
        let fresh = self.helper_ret(HelperKind::InitFuncRunTimeCache, &[func]);
        self.b.ins().jump(merge, &[BlockArg::Value(fresh)]);
        self.b.switch_to_block(merge);
        let cache = self.b.block_params(merge)[0];
        self.store_at(cache, call, offsets::EX_RUN_TIME_CACHE);

        self.store_current_execute_data(call);
    }

    /// Invoke a resolved bytecode function.
    fn call_user(
        &mut self,
        call: Value,
        func: Value,
        callee: &Callee,
        num_args: u32,
        result: CallResult,
        after: Block,
    ) {
        let CalleeKind::User {
            last_var,
            is_generator,
            entry_slot,
            clone,
            ..
        } = callee.kind
        else {
            panic!("{} is not a bytecode function", callee.name);
        };

        if let Some(entry) = clone.filter(|_| !is_generator) {
            self.call_clone(call, func, callee, num_args, last_var, entry, result);
            self.b.ins().jump(after, &[]);
            return;
        }

        let ret = result.ptr_or_null;
        self.init_user_frame(call, func, callee, num_args, ret);
        if is_generator {
            self.helper(HelperKind::CreateGenerator, &[call, ret]);
        } else if let Some(slot) = entry_slot.filter(|_| !self.conv.is_clone()) {
            // compiled in the same batch: enter its native code directly
            let slot = self.iconst_ptr(slot);
            let entry = self.load_ptr(slot, 0);
            let opline = self.load_ptr(call, offsets::EX_OPLINE);
            let code = self.call_value(SigKey::Handler, entry, &[call, opline])[0];
            // anything but a finished frame is the executor's to continue
            let left = self
                .b
                .ins()
                .icmp_imm(IntCC::Equal, code, i64::from(status::LEAVE));
            let hand_over = self.cold_block();
            let finished = self.b.create_block();
            self.b.ins().brif(left, finished, &[], hand_over, &[]);
            self.b.switch_to_block(hand_over);
            self.b.ins().return_(&[code]);
            self.b.switch_to_block(finished);
        } else {
            self.helper(HelperKind::ExecuteEx, &[call]);
        }
        self.b.ins().jump(after, &[]);
    }

    /// Invoke a register-returning clone and tear its frame down here.
    #[allow(clippy::too_many_arguments)]
    fn call_clone(
        &mut self,
        call: Value,
        func: Value,
        callee: &Callee,
        num_args: u32,
        last_var: u32,
        entry: CloneEntry,
        result: CallResult,
    ) {
        let null = self.iconst_ptr(0);
        self.init_user_frame(call, func, callee, num_args, null);
        let ty = clone_return_type(entry.conv);
        let ret = self.call_addr(SigKey::Clone(ty), entry.entry, &[call]);
        if let Some(res) = result.res {
            match entry.conv {
                ReturnConv::Long => self.set_long(res, ret[0]),
                ReturnConv::Double => self.set_double(res, ret[0]),
                ReturnConv::Bool => {
                    let ti = self.b.ins().uextend(types::I32, ret[0]);
                    self.store_type_info_val(res, ti);
                }
                ReturnConv::Void => self.set_null(res),
                ReturnConv::Status => unreachable!(),
            }
        }
        let cvs: Vec<_> = (0..last_var)
            .map(|slot| (slot, TypeMask::ANY | TypeMask::REF))
            .collect();
        self.destroy_frame(call, &cvs, true);
    }

    /// Invoke a callee only known at run time: dispatch on its kind.
    fn call_unknown(&mut self, call: Value, result: CallResult, after: Block) {
        let func = self.load_ptr(call, offsets::EX_FUNC);
        let kind = self.b.ins().load(types::I8, MEM, func, offsets::FUNC_KIND);
        let user = self.b.create_block();
        let internal = self.b.create_block();
        let other = self.cold_block();
        let not_user = self.b.create_block();

        let is_user = self
            .b
            .ins()
            .icmp_imm(IntCC::Equal, kind, i64::from(func_kind::USER));
        self.b.ins().brif(is_user, user, &[], not_user, &[]);
        self.b.switch_to_block(not_user);
        let is_internal = self
            .b
            .ins()
            .icmp_imm(IntCC::Equal, kind, i64::from(func_kind::INTERNAL));
        self.b.ins().brif(is_internal, internal, &[], other, &[]);

        self.b.switch_to_block(user);
        let ret = result.ptr_or_null;
        self.helper(HelperKind::InitFuncExecuteData, &[call, ret]);
        let flags = self.load_u32(func, offsets::FUNC_FLAGS);
        let generator = self.flag_set(flags, acc::GENERATOR);
        let create = self.cold_block();
        let execute = self.b.create_block();
        self.b.ins().brif(generator, create, &[], execute, &[]);
        self.b.switch_to_block(create);
        self.helper(HelperKind::CreateGenerator, &[call, ret]);
        self.b.ins().jump(after, &[]);
        self.b.switch_to_block(execute);
        self.helper(HelperKind::ExecuteEx, &[call]);
        self.b.ins().jump(after, &[]);

        self.b.switch_to_block(internal);
        let flags = self.load_u32(func, offsets::FUNC_FLAGS);
        self.call_internal(call, func, FuncInfo::Loaded(flags), result, after);

        self.b.switch_to_block(other);
        let ex = self.ex;
        self.helper(HelperKind::DoFcallGeneric, &[ex, call, result.ptr_or_null]);
        self.b.ins().jump(after, &[]);
    }

    // ---- parameters ----

    fn arg_has_type(&self, arg_num: u32) -> bool {
        self.op_array.flags.has_type_hints
            && self
                .op_array
                .arg_info
                .get(arg_num as usize - 1)
                .is_some_and(|a| a.has_type)
    }

    /// Verify parameter `arg_num` held in `var` against its declaration.
    fn verify_arg(&mut self, arg_num: u32, var: ZvalAddr) {
        let ex = self.ex;
        let func = self.load_ptr(ex, offsets::EX_FUNC);
        let n = self.b.ins().iconst(types::I32, i64::from(arg_num));
        let ptr = self.zval_ptr(var);
        let ok = self.helper_ret(HelperKind::VerifyArgType, &[func, n, ptr]);
        let failed = self.b.ins().icmp_imm(IntCC::Equal, ok, 0);
        let target = self.exception_target();
        let cont = self.b.create_block();
        self.brif_unlikely(failed, target, cont);
        self.b.switch_to_block(cont);
    }

    fn passed_args(&mut self) -> Value {
        let ex = self.ex;
        self.load_u32(ex, offsets::EX_NUM_ARGS)
    }

    /// `RECV`: a required parameter.
    pub(super) fn recv(&mut self) {
        let arg_num = self.insn().op1.num;
        let var = self.def_op(OperandSlot::Result);
        let passed = self.passed_args();
        let missing = self
            .b
            .ins()
            .icmp_imm(IntCC::UnsignedLessThan, passed, i64::from(arg_num));
        let fail = self.cold_block();
        let ok = self.b.create_block();
        self.b.ins().brif(missing, fail, &[], ok, &[]);

        self.b.switch_to_block(fail);
        let ex = self.ex;
        self.helper(HelperKind::MissingArgError, &[ex]);
        let target = self.exception_target();
        self.b.ins().jump(target, &[]);

        self.b.switch_to_block(ok);
        if self.arg_has_type(arg_num) {
            self.verify_arg(arg_num, var.addr);
        }
    }

    /// `RECV_INIT`: an optional parameter with a literal default.
    pub(super) fn recv_init(&mut self) {
        let arg_num = self.insn().op1.num;
        let default = self.use_op(OperandSlot::Op2);
        let var = self.def_op(OperandSlot::Result);
        let passed = self.passed_args();
        let absent = self
            .b
            .ins()
            .icmp_imm(IntCC::UnsignedLessThan, passed, i64::from(arg_num));
        let fill = self.b.create_block();
        let done = self.b.create_block();
        self.b.ins().brif(absent, fill, &[], done, &[]);

        self.b.switch_to_block(fill);
        self.copy_value(var.addr, default.addr, default.info);
        self.try_addref(var.addr, default.info);
        self.b.ins().jump(done, &[]);

        self.b.switch_to_block(done);
        if self.arg_has_type(arg_num) {
            self.verify_arg(arg_num, var.addr);
        }
    }

    // ---- returning ----

    /// `RETURN`
    pub(super) fn ret(&mut self) {
        let (raw, value) = self.read_op(OperandSlot::Op1);
        if self.conv.is_clone() {
            self.return_from_clone(raw, value);
            return;
        }
        let ex = self.ex;
        let rv = self.load_ptr(ex, offsets::EX_RETURN_VALUE);
        let wanted = self.b.ins().icmp_imm(IntCC::NotEqual, rv, 0);
        let store = self.b.create_block();
        let discard = self.b.create_block();
        let exit = self.func_exit_block();
        self.b.ins().brif(wanted, store, &[], discard, &[]);

        self.b.switch_to_block(store);
        self.move_or_copy(ZvalAddr::at(rv), &raw, &value);
        self.b.ins().jump(exit, &[]);

        self.b.switch_to_block(discard);
        self.free_op(raw);
        self.b.ins().jump(exit, &[]);
    }

    fn return_from_clone(&mut self, raw: Opnd, value: Opnd) {
        match self.conv {
            ReturnConv::Long => {
                let v = self.lval(value.addr);
                self.b.ins().return_(&[v]);
            }
            ReturnConv::Double => {
                let v = self.dval(value.addr);
                self.b.ins().return_(&[v]);
            }
            ReturnConv::Bool => {
                let v = self.load_type(value.addr, value.info);
                self.b.ins().return_(&[v]);
            }
            ReturnConv::Void => {
                self.free_op(raw);
                self.b.ins().return_(&[]);
            }
            ReturnConv::Status => unreachable!(),
        }
    }

    /// Return the neutral value of a clone's convention. The exception,
    /// if any, stays pending for the caller.
    pub(super) fn return_clone_default(&mut self) {
        match self.conv {
            ReturnConv::Void => {
                self.b.ins().return_(&[]);
            }
            ReturnConv::Long => {
                let v = self.b.ins().iconst(types::I64, 0);
                self.b.ins().return_(&[v]);
            }
            ReturnConv::Double => {
                let v = self.b.ins().f64const(0.0);
                self.b.ins().return_(&[v]);
            }
            ReturnConv::Bool => {
                let v = self.b.ins().iconst(types::I8, i64::from(type_info::NULL));
                self.b.ins().return_(&[v]);
            }
            ReturnConv::Status => panic!("status bodies leave through the exception handler"),
        }
    }

    /// The shared epilogue, created on first use.
    pub(super) fn func_exit_block(&mut self) -> Block {
        if let Some(block) = self.func_exit {
            return block;
        }
        let block = self.b.create_block();
        self.func_exit = Some(block);
        self.deferred.push(Deferred::FuncExit(block));
        block
    }

    pub(super) fn fill_func_exit(&mut self, block: Block) {
        assert!(!self.conv.is_clone(), "clones return without an epilogue");
        self.b.switch_to_block(block);
        // top-level variables belong to the global symbol table
        let cvs: Vec<(u32, TypeMask)> = if self.op_array.flags.is_top_level {
            Vec::new()
        } else {
            (0..self.op_array.last_var)
                .map(|slot| {
                    let info = self
                        .facts
                        .slot_types(slot)
                        .unwrap_or(TypeMask::ANY | TypeMask::REF);
                    (slot, info)
                })
                .collect()
        };
        let ex = self.ex;
        let full = !self.facts.function.no_frame;
        let flags = self.destroy_frame(ex, &cvs, full);

        let top = self.flag_set(flags, call_info::TOP);
        let leave_loop = self.b.create_block();
        let leave = self.b.create_block();
        self.b.ins().brif(top, leave_loop, &[], leave, &[]);
        self.b.switch_to_block(leave_loop);
        self.return_status(status::RETURN);
        self.b.switch_to_block(leave);
        self.return_status(status::LEAVE);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_conventions_map_to_register_types() {
        assert_eq!(clone_return_type(ReturnConv::Long), Some(types::I64));
        assert_eq!(clone_return_type(ReturnConv::Double), Some(types::F64));
        assert_eq!(clone_return_type(ReturnConv::Bool), Some(types::I8));
        assert_eq!(clone_return_type(ReturnConv::Void), None);
    }

    #[test]
    #[should_panic(expected = "not clones")]
    fn status_bodies_have_no_register_type() {
        clone_return_type(ReturnConv::Status);
    }
}
