//! Assignments and temporaries.

use cranelift_codegen::ir::instructions::BlockArg;
use cranelift_codegen::ir::{Block, InstBuilder, Value, condcodes::IntCC};
use opjit_bytecode::{Opcode, OperandSlot, TypeMask, tag};

use super::Translator;
use super::bridge::SigKey;
use super::object::HandlerSlot;
use super::operand::{Fetch, Opnd};
use super::value::ZvalAddr;
use crate::helpers::HelperKind;
use crate::layout::type_info;

impl Translator<'_, '_> {
    /// Store the value read through `raw` (resolved to `value`) into `dst`.
    ///
    /// Temporaries hand their reference over; variables and literals are
    /// shared. A temporary that held a reference cell is shared and the
    /// cell released, which nets out when it turns out not to be one.
    pub(super) fn move_or_copy(&mut self, dst: ZvalAddr, raw: &Opnd, value: &Opnd) {
        self.copy_value(dst, value.addr, value.info);
        if raw.is_copied() {
            self.try_addref(dst, value.info);
        } else if raw.info.may_be(tag::REFERENCE) {
            self.try_addref(dst, value.info);
            self.free_op(*raw);
        }
    }

    /// Overwrite the memory variable `target` with a new reference to
    /// `value`, releasing what it held before.
    pub(super) fn assign_copy(&mut self, target: &Opnd, value: &Opnd) {
        let old = self.save_old(target);
        self.copy_value(target.addr, value.addr, value.info);
        self.try_addref(target.addr, value.info);
        if let Some(old) = old {
            self.release(old, target.info);
        }
    }

    /// Copy of the current value of `target` when it may need releasing
    /// after an overwrite.
    pub(super) fn save_old(&mut self, target: &Opnd) -> Option<ZvalAddr> {
        if target.addr.is_reg() || !target.info.may_be_refcounted() {
            return None;
        }
        let old = self.scratch_zval();
        self.copy_value(old, target.addr, target.info);
        Some(old)
    }

    /// Resolve op1 of an instruction writing a variable: the dereferenced
    /// target and the slot-freeing flag of a `VAR` operand.
    pub(super) fn write_target(&mut self, mode: Fetch) -> (Opnd, Opnd, Option<Value>) {
        let raw = self.use_op(OperandSlot::Op1);
        let (target, free) = if raw.is_var() {
            self.var_target(raw)
        } else {
            (self.fetch_cv(raw, mode), None)
        };
        let target = self.deref(target);
        (raw, target, free)
    }

    // ---- instructions ----

    /// `QM_ASSIGN`
    pub(super) fn qm_assign(&mut self) {
        let raw = self.use_op(OperandSlot::Op1);
        let fetched = self.fetch_cv(raw, Fetch::R);
        let value = self.deref(fetched);
        let res = self.def_op(OperandSlot::Result);
        self.move_or_copy(res.addr, &raw, &value);
    }

    /// `ASSIGN`
    pub(super) fn assign(&mut self) {
        let (raw, target, free) = self.write_target(Fetch::W);
        let raw_value = self.use_op(OperandSlot::Op2);
        let value = self.fetch_cv(raw_value, Fetch::R);
        let value = self.deref(value);
        let def = self.def_op(OperandSlot::Op1);
        let dst = if def.addr.is_reg() { def.addr } else { target.addr };
        let res = self.def_op(OperandSlot::Result);

        let done = self.b.create_block();
        if !dst.is_reg() && target.info.may_be(tag::OBJECT) {
            self.assign_to_proxy(&target, &value, done);
        }

        let old = self.save_old(&target);
        self.move_or_copy(dst, &raw_value, &value);
        if let Some(old) = old {
            self.release(old, target.info);
        }
        self.b.ins().jump(done, &[]);
        self.b.switch_to_block(done);

        if !res.is_unused() {
            let stored = if dst.is_reg() { def.info } else { value.info };
            self.copy_value(res.addr, dst, stored);
            self.try_addref(res.addr, stored);
        }
        self.free_var_target(raw, free);
    }

    /// When `target` holds a proxy object, hand `value` to its `set`
    /// handler and continue at `done`; otherwise fall through.
    fn assign_to_proxy(&mut self, target: &Opnd, value: &Opnd, done: Block) {
        let handlers = self.handlers_of(target);
        if !handlers.may_proxy() {
            return;
        }
        let object = self.b.create_block();
        let plain = self.b.create_block();
        let ty = self.load_type(target.addr, target.info);
        let is_obj = self.b.ins().icmp_imm(IntCC::Equal, ty, i64::from(tag::OBJECT));
        self.b.ins().brif(is_obj, object, &[], plain, &[]);

        self.b.switch_to_block(object);
        let obj = self.ptr_val(target.addr);
        let set = handlers.target(self, obj, HandlerSlot::Set);
        let has_set = self.b.ins().icmp_imm(IntCC::NotEqual, set, 0);
        let proxy = self.cold_block();
        self.b.ins().brif(has_set, proxy, &[], plain, &[]);

        self.b.switch_to_block(proxy);
        self.store_opline();
        let spilled = self.spill(value.addr, value.info);
        let value_ptr = self.zval_ptr(spilled);
        self.call_value(SigKey::Object(HandlerSlot::Set), set, &[obj, value_ptr]);
        self.check_exception();
        self.b.ins().jump(done, &[]);

        self.b.switch_to_block(plain);
    }

    /// Reference cell of the variable `o`, boxing a plain value in place.
    pub(super) fn reference_cell(&mut self, o: &Opnd) -> Value {
        if o.info.is_only(tag::REFERENCE) {
            return self.ptr_val(o.addr);
        }
        let ptr = self.zval_ptr(o.addr);
        if !o.info.may_be(tag::REFERENCE) {
            return self.helper_ret(HelperKind::MakeRef, &[ptr]);
        }
        let boxed = self.b.create_block();
        let merge = self.b.create_block();
        self.b.append_block_param(merge, self.ptr);
        let ty = self.load_type(o.addr, o.info);
        let is_ref = self
            .b
            .ins()
            .icmp_imm(IntCC::Equal, ty, i64::from(tag::REFERENCE));
        let existing = self.ptr_val(o.addr);
        self.b
            .ins()
            .brif(is_ref, merge, &[BlockArg::Value(existing)], boxed, &[]);
        self.b.switch_to_block(boxed);
        let made = self.helper_ret(HelperKind::MakeRef, &[ptr]);
        self.b.ins().jump(merge, &[BlockArg::Value(made)]);
        self.b.switch_to_block(merge);
        self.b.block_params(merge)[0]
    }

    /// `ASSIGN_REF` between compiled variables.
    pub(super) fn assign_ref(&mut self) {
        let raw = self.use_op(OperandSlot::Op1);
        let target = self.fetch_cv(raw, Fetch::W);
        let raw_src = self.use_op(OperandSlot::Op2);
        let src = self.fetch_cv(raw_src, Fetch::W);
        let res = self.def_op(OperandSlot::Result);

        let cell = self.reference_cell(&src);

        // $a =& $a
        let same = raw.op.same_slot(raw_src.op);
        if !same {
            self.addref(cell);
            let old = self.save_old(&target);
            self.set_ptr(target.addr, cell, type_info::REFERENCE);
            if let Some(old) = old {
                self.release(old, target.info);
            }
        }

        if !res.is_unused() {
            let inner = ZvalAddr::Mem {
                base: cell,
                offset: crate::layout::offsets::REF_VAL,
            };
            let info = src.info.without(TypeMask::REF | TypeMask::UNDEF) | TypeMask::NULL;
            self.copy_value(res.addr, inner, info);
            self.try_addref(res.addr, info);
        }
    }

    /// `ASSIGN_OP`: `op1 <op>= op2`, the operator in `extended_value`.
    pub(super) fn assign_op(&mut self) {
        let opcode = Opcode::from_byte(self.insn().extended_value as u8);
        let (raw, target, free) = self.write_target(Fetch::Rw);
        let (raw_value, value) = self.read_op(OperandSlot::Op2);
        let def = self.def_op(OperandSlot::Op1);
        let dst = if def.addr.is_reg() {
            def
        } else {
            let info = if def.ssa.is_some() {
                def.info
            } else {
                TypeMask::ANY
            };
            target.with(target.addr, info)
        };
        match opcode {
            Some(Opcode::Concat | Opcode::FastConcat) => self.emit_concat(&target, &value, &dst, true),
            Some(op) if op.is_compound_assignable() => self.emit_binary(op, &target, &value, &dst),
            _ => unreachable!("ASSIGN_OP operators are checked before translation"),
        }

        let res = self.def_op(OperandSlot::Result);
        if !res.is_unused() {
            self.copy_value(res.addr, dst.addr, dst.info);
            self.try_addref(res.addr, dst.info);
        }
        self.free_op(raw_value);
        self.free_var_target(raw, free);
    }

    /// `FREE`
    pub(super) fn free(&mut self) {
        let raw = self.use_op(OperandSlot::Op1);
        self.free_op(raw);
    }
}
