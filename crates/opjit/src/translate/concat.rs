//! String concatenation and length.

use cranelift_codegen::ir::instructions::BlockArg;
use cranelift_codegen::ir::{InstBuilder, Value, condcodes::IntCC, types};
use opjit_bytecode::{OperandSlot, TypeMask, tag};

use super::Translator;
use super::operand::Opnd;
use super::value::MEM;
use crate::helpers::HelperKind;
use crate::layout::{MAX_STRING_LEN, gc, offsets, type_info};

/// An operand converted to a string.
#[derive(Debug, Clone, Copy)]
struct StrOperand {
    s: Value,
    /// `I8`, set when the conversion produced a new reference to release
    owned: Option<Value>,
}

impl Translator<'_, '_> {
    /// String value of `o`: borrowed when it already is one, otherwise a
    /// fresh conversion.
    fn coerce_to_string(&mut self, o: &Opnd) -> StrOperand {
        if o.info.is_only(tag::STRING) {
            return StrOperand {
                s: self.ptr_val(o.addr),
                owned: None,
            };
        }
        if o.info.is_only(tag::LONG) {
            let v = self.lval(o.addr);
            let s = self.helper_ret(HelperKind::LongToStr, &[v]);
            let one = self.b.ins().iconst(types::I8, 1);
            return StrOperand { s, owned: Some(one) };
        }
        if o.info.is_only(tag::DOUBLE) {
            let d = self.dval(o.addr);
            let precision_addr = self.iconst_ptr(self.rt.precision);
            let precision = self.b.ins().load(types::I64, MEM, precision_addr, 0);
            let s = self.helper_ret(HelperKind::DoubleToStr, &[d, precision]);
            let one = self.b.ins().iconst(types::I8, 1);
            return StrOperand { s, owned: Some(one) };
        }

        let merge = self.b.create_block();
        self.b.append_block_param(merge, self.ptr);
        self.b.append_block_param(merge, types::I8);
        let convert = self.b.create_block();
        if o.info.may_be(tag::STRING) {
            let direct = self.b.create_block();
            let ty = self.load_type(o.addr, o.info);
            let is_str = self.b.ins().icmp_imm(IntCC::Equal, ty, i64::from(tag::STRING));
            self.b.ins().brif(is_str, direct, &[], convert, &[]);
            self.b.switch_to_block(direct);
            let s = self.ptr_val(o.addr);
            let zero = self.b.ins().iconst(types::I8, 0);
            self.b
                .ins()
                .jump(merge, &[BlockArg::Value(s), BlockArg::Value(zero)]);
        } else {
            self.b.ins().jump(convert, &[]);
        }

        self.b.switch_to_block(convert);
        let spilled = self.spill(o.addr, o.info);
        let p = self.zval_ptr(spilled);
        let s = self.helper_ret(HelperKind::ZvalGetString, &[p]);
        self.check_exception();
        let one = self.b.ins().iconst(types::I8, 1);
        self.b
            .ins()
            .jump(merge, &[BlockArg::Value(s), BlockArg::Value(one)]);

        self.b.switch_to_block(merge);
        StrOperand {
            s: self.b.block_params(merge)[0],
            owned: Some(self.b.block_params(merge)[1]),
        }
    }

    fn release_owned(&mut self, op: StrOperand) {
        let Some(owned) = op.owned else {
            return;
        };
        let release = self.b.create_block();
        let done = self.b.create_block();
        self.b.ins().brif(owned, release, &[], done, &[]);
        self.b.switch_to_block(release);
        self.release_str(op.s);
        self.b.ins().jump(done, &[]);
        self.b.switch_to_block(done);
    }

    pub(super) fn str_len(&mut self, s: Value) -> Value {
        self.b.ins().load(types::I64, MEM, s, offsets::STR_LEN)
    }

    /// Copy `len` bytes of `src`'s characters to `dst` + `at`.
    fn copy_chars(&mut self, dst: Value, at: Value, src: Value, len: Value) {
        let base = self.gep(dst, offsets::STR_VAL);
        let to = self.b.ins().iadd(base, at);
        let from = self.gep(src, offsets::STR_VAL);
        self.helper(HelperKind::Memcpy, &[to, from, len]);
    }

    /// Terminate a freshly written string of length `len`.
    fn finish_string(&mut self, s: Value, len: Value) {
        let end = self.b.ins().iadd(s, len);
        let nul = self.b.ins().iconst(types::I32, 0);
        self.b.ins().istore8(MEM, nul, end, offsets::STR_VAL);
        let zero = self.b.ins().iconst(types::I64, 0);
        self.store_at(zero, s, offsets::STR_H);
    }

    /// `res = op1 . op2`. With `in_place`, `res` is the variable `op1`
    /// was read from (`.=`), and an exclusively owned string is grown
    /// instead of copied.
    pub(super) fn emit_concat(&mut self, op1: &Opnd, op2: &Opnd, res: &Opnd, in_place: bool) {
        let opaque = TypeMask::ARRAY | TypeMask::OBJECT | TypeMask::RESOURCE | TypeMask::REF;
        if (op1.info | op2.info).intersects(opaque) {
            self.binary_slow(HelperKind::Concat, op1, op2, res);
            return;
        }
        let same_operand = op1.op.same_slot(op2.op);
        let a = self.coerce_to_string(op1);
        let b = if same_operand {
            a
        } else {
            self.coerce_to_string(op2)
        };

        let len1 = self.str_len(a.s);
        let len2 = self.str_len(b.s);
        let total = self.b.ins().iadd(len1, len2);
        let too_long = self
            .b
            .ins()
            .icmp_imm(IntCC::UnsignedGreaterThan, total, MAX_STRING_LEN as i64);
        let overflow = self.cold_block();
        let fits = self.b.create_block();
        self.b.ins().brif(too_long, overflow, &[], fits, &[]);
        self.b.switch_to_block(overflow);
        self.helper_fatal(HelperKind::StringSizeOverflow, &[]);
        self.b.ins().jump(fits, &[]);
        self.b.switch_to_block(fits);

        let done = self.b.create_block();
        let copy = self.b.create_block();
        if in_place && !same_operand && op1.info.may_be(tag::STRING) {
            // grow the target's own string when nobody else sees it
            let grow = self.b.create_block();
            let check_rc = self.b.create_block();
            let borrowed = match a.owned {
                Some(owned) => self.b.ins().icmp_imm(IntCC::Equal, owned, 0),
                None => self.b.ins().iconst(types::I8, 1),
            };
            self.b.ins().brif(borrowed, check_rc, &[], copy, &[]);

            self.b.switch_to_block(check_rc);
            let rc = self.load_u32(a.s, offsets::GC_REFCOUNT);
            let gt = self.load_u32(a.s, offsets::GC_TYPE_INFO);
            let immutable = self.b.ins().band_imm(gt, i64::from(gc::IMMUTABLE));
            let sole = self.b.ins().icmp_imm(IntCC::Equal, rc, 1);
            let mutable = self.b.ins().icmp_imm(IntCC::Equal, immutable, 0);
            // two variables bound to one reference see the same string
            let distinct = self.b.ins().icmp(IntCC::NotEqual, a.s, b.s);
            let exclusive = self.b.ins().band(sole, mutable);
            let exclusive = self.b.ins().band(exclusive, distinct);
            self.b.ins().brif(exclusive, grow, &[], copy, &[]);

            self.b.switch_to_block(grow);
            let grown = self.helper_ret(HelperKind::StrRealloc, &[a.s, total]);
            self.copy_chars(grown, len1, b.s, len2);
            self.finish_string(grown, total);
            self.set_ptr(res.addr, grown, type_info::STRING);
            self.release_owned(b);
            self.b.ins().jump(done, &[]);
        } else {
            self.b.ins().jump(copy, &[]);
        }

        self.b.switch_to_block(copy);
        let fresh = self.helper_ret(HelperKind::StrAlloc, &[total]);
        let zero = self.b.ins().iconst(types::I64, 0);
        self.copy_chars(fresh, zero, a.s, len1);
        self.copy_chars(fresh, len1, b.s, len2);
        self.finish_string(fresh, total);
        let old = if in_place && res.info.may_be_refcounted() {
            let old = self.scratch_zval();
            self.copy_value(old, res.addr, res.info);
            Some(old)
        } else {
            None
        };
        self.set_ptr(res.addr, fresh, type_info::STRING);
        self.release_owned(a);
        if !same_operand {
            self.release_owned(b);
        }
        if let Some(old) = old {
            self.release(old, res.info);
        }
        self.b.ins().jump(done, &[]);

        self.b.switch_to_block(done);
    }

    /// `STRLEN`
    pub(super) fn strlen(&mut self) {
        let (raw, op1) = self.read_op(OperandSlot::Op1);
        let res = self.def_op(OperandSlot::Result);
        let merge = self.b.create_block();
        let fast = op1.info.may_be(tag::STRING).then(|| self.b.create_block());
        let slow = (!op1.info.is_only(tag::STRING)).then(|| self.cold_block());
        let arms: Vec<_> = fast.map(|b| (tag::STRING, b)).into_iter().collect();
        let ty = self.load_type(op1.addr, op1.info);
        self.switch_tag(ty, op1.info, &arms, slow);

        if let Some(block) = fast {
            self.b.switch_to_block(block);
            let s = self.ptr_val(op1.addr);
            let len = self.str_len(s);
            self.set_long(res.addr, len);
            self.b.ins().jump(merge, &[]);
        }
        if let Some(block) = slow {
            self.b.switch_to_block(block);
            let spilled = self.spill(op1.addr, op1.info);
            let p = self.zval_ptr(spilled);
            self.with_mem_result(&res, |t, r| {
                t.helper_checked(HelperKind::StrlenSlow, &[r, p]);
            });
            self.b.ins().jump(merge, &[]);
        }
        self.b.switch_to_block(merge);
        self.free_op(raw);
    }
}
