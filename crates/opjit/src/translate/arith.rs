//! Arithmetic and bitwise operators.
//!
//! Operands are dispatched on their tags into at most three paths:
//!
//! ```text
//!              ┌─ long × long ──► integer op ──(overflow)──┐
//!   op1, op2 ──┼─ any number mix ──► fcvt ───► double op ◄─┘──► merge
//!              └─ anything else ──► runtime helper ────────────► merge
//! ```
//!
//! Paths the static types rule out are never emitted, so a fully typed
//! `long + long` is a single add plus (unless the value ranges exclude it)
//! an overflow test.

use cranelift_codegen::ir::instructions::BlockArg;
use cranelift_codegen::ir::{
    Block, InstBuilder, Value,
    condcodes::{FloatCC, IntCC},
    types,
};
use opjit_bytecode::{Opcode, OperandSlot, TypeMask, tag};

use super::Translator;
use super::operand::{Fetch, Opnd};
use super::value::ZvalAddr;
use crate::helpers::HelperKind;

/// Blocks produced by [`Translator::numeric_dispatch`].
pub(super) struct Numeric {
    /// Both operands are longs
    pub(super) long_long: Option<Block>,
    /// Both operands are numbers, at least one a double; takes `(f64, f64)`
    pub(super) double: Option<Block>,
    /// Anything else
    pub(super) slow: Option<Block>,
}

/// `a <op> b` when it stays in range.
fn checked(opcode: Opcode, a: i64, b: i64) -> Option<i64> {
    match opcode {
        Opcode::Add => a.checked_add(b),
        Opcode::Sub => a.checked_sub(b),
        Opcode::Mul => a.checked_mul(b),
        _ => None,
    }
}

/// The operation cannot leave `i64` for any operands in the given ranges.
fn fits(opcode: Opcode, a: (i64, i64), b: (i64, i64)) -> bool {
    let (a0, a1) = (i128::from(a.0), i128::from(a.1));
    let (b0, b1) = (i128::from(b.0), i128::from(b.1));
    let candidates = match opcode {
        Opcode::Add => [a0 + b0, a1 + b1, a0 + b0, a1 + b1],
        Opcode::Sub => [a0 - b1, a1 - b0, a0 - b1, a1 - b0],
        Opcode::Mul => [a0 * b0, a0 * b1, a1 * b0, a1 * b1],
        _ => return false,
    };
    candidates
        .iter()
        .all(|v| (i128::from(i64::MIN)..=i128::from(i64::MAX)).contains(v))
}

impl Translator<'_, '_> {
    /// Proven bounds of an integer operand.
    pub(super) fn long_range(&self, o: &Opnd) -> Option<(i64, i64)> {
        if let ZvalAddr::Lit(index) = o.addr {
            return self.op_array.literal(index).as_long().map(|v| (v, v));
        }
        if !o.info.is_only(tag::LONG) {
            return None;
        }
        let range = self.facts.var(o.ssa?).range?;
        (!range.underflow && !range.overflow).then_some((range.min, range.max))
    }

    pub(super) fn lit_long(&self, o: &Opnd) -> Option<i64> {
        match o.addr {
            ZvalAddr::Lit(index) => self.op_array.literal(index).as_long(),
            _ => None,
        }
    }

    /// Branch on `ty`, the tag of a value of type set `info`. Tags not
    /// named in `arms` go to `other`.
    pub(super) fn switch_tag(
        &mut self,
        ty: Value,
        info: TypeMask,
        arms: &[(u8, Block)],
        other: Option<Block>,
    ) {
        let mut remaining = info.tags();
        for &(t, block) in arms {
            if !remaining.may_be(t) {
                continue;
            }
            let rest = remaining.without(TypeMask::of(t));
            if rest.is_empty() {
                self.b.ins().jump(block, &[]);
                return;
            }
            let next = self.b.create_block();
            let is = self.b.ins().icmp_imm(IntCC::Equal, ty, i64::from(t));
            self.b.ins().brif(is, block, &[], next, &[]);
            self.b.switch_to_block(next);
            remaining = rest;
        }
        match other {
            Some(block) => {
                self.b.ins().jump(block, &[]);
            }
            None => {
                self.b
                    .ins()
                    .trap(cranelift_codegen::ir::TrapCode::unwrap_user(1));
            }
        }
    }

    fn to_f64(&mut self, v: Value) -> Value {
        self.b.ins().fcvt_from_sint(types::F64, v)
    }

    /// Emit the tag tests of a numeric operator and return the (empty)
    /// target blocks.
    pub(super) fn numeric_dispatch(
        &mut self,
        op1: &Opnd,
        op2: &Opnd,
        doubles: bool,
        force_double: bool,
        force_slow: bool,
    ) -> Numeric {
        let num = if doubles { TypeMask::NUMBER } else { TypeMask::LONG };
        let l1 = op1.info.may_be(tag::LONG);
        let l2 = op2.info.may_be(tag::LONG);
        let d1 = doubles && op1.info.may_be(tag::DOUBLE);
        let d2 = doubles && op2.info.may_be(tag::DOUBLE);
        let ll = l1 && l2;
        let dd = (d1 && (l2 || d2)) || (l1 && d2);
        let slow_needed = force_slow
            || !op1.info.is_subset_of(num)
            || !op2.info.is_subset_of(num)
            || (!ll && !dd);

        let long_long = ll.then(|| self.b.create_block());
        let double = (dd || force_double).then(|| {
            let block = self.b.create_block();
            self.b.append_block_param(block, types::F64);
            self.b.append_block_param(block, types::F64);
            block
        });
        let slow = slow_needed.then(|| self.cold_block());

        let op1_long = (l1 && (l2 || d2)).then(|| self.b.create_block());
        let op1_double = (d1 && (l2 || d2)).then(|| self.b.create_block());

        let mut arms = Vec::with_capacity(2);
        arms.extend(op1_long.map(|b| (tag::LONG, b)));
        arms.extend(op1_double.map(|b| (tag::DOUBLE, b)));
        let ty1 = self.load_type(op1.addr, op1.info);
        let info1 = if slow.is_some() { op1.info } else { op1.info & num };
        self.switch_tag(ty1, info1, &arms, slow);

        let info2 = if slow.is_some() { op2.info } else { op2.info & num };
        if let Some(block) = op1_long {
            self.b.switch_to_block(block);
            let mut arms = Vec::with_capacity(2);
            arms.extend(long_long.map(|b| (tag::LONG, b)));
            let mixed = (d2 && double.is_some()).then(|| self.b.create_block());
            arms.extend(mixed.map(|b| (tag::DOUBLE, b)));
            let ty2 = self.load_type(op2.addr, op2.info);
            self.switch_tag(ty2, info2, &arms, slow);
            if let (Some(mixed), Some(double)) = (mixed, double) {
                self.b.switch_to_block(mixed);
                let a = self.lval(op1.addr);
                let x = self.to_f64(a);
                let y = self.dval(op2.addr);
                self.b
                    .ins()
                    .jump(double, &[BlockArg::Value(x), BlockArg::Value(y)]);
            }
        }
        if let (Some(block), Some(double)) = (op1_double, double) {
            self.b.switch_to_block(block);
            let from_long = l2.then(|| self.b.create_block());
            let from_double = d2.then(|| self.b.create_block());
            let mut arms = Vec::with_capacity(2);
            arms.extend(from_long.map(|b| (tag::LONG, b)));
            arms.extend(from_double.map(|b| (tag::DOUBLE, b)));
            let ty2 = self.load_type(op2.addr, op2.info);
            self.switch_tag(ty2, info2, &arms, slow);
            if let Some(b) = from_long {
                self.b.switch_to_block(b);
                let x = self.dval(op1.addr);
                let v = self.lval(op2.addr);
                let y = self.to_f64(v);
                self.b
                    .ins()
                    .jump(double, &[BlockArg::Value(x), BlockArg::Value(y)]);
            }
            if let Some(b) = from_double {
                self.b.switch_to_block(b);
                let x = self.dval(op1.addr);
                let y = self.dval(op2.addr);
                self.b
                    .ins()
                    .jump(double, &[BlockArg::Value(x), BlockArg::Value(y)]);
            }
        }

        Numeric {
            long_long,
            double,
            slow,
        }
    }

    /// `res = helper(op1, op2)` through memory, then check for exceptions.
    pub(super) fn binary_slow(&mut self, kind: HelperKind, op1: &Opnd, op2: &Opnd, res: &Opnd) {
        let a = self.spill(op1.addr, op1.info);
        let a = self.zval_ptr(a);
        let b = self.spill(op2.addr, op2.info);
        let b = self.zval_ptr(b);
        self.with_mem_result(res, |t, r| {
            t.helper_checked(kind, &[r, a, b]);
        });
    }

    /// Run `emit` with a memory result slot for `res`; register results
    /// go through scratch and are copied back.
    pub(super) fn with_mem_result(&mut self, res: &Opnd, emit: impl FnOnce(&mut Self, Value)) {
        if res.addr.is_reg() {
            let tmp = self.scratch_zval();
            let p = self.zval_ptr(tmp);
            emit(self, p);
            self.copy_value(res.addr, tmp, res.info);
        } else {
            let p = self.zval_ptr(res.addr);
            emit(self, p);
        }
    }

    // ---- instructions ----

    /// `ADD` .. `POW`, `CONCAT`, `SL`, `SR` and the bitwise operators.
    pub(super) fn binary(&mut self, opcode: Opcode) {
        let (raw1, op1) = self.read_op(OperandSlot::Op1);
        let (raw2, op2) = self.read_op(OperandSlot::Op2);
        let res = self.def_op(OperandSlot::Result);
        self.emit_binary(opcode, &op1, &op2, &res);
        self.free_op(raw1);
        self.free_op(raw2);
    }

    /// Arithmetic on resolved operands, result into `res`.
    pub(super) fn emit_binary(&mut self, opcode: Opcode, op1: &Opnd, op2: &Opnd, res: &Opnd) {
        match opcode {
            Opcode::Add | Opcode::Sub | Opcode::Mul => self.emit_add_sub_mul(opcode, op1, op2, res),
            Opcode::Div => self.emit_div(op1, op2, res),
            Opcode::Mod => self.emit_mod(op1, op2, res),
            Opcode::Sl | Opcode::Sr => self.emit_shift(opcode, op1, op2, res),
            Opcode::BwOr | Opcode::BwAnd | Opcode::BwXor => self.emit_bitwise(opcode, op1, op2, res),
            Opcode::Concat | Opcode::FastConcat => self.emit_concat(op1, op2, res, false),
            _ => {
                let kind = match HelperKind::for_binary(opcode) {
                    Some(kind) => kind,
                    None => panic!("{} is not a binary operator", opcode.name()),
                };
                self.binary_slow(kind, op1, op2, res);
            }
        }
    }

    fn emit_add_sub_mul(&mut self, opcode: Opcode, op1: &Opnd, op2: &Opnd, res: &Opnd) {
        if let (Some(a), Some(b)) = (self.lit_long(op1), self.lit_long(op2)) {
            if let Some(r) = checked(opcode, a, b) {
                let v = self.b.ins().iconst(types::I64, r);
                self.set_long(res.addr, v);
                return;
            }
        }
        let may_overflow = match (self.long_range(op1), self.long_range(op2)) {
            (Some(a), Some(b)) => !fits(opcode, a, b),
            _ => true,
        };
        let paths = self.numeric_dispatch(op1, op2, true, may_overflow, false);
        let merge = self.b.create_block();

        if let Some(block) = paths.long_long {
            self.b.switch_to_block(block);
            let a = self.lval(op1.addr);
            let b = self.lval(op2.addr);
            let (r, overflow) = match opcode {
                Opcode::Add => {
                    let r = self.b.ins().iadd(a, b);
                    (r, may_overflow.then(|| self.add_overflowed(a, b, r)))
                }
                Opcode::Sub => {
                    let r = self.b.ins().isub(a, b);
                    (r, may_overflow.then(|| self.sub_overflowed(a, b, r)))
                }
                _ => {
                    let r = self.b.ins().imul(a, b);
                    (r, may_overflow.then(|| self.mul_overflowed(a, b, r)))
                }
            };
            if let (Some(overflow), Some(double)) = (overflow, paths.double) {
                let widen = self.cold_block();
                let ok = self.b.create_block();
                self.b.ins().brif(overflow, widen, &[], ok, &[]);
                self.b.switch_to_block(widen);
                let x = self.to_f64(a);
                let y = self.to_f64(b);
                self.b
                    .ins()
                    .jump(double, &[BlockArg::Value(x), BlockArg::Value(y)]);
                self.b.switch_to_block(ok);
            }
            self.set_long(res.addr, r);
            self.b.ins().jump(merge, &[]);
        }

        if let Some(block) = paths.double {
            self.b.switch_to_block(block);
            let x = self.b.block_params(block)[0];
            let y = self.b.block_params(block)[1];
            let r = match opcode {
                Opcode::Add => self.b.ins().fadd(x, y),
                Opcode::Sub => self.b.ins().fsub(x, y),
                _ => self.b.ins().fmul(x, y),
            };
            self.set_double(res.addr, r);
            self.b.ins().jump(merge, &[]);
        }

        if let Some(block) = paths.slow {
            self.b.switch_to_block(block);
            let kind = match opcode {
                Opcode::Add => HelperKind::Add,
                Opcode::Sub => HelperKind::Sub,
                _ => HelperKind::Mul,
            };
            self.binary_slow(kind, op1, op2, res);
            self.b.ins().jump(merge, &[]);
        }

        self.b.switch_to_block(merge);
    }

    /// Signed overflow of `r = a + b`: `((a ^ r) & (b ^ r)) < 0`.
    fn add_overflowed(&mut self, a: Value, b: Value, r: Value) -> Value {
        let x = self.b.ins().bxor(a, r);
        let y = self.b.ins().bxor(b, r);
        let both = self.b.ins().band(x, y);
        self.b.ins().icmp_imm(IntCC::SignedLessThan, both, 0)
    }

    /// Signed overflow of `r = a - b`: `((a ^ b) & (a ^ r)) < 0`.
    fn sub_overflowed(&mut self, a: Value, b: Value, r: Value) -> Value {
        let x = self.b.ins().bxor(a, b);
        let y = self.b.ins().bxor(a, r);
        let both = self.b.ins().band(x, y);
        self.b.ins().icmp_imm(IntCC::SignedLessThan, both, 0)
    }

    /// Signed overflow of `lo = a * b`: the high half is not the sign
    /// extension of the low half.
    fn mul_overflowed(&mut self, a: Value, b: Value, lo: Value) -> Value {
        let hi = self.b.ins().smulhi(a, b);
        let sign = self.b.ins().sshr_imm(lo, 63);
        self.b.ins().icmp(IntCC::NotEqual, hi, sign)
    }

    fn emit_div(&mut self, op1: &Opnd, op2: &Opnd, res: &Opnd) {
        let paths = self.numeric_dispatch(op1, op2, true, true, false);
        let merge = self.b.create_block();
        let Some(double) = paths.double else {
            unreachable!("division always has a double path");
        };

        if let Some(block) = paths.long_long {
            self.b.switch_to_block(block);
            let a = self.lval(op1.addr);
            let b = self.lval(op2.addr);
            let x = self.to_f64(a);
            let y = self.to_f64(b);
            let as_double = [BlockArg::Value(x), BlockArg::Value(y)];
            let range2 = self.long_range(op2);
            let range1 = self.long_range(op1);

            if range2.is_none_or(|(lo, hi)| lo <= 0 && 0 <= hi) {
                let nonzero = self.b.create_block();
                let zero = self.b.ins().icmp_imm(IntCC::Equal, b, 0);
                self.b.ins().brif(zero, double, &as_double, nonzero, &[]);
                self.b.switch_to_block(nonzero);
            }
            if range2.is_none_or(|(lo, hi)| lo <= -1 && -1 <= hi)
                && range1.is_none_or(|(lo, _)| lo == i64::MIN)
            {
                let safe = self.b.create_block();
                let m1 = self.b.ins().icmp_imm(IntCC::Equal, b, -1);
                let min = self.b.ins().icmp_imm(IntCC::Equal, a, i64::MIN);
                let wraps = self.b.ins().band(m1, min);
                self.b.ins().brif(wraps, double, &as_double, safe, &[]);
                self.b.switch_to_block(safe);
            }
            let exact = self.b.create_block();
            let rem = self.b.ins().srem(a, b);
            let inexact = self.b.ins().icmp_imm(IntCC::NotEqual, rem, 0);
            self.b.ins().brif(inexact, double, &as_double, exact, &[]);

            self.b.switch_to_block(exact);
            let q = self.b.ins().sdiv(a, b);
            self.set_long(res.addr, q);
            self.b.ins().jump(merge, &[]);
        }

        self.b.switch_to_block(double);
        let x = self.b.block_params(double)[0];
        let y = self.b.block_params(double)[1];
        let zero = self.b.ins().f64const(0.0);
        let is_zero = self.b.ins().fcmp(FloatCC::Equal, y, zero);
        let warn = self.cold_block();
        let divide = self.b.create_block();
        self.b.ins().brif(is_zero, warn, &[], divide, &[]);
        self.b.switch_to_block(warn);
        self.helper(HelperKind::DivByZeroWarning, &[]);
        self.b.ins().jump(divide, &[]);
        self.b.switch_to_block(divide);
        let q = self.b.ins().fdiv(x, y);
        self.set_double(res.addr, q);
        self.b.ins().jump(merge, &[]);

        if let Some(block) = paths.slow {
            self.b.switch_to_block(block);
            self.binary_slow(HelperKind::Div, op1, op2, res);
            self.b.ins().jump(merge, &[]);
        }

        self.b.switch_to_block(merge);
    }

    fn emit_mod(&mut self, op1: &Opnd, op2: &Opnd, res: &Opnd) {
        let paths = self.numeric_dispatch(op1, op2, false, false, false);
        let merge = self.b.create_block();

        if let Some(block) = paths.long_long {
            self.b.switch_to_block(block);
            let a = self.lval(op1.addr);
            let b = self.lval(op2.addr);
            if self
                .long_range(op2)
                .is_none_or(|(lo, hi)| lo <= 0 && 0 <= hi)
            {
                let by_zero = self.cold_block();
                let nonzero = self.b.create_block();
                let zero = self.b.ins().icmp_imm(IntCC::Equal, b, 0);
                self.b.ins().brif(zero, by_zero, &[], nonzero, &[]);
                self.b.switch_to_block(by_zero);
                self.store_opline_unmarked();
                self.helper(HelperKind::ThrowModByZero, &[]);
                let target = self.exception_target();
                self.b.ins().jump(target, &[]);
                self.b.switch_to_block(nonzero);
            }
            let store = self.b.create_block();
            self.b.append_block_param(store, types::I64);
            if self
                .long_range(op2)
                .is_none_or(|(lo, hi)| lo <= -1 && -1 <= hi)
            {
                // MIN % -1 traps in srem; x % -1 is 0 for every x
                let divide = self.b.create_block();
                let zero = self.b.ins().iconst(types::I64, 0);
                let m1 = self.b.ins().icmp_imm(IntCC::Equal, b, -1);
                self.b
                    .ins()
                    .brif(m1, store, &[BlockArg::Value(zero)], divide, &[]);
                self.b.switch_to_block(divide);
            }
            let r = self.b.ins().srem(a, b);
            self.b.ins().jump(store, &[BlockArg::Value(r)]);

            self.b.switch_to_block(store);
            let r = self.b.block_params(store)[0];
            self.set_long(res.addr, r);
            self.b.ins().jump(merge, &[]);
        }

        if let Some(block) = paths.slow {
            self.b.switch_to_block(block);
            self.binary_slow(HelperKind::Mod, op1, op2, res);
            self.b.ins().jump(merge, &[]);
        }

        self.b.switch_to_block(merge);
    }

    fn emit_shift(&mut self, opcode: Opcode, op1: &Opnd, op2: &Opnd, res: &Opnd) {
        let always_small = self
            .long_range(op2)
            .is_some_and(|(lo, hi)| lo >= 0 && hi < 64);
        let paths = self.numeric_dispatch(op1, op2, false, false, !always_small);
        let merge = self.b.create_block();
        let kind = if opcode == Opcode::Sl {
            HelperKind::Sl
        } else {
            HelperKind::Sr
        };

        if let Some(block) = paths.long_long {
            self.b.switch_to_block(block);
            let a = self.lval(op1.addr);
            let b = self.lval(op2.addr);
            if let (false, Some(slow)) = (always_small, paths.slow) {
                let small = self.b.create_block();
                let big = self.cold_block();
                let big_positive = self.b.create_block();
                let in_range = self.b.ins().icmp_imm(IntCC::UnsignedLessThan, b, 64);
                self.b.ins().brif(in_range, small, &[], big, &[]);

                self.b.switch_to_block(big);
                let negative = self.b.ins().icmp_imm(IntCC::SignedLessThan, b, 0);
                self.b.ins().brif(negative, slow, &[], big_positive, &[]);

                self.b.switch_to_block(big_positive);
                let r = if opcode == Opcode::Sl {
                    self.b.ins().iconst(types::I64, 0)
                } else {
                    self.b.ins().sshr_imm(a, 63)
                };
                self.set_long(res.addr, r);
                self.b.ins().jump(merge, &[]);

                self.b.switch_to_block(small);
            }
            let r = if opcode == Opcode::Sl {
                self.b.ins().ishl(a, b)
            } else {
                self.b.ins().sshr(a, b)
            };
            self.set_long(res.addr, r);
            self.b.ins().jump(merge, &[]);
        }

        if let Some(block) = paths.slow {
            self.b.switch_to_block(block);
            self.binary_slow(kind, op1, op2, res);
            self.b.ins().jump(merge, &[]);
        }

        self.b.switch_to_block(merge);
    }

    fn emit_bitwise(&mut self, opcode: Opcode, op1: &Opnd, op2: &Opnd, res: &Opnd) {
        let paths = self.numeric_dispatch(op1, op2, false, false, false);
        let merge = self.b.create_block();

        if let Some(block) = paths.long_long {
            self.b.switch_to_block(block);
            let a = self.lval(op1.addr);
            let b = self.lval(op2.addr);
            let r = match opcode {
                Opcode::BwOr => self.b.ins().bor(a, b),
                Opcode::BwAnd => self.b.ins().band(a, b),
                _ => self.b.ins().bxor(a, b),
            };
            self.set_long(res.addr, r);
            self.b.ins().jump(merge, &[]);
        }

        if let Some(block) = paths.slow {
            self.b.switch_to_block(block);
            let kind = match opcode {
                Opcode::BwOr => HelperKind::BwOr,
                Opcode::BwAnd => HelperKind::BwAnd,
                _ => HelperKind::BwXor,
            };
            self.binary_slow(kind, op1, op2, res);
            self.b.ins().jump(merge, &[]);
        }

        self.b.switch_to_block(merge);
    }

    /// `BW_NOT`
    pub(super) fn bw_not(&mut self) {
        let (raw, op1) = self.read_op(OperandSlot::Op1);
        let res = self.def_op(OperandSlot::Result);
        let long = op1.info.may_be(tag::LONG).then(|| self.b.create_block());
        let slow = (!op1.info.is_only(tag::LONG)).then(|| self.cold_block());
        let merge = self.b.create_block();
        let ty = self.load_type(op1.addr, op1.info);
        let arms: Vec<(u8, Block)> = long.map(|b| (tag::LONG, b)).into_iter().collect();
        self.switch_tag(ty, op1.info, &arms, slow);

        if let Some(block) = long {
            self.b.switch_to_block(block);
            let a = self.lval(op1.addr);
            let r = self.b.ins().bnot(a);
            self.set_long(res.addr, r);
            self.b.ins().jump(merge, &[]);
        }
        if let Some(block) = slow {
            self.b.switch_to_block(block);
            let a = self.zval_ptr(op1.addr);
            self.with_mem_result(&res, |t, r| {
                t.helper_checked(HelperKind::BwNot, &[r, a]);
            });
            self.b.ins().jump(merge, &[]);
        }
        self.b.switch_to_block(merge);
        self.free_op(raw);
    }

    /// `PRE_INC`, `PRE_DEC`, `POST_INC`, `POST_DEC`
    pub(super) fn incdec(&mut self, opcode: Opcode) {
        let inc = matches!(opcode, Opcode::PreInc | Opcode::PostInc);
        let post = matches!(opcode, Opcode::PostInc | Opcode::PostDec);
        let raw = self.use_op(OperandSlot::Op1);
        let (target, free) = if raw.is_var() {
            self.var_target(raw)
        } else {
            (self.fetch_cv(raw, Fetch::Rw), None)
        };
        let var = self.deref(target);
        let res = self.def_op(OperandSlot::Result);
        let res = (!res.is_unused()).then_some(res);

        let long = var.info.may_be(tag::LONG).then(|| self.b.create_block());
        let double = var.info.may_be(tag::DOUBLE).then(|| self.b.create_block());
        let slow = (!var.info.is_subset_of(TypeMask::NUMBER)).then(|| self.cold_block());
        let merge = self.b.create_block();
        let mut arms = Vec::with_capacity(2);
        arms.extend(long.map(|b| (tag::LONG, b)));
        arms.extend(double.map(|b| (tag::DOUBLE, b)));
        let ty = self.load_type(var.addr, var.info);
        self.switch_tag(ty, var.info, &arms, slow);

        if let Some(block) = long {
            self.b.switch_to_block(block);
            let a = self.lval(var.addr);
            if let (true, Some(res)) = (post, res) {
                self.set_long(res.addr, a);
            }
            let limit = if inc { i64::MAX } else { i64::MIN };
            let may_overflow = self
                .long_range(&var)
                .is_none_or(|(lo, hi)| if inc { hi == i64::MAX } else { lo == i64::MIN });
            if may_overflow {
                let widen = self.cold_block();
                let ok = self.b.create_block();
                let at_limit = self.b.ins().icmp_imm(IntCC::Equal, a, limit);
                self.b.ins().brif(at_limit, widen, &[], ok, &[]);
                self.b.switch_to_block(widen);
                let edge = self.to_f64(a);
                let step = self.b.ins().f64const(if inc { 1.0 } else { -1.0 });
                let r = self.b.ins().fadd(edge, step);
                self.set_double(var.addr, r);
                if let (false, Some(res)) = (post, res) {
                    self.set_double(res.addr, r);
                }
                self.b.ins().jump(merge, &[]);
                self.b.switch_to_block(ok);
            }
            let r = self.b.ins().iadd_imm(a, if inc { 1 } else { -1 });
            self.set_long(var.addr, r);
            if let (false, Some(res)) = (post, res) {
                self.set_long(res.addr, r);
            }
            self.b.ins().jump(merge, &[]);
        }

        if let Some(block) = double {
            self.b.switch_to_block(block);
            let d = self.dval(var.addr);
            if let (true, Some(res)) = (post, res) {
                self.set_double(res.addr, d);
            }
            let step = self.b.ins().f64const(if inc { 1.0 } else { -1.0 });
            let r = self.b.ins().fadd(d, step);
            self.set_double(var.addr, r);
            if let (false, Some(res)) = (post, res) {
                self.set_double(res.addr, r);
            }
            self.b.ins().jump(merge, &[]);
        }

        if let Some(block) = slow {
            self.b.switch_to_block(block);
            if let (true, Some(res)) = (post, res) {
                self.copy_value(res.addr, var.addr, var.info);
                self.try_addref(res.addr, var.info);
            }
            let kind = if inc {
                HelperKind::Increment
            } else {
                HelperKind::Decrement
            };
            if var.info.may_be(tag::OBJECT) {
                self.incdec_object(&var, kind);
            } else {
                let p = self.zval_ptr(var.addr);
                self.helper_checked(kind, &[p]);
            }
            if let (false, Some(res)) = (post, res) {
                self.copy_value(res.addr, var.addr, var.info);
                self.try_addref(res.addr, var.info);
            }
            self.b.ins().jump(merge, &[]);
        }

        self.b.switch_to_block(merge);
        self.free_var_target(raw, free);
    }
}
