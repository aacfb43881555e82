//! Comparisons, truth tests and conditional jumps.
//!
//! A boolean-producing instruction whose temporary result feeds the
//! `JMPZ`/`JMPNZ`/`JMPZNZ` right after it branches directly instead of
//! materializing the boolean.

use cranelift_codegen::ir::instructions::BlockArg;
use cranelift_codegen::ir::{
    InstBuilder, Value,
    condcodes::{FloatCC, IntCC},
    types,
};
use opjit_bytecode::{Literal, Opcode, OperandKind, OperandSlot, TypeMask, instruction, tag};

use super::Translator;
use super::driver::Flow;
use super::operand::{Fetch, Opnd};
use super::value::ZvalAddr;
use crate::helpers::HelperKind;

fn literal_truthy(lit: &Literal) -> bool {
    match lit {
        Literal::Null => false,
        Literal::Bool(b) => *b,
        Literal::Long(v) => *v != 0,
        Literal::Double(d) => *d != 0.0,
        Literal::String(s) => !(s.is_empty() || s == "0"),
    }
}

/// Condition codes of a loose comparison.
fn condition(opcode: Opcode) -> (IntCC, FloatCC) {
    match opcode {
        Opcode::IsEqual | Opcode::Case => (IntCC::Equal, FloatCC::Equal),
        Opcode::IsNotEqual => (IntCC::NotEqual, FloatCC::NotEqual),
        Opcode::IsSmaller => (IntCC::SignedLessThan, FloatCC::LessThan),
        Opcode::IsSmallerOrEqual => (IntCC::SignedLessThanOrEqual, FloatCC::LessThanOrEqual),
        _ => unreachable!("{} is not a loose comparison", opcode.name()),
    }
}

impl Translator<'_, '_> {
    /// `I8` truthiness of `o`.
    pub(super) fn emit_is_true(&mut self, o: &Opnd) -> Value {
        if let ZvalAddr::Lit(index) = o.addr {
            let truthy = literal_truthy(self.op_array.literal(index));
            return self.b.ins().iconst(types::I8, i64::from(truthy));
        }
        match o.info.concrete() {
            Some(tag::UNDEF | tag::NULL | tag::FALSE) => {
                return self.b.ins().iconst(types::I8, 0);
            }
            Some(tag::TRUE) => return self.b.ins().iconst(types::I8, 1),
            Some(tag::LONG) => {
                let v = self.lval(o.addr);
                return self.b.ins().icmp_imm(IntCC::NotEqual, v, 0);
            }
            Some(tag::DOUBLE) => {
                let d = self.dval(o.addr);
                let zero = self.b.ins().f64const(0.0);
                return self.b.ins().fcmp(FloatCC::NotEqual, d, zero);
            }
            _ => {}
        }
        let ty = self.load_type(o.addr, o.info);
        let simple = TypeMask::UNDEF | TypeMask::SIMPLE;
        if o.info.is_subset_of(simple) {
            return self.b.ins().icmp_imm(IntCC::Equal, ty, i64::from(tag::TRUE));
        }

        let merge = self.b.create_block();
        self.b.append_block_param(merge, types::I8);
        let rest_info = o.info.without(simple);
        if o.info.intersects(simple) {
            let rest = self.b.create_block();
            let is_simple = self
                .b
                .ins()
                .icmp_imm(IntCC::UnsignedLessThanOrEqual, ty, i64::from(tag::TRUE));
            let is_true = self.b.ins().icmp_imm(IntCC::Equal, ty, i64::from(tag::TRUE));
            self.b
                .ins()
                .brif(is_simple, merge, &[BlockArg::Value(is_true)], rest, &[]);
            self.b.switch_to_block(rest);
        }

        let long = rest_info.may_be(tag::LONG).then(|| self.b.create_block());
        let double = rest_info.may_be(tag::DOUBLE).then(|| self.b.create_block());
        let slow = (!rest_info.is_subset_of(TypeMask::NUMBER)).then(|| self.cold_block());
        let mut arms = Vec::with_capacity(2);
        arms.extend(long.map(|b| (tag::LONG, b)));
        arms.extend(double.map(|b| (tag::DOUBLE, b)));
        self.switch_tag(ty, rest_info, &arms, slow);

        if let Some(block) = long {
            self.b.switch_to_block(block);
            let v = self.lval(o.addr);
            let r = self.b.ins().icmp_imm(IntCC::NotEqual, v, 0);
            self.b.ins().jump(merge, &[BlockArg::Value(r)]);
        }
        if let Some(block) = double {
            self.b.switch_to_block(block);
            let d = self.dval(o.addr);
            let zero = self.b.ins().f64const(0.0);
            let r = self.b.ins().fcmp(FloatCC::NotEqual, d, zero);
            self.b.ins().jump(merge, &[BlockArg::Value(r)]);
        }
        if let Some(block) = slow {
            self.b.switch_to_block(block);
            let p = self.zval_ptr(o.addr);
            let r = self.helper_checked(HelperKind::IsTrue, &[p]);
            let r = match r {
                Some(r) => self.b.ins().icmp_imm(IntCC::NotEqual, r, 0),
                None => unreachable!("IsTrue returns a value"),
            };
            self.b.ins().jump(merge, &[BlockArg::Value(r)]);
        }

        self.b.switch_to_block(merge);
        self.b.block_params(merge)[0]
    }

    /// `I8` result of `op1 <cc> op2` under loose comparison.
    fn loose_compare(&mut self, opcode: Opcode, op1: &Opnd, op2: &Opnd) -> Value {
        let (icc, fcc) = condition(opcode);
        if let (Some(a), Some(b)) = (self.lit_long(op1), self.lit_long(op2)) {
            let a = self.b.ins().iconst(types::I64, a);
            return self.b.ins().icmp_imm(icc, a, b);
        }
        let paths = self.numeric_dispatch(op1, op2, true, false, false);
        let merge = self.b.create_block();
        self.b.append_block_param(merge, types::I8);

        if let Some(block) = paths.long_long {
            self.b.switch_to_block(block);
            let a = self.lval(op1.addr);
            let b = self.lval(op2.addr);
            let r = self.b.ins().icmp(icc, a, b);
            self.b.ins().jump(merge, &[BlockArg::Value(r)]);
        }
        if let Some(block) = paths.double {
            self.b.switch_to_block(block);
            let x = self.b.block_params(block)[0];
            let y = self.b.block_params(block)[1];
            let r = self.b.ins().fcmp(fcc, x, y);
            self.b.ins().jump(merge, &[BlockArg::Value(r)]);
        }
        if let Some(block) = paths.slow {
            self.b.switch_to_block(block);
            let a = self.spill(op1.addr, op1.info);
            let a = self.zval_ptr(a);
            let b = self.spill(op2.addr, op2.info);
            let b = self.zval_ptr(b);
            let order = match self.helper_checked(HelperKind::Compare, &[a, b]) {
                Some(order) => order,
                None => unreachable!("Compare returns a value"),
            };
            let r = self.b.ins().icmp_imm(icc, order, 0);
            self.b.ins().jump(merge, &[BlockArg::Value(r)]);
        }

        self.b.switch_to_block(merge);
        self.b.block_params(merge)[0]
    }

    /// `I8` result of `op1 === op2`.
    fn identical(&mut self, op1: &Opnd, op2: &Opnd) -> Value {
        let common = op1.info.tags() & op2.info.tags();
        if common.is_empty() {
            return self.b.ins().iconst(types::I8, 0);
        }
        if let (Some(a), Some(b)) = (op1.info.concrete(), op2.info.concrete()) {
            if a == b && a <= tag::TRUE {
                return self.b.ins().iconst(types::I8, 1);
            }
        }
        // null, false and true carry no payload: the tag decides
        let tag_only = |o: &Opnd| {
            o.info
                .concrete()
                .filter(|&t| (tag::NULL..=tag::TRUE).contains(&t))
        };
        let known = match (tag_only(op1), tag_only(op2)) {
            (Some(t), _) => Some((t, op2)),
            (None, Some(t)) => Some((t, op1)),
            (None, None) => None,
        };
        if let Some((t, other)) = known {
            let ty = self.load_type(other.addr, other.info);
            return if t == tag::NULL && other.info.may_be(tag::UNDEF) {
                self.b
                    .ins()
                    .icmp_imm(IntCC::UnsignedLessThanOrEqual, ty, i64::from(tag::NULL))
            } else {
                self.b.ins().icmp_imm(IntCC::Equal, ty, i64::from(t))
            };
        }
        let scalar = TypeMask::SIMPLE | TypeMask::NUMBER;
        if !op1.info.is_subset_of(scalar) || !op2.info.is_subset_of(scalar) {
            let a = self.spill(op1.addr, op1.info);
            let a = self.zval_ptr(a);
            let b = self.spill(op2.addr, op2.info);
            let b = self.zval_ptr(b);
            let r = self.helper_ret(HelperKind::IsIdentical, &[a, b]);
            return self.b.ins().icmp_imm(IntCC::NotEqual, r, 0);
        }

        let merge = self.b.create_block();
        self.b.append_block_param(merge, types::I8);
        let t1 = self.load_type(op1.addr, op1.info);
        let t2 = self.load_type(op2.addr, op2.info);
        let same_tag = self.b.create_block();
        let same = self.b.ins().icmp(IntCC::Equal, t1, t2);
        let zero = self.b.ins().iconst(types::I8, 0);
        self.b
            .ins()
            .brif(same, same_tag, &[], merge, &[BlockArg::Value(zero)]);

        self.b.switch_to_block(same_tag);
        let long = common.may_be(tag::LONG).then(|| self.b.create_block());
        let double = common.may_be(tag::DOUBLE).then(|| self.b.create_block());
        let simple = common.intersects(TypeMask::SIMPLE).then(|| self.b.create_block());
        let mut arms = Vec::with_capacity(2);
        arms.extend(long.map(|b| (tag::LONG, b)));
        arms.extend(double.map(|b| (tag::DOUBLE, b)));
        self.switch_tag(t1, common, &arms, simple);

        if let Some(block) = long {
            self.b.switch_to_block(block);
            let a = self.lval(op1.addr);
            let b = self.lval(op2.addr);
            let r = self.b.ins().icmp(IntCC::Equal, a, b);
            self.b.ins().jump(merge, &[BlockArg::Value(r)]);
        }
        if let Some(block) = double {
            self.b.switch_to_block(block);
            let a = self.dval(op1.addr);
            let b = self.dval(op2.addr);
            let r = self.b.ins().fcmp(FloatCC::Equal, a, b);
            self.b.ins().jump(merge, &[BlockArg::Value(r)]);
        }
        if let Some(block) = simple {
            self.b.switch_to_block(block);
            let one = self.b.ins().iconst(types::I8, 1);
            self.b.ins().jump(merge, &[BlockArg::Value(one)]);
        }

        self.b.switch_to_block(merge);
        self.b.block_params(merge)[0]
    }

    /// The truth jump at `pc + 1` consumes this instruction's result and
    /// nothing else can reach it.
    fn fusible_jump(&self, res: &Opnd) -> Option<usize> {
        if res.op.kind != OperandKind::TmpVar {
            return None;
        }
        let next = self.pc + 1;
        let insn = self.op_array.instructions.get(next)?;
        let fusible = matches!(insn.opcode, Opcode::Jmpz | Opcode::Jmpnz | Opcode::Jmpznz)
            && insn.op1.same_slot(res.op)
            && self.facts.block_at(next as u32).is_none();
        fusible.then_some(next)
    }

    /// Branch on `cond` as the truth jump at `pc` would on a value with
    /// that truthiness.
    fn branch_truth(&mut self, pc: usize, cond: Value) {
        let insn = self.op_array.instructions[pc];
        let fall = pc as u32 + 1;
        match insn.opcode {
            Opcode::Jmpz | Opcode::JmpzEx => self.branch_to_pc(cond, fall, insn.op2.num),
            Opcode::Jmpnz | Opcode::JmpnzEx => self.branch_to_pc(cond, insn.op2.num, fall),
            Opcode::Jmpznz => self.branch_to_pc(cond, insn.extended_value, insn.op2.num),
            _ => unreachable!("{} is not a truth jump", insn.opcode.name()),
        }
    }

    /// Store `cond` into `res`, or branch on it when a truth jump follows.
    pub(super) fn finish_condition(&mut self, res: &Opnd, cond: Value) -> Flow {
        if let Some(jump) = self.fusible_jump(res) {
            self.branch_truth(jump, cond);
            return Flow::Terminated;
        }
        self.set_bool(res.addr, cond);
        Flow::Continue
    }

    // ---- instructions ----

    /// `IS_EQUAL` .. `IS_SMALLER_OR_EQUAL`, `CASE`, `IS_(NOT_)IDENTICAL`
    pub(super) fn compare(&mut self, opcode: Opcode) -> Flow {
        let (raw1, op1) = self.read_op(OperandSlot::Op1);
        let (raw2, op2) = self.read_op(OperandSlot::Op2);
        let res = self.def_op(OperandSlot::Result);
        let cond = match opcode {
            Opcode::IsIdentical => self.identical(&op1, &op2),
            Opcode::IsNotIdentical => {
                let same = self.identical(&op1, &op2);
                self.b.ins().bxor_imm(same, 1)
            }
            _ => self.loose_compare(opcode, &op1, &op2),
        };
        // the switch subject survives every CASE arm
        if opcode != Opcode::Case {
            self.free_op(raw1);
        }
        self.free_op(raw2);
        self.finish_condition(&res, cond)
    }

    /// `BOOL`, `BOOL_NOT`
    pub(super) fn bool_op(&mut self, negate: bool) -> Flow {
        let (raw, op1) = self.read_op(OperandSlot::Op1);
        let res = self.def_op(OperandSlot::Result);
        let mut cond = self.emit_is_true(&op1);
        if negate {
            cond = self.b.ins().bxor_imm(cond, 1);
        }
        self.free_op(raw);
        self.finish_condition(&res, cond)
    }

    /// `BOOL_XOR`
    pub(super) fn bool_xor(&mut self) {
        let (raw1, op1) = self.read_op(OperandSlot::Op1);
        let (raw2, op2) = self.read_op(OperandSlot::Op2);
        let res = self.def_op(OperandSlot::Result);
        let a = self.emit_is_true(&op1);
        let b = self.emit_is_true(&op2);
        let r = self.b.ins().bxor(a, b);
        self.free_op(raw1);
        self.free_op(raw2);
        self.set_bool(res.addr, r);
    }

    /// `TYPE_CHECK`: the mask of accepted tags is in `extended_value`.
    pub(super) fn type_check(&mut self) -> Flow {
        let (raw, op1) = self.read_op(OperandSlot::Op1);
        let res = self.def_op(OperandSlot::Result);
        let mask = self.insn().extended_value;
        let cond = match op1.info.concrete() {
            Some(t) => {
                let hit = mask & (1 << t) != 0;
                self.b.ins().iconst(types::I8, i64::from(hit))
            }
            None => {
                let ty = self.load_type(op1.addr, op1.info);
                let ty = self.b.ins().uextend(types::I32, ty);
                let one = self.b.ins().iconst(types::I32, 1);
                let bit = self.b.ins().ishl(one, ty);
                let hit = self.b.ins().band_imm(bit, i64::from(mask));
                self.b.ins().icmp_imm(IntCC::NotEqual, hit, 0)
            }
        };
        self.free_op(raw);
        self.finish_condition(&res, cond)
    }

    /// `ISSET_ISEMPTY_CV`
    pub(super) fn isset_isempty_cv(&mut self) -> Flow {
        let raw = self.use_op(OperandSlot::Op1);
        let fetched = self.fetch_cv(raw, Fetch::Is);
        let value = self.deref(fetched);
        let res = self.def_op(OperandSlot::Result);
        let cond = if self.insn().extended_value & instruction::ISEMPTY != 0 {
            let truthy = self.emit_is_true(&value);
            self.b.ins().bxor_imm(truthy, 1)
        } else if value.info.is_subset_of(TypeMask::UNDEF | TypeMask::NULL) {
            self.b.ins().iconst(types::I8, 0)
        } else if !value.info.intersects(TypeMask::UNDEF | TypeMask::NULL) {
            self.b.ins().iconst(types::I8, 1)
        } else {
            let ty = self.load_type(value.addr, value.info);
            self.b
                .ins()
                .icmp_imm(IntCC::UnsignedGreaterThan, ty, i64::from(tag::NULL))
        };
        self.finish_condition(&res, cond)
    }

    /// `JMPZ`, `JMPNZ`, `JMPZNZ`, `JMPZ_EX`, `JMPNZ_EX`
    pub(super) fn truth_jump(&mut self, opcode: Opcode) -> Flow {
        let (raw, op1) = self.read_op(OperandSlot::Op1);
        let cond = self.emit_is_true(&op1);
        self.free_op(raw);
        if matches!(opcode, Opcode::JmpzEx | Opcode::JmpnzEx) {
            let res = self.def_op(OperandSlot::Result);
            self.set_bool(res.addr, cond);
        }
        self.branch_truth(self.pc, cond);
        Flow::Terminated
    }

    /// `JMP`
    pub(super) fn jmp(&mut self) -> Flow {
        let target = self.insn().op1.num;
        self.jump_to_pc(target);
        Flow::Terminated
    }
}
