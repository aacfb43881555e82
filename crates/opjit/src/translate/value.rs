//! Typed access to zval fields.
//!
//! Every read or write of a value goes through a [`ZvalAddr`]. Memory
//! addresses and literals load and store through the frame or literal
//! pool; register-resident values live in Cranelift variables and only
//! carry what their [`RegKind`] needs (the payload for longs and doubles,
//! the tag for `null|false|true`).

use cranelift_codegen::ir::{InstBuilder, MemFlags, StackSlotData, StackSlotKind, Value, types};
use opjit_bytecode::{Literal, TypeMask, tag};

use super::Translator;
use crate::layout::{offsets, type_info, var_offset};
use crate::regalloc::RegKind;

/// Where a zval lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ZvalAddr {
    /// In memory at `base + offset`
    Mem { base: Value, offset: i32 },
    /// Literal `index` of the op array's pool
    Lit(u32),
    /// Register variable of frame slot `slot`
    Reg { slot: u32, kind: RegKind },
}

impl ZvalAddr {
    /// Zval at `base`.
    pub(crate) fn at(base: Value) -> Self {
        Self::Mem { base, offset: 0 }
    }

    pub(crate) fn is_reg(self) -> bool {
        matches!(self, Self::Reg { .. })
    }

    pub(crate) fn is_lit(self) -> bool {
        matches!(self, Self::Lit(_))
    }
}

pub(super) const MEM: MemFlags = MemFlags::trusted();

impl Translator<'_, '_> {
    // ---- raw memory ----

    pub(super) fn iconst_ptr(&mut self, addr: usize) -> Value {
        self.b.ins().iconst(self.ptr, addr as i64)
    }

    pub(super) fn gep(&mut self, base: Value, offset: i32) -> Value {
        if offset == 0 {
            base
        } else {
            self.b.ins().iadd_imm(base, i64::from(offset))
        }
    }

    pub(super) fn load_ptr(&mut self, base: Value, offset: i32) -> Value {
        self.b.ins().load(self.ptr, MEM, base, offset)
    }

    pub(super) fn load_u32(&mut self, base: Value, offset: i32) -> Value {
        self.b.ins().load(types::I32, MEM, base, offset)
    }

    pub(super) fn store_at(&mut self, value: Value, base: Value, offset: i32) {
        self.b.ins().store(MEM, value, base, offset);
    }

    /// Store a pointer-sized constant at `base + offset`.
    pub(super) fn store_ptr_const(&mut self, value: usize, base: Value, offset: i32) {
        let v = self.iconst_ptr(value);
        self.store_at(v, base, offset);
    }

    /// Frame slot `slot` of the current frame.
    pub(super) fn frame_slot(&mut self, slot: u32) -> ZvalAddr {
        ZvalAddr::Mem {
            base: self.ex,
            offset: var_offset(slot),
        }
    }

    // ---- addresses ----

    /// Base register and displacement of a memory or literal zval.
    pub(super) fn mem_loc(&mut self, addr: ZvalAddr) -> (Value, i32) {
        match addr {
            ZvalAddr::Mem { base, offset } => (base, offset),
            ZvalAddr::Lit(index) => {
                let base = self.iconst_ptr(self.literals.addr(index));
                (base, 0)
            }
            ZvalAddr::Reg { slot, .. } => {
                panic!("register-resident slot {slot} has no memory address")
            }
        }
    }

    /// Pointer to a memory or literal zval.
    pub(super) fn zval_ptr(&mut self, addr: ZvalAddr) -> Value {
        let (base, offset) = self.mem_loc(addr);
        self.gep(base, offset)
    }

    /// Cranelift variable backing slot `slot` in register class `kind`.
    pub(super) fn reg_var(&mut self, slot: u32, kind: RegKind) -> cranelift_frontend::Variable {
        if let Some(var) = self.regs.get(&(slot, kind)) {
            return *var;
        }
        let ty = match kind {
            RegKind::Long => types::I64,
            RegKind::Double => types::F64,
            RegKind::Tag => types::I8,
        };
        let var = self.b.declare_var(ty);
        self.regs.insert((slot, kind), var);
        var
    }

    fn literal(&self, index: u32) -> &Literal {
        self.op_array.literal(index)
    }

    // ---- type ----

    /// Type tag (`I8`). Folded to a constant when `info` names one tag.
    pub(super) fn load_type(&mut self, addr: ZvalAddr, info: TypeMask) -> Value {
        if let Some(t) = info.concrete() {
            return self.b.ins().iconst(types::I8, i64::from(t));
        }
        match addr {
            ZvalAddr::Reg { slot, kind } => match kind {
                RegKind::Long => self.b.ins().iconst(types::I8, i64::from(tag::LONG)),
                RegKind::Double => self.b.ins().iconst(types::I8, i64::from(tag::DOUBLE)),
                RegKind::Tag => {
                    let var = self.reg_var(slot, kind);
                    self.b.use_var(var)
                }
            },
            ZvalAddr::Lit(index) => {
                let t = self.literal(index).type_tag();
                self.b.ins().iconst(types::I8, i64::from(t))
            }
            ZvalAddr::Mem { base, offset } => {
                // little endian: the tag is the low byte of the type info
                self.b
                    .ins()
                    .load(types::I8, MEM, base, offset + offsets::ZVAL_TYPE_INFO)
            }
        }
    }

    /// Full type info word (`I32`).
    pub(super) fn load_type_info(&mut self, addr: ZvalAddr, info: TypeMask) -> Value {
        match addr {
            ZvalAddr::Lit(index) => {
                let ti = self.literals.zval(index).type_info;
                self.b.ins().iconst(types::I32, i64::from(ti))
            }
            ZvalAddr::Reg { .. } => {
                let t = self.load_type(addr, info);
                self.b.ins().uextend(types::I32, t)
            }
            ZvalAddr::Mem { base, offset } => match info.concrete() {
                Some(t) if t <= tag::DOUBLE => {
                    self.b.ins().iconst(types::I32, i64::from(type_info::simple(t)))
                }
                _ => self.load_u32(base, offset + offsets::ZVAL_TYPE_INFO),
            },
        }
    }

    /// Store a constant type info word.
    pub(super) fn store_type_info(&mut self, addr: ZvalAddr, ti: u32) {
        match addr {
            ZvalAddr::Mem { base, offset } => {
                let v = self.b.ins().iconst(types::I32, i64::from(ti));
                self.store_at(v, base, offset + offsets::ZVAL_TYPE_INFO);
            }
            ZvalAddr::Reg { slot, kind: RegKind::Tag } => {
                let var = self.reg_var(slot, RegKind::Tag);
                let v = self.b.ins().iconst(types::I8, i64::from(ti as u8));
                self.b.def_var(var, v);
            }
            ZvalAddr::Reg { .. } => {}
            ZvalAddr::Lit(_) => panic!("store to a literal"),
        }
    }

    /// Store a computed type info word (`I32`).
    pub(super) fn store_type_info_val(&mut self, addr: ZvalAddr, ti: Value) {
        match addr {
            ZvalAddr::Mem { base, offset } => {
                self.store_at(ti, base, offset + offsets::ZVAL_TYPE_INFO);
            }
            ZvalAddr::Reg { slot, kind: RegKind::Tag } => {
                let var = self.reg_var(slot, RegKind::Tag);
                let t = self.b.ins().ireduce(types::I8, ti);
                self.b.def_var(var, t);
            }
            ZvalAddr::Reg { .. } => {}
            ZvalAddr::Lit(_) => panic!("store to a literal"),
        }
    }

    // ---- payload ----

    pub(super) fn lval(&mut self, addr: ZvalAddr) -> Value {
        match addr {
            ZvalAddr::Reg { slot, kind } => {
                let var = self.reg_var(slot, kind);
                self.b.use_var(var)
            }
            ZvalAddr::Lit(index) => {
                let v = self.literals.zval(index).lval();
                self.b.ins().iconst(types::I64, v)
            }
            ZvalAddr::Mem { base, offset } => {
                self.b
                    .ins()
                    .load(types::I64, MEM, base, offset + offsets::ZVAL_VALUE)
            }
        }
    }

    pub(super) fn dval(&mut self, addr: ZvalAddr) -> Value {
        match addr {
            ZvalAddr::Reg { slot, kind } => {
                let var = self.reg_var(slot, kind);
                self.b.use_var(var)
            }
            ZvalAddr::Lit(index) => {
                let v = self.literals.zval(index).dval();
                self.b.ins().f64const(v)
            }
            ZvalAddr::Mem { base, offset } => {
                self.b
                    .ins()
                    .load(types::F64, MEM, base, offset + offsets::ZVAL_VALUE)
            }
        }
    }

    /// Pointer payload of a memory or literal zval.
    pub(super) fn ptr_val(&mut self, addr: ZvalAddr) -> Value {
        match addr {
            ZvalAddr::Lit(index) => {
                let p = self.literals.zval(index).value;
                self.b.ins().iconst(self.ptr, p as i64)
            }
            _ => {
                let (base, offset) = self.mem_loc(addr);
                self.load_ptr(base, offset + offsets::ZVAL_VALUE)
            }
        }
    }

    pub(super) fn store_payload(&mut self, addr: ZvalAddr, v: Value) {
        let (base, offset) = self.mem_loc(addr);
        self.store_at(v, base, offset + offsets::ZVAL_VALUE);
    }

    // ---- whole values ----

    /// The path writing a value `addr` can never hold: the types say it is
    /// dead, so it traps.
    fn impossible_store(&mut self) {
        self.unreachable_path();
    }

    pub(super) fn set_null(&mut self, addr: ZvalAddr) {
        match addr {
            ZvalAddr::Reg { kind: RegKind::Long | RegKind::Double, .. } => self.impossible_store(),
            _ => self.store_type_info(addr, type_info::NULL),
        }
    }

    pub(super) fn set_bool_const(&mut self, addr: ZvalAddr, value: bool) {
        match addr {
            ZvalAddr::Reg { kind: RegKind::Long | RegKind::Double, .. } => self.impossible_store(),
            _ => self.store_type_info(
                addr,
                if value { type_info::TRUE } else { type_info::FALSE },
            ),
        }
    }

    /// Store a boolean from an `I8` condition (0 or 1).
    pub(super) fn set_bool(&mut self, addr: ZvalAddr, cond: Value) {
        if let ZvalAddr::Reg { kind: RegKind::Long | RegKind::Double, .. } = addr {
            self.impossible_store();
            return;
        }
        let wide = self.b.ins().uextend(types::I32, cond);
        let ti = self.b.ins().iadd_imm(wide, i64::from(type_info::FALSE));
        self.store_type_info_val(addr, ti);
    }

    pub(super) fn set_long(&mut self, addr: ZvalAddr, v: Value) {
        match addr {
            ZvalAddr::Reg { slot, kind: RegKind::Long } => {
                let var = self.reg_var(slot, RegKind::Long);
                self.b.def_var(var, v);
            }
            ZvalAddr::Reg { .. } => self.impossible_store(),
            _ => {
                self.store_payload(addr, v);
                self.store_type_info(addr, type_info::LONG);
            }
        }
    }

    pub(super) fn set_double(&mut self, addr: ZvalAddr, v: Value) {
        match addr {
            ZvalAddr::Reg { slot, kind: RegKind::Double } => {
                let var = self.reg_var(slot, RegKind::Double);
                self.b.def_var(var, v);
            }
            ZvalAddr::Reg { .. } => self.impossible_store(),
            _ => {
                self.store_payload(addr, v);
                self.store_type_info(addr, type_info::DOUBLE);
            }
        }
    }

    /// Store a pointer payload with a constant type info.
    pub(super) fn set_ptr(&mut self, addr: ZvalAddr, p: Value, ti: u32) {
        self.store_payload(addr, p);
        self.store_type_info(addr, ti);
    }

    /// Copy type and payload from `src` to `dst`. No reference counting.
    pub(super) fn copy_value(&mut self, dst: ZvalAddr, src: ZvalAddr, src_info: TypeMask) {
        match dst {
            ZvalAddr::Reg { kind: RegKind::Long, .. } => {
                let v = self.lval(src);
                self.set_long(dst, v);
            }
            ZvalAddr::Reg { kind: RegKind::Double, .. } => {
                let v = self.dval(src);
                self.set_double(dst, v);
            }
            ZvalAddr::Reg { kind: RegKind::Tag, .. } => {
                let ti = self.load_type_info(src, src_info);
                self.store_type_info_val(dst, ti);
            }
            ZvalAddr::Lit(_) => panic!("store to a literal"),
            ZvalAddr::Mem { .. } => match src {
                ZvalAddr::Reg { kind: RegKind::Long, .. } => {
                    let v = self.lval(src);
                    self.set_long(dst, v);
                }
                ZvalAddr::Reg { kind: RegKind::Double, .. } => {
                    let v = self.dval(src);
                    self.set_double(dst, v);
                }
                ZvalAddr::Reg { kind: RegKind::Tag, .. } => {
                    let ti = self.load_type_info(src, src_info);
                    self.store_type_info_val(dst, ti);
                }
                ZvalAddr::Lit(index) => {
                    let zv = *self.literals.zval(index);
                    let (base, offset) = self.mem_loc(dst);
                    if zv.type_tag() > tag::TRUE {
                        let v = self.b.ins().iconst(types::I64, zv.value as i64);
                        self.store_at(v, base, offset + offsets::ZVAL_VALUE);
                    }
                    let ti = self.b.ins().iconst(types::I32, i64::from(zv.type_info));
                    self.store_at(ti, base, offset + offsets::ZVAL_TYPE_INFO);
                }
                ZvalAddr::Mem { .. } => match src_info.concrete() {
                    Some(tag::LONG) => {
                        let v = self.lval(src);
                        self.set_long(dst, v);
                    }
                    Some(tag::DOUBLE) => {
                        let v = self.dval(src);
                        self.set_double(dst, v);
                    }
                    Some(t) if t <= tag::TRUE => {
                        self.store_type_info(dst, type_info::simple(t));
                    }
                    _ => {
                        let (sb, so) = self.mem_loc(src);
                        let v = self.b.ins().load(types::I64, MEM, sb, so + offsets::ZVAL_VALUE);
                        let ti = self.load_u32(sb, so + offsets::ZVAL_TYPE_INFO);
                        let (db, doff) = self.mem_loc(dst);
                        self.store_at(v, db, doff + offsets::ZVAL_VALUE);
                        self.store_at(ti, db, doff + offsets::ZVAL_TYPE_INFO);
                    }
                },
            },
        }
    }

    // ---- scratch ----

    /// A zval-sized stack slot, free until the next instruction.
    pub(super) fn scratch_zval(&mut self) -> ZvalAddr {
        let index = self.scratch_used;
        self.scratch_used += 1;
        if index == self.scratch.len() {
            let slot = self.b.create_sized_stack_slot(StackSlotData::new(
                StackSlotKind::ExplicitSlot,
                offsets::ZVAL_SIZE as u32,
                3,
            ));
            self.scratch.push(slot);
        }
        let slot = self.scratch[index];
        let base = self.b.ins().stack_addr(self.ptr, slot, 0);
        ZvalAddr::at(base)
    }

    /// Memory address of `addr`, copying register values to scratch.
    pub(super) fn spill(&mut self, addr: ZvalAddr, info: TypeMask) -> ZvalAddr {
        if !addr.is_reg() {
            return addr;
        }
        let tmp = self.scratch_zval();
        self.copy_value(tmp, addr, info);
        tmp
    }
}
