//! Operand resolution.

use cranelift_codegen::ir::instructions::BlockArg;
use cranelift_codegen::ir::{InstBuilder, Value, condcodes::IntCC, types};
use opjit_bytecode::{Instruction, Operand, OperandKind, OperandSlot, TypeMask, tag};

use super::Translator;
use super::value::ZvalAddr;
use crate::helpers::HelperKind;
use crate::layout::offsets;

/// A resolved operand of the current instruction.
#[derive(Debug, Clone, Copy)]
pub(super) struct Opnd {
    pub(super) op: Operand,
    pub(super) addr: ZvalAddr,
    pub(super) info: TypeMask,
    pub(super) ssa: Option<u32>,
}

impl Opnd {
    pub(super) fn is_cv(&self) -> bool {
        self.op.is_cv()
    }

    pub(super) fn is_const(&self) -> bool {
        self.op.is_const()
    }

    pub(super) fn is_unused(&self) -> bool {
        self.op.is_unused()
    }

    pub(super) fn is_tmp(&self) -> bool {
        self.op.kind == OperandKind::TmpVar
    }

    pub(super) fn is_var(&self) -> bool {
        self.op.kind == OperandKind::Var
    }

    /// Value is copied (needs a new reference) rather than moved.
    pub(super) fn is_copied(&self) -> bool {
        self.is_cv() || self.is_const()
    }

    pub(super) fn with(self, addr: ZvalAddr, info: TypeMask) -> Self {
        Self { addr, info, ..self }
    }
}

/// Access mode of a compiled-variable read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Fetch {
    /// Read; undefined reads report and yield `null`
    R,
    /// Write; undefined slots become `null` silently
    W,
    /// Read-modify-write; report, then initialize to `null`
    Rw,
    /// Quiet read (`isset`/`empty`); undefined stays undefined
    Is,
}

/// Type set assumed for an operand without SSA facts.
fn default_info(kind: OperandKind) -> TypeMask {
    match kind {
        OperandKind::Cv => TypeMask::ANY | TypeMask::UNDEF | TypeMask::REF,
        OperandKind::Var => TypeMask::ANY | TypeMask::REF,
        OperandKind::TmpVar => TypeMask::ANY,
        OperandKind::Const | OperandKind::Unused => TypeMask::NONE,
    }
}

impl Translator<'_, '_> {
    pub(super) fn insn(&self) -> Instruction {
        self.op_array.instructions[self.pc]
    }

    /// Operand `slot` of instruction `pc`, as used (`def == false`) or as
    /// defined by it.
    pub(super) fn opnd_at(&mut self, pc: usize, slot: OperandSlot, def: bool) -> Opnd {
        let insn = self.op_array.instructions[pc];
        let op = match slot {
            OperandSlot::Op1 => insn.op1,
            OperandSlot::Op2 => insn.op2,
            OperandSlot::Result => insn.result,
        };
        let facts_op = self.facts.op(pc);
        let ssa = if def {
            facts_op.def_of(slot)
        } else {
            facts_op.use_of(slot)
        };
        let (addr, info) = match op.kind {
            OperandKind::Const => {
                let info = self.op_array.literal(op.num).type_mask();
                (ZvalAddr::Lit(op.num), info)
            }
            OperandKind::Unused => {
                let ex = self.ex;
                (
                    ZvalAddr::Mem {
                        base: ex,
                        offset: offsets::EX_THIS,
                    },
                    TypeMask::NONE,
                )
            }
            kind => {
                let info = ssa
                    .map(|v| self.facts.var(v).types)
                    .unwrap_or_else(|| default_info(kind));
                let addr = match ssa.and_then(|v| self.residency.kind(v)) {
                    Some(kind) => ZvalAddr::Reg { slot: op.num, kind },
                    None => self.frame_slot(op.num),
                };
                (addr, info)
            }
        };
        Opnd {
            op,
            addr,
            info,
            ssa,
        }
    }

    /// Operand `slot` of the current instruction, as read.
    pub(super) fn use_op(&mut self, slot: OperandSlot) -> Opnd {
        self.opnd_at(self.pc, slot, false)
    }

    /// Operand `slot` of the current instruction, as written.
    pub(super) fn def_op(&mut self, slot: OperandSlot) -> Opnd {
        self.opnd_at(self.pc, slot, true)
    }

    /// Read operand `slot`: undefined variables handled, references
    /// followed.
    pub(super) fn read_op(&mut self, slot: OperandSlot) -> (Opnd, Opnd) {
        let raw = self.use_op(slot);
        let fetched = self.fetch_cv(raw, Fetch::R);
        let value = self.deref(fetched);
        (raw, value)
    }

    /// Emit the "Undefined variable" diagnostic for CV `slot`.
    pub(super) fn undefined_cv(&mut self, slot: u32) {
        let ex = self.ex;
        let slot = self.b.ins().iconst(types::I32, i64::from(slot));
        self.helper(HelperKind::UndefinedCv, &[ex, slot]);
    }

    /// Handle a compiled variable that may be undefined.
    pub(super) fn fetch_cv(&mut self, o: Opnd, mode: Fetch) -> Opnd {
        if !o.is_cv() || o.addr.is_reg() || !o.info.may_be(tag::UNDEF) || mode == Fetch::Is {
            return o;
        }
        let after = o.info.without(TypeMask::UNDEF) | TypeMask::NULL;
        let slot = o.op.num;

        if o.info.is_only(tag::UNDEF) {
            return match mode {
                Fetch::R => {
                    self.undefined_cv(slot);
                    let sentinel = self.iconst_ptr(self.rt.uninitialized_zval);
                    o.with(ZvalAddr::at(sentinel), TypeMask::NULL)
                }
                Fetch::W | Fetch::Rw => {
                    if mode == Fetch::Rw {
                        self.undefined_cv(slot);
                    }
                    self.set_null(o.addr);
                    o.with(o.addr, TypeMask::NULL)
                }
                Fetch::Is => o,
            };
        }

        let ty = self.load_type(o.addr, o.info);
        let is_undef = self.b.ins().icmp_imm(IntCC::Equal, ty, i64::from(tag::UNDEF));
        let undef = self.cold_block();
        let cont = self.b.create_block();

        match mode {
            Fetch::R => {
                self.b.append_block_param(cont, self.ptr);
                let here = self.zval_ptr(o.addr);
                self.b
                    .ins()
                    .brif(is_undef, undef, &[], cont, &[BlockArg::Value(here)]);
                self.b.switch_to_block(undef);
                self.undefined_cv(slot);
                let sentinel = self.iconst_ptr(self.rt.uninitialized_zval);
                self.b.ins().jump(cont, &[BlockArg::Value(sentinel)]);
                self.b.switch_to_block(cont);
                let p = self.b.block_params(cont)[0];
                o.with(ZvalAddr::at(p), after)
            }
            _ => {
                self.b.ins().brif(is_undef, undef, &[], cont, &[]);
                self.b.switch_to_block(undef);
                if mode == Fetch::Rw {
                    self.undefined_cv(slot);
                }
                self.set_null(o.addr);
                self.b.ins().jump(cont, &[]);
                self.b.switch_to_block(cont);
                o.with(o.addr, after)
            }
        }
    }

    /// Follow a reference: the result addresses the referenced value.
    pub(super) fn deref(&mut self, o: Opnd) -> Opnd {
        if !o.info.may_be(tag::REFERENCE) || o.addr.is_reg() || o.addr.is_lit() {
            return o;
        }
        let mut inner = o.info.without(TypeMask::REF);
        if inner.is_empty() {
            inner = TypeMask::ANY;
        }
        if o.info.is_only(tag::REFERENCE) {
            let r = self.ptr_val(o.addr);
            return o.with(
                ZvalAddr::Mem {
                    base: r,
                    offset: offsets::REF_VAL,
                },
                inner,
            );
        }
        let ty = self.load_type(o.addr, o.info);
        let is_ref = self
            .b
            .ins()
            .icmp_imm(IntCC::Equal, ty, i64::from(tag::REFERENCE));
        let here = self.zval_ptr(o.addr);
        let via_ref = self.b.create_block();
        let merge = self.b.create_block();
        self.b.append_block_param(merge, self.ptr);
        self.b
            .ins()
            .brif(is_ref, via_ref, &[], merge, &[BlockArg::Value(here)]);

        self.b.switch_to_block(via_ref);
        let r = self.load_ptr(here, offsets::ZVAL_VALUE);
        let val = self.gep(r, offsets::REF_VAL);
        self.b.ins().jump(merge, &[BlockArg::Value(val)]);

        self.b.switch_to_block(merge);
        let p = self.b.block_params(merge)[0];
        o.with(ZvalAddr::at(p), inner)
    }

    /// Resolve a `VAR` operand that may hold an `INDIRECT` pointer to a
    /// container element.
    ///
    /// Returns the target and an `I8` flag telling the caller to free the
    /// slot after use:
    ///
    /// - `INDIRECT`: the element is written in place, nothing to free
    /// - uncounted, or counted once: the caller frees the slot
    /// - shared: the slot's reference is dropped here and never again
    pub(super) fn var_target(&mut self, o: Opnd) -> (Opnd, Option<Value>) {
        if !o.is_var() || o.addr.is_reg() {
            return (o, None);
        }
        let here = self.zval_ptr(o.addr);
        let slot_info = TypeMask::ANY | TypeMask::REF;
        let ty = self.load_type(ZvalAddr::at(here), slot_info);
        let indirect = self
            .b
            .ins()
            .icmp_imm(IntCC::Equal, ty, i64::from(tag::INDIRECT));
        let follow = self.b.create_block();
        let direct = self.b.create_block();
        let merge = self.b.create_block();
        self.b.append_block_param(merge, self.ptr);
        self.b.append_block_param(merge, types::I8);
        self.b.ins().brif(indirect, follow, &[], direct, &[]);

        self.b.switch_to_block(direct);
        let one = self.b.ins().iconst(types::I8, 1);
        let owned = [BlockArg::Value(here), BlockArg::Value(one)];
        if o.info.may_be_refcounted() {
            let counted = self.b.create_block();
            let shared = self.b.create_block();
            let cond = self.is_refcounted(ZvalAddr::at(here), slot_info);
            self.b.ins().brif(cond, counted, &[], merge, &owned);

            self.b.switch_to_block(counted);
            let payload = self.load_ptr(here, offsets::ZVAL_VALUE);
            let rc = self.load_u32(payload, offsets::GC_REFCOUNT);
            let many = self.b.ins().icmp_imm(IntCC::UnsignedGreaterThan, rc, 1);
            self.b.ins().brif(many, shared, &[], merge, &owned);

            self.b.switch_to_block(shared);
            self.delref(payload);
            let zero = self.b.ins().iconst(types::I8, 0);
            self.b
                .ins()
                .jump(merge, &[BlockArg::Value(here), BlockArg::Value(zero)]);
        } else {
            self.b.ins().jump(merge, &owned);
        }

        self.b.switch_to_block(follow);
        let target = self.load_ptr(here, offsets::ZVAL_VALUE);
        let zero = self.b.ins().iconst(types::I8, 0);
        self.b
            .ins()
            .jump(merge, &[BlockArg::Value(target), BlockArg::Value(zero)]);

        self.b.switch_to_block(merge);
        let p = self.b.block_params(merge)[0];
        let free = self.b.block_params(merge)[1];
        (
            o.with(ZvalAddr::at(p), o.info | TypeMask::NULL | TypeMask::UNDEF),
            Some(free),
        )
    }

    /// Free a `VAR` slot resolved by [`Self::var_target`] when it held a
    /// direct value.
    pub(super) fn free_var_target(&mut self, raw: Opnd, free: Option<Value>) {
        let Some(free) = free else {
            return;
        };
        let release = self.b.create_block();
        let done = self.b.create_block();
        self.b.ins().brif(free, release, &[], done, &[]);
        self.b.switch_to_block(release);
        self.release(raw.addr, raw.info);
        self.b.ins().jump(done, &[]);
        self.b.switch_to_block(done);
    }

    /// Release a temporary operand after its last use.
    pub(super) fn free_op(&mut self, raw: Opnd) {
        if raw.is_tmp() || raw.is_var() {
            self.release(raw.addr, raw.info);
        }
    }
}
