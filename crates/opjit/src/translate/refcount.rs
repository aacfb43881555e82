//! Reference counting.
//!
//! Releasing a value runs this state machine, with every state skipped
//! when the static type set makes it unreachable:
//!
//! ```text
//!   refcounted? ──no──────────────────────────────────► done
//!       │ yes
//!   --count == 0 ──yes──► destroy ────────────────────► done
//!       │ no
//!   reference? ──yes──► inner collectable? ──no───────► done
//!       │ no                  │ yes
//!   collectable? ──no──► done └─► check(inner)
//!       │ yes
//!   check(counted): info bits clear ──yes──► possible root ─► done
//! ```

use cranelift_codegen::ir::instructions::BlockArg;
use cranelift_codegen::ir::{InstBuilder, Value, condcodes::IntCC, types};
use opjit_bytecode::{TypeMask, tag};

use super::Translator;
use super::value::ZvalAddr;
use crate::helpers::HelperKind;
use crate::layout::{gc, offsets, type_flags, type_info};

impl Translator<'_, '_> {
    pub(super) fn addref(&mut self, counted: Value) {
        let rc = self.load_u32(counted, offsets::GC_REFCOUNT);
        let rc = self.b.ins().iadd_imm(rc, 1);
        self.store_at(rc, counted, offsets::GC_REFCOUNT);
    }

    /// Decrement and return the new count.
    pub(super) fn delref(&mut self, counted: Value) -> Value {
        let rc = self.load_u32(counted, offsets::GC_REFCOUNT);
        let rc = self.b.ins().iadd_imm(rc, -1);
        self.store_at(rc, counted, offsets::GC_REFCOUNT);
        rc
    }

    /// `I8` condition: the zval's payload is counted.
    pub(super) fn is_refcounted(&mut self, addr: ZvalAddr, info: TypeMask) -> Value {
        let ti = self.load_type_info(addr, info);
        let flag = self
            .b
            .ins()
            .band_imm(ti, i64::from(type_flags::REFCOUNTED << type_flags::SHIFT));
        self.b.ins().icmp_imm(IntCC::NotEqual, flag, 0)
    }

    /// Add a reference when the value is counted.
    pub(super) fn try_addref(&mut self, addr: ZvalAddr, info: TypeMask) {
        if addr.is_reg() || addr.is_lit() || !info.may_be_refcounted() {
            return;
        }
        if info.always_refcounted() {
            let counted = self.ptr_val(addr);
            self.addref(counted);
            return;
        }
        let inc = self.b.create_block();
        let done = self.b.create_block();
        let cond = self.is_refcounted(addr, info);
        self.b.ins().brif(cond, inc, &[], done, &[]);

        self.b.switch_to_block(inc);
        let counted = self.ptr_val(addr);
        self.addref(counted);
        self.b.ins().jump(done, &[]);

        self.b.switch_to_block(done);
    }

    /// Drop one reference to the value at `addr`, destroying it at zero and
    /// buffering survivors that may leak through a cycle.
    pub(super) fn release(&mut self, addr: ZvalAddr, info: TypeMask) {
        self.release_impl(addr, info, true);
    }

    /// [`Self::release`] without the cycle check.
    pub(super) fn release_no_gc(&mut self, addr: ZvalAddr, info: TypeMask) {
        self.release_impl(addr, info, false);
    }

    fn release_impl(&mut self, addr: ZvalAddr, info: TypeMask, gc_check: bool) {
        if addr.is_reg() || addr.is_lit() || !info.may_be_refcounted() {
            return;
        }
        let done = self.b.create_block();
        if !info.always_refcounted() {
            let counted_block = self.b.create_block();
            let cond = self.is_refcounted(addr, info);
            self.b.ins().brif(cond, counted_block, &[], done, &[]);
            self.b.switch_to_block(counted_block);
        }
        let counted = self.ptr_val(addr);
        let ty = if gc_check && info.intersects(TypeMask::COLLECTABLE | TypeMask::REF) {
            Some(self.load_type(addr, info))
        } else {
            None
        };
        self.release_counted_impl(counted, info, ty, done);
        self.b.switch_to_block(done);
    }

    /// Drop one reference to a counted payload of type set `info`.
    pub(super) fn release_counted(&mut self, counted: Value, info: TypeMask) {
        let done = self.b.create_block();
        let ty = info
            .concrete()
            .map(|t| self.b.ins().iconst(types::I8, i64::from(t)));
        self.release_counted_impl(counted, info, ty, done);
        self.b.switch_to_block(done);
    }

    /// Leaves the current block terminated; every path ends at `done`.
    fn release_counted_impl(
        &mut self,
        counted: Value,
        info: TypeMask,
        ty: Option<Value>,
        done: cranelift_codegen::ir::Block,
    ) {
        let destroy = self.b.create_block();
        let survive = self.b.create_block();
        let rc = self.delref(counted);
        let zero = self.b.ins().icmp_imm(IntCC::Equal, rc, 0);
        self.b.ins().brif(zero, destroy, &[], survive, &[]);

        self.b.switch_to_block(destroy);
        self.destroy(counted, info.intersects(TypeMask::COLLECTABLE | TypeMask::REF));
        self.b.ins().jump(done, &[]);

        self.b.switch_to_block(survive);
        match ty {
            Some(ty) => self.gc_check(counted, ty, info, done),
            None => {
                self.b.ins().jump(done, &[]);
            }
        }
    }

    /// Run the destructor of a payload whose count hit zero. Objects, and
    /// containers that may hold one, run user code that can throw; the
    /// instruction then ends with an exception check.
    fn destroy(&mut self, counted: Value, may_throw: bool) {
        if may_throw && self.dtor_checks {
            self.store_opline_unmarked();
            self.dtor_check_due = true;
        }
        self.helper(HelperKind::RcDtor, &[counted]);
    }

    /// Buffer a surviving payload as a possible cycle root when it (or the
    /// value a surviving reference points to) is collectable and not yet
    /// buffered.
    fn gc_check(
        &mut self,
        counted: Value,
        ty: Value,
        info: TypeMask,
        done: cranelift_codegen::ir::Block,
    ) {
        let check = self.b.create_block();
        self.b.append_block_param(check, self.ptr);

        let direct = if info.is_only(tag::REFERENCE) {
            None
        } else {
            Some(self.b.create_block())
        };

        if info.may_be(tag::REFERENCE) {
            let inner = self.b.create_block();
            match direct {
                Some(direct) => {
                    let is_ref = self
                        .b
                        .ins()
                        .icmp_imm(IntCC::Equal, ty, i64::from(tag::REFERENCE));
                    self.b.ins().brif(is_ref, inner, &[], direct, &[]);
                }
                None => {
                    self.b.ins().jump(inner, &[]);
                }
            }
            self.b.switch_to_block(inner);
            let ti = self.load_u32(counted, offsets::REF_VAL + offsets::ZVAL_TYPE_INFO);
            let collectable = self
                .b
                .ins()
                .band_imm(ti, i64::from(type_flags::COLLECTABLE << type_flags::SHIFT));
            let inner_counted = self.load_ptr(counted, offsets::REF_VAL + offsets::ZVAL_VALUE);
            self.b.ins().brif(
                collectable,
                check,
                &[BlockArg::Value(inner_counted)],
                done,
                &[],
            );
        } else if let Some(direct) = direct {
            self.b.ins().jump(direct, &[]);
        }

        if let Some(direct) = direct {
            self.b.switch_to_block(direct);
            if info.intersects(TypeMask::COLLECTABLE) {
                let is_collectable = if info.without(TypeMask::REF).is_subset_of(TypeMask::COLLECTABLE)
                {
                    None
                } else {
                    let arr = self.b.ins().icmp_imm(IntCC::Equal, ty, i64::from(tag::ARRAY));
                    let obj = self.b.ins().icmp_imm(IntCC::Equal, ty, i64::from(tag::OBJECT));
                    Some(self.b.ins().bor(arr, obj))
                };
                match is_collectable {
                    Some(cond) => {
                        self.b
                            .ins()
                            .brif(cond, check, &[BlockArg::Value(counted)], done, &[]);
                    }
                    None => {
                        self.b.ins().jump(check, &[BlockArg::Value(counted)]);
                    }
                }
            } else {
                self.b.ins().jump(done, &[]);
            }
        }

        self.b.switch_to_block(check);
        let candidate = self.b.block_params(check)[0];
        let gt = self.load_u32(candidate, offsets::GC_TYPE_INFO);
        let bits = self
            .b
            .ins()
            .band_imm(gt, i64::from(gc::INFO_MASK | gc::COLLECTABLE));
        let may_leak = self
            .b
            .ins()
            .icmp_imm(IntCC::Equal, bits, i64::from(gc::COLLECTABLE));
        let root = self.b.create_block();
        self.b.ins().brif(may_leak, root, &[], done, &[]);
        self.b.set_cold_block(root);

        self.b.switch_to_block(root);
        self.helper(HelperKind::GcPossibleRoot, &[candidate]);
        self.b.ins().jump(done, &[]);
    }

    /// Drop one reference to a counted string.
    pub(super) fn release_str(&mut self, s: Value) {
        let done = self.b.create_block();
        let destroy = self.b.create_block();
        let counted = self.b.create_block();
        let gt = self.load_u32(s, offsets::GC_TYPE_INFO);
        let immutable = self.b.ins().band_imm(gt, i64::from(gc::IMMUTABLE));
        self.b.ins().brif(immutable, done, &[], counted, &[]);

        self.b.switch_to_block(counted);
        let rc = self.delref(s);
        let zero = self.b.ins().icmp_imm(IntCC::Equal, rc, 0);
        self.b.ins().brif(zero, destroy, &[], done, &[]);

        self.b.switch_to_block(destroy);
        self.destroy(s, false);
        self.b.ins().jump(done, &[]);

        self.b.switch_to_block(done);
    }

    /// Make the array in `addr` exclusively owned and return it.
    ///
    /// Shared or immutable arrays are duplicated; the zval is updated to
    /// the copy.
    pub(super) fn separate_array(&mut self, addr: ZvalAddr) -> Value {
        let merge = self.b.create_block();
        self.b.append_block_param(merge, self.ptr);
        let dup = self.b.create_block();
        let drop_ref = self.b.create_block();
        let copy = self.b.create_block();

        let arr = self.ptr_val(addr);
        let rc = self.load_u32(arr, offsets::GC_REFCOUNT);
        let shared = self.b.ins().icmp_imm(IntCC::UnsignedGreaterThan, rc, 1);
        self.b
            .ins()
            .brif(shared, dup, &[], merge, &[BlockArg::Value(arr)]);

        self.b.switch_to_block(dup);
        let gt = self.load_u32(arr, offsets::GC_TYPE_INFO);
        let immutable = self.b.ins().band_imm(gt, i64::from(gc::IMMUTABLE));
        self.b.ins().brif(immutable, copy, &[], drop_ref, &[]);

        self.b.switch_to_block(drop_ref);
        self.delref(arr);
        self.b.ins().jump(copy, &[]);

        self.b.switch_to_block(copy);
        let fresh = self.helper_ret(HelperKind::ArrayDup, &[arr]);
        self.set_ptr(addr, fresh, type_info::ARRAY);
        self.b.ins().jump(merge, &[BlockArg::Value(fresh)]);

        self.b.switch_to_block(merge);
        self.b.block_params(merge)[0]
    }
}
