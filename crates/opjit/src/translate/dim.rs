//! Array dimensions: `$c[k]` reads, writes, assignments and `isset`.
//!
//! A container dispatches on its tag in a fixed order (array, string,
//! object, then the empty kinds), each test left out when the container's
//! types already decide it. Keys are reduced to their canonical form
//! before the hash lookup:
//!
//! ```text
//!   long ─────────────────────────────► index lookup
//!   string ── numeric? ── yes ────────► index lookup
//!                      └─ no ─────────► string lookup
//!   null ─── "" ──────────────────────► string lookup
//!   bool / double ── to long ─────────► index lookup
//!   anything else ────────────────────► runtime slow path
//! ```
//!
//! Literal keys are reduced while translating.

use cranelift_codegen::ir::instructions::BlockArg;
use cranelift_codegen::ir::{Block, InstBuilder, Value, condcodes::IntCC, types};
use opjit_bytecode::{ArrayKey, Literal, OperandSlot, TypeMask, instruction, tag};

use super::Translator;
use super::driver::Flow;
use super::operand::{Fetch, Opnd};
use super::value::{MEM, ZvalAddr};
use crate::helpers::HelperKind;
use crate::layout::{fetch_kind, hash_flags, offsets, type_info};

/// Continuations of a key reduction.
#[derive(Debug, Clone, Copy)]
struct KeyBlocks {
    /// Integer key (`I64` parameter)
    long: Block,
    /// Non-numeric string key (pointer parameter)
    string: Block,
    /// Key kinds converted by the runtime
    slow: Block,
}

/// Continuations of a hash lookup.
#[derive(Debug, Clone, Copy)]
struct Lookup {
    /// Element address (pointer parameter)
    found: Block,
    /// Missing integer key (`I64` parameter)
    miss_long: Block,
    /// Missing string key (pointer parameter)
    miss_str: Block,
    /// Key kinds converted by the runtime
    slow: Block,
}

impl Translator<'_, '_> {
    fn key_blocks(&mut self) -> KeyBlocks {
        let long = self.b.create_block();
        self.b.append_block_param(long, types::I64);
        let string = self.b.create_block();
        self.b.append_block_param(string, self.ptr);
        let slow = self.cold_block();
        KeyBlocks { long, string, slow }
    }

    /// Branch to the continuation of `dim`'s canonical key.
    fn reduce_key(&mut self, dim: &Opnd, k: KeyBlocks) {
        if let ZvalAddr::Lit(index) = dim.addr {
            let lit = self.op_array.literal(index);
            let is_null = matches!(lit, Literal::Null);
            let key = lit.array_key().map(|key| match key {
                ArrayKey::Long(h) => Some(h),
                ArrayKey::Str(_) => None,
            });
            match key {
                Some(Some(h)) => {
                    let h = self.b.ins().iconst(types::I64, h);
                    self.b.ins().jump(k.long, &[BlockArg::Value(h)]);
                }
                Some(None) => {
                    let s = if is_null {
                        self.iconst_ptr(self.rt.empty_string)
                    } else {
                        self.ptr_val(dim.addr)
                    };
                    self.b.ins().jump(k.string, &[BlockArg::Value(s)]);
                }
                None => {
                    self.b.ins().jump(k.slow, &[]);
                }
            }
            return;
        }

        let info = dim.info;
        let long = info.may_be(tag::LONG).then(|| self.b.create_block());
        let string = info.may_be(tag::STRING).then(|| self.b.create_block());
        let null = info.may_be(tag::NULL).then(|| self.b.create_block());
        let boolean = info.intersects(TypeMask::BOOL).then(|| self.b.create_block());
        let double = info.may_be(tag::DOUBLE).then(|| self.b.create_block());
        let mut arms = Vec::with_capacity(6);
        arms.extend(long.map(|b| (tag::LONG, b)));
        arms.extend(string.map(|b| (tag::STRING, b)));
        arms.extend(null.map(|b| (tag::NULL, b)));
        arms.extend(boolean.map(|b| (tag::FALSE, b)));
        arms.extend(boolean.map(|b| (tag::TRUE, b)));
        arms.extend(double.map(|b| (tag::DOUBLE, b)));
        let ty = self.load_type(dim.addr, info);
        self.switch_tag(ty, info, &arms, Some(k.slow));

        if let Some(block) = long {
            self.b.switch_to_block(block);
            let h = self.lval(dim.addr);
            self.b.ins().jump(k.long, &[BlockArg::Value(h)]);
        }
        if let Some(block) = string {
            self.b.switch_to_block(block);
            let s = self.ptr_val(dim.addr);
            let out = self.scratch_zval();
            let out_ptr = self.zval_ptr(out);
            let numeric = self.helper_ret(HelperKind::HandleNumericStr, &[s, out_ptr]);
            let numeric_block = self.b.create_block();
            let is_numeric = self.b.ins().icmp_imm(IntCC::NotEqual, numeric, 0);
            self.b
                .ins()
                .brif(is_numeric, numeric_block, &[], k.string, &[BlockArg::Value(s)]);
            self.b.switch_to_block(numeric_block);
            let h = self.b.ins().load(types::I64, MEM, out_ptr, 0);
            self.b.ins().jump(k.long, &[BlockArg::Value(h)]);
        }
        if let Some(block) = null {
            self.b.switch_to_block(block);
            let s = self.iconst_ptr(self.rt.empty_string);
            self.b.ins().jump(k.string, &[BlockArg::Value(s)]);
        }
        if let Some(block) = boolean {
            self.b.switch_to_block(block);
            let bit = self.b.ins().iadd_imm(ty, -i64::from(tag::FALSE));
            let h = self.b.ins().uextend(types::I64, bit);
            self.b.ins().jump(k.long, &[BlockArg::Value(h)]);
        }
        if let Some(block) = double {
            self.b.switch_to_block(block);
            let d = self.dval(dim.addr);
            let h = self.helper_ret(HelperKind::DvalToLval, &[d]);
            self.b.ins().jump(k.long, &[BlockArg::Value(h)]);
        }
    }

    /// Integer key `h` of `arr`. Packed arrays are indexed inline.
    fn find_index(&mut self, arr: Value, h: Value, found: Block, missing: Block) {
        let flags = self.load_u32(arr, offsets::ARR_FLAGS);
        let packed = self.b.ins().band_imm(flags, i64::from(hash_flags::PACKED));
        let direct = self.b.create_block();
        let hashed = self.b.create_block();
        self.b.ins().brif(packed, direct, &[], hashed, &[]);

        self.b.switch_to_block(direct);
        let used = self.load_u32(arr, offsets::ARR_USED);
        let used = self.b.ins().uextend(types::I64, used);
        // negative keys compare above `used`
        let inside = self.b.ins().icmp(IntCC::UnsignedLessThan, h, used);
        let in_range = self.b.create_block();
        self.b
            .ins()
            .brif(inside, in_range, &[], missing, &[BlockArg::Value(h)]);
        self.b.switch_to_block(in_range);
        let data = self.load_ptr(arr, offsets::ARR_DATA);
        let scaled = self.b.ins().imul_imm(h, i64::from(offsets::BUCKET_SIZE));
        let bucket = self.b.ins().iadd(data, scaled);
        let ty = self
            .b
            .ins()
            .load(types::I8, MEM, bucket, offsets::ZVAL_TYPE_INFO);
        let hole = self.b.ins().icmp_imm(IntCC::Equal, ty, i64::from(tag::UNDEF));
        self.b.ins().brif(
            hole,
            missing,
            &[BlockArg::Value(h)],
            found,
            &[BlockArg::Value(bucket)],
        );

        self.b.switch_to_block(hashed);
        let p = self.helper_ret(HelperKind::HashIndexFind, &[arr, h]);
        let none = self.b.ins().icmp_imm(IntCC::Equal, p, 0);
        self.b.ins().brif(
            none,
            missing,
            &[BlockArg::Value(h)],
            found,
            &[BlockArg::Value(p)],
        );
    }

    /// Look `dim` up in `arr`; the caller fills every continuation.
    fn lookup(&mut self, arr: Value, dim: &Opnd) -> Lookup {
        let keys = self.key_blocks();
        self.reduce_key(dim, keys);

        let found = self.b.create_block();
        self.b.append_block_param(found, self.ptr);
        let miss_long = self.b.create_block();
        self.b.append_block_param(miss_long, types::I64);
        let miss_str = self.b.create_block();
        self.b.append_block_param(miss_str, self.ptr);

        self.b.switch_to_block(keys.long);
        let h = self.b.block_params(keys.long)[0];
        self.find_index(arr, h, found, miss_long);

        self.b.switch_to_block(keys.string);
        let s = self.b.block_params(keys.string)[0];
        let p = self.helper_ret(HelperKind::HashFind, &[arr, s]);
        let none = self.b.ins().icmp_imm(IntCC::Equal, p, 0);
        self.b.ins().brif(
            none,
            miss_str,
            &[BlockArg::Value(s)],
            found,
            &[BlockArg::Value(p)],
        );

        Lookup {
            found,
            miss_long,
            miss_str,
            slow: keys.slow,
        }
    }

    /// Pointer to the runtime's shared `null`, fully initialized so the
    /// inserted element carries no stale second word.
    fn null_zval(&mut self) -> Value {
        self.iconst_ptr(self.rt.uninitialized_zval)
    }

    /// Pointer to the key operand, null for `$c[]`.
    fn dim_ptr(&mut self, dim: &Opnd) -> Value {
        if dim.is_unused() {
            return self.iconst_ptr(0);
        }
        let mem = self.spill(dim.addr, dim.info);
        self.zval_ptr(mem)
    }

    /// Dispatch a container that is written through.
    ///
    /// Arrays continue at the returned block (empty containers are turned
    /// into arrays first, `false` with a deprecation); non-empty strings go
    /// to `string`, objects to `object`, anything else to `other`.
    fn write_dispatch(&mut self, c: &Opnd, string: Block, object: Block, other: Block) -> Block {
        let array = self.b.create_block();
        let info = c.info;
        let empty = TypeMask::UNDEF | TypeMask::NULL | TypeMask::FALSE;
        let vivify = info.intersects(empty).then(|| self.cold_block());
        let maybe_string = info.may_be(tag::STRING).then(|| self.b.create_block());
        let mut arms = vec![(tag::ARRAY, array)];
        arms.extend(vivify.map(|b| (tag::UNDEF, b)));
        arms.extend(vivify.map(|b| (tag::NULL, b)));
        arms.extend(vivify.map(|b| (tag::FALSE, b)));
        arms.extend(maybe_string.map(|b| (tag::STRING, b)));
        arms.push((tag::OBJECT, object));
        let ty = self.load_type(c.addr, info);
        self.switch_tag(ty, info, &arms, Some(other));

        if let Some(block) = vivify {
            self.b.switch_to_block(block);
            let p = self.zval_ptr(c.addr);
            if info.may_be(tag::FALSE) {
                let warn = self.b.create_block();
                let init = self.b.create_block();
                let is_false = self.b.ins().icmp_imm(IntCC::Equal, ty, i64::from(tag::FALSE));
                self.b.ins().brif(is_false, warn, &[], init, &[]);
                self.b.switch_to_block(warn);
                self.helper(HelperKind::AutovivifyNotice, &[p]);
                self.b.ins().jump(init, &[]);
                self.b.switch_to_block(init);
            }
            self.helper(HelperKind::ArrayInit, &[p]);
            self.b.ins().jump(array, &[]);
        }
        if let Some(block) = maybe_string {
            self.b.switch_to_block(block);
            let s = self.ptr_val(c.addr);
            let len = self.str_len(s);
            let is_empty = self.b.ins().icmp_imm(IntCC::Equal, len, 0);
            let convert = self.b.create_block();
            self.b.ins().brif(is_empty, convert, &[], string, &[]);
            self.b.switch_to_block(convert);
            self.release_str(s);
            let p = self.zval_ptr(c.addr);
            self.helper(HelperKind::ArrayInit, &[p]);
            self.b.ins().jump(array, &[]);
        }
        array
    }

    /// Address of the element `dim` of the separated array `arr`, added
    /// as `null` when missing. Odd keys jump to `slow`.
    fn element_for_write(&mut self, arr: Value, dim: &Opnd, kind: i32, slow: Block) -> Value {
        let merge = self.b.create_block();
        self.b.append_block_param(merge, self.ptr);

        if dim.is_unused() {
            let null = self.null_zval();
            let p = self.helper_ret(HelperKind::HashNextIndexInsert, &[arr, null]);
            // null: the next index is taken and the helper threw
            self.check_exception();
            self.b.ins().jump(merge, &[BlockArg::Value(p)]);
            self.b.switch_to_block(merge);
            return self.b.block_params(merge)[0];
        }

        let l = self.lookup(arr, dim);
        self.b.switch_to_block(l.found);
        let p = self.b.block_params(l.found)[0];
        self.b.ins().jump(merge, &[BlockArg::Value(p)]);

        self.b.switch_to_block(l.miss_long);
        let h = self.b.block_params(l.miss_long)[0];
        if kind == fetch_kind::UNSET {
            let p = self.iconst_ptr(self.rt.uninitialized_zval);
            self.b.ins().jump(merge, &[BlockArg::Value(p)]);
        } else {
            if kind == fetch_kind::RW {
                self.helper(HelperKind::UndefinedOffset, &[h]);
            }
            let null = self.null_zval();
            let p = self.helper_ret(HelperKind::HashIndexAddNew, &[arr, h, null]);
            self.b.ins().jump(merge, &[BlockArg::Value(p)]);
        }

        self.b.switch_to_block(l.miss_str);
        let s = self.b.block_params(l.miss_str)[0];
        if kind == fetch_kind::UNSET {
            let p = self.iconst_ptr(self.rt.uninitialized_zval);
            self.b.ins().jump(merge, &[BlockArg::Value(p)]);
        } else {
            if kind == fetch_kind::RW {
                self.helper(HelperKind::UndefinedIndex, &[s]);
            }
            let null = self.null_zval();
            let p = self.helper_ret(HelperKind::HashAddNew, &[arr, s, null]);
            self.b.ins().jump(merge, &[BlockArg::Value(p)]);
        }

        self.b.switch_to_block(l.slow);
        self.b.ins().jump(slow, &[]);

        self.b.switch_to_block(merge);
        self.b.block_params(merge)[0]
    }

    /// Character `offset` of string `s` as a one-character string.
    fn string_offset_read(&mut self, s: Value, offset: Value, quiet: bool, out: ZvalAddr) {
        let done = self.b.create_block();
        let len = self.str_len(s);
        let negative = self.b.ins().icmp_imm(IntCC::SignedLessThan, offset, 0);
        let from_end = self.b.ins().iadd(offset, len);
        let index = self.b.ins().select(negative, from_end, offset);
        let inside = self.b.ins().icmp(IntCC::UnsignedLessThan, index, len);
        let hit = self.b.create_block();
        let outside = self.cold_block();
        self.b.ins().brif(inside, hit, &[], outside, &[]);

        self.b.switch_to_block(hit);
        let at = self.b.ins().iadd(s, index);
        let byte = self.b.ins().uload8(types::I32, MEM, at, offsets::STR_VAL);
        let ch = self.helper_ret(HelperKind::StrChar, &[byte]);
        self.set_ptr(out, ch, type_info::INTERNED_STRING);
        self.b.ins().jump(done, &[]);

        self.b.switch_to_block(outside);
        if quiet {
            self.set_null(out);
        } else {
            self.helper(HelperKind::StringOffsetNotice, &[offset]);
            let empty = self.iconst_ptr(self.rt.empty_string);
            self.set_ptr(out, empty, type_info::INTERNED_STRING);
        }
        self.b.ins().jump(done, &[]);

        self.b.switch_to_block(done);
    }

    fn dim_read_slow(&mut self, quiet: bool, c: &Opnd, dim: &Opnd, out: ZvalAddr) {
        let res_ptr = self.zval_ptr(out);
        let c_mem = self.spill(c.addr, c.info);
        let c_ptr = self.zval_ptr(c_mem);
        let dim_ptr = self.dim_ptr(dim);
        let kind = if quiet {
            HelperKind::FetchDimIsSlow
        } else {
            HelperKind::FetchDimRSlow
        };
        self.helper_checked(kind, &[res_ptr, c_ptr, dim_ptr]);
    }

    // ---- instructions ----

    /// `FETCH_DIM_R`, `FETCH_DIM_IS`
    pub(super) fn fetch_dim_read(&mut self, quiet: bool) {
        let raw = self.use_op(OperandSlot::Op1);
        let fetched = self.fetch_cv(raw, if quiet { Fetch::Is } else { Fetch::R });
        let c = self.deref(fetched);
        let (raw_dim, dim) = self.read_op(OperandSlot::Op2);
        let res = self.def_op(OperandSlot::Result);
        let out = if res.addr.is_reg() {
            self.scratch_zval()
        } else {
            res.addr
        };
        let merge = self.b.create_block();

        let info = c.info;
        let array = info.may_be(tag::ARRAY).then(|| self.b.create_block());
        let string = info.may_be(tag::STRING).then(|| self.b.create_block());
        let object = info.may_be(tag::OBJECT).then(|| self.b.create_block());
        let handled = TypeMask::ARRAY | TypeMask::STRING | TypeMask::OBJECT;
        let other = (!info.tags().is_subset_of(handled)).then(|| self.cold_block());
        let mut arms = Vec::with_capacity(3);
        arms.extend(array.map(|b| (tag::ARRAY, b)));
        arms.extend(string.map(|b| (tag::STRING, b)));
        arms.extend(object.map(|b| (tag::OBJECT, b)));
        let ty = self.load_type(c.addr, info);
        self.switch_tag(ty, info, &arms, other);

        if let Some(block) = array {
            self.b.switch_to_block(block);
            let arr = self.ptr_val(c.addr);
            let l = self.lookup(arr, &dim);

            self.b.switch_to_block(l.found);
            let p = self.b.block_params(l.found)[0];
            let elem = raw.with(ZvalAddr::at(p), TypeMask::ANY | TypeMask::REF);
            let elem = self.deref(elem);
            self.copy_value(out, elem.addr, elem.info);
            self.try_addref(out, elem.info);
            self.b.ins().jump(merge, &[]);

            self.b.switch_to_block(l.miss_long);
            if !quiet {
                let h = self.b.block_params(l.miss_long)[0];
                self.helper(HelperKind::UndefinedOffset, &[h]);
            }
            self.set_null(out);
            self.b.ins().jump(merge, &[]);

            self.b.switch_to_block(l.miss_str);
            if !quiet {
                let s = self.b.block_params(l.miss_str)[0];
                self.helper(HelperKind::UndefinedIndex, &[s]);
            }
            self.set_null(out);
            self.b.ins().jump(merge, &[]);

            self.b.switch_to_block(l.slow);
            self.dim_read_slow(quiet, &c, &dim, out);
            self.b.ins().jump(merge, &[]);
        }

        if let Some(block) = string {
            self.b.switch_to_block(block);
            if dim.info.is_only(tag::LONG) {
                let s = self.ptr_val(c.addr);
                let offset = self.lval(dim.addr);
                self.string_offset_read(s, offset, quiet, out);
            } else {
                self.dim_read_slow(quiet, &c, &dim, out);
            }
            self.b.ins().jump(merge, &[]);
        }

        if let Some(block) = object {
            self.b.switch_to_block(block);
            self.store_opline();
            let obj = self.ptr_val(c.addr);
            let dim_ptr = self.dim_ptr(&dim);
            let out_ptr = self.zval_ptr(out);
            let handlers = self.handlers_of(&c);
            let kind = if quiet { fetch_kind::IS } else { fetch_kind::R };
            let ret = handlers.read_dimension(self, obj, dim_ptr, kind, out_ptr);
            let got = self.b.create_block();
            let none = self.b.create_block();
            let after = self.b.create_block();
            let is_none = self.b.ins().icmp_imm(IntCC::Equal, ret, 0);
            self.b.ins().brif(is_none, none, &[], got, &[]);
            self.b.switch_to_block(got);
            self.take_handler_result(ret, out_ptr);
            self.b.ins().jump(after, &[]);
            self.b.switch_to_block(none);
            self.set_null(out);
            self.b.ins().jump(after, &[]);
            self.b.switch_to_block(after);
            self.check_exception();
            self.b.ins().jump(merge, &[]);
        }

        if let Some(block) = other {
            self.b.switch_to_block(block);
            if !quiet {
                let c_mem = self.spill(c.addr, info);
                let c_ptr = self.zval_ptr(c_mem);
                self.helper(HelperKind::InvalidContainerRead, &[c_ptr]);
            }
            self.set_null(out);
            self.b.ins().jump(merge, &[]);
        }

        self.b.switch_to_block(merge);
        if res.addr.is_reg() {
            self.copy_value(res.addr, out, res.info);
        }
        self.free_op(raw_dim);
        self.free_op(raw);
    }

    /// `FETCH_DIM_W`, `FETCH_DIM_RW`, `FETCH_DIM_UNSET`: the result is an
    /// `INDIRECT` pointer to the element.
    pub(super) fn fetch_dim_write(&mut self, kind: i32) {
        let mode = if kind == fetch_kind::RW {
            Fetch::Rw
        } else {
            Fetch::W
        };
        let (raw, c, free) = self.write_target(mode);
        let raw_dim = self.use_op(OperandSlot::Op2);
        let dim = if raw_dim.is_unused() {
            raw_dim
        } else {
            let fetched = self.fetch_cv(raw_dim, Fetch::R);
            self.deref(fetched)
        };
        let res = self.def_op(OperandSlot::Result);
        let done = self.b.create_block();
        let slow = self.cold_block();

        let array = self.write_dispatch(&c, slow, slow, slow);
        self.b.switch_to_block(array);
        let arr = self.separate_array(c.addr);
        let elem = self.element_for_write(arr, &dim, kind, slow);
        self.set_ptr(res.addr, elem, type_info::INDIRECT);
        self.b.ins().jump(done, &[]);

        self.b.switch_to_block(slow);
        let res_ptr = self.zval_ptr(res.addr);
        let c_ptr = self.zval_ptr(c.addr);
        let dim_ptr = self.dim_ptr(&dim);
        let kind = self.b.ins().iconst(types::I32, i64::from(kind));
        self.helper_checked(HelperKind::FetchDimWSlow, &[res_ptr, c_ptr, dim_ptr, kind]);
        self.b.ins().jump(done, &[]);

        self.b.switch_to_block(done);
        self.free_op(raw_dim);
        self.free_var_target(raw, free);
    }

    /// `ASSIGN_DIM` (+ `OP_DATA`)
    pub(super) fn assign_dim(&mut self) {
        let (raw, c, free) = self.write_target(Fetch::W);
        let raw_dim = self.use_op(OperandSlot::Op2);
        let dim = if raw_dim.is_unused() {
            raw_dim
        } else {
            let fetched = self.fetch_cv(raw_dim, Fetch::R);
            self.deref(fetched)
        };
        let raw_value = self.opnd_at(self.pc + 1, OperandSlot::Op1, false);
        let value = self.fetch_cv(raw_value, Fetch::R);
        let value = self.deref(value);
        let res = self.def_op(OperandSlot::Result);
        let res = (!res.is_unused()).then_some(res);

        // `stored` receives the address the result is copied from
        let stored = self.b.create_block();
        self.b.append_block_param(stored, self.ptr);
        let done = self.b.create_block();
        let string = self.cold_block();
        let object = self.b.create_block();
        let other = self.cold_block();
        let slow = self.cold_block();

        let array = self.write_dispatch(&c, string, object, other);
        self.b.switch_to_block(array);
        let arr = self.separate_array(c.addr);
        let elem = self.element_for_write(arr, &dim, fetch_kind::W, slow);
        let target = raw.with(
            ZvalAddr::at(elem),
            TypeMask::ANY | TypeMask::REF | TypeMask::UNDEF,
        );
        let target = self.deref(target);
        self.assign_copy(&target, &value);
        let elem_ptr = self.zval_ptr(target.addr);
        self.b.ins().jump(stored, &[BlockArg::Value(elem_ptr)]);

        self.b.switch_to_block(object);
        self.store_opline();
        let obj = self.ptr_val(c.addr);
        let dim_ptr = self.dim_ptr(&dim);
        let value_mem = self.spill(value.addr, value.info);
        let value_ptr = self.zval_ptr(value_mem);
        let handlers = self.handlers_of(&c);
        handlers.write_dimension(self, obj, dim_ptr, value_ptr);
        self.check_exception();
        self.b.ins().jump(stored, &[BlockArg::Value(value_ptr)]);

        self.b.switch_to_block(string);
        let c_ptr = self.zval_ptr(c.addr);
        let dim_ptr = self.dim_ptr(&dim);
        let value_mem = self.spill(value.addr, value.info);
        let value_ptr = self.zval_ptr(value_mem);
        let res_ptr = match res {
            Some(res) => self.zval_ptr(res.addr),
            None => self.iconst_ptr(0),
        };
        self.helper_checked(
            HelperKind::AssignToStringOffset,
            &[c_ptr, dim_ptr, value_ptr, res_ptr],
        );
        self.b.ins().jump(done, &[]);

        self.b.switch_to_block(slow);
        let c_ptr = self.zval_ptr(c.addr);
        let dim_ptr = self.dim_ptr(&dim);
        let value_mem = self.spill(value.addr, value.info);
        let value_ptr = self.zval_ptr(value_mem);
        let res_ptr = match res {
            Some(res) => self.zval_ptr(res.addr),
            None => self.iconst_ptr(0),
        };
        self.helper_checked(
            HelperKind::AssignDimSlow,
            &[c_ptr, dim_ptr, value_ptr, res_ptr],
        );
        self.b.ins().jump(done, &[]);

        self.b.switch_to_block(other);
        self.helper(HelperKind::ScalarAsArray, &[]);
        if let Some(res) = res {
            self.set_null(res.addr);
        }
        self.b.ins().jump(done, &[]);

        self.b.switch_to_block(stored);
        let p = self.b.block_params(stored)[0];
        if let Some(res) = res {
            let src = raw_value.with(ZvalAddr::at(p), value.info | TypeMask::REF);
            let src = self.deref(src);
            self.copy_value(res.addr, src.addr, src.info);
            self.try_addref(res.addr, src.info);
        }
        self.b.ins().jump(done, &[]);

        self.b.switch_to_block(done);
        self.free_op(raw_value);
        self.free_op(raw_dim);
        self.free_var_target(raw, free);
    }

    /// `ISSET_ISEMPTY_DIM_OBJ`
    pub(super) fn isset_isempty_dim(&mut self) -> Flow {
        let raw = self.use_op(OperandSlot::Op1);
        let fetched = self.fetch_cv(raw, Fetch::Is);
        let c = self.deref(fetched);
        let (raw_dim, dim) = self.read_op(OperandSlot::Op2);
        let res = self.def_op(OperandSlot::Result);
        let check_empty = self.insn().extended_value & instruction::ISEMPTY != 0;

        let merge = self.b.create_block();
        self.b.append_block_param(merge, types::I8);
        let info = c.info;
        let array = info.may_be(tag::ARRAY).then(|| self.b.create_block());
        let object = info.may_be(tag::OBJECT).then(|| self.b.create_block());
        let slow = self.cold_block();
        let absent = self.b.create_block();
        let mut arms = Vec::with_capacity(3);
        arms.extend(array.map(|b| (tag::ARRAY, b)));
        arms.extend(object.map(|b| (tag::OBJECT, b)));
        arms.push((tag::STRING, slow));
        let ty = self.load_type(c.addr, info);
        self.switch_tag(ty, info, &arms, Some(absent));

        if let Some(block) = array {
            self.b.switch_to_block(block);
            let arr = self.ptr_val(c.addr);
            let l = self.lookup(arr, &dim);

            self.b.switch_to_block(l.found);
            let p = self.b.block_params(l.found)[0];
            let elem = raw.with(ZvalAddr::at(p), TypeMask::ANY | TypeMask::REF);
            let elem = self.deref(elem);
            let r = if check_empty {
                let truthy = self.emit_is_true(&elem);
                self.b.ins().bxor_imm(truthy, 1)
            } else {
                let t = self.load_type(elem.addr, elem.info);
                self.b
                    .ins()
                    .icmp_imm(IntCC::UnsignedGreaterThan, t, i64::from(tag::NULL))
            };
            self.b.ins().jump(merge, &[BlockArg::Value(r)]);

            self.b.switch_to_block(l.miss_long);
            self.b.ins().jump(absent, &[]);
            self.b.switch_to_block(l.miss_str);
            self.b.ins().jump(absent, &[]);
            self.b.switch_to_block(l.slow);
            self.b.ins().jump(slow, &[]);
        }

        if let Some(block) = object {
            self.b.switch_to_block(block);
            self.store_opline();
            let obj = self.ptr_val(c.addr);
            let dim_ptr = self.dim_ptr(&dim);
            let handlers = self.handlers_of(&c);
            let found = handlers.has_dimension(self, obj, dim_ptr, check_empty);
            self.check_exception();
            let cc = if check_empty {
                IntCC::Equal
            } else {
                IntCC::NotEqual
            };
            let r = self.b.ins().icmp_imm(cc, found, 0);
            self.b.ins().jump(merge, &[BlockArg::Value(r)]);
        }

        self.b.switch_to_block(slow);
        let c_mem = self.spill(c.addr, info);
        let c_ptr = self.zval_ptr(c_mem);
        let dim_ptr = self.dim_ptr(&dim);
        let flag = self.b.ins().iconst(types::I32, i64::from(check_empty));
        let answer = self.helper_ret(HelperKind::IssetDimSlow, &[c_ptr, dim_ptr, flag]);
        self.check_exception();
        let r = self.b.ins().icmp_imm(IntCC::NotEqual, answer, 0);
        self.b.ins().jump(merge, &[BlockArg::Value(r)]);

        self.b.switch_to_block(absent);
        let r = self.b.ins().iconst(types::I8, i64::from(check_empty));
        self.b.ins().jump(merge, &[BlockArg::Value(r)]);

        self.b.switch_to_block(merge);
        let cond = self.b.block_params(merge)[0];
        self.free_op(raw_dim);
        self.free_op(raw);
        self.finish_condition(&res, cond)
    }
}
