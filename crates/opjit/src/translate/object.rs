//! Object handlers and property access.
//!
//! Object operations that the inline paths cannot finish go through the
//! object's handler table. Where the handler table is proven to be the
//! host's standard one, the entry is read while translating and embedded
//! as a constant; otherwise it is loaded from `obj->handlers` at run time.

use cranelift_codegen::ir::instructions::BlockArg;
use cranelift_codegen::ir::{AbiParam, InstBuilder, Signature, Type, Value, condcodes::IntCC, types};
use cranelift_codegen::isa::CallConv;
use opjit_bytecode::{OperandSlot, TypeMask, instruction, tag};

use super::Translator;
use super::bridge::SigKey;
use super::operand::{Fetch, Opnd};
use super::value::ZvalAddr;
use crate::helpers::HelperKind;
use crate::layout::{ObjectHandlers, fetch_kind, offsets};

/// Entry of an object handler table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerSlot {
    /// `read_property(object, member, kind, cache_slot, rv) -> zval*`
    ReadProperty,
    /// `write_property(object, member, value, cache_slot) -> zval*`
    WriteProperty,
    /// `read_dimension(object, offset, kind, rv) -> zval*`
    ReadDimension,
    /// `write_dimension(object, offset, value)`
    WriteDimension,
    /// `has_property(object, member, check_empty, cache_slot) -> bool`
    HasProperty,
    /// `has_dimension(object, offset, check_empty) -> bool`
    HasDimension,
    /// `get(object, rv) -> zval*`
    Get,
    /// `set(object, value)`
    Set,
}

impl HandlerSlot {
    /// Byte offset in [`ObjectHandlers`].
    pub const fn offset(self) -> i32 {
        match self {
            Self::ReadProperty => offsets::HND_READ_PROPERTY,
            Self::WriteProperty => offsets::HND_WRITE_PROPERTY,
            Self::ReadDimension => offsets::HND_READ_DIMENSION,
            Self::WriteDimension => offsets::HND_WRITE_DIMENSION,
            Self::HasProperty => offsets::HND_HAS_PROPERTY,
            Self::HasDimension => offsets::HND_HAS_DIMENSION,
            Self::Get => offsets::HND_GET,
            Self::Set => offsets::HND_SET,
        }
    }

    /// Cranelift signature of the handler.
    pub fn signature(self, ptr: Type, call_conv: CallConv) -> Signature {
        let mut sig = Signature::new(call_conv);
        let p = AbiParam::new(ptr);
        let i = AbiParam::new(types::I32);
        let (params, ret): (&[AbiParam], Option<AbiParam>) = match self {
            Self::ReadProperty => (&[p, p, i, p, p], Some(p)),
            Self::WriteProperty => (&[p, p, p, p], Some(p)),
            Self::ReadDimension => (&[p, p, i, p], Some(p)),
            Self::WriteDimension => (&[p, p, p], None),
            Self::HasProperty => (&[p, p, i, p], Some(i)),
            Self::HasDimension => (&[p, p, i], Some(i)),
            Self::Get => (&[p, p], Some(p)),
            Self::Set => (&[p, p], None),
        };
        sig.params.extend_from_slice(params);
        sig.returns.extend(ret);
        sig
    }
}

/// Locates the handler functions of an object.
pub(super) trait ContainerHandlers {
    /// Address of entry `slot` for `obj` (zero when an optional entry is
    /// absent).
    fn target(&self, t: &mut Translator<'_, '_>, obj: Value, slot: HandlerSlot) -> Value;

    /// Whether the optional proxy entries can be present.
    fn may_proxy(&self) -> bool {
        true
    }

    fn read_dimension(
        &self,
        t: &mut Translator<'_, '_>,
        obj: Value,
        offset: Value,
        kind: i32,
        rv: Value,
    ) -> Value {
        let f = self.target(t, obj, HandlerSlot::ReadDimension);
        let kind = t.b.ins().iconst(types::I32, i64::from(kind));
        t.call_value(SigKey::Object(HandlerSlot::ReadDimension), f, &[obj, offset, kind, rv])[0]
    }

    fn write_dimension(&self, t: &mut Translator<'_, '_>, obj: Value, offset: Value, value: Value) {
        let f = self.target(t, obj, HandlerSlot::WriteDimension);
        t.call_value(SigKey::Object(HandlerSlot::WriteDimension), f, &[obj, offset, value]);
    }

    fn has_dimension(
        &self,
        t: &mut Translator<'_, '_>,
        obj: Value,
        offset: Value,
        check_empty: bool,
    ) -> Value {
        let f = self.target(t, obj, HandlerSlot::HasDimension);
        let check = t.b.ins().iconst(types::I32, i64::from(check_empty));
        t.call_value(SigKey::Object(HandlerSlot::HasDimension), f, &[obj, offset, check])[0]
    }

    fn read_property(
        &self,
        t: &mut Translator<'_, '_>,
        obj: Value,
        member: Value,
        kind: i32,
        cache_slot: Value,
        rv: Value,
    ) -> Value {
        let f = self.target(t, obj, HandlerSlot::ReadProperty);
        let kind = t.b.ins().iconst(types::I32, i64::from(kind));
        t.call_value(
            SigKey::Object(HandlerSlot::ReadProperty),
            f,
            &[obj, member, kind, cache_slot, rv],
        )[0]
    }

    fn write_property(
        &self,
        t: &mut Translator<'_, '_>,
        obj: Value,
        member: Value,
        value: Value,
        cache_slot: Value,
    ) -> Value {
        let f = self.target(t, obj, HandlerSlot::WriteProperty);
        t.call_value(
            SigKey::Object(HandlerSlot::WriteProperty),
            f,
            &[obj, member, value, cache_slot],
        )[0]
    }

    fn has_property(
        &self,
        t: &mut Translator<'_, '_>,
        obj: Value,
        member: Value,
        check_empty: bool,
        cache_slot: Value,
    ) -> Value {
        let f = self.target(t, obj, HandlerSlot::HasProperty);
        let check = t.b.ins().iconst(types::I32, i64::from(check_empty));
        t.call_value(
            SigKey::Object(HandlerSlot::HasProperty),
            f,
            &[obj, member, check, cache_slot],
        )[0]
    }
}

/// The host's standard handler table, read at translation time.
#[derive(Debug, Clone, Copy)]
pub(super) struct StandardHandlers {
    table: usize,
}

impl StandardHandlers {
    pub(super) fn new(table: usize) -> Self {
        Self { table }
    }

    fn entry(&self, slot: HandlerSlot) -> usize {
        // SAFETY: `table` is the runtime's `std_object_handlers`, a live
        // `ObjectHandlers` for as long as the runtime context is.
        let table = unsafe { &*(self.table as *const ObjectHandlers) };
        match slot {
            HandlerSlot::ReadProperty => table.read_property as usize,
            HandlerSlot::WriteProperty => table.write_property as usize,
            HandlerSlot::ReadDimension => table.read_dimension as usize,
            HandlerSlot::WriteDimension => table.write_dimension as usize,
            HandlerSlot::HasProperty => table.has_property as usize,
            HandlerSlot::HasDimension => table.has_dimension as usize,
            HandlerSlot::Get => table.get.map_or(0, |f| f as usize),
            HandlerSlot::Set => table.set.map_or(0, |f| f as usize),
        }
    }
}

impl ContainerHandlers for StandardHandlers {
    fn target(&self, t: &mut Translator<'_, '_>, _obj: Value, slot: HandlerSlot) -> Value {
        let addr = self.entry(slot);
        t.iconst_ptr(addr)
    }

    fn may_proxy(&self) -> bool {
        self.entry(HandlerSlot::Get) != 0 && self.entry(HandlerSlot::Set) != 0
    }
}

/// Handler table loaded from the object at run time.
#[derive(Debug, Clone, Copy, Default)]
pub(super) struct DynamicHandlers;

impl ContainerHandlers for DynamicHandlers {
    fn target(&self, t: &mut Translator<'_, '_>, obj: Value, slot: HandlerSlot) -> Value {
        let table = t.load_ptr(obj, offsets::OBJ_HANDLERS);
        t.load_ptr(table, slot.offset())
    }
}

impl Translator<'_, '_> {
    /// Handler access for the object in `o`.
    pub(super) fn handlers_of(&self, o: &Opnd) -> Box<dyn ContainerHandlers> {
        let standard = o
            .ssa
            .and_then(|v| self.facts.var(v).class)
            .is_some_and(|c| c.standard_handlers);
        match (standard, self.rt.std_object_handlers) {
            (true, Some(table)) => Box::new(StandardHandlers::new(table)),
            _ => Box::new(DynamicHandlers),
        }
    }

    pub(super) fn run_time_cache(&mut self) -> Value {
        let ex = self.ex;
        self.load_ptr(ex, offsets::EX_RUN_TIME_CACHE)
    }

    /// Pointer to the cache slot of a literal member name, null otherwise.
    pub(super) fn cache_slot_ptr(&mut self, member: &Opnd) -> Value {
        if !member.is_const() {
            return self.iconst_ptr(0);
        }
        let rtc = self.run_time_cache();
        let ext = self.insn().extended_value;
        self.gep(rtc, ext as i32)
    }

    /// `$this` of the current frame, checked to be an object unless a
    /// dominating check already ran.
    pub(super) fn this_operand(&mut self, raw: Opnd) -> Opnd {
        let this = raw.with(
            ZvalAddr::Mem {
                base: self.ex,
                offset: offsets::EX_THIS,
            },
            TypeMask::OBJECT,
        );
        let block = self.block;
        let proven = (0..self.this_checked.len())
            .any(|b| self.this_checked[b] && self.facts.dominates(b as u32, block));
        if !proven {
            let ty = self.load_type(this.addr, TypeMask::ANY);
            let missing = self
                .b
                .ins()
                .icmp_imm(IntCC::NotEqual, ty, i64::from(tag::OBJECT));
            let fail = self.cold_block();
            let ok = self.b.create_block();
            self.b.ins().brif(missing, fail, &[], ok, &[]);
            self.b.switch_to_block(fail);
            self.helper(HelperKind::InvalidThis, &[]);
            let target = self.exception_target();
            self.b.ins().jump(target, &[]);
            self.b.switch_to_block(ok);
            self.this_checked[block as usize] = true;
        }
        this
    }

    /// Container of a property access: `$this` for an unused op1.
    fn obj_container(&mut self, mode: Fetch) -> (Opnd, Opnd) {
        let raw = self.use_op(OperandSlot::Op1);
        if raw.is_unused() {
            let this = self.this_operand(raw);
            return (raw, this);
        }
        let fetched = self.fetch_cv(raw, mode);
        let value = self.deref(fetched);
        (raw, value)
    }

    /// Branch to `object` when `c` holds an object, else to `other`.
    fn branch_object(
        &mut self,
        c: &Opnd,
        object: cranelift_codegen::ir::Block,
        other: cranelift_codegen::ir::Block,
    ) {
        if c.info.is_only(tag::OBJECT) {
            self.b.ins().jump(object, &[]);
        } else if !c.info.may_be(tag::OBJECT) {
            self.b.ins().jump(other, &[]);
        } else {
            let ty = self.load_type(c.addr, c.info);
            let is_obj = self.b.ins().icmp_imm(IntCC::Equal, ty, i64::from(tag::OBJECT));
            self.b.ins().brif(is_obj, object, &[], other, &[]);
        }
    }

    /// Look up the inline property cache: branches to `hit` with the
    /// property's address when the cached class matches `obj`'s class.
    fn lookup_property_cache(
        &mut self,
        obj: Value,
        cache_slot: Value,
        hit: cranelift_codegen::ir::Block,
        miss: cranelift_codegen::ir::Block,
    ) {
        let cached_ce = self.load_ptr(cache_slot, 0);
        let ce = self.load_ptr(obj, offsets::OBJ_CE);
        let same = self.b.ins().icmp(IntCC::Equal, cached_ce, ce);
        let check_offset = self.b.create_block();
        self.b.ins().brif(same, check_offset, &[], miss, &[]);

        self.b.switch_to_block(check_offset);
        let offset = self.b.ins().load(self.ptr, super::value::MEM, cache_slot, 8);
        let declared = self.b.ins().icmp_imm(IntCC::SignedGreaterThan, offset, 0);
        let prop = self.b.ins().iadd(obj, offset);
        self.b
            .ins()
            .brif(declared, hit, &[BlockArg::Value(prop)], miss, &[]);
    }

    /// Copy the value a handler returned into `out`, adding a reference
    /// unless the handler built it in `out` already.
    pub(super) fn take_handler_result(&mut self, ret: Value, out: Value) {
        let same = self.b.ins().icmp(IntCC::Equal, ret, out);
        let copy = self.b.create_block();
        let done = self.b.create_block();
        self.b.ins().brif(same, done, &[], copy, &[]);
        self.b.switch_to_block(copy);
        let src = Opnd {
            op: opjit_bytecode::Operand::UNUSED,
            addr: ZvalAddr::at(ret),
            info: TypeMask::ANY | TypeMask::REF,
            ssa: None,
        };
        let src = self.deref(src);
        self.copy_value(ZvalAddr::at(out), src.addr, src.info);
        self.try_addref(ZvalAddr::at(out), src.info);
        self.b.ins().jump(done, &[]);
        self.b.switch_to_block(done);
    }

    // ---- instructions ----

    /// `FETCH_OBJ_R`, `FETCH_OBJ_IS`
    pub(super) fn fetch_obj_read(&mut self, quiet: bool) {
        let (raw, c) = self.obj_container(if quiet { Fetch::Is } else { Fetch::R });
        let (raw_member, member) = self.read_op(OperandSlot::Op2);
        let res = self.def_op(OperandSlot::Result);
        let out = if res.addr.is_reg() {
            self.scratch_zval()
        } else {
            res.addr
        };
        let out_ptr = self.zval_ptr(out);
        let member_ptr = self.zval_ptr(member.addr);

        let object = self.b.create_block();
        let other = self.cold_block();
        let merge = self.b.create_block();
        self.branch_object(&c, object, other);

        self.b.switch_to_block(object);
        let obj = self.ptr_val(c.addr);
        let cache_slot = self.cache_slot_ptr(&member);
        let generic = self.b.create_block();
        if member.is_const() {
            let hit = self.b.create_block();
            self.b.append_block_param(hit, self.ptr);
            self.lookup_property_cache(obj, cache_slot, hit, generic);

            self.b.switch_to_block(hit);
            let prop = self.b.block_params(hit)[0];
            let ty = self.load_type(ZvalAddr::at(prop), TypeMask::ANY | TypeMask::UNDEF);
            let defined = self.b.create_block();
            let undef = self
                .b
                .ins()
                .icmp_imm(IntCC::Equal, ty, i64::from(tag::UNDEF));
            self.b.ins().brif(undef, generic, &[], defined, &[]);
            self.b.switch_to_block(defined);
            let src = raw.with(ZvalAddr::at(prop), TypeMask::ANY | TypeMask::REF);
            let src = self.deref(src);
            self.copy_value(out, src.addr, src.info);
            self.try_addref(out, src.info);
            self.b.ins().jump(merge, &[]);
        } else {
            self.b.ins().jump(generic, &[]);
        }

        self.b.switch_to_block(generic);
        self.store_opline();
        let handlers = self.handlers_of(&c);
        let kind = if quiet { fetch_kind::IS } else { fetch_kind::R };
        let ret = handlers.read_property(self, obj, member_ptr, kind, cache_slot, out_ptr);
        self.take_handler_result(ret, out_ptr);
        self.check_exception();
        self.b.ins().jump(merge, &[]);

        self.b.switch_to_block(other);
        if !quiet {
            let c_ptr = self.zval_ptr(c.addr);
            let kind = self.b.ins().iconst(types::I32, i64::from(fetch_kind::R));
            self.helper(HelperKind::PropertyOfNonObject, &[c_ptr, member_ptr, kind]);
        }
        self.set_null(out);
        self.b.ins().jump(merge, &[]);

        self.b.switch_to_block(merge);
        if res.addr.is_reg() {
            self.copy_value(res.addr, out, res.info);
        }
        self.free_op(raw_member);
        if !raw.is_unused() {
            self.free_op(raw);
        }
    }

    /// `FETCH_OBJ_W`: the result points at the property.
    pub(super) fn fetch_obj_write(&mut self) {
        let raw = self.use_op(OperandSlot::Op1);
        let container = if raw.is_unused() {
            self.this_operand(raw)
        } else {
            let fetched = self.fetch_cv(raw, Fetch::W);
            self.deref(fetched)
        };
        let (raw_member, member) = self.read_op(OperandSlot::Op2);
        let res = self.def_op(OperandSlot::Result);
        let res_ptr = self.zval_ptr(res.addr);
        let c_ptr = self.zval_ptr(container.addr);
        let member_ptr = self.zval_ptr(member.addr);
        let cache_slot = self.cache_slot_ptr(&member);
        let kind = self.b.ins().iconst(types::I32, i64::from(fetch_kind::W));
        self.helper_checked(
            HelperKind::FetchObjSlow,
            &[res_ptr, c_ptr, member_ptr, cache_slot, kind],
        );
        self.free_op(raw_member);
    }

    /// `ASSIGN_OBJ` (+ `OP_DATA`)
    pub(super) fn assign_obj(&mut self) {
        let (raw, c) = self.obj_container(Fetch::W);
        let (raw_member, member) = self.read_op(OperandSlot::Op2);
        let raw_value = self.opnd_at(self.pc + 1, OperandSlot::Op1, false);
        let value = self.fetch_cv(raw_value, Fetch::R);
        let value = self.deref(value);
        let res = self.def_op(OperandSlot::Result);
        let res = (!res.is_unused()).then_some(res);
        let member_ptr = self.zval_ptr(member.addr);
        let value_mem = self.spill(value.addr, value.info);
        let value_ptr = self.zval_ptr(value_mem);

        let object = self.b.create_block();
        let other = self.cold_block();
        let generic = self.b.create_block();
        let merge = self.b.create_block();
        self.b.append_block_param(merge, self.ptr);
        self.branch_object(&c, object, other);

        self.b.switch_to_block(object);
        let obj = self.ptr_val(c.addr);
        let cache_slot = self.cache_slot_ptr(&member);
        if member.is_const() {
            let hit = self.b.create_block();
            self.b.append_block_param(hit, self.ptr);
            self.lookup_property_cache(obj, cache_slot, hit, generic);

            self.b.switch_to_block(hit);
            let prop = self.b.block_params(hit)[0];
            let ty = self.load_type(ZvalAddr::at(prop), TypeMask::ANY | TypeMask::UNDEF);
            let defined = self.b.create_block();
            let undef = self
                .b
                .ins()
                .icmp_imm(IntCC::Equal, ty, i64::from(tag::UNDEF));
            self.b.ins().brif(undef, generic, &[], defined, &[]);
            self.b.switch_to_block(defined);
            let target = raw.with(ZvalAddr::at(prop), TypeMask::ANY | TypeMask::REF);
            let target = self.deref(target);
            self.assign_copy(&target, &value);
            let stored = self.zval_ptr(target.addr);
            self.b.ins().jump(merge, &[BlockArg::Value(stored)]);
        } else {
            self.b.ins().jump(generic, &[]);
        }

        self.b.switch_to_block(generic);
        self.store_opline();
        let obj = self.ptr_val(c.addr);
        let cache_slot = self.cache_slot_ptr(&member);
        let handlers = self.handlers_of(&c);
        let stored = handlers.write_property(self, obj, member_ptr, value_ptr, cache_slot);
        self.check_exception();
        self.b.ins().jump(merge, &[BlockArg::Value(stored)]);

        self.b.switch_to_block(other);
        let c_ptr = self.zval_ptr(c.addr);
        self.helper_checked(HelperKind::CreateDefaultObject, &[c_ptr]);
        self.b.ins().jump(generic, &[]);

        self.b.switch_to_block(merge);
        let stored = self.b.block_params(merge)[0];
        if let Some(res) = res {
            let src = raw_value.with(ZvalAddr::at(stored), value.info | TypeMask::REF);
            let src = self.deref(src);
            self.copy_value(res.addr, src.addr, src.info);
            self.try_addref(res.addr, src.info);
        }
        self.free_op(raw_value);
        self.free_op(raw_member);
        if !raw.is_unused() {
            self.free_op(raw);
        }
    }

    /// `ISSET_ISEMPTY_PROP_OBJ`
    pub(super) fn isset_isempty_prop(&mut self) {
        let (raw, c) = self.obj_container(Fetch::Is);
        let (raw_member, member) = self.read_op(OperandSlot::Op2);
        let res = self.def_op(OperandSlot::Result);
        let is_empty = self.insn().extended_value & instruction::ISEMPTY != 0;
        let member_ptr = self.zval_ptr(member.addr);

        let object = self.b.create_block();
        let other = self.b.create_block();
        let merge = self.b.create_block();
        self.b.append_block_param(merge, types::I8);
        self.branch_object(&c, object, other);

        self.b.switch_to_block(object);
        self.store_opline();
        let obj = self.ptr_val(c.addr);
        let cache_slot = self.cache_slot_ptr(&member);
        let handlers = self.handlers_of(&c);
        let found = handlers.has_property(self, obj, member_ptr, is_empty, cache_slot);
        self.check_exception();
        let cc = if is_empty { IntCC::Equal } else { IntCC::NotEqual };
        let r = self.b.ins().icmp_imm(cc, found, 0);
        self.b.ins().jump(merge, &[BlockArg::Value(r)]);

        self.b.switch_to_block(other);
        let r = self.b.ins().iconst(types::I8, i64::from(is_empty));
        self.b.ins().jump(merge, &[BlockArg::Value(r)]);

        self.b.switch_to_block(merge);
        let r = self.b.block_params(merge)[0];
        self.set_bool(res.addr, r);
        self.free_op(raw_member);
        if !raw.is_unused() {
            self.free_op(raw);
        }
    }

    /// `FETCH_THIS`
    pub(super) fn fetch_this(&mut self) {
        let raw = self.use_op(OperandSlot::Op1);
        let this = self.this_operand(raw);
        let res = self.def_op(OperandSlot::Result);
        self.copy_value(res.addr, this.addr, TypeMask::OBJECT);
        let obj = self.ptr_val(this.addr);
        self.addref(obj);
    }

    /// `++`/`--` of a value that may be an object: proxies go through
    /// `get`, the helper and `set`; anything else through the helper.
    pub(super) fn incdec_object(&mut self, var: &Opnd, kind: HelperKind) {
        let var_ptr = self.zval_ptr(var.addr);
        let handlers = self.handlers_of(var);
        let generic = self.b.create_block();
        let done = self.b.create_block();

        if handlers.may_proxy() {
            let object = self.b.create_block();
            self.branch_object(var, object, generic);

            self.b.switch_to_block(object);
            let obj = self.ptr_val(var.addr);
            let get = handlers.target(self, obj, HandlerSlot::Get);
            let set = handlers.target(self, obj, HandlerSlot::Set);
            let get_ok = self.b.ins().icmp_imm(IntCC::NotEqual, get, 0);
            let set_ok = self.b.ins().icmp_imm(IntCC::NotEqual, set, 0);
            let both = self.b.ins().band(get_ok, set_ok);
            let proxy = self.cold_block();
            self.b.ins().brif(both, proxy, &[], generic, &[]);

            self.b.switch_to_block(proxy);
            self.store_opline();
            let rv = self.scratch_zval();
            let rv_ptr = self.zval_ptr(rv);
            let got = self.call_value(SigKey::Object(HandlerSlot::Get), get, &[obj, rv_ptr])[0];
            self.take_handler_result(got, rv_ptr);
            self.helper(kind, &[rv_ptr]);
            self.call_value(SigKey::Object(HandlerSlot::Set), set, &[obj, rv_ptr]);
            self.release(rv, TypeMask::ANY);
            self.check_exception();
            self.b.ins().jump(done, &[]);
        } else {
            self.b.ins().jump(generic, &[]);
        }

        self.b.switch_to_block(generic);
        self.helper_checked(kind, &[var_ptr]);
        self.b.ins().jump(done, &[]);
        self.b.switch_to_block(done);
    }
}
