//! Calls out of generated code.
//!
//! Every callee is reached through its absolute address (`iconst` +
//! `call_indirect`), so compiled bodies carry no relocations and can be
//! copied into the arena as-is. Imported signatures are cached per
//! function.

use cranelift_codegen::ir::{
    AbiParam, Block, InstBuilder, Signature, SigRef, TrapCode, Type, Value, types,
};
use smallvec::SmallVec;

use super::Translator;
use super::object::HandlerSlot;
use crate::helpers::HelperKind;

/// Signature cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(super) enum SigKey {
    Helper(HelperKind),
    /// `(execute_data, opline) -> status`
    Handler,
    /// `(execute_data, return_value)`
    Internal,
    /// Object handler slot
    Object(HandlerSlot),
    /// `(execute_data) -> ret` of a register-returning clone
    Clone(Option<Type>),
}

impl Translator<'_, '_> {
    fn signature_of(&self, key: SigKey) -> Signature {
        let ptr = self.ptr;
        let mut sig = Signature::new(self.call_conv);
        match key {
            SigKey::Helper(kind) => return kind.signature(ptr, self.call_conv),
            SigKey::Handler => {
                sig.params.extend([AbiParam::new(ptr), AbiParam::new(ptr)]);
                sig.returns.push(AbiParam::new(types::I32));
            }
            SigKey::Internal => {
                sig.params.extend([AbiParam::new(ptr), AbiParam::new(ptr)]);
            }
            SigKey::Object(slot) => return slot.signature(ptr, self.call_conv),
            SigKey::Clone(ret) => {
                sig.params.push(AbiParam::new(ptr));
                if let Some(ty) = ret {
                    sig.returns.push(AbiParam::new(ty));
                }
            }
        }
        sig
    }

    fn sig(&mut self, key: SigKey) -> SigRef {
        if let Some(sig) = self.sigs.get(&key) {
            return *sig;
        }
        let sig = self.signature_of(key);
        let sig = self.b.import_signature(sig);
        self.sigs.insert(key, sig);
        sig
    }

    /// Call `callee` (a pointer-typed value) with signature `key`.
    pub(super) fn call_value(
        &mut self,
        key: SigKey,
        callee: Value,
        args: &[Value],
    ) -> SmallVec<[Value; 1]> {
        let sig = self.sig(key);
        let call = self.b.ins().call_indirect(sig, callee, args);
        SmallVec::from_slice(self.b.inst_results(call))
    }

    /// Call the fixed address `addr` with signature `key`.
    pub(super) fn call_addr(
        &mut self,
        key: SigKey,
        addr: usize,
        args: &[Value],
    ) -> SmallVec<[Value; 1]> {
        let callee = self.iconst_ptr(addr);
        self.call_value(key, callee, args)
    }

    /// Call a runtime helper.
    ///
    /// Diagnostics publish the current opline without claiming it;
    /// throwing helpers publish and claim it. The caller checks for an
    /// exception afterwards (see [`Self::helper_checked`]).
    pub(super) fn helper(&mut self, kind: HelperKind, args: &[Value]) -> Option<Value> {
        let attrs = kind.attrs();
        if attrs.may_throw {
            self.store_opline();
        } else if attrs.diagnostic {
            self.store_opline_unmarked();
        }
        self.used_helpers[kind as usize] = true;
        let addr = self.helper_addrs[kind as usize];
        self.call_addr(SigKey::Helper(kind), addr, args)
            .first()
            .copied()
    }

    /// Call a helper that returns a value.
    pub(super) fn helper_ret(&mut self, kind: HelperKind, args: &[Value]) -> Value {
        match self.helper(kind, args) {
            Some(v) => v,
            None => panic!("helper {} returns nothing", kind.symbol_name()),
        }
    }

    /// Call a helper and branch to the exception path when it threw.
    pub(super) fn helper_checked(&mut self, kind: HelperKind, args: &[Value]) -> Option<Value> {
        let ret = self.helper(kind, args);
        if kind.attrs().may_throw {
            self.check_exception();
        }
        ret
    }

    /// Call a helper that always throws, then continue on the exception
    /// path. Code emitted afterwards lands in an unreachable block.
    pub(super) fn helper_throw(&mut self, kind: HelperKind, args: &[Value]) {
        self.helper(kind, args);
        let target = self.exception_target();
        self.b.ins().jump(target, &[]);
        let dead = self.b.create_block();
        self.b.switch_to_block(dead);
    }

    /// Call a helper that never returns.
    pub(super) fn helper_fatal(&mut self, kind: HelperKind, args: &[Value]) {
        debug_assert!(kind.attrs().noreturn);
        self.helper(kind, args);
        self.unreachable_path();
    }

    /// Trap here and continue emitting into a fresh unreachable block.
    pub(super) fn unreachable_path(&mut self) {
        self.b.ins().trap(TrapCode::unwrap_user(1));
        let dead = self.b.create_block();
        self.b.switch_to_block(dead);
    }

    /// Call the interpreter handler of the current instruction.
    pub(super) fn call_handler(&mut self) -> Value {
        let opline = self.opline_const(self.pc);
        let ex = self.ex;
        let addr = self.handlers[self.pc];
        self.call_addr(SigKey::Handler, addr, &[ex, opline])[0]
    }

    // ---- branches ----

    /// Branch on `cond`, laying `unlikely` out of line.
    pub(super) fn brif_unlikely(&mut self, cond: Value, unlikely: Block, likely: Block) {
        self.b.ins().brif(cond, unlikely, &[], likely, &[]);
        self.b.set_cold_block(unlikely);
    }

    /// New block, already marked cold.
    pub(super) fn cold_block(&mut self) -> Block {
        let block = self.b.create_block();
        self.b.set_cold_block(block);
        block
    }
}
