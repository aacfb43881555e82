//! Current-opline tracking and the exception path.
//!
//! The runtime reads `EX(opline)` to report errors and to find the try
//! region of a thrown exception, so the store must happen before anything
//! that can raise. Stores are skipped while the tracked value is known to
//! be current; every block boundary that can be entered by a jump, and
//! every interpreter handler call, forgets it.

use cranelift_codegen::ir::{Block, InstBuilder, Value, condcodes::IntCC, types};

use super::bridge::SigKey;
use super::value::MEM;
use super::{Deferred, Translator};
use crate::layout::offsets;

impl Translator<'_, '_> {
    pub(super) fn opline_const(&mut self, pc: usize) -> Value {
        let addr = self.op_array.opline_addr(pc);
        self.iconst_ptr(addr)
    }

    fn write_opline(&mut self) {
        let opline = self.opline_const(self.pc);
        let ex = self.ex;
        self.store_at(opline, ex, offsets::EX_OPLINE);
    }

    /// Publish the current opline and remember that it is current.
    pub(super) fn store_opline(&mut self) {
        if self.opline_valid == Some(self.pc) {
            return;
        }
        self.write_opline();
        self.opline_valid = Some(self.pc);
    }

    /// Publish the current opline for a diagnostic without claiming it.
    pub(super) fn store_opline_unmarked(&mut self) {
        if self.opline_valid == Some(self.pc) {
            return;
        }
        self.write_opline();
    }

    pub(super) fn invalidate_opline(&mut self) {
        self.opline_valid = None;
    }

    /// `I8` condition: an exception is pending.
    pub(super) fn exception_pending(&mut self) -> Value {
        let slot = self.iconst_ptr(self.rt.exception);
        let exception = self.load_ptr(slot, 0);
        self.b.ins().icmp_imm(IntCC::NotEqual, exception, 0)
    }

    /// Leave for the exception path when an exception is pending.
    pub(super) fn check_exception(&mut self) {
        let pending = self.exception_pending();
        let target = self.exception_target();
        let cont = self.b.create_block();
        self.b.ins().brif(pending, target, &[], cont, &[]);
        self.b.switch_to_block(cont);
    }

    /// Where an exception raised by the current instruction goes: the
    /// landing block of the innermost enclosing catch, or the function's
    /// exception exit.
    pub(super) fn exception_target(&mut self) -> Block {
        let pc = self.pc as u32;
        let innermost = self
            .op_array
            .try_catch
            .iter()
            .enumerate()
            .rev()
            .find(|(_, tc)| tc.catch_op != 0 && tc.try_op <= pc && pc < tc.catch_op)
            .map(|(index, _)| index);

        match innermost {
            Some(index) => {
                if let Some(block) = self.catch_blocks[index] {
                    return block;
                }
                let block = self.cold_block();
                self.catch_blocks[index] = Some(block);
                self.deferred.push(Deferred::CatchLanding { block, index });
                block
            }
            None => {
                if let Some(block) = self.exception_exit {
                    return block;
                }
                let block = self.cold_block();
                self.exception_exit = Some(block);
                self.deferred.push(Deferred::ExceptionExit(block));
                block
            }
        }
    }

    /// Record the raising opline and switch `EX(opline)` to the
    /// exception-dispatch instruction, then run its handler.
    ///
    /// An interpreter handler that threw has already done the switch; the
    /// opline it recorded is kept.
    fn dispatch_exception(&mut self) -> Value {
        let ex = self.ex;
        let throw_op = self.load_ptr(ex, offsets::EX_OPLINE);
        let before = self.iconst_ptr(self.rt.opline_before_exception);
        let exception_op = self.iconst_ptr(self.rt.exception_op);
        let switched = self.b.ins().icmp(IntCC::Equal, throw_op, exception_op);
        let recorded = self.load_ptr(before, 0);
        let raising = self.b.ins().select(switched, recorded, throw_op);
        self.store_at(raising, before, 0);
        self.store_at(exception_op, ex, offsets::EX_OPLINE);
        self.call_addr(SigKey::Handler, self.rt.exception_handler, &[ex, exception_op])[0]
    }

    pub(super) fn fill_catch_landing(&mut self, block: Block, index: usize) {
        self.b.switch_to_block(block);
        self.dispatch_exception();
        let catch_op = self.op_array.try_catch[index].catch_op;
        let target = self.block_at_pc(catch_op);
        self.b.ins().jump(target, &[]);
    }

    pub(super) fn fill_exception_exit(&mut self, block: Block) {
        self.b.switch_to_block(block);
        // the caller of a clone checks for the exception itself
        if self.conv.is_clone() {
            self.return_clone_default();
        } else {
            let status = self.dispatch_exception();
            self.b.ins().return_(&[status]);
        }
    }

    /// Return `status::*` from a status-returning body.
    pub(super) fn return_status(&mut self, code: i32) {
        let v = self.b.ins().iconst(types::I32, i64::from(code));
        self.b.ins().return_(&[v]);
    }

    /// Whether `EX(opline)` of a finished handler call points at `pc`.
    pub(super) fn opline_is(&mut self, pc: usize) -> Value {
        let ex = self.ex;
        let current = self.b.ins().load(self.ptr, MEM, ex, offsets::EX_OPLINE);
        let expected = self.opline_const(pc);
        self.b.ins().icmp(IntCC::Equal, current, expected)
    }
}

