//! Block walk, edge reconciliation and opcode dispatch.

use cranelift_codegen::ir::{Block, Function, InstBuilder, Value, condcodes::IntCC};
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext};
use opjit_bytecode::{OpArray, Opcode, ReturnConv, SsaFacts, TypeMask, instruction};

use super::value::ZvalAddr;
use super::{Deferred, TranslateInput, Translator};
use crate::error::{JitError, Result};
use crate::helpers::HelperKind;
use crate::layout::fetch_kind;
use crate::regalloc::{Move, RegKind};

/// What a translated instruction left behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Flow {
    /// Emission continues with the next instruction
    Continue,
    /// The native block is closed; the rest of the bytecode block is
    /// unreachable or was consumed
    Terminated,
}

/// Reject functions and instructions the translator does not handle.
///
/// Runs before any IR is built; a rejected function keeps its
/// interpreter dispatch.
pub(crate) fn check_supported(op_array: &OpArray, facts: &SsaFacts) -> Result<()> {
    if op_array.is_generator() {
        return Err(JitError::Unsupported {
            reason: "generator",
        });
    }
    if op_array.has_finally() {
        return Err(JitError::Unsupported { reason: "finally" });
    }
    if facts.blocks.is_empty() || op_array.instructions.is_empty() {
        return Err(JitError::Unsupported {
            reason: "empty function",
        });
    }
    if facts.function.return_conv.is_clone() && !op_array.try_catch.is_empty() {
        return Err(JitError::Unsupported {
            reason: "clone with try/catch",
        });
    }

    for (pc, insn) in op_array.instructions.iter().enumerate() {
        let unsupported = match insn.opcode {
            Opcode::FastCall
            | Opcode::FastRet
            | Opcode::Yield
            | Opcode::GeneratorCreate
            | Opcode::GeneratorReturn
            | Opcode::HandleException => true,
            Opcode::AssignOp => !Opcode::from_byte(insn.extended_value as u8)
                .is_some_and(Opcode::is_compound_assignable),
            _ => false,
        };
        if unsupported {
            return Err(JitError::UnsupportedInstruction {
                pc,
                opcode: insn.opcode.name(),
            });
        }
    }
    Ok(())
}

/// Translate `input.op_array` into `func`, whose signature the caller has
/// set for the body's return convention.
///
/// Returns the runtime helpers the emitted code calls.
pub(crate) fn translate(
    func: &mut Function,
    fctx: &mut FunctionBuilderContext,
    input: &TranslateInput<'_>,
) -> Vec<HelperKind> {
    let mut b = FunctionBuilder::new(func, fctx);
    let entry = b.create_block();
    b.append_block_params_for_function_params(entry);
    b.switch_to_block(entry);
    let ex = b.block_params(entry)[0];

    let mut t = Translator::new(b, input, ex);
    t.run();
    t.b.seal_all_blocks();
    let used = t.used_helpers;
    t.b.finalize();
    HelperKind::ALL
        .iter()
        .copied()
        .filter(|kind| used[*kind as usize])
        .collect()
}

fn reg_types(kind: RegKind) -> TypeMask {
    match kind {
        RegKind::Long => TypeMask::LONG,
        RegKind::Double => TypeMask::DOUBLE,
        RegKind::Tag => TypeMask::SIMPLE,
    }
}

impl Translator<'_, '_> {
    fn run(&mut self) {
        let facts = self.facts;
        for (id, bb) in facts.blocks.iter().enumerate() {
            if bb.flags.reachable {
                self.blocks[id] = Some(self.b.create_block());
            }
        }
        // the first instruction is also the entry of every skipped RECV:
        // re-running a passed parameter's RECV has no effect
        let first = self.native_block(0);
        self.b.ins().jump(first, &[]);

        for (id, bb) in facts.blocks.iter().enumerate() {
            if !bb.flags.reachable {
                continue;
            }
            let native = self.native_block(id as u32);
            self.b.switch_to_block(native);
            self.block = id as u32;
            self.opline_valid = None;

            let mut flow = Flow::Continue;
            let mut pc = bb.start as usize;
            while pc < bb.end() as usize {
                self.pc = pc;
                self.scratch_used = 0;
                flow = self.instruction(pc);
                // a destructor the instruction ran may have thrown
                if std::mem::take(&mut self.dtor_check_due) && flow == Flow::Continue {
                    self.check_exception();
                }
                if flow == Flow::Terminated {
                    break;
                }
                pc += 1;
            }
            if flow == Flow::Continue {
                self.jump_to_pc(bb.end());
            }
        }

        // filling a block may defer more (an epilogue reached from an
        // edge block, a landing pad from the epilogue's helpers)
        self.dtor_checks = false;
        while let Some(deferred) = self.deferred.pop() {
            match deferred {
                Deferred::CatchLanding { block, index } => self.fill_catch_landing(block, index),
                Deferred::ExceptionExit(block) => self.fill_exception_exit(block),
                Deferred::FuncExit(block) => self.fill_func_exit(block),
                Deferred::Edge {
                    block,
                    moves,
                    target,
                } => self.fill_edge(block, &moves, target),
            }
        }
    }

    // ---- edges ----

    /// Native target of the edge from the current block to the block
    /// starting at `pc`, interposing a reconciliation block when a phi of
    /// the successor changes residency across the edge.
    fn edge_target(&mut self, pc: u32) -> Block {
        let Some(succ) = self.facts.block_at(pc) else {
            panic!("jump to pc {pc} does not start a block");
        };
        let target = self.native_block(succ);
        let moves = self.residency.edge_moves(self.facts, self.block, succ);
        if moves.is_empty() {
            return target;
        }
        let block = self.b.create_block();
        self.deferred.push(Deferred::Edge {
            block,
            moves,
            target,
        });
        block
    }

    fn fill_edge(&mut self, block: Block, moves: &[Move], target: Block) {
        self.b.switch_to_block(block);
        for mv in moves {
            match *mv {
                Move::MemToReg { slot, kind } => {
                    let mem = self.frame_slot(slot);
                    self.copy_value(ZvalAddr::Reg { slot, kind }, mem, reg_types(kind));
                }
                Move::RegToMem { slot, kind } => {
                    let mem = self.frame_slot(slot);
                    self.copy_value(mem, ZvalAddr::Reg { slot, kind }, reg_types(kind));
                }
            }
        }
        self.b.ins().jump(target, &[]);
    }

    pub(super) fn jump_to_pc(&mut self, pc: u32) {
        let target = self.edge_target(pc);
        self.b.ins().jump(target, &[]);
    }

    /// Branch to `then_pc` when `cond` holds, else to `else_pc`.
    pub(super) fn branch_to_pc(&mut self, cond: Value, then_pc: u32, else_pc: u32) {
        let then_block = self.edge_target(then_pc);
        let else_block = self.edge_target(else_pc);
        self.b.ins().brif(cond, then_block, &[], else_block, &[]);
    }

    // ---- dispatch ----

    /// Run the interpreter's handler for the current instruction.
    fn generic(&mut self) {
        self.store_opline();
        let status = self.call_handler();
        self.invalidate_opline();
        self.check_exception();
        if self.conv == ReturnConv::Status {
            // a handler that left the frame hands its status up
            let left = self.b.ins().icmp_imm(IntCC::NotEqual, status, 0);
            let leave = self.cold_block();
            let cont = self.b.create_block();
            self.b.ins().brif(left, leave, &[], cont, &[]);
            self.b.switch_to_block(leave);
            self.b.ins().return_(&[status]);
            self.b.switch_to_block(cont);
        }
    }

    /// Run the handler of a two-way instruction and follow the opline it
    /// chose: `target` or the next instruction. With `may_throw` a pending
    /// exception leaves for the exception path first.
    fn generic_branch(&mut self, target: u32, may_throw: bool) -> Flow {
        self.store_opline();
        self.call_handler();
        self.invalidate_opline();
        if may_throw {
            self.check_exception();
        }
        let taken = self.opline_is(target as usize);
        self.branch_to_pc(taken, target, self.pc as u32 + 1);
        Flow::Terminated
    }

    fn instruction(&mut self, pc: usize) -> Flow {
        let insn = self.op_array.instructions[pc];
        tracing::trace!(target: "opjit::compile", pc, opcode = insn.opcode.name(), "translate");
        match insn.opcode {
            // consumed by the instruction before it
            Opcode::Nop | Opcode::ExtStmt | Opcode::OpData => {}

            Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::Div
            | Opcode::Mod
            | Opcode::Sl
            | Opcode::Sr
            | Opcode::Concat
            | Opcode::FastConcat
            | Opcode::BwOr
            | Opcode::BwAnd
            | Opcode::BwXor
            | Opcode::Pow => self.binary(insn.opcode),
            Opcode::BwNot => self.bw_not(),
            Opcode::BoolXor => self.bool_xor(),
            Opcode::Strlen => self.strlen(),

            Opcode::IsIdentical
            | Opcode::IsNotIdentical
            | Opcode::IsEqual
            | Opcode::IsNotEqual
            | Opcode::IsSmaller
            | Opcode::IsSmallerOrEqual
            | Opcode::Case => return self.compare(insn.opcode),
            Opcode::Bool => return self.bool_op(false),
            Opcode::BoolNot => return self.bool_op(true),
            Opcode::TypeCheck => return self.type_check(),
            Opcode::IssetIsemptyCv => return self.isset_isempty_cv(),

            Opcode::Assign => self.assign(),
            Opcode::AssignRef if insn.op1.is_cv() && insn.op2.is_cv() => self.assign_ref(),
            Opcode::AssignOp => self.assign_op(),
            Opcode::QmAssign => self.qm_assign(),
            Opcode::PreInc | Opcode::PreDec | Opcode::PostInc | Opcode::PostDec => {
                self.incdec(insn.opcode)
            }
            Opcode::Free => self.free(),

            Opcode::Jmp => return self.jmp(),
            Opcode::Jmpz | Opcode::Jmpnz | Opcode::Jmpznz | Opcode::JmpzEx | Opcode::JmpnzEx => {
                return self.truth_jump(insn.opcode);
            }
            Opcode::Return => {
                self.ret();
                return Flow::Terminated;
            }
            Opcode::Throw => {
                self.generic();
                let target = self.exception_target();
                self.b.ins().jump(target, &[]);
                return Flow::Terminated;
            }
            Opcode::Catch if insn.extended_value & instruction::CATCH_LAST != 0 => self.generic(),
            // an unmatched catch moves on with the exception still pending
            Opcode::Catch => return self.generic_branch(insn.op2.num, false),
            Opcode::New => return self.generic_branch(insn.op2.num, true),

            Opcode::FetchDimR => self.fetch_dim_read(false),
            Opcode::FetchDimIs => self.fetch_dim_read(true),
            Opcode::FetchDimW => self.fetch_dim_write(fetch_kind::W),
            Opcode::FetchDimRw => self.fetch_dim_write(fetch_kind::RW),
            Opcode::FetchDimUnset => self.fetch_dim_write(fetch_kind::UNSET),
            Opcode::AssignDim => self.assign_dim(),
            Opcode::IssetIsemptyDimObj => return self.isset_isempty_dim(),
            Opcode::FetchObjR => self.fetch_obj_read(false),
            Opcode::FetchObjIs => self.fetch_obj_read(true),
            Opcode::FetchObjW => self.fetch_obj_write(),
            Opcode::AssignObj => self.assign_obj(),
            Opcode::IssetIsemptyPropObj => self.isset_isempty_prop(),
            Opcode::FetchThis => self.fetch_this(),

            Opcode::InitFcall => self.init_fcall(),
            Opcode::InitFcallByName => self.init_fcall_by_name(),
            Opcode::InitMethodCall => self.init_method_call(),
            Opcode::SendVal => self.send_val(false),
            Opcode::SendValEx => self.send_val(true),
            Opcode::SendVar => self.send_var(),
            Opcode::SendVarEx => self.send_var_ex(),
            Opcode::SendRef => self.send_ref(),
            Opcode::DoFcall | Opcode::DoIcall | Opcode::DoUcall | Opcode::DoFcallByName => {
                self.do_call()
            }
            Opcode::Recv => self.recv(),
            Opcode::RecvInit => self.recv_init(),

            Opcode::Echo
            | Opcode::AssignRef
            | Opcode::InitArray
            | Opcode::AddArrayElement
            | Opcode::SendVarNoRef
            | Opcode::RecvVariadic
            | Opcode::FetchConstant
            | Opcode::FetchClass => self.generic(),

            Opcode::HandleException
            | Opcode::FastCall
            | Opcode::FastRet
            | Opcode::GeneratorCreate
            | Opcode::Yield
            | Opcode::GeneratorReturn => {
                unreachable!("{} is rejected before translation", insn.opcode.name())
            }
        }
        Flow::Continue
    }
}
