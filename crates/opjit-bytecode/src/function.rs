//! Op arrays (bytecode functions)

use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::{BytecodeError, Result};
use crate::instruction::Instruction;
use crate::literal::Literal;
use crate::opcode::Opcode;
use crate::operand::{Operand, OperandKind};

/// Function flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionFlags {
    /// Is a generator function
    pub is_generator: bool,
    /// Has a variadic last parameter
    pub is_variadic: bool,
    /// Declares parameter type hints
    pub has_type_hints: bool,
    /// Returns by reference
    pub returns_reference: bool,
    /// Is a closure body
    pub is_closure: bool,
    /// Uses `$this`
    pub uses_this: bool,
    /// Is top-level script code
    pub is_top_level: bool,
}

/// Declared parameter
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgInfo {
    /// Parameter name
    pub name: String,
    /// Passed by reference
    pub by_reference: bool,
    /// Carries a type declaration the runtime must verify
    pub has_type: bool,
}

impl ArgInfo {
    /// By-value parameter without a type
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// One try/catch/finally region. Offsets are instruction indices; a zero
/// `catch_op` or `finally_op` means the region has no such arm.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TryCatchElement {
    /// First instruction of the protected range
    pub try_op: u32,
    /// First instruction of the catch arms
    pub catch_op: u32,
    /// First instruction of the `finally` block
    pub finally_op: u32,
    /// End of the `finally` block
    pub finally_end: u32,
}

impl TryCatchElement {
    /// try/catch without finally
    pub const fn catch(try_op: u32, catch_op: u32) -> Self {
        Self {
            try_op,
            catch_op,
            finally_op: 0,
            finally_end: 0,
        }
    }

    /// Region has a `finally` arm
    pub const fn has_finally(&self) -> bool {
        self.finally_op != 0
    }
}

/// Per-instruction dispatch slots.
///
/// Each slot holds the address of the handler the interpreter calls for
/// that instruction. The JIT replaces the first slot (and skippable
/// parameter-receiving slots) with its native entry point.
#[derive(Debug)]
pub struct DispatchTable {
    slots: Box<[AtomicUsize]>,
}

impl DispatchTable {
    fn new(handlers: impl IntoIterator<Item = usize>) -> Self {
        Self {
            slots: handlers.into_iter().map(AtomicUsize::new).collect(),
        }
    }

    /// Handler address of instruction `index`
    #[inline]
    pub fn get(&self, index: usize) -> usize {
        self.slots[index].load(Ordering::Acquire)
    }

    /// Replace the handler of instruction `index`
    #[inline]
    pub fn set(&self, index: usize, handler: usize) {
        self.slots[index].store(handler, Ordering::Release);
    }

    /// Address of the slot itself, for code that loads it at run time
    #[inline]
    pub fn slot_addr(&self, index: usize) -> usize {
        &self.slots[index] as *const AtomicUsize as usize
    }

    /// Number of slots
    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Table is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl Clone for DispatchTable {
    fn clone(&self) -> Self {
        Self::new((0..self.len()).map(|i| self.get(i)))
    }
}

/// A compiled function body.
///
/// Instructions are addressed by index; their addresses are stable for
/// the lifetime of the op array and serve as "opline" pointers.
#[derive(Debug, Clone)]
pub struct OpArray {
    /// Function name (`None` for top-level code)
    pub name: Option<String>,
    /// Flags
    pub flags: FunctionFlags,
    /// Declared parameters
    pub num_args: u32,
    /// Parameters without a default
    pub required_num_args: u32,
    /// Number of compiled variables
    pub last_var: u32,
    /// Number of temporary slots
    pub temporaries: u32,
    /// Run-time cache size in bytes
    pub cache_size: u32,
    /// Instructions
    pub instructions: Vec<Instruction>,
    /// Literal table
    pub literals: Vec<Literal>,
    /// Try/catch regions, innermost last
    pub try_catch: Vec<TryCatchElement>,
    /// Declared parameters
    pub arg_info: Vec<ArgInfo>,
    /// Names of compiled variables
    pub cv_names: Vec<String>,
    dispatch: DispatchTable,
}

impl OpArray {
    /// Create a new op array builder
    pub fn builder() -> OpArrayBuilder {
        OpArrayBuilder::new()
    }

    /// Get the function name or `{main}`
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("{main}")
    }

    /// Check if function is a generator
    #[inline]
    pub fn is_generator(&self) -> bool {
        self.flags.is_generator
    }

    /// Any try region with a `finally` arm
    pub fn has_finally(&self) -> bool {
        self.try_catch.iter().any(TryCatchElement::has_finally)
    }

    /// Number of zval slots in the frame (CVs plus temporaries)
    #[inline]
    pub fn frame_size(&self) -> u32 {
        self.last_var + self.temporaries
    }

    /// Literal at `index`
    #[inline]
    pub fn literal(&self, index: u32) -> &Literal {
        &self.literals[index as usize]
    }

    /// Address of instruction `index`, the value stored as the frame's opline
    #[inline]
    pub fn opline_addr(&self, index: usize) -> usize {
        &self.instructions[index] as *const Instruction as usize
    }

    /// Dispatch slots
    #[inline]
    pub fn dispatch(&self) -> &DispatchTable {
        &self.dispatch
    }

    /// Name of compiled variable `slot`
    pub fn cv_name(&self, slot: u32) -> &str {
        self.cv_names
            .get(slot as usize)
            .map(String::as_str)
            .unwrap_or("?")
    }

    /// Leading parameter-receiving instructions the interpreter may skip
    /// when entering the function: none when parameters carry type hints.
    pub fn skippable_recv_count(&self) -> usize {
        if self.flags.has_type_hints {
            return 0;
        }
        self.instructions
            .iter()
            .take(self.num_args as usize)
            .take_while(|insn| matches!(insn.opcode, Opcode::Recv | Opcode::RecvInit))
            .count()
    }
}

/// Builder for op arrays
#[derive(Debug, Default)]
pub struct OpArrayBuilder {
    name: Option<String>,
    flags: FunctionFlags,
    num_args: u32,
    required_num_args: Option<u32>,
    last_var: u32,
    temporaries: u32,
    cache_size: u32,
    instructions: Vec<Instruction>,
    literals: Vec<Literal>,
    try_catch: Vec<TryCatchElement>,
    arg_info: Vec<ArgInfo>,
    cv_names: Vec<String>,
    default_handler: usize,
    handlers: Vec<Option<usize>>,
}

impl OpArrayBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set function name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set flags
    pub fn flags(mut self, flags: FunctionFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Mark as generator
    pub fn is_generator(mut self, value: bool) -> Self {
        self.flags.is_generator = value;
        self
    }

    /// Set declared parameter count
    pub fn num_args(mut self, count: u32) -> Self {
        self.num_args = count;
        self
    }

    /// Set required parameter count (defaults to `num_args`)
    pub fn required_num_args(mut self, count: u32) -> Self {
        self.required_num_args = Some(count);
        self
    }

    /// Add a compiled variable
    pub fn cv(mut self, name: impl Into<String>) -> Self {
        self.cv_names.push(name.into());
        self.last_var += 1;
        self
    }

    /// Set number of temporaries
    pub fn temporaries(mut self, count: u32) -> Self {
        self.temporaries = count;
        self
    }

    /// Set run-time cache size in bytes
    pub fn cache_size(mut self, size: u32) -> Self {
        self.cache_size = size;
        self
    }

    /// Add a literal, returning the builder
    pub fn literal(mut self, literal: Literal) -> Self {
        self.literals.push(literal);
        self
    }

    /// Add a single instruction
    pub fn instruction(mut self, instruction: Instruction) -> Self {
        self.instructions.push(instruction);
        self.handlers.push(None);
        self
    }

    /// Add an instruction executed by a specific interpreter handler
    pub fn instruction_with_handler(mut self, instruction: Instruction, handler: usize) -> Self {
        self.instructions.push(instruction);
        self.handlers.push(Some(handler));
        self
    }

    /// Add a try/catch region
    pub fn try_catch(mut self, element: TryCatchElement) -> Self {
        self.try_catch.push(element);
        self
    }

    /// Add a parameter description
    pub fn arg(mut self, info: ArgInfo) -> Self {
        if info.has_type {
            self.flags.has_type_hints = true;
        }
        self.arg_info.push(info);
        self
    }

    /// Handler installed in every dispatch slot without an explicit one
    pub fn default_handler(mut self, handler: usize) -> Self {
        self.default_handler = handler;
        self
    }

    /// Validate and build the op array
    pub fn build(self) -> Result<OpArray> {
        let len = self.instructions.len();
        let frame_size = self.last_var + self.temporaries;
        for (pc, insn) in self.instructions.iter().enumerate() {
            for target in insn.jump_targets() {
                if target as usize >= len {
                    return Err(BytecodeError::InvalidJumpTarget { pc, target, len });
                }
            }
            for op in [insn.op1, insn.op2, insn.result] {
                check_operand(pc, op, self.last_var, frame_size, self.literals.len())?;
            }
            if insn.opcode.has_op_data()
                && self.instructions.get(pc + 1).map(|next| next.opcode) != Some(Opcode::OpData)
            {
                return Err(BytecodeError::MissingOpData {
                    pc,
                    opcode: insn.opcode.name(),
                });
            }
        }
        for (index, tc) in self.try_catch.iter().enumerate() {
            let in_range = |op: u32| (op as usize) < len;
            if !in_range(tc.try_op)
                || (tc.catch_op != 0 && !in_range(tc.catch_op))
                || (tc.finally_op != 0 && !in_range(tc.finally_op))
            {
                return Err(BytecodeError::InvalidTryCatch { index });
            }
        }

        let default_handler = self.default_handler;
        let dispatch = DispatchTable::new(
            self.handlers
                .iter()
                .map(|handler| handler.unwrap_or(default_handler)),
        );
        Ok(OpArray {
            name: self.name,
            flags: self.flags,
            num_args: self.num_args,
            required_num_args: self.required_num_args.unwrap_or(self.num_args),
            last_var: self.last_var,
            temporaries: self.temporaries,
            cache_size: self.cache_size,
            instructions: self.instructions,
            literals: self.literals,
            try_catch: self.try_catch,
            arg_info: self.arg_info,
            cv_names: self.cv_names,
            dispatch,
        })
    }
}

fn check_operand(
    pc: usize,
    op: Operand,
    last_var: u32,
    frame_size: u32,
    literal_count: usize,
) -> Result<()> {
    match op.kind {
        OperandKind::Unused => Ok(()),
        OperandKind::Const if (op.num as usize) < literal_count => Ok(()),
        OperandKind::Const => Err(BytecodeError::InvalidLiteral { pc, index: op.num }),
        OperandKind::Cv if op.num < last_var => Ok(()),
        OperandKind::TmpVar | OperandKind::Var if op.num >= last_var && op.num < frame_size => {
            Ok(())
        }
        _ => Err(BytecodeError::InvalidSlot {
            pc,
            slot: op.num,
            frame_size,
        }),
    }
}
