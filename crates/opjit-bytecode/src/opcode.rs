//! Opcodes

use serde::{Deserialize, Serialize};

/// Bytecode opcodes.
///
/// Three-address instruction set over zval slots: most opcodes read `op1`
/// and `op2` and write `result`. Jump targets are instruction indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Opcode {
    // ==================== Misc ====================
    /// No operation
    Nop = 0x00,
    /// Statement boundary marker for debuggers
    ExtStmt = 0x01,
    /// Payload of the preceding two-slot opcode (`ASSIGN_DIM`, `ASSIGN_OBJ`)
    OpData = 0x02,
    /// Print `op1`
    Echo = 0x03,

    // ==================== Arithmetic ====================
    /// result = op1 + op2
    Add = 0x10,
    /// result = op1 - op2
    Sub = 0x11,
    /// result = op1 * op2
    Mul = 0x12,
    /// result = op1 / op2
    Div = 0x13,
    /// result = op1 % op2
    Mod = 0x14,
    /// result = op1 << op2
    Sl = 0x15,
    /// result = op1 >> op2
    Sr = 0x16,
    /// result = op1 . op2
    Concat = 0x17,
    /// result = op1 . op2 (string interpolation, never overloaded)
    FastConcat = 0x18,
    /// result = op1 | op2
    BwOr = 0x19,
    /// result = op1 & op2
    BwAnd = 0x1A,
    /// result = op1 ^ op2
    BwXor = 0x1B,
    /// result = ~op1
    BwNot = 0x1C,
    /// result = !op1
    BoolNot = 0x1D,
    /// result = op1 xor op2
    BoolXor = 0x1E,
    /// result = op1 ** op2
    Pow = 0x1F,

    // ==================== Comparison ====================
    /// result = op1 === op2
    IsIdentical = 0x20,
    /// result = op1 !== op2
    IsNotIdentical = 0x21,
    /// result = op1 == op2
    IsEqual = 0x22,
    /// result = op1 != op2
    IsNotEqual = 0x23,
    /// result = op1 < op2
    IsSmaller = 0x24,
    /// result = op1 <= op2
    IsSmallerOrEqual = 0x25,
    /// result = op1 == op2 for `switch` arms; op1 is not released
    Case = 0x26,
    /// result = (bool) op1
    Bool = 0x27,
    /// result = type of op1 is in the mask held by `extended_value`
    TypeCheck = 0x28,
    /// result = strlen(op1)
    Strlen = 0x29,

    // ==================== Assignment ====================
    /// op1 = op2; result = op1
    Assign = 0x30,
    /// op1 = &op2
    AssignRef = 0x31,
    /// op1 op= op2, the binary opcode is in `extended_value`
    AssignOp = 0x32,
    /// result = op1
    QmAssign = 0x33,
    /// ++op1
    PreInc = 0x34,
    /// --op1
    PreDec = 0x35,
    /// op1++
    PostInc = 0x36,
    /// op1--
    PostDec = 0x37,

    // ==================== Control flow ====================
    /// Jump to op1
    Jmp = 0x40,
    /// Jump to op2 when op1 is falsy
    Jmpz = 0x41,
    /// Jump to op2 when op1 is truthy
    Jmpnz = 0x42,
    /// Jump to op2 when op1 is falsy, else to `extended_value`
    Jmpznz = 0x43,
    /// Like `JMPZ`, also storing the boolean in result
    JmpzEx = 0x44,
    /// Like `JMPNZ`, also storing the boolean in result
    JmpnzEx = 0x45,
    /// Return op1 to the caller
    Return = 0x46,
    /// Release op1
    Free = 0x47,
    /// Throw op1
    Throw = 0x48,
    /// Enter the catch arm of op1's class; jump to op2 when it does not match
    Catch = 0x49,
    /// Dispatch the pending exception to the enclosing handler
    HandleException = 0x4A,
    /// Call a `finally` block
    FastCall = 0x4B,
    /// Return from a `finally` block
    FastRet = 0x4C,

    // ==================== Containers ====================
    /// result = op1\[op2\]
    FetchDimR = 0x50,
    /// result = op1\[op2\] without diagnostics
    FetchDimIs = 0x51,
    /// result = &op1\[op2\] for writing
    FetchDimW = 0x52,
    /// result = &op1\[op2\] for read-modify-write
    FetchDimRw = 0x53,
    /// result = &op1\[op2\] for unset
    FetchDimUnset = 0x54,
    /// op1\[op2\] = OP_DATA
    AssignDim = 0x55,
    /// result = isset(op1\[op2\]) / empty(op1\[op2\])
    IssetIsemptyDimObj = 0x56,
    /// result = \[op1 => op2\]
    InitArray = 0x57,
    /// result\[op2\] = op1
    AddArrayElement = 0x58,
    /// result = op1->op2
    FetchObjR = 0x59,
    /// result = op1->op2 without diagnostics
    FetchObjIs = 0x5A,
    /// result = &op1->op2
    FetchObjW = 0x5B,
    /// op1->op2 = OP_DATA
    AssignObj = 0x5C,
    /// result = isset(op1->op2) / empty(op1->op2)
    IssetIsemptyPropObj = 0x5D,
    /// result = isset(op1) / empty(op1)
    IssetIsemptyCv = 0x5E,
    /// result = $this
    FetchThis = 0x5F,

    // ==================== Calls ====================
    /// Open a call frame for the function named by op2
    InitFcall = 0x70,
    /// Open a call frame, resolving op2 by name at runtime
    InitFcallByName = 0x71,
    /// Open a call frame for method op2 on object op1
    InitMethodCall = 0x72,
    /// Instantiate class op1; jump to op2 when there is no constructor
    New = 0x73,
    /// Pass a temporary or literal by value
    SendVal = 0x74,
    /// Pass a temporary or literal, checking the callee accepts it by value
    SendValEx = 0x75,
    /// Pass a variable by value
    SendVar = 0x76,
    /// Pass a variable, letting the callee decide value or reference
    SendVarEx = 0x77,
    /// Pass a variable by reference
    SendRef = 0x78,
    /// Pass a function result that must not be turned into a reference
    SendVarNoRef = 0x79,
    /// Invoke the open call frame
    DoFcall = 0x7A,
    /// Invoke an internal function
    DoIcall = 0x7B,
    /// Invoke a user function
    DoUcall = 0x7C,
    /// Invoke a call frame opened by `INIT_FCALL_BY_NAME`
    DoFcallByName = 0x7D,
    /// Bind parameter op1.num into result
    Recv = 0x7E,
    /// Bind parameter op1.num into result, defaulting to literal op2
    RecvInit = 0x7F,
    /// Collect the remaining arguments into result
    RecvVariadic = 0x80,

    // ==================== Generators ====================
    /// Turn the current frame into a generator
    GeneratorCreate = 0x90,
    /// Suspend a generator
    Yield = 0x91,
    /// Finish a generator
    GeneratorReturn = 0x92,

    // ==================== Lookups ====================
    /// result = constant named by op2
    FetchConstant = 0xA0,
    /// result = class named by op2
    FetchClass = 0xA1,
}

impl Opcode {
    /// Decode an opcode byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        let op = match byte {
            0x00 => Self::Nop,
            0x01 => Self::ExtStmt,
            0x02 => Self::OpData,
            0x03 => Self::Echo,

            0x10 => Self::Add,
            0x11 => Self::Sub,
            0x12 => Self::Mul,
            0x13 => Self::Div,
            0x14 => Self::Mod,
            0x15 => Self::Sl,
            0x16 => Self::Sr,
            0x17 => Self::Concat,
            0x18 => Self::FastConcat,
            0x19 => Self::BwOr,
            0x1A => Self::BwAnd,
            0x1B => Self::BwXor,
            0x1C => Self::BwNot,
            0x1D => Self::BoolNot,
            0x1E => Self::BoolXor,
            0x1F => Self::Pow,

            0x20 => Self::IsIdentical,
            0x21 => Self::IsNotIdentical,
            0x22 => Self::IsEqual,
            0x23 => Self::IsNotEqual,
            0x24 => Self::IsSmaller,
            0x25 => Self::IsSmallerOrEqual,
            0x26 => Self::Case,
            0x27 => Self::Bool,
            0x28 => Self::TypeCheck,
            0x29 => Self::Strlen,

            0x30 => Self::Assign,
            0x31 => Self::AssignRef,
            0x32 => Self::AssignOp,
            0x33 => Self::QmAssign,
            0x34 => Self::PreInc,
            0x35 => Self::PreDec,
            0x36 => Self::PostInc,
            0x37 => Self::PostDec,

            0x40 => Self::Jmp,
            0x41 => Self::Jmpz,
            0x42 => Self::Jmpnz,
            0x43 => Self::Jmpznz,
            0x44 => Self::JmpzEx,
            0x45 => Self::JmpnzEx,
            0x46 => Self::Return,
            0x47 => Self::Free,
            0x48 => Self::Throw,
            0x49 => Self::Catch,
            0x4A => Self::HandleException,
            0x4B => Self::FastCall,
            0x4C => Self::FastRet,

            0x50 => Self::FetchDimR,
            0x51 => Self::FetchDimIs,
            0x52 => Self::FetchDimW,
            0x53 => Self::FetchDimRw,
            0x54 => Self::FetchDimUnset,
            0x55 => Self::AssignDim,
            0x56 => Self::IssetIsemptyDimObj,
            0x57 => Self::InitArray,
            0x58 => Self::AddArrayElement,
            0x59 => Self::FetchObjR,
            0x5A => Self::FetchObjIs,
            0x5B => Self::FetchObjW,
            0x5C => Self::AssignObj,
            0x5D => Self::IssetIsemptyPropObj,
            0x5E => Self::IssetIsemptyCv,
            0x5F => Self::FetchThis,

            0x70 => Self::InitFcall,
            0x71 => Self::InitFcallByName,
            0x72 => Self::InitMethodCall,
            0x73 => Self::New,
            0x74 => Self::SendVal,
            0x75 => Self::SendValEx,
            0x76 => Self::SendVar,
            0x77 => Self::SendVarEx,
            0x78 => Self::SendRef,
            0x79 => Self::SendVarNoRef,
            0x7A => Self::DoFcall,
            0x7B => Self::DoIcall,
            0x7C => Self::DoUcall,
            0x7D => Self::DoFcallByName,
            0x7E => Self::Recv,
            0x7F => Self::RecvInit,
            0x80 => Self::RecvVariadic,

            0x90 => Self::GeneratorCreate,
            0x91 => Self::Yield,
            0x92 => Self::GeneratorReturn,

            0xA0 => Self::FetchConstant,
            0xA1 => Self::FetchClass,
            _ => return None,
        };
        Some(op)
    }

    /// Encode as a byte.
    #[inline]
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// Get the name of this opcode
    pub const fn name(self) -> &'static str {
        match self {
            Self::Nop => "NOP",
            Self::ExtStmt => "EXT_STMT",
            Self::OpData => "OP_DATA",
            Self::Echo => "ECHO",
            Self::Add => "ADD",
            Self::Sub => "SUB",
            Self::Mul => "MUL",
            Self::Div => "DIV",
            Self::Mod => "MOD",
            Self::Sl => "SL",
            Self::Sr => "SR",
            Self::Concat => "CONCAT",
            Self::FastConcat => "FAST_CONCAT",
            Self::BwOr => "BW_OR",
            Self::BwAnd => "BW_AND",
            Self::BwXor => "BW_XOR",
            Self::BwNot => "BW_NOT",
            Self::BoolNot => "BOOL_NOT",
            Self::BoolXor => "BOOL_XOR",
            Self::Pow => "POW",
            Self::IsIdentical => "IS_IDENTICAL",
            Self::IsNotIdentical => "IS_NOT_IDENTICAL",
            Self::IsEqual => "IS_EQUAL",
            Self::IsNotEqual => "IS_NOT_EQUAL",
            Self::IsSmaller => "IS_SMALLER",
            Self::IsSmallerOrEqual => "IS_SMALLER_OR_EQUAL",
            Self::Case => "CASE",
            Self::Bool => "BOOL",
            Self::TypeCheck => "TYPE_CHECK",
            Self::Strlen => "STRLEN",
            Self::Assign => "ASSIGN",
            Self::AssignRef => "ASSIGN_REF",
            Self::AssignOp => "ASSIGN_OP",
            Self::QmAssign => "QM_ASSIGN",
            Self::PreInc => "PRE_INC",
            Self::PreDec => "PRE_DEC",
            Self::PostInc => "POST_INC",
            Self::PostDec => "POST_DEC",
            Self::Jmp => "JMP",
            Self::Jmpz => "JMPZ",
            Self::Jmpnz => "JMPNZ",
            Self::Jmpznz => "JMPZNZ",
            Self::JmpzEx => "JMPZ_EX",
            Self::JmpnzEx => "JMPNZ_EX",
            Self::Return => "RETURN",
            Self::Free => "FREE",
            Self::Throw => "THROW",
            Self::Catch => "CATCH",
            Self::HandleException => "HANDLE_EXCEPTION",
            Self::FastCall => "FAST_CALL",
            Self::FastRet => "FAST_RET",
            Self::FetchDimR => "FETCH_DIM_R",
            Self::FetchDimIs => "FETCH_DIM_IS",
            Self::FetchDimW => "FETCH_DIM_W",
            Self::FetchDimRw => "FETCH_DIM_RW",
            Self::FetchDimUnset => "FETCH_DIM_UNSET",
            Self::AssignDim => "ASSIGN_DIM",
            Self::IssetIsemptyDimObj => "ISSET_ISEMPTY_DIM_OBJ",
            Self::InitArray => "INIT_ARRAY",
            Self::AddArrayElement => "ADD_ARRAY_ELEMENT",
            Self::FetchObjR => "FETCH_OBJ_R",
            Self::FetchObjIs => "FETCH_OBJ_IS",
            Self::FetchObjW => "FETCH_OBJ_W",
            Self::AssignObj => "ASSIGN_OBJ",
            Self::IssetIsemptyPropObj => "ISSET_ISEMPTY_PROP_OBJ",
            Self::IssetIsemptyCv => "ISSET_ISEMPTY_CV",
            Self::FetchThis => "FETCH_THIS",
            Self::InitFcall => "INIT_FCALL",
            Self::InitFcallByName => "INIT_FCALL_BY_NAME",
            Self::InitMethodCall => "INIT_METHOD_CALL",
            Self::New => "NEW",
            Self::SendVal => "SEND_VAL",
            Self::SendValEx => "SEND_VAL_EX",
            Self::SendVar => "SEND_VAR",
            Self::SendVarEx => "SEND_VAR_EX",
            Self::SendRef => "SEND_REF",
            Self::SendVarNoRef => "SEND_VAR_NO_REF",
            Self::DoFcall => "DO_FCALL",
            Self::DoIcall => "DO_ICALL",
            Self::DoUcall => "DO_UCALL",
            Self::DoFcallByName => "DO_FCALL_BY_NAME",
            Self::Recv => "RECV",
            Self::RecvInit => "RECV_INIT",
            Self::RecvVariadic => "RECV_VARIADIC",
            Self::GeneratorCreate => "GENERATOR_CREATE",
            Self::Yield => "YIELD",
            Self::GeneratorReturn => "GENERATOR_RETURN",
            Self::FetchConstant => "FETCH_CONSTANT",
            Self::FetchClass => "FETCH_CLASS",
        }
    }

    /// Opcodes that end a basic block with no fallthrough.
    pub const fn is_terminator(self) -> bool {
        matches!(
            self,
            Self::Jmp
                | Self::Jmpznz
                | Self::Return
                | Self::Throw
                | Self::HandleException
                | Self::FastRet
                | Self::GeneratorReturn
        )
    }

    /// Opcodes with an explicit jump target.
    pub const fn is_jump(self) -> bool {
        matches!(
            self,
            Self::Jmp
                | Self::Jmpz
                | Self::Jmpnz
                | Self::Jmpznz
                | Self::JmpzEx
                | Self::JmpnzEx
                | Self::Catch
                | Self::New
                | Self::FastCall
        )
    }

    /// Conditional branches that test the truthiness of op1.
    pub const fn is_truth_branch(self) -> bool {
        matches!(
            self,
            Self::Jmpz | Self::Jmpnz | Self::Jmpznz | Self::JmpzEx | Self::JmpnzEx
        )
    }

    /// Opcodes followed by an `OP_DATA` carrying the assigned value.
    pub const fn has_op_data(self) -> bool {
        matches!(self, Self::AssignDim | Self::AssignObj)
    }

    /// Opcodes that open a call frame.
    pub const fn is_init_call(self) -> bool {
        matches!(
            self,
            Self::InitFcall | Self::InitFcallByName | Self::InitMethodCall | Self::New
        )
    }

    /// Opcodes that invoke the most recently opened call frame.
    pub const fn is_do_call(self) -> bool {
        matches!(
            self,
            Self::DoFcall | Self::DoIcall | Self::DoUcall | Self::DoFcallByName
        )
    }

    /// Opcodes that pass one argument into the open call frame.
    pub const fn is_send(self) -> bool {
        matches!(
            self,
            Self::SendVal
                | Self::SendValEx
                | Self::SendVar
                | Self::SendVarEx
                | Self::SendRef
                | Self::SendVarNoRef
        )
    }

    /// Binary operators valid as the `extended_value` of `ASSIGN_OP`.
    pub const fn is_compound_assignable(self) -> bool {
        matches!(
            self,
            Self::Add
                | Self::Sub
                | Self::Mul
                | Self::Div
                | Self::Mod
                | Self::Sl
                | Self::Sr
                | Self::Concat
                | Self::BwOr
                | Self::BwAnd
                | Self::BwXor
                | Self::Pow
        )
    }
}
