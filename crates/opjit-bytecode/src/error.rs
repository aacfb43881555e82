//! Bytecode errors

use thiserror::Error;

/// Errors raised while assembling an op array or its facts
#[derive(Debug, Error)]
pub enum BytecodeError {
    /// Invalid opcode byte
    #[error("Invalid opcode: {0}")]
    InvalidOpcode(u8),

    /// Jump target outside the instruction list
    #[error("Instruction {pc}: jump target {target} out of range ({len} instructions)")]
    InvalidJumpTarget {
        /// Instruction index of the jump
        pc: usize,
        /// Target instruction index
        target: u32,
        /// Number of instructions
        len: usize,
    },

    /// Operand slot beyond the frame
    #[error("Instruction {pc}: slot {slot} out of range (frame has {frame_size} slots)")]
    InvalidSlot {
        /// Instruction index
        pc: usize,
        /// Slot number
        slot: u32,
        /// Number of CV + temporary slots
        frame_size: u32,
    },

    /// Literal index beyond the literal table
    #[error("Instruction {pc}: literal {index} out of range")]
    InvalidLiteral {
        /// Instruction index
        pc: usize,
        /// Literal index
        index: u32,
    },

    /// `ASSIGN_DIM` / `ASSIGN_OBJ` without a following `OP_DATA`
    #[error("Instruction {pc}: {opcode} must be followed by OP_DATA")]
    MissingOpData {
        /// Instruction index
        pc: usize,
        /// Opcode name
        opcode: &'static str,
    },

    /// Try/catch entry pointing outside the function
    #[error("Try/catch entry {index} out of range")]
    InvalidTryCatch {
        /// Entry index
        index: usize,
    },

    /// Facts reference something that does not exist
    #[error("Inconsistent SSA facts: {0}")]
    InconsistentFacts(String),
}

/// Result type for bytecode operations
pub type Result<T> = std::result::Result<T, BytecodeError>;
