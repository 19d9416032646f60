//! Bytecode errors

use thiserror::Error;

/// Errors raised while loading, linking or validating bytecode
#[derive(Debug, Error)]
pub enum BytecodeError {
    /// A word at an instruction boundary is not an opcode
    #[error("Expected opcode at offset {0}")]
    ExpectedOpcode(usize),

    /// A linked opcode tag has no entry in the opcode table
    #[error("Invalid opcode tag: {0}")]
    InvalidOpcode(u32),

    /// An opcode was found where an operand was expected
    #[error("Expected operand {index} of `{opcode}` at offset {offset}")]
    ExpectedOperand {
        /// Offset of the instruction
        offset: usize,
        /// Mnemonic of the instruction
        opcode: &'static str,
        /// Operand position (0 based)
        index: usize,
    },

    /// The stream ended inside an instruction
    #[error("Unexpected end of bytecode in `{opcode}` at offset {offset}")]
    UnexpectedEnd {
        /// Offset of the truncated instruction
        offset: usize,
        /// Mnemonic of the truncated instruction
        opcode: &'static str,
    },

    /// A register operand falls outside the frame
    #[error("Register r{register} out of frame at offset {offset}")]
    RegisterOutOfFrame {
        /// Offset of the instruction
        offset: usize,
        /// Offending register index
        register: i32,
    },

    /// A table index operand falls outside its table
    #[error("{table} index {index} out of range at offset {offset}")]
    IndexOutOfRange {
        /// Offset of the instruction (or table entry)
        offset: usize,
        /// Name of the table
        table: &'static str,
        /// Offending index
        index: i64,
    },

    /// A jump target does not land on an instruction boundary
    #[error("Jump target {target} from offset {offset} is not an instruction boundary")]
    InvalidJumpTarget {
        /// Offset of the jumping instruction or table
        offset: usize,
        /// Offending target
        target: i64,
    },

    /// A register window (call arguments, array elements) leaves the frame
    #[error("`{opcode}` at offset {offset} reads {count} registers from r{first}, outside the frame")]
    InvalidRegisterWindow {
        /// Offset of the instruction
        offset: usize,
        /// Mnemonic of the instruction
        opcode: &'static str,
        /// First register of the window
        first: i32,
        /// Window length
        count: i32,
    },

    /// A malformed exception handler entry
    #[error("Invalid exception handler #{0}")]
    InvalidHandler(usize),

    /// Two instructions claim the same cache site
    #[error("{table} site {index} used twice (second use at offset {offset})")]
    DuplicateSite {
        /// Offset of the second use
        offset: usize,
        /// Name of the site table
        table: &'static str,
        /// Site index
        index: i32,
    },

    /// Frame layout counts are inconsistent
    #[error("Invalid frame layout: {0}")]
    InvalidLayout(String),

    /// A builder label was used but never bound
    #[error("Unbound label {0}")]
    UnboundLabel(u32),

    /// JSON (de)serialization failure
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error while reading a unit
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for bytecode operations
pub type Result<T> = std::result::Result<T, BytecodeError>;
