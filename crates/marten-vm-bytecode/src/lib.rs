//! # Marten VM Bytecode
//!
//! Instruction stream format for the Marten register-based JavaScript VM.
//!
//! ## Design Principles
//!
//! - **Register-based**: operands are signed register indices; parameters
//!   are negative, then locals, constants and temporaries
//! - **Fixed width**: every instruction word is one opcode or one operand
//! - **Indirect opcodes**: linked code stores tags resolved through an
//!   [`OpcodeTable`], which may be a seeded permutation
//! - **Absolute targets**: jumps and switch tables hold instruction offsets
//! - **Serializable**: [`CompiledUnit`] is the JSON hand-off from a
//!   bytecode generator

#![warn(clippy::all)]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod builder;
pub mod error;
pub mod exception;
pub mod instruction;
pub mod jump_table;
pub mod opcode;
pub mod operand;
pub mod unit;

pub use builder::{Arg, BytecodeBuilder, Label};
pub use error::{BytecodeError, Result};
pub use exception::{ExpressionRangeInfo, GetByIdExceptionInfo, HandlerInfo, LineInfo};
pub use instruction::{Instruction, Word};
pub use jump_table::{SimpleJumpTable, StringJumpTable};
pub use opcode::{OpcodeId, OpcodeTable, OperandKind};
pub use operand::{Register, RegisterKind};
pub use unit::{
    CodeType, CompiledUnit, ConstantValue, RegExpLiteral, Site, SiteCounts, SymbolEntry, UnitFlags,
};
