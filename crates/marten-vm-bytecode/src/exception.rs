//! Exception handler and source attribution records

use serde::{Deserialize, Serialize};

/// Exception handler covering the half-open range `[start, end)`.
///
/// Handler tables are ordered innermost first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerInfo {
    /// First covered instruction offset
    pub start: u32,
    /// One past the last covered offset
    pub end: u32,
    /// Offset execution resumes at
    pub target: u32,
    /// Local scope depth restored before resuming
    pub scope_depth: u32,
}

impl HandlerInfo {
    /// Whether `offset` falls inside the protected range
    #[inline]
    pub fn covers(&self, offset: u32) -> bool {
        self.start <= offset && offset < self.end
    }
}

/// Line number starting at an instruction offset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineInfo {
    /// First instruction attributed to `line`
    pub instruction_offset: u32,
    /// Source line
    pub line: u32,
}

/// Source range of the expression starting at an instruction offset.
///
/// `divot` is the source position of the operation relative to the code
/// block's source offset; `start_offset` and `end_offset` are distances from
/// the divot to the start and end of the whole expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpressionRangeInfo {
    /// Instruction offset
    pub instruction_offset: u32,
    /// Operation position
    pub divot: u32,
    /// Distance back to the expression start (7 bits)
    pub start_offset: u8,
    /// Distance forward to the expression end (7 bits)
    pub end_offset: u8,
}

impl ExpressionRangeInfo {
    /// Largest representable start/end offset
    pub const MAX_OFFSET: u32 = (1 << 7) - 1;
    /// Largest representable divot
    pub const MAX_DIVOT: u32 = (1 << 25) - 1;

    /// Build an entry, degrading out-of-range values.
    ///
    /// An overflowing divot drops the whole range (only the line survives),
    /// an overflowing start offset drops both offsets, and an overflowing end
    /// offset drops only the end.
    pub fn new(instruction_offset: u32, divot: u32, start_offset: u32, end_offset: u32) -> Self {
        let (divot, start_offset, end_offset) = if divot > Self::MAX_DIVOT {
            (0, 0, 0)
        } else if start_offset > Self::MAX_OFFSET {
            (divot, 0, 0)
        } else if end_offset > Self::MAX_OFFSET {
            (divot, start_offset, 0)
        } else {
            (divot, start_offset, end_offset)
        };
        Self {
            instruction_offset,
            divot,
            start_offset: start_offset as u8,
            end_offset: end_offset as u8,
        }
    }
}

/// Marks a `get_by_id` that fetches `prototype` for `construct` or
/// `instanceof`, so its failure can be described in those terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetByIdExceptionInfo {
    /// Offset of the `get_by_id`
    pub bytecode_offset: u32,
    /// `true` for `construct`, `false` for `instanceof`
    pub is_op_construct: bool,
}
