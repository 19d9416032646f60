//! Lazily materialized source attribution tables.
//!
//! Code blocks may drop these tables to save memory and rebuild them from
//! their owner node the first time an exception needs them.

use marten_vm_bytecode::{
    CompiledUnit, ExpressionRangeInfo, GetByIdExceptionInfo, LineInfo,
};

/// Source range of the expression at an instruction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpressionRange {
    /// Operation position, including the code block's source offset
    pub divot: u32,
    /// Distance back from the divot to the expression start
    pub start_offset: u32,
    /// Distance forward from the divot to the expression end
    pub end_offset: u32,
}

/// Line, expression range and `get_by_id` failure tables
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExceptionInfo {
    /// Sorted by instruction offset; lines never decrease
    pub line_info: Vec<LineInfo>,
    /// Sorted by instruction offset
    pub expression_info: Vec<ExpressionRangeInfo>,
    /// Sorted by bytecode offset
    pub get_by_id_exception_info: Vec<GetByIdExceptionInfo>,
}

impl ExceptionInfo {
    /// Tables carried by a compiled unit
    pub fn from_unit(unit: &CompiledUnit) -> Self {
        Self {
            line_info: unit.line_info.clone(),
            expression_info: unit.expression_info.clone(),
            get_by_id_exception_info: unit.get_by_id_exception_info.clone(),
        }
    }

    /// Line for `offset`: the entry with the greatest offset not above it,
    /// or `first_line` before the first entry
    pub fn line_for(&self, offset: u32, first_line: u32) -> u32 {
        let index = self
            .line_info
            .partition_point(|info| info.instruction_offset <= offset);
        if index == 0 {
            first_line
        } else {
            self.line_info[index - 1].line
        }
    }

    /// Expression range for `offset`, relative to the code block's source.
    ///
    /// `None` before the first entry.
    pub fn expression_range_for(&self, offset: u32) -> Option<ExpressionRange> {
        let index = self
            .expression_info
            .partition_point(|info| info.instruction_offset <= offset);
        let info = self.expression_info.get(index.checked_sub(1)?)?;
        Some(ExpressionRange {
            divot: info.divot,
            start_offset: info.start_offset as u32,
            end_offset: info.end_offset as u32,
        })
    }

    /// Entry recorded for exactly `offset`
    pub fn get_by_id_for(&self, offset: u32) -> Option<GetByIdExceptionInfo> {
        self.get_by_id_exception_info
            .binary_search_by_key(&offset, |info| info.bytecode_offset)
            .ok()
            .map(|index| self.get_by_id_exception_info[index])
    }

    /// Release excess capacity
    pub fn shrink_to_fit(&mut self) {
        self.line_info.shrink_to_fit();
        self.expression_info.shrink_to_fit();
        self.get_by_id_exception_info.shrink_to_fit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(entries: &[(u32, u32)]) -> ExceptionInfo {
        ExceptionInfo {
            line_info: entries
                .iter()
                .map(|&(instruction_offset, line)| LineInfo {
                    instruction_offset,
                    line,
                })
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_line_lookup() {
        let info = lines(&[(2, 10), (8, 11), (20, 14)]);
        assert_eq!(info.line_for(0, 9), 9);
        assert_eq!(info.line_for(2, 9), 10);
        assert_eq!(info.line_for(7, 9), 10);
        assert_eq!(info.line_for(8, 9), 11);
        assert_eq!(info.line_for(500, 9), 14);
        assert_eq!(lines(&[]).line_for(3, 5), 5);
    }

    #[test]
    fn test_expression_range_lookup() {
        let info = ExceptionInfo {
            expression_info: vec![
                ExpressionRangeInfo::new(4, 30, 3, 5),
                ExpressionRangeInfo::new(9, 60, 1, 2),
            ],
            ..Default::default()
        };
        assert_eq!(info.expression_range_for(3), None);
        assert_eq!(
            info.expression_range_for(5),
            Some(ExpressionRange {
                divot: 30,
                start_offset: 3,
                end_offset: 5
            })
        );
        assert_eq!(info.expression_range_for(9).unwrap().divot, 60);
    }

    #[test]
    fn test_get_by_id_exact_match() {
        let info = ExceptionInfo {
            get_by_id_exception_info: vec![
                GetByIdExceptionInfo {
                    bytecode_offset: 3,
                    is_op_construct: true,
                },
                GetByIdExceptionInfo {
                    bytecode_offset: 11,
                    is_op_construct: false,
                },
            ],
            ..Default::default()
        };
        assert!(info.get_by_id_for(3).unwrap().is_op_construct);
        assert!(!info.get_by_id_for(11).unwrap().is_op_construct);
        assert!(info.get_by_id_for(4).is_none());
    }
}
