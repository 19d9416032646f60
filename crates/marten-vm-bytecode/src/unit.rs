//! Compiled units: the serializable output of a bytecode generator.
//!
//! A unit carries everything needed to link one code block: the symbolic
//! instruction stream, frame layout, literal tables, nested function units
//! and the exception/debug side tables.

use std::path::Path;

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::error::{BytecodeError, Result};
use crate::exception::{ExpressionRangeInfo, GetByIdExceptionInfo, HandlerInfo, LineInfo};
use crate::instruction::Word;
use crate::jump_table::{SimpleJumpTable, StringJumpTable};
use crate::opcode::{OpcodeId, OperandKind};

/// Kind of code a unit was generated from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeType {
    /// Top level program
    #[default]
    Global,
    /// Code passed to `eval`
    Eval,
    /// Function body
    Function,
}

/// Literal constant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ConstantValue {
    /// `undefined`
    Undefined,
    /// `null`
    Null,
    /// Boolean literal
    Boolean(bool),
    /// Integer literal that fits in 32 bits
    Int32(i32),
    /// Any other number
    Double(f64),
    /// String literal
    String(String),
}

/// Regular expression literal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegExpLiteral {
    /// Pattern source
    pub pattern: String,
    /// Flags (`g`, `i`, `m`)
    #[serde(default)]
    pub flags: String,
}

/// Name bound to a frame register
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolEntry {
    /// Variable or parameter name
    pub name: String,
    /// Register index
    pub register: i32,
    /// Whether assignments are ignored
    #[serde(default)]
    pub read_only: bool,
}

/// Code block feature flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnitFlags {
    /// Scope chain must be materialized on entry
    pub needs_full_scope_chain: bool,
    /// Body contains a direct `eval`
    pub uses_eval: bool,
    /// Body references `arguments`
    pub uses_arguments: bool,
    /// Function body is `return a - b` over its two parameters
    pub is_numeric_compare_function: bool,
}

/// Output of the bytecode generator for one function, program or eval
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompiledUnit {
    /// Function name, if any
    pub name: Option<String>,
    /// Kind of code
    pub code_type: CodeType,
    /// Source URL used in attribution
    pub source_url: String,
    /// First source line of the body
    pub first_line: u32,
    /// Last source line of the body
    pub last_line: u32,
    /// Offset of the body within its source
    pub source_offset: u32,
    /// Parameter count including `this`
    pub num_parameters: u32,
    /// Declared variable count
    pub num_vars: u32,
    /// Total registers of a frame above its base
    pub num_callee_registers: u32,
    /// Feature flags
    pub flags: UnitFlags,
    /// Symbolic instruction stream
    pub instructions: Vec<Word>,
    /// Interned property names
    pub identifiers: Vec<String>,
    /// Constant pool; entry `i` lives in register `num_vars + i`
    pub constants: Vec<ConstantValue>,
    /// Constants loaded with `unexpected_load`
    pub unexpected_constants: Vec<ConstantValue>,
    /// Regular expression literals
    pub regexps: Vec<RegExpLiteral>,
    /// Function declarations
    pub functions: Vec<CompiledUnit>,
    /// Function expressions
    pub function_expressions: Vec<CompiledUnit>,
    /// Named registers visible through an activation
    pub symbol_table: Vec<SymbolEntry>,
    /// Handler table, innermost first
    pub exception_handlers: Vec<HandlerInfo>,
    /// Line table, sorted by offset
    pub line_info: Vec<LineInfo>,
    /// Expression range table, sorted by offset
    pub expression_info: Vec<ExpressionRangeInfo>,
    /// `get_by_id` sites feeding `construct` or `instanceof`
    pub get_by_id_exception_info: Vec<GetByIdExceptionInfo>,
    /// `switch_imm` tables
    pub immediate_switch_jump_tables: Vec<SimpleJumpTable>,
    /// `switch_char` tables
    pub character_switch_jump_tables: Vec<SimpleJumpTable>,
    /// `switch_string` tables
    pub string_switch_jump_tables: Vec<StringJumpTable>,
}

/// Number of cache sites referenced by a unit's instructions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SiteCounts {
    /// Property access sites
    pub structure_stubs: usize,
    /// Global resolve sites
    pub global_resolves: usize,
    /// Call sites
    pub call_links: usize,
}

/// A cache site and the instruction that owns it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Site {
    /// Which table the site lives in
    pub kind: OperandKind,
    /// Index within that table
    pub index: usize,
    /// Offset of the owning instruction
    pub bytecode_offset: u32,
    /// The owning opcode
    pub opcode: OpcodeId,
}

impl CompiledUnit {
    /// Parse a unit from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read a unit from a JSON file
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Constant pool size
    #[inline]
    pub fn num_constants(&self) -> u32 {
        self.constants.len() as u32
    }

    /// Register holding `this`
    #[inline]
    pub fn this_register(&self) -> i32 {
        -(self.num_parameters as i32)
    }

    /// Number of instruction words
    #[inline]
    pub fn instruction_count(&self) -> usize {
        self.instructions.len()
    }

    /// Cache sites in instruction order
    pub fn sites(&self) -> Vec<Site> {
        let mut sites = Vec::new();
        for (offset, op) in crate::instruction::boundaries(&self.instructions) {
            for (i, kind) in op.operands().iter().enumerate() {
                if matches!(
                    kind,
                    OperandKind::StructureStub | OperandKind::GlobalResolve | OperandKind::CallLink
                ) {
                    if let Some(Word::Operand(index)) = self.instructions.get(offset + 1 + i) {
                        sites.push(Site {
                            kind: *kind,
                            index: *index as usize,
                            bytecode_offset: offset as u32,
                            opcode: op,
                        });
                    }
                }
            }
        }
        sites
    }

    /// Cache site table sizes implied by the instructions
    pub fn site_counts(&self) -> SiteCounts {
        let mut counts = SiteCounts::default();
        for site in self.sites() {
            let slot = match site.kind {
                OperandKind::StructureStub => &mut counts.structure_stubs,
                OperandKind::GlobalResolve => &mut counts.global_resolves,
                _ => &mut counts.call_links,
            };
            *slot = (*slot).max(site.index + 1);
        }
        counts
    }

    /// Check the unit and all nested units for structural consistency.
    ///
    /// After a unit passes, the linker and the backends treat any further
    /// inconsistency as a broken invariant.
    pub fn validate(&self) -> Result<()> {
        Validator::new(self).run()?;
        for function in self.functions.iter().chain(&self.function_expressions) {
            function.validate()?;
        }
        Ok(())
    }
}

struct Validator<'a> {
    unit: &'a CompiledUnit,
    boundaries: Vec<bool>,
}

impl<'a> Validator<'a> {
    fn new(unit: &'a CompiledUnit) -> Self {
        Self {
            unit,
            boundaries: vec![false; unit.instructions.len() + 1],
        }
    }

    fn run(mut self) -> Result<()> {
        let unit = self.unit;
        let num_constants = unit.num_constants();
        if unit.num_callee_registers < unit.num_vars + num_constants {
            return Err(BytecodeError::InvalidLayout(format!(
                "{} callee registers cannot hold {} vars and {} constants",
                unit.num_callee_registers, unit.num_vars, num_constants
            )));
        }
        if unit.code_type == CodeType::Function && unit.num_parameters == 0 {
            return Err(BytecodeError::InvalidLayout(
                "function code needs a `this` parameter".into(),
            ));
        }

        // Pass 1: boundaries and operand shape
        let words = &unit.instructions;
        let mut offset = 0;
        while offset < words.len() {
            let Word::Op(op) = words[offset] else {
                return Err(BytecodeError::ExpectedOpcode(offset));
            };
            self.boundaries[offset] = true;
            for index in 0..op.operands().len() {
                match words.get(offset + 1 + index) {
                    Some(Word::Operand(_)) => {}
                    Some(Word::Op(_)) => {
                        return Err(BytecodeError::ExpectedOperand {
                            offset,
                            opcode: op.name(),
                            index,
                        });
                    }
                    None => {
                        return Err(BytecodeError::UnexpectedEnd {
                            offset,
                            opcode: op.name(),
                        });
                    }
                }
            }
            offset += op.length();
        }
        // Falling off the end is allowed to land exactly on the end.
        self.boundaries[words.len()] = true;

        // Pass 2: operand values
        let mut seen: FxHashSet<(u8, i32)> = FxHashSet::default();
        for (offset, op) in crate::instruction::boundaries(words) {
            let operands: Vec<i32> = words[offset + 1..offset + op.length()]
                .iter()
                .map(|word| match word {
                    Word::Operand(value) => *value,
                    Word::Op(_) => unreachable!("operand shape checked in pass 1"),
                })
                .collect();
            for (i, kind) in op.operands().iter().enumerate() {
                let value = operands[i];
                self.check_operand(offset, *kind, value)?;
                let site_tag = match kind {
                    OperandKind::StructureStub => Some((0, "structure stub")),
                    OperandKind::GlobalResolve => Some((1, "global resolve")),
                    OperandKind::CallLink => Some((2, "call link")),
                    _ => None,
                };
                if let Some((tag, table)) = site_tag {
                    if !seen.insert((tag, value)) {
                        return Err(BytecodeError::DuplicateSite {
                            offset,
                            table,
                            index: value,
                        });
                    }
                }
            }
            self.check_window(offset, op, &operands)?;
        }

        self.check_tables()
    }

    fn check_operand(&self, offset: usize, kind: OperandKind, value: i32) -> Result<()> {
        let unit = self.unit;
        let index_in = |table: &'static str, len: usize| {
            if value < 0 || value as usize >= len {
                Err(BytecodeError::IndexOutOfRange {
                    offset,
                    table,
                    index: value as i64,
                })
            } else {
                Ok(())
            }
        };
        match kind {
            OperandKind::Register => {
                let low = -(unit.num_parameters as i32);
                if value < low || value >= unit.num_callee_registers as i32 {
                    return Err(BytecodeError::RegisterOutOfFrame {
                        offset,
                        register: value,
                    });
                }
                Ok(())
            }
            OperandKind::Identifier => index_in("identifier", unit.identifiers.len()),
            OperandKind::Function => index_in("function", unit.functions.len()),
            OperandKind::FunctionExpression => {
                index_in("function expression", unit.function_expressions.len())
            }
            OperandKind::RegExp => index_in("regexp", unit.regexps.len()),
            OperandKind::UnexpectedConstant => {
                index_in("unexpected constant", unit.unexpected_constants.len())
            }
            OperandKind::ImmediateTable => {
                index_in("immediate switch table", unit.immediate_switch_jump_tables.len())
            }
            OperandKind::CharacterTable => {
                index_in("character switch table", unit.character_switch_jump_tables.len())
            }
            OperandKind::StringTable => {
                index_in("string switch table", unit.string_switch_jump_tables.len())
            }
            OperandKind::StructureStub | OperandKind::GlobalResolve | OperandKind::CallLink => {
                index_in("site", i32::MAX as usize)
            }
            OperandKind::Target => self.check_target(offset, value as i64),
            OperandKind::Immediate => Ok(()),
        }
    }

    /// Register windows read by calls and `new_array` must stay inside the
    /// frame. A call window always holds `this`.
    fn check_window(&self, offset: usize, op: OpcodeId, operands: &[i32]) -> Result<()> {
        let (first, count, min_count) = match op {
            OpcodeId::NewArray => (operands[1], operands[2], 0),
            OpcodeId::Call | OpcodeId::CallEval => (operands[2], operands[3], 1),
            OpcodeId::Construct => (operands[3], operands[4], 1),
            _ => return Ok(()),
        };
        let end = i64::from(first) + i64::from(count);
        if count < min_count || end > self.unit.num_callee_registers as i64 {
            return Err(BytecodeError::InvalidRegisterWindow {
                offset,
                opcode: op.name(),
                first,
                count,
            });
        }
        Ok(())
    }

    fn check_target(&self, offset: usize, target: i64) -> Result<()> {
        let on_boundary = usize::try_from(target)
            .ok()
            .and_then(|t| self.boundaries.get(t).copied())
            .unwrap_or(false);
        if on_boundary && (target as usize) < self.unit.instructions.len() {
            Ok(())
        } else {
            Err(BytecodeError::InvalidJumpTarget { offset, target })
        }
    }

    fn check_tables(&self) -> Result<()> {
        let unit = self.unit;
        let len = unit.instructions.len() as u32;
        for (i, handler) in unit.exception_handlers.iter().enumerate() {
            if handler.start > handler.end || handler.end > len {
                return Err(BytecodeError::InvalidHandler(i));
            }
            self.check_target(i, handler.target as i64)
                .map_err(|_| BytecodeError::InvalidHandler(i))?;
        }
        for (i, table) in unit
            .immediate_switch_jump_tables
            .iter()
            .chain(&unit.character_switch_jump_tables)
            .enumerate()
        {
            for target in table.branches.iter().flatten() {
                self.check_target(i, *target as i64)?;
            }
        }
        for (i, table) in unit.string_switch_jump_tables.iter().enumerate() {
            for target in table.branches.values() {
                self.check_target(i, *target as i64)?;
            }
        }
        for symbol in &unit.symbol_table {
            if symbol.register < -(unit.num_parameters as i32)
                || symbol.register >= unit.num_vars as i32
            {
                return Err(BytecodeError::InvalidLayout(format!(
                    "symbol `{}` bound to r{} outside parameters and vars",
                    symbol.name, symbol.register
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_with(words: Vec<Word>) -> CompiledUnit {
        CompiledUnit {
            code_type: CodeType::Function,
            num_parameters: 1,
            num_vars: 1,
            num_callee_registers: 2,
            instructions: words,
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_unit() {
        let unit = unit_with(vec![
            OpcodeId::Enter.into(),
            OpcodeId::Mov.into(),
            0.into(),
            (-1).into(),
            OpcodeId::Ret.into(),
            0.into(),
        ]);
        unit.validate().unwrap();
    }

    #[test]
    fn test_truncated_instruction() {
        let unit = unit_with(vec![OpcodeId::Mov.into(), 0.into()]);
        assert!(matches!(
            unit.validate(),
            Err(BytecodeError::UnexpectedEnd { offset: 0, opcode: "mov" })
        ));
    }

    #[test]
    fn test_register_out_of_frame() {
        let unit = unit_with(vec![OpcodeId::Ret.into(), 7.into()]);
        assert!(matches!(
            unit.validate(),
            Err(BytecodeError::RegisterOutOfFrame { register: 7, .. })
        ));
        let unit = unit_with(vec![OpcodeId::Ret.into(), (-2).into()]);
        assert!(unit.validate().is_err());
    }

    #[test]
    fn test_jump_into_operand() {
        let unit = unit_with(vec![
            OpcodeId::Jmp.into(),
            3.into(),
            OpcodeId::Ret.into(),
            0.into(),
        ]);
        assert!(matches!(
            unit.validate(),
            Err(BytecodeError::InvalidJumpTarget { target: 3, .. })
        ));
    }

    #[test]
    fn test_bad_handler() {
        let mut unit = unit_with(vec![OpcodeId::Ret.into(), 0.into()]);
        unit.exception_handlers.push(HandlerInfo {
            start: 0,
            end: 2,
            target: 1,
            scope_depth: 0,
        });
        assert!(matches!(unit.validate(), Err(BytecodeError::InvalidHandler(0))));
    }

    #[test]
    fn test_site_counts_and_duplicates() {
        let mut unit = unit_with(vec![
            OpcodeId::GetById.into(),
            0.into(),
            0.into(),
            0.into(),
            2.into(),
            OpcodeId::Ret.into(),
            0.into(),
        ]);
        unit.identifiers.push("x".into());
        unit.validate().unwrap();
        assert_eq!(unit.site_counts().structure_stubs, 3);

        unit.instructions.truncate(5);
        unit.instructions
            .extend::<[Word; 5]>([OpcodeId::GetById.into(), 0.into(), 0.into(), 0.into(), 2.into()]);
        assert!(matches!(
            unit.validate(),
            Err(BytecodeError::DuplicateSite { offset: 5, .. })
        ));
    }

    #[test]
    fn test_json_defaults() {
        let unit = CompiledUnit::from_json(
            r#"{
                "num_parameters": 1,
                "num_callee_registers": 1,
                "constants": [{"type": "int32", "value": 5}],
                "instructions": ["end", 0]
            }"#,
        )
        .unwrap();
        assert_eq!(unit.code_type, CodeType::Global);
        assert_eq!(unit.constants[0], ConstantValue::Int32(5));
        assert_eq!(unit.this_register(), -1);
        unit.validate().unwrap();
    }
}
