//! Assembler-style builder for compiled units.
//!
//! Stands in for a bytecode generator in tools, tests and benchmarks:
//! instructions are appended in order, jumps refer to [`Label`]s that are
//! patched to absolute offsets by [`BytecodeBuilder::finish`].

use rustc_hash::FxHashMap;

use crate::error::{BytecodeError, Result};
use crate::exception::{ExpressionRangeInfo, GetByIdExceptionInfo, HandlerInfo, LineInfo};
use crate::instruction::Word;
use crate::jump_table::{SimpleJumpTable, StringJumpTable};
use crate::opcode::{OpcodeId, OperandKind};
use crate::operand::Register;
use crate::unit::{CodeType, CompiledUnit, ConstantValue, RegExpLiteral, SymbolEntry, UnitFlags};

/// Forward or backward jump destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(u32);

/// Operand passed to [`BytecodeBuilder::emit`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arg {
    /// Literal operand value
    Value(i32),
    /// Jump target resolved at finish
    Label(Label),
}

impl From<i32> for Arg {
    fn from(value: i32) -> Self {
        Arg::Value(value)
    }
}

impl From<Register> for Arg {
    fn from(register: Register) -> Self {
        Arg::Value(register.index())
    }
}

impl From<Label> for Arg {
    fn from(label: Label) -> Self {
        Arg::Label(label)
    }
}

struct PendingHandler {
    start: Label,
    end: Label,
    target: Label,
    scope_depth: u32,
}

enum PendingTable {
    Simple {
        character: bool,
        min: i32,
        cases: Vec<(i32, Label)>,
    },
    String(Vec<(String, Label)>),
}

/// Incremental builder for a [`CompiledUnit`]
pub struct BytecodeBuilder {
    unit: CompiledUnit,
    labels: Vec<Option<u32>>,
    fixups: Vec<(usize, Label)>,
    handlers: Vec<PendingHandler>,
    tables: Vec<PendingTable>,
    identifier_ids: FxHashMap<String, i32>,
    register_high_water: u32,
    next_stub: i32,
    next_global: i32,
    next_link: i32,
}

impl BytecodeBuilder {
    /// Start a unit of `code_type` with `num_parameters` (including `this`)
    /// and `num_vars` declared variables
    pub fn new(code_type: CodeType, num_parameters: u32, num_vars: u32) -> Self {
        Self {
            unit: CompiledUnit {
                code_type,
                num_parameters,
                num_vars,
                first_line: 1,
                last_line: 1,
                ..Default::default()
            },
            labels: Vec::new(),
            fixups: Vec::new(),
            handlers: Vec::new(),
            tables: Vec::new(),
            identifier_ids: FxHashMap::default(),
            register_high_water: num_vars,
            next_stub: 0,
            next_global: 0,
            next_link: 0,
        }
    }

    /// Start a global program unit
    pub fn program(num_vars: u32) -> Self {
        Self::new(CodeType::Global, 1, num_vars)
    }

    /// Start a function unit with `arity` declared parameters
    pub fn function(name: &str, arity: u32, num_vars: u32) -> Self {
        let mut builder = Self::new(CodeType::Function, arity + 1, num_vars);
        builder.unit.name = Some(name.to_string());
        builder
    }

    /// Set source attribution
    pub fn source(&mut self, url: &str, first_line: u32, last_line: u32) -> &mut Self {
        self.unit.source_url = url.to_string();
        self.unit.first_line = first_line;
        self.unit.last_line = last_line;
        self
    }

    /// Set the source offset of the body
    pub fn source_offset(&mut self, offset: u32) -> &mut Self {
        self.unit.source_offset = offset;
        self
    }

    /// Replace the feature flags
    pub fn flags(&mut self, flags: UnitFlags) -> &mut Self {
        self.unit.flags = flags;
        self
    }

    /// Current instruction offset
    #[inline]
    pub fn offset(&self) -> u32 {
        self.unit.instructions.len() as u32
    }

    // ==================== Registers & tables ====================

    /// Register of parameter `n` (0 is `this`)
    pub fn parameter(&self, n: u32) -> Register {
        Register::parameter(n, self.unit.num_parameters)
    }

    /// Register of `this`
    pub fn this(&self) -> Register {
        self.parameter(0)
    }

    /// Register of local variable `n`
    pub fn local(&self, n: u32) -> Register {
        Register::new(n as i32)
    }

    /// Add a constant and return its register
    pub fn constant(&mut self, value: ConstantValue) -> Register {
        let index = self.unit.constants.len() as u32;
        self.unit.constants.push(value);
        let register = Register::constant(index, self.unit.num_vars);
        self.touch(register.index() + 1);
        register
    }

    /// Temporary `n`. Only stable once every constant has been added.
    pub fn temporary(&mut self, n: u32) -> Register {
        let register = Register::new((self.unit.num_vars + self.unit.num_constants() + n) as i32);
        self.touch(register.index() + 1);
        register
    }

    /// Intern an identifier
    pub fn identifier(&mut self, name: &str) -> i32 {
        if let Some(id) = self.identifier_ids.get(name) {
            return *id;
        }
        let id = self.unit.identifiers.len() as i32;
        self.unit.identifiers.push(name.to_string());
        self.identifier_ids.insert(name.to_string(), id);
        id
    }

    /// Add an unexpected constant
    pub fn unexpected_constant(&mut self, value: ConstantValue) -> i32 {
        self.unit.unexpected_constants.push(value);
        self.unit.unexpected_constants.len() as i32 - 1
    }

    /// Add a regular expression literal
    pub fn regexp(&mut self, pattern: &str, flags: &str) -> i32 {
        self.unit.regexps.push(RegExpLiteral {
            pattern: pattern.to_string(),
            flags: flags.to_string(),
        });
        self.unit.regexps.len() as i32 - 1
    }

    /// Add a function declaration
    pub fn function_declaration(&mut self, unit: CompiledUnit) -> i32 {
        self.unit.functions.push(unit);
        self.unit.functions.len() as i32 - 1
    }

    /// Add a function expression
    pub fn function_expression(&mut self, unit: CompiledUnit) -> i32 {
        self.unit.function_expressions.push(unit);
        self.unit.function_expressions.len() as i32 - 1
    }

    /// Bind a name to a parameter or variable register
    pub fn symbol(&mut self, name: &str, register: Register) -> &mut Self {
        self.unit.symbol_table.push(SymbolEntry {
            name: name.to_string(),
            register: register.index(),
            read_only: false,
        });
        self
    }

    // ==================== Labels & side tables ====================

    /// Create an unbound label
    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() as u32 - 1)
    }

    /// Bind `label` to the current offset
    pub fn bind(&mut self, label: Label) -> &mut Self {
        self.labels[label.0 as usize] = Some(self.offset());
        self
    }

    /// Create a label bound to the current offset
    pub fn here(&mut self) -> Label {
        let label = self.new_label();
        self.bind(label);
        label
    }

    /// Register a handler for `[start, end)`
    pub fn handler(&mut self, start: Label, end: Label, target: Label, scope_depth: u32) -> &mut Self {
        self.handlers.push(PendingHandler {
            start,
            end,
            target,
            scope_depth,
        });
        self
    }

    /// Attribute the next instruction to `line`
    pub fn line(&mut self, line: u32) -> &mut Self {
        let instruction_offset = self.offset();
        self.unit.line_info.push(LineInfo {
            instruction_offset,
            line,
        });
        self
    }

    /// Attribute the next instruction to an expression range
    pub fn expression(&mut self, divot: u32, start_offset: u32, end_offset: u32) -> &mut Self {
        let offset = self.offset();
        self.unit
            .expression_info
            .push(ExpressionRangeInfo::new(offset, divot, start_offset, end_offset));
        self
    }

    /// Mark the next `get_by_id` as a `prototype` fetch for construct or instanceof
    pub fn get_by_id_exception(&mut self, is_op_construct: bool) -> &mut Self {
        let bytecode_offset = self.offset();
        self.unit.get_by_id_exception_info.push(GetByIdExceptionInfo {
            bytecode_offset,
            is_op_construct,
        });
        self
    }

    // ==================== Emission ====================

    /// Append an instruction; returns its offset.
    ///
    /// # Panics
    ///
    /// Panics if `args` does not match the opcode's operand count.
    pub fn emit(&mut self, op: OpcodeId, args: &[Arg]) -> u32 {
        assert_eq!(
            args.len(),
            op.operands().len(),
            "`{}` takes {} operands",
            op.name(),
            op.operands().len()
        );
        let offset = self.offset();
        self.unit.instructions.push(Word::Op(op));
        for (kind, arg) in op.operands().iter().zip(args) {
            match *arg {
                Arg::Value(value) => {
                    if *kind == OperandKind::Register && value >= 0 {
                        self.touch(value + 1);
                    }
                    self.unit.instructions.push(Word::Operand(value));
                }
                Arg::Label(label) => {
                    self.fixups.push((self.unit.instructions.len(), label));
                    self.unit.instructions.push(Word::Operand(-1));
                }
            }
        }
        offset
    }

    /// `enter`
    pub fn enter(&mut self) -> u32 {
        self.emit(OpcodeId::Enter, &[])
    }

    /// `mov dst, src`
    pub fn mov(&mut self, dst: Register, src: Register) -> u32 {
        self.emit(OpcodeId::Mov, &[dst.into(), src.into()])
    }

    /// Any three-register instruction (`add`, `less`, `stricteq`, ...)
    pub fn binary(&mut self, op: OpcodeId, dst: Register, lhs: Register, rhs: Register) -> u32 {
        self.emit(op, &[dst.into(), lhs.into(), rhs.into()])
    }

    /// `ret value`
    pub fn ret(&mut self, value: Register) -> u32 {
        self.emit(OpcodeId::Ret, &[value.into()])
    }

    /// `end value`
    pub fn end(&mut self, value: Register) -> u32 {
        self.emit(OpcodeId::End, &[value.into()])
    }

    /// `jmp target`
    pub fn jmp(&mut self, target: Label) -> u32 {
        self.emit(OpcodeId::Jmp, &[target.into()])
    }

    /// `new_object dst`
    pub fn new_object(&mut self, dst: Register) -> u32 {
        self.emit(OpcodeId::NewObject, &[dst.into()])
    }

    /// `get_by_id dst, base, name` with a fresh cache site
    pub fn get_by_id(&mut self, dst: Register, base: Register, name: &str) -> u32 {
        let ident = self.identifier(name);
        let stub = self.next_stub;
        self.next_stub += 1;
        self.emit(
            OpcodeId::GetById,
            &[dst.into(), base.into(), ident.into(), stub.into()],
        )
    }

    /// `put_by_id base, name, value` with a fresh cache site
    pub fn put_by_id(&mut self, base: Register, name: &str, value: Register) -> u32 {
        let ident = self.identifier(name);
        let stub = self.next_stub;
        self.next_stub += 1;
        self.emit(
            OpcodeId::PutById,
            &[base.into(), ident.into(), value.into(), stub.into()],
        )
    }

    /// `resolve_global dst, name` with a fresh cache site
    pub fn resolve_global(&mut self, dst: Register, name: &str) -> u32 {
        let ident = self.identifier(name);
        let site = self.next_global;
        self.next_global += 1;
        self.emit(OpcodeId::ResolveGlobal, &[dst.into(), ident.into(), site.into()])
    }

    /// `resolve dst, name`
    pub fn resolve(&mut self, dst: Register, name: &str) -> u32 {
        let ident = self.identifier(name);
        self.emit(OpcodeId::Resolve, &[dst.into(), ident.into()])
    }

    /// `call dst, func, first, argc`. `first` holds `this`, arguments follow
    /// it, `argc` counts `this`.
    pub fn call(&mut self, dst: Register, func: Register, first: Register, argc: u32) -> u32 {
        self.call_like(OpcodeId::Call, dst, func, first, argc)
    }

    /// `call_eval dst, func, first, argc`
    pub fn call_eval(&mut self, dst: Register, func: Register, first: Register, argc: u32) -> u32 {
        self.call_like(OpcodeId::CallEval, dst, func, first, argc)
    }

    fn call_like(&mut self, op: OpcodeId, dst: Register, func: Register, first: Register, argc: u32) -> u32 {
        let link = self.next_link;
        self.next_link += 1;
        self.touch(first.index() + argc as i32);
        self.emit(
            op,
            &[dst.into(), func.into(), first.into(), (argc as i32).into(), link.into()],
        )
    }

    /// `construct dst, func, proto, first, argc`
    pub fn construct(
        &mut self,
        dst: Register,
        func: Register,
        proto: Register,
        first: Register,
        argc: u32,
    ) -> u32 {
        let link = self.next_link;
        self.next_link += 1;
        self.touch(first.index() + argc as i32);
        self.emit(
            OpcodeId::Construct,
            &[
                dst.into(),
                func.into(),
                proto.into(),
                first.into(),
                (argc as i32).into(),
                link.into(),
            ],
        )
    }

    /// `throw value`
    pub fn throw(&mut self, value: Register) -> u32 {
        self.emit(OpcodeId::Throw, &[value.into()])
    }

    /// `catch dst`
    pub fn catch(&mut self, dst: Register) -> u32 {
        self.emit(OpcodeId::Catch, &[dst.into()])
    }

    /// `push_scope object`
    pub fn push_scope(&mut self, object: Register) -> u32 {
        self.emit(OpcodeId::PushScope, &[object.into()])
    }

    /// `pop_scope`
    pub fn pop_scope(&mut self) -> u32 {
        self.emit(OpcodeId::PopScope, &[])
    }

    /// `switch_imm` over `cases`
    pub fn switch_imm(&mut self, scrutinee: Register, cases: &[(i32, Label)], default: Label) -> u32 {
        self.simple_switch(false, scrutinee, cases, default)
    }

    /// `switch_char` over single-character `cases`
    pub fn switch_char(&mut self, scrutinee: Register, cases: &[(char, Label)], default: Label) -> u32 {
        let cases: Vec<_> = cases.iter().map(|(c, l)| (*c as i32, *l)).collect();
        self.simple_switch(true, scrutinee, &cases, default)
    }

    fn simple_switch(
        &mut self,
        character: bool,
        scrutinee: Register,
        cases: &[(i32, Label)],
        default: Label,
    ) -> u32 {
        let min = cases.iter().map(|(k, _)| *k).min().unwrap_or(0);
        let index = self
            .tables
            .iter()
            .filter(|t| matches!(t, PendingTable::Simple { character: c, .. } if *c == character))
            .count() as i32;
        self.tables.push(PendingTable::Simple {
            character,
            min,
            cases: cases.to_vec(),
        });
        let op = if character {
            OpcodeId::SwitchChar
        } else {
            OpcodeId::SwitchImm
        };
        self.emit(op, &[index.into(), default.into(), scrutinee.into()])
    }

    /// `switch_string` over `cases`
    pub fn switch_string(&mut self, scrutinee: Register, cases: &[(&str, Label)], default: Label) -> u32 {
        let index = self
            .tables
            .iter()
            .filter(|t| matches!(t, PendingTable::String(_)))
            .count() as i32;
        self.tables.push(PendingTable::String(
            cases.iter().map(|(k, l)| (k.to_string(), *l)).collect(),
        ));
        self.emit(
            OpcodeId::SwitchString,
            &[index.into(), default.into(), scrutinee.into()],
        )
    }

    fn touch(&mut self, registers: i32) {
        if registers > 0 {
            self.register_high_water = self.register_high_water.max(registers as u32);
        }
    }

    fn resolve_label(&self, label: Label) -> Result<u32> {
        self.labels
            .get(label.0 as usize)
            .copied()
            .flatten()
            .ok_or(BytecodeError::UnboundLabel(label.0))
    }

    /// Patch labels, size the frame and validate the unit
    pub fn finish(mut self) -> Result<CompiledUnit> {
        for (slot, label) in std::mem::take(&mut self.fixups) {
            let target = self.resolve_label(label)?;
            self.unit.instructions[slot] = Word::Operand(target as i32);
        }
        for pending in std::mem::take(&mut self.handlers) {
            let handler = HandlerInfo {
                start: self.resolve_label(pending.start)?,
                end: self.resolve_label(pending.end)?,
                target: self.resolve_label(pending.target)?,
                scope_depth: pending.scope_depth,
            };
            self.unit.exception_handlers.push(handler);
        }
        for pending in std::mem::take(&mut self.tables) {
            match pending {
                PendingTable::Simple {
                    character,
                    min,
                    cases,
                } => {
                    let mut table = SimpleJumpTable::new(min);
                    for (key, label) in cases {
                        table.add(key, self.resolve_label(label)?);
                    }
                    if character {
                        self.unit.character_switch_jump_tables.push(table);
                    } else {
                        self.unit.immediate_switch_jump_tables.push(table);
                    }
                }
                PendingTable::String(cases) => {
                    let mut table = StringJumpTable::default();
                    for (key, label) in cases {
                        table.branches.insert(key, self.resolve_label(label)?);
                    }
                    self.unit.string_switch_jump_tables.push(table);
                }
            }
        }
        let floor = self.unit.num_vars + self.unit.num_constants();
        self.unit.num_callee_registers = self.register_high_water.max(floor);
        self.unit.validate()?;
        Ok(self.unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_function() {
        let mut b = BytecodeBuilder::function("add", 2, 1);
        let (a, c) = (b.parameter(1), b.parameter(2));
        b.enter();
        b.binary(OpcodeId::Add, Register(0), a, c);
        b.ret(Register(0));
        let unit = b.finish().unwrap();
        assert_eq!(unit.num_parameters, 3);
        assert_eq!(unit.this_register(), -3);
        assert_eq!(
            unit.instructions,
            vec![
                Word::Op(OpcodeId::Enter),
                Word::Op(OpcodeId::Add),
                Word::Operand(0),
                Word::Operand(-2),
                Word::Operand(-1),
                Word::Op(OpcodeId::Ret),
                Word::Operand(0),
            ]
        );
        assert_eq!(unit.num_callee_registers, 1);
    }

    #[test]
    fn test_labels_resolve_to_absolute_offsets() {
        let mut b = BytecodeBuilder::program(1);
        let done = b.new_label();
        b.enter();
        b.jmp(done);
        b.mov(Register(0), Register(0));
        b.bind(done);
        b.end(Register(0));
        let unit = b.finish().unwrap();
        assert_eq!(unit.instructions[2], Word::Operand(6));
    }

    #[test]
    fn test_unbound_label() {
        let mut b = BytecodeBuilder::program(0);
        let nowhere = b.new_label();
        b.jmp(nowhere);
        assert!(matches!(b.finish(), Err(BytecodeError::UnboundLabel(0))));
    }

    #[test]
    fn test_sites_are_numbered() {
        let mut b = BytecodeBuilder::program(2);
        b.get_by_id(Register(0), Register(1), "x");
        b.get_by_id(Register(0), Register(1), "y");
        b.resolve_global(Register(0), "x");
        b.end(Register(0));
        let unit = b.finish().unwrap();
        assert_eq!(unit.identifiers, vec!["x".to_string(), "y".to_string()]);
        let counts = unit.site_counts();
        assert_eq!(counts.structure_stubs, 2);
        assert_eq!(counts.global_resolves, 1);
    }

    #[test]
    fn test_switch_tables() {
        let mut b = BytecodeBuilder::program(1);
        let (one, other) = (b.new_label(), b.new_label());
        b.switch_imm(Register(0), &[(1, one)], other);
        b.bind(one);
        b.end(Register(0));
        b.bind(other);
        b.end(Register(0));
        let unit = b.finish().unwrap();
        assert_eq!(unit.immediate_switch_jump_tables[0].target_for(1), Some(4));
        assert_eq!(unit.instructions[2], Word::Operand(6));
    }

    #[test]
    #[should_panic(expected = "takes 3 operands")]
    fn test_arity_checked() {
        let mut b = BytecodeBuilder::program(0);
        b.emit(OpcodeId::Add, &[0.into()]);
    }
}
