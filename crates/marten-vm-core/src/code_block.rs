//! Code blocks: the executable form of one function, program or eval.
//!
//! A code block owns the linked instruction stream and every table the
//! instructions index into: identifiers, constants, nested functions, jump
//! tables, inline cache records and exception handlers. Rarely used tables
//! live in a lazily allocated [`RareData`] box. Source attribution tables
//! ([`ExceptionInfo`]) may be discarded and are rebuilt from the owner node
//! on demand.
//!
//! Tables are filled through the `add_*` builders while the code block is
//! still uniquely owned; once published behind an `Arc` only the caches,
//! call links and exception info change.

use std::any::Any;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use marten_vm_bytecode::{
    CodeType, CompiledUnit, ExpressionRangeInfo, GetByIdExceptionInfo, HandlerInfo, Instruction,
    LineInfo, OpcodeId, OpcodeTable, OperandKind, RegExpLiteral, Register, RegisterKind,
    SimpleJumpTable, StringJumpTable, instruction,
};
use parking_lot::{Mutex, MutexGuard, RwLock};
use rustc_hash::FxHashMap;

use crate::error::VmError;
use crate::eval::EvalCodeCache;
use crate::exception_info::{ExceptionInfo, ExpressionRange};
use crate::inline_cache::{
    AccessKind, CallLinkInfo, CallerLink, GlobalResolveInfo, StructureStubInfo,
};
use crate::structure::Structure;
use crate::value::Value;

static NEXT_CODE_BLOCK_ID: AtomicU64 = AtomicU64::new(1);
static LIVE_CODE_BLOCKS: AtomicUsize = AtomicUsize::new(0);

/// Opaque per-code-block data owned by an execution backend
pub type BackendData = Arc<dyn Any + Send + Sync>;

/// Unique code block identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CodeBlockId(pub u64);

/// Tables rebuilt by an owner node
#[derive(Debug, Clone)]
pub struct RegeneratedExceptionInfo {
    /// Instruction count of the regenerated code; must match the live block
    pub instruction_count: usize,
    /// Rebuilt tables
    pub info: ExceptionInfo,
}

/// The syntax node a code block was generated from.
///
/// Provides source bounds and can re-derive the exception info tables.
pub trait OwnerNode: Send + Sync {
    /// First source line
    fn first_line(&self) -> u32;

    /// Last source line
    fn last_line(&self) -> u32;

    /// Function name, if any
    fn name(&self) -> Option<&str> {
        None
    }

    /// Regenerate the exception info tables
    fn regenerate_exception_info(&self) -> Result<RegeneratedExceptionInfo, VmError>;
}

/// Owner node backed by a compiled unit
pub struct UnitOwner {
    unit: Arc<CompiledUnit>,
}

impl UnitOwner {
    /// Wrap a unit
    pub fn new(unit: impl Into<Arc<CompiledUnit>>) -> Arc<Self> {
        Arc::new(Self { unit: unit.into() })
    }

    /// The unit
    pub fn unit(&self) -> &Arc<CompiledUnit> {
        &self.unit
    }
}

impl OwnerNode for UnitOwner {
    fn first_line(&self) -> u32 {
        self.unit.first_line
    }

    fn last_line(&self) -> u32 {
        self.unit.last_line
    }

    fn name(&self) -> Option<&str> {
        self.unit.name.as_deref()
    }

    fn regenerate_exception_info(&self) -> Result<RegeneratedExceptionInfo, VmError> {
        Ok(RegeneratedExceptionInfo {
            instruction_count: self.unit.instruction_count(),
            info: ExceptionInfo::from_unit(&self.unit),
        })
    }
}

/// Where a code block's source came from
#[derive(Debug, Clone, Default)]
pub struct SourceProvider {
    url: Arc<str>,
}

impl SourceProvider {
    /// Provider for `url`
    pub fn new(url: &str) -> Arc<Self> {
        Arc::new(Self { url: Arc::from(url) })
    }

    /// Source URL
    pub fn url(&self) -> &Arc<str> {
        &self.url
    }
}

/// Uninstantiated function: a unit plus its lazily linked code block
pub struct FunctionTemplate {
    owner: Arc<UnitOwner>,
    name: Option<Arc<str>>,
    code_block: OnceLock<Arc<CodeBlock>>,
}

impl FunctionTemplate {
    /// Template for a function unit
    pub fn new(unit: impl Into<Arc<CompiledUnit>>) -> Arc<Self> {
        let owner = UnitOwner::new(unit);
        let name = owner.unit().name.as_deref().map(Arc::from);
        Arc::new(Self {
            owner,
            name,
            code_block: OnceLock::new(),
        })
    }

    /// Function name
    pub fn name(&self) -> Option<Arc<str>> {
        self.name.clone()
    }

    /// Declared parameter count (without `this`)
    pub fn arity(&self) -> u32 {
        self.owner.unit().num_parameters.saturating_sub(1)
    }

    /// Code block, linked on first use
    pub fn code_block(&self, opcodes: &OpcodeTable) -> &Arc<CodeBlock> {
        self.code_block
            .get_or_init(|| Arc::new(CodeBlock::link(Arc::clone(&self.owner), opcodes).into_kept()))
    }

    /// Code block if already linked
    pub fn linked_code_block(&self) -> Option<&Arc<CodeBlock>> {
        self.code_block.get()
    }
}

/// Register binding of a named variable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolSlot {
    /// Register index
    pub register: i32,
    /// Assignments are ignored
    pub read_only: bool,
}

/// Tables most code blocks never need
#[derive(Default)]
pub struct RareData {
    exception_handlers: Vec<HandlerInfo>,
    functions: Vec<Arc<FunctionTemplate>>,
    unexpected_constants: Vec<Value>,
    regexps: Vec<RegExpLiteral>,
    immediate_switch_jump_tables: Vec<SimpleJumpTable>,
    character_switch_jump_tables: Vec<SimpleJumpTable>,
    string_switch_jump_tables: Vec<StringJumpTable>,
    eval_cache: Option<Mutex<EvalCodeCache>>,
}

/// Executable code for one function, program or eval
pub struct CodeBlock {
    id: CodeBlockId,
    code_type: CodeType,
    owner: Arc<dyn OwnerNode>,
    source: Arc<SourceProvider>,
    source_offset: u32,

    instructions: Vec<Instruction>,
    num_parameters: u32,
    num_vars: u32,
    num_callee_registers: u32,

    needs_full_scope_chain: bool,
    uses_eval: bool,
    uses_arguments: bool,
    is_numeric_compare_function: bool,

    identifiers: Vec<Arc<str>>,
    constants: Vec<Value>,
    function_expressions: Vec<Arc<FunctionTemplate>>,
    symbol_table: FxHashMap<Arc<str>, SymbolSlot>,

    structure_stub_infos: Vec<Mutex<StructureStubInfo>>,
    global_resolve_infos: Vec<Mutex<GlobalResolveInfo>>,
    call_link_infos: Vec<Mutex<CallLinkInfo>>,
    linked_callers: Mutex<Vec<CallerLink>>,

    exception_info: RwLock<Option<ExceptionInfo>>,
    rare_data: Option<Box<RareData>>,

    compiled_code: RwLock<Option<BackendData>>,
    execution_count: AtomicU32,
    handler_lookups: AtomicU32,
}

impl CodeBlock {
    /// Empty code block; fill it with the `add_*` builders
    pub fn new(
        owner: Arc<dyn OwnerNode>,
        code_type: CodeType,
        source: Arc<SourceProvider>,
        source_offset: u32,
    ) -> Self {
        let id = CodeBlockId(NEXT_CODE_BLOCK_ID.fetch_add(1, Ordering::Relaxed));
        LIVE_CODE_BLOCKS.fetch_add(1, Ordering::Relaxed);
        Self {
            id,
            code_type,
            owner,
            source,
            source_offset,
            instructions: Vec::new(),
            num_parameters: 1,
            num_vars: 0,
            num_callee_registers: 0,
            needs_full_scope_chain: false,
            uses_eval: false,
            uses_arguments: false,
            is_numeric_compare_function: false,
            identifiers: Vec::new(),
            constants: Vec::new(),
            function_expressions: Vec::new(),
            symbol_table: FxHashMap::default(),
            structure_stub_infos: Vec::new(),
            global_resolve_infos: Vec::new(),
            call_link_infos: Vec::new(),
            linked_callers: Mutex::new(Vec::new()),
            exception_info: RwLock::new(Some(ExceptionInfo::default())),
            rare_data: None,
            compiled_code: RwLock::new(None),
            execution_count: AtomicU32::new(0),
            handler_lookups: AtomicU32::new(0),
        }
    }

    /// Link a validated unit against `opcodes`
    pub fn link(owner: Arc<UnitOwner>, opcodes: &OpcodeTable) -> Self {
        let unit = Arc::clone(owner.unit());
        let mut code_block = Self::new(
            owner,
            unit.code_type,
            SourceProvider::new(&unit.source_url),
            unit.source_offset,
        );
        code_block.set_frame_layout(unit.num_parameters, unit.num_vars, unit.num_callee_registers);
        code_block.needs_full_scope_chain = unit.flags.needs_full_scope_chain;
        code_block.uses_eval = unit.flags.uses_eval;
        code_block.uses_arguments = unit.flags.uses_arguments;
        code_block.is_numeric_compare_function = unit.flags.is_numeric_compare_function;
        code_block.instructions = instruction::link(&unit.instructions, opcodes);

        for name in &unit.identifiers {
            code_block.add_identifier(Arc::from(name.as_str()));
        }
        for constant in &unit.constants {
            code_block.add_constant(Value::from_constant(constant));
        }
        for constant in &unit.unexpected_constants {
            code_block.add_unexpected_constant(Value::from_constant(constant));
        }
        for regexp in &unit.regexps {
            code_block.add_regexp(regexp.clone());
        }
        for function in &unit.functions {
            code_block.add_function(FunctionTemplate::new(function.clone()));
        }
        for function in &unit.function_expressions {
            code_block.add_function_expression(FunctionTemplate::new(function.clone()));
        }
        for symbol in &unit.symbol_table {
            code_block.symbol_table.insert(
                Arc::from(symbol.name.as_str()),
                SymbolSlot {
                    register: symbol.register,
                    read_only: symbol.read_only,
                },
            );
        }
        for handler in &unit.exception_handlers {
            code_block.add_exception_handler(*handler);
        }
        for table in &unit.immediate_switch_jump_tables {
            code_block.add_immediate_switch_jump_table(table.clone());
        }
        for table in &unit.character_switch_jump_tables {
            code_block.add_character_switch_jump_table(table.clone());
        }
        for table in &unit.string_switch_jump_tables {
            code_block.add_string_switch_jump_table(table.clone());
        }
        *code_block.exception_info.get_mut() = Some(ExceptionInfo::from_unit(&unit));

        let counts = unit.site_counts();
        code_block.structure_stub_infos = (0..counts.structure_stubs)
            .map(|_| Mutex::new(StructureStubInfo::new(AccessKind::Get, 0)))
            .collect();
        code_block.global_resolve_infos = (0..counts.global_resolves)
            .map(|_| Mutex::new(GlobalResolveInfo::default()))
            .collect();
        code_block.call_link_infos = (0..counts.call_links)
            .map(|_| Mutex::new(CallLinkInfo::default()))
            .collect();
        for site in unit.sites() {
            match site.kind {
                OperandKind::StructureStub => {
                    let kind = if site.opcode == OpcodeId::PutById {
                        AccessKind::Put
                    } else {
                        AccessKind::Get
                    };
                    *code_block.structure_stub_infos[site.index].get_mut() =
                        StructureStubInfo::new(kind, site.bytecode_offset);
                }
                OperandKind::GlobalResolve => {
                    *code_block.global_resolve_infos[site.index].get_mut() =
                        GlobalResolveInfo::new(site.bytecode_offset);
                }
                _ => {
                    *code_block.call_link_infos[site.index].get_mut() =
                        CallLinkInfo::new(site.bytecode_offset);
                }
            }
        }

        if code_block.uses_eval {
            code_block.rare_data_mut().eval_cache = Some(Mutex::new(EvalCodeCache::default()));
        }
        tracing::debug!(
            id = code_block.id.0,
            name = code_block.owner.name().unwrap_or("<anonymous>"),
            instructions = code_block.instructions.len(),
            "linked code block"
        );
        code_block
    }

    // ==================== Identity & layout ====================

    /// Identity
    #[inline]
    pub fn id(&self) -> CodeBlockId {
        self.id
    }

    /// Number of code blocks currently alive
    pub fn live_count() -> usize {
        LIVE_CODE_BLOCKS.load(Ordering::Relaxed)
    }

    /// Kind of code
    #[inline]
    pub fn code_type(&self) -> CodeType {
        self.code_type
    }

    /// Owner node
    pub fn owner(&self) -> &Arc<dyn OwnerNode> {
        &self.owner
    }

    /// Source provider
    pub fn source(&self) -> &Arc<SourceProvider> {
        &self.source
    }

    /// Offset of this code within its source
    #[inline]
    pub fn source_offset(&self) -> u32 {
        self.source_offset
    }

    /// Function name, if any
    pub fn name(&self) -> Option<&str> {
        self.owner.name()
    }

    /// Linked instruction stream
    #[inline]
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Replace the instruction stream
    pub fn set_instructions(&mut self, instructions: Vec<Instruction>) {
        self.instructions = instructions;
    }

    /// Set parameter (including `this`), variable and frame sizes
    pub fn set_frame_layout(&mut self, num_parameters: u32, num_vars: u32, num_callee_registers: u32) {
        self.num_parameters = num_parameters;
        self.num_vars = num_vars;
        self.num_callee_registers = num_callee_registers;
    }

    /// Parameters including `this`
    #[inline]
    pub fn num_parameters(&self) -> u32 {
        self.num_parameters
    }

    /// Declared variables
    #[inline]
    pub fn num_vars(&self) -> u32 {
        self.num_vars
    }

    /// Constant pool size
    #[inline]
    pub fn num_constants(&self) -> u32 {
        self.constants.len() as u32
    }

    /// Registers above the frame base
    #[inline]
    pub fn num_callee_registers(&self) -> u32 {
        self.num_callee_registers.max(self.num_vars + self.num_constants())
    }

    /// Register holding `this`
    #[inline]
    pub fn this_register(&self) -> i32 {
        -(self.num_parameters as i32)
    }

    /// Classify a register of this frame
    #[inline]
    pub fn register_kind(&self, register: i32) -> RegisterKind {
        Register(register).kind(self.num_vars, self.num_constants())
    }

    /// Scope chain must be materialized on entry
    pub fn needs_full_scope_chain(&self) -> bool {
        self.needs_full_scope_chain
    }

    /// Body contains a direct eval
    pub fn uses_eval(&self) -> bool {
        self.uses_eval
    }

    /// Body references `arguments`
    pub fn uses_arguments(&self) -> bool {
        self.uses_arguments
    }

    /// Body is a plain numeric comparator
    #[inline]
    pub fn is_numeric_compare_function(&self) -> bool {
        self.is_numeric_compare_function
    }

    /// Set the numeric comparator flag
    pub fn set_is_numeric_compare_function(&mut self, value: bool) {
        self.is_numeric_compare_function = value;
    }

    /// Set the direct-eval flag
    pub fn set_uses_eval(&mut self, value: bool) {
        self.uses_eval = value;
    }

    // ==================== Tables ====================

    fn rare_data_mut(&mut self) -> &mut RareData {
        self.rare_data.get_or_insert_with(Box::default)
    }

    /// Append an identifier
    pub fn add_identifier(&mut self, name: Arc<str>) -> usize {
        self.identifiers.push(name);
        self.identifiers.len() - 1
    }

    /// Identifier `index`
    #[inline]
    pub fn identifier(&self, index: usize) -> &Arc<str> {
        &self.identifiers[index]
    }

    /// All identifiers
    pub fn identifiers(&self) -> &[Arc<str>] {
        &self.identifiers
    }

    /// Append a constant; it lives in register `num_vars + index`
    pub fn add_constant(&mut self, value: Value) -> usize {
        self.constants.push(value);
        self.constants.len() - 1
    }

    /// Value of a constant register.
    ///
    /// # Panics
    ///
    /// Panics if `register` is outside the constant range.
    #[inline]
    pub fn get_constant(&self, register: i32) -> Value {
        match self.register_kind(register) {
            RegisterKind::Constant(index) => self.constants[index].clone(),
            kind => panic!("r{register} is not a constant register ({kind:?})"),
        }
    }

    /// All constants
    pub fn constants(&self) -> &[Value] {
        &self.constants
    }

    /// Append a function expression
    pub fn add_function_expression(&mut self, function: Arc<FunctionTemplate>) -> usize {
        self.function_expressions.push(function);
        self.function_expressions.len() - 1
    }

    /// Function expression `index`
    pub fn function_expression(&self, index: usize) -> &Arc<FunctionTemplate> {
        &self.function_expressions[index]
    }

    /// Append a function declaration
    pub fn add_function(&mut self, function: Arc<FunctionTemplate>) -> usize {
        let functions = &mut self.rare_data_mut().functions;
        functions.push(function);
        functions.len() - 1
    }

    /// Function declaration `index`
    pub fn function(&self, index: usize) -> &Arc<FunctionTemplate> {
        &self.rare().functions[index]
    }

    /// Number of function declarations
    pub fn function_count(&self) -> usize {
        self.rare_data.as_ref().map_or(0, |rare| rare.functions.len())
    }

    /// Append a regular expression
    pub fn add_regexp(&mut self, regexp: RegExpLiteral) -> usize {
        let regexps = &mut self.rare_data_mut().regexps;
        regexps.push(regexp);
        regexps.len() - 1
    }

    /// Regular expression `index`
    pub fn regexp(&self, index: usize) -> &RegExpLiteral {
        &self.rare().regexps[index]
    }

    /// All regular expressions
    pub fn regexps(&self) -> &[RegExpLiteral] {
        self.rare_data.as_ref().map_or(&[], |rare| &rare.regexps)
    }

    /// Append an unexpected constant
    pub fn add_unexpected_constant(&mut self, value: Value) -> usize {
        let constants = &mut self.rare_data_mut().unexpected_constants;
        constants.push(value);
        constants.len() - 1
    }

    /// Unexpected constant `index`
    pub fn unexpected_constant(&self, index: usize) -> &Value {
        &self.rare().unexpected_constants[index]
    }

    /// All unexpected constants
    pub fn unexpected_constants(&self) -> &[Value] {
        self.rare_data.as_ref().map_or(&[], |rare| &rare.unexpected_constants)
    }

    /// Append a `switch_imm` table
    pub fn add_immediate_switch_jump_table(&mut self, table: SimpleJumpTable) -> usize {
        let tables = &mut self.rare_data_mut().immediate_switch_jump_tables;
        tables.push(table);
        tables.len() - 1
    }

    /// `switch_imm` tables
    pub fn immediate_switch_jump_tables(&self) -> &[SimpleJumpTable] {
        self.rare_data.as_ref().map_or(&[], |rare| &rare.immediate_switch_jump_tables)
    }

    /// Append a `switch_char` table
    pub fn add_character_switch_jump_table(&mut self, table: SimpleJumpTable) -> usize {
        let tables = &mut self.rare_data_mut().character_switch_jump_tables;
        tables.push(table);
        tables.len() - 1
    }

    /// `switch_char` tables
    pub fn character_switch_jump_tables(&self) -> &[SimpleJumpTable] {
        self.rare_data.as_ref().map_or(&[], |rare| &rare.character_switch_jump_tables)
    }

    /// Append a `switch_string` table
    pub fn add_string_switch_jump_table(&mut self, table: StringJumpTable) -> usize {
        let tables = &mut self.rare_data_mut().string_switch_jump_tables;
        tables.push(table);
        tables.len() - 1
    }

    /// `switch_string` tables
    pub fn string_switch_jump_tables(&self) -> &[StringJumpTable] {
        self.rare_data.as_ref().map_or(&[], |rare| &rare.string_switch_jump_tables)
    }

    /// Eval code cache, present when the body uses eval
    pub fn eval_cache(&self) -> Option<&Mutex<EvalCodeCache>> {
        self.rare_data.as_ref().and_then(|rare| rare.eval_cache.as_ref())
    }

    fn rare(&self) -> &RareData {
        match &self.rare_data {
            Some(rare) => rare,
            None => panic!("code block {} has no rare data", self.id.0),
        }
    }

    /// Register bound to `name` through the symbol table
    pub fn symbol(&self, name: &str) -> Option<SymbolSlot> {
        self.symbol_table.get(name).copied()
    }

    /// Bind `name` to a register
    pub fn add_symbol(&mut self, name: Arc<str>, slot: SymbolSlot) {
        self.symbol_table.insert(name, slot);
    }

    // ==================== Exception handlers ====================

    /// Append a handler. Handlers are searched in insertion order, so inner
    /// handlers must be added first.
    pub fn add_exception_handler(&mut self, handler: HandlerInfo) {
        self.rare_data_mut().exception_handlers.push(handler);
    }

    /// All handlers, innermost first
    pub fn exception_handlers(&self) -> &[HandlerInfo] {
        self.rare_data.as_ref().map_or(&[], |rare| &rare.exception_handlers)
    }

    /// First handler whose range covers `offset`
    pub fn handler_for_bytecode_offset(&self, offset: u32) -> Option<HandlerInfo> {
        self.handler_lookups.fetch_add(1, Ordering::Relaxed);
        self.exception_handlers()
            .iter()
            .find(|handler| handler.covers(offset))
            .copied()
    }

    // ==================== Exception info ====================

    fn exception_info_mut(&mut self) -> &mut ExceptionInfo {
        match self.exception_info.get_mut() {
            Some(info) => info,
            None => panic!("exception info must be present while building"),
        }
    }

    /// Record a line entry
    pub fn add_line_info(&mut self, instruction_offset: u32, line: u32) {
        let info = self.exception_info_mut();
        debug_assert!(
            info.line_info
                .last()
                .is_none_or(|last| last.instruction_offset <= instruction_offset)
        );
        info.line_info.push(LineInfo {
            instruction_offset,
            line,
        });
    }

    /// Record an expression range entry
    pub fn add_expression_info(&mut self, info: ExpressionRangeInfo) {
        self.exception_info_mut().expression_info.push(info);
    }

    /// Record a `get_by_id` failure description
    pub fn add_get_by_id_exception_info(&mut self, info: GetByIdExceptionInfo) {
        self.exception_info_mut().get_by_id_exception_info.push(info);
    }

    /// Whether the exception info tables are materialized
    pub fn has_exception_info(&self) -> bool {
        self.exception_info.read().is_some()
    }

    /// Drop the exception info tables. Global code keeps them because it
    /// cannot be regenerated.
    pub fn discard_exception_info(&self) -> bool {
        if self.code_type == CodeType::Global {
            return false;
        }
        self.exception_info.write().take().is_some()
    }

    fn with_exception_info<R>(&self, f: impl FnOnce(&ExceptionInfo) -> R) -> R {
        if let Some(info) = self.exception_info.read().as_ref() {
            return f(info);
        }
        let regenerated = self.regenerate_exception_info();
        let mut slot = self.exception_info.write();
        f(slot.get_or_insert(regenerated))
    }

    fn regenerate_exception_info(&self) -> ExceptionInfo {
        assert_ne!(
            self.code_type,
            CodeType::Global,
            "global code never discards its exception info"
        );
        let regenerated = match self.owner.regenerate_exception_info() {
            Ok(regenerated) => regenerated,
            Err(err) => panic!("failed to regenerate exception info: {err}"),
        };
        assert_eq!(
            regenerated.instruction_count,
            self.instructions.len(),
            "regenerated bytecode does not match code block {}",
            self.id.0
        );
        tracing::debug!(id = self.id.0, "regenerated exception info");
        regenerated.info
    }

    /// Source line of the instruction at `offset`
    pub fn line_number_for_bytecode_offset(&self, offset: u32) -> u32 {
        let first_line = self.owner.first_line();
        self.with_exception_info(|info| info.line_for(offset, first_line))
    }

    /// Expression range of the instruction at `offset`, in source coordinates
    pub fn expression_range_for_bytecode_offset(&self, offset: u32) -> ExpressionRange {
        let source_offset = self.source_offset;
        self.with_exception_info(|info| info.expression_range_for(offset))
            .map(|range| ExpressionRange {
                divot: range.divot + source_offset,
                ..range
            })
            .unwrap_or_default()
    }

    /// `get_by_id` failure description for exactly `offset`
    pub fn get_by_id_exception_info_for_bytecode_offset(
        &self,
        offset: u32,
    ) -> Option<GetByIdExceptionInfo> {
        self.with_exception_info(|info| info.get_by_id_for(offset))
    }

    // ==================== Inline caches ====================

    /// Append a property access cache
    pub fn add_structure_stub_info(&mut self, stub: StructureStubInfo) -> usize {
        self.structure_stub_infos.push(Mutex::new(stub));
        self.structure_stub_infos.len() - 1
    }

    /// Property access cache `index`
    #[inline]
    pub fn structure_stub_info(&self, index: usize) -> MutexGuard<'_, StructureStubInfo> {
        self.structure_stub_infos[index].lock()
    }

    /// Number of property access caches
    pub fn structure_stub_count(&self) -> usize {
        self.structure_stub_infos.len()
    }

    /// Append a global resolve cache
    pub fn add_global_resolve_info(&mut self, info: GlobalResolveInfo) -> usize {
        self.global_resolve_infos.push(Mutex::new(info));
        self.global_resolve_infos.len() - 1
    }

    /// Global resolve cache `index`
    #[inline]
    pub fn global_resolve_info(&self, index: usize) -> MutexGuard<'_, GlobalResolveInfo> {
        self.global_resolve_infos[index].lock()
    }

    /// Number of global resolve caches
    pub fn global_resolve_count(&self) -> usize {
        self.global_resolve_infos.len()
    }

    /// Append a call link record
    pub fn add_call_link_info(&mut self, info: CallLinkInfo) -> usize {
        self.call_link_infos.push(Mutex::new(info));
        self.call_link_infos.len() - 1
    }

    /// Call link record `index`
    #[inline]
    pub fn call_link_info(&self, index: usize) -> MutexGuard<'_, CallLinkInfo> {
        self.call_link_infos[index].lock()
    }

    /// Number of call sites
    pub fn call_link_count(&self) -> usize {
        self.call_link_infos.len()
    }

    /// Take a reference on every structure the cache at `offset` depends on
    pub fn ref_structures(&self, offset: u32) -> Vec<Arc<Structure>> {
        let mut structures: Vec<Arc<Structure>> = self
            .structure_stub_infos
            .iter()
            .map(|stub| stub.lock())
            .filter(|stub| stub.bytecode_offset == offset)
            .flat_map(|stub| stub.structures())
            .collect();
        structures.extend(
            self.global_resolve_infos
                .iter()
                .map(|info| info.lock())
                .filter(|info| info.bytecode_offset == offset)
                .filter_map(|info| info.structure.clone()),
        );
        structures
    }

    /// Release the structures pinned by the cache at `offset`
    pub fn deref_structures(&self, offset: u32) {
        for stub in &self.structure_stub_infos {
            let mut stub = stub.lock();
            if stub.bytecode_offset == offset {
                stub.clear();
            }
        }
        for info in &self.global_resolve_infos {
            let mut info = info.lock();
            if info.bytecode_offset == offset {
                info.structure = None;
            }
        }
    }

    // ==================== Call linking ====================

    /// Link call site `link_index` to `callee`
    pub fn link_call(self: &Arc<Self>, link_index: usize, callee: &Arc<CodeBlock>) {
        let previous = {
            let mut link = self.call_link_infos[link_index].lock();
            if link.is_linked_to(callee) {
                return;
            }
            let previous = link.callee();
            link.set_linked(callee);
            previous
        };
        if let Some(previous) = previous {
            previous.remove_caller(self.id, link_index);
        }
        callee.linked_callers.lock().push(CallerLink {
            caller: Arc::downgrade(self),
            caller_id: self.id,
            link_index,
        });
        tracing::trace!(caller = self.id.0, callee = callee.id.0, link_index, "linked call");
    }

    /// Unlink call site `link_index`
    pub fn unlink_call(&self, link_index: usize) {
        let previous = {
            let mut link = self.call_link_infos[link_index].lock();
            let previous = link.callee();
            link.set_unlinked();
            previous
        };
        if let Some(previous) = previous {
            previous.remove_caller(self.id, link_index);
        }
    }

    fn remove_caller(&self, caller_id: CodeBlockId, link_index: usize) {
        self.linked_callers
            .lock()
            .retain(|link| !(link.caller_id == caller_id && link.link_index == link_index));
    }

    /// Unlink every call site linked to this code block; returns how many
    pub fn unlink_callers(&self) -> usize {
        let callers = std::mem::take(&mut *self.linked_callers.lock());
        let mut unlinked = 0;
        for link in callers {
            let Some(caller) = link.caller.upgrade() else {
                continue;
            };
            let mut info = caller.call_link_infos[link.link_index].lock();
            if info.callee_id() == Some(self.id) {
                info.set_unlinked();
                unlinked += 1;
            }
        }
        unlinked
    }

    /// Number of call sites currently linked here
    pub fn linked_caller_count(&self) -> usize {
        self.linked_callers.lock().len()
    }

    // ==================== Backend support ====================

    /// Attach backend code
    pub fn set_compiled_code(&self, code: BackendData) {
        *self.compiled_code.write() = Some(code);
    }

    /// Backend code, if attached
    #[inline]
    pub fn compiled_code(&self) -> Option<BackendData> {
        self.compiled_code.read().clone()
    }

    /// Detach backend code
    pub fn clear_compiled_code(&self) -> Option<BackendData> {
        self.compiled_code.write().take()
    }

    /// Bump the hotness counter; returns the new value
    #[inline]
    pub fn increment_execution_count(&self) -> u32 {
        self.execution_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Hotness counter
    pub fn execution_count(&self) -> u32 {
        self.execution_count.load(Ordering::Relaxed)
    }

    /// Number of handler table searches, made only while unwinding
    pub fn handler_lookup_count(&self) -> u32 {
        self.handler_lookups.load(Ordering::Relaxed)
    }

    /// Reset the hotness counter
    pub fn reset_execution_count(&self) {
        self.execution_count.store(0, Ordering::Relaxed);
    }

    // ==================== Memory ====================

    /// Compact a block its owner is about to keep
    pub fn into_kept(mut self) -> Self {
        self.shrink_to_fit();
        self
    }

    /// Release excess capacity in every table
    pub fn shrink_to_fit(&mut self) {
        self.instructions.shrink_to_fit();
        self.identifiers.shrink_to_fit();
        self.constants.shrink_to_fit();
        self.function_expressions.shrink_to_fit();
        self.symbol_table.shrink_to_fit();
        self.structure_stub_infos.shrink_to_fit();
        self.global_resolve_infos.shrink_to_fit();
        self.call_link_infos.shrink_to_fit();
        if let Some(info) = self.exception_info.get_mut() {
            info.shrink_to_fit();
        }
        if let Some(rare) = &mut self.rare_data {
            rare.exception_handlers.shrink_to_fit();
            rare.functions.shrink_to_fit();
            rare.unexpected_constants.shrink_to_fit();
            rare.regexps.shrink_to_fit();
            rare.immediate_switch_jump_tables.shrink_to_fit();
            rare.character_switch_jump_tables.shrink_to_fit();
            rare.string_switch_jump_tables.shrink_to_fit();
        }
    }
}

impl Drop for CodeBlock {
    fn drop(&mut self) {
        self.unlink_callers();
        for (index, link) in self.call_link_infos.iter_mut().enumerate() {
            if let Some(callee) = link.get_mut().callee() {
                callee.remove_caller(self.id, index);
            }
        }
        LIVE_CODE_BLOCKS.fetch_sub(1, Ordering::Relaxed);
        tracing::trace!(id = self.id.0, "code block destroyed");
    }
}

impl std::fmt::Debug for CodeBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeBlock")
            .field("id", &self.id.0)
            .field("code_type", &self.code_type)
            .field("name", &self.name())
            .field("instructions", &self.instructions.len())
            .finish()
    }
}
