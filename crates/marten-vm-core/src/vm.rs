//! The virtual machine
//!
//! A [`Vm`] owns the register file, the realm and the embedder hooks. It
//! pushes entry frames and hands them to an [`ExecutionBackend`]; the
//! backend calls back into the frame transitions defined here (call entry,
//! return, unwind, interrupt) so every backend moves frames the same way.

use std::sync::Arc;

use marten_vm_bytecode::{CompiledUnit, OpcodeTable};

use crate::backend::ExecutionBackend;
use crate::builtins::{self, Realm};
use crate::code_block::{CodeBlock, FunctionTemplate, UnitOwner};
use crate::debugger::{DebugHook, Debugger};
use crate::error::{
    Abrupt, Completion, ErrorKind, InterruptReason, OpResult, SourceAttribution,
    UncaughtException, VmError, VmResult,
};
use crate::eval::EvalCompiler;
use crate::host::{HostCallContext, HostFunction};
use crate::lock::JsLock;
use crate::object::{JsFunction, JsObject, ObjectKind};
use crate::register_file::{CallFrame, RegisterFile};
use crate::scope::ScopeChain;
use crate::structure::PropertyAttributes;
use crate::value::Value;
use crate::watchdog::InterruptHandle;

/// VM configuration
#[derive(Debug, Clone)]
pub struct VmConfig {
    /// Maximum number of frames (script and host)
    pub max_call_depth: usize,
    /// Maximum register file size in slots
    pub register_file_capacity: usize,
    /// Seed for a permuted opcode numbering; `None` uses the identity table
    pub opcode_seed: Option<u64>,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            max_call_depth: 10_000,
            register_file_capacity: 512 * 1024,
            opcode_seed: None,
        }
    }
}

/// A JavaScript virtual machine
pub struct Vm {
    config: VmConfig,
    opcodes: Arc<OpcodeTable>,
    registers: RegisterFile,
    realm: Realm,
    eval_function: Arc<JsObject>,
    exception: Option<Value>,
    pending_interrupt: Option<InterruptReason>,
    interrupt: InterruptHandle,
    lock: Arc<JsLock>,
    debugger: Option<Box<dyn Debugger>>,
    eval_compiler: Option<Arc<dyn EvalCompiler>>,
}

impl Vm {
    /// Create a VM
    pub fn new(config: VmConfig) -> Self {
        let opcodes = match config.opcode_seed {
            Some(seed) => OpcodeTable::shuffled(seed),
            None => OpcodeTable::identity(),
        };
        let realm = Realm::new();
        let eval_function = builtins::install(&realm);
        tracing::debug!(
            max_call_depth = config.max_call_depth,
            register_file_capacity = config.register_file_capacity,
            "created vm"
        );
        Self {
            registers: RegisterFile::new(config.register_file_capacity, config.max_call_depth),
            config,
            opcodes: Arc::new(opcodes),
            realm,
            eval_function,
            exception: None,
            pending_interrupt: None,
            interrupt: InterruptHandle::new(),
            lock: Arc::new(JsLock::new()),
            debugger: None,
            eval_compiler: None,
        }
    }

    // ==================== Accessors ====================

    /// Configuration
    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// Opcode numbering used to link code
    #[inline]
    pub fn opcodes(&self) -> Arc<OpcodeTable> {
        Arc::clone(&self.opcodes)
    }

    /// Opcode numbering, borrowed
    #[inline]
    pub fn opcode_table(&self) -> &OpcodeTable {
        &self.opcodes
    }

    /// Register file
    #[inline]
    pub fn registers(&self) -> &RegisterFile {
        &self.registers
    }

    /// Register file, mutably
    #[inline]
    pub fn registers_mut(&mut self) -> &mut RegisterFile {
        &mut self.registers
    }

    /// Prototypes and root structures
    #[inline]
    pub fn realm(&self) -> &Realm {
        &self.realm
    }

    /// The global object
    #[inline]
    pub fn global_object(&self) -> &Arc<JsObject> {
        &self.realm.global
    }

    /// The intrinsic `eval` function
    pub fn eval_function(&self) -> &Arc<JsObject> {
        &self.eval_function
    }

    /// Handle for interrupting this VM from another thread
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }

    /// The VM lock
    pub fn js_lock(&self) -> Arc<JsLock> {
        Arc::clone(&self.lock)
    }

    /// Attach a debugger
    pub fn set_debugger(&mut self, debugger: Box<dyn Debugger>) {
        self.debugger = Some(debugger);
    }

    /// Detach the debugger
    pub fn take_debugger(&mut self) -> Option<Box<dyn Debugger>> {
        self.debugger.take()
    }

    /// Install the compiler used by `eval`
    pub fn set_eval_compiler(&mut self, compiler: Arc<dyn EvalCompiler>) {
        self.eval_compiler = Some(compiler);
    }

    // ==================== Objects ====================

    /// Define a global property
    pub fn define_global(&self, name: &str, value: Value) {
        self.realm.global.put(&Arc::from(name), value);
    }

    /// Define a global host function
    pub fn define_host_function<F>(&self, name: &str, length: u32, func: F) -> Arc<JsObject>
    where
        F: Fn(&mut HostCallContext<'_>, &Arc<JsObject>, &Value, &[Value]) -> Result<Value, Value>
            + Send
            + Sync
            + 'static,
    {
        let function = self.realm.new_host_function(HostFunction::new(name, length, func));
        self.define_global(name, Value::Object(Arc::clone(&function)));
        function
    }

    /// Plain object
    pub fn new_object(&self) -> Arc<JsObject> {
        self.realm.new_object()
    }

    /// Array
    pub fn new_array(&self, elements: Vec<Value>) -> Arc<JsObject> {
        self.realm.new_array(elements)
    }

    /// Error object
    pub fn new_error(&self, kind: ErrorKind, message: &str) -> Arc<JsObject> {
        self.realm.new_error(kind, message)
    }

    /// Closure over `template` in `scope`
    pub fn new_function(&self, template: &Arc<FunctionTemplate>, scope: ScopeChain) -> Arc<JsObject> {
        let function = JsObject::new(
            Arc::clone(&self.realm.function_structure),
            ObjectKind::Function(JsFunction {
                template: Arc::clone(template),
                scope,
            }),
        );
        function.define_property(
            "length",
            Value::Int32(template.arity() as i32),
            PropertyAttributes::frozen(),
        );
        function.define_property(
            "prototype",
            Value::Object(self.realm.new_object()),
            PropertyAttributes {
                writable: true,
                enumerable: false,
                configurable: false,
            },
        );
        function
    }

    /// Abrupt completion throwing a new error of `kind`
    pub fn throw_error(&self, kind: ErrorKind, message: &str) -> Abrupt {
        Abrupt::Throw(Value::Object(self.new_error(kind, message)))
    }

    // ==================== Linking ====================

    /// Validate and link a unit
    pub fn link(&self, unit: CompiledUnit) -> VmResult<Arc<CodeBlock>> {
        unit.validate()?;
        Ok(Arc::new(CodeBlock::link(UnitOwner::new(unit), &self.opcodes).into_kept()))
    }

    /// Compile eval source, consulting `caller`'s eval cache
    pub fn compile_eval(&self, source: &str, caller: Option<&Arc<CodeBlock>>) -> OpResult<Arc<CodeBlock>> {
        let cache = caller.and_then(|code_block| code_block.eval_cache());
        if let Some(cached) = cache.and_then(|cache| cache.lock().get(source)) {
            return Ok(cached);
        }
        let Some(compiler) = self.eval_compiler.clone() else {
            return Err(self.throw_error(ErrorKind::EvalError, "eval is not supported"));
        };
        let unit = compiler
            .compile_eval(source)
            .map_err(|message| self.throw_error(ErrorKind::SyntaxError, &message))?;
        unit.validate()
            .map_err(|err| self.throw_error(ErrorKind::SyntaxError, &err.to_string()))?;
        let code_block = Arc::new(CodeBlock::link(UnitOwner::new(unit), &self.opcodes).into_kept());
        if let Some(cache) = cache {
            cache.lock().insert(source, &code_block);
        }
        Ok(code_block)
    }

    // ==================== Entry points ====================

    /// Run global or eval code with the global object as `this` and scope
    pub fn execute(&mut self, backend: &mut dyn ExecutionBackend, code_block: &Arc<CodeBlock>) -> Completion {
        let lock = Arc::clone(&self.lock);
        let _guard = lock.lock();
        let entry_depth = self.begin_entry();
        let global = Arc::clone(&self.realm.global);
        let scope = ScopeChain::new(Arc::clone(&global));
        tracing::debug!(backend = backend.name(), code_block = code_block.id().0, "execute");
        if let Err(reason) =
            self.push_entry_frame(Arc::clone(code_block), Value::Object(global), &[], scope, None)
        {
            return self.finish_entry(entry_depth, Completion::Interrupted(reason));
        }
        let completion = backend.run(self, entry_depth);
        self.finish_entry(entry_depth, completion)
    }

    /// Call a function from the host
    pub fn call(
        &mut self,
        backend: &mut dyn ExecutionBackend,
        func: &Value,
        this: Value,
        args: &[Value],
    ) -> VmResult<Completion> {
        let Some(function) = func.as_object().filter(|object| object.is_callable()) else {
            return Err(VmError::NotCallable(func.to_js_string().to_string()));
        };
        let function = Arc::clone(function);
        let lock = Arc::clone(&self.lock);
        let _guard = lock.lock();
        let entry_depth = self.begin_entry();

        let completion = match function.kind() {
            ObjectKind::Host(host) => {
                let host = host.clone();
                match self.call_host(backend, &function, &host, this, args, false) {
                    Ok(value) => Completion::Normal(value),
                    Err(Abrupt::Throw(value)) => Completion::Throw(UncaughtException {
                        message: value.to_js_string().to_string(),
                        value,
                        attribution: None,
                    }),
                    Err(Abrupt::Interrupted(reason)) => Completion::Interrupted(reason),
                }
            }
            ObjectKind::Function(js) => {
                let code_block = Arc::clone(js.template.code_block(&self.opcodes));
                let scope = js.scope.clone();
                match self.push_entry_frame(code_block, this, args, scope, Some(Arc::clone(&function))) {
                    Ok(()) => backend.run(self, entry_depth),
                    Err(reason) => Completion::Interrupted(reason),
                }
            }
            _ => return Err(VmError::NotCallable(func.to_js_string().to_string())),
        };
        Ok(self.finish_entry(entry_depth, completion))
    }

    fn push_entry_frame(
        &mut self,
        code_block: Arc<CodeBlock>,
        this: Value,
        args: &[Value],
        scope: ScopeChain,
        callee: Option<Arc<JsObject>>,
    ) -> Result<(), InterruptReason> {
        if self.interrupt.is_interrupted() {
            return Err(InterruptReason::Watchdog);
        }
        let first = self.registers.next_free();
        let argument_count = 1 + args.len();
        self.registers.ensure(first + argument_count)?;
        self.registers.set_slot(first, this);
        for (i, arg) in args.iter().enumerate() {
            self.registers.set_slot(first + 1 + i, arg.clone());
        }
        let (base, extra) =
            self.slide_arguments(code_block.num_parameters() as usize, first, argument_count)?;
        let mut frame = CallFrame::script(code_block, base, argument_count, callee, scope);
        frame.is_host_entry = true;
        frame.extra_arguments = extra;
        self.registers.push_frame(frame)
    }

    /// Depth of the frame about to be pushed. An outermost entry starts
    /// with a clear interrupt flag; nested entries keep a pending interrupt.
    fn begin_entry(&self) -> usize {
        let depth = self.registers.depth();
        if depth == 0 {
            self.interrupt.clear();
        }
        depth
    }

    fn finish_entry(&mut self, entry_depth: usize, completion: Completion) -> Completion {
        if entry_depth == 0 {
            self.interrupt.clear();
        }
        completion
    }

    // ==================== Frame transitions ====================

    /// Position the callee's parameter window over `argc` values written at
    /// absolute slot `first`. Returns the callee base and any extra
    /// arguments that did not fit the declared parameters.
    fn slide_arguments(
        &mut self,
        num_parameters: usize,
        first: usize,
        argc: usize,
    ) -> Result<(usize, Vec<Value>), InterruptReason> {
        match argc.cmp(&num_parameters) {
            std::cmp::Ordering::Equal => Ok((first + argc, Vec::new())),
            std::cmp::Ordering::Less => {
                self.registers.ensure(first + num_parameters)?;
                for slot in first + argc..first + num_parameters {
                    self.registers.set_slot(slot, Value::Undefined);
                }
                Ok((first + num_parameters, Vec::new()))
            }
            std::cmp::Ordering::Greater => {
                let base = first + argc + num_parameters;
                self.registers.ensure(base)?;
                let extra = (first + num_parameters..first + argc)
                    .map(|slot| self.registers.slot(slot).clone())
                    .collect();
                for i in 0..num_parameters {
                    let value = self.registers.slot(first + i).clone();
                    self.registers.set_slot(base - num_parameters + i, value);
                }
                Ok((base, extra))
            }
        }
    }

    /// Push a frame for script function `function` whose `this` and
    /// arguments occupy `argc` slots starting at absolute slot `first`
    pub fn enter_function(
        &mut self,
        function: &Arc<JsObject>,
        first: usize,
        argc: usize,
        return_register: i32,
        is_construct: bool,
    ) -> OpResult<Arc<CodeBlock>> {
        self.check_interrupt()?;
        let Some(js) = function.as_function() else {
            panic!("enter_function on a non-script function");
        };
        let code_block = Arc::clone(js.template.code_block(&self.opcodes));
        let (base, extra) = self.slide_arguments(code_block.num_parameters() as usize, first, argc)?;
        let mut frame = CallFrame::script(
            Arc::clone(&code_block),
            base,
            argc,
            Some(Arc::clone(function)),
            js.scope.clone(),
        );
        frame.return_register = return_register;
        frame.is_construct = is_construct;
        frame.extra_arguments = extra;
        self.registers.push_frame(frame)?;
        Ok(code_block)
    }

    /// Push a frame for eval code running in the caller's scope
    pub fn enter_eval(
        &mut self,
        code_block: Arc<CodeBlock>,
        this: Value,
        scope: ScopeChain,
        return_register: i32,
    ) -> OpResult<()> {
        self.check_interrupt()?;
        let first = self.registers.next_free();
        self.registers.ensure(first + 1)?;
        self.registers.set_slot(first, this);
        let (base, extra) = self.slide_arguments(code_block.num_parameters() as usize, first, 1)?;
        let mut frame = CallFrame::script(code_block, base, 1, None, scope);
        frame.return_register = return_register;
        frame.extra_arguments = extra;
        self.registers.push_frame(frame)?;
        Ok(())
    }

    /// Call a host function on a host frame
    pub fn call_host(
        &mut self,
        backend: &mut dyn ExecutionBackend,
        callee: &Arc<JsObject>,
        host: &HostFunction,
        this: Value,
        args: &[Value],
        is_construct: bool,
    ) -> OpResult<Value> {
        let base = self.registers.next_free();
        self.registers
            .push_frame(CallFrame::host(base, args.len() + 1, Arc::clone(callee)))?;
        let result = {
            let mut ctx = HostCallContext::new(self, backend, is_construct);
            (host.func)(&mut ctx, callee, &this, args)
        };
        self.registers.pop_frame();
        if let Some(reason) = self.pending_interrupt.take() {
            return Err(Abrupt::Interrupted(reason));
        }
        result.map_err(Abrupt::Throw)
    }

    /// Pop the innermost frame returning `value`.
    ///
    /// Returns the completion once the frame stack is back at `entry_depth`.
    pub fn return_from_frame(&mut self, value: Value, entry_depth: usize) -> Option<Completion> {
        let frame = self.registers.top();
        let value = if frame.is_construct && value.as_object().is_none() {
            let this_slot = RegisterFile::absolute(frame.base, frame.code().this_register());
            self.registers.slot(this_slot).clone()
        } else {
            value
        };
        let return_register = frame.return_register;
        self.registers.pop_frame();
        if self.registers.depth() <= entry_depth {
            return Some(Completion::Normal(value));
        }
        self.registers.write(return_register, value);
        None
    }

    /// Throw `value` from the innermost frame's current instruction.
    ///
    /// Searches handler tables frame by frame; resumes at the first match
    /// with the scope chain cut back to the handler's depth, or returns the
    /// uncaught completion once `entry_depth` is reached.
    pub fn unwind(&mut self, value: Value, entry_depth: usize) -> Option<Completion> {
        let attribution = self.attribute_throw(&value);
        self.notify_exception(&value, entry_depth);

        let mut faulting = true;
        loop {
            let frame = self.registers.top();
            if let Some(code_block) = &frame.code_block {
                // Callers have already advanced past their call instruction.
                let offset = if faulting { frame.pc } else { frame.pc.saturating_sub(1) };
                if let Some(handler) = code_block.handler_for_bytecode_offset(offset as u32) {
                    let frame = self.registers.top_mut();
                    let excess = frame.local_scope_depth.saturating_sub(handler.scope_depth);
                    frame.scope = frame.scope.pop_n(excess as usize);
                    frame.local_scope_depth = handler.scope_depth;
                    frame.pc = handler.target as usize;
                    tracing::trace!(target = handler.target, "exception caught");
                    self.exception = Some(value);
                    return None;
                }
            }
            self.registers.pop_frame();
            if self.registers.depth() <= entry_depth {
                return Some(Completion::Throw(UncaughtException {
                    message: value.to_js_string().to_string(),
                    value,
                    attribution,
                }));
            }
            faulting = false;
        }
    }

    fn handler_exists(&self, entry_depth: usize) -> bool {
        let frames = &self.registers.frames()[entry_depth..];
        frames.iter().rev().enumerate().any(|(i, frame)| {
            frame.code_block.as_ref().is_some_and(|code_block| {
                let offset = if i == 0 { frame.pc } else { frame.pc.saturating_sub(1) };
                code_block.handler_for_bytecode_offset(offset as u32).is_some()
            })
        })
    }

    fn notify_exception(&mut self, value: &Value, entry_depth: usize) {
        if self.debugger.is_none() {
            return;
        }
        let has_handler = self.handler_exists(entry_depth);
        let frame = self.registers.top();
        let Some(code_block) = frame.code_block.clone() else {
            return;
        };
        let line = code_block.line_number_for_bytecode_offset(frame.pc as u32);
        if let Some(debugger) = self.debugger.as_mut() {
            debugger.exception(value, &code_block, line, has_handler);
        }
    }

    fn attribute_throw(&self, value: &Value) -> Option<SourceAttribution> {
        let frame = self.registers.top();
        let code_block = frame.code_block.as_ref()?;
        let offset = frame.pc as u32;
        let line = code_block.line_number_for_bytecode_offset(offset);
        let range = code_block.expression_range_for_bytecode_offset(offset);
        let url = Arc::clone(code_block.source().url());
        if let Value::Object(object) = value {
            if matches!(object.kind(), ObjectKind::Error) && !object.has_own_property("line") {
                object.define_property("line", Value::number(line as f64), PropertyAttributes::hidden());
                object.define_property(
                    "sourceURL",
                    Value::String(Arc::clone(&url)),
                    PropertyAttributes::hidden(),
                );
            }
        }
        Some(SourceAttribution {
            url,
            line,
            divot: range.divot,
            start_offset: range.start_offset,
            end_offset: range.end_offset,
        })
    }

    /// Unwind every frame above `entry_depth` after an interrupt
    pub fn interrupt_to(&mut self, entry_depth: usize, reason: InterruptReason) -> Completion {
        while self.registers.depth() > entry_depth {
            self.registers.pop_frame();
        }
        self.exception = None;
        tracing::debug!(%reason, "execution interrupted");
        Completion::Interrupted(reason)
    }

    /// Fail with `Interrupted(Watchdog)` if an interrupt was requested
    #[inline]
    pub fn check_interrupt(&self) -> OpResult<()> {
        if self.interrupt.is_interrupted() {
            Err(Abrupt::Interrupted(InterruptReason::Watchdog))
        } else {
            Ok(())
        }
    }

    pub(crate) fn set_pending_interrupt(&mut self, reason: InterruptReason) {
        self.pending_interrupt = Some(reason);
    }

    /// Take the exception delivered to the current handler
    pub fn take_exception(&mut self) -> Value {
        self.exception.take().unwrap_or_default()
    }

    /// Forward a `debug` instruction to the attached debugger
    pub fn debug_hook(&mut self, event: DebugHook, code_block: &CodeBlock, first_line: u32, last_line: u32) {
        if let Some(debugger) = self.debugger.as_mut() {
            debugger.hook(event, code_block, first_line, last_line);
        }
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new(VmConfig::default())
    }
}

impl std::fmt::Debug for Vm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vm")
            .field("config", &self.config)
            .field("depth", &self.registers.depth())
            .finish()
    }
}
