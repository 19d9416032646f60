//! Compiling execution backend.
//!
//! [`JitBackend`] interprets code blocks until they get hot, then runs their
//! [`CompiledCode`]. Compiled and interpreted execution share the register
//! file and the frame's pc, so switching tiers is just a change of who
//! executes the op at the current pc.

use std::sync::Arc;

use marten_vm_core::interpreter;
use marten_vm_core::operations;
use marten_vm_core::{
    Abrupt, CachedAccess, CodeBlock, CodeBlockId, Completion, ExecutionBackend, ObjectKind, OpResult,
    RegisterFile, StubState, Value, Vm,
};
use marten_vm_core::inline_cache::PatchedAccess;
use rustc_hash::FxHashSet;

use crate::bailout::BailoutReason;
use crate::compiler::{self, CompiledCode, CompiledOp};
use crate::config::JitConfig;
use crate::translator::{self, Compare, JitOp};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
/// Snapshot of backend counters for diagnostics.
pub struct JitStats {
    /// Number of compilation attempts.
    pub compile_requests: u64,
    /// Number of successful compilations.
    pub compile_successes: u64,
    /// Number of compilation failures.
    pub compile_errors: u64,
    /// Number of times control entered compiled code.
    pub executions: u64,
    /// Number of bailouts to the interpreter.
    pub bailouts: u64,
    /// Number of code blocks whose compiled code was invalidated.
    pub deoptimizations: u64,
    /// Number of call sites linked to a callee.
    pub links: u64,
    /// Number of calls that went through an already linked site.
    pub linked_calls: u64,
    /// Number of call sites unlinked by deoptimization.
    pub unlinks: u64,
    /// Number of property sites given a compiled fast path.
    pub patched_sites: u64,
}

/// Outcome of one compiled op
enum Step {
    Next,
    Jump(usize),
    Entered,
    Return(Value),
    Bailout(BailoutReason),
}

/// Why compiled execution stopped
enum Exit {
    /// The frame stack reached the entry depth
    Done(Completion),
    /// Another frame (or another pc of this one) needs dispatching
    FrameChanged,
    /// The op at the frame's pc must run in the interpreter
    Bailout(BailoutReason),
}

/// Execution backend that compiles hot code blocks
#[derive(Debug, Default)]
pub struct JitBackend {
    config: JitConfig,
    stats: JitStats,
    /// Blocks that failed to compile or were deoptimized
    blocked: FxHashSet<CodeBlockId>,
}

impl JitBackend {
    /// Backend with the given configuration
    pub fn new(config: JitConfig) -> Self {
        Self {
            config,
            stats: JitStats::default(),
            blocked: FxHashSet::default(),
        }
    }

    /// Active configuration
    pub fn config(&self) -> &JitConfig {
        &self.config
    }

    /// Counter snapshot
    pub fn stats(&self) -> JitStats {
        self.stats
    }

    /// Whether `code_block` will never be compiled again
    pub fn is_blocked(&self, code_block: &CodeBlock) -> bool {
        self.blocked.contains(&code_block.id())
    }

    /// Count one entry or back-edge; compiles once the block is hot
    fn count_execution(&mut self, vm: &Vm, code_block: &CodeBlock) -> Option<Arc<CompiledCode>> {
        if !self.config.enabled || self.is_blocked(code_block) {
            return None;
        }
        if code_block.increment_execution_count() < self.config.hot_threshold {
            return None;
        }
        self.ensure_compiled(vm, code_block)
    }

    /// Compiled code of `code_block`, compiling it now if allowed
    fn ensure_compiled(&mut self, vm: &Vm, code_block: &CodeBlock) -> Option<Arc<CompiledCode>> {
        if let Some(code) = CompiledCode::attached(code_block) {
            return Some(code);
        }
        if !self.config.enabled || self.is_blocked(code_block) {
            return None;
        }

        self.stats.compile_requests += 1;
        match compiler::compile(code_block, vm.opcode_table()) {
            Ok(code) => {
                let code = Arc::new(code);
                code_block.set_compiled_code(Arc::clone(&code) as _);
                self.stats.compile_successes += 1;
                tracing::debug!(
                    code_block = code_block.id().0,
                    name = code_block.name().unwrap_or("<program>"),
                    ops = code.ops().len(),
                    native = code.native_count(),
                    "compiled code block"
                );
                Some(code)
            }
            Err(error) => {
                self.stats.compile_errors += 1;
                self.blocked.insert(code_block.id());
                tracing::debug!(code_block = code_block.id().0, %error, "compilation failed");
                None
            }
        }
    }

    /// Drop compiled code for good and unlink every caller
    fn deoptimize(&mut self, code_block: &CodeBlock) {
        code_block.clear_compiled_code();
        let unlinked = code_block.unlink_callers();
        code_block.reset_execution_count();
        self.blocked.insert(code_block.id());
        self.stats.deoptimizations += 1;
        self.stats.unlinks += unlinked as u64;
        tracing::info!(code_block = code_block.id().0, unlinked, "deoptimized code block");
    }

    fn record_bailout(&mut self, code_block: &CodeBlock, code: &CompiledCode, reason: BailoutReason, pc: usize) {
        self.stats.bailouts += 1;
        tracing::debug!(code_block = code_block.id().0, pc, reason = reason.name(), "bailout");
        if reason.counts_toward_deopt() && code.record_bailout() >= self.config.deopt_threshold {
            self.deoptimize(code_block);
        }
    }

    fn execute_compiled(
        &mut self,
        vm: &mut Vm,
        code_block: &Arc<CodeBlock>,
        code: &CompiledCode,
        entry_depth: usize,
    ) -> Exit {
        self.stats.executions += 1;
        let mut pc = vm.registers().top().pc;
        loop {
            let Some(compiled) = code.at(pc) else {
                panic!("pc {pc} of code block {} is not an instruction boundary", code_block.id().0);
            };
            vm.registers_mut().top_mut().pc = pc;
            match self.execute_op(vm, code_block, compiled) {
                Ok(Step::Next) => pc = compiled.next,
                Ok(Step::Jump(target)) => pc = target,
                Ok(Step::Entered) => return Exit::FrameChanged,
                Ok(Step::Return(value)) => {
                    return vm
                        .return_from_frame(value, entry_depth)
                        .map_or(Exit::FrameChanged, Exit::Done);
                }
                Ok(Step::Bailout(reason)) => return Exit::Bailout(reason),
                Err(Abrupt::Throw(value)) => {
                    return vm.unwind(value, entry_depth).map_or(Exit::FrameChanged, Exit::Done);
                }
                Err(Abrupt::Interrupted(reason)) => return Exit::Done(vm.interrupt_to(entry_depth, reason)),
            }
        }
    }

    fn execute_op(&mut self, vm: &mut Vm, code_block: &Arc<CodeBlock>, compiled: &CompiledOp) -> OpResult<Step> {
        match &compiled.op {
            JitOp::Enter { num_vars } => {
                for register in 0..*num_vars as i32 {
                    write(vm, register, Value::Undefined);
                }
                Ok(Step::Next)
            }
            JitOp::Mov { dst, src } => {
                let value = read(vm, *src);
                write(vm, *dst, value);
                Ok(Step::Next)
            }
            JitOp::Arith { kind, dst, lhs, rhs } => {
                let Some((a, b)) = int_operands(vm, *lhs, *rhs) else {
                    return Ok(Step::Bailout(BailoutReason::TypeGuardFailure));
                };
                let Some(result) = kind.apply(a, b) else {
                    return Ok(Step::Bailout(BailoutReason::Overflow));
                };
                write(vm, *dst, Value::Int32(result));
                Ok(Step::Next)
            }
            JitOp::Compare { kind, dst, lhs, rhs } => {
                let result = match kind {
                    Compare::StrictEq => read(vm, *lhs).strict_equals(&read(vm, *rhs)),
                    Compare::NStrictEq => !read(vm, *lhs).strict_equals(&read(vm, *rhs)),
                    Compare::Less | Compare::LessEq => {
                        let Some((a, b)) = int_operands(vm, *lhs, *rhs) else {
                            return Ok(Step::Bailout(BailoutReason::TypeGuardFailure));
                        };
                        if *kind == Compare::Less { a < b } else { a <= b }
                    }
                };
                write(vm, *dst, Value::Boolean(result));
                Ok(Step::Next)
            }
            JitOp::Increment { register, delta } => {
                let Value::Int32(value) = read(vm, *register) else {
                    return Ok(Step::Bailout(BailoutReason::TypeGuardFailure));
                };
                let Some(result) = value.checked_add(*delta) else {
                    return Ok(Step::Bailout(BailoutReason::Overflow));
                };
                write(vm, *register, Value::Int32(result));
                Ok(Step::Next)
            }
            JitOp::Jump { target, back_edge } => {
                if *back_edge {
                    vm.check_interrupt()?;
                }
                Ok(Step::Jump(*target))
            }
            JitOp::Branch {
                cond,
                when,
                target,
                back_edge,
            } => {
                if *back_edge {
                    vm.check_interrupt()?;
                }
                Ok(branch(read(vm, *cond).to_boolean() == *when, *target))
            }
            JitOp::BranchLess {
                lhs,
                rhs,
                when,
                target,
                back_edge,
            } => {
                let Some((a, b)) = int_operands(vm, *lhs, *rhs) else {
                    return Ok(Step::Bailout(BailoutReason::TypeGuardFailure));
                };
                if *back_edge {
                    vm.check_interrupt()?;
                }
                Ok(branch((a < b) == *when, *target))
            }
            JitOp::GetById { dst, base, ident, stub } => {
                let base = read(vm, *base);
                let value = match patched_load(code_block, *stub, &base) {
                    Some(value) => value,
                    None => {
                        let value = operations::get_by_id(vm, code_block, compiled.offset, &base, ident, *stub)?;
                        self.patch_get_by_id(code_block, *stub);
                        value
                    }
                };
                write(vm, *dst, value);
                Ok(Step::Next)
            }
            JitOp::PutById { base, ident, value, stub } => {
                let base = read(vm, *base);
                let value = read(vm, *value);
                operations::put_by_id(vm, code_block, compiled.offset, &base, ident, value, *stub)?;
                Ok(Step::Next)
            }
            JitOp::ResolveGlobal { dst, ident, site } => {
                let value = operations::resolve_global(vm, code_block, ident, *site)?;
                write(vm, *dst, value);
                Ok(Step::Next)
            }
            JitOp::Call {
                dst,
                func,
                first,
                argc,
                link,
            } => self.call(vm, code_block, compiled.next, *dst, *func, *first, *argc, *link),
            JitOp::Return { value } => Ok(Step::Return(read(vm, *value))),
            JitOp::Interpret(_) => Ok(Step::Bailout(BailoutReason::UnsupportedOperation)),
        }
    }

    /// Give a monomorphic own-property read site a single-check fast path
    fn patch_get_by_id(&mut self, code_block: &CodeBlock, stub_index: usize) {
        let mut stub = code_block.structure_stub_info(stub_index);
        if stub.fast_path.is_some() {
            return;
        }
        if let StubState::Monomorphic(CachedAccess::GetSelf { structure, offset }) = stub.state() {
            let patched = PatchedAccess {
                structure: Arc::clone(structure),
                offset: *offset,
            };
            stub.fast_path = Some(patched);
            self.stats.patched_sites += 1;
            tracing::trace!(code_block = code_block.id().0, stub = stub_index, "patched get_by_id");
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn call(
        &mut self,
        vm: &mut Vm,
        code_block: &Arc<CodeBlock>,
        next: usize,
        dst: i32,
        func: i32,
        first: i32,
        argc: i32,
        link: usize,
    ) -> OpResult<Step> {
        let func = read(vm, func);
        let Some(callee) = func.as_object().cloned() else {
            return Ok(Step::Bailout(BailoutReason::UnsupportedOperation));
        };
        let first = RegisterFile::absolute(vm.registers().top().base, first);
        let argc = argc as usize;

        if let ObjectKind::Host(host) = callee.kind() {
            let host = host.clone();
            let this = vm.registers().slot(first).clone();
            let args: Vec<Value> = (1..argc).map(|i| vm.registers().slot(first + i).clone()).collect();
            let result = vm.call_host(self, &callee, &host, this, &args, false)?;
            write(vm, dst, result);
            return Ok(Step::Jump(next));
        }
        let Some(function) = callee.as_function() else {
            return Ok(Step::Bailout(BailoutReason::UnsupportedOperation));
        };

        let target = Arc::clone(function.template.code_block(vm.opcode_table()));
        let linked = code_block.call_link_info(link).is_linked_to(&target);
        if linked {
            self.stats.linked_calls += 1;
        } else if self.ensure_compiled(vm, &target).is_some() {
            code_block.link_call(link, &target);
            self.stats.links += 1;
            tracing::debug!(caller = code_block.id().0, callee = target.id().0, link, "linked call site");
        }

        vm.registers_mut().top_mut().pc = next;
        vm.enter_function(&callee, first, argc, dst, false)?;
        Ok(Step::Entered)
    }
}

impl ExecutionBackend for JitBackend {
    fn name(&self) -> &'static str {
        "jit"
    }

    fn run(&mut self, vm: &mut Vm, entry_depth: usize) -> Completion {
        loop {
            let (code_block, pc, depth) = {
                let registers = vm.registers();
                let frame = registers.top();
                (Arc::clone(frame.code()), frame.pc, registers.depth())
            };

            let code = match CompiledCode::attached(&code_block) {
                Some(code) => Some(code),
                None if pc == 0 => self.count_execution(vm, &code_block),
                None => None,
            };

            if let Some(code) = code {
                match self.execute_compiled(vm, &code_block, &code, entry_depth) {
                    Exit::Done(completion) => return completion,
                    Exit::FrameChanged => continue,
                    Exit::Bailout(reason) => {
                        let pc = vm.registers().top().pc;
                        self.record_bailout(&code_block, &code, reason, pc);
                    }
                }
                if let Some(completion) = interpreter::execute_step(vm, self, entry_depth) {
                    return completion;
                }
                continue;
            }

            let loops = code_block.instructions()[pc]
                .tag()
                .and_then(|tag| vm.opcode_table().decode(tag))
                .is_some_and(translator::is_back_edge);
            if let Some(completion) = interpreter::execute_step(vm, self, entry_depth) {
                return completion;
            }
            if loops && vm.registers().depth() == depth && vm.registers().top().pc <= pc {
                // Taken back-edge of an interpreted loop; the next dispatch
                // enters compiled code at the loop head once the block is hot.
                self.count_execution(vm, &code_block);
            }
        }
    }
}

#[inline]
fn read(vm: &Vm, register: i32) -> Value {
    vm.registers().read(register)
}

#[inline]
fn write(vm: &mut Vm, register: i32, value: Value) {
    vm.registers_mut().write(register, value);
}

#[inline]
fn int_operands(vm: &Vm, lhs: i32, rhs: i32) -> Option<(i32, i32)> {
    match (read(vm, lhs), read(vm, rhs)) {
        (Value::Int32(a), Value::Int32(b)) => Some((a, b)),
        _ => None,
    }
}

fn branch(taken: bool, target: usize) -> Step {
    if taken { Step::Jump(target) } else { Step::Next }
}

/// Load through the site's compiled fast path, if it applies to `base`
fn patched_load(code_block: &CodeBlock, stub_index: usize, base: &Value) -> Option<Value> {
    let Value::Object(object) = base else {
        return None;
    };
    let stub = code_block.structure_stub_info(stub_index);
    let patched = stub.fast_path.as_ref()?;
    object
        .has_structure(&patched.structure)
        .then(|| object.get_direct(patched.offset))
}
