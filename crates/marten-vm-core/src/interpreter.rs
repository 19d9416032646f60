//! Bytecode interpreter
//!
//! Walks the linked instruction stream of the innermost frame one
//! instruction at a time. Frames live in the register file rather than on
//! the Rust stack: a script call pushes a frame and the loop carries on in
//! the callee, a return pops it and carries on in the caller.

use std::sync::Arc;

use marten_vm_bytecode::OpcodeId;
use parking_lot::{Mutex, RwLock};

use crate::activation::{ActivationData, ArgumentsData};
use crate::backend::ExecutionBackend;
use crate::code_block::CodeBlock;
use crate::debugger::DebugHook;
use crate::error::{Abrupt, Completion, ErrorKind, OpResult};
use crate::object::{JsObject, ObjectKind, PropertyNameIterator};
use crate::operations::{self, throw_error};
use crate::register_file::RegisterFile;
use crate::structure::PropertyAttributes;
use crate::value::Value;
use crate::vm::Vm;

/// Result of executing one instruction
#[derive(Debug)]
pub enum InstructionResult {
    /// Fall through to the next instruction
    Continue,
    /// Continue at an absolute offset
    Jump(usize),
    /// A script frame was pushed; its caller already points past the call
    Entered,
    /// Leave the current frame with a value
    Return(Value),
}

/// The bytecode walking backend
#[derive(Debug, Default, Clone, Copy)]
pub struct Interpreter;

impl Interpreter {
    /// Create an interpreter
    pub fn new() -> Self {
        Self
    }
}

impl ExecutionBackend for Interpreter {
    fn name(&self) -> &'static str {
        "interpreter"
    }

    fn run(&mut self, vm: &mut Vm, entry_depth: usize) -> Completion {
        loop {
            if let Some(completion) = execute_step(vm, self, entry_depth) {
                return completion;
            }
        }
    }
}

/// Execute the instruction at the innermost frame's pc.
///
/// Returns the completion once the frame stack is back at `entry_depth`.
/// Host calls made by the instruction re-enter through `backend`.
pub fn execute_step(
    vm: &mut Vm,
    backend: &mut dyn ExecutionBackend,
    entry_depth: usize,
) -> Option<Completion> {
    let (code_block, pc) = {
        let frame = vm.registers().top();
        (Arc::clone(frame.code()), frame.pc)
    };
    let Some(tag) = code_block.instructions()[pc].tag() else {
        panic!("pc {pc} of code block {} is not an instruction boundary", code_block.id().0);
    };
    let Some(op) = vm.opcode_table().decode(tag) else {
        panic!("unknown opcode tag {tag} at {pc}");
    };

    match execute_instruction(vm, backend, &code_block, pc, op) {
        Ok(InstructionResult::Continue) => {
            vm.registers_mut().top_mut().pc = pc + op.length();
            None
        }
        Ok(InstructionResult::Jump(target)) => {
            vm.registers_mut().top_mut().pc = target;
            None
        }
        Ok(InstructionResult::Entered) => None,
        Ok(InstructionResult::Return(value)) => vm.return_from_frame(value, entry_depth),
        Err(Abrupt::Throw(value)) => vm.unwind(value, entry_depth),
        Err(Abrupt::Interrupted(reason)) => Some(vm.interrupt_to(entry_depth, reason)),
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

fn jump_if(condition: bool, target: i32) -> InstructionResult {
    if condition {
        InstructionResult::Jump(target as usize)
    } else {
        InstructionResult::Continue
    }
}

/// Execute a single decoded instruction of `code_block` at `pc`
pub fn execute_instruction(
    vm: &mut Vm,
    backend: &mut dyn ExecutionBackend,
    code_block: &Arc<CodeBlock>,
    pc: usize,
    op: OpcodeId,
) -> OpResult<InstructionResult> {
    let instructions = code_block.instructions();
    let operand = |i: usize| instructions[pc + i].operand();

    match op {
        // ==================== Frame setup ====================
        OpcodeId::Enter => {
            enter(vm, code_block);
            Ok(InstructionResult::Continue)
        }
        OpcodeId::EnterWithActivation => {
            enter(vm, code_block);
            let base = vm.registers().top().base;
            let activation = JsObject::new(
                Arc::clone(&vm.realm().bare_structure),
                ObjectKind::Activation(RwLock::new(ActivationData::new(Arc::clone(code_block), base))),
            );
            let frame = vm.registers_mut().top_mut();
            frame.scope = frame.scope.push(Arc::clone(&activation));
            frame.activation = Some(Arc::clone(&activation));
            write(vm, operand(1), Value::Object(activation));
            Ok(InstructionResult::Continue)
        }
        OpcodeId::CreateArguments => {
            let frame = vm.registers().top();
            let count = frame.argument_count.saturating_sub(1);
            let data = ArgumentsData::new(
                count,
                code_block.num_parameters(),
                frame.base,
                frame.extra_arguments.clone(),
            );
            let callee = frame.callee.clone();
            let arguments = JsObject::new(
                Arc::clone(&vm.realm().arguments_structure),
                ObjectKind::Arguments(RwLock::new(data)),
            );
            arguments.define_property("length", Value::number(count as f64), PropertyAttributes::hidden());
            if let Some(callee) = callee {
                arguments.define_property("callee", Value::Object(callee), PropertyAttributes::hidden());
            }
            vm.registers_mut().top_mut().arguments = Some(Arc::clone(&arguments));
            write(vm, operand(1), Value::Object(arguments));
            Ok(InstructionResult::Continue)
        }
        OpcodeId::ConvertThis => {
            if read(vm, operand(1)).is_nullish() {
                let global = Value::Object(Arc::clone(vm.global_object()));
                write(vm, operand(1), global);
            }
            Ok(InstructionResult::Continue)
        }

        // ==================== Constants & moves ====================
        OpcodeId::UnexpectedLoad => {
            let value = code_block.unexpected_constant(operand(2) as usize).clone();
            write(vm, operand(1), value);
            Ok(InstructionResult::Continue)
        }
        OpcodeId::NewObject => {
            let object = vm.new_object();
            write(vm, operand(1), Value::Object(object));
            Ok(InstructionResult::Continue)
        }
        OpcodeId::NewArray => {
            let first = operand(2);
            let elements = (0..operand(3)).map(|i| read(vm, first + i)).collect();
            let array = vm.new_array(elements);
            write(vm, operand(1), Value::Object(array));
            Ok(InstructionResult::Continue)
        }
        OpcodeId::NewRegExp => {
            let literal = code_block.regexp(operand(2) as usize).clone();
            let regexp = JsObject::new(
                Arc::clone(&vm.realm().regexp_structure),
                ObjectKind::RegExp(literal.clone()),
            );
            regexp.define_property("source", Value::string(literal.pattern.as_str()), PropertyAttributes::hidden());
            for (name, flag) in [("global", 'g'), ("ignoreCase", 'i'), ("multiline", 'm')] {
                regexp.define_property(
                    name,
                    Value::Boolean(literal.flags.contains(flag)),
                    PropertyAttributes::hidden(),
                );
            }
            regexp.define_property("lastIndex", Value::Int32(0), PropertyAttributes::hidden());
            write(vm, operand(1), Value::Object(regexp));
            Ok(InstructionResult::Continue)
        }
        OpcodeId::Mov => {
            let value = read(vm, operand(2));
            write(vm, operand(1), value);
            Ok(InstructionResult::Continue)
        }

        // ==================== Comparison ====================
        OpcodeId::Not => {
            let value = !read(vm, operand(2)).to_boolean();
            write(vm, operand(1), Value::Boolean(value));
            Ok(InstructionResult::Continue)
        }
        OpcodeId::Eq
        | OpcodeId::Neq
        | OpcodeId::StrictEq
        | OpcodeId::NStrictEq
        | OpcodeId::Less
        | OpcodeId::LessEq => {
            let lhs = read(vm, operand(2));
            let rhs = read(vm, operand(3));
            let result = match op {
                OpcodeId::Eq => lhs.loose_equals(&rhs),
                OpcodeId::Neq => !lhs.loose_equals(&rhs),
                OpcodeId::StrictEq => lhs.strict_equals(&rhs),
                OpcodeId::NStrictEq => !lhs.strict_equals(&rhs),
                OpcodeId::Less => operations::less(&lhs, &rhs),
                _ => operations::less_eq(&lhs, &rhs),
            };
            write(vm, operand(1), Value::Boolean(result));
            Ok(InstructionResult::Continue)
        }
        OpcodeId::EqNull | OpcodeId::NeqNull => {
            let is_null = read(vm, operand(2)).is_nullish();
            write(vm, operand(1), Value::Boolean(is_null == (op == OpcodeId::EqNull)));
            Ok(InstructionResult::Continue)
        }

        // ==================== Arithmetic ====================
        OpcodeId::PreInc | OpcodeId::PreDec => {
            let delta = if op == OpcodeId::PreInc { 1 } else { -1 };
            let value = operations::increment(&read(vm, operand(1)), delta);
            write(vm, operand(1), value);
            Ok(InstructionResult::Continue)
        }
        OpcodeId::PostInc | OpcodeId::PostDec => {
            let delta = if op == OpcodeId::PostInc { 1 } else { -1 };
            let old = operations::to_number(&read(vm, operand(2)));
            let new = operations::increment(&old, delta);
            write(vm, operand(2), new);
            write(vm, operand(1), old);
            Ok(InstructionResult::Continue)
        }
        OpcodeId::ToJsNumber => {
            let value = operations::to_number(&read(vm, operand(2)));
            write(vm, operand(1), value);
            Ok(InstructionResult::Continue)
        }
        OpcodeId::Negate => {
            let value = operations::negate(&read(vm, operand(2)));
            write(vm, operand(1), value);
            Ok(InstructionResult::Continue)
        }
        OpcodeId::Add => {
            let value = operations::add(&read(vm, operand(2)), &read(vm, operand(3)));
            write(vm, operand(1), value);
            Ok(InstructionResult::Continue)
        }
        OpcodeId::Mul | OpcodeId::Div | OpcodeId::Mod | OpcodeId::Sub => {
            let value = operations::arithmetic(op, &read(vm, operand(2)), &read(vm, operand(3)));
            write(vm, operand(1), value);
            Ok(InstructionResult::Continue)
        }

        // ==================== Bitwise ====================
        OpcodeId::LShift
        | OpcodeId::RShift
        | OpcodeId::URShift
        | OpcodeId::BitAnd
        | OpcodeId::BitXor
        | OpcodeId::BitOr => {
            let value = operations::bitwise(op, &read(vm, operand(2)), &read(vm, operand(3)));
            write(vm, operand(1), value);
            Ok(InstructionResult::Continue)
        }
        OpcodeId::BitNot => {
            let value = !read(vm, operand(2)).to_int32();
            write(vm, operand(1), Value::Int32(value));
            Ok(InstructionResult::Continue)
        }

        // ==================== Type tests ====================
        OpcodeId::InstanceOf => {
            let value = read(vm, operand(2));
            let constructor = read(vm, operand(3));
            let prototype = read(vm, operand(4));
            let result = operations::instance_of(vm, &value, &constructor, &prototype)?;
            write(vm, operand(1), Value::Boolean(result));
            Ok(InstructionResult::Continue)
        }
        OpcodeId::TypeOf => {
            let type_name = read(vm, operand(2)).type_of();
            write(vm, operand(1), Value::string(type_name));
            Ok(InstructionResult::Continue)
        }
        OpcodeId::In => {
            let result = operations::has_property(vm, &read(vm, operand(2)), &read(vm, operand(3)))?;
            write(vm, operand(1), Value::Boolean(result));
            Ok(InstructionResult::Continue)
        }

        // ==================== Name resolution ====================
        OpcodeId::Resolve => {
            let value = operations::resolve(vm, code_block.identifier(operand(2) as usize))?;
            write(vm, operand(1), value);
            Ok(InstructionResult::Continue)
        }
        OpcodeId::ResolveGlobal => {
            let ident = code_block.identifier(operand(2) as usize);
            let value = operations::resolve_global(vm, code_block, ident, operand(3) as usize)?;
            write(vm, operand(1), value);
            Ok(InstructionResult::Continue)
        }
        OpcodeId::ResolveBase => {
            let base = operations::resolve_base(vm, code_block.identifier(operand(2) as usize));
            write(vm, operand(1), base);
            Ok(InstructionResult::Continue)
        }
        OpcodeId::ResolveWithBase => {
            let ident = code_block.identifier(operand(3) as usize);
            let (base, value) = operations::resolve_with_base(vm, ident)?;
            write(vm, operand(1), base);
            write(vm, operand(2), value);
            Ok(InstructionResult::Continue)
        }
        OpcodeId::GetScopedVar => {
            let activation = scoped_activation(vm, operand(3) as usize);
            let value = match activation.kind() {
                ObjectKind::Activation(data) => data.read().read(vm.registers(), operand(2)),
                _ => unreachable!(),
            };
            write(vm, operand(1), value);
            Ok(InstructionResult::Continue)
        }
        OpcodeId::PutScopedVar => {
            let activation = scoped_activation(vm, operand(2) as usize);
            let value = read(vm, operand(3));
            if let ObjectKind::Activation(data) = activation.kind() {
                data.write().write(vm.registers_mut(), operand(1), value);
            }
            Ok(InstructionResult::Continue)
        }

        // ==================== Property access ====================
        OpcodeId::GetById => {
            let base = read(vm, operand(2));
            let ident = code_block.identifier(operand(3) as usize);
            let value = operations::get_by_id(vm, code_block, pc, &base, ident, operand(4) as usize)?;
            write(vm, operand(1), value);
            Ok(InstructionResult::Continue)
        }
        OpcodeId::PutById => {
            let base = read(vm, operand(1));
            let ident = code_block.identifier(operand(2) as usize);
            let value = read(vm, operand(3));
            operations::put_by_id(vm, code_block, pc, &base, ident, value, operand(4) as usize)?;
            Ok(InstructionResult::Continue)
        }
        OpcodeId::DelById => {
            let base = read(vm, operand(2));
            let ident = code_block.identifier(operand(3) as usize);
            let deleted = operations::delete_by_id(vm, code_block, pc, &base, ident)?;
            write(vm, operand(1), Value::Boolean(deleted));
            Ok(InstructionResult::Continue)
        }
        OpcodeId::GetByVal => {
            let value = operations::get_by_val(vm, &read(vm, operand(2)), &read(vm, operand(3)))?;
            write(vm, operand(1), value);
            Ok(InstructionResult::Continue)
        }
        OpcodeId::PutByVal => {
            let base = read(vm, operand(1));
            let property = read(vm, operand(2));
            let value = read(vm, operand(3));
            operations::put_by_val(vm, &base, &property, value)?;
            Ok(InstructionResult::Continue)
        }
        OpcodeId::DelByVal => {
            let deleted = operations::delete_by_val(vm, &read(vm, operand(2)), &read(vm, operand(3)))?;
            write(vm, operand(1), Value::Boolean(deleted));
            Ok(InstructionResult::Continue)
        }
        OpcodeId::PutByIndex => {
            let base = read(vm, operand(1));
            let value = read(vm, operand(3));
            operations::put_by_val(vm, &base, &Value::Int32(operand(2)), value)?;
            Ok(InstructionResult::Continue)
        }

        // ==================== Control flow ====================
        OpcodeId::Jmp => Ok(InstructionResult::Jump(operand(1) as usize)),
        OpcodeId::JTrue => Ok(jump_if(read(vm, operand(1)).to_boolean(), operand(2))),
        OpcodeId::JFalse => Ok(jump_if(!read(vm, operand(1)).to_boolean(), operand(2))),
        OpcodeId::JEqNull => Ok(jump_if(read(vm, operand(1)).is_nullish(), operand(2))),
        OpcodeId::JNeqNull => Ok(jump_if(!read(vm, operand(1)).is_nullish(), operand(2))),
        OpcodeId::JLess => Ok(jump_if(
            operations::less(&read(vm, operand(1)), &read(vm, operand(2))),
            operand(3),
        )),
        OpcodeId::JNLess => Ok(jump_if(
            !operations::less(&read(vm, operand(1)), &read(vm, operand(2))),
            operand(3),
        )),
        OpcodeId::Loop => {
            vm.check_interrupt()?;
            Ok(InstructionResult::Jump(operand(1) as usize))
        }
        OpcodeId::LoopIfTrue => {
            vm.check_interrupt()?;
            Ok(jump_if(read(vm, operand(1)).to_boolean(), operand(2)))
        }
        OpcodeId::LoopIfLess => {
            vm.check_interrupt()?;
            Ok(jump_if(
                operations::less(&read(vm, operand(1)), &read(vm, operand(2))),
                operand(3),
            ))
        }
        OpcodeId::SwitchImm => {
            let table = &code_block.immediate_switch_jump_tables()[operand(1) as usize];
            let target = match read(vm, operand(3)) {
                Value::Int32(key) => table.target_for(key),
                Value::Double(d) if d == (d as i32) as f64 => table.target_for(d as i32),
                _ => None,
            };
            Ok(InstructionResult::Jump(target.map_or(operand(2) as usize, |t| t as usize)))
        }
        OpcodeId::SwitchChar => {
            let table = &code_block.character_switch_jump_tables()[operand(1) as usize];
            let target = match read(vm, operand(3)) {
                Value::String(s) => {
                    let mut units = s.encode_utf16();
                    match (units.next(), units.next()) {
                        (Some(unit), None) => table.target_for(unit as i32),
                        _ => None,
                    }
                }
                _ => None,
            };
            Ok(InstructionResult::Jump(target.map_or(operand(2) as usize, |t| t as usize)))
        }
        OpcodeId::SwitchString => {
            let table = &code_block.string_switch_jump_tables()[operand(1) as usize];
            let target = match read(vm, operand(3)) {
                Value::String(s) => table.target_for(&s),
                _ => None,
            };
            Ok(InstructionResult::Jump(target.map_or(operand(2) as usize, |t| t as usize)))
        }

        // ==================== Functions ====================
        OpcodeId::NewFunc | OpcodeId::NewFuncExp => {
            let index = operand(2) as usize;
            let template = if op == OpcodeId::NewFunc {
                code_block.function(index)
            } else {
                code_block.function_expression(index)
            };
            let scope = vm.registers().top().scope.clone();
            let function = vm.new_function(template, scope);
            write(vm, operand(1), Value::Object(function));
            Ok(InstructionResult::Continue)
        }
        OpcodeId::Call => call(vm, backend, pc + op.length(), operand(1), operand(2), operand(3), operand(4)),
        OpcodeId::CallEval => {
            let func = read(vm, operand(2));
            let is_eval = func
                .as_object()
                .is_some_and(|object| Arc::ptr_eq(object, vm.eval_function()));
            if !is_eval {
                return call(vm, backend, pc + op.length(), operand(1), operand(2), operand(3), operand(4));
            }
            let first = RegisterFile::absolute(vm.registers().top().base, operand(3));
            let argument = if operand(4) > 1 {
                vm.registers().slot(first + 1).clone()
            } else {
                Value::Undefined
            };
            let Value::String(source) = argument else {
                write(vm, operand(1), argument);
                return Ok(InstructionResult::Continue);
            };
            let eval_code = vm.compile_eval(&source, Some(code_block))?;
            let this = read(vm, code_block.this_register());
            let scope = vm.registers().top().scope.clone();
            vm.registers_mut().top_mut().pc = pc + op.length();
            vm.enter_eval(eval_code, this, scope, operand(1))?;
            Ok(InstructionResult::Entered)
        }
        OpcodeId::Construct => {
            let func = read(vm, operand(2));
            let Some(callee) = func.as_object().filter(|object| object.is_callable()).cloned() else {
                return Err(throw_error(
                    vm,
                    ErrorKind::TypeError,
                    &format!("{} is not a constructor", func.to_js_string()),
                ));
            };
            let first = RegisterFile::absolute(vm.registers().top().base, operand(4));
            let argc = operand(5) as usize;
            if let ObjectKind::Host(host) = callee.kind() {
                let host = host.clone();
                let args = call_arguments(vm, first, argc);
                let result = vm.call_host(backend, &callee, &host, Value::Undefined, &args, true)?;
                write(vm, operand(1), result);
                return Ok(InstructionResult::Continue);
            }
            let prototype = read(vm, operand(3))
                .as_object()
                .cloned()
                .unwrap_or_else(|| Arc::clone(&vm.realm().object_prototype));
            let this = vm.realm().new_object_with_prototype(prototype);
            vm.registers_mut().set_slot(first, Value::Object(this));
            vm.registers_mut().top_mut().pc = pc + op.length();
            vm.enter_function(&callee, first, argc, operand(1), true)?;
            Ok(InstructionResult::Entered)
        }
        OpcodeId::TearOffActivation => {
            let activation = vm.registers().top().activation.clone();
            if let Some(activation) = activation {
                if let ObjectKind::Activation(data) = activation.kind() {
                    data.write().tear_off(vm.registers());
                }
            }
            Ok(InstructionResult::Continue)
        }
        OpcodeId::TearOffArguments => {
            let arguments = vm.registers().top().arguments.clone();
            if let Some(arguments) = arguments {
                if let ObjectKind::Arguments(data) = arguments.kind() {
                    data.write().tear_off(vm.registers());
                }
            }
            Ok(InstructionResult::Continue)
        }
        OpcodeId::Ret | OpcodeId::End => Ok(InstructionResult::Return(read(vm, operand(1)))),

        // ==================== Scopes ====================
        OpcodeId::PushScope => {
            let value = read(vm, operand(1));
            let Value::Object(object) = value else {
                return Err(throw_error(
                    vm,
                    ErrorKind::TypeError,
                    &format!("{} is not an object", value.to_js_string()),
                ));
            };
            let frame = vm.registers_mut().top_mut();
            frame.scope = frame.scope.push(object);
            frame.local_scope_depth += 1;
            Ok(InstructionResult::Continue)
        }
        OpcodeId::PopScope => {
            let frame = vm.registers_mut().top_mut();
            frame.scope = frame.scope.pop();
            frame.local_scope_depth = frame.local_scope_depth.saturating_sub(1);
            Ok(InstructionResult::Continue)
        }
        OpcodeId::JmpScopes => {
            let count = operand(1) as u32;
            let frame = vm.registers_mut().top_mut();
            frame.scope = frame.scope.pop_n(count as usize);
            frame.local_scope_depth = frame.local_scope_depth.saturating_sub(count);
            Ok(InstructionResult::Jump(operand(2) as usize))
        }

        // ==================== Enumeration ====================
        OpcodeId::GetPNames => {
            let (base, names) = match read(vm, operand(2)) {
                Value::Object(object) => {
                    let names = operations::enumerable_names(&object);
                    (object, names)
                }
                _ => (Arc::clone(vm.global_object()), Vec::new()),
            };
            let iterator = JsObject::new(
                Arc::clone(&vm.realm().bare_structure),
                ObjectKind::PropertyNameIterator(Mutex::new(PropertyNameIterator {
                    base,
                    names,
                    position: 0,
                })),
            );
            write(vm, operand(1), Value::Object(iterator));
            Ok(InstructionResult::Continue)
        }
        OpcodeId::NextPName => {
            let iterator = read(vm, operand(2));
            let Some(ObjectKind::PropertyNameIterator(state)) = iterator.as_object().map(|o| o.kind()) else {
                panic!("next_pname on a value that is not a property name iterator");
            };
            let next = {
                let mut state = state.lock();
                let mut next = None;
                while state.position < state.names.len() {
                    let name = Arc::clone(&state.names[state.position]);
                    state.position += 1;
                    // Properties deleted during enumeration are skipped.
                    if state.base.has_property(&name) {
                        next = Some(name);
                        break;
                    }
                }
                next
            };
            match next {
                Some(name) => {
                    write(vm, operand(1), Value::String(name));
                    Ok(InstructionResult::Jump(operand(3) as usize))
                }
                None => Ok(InstructionResult::Continue),
            }
        }

        // ==================== Exceptions ====================
        OpcodeId::Catch => {
            let exception = vm.take_exception();
            write(vm, operand(1), exception);
            Ok(InstructionResult::Continue)
        }
        OpcodeId::Throw => Err(Abrupt::Throw(read(vm, operand(1)))),
        OpcodeId::NewError => {
            let kind = ErrorKind::from_i32(operand(2)).unwrap_or(ErrorKind::Error);
            let message = read(vm, operand(3)).to_js_string();
            let error = vm.new_error(kind, &message);
            write(vm, operand(1), Value::Object(error));
            Ok(InstructionResult::Continue)
        }

        // ==================== Misc ====================
        OpcodeId::Debug => {
            if let Some(event) = DebugHook::from_i32(operand(1)) {
                vm.debug_hook(event, code_block, operand(2) as u32, operand(3) as u32);
            }
            Ok(InstructionResult::Continue)
        }
    }
}

fn enter(vm: &mut Vm, code_block: &CodeBlock) {
    for register in 0..code_block.num_vars() as i32 {
        write(vm, register, Value::Undefined);
    }
}

fn scoped_activation(vm: &Vm, skip: usize) -> Arc<JsObject> {
    match vm.registers().top().scope.nth(skip) {
        Some(object) if matches!(object.kind(), ObjectKind::Activation(_)) => Arc::clone(object),
        _ => panic!("scope entry {skip} is not an activation"),
    }
}

/// `this` and the arguments of a call whose window starts at absolute
/// slot `first`
fn call_arguments(vm: &Vm, first: usize, argc: usize) -> Vec<Value> {
    (1..argc).map(|i| vm.registers().slot(first + i).clone()).collect()
}

fn call(
    vm: &mut Vm,
    backend: &mut dyn ExecutionBackend,
    next: usize,
    dst: i32,
    func: i32,
    first: i32,
    argc: i32,
) -> OpResult<InstructionResult> {
    let func = read(vm, func);
    let Some(callee) = func.as_object().filter(|object| object.is_callable()).cloned() else {
        return Err(throw_error(
            vm,
            ErrorKind::TypeError,
            &format!("{} is not a function", func.to_js_string()),
        ));
    };
    let first = RegisterFile::absolute(vm.registers().top().base, first);
    let argc = argc as usize;
    if let ObjectKind::Host(host) = callee.kind() {
        let host = host.clone();
        let this = vm.registers().slot(first).clone();
        let args = call_arguments(vm, first, argc);
        let result = vm.call_host(backend, &callee, &host, this, &args, false)?;
        write(vm, dst, result);
        return Ok(InstructionResult::Jump(next));
    }
    vm.registers_mut().top_mut().pc = next;
    vm.enter_function(&callee, first, argc, dst, false)?;
    Ok(InstructionResult::Entered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use marten_vm_bytecode::{BytecodeBuilder, ConstantValue};

    fn run(builder: BytecodeBuilder) -> Completion {
        let mut vm = Vm::default();
        let code_block = vm.link(builder.finish().unwrap()).unwrap();
        vm.execute(&mut Interpreter::new(), &code_block)
    }

    #[test]
    fn test_loop_sums() {
        // sum = 0; for (i = 0; i < 10; i++) sum += i;
        let mut b = BytecodeBuilder::program(2);
        let sum = b.local(0);
        let i = b.local(1);
        let zero = b.constant(ConstantValue::Int32(0));
        let ten = b.constant(ConstantValue::Int32(10));
        let top = b.new_label();
        b.enter();
        b.mov(sum, zero);
        b.mov(i, zero);
        b.bind(top);
        b.binary(OpcodeId::Add, sum, sum, i);
        b.emit(OpcodeId::PreInc, &[i.into()]);
        b.emit(OpcodeId::LoopIfLess, &[i.into(), ten.into(), top.into()]);
        b.end(sum);
        assert!(matches!(run(b).value(), Some(Value::Int32(45))));
    }

    #[test]
    fn test_switch_falls_back_to_default() {
        let mut b = BytecodeBuilder::program(1);
        let out = b.local(0);
        let key = b.constant(ConstantValue::Int32(7));
        let one = b.constant(ConstantValue::String("one".into()));
        let other = b.constant(ConstantValue::String("other".into()));
        let case_one = b.new_label();
        let default = b.new_label();
        let done = b.new_label();
        b.enter();
        b.switch_imm(key, &[(1, case_one)], default);
        b.bind(case_one);
        b.mov(out, one);
        b.jmp(done);
        b.bind(default);
        b.mov(out, other);
        b.bind(done);
        b.end(out);
        assert_eq!(run(b).value().and_then(Value::as_str), Some("other"));
    }

    #[test]
    fn test_throw_without_handler_is_uncaught() {
        let mut b = BytecodeBuilder::program(0);
        let message = b.constant(ConstantValue::String("nope".into()));
        b.enter();
        b.throw(message);
        let completion = run(b);
        assert_eq!(completion.exception().map(|e| e.message.as_str()), Some("nope"));
    }
}
