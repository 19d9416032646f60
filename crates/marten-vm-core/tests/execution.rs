//! End-to-end execution through the interpreter

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use marten_vm_bytecode::{BytecodeBuilder, CodeType, CompiledUnit, ConstantValue, OpcodeId, UnitFlags};
use marten_vm_core::{
    CodeBlock, Completion, DebugHook, Debugger, ErrorKind, EvalCompiler, FunctionTemplate,
    InterruptReason, Interpreter, ScopeChain, Value, Vm, VmConfig, Watchdog,
};

fn run(vm: &mut Vm, builder: BytecodeBuilder) -> Completion {
    let code_block = vm.link(builder.finish().unwrap()).unwrap();
    vm.execute(&mut Interpreter::new(), &code_block)
}

fn int(completion: &Completion) -> i32 {
    match completion.value() {
        Some(Value::Int32(n)) => *n,
        other => panic!("expected an int32 completion, got {other:?} from {completion:?}"),
    }
}

/// `function f(a, b) { return a + b; }`
fn adder() -> CompiledUnit {
    let mut b = BytecodeBuilder::function("f", 2, 0);
    let (lhs, rhs) = (b.parameter(1), b.parameter(2));
    let sum = b.temporary(0);
    b.enter();
    b.binary(OpcodeId::Add, sum, lhs, rhs);
    b.ret(sum);
    b.finish().unwrap()
}

/// Program calling `adder` with 2 and 3
fn call_adder() -> BytecodeBuilder {
    let mut b = BytecodeBuilder::program(1);
    let f = b.local(0);
    let two = b.constant(ConstantValue::Int32(2));
    let three = b.constant(ConstantValue::Int32(3));
    let (this, first, second) = (b.temporary(0), b.temporary(1), b.temporary(2));
    let index = b.function_declaration(adder());
    b.enter();
    b.emit(OpcodeId::NewFunc, &[f.into(), index.into()]);
    b.mov(first, two);
    b.mov(second, three);
    b.call(this, f, this, 3);
    b.end(this);
    b
}

#[test]
fn test_call_adds_arguments() {
    let mut vm = Vm::default();
    let program = vm.link(call_adder().finish().unwrap()).unwrap();
    let completion = vm.execute(&mut Interpreter::new(), &program);
    assert_eq!(int(&completion), 5);
    assert_eq!(vm.registers().depth(), 0);

    // A normal call and return never searches a handler table.
    let callee = program.function(0).code_block(&vm.opcodes());
    assert_eq!(callee.handler_lookup_count(), 0);
    assert_eq!(program.handler_lookup_count(), 0);
}

#[test]
fn test_permuted_opcode_numbering() {
    let mut vm = Vm::new(VmConfig {
        opcode_seed: Some(0x5eed),
        ..VmConfig::default()
    });
    assert_eq!(int(&run(&mut vm, call_adder())), 5);
}

#[test]
fn test_missing_and_extra_arguments() {
    let mut vm = Vm::default();
    let template = FunctionTemplate::new(adder());
    let f = Value::Object(vm.new_function(&template, ScopeChain::new(Arc::clone(vm.global_object()))));
    let mut interpreter = Interpreter::new();

    let completion = vm.call(&mut interpreter, &f, Value::Undefined, &[Value::Int32(1)]).unwrap();
    assert!(matches!(completion.value(), Some(Value::Double(n)) if n.is_nan()));

    let args = [Value::Int32(1), Value::Int32(2), Value::Int32(40)];
    let completion = vm.call(&mut interpreter, &f, Value::Undefined, &args).unwrap();
    assert_eq!(int(&completion), 3);
}

#[test]
fn test_handler_resumes_at_target_with_scope_depth() {
    // var x = 2; try { with ({ x: 1 }) throw "boom"; } catch (e) { x }
    let mut vm = Vm::default();
    vm.define_global("x", Value::Int32(2));
    let mut b = BytecodeBuilder::program(2);
    let (result, scope) = (b.local(0), b.local(1));
    let one = b.constant(ConstantValue::Int32(1));
    let boom = b.constant(ConstantValue::String("boom".into()));
    let exception = b.temporary(0);
    b.enter();
    b.new_object(scope);
    b.put_by_id(scope, "x", one);
    let start = b.here();
    b.push_scope(scope);
    b.resolve(result, "x");
    b.throw(boom);
    let end = b.here();
    let target = b.here();
    b.catch(exception);
    b.resolve(result, "x");
    b.end(result);
    b.handler(start, end, target, 0);

    assert_eq!(int(&run(&mut vm, b)), 2);
}

#[test]
fn test_catch_receives_thrown_value() {
    let mut vm = Vm::default();
    let mut b = BytecodeBuilder::program(1);
    let caught = b.local(0);
    let boom = b.constant(ConstantValue::String("boom".into()));
    b.enter();
    let start = b.here();
    b.throw(boom);
    let end = b.here();
    let target = b.here();
    b.catch(caught);
    b.end(caught);
    b.handler(start, end, target, 0);

    let completion = run(&mut vm, b);
    assert_eq!(completion.value().and_then(Value::as_str), Some("boom"));
}

#[test]
fn test_nested_handlers_pick_innermost() {
    let mut vm = Vm::default();
    let mut b = BytecodeBuilder::program(1);
    let result = b.local(0);
    let inner = b.constant(ConstantValue::String("inner".into()));
    let outer = b.constant(ConstantValue::String("outer".into()));
    let done = b.new_label();
    b.enter();
    let outer_start = b.here();
    b.mov(result, outer);
    let inner_start = b.here();
    b.throw(inner);
    let inner_end = b.here();
    b.mov(result, outer);
    let outer_end = b.here();
    let outer_target = b.here();
    b.mov(result, outer);
    b.jmp(done);
    let inner_target = b.here();
    b.mov(result, inner);
    b.bind(done);
    b.end(result);
    b.handler(inner_start, inner_end, inner_target, 0);
    b.handler(outer_start, outer_end, outer_target, 0);

    let completion = run(&mut vm, b);
    assert_eq!(completion.value().and_then(Value::as_str), Some("inner"));
}

#[test]
fn test_exception_crosses_frames() {
    // try { thrower(); } catch (e) { e }
    let mut vm = Vm::default();
    let mut thrower = BytecodeBuilder::function("thrower", 0, 0);
    let message = thrower.constant(ConstantValue::String("from callee".into()));
    thrower.enter();
    thrower.throw(message);

    let mut b = BytecodeBuilder::program(2);
    let (f, caught) = (b.local(0), b.local(1));
    let this = b.temporary(0);
    let index = b.function_declaration(thrower.finish().unwrap());
    b.enter();
    b.emit(OpcodeId::NewFunc, &[f.into(), index.into()]);
    let start = b.here();
    b.call(this, f, this, 1);
    let end = b.here();
    b.end(this);
    let target = b.here();
    b.catch(caught);
    b.end(caught);
    b.handler(start, end, target, 0);

    let completion = run(&mut vm, b);
    assert_eq!(completion.value().and_then(Value::as_str), Some("from callee"));
    assert_eq!(vm.registers().depth(), 0);
}

#[test]
fn test_uncaught_exception_attribution() {
    let mut vm = Vm::default();
    let mut b = BytecodeBuilder::program(1);
    let error = b.local(0);
    let message = b.constant(ConstantValue::String("bad thing".into()));
    b.source("attribution.js", 10, 20);
    b.enter();
    b.line(12);
    b.emit(
        OpcodeId::NewError,
        &[error.into(), (ErrorKind::TypeError as i32).into(), message.into()],
    );
    b.line(13);
    b.expression(40, 3, 4);
    b.throw(error);

    let completion = run(&mut vm, b);
    let exception = completion.exception().expect("uncaught exception");
    assert_eq!(exception.message, "TypeError: bad thing");
    let attribution = exception.attribution.as_ref().unwrap();
    assert_eq!(&*attribution.url, "attribution.js");
    assert_eq!(attribution.line, 13);
    assert_eq!(attribution.divot, 40);
    assert_eq!((attribution.start_offset, attribution.end_offset), (3, 4));

    let object = exception.value.as_object().unwrap();
    assert!(matches!(object.get("line"), Some(Value::Int32(13))));
    assert!(!object.enumerable_keys().iter().any(|key| &**key == "line"));
}

#[test]
fn test_missing_global_is_reference_error() {
    let mut vm = Vm::default();
    let mut b = BytecodeBuilder::program(1);
    let result = b.local(0);
    b.enter();
    b.resolve_global(result, "nope");
    b.end(result);

    let completion = run(&mut vm, b);
    let exception = completion.exception().unwrap();
    assert_eq!(exception.message, "ReferenceError: Can't find variable: nope");
}

#[test]
fn test_property_of_undefined_names_identifier() {
    let mut vm = Vm::default();
    let mut b = BytecodeBuilder::program(2);
    let (result, base) = (b.local(0), b.local(1));
    b.enter();
    b.get_by_id(result, base, "foo");
    b.end(result);

    let exception = run(&mut vm, b).exception().cloned().unwrap();
    assert_eq!(
        exception.message,
        "TypeError: undefined is not an object (evaluating property 'foo')"
    );
}

#[test]
fn test_global_resolve_site_is_cached() {
    let mut vm = Vm::default();
    vm.define_global("g", Value::Int32(9));
    let mut b = BytecodeBuilder::program(2);
    let (value, i) = (b.local(0), b.local(1));
    let zero = b.constant(ConstantValue::Int32(0));
    let three = b.constant(ConstantValue::Int32(3));
    b.enter();
    b.mov(i, zero);
    let top = b.here();
    b.resolve_global(value, "g");
    b.emit(OpcodeId::PreInc, &[i.into()]);
    b.emit(OpcodeId::LoopIfLess, &[i.into(), three.into(), top.into()]);
    b.end(value);
    let code_block = vm.link(b.finish().unwrap()).unwrap();

    let completion = vm.execute(&mut Interpreter::new(), &code_block);
    assert_eq!(int(&completion), 9);
    let info = code_block.global_resolve_info(0);
    assert_eq!(info.misses, 1);
    assert!(info.structure.is_some());
}

#[test]
fn test_stack_exhaustion_interrupts() {
    // function rec() { return rec(); }
    let mut vm = Vm::new(VmConfig {
        max_call_depth: 200,
        ..VmConfig::default()
    });
    let mut b = BytecodeBuilder::function("rec", 0, 0);
    let (callee, this) = (b.temporary(0), b.temporary(1));
    b.enter();
    b.resolve_global(callee, "rec");
    b.call(callee, callee, this, 1);
    b.ret(callee);
    let template = FunctionTemplate::new(b.finish().unwrap());
    let rec = vm.new_function(&template, ScopeChain::new(Arc::clone(vm.global_object())));
    vm.define_global("rec", Value::Object(Arc::clone(&rec)));

    let completion = vm
        .call(&mut Interpreter::new(), &Value::Object(rec), Value::Undefined, &[])
        .unwrap();
    assert!(matches!(
        completion,
        Completion::Interrupted(InterruptReason::StackExhausted)
    ));
    assert_eq!(vm.registers().depth(), 0);
}

#[test]
fn test_watchdog_interrupts_loop() {
    let mut vm = Vm::default();
    let mut b = BytecodeBuilder::program(0);
    let undefined = b.constant(ConstantValue::Undefined);
    b.enter();
    let top = b.here();
    b.emit(OpcodeId::Loop, &[top.into()]);
    b.end(undefined);

    let watchdog = Watchdog::arm(vm.interrupt_handle(), Duration::from_millis(20));
    let completion = run(&mut vm, b);
    watchdog.disarm();
    assert!(matches!(completion, Completion::Interrupted(InterruptReason::Watchdog)));

    // The interrupt is consumed by the outermost entry.
    assert!(!vm.interrupt_handle().is_interrupted());
    assert_eq!(int(&run(&mut vm, call_adder())), 5);
}

#[test]
fn test_late_interrupt_does_not_leak_into_next_run() {
    let mut vm = Vm::default();
    assert_eq!(int(&run(&mut vm, call_adder())), 5);

    // A watchdog that fires after the script already completed.
    vm.interrupt_handle().interrupt();
    assert_eq!(int(&run(&mut vm, call_adder())), 5);
    assert!(!vm.interrupt_handle().is_interrupted());
}

#[test]
fn test_arguments_survive_return() {
    // function g(a) { return arguments; } var args = g(1, 2, 3); [args[0], args[2]]
    let mut g = BytecodeBuilder::function("g", 1, 1);
    let arguments = g.local(0);
    g.enter();
    g.emit(OpcodeId::CreateArguments, &[arguments.into()]);
    g.ret(arguments);

    let mut vm = Vm::default();
    let mut b = BytecodeBuilder::program(2);
    let (f, args) = (b.local(0), b.local(1));
    let zero = b.constant(ConstantValue::Int32(0));
    let one = b.constant(ConstantValue::Int32(1));
    let two = b.constant(ConstantValue::Int32(2));
    let three = b.constant(ConstantValue::Int32(3));
    let (t0, t1, t2, t3) = (b.temporary(0), b.temporary(1), b.temporary(2), b.temporary(3));
    let index = b.function_declaration(g.finish().unwrap());
    b.enter();
    b.emit(OpcodeId::NewFunc, &[f.into(), index.into()]);
    b.mov(t1, one);
    b.mov(t2, two);
    b.mov(t3, three);
    b.call(args, f, t0, 4);
    b.emit(OpcodeId::GetByVal, &[t0.into(), args.into(), zero.into()]);
    b.emit(OpcodeId::GetByVal, &[t1.into(), args.into(), two.into()]);
    b.emit(OpcodeId::NewArray, &[args.into(), t0.into(), 2.into()]);
    b.end(args);

    let completion = run(&mut vm, b);
    let array = completion.value().and_then(Value::as_object).unwrap();
    let elements = array.array_elements().unwrap().read().clone();
    assert!(matches!(elements.as_slice(), [Value::Int32(1), Value::Int32(3)]));
}

#[test]
fn test_closure_reads_torn_off_activation() {
    // function outer() { var v = 7; return function () { return v; }; } outer()()
    let mut inner = BytecodeBuilder::function("inner", 0, 0);
    let value = inner.temporary(0);
    inner.enter();
    inner.emit(OpcodeId::GetScopedVar, &[value.into(), 0.into(), 0.into()]);
    inner.ret(value);

    let mut outer = BytecodeBuilder::function("outer", 0, 2);
    let (v, activation) = (outer.local(0), outer.local(1));
    let seven = outer.constant(ConstantValue::Int32(7));
    let closure = outer.temporary(0);
    let index = outer.function_expression(inner.finish().unwrap());
    outer.symbol("v", v);
    outer.emit(OpcodeId::EnterWithActivation, &[activation.into()]);
    outer.mov(v, seven);
    outer.emit(OpcodeId::NewFuncExp, &[closure.into(), index.into()]);
    outer.ret(closure);

    let mut vm = Vm::default();
    let mut b = BytecodeBuilder::program(2);
    let (f, result) = (b.local(0), b.local(1));
    let this = b.temporary(0);
    let index = b.function_declaration(outer.finish().unwrap());
    b.enter();
    b.emit(OpcodeId::NewFunc, &[f.into(), index.into()]);
    b.call(result, f, this, 1);
    b.call(result, result, this, 1);
    b.end(result);

    assert_eq!(int(&run(&mut vm, b)), 7);
}

#[test]
fn test_construct_uses_prototype() {
    // function Point(x) { this.x = x; } var p = new Point(4); [p.x, p instanceof Point]
    let mut point = BytecodeBuilder::function("Point", 1, 0);
    let (this, x) = (point.this(), point.parameter(1));
    let undefined = point.constant(ConstantValue::Undefined);
    point.enter();
    point.put_by_id(this, "x", x);
    point.ret(undefined);

    let mut vm = Vm::default();
    let mut b = BytecodeBuilder::program(3);
    let (ctor, proto, object) = (b.local(0), b.local(1), b.local(2));
    let four = b.constant(ConstantValue::Int32(4));
    let (t0, t1) = (b.temporary(0), b.temporary(1));
    let index = b.function_declaration(point.finish().unwrap());
    b.enter();
    b.emit(OpcodeId::NewFunc, &[ctor.into(), index.into()]);
    b.get_by_id(proto, ctor, "prototype");
    b.mov(t1, four);
    b.construct(object, ctor, proto, t0, 2);
    b.get_by_id(t0, object, "x");
    b.emit(
        OpcodeId::InstanceOf,
        &[t1.into(), object.into(), ctor.into(), proto.into()],
    );
    b.emit(OpcodeId::NewArray, &[object.into(), t0.into(), 2.into()]);
    b.end(object);

    let completion = run(&mut vm, b);
    let array = completion.value().and_then(Value::as_object).unwrap();
    let elements = array.array_elements().unwrap().read().clone();
    assert!(matches!(elements.as_slice(), [Value::Int32(4), Value::Boolean(true)]));
}

#[test]
fn test_for_in_skips_deleted_properties() {
    let mut vm = Vm::default();
    let object = vm.new_object();
    for name in ["a", "b", "c"] {
        object.put(&Arc::from(name), Value::Int32(0));
    }
    vm.define_global("o", Value::Object(object));

    let mut b = BytecodeBuilder::program(3);
    let (base, iterator, count) = (b.local(0), b.local(1), b.local(2));
    let zero = b.constant(ConstantValue::Int32(0));
    let (name, deleted) = (b.temporary(0), b.temporary(1));
    let c = b.identifier("c");
    let body = b.new_label();
    let check = b.new_label();
    b.enter();
    b.resolve_global(base, "o");
    b.mov(count, zero);
    b.emit(OpcodeId::GetPNames, &[iterator.into(), base.into()]);
    b.jmp(check);
    b.bind(body);
    b.emit(OpcodeId::PreInc, &[count.into()]);
    b.emit(OpcodeId::DelById, &[deleted.into(), base.into(), c.into()]);
    b.bind(check);
    b.emit(OpcodeId::NextPName, &[name.into(), iterator.into(), body.into()]);
    b.end(count);

    assert_eq!(int(&run(&mut vm, b)), 2);
}

#[test]
fn test_host_function_reenters_vm() {
    let mut vm = Vm::default();
    vm.define_host_function("twice", 1, |ctx, _callee, _this, args| {
        let lock = ctx.vm().js_lock();
        assert!(lock.is_held_by_current_thread());
        let f = args.first().cloned().unwrap_or_default();
        let a = ctx.call(&f, Value::Undefined, &[])?;
        let b = ctx.call(&f, Value::Undefined, &[])?;
        Ok(Value::number(a.to_number() + b.to_number()))
    });

    let mut answer = BytecodeBuilder::function("answer", 0, 0);
    let k = answer.constant(ConstantValue::Int32(21));
    answer.enter();
    answer.ret(k);

    let mut b = BytecodeBuilder::program(2);
    let (twice, f) = (b.local(0), b.local(1));
    let (t0, t1) = (b.temporary(0), b.temporary(1));
    let index = b.function_declaration(answer.finish().unwrap());
    b.enter();
    b.emit(OpcodeId::NewFunc, &[f.into(), index.into()]);
    b.resolve_global(twice, "twice");
    b.mov(t1, f);
    b.call(t0, twice, t0, 2);
    b.end(t0);

    assert_eq!(int(&run(&mut vm, b)), 42);
    assert_eq!(vm.js_lock().lock_count(), 0);
}

#[test]
fn test_host_exception_is_catchable() {
    let mut vm = Vm::default();
    vm.define_host_function("fail", 0, |ctx, _callee, _this, _args| {
        Err(ctx.error(ErrorKind::RangeError, "out of range"))
    });

    let mut b = BytecodeBuilder::program(2);
    let (fail, caught) = (b.local(0), b.local(1));
    let this = b.temporary(0);
    b.enter();
    b.resolve_global(fail, "fail");
    let start = b.here();
    b.call(this, fail, this, 1);
    let end = b.here();
    b.end(this);
    let target = b.here();
    b.catch(caught);
    b.end(caught);
    b.handler(start, end, target, 0);

    let completion = run(&mut vm, b);
    let error = completion.value().and_then(Value::as_object).unwrap();
    assert_eq!(error.get("name").and_then(|v| v.as_str().map(str::to_string)).as_deref(), Some("RangeError"));
}

/// Comparator unit; `throws` makes any actual call fail
fn comparator(numeric_flag: bool, throws: bool) -> CompiledUnit {
    let mut b = BytecodeBuilder::function("compare", 2, 0);
    let (a, c) = (b.parameter(1), b.parameter(2));
    let message = b.constant(ConstantValue::String("comparator called".into()));
    let result = b.temporary(0);
    b.flags(UnitFlags {
        is_numeric_compare_function: numeric_flag,
        ..UnitFlags::default()
    });
    b.enter();
    if throws {
        b.throw(message);
    } else {
        b.binary(OpcodeId::Sub, result, c, a);
        b.ret(result);
    }
    b.finish().unwrap()
}

fn sort(vm: &mut Vm, values: &[i32], unit: CompiledUnit) -> Completion {
    let array = vm.new_array(values.iter().map(|n| Value::Int32(*n)).collect());
    let sort = vm.realm().array_prototype.get("sort").unwrap();
    let template = FunctionTemplate::new(unit);
    let compare = vm.new_function(&template, ScopeChain::new(Arc::clone(vm.global_object())));
    vm.call(&mut Interpreter::new(), &sort, Value::Object(array), &[Value::Object(compare)])
        .unwrap()
}

fn sorted(completion: &Completion) -> Vec<i32> {
    let array = completion.value().and_then(Value::as_object).unwrap();
    let elements = array.array_elements().unwrap().read().clone();
    elements.iter().map(Value::to_int32).collect()
}

#[test]
fn test_numeric_comparator_is_never_called() {
    let mut vm = Vm::default();
    let completion = sort(&mut vm, &[10, 9, 1, 100], comparator(true, true));
    assert_eq!(sorted(&completion), [1, 9, 10, 100]);
}

#[test]
fn test_script_comparator_is_called() {
    let mut vm = Vm::default();
    // b - a sorts descending
    let completion = sort(&mut vm, &[3, 1, 2], comparator(false, false));
    assert_eq!(sorted(&completion), [3, 2, 1]);

    let completion = sort(&mut vm, &[3, 1, 2], comparator(false, true));
    assert_eq!(completion.exception().unwrap().message, "comparator called");
}

struct CountingCompiler {
    compiles: AtomicUsize,
}

impl EvalCompiler for CountingCompiler {
    fn compile_eval(&self, source: &str) -> Result<CompiledUnit, String> {
        self.compiles.fetch_add(1, Ordering::SeqCst);
        if source == "(" {
            return Err("Unexpected end of script".into());
        }
        let mut b = BytecodeBuilder::new(CodeType::Eval, 1, 0);
        let length = b.constant(ConstantValue::Int32(source.len() as i32));
        b.enter();
        b.end(length);
        b.finish().map_err(|err| err.to_string())
    }
}

/// `eval(source) + eval(source)` from two call sites
fn eval_twice(source: &str) -> BytecodeBuilder {
    let mut b = BytecodeBuilder::program(2);
    let (eval, sum) = (b.local(0), b.local(1));
    let source = b.constant(ConstantValue::String(source.into()));
    let (t0, t1) = (b.temporary(0), b.temporary(1));
    b.flags(UnitFlags {
        uses_eval: true,
        ..UnitFlags::default()
    });
    b.enter();
    b.resolve_global(eval, "eval");
    b.mov(t1, source);
    b.call_eval(sum, eval, t0, 2);
    b.call_eval(t0, eval, t0, 2);
    b.binary(OpcodeId::Add, sum, sum, t0);
    b.end(sum);
    b
}

#[test]
fn test_direct_eval_is_cached_per_caller() {
    let mut vm = Vm::default();
    let compiler = Arc::new(CountingCompiler {
        compiles: AtomicUsize::new(0),
    });
    vm.set_eval_compiler(Arc::clone(&compiler) as Arc<dyn EvalCompiler>);

    let code_block = vm.link(eval_twice("1 + 2").finish().unwrap()).unwrap();
    let completion = vm.execute(&mut Interpreter::new(), &code_block);
    assert_eq!(int(&completion), 10);
    assert_eq!(compiler.compiles.load(Ordering::SeqCst), 1);
    assert_eq!(code_block.eval_cache().unwrap().lock().len(), 1);
}

#[test]
fn test_eval_errors() {
    let mut vm = Vm::default();
    let completion = run(&mut vm, eval_twice("1"));
    let message = &completion.exception().unwrap().message;
    assert_eq!(message, "EvalError: eval is not supported");

    vm.set_eval_compiler(Arc::new(CountingCompiler {
        compiles: AtomicUsize::new(0),
    }));
    let completion = run(&mut vm, eval_twice("("));
    let message = &completion.exception().unwrap().message;
    assert_eq!(message, "SyntaxError: Unexpected end of script");
}

#[derive(Clone, Default)]
struct Recorder {
    events: Arc<Mutex<Vec<String>>>,
}

impl Debugger for Recorder {
    fn hook(&mut self, event: DebugHook, _code_block: &CodeBlock, first_line: u32, last_line: u32) {
        self.events
            .lock()
            .unwrap()
            .push(format!("{event:?} {first_line}-{last_line}"));
    }

    fn exception(&mut self, value: &Value, _code_block: &CodeBlock, line: u32, has_handler: bool) {
        self.events
            .lock()
            .unwrap()
            .push(format!("exception {} line {line} handled {has_handler}", value.to_js_string()));
    }
}

#[test]
fn test_debugger_sees_hooks_and_exceptions() {
    let mut vm = Vm::default();
    let recorder = Recorder::default();
    vm.set_debugger(Box::new(recorder.clone()));

    let mut b = BytecodeBuilder::program(1);
    let caught = b.local(0);
    let oops = b.constant(ConstantValue::String("oops".into()));
    b.source("debug.js", 1, 5);
    b.enter();
    b.emit(OpcodeId::Debug, &[3.into(), 1.into(), 1.into()]);
    b.line(2);
    let start = b.here();
    b.throw(oops);
    let end = b.here();
    let target = b.here();
    b.catch(caught);
    b.emit(OpcodeId::Debug, &[4.into(), 5.into(), 5.into()]);
    b.line(4);
    b.throw(caught);
    b.handler(start, end, target, 0);

    let completion = run(&mut vm, b);
    assert!(completion.exception().is_some());
    let events = recorder.events.lock().unwrap().clone();
    assert_eq!(
        events,
        [
            "WillExecuteProgram 1-1",
            "exception oops line 2 handled true",
            "DidExecuteProgram 5-5",
            "exception oops line 4 handled false",
        ]
    );
    assert!(vm.take_debugger().is_some());
}
