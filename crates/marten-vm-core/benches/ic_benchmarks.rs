//! Inline Cache (IC) Performance Benchmarks
//!
//! Measures property access performance across different IC states.

use criterion::{Criterion, criterion_group, criterion_main};
use marten_vm_bytecode::{BytecodeBuilder, ConstantValue, OpcodeId};
use marten_vm_core::{CodeBlock, Interpreter, Vm};
use std::hint::black_box;
use std::sync::Arc;

const ITERATIONS: i32 = 1000;

/// Loop `ITERATIONS` times reading `o.x` where `o` is picked from `shapes`
/// distinct layouts round-robin.
fn read_loop(vm: &Vm, shapes: usize) -> Arc<CodeBlock> {
    // r0..r3 = objects, r4 = counter, r5 = sum, r6 = selector
    let mut b = BytecodeBuilder::program(7);
    let objects: Vec<_> = (0..4).map(|i| b.local(i)).collect();
    let (counter, sum, selector) = (b.local(4), b.local(5), b.local(6));
    let zero = b.constant(ConstantValue::Int32(0));
    let limit = b.constant(ConstantValue::Int32(ITERATIONS));
    let modulus = b.constant(ConstantValue::Int32(shapes as i32));
    let value = b.temporary(0);
    let names = ["a", "b", "c", "d"];

    b.enter();
    for (i, object) in objects.iter().enumerate() {
        b.new_object(*object);
        // Object i gets i leading properties before `x`.
        for name in &names[..i % shapes] {
            b.put_by_id(*object, name, zero);
        }
        b.put_by_id(*object, "x", limit);
    }
    b.mov(counter, zero);
    b.mov(sum, zero);

    let top = b.here();
    let cases: Vec<_> = (0..shapes as i32).map(|i| (i, b.new_label())).collect();
    let join = b.new_label();
    b.binary(OpcodeId::Mod, selector, counter, modulus);
    b.switch_imm(selector, &cases, cases[0].1);
    for (i, (_, label)) in cases.iter().enumerate() {
        b.bind(*label);
        b.mov(value, objects[i]);
        b.jmp(join);
    }
    b.bind(join);
    // One shared read site sees every shape.
    b.get_by_id(value, value, "x");
    b.binary(OpcodeId::Add, sum, sum, value);
    b.emit(OpcodeId::PreInc, &[counter.into()]);
    b.emit(OpcodeId::LoopIfLess, &[counter.into(), limit.into(), top.into()]);
    b.end(sum);

    vm.link(b.finish().unwrap()).unwrap()
}

/// Benchmark: Monomorphic property access (IC hits consistently)
fn bench_monomorphic_property_access(c: &mut Criterion) {
    c.bench_function("ic_monomorphic_1000_reads", |b| {
        b.iter(|| {
            let mut vm = Vm::default();
            let code_block = read_loop(&vm, 1);
            let completion = vm.execute(&mut Interpreter::new(), black_box(&code_block));
            black_box(completion)
        })
    });
}

/// Benchmark: Polymorphic property access (up to 4 shapes per site)
fn bench_polymorphic_property_access(c: &mut Criterion) {
    let mut group = c.benchmark_group("ic_polymorphic");
    for shapes in [2, 4] {
        group.bench_function(format!("{shapes}_shapes_1000_reads"), |b| {
            b.iter(|| {
                let mut vm = Vm::default();
                let code_block = read_loop(&vm, shapes);
                let completion = vm.execute(&mut Interpreter::new(), black_box(&code_block));
                black_box(completion)
            })
        });
    }
    group.finish();
}

/// Benchmark: Property writes through a transition-caching site
fn bench_property_set(c: &mut Criterion) {
    // for (i = 0; i < N; i++) { o = {}; o.x = i; o.y = i; }
    let mut b = BytecodeBuilder::program(2);
    let (object, counter) = (b.local(0), b.local(1));
    let zero = b.constant(ConstantValue::Int32(0));
    let limit = b.constant(ConstantValue::Int32(ITERATIONS));
    b.enter();
    b.mov(counter, zero);
    let top = b.here();
    b.new_object(object);
    b.put_by_id(object, "x", counter);
    b.put_by_id(object, "y", counter);
    b.emit(OpcodeId::PreInc, &[counter.into()]);
    b.emit(OpcodeId::LoopIfLess, &[counter.into(), limit.into(), top.into()]);
    b.end(counter);
    let unit = b.finish().unwrap();

    c.bench_function("ic_property_set_1000_transitions", |bench| {
        bench.iter(|| {
            let mut vm = Vm::default();
            let code_block = vm.link(unit.clone()).unwrap();
            let completion = vm.execute(&mut Interpreter::new(), black_box(&code_block));
            black_box(completion)
        })
    });
}

criterion_group!(
    benches,
    bench_monomorphic_property_access,
    bench_polymorphic_property_access,
    bench_property_set
);
criterion_main!(benches);
