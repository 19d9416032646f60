//! End-to-end tests of the `marten` binary

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use marten_vm_bytecode::{BytecodeBuilder, CompiledUnit, ConstantValue, OpcodeId};

fn marten(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_marten"))
        .args(args)
        .current_dir(dir)
        .env_remove("RUST_LOG")
        .env_remove("MARTEN_DISABLE_JIT")
        .output()
        .expect("failed to spawn marten")
}

fn write_unit(dir: &Path, name: &str, unit: &CompiledUnit) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, unit.to_json().unwrap()).unwrap();
    path
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

/// `function f(a, b) { return a + b; } f(2, 3)`
fn call_adder() -> CompiledUnit {
    let mut f = BytecodeBuilder::function("f", 2, 0);
    let (lhs, rhs) = (f.parameter(1), f.parameter(2));
    let sum = f.temporary(0);
    f.enter();
    f.get_by_id(sum, lhs, "length");
    f.binary(OpcodeId::Add, sum, lhs, rhs);
    f.ret(sum);

    let mut b = BytecodeBuilder::program(1);
    let func = b.local(0);
    let two = b.constant(ConstantValue::Int32(2));
    let three = b.constant(ConstantValue::Int32(3));
    let (this, first, second) = (b.temporary(0), b.temporary(1), b.temporary(2));
    let index = b.function_declaration(f.finish().unwrap());
    b.enter();
    b.emit(OpcodeId::NewFunc, &[func.into(), index.into()]);
    b.mov(first, two);
    b.mov(second, three);
    b.call(this, func, this, 3);
    b.end(this);
    b.finish().unwrap()
}

/// `for (;;) {}`
fn spin() -> CompiledUnit {
    let mut b = BytecodeBuilder::program(0);
    let undefined = b.constant(ConstantValue::Undefined);
    b.enter();
    let top = b.here();
    b.emit(OpcodeId::Loop, &[top.into()]);
    b.end(undefined);
    b.finish().unwrap()
}

#[test]
fn run_prints_completion_value() {
    let dir = tempfile::tempdir().unwrap();
    let unit = write_unit(dir.path(), "adder.json", &call_adder());

    let output = marten(dir.path(), &["run", unit.to_str().unwrap()]);
    assert!(output.status.success(), "{}", stderr(&output));
    assert_eq!(stdout(&output), "5\n");

    let output = marten(dir.path(), &["run", "--jit", unit.to_str().unwrap()]);
    assert!(output.status.success(), "{}", stderr(&output));
    assert_eq!(stdout(&output), "5\n");
}

#[test]
fn print_is_a_global() {
    let mut b = BytecodeBuilder::program(1);
    let print = b.local(0);
    let hello = b.constant(ConstantValue::String("hello".into()));
    let world = b.constant(ConstantValue::String("world".into()));
    let (this, first, second) = (b.temporary(0), b.temporary(1), b.temporary(2));
    b.enter();
    b.resolve_global(print, "print");
    b.mov(first, hello);
    b.mov(second, world);
    b.call(this, print, this, 3);
    b.end(this);

    let dir = tempfile::tempdir().unwrap();
    let unit = write_unit(dir.path(), "print.json", &b.finish().unwrap());
    let output = marten(dir.path(), &["run", unit.to_str().unwrap()]);
    assert!(output.status.success(), "{}", stderr(&output));
    assert_eq!(stdout(&output), "hello world\n");
}

#[test]
fn uncaught_exception_exits_with_one() {
    let mut b = BytecodeBuilder::program(0);
    let boom = b.constant(ConstantValue::String("boom".into()));
    b.enter();
    b.line(3);
    b.throw(boom);
    b.end(boom);
    b.source("boom.js", 1, 5);

    let dir = tempfile::tempdir().unwrap();
    let unit = write_unit(dir.path(), "boom.json", &b.finish().unwrap());
    let output = marten(dir.path(), &["run", unit.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(1));
    let message = stderr(&output);
    assert!(message.contains("Uncaught boom at boom.js:3"), "{message}");
}

#[test]
fn timeout_interrupts_with_two() {
    let dir = tempfile::tempdir().unwrap();
    let unit = write_unit(dir.path(), "spin.json", &spin());
    for backend in [None, Some("--jit")] {
        let mut args = vec!["run", "--timeout-ms", "50"];
        args.extend(backend);
        args.push(unit.to_str().unwrap());
        let output = marten(dir.path(), &args);
        assert_eq!(output.status.code(), Some(2), "{args:?}");
        assert!(stderr(&output).contains("Execution interrupted"));
    }
}

#[test]
fn watchdog_timeout_comes_from_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let nested = dir.path().join("scripts");
    std::fs::create_dir(&nested).unwrap();
    std::fs::write(dir.path().join("marten.toml"), "[watchdog]\ntimeout_ms = 50\n").unwrap();
    let unit = write_unit(&nested, "spin.json", &spin());

    let output = marten(&nested, &["run", unit.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(2), "{}", stderr(&output));
}

#[test]
fn dump_lists_nested_functions() {
    let dir = tempfile::tempdir().unwrap();
    let unit = write_unit(dir.path(), "adder.json", &call_adder());
    let output = marten(dir.path(), &["dump", unit.to_str().unwrap()]);
    assert!(output.status.success(), "{}", stderr(&output));

    let listing = stdout(&output);
    assert!(listing.contains("new_func"), "{listing}");
    assert!(listing.contains("function f"), "{listing}");
    assert!(listing.contains("get_by_id"), "{listing}");
}

#[test]
fn run_dump_shows_cache_state() {
    let dir = tempfile::tempdir().unwrap();
    let unit = write_unit(dir.path(), "adder.json", &call_adder());
    let output = marten(dir.path(), &["run", "--dump", unit.to_str().unwrap()]);
    assert!(output.status.success(), "{}", stderr(&output));
    let text = stdout(&output);
    assert!(text.starts_with("5\n"), "{text}");
    assert!(text.contains("call"), "{text}");
}

#[test]
fn check_accepts_valid_and_rejects_broken_units() {
    let dir = tempfile::tempdir().unwrap();
    let unit = write_unit(dir.path(), "adder.json", &call_adder());
    let output = marten(dir.path(), &["check", unit.to_str().unwrap()]);
    assert!(output.status.success(), "{}", stderr(&output));
    let report = stdout(&output);
    assert!(
        report.contains("ok (18 instruction words, 1 nested functions, 0 property sites, 1 call sites)"),
        "{report}"
    );

    let broken = dir.path().join("broken.json");
    std::fs::write(&broken, "{ \"instructions\": [ ").unwrap();
    let output = marten(dir.path(), &["check", broken.to_str().unwrap()]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("Failed to load"));
}
