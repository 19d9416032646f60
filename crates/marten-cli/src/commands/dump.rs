//! Dump command - disassemble a unit and every nested function.

use anyhow::Result;
use clap::Args;
use marten_vm_bytecode::{CompiledUnit, OpcodeTable};
use marten_vm_core::{CodeBlock, UnitOwner, Vm};
use std::path::PathBuf;

use crate::config::Config;

#[derive(Args)]
pub struct DumpCommand {
    /// Compiled unit (JSON)
    pub entry: PathBuf,
}

impl DumpCommand {
    pub fn run(&self, config: &Config) -> Result<()> {
        let unit = super::load_unit(&self.entry)?;
        let vm = Vm::new(config.vm_config());
        print!("{}", disassemble(&unit, &vm.opcodes()));
        Ok(())
    }
}

/// Listing of `unit` followed by its nested functions, depth first
pub fn disassemble(unit: &CompiledUnit, opcodes: &OpcodeTable) -> String {
    let mut out = String::new();
    write_unit(&mut out, unit, opcodes);
    out
}

fn write_unit(out: &mut String, unit: &CompiledUnit, opcodes: &OpcodeTable) {
    if !out.is_empty() {
        out.push('\n');
    }
    let code_block = CodeBlock::link(UnitOwner::new(unit.clone()), opcodes);
    out.push_str(&code_block.dump(opcodes));
    for function in unit.functions.iter().chain(&unit.function_expressions) {
        write_unit(out, function, opcodes);
    }
}
