//! Check command - validate a compiled unit without running it.

use anyhow::Result;
use clap::Args;
use marten_vm_bytecode::CompiledUnit;
use std::path::PathBuf;

#[derive(Args)]
pub struct CheckCommand {
    /// Compiled unit (JSON)
    pub entry: PathBuf,
}

impl CheckCommand {
    pub fn run(&self) -> Result<()> {
        let unit = super::load_unit(&self.entry)?;
        let counts = unit.site_counts();
        println!(
            "{}: ok ({} instruction words, {} nested functions, {} property sites, {} call sites)",
            self.entry.display(),
            unit.instruction_count(),
            count_nested(&unit),
            counts.structure_stubs,
            counts.call_links
        );
        Ok(())
    }
}

fn count_nested(unit: &CompiledUnit) -> usize {
    unit.functions
        .iter()
        .chain(&unit.function_expressions)
        .map(|function| 1 + count_nested(function))
        .sum()
}
