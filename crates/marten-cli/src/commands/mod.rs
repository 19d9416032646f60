//! CLI command implementations.

pub mod check;
pub mod dump;
pub mod run;

use anyhow::{Context, Result};
use marten_vm_bytecode::CompiledUnit;
use std::path::Path;

/// Read and validate a compiled unit
pub fn load_unit(path: &Path) -> Result<CompiledUnit> {
    let unit = CompiledUnit::from_path(path).with_context(|| format!("Failed to load {}", path.display()))?;
    unit.validate()
        .with_context(|| format!("Invalid unit {}", path.display()))?;
    Ok(unit)
}
