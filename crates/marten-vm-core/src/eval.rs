//! Direct eval support
//!
//! The machine does not parse source. Direct `eval` hands the string to an
//! [`EvalCompiler`] supplied by the host and caches the linked result per
//! calling code block.

use std::sync::Arc;

use marten_vm_bytecode::CompiledUnit;
use rustc_hash::FxHashMap;

use crate::code_block::CodeBlock;

/// Longest source string worth caching
pub const MAX_CACHEABLE_SOURCE_LENGTH: usize = 256;

/// Entries one code block keeps
pub const MAX_CACHE_ENTRIES: usize = 64;

/// Compiles eval source into a unit of [`CodeType::Eval`](marten_vm_bytecode::CodeType)
pub trait EvalCompiler: Send + Sync {
    /// Compile `source`; `Err` carries the SyntaxError message
    fn compile_eval(&self, source: &str) -> Result<CompiledUnit, String>;
}

/// Per-code-block cache of compiled eval source
#[derive(Default)]
pub struct EvalCodeCache {
    entries: FxHashMap<Arc<str>, Arc<CodeBlock>>,
}

impl EvalCodeCache {
    /// Cached code for `source`
    pub fn get(&self, source: &str) -> Option<Arc<CodeBlock>> {
        self.entries.get(source).cloned()
    }

    /// Remember `code` for `source` if it is small enough and room remains
    pub fn insert(&mut self, source: &str, code: &Arc<CodeBlock>) {
        if source.len() > MAX_CACHEABLE_SOURCE_LENGTH || self.entries.len() >= MAX_CACHE_ENTRIES {
            return;
        }
        self.entries.insert(Arc::from(source), Arc::clone(code));
    }

    /// Cached entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is cached
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
