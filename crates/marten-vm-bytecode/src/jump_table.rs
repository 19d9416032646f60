//! Switch jump tables
//!
//! Targets are absolute instruction offsets, so a table is computed once by
//! the generator and used as-is by every backend.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Dense table for `switch_imm` and `switch_char`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimpleJumpTable {
    /// Key of the first slot
    pub min: i32,
    /// Target per key; `None` falls back to the default target
    pub branches: Vec<Option<u32>>,
}

impl SimpleJumpTable {
    /// Create an empty table starting at `min`
    pub fn new(min: i32) -> Self {
        Self {
            min,
            branches: Vec::new(),
        }
    }

    /// Record `key -> target`, growing the table as needed
    pub fn add(&mut self, key: i32, target: u32) {
        let Some(slot) = key.checked_sub(self.min).and_then(|s| usize::try_from(s).ok()) else {
            return;
        };
        if slot >= self.branches.len() {
            self.branches.resize(slot + 1, None);
        }
        self.branches[slot] = Some(target);
    }

    /// Target for `key`, if any
    #[inline]
    pub fn target_for(&self, key: i32) -> Option<u32> {
        let slot = usize::try_from(key.checked_sub(self.min)?).ok()?;
        self.branches.get(slot).copied().flatten()
    }

    /// Release excess capacity
    pub fn shrink_to_fit(&mut self) {
        self.branches.shrink_to_fit();
    }
}

/// Table for `switch_string`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StringJumpTable {
    /// Target per key
    pub branches: FxHashMap<String, u32>,
}

impl StringJumpTable {
    /// Target for `key`, if any
    #[inline]
    pub fn target_for(&self, key: &str) -> Option<u32> {
        self.branches.get(key).copied()
    }

    /// Entries sorted by key
    pub fn sorted(&self) -> Vec<(&str, u32)> {
        let mut entries: Vec<_> = self.branches.iter().map(|(k, v)| (k.as_str(), *v)).collect();
        entries.sort_unstable();
        entries
    }

    /// Release excess capacity
    pub fn shrink_to_fit(&mut self) {
        self.branches.shrink_to_fit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_table() {
        let mut table = SimpleJumpTable::new(-1);
        table.add(-1, 10);
        table.add(2, 20);
        assert_eq!(table.target_for(-1), Some(10));
        assert_eq!(table.target_for(0), None);
        assert_eq!(table.target_for(2), Some(20));
        assert_eq!(table.target_for(3), None);
        assert_eq!(table.target_for(-5), None);
        assert_eq!(table.target_for(i32::MIN), None);
    }

    #[test]
    fn test_string_table() {
        let mut table = StringJumpTable::default();
        table.branches.insert("b".into(), 9);
        table.branches.insert("a".into(), 4);
        assert_eq!(table.target_for("a"), Some(4));
        assert_eq!(table.target_for("c"), None);
        assert_eq!(table.sorted(), vec![("a", 4), ("b", 9)]);
    }
}
