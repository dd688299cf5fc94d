// SPDX-License-Identifier: MIT OR Apache-2.0
//! A small interning pool for segment and context names.

use std::collections::HashMap;

/// Index of an interned string within a [`StringPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StringId(u32);

impl StringId {
    /// Zero-based position of this string within the pool.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// An append-only string interning pool.
///
/// Interning the same string twice yields the same id; ids are dense and
/// double as zero-based indices into the pool's insertion order, which is
/// what the trace format's string table references.
#[derive(Debug, Default)]
pub struct StringPool {
    strings: Vec<String>,
    index: HashMap<String, StringId>,
}

impl StringPool {
    /// An empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern `s`, returning its id.
    pub fn add(&mut self, s: &str) -> StringId {
        if let Some(&id) = self.index.get(s) {
            return id;
        }
        let id = StringId(self.strings.len() as u32);
        self.strings.push(s.to_owned());
        self.index.insert(s.to_owned(), id);
        id
    }

    /// Look up an interned string.
    pub fn get(&self, id: StringId) -> Option<&str> {
        self.strings.get(id.index()).map(String::as_str)
    }

    /// Find an already interned string without adding it.
    pub fn find(&self, s: &str) -> Option<StringId> {
        self.index.get(s).copied()
    }

    /// Number of distinct interned strings.
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    /// True when nothing has been interned.
    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    /// Serialize the pool as a JSON array in insertion order.
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.strings).unwrap_or_else(|_| "[]".to_owned())
    }
}
