//! Path matching logic.
//!
//! # Responsibilities
//! - Exact path lookup (O(1) via HashMap)
//! - Longest-prefix fallback over keys sorted at build time
//!
//! # Design Decisions
//! - Path matching is case-sensitive
//! - Keys sorted by length descending, then lexicographically, so the first
//!   prefix hit is the longest one and ties resolve the same way every run
//! - No regex to guarantee O(n) matching

use std::collections::HashMap;

/// A compiled table of path keys mapped to values.
#[derive(Debug)]
pub struct PrefixTable<T> {
    /// Entries ordered longest key first.
    entries: Vec<(String, T)>,
    /// Key → position in `entries`.
    exact: HashMap<String, usize>,
}

impl<T> PrefixTable<T> {
    /// Compile a table. Later duplicates of a key are ignored.
    pub fn new(entries: impl IntoIterator<Item = (String, T)>) -> Self {
        let mut sorted: Vec<(String, T)> = Vec::new();
        for (key, value) in entries {
            if sorted.iter().any(|(k, _)| *k == key) {
                tracing::warn!(key = %key, "Duplicate path key ignored");
                continue;
            }
            sorted.push((key, value));
        }
        sorted.sort_by(|(a, _), (b, _)| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

        let exact = sorted
            .iter()
            .enumerate()
            .map(|(i, (k, _))| (k.clone(), i))
            .collect();

        Self { entries: sorted, exact }
    }

    /// Exact match first, then the longest key that prefixes `path`.
    pub fn lookup(&self, path: &str) -> Option<(&str, &T)> {
        if let Some(&i) = self.exact.get(path) {
            let (k, v) = &self.entries[i];
            return Some((k.as_str(), v));
        }

        self.entries
            .iter()
            .find(|(k, _)| path.starts_with(k.as_str()))
            .map(|(k, v)| (k.as_str(), v))
    }

    /// Whether `key` was configured verbatim.
    pub fn contains_key(&self, key: &str) -> bool {
        self.exact.contains_key(key)
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }
}
