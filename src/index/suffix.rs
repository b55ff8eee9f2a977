//! Suffix lookup structure for `*suffix` wildcards
//!
//! Stores reversed terms in a sorted map so a suffix query becomes a
//! prefix range scan over the reversed keys, O(matches) per lookup.

use std::collections::BTreeSet;

#[derive(Debug, Default, Clone)]
pub struct SuffixTrie {
    reversed: BTreeSet<String>,
}

fn reverse(s: &str) -> String {
    s.chars().rev().collect()
}

impl SuffixTrie {
    pub fn insert(&mut self, term: &str) {
        self.reversed.insert(reverse(term));
    }

    pub fn remove(&mut self, term: &str) {
        self.reversed.remove(&reverse(term));
    }

    /// All indexed terms ending with `suffix`.
    pub fn lookup_suffix(&self, suffix: &str) -> Vec<String> {
        let prefix = reverse(suffix);
        self.reversed
            .range(prefix.clone()..)
            .take_while(|t| t.starts_with(&prefix))
            .map(|t| reverse(t))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.reversed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reversed.is_empty()
    }
}
