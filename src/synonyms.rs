//! Synonym groups attached to an index
//!
//! Terms in the same group match interchangeably. Group updates trigger a
//! targeted re-index of the documents containing any term of the group
//! (see `ShardDocIndex::rebuild_for_group`).

use std::collections::{HashMap, HashSet};

/// `group_id -> set of terms`, with reverse lookup by term.
#[derive(Debug, Clone, Default)]
pub struct SynonymGroups {
    groups: HashMap<String, HashSet<String>>,
}

impl SynonymGroups {
    /// Replace the terms of one group. Terms are lowercased; matching is
    /// case-insensitive the same way the text index normalizes tokens.
    pub fn update_group(&mut self, group_id: &str, terms: impl IntoIterator<Item = String>) {
        let entry = self.groups.entry(group_id.to_string()).or_default();
        for term in terms {
            entry.insert(term.to_lowercase());
        }
    }

    pub fn groups(&self) -> &HashMap<String, HashSet<String>> {
        &self.groups
    }

    /// All synonyms of `term` across every group containing it,
    /// excluding the term itself.
    pub fn synonyms_of(&self, term: &str) -> Vec<&str> {
        let mut out = Vec::new();
        for group in self.groups.values() {
            if group.contains(term) {
                out.extend(group.iter().filter(|t| t.as_str() != term).map(|t| t.as_str()));
            }
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_update_accumulates() {
        let mut syn = SynonymGroups::default();
        syn.update_group("g1", vec!["car".to_string(), "automobile".to_string()]);
        syn.update_group("g1", vec!["auto".to_string()]);
        assert_eq!(syn.groups()["g1"].len(), 3);
    }

    #[test]
    fn test_synonyms_of() {
        let mut syn = SynonymGroups::default();
        syn.update_group("g1", vec!["car".to_string(), "automobile".to_string()]);
        let mut sibs = syn.synonyms_of("car");
        sibs.sort();
        assert_eq!(sibs, vec!["automobile"]);
        assert!(syn.synonyms_of("bike").is_empty());
    }

    #[test]
    fn test_terms_lowercased() {
        let mut syn = SynonymGroups::default();
        syn.update_group("g1", vec!["Car".to_string(), "AUTO".to_string()]);
        assert!(!syn.synonyms_of("auto").is_empty());
    }
}
