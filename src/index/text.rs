//! Full-text field index
//!
//! Inverted lists `term -> RoaringBitmap` with per-term positions for
//! phrase matching. Synonym expansion happens at index time: a document
//! containing a term is also posted under every synonym of that term, so
//! a synonym-group update only has to re-index the documents that contain
//! one of the group's terms.

use std::collections::{HashMap, HashSet};

use roaring::RoaringBitmap;

use crate::index::suffix::SuffixTrie;
use crate::index::DocId;
use crate::synonyms::SynonymGroups;

/// Tokenize into lowercased alphanumeric words with sequential positions.
/// Stopwords are dropped before positions are assigned.
pub fn tokenize(text: &str, stopwords: &HashSet<String>) -> Vec<(String, u32)> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| !t.is_empty() && !stopwords.contains(*t))
        .map(|t| t.to_string())
        .enumerate()
        .map(|(i, t)| (t, i as u32))
        .collect()
}

#[derive(Debug)]
pub struct TextIndex {
    postings: HashMap<String, RoaringBitmap>,
    /// term -> doc -> token positions; absent for synonym-expanded postings
    positions: HashMap<String, HashMap<DocId, Vec<u32>>>,
    /// Full posted term set per doc, including synonym expansions,
    /// so removal can clear everything the doc touched.
    doc_terms: HashMap<DocId, HashSet<String>>,
    suffix: Option<SuffixTrie>,
}

impl TextIndex {
    pub fn new(with_suffixtrie: bool) -> Self {
        Self {
            postings: HashMap::new(),
            positions: HashMap::new(),
            doc_terms: HashMap::new(),
            suffix: with_suffixtrie.then(SuffixTrie::default),
        }
    }

    pub fn add(
        &mut self,
        doc: DocId,
        text: &str,
        stopwords: &HashSet<String>,
        synonyms: &SynonymGroups,
    ) {
        self.remove(doc);

        let tokens = tokenize(text, stopwords);
        if tokens.is_empty() {
            return;
        }

        let mut posted: HashSet<String> = HashSet::new();
        for (term, pos) in &tokens {
            self.post(term, doc);
            self.positions
                .entry(term.clone())
                .or_default()
                .entry(doc)
                .or_default()
                .push(*pos);
            posted.insert(term.clone());

            for synonym in synonyms.synonyms_of(term) {
                self.post(synonym, doc);
                posted.insert(synonym.to_string());
            }
        }
        self.doc_terms.insert(doc, posted);
    }

    fn post(&mut self, term: &str, doc: DocId) {
        let posting = self.postings.entry(term.to_string()).or_default();
        if posting.is_empty() {
            if let Some(trie) = &mut self.suffix {
                trie.insert(term);
            }
        }
        posting.insert(doc);
    }

    pub fn remove(&mut self, doc: DocId) {
        let Some(terms) = self.doc_terms.remove(&doc) else {
            return;
        };
        for term in terms {
            if let Some(by_doc) = self.positions.get_mut(&term) {
                by_doc.remove(&doc);
                if by_doc.is_empty() {
                    self.positions.remove(&term);
                }
            }
            if let Some(posting) = self.postings.get_mut(&term) {
                posting.remove(doc);
                if posting.is_empty() {
                    self.postings.remove(&term);
                    if let Some(trie) = &mut self.suffix {
                        trie.remove(&term);
                    }
                }
            }
        }
    }

    /// Documents containing `term`. A leading `*` makes it a suffix
    /// wildcard over indexed terms.
    pub fn match_term(&self, term: &str) -> RoaringBitmap {
        if let Some(suffix) = term.strip_prefix('*') {
            return self.match_suffix(&suffix.to_lowercase());
        }
        self.postings
            .get(&term.to_lowercase())
            .cloned()
            .unwrap_or_default()
    }

    fn match_suffix(&self, suffix: &str) -> RoaringBitmap {
        let mut out = RoaringBitmap::new();
        match &self.suffix {
            Some(trie) => {
                for term in trie.lookup_suffix(suffix) {
                    if let Some(posting) = self.postings.get(&term) {
                        out |= posting;
                    }
                }
            }
            None => {
                for (term, posting) in &self.postings {
                    if term.ends_with(suffix) {
                        out |= posting;
                    }
                }
            }
        }
        out
    }

    /// Documents containing all `terms` at consecutive positions.
    pub fn match_phrase(&self, terms: &[String]) -> RoaringBitmap {
        let mut out = RoaringBitmap::new();
        if terms.is_empty() {
            return out;
        }
        if terms.len() == 1 {
            return self.match_term(&terms[0]);
        }

        let mut candidates = self.match_term(&terms[0]);
        for term in &terms[1..] {
            candidates &= self.match_term(term);
            if candidates.is_empty() {
                return out;
            }
        }

        'docs: for doc in candidates.iter() {
            let Some(first) = self
                .positions
                .get(&terms[0].to_lowercase())
                .and_then(|m| m.get(&doc))
            else {
                continue;
            };
            for start in first {
                let mut aligned = true;
                for (offset, term) in terms.iter().enumerate().skip(1) {
                    let ok = self
                        .positions
                        .get(&term.to_lowercase())
                        .and_then(|m| m.get(&doc))
                        .map(|ps| ps.contains(&(start + offset as u32)))
                        .unwrap_or(false);
                    if !ok {
                        aligned = false;
                        break;
                    }
                }
                if aligned {
                    out.insert(doc);
                    continue 'docs;
                }
            }
        }
        out
    }

    /// Documents posted under any of `terms` (targeted synonym rebuild).
    pub fn docs_with_any(&self, terms: &[String]) -> RoaringBitmap {
        let mut out = RoaringBitmap::new();
        for term in terms {
            out |= self.match_term(term);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_stop() -> HashSet<String> {
        HashSet::new()
    }

    #[test]
    fn test_tokenize_basic() {
        let tokens = tokenize("Hello, World! hello", &no_stop());
        let terms: Vec<_> = tokens.iter().map(|(t, _)| t.as_str()).collect();
        assert_eq!(terms, vec!["hello", "world", "hello"]);
    }

    #[test]
    fn test_tokenize_stopwords() {
        let stop: HashSet<String> = ["the".to_string()].into_iter().collect();
        let tokens = tokenize("the quick fox", &stop);
        assert_eq!(tokens[0], ("quick".to_string(), 0));
        assert_eq!(tokens[1], ("fox".to_string(), 1));
    }

    #[test]
    fn test_term_match() {
        let mut idx = TextIndex::new(false);
        let syn = SynonymGroups::default();
        idx.add(1, "quick brown fox", &no_stop(), &syn);
        idx.add(2, "lazy dog", &no_stop(), &syn);

        assert!(idx.match_term("fox").contains(1));
        assert!(idx.match_term("FOX").contains(1));
        assert!(idx.match_term("dog").contains(2));
        assert!(idx.match_term("cat").is_empty());
    }

    #[test]
    fn test_phrase_match_requires_adjacency() {
        let mut idx = TextIndex::new(false);
        let syn = SynonymGroups::default();
        idx.add(1, "quick brown fox", &no_stop(), &syn);
        idx.add(2, "quick fox brown", &no_stop(), &syn);

        let hits = idx.match_phrase(&["quick".to_string(), "brown".to_string()]);
        assert!(hits.contains(1));
        assert!(!hits.contains(2));
    }

    #[test]
    fn test_remove_clears_everything() {
        let mut idx = TextIndex::new(false);
        let syn = SynonymGroups::default();
        idx.add(1, "solo term", &no_stop(), &syn);
        idx.remove(1);
        assert!(idx.match_term("solo").is_empty());
        assert!(idx.match_phrase(&["solo".to_string(), "term".to_string()]).is_empty());
    }

    #[test]
    fn test_synonym_expansion_at_index_time() {
        let mut syn = SynonymGroups::default();
        syn.update_group("g1", vec!["car".to_string(), "automobile".to_string()]);

        let mut idx = TextIndex::new(false);
        idx.add(1, "my automobile", &no_stop(), &syn);

        assert!(idx.match_term("car").contains(1));
        assert!(idx.match_term("automobile").contains(1));
    }

    #[test]
    fn test_suffix_wildcard() {
        let mut idx = TextIndex::new(true);
        let syn = SynonymGroups::default();
        idx.add(1, "running fast", &no_stop(), &syn);
        assert!(idx.match_term("*ing").contains(1));
        assert!(idx.match_term("*zzz").is_empty());
    }
}
