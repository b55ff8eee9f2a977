//! Tag field index
//!
//! Splits input strings by the configured separator and maintains one
//! posting list per tag. Wildcard `*suffix` patterns are served by the
//! optional suffix structure, or by a scan when it is disabled.

use std::collections::HashMap;

use roaring::RoaringBitmap;

use crate::index::suffix::SuffixTrie;
use crate::index::DocId;
use crate::schema::TagParams;

#[derive(Debug)]
pub struct TagIndex {
    params: TagParams,
    postings: HashMap<String, RoaringBitmap>,
    doc_tags: HashMap<DocId, Vec<String>>,
    suffix: Option<SuffixTrie>,
}

impl TagIndex {
    pub fn new(params: TagParams) -> Self {
        let suffix = params.with_suffixtrie.then(SuffixTrie::default);
        Self {
            params,
            postings: HashMap::new(),
            doc_tags: HashMap::new(),
            suffix,
        }
    }

    /// Normalize a raw tag the same way at index and query time.
    pub fn normalize(&self, tag: &str) -> String {
        let trimmed = tag.trim();
        if self.params.case_sensitive {
            trimmed.to_string()
        } else {
            trimmed.to_lowercase()
        }
    }

    /// Split a stored value into normalized tags.
    pub fn split(&self, raw: &str) -> Vec<String> {
        raw.split(self.params.separator)
            .map(|t| self.normalize(t))
            .filter(|t| !t.is_empty())
            .collect()
    }

    pub fn add(&mut self, doc: DocId, raw: &str) {
        self.remove(doc);
        let tags = self.split(raw);
        for tag in &tags {
            let posting = self.postings.entry(tag.clone()).or_default();
            if posting.is_empty() {
                if let Some(trie) = &mut self.suffix {
                    trie.insert(tag);
                }
            }
            posting.insert(doc);
        }
        if !tags.is_empty() {
            self.doc_tags.insert(doc, tags);
        }
    }

    pub fn remove(&mut self, doc: DocId) {
        let Some(tags) = self.doc_tags.remove(&doc) else {
            return;
        };
        for tag in tags {
            if let Some(posting) = self.postings.get_mut(&tag) {
                posting.remove(doc);
                if posting.is_empty() {
                    self.postings.remove(&tag);
                    if let Some(trie) = &mut self.suffix {
                        trie.remove(&tag);
                    }
                }
            }
        }
    }

    /// Documents matching one tag pattern. A leading `*` makes it a
    /// suffix wildcard.
    pub fn matching(&self, pattern: &str) -> RoaringBitmap {
        if let Some(suffix) = pattern.strip_prefix('*') {
            let needle = self.normalize(suffix);
            return self.matching_suffix(&needle);
        }
        let tag = self.normalize(pattern);
        self.postings.get(&tag).cloned().unwrap_or_default()
    }

    fn matching_suffix(&self, suffix: &str) -> RoaringBitmap {
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
                for (tag, posting) in &self.postings {
                    if tag.ends_with(suffix) {
                        out |= posting;
                    }
                }
            }
        }
        out
    }

    /// Distinct tags currently indexed (FT.TAGVALS).
    pub fn distinct_tags(&self) -> Vec<String> {
        self.postings.keys().cloned().collect()
    }
}
