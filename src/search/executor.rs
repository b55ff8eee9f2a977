//! Shard-local query evaluation
//!
//! Walks the expression tree against one shard's field indices and
//! materializes a doc-id set per node. KNN ranking happens above this
//! layer: the filter subtree evaluates here, then the vector index is
//! asked for top-K within the candidate set.

use std::collections::HashMap;
use std::time::Instant;

use roaring::RoaringBitmap;

use crate::index::FieldIndex;
use crate::query::QueryNode;
use crate::search::profile::{ProfileEvent, QueryProfile};

pub struct ExecutionContext<'a> {
    indexes: &'a HashMap<String, FieldIndex>,
    live: &'a RoaringBitmap,
    profiling: bool,
    depth: usize,
    events: Vec<ProfileEvent>,
}

impl<'a> ExecutionContext<'a> {
    pub fn new(
        indexes: &'a HashMap<String, FieldIndex>,
        live: &'a RoaringBitmap,
        profiling: bool,
    ) -> Self {
        Self {
            indexes,
            live,
            profiling,
            depth: 0,
            events: Vec::new(),
        }
    }

    /// Evaluate the tree, returning the matching set and the collected
    /// profile when profiling was enabled.
    pub fn run(mut self, node: &QueryNode) -> (RoaringBitmap, Option<QueryProfile>) {
        let result = self.eval(node);
        let profile = self
            .profiling
            .then(|| QueryProfile { events: self.events });
        (result, profile)
    }

    fn eval(&mut self, node: &QueryNode) -> RoaringBitmap {
        if !self.profiling {
            return self.eval_node(node);
        }

        let slot = self.events.len();
        self.events.push(ProfileEvent {
            depth: self.depth,
            descr: describe(node),
            micros: 0,
            num_processed: 0,
        });
        let start = Instant::now();
        self.depth += 1;
        let result = self.eval_node(node);
        self.depth -= 1;
        self.events[slot].micros = start.elapsed().as_micros() as u64;
        self.events[slot].num_processed = result.len() as usize;
        result
    }

    fn eval_node(&mut self, node: &QueryNode) -> RoaringBitmap {
        match node {
            QueryNode::MatchAll => self.live.clone(),
            QueryNode::Nothing => RoaringBitmap::new(),
            QueryNode::And(parts) => {
                let mut iter = parts.iter();
                let Some(first) = iter.next() else {
                    return RoaringBitmap::new();
                };
                let mut acc = self.eval(first);
                for part in iter {
                    if acc.is_empty() {
                        break;
                    }
                    acc &= self.eval(part);
                }
                acc
            }
            QueryNode::Or(parts) => {
                let mut acc = RoaringBitmap::new();
                for part in parts {
                    acc |= self.eval(part);
                }
                acc
            }
            QueryNode::Not(inner) => self.live - self.eval(inner),
            QueryNode::TagMatch { field, tags } => {
                let Some(FieldIndex::Tag(idx)) = self.indexes.get(field) else {
                    return RoaringBitmap::new();
                };
                let mut acc = RoaringBitmap::new();
                for tag in tags {
                    acc |= idx.matching(tag);
                }
                acc
            }
            QueryNode::NumericRange {
                field,
                lo,
                hi,
                lo_open,
                hi_open,
            } => {
                let Some(FieldIndex::Numeric(idx)) = self.indexes.get(field) else {
                    return RoaringBitmap::new();
                };
                idx.range(*lo, *hi, *lo_open, *hi_open)
            }
            QueryNode::TextTerm { field, term } => {
                self.over_text_fields(field.as_deref(), |idx| idx.match_term(term))
            }
            QueryNode::Phrase { field, terms } => {
                self.over_text_fields(field.as_deref(), |idx| idx.match_phrase(terms))
            }
        }
    }

    /// Apply `f` to one named TEXT index, or union it over all of them
    /// for field-less terms.
    fn over_text_fields<F>(&self, field: Option<&str>, f: F) -> RoaringBitmap
    where
        F: Fn(&crate::index::TextIndex) -> RoaringBitmap,
    {
        match field {
            Some(name) => match self.indexes.get(name) {
                Some(FieldIndex::Text(idx)) => f(idx),
                _ => RoaringBitmap::new(),
            },
            None => {
                let mut acc = RoaringBitmap::new();
                for index in self.indexes.values() {
                    if let FieldIndex::Text(idx) = index {
                        acc |= f(idx);
                    }
                }
                acc
            }
        }
    }
}

fn describe(node: &QueryNode) -> String {
    match node {
        QueryNode::MatchAll => "MatchAll".to_string(),
        QueryNode::Nothing => "Nothing".to_string(),
        QueryNode::And(parts) => format!("And({})", parts.len()),
        QueryNode::Or(parts) => format!("Or({})", parts.len()),
        QueryNode::Not(_) => "Not".to_string(),
        QueryNode::TagMatch { field, .. } => format!("TagMatch({field})"),
        QueryNode::NumericRange { field, .. } => format!("NumericRange({field})"),
        QueryNode::TextTerm { term, .. } => format!("TextTerm({term})"),
        QueryNode::Phrase { .. } => "Phrase".to_string(),
    }
}
