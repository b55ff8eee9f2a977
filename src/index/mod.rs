//! Typed per-field index structures
//!
//! Each schema field owns one of these; the shard-local executor
//! resolves query predicates against them.

pub mod numeric;
pub mod suffix;
pub mod tag;
pub mod text;
pub mod vector;

pub use numeric::NumericIndex;
pub use suffix::SuffixTrie;
pub use tag::TagIndex;
pub use text::TextIndex;
pub use vector::{FlatVectorIndex, HnswVectorIndex, VectorFieldIndex};

use std::collections::HashSet;

use crate::doc::RawValue;
use crate::schema::{FieldParams, FieldSpec};
use crate::synonyms::SynonymGroups;

/// Shard-local document id. Dense per shard; keys map to ids in the
/// owning `ShardDocIndex`.
pub type DocId = u32;

/// Shared context for ingesting one document's field values.
pub struct IngestContext<'a> {
    pub stopwords: &'a HashSet<String>,
    pub synonyms: &'a SynonymGroups,
}

/// One field's index, dispatched by schema type.
#[derive(Debug)]
pub enum FieldIndex {
    Tag(TagIndex),
    Text(TextIndex),
    Numeric(NumericIndex),
    Vector(VectorFieldIndex),
}

impl FieldIndex {
    pub fn for_spec(spec: &FieldSpec) -> FieldIndex {
        match &spec.params {
            FieldParams::Tag(p) => FieldIndex::Tag(TagIndex::new(p.clone())),
            FieldParams::Text(p) => FieldIndex::Text(TextIndex::new(p.with_suffixtrie)),
            FieldParams::Numeric(p) => FieldIndex::Numeric(NumericIndex::new(p.block_size)),
            FieldParams::Vector(p) => FieldIndex::Vector(VectorFieldIndex::new(p)),
        }
    }

    /// Feed one extracted value. Malformed values are dropped for this
    /// field only; the document stays indexed on its other fields.
    pub fn add(&mut self, doc: DocId, value: &RawValue, ctx: &IngestContext) {
        match self {
            FieldIndex::Tag(idx) => {
                if let Some(text) = value.as_text() {
                    idx.add(doc, &text);
                }
            }
            FieldIndex::Text(idx) => {
                if let Some(text) = value.as_text() {
                    idx.add(doc, &text, ctx.stopwords, ctx.synonyms);
                }
            }
            FieldIndex::Numeric(idx) => {
                if let Some(num) = value.as_f64() {
                    idx.add(doc, num);
                }
            }
            FieldIndex::Vector(idx) => {
                if let Some(vector) = value.as_vector(idx.dim()) {
                    idx.add(doc, vector);
                }
            }
        }
    }

    pub fn remove(&mut self, doc: DocId) {
        match self {
            FieldIndex::Tag(idx) => idx.remove(doc),
            FieldIndex::Text(idx) => idx.remove(doc),
            FieldIndex::Numeric(idx) => idx.remove(doc),
            FieldIndex::Vector(idx) => idx.remove(doc),
        }
    }
}
