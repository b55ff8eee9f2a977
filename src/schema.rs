//! Index definitions and field schemas
//!
//! An `IndexDefinition` is immutable after creation and shared between the
//! coordinator registry and every shard's index table via `Arc`. ALTER
//! builds a new definition and swaps it in under a global transaction.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::distance::VectorMetric;
use crate::error::{Result, SearchError};

/// Kind of documents an index covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocKind {
    /// Flat field -> value documents
    Hash,
    /// JSON documents, identifiers are `$.a.b` paths
    Json,
}

impl DocKind {
    pub fn name(&self) -> &'static str {
        match self {
            DocKind::Hash => "HASH",
            DocKind::Json => "JSON",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    Tag,
    Text,
    Numeric,
    Vector,
}

impl FieldType {
    pub fn name(&self) -> &'static str {
        match self {
            FieldType::Tag => "TAG",
            FieldType::Text => "TEXT",
            FieldType::Numeric => "NUMERIC",
            FieldType::Vector => "VECTOR",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagParams {
    pub separator: char,
    pub case_sensitive: bool,
    pub with_suffixtrie: bool,
}

impl Default for TagParams {
    fn default() -> Self {
        Self {
            separator: ',',
            case_sensitive: false,
            with_suffixtrie: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextParams {
    pub with_suffixtrie: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericParams {
    /// Max entries per leaf block of the sorted numeric structure
    pub block_size: usize,
}

impl Default for NumericParams {
    fn default() -> Self {
        Self { block_size: 1024 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VectorAlgo {
    Hnsw,
    Flat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorParams {
    pub algo: VectorAlgo,
    pub dim: usize,
    pub metric: VectorMetric,
    pub capacity: usize,
    pub hnsw_m: usize,
    pub hnsw_ef_construction: usize,
}

impl Default for VectorParams {
    fn default() -> Self {
        Self {
            algo: VectorAlgo::Hnsw,
            dim: 0,
            metric: VectorMetric::L2,
            capacity: 1024,
            hnsw_m: 16,
            hnsw_ef_construction: 200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldParams {
    Tag(TagParams),
    Text(TextParams),
    Numeric(NumericParams),
    Vector(VectorParams),
}

/// A single schema attribute: query-visible alias, type, flags and
/// per-type parameters. The source identifier is the key it is stored
/// under in `Schema`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub alias: String,
    pub field_type: FieldType,
    pub flags: u8,
    pub params: FieldParams,
}

impl FieldSpec {
    pub const SORTABLE: u8 = 1 << 0;
    pub const NOINDEX: u8 = 1 << 1;

    pub fn is_sortable(&self) -> bool {
        self.flags & Self::SORTABLE != 0
    }

    pub fn is_noindex(&self) -> bool {
        self.flags & Self::NOINDEX != 0
    }

    pub fn tag_params(&self) -> Option<&TagParams> {
        match &self.params {
            FieldParams::Tag(p) => Some(p),
            _ => None,
        }
    }

    pub fn vector_params(&self) -> Option<&VectorParams> {
        match &self.params {
            FieldParams::Vector(p) => Some(p),
            _ => None,
        }
    }
}

/// Ordered field mapping: identifier -> spec, with an alias lookup table.
/// Insertion order is preserved because FT.INFO reports attributes in
/// declaration order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Schema {
    fields: Vec<(String, FieldSpec)>,
    by_alias: HashMap<String, usize>,
}

impl Schema {
    pub fn add_field(&mut self, identifier: impl Into<String>, spec: FieldSpec) -> Result<()> {
        let identifier = identifier.into();
        if self.by_alias.contains_key(&spec.alias) {
            return Err(SearchError::syntax(format!(
                "Duplicate field in schema - {}",
                spec.alias
            )));
        }
        self.by_alias.insert(spec.alias.clone(), self.fields.len());
        self.fields.push((identifier, spec));
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldSpec)> {
        self.fields.iter().map(|(id, spec)| (id.as_str(), spec))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Resolve a query-visible alias to (identifier, spec).
    pub fn field_by_alias(&self, alias: &str) -> Option<(&str, &FieldSpec)> {
        let idx = *self.by_alias.get(alias)?;
        let (id, spec) = &self.fields[idx];
        Some((id.as_str(), spec))
    }

    pub fn field_by_identifier(&self, identifier: &str) -> Option<&FieldSpec> {
        self.fields
            .iter()
            .find(|(id, _)| id == identifier)
            .map(|(_, spec)| spec)
    }

    /// Merge fields of `other` into `self` (FT.ALTER SCHEMA ADD).
    pub fn merge(&mut self, other: Schema) -> Result<()> {
        for (id, spec) in other.fields {
            self.add_field(id, spec)?;
        }
        Ok(())
    }
}

/// Immutable description of one index: what documents it covers and how
/// their fields are typed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub doc_kind: Option<DocKind>,
    pub prefix: String,
    pub stopwords: HashSet<String>,
    pub schema: Schema,
}

impl IndexDefinition {
    pub fn kind(&self) -> DocKind {
        self.doc_kind.unwrap_or(DocKind::Hash)
    }

    pub fn matches_key(&self, key: &str) -> bool {
        key.starts_with(&self.prefix)
    }
}
