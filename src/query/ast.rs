//! Query expression tree
//!
//! Field references are resolved against the schema at parse time, so
//! every node carries the source identifier it evaluates against.

/// One predicate or composition node.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryNode {
    /// `*` — every live document
    MatchAll,
    /// Predicate over a NOINDEX field; matches nothing
    Nothing,
    And(Vec<QueryNode>),
    Or(Vec<QueryNode>),
    Not(Box<QueryNode>),
    /// `@field:{t1|t2}` or `@field:tag`; tags may be `*suffix` wildcards
    TagMatch { field: String, tags: Vec<String> },
    /// `@field:[lo hi]`, `(` prefix makes a bound exclusive
    NumericRange {
        field: String,
        lo: f64,
        hi: f64,
        lo_open: bool,
        hi_open: bool,
    },
    /// Term over one TEXT field, or over all TEXT fields when `field`
    /// is `None`; `*suffix` wildcards allowed
    TextTerm { field: Option<String>, term: String },
    /// `"quoted phrase"` — adjacent tokens
    Phrase {
        field: Option<String>,
        terms: Vec<String>,
    },
}

/// `... =>[KNN k @field $vec AS alias]` attached to the filter tree.
#[derive(Debug, Clone, PartialEq)]
pub struct KnnClause {
    /// Source identifier of the vector field
    pub field: String,
    /// Query-visible alias (used for the default score name)
    pub field_alias: String,
    pub k: usize,
    pub vector: Vec<f32>,
    pub score_alias: String,
}

/// Parse output: the filter tree plus an optional KNN ranking.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedQuery {
    pub root: QueryNode,
    pub knn: Option<KnnClause>,
}
