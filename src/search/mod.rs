//! Search execution surface: parsed algorithm handle, per-shard results
//! and the parameter types shared by SEARCH and AGGREGATE.

pub mod executor;
pub mod profile;

pub use executor::ExecutionContext;
pub use profile::{ProfileEvent, QueryProfile};

use std::cmp::Ordering;
use std::sync::Once;

use crate::error::Result;
use crate::query::{ParsedQuery, QueryParams, QueryParser};
use crate::schema::Schema;

/// A projectable value: null, a double, or a string. Doubles come from
/// NUMERIC fields and reducers; everything else projects as a string.
#[derive(Debug, Clone, PartialEq)]
pub enum SortableValue {
    Null,
    Double(f64),
    Str(String),
}

impl SortableValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SortableValue::Double(d) => Some(*d),
            SortableValue::Str(s) => s.trim().parse().ok(),
            SortableValue::Null => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SortableValue::Null)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

/// Compare two sort keys under `order`. Nulls sort last irrespective of
/// direction; doubles and strings compare within their own kind.
pub fn compare_sortable(a: &SortableValue, b: &SortableValue, order: SortOrder) -> Ordering {
    use SortableValue::*;
    match (a, b) {
        (Null, Null) => Ordering::Equal,
        (Null, _) => Ordering::Greater,
        (_, Null) => Ordering::Less,
        (x, y) => {
            let natural = match (x, y) {
                (Double(l), Double(r)) => l.total_cmp(r),
                (Str(l), Str(r)) => l.cmp(r),
                // Mixed kinds: numeric when both sides parse, else the
                // stringified forms
                _ => match (x.as_f64(), y.as_f64()) {
                    (Some(l), Some(r)) => l.total_cmp(&r),
                    _ => stringify(x).cmp(&stringify(y)),
                },
            };
            match order {
                SortOrder::Asc => natural,
                SortOrder::Desc => natural.reverse(),
            }
        }
    }
}

fn stringify(value: &SortableValue) -> String {
    match value {
        SortableValue::Null => String::new(),
        SortableValue::Double(d) => d.to_string(),
        SortableValue::Str(s) => s.clone(),
    }
}

/// A field reference with an optional output alias (`field [AS alias]`).
#[derive(Debug, Clone, PartialEq)]
pub struct FieldReference {
    pub field: String,
    pub alias: Option<String>,
}

impl FieldReference {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            alias: None,
        }
    }

    pub fn output_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.field)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortOption {
    pub field: String,
    pub order: SortOrder,
}

/// Parsed FT.SEARCH options.
#[derive(Debug, Clone)]
pub struct SearchParams {
    pub limit_offset: usize,
    pub limit_total: usize,
    /// LOAD: raw document fields by identifier
    pub load_fields: Option<Vec<FieldReference>>,
    /// RETURN: schema fields by alias; `Some(vec![])` means NOCONTENT
    pub return_fields: Option<Vec<FieldReference>>,
    pub query_params: QueryParams,
    pub sort_option: Option<SortOption>,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            limit_offset: 0,
            limit_total: 10,
            load_fields: None,
            return_fields: None,
            query_params: QueryParams::default(),
            sort_option: None,
        }
    }
}

impl SearchParams {
    pub fn ids_only(&self) -> bool {
        self.return_fields.as_ref().map(Vec::is_empty).unwrap_or(false)
    }

    pub fn should_return_field(&self, alias: &str) -> bool {
        match &self.return_fields {
            None => true,
            Some(fields) => fields.iter().any(|f| f.output_name() == alias),
        }
    }

    /// How many docs a shard needs to serialize at most.
    pub fn serialize_limit(&self) -> usize {
        self.limit_offset.saturating_add(self.limit_total)
    }
}

/// KNN ordering attached to a query, surfaced to the coordinator so the
/// merge step can reorder and cut before SORT/LIMIT.
#[derive(Debug, Clone, PartialEq)]
pub struct KnnScoreSortOption {
    pub score_field_alias: String,
    pub limit: usize,
}

/// One matched document serialized on its shard.
#[derive(Debug, Clone)]
pub struct SerializedSearchDoc {
    pub key: String,
    pub values: Vec<(String, SortableValue)>,
    pub knn_score: f64,
    pub sort_score: SortableValue,
}

/// Per-shard search output, moved to the coordinator when the hop ends.
#[derive(Debug, Clone, Default)]
pub struct ShardSearchResult {
    pub docs: Vec<SerializedSearchDoc>,
    pub total_hits: usize,
    pub error: Option<String>,
    pub profile: Option<QueryProfile>,
}

impl ShardSearchResult {
    pub fn from_error(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// A query parsed once on the coordinator and shared read-only with
/// every shard callback.
#[derive(Debug, Clone)]
pub struct SearchAlgorithm {
    query: ParsedQuery,
    profiling: bool,
}

static WARMUP: Once = Once::new();

impl SearchAlgorithm {
    /// Parse `query_str` against `schema` with `params` bound. Returns a
    /// ready handle or a syntax error.
    pub fn init(query_str: &str, params: &QueryParams, schema: &Schema) -> Result<Self> {
        Self::warmup();
        let query = QueryParser::new(query_str, params, schema).parse()?;
        Ok(Self {
            query,
            profiling: false,
        })
    }

    /// One-time throwaway parse; the first parse pays for lazily built
    /// parser state, so commands trigger it before timing anything.
    pub fn warmup() {
        WARMUP.call_once(|| {
            let params = QueryParams::default();
            let schema = Schema::default();
            let _ = QueryParser::new("*", &params, &schema).parse();
        });
    }

    pub fn enable_profiling(&mut self) {
        self.profiling = true;
    }

    pub fn profiling(&self) -> bool {
        self.profiling
    }

    pub fn query(&self) -> &ParsedQuery {
        &self.query
    }

    pub fn knn_sort_option(&self) -> Option<KnnScoreSortOption> {
        self.query.knn.as_ref().map(|knn| KnnScoreSortOption {
            score_field_alias: knn.score_alias.clone(),
            limit: knn.k,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nulls_sort_last_in_both_directions() {
        let null = SortableValue::Null;
        let one = SortableValue::Double(1.0);
        assert_eq!(compare_sortable(&null, &one, SortOrder::Asc), Ordering::Greater);
        assert_eq!(compare_sortable(&null, &one, SortOrder::Desc), Ordering::Greater);
        assert_eq!(compare_sortable(&one, &null, SortOrder::Desc), Ordering::Less);
    }

    #[test]
    fn test_desc_reverses_doubles() {
        let a = SortableValue::Double(1.0);
        let b = SortableValue::Double(2.0);
        assert_eq!(compare_sortable(&a, &b, SortOrder::Asc), Ordering::Less);
        assert_eq!(compare_sortable(&a, &b, SortOrder::Desc), Ordering::Greater);
    }

    #[test]
    fn test_string_compare() {
        let a = SortableValue::Str("apple".into());
        let b = SortableValue::Str("banana".into());
        assert_eq!(compare_sortable(&a, &b, SortOrder::Asc), Ordering::Less);
    }

    #[test]
    fn test_ids_only_via_empty_return() {
        let mut params = SearchParams::default();
        assert!(!params.ids_only());
        params.return_fields = Some(Vec::new());
        assert!(params.ids_only());
    }

    #[test]
    fn test_should_return_field() {
        let mut params = SearchParams::default();
        assert!(params.should_return_field("x"));
        params.return_fields = Some(vec![FieldReference::new("s")]);
        assert!(params.should_return_field("s"));
        assert!(!params.should_return_field("x"));
    }
}
