//! Aggregation pipeline (FT.AGGREGATE)
//!
//! The coordinator concatenates materialized rows from every shard and
//! applies the steps in their command-line order: GROUPBY with reducers,
//! SORTBY with an optional MAX cap, and LIMIT windows.

use std::collections::{HashMap, HashSet};

use crate::search::{compare_sortable, SortOrder, SortableValue};

/// One materialized row: output field name -> value.
pub type DocValues = HashMap<String, SortableValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReducerFunc {
    Count,
    CountDistinct,
    Sum,
    Avg,
    Max,
    Min,
}

#[derive(Debug, Clone)]
pub struct Reducer {
    /// Ignored by COUNT
    pub source_field: String,
    pub result_field: String,
    pub func: ReducerFunc,
}

#[derive(Debug, Clone)]
pub struct SortField {
    pub field: String,
    pub order: SortOrder,
}

#[derive(Debug, Clone, Default)]
pub struct SortParams {
    pub fields: Vec<SortField>,
    /// Cap on retained rows after the sort
    pub max: Option<usize>,
}

impl SortParams {
    fn comparator(&self) -> impl Fn(&DocValues, &DocValues) -> std::cmp::Ordering + '_ {
        move |a, b| {
            for sort_field in &self.fields {
                let left = a.get(&sort_field.field).unwrap_or(&SortableValue::Null);
                let right = b.get(&sort_field.field).unwrap_or(&SortableValue::Null);
                let ord = compare_sortable(left, right, sort_field.order);
                if ord != std::cmp::Ordering::Equal {
                    return ord;
                }
            }
            std::cmp::Ordering::Equal
        }
    }
}

#[derive(Debug, Clone)]
pub enum Step {
    Group {
        fields: Vec<String>,
        reducers: Vec<Reducer>,
    },
    Sort(SortParams),
    Limit {
        offset: usize,
        num: usize,
    },
}

#[derive(Debug, Clone, Default)]
pub struct AggregationResult {
    pub values: Vec<DocValues>,
    /// Projection set: group keys, reducer outputs and LOADed fields
    pub fields_to_print: Vec<String>,
}

/// Hashable view of a sort value for group keys and COUNT_DISTINCT.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum KeyPart {
    Null,
    Bits(u64),
    Str(String),
}

impl From<&SortableValue> for KeyPart {
    fn from(value: &SortableValue) -> Self {
        match value {
            SortableValue::Null => KeyPart::Null,
            SortableValue::Double(d) => KeyPart::Bits(d.to_bits()),
            SortableValue::Str(s) => KeyPart::Str(s.clone()),
        }
    }
}

#[derive(Debug)]
enum ReducerState {
    Count(usize),
    CountDistinct(HashSet<KeyPart>),
    Sum(f64),
    Avg { sum: f64, count: usize },
    Max(Option<SortableValue>),
    Min(Option<SortableValue>),
}

impl ReducerState {
    fn new(func: ReducerFunc) -> Self {
        match func {
            ReducerFunc::Count => ReducerState::Count(0),
            ReducerFunc::CountDistinct => ReducerState::CountDistinct(HashSet::new()),
            ReducerFunc::Sum => ReducerState::Sum(0.0),
            ReducerFunc::Avg => ReducerState::Avg { sum: 0.0, count: 0 },
            ReducerFunc::Max => ReducerState::Max(None),
            ReducerFunc::Min => ReducerState::Min(None),
        }
    }

    fn feed(&mut self, value: Option<&SortableValue>) {
        match self {
            ReducerState::Count(n) => *n += 1,
            ReducerState::CountDistinct(seen) => {
                if let Some(v) = value {
                    seen.insert(KeyPart::from(v));
                }
            }
            ReducerState::Sum(sum) => {
                if let Some(v) = value.and_then(SortableValue::as_f64) {
                    *sum += v;
                }
            }
            ReducerState::Avg { sum, count } => {
                if let Some(v) = value.and_then(SortableValue::as_f64) {
                    *sum += v;
                    *count += 1;
                }
            }
            ReducerState::Max(best) => {
                if let Some(v) = value.filter(|v| !v.is_null()) {
                    let replace = best
                        .as_ref()
                        .map(|b| compare_sortable(v, b, SortOrder::Asc).is_gt())
                        .unwrap_or(true);
                    if replace {
                        *best = Some(v.clone());
                    }
                }
            }
            ReducerState::Min(best) => {
                if let Some(v) = value.filter(|v| !v.is_null()) {
                    let replace = best
                        .as_ref()
                        .map(|b| compare_sortable(v, b, SortOrder::Asc).is_lt())
                        .unwrap_or(true);
                    if replace {
                        *best = Some(v.clone());
                    }
                }
            }
        }
    }

    fn finish(self) -> SortableValue {
        match self {
            ReducerState::Count(n) => SortableValue::Double(n as f64),
            ReducerState::CountDistinct(seen) => SortableValue::Double(seen.len() as f64),
            ReducerState::Sum(sum) => SortableValue::Double(sum),
            ReducerState::Avg { sum, count } => {
                if count == 0 {
                    SortableValue::Null
                } else {
                    SortableValue::Double(sum / count as f64)
                }
            }
            ReducerState::Max(best) | ReducerState::Min(best) => {
                best.unwrap_or(SortableValue::Null)
            }
        }
    }
}

/// Run the pipeline over the concatenated shard rows.
pub fn process(rows: Vec<DocValues>, load_fields: &[String], steps: &[Step]) -> AggregationResult {
    let mut values = rows;
    let mut fields_to_print: Vec<String> = load_fields.to_vec();

    for step in steps {
        match step {
            Step::Group { fields, reducers } => {
                values = group_step(values, fields, reducers);
                fields_to_print = fields.clone();
                fields_to_print.extend(reducers.iter().map(|r| r.result_field.clone()));
            }
            Step::Sort(params) => {
                values.sort_by(params.comparator());
                if let Some(max) = params.max {
                    values.truncate(max);
                }
            }
            Step::Limit { offset, num } => {
                let offset = (*offset).min(values.len());
                values = values.into_iter().skip(offset).take(*num).collect();
            }
        }
    }

    // Without a GROUPBY or explicit LOAD list, print every field seen,
    // in first-seen order
    if fields_to_print.is_empty() {
        let mut seen = HashSet::new();
        for row in &values {
            let mut keys: Vec<&String> = row.keys().collect();
            keys.sort();
            for key in keys {
                if seen.insert(key.clone()) {
                    fields_to_print.push(key.clone());
                }
            }
        }
    }

    AggregationResult {
        values,
        fields_to_print,
    }
}

fn group_step(rows: Vec<DocValues>, fields: &[String], reducers: &[Reducer]) -> Vec<DocValues> {
    struct GroupState {
        key_values: Vec<SortableValue>,
        reducers: Vec<ReducerState>,
    }

    let mut order: Vec<Vec<KeyPart>> = Vec::new();
    let mut groups: HashMap<Vec<KeyPart>, GroupState> = HashMap::new();

    for row in rows {
        let key_values: Vec<SortableValue> = fields
            .iter()
            .map(|f| row.get(f).cloned().unwrap_or(SortableValue::Null))
            .collect();
        let key: Vec<KeyPart> = key_values.iter().map(KeyPart::from).collect();

        let state = groups.entry(key.clone()).or_insert_with(|| {
            order.push(key);
            GroupState {
                key_values,
                reducers: reducers.iter().map(|r| ReducerState::new(r.func)).collect(),
            }
        });
        for (reducer, state) in reducers.iter().zip(state.reducers.iter_mut()) {
            state.feed(row.get(&reducer.source_field));
        }
    }

    order
        .into_iter()
        .filter_map(|key| groups.remove(&key))
        .map(|state| {
            let mut row = DocValues::new();
            for (field, value) in fields.iter().zip(state.key_values) {
                row.insert(field.clone(), value);
            }
            for (reducer, state) in reducers.iter().zip(state.reducers) {
                row.insert(reducer.result_field.clone(), state.finish());
            }
            row
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, SortableValue)]) -> DocValues {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn fruit_rows() -> Vec<DocValues> {
        vec![
            row(&[("name", SortableValue::Str("apple".into())), ("price", SortableValue::Double(3.0))]),
            row(&[("name", SortableValue::Str("apple".into())), ("price", SortableValue::Double(5.0))]),
            row(&[("name", SortableValue::Str("banana".into())), ("price", SortableValue::Double(1.0))]),
        ]
    }

    fn count_reducer(result: &str) -> Reducer {
        Reducer {
            source_field: String::new(),
            result_field: result.to_string(),
            func: ReducerFunc::Count,
        }
    }

    #[test]
    fn test_group_cardinality_and_count() {
        let steps = vec![Step::Group {
            fields: vec!["name".into()],
            reducers: vec![count_reducer("n")],
        }];
        let result = process(fruit_rows(), &[], &steps);
        assert_eq!(result.values.len(), 2);
        let apple = result
            .values
            .iter()
            .find(|r| r["name"] == SortableValue::Str("apple".into()))
            .unwrap();
        assert_eq!(apple["n"], SortableValue::Double(2.0));
        assert_eq!(result.fields_to_print, vec!["name", "n"]);
    }

    #[test]
    fn test_sum_avg_max_min() {
        let steps = vec![Step::Group {
            fields: vec!["name".into()],
            reducers: vec![
                Reducer { source_field: "price".into(), result_field: "s".into(), func: ReducerFunc::Sum },
                Reducer { source_field: "price".into(), result_field: "a".into(), func: ReducerFunc::Avg },
                Reducer { source_field: "price".into(), result_field: "mx".into(), func: ReducerFunc::Max },
                Reducer { source_field: "price".into(), result_field: "mn".into(), func: ReducerFunc::Min },
            ],
        }];
        let result = process(fruit_rows(), &[], &steps);
        let apple = result
            .values
            .iter()
            .find(|r| r["name"] == SortableValue::Str("apple".into()))
            .unwrap();
        assert_eq!(apple["s"], SortableValue::Double(8.0));
        assert_eq!(apple["a"], SortableValue::Double(4.0));
        assert_eq!(apple["mx"], SortableValue::Double(5.0));
        assert_eq!(apple["mn"], SortableValue::Double(3.0));
    }

    #[test]
    fn test_count_distinct() {
        let rows = vec![
            row(&[("g", SortableValue::Str("x".into())), ("v", SortableValue::Str("a".into()))]),
            row(&[("g", SortableValue::Str("x".into())), ("v", SortableValue::Str("a".into()))]),
            row(&[("g", SortableValue::Str("x".into())), ("v", SortableValue::Str("b".into()))]),
        ];
        let steps = vec![Step::Group {
            fields: vec!["g".into()],
            reducers: vec![Reducer {
                source_field: "v".into(),
                result_field: "d".into(),
                func: ReducerFunc::CountDistinct,
            }],
        }];
        let result = process(rows, &[], &steps);
        assert_eq!(result.values[0]["d"], SortableValue::Double(2.0));
    }

    #[test]
    fn test_sort_desc_with_max() {
        let steps = vec![
            Step::Group {
                fields: vec!["name".into()],
                reducers: vec![count_reducer("n")],
            },
            Step::Sort(SortParams {
                fields: vec![SortField {
                    field: "n".into(),
                    order: SortOrder::Desc,
                }],
                max: Some(1),
            }),
        ];
        let result = process(fruit_rows(), &[], &steps);
        assert_eq!(result.values.len(), 1);
        assert_eq!(result.values[0]["name"], SortableValue::Str("apple".into()));
    }

    #[test]
    fn test_limit_window() {
        let steps = vec![Step::Limit { offset: 1, num: 1 }];
        let result = process(fruit_rows(), &[], &steps);
        assert_eq!(result.values.len(), 1);
    }

    #[test]
    fn test_missing_group_field_is_null_key() {
        let rows = vec![
            row(&[("name", SortableValue::Str("a".into()))]),
            row(&[]),
            row(&[]),
        ];
        let steps = vec![Step::Group {
            fields: vec!["name".into()],
            reducers: vec![count_reducer("n")],
        }];
        let result = process(rows, &[], &steps);
        assert_eq!(result.values.len(), 2);
        let null_group = result
            .values
            .iter()
            .find(|r| r["name"] == SortableValue::Null)
            .unwrap();
        assert_eq!(null_group["n"], SortableValue::Double(2.0));
    }

    #[test]
    fn test_fields_to_print_without_transform() {
        let result = process(fruit_rows(), &[], &[]);
        assert_eq!(result.values.len(), 3);
        assert!(result.fields_to_print.contains(&"name".to_string()));
        assert!(result.fields_to_print.contains(&"price".to_string()));
    }

    #[test]
    fn test_load_fields_lead_projection() {
        let result = process(fruit_rows(), &["name".to_string()], &[]);
        assert_eq!(result.fields_to_print, vec!["name"]);
    }
}
