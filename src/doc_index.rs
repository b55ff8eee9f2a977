//! Per-shard document index
//!
//! Owns the key <-> doc-id mapping, one typed index per schema field,
//! the SORTABLE value cache and the synonym groups. All access happens
//! on the owning shard thread; the definition itself is shared with the
//! coordinator through `Arc` and never mutated.

use std::collections::HashMap;
use std::sync::Arc;

use roaring::RoaringBitmap;

use crate::doc::{DocStore, DocValue};
use crate::error::{Result, SearchError};
use crate::index::{DocId, FieldIndex, IngestContext};
use crate::schema::{FieldSpec, FieldType, IndexDefinition};
use crate::search::{
    ExecutionContext, SearchAlgorithm, SearchParams, SerializedSearchDoc, ShardSearchResult,
    SortableValue,
};
use crate::synonyms::SynonymGroups;

/// Index snapshot used by FT.INFO.
#[derive(Debug, Clone)]
pub struct DocIndexInfo {
    pub base: IndexDefinition,
    pub num_docs: usize,
}

pub struct ShardDocIndex {
    base: Arc<IndexDefinition>,
    key_to_id: HashMap<String, DocId>,
    /// id -> key; slots of removed docs stay None
    keys: Vec<Option<String>>,
    live: RoaringBitmap,
    /// identifier -> typed index, for every indexed (non-NOINDEX) field
    indexes: HashMap<String, FieldIndex>,
    /// identifier -> doc -> materialized sort key, for SORTABLE fields
    sort_cache: HashMap<String, HashMap<DocId, SortableValue>>,
    synonyms: SynonymGroups,
}

impl ShardDocIndex {
    pub fn new(base: Arc<IndexDefinition>) -> Self {
        let mut indexes = HashMap::new();
        let mut sort_cache = HashMap::new();
        for (identifier, spec) in base.schema.iter() {
            if !spec.is_noindex() {
                indexes.insert(identifier.to_string(), FieldIndex::for_spec(spec));
            }
            if spec.is_sortable() {
                sort_cache.insert(identifier.to_string(), HashMap::new());
            }
        }
        Self {
            base,
            key_to_id: HashMap::new(),
            keys: Vec::new(),
            live: RoaringBitmap::new(),
            indexes,
            sort_cache,
            synonyms: SynonymGroups::default(),
        }
    }

    pub fn base(&self) -> &Arc<IndexDefinition> {
        &self.base
    }

    pub fn num_docs(&self) -> usize {
        self.live.len() as usize
    }

    pub fn info(&self) -> DocIndexInfo {
        DocIndexInfo {
            base: (*self.base).clone(),
            num_docs: self.num_docs(),
        }
    }

    pub fn synonyms(&self) -> &SynonymGroups {
        &self.synonyms
    }

    /// Whether `key`/`doc` belongs to this index.
    pub fn matches(&self, key: &str, doc: &DocValue) -> bool {
        self.base.matches_key(key) && doc.kind() == self.base.kind()
    }

    /// Scan the whole store and (re)index every matching document.
    pub fn rebuild_from(&mut self, store: &DocStore) {
        let pairs: Vec<(String, DocValue)> = store
            .iter()
            .filter(|(k, d)| self.matches(k, d))
            .map(|(k, d)| (k.clone(), d.clone()))
            .collect();
        for (key, doc) in pairs {
            self.add_doc(&key, &doc);
        }
    }

    pub fn add_doc(&mut self, key: &str, doc: &DocValue) {
        let id = match self.key_to_id.get(key) {
            Some(&id) => {
                self.remove_fields(id);
                id
            }
            None => {
                let id = self.keys.len() as DocId;
                self.keys.push(Some(key.to_string()));
                self.key_to_id.insert(key.to_string(), id);
                id
            }
        };
        self.live.insert(id);

        let ctx = IngestContext {
            stopwords: &self.base.stopwords,
            synonyms: &self.synonyms,
        };
        for (identifier, spec) in self.base.schema.iter() {
            let Some(value) = doc.extract(identifier) else {
                continue;
            };
            if let Some(index) = self.indexes.get_mut(identifier) {
                index.add(id, &value, &ctx);
            }
            if spec.is_sortable() {
                let cached = sortable_repr(spec, &value);
                if let Some(cache) = self.sort_cache.get_mut(identifier) {
                    if cached.is_null() {
                        cache.remove(&id);
                    } else {
                        cache.insert(id, cached);
                    }
                }
            }
        }
    }

    pub fn remove_doc(&mut self, key: &str) {
        let Some(id) = self.key_to_id.remove(key) else {
            return;
        };
        self.remove_fields(id);
        self.live.remove(id);
        if let Some(slot) = self.keys.get_mut(id as usize) {
            *slot = None;
        }
    }

    fn remove_fields(&mut self, id: DocId) {
        for index in self.indexes.values_mut() {
            index.remove(id);
        }
        for cache in self.sort_cache.values_mut() {
            cache.remove(&id);
        }
    }

    /// Distinct tag values of one TAG field (FT.TAGVALS).
    pub fn get_tag_vals(&self, field_alias: &str) -> Result<Vec<String>> {
        let Some((identifier, spec)) = self.base.schema.field_by_alias(field_alias) else {
            return Err(SearchError::Shard(format!("No such field: {field_alias}")));
        };
        if spec.field_type != FieldType::Tag {
            return Err(SearchError::Shard(format!("Not a tag field: {field_alias}")));
        }
        match self.indexes.get(identifier) {
            Some(FieldIndex::Tag(idx)) => Ok(idx.distinct_tags()),
            _ => Ok(Vec::new()),
        }
    }

    /// FT.SEARCH entry point for this shard.
    pub fn search(
        &self,
        store: &DocStore,
        params: &SearchParams,
        algo: &SearchAlgorithm,
    ) -> ShardSearchResult {
        let ctx = ExecutionContext::new(&self.indexes, &self.live, algo.profiling());
        let (matched, profile) = ctx.run(&algo.query().root);

        let mut result = ShardSearchResult {
            profile,
            ..Default::default()
        };

        if let Some(knn) = &algo.query().knn {
            let Some(FieldIndex::Vector(index)) = self.indexes.get(&knn.field) else {
                result.error = Some(format!("Unknown vector field: {}", knn.field_alias));
                return result;
            };
            let ranked = index.knn(&knn.vector, knn.k, Some(&matched));
            result.total_hits = ranked.len();
            for (id, dist) in ranked {
                if let Some(mut doc) = self.serialize_doc(store, id, params) {
                    doc.knn_score = dist as f64;
                    result.docs.push(doc);
                }
            }
        } else {
            result.total_hits = matched.len() as usize;
            // With a sort the coordinator needs every candidate; the
            // plain LIMIT window only ever touches the first
            // offset+total docs of each shard
            let limit = if params.sort_option.is_some() {
                usize::MAX
            } else {
                params.serialize_limit()
            };
            for id in matched.iter().take(limit) {
                if let Some(doc) = self.serialize_doc(store, id, params) {
                    result.docs.push(doc);
                }
            }
        }
        result
    }

    /// FT.AGGREGATE entry point: materialized rows instead of reply docs.
    pub fn search_for_aggregator(
        &self,
        store: &DocStore,
        load_fields: &[crate::search::FieldReference],
        algo: &SearchAlgorithm,
    ) -> Vec<HashMap<String, SortableValue>> {
        let ctx = ExecutionContext::new(&self.indexes, &self.live, false);
        let (matched, _) = ctx.run(&algo.query().root);

        let mut rows = Vec::with_capacity(matched.len() as usize);
        for id in matched.iter() {
            let Some(key) = self.keys.get(id as usize).and_then(|k| k.as_ref()) else {
                continue;
            };
            let stored = store.get(key);
            let mut row = HashMap::new();

            for (identifier, spec) in self.base.schema.iter() {
                let value = self.field_value(stored, id, identifier, spec);
                if !value.is_null() {
                    row.insert(spec.alias.clone(), value);
                }
            }
            for reference in load_fields {
                let value = raw_field_value(stored, &reference.field);
                if !value.is_null() {
                    row.insert(reference.output_name().to_string(), value);
                }
            }
            rows.push(row);
        }
        rows
    }

    /// Targeted synonym re-index: update the group, then re-ingest the
    /// text fields of every document containing one of its terms.
    pub fn rebuild_for_group(&mut self, store: &DocStore, group_id: &str, terms: &[String]) {
        self.synonyms
            .update_group(group_id, terms.iter().map(|t| t.to_string()));

        let normalized: Vec<String> = terms.iter().map(|t| t.to_lowercase()).collect();
        let mut affected = RoaringBitmap::new();
        for index in self.indexes.values() {
            if let FieldIndex::Text(idx) = index {
                affected |= idx.docs_with_any(&normalized);
            }
        }

        let text_fields: Vec<String> = self
            .base
            .schema
            .iter()
            .filter(|(_, spec)| spec.field_type == FieldType::Text && !spec.is_noindex())
            .map(|(id, _)| id.to_string())
            .collect();

        for id in affected.iter() {
            let Some(key) = self.keys.get(id as usize).and_then(|k| k.as_ref()) else {
                continue;
            };
            let Some(doc) = store.get(key) else {
                continue;
            };
            for identifier in &text_fields {
                let Some(value) = doc.extract(identifier) else {
                    continue;
                };
                let Some(text) = value.as_text() else {
                    continue;
                };
                if let Some(FieldIndex::Text(idx)) = self.indexes.get_mut(identifier) {
                    idx.add(id, &text, &self.base.stopwords, &self.synonyms);
                }
            }
        }
    }

    fn serialize_doc(
        &self,
        store: &DocStore,
        id: DocId,
        params: &SearchParams,
    ) -> Option<SerializedSearchDoc> {
        let key = self.keys.get(id as usize)?.as_ref()?.clone();
        let stored = store.get(&key);

        let mut values = Vec::new();
        if !params.ids_only() {
            if let Some(load) = &params.load_fields {
                for reference in load {
                    let value = raw_field_value(stored, &reference.field);
                    if !value.is_null() {
                        values.push((reference.output_name().to_string(), value));
                    }
                }
            } else if let Some(returns) = &params.return_fields {
                for reference in returns {
                    let Some((identifier, _)) = self.base.schema.field_by_alias(&reference.field)
                    else {
                        // Unknown aliases may be the KNN score field;
                        // the coordinator injects it at reply time
                        continue;
                    };
                    let value = self.projection_value(stored, id, identifier);
                    if !value.is_null() {
                        values.push((reference.output_name().to_string(), value));
                    }
                }
            } else {
                for (identifier, spec) in self.base.schema.iter() {
                    let value = self.projection_value(stored, id, identifier);
                    if !value.is_null() {
                        values.push((spec.alias.clone(), value));
                    }
                }
            }
        }

        let sort_score = match &params.sort_option {
            Some(sort) => match self.base.schema.field_by_alias(&sort.field) {
                Some((identifier, spec)) => self.field_value(stored, id, identifier, spec),
                None => SortableValue::Null,
            },
            None => SortableValue::Null,
        };

        Some(SerializedSearchDoc {
            key,
            values,
            knn_score: 0.0,
            sort_score,
        })
    }

    /// Reply projection of one schema field: always the string form
    /// (numbers print through `Display`), served from the SORTABLE
    /// cache when the field has one.
    fn projection_value(
        &self,
        stored: Option<&DocValue>,
        id: DocId,
        identifier: &str,
    ) -> SortableValue {
        if let Some(cache) = self.sort_cache.get(identifier) {
            return match cache.get(&id) {
                Some(SortableValue::Double(d)) => SortableValue::Str(format!("{d}")),
                Some(value) => value.clone(),
                None => SortableValue::Null,
            };
        }
        raw_field_value(stored, identifier)
    }

    /// Value of one schema field for a doc: the SORTABLE cache when
    /// available, the stored document otherwise.
    fn field_value(
        &self,
        stored: Option<&DocValue>,
        id: DocId,
        identifier: &str,
        spec: &FieldSpec,
    ) -> SortableValue {
        if let Some(cache) = self.sort_cache.get(identifier) {
            if let Some(value) = cache.get(&id) {
                return value.clone();
            }
            // SORTABLE fields with no cached value are null
            return SortableValue::Null;
        }
        let Some(raw) = stored.and_then(|doc| doc.extract(identifier)) else {
            return SortableValue::Null;
        };
        sortable_repr(spec, &raw)
    }
}

/// Typed projection of an extracted value: doubles for NUMERIC fields,
/// strings otherwise.
fn sortable_repr(spec: &FieldSpec, raw: &crate::doc::RawValue) -> SortableValue {
    match spec.field_type {
        FieldType::Numeric => raw
            .as_f64()
            .map(SortableValue::Double)
            .unwrap_or(SortableValue::Null),
        _ => raw
            .as_text()
            .map(SortableValue::Str)
            .unwrap_or(SortableValue::Null),
    }
}

/// Raw LOAD projection straight from the stored document.
fn raw_field_value(stored: Option<&DocValue>, field: &str) -> SortableValue {
    let Some(raw) = stored.and_then(|doc| doc.extract(field)) else {
        return SortableValue::Null;
    };
    raw.as_text()
        .map(SortableValue::Str)
        .unwrap_or(SortableValue::Null)
}
