//! Datastore facade
//!
//! Wires the shard set, the coordinator-side index definition registry
//! and the command registry together, and carries the document write
//! path: every store mutation notifies the matching indices on the
//! owning shard.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value as JsonValue;

use crate::command::{CommandContext, CommandRegistry};
use crate::config::SearchConfig;
use crate::doc::DocValue;
use crate::error::Result;
use crate::reply::Reply;
use crate::schema::IndexDefinition;
use crate::shard::{ShardSet, ShardState};

pub struct Datastore {
    shards: ShardSet,
    /// Coordinator-visible definition handles; each shard's index table
    /// shares the same `Arc`s
    definitions: DashMap<String, Arc<IndexDefinition>>,
    commands: CommandRegistry,
    config: SearchConfig,
}

impl Default for Datastore {
    fn default() -> Self {
        Self::new()
    }
}

impl Datastore {
    pub fn new() -> Self {
        Self::with_config(SearchConfig::default())
    }

    pub fn with_config(config: SearchConfig) -> Self {
        Self {
            shards: ShardSet::new(config.num_shards),
            definitions: DashMap::new(),
            commands: CommandRegistry::search_family(),
            config,
        }
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub fn shards(&self) -> &ShardSet {
        &self.shards
    }

    pub fn definitions(&self) -> &DashMap<String, Arc<IndexDefinition>> {
        &self.definitions
    }

    /// Dispatch one command in db 0; errors become error replies.
    pub fn execute(&self, name: &str, args: &[Vec<u8>]) -> Reply {
        self.execute_in_db(0, name, args)
    }

    pub fn execute_in_db(&self, db_index: u32, name: &str, args: &[Vec<u8>]) -> Reply {
        let ctx = CommandContext { db_index };
        match self.try_execute(&ctx, name, args) {
            Ok(reply) => reply,
            Err(err) => Reply::Error(err.to_string()),
        }
    }

    pub fn try_execute(
        &self,
        ctx: &CommandContext,
        name: &str,
        args: &[Vec<u8>],
    ) -> Result<Reply> {
        self.commands.dispatch(self, ctx, name, args)
    }

    /// Convenience dispatch for UTF-8 commands: `cmd(&["FT._LIST"])`.
    pub fn cmd(&self, parts: &[&str]) -> Reply {
        let args: Vec<Vec<u8>> = parts[1..].iter().map(|p| p.as_bytes().to_vec()).collect();
        self.execute(parts[0], &args)
    }

    // ---- document write path ----

    /// Set hash fields on `key`, merging into an existing hash document.
    pub fn hset(&self, key: &str, pairs: Vec<(String, Vec<u8>)>) {
        let key = key.to_string();
        let sid = self.shards.shard_for_key(&key);
        self.shards.on_shard(sid, move |state| {
            let mut fields = match state.store.remove(&key) {
                Some(DocValue::Hash(existing)) => existing,
                _ => Default::default(),
            };
            fields.extend(pairs);
            state.store.insert(key.clone(), DocValue::Hash(fields));
            reindex_key(state, &key);
        });
    }

    /// Replace the JSON document at `key`.
    pub fn json_set(&self, key: &str, value: JsonValue) {
        let key = key.to_string();
        let sid = self.shards.shard_for_key(&key);
        self.shards.on_shard(sid, move |state| {
            state.store.insert(key.clone(), DocValue::Json(value));
            reindex_key(state, &key);
        });
    }

    /// Delete `key`; returns whether it existed.
    pub fn del(&self, key: &str) -> bool {
        let key = key.to_string();
        let sid = self.shards.shard_for_key(&key);
        self.shards
            .on_shard(sid, move |state| {
                let existed = state.store.remove(&key).is_some();
                reindex_key(state, &key);
                existed
            })
            .unwrap_or(false)
    }
}

/// Re-evaluate `key` against every index on its shard: documents enter
/// when they match prefix and kind, and leave otherwise.
fn reindex_key(state: &mut ShardState, key: &str) {
    let doc = state.store.get(key).cloned();
    for index in state.indices.values_mut() {
        match &doc {
            Some(doc) if index.matches(key, doc) => index.add_doc(key, doc),
            _ => index.remove_doc(key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pairs(fields: &[(&str, &str)]) -> Vec<(String, Vec<u8>)> {
        fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.as_bytes().to_vec()))
            .collect()
    }

    fn fruit_store() -> Datastore {
        let ds = Datastore::new();
        let reply = ds.cmd(&[
            "FT.CREATE", "idx", "ON", "HASH", "PREFIX", "1", "doc:", "SCHEMA", "name", "TAG",
            "SORTABLE", "price", "NUMERIC", "SORTABLE",
        ]);
        assert_eq!(reply, Reply::ok());
        ds.hset("doc:1", pairs(&[("name", "apple"), ("price", "3.5")]));
        ds.hset("doc:2", pairs(&[("name", "banana"), ("price", "1")]));
        ds
    }

    fn total_hits(reply: &Reply) -> i64 {
        reply.as_array().unwrap()[0].as_long().unwrap()
    }

    fn doc_keys(reply: &Reply) -> Vec<String> {
        let items = reply.as_array().unwrap();
        items[1..]
            .iter()
            .step_by(2)
            .map(|r| r.as_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_create_search_basic_scenario() {
        let ds = fruit_store();
        let reply = ds.cmd(&["FT.SEARCH", "idx", "@price:[1 2]"]);
        let items = reply.as_array().unwrap();
        assert_eq!(items[0], Reply::Long(1));
        assert_eq!(items[1].as_str(), Some("doc:2"));
        let fields = &items[2];
        assert_eq!(fields.map_get("name"), Some(&Reply::bulk("banana")));
        assert_eq!(fields.map_get("price"), Some(&Reply::bulk("1")));
    }

    #[test]
    fn test_match_all_counts_prefix_docs() {
        let ds = fruit_store();
        ds.hset("other:1", pairs(&[("name", "skipped")]));
        let reply = ds.cmd(&["FT.SEARCH", "idx", "*"]);
        assert_eq!(total_hits(&reply), 2);
    }

    #[test]
    fn test_delete_leaves_index() {
        let ds = fruit_store();
        assert!(ds.del("doc:1"));
        assert!(!ds.del("doc:1"));
        let reply = ds.cmd(&["FT.SEARCH", "idx", "*"]);
        assert_eq!(total_hits(&reply), 1);
    }

    #[test]
    fn test_sortby_nulls_last() {
        let ds = fruit_store();
        ds.hset("doc:3", pairs(&[("name", "apple")]));
        let reply = ds.cmd(&[
            "FT.SEARCH", "idx", "@name:{apple}", "SORTBY", "price", "ASC", "LIMIT", "0", "10",
        ]);
        assert_eq!(total_hits(&reply), 2);
        assert_eq!(doc_keys(&reply), vec!["doc:1", "doc:3"]);
    }

    #[test]
    fn test_sortby_desc() {
        let ds = fruit_store();
        let reply = ds.cmd(&["FT.SEARCH", "idx", "*", "SORTBY", "price", "DESC"]);
        assert_eq!(doc_keys(&reply), vec!["doc:1", "doc:2"]);
    }

    #[test]
    fn test_nocontent_returns_keys_only() {
        let ds = fruit_store();
        let reply = ds.cmd(&["FT.SEARCH", "idx", "@name:{banana}", "NOCONTENT"]);
        let items = reply.as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].as_str(), Some("doc:2"));
    }

    #[test]
    fn test_limit_window() {
        let ds = fruit_store();
        for i in 3..10 {
            ds.hset(&format!("doc:{i}"), pairs(&[("name", "pear"), ("price", &i.to_string())]));
        }
        let reply = ds.cmd(&[
            "FT.SEARCH", "idx", "*", "SORTBY", "price", "ASC", "LIMIT", "2", "3",
        ]);
        assert_eq!(total_hits(&reply), 9);
        // Ascending by price: doc:2(1), doc:3(3), doc:1(3.5), doc:4(4)...
        assert_eq!(doc_keys(&reply), vec!["doc:1", "doc:4", "doc:5"]);
    }

    #[test]
    fn test_json_index() {
        let ds = Datastore::new();
        ds.cmd(&[
            "FT.CREATE", "jidx", "ON", "JSON", "PREFIX", "1", "j:", "SCHEMA", "$.name", "AS",
            "name", "TAG", "$.price", "AS", "price", "NUMERIC",
        ]);
        ds.json_set("j:1", json!({"name": "apple", "price": 3.5}));
        ds.json_set("j:2", json!({"name": "banana", "price": 1.0}));

        let reply = ds.cmd(&["FT.SEARCH", "jidx", "@price:[3 4]"]);
        assert_eq!(total_hits(&reply), 1);
        assert_eq!(doc_keys(&reply), vec!["j:1"]);
    }

    #[test]
    fn test_update_moves_documents_between_postings() {
        let ds = fruit_store();
        ds.hset("doc:2", pairs(&[("name", "kiwi")]));
        assert_eq!(total_hits(&ds.cmd(&["FT.SEARCH", "idx", "@name:{banana}"])), 0);
        assert_eq!(total_hits(&ds.cmd(&["FT.SEARCH", "idx", "@name:{kiwi}"])), 1);
    }

    #[test]
    fn test_documents_inserted_before_create_are_indexed() {
        let ds = Datastore::new();
        ds.hset("doc:1", pairs(&[("name", "apple")]));
        ds.cmd(&[
            "FT.CREATE", "idx", "ON", "HASH", "PREFIX", "1", "doc:", "SCHEMA", "name", "TAG",
        ]);
        assert_eq!(total_hits(&ds.cmd(&["FT.SEARCH", "idx", "*"])), 1);
    }

    #[test]
    fn test_query_error_reply() {
        let ds = fruit_store();
        let reply = ds.cmd(&["FT.SEARCH", "idx", "@missing:{x}"]);
        assert_eq!(reply, Reply::Error("Query syntax error".to_string()));
    }

    #[test]
    fn test_unknown_index_reply() {
        let ds = Datastore::new();
        let reply = ds.cmd(&["FT.SEARCH", "nope", "*"]);
        assert_eq!(reply, Reply::Error("nope: no such index".to_string()));
    }

    #[test]
    fn test_create_rejected_outside_db0() {
        let ds = Datastore::new();
        let args: Vec<Vec<u8>> = ["idx", "SCHEMA", "f", "TAG"]
            .iter()
            .map(|p| p.as_bytes().to_vec())
            .collect();
        let reply = ds.execute_in_db(1, "FT.CREATE", &args);
        assert_eq!(
            reply,
            Reply::Error("Cannot create index on db != 0".to_string())
        );
    }

    #[test]
    fn test_sortable_value_projection_is_string() {
        let ds = fruit_store();
        let reply = ds.cmd(&["FT.SEARCH", "idx", "@name:{apple}"]);
        let fields = &reply.as_array().unwrap()[2];
        assert_eq!(fields.map_get("price"), Some(&Reply::bulk("3.5")));
    }
}
