//! Shoal search core
//!
//! Secondary-index subsystem of the Shoal sharded in-memory datastore:
//! named indices over a key prefix make documents queryable by tags,
//! full-text terms, numeric ranges and approximate KNN vector
//! similarity, with an aggregation pipeline on top.
//!
//! ## Architecture
//! - Index layer: tag postings + inverted text index + sorted numeric
//!   blocks + FLAT/HNSW vector indices, one per schema field per shard
//! - Query layer: character-level recursive-descent parser into an
//!   expression tree, evaluated shard-locally against the field indices
//! - Coordination: single-hop fan-out over single-threaded shards,
//!   KNN/SORTBY/LIMIT merging on the coordinator
//! - Command surface: the FT.* family over a RESP-shaped reply tree

pub mod aggregate;
pub mod command;
pub mod config;
pub mod datastore;
pub mod distance;
pub mod doc;
pub mod doc_index;
pub mod index;
pub mod query;
pub mod reply;
pub mod schema;
pub mod search;
pub mod shard;
pub mod synonyms;

mod error;

pub use config::SearchConfig;
pub use datastore::Datastore;
pub use error::{Result, SearchError};
pub use reply::Reply;
pub use schema::{
    DocKind, FieldParams, FieldSpec, FieldType, IndexDefinition, NumericParams, Schema, TagParams,
    TextParams, VectorAlgo, VectorParams,
};
pub use search::{SearchAlgorithm, SortOrder, SortableValue};
