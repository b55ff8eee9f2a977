//! Error types for the search core

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SearchError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SearchError {
    /// Argument parsing errors, reported before any dispatch
    #[error("SYNTAX {0}")]
    Syntax(String),

    /// Schema validation errors at CREATE/ALTER time
    #[error("Schema error: {0}")]
    Schema(String),

    /// Query string failed to parse
    #[error("Query syntax error")]
    QuerySyntax,

    #[error("Unknown Index name")]
    UnknownIndex,

    #[error("Index already exists")]
    IndexExists,

    /// Index missing during fan-out, carries the index name
    #[error("{0}: no such index")]
    NoSuchIndex(String),

    /// Per-shard executor failure carried back to the coordinator
    #[error("Shard error: {0}")]
    Shard(String),

    /// Plain-text command errors reported verbatim
    #[error("{0}")]
    InvalidArgument(String),

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("wrong number of arguments for '{0}' command")]
    WrongArity(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SearchError {
    pub fn syntax(msg: impl Into<String>) -> Self {
        SearchError::Syntax(msg.into())
    }

    pub fn schema(msg: impl Into<String>) -> Self {
        SearchError::Schema(msg.into())
    }
}
