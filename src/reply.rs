//! Reply value tree for the RESP-compatible wire protocol
//!
//! Commands build a `Reply` value instead of streaming to a socket; the
//! network layer (out of scope here) walks the tree and serializes it.

/// A single reply value.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Simple status string (`+OK`)
    Simple(String),
    /// Binary-safe bulk string
    Bulk(Vec<u8>),
    Long(i64),
    Double(f64),
    Null,
    Array(Vec<Reply>),
    /// Key/value pairs, serialized as a RESP3 map
    Map(Vec<(Reply, Reply)>),
    /// Distinct members, serialized as a RESP3 set
    Set(Vec<Reply>),
    Error(String),
}

impl Reply {
    pub fn ok() -> Reply {
        Reply::Simple("OK".to_string())
    }

    pub fn bulk(s: impl Into<Vec<u8>>) -> Reply {
        Reply::Bulk(s.into())
    }

    pub fn simple(s: impl Into<String>) -> Reply {
        Reply::Simple(s.into())
    }

    /// Bulk string contents as UTF-8, for assertions and debugging.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Reply::Simple(s) => Some(s),
            Reply::Bulk(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            Reply::Long(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Reply]> {
        match self {
            Reply::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&[(Reply, Reply)]> {
        match self {
            Reply::Map(pairs) => Some(pairs),
            _ => None,
        }
    }

    /// Look up a map entry by its string key.
    pub fn map_get(&self, key: &str) -> Option<&Reply> {
        self.as_map()?
            .iter()
            .find(|(k, _)| k.as_str() == Some(key))
            .map(|(_, v)| v)
    }
}
