//! Documents and the per-shard document store
//!
//! The storage engine proper is an external collaborator; the search core
//! only needs a keyed map of documents and a way to extract typed field
//! values from them, by hash-field name or by `$.a.b` JSON path.

use std::collections::HashMap;

use serde_json::Value as JsonValue;

use crate::schema::DocKind;

/// A stored document: flat byte-valued hash or a JSON value.
#[derive(Debug, Clone, PartialEq)]
pub enum DocValue {
    Hash(HashMap<String, Vec<u8>>),
    Json(JsonValue),
}

/// A field value pulled out of a document, before per-index typing.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Bytes(Vec<u8>),
    Json(JsonValue),
}

impl DocValue {
    pub fn kind(&self) -> DocKind {
        match self {
            DocValue::Hash(_) => DocKind::Hash,
            DocValue::Json(_) => DocKind::Json,
        }
    }

    /// Extract the value stored under `identifier`: a hash field name or
    /// a JSON path, depending on the document kind.
    pub fn extract(&self, identifier: &str) -> Option<RawValue> {
        match self {
            DocValue::Hash(fields) => fields.get(identifier).map(|v| RawValue::Bytes(v.clone())),
            DocValue::Json(value) => {
                json_lookup(value, identifier).cloned().map(RawValue::Json)
            }
        }
    }
}

impl RawValue {
    /// String form of the value. Scalars only; JSON objects and arrays
    /// do not project to text.
    pub fn as_text(&self) -> Option<String> {
        match self {
            RawValue::Bytes(b) => String::from_utf8(b.clone()).ok(),
            RawValue::Json(JsonValue::String(s)) => Some(s.clone()),
            RawValue::Json(JsonValue::Number(n)) => Some(n.to_string()),
            RawValue::Json(JsonValue::Bool(b)) => Some(b.to_string()),
            RawValue::Json(_) => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            RawValue::Bytes(b) => std::str::from_utf8(b).ok()?.trim().parse().ok(),
            RawValue::Json(JsonValue::Number(n)) => n.as_f64(),
            RawValue::Json(JsonValue::String(s)) => s.trim().parse().ok(),
            RawValue::Json(_) => None,
        }
    }

    /// Decode a vector of `dim` components: packed little-endian f32 for
    /// hash documents, a numeric array for JSON documents.
    pub fn as_vector(&self, dim: usize) -> Option<Vec<f32>> {
        match self {
            RawValue::Bytes(b) => bytes_to_vector(b, dim),
            RawValue::Json(JsonValue::Array(items)) => {
                if items.len() != dim {
                    return None;
                }
                items
                    .iter()
                    .map(|v| v.as_f64().map(|f| f as f32))
                    .collect()
            }
            RawValue::Json(_) => None,
        }
    }
}

/// Decode a packed little-endian f32 buffer of exactly `dim` components.
pub fn bytes_to_vector(bytes: &[u8], dim: usize) -> Option<Vec<f32>> {
    if bytes.len() != dim * 4 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}

/// Check a schema identifier is a well-formed `$.a.b` path. A bare `$`
/// addresses the document root.
pub fn json_path_valid(path: &str) -> bool {
    let Some(rest) = path.strip_prefix('$') else {
        return false;
    };
    if rest.is_empty() {
        return true;
    }
    rest.split('.').skip(1).all(|seg| {
        !seg.is_empty() && seg.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-')
    }) && rest.starts_with('.')
}

/// Walk a `$.a.b` path into a JSON value.
pub fn json_lookup<'a>(value: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    let rest = path.strip_prefix('$')?;
    let mut current = value;
    for seg in rest.split('.').skip(1) {
        current = current.get(seg)?;
    }
    Some(current)
}

/// Per-shard keyed document map. Owned exclusively by the shard thread.
#[derive(Debug, Default)]
pub struct DocStore {
    docs: HashMap<String, DocValue>,
}

impl DocStore {
    pub fn get(&self, key: &str) -> Option<&DocValue> {
        self.docs.get(key)
    }

    pub fn insert(&mut self, key: String, doc: DocValue) {
        self.docs.insert(key, doc);
    }

    pub fn remove(&mut self, key: &str) -> Option<DocValue> {
        self.docs.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &DocValue)> {
        self.docs.iter()
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_hash_extract() {
        let mut fields = HashMap::new();
        fields.insert("name".to_string(), b"apple".to_vec());
        let doc = DocValue::Hash(fields);

        let value = doc.extract("name").unwrap();
        assert_eq!(value.as_text().as_deref(), Some("apple"));
        assert!(doc.extract("missing").is_none());
    }

    #[test]
    fn test_json_path_extract() {
        let doc = DocValue::Json(json!({"a": {"b": 3.5}, "s": "hi"}));
        assert_eq!(doc.extract("$.a.b").unwrap().as_f64(), Some(3.5));
        assert_eq!(
            doc.extract("$.s").unwrap().as_text().as_deref(),
            Some("hi")
        );
        assert!(doc.extract("$.a.c").is_none());
    }

    #[test]
    fn test_json_path_validation() {
        assert!(json_path_valid("$"));
        assert!(json_path_valid("$.a"));
        assert!(json_path_valid("$.a.b_c"));
        assert!(!json_path_valid("a.b"));
        assert!(!json_path_valid("$."));
        assert!(!json_path_valid("$.a..b"));
    }

    #[test]
    fn test_vector_from_bytes() {
        let mut bytes = Vec::new();
        for v in [0.1f32, 0.0] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        let raw = RawValue::Bytes(bytes);
        let vec = raw.as_vector(2).unwrap();
        assert!((vec[0] - 0.1).abs() < 1e-6);
        assert!(raw.as_vector(3).is_none());
    }

    #[test]
    fn test_vector_from_json_array() {
        let raw = RawValue::Json(json!([1.0, 2.0]));
        assert_eq!(raw.as_vector(2), Some(vec![1.0, 2.0]));
    }

    #[test]
    fn test_numeric_from_bytes() {
        let raw = RawValue::Bytes(b" 3.5 ".to_vec());
        assert_eq!(raw.as_f64(), Some(3.5));
        assert_eq!(RawValue::Bytes(b"nope".to_vec()).as_f64(), None);
    }
}
