//! Query parameter bindings (`PARAMS` clause)
//!
//! Values are raw byte strings so binary vector payloads pass through
//! untouched. Substitution happens once at parse time; the coordinator
//! keeps the parsed query alive for the duration of the fan-out.

use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct QueryParams {
    values: HashMap<String, Vec<u8>>,
}

impl QueryParams {
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.values.get(name).map(|v| v.as_slice())
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        std::str::from_utf8(self.get(name)?).ok()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_value_roundtrip() {
        let mut params = QueryParams::default();
        params.insert("vec", vec![0u8, 159, 146, 150]);
        assert_eq!(params.get("vec"), Some(&[0u8, 159, 146, 150][..]));
        assert_eq!(params.get_str("vec"), None);
    }
}
