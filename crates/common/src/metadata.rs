use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Open, string-keyed metadata carried by every message.
///
/// Used for trace context, saga correlation and aggregate identity. Keys this
/// crate does not know about are passed through unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(HashMap<String, Value>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a key, replacing any previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Builder-style variant of [`Metadata::set`].
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Returns the value for `key` when it is a JSON string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Copies every entry of `other` into `self`, overwriting on collision.
    pub fn extend(&mut self, other: &Metadata) {
        for (key, value) in other.iter() {
            self.0.insert(key.clone(), value.clone());
        }
    }
}

impl FromIterator<(String, Value)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_str_ignores_non_string_values() {
        let metadata = Metadata::new()
            .with("SAGA_ID", "saga-1")
            .with("aggregate-version", 3);

        assert_eq!(metadata.get_str("SAGA_ID"), Some("saga-1"));
        assert_eq!(metadata.get_str("aggregate-version"), None);
        assert_eq!(metadata.get("aggregate-version"), Some(&Value::from(3)));
    }

    #[test]
    fn extend_overwrites_existing_keys() {
        let mut metadata = Metadata::new().with("a", "1").with("b", "2");
        metadata.extend(&Metadata::new().with("b", "3").with("c", "4"));

        assert_eq!(metadata.len(), 3);
        assert_eq!(metadata.get_str("b"), Some("3"));
    }

    #[test]
    fn serializes_as_flat_object() {
        let metadata = Metadata::new().with("traceparent", "00-abc-01");
        let json = serde_json::to_value(&metadata).unwrap();
        assert_eq!(json, serde_json::json!({ "traceparent": "00-abc-01" }));
    }
}
