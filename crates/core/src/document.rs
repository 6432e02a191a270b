use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CoreError;

/// Schema-less key-value document stored in JSONB columns (task filters,
/// filter limits, account sessions, entity payloads).
///
/// Decoding has two entry points so every call site states its failure
/// policy: [`Document::decode_or_default`] turns anything that is not a JSON
/// object into an empty document, [`Document::decode`] rejects it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(Map<String, Value>);

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    /// Strict decode: only a JSON object is a document.
    pub fn decode(raw: Value) -> Result<Self, CoreError> {
        match raw {
            Value::Object(map) => Ok(Self(map)),
            other => Err(CoreError::MalformedDocument(format!(
                "expected object, got {}",
                json_kind(&other)
            ))),
        }
    }

    /// Lenient decode: `null` and non-object values become an empty document.
    /// `field` only labels the warning.
    pub fn decode_or_default(raw: Value, field: &str) -> Self {
        match raw {
            Value::Object(map) => Self(map),
            Value::Null => Self::default(),
            other => {
                tracing::warn!(
                    field,
                    kind = json_kind(&other),
                    "malformed document, using empty default"
                );
                Self::default()
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Non-empty string value.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
    }

    /// Integer value; numeric strings are accepted.
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        match self.0.get(key)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Boolean value; `"true"`/`"false"` strings and 0/1 are accepted.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.0.get(key)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => s.trim().parse().ok(),
            Value::Number(n) => n.as_i64().map(|v| v != 0),
            _ => None,
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    /// Stable textual form used as part of natural keys.
    /// serde_json keeps object keys sorted, so equal documents render equally.
    pub fn canonical(&self) -> String {
        Value::Object(self.0.clone()).to_string()
    }
}

impl From<Map<String, Value>> for Document {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decode_accepts_objects_only() {
        let doc = Document::decode(json!({"access_token": "abc"})).unwrap();
        assert_eq!(doc.get_str("access_token"), Some("abc"));

        let err = Document::decode(json!([1, 2])).unwrap_err();
        assert_eq!(err.to_string(), "malformed document: expected object, got array");
    }

    #[test]
    fn decode_or_default_swallows_malformed_values() {
        assert!(Document::decode_or_default(json!("oops"), "filters").is_empty());
        assert!(Document::decode_or_default(Value::Null, "filters").is_empty());

        let doc = Document::decode_or_default(json!({"posts": 10}), "filter_limits");
        assert_eq!(doc.get_i64("posts"), Some(10));
    }

    #[test]
    fn typed_accessors_are_lenient_about_encoding() {
        let doc = Document::new()
            .with("a", "42")
            .with("b", "true")
            .with("c", 0)
            .with("d", "");

        assert_eq!(doc.get_i64("a"), Some(42));
        assert_eq!(doc.get_bool("b"), Some(true));
        assert_eq!(doc.get_bool("c"), Some(false));
        assert_eq!(doc.get_str("d"), None);
        assert_eq!(doc.get_i64("missing"), None);
    }

    #[test]
    fn canonical_form_ignores_insertion_order() {
        let a = Document::new().with("post_id", 1).with("kind", "x");
        let b = Document::new().with("kind", "x").with("post_id", 1);
        assert_eq!(a.canonical(), b.canonical());
    }
}
