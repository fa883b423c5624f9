//! Loosely-typed event payload
//!
//! Event payloads are open mappings from string keys to primitive values. The
//! schema is per event type, not globally fixed: consumers must tolerate unknown
//! keys and missing optional keys, and some producers send numeric fields as
//! strings (e.g. `planId` arriving as `5` or `"5"`). All reads therefore go
//! through one explicit coercion function per primitive, returning a typed
//! result instead of throwing.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single payload value: the wire contract allows null, booleans, numbers and
/// strings. Objects and arrays are not part of the contract and fail decoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PayloadValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl From<bool> for PayloadValue {
    fn from(v: bool) -> Self {
        PayloadValue::Bool(v)
    }
}

impl From<i64> for PayloadValue {
    fn from(v: i64) -> Self {
        PayloadValue::Int(v)
    }
}

impl From<f64> for PayloadValue {
    fn from(v: f64) -> Self {
        PayloadValue::Float(v)
    }
}

impl From<&str> for PayloadValue {
    fn from(v: &str) -> Self {
        PayloadValue::Str(v.to_string())
    }
}

impl From<String> for PayloadValue {
    fn from(v: String) -> Self {
        PayloadValue::Str(v)
    }
}

/// Errors from payload field coercion
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PayloadError {
    #[error("missing required payload field: {0}")]
    Missing(String),

    #[error("payload field {field} has wrong type: expected {expected}")]
    WrongType { field: String, expected: &'static str },
}

/// Open key/value payload carried inside an event envelope
///
/// Keys are ordered (BTreeMap) so serialized payloads are stable across runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(BTreeMap<String, PayloadValue>);

impl Payload {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: &str, value: impl Into<PayloadValue>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<PayloadValue>) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&PayloadValue> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Coerce a required integer field. Accepts `Int` and numeric `Str` values
    /// (producers are not consistent about which they send).
    pub fn get_i64(&self, key: &str) -> Result<i64, PayloadError> {
        match self.0.get(key) {
            None | Some(PayloadValue::Null) => Err(PayloadError::Missing(key.to_string())),
            Some(PayloadValue::Int(n)) => Ok(*n),
            Some(PayloadValue::Str(s)) => s.trim().parse::<i64>().map_err(|_| {
                PayloadError::WrongType {
                    field: key.to_string(),
                    expected: "integer",
                }
            }),
            Some(_) => Err(PayloadError::WrongType {
                field: key.to_string(),
                expected: "integer",
            }),
        }
    }

    /// Coerce an optional integer field: absent or null yields `None`.
    pub fn get_i64_opt(&self, key: &str) -> Result<Option<i64>, PayloadError> {
        match self.get_i64(key) {
            Ok(v) => Ok(Some(v)),
            Err(PayloadError::Missing(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Coerce a required string field.
    pub fn get_str(&self, key: &str) -> Result<&str, PayloadError> {
        match self.0.get(key) {
            None | Some(PayloadValue::Null) => Err(PayloadError::Missing(key.to_string())),
            Some(PayloadValue::Str(s)) => Ok(s.as_str()),
            Some(_) => Err(PayloadError::WrongType {
                field: key.to_string(),
                expected: "string",
            }),
        }
    }

    /// Coerce an optional string field: absent or null yields `None`.
    pub fn get_str_opt(&self, key: &str) -> Result<Option<&str>, PayloadError> {
        match self.get_str(key) {
            Ok(v) => Ok(Some(v)),
            Err(PayloadError::Missing(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Coerce a required boolean field.
    pub fn get_bool(&self, key: &str) -> Result<bool, PayloadError> {
        match self.0.get(key) {
            None | Some(PayloadValue::Null) => Err(PayloadError::Missing(key.to_string())),
            Some(PayloadValue::Bool(b)) => Ok(*b),
            Some(_) => Err(PayloadError::WrongType {
                field: key.to_string(),
                expected: "boolean",
            }),
        }
    }

    /// Coerce an optional boolean field: absent or null yields `None`.
    pub fn get_bool_opt(&self, key: &str) -> Result<Option<bool>, PayloadError> {
        match self.get_bool(key) {
            Ok(v) => Ok(Some(v)),
            Err(PayloadError::Missing(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_and_typed_reads() {
        let payload = Payload::new()
            .with("appointmentId", 42i64)
            .with("notes", "follow-up")
            .with("urgent", true);

        assert_eq!(payload.get_i64("appointmentId"), Ok(42));
        assert_eq!(payload.get_str("notes"), Ok("follow-up"));
        assert_eq!(payload.get_bool("urgent"), Ok(true));
    }

    #[test]
    fn test_numeric_string_coercion() {
        let payload = Payload::new().with("planId", "5");
        assert_eq!(payload.get_i64("planId"), Ok(5));

        let payload = Payload::new().with("planId", "not-a-number");
        assert!(matches!(
            payload.get_i64("planId"),
            Err(PayloadError::WrongType { .. })
        ));
    }

    #[test]
    fn test_optional_reads_tolerate_absence() {
        let payload = Payload::new();
        assert_eq!(payload.get_i64_opt("planId"), Ok(None));
        assert_eq!(payload.get_str_opt("role"), Ok(None));
        assert_eq!(payload.get_bool_opt("urgent"), Ok(None));
    }

    #[test]
    fn test_null_treated_as_absent() {
        let payload = Payload::new().with("planId", PayloadValue::Null);
        assert_eq!(payload.get_i64_opt("planId"), Ok(None));
        assert!(matches!(
            payload.get_i64("planId"),
            Err(PayloadError::Missing(_))
        ));
    }

    #[test]
    fn test_required_read_reports_missing_field() {
        let payload = Payload::new();
        assert_eq!(
            payload.get_i64("appointmentId"),
            Err(PayloadError::Missing("appointmentId".to_string()))
        );
    }

    #[test]
    fn test_wire_roundtrip_preserves_types() {
        let payload = Payload::new()
            .with("count", 3i64)
            .with("score", 4.5f64)
            .with("name", "dr-lee")
            .with("active", true);

        let json = serde_json::to_string(&payload).unwrap();
        let back: Payload = serde_json::from_str(&json).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn test_unknown_keys_are_carried_not_rejected() {
        let json = r#"{"appointmentId": 42, "someFutureField": "whatever"}"#;
        let payload: Payload = serde_json::from_str(json).unwrap();
        assert_eq!(payload.get_i64("appointmentId"), Ok(42));
        assert!(payload.contains_key("someFutureField"));
    }
}
