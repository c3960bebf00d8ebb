// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sensor and upload records.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Reserved key carrying the sensor unit id in a [`SensorRecord`].
pub const ID_KEY: &str = "id";

/// Reserved key carrying the destination credential in an [`UploadRecord`].
pub const CREDENTIAL_KEY: &str = "key";

/// A decoded sensor frame: measurement name to JSON value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SensorRecord(serde_json::Map<String, serde_json::Value>);

impl SensorRecord {
    /// Wrap an already decoded JSON object.
    pub fn from_map(map: serde_json::Map<String, serde_json::Value>) -> Self {
        Self(map)
    }

    /// The originating sensor unit id, if present and a string.
    pub fn id(&self) -> Option<&str> {
        self.0.get(ID_KEY).and_then(|v| v.as_str())
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &serde_json::Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrow the underlying JSON object.
    pub fn as_map(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.0
    }
}

impl fmt::Display for SensorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(&self.0) {
            Ok(s) => f.write_str(&s),
            Err(_) => write!(f, "{:?}", self.0),
        }
    }
}

/// A scalar value accepted by the upload service.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// 64-bit floating point.
    Float(f64),
    /// 64-bit signed integer.
    Integer(i64),
    /// UTF-8 string.
    String(String),
    /// Boolean value.
    Boolean(bool),
}

impl FieldValue {
    /// Convert a JSON value, keeping its natural type.
    ///
    /// Null, arrays and objects have no scalar representation and yield `None`.
    pub fn from_json(val: &serde_json::Value) -> Option<Self> {
        match val {
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(FieldValue::Integer(i))
                } else {
                    n.as_f64().map(FieldValue::Float)
                }
            }
            serde_json::Value::String(s) => Some(FieldValue::String(s.clone())),
            serde_json::Value::Bool(b) => Some(FieldValue::Boolean(*b)),
            serde_json::Value::Null => None,
            _ => None,
        }
    }

    /// Format this value for a form-encoded request body.
    pub fn to_form_value(&self) -> String {
        match self {
            FieldValue::Float(v) => format!("{}", v),
            FieldValue::Integer(v) => v.to_string(),
            FieldValue::String(v) => v.clone(),
            FieldValue::Boolean(v) => v.to_string(),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_form_value())
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Integer(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::String(v.to_string())
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Boolean(v)
    }
}

/// A record in the upload service's schema.
///
/// Either empty ("nothing to upload") or carrying a [`CREDENTIAL_KEY`]
/// entry plus zero or more destination fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct UploadRecord(BTreeMap<String, FieldValue>);

impl UploadRecord {
    /// Create an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a field, returning the previous value if any.
    pub fn insert(&mut self, key: impl Into<String>, value: FieldValue) -> Option<FieldValue> {
        self.0.insert(key.into(), value)
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// The destination credential, if the record is addressed.
    pub fn credential(&self) -> Option<&str> {
        match self.0.get(CREDENTIAL_KEY) {
            Some(FieldValue::String(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Number of destination fields, not counting the credential.
    pub fn field_count(&self) -> usize {
        self.0.len() - usize::from(self.0.contains_key(CREDENTIAL_KEY))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.0.iter()
    }

    /// Key/value pairs ready for `application/x-www-form-urlencoded` encoding.
    pub fn to_form_pairs(&self) -> Vec<(String, String)> {
        self.0
            .iter()
            .map(|(k, v)| (k.clone(), v.to_form_value()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: serde_json::Value) -> SensorRecord {
        match value {
            serde_json::Value::Object(map) => SensorRecord::from_map(map),
            other => panic!("expected object, got {}", other),
        }
    }

    #[test]
    fn test_sensor_record_id() {
        assert_eq!(record(json!({"id": "lurker1"})).id(), Some("lurker1"));
        assert_eq!(record(json!({"id": 3})).id(), None);
        assert_eq!(record(json!({"air_temp": 1.0})).id(), None);
    }

    #[test]
    fn test_field_value_from_json() {
        assert_eq!(FieldValue::from_json(&json!(12.34)), Some(FieldValue::Float(12.34)));
        assert_eq!(FieldValue::from_json(&json!(456)), Some(FieldValue::Integer(456)));
        assert_eq!(
            FieldValue::from_json(&json!("yes")),
            Some(FieldValue::String("yes".into()))
        );
        assert_eq!(FieldValue::from_json(&json!(true)), Some(FieldValue::Boolean(true)));
        assert_eq!(FieldValue::from_json(&json!(null)), None);
        assert_eq!(FieldValue::from_json(&json!([1, 2])), None);
        assert_eq!(FieldValue::from_json(&json!({"a": 1})), None);
    }

    #[test]
    fn test_field_value_form_encoding() {
        assert_eq!(FieldValue::Float(12.34).to_form_value(), "12.34");
        assert_eq!(FieldValue::Integer(-7).to_form_value(), "-7");
        assert_eq!(FieldValue::Boolean(false).to_form_value(), "false");
        assert_eq!(FieldValue::from("no motion").to_form_value(), "no motion");
    }

    #[test]
    fn test_upload_record_credential_and_pairs() {
        let mut rec = UploadRecord::new();
        assert!(rec.is_empty());
        assert_eq!(rec.credential(), None);

        rec.insert("key", FieldValue::from("ABC123"));
        rec.insert("field1", FieldValue::Float(12.34));
        rec.insert("field3", FieldValue::Integer(34));

        assert_eq!(rec.credential(), Some("ABC123"));
        assert_eq!(rec.field_count(), 2);
        assert_eq!(
            rec.to_form_pairs(),
            vec![
                ("field1".to_string(), "12.34".to_string()),
                ("field3".to_string(), "34".to_string()),
                ("key".to_string(), "ABC123".to_string()),
            ]
        );
    }

    #[test]
    fn test_upload_record_serializes_flat() {
        let mut rec = UploadRecord::new();
        rec.insert("key", FieldValue::from("K"));
        rec.insert("field6", FieldValue::from("yes"));
        rec.insert("field4", FieldValue::Integer(456));

        let value = serde_json::to_value(&rec).unwrap();
        assert_eq!(value, json!({"key": "K", "field4": 456, "field6": "yes"}));
    }
}
