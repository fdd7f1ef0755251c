//! Dynamic field values for schema-less row documents.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ValidationError};

/// Field name to value map making up a row document.
pub type Fields = BTreeMap<String, Value>;

/// A JSON-shaped field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// JSON `null`.
    Null,
    /// Boolean.
    Bool(bool),
    /// Integral number.
    Int(i64),
    /// Integer above `i64::MAX`, kept exact instead of widening to a float.
    UInt(u64),
    /// Floating-point number.
    Float(f64),
    /// UTF-8 string.
    String(String),
    /// Ordered list.
    List(Vec<Value>),
    /// Nested object.
    Object(Fields),
}

impl Value {
    /// Whether this is `null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Borrow the string payload, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Foreign-key equality.
    ///
    /// Exact comparison without coercion between types: `5` never equals
    /// `"5"`. Integers and floats are both JSON numbers and compare
    /// numerically. `null` matches nothing.
    pub fn key_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => false,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                (*a as f64) == *b
            }
            (Value::Int(a), Value::UInt(b)) | (Value::UInt(b), Value::Int(a)) => {
                u64::try_from(*a).map_or(false, |a| a == *b)
            }
            (Value::UInt(a), Value::Float(b)) | (Value::Float(b), Value::UInt(a)) => {
                (*a as f64) == *b
            }
            (a, b) => a == b,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => f.write_str(&json),
            Err(_) => write!(f, "{:?}", self),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        i64::try_from(n).map_or(Value::UInt(n), Value::Int)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Parse a JSON object into row fields.
pub fn parse_fields(json: &str) -> Result<Fields> {
    let value: serde_json::Value = serde_json::from_str(json)
        .map_err(|e| ValidationError::InvalidDocument(e.to_string()))?;
    fields_from_json(value)
}

/// Convert an already-parsed JSON value into row fields.
pub fn fields_from_json(value: serde_json::Value) -> Result<Fields> {
    if !value.is_object() {
        return Err(ValidationError::InvalidDocument("expected a JSON object".to_string()).into());
    }
    serde_json::from_value(value)
        .map_err(|e| ValidationError::InvalidDocument(e.to_string()).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_eq_no_string_number_coercion() {
        assert!(!Value::Int(5).key_eq(&Value::from("5")));
        assert!(!Value::from("5").key_eq(&Value::Int(5)));
        assert!(Value::from("c1").key_eq(&Value::from("c1")));
        assert!(!Value::from("C1").key_eq(&Value::from("c1")));
    }

    #[test]
    fn test_key_eq_numbers() {
        assert!(Value::Int(5).key_eq(&Value::Float(5.0)));
        assert!(!Value::Int(5).key_eq(&Value::Float(5.5)));
    }

    #[test]
    fn test_null_never_matches() {
        assert!(!Value::Null.key_eq(&Value::Null));
        assert!(!Value::Null.key_eq(&Value::from("x")));
    }

    #[test]
    fn test_parse_fields_keeps_types() {
        let fields =
            parse_fields(r#"{"name":"Slab pour","floor":3,"ratio":0.5,"done":false,"owner":null}"#)
                .unwrap();
        assert_eq!(fields["name"], Value::from("Slab pour"));
        assert_eq!(fields["floor"], Value::Int(3));
        assert_eq!(fields["ratio"], Value::Float(0.5));
        assert_eq!(fields["done"], Value::Bool(false));
        assert!(fields["owner"].is_null());
    }

    #[test]
    fn test_large_integers_survive_round_trip() {
        let json = r#"{"big":18446744073709551615,"edge":9223372036854775807}"#;
        let fields = parse_fields(json).unwrap();
        assert_eq!(fields["big"], Value::UInt(u64::MAX));
        assert_eq!(fields["edge"], Value::Int(i64::MAX));
        assert_eq!(serde_json::to_string(&fields).unwrap(), json);

        assert!(Value::UInt(u64::MAX).key_eq(&Value::from(u64::MAX)));
        assert!(Value::Int(7).key_eq(&Value::UInt(7)));
        assert!(!Value::Int(-1).key_eq(&Value::UInt(u64::MAX)));
        assert_eq!(Value::from(7u64), Value::Int(7));
    }

    #[test]
    fn test_parse_fields_rejects_non_objects() {
        assert!(parse_fields("[1,2]").is_err());
        assert!(parse_fields("not json").is_err());
    }

    #[test]
    fn test_display_is_json() {
        assert_eq!(Value::from("c1").to_string(), "\"c1\"");
        assert_eq!(Value::Int(7).to_string(), "7");
    }
}
