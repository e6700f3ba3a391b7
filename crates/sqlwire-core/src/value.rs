//! Dynamic column values produced by the row decoder.

use serde::{Deserialize, Serialize};

/// A dynamically-typed column or parameter value.
///
/// Temporal values use fixed epochs so they survive serialization: dates are
/// days since 1970-01-01, times are signed microseconds (MySQL TIME may exceed
/// 24 hours or be negative), and timestamps are microseconds since the epoch
/// without timezone conversion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// NULL value
    Null,

    /// Boolean value
    Bool(bool),

    /// 8-bit signed integer
    TinyInt(i8),

    /// 16-bit signed integer
    SmallInt(i16),

    /// 32-bit signed integer
    Int(i32),

    /// 64-bit signed integer
    BigInt(i64),

    /// 32-bit floating point
    Float(f32),

    /// 64-bit floating point
    Double(f64),

    /// Arbitrary precision decimal, also used for unsigned values above `i64::MAX`
    Decimal(String),

    /// Text string
    Text(String),

    /// Binary data
    Bytes(Vec<u8>),

    /// Date (days since epoch)
    Date(i32),

    /// Time (signed microseconds)
    Time(i64),

    /// Timestamp (microseconds since epoch)
    Timestamp(i64),

    /// JSON document
    Json(serde_json::Value),
}

impl Value {
    /// Check if this value is NULL.
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get the type name of this value.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Bool(_) => "BOOLEAN",
            Value::TinyInt(_) => "TINYINT",
            Value::SmallInt(_) => "SMALLINT",
            Value::Int(_) => "INTEGER",
            Value::BigInt(_) => "BIGINT",
            Value::Float(_) => "FLOAT",
            Value::Double(_) => "DOUBLE",
            Value::Decimal(_) => "DECIMAL",
            Value::Text(_) => "TEXT",
            Value::Bytes(_) => "BLOB",
            Value::Date(_) => "DATE",
            Value::Time(_) => "TIME",
            Value::Timestamp(_) => "TIMESTAMP",
            Value::Json(_) => "JSON",
        }
    }

    /// Try to convert this value to a bool.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            other => other.as_i64().map(|v| v != 0),
        }
    }

    /// Try to convert this value to an i64.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::TinyInt(v) => Some(i64::from(*v)),
            Value::SmallInt(v) => Some(i64::from(*v)),
            Value::Int(v) => Some(i64::from(*v)),
            Value::BigInt(v) => Some(*v),
            Value::Bool(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    /// Try to convert this value to a u64, including unsigned values carried as decimals.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Decimal(s) => s.parse().ok(),
            other => other.as_i64().and_then(|v| u64::try_from(v).ok()),
        }
    }

    /// Try to convert this value to an f64.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(f64::from(*v)),
            Value::Double(v) => Some(*v),
            Value::Decimal(s) => s.parse().ok(),
            other => other.as_i64().map(|v| v as f64),
        }
    }

    /// Try to get this value as a string reference.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) | Value::Decimal(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get this value as a byte slice.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            Value::Text(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    /// Convert a `u64` to a `Value`, keeping it exact.
    ///
    /// Values that fit in `i64` become `BigInt`; larger ones are carried as a
    /// decimal string so that `BIGINT UNSIGNED` columns never lose precision.
    pub fn from_unsigned(v: u64) -> Self {
        match i64::try_from(v) {
            Ok(signed) => Value::BigInt(signed),
            Err(_) => {
                tracing::trace!(value = v, "unsigned value above i64::MAX kept as decimal");
                Value::Decimal(v.to_string())
            }
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i8> for Value {
    fn from(v: i8) -> Self {
        Value::TinyInt(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::SmallInt(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::BigInt(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::BigInt(i64::from(v))
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::from_unsigned(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Bytes(v.to_vec())
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::Json(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_unsigned_keeps_precision() {
        assert_eq!(Value::from_unsigned(42), Value::BigInt(42));
        assert_eq!(
            Value::from_unsigned(u64::MAX),
            Value::Decimal("18446744073709551615".to_string())
        );
        assert_eq!(Value::from(u64::MAX).as_u64(), Some(u64::MAX));
    }

    #[test]
    fn test_numeric_accessors() {
        assert_eq!(Value::TinyInt(-3).as_i64(), Some(-3));
        assert_eq!(Value::Int(0).as_bool(), Some(false));
        assert_eq!(Value::Decimal("1.25".into()).as_f64(), Some(1.25));
        assert_eq!(Value::Text("x".into()).as_i64(), None);
        assert_eq!(Value::BigInt(-1).as_u64(), None);
    }

    #[test]
    fn test_option_conversion() {
        let none: Option<i32> = None;
        assert!(Value::from(none).is_null());
        assert_eq!(Value::from(Some("a")), Value::Text("a".to_string()));
    }

    #[test]
    fn test_serde_shape() {
        let json = serde_json::to_string(&Value::Date(19_000)).unwrap();
        assert_eq!(json, r#"{"Date":19000}"#);
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Value::Date(19_000));
    }
}
