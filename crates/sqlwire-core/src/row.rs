//! Decoded result rows.

use crate::Result;
use crate::error::{Error, TypeError};
use crate::value::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Column names shared across all rows in a result set.
///
/// Wrapped in `Arc` so every row of one result set points at the same
/// metadata.
#[derive(Debug, Clone)]
pub struct ColumnInfo {
    names: Vec<String>,
    name_to_index: HashMap<String, usize>,
}

impl ColumnInfo {
    /// Create new column info from a list of column names.
    ///
    /// When a name repeats (e.g. `SELECT a.id, b.id`), name lookup resolves to
    /// the first occurrence.
    pub fn new(names: Vec<String>) -> Self {
        let mut name_to_index = HashMap::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            name_to_index.entry(name.clone()).or_insert(i);
        }
        Self {
            names,
            name_to_index,
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Get the index of a column by name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(name).copied()
    }

    /// Get the name of a column by index.
    pub fn name_at(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// A single row returned by the server.
#[derive(Debug, Clone)]
pub struct Row {
    values: Vec<Value>,
    columns: Arc<ColumnInfo>,
}

impl Row {
    /// Create a row with its own column metadata.
    pub fn new(column_names: Vec<String>, values: Vec<Value>) -> Self {
        Self {
            values,
            columns: Arc::new(ColumnInfo::new(column_names)),
        }
    }

    /// Create a row sharing column metadata with the rest of its result set.
    pub fn with_columns(columns: Arc<ColumnInfo>, values: Vec<Value>) -> Self {
        Self { values, columns }
    }

    pub fn column_info(&self) -> Arc<ColumnInfo> {
        Arc::clone(&self.columns)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Get a value by column index.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Get a value by column name.
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.columns.index_of(name).and_then(|i| self.values.get(i))
    }

    /// Get a typed value by column index.
    #[allow(clippy::result_large_err)]
    pub fn get_as<T: FromValue>(&self, index: usize) -> Result<T> {
        let value = self.get(index).ok_or_else(|| {
            Error::Type(TypeError {
                expected: std::any::type_name::<T>(),
                actual: format!(
                    "index {} out of bounds (row has {} columns)",
                    index,
                    self.len()
                ),
                column: None,
                rust_type: None,
            })
        })?;
        T::from_value(value)
    }

    /// Get a typed value by column name.
    #[allow(clippy::result_large_err)]
    pub fn get_named<T: FromValue>(&self, name: &str) -> Result<T> {
        let value = self.get_by_name(name).ok_or_else(|| {
            Error::Type(TypeError {
                expected: std::any::type_name::<T>(),
                actual: format!("column '{}' not found", name),
                column: Some(name.to_string()),
                rust_type: None,
            })
        })?;
        T::from_value(value).map_err(|e| match e {
            Error::Type(mut te) => {
                te.column = Some(name.to_string());
                Error::Type(te)
            }
            e => e,
        })
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.names().iter().map(String::as_str)
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.values.iter()
    }

    /// Consume the row, returning its values.
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

/// Conversion from a decoded `Value` into a Rust type.
pub trait FromValue: Sized {
    #[allow(clippy::result_large_err)]
    fn from_value(value: &Value) -> Result<Self>;
}

fn mismatch(expected: &'static str, value: &Value) -> Error {
    Error::Type(TypeError {
        expected,
        actual: value.type_name().to_string(),
        column: None,
        rust_type: Some(expected),
    })
}

fn out_of_range(expected: &'static str, shown: impl std::fmt::Display) -> Error {
    Error::Type(TypeError {
        expected,
        actual: format!("value {} out of range", shown),
        column: None,
        rust_type: Some(expected),
    })
}

macro_rules! integer_from_value {
    ($($ty:ty),*) => {
        $(
            impl FromValue for $ty {
                fn from_value(value: &Value) -> Result<Self> {
                    let name = stringify!($ty);
                    if let Some(v) = value.as_i64() {
                        return <$ty>::try_from(v).map_err(|_| out_of_range(name, v));
                    }
                    if let Value::Decimal(s) = value {
                        if let Ok(v) = s.parse::<u64>() {
                            return <$ty>::try_from(v).map_err(|_| out_of_range(name, v));
                        }
                    }
                    Err(mismatch(name, value))
                }
            }
        )*
    };
}

integer_from_value!(i8, i16, i32, i64, u8, u16, u32, u64);

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self> {
        value.as_bool().ok_or_else(|| mismatch("bool", value))
    }
}

#[allow(clippy::cast_possible_truncation)]
impl FromValue for f32 {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Float(v) => Ok(*v),
            other => other
                .as_f64()
                .map(|v| v as f32)
                .ok_or_else(|| mismatch("f32", other)),
        }
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self> {
        value.as_f64().ok_or_else(|| mismatch("f64", value))
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Text(s) | Value::Decimal(s) => Ok(s.clone()),
            Value::Bytes(b) => String::from_utf8(b.clone()).map_err(|_| mismatch("String", value)),
            _ => Err(mismatch("String", value)),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: &Value) -> Result<Self> {
        value
            .as_bytes()
            .map(<[u8]>::to_vec)
            .ok_or_else(|| mismatch("Vec<u8>", value))
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self> {
        if value.is_null() {
            Ok(None)
        } else {
            T::from_value(value).map(Some)
        }
    }
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self> {
        Ok(value.clone())
    }
}

impl FromValue for serde_json::Value {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Json(v) => Ok(v.clone()),
            Value::Text(s) => serde_json::from_str(s).map_err(|e| {
                Error::Type(TypeError {
                    expected: "valid JSON",
                    actual: format!("invalid JSON: {}", e),
                    column: None,
                    rust_type: None,
                })
            }),
            _ => Err(mismatch("JSON", value)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Row {
        Row::new(
            vec!["id".into(), "name".into(), "score".into(), "id".into()],
            vec![
                Value::BigInt(7),
                Value::Text("ada".into()),
                Value::Null,
                Value::BigInt(8),
            ],
        )
    }

    #[test]
    fn test_row_access_by_index_and_name() {
        let row = sample();
        assert_eq!(row.len(), 4);
        assert_eq!(row.get(1), Some(&Value::Text("ada".into())));
        assert_eq!(row.get_by_name("id"), Some(&Value::BigInt(7)));
        assert_eq!(row.get_named::<String>("name").unwrap(), "ada");
        assert_eq!(row.get_as::<Option<i32>>(2).unwrap(), None);
    }

    #[test]
    fn test_row_type_errors_name_the_column() {
        let row = sample();
        let err = row.get_named::<i64>("name").unwrap_err();
        match err {
            Error::Type(te) => assert_eq!(te.column.as_deref(), Some("name")),
            other => panic!("unexpected error: {other}"),
        }
        assert!(row.get_as::<i64>(10).is_err());
    }

    #[test]
    fn test_integer_range_checks() {
        assert_eq!(i8::from_value(&Value::BigInt(127)).unwrap(), 127);
        assert!(i8::from_value(&Value::BigInt(128)).is_err());
        assert!(u32::from_value(&Value::Int(-1)).is_err());
        assert_eq!(
            u64::from_value(&Value::Decimal("18446744073709551615".into())).unwrap(),
            u64::MAX
        );
    }

    #[test]
    fn test_shared_columns() {
        let first = sample();
        let second = Row::with_columns(first.column_info(), vec![Value::Null; 4]);
        assert!(Arc::ptr_eq(&first.column_info(), &second.column_info()));
        assert_eq!(second.column_names().count(), 4);
    }
}
