//! Column type codes and value conversion.
//!
//! Decoding maps wire values onto [`Value`] using the column's descriptor:
//! unsigned integers widen to the next signed width, temporal values go
//! through [`crate::temporal`], and string-like data stays bytes only for
//! binary collations. Encoding covers prepared-statement parameters and SQL
//! literals for client-side interpolation.

#![allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]

use std::sync::LazyLock;

use regex::Regex;
use sqlwire_core::{Result, Value};

use crate::config::ZeroDateTimeBehavior;
use crate::error::protocol_error_with_data;
use crate::field::FieldDescriptor;
use crate::protocol::{PacketReader, PacketWriter};
use crate::temporal::{self, MySqlDate, MySqlDateTime, MySqlTime};

/// `MYSQL_TYPE_*` codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FieldType {
    Decimal = 0x00,
    Tiny = 0x01,
    Short = 0x02,
    Long = 0x03,
    Float = 0x04,
    Double = 0x05,
    Null = 0x06,
    Timestamp = 0x07,
    LongLong = 0x08,
    Int24 = 0x09,
    Date = 0x0A,
    Time = 0x0B,
    DateTime = 0x0C,
    Year = 0x0D,
    /// Internal to the server; never sent for stored columns
    NewDate = 0x0E,
    VarChar = 0x0F,
    Bit = 0x10,
    /// Fractional-second storage formats (5.6+)
    Timestamp2 = 0x11,
    DateTime2 = 0x12,
    Time2 = 0x13,
    Json = 0xF5,
    NewDecimal = 0xF6,
    Enum = 0xF7,
    Set = 0xF8,
    TinyBlob = 0xF9,
    MediumBlob = 0xFA,
    LongBlob = 0xFB,
    Blob = 0xFC,
    VarString = 0xFD,
    String = 0xFE,
    Geometry = 0xFF,
}

impl FieldType {
    /// Unknown codes are treated as CHAR.
    #[must_use]
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x00 => FieldType::Decimal,
            0x01 => FieldType::Tiny,
            0x02 => FieldType::Short,
            0x03 => FieldType::Long,
            0x04 => FieldType::Float,
            0x05 => FieldType::Double,
            0x06 => FieldType::Null,
            0x07 => FieldType::Timestamp,
            0x08 => FieldType::LongLong,
            0x09 => FieldType::Int24,
            0x0A => FieldType::Date,
            0x0B => FieldType::Time,
            0x0C => FieldType::DateTime,
            0x0D => FieldType::Year,
            0x0E => FieldType::NewDate,
            0x0F => FieldType::VarChar,
            0x10 => FieldType::Bit,
            0x11 => FieldType::Timestamp2,
            0x12 => FieldType::DateTime2,
            0x13 => FieldType::Time2,
            0xF5 => FieldType::Json,
            0xF6 => FieldType::NewDecimal,
            0xF7 => FieldType::Enum,
            0xF8 => FieldType::Set,
            0xF9 => FieldType::TinyBlob,
            0xFA => FieldType::MediumBlob,
            0xFB => FieldType::LongBlob,
            0xFC => FieldType::Blob,
            0xFD => FieldType::VarString,
            0xFE => FieldType::String,
            0xFF => FieldType::Geometry,
            _ => FieldType::String,
        }
    }

    #[must_use]
    pub const fn is_integer(self) -> bool {
        matches!(
            self,
            FieldType::Tiny
                | FieldType::Short
                | FieldType::Long
                | FieldType::LongLong
                | FieldType::Int24
                | FieldType::Year
        )
    }

    #[must_use]
    pub const fn is_string(self) -> bool {
        matches!(
            self,
            FieldType::VarChar
                | FieldType::VarString
                | FieldType::String
                | FieldType::Enum
                | FieldType::Set
        )
    }

    #[must_use]
    pub const fn is_blob(self) -> bool {
        matches!(
            self,
            FieldType::TinyBlob
                | FieldType::MediumBlob
                | FieldType::LongBlob
                | FieldType::Blob
                | FieldType::Geometry
        )
    }

    /// DATE, DATETIME and TIMESTAMP in any storage format.
    #[must_use]
    pub const fn is_date_like(self) -> bool {
        matches!(
            self,
            FieldType::Date
                | FieldType::NewDate
                | FieldType::DateTime
                | FieldType::Timestamp
                | FieldType::DateTime2
                | FieldType::Timestamp2
        )
    }

    #[must_use]
    pub const fn is_time(self) -> bool {
        matches!(self, FieldType::Time | FieldType::Time2)
    }

    /// SQL type name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            FieldType::Decimal | FieldType::NewDecimal => "DECIMAL",
            FieldType::Tiny => "TINYINT",
            FieldType::Short => "SMALLINT",
            FieldType::Long => "INT",
            FieldType::Float => "FLOAT",
            FieldType::Double => "DOUBLE",
            FieldType::Null => "NULL",
            FieldType::Timestamp | FieldType::Timestamp2 => "TIMESTAMP",
            FieldType::LongLong => "BIGINT",
            FieldType::Int24 => "MEDIUMINT",
            FieldType::Date | FieldType::NewDate => "DATE",
            FieldType::Time | FieldType::Time2 => "TIME",
            FieldType::DateTime | FieldType::DateTime2 => "DATETIME",
            FieldType::Year => "YEAR",
            FieldType::VarChar | FieldType::VarString => "VARCHAR",
            FieldType::Bit => "BIT",
            FieldType::Json => "JSON",
            FieldType::Enum => "ENUM",
            FieldType::Set => "SET",
            FieldType::TinyBlob => "TINYBLOB",
            FieldType::MediumBlob => "MEDIUMBLOB",
            FieldType::LongBlob => "LONGBLOB",
            FieldType::Blob => "BLOB",
            FieldType::String => "CHAR",
            FieldType::Geometry => "GEOMETRY",
        }
    }
}

/// Column flag bits from column definitions.
#[allow(dead_code)]
pub mod column_flags {
    pub const NOT_NULL: u16 = 1;
    pub const PRIMARY_KEY: u16 = 2;
    pub const UNIQUE_KEY: u16 = 4;
    pub const MULTIPLE_KEY: u16 = 8;
    pub const BLOB: u16 = 16;
    pub const UNSIGNED: u16 = 32;
    pub const ZEROFILL: u16 = 64;
    pub const BINARY: u16 = 128;
    pub const ENUM: u16 = 256;
    pub const AUTO_INCREMENT: u16 = 512;
    pub const TIMESTAMP: u16 = 1024;
    pub const SET: u16 = 2048;
    pub const NO_DEFAULT_VALUE: u16 = 4096;
    pub const ON_UPDATE_NOW: u16 = 8192;
    pub const NUM: u16 = 32768;
}

/// Session settings that influence decoding.
#[derive(Debug, Clone, Copy)]
pub struct DecodeOptions {
    pub zero_date_time_behavior: ZeroDateTimeBehavior,
    /// Carry BIGINT UNSIGNED values above `i64::MAX` as decimals instead of
    /// wrapping them into negative `BigInt`s.
    pub unsigned_bigint_as_decimal: bool,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            zero_date_time_behavior: ZeroDateTimeBehavior::default(),
            unsigned_bigint_as_decimal: true,
        }
    }
}

impl DecodeOptions {
    fn unsigned_bigint(&self, v: u64) -> Value {
        if self.unsigned_bigint_as_decimal {
            Value::from_unsigned(v)
        } else {
            Value::BigInt(v as i64)
        }
    }
}

/// Decode one text-protocol column.
pub fn decode_text_value(field: &FieldDescriptor, data: &[u8], opts: &DecodeOptions) -> Result<Value> {
    let ty = field.field_type;
    if ty.is_integer() {
        return Ok(decode_text_integer(field, data, opts));
    }
    let text = || String::from_utf8_lossy(data);
    let value = match ty {
        FieldType::Float => text().trim().parse().map_or_else(|_| Value::Text(text().into_owned()), Value::Float),
        FieldType::Double => text().trim().parse().map_or_else(|_| Value::Text(text().into_owned()), Value::Double),
        _ if ty.is_date_like() => match MySqlDateTime::parse(&text()) {
            Some(dt) => temporal_value(field, dt, opts)?,
            None => Value::Text(text().into_owned()),
        },
        _ if ty.is_time() => match MySqlTime::parse(&text()) {
            Some(t) => Value::Time(t.to_micros()),
            None => Value::Text(text().into_owned()),
        },
        _ => decode_bytes(field, data),
    };
    Ok(value)
}

fn decode_text_integer(field: &FieldDescriptor, data: &[u8], opts: &DecodeOptions) -> Value {
    let text = String::from_utf8_lossy(data);
    let s = text.trim();
    let parsed = match (field.field_type, field.is_unsigned()) {
        (FieldType::Year, _) => s.parse::<i16>().ok().map(Value::SmallInt),
        (FieldType::Tiny, false) => s.parse::<i8>().ok().map(Value::TinyInt),
        (FieldType::Tiny, true) => s.parse::<u8>().ok().map(|v| Value::SmallInt(i16::from(v))),
        (FieldType::Short, false) => s.parse::<i16>().ok().map(Value::SmallInt),
        (FieldType::Short, true) => s.parse::<u16>().ok().map(|v| Value::Int(i32::from(v))),
        (FieldType::Long | FieldType::Int24, false) => s.parse::<i32>().ok().map(Value::Int),
        (FieldType::Long | FieldType::Int24, true) => s.parse::<u32>().ok().map(|v| Value::BigInt(i64::from(v))),
        (_, false) => s.parse::<i64>().ok().map(Value::BigInt),
        (_, true) => s.parse::<u64>().ok().map(|v| opts.unsigned_bigint(v)),
    };
    parsed.unwrap_or_else(|| Value::Text(text.into_owned()))
}

/// Decode one binary-protocol column, consuming exactly its bytes.
pub fn decode_binary_value(
    field: &FieldDescriptor,
    reader: &mut PacketReader<'_>,
    opts: &DecodeOptions,
) -> Result<Value> {
    let unsigned = field.is_unsigned();
    let truncated = || {
        protocol_error_with_data(
            format!("Binary row ended inside column '{}'", field.name),
            &[field.field_type as u8],
        )
    };

    let value = match field.field_type {
        FieldType::Null => Value::Null,
        FieldType::Tiny => {
            let v = reader.read_u8().ok_or_else(truncated)?;
            if unsigned {
                Value::SmallInt(i16::from(v))
            } else {
                Value::TinyInt(v as i8)
            }
        }
        FieldType::Year => Value::SmallInt(reader.read_u16_le().ok_or_else(truncated)? as i16),
        FieldType::Short => {
            let v = reader.read_u16_le().ok_or_else(truncated)?;
            if unsigned {
                Value::Int(i32::from(v))
            } else {
                Value::SmallInt(v as i16)
            }
        }
        FieldType::Long | FieldType::Int24 => {
            let v = reader.read_u32_le().ok_or_else(truncated)?;
            if unsigned {
                Value::BigInt(i64::from(v))
            } else {
                Value::Int(v as i32)
            }
        }
        FieldType::LongLong => {
            let v = reader.read_u64_le().ok_or_else(truncated)?;
            if unsigned {
                opts.unsigned_bigint(v)
            } else {
                Value::BigInt(v as i64)
            }
        }
        FieldType::Float => {
            let v = reader.read_u32_le().ok_or_else(truncated)?;
            Value::Float(f32::from_bits(v))
        }
        FieldType::Double => {
            let v = reader.read_u64_le().ok_or_else(truncated)?;
            Value::Double(f64::from_bits(v))
        }
        ty if ty.is_date_like() => {
            let len = reader.read_u8().ok_or_else(truncated)?;
            let data = reader.read_bytes(usize::from(len)).ok_or_else(truncated)?;
            temporal_value(field, MySqlDateTime::decode_binary(data)?, opts)?
        }
        ty if ty.is_time() => {
            let len = reader.read_u8().ok_or_else(truncated)?;
            let data = reader.read_bytes(usize::from(len)).ok_or_else(truncated)?;
            Value::Time(MySqlTime::decode_binary(data)?.to_micros())
        }
        _ => {
            let data = reader.read_lenenc_slice().ok_or_else(truncated)?;
            decode_bytes(field, data)
        }
    };
    Ok(value)
}

fn temporal_value(field: &FieldDescriptor, value: MySqlDateTime, opts: &DecodeOptions) -> Result<Value> {
    let date_only = matches!(field.field_type, FieldType::Date | FieldType::NewDate);
    temporal::date_time_value(value, date_only, opts.zero_date_time_behavior).map_err(|err| match err {
        sqlwire_core::Error::Type(mut type_err) => {
            type_err.column = Some(field.name.clone());
            sqlwire_core::Error::Type(type_err)
        }
        other => other,
    })
}

/// String-like, blob, decimal, JSON and BIT data shared by both encodings.
fn decode_bytes(field: &FieldDescriptor, data: &[u8]) -> Value {
    match field.field_type {
        FieldType::Decimal | FieldType::NewDecimal => {
            Value::Decimal(String::from_utf8_lossy(data).into_owned())
        }
        FieldType::Bit | FieldType::Geometry => Value::Bytes(data.to_vec()),
        FieldType::Json => {
            serde_json::from_slice(data).map_or_else(|_| Value::Text(String::from_utf8_lossy(data).into_owned()), Value::Json)
        }
        _ if field.is_binary() => Value::Bytes(data.to_vec()),
        _ => Value::Text(String::from_utf8_lossy(data).into_owned()),
    }
}

/// Wire type and unsigned flag announced for a prepared-statement parameter.
pub fn param_type(value: &Value) -> (FieldType, bool) {
    match value {
        Value::Null => (FieldType::Null, false),
        Value::Bool(_) | Value::TinyInt(_) => (FieldType::Tiny, false),
        Value::SmallInt(_) => (FieldType::Short, false),
        Value::Int(_) => (FieldType::Long, false),
        Value::BigInt(_) => (FieldType::LongLong, false),
        Value::Float(_) => (FieldType::Float, false),
        Value::Double(_) => (FieldType::Double, false),
        Value::Decimal(_) => (FieldType::NewDecimal, false),
        Value::Text(_) | Value::Json(_) => (FieldType::VarString, false),
        Value::Bytes(_) => (FieldType::Blob, false),
        Value::Date(_) => (FieldType::Date, false),
        Value::Time(_) => (FieldType::Time, false),
        Value::Timestamp(_) => (FieldType::DateTime, false),
    }
}

/// Append a non-NULL parameter in binary-protocol form.
pub fn encode_binary_param(writer: &mut PacketWriter, value: &Value) {
    match value {
        Value::Null => {}
        Value::Bool(b) => writer.write_u8(u8::from(*b)),
        Value::TinyInt(v) => writer.write_u8(*v as u8),
        Value::SmallInt(v) => writer.write_u16_le(*v as u16),
        Value::Int(v) => writer.write_u32_le(*v as u32),
        Value::BigInt(v) => writer.write_u64_le(*v as u64),
        Value::Float(v) => writer.write_u32_le(v.to_bits()),
        Value::Double(v) => writer.write_u64_le(v.to_bits()),
        Value::Decimal(s) | Value::Text(s) => writer.write_lenenc_string(s),
        Value::Json(j) => writer.write_lenenc_string(&j.to_string()),
        Value::Bytes(b) => writer.write_lenenc_bytes(b),
        Value::Date(days) => MySqlDate::from_days(*days).encode_binary(writer),
        Value::Time(micros) => MySqlTime::from_micros(*micros).encode_binary(writer),
        Value::Timestamp(micros) => MySqlDateTime::from_micros(*micros).encode_binary(writer),
    }
}

fn escape_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for ch in s.chars() {
        match ch {
            '\'' => out.push_str("''"),
            '\\' => out.push_str("\\\\"),
            '\0' => out.push_str("\\0"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\x1a' => out.push_str("\\Z"),
            _ => out.push(ch),
        }
    }
    out.push('\'');
    out
}

static NUMERIC_LITERAL: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[+-]?(\d+(\.\d*)?|\.\d+)([eE][+-]?\d+)?$").ok());

/// Decimal text goes out bare only when it is a numeric literal; anything
/// else is quoted and left for the server to coerce.
fn format_decimal(s: &str) -> String {
    let numeric = NUMERIC_LITERAL.as_ref().is_some_and(|re| re.is_match(s));
    if numeric { s.to_string() } else { escape_string(s) }
}

fn format_float(v: f64) -> String {
    if v.is_finite() { v.to_string() } else { "NULL".to_string() }
}

/// Render a value as a SQL literal.
pub fn format_value_for_sql(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        Value::TinyInt(v) => v.to_string(),
        Value::SmallInt(v) => v.to_string(),
        Value::Int(v) => v.to_string(),
        Value::BigInt(v) => v.to_string(),
        Value::Float(v) => format_float(f64::from(*v)),
        Value::Double(v) => format_float(*v),
        Value::Decimal(s) => format_decimal(s),
        Value::Text(s) => escape_string(s),
        Value::Json(j) => escape_string(&j.to_string()),
        Value::Bytes(b) => {
            let mut out = String::with_capacity(b.len() * 2 + 3);
            out.push_str("X'");
            for byte in b {
                out.push_str(&format!("{byte:02X}"));
            }
            out.push('\'');
            out
        }
        Value::Date(days) => format!("'{}'", MySqlDate::from_days(*days)),
        Value::Time(micros) => format!("'{}'", MySqlTime::from_micros(*micros)),
        Value::Timestamp(micros) => format!("'{}'", MySqlDateTime::from_micros(*micros)),
    }
}

/// Replace `?` placeholders with escaped literals, in order.
///
/// Placeholders inside quoted strings, quoted identifiers and comments are
/// left alone. Surplus placeholders stay as `?`.
pub fn interpolate_params(sql: &str, params: &[Value]) -> String {
    if params.is_empty() {
        return sql.to_string();
    }

    let mut out = String::with_capacity(sql.len() + params.len() * 16);
    let mut chars = sql.chars().peekable();
    let mut next_param = params.iter();

    while let Some(ch) = chars.next() {
        match ch {
            '?' => match next_param.next() {
                Some(value) => out.push_str(&format_value_for_sql(value)),
                None => out.push('?'),
            },
            '\'' | '"' | '`' => {
                out.push(ch);
                while let Some(c) = chars.next() {
                    out.push(c);
                    if c == '\\' && ch != '`' {
                        if let Some(escaped) = chars.next() {
                            out.push(escaped);
                        }
                    } else if c == ch {
                        if chars.peek() == Some(&ch) {
                            out.extend(chars.next());
                        } else {
                            break;
                        }
                    }
                }
            }
            '-' if chars.peek() == Some(&'-') => {
                out.push(ch);
                for c in chars.by_ref() {
                    out.push(c);
                    if c == '\n' {
                        break;
                    }
                }
            }
            '#' => {
                out.push(ch);
                for c in chars.by_ref() {
                    out.push(c);
                    if c == '\n' {
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                out.push(ch);
                let mut prev = '\0';
                for c in chars.by_ref() {
                    out.push(c);
                    if prev == '*' && c == '/' {
                        break;
                    }
                    prev = c;
                }
            }
            _ => out.push(ch),
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::charset;

    fn field(ty: FieldType, flags: u16) -> FieldDescriptor {
        FieldDescriptor::new("c", ty).with_flags(flags)
    }

    fn text(ty: FieldType, flags: u16, data: &[u8]) -> Value {
        decode_text_value(&field(ty, flags), data, &DecodeOptions::default()).unwrap()
    }

    fn binary(ty: FieldType, flags: u16, data: &[u8]) -> Value {
        let mut reader = PacketReader::new(data);
        let value = decode_binary_value(&field(ty, flags), &mut reader, &DecodeOptions::default()).unwrap();
        assert!(reader.is_empty(), "column bytes not fully consumed");
        value
    }

    const UNSIGNED: u16 = column_flags::UNSIGNED;

    #[test]
    fn test_field_type_codes() {
        assert_eq!(FieldType::from_u8(0x01), FieldType::Tiny);
        assert_eq!(FieldType::from_u8(0xF5), FieldType::Json);
        assert_eq!(FieldType::from_u8(0x42), FieldType::String);
        assert!(FieldType::Year.is_integer());
        assert!(FieldType::DateTime2.is_date_like());
        assert!(FieldType::Time2.is_time());
        assert_eq!(FieldType::NewDecimal.name(), "DECIMAL");
    }

    #[test]
    fn test_text_unsigned_widening() {
        assert_eq!(text(FieldType::Tiny, UNSIGNED, b"255"), Value::SmallInt(255));
        assert_eq!(text(FieldType::Short, UNSIGNED, b"65535"), Value::Int(65_535));
        assert_eq!(text(FieldType::Long, UNSIGNED, b"4294967295"), Value::BigInt(4_294_967_295));
        assert_eq!(
            text(FieldType::LongLong, UNSIGNED, b"18446744073709551615"),
            Value::Decimal("18446744073709551615".into())
        );
        assert_eq!(text(FieldType::LongLong, UNSIGNED, b"7"), Value::BigInt(7));
        assert_eq!(text(FieldType::Tiny, 0, b"-128"), Value::TinyInt(-128));
        assert_eq!(text(FieldType::Year, UNSIGNED, b"2024"), Value::SmallInt(2024));
    }

    #[test]
    fn test_unsigned_bigint_wraps_when_decimal_disabled() {
        let opts = DecodeOptions {
            unsigned_bigint_as_decimal: false,
            ..DecodeOptions::default()
        };
        let value = decode_text_value(&field(FieldType::LongLong, UNSIGNED), b"18446744073709551615", &opts).unwrap();
        assert_eq!(value, Value::BigInt(-1));
    }

    #[test]
    fn test_text_strings_and_binary_collation() {
        assert_eq!(text(FieldType::VarString, 0, b"hello"), Value::Text("hello".into()));
        let blob = FieldDescriptor::new("b", FieldType::Blob).with_charset(u16::from(charset::BINARY));
        assert_eq!(
            decode_text_value(&blob, &[0, 159, 146, 150], &DecodeOptions::default()).unwrap(),
            Value::Bytes(vec![0, 159, 146, 150])
        );
        assert_eq!(text(FieldType::NewDecimal, 0, b"12.50"), Value::Decimal("12.50".into()));
        assert_eq!(text(FieldType::Json, 0, br#"{"a":1}"#), Value::Json(serde_json::json!({"a": 1})));
    }

    #[test]
    fn test_text_temporal() {
        assert_eq!(text(FieldType::Date, 0, b"1970-01-11"), Value::Date(10));
        assert_eq!(text(FieldType::DateTime, 0, b"1970-01-01 00:00:01.25"), Value::Timestamp(1_250_000));
        assert_eq!(text(FieldType::Time, 0, b"-01:00:00"), Value::Time(-3_600_000_000));
        assert_eq!(text(FieldType::Time, 0, b"00:00:00"), Value::Time(0));

        let zero = decode_text_value(&field(FieldType::Timestamp, 0), b"0000-00-00 00:00:00", &DecodeOptions::default());
        let err = zero.unwrap_err();
        assert!(matches!(err, sqlwire_core::Error::Type(ref t) if t.column.as_deref() == Some("c")));
    }

    #[test]
    fn test_binary_integers() {
        assert_eq!(binary(FieldType::Tiny, 0, &[0xFF]), Value::TinyInt(-1));
        assert_eq!(binary(FieldType::Tiny, UNSIGNED, &[0xFF]), Value::SmallInt(255));
        assert_eq!(binary(FieldType::Short, UNSIGNED, &[0xFF, 0xFF]), Value::Int(65_535));
        assert_eq!(binary(FieldType::Int24, 0, &[0xFE, 0xFF, 0xFF, 0xFF]), Value::Int(-2));
        assert_eq!(binary(FieldType::Long, UNSIGNED, &[0xFF; 4]), Value::BigInt(4_294_967_295));
        assert_eq!(binary(FieldType::LongLong, UNSIGNED, &[0xFF; 8]), Value::Decimal(u64::MAX.to_string()));
        assert_eq!(binary(FieldType::Double, 0, &1.5f64.to_le_bytes()), Value::Double(1.5));
    }

    #[test]
    fn test_binary_temporal_and_strings() {
        assert_eq!(binary(FieldType::Date, 0, &[4, 0xB2, 0x07, 1, 11]), Value::Date(10));
        assert_eq!(binary(FieldType::Time, 0, &[0]), Value::Time(0));
        assert_eq!(binary(FieldType::VarString, 0, b"\x03abc"), Value::Text("abc".into()));
    }

    #[test]
    fn test_binary_truncated_column_is_protocol_error() {
        let mut reader = PacketReader::new(&[0x01, 0x02]);
        let err = decode_binary_value(&field(FieldType::Long, 0), &mut reader, &DecodeOptions::default()).unwrap_err();
        assert!(matches!(err, sqlwire_core::Error::Protocol(_)));

        let mut reader = PacketReader::new(b"\x05ab");
        assert!(decode_binary_value(&field(FieldType::Blob, 0), &mut reader, &DecodeOptions::default()).is_err());
    }

    #[test]
    fn test_encode_params() {
        let mut w = PacketWriter::new();
        encode_binary_param(&mut w, &Value::Int(-2));
        encode_binary_param(&mut w, &Value::Text("hi".into()));
        encode_binary_param(&mut w, &Value::Date(10));
        assert_eq!(w.as_bytes(), &[0xFE, 0xFF, 0xFF, 0xFF, 2, b'h', b'i', 4, 0xB2, 0x07, 1, 11]);
        assert_eq!(param_type(&Value::Bytes(vec![])), (FieldType::Blob, false));
    }

    #[test]
    fn test_format_literals() {
        assert_eq!(format_value_for_sql(&Value::Text("it's".into())), "'it''s'");
        assert_eq!(format_value_for_sql(&Value::Bytes(vec![0xAB, 0x01])), "X'AB01'");
        assert_eq!(format_value_for_sql(&Value::Double(f64::NAN)), "NULL");
        assert_eq!(format_value_for_sql(&Value::Date(0)), "'1970-01-01'");
    }

    #[test]
    fn test_decimal_literals_cannot_break_out() {
        for ok in ["12.50", "-3", "+0.5", ".25", "1e10", "6.02E-23"] {
            assert_eq!(format_value_for_sql(&Value::Decimal(ok.into())), ok);
        }
        assert_eq!(
            interpolate_params("DELETE FROM t WHERE price = ?", &[Value::Decimal("1; DROP TABLE t".into())]),
            "DELETE FROM t WHERE price = '1; DROP TABLE t'"
        );
        assert_eq!(format_value_for_sql(&Value::Decimal("1' OR '1'='1".into())), "'1'' OR ''1''=''1'");
        assert_eq!(format_value_for_sql(&Value::Decimal(String::new())), "''");
    }

    #[test]
    fn test_interpolation_skips_quotes_and_comments() {
        let sql = "SELECT '?', `a?`, ? -- ?\n, ? /* ? */";
        let out = interpolate_params(sql, &[Value::Int(1), Value::Text("x".into())]);
        assert_eq!(out, "SELECT '?', `a?`, 1 -- ?\n, 'x' /* ? */");

        let escaped = interpolate_params(r"SELECT 'a\'?' , ?", &[Value::Int(9)]);
        assert_eq!(escaped, r"SELECT 'a\'?' , 9");
        assert_eq!(interpolate_params("SELECT ?, ?", &[Value::Null]), "SELECT NULL, ?");
    }
}
