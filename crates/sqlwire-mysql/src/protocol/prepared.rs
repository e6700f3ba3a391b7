//! Prepared statement (binary protocol) packets.
//!
//! # Protocol Flow
//!
//! 1. **Prepare**: COM_STMT_PREPARE with the SQL text
//!    - the server answers with statement id, parameter count and column count
//!    - then one definition per parameter and one per result column
//!
//! 2. **Execute**: COM_STMT_EXECUTE with the statement id and binary parameters
//!    - the server answers with a binary result set or an OK packet
//!    - with a read-only cursor the rows stay on the server and are pulled
//!      with COM_STMT_FETCH
//!
//! 3. **Close**: COM_STMT_CLOSE with the statement id
//!    - no server response

#![allow(clippy::cast_possible_truncation)]

use std::sync::Arc;

use sqlwire_core::{ColumnInfo, Result, Value};

use super::{Command, PacketWriter};
use crate::error::protocol_error_with_data;
use crate::field::FieldDescriptor;
use crate::types::{encode_binary_param, param_type};

/// Response from COM_STMT_PREPARE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StmtPrepareOk {
    /// Unique statement identifier (used in execute/fetch/close)
    pub statement_id: u32,
    /// Number of columns in the result set (0 for non-SELECT)
    pub num_columns: u16,
    /// Number of `?` placeholders
    pub num_params: u16,
    pub warnings: u16,
}

/// A statement prepared on the server, with its parameter and result metadata.
#[derive(Debug, Clone)]
pub struct PreparedStatement {
    pub statement_id: u32,
    /// SQL text the statement was prepared from
    pub sql: String,
    pub params: Vec<FieldDescriptor>,
    pub columns: Arc<[FieldDescriptor]>,
    column_info: Arc<ColumnInfo>,
}

impl PreparedStatement {
    pub fn new(
        statement_id: u32,
        sql: impl Into<String>,
        params: Vec<FieldDescriptor>,
        columns: Arc<[FieldDescriptor]>,
    ) -> Self {
        let column_info = Arc::new(ColumnInfo::new(
            columns.iter().map(|c| c.name.clone()).collect(),
        ));
        Self {
            statement_id,
            sql: sql.into(),
            params,
            columns,
            column_info,
        }
    }

    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub(crate) fn column_info(&self) -> &Arc<ColumnInfo> {
        &self.column_info
    }
}

/// COM_STMT_EXECUTE cursor flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CursorType {
    /// Rows are sent with the execute response
    NoCursor = 0x00,
    /// Rows stay on the server until fetched
    ReadOnly = 0x01,
}

pub fn build_stmt_prepare_packet(sql: &str) -> Vec<u8> {
    let mut writer = PacketWriter::command(Command::StmtPrepare);
    writer.write_bytes(sql.as_bytes());
    writer.into_bytes()
}

/// Build a COM_STMT_EXECUTE payload.
///
/// Layout: statement id, cursor flags, iteration count (always 1), then for
/// statements with parameters a NULL bitmap of `(n + 7) / 8` bytes, the
/// new-params-bound flag, a (type, flags) pair per parameter, and the
/// non-NULL values in binary form.
pub fn build_stmt_execute_packet(statement_id: u32, params: &[Value], cursor: CursorType) -> Vec<u8> {
    let mut writer = PacketWriter::with_capacity(16 + params.len() * 16);
    writer.write_u8(Command::StmtExecute as u8);
    writer.write_u32_le(statement_id);
    writer.write_u8(cursor as u8);
    writer.write_u32_le(1);

    if !params.is_empty() {
        let mut null_bitmap = vec![0u8; params.len().div_ceil(8)];
        for (i, param) in params.iter().enumerate() {
            if param.is_null() {
                null_bitmap[i / 8] |= 1 << (i % 8);
            }
        }
        writer.write_bytes(&null_bitmap);

        writer.write_u8(1);
        for param in params {
            let (field_type, unsigned) = param_type(param);
            writer.write_u8(field_type as u8);
            writer.write_u8(if unsigned { 0x80 } else { 0x00 });
        }

        for param in params.iter().filter(|p| !p.is_null()) {
            encode_binary_param(&mut writer, param);
        }
    }

    writer.into_bytes()
}

/// COM_STMT_FETCH: pull up to `rows` rows from an open cursor.
pub fn build_stmt_fetch_packet(statement_id: u32, rows: u32) -> Vec<u8> {
    let mut writer = PacketWriter::with_capacity(9);
    writer.write_u8(Command::StmtFetch as u8);
    writer.write_u32_le(statement_id);
    writer.write_u32_le(rows);
    writer.into_bytes()
}

/// COM_STMT_CLOSE. The server does not respond.
pub fn build_stmt_close_packet(statement_id: u32) -> Vec<u8> {
    let mut writer = PacketWriter::with_capacity(5);
    writer.write_u8(Command::StmtClose as u8);
    writer.write_u32_le(statement_id);
    writer.into_bytes()
}

/// COM_STMT_RESET: discard long data and close any open cursor.
pub fn build_stmt_reset_packet(statement_id: u32) -> Vec<u8> {
    let mut writer = PacketWriter::with_capacity(5);
    writer.write_u8(Command::StmtReset as u8);
    writer.write_u32_le(statement_id);
    writer.into_bytes()
}

/// Parse a COM_STMT_PREPARE_OK response.
///
/// - status 0x00
/// - statement id (4 bytes)
/// - column count (2 bytes)
/// - parameter count (2 bytes)
/// - reserved (1 byte)
/// - warning count (2 bytes, may be absent)
pub fn parse_stmt_prepare_ok(data: &[u8]) -> Result<StmtPrepareOk> {
    let [0x00, id @ ..] = data else {
        return Err(protocol_error_with_data("Malformed prepare response", data));
    };
    if id.len() < 9 {
        return Err(protocol_error_with_data("Prepare response is too short", data));
    }

    let statement_id = u32::from_le_bytes([id[0], id[1], id[2], id[3]]);
    let num_columns = u16::from_le_bytes([id[4], id[5]]);
    let num_params = u16::from_le_bytes([id[6], id[7]]);
    let warnings = if id.len() >= 11 {
        u16::from_le_bytes([id[9], id[10]])
    } else {
        0
    };

    Ok(StmtPrepareOk {
        statement_id,
        num_columns,
        num_params,
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FieldType;

    #[test]
    fn test_build_stmt_prepare_packet() {
        let payload = build_stmt_prepare_packet("SELECT * FROM users WHERE id = ?");
        assert_eq!(payload[0], Command::StmtPrepare as u8);
        assert_eq!(&payload[1..], b"SELECT * FROM users WHERE id = ?");
    }

    #[test]
    fn test_build_stmt_close_packet() {
        let payload = build_stmt_close_packet(42);
        assert_eq!(payload, vec![Command::StmtClose as u8, 42, 0, 0, 0]);
    }

    #[test]
    fn test_build_stmt_fetch_packet() {
        let payload = build_stmt_fetch_packet(7, 100);
        assert_eq!(payload, vec![0x1c, 7, 0, 0, 0, 100, 0, 0, 0]);
    }

    #[test]
    fn test_parse_stmt_prepare_ok() {
        let data = [
            0x00, // status
            0x01, 0x00, 0x00, 0x00, // statement_id = 1
            0x03, 0x00, // num_columns = 3
            0x02, 0x00, // num_params = 2
            0x00, // reserved
            0x01, 0x00, // warnings = 1
        ];

        let result = parse_stmt_prepare_ok(&data).unwrap();
        assert_eq!(result.statement_id, 1);
        assert_eq!(result.num_columns, 3);
        assert_eq!(result.num_params, 2);
        assert_eq!(result.warnings, 1);

        // servers may leave out the warning count
        assert_eq!(parse_stmt_prepare_ok(&data[..10]).unwrap().warnings, 0);
    }

    #[test]
    fn test_parse_stmt_prepare_ok_invalid() {
        assert!(parse_stmt_prepare_ok(&[0x00, 0x01]).is_err());
        assert!(parse_stmt_prepare_ok(&[]).is_err());

        let data = [0xFF, 0x01, 0x00, 0x00, 0x00, 0x03, 0x00, 0x02, 0x00, 0x00, 0x00, 0x00];
        assert!(parse_stmt_prepare_ok(&data).is_err());
    }

    #[test]
    fn test_build_stmt_execute_no_params() {
        let payload = build_stmt_execute_packet(1, &[], CursorType::NoCursor);
        assert_eq!(payload, vec![Command::StmtExecute as u8, 1, 0, 0, 0, 0x00, 1, 0, 0, 0]);
    }

    #[test]
    fn test_build_stmt_execute_with_params() {
        let params = vec![Value::Int(42), Value::Text("hello".to_string())];
        let payload = build_stmt_execute_packet(1, &params, CursorType::ReadOnly);

        assert_eq!(payload[5], CursorType::ReadOnly as u8);
        // NULL bitmap, one byte for two params
        assert_eq!(payload[10], 0x00);
        // new params bound
        assert_eq!(payload[11], 0x01);
        assert_eq!(&payload[12..16], &[FieldType::Long as u8, 0, FieldType::VarString as u8, 0]);
        assert_eq!(&payload[16..20], &42i32.to_le_bytes());
        assert_eq!(&payload[20..], b"\x05hello");
    }

    #[test]
    fn test_build_stmt_execute_null_bitmap() {
        let mut params = vec![Value::Int(1); 9];
        params[0] = Value::Null;
        params[8] = Value::Null;
        let payload = build_stmt_execute_packet(1, &params, CursorType::NoCursor);
        assert_eq!(&payload[10..12], &[0x01, 0x01]);
        // types start after the bound flag; NULL parameters still get one
        assert_eq!(payload[13], FieldType::Null as u8);
        // 7 non-NULL INT values follow the 9 type pairs
        assert_eq!(payload.len(), 13 + 9 * 2 + 7 * 4);
    }

    #[test]
    fn test_prepared_statement_counts() {
        let columns: Arc<[FieldDescriptor]> =
            vec![FieldDescriptor::new("id", FieldType::Long), FieldDescriptor::new("name", FieldType::VarString)].into();
        let stmt = PreparedStatement::new(3, "SELECT id, name FROM t WHERE id = ?", vec![FieldDescriptor::new("?", FieldType::Long)], columns);
        assert_eq!(stmt.param_count(), 1);
        assert_eq!(stmt.column_count(), 2);
        assert_eq!(stmt.column_info().names(), ["id".to_string(), "name".to_string()]);
    }
}
