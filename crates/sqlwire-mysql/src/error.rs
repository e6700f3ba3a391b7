//! Error constructors shared by the engine's modules.
//!
//! Every failure is expressed with `sqlwire_core::Error`; these helpers keep
//! the kind selection and server-error classification in one place.

use std::io;
use std::time::Duration;

use sqlwire_core::error::{
    CommunicationsError, ConfigError, ConnectionError, ConnectionErrorKind, ProtocolError, QueryError,
    QueryErrorKind,
};
use sqlwire_core::Error;

use crate::protocol::ErrPacket;

pub(crate) fn protocol_error(msg: impl Into<String>) -> Error {
    Error::Protocol(ProtocolError {
        message: msg.into(),
        raw_data: None,
        source: None,
    })
}

/// Protocol error that keeps the offending payload for diagnostics.
pub(crate) fn protocol_error_with_data(msg: impl Into<String>, data: &[u8]) -> Error {
    const MAX_KEPT: usize = 64;
    Error::Protocol(ProtocolError {
        message: msg.into(),
        raw_data: Some(data[..data.len().min(MAX_KEPT)].to_vec()),
        source: None,
    })
}

pub(crate) fn auth_error(msg: impl Into<String>) -> Error {
    connection_error_kind(ConnectionErrorKind::Authentication, msg)
}

pub(crate) fn connection_error_kind(kind: ConnectionErrorKind, msg: impl Into<String>) -> Error {
    Error::Connection(ConnectionError {
        kind,
        message: msg.into(),
        source: None,
    })
}

pub(crate) fn config_error(msg: impl Into<String>) -> Error {
    Error::Config(ConfigError {
        message: msg.into(),
        source: None,
    })
}

pub(crate) fn ssl_error(msg: impl Into<String>) -> Error {
    connection_error_kind(ConnectionErrorKind::Ssl, msg)
}

/// Authentication failure reported by the server in an error packet.
pub(crate) fn auth_rejected(err: &ErrPacket) -> Error {
    Error::Connection(ConnectionError {
        kind: ConnectionErrorKind::Authentication,
        message: format!(
            "Authentication failed: {} (error {})",
            err.error_message, err.error_code
        ),
        source: Some(Box::new(server_error(err, None))),
    })
}

/// Error packet received in place of the server greeting.
pub(crate) fn greeting_rejected(err: &ErrPacket) -> Error {
    Error::Connection(ConnectionError {
        kind: ConnectionErrorKind::Refused,
        message: format!(
            "Server rejected connection: {} (error {})",
            err.error_message, err.error_code
        ),
        source: Some(Box::new(server_error(err, None))),
    })
}

pub(crate) fn query_error(err: &ErrPacket, sql: Option<&str>) -> Error {
    Error::Query(server_error(err, sql))
}

fn server_error(err: &ErrPacket, sql: Option<&str>) -> QueryError {
    QueryError {
        kind: classify_error_code(err.error_code),
        code: err.error_code,
        message: err.error_message.clone(),
        sqlstate: Some(err.sqlstate()),
        sql: sql.map(str::to_string),
        source: None,
    }
}

/// Wrap a socket failure, attaching how long ago traffic last succeeded.
pub(crate) fn communications_error(
    context: &str,
    err: io::Error,
    last_sent: Option<Duration>,
    last_received: Option<Duration>,
) -> Error {
    let timed_out = matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
    );
    let message = if timed_out {
        format!("{}: socket timed out", context)
    } else {
        format!("{}: {}", context, err)
    };
    Error::Communications(CommunicationsError {
        message,
        last_packet_sent: last_sent,
        last_packet_received: last_received,
        timed_out,
        source: Some(Box::new(err)),
    })
}

/// Map a server error number to a coarse error kind.
pub(crate) fn classify_error_code(code: u16) -> QueryErrorKind {
    match code {
        1062 | 1169 | 1216 | 1217 | 1451 | 1452 | 1557 | 1586 | 3819 => {
            QueryErrorKind::Constraint
        }
        1064 | 1149 => QueryErrorKind::Syntax,
        1044 | 1045 | 1142 | 1143 | 1227 | 1370 => QueryErrorKind::Permission,
        1049 | 1051 | 1054 | 1146 | 1305 => QueryErrorKind::NotFound,
        1213 => QueryErrorKind::Deadlock,
        1205 => QueryErrorKind::Serialization,
        1264 | 1265 | 1406 => QueryErrorKind::DataTruncation,
        1317 => QueryErrorKind::Cancelled,
        3024 => QueryErrorKind::Timeout,
        _ => QueryErrorKind::Database,
    }
}

/// SQLSTATE for error packets without a `#` state marker (pre-4.1 servers
/// and errors sent before capabilities are negotiated).
pub(crate) fn legacy_sqlstate(code: u16) -> &'static str {
    match code {
        1040 | 1053 | 1081 | 1129 | 1130 | 1152 | 1153 | 1154 | 1155 | 1156 | 1157 | 1158
        | 1159 | 1160 | 1161 => "08S01",
        1043 | 1047 => "08S01",
        1044 | 1049 => "42000",
        1045 => "28000",
        1050 => "42S01",
        1051 | 1146 => "42S02",
        1054 => "42S22",
        1062 | 1169 | 1216 | 1217 | 1451 | 1452 | 1586 => "23000",
        1064 | 1149 => "42000",
        1136 => "21S01",
        1205 => "40001",
        1213 => "40001",
        1264 => "22003",
        1265 | 1406 => "22001",
        1317 => "70100",
        _ => "HY000",
    }
}
