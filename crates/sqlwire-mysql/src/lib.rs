//! Synchronous MySQL wire-protocol engine.
//!
//! This crate speaks the MySQL client/server protocol over any blocking
//! byte stream. It provides:
//!
//! - Packet framing with sequence numbers, splitting and optional compression
//! - Handshake negotiation with pluggable authentication (native, old,
//!   clear text, sha256, caching_sha2) and optional TLS
//! - Text and binary query protocols, chained results, LOCAL INFILE
//! - Prepared statements with server-side cursors
//! - Session status tracking with transaction-boundary notifications
//! - Decoding of column values, including MySQL temporal types
//!
//! # MySQL Protocol Overview
//!
//! MySQL uses a packet-based protocol with:
//! - 3-byte payload length + 1-byte sequence number header
//! - Packets of 16MB - 1 or more are split
//! - Request/response pairing via sequence numbers, reset per command
//!
//! # Example
//!
//! ```rust,ignore
//! use sqlwire_mysql::{MySqlConfig, MySqlConnection};
//!
//! let config = MySqlConfig::new()
//!     .host("localhost")
//!     .port(3306)
//!     .user("root")
//!     .database("mydb");
//!
//! let mut conn = MySqlConnection::connect(config)?;
//! let result = conn.query("SELECT id, name FROM users WHERE id = ?", &[42.into()])?;
//! ```

pub mod auth;
pub mod cancel;
pub mod command;
pub mod config;
pub mod connection;
mod error;
pub mod field;
pub mod handshake;
pub mod protocol;
pub mod result;
pub mod row;
pub mod status;
pub mod stream;
pub mod temporal;
pub mod tls;
pub mod types;

pub use auth::{AuthContext, AuthenticationPlugin, PluginRegistry};
pub use cancel::CancelHandle;
pub use config::{MySqlConfig, SslMode, TlsConfig, ZeroDateTimeBehavior};
pub use connection::{ConnectionState, MySqlConnection, quote_identifier};
pub use field::FieldDescriptor;
pub use handshake::ServerVersion;
pub use protocol::{CursorType, PreparedStatement};
pub use result::{Cursor, ResultSet, RowStream};
pub use status::{ServerStatus, TransactionEvent, TransactionListener};
pub use stream::Stream;
pub use temporal::{MySqlDate, MySqlDateTime, MySqlTime};

pub use sqlwire_core::{Error, Result, Row, Value};
