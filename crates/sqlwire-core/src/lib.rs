//! Core types shared by the sqlwire protocol engine.
//!
//! - `Value` for dynamically-typed column and parameter values
//! - `Row` and `ColumnInfo` for decoded result rows
//! - `Error` for the protocol, server, authentication and communications
//!   error taxonomy

pub mod error;
pub mod row;
pub mod value;

pub use error::{
    CommunicationsError, ConfigError, ConnectionError, ConnectionErrorKind, Error, ProtocolError,
    QueryError, QueryErrorKind, Result, TruncationError, TypeError,
};
pub use row::{ColumnInfo, FromValue, Row};
pub use value::Value;
