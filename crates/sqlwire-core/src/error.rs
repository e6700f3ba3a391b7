//! Error types for sqlwire operations.

use std::fmt;
use std::time::Duration;

/// The primary error type for all protocol-engine operations.
#[derive(Debug)]
pub enum Error {
    /// Connection establishment, authentication and session-state errors
    Connection(ConnectionError),
    /// Errors reported by the server in an error packet
    Query(QueryError),
    /// Socket-level failures; the channel is closed once one is raised
    Communications(CommunicationsError),
    /// Strict truncation checking found data loss in the server's warnings
    Truncation(TruncationError),
    /// Type conversion errors
    Type(TypeError),
    /// Protocol errors (wire-level)
    Protocol(ProtocolError),
    /// Configuration errors
    Config(ConfigError),
    /// I/O errors outside the socket (e.g. LOCAL INFILE sources)
    Io(std::io::Error),
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Failed to establish connection
    Connect,
    /// Authentication failed
    Authentication,
    /// Connection closed or broken by an earlier fatal error
    Disconnected,
    /// SSL/TLS negotiation failed
    Ssl,
    /// DNS resolution failed
    DnsResolution,
    /// Connection refused, including errors sent in place of the greeting
    Refused,
    /// A streaming result set still owns the channel
    Busy,
    /// LOCAL INFILE request was rejected or its source failed
    LocalInfile,
}

/// An error packet returned by the server.
#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    /// Server error number (e.g. 1062)
    pub code: u16,
    pub sql: Option<String>,
    pub sqlstate: Option<String>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Syntax error in SQL
    Syntax,
    /// Constraint violation (unique, foreign key, etc.)
    Constraint,
    /// Table or column not found
    NotFound,
    /// Permission denied
    Permission,
    /// Data too large for column
    DataTruncation,
    /// Deadlock detected
    Deadlock,
    /// Lock wait timeout (retry may succeed)
    Serialization,
    /// Statement timeout
    Timeout,
    /// Query interrupted, e.g. by KILL QUERY
    Cancelled,
    /// Other database error
    Database,
}

/// A socket failure with the timing context needed to diagnose it.
#[derive(Debug)]
pub struct CommunicationsError {
    pub message: String,
    /// Time elapsed since the last packet was successfully written
    pub last_packet_sent: Option<Duration>,
    /// Time elapsed since the last packet was successfully read
    pub last_packet_received: Option<Duration>,
    /// Whether the failure was a socket timeout
    pub timed_out: bool,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

/// Data was truncated or clamped by the server while strict checking is enabled.
#[derive(Debug)]
pub struct TruncationError {
    /// Code of the first truncation warning (1264, 1265 or 1406)
    pub code: u16,
    pub message: String,
    /// Total warning count reported for the statement
    pub warning_count: u16,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
    pub rust_type: Option<&'static str>,
}

#[derive(Debug)]
pub struct ProtocolError {
    pub message: String,
    pub raw_data: Option<Vec<u8>>,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Is this a retryable error (deadlock, lock wait timeout, statement timeout)?
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Query(q) => matches!(
                q.kind,
                QueryErrorKind::Deadlock | QueryErrorKind::Serialization | QueryErrorKind::Timeout
            ),
            Error::Communications(c) => c.timed_out,
            _ => false,
        }
    }

    /// Is this an error that leaves the connection unusable?
    pub fn is_connection_error(&self) -> bool {
        match self {
            Error::Connection(c) => !matches!(
                c.kind,
                ConnectionErrorKind::Busy | ConnectionErrorKind::LocalInfile
            ),
            Error::Protocol(_) | Error::Communications(_) => true,
            _ => false,
        }
    }

    /// Get SQLSTATE if available (e.g., "23000" for a duplicate key)
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sqlstate.as_deref(),
            _ => None,
        }
    }

    /// Get the server error number, if this error came from an error packet.
    pub fn server_code(&self) -> Option<u16> {
        match self {
            Error::Query(q) => Some(q.code),
            Error::Truncation(t) => Some(t.code),
            Error::Connection(c) => c
                .source
                .as_deref()
                .and_then(|s| s.downcast_ref::<QueryError>())
                .map(|q| q.code),
            _ => None,
        }
    }

    /// Get the SQL that caused this error, if available
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sql.as_deref(),
            _ => None,
        }
    }
}

impl QueryError {
    /// Is this a unique constraint violation?
    pub fn is_unique_violation(&self) -> bool {
        self.code == 1062 || self.code == 1586
    }

    /// Is this a foreign key violation?
    pub fn is_foreign_key_violation(&self) -> bool {
        matches!(self.code, 1216 | 1217 | 1451 | 1452)
    }
}

impl CommunicationsError {
    fn timing_suffix(&self) -> String {
        let mut out = String::new();
        if let Some(received) = self.last_packet_received {
            out.push_str(&format!(
                " The last packet successfully received from the server was {} milliseconds ago.",
                received.as_millis()
            ));
        } else {
            out.push_str(" No packet was received from the server.");
        }
        if let Some(sent) = self.last_packet_sent {
            out.push_str(&format!(
                " The last packet sent successfully to the server was {} milliseconds ago.",
                sent.as_millis()
            ));
        }
        out
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connection(e) => write!(f, "Connection error: {}", e.message),
            Error::Query(e) => {
                if let Some(sqlstate) = &e.sqlstate {
                    write!(
                        f,
                        "Query error {} (SQLSTATE {}): {}",
                        e.code, sqlstate, e.message
                    )
                } else {
                    write!(f, "Query error {}: {}", e.code, e.message)
                }
            }
            Error::Communications(e) => write!(f, "Communications link failure: {}", e),
            Error::Truncation(e) => write!(f, "Data truncation: {}", e),
            Error::Type(e) => {
                if let Some(col) = &e.column {
                    write!(
                        f,
                        "Type error in column '{}': expected {}, found {}",
                        col, e.expected, e.actual
                    )
                } else {
                    write!(f, "Type error: expected {}, found {}", e.expected, e.actual)
                }
            }
            Error::Protocol(e) => write!(f, "Protocol error: {}", e.message),
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

fn boxed_source<'a>(
    source: Option<&'a (dyn std::error::Error + Send + Sync + 'static)>,
) -> Option<&'a (dyn std::error::Error + 'static)> {
    source.map(|err| err as &(dyn std::error::Error + 'static))
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Connection(e) => boxed_source(e.source.as_deref()),
            Error::Query(e) => boxed_source(e.source.as_deref()),
            Error::Communications(e) => boxed_source(e.source.as_deref()),
            Error::Protocol(e) => boxed_source(e.source.as_deref()),
            Error::Config(e) => boxed_source(e.source.as_deref()),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ConnectionError {}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(sqlstate) = &self.sqlstate {
            write!(f, "{} (error {}, SQLSTATE {})", self.message, self.code, sqlstate)
        } else {
            write!(f, "{} (error {})", self.message, self.code)
        }
    }
}

impl std::error::Error for QueryError {}

impl fmt::Display for CommunicationsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.message, self.timing_suffix())
    }
}

impl fmt::Display for TruncationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (warning {}, {} warning(s) total)",
            self.message, self.code, self.warning_count
        )
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Error::Connection(err)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<CommunicationsError> for Error {
    fn from(err: CommunicationsError) -> Self {
        Error::Communications(err)
    }
}

impl From<TruncationError> for Error {
    fn from(err: TruncationError) -> Self {
        Error::Truncation(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        Error::Protocol(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

/// Result type alias for sqlwire operations.
pub type Result<T> = std::result::Result<T, Error>;
