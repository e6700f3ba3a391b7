//! MySQL wire protocol primitives.
//!
//! MySQL packets have a 4-byte header:
//! - 3 bytes: payload length (little-endian)
//! - 1 byte: sequence number
//!
//! Maximum physical payload is 2^24 - 1 bytes. Larger logical payloads are
//! split into several physical packets; a physical packet of exactly the
//! maximum length means "more follows".
//!
//! With compression negotiated, the packet stream is additionally wrapped in
//! 7-byte compressed frames (see [`compress`]).

pub mod buffer_pool;
pub mod channel;
pub mod compress;
pub mod prepared;
pub mod reader;
pub mod writer;

pub use buffer_pool::BufferPool;
pub use channel::{Packet, PacketChannel};
pub use prepared::{CursorType, PreparedStatement, StmtPrepareOk, parse_stmt_prepare_ok};
pub use reader::PacketReader;
pub use writer::PacketWriter;

/// Maximum payload size for a single physical packet (2^24 - 1 bytes).
pub const MAX_PACKET_SIZE: usize = 0xFF_FF_FF;

/// MySQL capability flags (client and server).
#[allow(dead_code)]
pub mod capabilities {
    pub const CLIENT_LONG_PASSWORD: u32 = 1;
    pub const CLIENT_FOUND_ROWS: u32 = 1 << 1;
    pub const CLIENT_LONG_FLAG: u32 = 1 << 2;
    pub const CLIENT_CONNECT_WITH_DB: u32 = 1 << 3;
    pub const CLIENT_NO_SCHEMA: u32 = 1 << 4;
    pub const CLIENT_COMPRESS: u32 = 1 << 5;
    pub const CLIENT_ODBC: u32 = 1 << 6;
    pub const CLIENT_LOCAL_FILES: u32 = 1 << 7;
    pub const CLIENT_IGNORE_SPACE: u32 = 1 << 8;
    pub const CLIENT_PROTOCOL_41: u32 = 1 << 9;
    pub const CLIENT_INTERACTIVE: u32 = 1 << 10;
    pub const CLIENT_SSL: u32 = 1 << 11;
    pub const CLIENT_IGNORE_SIGPIPE: u32 = 1 << 12;
    pub const CLIENT_TRANSACTIONS: u32 = 1 << 13;
    pub const CLIENT_RESERVED: u32 = 1 << 14;
    pub const CLIENT_SECURE_CONNECTION: u32 = 1 << 15;
    pub const CLIENT_MULTI_STATEMENTS: u32 = 1 << 16;
    pub const CLIENT_MULTI_RESULTS: u32 = 1 << 17;
    pub const CLIENT_PS_MULTI_RESULTS: u32 = 1 << 18;
    pub const CLIENT_PLUGIN_AUTH: u32 = 1 << 19;
    pub const CLIENT_CONNECT_ATTRS: u32 = 1 << 20;
    pub const CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA: u32 = 1 << 21;
    pub const CLIENT_CAN_HANDLE_EXPIRED_PASSWORDS: u32 = 1 << 22;
    pub const CLIENT_SESSION_TRACK: u32 = 1 << 23;
    pub const CLIENT_DEPRECATE_EOF: u32 = 1 << 24;

    /// Capabilities the engine always asks for; the server's advertisement
    /// masks them during negotiation.
    pub const BASE_CLIENT_FLAGS: u32 = CLIENT_LONG_PASSWORD
        | CLIENT_LONG_FLAG
        | CLIENT_PROTOCOL_41
        | CLIENT_TRANSACTIONS
        | CLIENT_SECURE_CONNECTION
        | CLIENT_MULTI_RESULTS
        | CLIENT_PS_MULTI_RESULTS
        | CLIENT_PLUGIN_AUTH
        | CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA;
}

/// MySQL command codes (COM_xxx).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    Sleep = 0x00,
    /// Close the session
    Quit = 0x01,
    /// Switch default database
    InitDb = 0x02,
    /// Text protocol query
    Query = 0x03,
    FieldList = 0x04,
    CreateDb = 0x05,
    DropDb = 0x06,
    Refresh = 0x07,
    Shutdown = 0x08,
    /// Server statistics string
    Statistics = 0x09,
    ProcessInfo = 0x0a,
    Connect = 0x0b,
    /// Kill another session by id
    ProcessKill = 0x0c,
    Debug = 0x0d,
    Ping = 0x0e,
    Time = 0x0f,
    DelayedInsert = 0x10,
    /// Re-authenticate the session
    ChangeUser = 0x11,
    BinlogDump = 0x12,
    TableDump = 0x13,
    ConnectOut = 0x14,
    RegisterSlave = 0x15,
    StmtPrepare = 0x16,
    StmtExecute = 0x17,
    StmtSendLongData = 0x18,
    StmtClose = 0x19,
    StmtReset = 0x1a,
    /// Toggle multi-statement support
    SetOption = 0x1b,
    /// Fetch rows from an open cursor
    StmtFetch = 0x1c,
    Daemon = 0x1d,
    BinlogDumpGtid = 0x1e,
    ResetConnection = 0x1f,
}

impl Command {
    /// Whether the server sends no response to this command.
    pub const fn expects_no_response(self) -> bool {
        matches!(
            self,
            Command::Quit | Command::StmtClose | Command::StmtSendLongData
        )
    }
}

/// MySQL server status flags.
#[allow(dead_code)]
pub mod server_status {
    pub const SERVER_STATUS_IN_TRANS: u16 = 0x0001;
    pub const SERVER_STATUS_AUTOCOMMIT: u16 = 0x0002;
    pub const SERVER_MORE_RESULTS_EXISTS: u16 = 0x0008;
    pub const SERVER_STATUS_NO_GOOD_INDEX_USED: u16 = 0x0010;
    pub const SERVER_STATUS_NO_INDEX_USED: u16 = 0x0020;
    pub const SERVER_STATUS_CURSOR_EXISTS: u16 = 0x0040;
    pub const SERVER_STATUS_LAST_ROW_SENT: u16 = 0x0080;
    pub const SERVER_STATUS_DB_DROPPED: u16 = 0x0100;
    pub const SERVER_STATUS_NO_BACKSLASH_ESCAPES: u16 = 0x0200;
    pub const SERVER_STATUS_METADATA_CHANGED: u16 = 0x0400;
    pub const SERVER_QUERY_WAS_SLOW: u16 = 0x0800;
    pub const SERVER_PS_OUT_PARAMS: u16 = 0x1000;
    pub const SERVER_STATUS_IN_TRANS_READONLY: u16 = 0x2000;
    pub const SERVER_SESSION_STATE_CHANGED: u16 = 0x4000;
}

/// MySQL character set (collation) ids.
#[allow(dead_code)]
pub mod charset {
    pub const LATIN1_SWEDISH_CI: u8 = 8;
    pub const UTF8_GENERAL_CI: u8 = 33;
    pub const UTF8MB4_GENERAL_CI: u8 = 45;
    pub const BINARY: u8 = 63;
    pub const UTF8MB4_UNICODE_CI: u8 = 224;
    pub const UTF8MB4_0900_AI_CI: u8 = 255;

    /// Collation sent in the handshake response.
    ///
    /// `utf8mb4_general_ci` is understood by 5.5.3+ servers; 8.0 servers
    /// accept it too, so the id stays below 256 for every server version.
    pub const DEFAULT_CHARSET: u8 = UTF8MB4_GENERAL_CI;

    /// Map a charset name to the collation id announced for it.
    pub fn index_for_name(name: &str) -> Option<u8> {
        match name.to_ascii_lowercase().as_str() {
            "latin1" => Some(LATIN1_SWEDISH_CI),
            "utf8" | "utf8mb3" => Some(UTF8_GENERAL_CI),
            "utf8mb4" => Some(UTF8MB4_GENERAL_CI),
            "binary" => Some(BINARY),
            _ => None,
        }
    }

    /// Widest character, in bytes, for a collation id.
    pub fn max_bytes_per_char(collation: u16) -> u32 {
        match collation {
            33 | 83 | 192..=215 => 3,
            45 | 46 | 224..=247 | 255..=309 => 4,
            1 | 84 | 85 | 13 | 24 | 28 | 35 | 95 | 96 => 2,
            _ => 1,
        }
    }
}

/// A MySQL packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Payload length (3 bytes, max 16MB - 1)
    pub payload_length: u32,
    /// Sequence number (wraps at 255)
    pub sequence_id: u8,
}

impl PacketHeader {
    /// Total header size in bytes.
    pub const SIZE: usize = 4;

    pub fn from_bytes(bytes: &[u8; 4]) -> Self {
        Self {
            payload_length: read_u24(&bytes[..3]),
            sequence_id: bytes[3],
        }
    }

    pub fn to_bytes(&self) -> [u8; 4] {
        let len = write_u24(self.payload_length);
        [len[0], len[1], len[2], self.sequence_id]
    }
}

/// Header of a compressed frame: compressed length, sequence, uncompressed length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressedHeader {
    pub compressed_length: u32,
    pub sequence_id: u8,
    /// Zero when the frame body is stored uncompressed
    pub uncompressed_length: u32,
}

impl CompressedHeader {
    pub const SIZE: usize = 7;

    pub fn from_bytes(bytes: &[u8; 7]) -> Self {
        Self {
            compressed_length: read_u24(&bytes[..3]),
            sequence_id: bytes[3],
            uncompressed_length: read_u24(&bytes[4..7]),
        }
    }

    pub fn to_bytes(&self) -> [u8; 7] {
        let c = write_u24(self.compressed_length);
        let u = write_u24(self.uncompressed_length);
        [c[0], c[1], c[2], self.sequence_id, u[0], u[1], u[2]]
    }
}

fn read_u24(bytes: &[u8]) -> u32 {
    u32::from(bytes[0]) | (u32::from(bytes[1]) << 8) | (u32::from(bytes[2]) << 16)
}

#[allow(clippy::cast_possible_truncation)]
fn write_u24(value: u32) -> [u8; 3] {
    [
        (value & 0xFF) as u8,
        ((value >> 8) & 0xFF) as u8,
        ((value >> 16) & 0xFF) as u8,
    ]
}

/// Server response packet types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    /// OK packet (0x00)
    Ok,
    /// Error packet (0xFF)
    Error,
    /// EOF packet (0xFE with a short payload)
    Eof,
    /// Local infile request (0xFB)
    LocalInfile,
    /// Data packet (column count, row, etc.)
    Data,
}

impl PacketType {
    /// Detect packet type from the first byte of payload.
    pub fn from_first_byte(byte: u8, payload_len: usize) -> Self {
        match byte {
            0x00 => PacketType::Ok,
            0xFF => PacketType::Error,
            0xFE if payload_len < 9 => PacketType::Eof,
            0xFB => PacketType::LocalInfile,
            _ => PacketType::Data,
        }
    }
}

/// Parsed OK packet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OkPacket {
    pub affected_rows: u64,
    pub last_insert_id: u64,
    pub status_flags: u16,
    pub warnings: u16,
    /// Human-readable info (e.g. "Rows matched: 1  Changed: 1  Warnings: 0")
    pub info: String,
}

impl OkPacket {
    /// Parse a whole OK packet payload.
    pub fn parse(payload: &[u8], capabilities: u32) -> sqlwire_core::Result<Self> {
        PacketReader::new(payload)
            .parse_ok_packet(capabilities)
            .ok_or_else(|| crate::error::protocol_error_with_data("Malformed OK packet", payload))
    }
}

/// Parsed Error packet.
#[derive(Debug, Clone)]
pub struct ErrPacket {
    pub error_code: u16,
    /// SQL state (5 characters), empty for pre-4.1 error packets
    pub sql_state: String,
    pub error_message: String,
}

impl ErrPacket {
    /// Parse a whole error packet payload.
    pub fn parse(payload: &[u8]) -> sqlwire_core::Result<Self> {
        PacketReader::new(payload)
            .parse_err_packet()
            .ok_or_else(|| crate::error::protocol_error_with_data("Malformed error packet", payload))
    }

    /// SQLSTATE sent by the server, or one derived from the error code for
    /// legacy error packets that carry no state marker.
    pub fn sqlstate(&self) -> String {
        if self.sql_state.is_empty() {
            crate::error::legacy_sqlstate(self.error_code).to_string()
        } else {
            self.sql_state.clone()
        }
    }
}

/// Parsed EOF packet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EofPacket {
    pub warnings: u16,
    pub status_flags: u16,
}
