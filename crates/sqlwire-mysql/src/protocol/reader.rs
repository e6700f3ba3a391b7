//! Cursor over a packet payload.
//!
//! Every read is bounds-checked against the payload and returns `None`
//! rather than reading past the end; callers turn `None` into a protocol
//! error with context.

#![allow(clippy::cast_possible_truncation)]

use crate::protocol::capabilities::{CLIENT_PROTOCOL_41, CLIENT_TRANSACTIONS};
use crate::protocol::{EofPacket, ErrPacket, OkPacket};

/// A reader for MySQL protocol data.
#[derive(Debug)]
pub struct PacketReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    /// Create a new reader from a byte slice.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Get remaining bytes in the buffer.
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    /// Check if we've reached the end of the data.
    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Current offset into the payload.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Peek at the next byte without advancing.
    pub fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    /// Read a single byte.
    pub fn read_u8(&mut self) -> Option<u8> {
        let byte = self.data.get(self.pos)?;
        self.pos += 1;
        Some(*byte)
    }

    /// Read a u16 (little-endian).
    pub fn read_u16_le(&mut self) -> Option<u16> {
        if self.remaining() < 2 {
            return None;
        }
        let value = u16::from_le_bytes([self.data[self.pos], self.data[self.pos + 1]]);
        self.pos += 2;
        Some(value)
    }

    /// Read a u24 (little-endian, 3 bytes).
    pub fn read_u24_le(&mut self) -> Option<u32> {
        if self.remaining() < 3 {
            return None;
        }
        let value = u32::from(self.data[self.pos])
            | (u32::from(self.data[self.pos + 1]) << 8)
            | (u32::from(self.data[self.pos + 2]) << 16);
        self.pos += 3;
        Some(value)
    }

    /// Read a u32 (little-endian).
    pub fn read_u32_le(&mut self) -> Option<u32> {
        if self.remaining() < 4 {
            return None;
        }
        let value = u32::from_le_bytes([
            self.data[self.pos],
            self.data[self.pos + 1],
            self.data[self.pos + 2],
            self.data[self.pos + 3],
        ]);
        self.pos += 4;
        Some(value)
    }

    /// Read a u64 (little-endian).
    pub fn read_u64_le(&mut self) -> Option<u64> {
        if self.remaining() < 8 {
            return None;
        }
        let value = u64::from_le_bytes([
            self.data[self.pos],
            self.data[self.pos + 1],
            self.data[self.pos + 2],
            self.data[self.pos + 3],
            self.data[self.pos + 4],
            self.data[self.pos + 5],
            self.data[self.pos + 6],
            self.data[self.pos + 7],
        ]);
        self.pos += 8;
        Some(value)
    }

    /// Read a length-encoded integer.
    ///
    /// MySQL uses a variable-length integer encoding:
    /// - 0x00-0xFA: 1-byte value
    /// - 0xFC: 2-byte value follows
    /// - 0xFD: 3-byte value follows
    /// - 0xFE: 8-byte value follows
    /// - 0xFB: NULL (special case for length-encoded strings)
    pub fn read_lenenc_int(&mut self) -> Option<u64> {
        let first = self.read_u8()?;
        match first {
            0x00..=0xFA => Some(u64::from(first)),
            0xFC => self.read_u16_le().map(u64::from),
            0xFD => self.read_u24_le().map(u64::from),
            0xFE => self.read_u64_le(),
            0xFB => None, // NULL marker
            0xFF => None, // Reserved/error
        }
    }

    /// Read a length-encoded string.
    pub fn read_lenenc_string(&mut self) -> Option<String> {
        let bytes = self.read_lenenc_slice()?;
        Some(String::from_utf8_lossy(bytes).into_owned())
    }

    /// Read a length-encoded byte string.
    pub fn read_lenenc_bytes(&mut self) -> Option<Vec<u8>> {
        self.read_lenenc_slice().map(<[u8]>::to_vec)
    }

    /// Read a length-encoded byte string without copying it.
    ///
    /// Returns `None` when the prefix is NULL/reserved or when the declared
    /// length runs past the end of the payload.
    pub fn read_lenenc_slice(&mut self) -> Option<&'a [u8]> {
        let len = usize::try_from(self.read_lenenc_int()?).ok()?;
        self.read_bytes(len)
    }

    /// Read bytes up to (not including) a NUL terminator, consuming the NUL.
    ///
    /// A missing terminator consumes the rest of the payload.
    pub fn read_null_bytes(&mut self) -> &'a [u8] {
        let start = self.pos;
        while self.pos < self.data.len() && self.data[self.pos] != 0 {
            self.pos += 1;
        }
        let bytes = &self.data[start..self.pos];
        if self.pos < self.data.len() {
            self.pos += 1;
        }
        bytes
    }

    /// Read a null-terminated string.
    pub fn read_null_string(&mut self) -> Option<String> {
        Some(String::from_utf8_lossy(self.read_null_bytes()).into_owned())
    }

    /// Read a fixed-length string.
    pub fn read_string(&mut self, len: usize) -> Option<String> {
        let bytes = self.read_bytes(len)?;
        Some(String::from_utf8_lossy(bytes).into_owned())
    }

    /// Read remaining data as a string.
    pub fn read_rest_string(&mut self) -> String {
        let s = String::from_utf8_lossy(&self.data[self.pos..]).into_owned();
        self.pos = self.data.len();
        s
    }

    /// Read a fixed number of bytes.
    pub fn read_bytes(&mut self, len: usize) -> Option<&'a [u8]> {
        if self.remaining() < len {
            return None;
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Some(bytes)
    }

    /// Read remaining bytes.
    pub fn read_rest(&mut self) -> &'a [u8] {
        let rest = &self.data[self.pos..];
        self.pos = self.data.len();
        rest
    }

    /// Skip a number of bytes.
    pub fn skip(&mut self, n: usize) -> bool {
        if self.remaining() >= n {
            self.pos += n;
            true
        } else {
            false
        }
    }

    /// Parse an OK packet from the current position.
    ///
    /// OK packet format:
    /// - 0x00 header (0xFE when it terminates a result set under
    ///   CLIENT_DEPRECATE_EOF)
    /// - affected_rows: lenenc int
    /// - last_insert_id: lenenc int
    /// - status_flags: 2 bytes (protocol 4.1 or CLIENT_TRANSACTIONS)
    /// - warnings: 2 bytes (protocol 4.1 only)
    /// - info: rest of packet (optional)
    pub fn parse_ok_packet(&mut self, capabilities: u32) -> Option<OkPacket> {
        if matches!(self.peek(), Some(0x00 | 0xFE)) {
            self.skip(1);
        }

        let affected_rows = self.read_lenenc_int()?;
        let last_insert_id = self.read_lenenc_int()?;
        let mut status_flags = 0;
        let mut warnings = 0;
        if capabilities & CLIENT_PROTOCOL_41 != 0 {
            status_flags = self.read_u16_le()?;
            warnings = self.read_u16_le()?;
        } else if capabilities & CLIENT_TRANSACTIONS != 0 {
            status_flags = self.read_u16_le()?;
        }
        let info = if self.remaining() > 0 {
            self.read_rest_string()
        } else {
            String::new()
        };

        Some(OkPacket {
            affected_rows,
            last_insert_id,
            status_flags,
            warnings,
            info,
        })
    }

    /// Parse an Error packet from the current position.
    ///
    /// ERR packet format (protocol 4.1+):
    /// - 0xFF header (already consumed)
    /// - error_code: 2 bytes
    /// - '#' marker
    /// - sql_state: 5 bytes
    /// - error_message: rest of packet
    pub fn parse_err_packet(&mut self) -> Option<ErrPacket> {
        // Skip the 0xFF marker if present
        if self.peek() == Some(0xFF) {
            self.skip(1);
        }

        let error_code = self.read_u16_le()?;

        // Check for '#' marker (SQL state follows)
        let sql_state = if self.peek() == Some(b'#') {
            self.skip(1);
            self.read_string(5)?
        } else {
            String::new()
        };

        let error_message = self.read_rest_string();

        Some(ErrPacket {
            error_code,
            sql_state,
            error_message,
        })
    }

    /// Parse an EOF packet from the current position.
    ///
    /// EOF packet format:
    /// - 0xFE header
    /// - warnings: 2 bytes (protocol 4.1)
    /// - status_flags: 2 bytes (protocol 4.1)
    ///
    /// Pre-4.1 servers send a bare 0xFE, which parses as zero warnings and
    /// zero status.
    pub fn parse_eof_packet(&mut self) -> Option<EofPacket> {
        if self.peek() == Some(0xFE) {
            self.skip(1);
        }
        if self.remaining() < 4 {
            return Some(EofPacket::default());
        }

        let warnings = self.read_u16_le()?;
        let status_flags = self.read_u16_le()?;

        Some(EofPacket {
            warnings,
            status_flags,
        })
    }
}
