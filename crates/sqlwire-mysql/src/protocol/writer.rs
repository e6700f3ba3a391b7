//! Payload builder for outgoing packets.
//!
//! The writer only assembles payload bytes; framing (headers, splitting and
//! sequence numbers) belongs to [`crate::protocol::PacketChannel`].

#![allow(clippy::cast_possible_truncation)]

use crate::protocol::Command;

/// Growable payload for a command, handshake response or binary parameter
/// block. Integers are little-endian throughout.
#[derive(Debug, Default)]
pub struct PacketWriter {
    buffer: Vec<u8>,
}

impl PacketWriter {
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Start a command payload with its opcode byte.
    pub fn command(command: Command) -> Self {
        let mut writer = Self::new();
        writer.write_u8(command as u8);
        writer
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    pub fn write_u16_le(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Low three bytes of `value`; the high byte is ignored.
    pub fn write_u24_le(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes()[..3]);
    }

    pub fn write_u32_le(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u64_le(&mut self, value: u64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Length-encoded integer: one byte below 251, otherwise a 0xFC, 0xFD or
    /// 0xFE marker followed by 2, 3 or 8 bytes. 0xFB (NULL) and 0xFF (error)
    /// are never produced as a first byte.
    pub fn write_lenenc_int(&mut self, value: u64) {
        match value {
            0..=250 => self.write_u8(value as u8),
            251..=0xFFFF => {
                self.write_u8(0xFC);
                self.write_u16_le(value as u16);
            }
            0x1_0000..=0xFF_FFFF => {
                self.write_u8(0xFD);
                self.write_u24_le(value as u32);
            }
            _ => {
                self.write_u8(0xFE);
                self.write_u64_le(value);
            }
        }
    }

    pub fn write_lenenc_string(&mut self, s: &str) {
        self.write_lenenc_bytes(s.as_bytes());
    }

    pub fn write_lenenc_bytes(&mut self, data: &[u8]) {
        self.write_lenenc_int(data.len() as u64);
        self.buffer.extend_from_slice(data);
    }

    /// Bytes of `s` followed by a NUL terminator.
    pub fn write_null_string(&mut self, s: &str) {
        self.buffer.extend_from_slice(s.as_bytes());
        self.buffer.push(0);
    }

    pub fn write_bytes(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Reserved filler, e.g. the 23 zero bytes of a handshake response.
    pub fn write_zeros(&mut self, count: usize) {
        self.buffer.resize(self.buffer.len() + count, 0);
    }
}
