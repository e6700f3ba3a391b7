//! Result-row decoding for the text and binary protocols.

use sqlwire_core::{Result, Value};

use crate::error::{protocol_error, protocol_error_with_data, query_error};
use crate::field::FieldDescriptor;
use crate::protocol::capabilities::CLIENT_DEPRECATE_EOF;
use crate::protocol::{EofPacket, ErrPacket, MAX_PACKET_SIZE, OkPacket, PacketReader};
use crate::types::{DecodeOptions, decode_binary_value, decode_text_value};

/// NULL marker in text rows.
const TEXT_NULL: u8 = 0xFB;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowEncoding {
    /// COM_QUERY results: every column a length-encoded string
    Text,
    /// Prepared-statement results: null bitmap plus typed values
    Binary,
}

/// Outcome of decoding one packet of a row stream.
#[derive(Debug, Clone, PartialEq)]
pub enum RowEvent {
    Row(Vec<Value>),
    /// End of the result set with its status flags and warning count
    End(EofPacket),
}

/// Raw columns of a text-protocol row, borrowed from the packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextRow<'a> {
    columns: Vec<Option<&'a [u8]>>,
}

impl<'a> TextRow<'a> {
    /// Split a row payload into exactly `column_count` columns.
    pub fn parse(payload: &'a [u8], column_count: usize) -> Result<Self> {
        let mut reader = PacketReader::new(payload);
        let mut columns = Vec::with_capacity(column_count);
        for index in 0..column_count {
            if reader.peek() == Some(TEXT_NULL) {
                reader.skip(1);
                columns.push(None);
                continue;
            }
            let data = reader.read_lenenc_slice().ok_or_else(|| {
                protocol_error_with_data(
                    format!("Text row ended inside column {} of {}", index + 1, column_count),
                    payload,
                )
            })?;
            columns.push(Some(data));
        }
        if !reader.is_empty() {
            return Err(protocol_error(format!(
                "Text row has {} bytes beyond its {} columns",
                reader.remaining(),
                column_count
            )));
        }
        Ok(Self { columns })
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Column bytes; `Some(None)` is SQL NULL.
    pub fn get(&self, index: usize) -> Option<Option<&'a [u8]>> {
        self.columns.get(index).copied()
    }

    pub fn is_null(&self, index: usize) -> bool {
        matches!(self.columns.get(index), Some(None))
    }

    pub fn iter(&self) -> impl Iterator<Item = Option<&'a [u8]>> + '_ {
        self.columns.iter().copied()
    }
}

/// Bytes in a binary row's null bitmap (two reserved leading bits).
pub const fn null_bitmap_len(column_count: usize) -> usize {
    (column_count + 2 + 7) / 8
}

fn bitmap_is_null(bitmap: &[u8], column: usize) -> bool {
    let bit = column + 2;
    bitmap[bit / 8] & (1 << (bit % 8)) != 0
}

/// Whether a packet read in place of a row ends the result set.
///
/// Without `CLIENT_DEPRECATE_EOF` the terminator is an EOF packet, which is
/// shorter than 9 bytes. With it, the terminator is an OK packet with a 0xFE
/// header; a row starting with 0xFE has an 8-byte length prefix and fills
/// the packet, so anything below the split threshold is the terminator.
pub fn is_end_marker(payload: &[u8], deprecate_eof: bool) -> bool {
    payload.first() == Some(&0xFE)
        && if deprecate_eof {
            payload.len() < MAX_PACKET_SIZE
        } else {
            payload.len() < 9
        }
}

/// Parse a result-set terminator into status flags and warnings.
pub fn decode_end(payload: &[u8], capabilities: u32) -> Result<EofPacket> {
    if capabilities & CLIENT_DEPRECATE_EOF != 0 {
        let ok = OkPacket::parse(payload, capabilities)?;
        Ok(EofPacket {
            warnings: ok.warnings,
            status_flags: ok.status_flags,
        })
    } else {
        PacketReader::new(payload)
            .parse_eof_packet()
            .ok_or_else(|| protocol_error_with_data("Malformed EOF packet", payload))
    }
}

/// Decode one packet of a row stream.
///
/// An error packet in place of a row becomes a query error.
pub fn decode_row(
    fields: &[FieldDescriptor],
    encoding: RowEncoding,
    payload: &[u8],
    capabilities: u32,
    opts: &DecodeOptions,
) -> Result<RowEvent> {
    if payload.first() == Some(&0xFF) {
        return Err(query_error(&ErrPacket::parse(payload)?, None));
    }
    if is_end_marker(payload, capabilities & CLIENT_DEPRECATE_EOF != 0) {
        return decode_end(payload, capabilities).map(RowEvent::End);
    }
    let values = match encoding {
        RowEncoding::Text => decode_text_row(fields, payload, opts)?,
        RowEncoding::Binary => decode_binary_row(fields, payload, opts)?,
    };
    Ok(RowEvent::Row(values))
}

fn decode_text_row(fields: &[FieldDescriptor], payload: &[u8], opts: &DecodeOptions) -> Result<Vec<Value>> {
    let row = TextRow::parse(payload, fields.len())?;
    fields
        .iter()
        .zip(row.iter())
        .map(|(field, column)| match column {
            None => Ok(Value::Null),
            Some(data) => decode_text_value(field, data, opts),
        })
        .collect()
}

fn decode_binary_row(fields: &[FieldDescriptor], payload: &[u8], opts: &DecodeOptions) -> Result<Vec<Value>> {
    let mut reader = PacketReader::new(payload);
    if reader.read_u8() != Some(0x00) {
        return Err(protocol_error_with_data("Binary row must start with 0x00", payload));
    }
    let bitmap = reader
        .read_bytes(null_bitmap_len(fields.len()))
        .ok_or_else(|| protocol_error_with_data("Binary row ended inside the null bitmap", payload))?;

    let mut values = Vec::with_capacity(fields.len());
    for (column, field) in fields.iter().enumerate() {
        if bitmap_is_null(bitmap, column) {
            values.push(Value::Null);
        } else {
            values.push(decode_binary_value(field, &mut reader, opts)?);
        }
    }
    if !reader.is_empty() {
        return Err(protocol_error(format!(
            "Binary row has {} bytes beyond its {} columns",
            reader.remaining(),
            fields.len()
        )));
    }
    Ok(values)
}
