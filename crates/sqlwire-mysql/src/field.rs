//! Column definition packets.

use sqlwire_core::Result;

use crate::error::protocol_error_with_data;
use crate::protocol::PacketReader;
use crate::protocol::capabilities::{CLIENT_LONG_FLAG, CLIENT_PROTOCOL_41};
use crate::protocol::charset;
use crate::types::{FieldType, column_flags};

/// Metadata for one result-set column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    /// Catalog name (always "def"; empty from pre-4.1 servers)
    pub catalog: String,
    pub schema: String,
    /// Table name or alias
    pub table: String,
    pub original_table: String,
    /// Column name or alias
    pub name: String,
    pub original_name: String,
    /// Collation index
    pub charset: u16,
    /// Declared maximum length in bytes
    pub length: u32,
    pub field_type: FieldType,
    pub flags: u16,
    /// Scale for DECIMAL, fractional digits for temporal types
    pub decimals: u8,
}

impl FieldDescriptor {
    /// Minimal descriptor, mostly useful for building rows by hand.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        let name = name.into();
        Self {
            catalog: "def".to_string(),
            schema: String::new(),
            table: String::new(),
            original_table: String::new(),
            original_name: name.clone(),
            name,
            charset: u16::from(charset::UTF8MB4_GENERAL_CI),
            length: 0,
            field_type,
            flags: 0,
            decimals: 0,
        }
    }

    #[must_use]
    pub fn with_flags(mut self, flags: u16) -> Self {
        self.flags = flags;
        self
    }

    #[must_use]
    pub fn with_charset(mut self, charset: u16) -> Self {
        self.charset = charset;
        self
    }

    /// Parse a column definition in whichever format the session negotiated.
    pub fn parse(payload: &[u8], capabilities: u32) -> Result<Self> {
        if capabilities & CLIENT_PROTOCOL_41 != 0 {
            Self::parse_41(payload)
        } else {
            Self::parse_320(payload, capabilities & CLIENT_LONG_FLAG != 0)
        }
    }

    /// Protocol::ColumnDefinition41.
    pub fn parse_41(payload: &[u8]) -> Result<Self> {
        let malformed = || protocol_error_with_data("Malformed column definition", payload);
        let mut reader = PacketReader::new(payload);
        let catalog = reader.read_lenenc_string().ok_or_else(malformed)?;
        let schema = reader.read_lenenc_string().ok_or_else(malformed)?;
        let table = reader.read_lenenc_string().ok_or_else(malformed)?;
        let original_table = reader.read_lenenc_string().ok_or_else(malformed)?;
        let name = reader.read_lenenc_string().ok_or_else(malformed)?;
        let original_name = reader.read_lenenc_string().ok_or_else(malformed)?;
        // length of the fixed-size block, always 0x0c
        reader.read_lenenc_int().ok_or_else(malformed)?;
        let charset = reader.read_u16_le().ok_or_else(malformed)?;
        let length = reader.read_u32_le().ok_or_else(malformed)?;
        let field_type = FieldType::from_u8(reader.read_u8().ok_or_else(malformed)?);
        let flags = reader.read_u16_le().ok_or_else(malformed)?;
        let decimals = reader.read_u8().ok_or_else(malformed)?;

        Ok(Self {
            catalog,
            schema,
            table,
            original_table,
            name,
            original_name,
            charset,
            length,
            field_type,
            flags,
            decimals,
        })
    }

    /// Protocol::ColumnDefinition320.
    ///
    /// Every numeric attribute travels in its own length-prefixed block:
    /// column length (3 bytes), type (1 byte), then flags and decimals,
    /// where flags take 2 bytes with `CLIENT_LONG_FLAG` and 1 byte without.
    pub fn parse_320(payload: &[u8], long_flag: bool) -> Result<Self> {
        let malformed = || protocol_error_with_data("Malformed pre-4.1 column definition", payload);
        let mut reader = PacketReader::new(payload);
        let table = reader.read_lenenc_string().ok_or_else(malformed)?;
        let name = reader.read_lenenc_string().ok_or_else(malformed)?;

        let length_block = reader.read_lenenc_slice().ok_or_else(malformed)?;
        let length = length_block
            .iter()
            .take(4)
            .enumerate()
            .fold(0u32, |acc, (i, b)| acc | u32::from(*b) << (8 * i));

        let type_block = reader.read_lenenc_slice().ok_or_else(malformed)?;
        let field_type = FieldType::from_u8(*type_block.first().ok_or_else(malformed)?);

        let flag_block = reader.read_lenenc_slice().ok_or_else(malformed)?;
        let (flags, decimals) = match (long_flag, flag_block) {
            (true, [lo, hi, decimals, ..]) => (u16::from_le_bytes([*lo, *hi]), *decimals),
            (false, [flags, decimals, ..]) => (u16::from(*flags), *decimals),
            _ => return Err(malformed()),
        };

        Ok(Self {
            catalog: String::new(),
            schema: String::new(),
            original_table: table.clone(),
            table,
            original_name: name.clone(),
            name,
            charset: 0,
            length,
            field_type,
            flags,
            decimals,
        })
    }

    pub fn is_unsigned(&self) -> bool {
        self.flags & column_flags::UNSIGNED != 0
    }

    pub fn is_nullable(&self) -> bool {
        self.flags & column_flags::NOT_NULL == 0
    }

    pub fn is_primary_key(&self) -> bool {
        self.flags & column_flags::PRIMARY_KEY != 0
    }

    pub fn is_auto_increment(&self) -> bool {
        self.flags & column_flags::AUTO_INCREMENT != 0
    }

    /// Binary collation (or a pre-4.1 BINARY flag): string data stays bytes.
    pub fn is_binary(&self) -> bool {
        if self.charset == 0 {
            self.flags & column_flags::BINARY != 0
        } else {
            self.charset == u16::from(charset::BINARY)
        }
    }

    /// Scale of DECIMAL columns.
    pub fn scale(&self) -> u8 {
        self.decimals
    }

    /// Maximum length in characters, derived from the byte length and the
    /// widest character of the column's character set.
    pub fn display_size(&self) -> u32 {
        self.length / charset::max_bytes_per_char(self.charset)
    }
}
