//! Command dispatch.
//!
//! A command is one request packet and the server's response to it. The
//! dispatcher sends the request with a fresh sequence, classifies the first
//! response packet, walks result sets (column definitions, rows, terminator)
//! and any results chained after them, and records the status flags every
//! OK and EOF packet carries.

use std::fs::File;
use std::io::{self, Read};
use std::sync::Arc;

use sqlwire_core::error::ConnectionErrorKind;
use sqlwire_core::{Error, Result, Row, TruncationError, Value};

use crate::config::MySqlConfig;
use crate::error::{connection_error_kind, protocol_error, protocol_error_with_data, query_error};
use crate::field::FieldDescriptor;
use crate::protocol::capabilities::{
    CLIENT_DEPRECATE_EOF, CLIENT_LOCAL_FILES, CLIENT_MULTI_RESULTS, CLIENT_PS_MULTI_RESULTS,
};
use crate::protocol::prepared::build_stmt_fetch_packet;
use crate::protocol::{Command, EofPacket, ErrPacket, OkPacket, Packet, PacketChannel, PacketReader, PacketWriter};
use crate::result::{ResultSet, column_info};
use crate::row::{RowEncoding, RowEvent, decode_end, decode_row, is_end_marker};
use crate::status::{ServerStatus, StatusTracker};
use crate::types::DecodeOptions;

/// Bytes per data packet when sending a LOCAL INFILE source.
const INFILE_CHUNK: usize = 64 * 1024;

/// Upper bound on the column count of a result-set header.
const MAX_COLUMNS: u64 = u16::MAX as u64;

/// Warning codes that strict truncation checking turns into errors:
/// out of range, data truncated, data too long.
const TRUNCATION_CODES: [u16; 3] = [1264, 1265, 1406];

/// Session settings the dispatcher acts on.
#[derive(Debug, Clone, Copy, Default)]
pub struct DispatchOptions {
    /// Answer LOCAL INFILE requests with file data
    pub local_infile: bool,
    pub strict_truncation: bool,
    /// Drain an abandoned streaming result before the next command
    pub clobber_streaming_results: bool,
    pub decode: DecodeOptions,
}

impl DispatchOptions {
    pub fn from_config(config: &MySqlConfig) -> Self {
        Self {
            local_infile: config.local_infile,
            strict_truncation: config.strict_truncation,
            clobber_streaming_results: config.clobber_streaming_results,
            decode: DecodeOptions {
                zero_date_time_behavior: config.zero_date_time_behavior,
                unsigned_bigint_as_decimal: config.unsigned_bigint_as_decimal,
            },
        }
    }
}

/// First packet of a command response.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseHeader {
    /// Update count
    Ok(OkPacket),
    /// The server asks for the contents of a client-side file
    LocalInfile { filename: String },
    /// A result set with this many columns follows
    ResultSet { column_count: u64 },
}

impl ResponseHeader {
    /// Classify a response packet. An error packet becomes a query error.
    pub fn classify(payload: &[u8], capabilities: u32, sql: Option<&str>) -> Result<Self> {
        match payload.first() {
            None => Err(protocol_error("Empty response packet")),
            Some(0x00) => OkPacket::parse(payload, capabilities).map(Self::Ok),
            Some(0xFF) => Err(query_error(&ErrPacket::parse(payload)?, sql)),
            Some(0xFB) => Ok(Self::LocalInfile {
                filename: String::from_utf8_lossy(&payload[1..]).into_owned(),
            }),
            Some(_) => match PacketReader::new(payload).read_lenenc_int() {
                Some(n) if n > 0 && n <= MAX_COLUMNS => Ok(Self::ResultSet { column_count: n }),
                _ => Err(protocol_error_with_data("Malformed result-set header", payload)),
            },
        }
    }
}

/// Counters reported for the most recent result.
#[derive(Debug, Clone, Default)]
pub struct CommandSummary {
    pub affected_rows: u64,
    pub last_insert_id: u64,
    pub warnings: u16,
    pub info: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
    Idle,
    /// Rows of a result set are still on the wire
    Rows(RowEncoding),
    /// The last terminator announced another result
    NextResult,
}

/// Sends commands over a channel and reads their responses.
pub struct Dispatcher {
    channel: PacketChannel,
    capabilities: u32,
    options: DispatchOptions,
    status: StatusTracker,
    summary: CommandSummary,
    state: StreamState,
    encoding: RowEncoding,
    metadata_eof: Option<EofPacket>,
    infile_source: Option<Box<dyn Read + Send>>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("capabilities", &format_args!("{:#010x}", self.capabilities))
            .field("status", &self.status)
            .field("state", &self.state)
            .field("summary", &self.summary)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(
        channel: PacketChannel,
        capabilities: u32,
        initial_status: ServerStatus,
        options: DispatchOptions,
    ) -> Self {
        Self {
            channel,
            capabilities,
            options,
            status: StatusTracker::new(initial_status),
            summary: CommandSummary::default(),
            state: StreamState::Idle,
            encoding: RowEncoding::Text,
            metadata_eof: None,
            infile_source: None,
        }
    }

    pub fn channel(&self) -> &PacketChannel {
        &self.channel
    }

    pub fn channel_mut(&mut self) -> &mut PacketChannel {
        &mut self.channel
    }

    pub fn capabilities(&self) -> u32 {
        self.capabilities
    }

    pub fn status(&self) -> ServerStatus {
        self.status.current()
    }

    /// Warnings accumulated over every result of the current command.
    pub fn warnings(&self) -> u16 {
        self.status.warnings()
    }

    pub fn summary(&self) -> &CommandSummary {
        &self.summary
    }

    pub fn tracker_mut(&mut self) -> &mut StatusTracker {
        &mut self.status
    }

    pub fn options(&self) -> &DispatchOptions {
        &self.options
    }

    /// Whether a result set is still being read.
    pub fn is_busy(&self) -> bool {
        self.state != StreamState::Idle
    }

    /// Data source for the next LOCAL INFILE request, used instead of
    /// opening the file the server names.
    pub fn set_local_infile_stream(&mut self, source: Option<Box<dyn Read + Send>>) {
        self.infile_source = source;
    }

    fn deprecate_eof(&self) -> bool {
        self.capabilities & CLIENT_DEPRECATE_EOF != 0
    }

    fn more_results(&self) -> bool {
        self.status.current().more_results_exist()
            && self.capabilities & (CLIENT_MULTI_RESULTS | CLIENT_PS_MULTI_RESULTS) != 0
    }

    fn fail(&mut self, err: Error) -> Error {
        if matches!(err, Error::Protocol(_)) && !self.channel.is_closed() {
            tracing::warn!(error = %err, "closing session after protocol error");
            self.channel.close();
        }
        self.state = StreamState::Idle;
        err
    }

    /// Pass `result` through, closing the channel on protocol errors.
    pub(crate) fn check<T>(&mut self, result: Result<T>) -> Result<T> {
        result.map_err(|e| self.fail(e))
    }

    fn ensure_idle(&mut self) -> Result<()> {
        if self.state == StreamState::Idle {
            return Ok(());
        }
        if !self.options.clobber_streaming_results {
            return Err(connection_error_kind(
                ConnectionErrorKind::Busy,
                "A streaming result set is still open; read it to the end before issuing another command",
            ));
        }
        self.drain()
    }

    /// Reset per-command state and send the request packet.
    fn start(&mut self, payload: &[u8]) -> Result<()> {
        self.ensure_idle()?;
        self.status.begin_command();
        self.summary = CommandSummary::default();
        self.metadata_eof = None;
        self.encoding = if payload.first() == Some(&(Command::StmtExecute as u8)) {
            RowEncoding::Binary
        } else {
            RowEncoding::Text
        };
        self.channel.reset_sequence();
        tracing::trace!(
            command = payload.first().copied(),
            length = payload.len(),
            "sending command"
        );
        self.channel.write_packet(payload)
    }

    /// Send `command` with `args` and read the response header.
    ///
    /// LOCAL INFILE requests are served before returning; the header
    /// returned is the server's answer to the file data.
    pub fn send_command(&mut self, command: Command, args: &[u8], sql: Option<&str>) -> Result<ResponseHeader> {
        let mut writer = PacketWriter::with_capacity(1 + args.len());
        writer.write_u8(command as u8);
        writer.write_bytes(args);
        self.send_payload(writer.as_bytes(), sql)
    }

    /// Like [`send_command`](Self::send_command) for a prebuilt payload.
    pub fn send_payload(&mut self, payload: &[u8], sql: Option<&str>) -> Result<ResponseHeader> {
        self.start(payload)?;
        self.read_response(sql)
    }

    /// Send a command the server does not answer (COM_STMT_CLOSE, ...).
    pub fn send_no_response(&mut self, payload: &[u8]) -> Result<()> {
        self.start(payload)
    }

    /// Send a command whose response is not an OK / result-set header and
    /// return the raw packet. Error packets still become query errors.
    pub fn exchange(&mut self, payload: &[u8]) -> Result<Packet> {
        self.start(payload)?;
        let packet = self.channel.read_packet()?;
        if packet.first_byte() == Some(0xFF) {
            let err = ErrPacket::parse(packet.payload());
            self.channel.recycle(packet);
            let err = self.check(err)?;
            return Err(query_error(&err, None));
        }
        Ok(packet)
    }

    /// Hand the channel to a multi-packet exchange such as COM_CHANGE_USER.
    pub fn raw_channel(&mut self) -> Result<&mut PacketChannel> {
        self.ensure_idle()?;
        self.status.begin_command();
        self.summary = CommandSummary::default();
        Ok(&mut self.channel)
    }

    /// Send COM_QUIT (best effort) and close the transport.
    pub fn quit(&mut self) {
        if self.channel.is_closed() {
            return;
        }
        self.channel.reset_sequence();
        if let Err(e) = self.channel.write_packet(&[Command::Quit as u8]) {
            tracing::debug!(error = %e, "failed to send COM_QUIT");
        }
        self.channel.close();
        self.state = StreamState::Idle;
    }

    /// Read and classify the next response header.
    pub fn read_response(&mut self, sql: Option<&str>) -> Result<ResponseHeader> {
        let packet = self.channel.read_packet()?;
        let header = ResponseHeader::classify(packet.payload(), self.capabilities, sql);
        self.channel.recycle(packet);
        match self.check(header)? {
            ResponseHeader::Ok(ok) => {
                self.record_ok(&ok);
                Ok(ResponseHeader::Ok(ok))
            }
            ResponseHeader::LocalInfile { filename } => {
                self.send_local_infile(&filename)?;
                self.read_response(sql)
            }
            header => Ok(header),
        }
    }

    /// Record the counters and status of an OK packet.
    pub fn record_ok(&mut self, ok: &OkPacket) {
        self.summary.affected_rows = ok.affected_rows;
        self.summary.last_insert_id = ok.last_insert_id;
        self.summary.warnings = ok.warnings;
        self.summary.info.clone_from(&ok.info);
        self.status.update(ok.status_flags, ok.warnings);
        self.state = self.after_terminator();
    }

    /// Record the status of a result-set terminator.
    pub fn record_end(&mut self, eof: EofPacket) {
        self.summary.warnings = eof.warnings;
        self.status.update(eof.status_flags, eof.warnings);
        self.state = self.after_terminator();
    }

    fn after_terminator(&self) -> StreamState {
        if self.more_results() {
            StreamState::NextResult
        } else {
            StreamState::Idle
        }
    }

    /// Read the next chained result's header, if the server announced one.
    pub fn next_response(&mut self, sql: Option<&str>) -> Result<Option<ResponseHeader>> {
        if self.state != StreamState::NextResult {
            return Ok(None);
        }
        self.state = StreamState::Idle;
        self.read_response(sql).map(Some)
    }

    /// Read `count` column definitions and, without `CLIENT_DEPRECATE_EOF`,
    /// the EOF packet after them.
    pub fn read_definitions(&mut self, count: usize) -> Result<Vec<FieldDescriptor>> {
        let mut fields = Vec::with_capacity(count);
        for _ in 0..count {
            let packet = self.channel.read_packet()?;
            let field = FieldDescriptor::parse(packet.payload(), self.capabilities);
            self.channel.recycle(packet);
            fields.push(self.check(field)?);
        }
        self.read_metadata_eof(count)?;
        Ok(fields)
    }

    fn read_metadata_eof(&mut self, count: usize) -> Result<()> {
        if count == 0 || self.deprecate_eof() {
            return Ok(());
        }
        let packet = self.channel.read_packet()?;
        let eof = if is_end_marker(packet.payload(), false) {
            decode_end(packet.payload(), self.capabilities)
        } else {
            Err(protocol_error_with_data(
                "Expected EOF after column definitions",
                packet.payload(),
            ))
        };
        self.channel.recycle(packet);
        self.metadata_eof = Some(self.check(eof)?);
        Ok(())
    }

    /// Read the column definitions of a result set; rows follow.
    ///
    /// When `cached` metadata of the same width is supplied the definitions
    /// on the wire are skipped and the cached ones returned.
    pub fn read_columns(
        &mut self,
        column_count: u64,
        cached: Option<&Arc<[FieldDescriptor]>>,
    ) -> Result<Arc<[FieldDescriptor]>> {
        let count = usize::try_from(column_count)
            .map_err(|_| protocol_error(format!("Column count {} is out of range", column_count)));
        let count = self.check(count)?;

        let fields = match cached.filter(|c| c.len() == count) {
            Some(cached) => {
                for _ in 0..count {
                    let packet = self.channel.read_packet()?;
                    self.channel.recycle(packet);
                }
                self.read_metadata_eof(count)?;
                cached.clone()
            }
            None => self.read_definitions(count)?.into(),
        };
        self.state = StreamState::Rows(self.encoding);
        Ok(fields)
    }

    /// Continue a cursor-mode execute after its column definitions.
    ///
    /// Returns `None` when the server opened a cursor, otherwise the rows it
    /// sent inline. The cursor is announced by `SERVER_STATUS_CURSOR_EXISTS`
    /// on the metadata EOF, or under `CLIENT_DEPRECATE_EOF` on an
    /// OK-shaped terminator in place of the first row.
    pub fn start_cursor(&mut self, fields: &[FieldDescriptor]) -> Result<Option<Vec<Vec<Value>>>> {
        if let Some(eof) = self.metadata_eof.take() {
            if ServerStatus::new(eof.status_flags).cursor_exists() {
                self.record_end(eof);
                return Ok(None);
            }
        }
        let mut rows = Vec::new();
        while let Some(values) = self.next_row(fields)? {
            rows.push(values);
        }
        if rows.is_empty() && self.status.current().cursor_exists() {
            return Ok(None);
        }
        Ok(Some(rows))
    }

    /// Decode the next row of the current result set; `None` at its end.
    pub fn next_row(&mut self, fields: &[FieldDescriptor]) -> Result<Option<Vec<Value>>> {
        let StreamState::Rows(encoding) = self.state else {
            return Ok(None);
        };
        let packet = self.channel.read_packet()?;
        let event = decode_row(
            fields,
            encoding,
            packet.payload(),
            self.capabilities,
            &self.options.decode,
        );
        self.channel.recycle(packet);
        match self.check(event)? {
            RowEvent::Row(values) => Ok(Some(values)),
            RowEvent::End(eof) => {
                self.record_end(eof);
                Ok(None)
            }
        }
    }

    /// Read one complete result for `header`.
    pub fn read_result(
        &mut self,
        header: ResponseHeader,
        cached: Option<&Arc<[FieldDescriptor]>>,
    ) -> Result<ResultSet> {
        match header {
            ResponseHeader::Ok(ok) => Ok(ResultSet::from_ok(&ok)),
            ResponseHeader::ResultSet { column_count } => {
                let fields = self.read_columns(column_count, cached)?;
                let info = column_info(&fields);
                let mut rows = Vec::new();
                while let Some(values) = self.next_row(&fields)? {
                    rows.push(Row::with_columns(info.clone(), values));
                }
                Ok(ResultSet::from_rows(
                    fields,
                    info,
                    rows,
                    self.summary.warnings,
                    self.status.current(),
                ))
            }
            ResponseHeader::LocalInfile { filename } => Err(protocol_error(format!(
                "Unexpected LOCAL INFILE request for '{}'",
                filename
            ))),
        }
    }

    /// Read `header`'s result and every result chained after it.
    pub fn read_all_results(
        &mut self,
        header: ResponseHeader,
        sql: Option<&str>,
        cached: Option<&Arc<[FieldDescriptor]>>,
    ) -> Result<Vec<ResultSet>> {
        let mut results = vec![self.read_result(header, cached)?];
        while let Some(header) = self.next_response(sql)? {
            results.push(self.read_result(header, None)?);
        }
        Ok(results)
    }

    /// Pull up to `count` rows from an open cursor (COM_STMT_FETCH).
    pub fn fetch(&mut self, statement_id: u32, count: u32, fields: &[FieldDescriptor]) -> Result<Vec<Vec<Value>>> {
        self.start(&build_stmt_fetch_packet(statement_id, count))?;
        self.encoding = RowEncoding::Binary;
        self.state = StreamState::Rows(RowEncoding::Binary);
        let mut rows = Vec::new();
        while let Some(values) = self.next_row(fields)? {
            rows.push(values);
        }
        Ok(rows)
    }

    /// With strict truncation enabled, look for truncation warnings left by
    /// the command that just finished.
    pub fn check_truncation(&mut self) -> Result<()> {
        if !self.options.strict_truncation || self.is_busy() {
            return Ok(());
        }
        let warning_count = self.status.warnings();
        if warning_count == 0 {
            return Ok(());
        }

        let summary = self.summary.clone();
        let header = self.send_command(Command::Query, b"SHOW WARNINGS", Some("SHOW WARNINGS"))?;
        let warnings = self.read_result(header, None);
        self.summary = summary;
        self.status.set_warnings(warning_count);

        for row in warnings?.rows() {
            let code = row
                .get(1)
                .and_then(|v| v.as_i64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
                .and_then(|c| u16::try_from(c).ok());
            if let Some(code) = code.filter(|c| TRUNCATION_CODES.contains(c)) {
                let message = row.get(2).and_then(Value::as_str).unwrap_or_default();
                return Err(Error::Truncation(TruncationError {
                    code,
                    message: message.to_string(),
                    warning_count,
                }));
            }
        }
        Ok(())
    }

    /// Read and discard whatever is left of an abandoned result, including
    /// results chained after it.
    pub fn drain(&mut self) -> Result<()> {
        let mut skipped = 0usize;
        loop {
            match self.state {
                StreamState::Idle => break,
                StreamState::Rows(_) => {
                    let packet = self.channel.read_packet()?;
                    let payload = packet.payload();
                    if payload.first() == Some(&0xFF) {
                        tracing::debug!("abandoned result ended with an error packet");
                        self.state = StreamState::Idle;
                    } else if is_end_marker(payload, self.deprecate_eof()) {
                        let eof = decode_end(payload, self.capabilities);
                        let eof = self.check(eof)?;
                        self.record_end(eof);
                    } else {
                        skipped += 1;
                    }
                    self.channel.recycle(packet);
                }
                StreamState::NextResult => match self.next_response(None) {
                    Ok(Some(ResponseHeader::ResultSet { column_count })) => {
                        self.read_columns(column_count, None)?;
                    }
                    Ok(_) => {}
                    Err(e @ Error::Query(_)) => {
                        tracing::debug!(error = %e, "abandoned result chain ended with an error");
                    }
                    Err(e) => return Err(e),
                },
            }
        }
        tracing::debug!(rows = skipped, "drained abandoned results");
        Ok(())
    }

    fn send_local_infile(&mut self, filename: &str) -> Result<()> {
        if !self.options.local_infile || self.capabilities & CLIENT_LOCAL_FILES == 0 {
            tracing::warn!(filename, "refusing LOCAL INFILE request");
            self.channel.write_packet(&[])?;
            self.consume_infile_reply();
            return Err(connection_error_kind(
                ConnectionErrorKind::LocalInfile,
                format!(
                    "Server requested local file '{}' but LOAD DATA LOCAL INFILE is disabled",
                    filename
                ),
            ));
        }

        let sent = match self.infile_source.take() {
            Some(mut source) => self.stream_infile(source.as_mut(), filename),
            None => match File::open(filename) {
                Ok(mut file) => self.stream_infile(&mut file, filename),
                Err(e) => Err(Error::Io(e)),
            },
        };
        match sent {
            Ok(()) => self.channel.write_packet(&[]),
            Err(e @ Error::Io(_)) => {
                // the server still expects the terminator
                self.channel.write_packet(&[])?;
                self.consume_infile_reply();
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    fn stream_infile(&mut self, source: &mut dyn Read, filename: &str) -> Result<()> {
        let chunk = INFILE_CHUNK.min(self.channel.max_packet_size()).max(1);
        let mut buf = vec![0u8; chunk];
        let mut total = 0usize;
        loop {
            let n = match source.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::Io(e)),
            };
            self.channel.write_packet(&buf[..n])?;
            total += n;
        }
        tracing::debug!(filename, bytes = total, "sent LOCAL INFILE data");
        Ok(())
    }

    /// Read the server's reply to an aborted file transfer.
    fn consume_infile_reply(&mut self) {
        match self.channel.read_packet() {
            Ok(packet) => {
                if packet.first_byte() == Some(0x00) {
                    if let Ok(ok) = OkPacket::parse(packet.payload(), self.capabilities) {
                        self.record_ok(&ok);
                    }
                }
                self.channel.recycle(packet);
            }
            Err(e) => tracing::debug!(error = %e, "no reply to aborted LOCAL INFILE transfer"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::capabilities::CLIENT_PROTOCOL_41;
    use crate::protocol::server_status::*;
    use crate::status::TransactionEvent;
    use crate::stream::testing::{ScriptedStream, frame, unframe};
    use crate::types::FieldType;
    use sqlwire_core::QueryErrorKind;
    use std::io::Write;
    use std::sync::Mutex;

    const CAPS: u32 = CLIENT_PROTOCOL_41 | CLIENT_MULTI_RESULTS | CLIENT_LOCAL_FILES;
    const AUTOCOMMIT: u16 = SERVER_STATUS_AUTOCOMMIT;

    fn dispatcher(server: Vec<u8>, caps: u32, options: DispatchOptions) -> (Dispatcher, ScriptedStream) {
        let stream = ScriptedStream::new(server);
        let channel = PacketChannel::new(Box::new(stream.clone()), 16 * 1024 * 1024);
        (
            Dispatcher::new(channel, caps, ServerStatus::new(AUTOCOMMIT), options),
            stream,
        )
    }

    fn ok(affected: u8, insert_id: u8, status: u16, warnings: u16) -> Vec<u8> {
        let mut p = vec![0x00, affected, insert_id];
        p.extend_from_slice(&status.to_le_bytes());
        p.extend_from_slice(&warnings.to_le_bytes());
        p
    }

    fn eof(status: u16) -> Vec<u8> {
        let mut p = vec![0xFE, 0, 0];
        p.extend_from_slice(&status.to_le_bytes());
        p
    }

    /// Result-set terminator under CLIENT_DEPRECATE_EOF.
    fn ok_end(status: u16) -> Vec<u8> {
        let mut p = ok(0, 0, status, 0);
        p[0] = 0xFE;
        p
    }

    fn err(code: u16, msg: &str) -> Vec<u8> {
        let mut p = vec![0xFF];
        p.extend_from_slice(&code.to_le_bytes());
        p.extend_from_slice(b"#HY000");
        p.extend_from_slice(msg.as_bytes());
        p
    }

    fn column(name: &str, field_type: FieldType) -> Vec<u8> {
        let mut w = PacketWriter::new();
        for s in ["def", "shop", "t", "t", name, name] {
            w.write_lenenc_string(s);
        }
        w.write_lenenc_int(0x0c);
        w.write_u16_le(45);
        w.write_u32_le(255);
        w.write_u8(field_type as u8);
        w.write_u16_le(0);
        w.write_u8(0);
        w.write_zeros(2);
        w.into_bytes()
    }

    fn text_row(values: &[Option<&str>]) -> Vec<u8> {
        let mut w = PacketWriter::new();
        for v in values {
            match v {
                Some(s) => w.write_lenenc_string(s),
                None => w.write_u8(0xFB),
            }
        }
        w.into_bytes()
    }

    fn infile_request(filename: &str) -> Vec<u8> {
        let mut p = vec![0xFB];
        p.extend_from_slice(filename.as_bytes());
        p
    }

    #[test]
    fn test_classify_response_headers() {
        assert!(matches!(
            ResponseHeader::classify(&[], CAPS, None),
            Err(Error::Protocol(_))
        ));
        assert_eq!(
            ResponseHeader::classify(&[0xFB, b'f'], CAPS, None).unwrap(),
            ResponseHeader::LocalInfile {
                filename: "f".to_string()
            }
        );
        assert_eq!(
            ResponseHeader::classify(&[0x03], CAPS, None).unwrap(),
            ResponseHeader::ResultSet { column_count: 3 }
        );
        let err = ResponseHeader::classify(&err(1064, "syntax"), CAPS, Some("SELEC 1")).unwrap_err();
        assert_eq!(err.server_code(), Some(1064));
        assert_eq!(err.sql(), Some("SELEC 1"));
    }

    #[test]
    fn test_ok_response_records_counters() {
        let (mut d, stream) = dispatcher(frame(&[ok(2, 5, AUTOCOMMIT, 0)], 1), CAPS, DispatchOptions::default());
        let header = d.send_command(Command::Query, b"UPDATE t SET a = 1", None).unwrap();
        assert!(matches!(header, ResponseHeader::Ok(ref ok) if ok.affected_rows == 2));
        assert_eq!(d.summary().affected_rows, 2);
        assert_eq!(d.summary().last_insert_id, 5);
        assert!(!d.is_busy());
        assert_eq!(unframe(&stream.written()), vec![(0, b"\x03UPDATE t SET a = 1".to_vec())]);
    }

    #[test]
    fn test_error_response_keeps_session_usable() {
        let mut server = frame(&[err(1146, "Table 'shop.nope' doesn't exist")], 1);
        server.extend(frame(&[ok(0, 0, AUTOCOMMIT, 0)], 1));
        let (mut d, _) = dispatcher(server, CAPS, DispatchOptions::default());

        let sql = "SELECT * FROM nope";
        match d.send_command(Command::Query, sql.as_bytes(), Some(sql)) {
            Err(Error::Query(q)) => {
                assert_eq!(q.code, 1146);
                assert_eq!(q.kind, QueryErrorKind::NotFound);
                assert_eq!(q.sql.as_deref(), Some(sql));
            }
            other => panic!("unexpected response: {other:?}"),
        }
        assert!(!d.channel().is_closed());
        assert!(d.send_command(Command::Ping, &[], None).is_ok());
    }

    #[test]
    fn test_error_clears_previous_command_flags() {
        let mut server = frame(&[ok(0, 0, AUTOCOMMIT | SERVER_QUERY_WAS_SLOW | SERVER_STATUS_NO_INDEX_USED, 0)], 1);
        server.extend(frame(&[err(1064, "You have an error in your SQL syntax")], 1));
        let (mut d, _) = dispatcher(server, CAPS, DispatchOptions::default());

        d.send_command(Command::Query, b"SELECT * FROM big", None).unwrap();
        assert!(d.status().query_was_slow());
        assert!(d.status().no_index_used());

        assert!(d.send_command(Command::Query, b"SELEC 1", None).is_err());
        assert!(!d.status().query_was_slow());
        assert!(!d.status().no_index_used());
        assert!(d.status().autocommit());
    }

    #[test]
    fn test_text_result_set_with_eof_packets() {
        let server = frame(
            &[
                vec![2],
                column("id", FieldType::Long),
                column("name", FieldType::VarString),
                eof(AUTOCOMMIT),
                text_row(&[Some("1"), Some("alice")]),
                text_row(&[Some("2"), None]),
                eof(AUTOCOMMIT),
            ],
            1,
        );
        let (mut d, _) = dispatcher(server, CAPS, DispatchOptions::default());
        let header = d.send_command(Command::Query, b"SELECT id, name FROM users", None).unwrap();
        let results = d.read_all_results(header, None, None).unwrap();
        assert_eq!(results.len(), 1);
        let rows = results[0].rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get(0), Some(&Value::Int(1)));
        assert_eq!(rows[0].get_by_name("name"), Some(&Value::Text("alice".to_string())));
        assert_eq!(rows[1].get(1), Some(&Value::Null));
        assert!(!d.is_busy());
    }

    #[test]
    fn test_result_set_with_ok_terminator() {
        let server = frame(
            &[
                vec![1],
                column("n", FieldType::LongLong),
                text_row(&[Some("42")]),
                ok_end(AUTOCOMMIT | SERVER_STATUS_IN_TRANS),
            ],
            1,
        );
        let (mut d, _) = dispatcher(server, CAPS | CLIENT_DEPRECATE_EOF, DispatchOptions::default());
        let header = d.send_command(Command::Query, b"SELECT 42", None).unwrap();
        let result = d.read_result(header, None).unwrap();
        assert_eq!(result.rows()[0].get(0), Some(&Value::BigInt(42)));
        assert!(d.status().in_transaction());
    }

    #[test]
    fn test_chained_results() {
        let server = frame(
            &[
                vec![1],
                column("a", FieldType::Long),
                eof(AUTOCOMMIT),
                text_row(&[Some("1")]),
                eof(AUTOCOMMIT | SERVER_MORE_RESULTS_EXISTS),
                ok(3, 0, AUTOCOMMIT, 0),
            ],
            1,
        );
        let (mut d, _) = dispatcher(server, CAPS, DispatchOptions::default());
        let header = d.send_command(Command::Query, b"SELECT 1; UPDATE t SET a = 2", None).unwrap();
        let results = d.read_all_results(header, None, None).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].len(), 1);
        assert!(!results[1].has_columns());
        assert_eq!(results[1].affected_rows(), 3);
        assert!(!d.is_busy());
    }

    #[test]
    fn test_cached_metadata_is_reused() {
        let server = frame(
            &[vec![1], column("wire_name", FieldType::Long), text_row(&[Some("7")]), ok_end(AUTOCOMMIT)],
            1,
        );
        let (mut d, _) = dispatcher(server, CAPS | CLIENT_DEPRECATE_EOF, DispatchOptions::default());
        let cached: Arc<[FieldDescriptor]> = vec![FieldDescriptor::new("id", FieldType::Long)].into();
        let header = d.send_command(Command::Query, b"SELECT id FROM t", None).unwrap();
        let result = d.read_result(header, Some(&cached)).unwrap();
        assert_eq!(result.columns()[0].name, "id");
        assert_eq!(result.rows()[0].get(0), Some(&Value::Int(7)));
    }

    #[test]
    fn test_error_in_place_of_row() {
        let mut server = frame(
            &[
                vec![1],
                column("a", FieldType::Long),
                text_row(&[Some("1")]),
                err(1317, "Query execution was interrupted"),
            ],
            1,
        );
        server.extend(frame(&[ok(0, 0, AUTOCOMMIT, 0)], 1));
        let (mut d, _) = dispatcher(server, CAPS | CLIENT_DEPRECATE_EOF, DispatchOptions::default());
        let header = d.send_command(Command::Query, b"SELECT SLEEP(100)", None).unwrap();
        let err = d.read_result(header, None).unwrap_err();
        assert!(matches!(err, Error::Query(ref q) if q.kind == QueryErrorKind::Cancelled));
        assert!(!d.is_busy());
        assert!(d.send_command(Command::Ping, &[], None).is_ok());
    }

    #[test]
    fn test_malformed_header_closes_session() {
        let (mut d, _) = dispatcher(frame(&[[0xFCu8]], 1), CAPS, DispatchOptions::default());
        let err = d.send_command(Command::Query, b"SELECT 1", None).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
        assert!(d.channel().is_closed());
        let err = d.send_command(Command::Ping, &[], None).unwrap_err();
        assert!(matches!(err, Error::Connection(ref c) if c.kind == ConnectionErrorKind::Disconnected));
    }

    #[test]
    fn test_local_infile_from_stream() {
        let mut server = frame(&[infile_request("data.csv")], 1);
        server.extend(frame(&[ok(2, 0, AUTOCOMMIT, 0)], 4));
        let options = DispatchOptions {
            local_infile: true,
            ..DispatchOptions::default()
        };
        let (mut d, stream) = dispatcher(server, CAPS, options);
        d.set_local_infile_stream(Some(Box::new(io::Cursor::new(b"1,a\n2,b\n".to_vec()))));

        let header = d
            .send_command(Command::Query, b"LOAD DATA LOCAL INFILE 'data.csv' INTO TABLE t", None)
            .unwrap();
        assert!(matches!(header, ResponseHeader::Ok(ref ok) if ok.affected_rows == 2));

        let sent = unframe(&stream.written());
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[1], (2, b"1,a\n2,b\n".to_vec()));
        assert_eq!(sent[2], (3, Vec::new()));
    }

    #[test]
    fn test_local_infile_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"10\n20\n30\n").unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let mut server = frame(&[infile_request(&path)], 1);
        server.extend(frame(&[ok(3, 0, AUTOCOMMIT, 0)], 4));
        let options = DispatchOptions {
            local_infile: true,
            ..DispatchOptions::default()
        };
        let (mut d, stream) = dispatcher(server, CAPS, options);
        d.send_command(Command::Query, b"LOAD DATA LOCAL INFILE ...", None).unwrap();
        assert_eq!(d.summary().affected_rows, 3);
        assert_eq!(unframe(&stream.written())[1].1, b"10\n20\n30\n".to_vec());
    }

    #[test]
    fn test_local_infile_rejected_when_disabled() {
        let mut server = frame(&[infile_request("/etc/passwd")], 1);
        server.extend(frame(&[ok(0, 0, AUTOCOMMIT, 0)], 3));
        let (mut d, stream) = dispatcher(server, CAPS, DispatchOptions::default());

        let err = d.send_command(Command::Query, b"LOAD DATA LOCAL INFILE '/etc/passwd' INTO TABLE t", None).unwrap_err();
        assert!(matches!(err, Error::Connection(ref c) if c.kind == ConnectionErrorKind::LocalInfile));
        let sent = unframe(&stream.written());
        assert_eq!(sent.last(), Some(&(2, Vec::new())));
        assert!(!d.channel().is_closed());
        assert!(!d.is_busy());
    }

    #[test]
    fn test_missing_infile_source_sends_terminator() {
        let mut server = frame(&[infile_request("/nonexistent/sqlwire/data.csv")], 1);
        server.extend(frame(&[ok(0, 0, AUTOCOMMIT, 0)], 3));
        let options = DispatchOptions {
            local_infile: true,
            ..DispatchOptions::default()
        };
        let (mut d, stream) = dispatcher(server, CAPS, options);
        let err = d.send_command(Command::Query, b"LOAD DATA LOCAL INFILE ...", None).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(unframe(&stream.written()).last(), Some(&(2, Vec::new())));
    }

    fn streaming_script() -> Vec<u8> {
        frame(
            &[
                vec![1],
                column("a", FieldType::Long),
                text_row(&[Some("1")]),
                text_row(&[Some("2")]),
                text_row(&[Some("3")]),
                ok_end(AUTOCOMMIT),
            ],
            1,
        )
    }

    #[test]
    fn test_unfinished_stream_makes_session_busy() {
        let (mut d, _) = dispatcher(streaming_script(), CAPS | CLIENT_DEPRECATE_EOF, DispatchOptions::default());
        let header = d.send_command(Command::Query, b"SELECT a FROM t", None).unwrap();
        let ResponseHeader::ResultSet { column_count } = header else {
            panic!("expected a result set");
        };
        let fields = d.read_columns(column_count, None).unwrap();
        assert_eq!(d.next_row(&fields).unwrap(), Some(vec![Value::Int(1)]));

        let err = d.send_command(Command::Ping, &[], None).unwrap_err();
        assert!(matches!(err, Error::Connection(ref c) if c.kind == ConnectionErrorKind::Busy));
        assert!(d.is_busy());
    }

    #[test]
    fn test_clobber_drains_unfinished_stream() {
        let mut server = streaming_script();
        server.extend(frame(&[ok(0, 0, AUTOCOMMIT, 0)], 1));
        let options = DispatchOptions {
            clobber_streaming_results: true,
            ..DispatchOptions::default()
        };
        let (mut d, _) = dispatcher(server, CAPS | CLIENT_DEPRECATE_EOF, options);
        let header = d.send_command(Command::Query, b"SELECT a FROM t", None).unwrap();
        let ResponseHeader::ResultSet { column_count } = header else {
            panic!("expected a result set");
        };
        let fields = d.read_columns(column_count, None).unwrap();
        d.next_row(&fields).unwrap();

        let header = d.send_command(Command::Ping, &[], None).unwrap();
        assert!(matches!(header, ResponseHeader::Ok(_)));
        assert!(!d.is_busy());
    }

    #[test]
    fn test_strict_truncation_raises_error() {
        let mut server = frame(&[ok(1, 0, AUTOCOMMIT, 1)], 1);
        server.extend(frame(
            &[
                vec![3],
                column("Level", FieldType::VarString),
                column("Code", FieldType::Long),
                column("Message", FieldType::VarString),
                text_row(&[Some("Warning"), Some("1265"), Some("Data truncated for column 'name' at row 1")]),
                ok_end(AUTOCOMMIT),
            ],
            1,
        ));
        let options = DispatchOptions {
            strict_truncation: true,
            ..DispatchOptions::default()
        };
        let (mut d, _) = dispatcher(server, CAPS | CLIENT_DEPRECATE_EOF, options);
        d.send_command(Command::Query, b"INSERT INTO t (name) VALUES ('far too long')", None).unwrap();

        match d.check_truncation() {
            Err(Error::Truncation(t)) => {
                assert_eq!(t.code, 1265);
                assert_eq!(t.warning_count, 1);
                assert!(t.message.contains("Data truncated"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(d.summary().affected_rows, 1);
        assert_eq!(d.warnings(), 1);
    }

    #[test]
    fn test_truncation_check_ignores_other_warnings() {
        let mut server = frame(&[ok(1, 0, AUTOCOMMIT, 1)], 1);
        server.extend(frame(
            &[
                vec![3],
                column("Level", FieldType::VarString),
                column("Code", FieldType::Long),
                column("Message", FieldType::VarString),
                text_row(&[Some("Note"), Some("1051"), Some("Unknown table 'shop.old'")]),
                ok_end(AUTOCOMMIT),
            ],
            1,
        ));
        let options = DispatchOptions {
            strict_truncation: true,
            ..DispatchOptions::default()
        };
        let (mut d, _) = dispatcher(server, CAPS | CLIENT_DEPRECATE_EOF, options);
        d.send_command(Command::Query, b"DROP TABLE IF EXISTS old", None).unwrap();
        assert!(d.check_truncation().is_ok());
    }

    #[test]
    fn test_transaction_notifications_across_commands() {
        let mut server = Vec::new();
        for status in [SERVER_STATUS_IN_TRANS, AUTOCOMMIT, SERVER_STATUS_IN_TRANS] {
            server.extend(frame(&[ok(0, 0, status, 0)], 1));
        }
        let (mut d, _) = dispatcher(server, CAPS, DispatchOptions::default());
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        d.tracker_mut()
            .set_listener(Some(Box::new(move |e: TransactionEvent| sink.lock().unwrap().push(e))));

        for sql in ["BEGIN", "COMMIT", "BEGIN"] {
            d.send_command(Command::Query, sql.as_bytes(), None).unwrap();
        }
        assert_eq!(
            *events.lock().unwrap(),
            vec![TransactionEvent::Begun, TransactionEvent::Completed, TransactionEvent::Begun]
        );
    }

    #[test]
    fn test_fetch_binary_rows_from_cursor() {
        let mut row = vec![0x00, 0x00];
        row.extend_from_slice(&9i64.to_le_bytes());
        let server = frame(
            &[row, ok_end(SERVER_STATUS_CURSOR_EXISTS | SERVER_STATUS_LAST_ROW_SENT)],
            1,
        );
        let (mut d, stream) = dispatcher(server, CAPS | CLIENT_DEPRECATE_EOF, DispatchOptions::default());
        let fields = [FieldDescriptor::new("id", FieldType::LongLong)];
        let rows = d.fetch(5, 10, &fields).unwrap();
        assert_eq!(rows, vec![vec![Value::BigInt(9)]]);
        assert!(d.status().last_row_sent());
        assert_eq!(
            unframe(&stream.written()),
            vec![(0, vec![0x1c, 5, 0, 0, 0, 10, 0, 0, 0])]
        );
    }

    #[test]
    fn test_cursor_announced_by_metadata_eof() {
        let server = frame(
            &[vec![1], column("id", FieldType::LongLong), eof(AUTOCOMMIT | SERVER_STATUS_CURSOR_EXISTS)],
            1,
        );
        let (mut d, _) = dispatcher(server, CAPS, DispatchOptions::default());
        let header = d.send_payload(&[0x17, 1, 0, 0, 0, 1, 1, 0, 0, 0], None).unwrap();
        let ResponseHeader::ResultSet { column_count } = header else {
            panic!("expected a result set");
        };
        let fields = d.read_columns(column_count, None).unwrap();
        assert_eq!(d.start_cursor(&fields).unwrap(), None);
        assert!(d.status().cursor_exists());
        assert!(!d.is_busy());
    }

    #[test]
    fn test_cursor_declined_rows_sent_inline() {
        let mut row = vec![0x00, 0x00];
        row.extend_from_slice(&3i64.to_le_bytes());
        let server = frame(&[vec![1], column("id", FieldType::LongLong), row, ok_end(AUTOCOMMIT)], 1);
        let (mut d, _) = dispatcher(server, CAPS | CLIENT_DEPRECATE_EOF, DispatchOptions::default());
        let header = d.send_payload(&[0x17, 1, 0, 0, 0, 1, 1, 0, 0, 0], None).unwrap();
        let ResponseHeader::ResultSet { column_count } = header else {
            panic!("expected a result set");
        };
        let fields = d.read_columns(column_count, None).unwrap();
        assert_eq!(d.start_cursor(&fields).unwrap(), Some(vec![vec![Value::BigInt(3)]]));
        assert!(!d.is_busy());
    }
}
