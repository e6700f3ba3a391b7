//! Result sets: buffered, streaming, and cursor-backed.

use std::collections::VecDeque;
use std::sync::Arc;

use sqlwire_core::{ColumnInfo, Result, Row};

use crate::command::{Dispatcher, ResponseHeader};
use crate::field::FieldDescriptor;
use crate::protocol::OkPacket;
use crate::status::ServerStatus;

pub(crate) fn column_info(fields: &[FieldDescriptor]) -> Arc<ColumnInfo> {
    Arc::new(ColumnInfo::new(fields.iter().map(|f| f.name.clone()).collect()))
}

/// A fully read result: rows for queries, counters for updates.
#[derive(Debug, Clone)]
pub struct ResultSet {
    columns: Arc<[FieldDescriptor]>,
    column_info: Arc<ColumnInfo>,
    rows: Vec<Row>,
    affected_rows: u64,
    last_insert_id: u64,
    warnings: u16,
    info: String,
    status: ServerStatus,
}

impl ResultSet {
    /// Result of a statement that returned an OK packet.
    pub fn from_ok(ok: &OkPacket) -> Self {
        Self {
            columns: Arc::from(Vec::new()),
            column_info: Arc::new(ColumnInfo::new(Vec::new())),
            rows: Vec::new(),
            affected_rows: ok.affected_rows,
            last_insert_id: ok.last_insert_id,
            warnings: ok.warnings,
            info: ok.info.clone(),
            status: ServerStatus::new(ok.status_flags),
        }
    }

    pub(crate) fn from_rows(
        columns: Arc<[FieldDescriptor]>,
        column_info: Arc<ColumnInfo>,
        rows: Vec<Row>,
        warnings: u16,
        status: ServerStatus,
    ) -> Self {
        Self {
            columns,
            column_info,
            rows,
            affected_rows: 0,
            last_insert_id: 0,
            warnings,
            info: String::new(),
            status,
        }
    }

    /// Column metadata; empty for update results.
    pub fn columns(&self) -> &[FieldDescriptor] {
        &self.columns
    }

    pub fn column_info(&self) -> &Arc<ColumnInfo> {
        &self.column_info
    }

    /// Whether the statement produced a row result (possibly with zero rows).
    pub fn has_columns(&self) -> bool {
        !self.columns.is_empty()
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    pub fn first(&self) -> Option<&Row> {
        self.rows.first()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn affected_rows(&self) -> u64 {
        self.affected_rows
    }

    pub fn last_insert_id(&self) -> u64 {
        self.last_insert_id
    }

    pub fn warnings(&self) -> u16 {
        self.warnings
    }

    /// Server info string, e.g. "Rows matched: 1  Changed: 1  Warnings: 0".
    pub fn info(&self) -> &str {
        &self.info
    }

    /// Server status at the end of this result.
    pub fn status(&self) -> ServerStatus {
        self.status
    }
}

impl IntoIterator for ResultSet {
    type Item = Row;
    type IntoIter = std::vec::IntoIter<Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

/// Rows pulled from the server one packet at a time.
///
/// The connection stays busy until every row (and every chained result) has
/// been read. Dropping an unfinished stream leaves it busy; the next command
/// then fails with a `Busy` connection error unless the session drains
/// abandoned results.
pub struct RowStream<'c> {
    dispatcher: &'c mut Dispatcher,
    sql: Option<String>,
    fields: Arc<[FieldDescriptor]>,
    columns: Arc<ColumnInfo>,
    finished: bool,
}

impl std::fmt::Debug for RowStream<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowStream")
            .field("columns", &self.columns.names())
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl<'c> RowStream<'c> {
    pub(crate) fn open(
        dispatcher: &'c mut Dispatcher,
        header: ResponseHeader,
        sql: Option<String>,
    ) -> Result<Self> {
        let mut stream = Self {
            dispatcher,
            sql,
            fields: Arc::from(Vec::new()),
            columns: Arc::new(ColumnInfo::new(Vec::new())),
            finished: true,
        };
        stream.start(header)?;
        Ok(stream)
    }

    fn start(&mut self, header: ResponseHeader) -> Result<()> {
        if let ResponseHeader::ResultSet { column_count } = header {
            self.fields = self.dispatcher.read_columns(column_count, None)?;
            self.columns = column_info(&self.fields);
            self.finished = false;
        } else {
            self.fields = Arc::from(Vec::new());
            self.columns = Arc::new(ColumnInfo::new(Vec::new()));
            self.finished = true;
        }
        Ok(())
    }

    /// Column metadata of the current result.
    pub fn columns(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn column_info(&self) -> &Arc<ColumnInfo> {
        &self.columns
    }

    /// Affected rows of the current result when it is an update count.
    pub fn affected_rows(&self) -> u64 {
        self.dispatcher.summary().affected_rows
    }

    pub fn last_insert_id(&self) -> u64 {
        self.dispatcher.summary().last_insert_id
    }

    /// Whether the current result has been read to its end.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Skip what is left of the current result and advance to the next one.
    ///
    /// Returns `false` when the server signalled no further results.
    pub fn next_result(&mut self) -> Result<bool> {
        while !self.finished {
            if let Some(Err(e)) = self.next() {
                return Err(e);
            }
        }
        match self.dispatcher.next_response(self.sql.as_deref())? {
            Some(header) => {
                self.start(header)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl Iterator for RowStream<'_> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.dispatcher.next_row(&self.fields) {
            Ok(Some(values)) => Some(Ok(Row::with_columns(self.columns.clone(), values))),
            Ok(None) => {
                self.finished = true;
                if self.dispatcher.is_busy() {
                    return None;
                }
                self.dispatcher.check_truncation().err().map(Err)
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

/// A statement executed with a read-only cursor.
///
/// Rows stay on the server and are fetched in batches. Servers that decline
/// to open a cursor send the rows inline; those are kept here and handed out
/// by the same fetch calls.
#[derive(Debug, Clone)]
pub struct Cursor {
    pub(crate) statement_id: u32,
    pub(crate) columns: Arc<[FieldDescriptor]>,
    pub(crate) column_info: Arc<ColumnInfo>,
    pub(crate) buffered: VecDeque<Row>,
    pub(crate) open: bool,
}

impl Cursor {
    pub fn statement_id(&self) -> u32 {
        self.statement_id
    }

    pub fn columns(&self) -> &[FieldDescriptor] {
        &self.columns
    }

    /// Whether the server holds more rows for this cursor.
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// No rows left either locally or on the server.
    pub fn is_exhausted(&self) -> bool {
        !self.open && self.buffered.is_empty()
    }
}
