//! MySQL session.
//!
//! [`MySqlConnection`] owns a negotiated channel and exposes the session
//! operations: text queries (buffered or streamed), prepared statements with
//! optional server-side cursors, and the administrative commands (ping, kill,
//! change user, database and charset selection, ...).

// MySQL protocol uses well-defined packet sizes that fit in u32 (max 16MB)
#![allow(clippy::cast_possible_truncation)]

use std::borrow::Cow;
use std::collections::VecDeque;
use std::io::Read;
use std::net::{SocketAddr, ToSocketAddrs};

use sqlwire_core::error::{ConnectionError, ConnectionErrorKind, TypeError};
use sqlwire_core::{Error, Result, Row, Value};

use crate::cancel::CancelHandle;
use crate::command::{DispatchOptions, Dispatcher, ResponseHeader};
use crate::config::MySqlConfig;
use crate::error::{config_error, protocol_error};
use crate::handshake::{self, Credentials, Greeting, HandshakeOutcome, ServerVersion};
use crate::protocol::capabilities::CLIENT_CONNECT_WITH_DB;
use crate::protocol::prepared::{
    build_stmt_close_packet, build_stmt_execute_packet, build_stmt_prepare_packet,
    build_stmt_reset_packet,
};
use crate::protocol::{
    Command, CursorType, OkPacket, PacketChannel, PreparedStatement, charset, parse_stmt_prepare_ok,
};
use crate::result::{Cursor, ResultSet, RowStream, column_info};
use crate::row::decode_end;
use crate::status::{ServerStatus, TransactionListener};
use crate::stream::connect_tcp;
use crate::types::interpolate_params;

/// Coarse session state, derived from the channel and the last status flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Ready for commands
    Ready,
    /// Ready, inside an explicit transaction
    InTransaction,
    /// A result set is still being read
    Streaming,
    /// The channel is closed, either on request or after a fatal error
    Closed,
}

/// MySQL connection.
///
/// Methods take `&mut self`: one command is in flight at a time.
pub struct MySqlConnection {
    dispatcher: Dispatcher,
    config: MySqlConfig,
    greeting: Greeting,
    /// Plugin that last authenticated the session
    plugin: Option<String>,
    connection_id: u32,
    charset: u8,
    secure: bool,
}

impl std::fmt::Debug for MySqlConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MySqlConnection")
            .field("state", &self.state())
            .field("connection_id", &self.connection_id)
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("database", &self.config.database)
            .field("server_version", &self.greeting.server_version.as_str())
            .finish_non_exhaustive()
    }
}

impl MySqlConnection {
    /// Establish a new connection to the MySQL server.
    ///
    /// 1. Resolve the host and open TCP
    /// 2. Negotiate (greeting, optional TLS, authentication, compression)
    /// 3. Select the database if the handshake could not carry it
    /// 4. Switch to the socket timeout and apply `SET NAMES`
    #[tracing::instrument(level = "debug", skip(config), fields(host = %config.host, port = config.port))]
    pub fn connect(config: MySqlConfig) -> Result<Self> {
        config.validate()?;

        let addrs: Vec<SocketAddr> = (config.host.as_str(), config.port)
            .to_socket_addrs()
            .map_err(|e| {
                Error::Connection(ConnectionError {
                    kind: ConnectionErrorKind::DnsResolution,
                    message: format!("Failed to resolve {}: {}", config.socket_addr(), e),
                    source: Some(Box::new(e)),
                })
            })?
            .collect();

        let stream = connect_tcp(&addrs, config.connect_timeout).map_err(|e| {
            let kind = if e.kind() == std::io::ErrorKind::ConnectionRefused {
                ConnectionErrorKind::Refused
            } else {
                ConnectionErrorKind::Connect
            };
            Error::Connection(ConnectionError {
                kind,
                message: format!("Failed to connect to {}: {}", config.socket_addr(), e),
                source: Some(Box::new(e)),
            })
        })?;

        let mut channel = PacketChannel::new(Box::new(stream), config.max_packet_size as usize);
        channel.set_timeout(Some(config.connect_timeout))?;
        let outcome = handshake::negotiate(&mut channel, &config, &config.host)?;

        let mut conn = Self::from_handshake(channel, config, outcome);
        conn.after_authentication()?;
        tracing::debug!(
            connection_id = conn.connection_id,
            server_version = conn.greeting.server_version.as_str(),
            secure = conn.secure,
            compressed = conn.dispatcher.channel().is_compressed(),
            "Connected to MySQL server"
        );
        Ok(conn)
    }

    /// Wrap a channel that has completed the handshake.
    pub(crate) fn from_handshake(channel: PacketChannel, config: MySqlConfig, outcome: HandshakeOutcome) -> Self {
        let HandshakeOutcome {
            greeting,
            capabilities,
            ok,
            plugin,
            secure,
        } = outcome;
        let mut dispatcher = Dispatcher::new(
            channel,
            capabilities,
            ServerStatus::new(greeting.status_flags),
            DispatchOptions::from_config(&config),
        );
        dispatcher.record_ok(&ok);
        Self {
            dispatcher,
            connection_id: greeting.connection_id,
            charset: config.charset,
            greeting,
            plugin,
            secure,
            config,
        }
    }

    fn after_authentication(&mut self) -> Result<()> {
        if self.dispatcher.capabilities() & CLIENT_CONNECT_WITH_DB == 0 {
            if let Some(database) = self.config.database.clone() {
                self.init_database(&database)?;
            }
        }
        let socket_timeout = self.config.socket_timeout;
        self.dispatcher.channel_mut().after_handshake(socket_timeout)?;
        if let Some(name) = self.config.charset_name.clone() {
            self.set_charset(&name)?;
        }
        Ok(())
    }

    fn init_database(&mut self, database: &str) -> Result<()> {
        match self.select_database(database) {
            Err(Error::Query(e)) if self.config.create_database_if_not_exist => {
                tracing::debug!(database, code = e.code, "creating missing database");
                let sql = format!("CREATE DATABASE IF NOT EXISTS {}", quote_identifier(database));
                self.execute(&sql, &[])?;
                self.select_database(database)
            }
            other => other,
        }
    }

    /// Get the current connection state.
    pub fn state(&self) -> ConnectionState {
        if self.dispatcher.channel().is_closed() {
            ConnectionState::Closed
        } else if self.dispatcher.is_busy() {
            ConnectionState::Streaming
        } else if self.dispatcher.status().in_transaction() {
            ConnectionState::InTransaction
        } else {
            ConnectionState::Ready
        }
    }

    /// Server-assigned thread id, the target of `KILL`.
    pub fn connection_id(&self) -> u32 {
        self.connection_id
    }

    pub fn server_version(&self) -> &ServerVersion {
        &self.greeting.server_version
    }

    /// Negotiated capability flags.
    pub fn capabilities(&self) -> u32 {
        self.dispatcher.capabilities()
    }

    /// Whether the channel runs over TLS.
    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// Name of the plugin that last authenticated the session, when the
    /// server supports pluggable authentication.
    pub fn auth_plugin(&self) -> Option<&str> {
        self.plugin.as_deref()
    }

    /// Collation id the session currently uses.
    pub fn charset(&self) -> u8 {
        self.charset
    }

    pub fn database(&self) -> Option<&str> {
        self.config.database.as_deref()
    }

    /// Status flags from the most recent OK or EOF packet.
    pub fn status(&self) -> ServerStatus {
        self.dispatcher.status()
    }

    /// Get the number of affected rows from the last statement.
    pub fn affected_rows(&self) -> u64 {
        self.dispatcher.summary().affected_rows
    }

    pub fn last_insert_id(&self) -> u64 {
        self.dispatcher.summary().last_insert_id
    }

    /// Warnings reported by the last command, summed over chained results.
    pub fn warnings(&self) -> u16 {
        self.dispatcher.warnings()
    }

    pub fn info(&self) -> &str {
        &self.dispatcher.summary().info
    }

    fn expect_ok(&mut self, header: ResponseHeader, command: &str) -> Result<OkPacket> {
        match header {
            ResponseHeader::Ok(ok) => Ok(ok),
            other => {
                let err = protocol_error(format!(
                    "Unexpected response to {}: {:?}",
                    command, other
                ));
                self.dispatcher.check(Err(err))
            }
        }
    }

    /// Ping the server to check connection.
    pub fn ping(&mut self) -> Result<()> {
        let header = self.dispatcher.send_command(Command::Ping, &[], None)?;
        self.expect_ok(header, "COM_PING").map(drop)
    }

    /// Whether the session is open and the server answers a ping.
    pub fn is_alive(&mut self) -> bool {
        !self.dispatcher.channel().is_closed() && self.ping().is_ok()
    }

    /// Close the connection gracefully (COM_QUIT, best effort).
    pub fn close(mut self) -> Result<()> {
        self.dispatcher.quit();
        Ok(())
    }

    /// Drop the transport without telling the server.
    pub fn abort(&mut self) {
        tracing::debug!(connection_id = self.connection_id, "aborting connection");
        self.dispatcher.channel_mut().close();
    }

    /// Ask the server to terminate the connection with thread id `id`.
    pub fn kill(&mut self, id: u32) -> Result<()> {
        let header = self
            .dispatcher
            .send_command(Command::ProcessKill, &id.to_le_bytes(), None)?;
        self.expect_ok(header, "COM_PROCESS_KILL").map(drop)
    }

    /// Make `database` the session's default schema (COM_INIT_DB).
    pub fn select_database(&mut self, database: &str) -> Result<()> {
        let header = self
            .dispatcher
            .send_command(Command::InitDb, database.as_bytes(), None)?;
        self.expect_ok(header, "COM_INIT_DB")?;
        self.config.database = Some(database.to_string());
        Ok(())
    }

    /// Turn multi-statement support on or off (COM_SET_OPTION).
    pub fn set_multi_statements(&mut self, enabled: bool) -> Result<()> {
        let option: u16 = if enabled { 0 } else { 1 };
        let mut payload = vec![Command::SetOption as u8];
        payload.extend_from_slice(&option.to_le_bytes());

        let packet = self.dispatcher.exchange(&payload)?;
        let capabilities = self.dispatcher.capabilities();
        let reply = match packet.first_byte() {
            Some(0xFE) => decode_end(packet.payload(), capabilities).map(|eof| (Some(eof), None)),
            Some(0x00) => OkPacket::parse(packet.payload(), capabilities).map(|ok| (None, Some(ok))),
            _ => Err(protocol_error("Unexpected response to COM_SET_OPTION")),
        };
        self.dispatcher.channel_mut().recycle(packet);
        match self.dispatcher.check(reply)? {
            (Some(eof), _) => self.dispatcher.record_end(eof),
            (_, Some(ok)) => self.dispatcher.record_ok(&ok),
            (None, None) => {}
        }
        self.config.multi_statements = enabled;
        Ok(())
    }

    /// Server status string (COM_STATISTICS), e.g. "Uptime: 120  Threads: 2 ...".
    pub fn statistics(&mut self) -> Result<String> {
        let packet = self.dispatcher.exchange(&[Command::Statistics as u8])?;
        let text = String::from_utf8_lossy(packet.payload()).into_owned();
        self.dispatcher.channel_mut().recycle(packet);
        Ok(text)
    }

    /// Reset session state without re-authenticating (COM_RESET_CONNECTION).
    ///
    /// The server drops prepared statements, temporary tables and user
    /// variables; the configured `SET NAMES` is applied again.
    pub fn reset_connection(&mut self) -> Result<()> {
        let header = self
            .dispatcher
            .send_command(Command::ResetConnection, &[], None)?;
        self.expect_ok(header, "COM_RESET_CONNECTION")?;
        if let Some(name) = self.config.charset_name.clone() {
            self.set_charset(&name)?;
        }
        Ok(())
    }

    /// Re-authenticate the session as another user (COM_CHANGE_USER).
    ///
    /// A failed change leaves the server side of the session undefined, so
    /// the connection is closed.
    pub fn change_user(&mut self, user: &str, password: &str, database: Option<&str>) -> Result<()> {
        let capabilities = self.dispatcher.capabilities();
        let plugin = self.plugin.clone();
        let creds = Credentials {
            user,
            password,
            database,
        };
        let result = match self.dispatcher.raw_channel() {
            Ok(channel) => handshake::change_user(
                channel,
                &self.config,
                &self.greeting,
                capabilities,
                plugin.as_deref(),
                creds,
            ),
            Err(e) => return Err(e),
        };

        let (ok, plugin) = match result {
            Ok(done) => done,
            Err(e) => {
                tracing::warn!(user, error = %e, "change user failed; closing connection");
                self.dispatcher.channel_mut().close();
                return Err(e);
            }
        };
        self.dispatcher.record_ok(&ok);
        self.plugin = plugin;
        self.config.user = user.to_string();
        self.config.password = Some(password.to_string());
        self.config.database = database.map(str::to_string);
        tracing::debug!(user, plugin = self.plugin.as_deref(), "changed user");

        if let Some(name) = self.config.charset_name.clone() {
            self.set_charset(&name)?;
        }
        Ok(())
    }

    /// Switch the connection character set with `SET NAMES`.
    pub fn set_charset(&mut self, name: &str) -> Result<()> {
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(config_error(format!("Invalid character set name '{}'", name)));
        }
        self.execute(&format!("SET NAMES {}", name), &[])?;
        if let Some(index) = charset::index_for_name(name) {
            self.charset = index;
        }
        self.config.charset_name = Some(name.to_string());
        Ok(())
    }

    fn bind<'s>(sql: &'s str, params: &[Value]) -> Cow<'s, str> {
        if params.is_empty() {
            Cow::Borrowed(sql)
        } else {
            Cow::Owned(interpolate_params(sql, params))
        }
    }

    /// Run a text query and return every result it produced.
    ///
    /// `?` placeholders are replaced by the escaped literals of `params`.
    #[tracing::instrument(level = "debug", skip(self, params), fields(connection_id = self.connection_id))]
    pub fn query_multi(&mut self, sql: &str, params: &[Value]) -> Result<Vec<ResultSet>> {
        let sql = Self::bind(sql, params);
        let header = self
            .dispatcher
            .send_command(Command::Query, sql.as_bytes(), Some(&*sql))?;
        let results = self.dispatcher.read_all_results(header, Some(&*sql), None)?;
        self.dispatcher.check_truncation()?;
        Ok(results)
    }

    /// Run a text query and return its first result, fully buffered.
    pub fn query(&mut self, sql: &str, params: &[Value]) -> Result<ResultSet> {
        first_result(self.query_multi(sql, params)?)
    }

    /// Execute a query and return the first row, if any.
    pub fn query_one(&mut self, sql: &str, params: &[Value]) -> Result<Option<Row>> {
        Ok(self.query(sql, params)?.into_rows().into_iter().next())
    }

    /// Run a text query and pull its rows lazily.
    ///
    /// The connection is busy until the stream has been read to the end.
    pub fn query_stream(&mut self, sql: &str, params: &[Value]) -> Result<RowStream<'_>> {
        let sql = Self::bind(sql, params).into_owned();
        let header = self
            .dispatcher
            .send_command(Command::Query, sql.as_bytes(), Some(sql.as_str()))?;
        RowStream::open(&mut self.dispatcher, header, Some(sql))
    }

    /// Execute a statement that doesn't return rows.
    ///
    /// Returns the affected-row count of the first result.
    pub fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        Ok(self.query(sql, params)?.affected_rows())
    }

    /// Execute an INSERT and return the last inserted ID.
    pub fn insert(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        Ok(self.query(sql, params)?.last_insert_id())
    }

    /// Prepare a statement on the server (COM_STMT_PREPARE).
    #[tracing::instrument(level = "debug", skip(self), fields(connection_id = self.connection_id))]
    pub fn prepare(&mut self, sql: &str) -> Result<PreparedStatement> {
        let packet = self.dispatcher.exchange(&build_stmt_prepare_packet(sql))?;
        let prepared = parse_stmt_prepare_ok(packet.payload());
        self.dispatcher.channel_mut().recycle(packet);
        let prepared = self.dispatcher.check(prepared)?;

        let params = self
            .dispatcher
            .read_definitions(usize::from(prepared.num_params))?;
        let columns = self
            .dispatcher
            .read_definitions(usize::from(prepared.num_columns))?;
        tracing::debug!(
            statement_id = prepared.statement_id,
            params = params.len(),
            columns = columns.len(),
            "prepared statement"
        );
        Ok(PreparedStatement::new(
            prepared.statement_id,
            sql,
            params,
            columns.into(),
        ))
    }

    fn check_param_count(stmt: &PreparedStatement, params: &[Value]) -> Result<()> {
        if params.len() == stmt.param_count() {
            return Ok(());
        }
        Err(Error::Type(TypeError {
            expected: "one value per statement placeholder",
            actual: format!(
                "{} values for {} placeholders",
                params.len(),
                stmt.param_count()
            ),
            column: None,
            rust_type: None,
        }))
    }

    /// Execute a prepared statement with binary parameters.
    pub fn execute_prepared(&mut self, stmt: &PreparedStatement, params: &[Value]) -> Result<ResultSet> {
        Self::check_param_count(stmt, params)?;
        let payload = build_stmt_execute_packet(stmt.statement_id, params, CursorType::NoCursor);
        let header = self.dispatcher.send_payload(&payload, Some(stmt.sql.as_str()))?;
        let cached = (!stmt.columns.is_empty()).then_some(&stmt.columns);
        let results = self
            .dispatcher
            .read_all_results(header, Some(stmt.sql.as_str()), cached)?;
        self.dispatcher.check_truncation()?;
        first_result(results)
    }

    /// Execute a prepared statement with a read-only cursor.
    ///
    /// Rows stay on the server and are pulled with [`fetch`](Self::fetch).
    /// If the server declines to open a cursor the rows it sends inline are
    /// kept in the returned [`Cursor`] instead.
    pub fn open_cursor(&mut self, stmt: &PreparedStatement, params: &[Value]) -> Result<Cursor> {
        Self::check_param_count(stmt, params)?;
        let payload = build_stmt_execute_packet(stmt.statement_id, params, CursorType::ReadOnly);
        let header = self.dispatcher.send_payload(&payload, Some(stmt.sql.as_str()))?;

        let ResponseHeader::ResultSet { column_count } = header else {
            return Ok(Cursor {
                statement_id: stmt.statement_id,
                columns: stmt.columns.clone(),
                column_info: stmt.column_info().clone(),
                buffered: VecDeque::new(),
                open: false,
            });
        };

        let cached = (!stmt.columns.is_empty()).then_some(&stmt.columns);
        let columns = self.dispatcher.read_columns(column_count, cached)?;
        let info = column_info(&columns);
        let mut buffered = VecDeque::new();
        let open = match self.dispatcher.start_cursor(&columns)? {
            None => true,
            Some(rows) => {
                tracing::debug!(
                    statement_id = stmt.statement_id,
                    rows = rows.len(),
                    "server sent rows inline instead of opening a cursor"
                );
                buffered.extend(rows.into_iter().map(|v| Row::with_columns(info.clone(), v)));
                while let Some(header) = self.dispatcher.next_response(Some(stmt.sql.as_str()))? {
                    self.dispatcher.read_result(header, None)?;
                }
                false
            }
        };

        Ok(Cursor {
            statement_id: stmt.statement_id,
            columns,
            column_info: info,
            buffered,
            open,
        })
    }

    /// Take up to `count` rows from a cursor (COM_STMT_FETCH).
    ///
    /// An empty vector means the cursor is exhausted.
    pub fn fetch(&mut self, cursor: &mut Cursor, count: u32) -> Result<Vec<Row>> {
        let count = count.max(1);
        if !cursor.buffered.is_empty() {
            let n = (count as usize).min(cursor.buffered.len());
            return Ok(cursor.buffered.drain(..n).collect());
        }
        if !cursor.open {
            return Ok(Vec::new());
        }

        let rows = self
            .dispatcher
            .fetch(cursor.statement_id, count, &cursor.columns)?;
        let status = self.dispatcher.status();
        if status.last_row_sent() || !status.cursor_exists() {
            cursor.open = false;
        }
        Ok(rows
            .into_iter()
            .map(|v| Row::with_columns(cursor.column_info.clone(), v))
            .collect())
    }

    /// Deallocate a prepared statement (COM_STMT_CLOSE).
    pub fn close_prepared(&mut self, stmt: PreparedStatement) -> Result<()> {
        tracing::trace!(statement_id = stmt.statement_id, "closing prepared statement");
        self.dispatcher
            .send_no_response(&build_stmt_close_packet(stmt.statement_id))
    }

    /// Close the statement's cursor and discard sent long data (COM_STMT_RESET).
    pub fn reset_prepared(&mut self, stmt: &PreparedStatement) -> Result<()> {
        let header = self
            .dispatcher
            .send_payload(&build_stmt_reset_packet(stmt.statement_id), Some(stmt.sql.as_str()))?;
        self.expect_ok(header, "COM_STMT_RESET").map(drop)
    }

    /// Source for the next `LOAD DATA LOCAL INFILE`, used instead of the
    /// file the server names. Requires `local_infile` in the configuration.
    pub fn set_local_infile_stream(&mut self, source: impl Read + Send + 'static) {
        self.dispatcher.set_local_infile_stream(Some(Box::new(source)));
    }

    /// Handle that cancels this connection's running statement from another
    /// thread.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle::new(self.config.clone(), self.connection_id)
    }

    /// Be told when the server enters or leaves a transaction.
    pub fn set_transaction_listener(&mut self, listener: impl TransactionListener + 'static) {
        self.dispatcher
            .tracker_mut()
            .set_listener(Some(Box::new(listener)));
    }

    pub fn clear_transaction_listener(&mut self) {
        self.dispatcher.tracker_mut().set_listener(None);
    }
}

fn first_result(results: Vec<ResultSet>) -> Result<ResultSet> {
    results
        .into_iter()
        .next()
        .ok_or_else(|| protocol_error("Command produced no result"))
}

/// Quote an identifier with backticks, doubling embedded backticks.
pub fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}
