//! Connection configuration.
//!
//! Connection parameters, TLS settings, and the behavior switches the
//! protocol engine consults (compression, LOCAL INFILE, zero dates, strict
//! truncation, streaming clobbering, authentication plugins).

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use sqlwire_core::Error;

use crate::auth::PluginRegistry;
use crate::error::config_error;
use crate::protocol::capabilities::{
    BASE_CLIENT_FLAGS, CLIENT_COMPRESS, CLIENT_CONNECT_ATTRS, CLIENT_CONNECT_WITH_DB,
    CLIENT_DEPRECATE_EOF, CLIENT_FOUND_ROWS, CLIENT_LOCAL_FILES, CLIENT_MULTI_STATEMENTS,
    CLIENT_SSL,
};
use crate::protocol::charset;

/// Smallest `max_packet_size` accepted by [`MySqlConfig::validate`].
pub const MIN_MAX_PACKET_SIZE: u32 = 1024;
/// Largest `max_packet_size` the server supports (1 GiB).
pub const MAX_MAX_PACKET_SIZE: u32 = 1024 * 1024 * 1024;

/// SSL mode for MySQL connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslMode {
    /// Do not use SSL
    #[default]
    Disable,
    /// Prefer SSL if available, fall back to non-SSL
    Preferred,
    /// Require SSL connection
    Required,
    /// Require SSL and verify server certificate
    VerifyCa,
    /// Require SSL and verify server certificate matches hostname
    VerifyIdentity,
}

impl SslMode {
    /// Check if SSL should be attempted.
    pub const fn should_try_ssl(self) -> bool {
        !matches!(self, SslMode::Disable)
    }

    /// Check if SSL is required.
    pub const fn is_required(self) -> bool {
        matches!(
            self,
            SslMode::Required | SslMode::VerifyCa | SslMode::VerifyIdentity
        )
    }
}

/// Certificates and verification options for the TLS upgrade.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsConfig {
    /// PEM file with the CA certificate(s) to trust
    pub ca_cert_path: Option<PathBuf>,
    /// PEM client certificate for mutual TLS
    pub client_cert_path: Option<PathBuf>,
    /// PEM private key matching `client_cert_path`
    pub client_key_path: Option<PathBuf>,
    /// Name to verify the certificate against instead of the host
    pub server_name: Option<String>,
    /// Accept any certificate. Testing only.
    pub danger_skip_verify: bool,
}

impl TlsConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ca_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_cert_path = Some(path.into());
        self
    }

    pub fn client_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.client_cert_path = Some(path.into());
        self
    }

    pub fn client_key(mut self, path: impl Into<PathBuf>) -> Self {
        self.client_key_path = Some(path.into());
        self
    }

    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    pub fn skip_verify(mut self, skip: bool) -> Self {
        self.danger_skip_verify = skip;
        self
    }
}

/// What to do with all-zero DATE, DATETIME and TIMESTAMP values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ZeroDateTimeBehavior {
    /// Fail the row decode with a type error
    #[default]
    Exception,
    /// Decode as NULL
    ConvertToNull,
    /// Return the zero value as text (`0000-00-00`, `0000-00-00 00:00:00`)
    PassThrough,
}

/// MySQL connection configuration.
#[derive(Debug, Clone)]
pub struct MySqlConfig {
    /// Hostname or IP address
    pub host: String,
    /// Port number (default: 3306)
    pub port: u16,
    /// Username for authentication
    pub user: String,
    /// Password for authentication
    pub password: Option<String>,
    /// Database name to connect to (optional at connect time)
    pub database: Option<String>,
    /// Collation index sent in the handshake (default: utf8mb4_general_ci)
    pub charset: u8,
    /// Character set name applied with `SET NAMES` after authentication
    pub charset_name: Option<String>,
    /// Timeout for socket connect and the handshake
    pub connect_timeout: Duration,
    /// Per-command socket timeout after the handshake (`None` blocks)
    pub socket_timeout: Option<Duration>,
    /// SSL mode
    pub ssl_mode: SslMode,
    /// TLS certificates and verification
    pub tls_config: TlsConfig,
    /// Enable compression (CLIENT_COMPRESS capability)
    pub compression: bool,
    /// Additional connection attributes
    pub attributes: HashMap<String, String>,
    /// Local infile handling (disabled by default)
    pub local_infile: bool,
    /// Max allowed packet size (default: 64MB)
    pub max_packet_size: u32,
    /// Allow several statements in one COM_QUERY
    pub multi_statements: bool,
    /// Report matched rather than changed rows for UPDATE
    pub found_rows: bool,
    /// Ask for OK packets in place of EOF packets
    pub deprecate_eof: bool,
    /// Create the configured database if selecting it fails
    pub create_database_if_not_exist: bool,
    /// Raise truncation warnings (1264/1265/1406) as errors
    pub strict_truncation: bool,
    /// Drain an unfinished streaming result instead of failing with `Busy`
    pub clobber_streaming_results: bool,
    /// Handling of all-zero temporal values
    pub zero_date_time_behavior: ZeroDateTimeBehavior,
    /// Decode BIGINT UNSIGNED values above i64::MAX as decimal text instead of failing
    pub unsigned_bigint_as_decimal: bool,
    /// Server RSA public key (PEM) for sha256/caching_sha2 full authentication
    pub server_rsa_public_key: Option<Vec<u8>>,
    /// Allow asking the server for its RSA public key
    pub allow_public_key_retrieval: bool,
    /// Authentication plugins
    pub auth_plugins: PluginRegistry,
}

impl Default for MySqlConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 3306,
            user: String::new(),
            password: None,
            database: None,
            charset: charset::DEFAULT_CHARSET,
            charset_name: None,
            connect_timeout: Duration::from_secs(30),
            socket_timeout: None,
            ssl_mode: SslMode::default(),
            tls_config: TlsConfig::default(),
            compression: false,
            attributes: HashMap::new(),
            local_infile: false,
            max_packet_size: 64 * 1024 * 1024, // 64MB
            multi_statements: false,
            found_rows: false,
            deprecate_eof: true,
            create_database_if_not_exist: false,
            strict_truncation: false,
            clobber_streaming_results: false,
            zero_date_time_behavior: ZeroDateTimeBehavior::default(),
            unsigned_bigint_as_decimal: true,
            server_rsa_public_key: None,
            allow_public_key_retrieval: false,
            auth_plugins: PluginRegistry::default(),
        }
    }
}

impl MySqlConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the hostname.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the username.
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// Set the password.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set the database.
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Set the collation index sent in the handshake.
    pub fn charset(mut self, charset: u8) -> Self {
        self.charset = charset;
        self
    }

    /// Set the character set applied with `SET NAMES`.
    ///
    /// Known names also select the matching handshake collation.
    pub fn charset_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if let Some(index) = charset::index_for_name(&name) {
            self.charset = index;
        }
        self.charset_name = Some(name);
        self
    }

    /// Set the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the per-command socket timeout.
    pub fn socket_timeout(mut self, timeout: Duration) -> Self {
        self.socket_timeout = Some(timeout);
        self
    }

    /// Set the SSL mode.
    pub fn ssl_mode(mut self, mode: SslMode) -> Self {
        self.ssl_mode = mode;
        self
    }

    /// Set the TLS configuration.
    pub fn tls_config(mut self, tls: TlsConfig) -> Self {
        self.tls_config = tls;
        self
    }

    /// Enable or disable compression.
    pub fn compression(mut self, enabled: bool) -> Self {
        self.compression = enabled;
        self
    }

    /// Set a connection attribute.
    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Enable or disable local infile handling.
    ///
    /// # Security Warning
    /// A server may request any file the client process can read. Only
    /// enable this for servers you trust.
    pub fn local_infile(mut self, enabled: bool) -> Self {
        self.local_infile = enabled;
        self
    }

    /// Set the max allowed packet size.
    pub fn max_packet_size(mut self, size: u32) -> Self {
        self.max_packet_size = size;
        self
    }

    pub fn multi_statements(mut self, enabled: bool) -> Self {
        self.multi_statements = enabled;
        self
    }

    pub fn found_rows(mut self, enabled: bool) -> Self {
        self.found_rows = enabled;
        self
    }

    pub fn deprecate_eof(mut self, enabled: bool) -> Self {
        self.deprecate_eof = enabled;
        self
    }

    pub fn create_database_if_not_exist(mut self, enabled: bool) -> Self {
        self.create_database_if_not_exist = enabled;
        self
    }

    pub fn strict_truncation(mut self, enabled: bool) -> Self {
        self.strict_truncation = enabled;
        self
    }

    pub fn clobber_streaming_results(mut self, enabled: bool) -> Self {
        self.clobber_streaming_results = enabled;
        self
    }

    pub fn zero_date_time_behavior(mut self, behavior: ZeroDateTimeBehavior) -> Self {
        self.zero_date_time_behavior = behavior;
        self
    }

    pub fn unsigned_bigint_as_decimal(mut self, enabled: bool) -> Self {
        self.unsigned_bigint_as_decimal = enabled;
        self
    }

    /// Set the server's RSA public key (PEM).
    pub fn server_rsa_public_key(mut self, pem: impl Into<Vec<u8>>) -> Self {
        self.server_rsa_public_key = Some(pem.into());
        self
    }

    pub fn allow_public_key_retrieval(mut self, allow: bool) -> Self {
        self.allow_public_key_retrieval = allow;
        self
    }

    /// Replace the authentication plugin registry.
    pub fn auth_plugins(mut self, registry: PluginRegistry) -> Self {
        self.auth_plugins = registry;
        self
    }

    /// Get the socket address string for connection.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Whether the database is sent in the handshake response rather than
    /// selected afterwards.
    pub fn embeds_database(&self) -> bool {
        self.database.is_some() && !self.create_database_if_not_exist
    }

    /// Capability flags the client would like to use.
    ///
    /// The negotiated set is this ANDed with what the server advertises.
    pub fn capability_flags(&self) -> u32 {
        let mut flags = BASE_CLIENT_FLAGS;

        if self.embeds_database() {
            flags |= CLIENT_CONNECT_WITH_DB;
        }
        if self.ssl_mode.should_try_ssl() {
            flags |= CLIENT_SSL;
        }
        if self.compression {
            flags |= CLIENT_COMPRESS;
        }
        if self.local_infile {
            flags |= CLIENT_LOCAL_FILES;
        }
        if self.multi_statements {
            flags |= CLIENT_MULTI_STATEMENTS;
        }
        if self.found_rows {
            flags |= CLIENT_FOUND_ROWS;
        }
        if self.deprecate_eof {
            flags |= CLIENT_DEPRECATE_EOF;
        }
        if !self.attributes.is_empty() {
            flags |= CLIENT_CONNECT_ATTRS;
        }

        flags
    }

    /// Check the configuration for settings that cannot work.
    pub fn validate(&self) -> Result<(), Error> {
        if self.host.is_empty() {
            return Err(config_error("host must not be empty"));
        }
        if !(MIN_MAX_PACKET_SIZE..=MAX_MAX_PACKET_SIZE).contains(&self.max_packet_size) {
            return Err(config_error(format!(
                "max_packet_size must be between {} and {} bytes, got {}",
                MIN_MAX_PACKET_SIZE, MAX_MAX_PACKET_SIZE, self.max_packet_size
            )));
        }
        if self.connect_timeout.is_zero() {
            return Err(config_error("connect_timeout must be greater than zero"));
        }
        if !self.auth_plugins.is_available(self.auth_plugins.default_plugin()) {
            return Err(config_error(format!(
                "default authentication plugin '{}' is not registered",
                self.auth_plugins.default_plugin()
            )));
        }
        crate::tls::validate_tls_config(self.ssl_mode, &self.tls_config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::capabilities::*;

    #[test]
    fn test_config_builder() {
        let config = MySqlConfig::new()
            .host("db.example.com")
            .port(3307)
            .user("myuser")
            .password("secret")
            .database("testdb")
            .connect_timeout(Duration::from_secs(10))
            .socket_timeout(Duration::from_secs(5))
            .ssl_mode(SslMode::Required)
            .compression(true)
            .attribute("program_name", "myapp");

        assert_eq!(config.host, "db.example.com");
        assert_eq!(config.port, 3307);
        assert_eq!(config.user, "myuser");
        assert_eq!(config.password, Some("secret".to_string()));
        assert_eq!(config.database, Some("testdb".to_string()));
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.socket_timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.ssl_mode, SslMode::Required);
        assert!(config.compression);
        assert_eq!(
            config.attributes.get("program_name"),
            Some(&"myapp".to_string())
        );
    }

    #[test]
    fn test_socket_addr() {
        let config = MySqlConfig::new().host("db.example.com").port(3307);
        assert_eq!(config.socket_addr(), "db.example.com:3307");
    }

    #[test]
    fn test_ssl_mode_properties() {
        assert!(!SslMode::Disable.should_try_ssl());
        assert!(SslMode::Preferred.should_try_ssl());
        assert!(!SslMode::Preferred.is_required());
        assert!(SslMode::VerifyIdentity.is_required());
    }

    #[test]
    fn test_capability_flags() {
        let config = MySqlConfig::new()
            .database("test")
            .compression(true)
            .multi_statements(true);
        let flags = config.capability_flags();

        assert!(flags & CLIENT_CONNECT_WITH_DB != 0);
        assert!(flags & CLIENT_COMPRESS != 0);
        assert!(flags & CLIENT_MULTI_STATEMENTS != 0);
        assert!(flags & CLIENT_PROTOCOL_41 != 0);
        assert!(flags & CLIENT_SECURE_CONNECTION != 0);
        assert!(flags & CLIENT_PLUGIN_AUTH != 0);
        assert!(flags & CLIENT_SSL == 0);
        assert!(flags & CLIENT_LOCAL_FILES == 0);
    }

    #[test]
    fn test_create_database_disables_connect_with_db() {
        let config = MySqlConfig::new()
            .database("fresh")
            .create_database_if_not_exist(true);
        assert!(!config.embeds_database());
        assert_eq!(config.capability_flags() & CLIENT_CONNECT_WITH_DB, 0);
    }

    #[test]
    fn test_charset_name_selects_collation() {
        let config = MySqlConfig::new().charset_name("latin1");
        assert_eq!(config.charset, charset::LATIN1_SWEDISH_CI);
        assert_eq!(config.charset_name.as_deref(), Some("latin1"));
    }

    #[test]
    fn test_default_config() {
        let config = MySqlConfig::default();

        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 3306);
        assert_eq!(config.ssl_mode, SslMode::Disable);
        assert_eq!(config.zero_date_time_behavior, ZeroDateTimeBehavior::Exception);
        assert!(!config.compression);
        assert!(!config.local_infile);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_packet_size() {
        let err = MySqlConfig::new().max_packet_size(10).validate().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_validate_rejects_unknown_default_plugin() {
        let mut registry = PluginRegistry::default();
        registry.set_default("no_such_plugin");
        let err = MySqlConfig::new().auth_plugins(registry).validate().unwrap_err();
        assert!(err.to_string().contains("no_such_plugin"));
    }
}
