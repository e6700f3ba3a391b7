//! TLS upgrade of an established connection.
//!
//! # Flow
//!
//! 1. Server greeting advertises `CLIENT_SSL`
//! 2. Client sends the short SSL request packet:
//!    - 4 bytes: capability flags (with `CLIENT_SSL`)
//!    - 4 bytes: max packet size
//!    - 1 byte: character set
//!    - 23 bytes: reserved (zeros)
//! 3. Client performs the TLS handshake on the same socket
//! 4. The handshake response and everything after it travel encrypted
//!
//! The rustls session lives behind the `tls` feature. Without it,
//! `SslMode::Preferred` continues in cleartext and the verifying modes fail
//! with an SSL connection error.
//!
//! ```toml
//! [dependencies]
//! sqlwire-mysql = { version = "0.1", features = ["tls"] }
//! ```

#![allow(clippy::cast_possible_truncation)]

use sqlwire_core::Error;

use crate::config::{SslMode, TlsConfig};
use crate::error::ssl_error;
use crate::protocol::{PacketWriter, capabilities};
use crate::stream::Stream;

#[cfg(feature = "tls")]
use std::io::{Read, Write};
#[cfg(feature = "tls")]
use std::sync::Arc;

/// Payload of the SSL request packet (always 32 bytes).
pub fn build_ssl_request(client_caps: u32, max_packet_size: u32, character_set: u8) -> Vec<u8> {
    let mut writer = PacketWriter::with_capacity(32);
    writer.write_u32_le(client_caps | capabilities::CLIENT_SSL);
    writer.write_u32_le(max_packet_size);
    writer.write_u8(character_set);
    writer.write_zeros(23);
    writer.into_bytes()
}

/// Check if the server supports SSL/TLS.
pub const fn server_supports_ssl(server_caps: u32) -> bool {
    server_caps & capabilities::CLIENT_SSL != 0
}

/// Decide whether to upgrade, given the mode and the server's capabilities.
///
/// A required mode against a server without `CLIENT_SSL` fails fast.
/// `Preferred` continues in cleartext when either side cannot do TLS.
pub fn negotiate_ssl(ssl_mode: SslMode, server_caps: u32) -> Result<bool, Error> {
    let server_supports = server_supports_ssl(server_caps);

    match ssl_mode {
        SslMode::Disable => Ok(false),
        SslMode::Preferred => {
            if !server_supports {
                tracing::warn!("server does not support SSL; continuing without TLS");
                Ok(false)
            } else if cfg!(feature = "tls") {
                Ok(true)
            } else {
                tracing::warn!("built without the 'tls' feature; continuing without TLS");
                Ok(false)
            }
        }
        SslMode::Required | SslMode::VerifyCa | SslMode::VerifyIdentity => {
            if server_supports {
                Ok(true)
            } else {
                Err(ssl_error("SSL required but server does not support it"))
            }
        }
    }
}

/// Validate TLS configuration for the given SSL mode.
pub fn validate_tls_config(ssl_mode: SslMode, tls_config: &TlsConfig) -> Result<(), Error> {
    if tls_config.client_cert_path.is_some() != tls_config.client_key_path.is_some() {
        return Err(ssl_error(
            "Client certificate and client key must be configured together for mutual TLS",
        ));
    }
    match ssl_mode {
        SslMode::Disable | SslMode::Preferred | SslMode::Required => Ok(()),
        SslMode::VerifyCa | SslMode::VerifyIdentity => {
            if tls_config.ca_cert_path.is_none() && !tls_config.danger_skip_verify {
                return Err(ssl_error(
                    "CA certificate required for VerifyCa/VerifyIdentity mode. \
                     Set ca_cert_path or danger_skip_verify.",
                ));
            }
            Ok(())
        }
    }
}

/// Wrap `stream` in a TLS session, performing the handshake.
#[cfg(feature = "tls")]
pub fn upgrade(
    stream: Box<dyn Stream>,
    tls_config: &TlsConfig,
    host: &str,
    ssl_mode: SslMode,
) -> Result<Box<dyn Stream>, Error> {
    let tls = TlsStream::new(stream, tls_config, host, ssl_mode)?;
    tracing::debug!(
        protocol = ?tls.protocol_version(),
        "TLS session established"
    );
    Ok(Box::new(tls))
}

/// Always fails: TLS needs the `tls` feature.
#[cfg(not(feature = "tls"))]
pub fn upgrade(
    stream: Box<dyn Stream>,
    _tls_config: &TlsConfig,
    _host: &str,
    _ssl_mode: SslMode,
) -> Result<Box<dyn Stream>, Error> {
    drop(stream);
    Err(ssl_error(
        "TLS support requires the 'tls' feature. \
         Add `sqlwire-mysql = { features = [\"tls\"] }` to your Cargo.toml.",
    ))
}

/// rustls session over a connected stream.
///
/// Verification by mode:
/// - `Preferred` / `Required`: encryption only, any certificate accepted
/// - `VerifyCa`: certificate chain checked against the configured CA
/// - `VerifyIdentity`: chain and host name checked
#[cfg(feature = "tls")]
pub struct TlsStream<S: Stream> {
    conn: rustls::ClientConnection,
    stream: S,
}

#[cfg(feature = "tls")]
impl<S: Stream> std::fmt::Debug for TlsStream<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsStream")
            .field("protocol_version", &self.conn.protocol_version())
            .field("is_handshaking", &self.conn.is_handshaking())
            .finish_non_exhaustive()
    }
}

#[cfg(feature = "tls")]
impl<S: Stream> TlsStream<S> {
    /// Create a TLS session over `stream` and complete the handshake.
    pub fn new(
        mut stream: S,
        tls_config: &TlsConfig,
        server_name: &str,
        ssl_mode: SslMode,
    ) -> Result<Self, Error> {
        let config = build_client_config(tls_config, ssl_mode)?;

        let sni_name = tls_config.server_name.as_deref().unwrap_or(server_name);
        let server_name = sni_name
            .to_string()
            .try_into()
            .map_err(|e| ssl_error(format!("Invalid server name '{}': {}", sni_name, e)))?;

        let mut conn = rustls::ClientConnection::new(Arc::new(config), server_name)
            .map_err(|e| ssl_error(format!("Failed to create TLS connection: {}", e)))?;

        while conn.is_handshaking() {
            while conn.wants_write() {
                conn.write_tls(&mut stream)
                    .map_err(|e| ssl_error(format!("TLS handshake write error: {}", e)))?;
            }
            if conn.wants_read() {
                let n = conn
                    .read_tls(&mut stream)
                    .map_err(|e| ssl_error(format!("TLS handshake read error: {}", e)))?;
                if n == 0 {
                    return Err(ssl_error("Server closed the connection during TLS handshake"));
                }
                conn.process_new_packets()
                    .map_err(|e| ssl_error(format!("TLS handshake error: {}", e)))?;
            }
        }

        Ok(TlsStream { conn, stream })
    }

    /// Get the negotiated protocol version.
    pub fn protocol_version(&self) -> Option<rustls::ProtocolVersion> {
        self.conn.protocol_version()
    }

    /// Get the negotiated cipher suite.
    pub fn negotiated_cipher_suite(&self) -> Option<rustls::SupportedCipherSuite> {
        self.conn.negotiated_cipher_suite()
    }
}

#[cfg(feature = "tls")]
impl<S: Stream> Read for TlsStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        loop {
            match self.conn.reader().read(buf) {
                Ok(n) if n > 0 => return Ok(n),
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e),
            }

            if !self.conn.wants_read() {
                return Ok(0);
            }
            if self.conn.read_tls(&mut self.stream)? == 0 {
                return Ok(0);
            }
            self.conn
                .process_new_packets()
                .map_err(|e| std::io::Error::other(format!("TLS error: {}", e)))?;
        }
    }
}

#[cfg(feature = "tls")]
impl<S: Stream> Write for TlsStream<S> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.conn.writer().write(buf)?;
        while self.conn.wants_write() {
            self.conn.write_tls(&mut self.stream)?;
        }
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.conn.writer().flush()?;
        while self.conn.wants_write() {
            self.conn.write_tls(&mut self.stream)?;
        }
        self.stream.flush()
    }
}

#[cfg(feature = "tls")]
impl<S: Stream> Stream for TlsStream<S> {
    fn set_timeout(&mut self, timeout: Option<std::time::Duration>) -> std::io::Result<()> {
        self.stream.set_timeout(timeout)
    }

    fn after_handshake(
        &mut self,
        socket_timeout: Option<std::time::Duration>,
    ) -> std::io::Result<()> {
        self.stream.after_handshake(socket_timeout)
    }

    fn is_secure(&self) -> bool {
        true
    }

    fn shutdown(&mut self) -> std::io::Result<()> {
        self.conn.send_close_notify();
        while self.conn.wants_write() {
            if self.conn.write_tls(&mut self.stream).is_err() {
                break;
            }
        }
        self.stream.shutdown()
    }
}

#[cfg(feature = "tls")]
fn build_client_config(
    tls_config: &TlsConfig,
    ssl_mode: SslMode,
) -> Result<rustls::ClientConfig, Error> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());

    match ssl_mode {
        SslMode::Disable => Err(ssl_error("TLS upgrade requested with SslMode::Disable")),
        SslMode::Preferred | SslMode::Required => build_no_verify_config(&provider, tls_config),
        SslMode::VerifyCa | SslMode::VerifyIdentity => {
            if tls_config.danger_skip_verify {
                build_no_verify_config(&provider, tls_config)
            } else if let Some(ca_path) = &tls_config.ca_cert_path {
                build_custom_ca_config(&provider, tls_config, ca_path)
            } else {
                build_webpki_config(&provider, tls_config)
            }
        }
    }
}

#[cfg(feature = "tls")]
fn build_no_verify_config(
    provider: &Arc<rustls::crypto::CryptoProvider>,
    tls_config: &TlsConfig,
) -> Result<rustls::ClientConfig, Error> {
    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{DigitallySignedStruct, Error as RustlsError, SignatureScheme};

    /// Accepts any certificate; signatures are still checked by the provider.
    #[derive(Debug)]
    struct AcceptAnyCert(Arc<rustls::crypto::CryptoProvider>);

    impl ServerCertVerifier for AcceptAnyCert {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, RustlsError> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, RustlsError> {
            rustls::crypto::verify_tls12_signature(
                message,
                cert,
                dss,
                &self.0.signature_verification_algorithms,
            )
        }

        fn verify_tls13_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, RustlsError> {
            rustls::crypto::verify_tls13_signature(
                message,
                cert,
                dss,
                &self.0.signature_verification_algorithms,
            )
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            self.0.signature_verification_algorithms.supported_schemes()
        }
    }

    let builder = rustls::ClientConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(&[&rustls::version::TLS12, &rustls::version::TLS13])
        .map_err(|e| ssl_error(format!("Failed to set TLS versions: {}", e)))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCert(provider.clone())));

    add_client_auth(builder, tls_config)
}

#[cfg(feature = "tls")]
fn build_webpki_config(
    provider: &Arc<rustls::crypto::CryptoProvider>,
    tls_config: &TlsConfig,
) -> Result<rustls::ClientConfig, Error> {
    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let builder = rustls::ClientConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(&[&rustls::version::TLS12, &rustls::version::TLS13])
        .map_err(|e| ssl_error(format!("Failed to set TLS versions: {}", e)))?
        .with_root_certificates(root_store);

    add_client_auth(builder, tls_config)
}

#[cfg(feature = "tls")]
fn build_custom_ca_config(
    provider: &Arc<rustls::crypto::CryptoProvider>,
    tls_config: &TlsConfig,
    ca_path: &std::path::Path,
) -> Result<rustls::ClientConfig, Error> {
    let certs = load_certs(ca_path, "CA certificate")?;

    let mut root_store = rustls::RootCertStore::empty();
    for cert in certs {
        root_store
            .add(cert)
            .map_err(|e| ssl_error(format!("Failed to add CA certificate: {}", e)))?;
    }

    let builder = rustls::ClientConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(&[&rustls::version::TLS12, &rustls::version::TLS13])
        .map_err(|e| ssl_error(format!("Failed to set TLS versions: {}", e)))?
        .with_root_certificates(root_store);

    add_client_auth(builder, tls_config)
}

#[cfg(feature = "tls")]
fn load_certs(
    path: &std::path::Path,
    what: &str,
) -> Result<Vec<rustls::pki_types::CertificateDer<'static>>, Error> {
    let file = std::fs::File::open(path)
        .map_err(|e| ssl_error(format!("Failed to open {} '{}': {}", what, path.display(), e)))?;
    let mut reader = std::io::BufReader::new(file);

    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ssl_error(format!("Failed to parse {}: {}", what, e)))?;
    if certs.is_empty() {
        return Err(ssl_error(format!(
            "No certificates found in {} file '{}'",
            what,
            path.display()
        )));
    }
    Ok(certs)
}

#[cfg(feature = "tls")]
fn add_client_auth(
    builder: rustls::ConfigBuilder<rustls::ClientConfig, rustls::client::WantsClientCert>,
    tls_config: &TlsConfig,
) -> Result<rustls::ClientConfig, Error> {
    let (Some(cert_path), Some(key_path)) =
        (&tls_config.client_cert_path, &tls_config.client_key_path)
    else {
        return Ok(builder.with_no_client_auth());
    };

    let certs = load_certs(cert_path, "client certificate")?;

    let key_file = std::fs::File::open(key_path).map_err(|e| {
        ssl_error(format!(
            "Failed to open client key '{}': {}",
            key_path.display(),
            e
        ))
    })?;
    let mut key_reader = std::io::BufReader::new(key_file);
    let key = rustls_pemfile::private_key(&mut key_reader)
        .map_err(|e| ssl_error(format!("Failed to parse client key: {}", e)))?
        .ok_or_else(|| ssl_error(format!("No private key found in '{}'", key_path.display())))?;

    builder
        .with_client_auth_cert(certs, key)
        .map_err(|e| ssl_error(format!("Failed to configure client auth: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::charset;
    use sqlwire_core::error::ConnectionErrorKind;

    #[test]
    fn test_build_ssl_request() {
        let payload = build_ssl_request(
            capabilities::BASE_CLIENT_FLAGS,
            16 * 1024 * 1024,
            charset::UTF8MB4_GENERAL_CI,
        );

        assert_eq!(payload.len(), 32);
        let caps = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
        assert!(caps & capabilities::CLIENT_SSL != 0);
        assert_eq!(
            u32::from_le_bytes([payload[4], payload[5], payload[6], payload[7]]),
            16 * 1024 * 1024
        );
        assert_eq!(payload[8], charset::UTF8MB4_GENERAL_CI);
        assert!(payload[9..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_negotiate_ssl() {
        assert!(!negotiate_ssl(SslMode::Disable, capabilities::CLIENT_SSL).unwrap());
        assert!(!negotiate_ssl(SslMode::Preferred, 0).unwrap());
        assert_eq!(
            negotiate_ssl(SslMode::Preferred, capabilities::CLIENT_SSL).unwrap(),
            cfg!(feature = "tls")
        );
        assert!(negotiate_ssl(SslMode::VerifyIdentity, capabilities::CLIENT_SSL).unwrap());

        let err = negotiate_ssl(SslMode::Required, 0).unwrap_err();
        assert!(matches!(
            err,
            Error::Connection(ref c) if c.kind == ConnectionErrorKind::Ssl
        ));
    }

    #[test]
    fn test_validate_tls_config_verify_modes() {
        let config = TlsConfig::new();
        assert!(validate_tls_config(SslMode::Required, &config).is_ok());
        assert!(validate_tls_config(SslMode::VerifyCa, &config).is_err());

        let config = TlsConfig::new().ca_cert("/path/to/ca.pem");
        assert!(validate_tls_config(SslMode::VerifyIdentity, &config).is_ok());

        let config = TlsConfig::new().skip_verify(true);
        assert!(validate_tls_config(SslMode::VerifyCa, &config).is_ok());
    }

    #[test]
    fn test_validate_tls_config_client_cert_needs_key() {
        let config = TlsConfig::new().client_cert("/path/to/client.pem");
        assert!(validate_tls_config(SslMode::Required, &config).is_err());

        let config = config.client_key("/path/to/client-key.pem");
        assert!(validate_tls_config(SslMode::Required, &config).is_ok());
    }

    #[cfg(not(feature = "tls"))]
    #[test]
    fn test_upgrade_without_feature_fails() {
        let stream = crate::stream::testing::ScriptedStream::new(Vec::new());
        let err = upgrade(
            Box::new(stream),
            &TlsConfig::new(),
            "localhost",
            SslMode::Required,
        )
        .unwrap_err();
        assert!(err.to_string().contains("tls"));
    }
}
