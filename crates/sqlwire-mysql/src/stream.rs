//! Byte-stream transports the packet channel runs over.

use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

/// A bidirectional byte stream carrying MySQL packets.
///
/// Implemented for `TcpStream`, for the TLS wrapper, and for boxed streams so
/// the channel can swap its transport during the TLS upgrade. Any other
/// `Read + Write` type (for example an in-memory script in tests) can opt in
/// with the default methods.
pub trait Stream: Read + Write + Send + fmt::Debug {
    /// Apply a read/write timeout; `None` blocks indefinitely.
    fn set_timeout(&mut self, _timeout: Option<Duration>) -> io::Result<()> {
        Ok(())
    }

    /// Called once authentication has completed.
    ///
    /// Transports switch from their connect-time timeout to the per-command
    /// socket timeout here.
    fn after_handshake(&mut self, socket_timeout: Option<Duration>) -> io::Result<()> {
        self.set_timeout(socket_timeout)
    }

    /// Whether the stream is encrypted.
    fn is_secure(&self) -> bool {
        false
    }

    /// Close the underlying socket without any protocol exchange.
    fn shutdown(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Stream for TcpStream {
    fn set_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.set_read_timeout(timeout)?;
        self.set_write_timeout(timeout)
    }

    fn shutdown(&mut self) -> io::Result<()> {
        match TcpStream::shutdown(self, Shutdown::Both) {
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }
}

impl<S: Stream + ?Sized> Stream for Box<S> {
    fn set_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        (**self).set_timeout(timeout)
    }

    fn after_handshake(&mut self, socket_timeout: Option<Duration>) -> io::Result<()> {
        (**self).after_handshake(socket_timeout)
    }

    fn is_secure(&self) -> bool {
        (**self).is_secure()
    }

    fn shutdown(&mut self) -> io::Result<()> {
        (**self).shutdown()
    }
}

/// Open a TCP connection to the first reachable resolved address.
pub(crate) fn connect_tcp(
    addrs: &[std::net::SocketAddr],
    connect_timeout: Duration,
) -> io::Result<TcpStream> {
    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect_timeout(addr, connect_timeout) {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                return Ok(stream);
            }
            Err(e) => {
                tracing::debug!(%addr, error = %e, "TCP connect attempt failed");
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::AddrNotAvailable, "host resolved to no addresses")
    }))
}
