//! TLS transport over tokio TCP using rustls 0.21.
//!
//! rustls is sans-IO: it never touches the socket itself. The handshake is
//! driven asynchronously before the engine starts; afterwards `try_read` and
//! `try_write` shuttle records between the rustls connection and the socket
//! with the socket's own non-blocking calls, so the transport behaves like
//! plain TCP from the engine's side.
//!
//! ```text
//!  try_read:  socket --read_tls--> rustls --reader()--> caller
//!  try_write: caller --writer()--> rustls --write_tls--> socket
//! ```

use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpStream;

use super::{Readiness, Transport};
use crate::error::{ProxyError, Result};

/// `Read`/`Write` view of a tokio stream using its non-blocking calls.
struct TryIo<'a>(&'a TcpStream);

impl Read for TryIo<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.try_read(buf)
    }
}

impl Write for TryIo<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.try_write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Established TLS session, either side.
pub struct TlsTransport {
    stream: TcpStream,
    conn: rustls::Connection,
    pending_plaintext: usize,
}

impl TlsTransport {
    /// Run the server side of the handshake on an accepted stream.
    pub async fn accept(stream: TcpStream, config: Arc<rustls::ServerConfig>) -> Result<Self> {
        let conn = rustls::ServerConnection::new(config)?;
        let mut transport = Self {
            stream,
            conn: conn.into(),
            pending_plaintext: 0,
        };
        transport.handshake().await?;
        Ok(transport)
    }

    /// Run the client side of the handshake towards `server_name`.
    pub async fn connect(
        stream: TcpStream,
        config: Arc<rustls::ClientConfig>,
        server_name: &str,
    ) -> Result<Self> {
        let name = rustls::ServerName::try_from(server_name)
            .or_else(|_| rustls::ServerName::try_from("localhost"))
            .map_err(|e| ProxyError::Tls(format!("Invalid server name {}: {}", server_name, e)))?;
        let conn = rustls::ClientConnection::new(config, name)?;
        let mut transport = Self {
            stream,
            conn: conn.into(),
            pending_plaintext: 0,
        };
        transport.handshake().await?;
        Ok(transport)
    }

    /// Negotiated protocol version, for logging.
    pub fn protocol_version(&self) -> Option<rustls::ProtocolVersion> {
        self.conn.protocol_version()
    }

    async fn handshake(&mut self) -> Result<()> {
        while self.conn.is_handshaking() {
            self.write_all_tls().await?;
            if !self.conn.is_handshaking() {
                break;
            }
            if !self.conn.wants_read() {
                continue;
            }
            match self.conn.read_tls(&mut TryIo(&self.stream)) {
                Ok(0) => {
                    return Err(ProxyError::Tls(
                        "peer closed the connection during handshake".to_string(),
                    ))
                },
                Ok(_) => {
                    if let Err(e) = self.process_packets() {
                        // Let the peer see the alert before bailing out.
                        let _ = self.conn.write_tls(&mut TryIo(&self.stream));
                        return Err(ProxyError::Tls(e.to_string()));
                    }
                },
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.stream.readable().await?;
                },
                Err(e) => return Err(e.into()),
            }
        }
        self.write_all_tls().await?;
        tracing::debug!(version = ?self.conn.protocol_version(), "TLS handshake complete");
        Ok(())
    }

    async fn write_all_tls(&mut self) -> Result<()> {
        while self.conn.wants_write() {
            match self.conn.write_tls(&mut TryIo(&self.stream)) {
                Ok(_) => {},
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.stream.writable().await?;
                },
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn process_packets(&mut self) -> io::Result<()> {
        let state = self
            .conn
            .process_new_packets()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.pending_plaintext = state.plaintext_bytes_to_read();
        Ok(())
    }
}

impl std::fmt::Debug for TlsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsTransport")
            .field("peer", &self.stream.peer_addr().ok())
            .field("version", &self.conn.protocol_version())
            .field("pending_plaintext", &self.pending_plaintext)
            .finish()
    }
}

impl Transport for TlsTransport {
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match self.conn.reader().read(buf) {
                Ok(n) => {
                    self.pending_plaintext = self.pending_plaintext.saturating_sub(n);
                    return Ok(n);
                },
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {},
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(0),
                Err(e) => return Err(e),
            }

            match self.conn.read_tls(&mut TryIo(&self.stream)) {
                Ok(0) => return Ok(0),
                Ok(_) => self.process_packets()?,
                Err(e) => return Err(e),
            }
            // Key updates and alerts produce records of their own.
            match self.flush_pending() {
                Err(e) if e.kind() != io::ErrorKind::WouldBlock => return Err(e),
                _ => {},
            }
        }
    }

    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.flush_pending() {
            Err(e) if e.kind() != io::ErrorKind::WouldBlock => return Err(e),
            _ => {},
        }
        if self.conn.wants_write() {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let n = self.conn.writer().write(buf)?;
        match self.flush_pending() {
            Err(e) if e.kind() != io::ErrorKind::WouldBlock => Err(e),
            _ => Ok(n),
        }
    }

    fn readable(&self) -> Readiness<'_> {
        Box::pin(self.stream.readable())
    }

    fn writable(&self) -> Readiness<'_> {
        Box::pin(self.stream.writable())
    }

    fn has_pending_input(&self) -> bool {
        self.pending_plaintext > 0
    }

    fn wants_write(&self) -> bool {
        self.conn.wants_write()
    }

    fn flush_pending(&mut self) -> io::Result<()> {
        while self.conn.wants_write() {
            self.conn.write_tls(&mut TryIo(&self.stream))?;
        }
        Ok(())
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.stream.peer_addr().ok()
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.stream.local_addr().ok()
    }

    fn name(&self) -> &'static str {
        "TLS"
    }
}
