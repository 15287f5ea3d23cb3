//! Plain TCP transport.
//!
//! Wraps a connected tokio `TcpStream`; the engine drives it through
//! tokio's readiness API and the stream's non-blocking `try_read` /
//! `try_write`.

use std::io;
use std::net::SocketAddr;

use tokio::net::TcpStream;

use super::{Readiness, Transport};

/// Unencrypted TCP connection.
#[derive(Debug)]
pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    /// Wrap an already connected stream.
    pub fn new(stream: TcpStream) -> Self {
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("set_nodelay failed: {}", e);
        }
        Self { stream }
    }

    /// Borrow the underlying stream.
    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }

    /// Unwrap the underlying stream, e.g. to start TLS on it.
    pub fn into_inner(self) -> TcpStream {
        self.stream
    }
}

impl Transport for TcpTransport {
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.try_read(buf)
    }

    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.try_write(buf)
    }

    fn readable(&self) -> Readiness<'_> {
        Box::pin(self.stream.readable())
    }

    fn writable(&self) -> Readiness<'_> {
        Box::pin(self.stream.writable())
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.stream.peer_addr().ok()
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.stream.local_addr().ok()
    }

    fn name(&self) -> &'static str {
        "TCP"
    }
}
