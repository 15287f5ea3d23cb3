//! Duplex byte transports for the two proxy endpoints.
//!
//! The dispatch loop never awaits a read or a write. It awaits readiness,
//! then calls the non-blocking `try_read` / `try_write`; `WouldBlock` is
//! control flow, not an error.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │              Proxy Engine               │
//! │        (readiness + try_read/write)     │
//! └──────────────────┬──────────────────────┘
//!                    │ Box<dyn Transport>
//!        ┌───────────┼────────────────┐
//!        ▼           ▼                ▼
//! ┌─────────────┐ ┌──────────────┐ ┌─────────────────┐
//! │TcpTransport │ │ TlsTransport │ │ MemoryTransport │
//! │  (plain)    │ │ (rustls)     │ │   (scripted)    │
//! └─────────────┘ └──────────────┘ └─────────────────┘
//! ```
//!
//! TLS handshakes run to completion before a transport is handed to the
//! engine, so every implementation looks the same from the loop's side.

mod config;
mod memory;
mod tcp;
mod tls;

pub use config::{CertConfig, Security, TlsConfig};
pub use memory::{MemoryHandle, MemoryTransport, ScriptedRead};
pub use tcp::TcpTransport;
pub use tls::TlsTransport;

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;

use crate::error::{ProxyError, Result};

/// Boxed readiness future returned by [`Transport`].
pub type Readiness<'a> = Pin<Box<dyn Future<Output = io::Result<()>> + Send + 'a>>;

/// Result of one logical read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// `n` bytes were delivered.
    Data(usize),
    /// Nothing available right now.
    WouldBlock,
    /// The peer closed its side.
    Closed,
}

impl ReadOutcome {
    /// Classify a raw `try_read` result for the named endpoint.
    ///
    /// `Ok(0)` is EOF, `WouldBlock` and `Interrupted` mean "try later",
    /// anything else is a transport error.
    pub fn from_io(endpoint: &str, result: io::Result<usize>) -> Result<Self> {
        match result {
            Ok(0) => Ok(Self::Closed),
            Ok(n) => Ok(Self::Data(n)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(Self::WouldBlock),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(Self::WouldBlock),
            Err(e) => Err(ProxyError::transport(endpoint, e)),
        }
    }
}

/// Non-blocking duplex byte channel.
///
/// Implementations must be safe to poll for readiness while the other
/// endpoint is being serviced; readiness can be spurious, so callers always
/// follow it with a `try_*` call that may still report `WouldBlock`.
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Read available bytes into `buf`. `Ok(0)` means the peer closed.
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write as much of `buf` as the transport accepts right now.
    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Resolve once a read may make progress.
    fn readable(&self) -> Readiness<'_>;

    /// Resolve once a write may make progress.
    fn writable(&self) -> Readiness<'_>;

    /// Bytes are already decoded and waiting, so a read will not block.
    fn has_pending_input(&self) -> bool {
        false
    }

    /// Bytes accepted by `try_write` are still queued inside the transport.
    fn wants_write(&self) -> bool {
        false
    }

    /// Push queued bytes to the socket without blocking.
    fn flush_pending(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Remote address, if the transport has one.
    fn peer_addr(&self) -> Option<SocketAddr>;

    /// Local address, if the transport has one.
    fn local_addr(&self) -> Option<SocketAddr>;

    /// Short name for logging.
    fn name(&self) -> &'static str;
}
