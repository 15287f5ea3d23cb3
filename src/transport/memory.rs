//! Scripted in-memory transport.
//!
//! Reads are replayed from a script of chunks, would-blocks, EOF and errors;
//! writes are captured. A [`MemoryHandle`] stays with the test to extend the
//! script and inspect what the engine wrote, so dispatch behaviour can be
//! exercised without sockets and with exact control over chunk boundaries.

use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;

use super::{Readiness, Transport};

/// One scripted read result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedRead {
    /// Deliver these bytes (split across reads if the buffer is smaller).
    Data(Vec<u8>),
    /// Report `WouldBlock` once.
    WouldBlock,
    /// Report EOF, now and on every later read.
    Eof,
    /// Fail with this error kind once.
    Error(io::ErrorKind),
}

#[derive(Debug, Default)]
struct Shared {
    reads: VecDeque<ScriptedRead>,
    written: Vec<u8>,
    write_limit: Option<usize>,
    write_error: Option<io::ErrorKind>,
}

/// Test-side handle to a [`MemoryTransport`].
#[derive(Debug, Clone, Default)]
pub struct MemoryHandle {
    shared: Arc<Mutex<Shared>>,
    read_ready: Arc<Notify>,
    write_ready: Arc<Notify>,
}

impl MemoryHandle {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn push(&self, read: ScriptedRead) {
        self.lock().reads.push_back(read);
        self.read_ready.notify_one();
    }

    /// Queue bytes for the next read.
    pub fn push_read(&self, bytes: impl Into<Vec<u8>>) {
        self.push(ScriptedRead::Data(bytes.into()));
    }

    /// Queue a single `WouldBlock`.
    pub fn push_would_block(&self) {
        self.push(ScriptedRead::WouldBlock);
    }

    /// Queue end of stream.
    pub fn push_eof(&self) {
        self.push(ScriptedRead::Eof);
    }

    /// Queue a read failure.
    pub fn push_error(&self, kind: io::ErrorKind) {
        self.push(ScriptedRead::Error(kind));
    }

    /// Everything written so far.
    pub fn written(&self) -> Vec<u8> {
        self.lock().written.clone()
    }

    /// Everything written so far, clearing the capture.
    pub fn take_written(&self) -> Vec<u8> {
        std::mem::take(&mut self.lock().written)
    }

    /// Accept `limit` more bytes in total, then block; `None` lifts the cap.
    pub fn set_write_limit(&self, limit: Option<usize>) {
        self.lock().write_limit = limit;
        self.write_ready.notify_one();
    }

    /// Make every later write fail with `kind`.
    pub fn fail_writes(&self, kind: io::ErrorKind) {
        self.lock().write_error = Some(kind);
        self.write_ready.notify_one();
    }

    fn has_reads(&self) -> bool {
        !self.lock().reads.is_empty()
    }

    fn writes_blocked(&self) -> bool {
        let shared = self.lock();
        shared.write_error.is_none() && shared.write_limit == Some(0)
    }
}

/// Transport backed by a read script and a write capture.
#[derive(Debug)]
pub struct MemoryTransport {
    handle: MemoryHandle,
    peer: Option<SocketAddr>,
}

impl MemoryTransport {
    /// New transport plus the handle that drives it.
    pub fn new() -> (Self, MemoryHandle) {
        let handle = MemoryHandle::default();
        (
            Self {
                handle: handle.clone(),
                peer: None,
            },
            handle,
        )
    }

    /// Report `peer` as the remote address.
    pub fn with_peer(mut self, peer: SocketAddr) -> Self {
        self.peer = Some(peer);
        self
    }
}

impl Transport for MemoryTransport {
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut shared = self.handle.lock();
        match shared.reads.pop_front() {
            None | Some(ScriptedRead::WouldBlock) => Err(io::ErrorKind::WouldBlock.into()),
            Some(ScriptedRead::Eof) => {
                shared.reads.push_front(ScriptedRead::Eof);
                Ok(0)
            },
            Some(ScriptedRead::Error(kind)) => Err(io::Error::new(kind, "scripted read error")),
            Some(ScriptedRead::Data(mut data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                if n < data.len() {
                    shared.reads.push_front(ScriptedRead::Data(data.split_off(n)));
                }
                Ok(n)
            },
        }
    }

    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut shared = self.handle.lock();
        if let Some(kind) = shared.write_error {
            return Err(io::Error::new(kind, "scripted write error"));
        }
        let n = shared.write_limit.map_or(buf.len(), |limit| limit.min(buf.len()));
        if n == 0 && !buf.is_empty() {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        if let Some(limit) = shared.write_limit.as_mut() {
            *limit -= n;
        }
        shared.written.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn readable(&self) -> Readiness<'_> {
        Box::pin(async move {
            while !self.handle.has_reads() {
                self.handle.read_ready.notified().await;
            }
            Ok(())
        })
    }

    fn writable(&self) -> Readiness<'_> {
        Box::pin(async move {
            while self.handle.writes_blocked() {
                self.handle.write_ready.notified().await;
            }
            Ok(())
        })
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
