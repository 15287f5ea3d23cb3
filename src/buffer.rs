//! Fixed-capacity staging buffer.
//!
//! Every read from a transport lands in a [`Buffer`], and every match is run
//! against one. The buffer never reallocates: bytes occupy `[0, len)` of a
//! storage block sized once at construction, and consuming from the front
//! shifts the remainder down.
//!
//! ```text
//!  0                 len              capacity
//!  |== unread bytes ==|---- spare ----|
//! ```
//!
//! Writers either copy in with [`Buffer::extend`] (rejects oversized writes)
//! or fill [`Buffer::spare_mut`] directly and then commit with
//! [`Buffer::push`], which reports how many bytes it actually advanced.

use crate::error::{ProxyError, Result};

/// Default buffer capacity, one socket-read chunk.
pub const DEFAULT_CAPACITY: usize = 1 << 16;

/// Contiguous fixed-capacity byte buffer.
#[derive(Clone)]
pub struct Buffer {
    data: Vec<u8>,
    len: usize,
}

impl Buffer {
    /// Create an empty buffer holding at most `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity],
            len: 0,
        }
    }

    /// Total bytes the buffer can hold.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Bytes currently held.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when no bytes are held.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Space left before the buffer is full.
    pub fn available(&self) -> usize {
        self.capacity().saturating_sub(self.len)
    }

    /// The unread bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// The writable region after the unread bytes. Commit with [`push`](Self::push).
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.len..]
    }

    /// Advance the write cursor by `n`, clamped to capacity.
    ///
    /// Returns the number of bytes actually committed. A short count means the
    /// caller wrote past the end of [`spare_mut`](Self::spare_mut) and the
    /// excess was lost.
    pub fn push(&mut self, n: usize) -> usize {
        let advanced = n.min(self.available());
        if advanced < n {
            tracing::warn!(
                requested = n,
                advanced,
                "buffer push truncated at capacity {}",
                self.capacity()
            );
        }
        self.len += advanced;
        advanced
    }

    /// Copy `bytes` onto the end of the buffer.
    ///
    /// Fails without writing anything if `bytes` does not fit.
    pub fn extend(&mut self, bytes: &[u8]) -> Result<()> {
        let available = self.available();
        if bytes.len() > available {
            return Err(ProxyError::BufferOverflow {
                requested: bytes.len(),
                available,
            });
        }
        self.data[self.len..self.len + bytes.len()].copy_from_slice(bytes);
        self.len += bytes.len();
        Ok(())
    }

    /// Remove `n` bytes from the front, shifting the rest down.
    pub fn pop(&mut self, n: usize) {
        if n >= self.len {
            self.len = 0;
            return;
        }
        self.data.copy_within(n..self.len, 0);
        self.len -= n;
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.len = 0;
    }
}

impl Default for Buffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("len", &self.len)
            .field("capacity", &self.capacity())
            .finish()
    }
}
