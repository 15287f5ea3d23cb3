//! Inbound zlib decompressor.

use flate2::{Decompress, FlushDecompress, Status};

use crate::error::{ProxyError, Result};
use crate::transport::ReadOutcome;

/// Streaming decompressor for one inbound direction.
///
/// Raw bytes are staged in a private workspace; `[pos, end)` is compressed
/// input not yet fed to zlib. Decompressed bytes land in a second window,
/// `[out_pos, out_end)`, and are handed out before zlib is asked for more.
/// More raw bytes are only read once both are drained.
pub struct Inflater {
    endpoint: String,
    decompress: Decompress,
    workspace: Vec<u8>,
    pos: usize,
    end: usize,
    output: Vec<u8>,
    out_pos: usize,
    out_end: usize,
    // Last pass filled `output`; zlib may still hold decompressed bytes.
    window_full: bool,
    stream_ended: bool,
}

impl Inflater {
    /// Decompressor with the default workspace.
    pub fn new(endpoint: &str) -> Self {
        Self::with_workspace(endpoint, super::DEFAULT_WORKSPACE)
    }

    /// Decompressor with a workspace (and output window) of `size` bytes.
    pub fn with_workspace(endpoint: &str, size: usize) -> Self {
        let size = size.max(1);
        Self {
            endpoint: endpoint.to_string(),
            decompress: Decompress::new(true),
            workspace: vec![0; size],
            pos: 0,
            end: 0,
            output: vec![0; size],
            out_pos: 0,
            out_end: 0,
            window_full: false,
            stream_ended: false,
        }
    }

    /// Seed the workspace with compressed bytes that were already read.
    ///
    /// Fails if they do not fit in the free space.
    pub fn preload(&mut self, bytes: &[u8]) -> Result<()> {
        if self.pos == self.end {
            self.pos = 0;
            self.end = 0;
        }
        let available = self.workspace.len() - self.end;
        if bytes.len() > available {
            return Err(ProxyError::BufferOverflow {
                requested: bytes.len(),
                available,
            });
        }
        self.workspace[self.end..self.end + bytes.len()].copy_from_slice(bytes);
        self.end += bytes.len();
        Ok(())
    }

    /// True while a read can make progress without touching the transport:
    /// decompressed bytes are waiting, zlib may hold more, or compressed
    /// input is staged.
    pub fn has_pending(&self) -> bool {
        self.out_pos < self.out_end
            || self.window_full
            || (!self.stream_ended && self.pos < self.end)
    }

    /// True once the peer ended the zlib stream and every decompressed byte
    /// has been handed out.
    pub fn is_finished(&self) -> bool {
        self.stream_ended && self.out_pos == self.out_end
    }

    /// Raw bytes read past the end of the zlib stream.
    ///
    /// Only meaningful once [`is_finished`](Self::is_finished) is true.
    pub fn take_trailing(&mut self) -> Vec<u8> {
        let trailing = self.workspace[self.pos..self.end].to_vec();
        self.pos = self.end;
        trailing
    }

    /// Compressed bytes consumed so far.
    pub fn total_in(&self) -> u64 {
        self.decompress.total_in()
    }

    /// Decompressed bytes produced so far.
    pub fn total_out(&self) -> u64 {
        self.decompress.total_out()
    }

    /// Decompress into `out`, pulling raw bytes through `fill` as needed.
    ///
    /// Buffered output is returned first. Otherwise loops until at least one
    /// byte is produced. `fill` is only called when the workspace is drained
    /// and zlib holds nothing back; its `WouldBlock` and `Closed` outcomes
    /// and errors are passed straight back. When the stream ends without
    /// producing anything this returns `Data(0)` and
    /// [`is_finished`](Self::is_finished) turns true.
    pub fn read<F>(&mut self, out: &mut [u8], mut fill: F) -> Result<ReadOutcome>
    where
        F: FnMut(&mut [u8]) -> Result<ReadOutcome>,
    {
        if out.is_empty() {
            return Ok(ReadOutcome::Data(0));
        }

        loop {
            if self.out_pos < self.out_end {
                let n = (self.out_end - self.out_pos).min(out.len());
                out[..n].copy_from_slice(&self.output[self.out_pos..self.out_pos + n]);
                self.out_pos += n;
                return Ok(ReadOutcome::Data(n));
            }
            if self.stream_ended {
                return Ok(ReadOutcome::Data(0));
            }

            if self.pos == self.end && !self.window_full {
                self.pos = 0;
                self.end = 0;
                match fill(&mut self.workspace)? {
                    ReadOutcome::Data(0) | ReadOutcome::Closed => return Ok(ReadOutcome::Closed),
                    ReadOutcome::Data(n) => self.end = n.min(self.workspace.len()),
                    ReadOutcome::WouldBlock => return Ok(ReadOutcome::WouldBlock),
                }
            }

            let before_in = self.decompress.total_in();
            let before_out = self.decompress.total_out();
            let status = self
                .decompress
                .decompress(
                    &self.workspace[self.pos..self.end],
                    &mut self.output,
                    FlushDecompress::Sync,
                )
                .map_err(|e| ProxyError::codec(&self.endpoint, e.to_string()))?;
            let consumed = (self.decompress.total_in() - before_in) as usize;
            let produced = (self.decompress.total_out() - before_out) as usize;
            self.pos += consumed;
            self.out_pos = 0;
            self.out_end = produced;
            self.window_full = produced == self.output.len() && status != Status::StreamEnd;

            if status == Status::StreamEnd && !self.stream_ended {
                self.stream_ended = true;
                tracing::debug!(
                    endpoint = %self.endpoint,
                    trailing = self.end - self.pos,
                    "inbound zlib stream ended"
                );
            }
            if produced > 0 || self.stream_ended {
                continue;
            }
            if consumed == 0 && self.pos < self.end {
                return Err(ProxyError::codec(
                    &self.endpoint,
                    "decompressor made no progress",
                ));
            }
        }
    }
}

impl std::fmt::Debug for Inflater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inflater")
            .field("endpoint", &self.endpoint)
            .field("staged", &(self.end - self.pos))
            .field("buffered", &(self.out_end - self.out_pos))
            .field("total_in", &self.total_in())
            .field("total_out", &self.total_out())
            .field("finished", &self.is_finished())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::{Compress, Compression, FlushCompress};

    fn deflate(payload: &[u8], flush: FlushCompress) -> Vec<u8> {
        let mut c = Compress::new(Compression::best(), true);
        let mut out = vec![0u8; payload.len() + 128];
        c.compress(payload, &mut out, flush).unwrap();
        out.truncate(c.total_out() as usize);
        out
    }

    #[test]
    fn test_would_block_before_any_input() {
        let mut inflater = Inflater::with_workspace("game", 64);
        let mut out = [0u8; 64];
        let outcome = inflater
            .read(&mut out, |_| Ok(ReadOutcome::WouldBlock))
            .unwrap();
        assert_eq!(outcome, ReadOutcome::WouldBlock);
    }

    #[test]
    fn test_eof_propagates_as_closed() {
        let mut inflater = Inflater::with_workspace("game", 64);
        let mut out = [0u8; 64];
        let outcome = inflater.read(&mut out, |_| Ok(ReadOutcome::Closed)).unwrap();
        assert_eq!(outcome, ReadOutcome::Closed);
    }

    #[test]
    fn test_preloaded_bytes_decode_without_reading() {
        let wire = deflate(b"welcome", FlushCompress::Sync);
        let mut inflater = Inflater::with_workspace("game", 64);
        inflater.preload(&wire).unwrap();
        assert!(inflater.has_pending());

        let mut out = [0u8; 64];
        let outcome = inflater
            .read(&mut out, |_| panic!("workspace was not drained"))
            .unwrap();
        assert_eq!(outcome, ReadOutcome::Data(7));
        assert_eq!(&out[..7], b"welcome");
    }

    #[test]
    fn test_stream_end_leaves_trailing_bytes() {
        let mut wire = deflate(b"last words", FlushCompress::Finish);
        wire.extend_from_slice(b"plain");
        let mut inflater = Inflater::with_workspace("game", 128);
        inflater.preload(&wire).unwrap();

        let mut out = [0u8; 64];
        let outcome = inflater.read(&mut out, |_| Ok(ReadOutcome::WouldBlock)).unwrap();
        assert_eq!(outcome, ReadOutcome::Data(10));
        assert!(inflater.is_finished());
        assert!(!inflater.has_pending());
        assert_eq!(inflater.take_trailing(), b"plain");
    }

    /// Feed `wire` in one fill, then read it back `window` bytes at a time.
    fn drain_in_windows(inflater: &mut Inflater, wire: &[u8], window: usize) -> Vec<u8> {
        let mut fed = false;
        let mut restored = Vec::new();
        let mut out = vec![0u8; window];
        loop {
            let outcome = inflater
                .read(&mut out, |ws| {
                    if fed {
                        return Ok(ReadOutcome::WouldBlock);
                    }
                    fed = true;
                    ws[..wire.len()].copy_from_slice(wire);
                    Ok(ReadOutcome::Data(wire.len()))
                })
                .unwrap();
            match outcome {
                ReadOutcome::Data(n) => {
                    restored.extend_from_slice(&out[..n]);
                    if restored.len() < 10_000 {
                        assert!(inflater.has_pending(), "stalled after {}", restored.len());
                    }
                },
                ReadOutcome::WouldBlock => break,
                ReadOutcome::Closed => unreachable!(),
            }
        }
        restored
    }

    #[test]
    fn test_output_larger_than_read_window_is_not_stranded() {
        let payload: Vec<u8> = b"ab".iter().copied().cycle().take(10_000).collect();
        let wire = deflate(&payload, FlushCompress::Sync);

        for window in [100, 16, 7, 1] {
            let mut inflater = Inflater::with_workspace("game", 1024);
            assert_eq!(drain_in_windows(&mut inflater, &wire, window), payload);
            assert!(!inflater.has_pending());
        }
    }

    #[test]
    fn test_output_larger_than_workspace_is_not_stranded() {
        let payload: Vec<u8> = b"ab".iter().copied().cycle().take(10_000).collect();
        let wire = deflate(&payload, FlushCompress::Sync);
        let mut inflater = Inflater::with_workspace("game", 256);
        assert!(wire.len() <= 256);

        assert_eq!(drain_in_windows(&mut inflater, &wire, 1024), payload);
    }

    #[test]
    fn test_stream_end_waits_for_buffered_output() {
        let payload = vec![b'z'; 500];
        let mut wire = deflate(&payload, FlushCompress::Finish);
        wire.extend_from_slice(b"tail");
        let mut inflater = Inflater::with_workspace("game", 128);
        inflater.preload(&wire).unwrap();

        let mut out = [0u8; 100];
        let mut restored = Vec::new();
        while !inflater.is_finished() {
            match inflater.read(&mut out, |_| Ok(ReadOutcome::WouldBlock)).unwrap() {
                ReadOutcome::Data(n) => restored.extend_from_slice(&out[..n]),
                other => panic!("unexpected {:?}", other),
            }
        }
        assert_eq!(restored, payload);
        assert_eq!(inflater.take_trailing(), b"tail");
    }

    #[test]
    fn test_corrupt_stream_is_codec_error() {
        let mut inflater = Inflater::with_workspace("game", 64);
        inflater.preload(b"\x00\x01garbage that is not zlib").unwrap();
        let mut out = [0u8; 64];
        let err = inflater
            .read(&mut out, |_| Ok(ReadOutcome::WouldBlock))
            .unwrap_err();
        assert!(matches!(err, ProxyError::Codec { .. }));
    }

    #[test]
    fn test_preload_overflow_rejected() {
        let mut inflater = Inflater::with_workspace("game", 4);
        assert!(inflater.preload(b"too long").is_err());
    }
}
