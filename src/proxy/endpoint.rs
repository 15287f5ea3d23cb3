//! One side of a proxied session.
//!
//! An [`Endpoint`] owns a transport and everything needed to move bytes
//! through it:
//!
//! ```text
//!            read_into_input                      write / flush
//! transport ───────────────▶ [inflater] ─▶ input   output ─▶ [deflater] ─▶ backlog ─▶ transport
//!   (raw stats)                       (payload stats)                      (raw stats)
//! ```
//!
//! Inbound, raw bytes pass through the optional [`Inflater`] into the input
//! buffer, where the dispatch loop matches them. Outbound, bytes forwarded
//! from the peer or queued by actions pass through the optional
//! [`Deflater`]. Whatever the transport will not take right now is kept in
//! a post-codec backlog and flushed on the next writable tick.

use std::io;

use bytes::{Buf, BytesMut};

use crate::buffer::{Buffer, DEFAULT_CAPACITY};
use crate::codec::{Deflater, Inflater};
use crate::error::{ProxyError, Result};
use crate::pattern::{MatchOutcome, PatternSet};
use crate::protocol::{CompressionPolicy, NegotiationState};
use crate::transport::{Readiness, ReadOutcome, Transport};

use super::stats::IoStats;

/// Default cap on bytes waiting for a slow peer.
pub const DEFAULT_MAX_BACKLOG: usize = 1 << 20;

/// Transport plus everything that sits after the codec.
#[derive(Debug)]
struct Wire {
    transport: Box<dyn Transport>,
    backlog: BytesMut,
    max_backlog: usize,
    stats: IoStats,
}

impl Wire {
    fn read(&mut self, endpoint: &str, buf: &mut [u8]) -> Result<ReadOutcome> {
        let outcome = ReadOutcome::from_io(endpoint, self.transport.try_read(buf))?;
        if let ReadOutcome::Data(n) = outcome {
            self.stats.record_in(n);
        }
        Ok(outcome)
    }

    /// Write what the transport takes now, keep the rest in order.
    fn send(&mut self, endpoint: &str, mut bytes: &[u8]) -> Result<()> {
        if self.backlog.is_empty() {
            while !bytes.is_empty() {
                match self.transport.try_write(bytes) {
                    Ok(0) => {
                        return Err(ProxyError::transport(
                            endpoint,
                            io::ErrorKind::WriteZero.into(),
                        ))
                    },
                    Ok(n) => {
                        self.stats.record_out(n);
                        bytes = &bytes[n..];
                    },
                    Err(e) if is_retry(&e) => break,
                    Err(e) => return Err(ProxyError::transport(endpoint, e)),
                }
            }
        }

        if !bytes.is_empty() {
            self.backlog.extend_from_slice(bytes);
            tracing::debug!(endpoint, backlog = self.backlog.len(), "write deferred");
            if self.backlog.len() > self.max_backlog {
                return Err(ProxyError::Backpressure {
                    endpoint: endpoint.to_string(),
                    pending: self.backlog.len(),
                });
            }
        }
        Ok(())
    }

    fn drain(&mut self, endpoint: &str) -> Result<()> {
        match self.transport.flush_pending() {
            Err(e) if !is_retry(&e) => return Err(ProxyError::transport(endpoint, e)),
            _ => {},
        }
        while !self.backlog.is_empty() {
            match self.transport.try_write(&self.backlog) {
                Ok(0) => {
                    return Err(ProxyError::transport(
                        endpoint,
                        io::ErrorKind::WriteZero.into(),
                    ))
                },
                Ok(n) => {
                    self.stats.record_out(n);
                    self.backlog.advance(n);
                },
                Err(e) if is_retry(&e) => break,
                Err(e) => return Err(ProxyError::transport(endpoint, e)),
            }
        }
        Ok(())
    }

    fn has_backlog(&self) -> bool {
        !self.backlog.is_empty() || self.transport.wants_write()
    }
}

fn is_retry(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

/// Push payload bytes through the optional compressor onto the wire.
///
/// Returns the payload bytes accepted. A compressor that could only deliver
/// part of `bytes` has lost the rest inside zlib, so its sink error always
/// ends the session.
fn send_payload(
    endpoint: &str,
    wire: &mut Wire,
    deflater: &mut Option<Deflater>,
    payload: &mut IoStats,
    bytes: &[u8],
) -> Result<usize> {
    let Some(deflater) = deflater.as_mut() else {
        wire.send(endpoint, bytes)?;
        payload.record_out(bytes.len());
        return Ok(bytes.len());
    };

    let accepted = deflater.write(bytes, |out| wire.send(endpoint, out))?;
    payload.record_out(accepted);
    if let Some(err) = deflater.take_error() {
        tracing::warn!(
            "{} compressed write stopped after {} of {} bytes",
            endpoint,
            accepted,
            bytes.len()
        );
        return Err(err);
    }
    Ok(accepted)
}

/// One side of the proxy: transport, buffers, codecs, patterns and state.
#[derive(Debug)]
pub struct Endpoint {
    name: String,
    wire: Wire,
    input: Buffer,
    output: Buffer,
    inflater: Option<Inflater>,
    deflater: Option<Deflater>,
    carry: BytesMut,
    patterns: PatternSet,
    matching: bool,
    state: NegotiationState,
    policy: CompressionPolicy,
    peer_address: Option<String>,
    payload: IoStats,
}

impl Endpoint {
    /// Endpoint with default-sized buffers.
    pub fn new(name: impl Into<String>, transport: Box<dyn Transport>) -> Self {
        Self::with_capacity(name, transport, DEFAULT_CAPACITY)
    }

    /// Endpoint whose input and output buffers hold `capacity` bytes.
    pub fn with_capacity(
        name: impl Into<String>,
        transport: Box<dyn Transport>,
        capacity: usize,
    ) -> Self {
        Self {
            name: name.into(),
            wire: Wire {
                transport,
                backlog: BytesMut::new(),
                max_backlog: DEFAULT_MAX_BACKLOG,
                stats: IoStats::new(),
            },
            input: Buffer::new(capacity),
            output: Buffer::new(capacity),
            inflater: None,
            deflater: None,
            carry: BytesMut::new(),
            patterns: PatternSet::new(),
            matching: true,
            state: NegotiationState::None,
            policy: CompressionPolicy::default(),
            peer_address: None,
            payload: IoStats::new(),
        }
    }

    /// Name used in logs and errors.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Transport kind, e.g. `"TLS"`.
    pub fn transport_name(&self) -> &'static str {
        self.wire.transport.name()
    }

    /// Remote address of the transport.
    pub fn peer_addr(&self) -> Option<std::net::SocketAddr> {
        self.wire.transport.peer_addr()
    }

    /// Limit on bytes held for a slow peer before the session fails.
    pub fn set_max_backlog(&mut self, max: usize) {
        self.wire.max_backlog = max;
    }

    /// Unprocessed inbound bytes.
    pub fn input(&self) -> &Buffer {
        &self.input
    }

    /// Mutable access to the inbound bytes, for actions.
    pub fn input_mut(&mut self) -> &mut Buffer {
        &mut self.input
    }

    /// Bytes queued by actions for this endpoint.
    pub fn output(&self) -> &Buffer {
        &self.output
    }

    /// Installed patterns.
    pub fn patterns(&self) -> &PatternSet {
        &self.patterns
    }

    /// Install patterns before the session starts.
    pub fn patterns_mut(&mut self) -> &mut PatternSet {
        &mut self.patterns
    }

    /// Match the front of the input buffer.
    pub fn scan(&mut self) -> MatchOutcome {
        self.patterns.find(self.input.as_slice())
    }

    /// True while inbound bytes are matched.
    pub fn matching_enabled(&self) -> bool {
        self.matching
    }

    /// Turn matching on or off; compiled patterns are kept.
    pub fn set_matching(&mut self, enabled: bool) {
        self.matching = enabled;
    }

    /// What this endpoint's peer said about NEW-ENVIRON.
    pub fn state(&self) -> NegotiationState {
        self.state
    }

    /// Record a NEW-ENVIRON answer.
    pub fn set_state(&mut self, state: NegotiationState) {
        self.state = state;
    }

    /// MCCP policy for this side.
    pub fn policy(&self) -> CompressionPolicy {
        self.policy
    }

    /// Set the MCCP policy; takes effect when rules are installed.
    pub fn set_policy(&mut self, policy: CompressionPolicy) {
        self.policy = policy;
    }

    /// Address label reported to the other side.
    pub fn peer_address(&self) -> Option<&str> {
        self.peer_address.as_deref()
    }

    /// Set the address label reported to the other side.
    pub fn set_peer_address(&mut self, address: impl Into<String>) {
        self.peer_address = Some(address.into());
    }

    /// Transport byte counts.
    pub fn raw_stats(&self) -> &IoStats {
        &self.wire.stats
    }

    /// Telnet-side byte counts (before compression, after decompression).
    pub fn payload_stats(&self) -> &IoStats {
        &self.payload
    }

    /// Refresh both rate estimates.
    pub fn checkpoint(&mut self, weight: f64) {
        self.wire.stats.checkpoint(weight);
        self.payload.checkpoint(weight);
    }

    /// Wait until the transport may be readable.
    pub fn readable(&self) -> Readiness<'_> {
        self.wire.transport.readable()
    }

    /// Wait until the transport may be writable.
    pub fn writable(&self) -> Readiness<'_> {
        self.wire.transport.writable()
    }

    /// Input is already buffered somewhere below the input buffer, so a read
    /// will make progress without waiting on the socket.
    pub fn pending_input(&self) -> bool {
        self.input.available() > 0
            && (!self.carry.is_empty()
                || self.inflater.as_ref().is_some_and(Inflater::has_pending)
                || self.wire.transport.has_pending_input())
    }

    /// Bytes are waiting for the transport to become writable.
    pub fn has_backlog(&self) -> bool {
        self.wire.has_backlog()
    }

    /// Bytes waiting in the post-codec backlog.
    pub fn backlog_len(&self) -> usize {
        self.wire.backlog.len()
    }

    /// Write as much of the backlog as the transport takes.
    pub fn flush_backlog(&mut self) -> Result<()> {
        self.wire.drain(&self.name)
    }

    /// Flush the backlog, waiting for writability until `deadline`.
    ///
    /// Returns whether the backlog emptied in time.
    pub async fn drain_until(&mut self, deadline: std::time::Instant) -> Result<bool> {
        self.flush_backlog()?;
        while self.has_backlog() {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                tracing::debug!(
                    "{} still has {} bytes pending at close",
                    self.name,
                    self.backlog_len()
                );
                return Ok(false);
            }
            if tokio::time::timeout(remaining, self.writable()).await.is_ok() {
                self.flush_backlog()?;
            }
        }
        Ok(true)
    }

    /// One logical read into the input buffer.
    ///
    /// Bytes left over from a finished inbound zlib stream are delivered
    /// first, then the inflater if one is active, then the transport.
    pub fn read_into_input(&mut self) -> Result<ReadOutcome> {
        if self.input.available() == 0 {
            return Ok(ReadOutcome::WouldBlock);
        }

        if !self.carry.is_empty() {
            let n = self.carry.len().min(self.input.available());
            self.input.extend(&self.carry[..n])?;
            self.carry.advance(n);
            self.payload.record_in(n);
            return Ok(ReadOutcome::Data(n));
        }

        if let Some(inflater) = self.inflater.as_mut() {
            let wire = &mut self.wire;
            let name = self.name.as_str();
            let outcome = inflater.read(self.input.spare_mut(), |ws| wire.read(name, ws))?;
            if let ReadOutcome::Data(n) = outcome {
                let n = self.input.push(n);
                self.payload.record_in(n);
            }

            if inflater.is_finished() {
                let trailing = inflater.take_trailing();
                self.inflater = None;
                tracing::info!(
                    "{} ended mccp compression, {} trailing bytes",
                    self.name,
                    trailing.len()
                );
                self.carry.extend_from_slice(&trailing);
                if outcome == ReadOutcome::Data(0) {
                    return self.read_into_input();
                }
            }
            return Ok(outcome);
        }

        let outcome = self.wire.read(&self.name, self.input.spare_mut())?;
        if let ReadOutcome::Data(n) = outcome {
            let n = self.input.push(n);
            self.payload.record_in(n);
        }
        Ok(outcome)
    }

    /// Send payload bytes through the outbound codec.
    ///
    /// Returns the number of payload bytes accepted.
    pub fn write(&mut self, bytes: &[u8]) -> Result<usize> {
        send_payload(
            &self.name,
            &mut self.wire,
            &mut self.deflater,
            &mut self.payload,
            bytes,
        )
    }

    /// Queue bytes on the output buffer, flushing first if they do not fit.
    pub fn queue(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > self.output.available() {
            self.flush()?;
        }
        self.output.extend(bytes)
    }

    /// Queue bytes and flush them.
    pub fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.queue(bytes)?;
        self.flush()
    }

    /// Write the output buffer.
    pub fn flush(&mut self) -> Result<()> {
        if self.output.is_empty() {
            return Ok(());
        }
        let n = send_payload(
            &self.name,
            &mut self.wire,
            &mut self.deflater,
            &mut self.payload,
            self.output.as_slice(),
        )?;
        self.output.pop(n);
        Ok(())
    }

    /// Move the first `n` input bytes to `to`.
    pub fn forward_to(&mut self, to: &mut Endpoint, n: usize) -> Result<()> {
        let n = n.min(self.input.len());
        if n == 0 {
            return Ok(());
        }
        let written = to.write(&self.input.as_slice()[..n])?;
        self.input.pop(written);
        if written < n {
            return Err(ProxyError::transport(
                &to.name,
                io::Error::new(io::ErrorKind::WriteZero, "short forward"),
            ));
        }
        Ok(())
    }

    /// True while inbound bytes are being decompressed.
    pub fn is_inflating(&self) -> bool {
        self.inflater.is_some()
    }

    /// True while outbound bytes are being compressed.
    pub fn is_deflating(&self) -> bool {
        self.deflater.is_some()
    }

    /// Treat everything still in the input buffer, and all later reads, as
    /// compressed.
    pub fn start_inflate(&mut self) -> Result<()> {
        if self.inflater.is_some() {
            tracing::warn!("{} already decompressing, start ignored", self.name);
            return Ok(());
        }
        let mut inflater = Inflater::with_workspace(&self.name, self.input.capacity());
        inflater.preload(self.input.as_slice())?;
        // Counted as payload when read; their inflated form is counted later.
        self.payload.retract_in(self.input.len());
        self.input.clear();
        if !self.carry.is_empty() {
            inflater.preload(&self.carry)?;
            self.carry.clear();
        }
        self.inflater = Some(inflater);
        Ok(())
    }

    /// Drop inbound decompression state.
    pub fn stop_inflate(&mut self) {
        self.inflater = None;
    }

    /// Compress everything written from now on.
    pub fn start_deflate(&mut self) -> Result<()> {
        if self.deflater.is_some() {
            return Ok(());
        }
        self.flush()?;
        self.deflater = Some(Deflater::with_workspace(&self.name, self.output.capacity()));
        Ok(())
    }

    /// End the outbound zlib stream and go back to plain writes.
    pub fn stop_deflate(&mut self) -> Result<()> {
        if self.deflater.is_none() {
            return Ok(());
        }
        self.flush()?;
        if let Some(mut deflater) = self.deflater.take() {
            let wire = &mut self.wire;
            let name = self.name.as_str();
            deflater.finish(|out| wire.send(name, out))?;
            tracing::debug!(
                endpoint = %self.name,
                total_in = deflater.total_in(),
                total_out = deflater.total_out(),
                "outbound compression stopped"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;
    use flate2::{Compress, Compression, FlushCompress};

    fn endpoint(name: &str) -> (Endpoint, crate::transport::MemoryHandle) {
        let (transport, handle) = MemoryTransport::new();
        (Endpoint::with_capacity(name, Box::new(transport), 64), handle)
    }

    fn zlib(payload: &[u8], flush: FlushCompress) -> Vec<u8> {
        let mut c = Compress::new(Compression::best(), true);
        let mut out = vec![0u8; payload.len() + 64];
        c.compress(payload, &mut out, flush).unwrap();
        out.truncate(c.total_out() as usize);
        out
    }

    #[test]
    fn test_plain_read_counts_both_stats() {
        let (mut ep, handle) = endpoint("game");
        handle.push_read(b"hello".to_vec());
        assert_eq!(ep.read_into_input().unwrap(), ReadOutcome::Data(5));
        assert_eq!(ep.input().as_slice(), b"hello");
        assert_eq!(ep.raw_stats().bytes_in(), 5);
        assert_eq!(ep.payload_stats().bytes_in(), 5);
        assert_eq!(ep.read_into_input().unwrap(), ReadOutcome::WouldBlock);
        handle.push_eof();
        assert_eq!(ep.read_into_input().unwrap(), ReadOutcome::Closed);
    }

    #[test]
    fn test_read_error_is_transport_error() {
        let (mut ep, handle) = endpoint("game");
        handle.push_error(io::ErrorKind::ConnectionReset);
        assert!(matches!(
            ep.read_into_input(),
            Err(ProxyError::Transport { .. })
        ));
    }

    #[test]
    fn test_buffered_bytes_behind_start_marker_are_inflated() {
        let (mut ep, handle) = endpoint("game");
        let compressed = zlib(b"compressed hello", FlushCompress::Sync);
        let mut chunk = b"\xFF\xFA\x56\xFF\xF0".to_vec();
        chunk.extend_from_slice(&compressed);
        handle.push_read(chunk);

        ep.read_into_input().unwrap();
        ep.input_mut().pop(5);
        ep.start_inflate().unwrap();
        assert!(ep.input().is_empty());
        assert!(ep.pending_input());

        assert_eq!(ep.read_into_input().unwrap(), ReadOutcome::Data(16));
        assert_eq!(ep.input().as_slice(), b"compressed hello");
        // Compressed bytes read before the marker count only once inflated.
        assert_eq!(ep.payload_stats().bytes_in(), (5 + 16) as u64);
        assert_eq!(ep.raw_stats().bytes_in(), (5 + compressed.len()) as u64);
    }

    #[test]
    fn test_stream_end_returns_to_plain_reads() {
        let (mut ep, handle) = endpoint("game");
        let mut wire = zlib(b"zipped", FlushCompress::Finish);
        wire.extend_from_slice(b"plain");
        handle.push_read(wire);

        ep.start_inflate().unwrap();
        assert_eq!(ep.read_into_input().unwrap(), ReadOutcome::Data(6));
        assert!(!ep.is_inflating());
        assert!(ep.pending_input());
        assert_eq!(ep.read_into_input().unwrap(), ReadOutcome::Data(5));
        assert_eq!(ep.input().as_slice(), b"zippedplain");
    }

    #[test]
    fn test_blocked_writes_go_to_backlog_in_order() {
        let (mut ep, handle) = endpoint("client");
        handle.set_write_limit(Some(3));
        ep.write(b"abcdef").unwrap();
        assert_eq!(handle.written(), b"abc");
        assert!(ep.has_backlog());

        ep.write(b"gh").unwrap();
        assert_eq!(handle.written(), b"abc");

        handle.set_write_limit(None);
        ep.flush_backlog().unwrap();
        assert_eq!(handle.written(), b"abcdefgh");
        assert!(!ep.has_backlog());
        assert_eq!(ep.raw_stats().bytes_out(), 8);
        assert_eq!(ep.payload_stats().bytes_out(), 8);
    }

    #[test]
    fn test_backlog_limit_is_backpressure() {
        let (mut ep, handle) = endpoint("client");
        ep.set_max_backlog(4);
        handle.set_write_limit(Some(0));
        let err = ep.write(b"too much data").unwrap_err();
        assert!(matches!(err, ProxyError::Backpressure { pending: 13, .. }));
    }

    #[test]
    fn test_write_failure_is_transport_error() {
        let (mut ep, handle) = endpoint("client");
        handle.fail_writes(io::ErrorKind::BrokenPipe);
        assert!(matches!(
            ep.send(b"x"),
            Err(ProxyError::Transport { .. })
        ));
    }

    #[test]
    fn test_inflated_burst_larger_than_input_is_delivered() {
        let (mut ep, handle) = endpoint("game");
        let payload: Vec<u8> = b"ab".iter().copied().cycle().take(2000).collect();
        handle.push_read(zlib(&payload, FlushCompress::Sync));
        ep.start_inflate().unwrap();

        let mut restored = Vec::new();
        loop {
            match ep.read_into_input().unwrap() {
                ReadOutcome::Data(_) => {
                    restored.extend_from_slice(ep.input().as_slice());
                    let n = ep.input().len();
                    ep.input_mut().pop(n);
                },
                ReadOutcome::WouldBlock => break,
                ReadOutcome::Closed => panic!("unexpected close"),
            }
            if restored.len() < payload.len() {
                assert!(ep.pending_input(), "stalled at {}", restored.len());
            }
        }
        assert_eq!(restored, payload);
        assert_eq!(ep.payload_stats().bytes_in(), payload.len() as u64);
    }

    #[test]
    fn test_compressed_backlog_limit_is_backpressure() {
        use rand_chacha::rand_core::{RngCore, SeedableRng};

        let (mut ep, handle) = endpoint("client");
        ep.set_max_backlog(100);
        ep.start_deflate().unwrap();
        handle.set_write_limit(Some(0));

        let mut noise = vec![0u8; 128];
        rand_chacha::ChaCha8Rng::seed_from_u64(7).fill_bytes(&mut noise);
        let err = ep.write(&noise).unwrap_err();
        assert!(matches!(err, ProxyError::Backpressure { .. }));
    }

    #[test]
    fn test_compressed_write_failure_is_transport_error() {
        let (mut ep, handle) = endpoint("client");
        ep.start_deflate().unwrap();
        handle.fail_writes(io::ErrorKind::BrokenPipe);
        assert!(matches!(
            ep.write(&[b'x'; 128]),
            Err(ProxyError::Transport { .. })
        ));
        assert!(ep.write(b"more").is_err());
    }

    #[test]
    fn test_deflate_toggle() {
        use flate2::{Decompress, FlushDecompress, Status};

        let (mut ep, handle) = endpoint("client");
        ep.start_deflate().unwrap();
        ep.write(b"squeezed").unwrap();
        ep.stop_deflate().unwrap();
        ep.write(b"plain").unwrap();

        let written = handle.written();
        let mut d = Decompress::new(true);
        let mut out = [0u8; 64];
        let status = d
            .decompress(&written, &mut out, FlushDecompress::Finish)
            .unwrap();
        assert_eq!(status, Status::StreamEnd);
        assert_eq!(&out[..d.total_out() as usize], b"squeezed");
        assert_eq!(&written[d.total_in() as usize..], b"plain");
        assert_eq!(ep.payload_stats().bytes_out(), 13);
        assert!(ep.raw_stats().bytes_out() > 5);
    }
}
