//! Outbound zlib compressor.

use flate2::{Compress, Compression, FlushCompress, Status};

use crate::error::{ProxyError, Result};

/// Streaming compressor for one outbound direction.
///
/// Every pass ends on a sync flush, so the peer can decode everything
/// written so far without waiting for more.
///
/// Once a sink call fails, zlib has already taken that pass's input and the
/// stream cannot be resumed: the failure is kept for
/// [`take_error`](Self::take_error) and later writes are refused.
pub struct Deflater {
    endpoint: String,
    compress: Compress,
    workspace: Vec<u8>,
    passes: u64,
    broken: bool,
    error: Option<ProxyError>,
}

impl Deflater {
    /// Best-compression zlib stream with the default workspace.
    pub fn new(endpoint: &str) -> Self {
        Self::with_workspace(endpoint, super::DEFAULT_WORKSPACE)
    }

    /// Compressor with a workspace of `size` bytes.
    pub fn with_workspace(endpoint: &str, size: usize) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            compress: Compress::new(Compression::best(), true),
            workspace: vec![0; size.max(1)],
            passes: 0,
            broken: false,
            error: None,
        }
    }

    /// Compress passes run since creation.
    pub fn passes(&self) -> u64 {
        self.passes
    }

    /// Uncompressed bytes accepted so far.
    pub fn total_in(&self) -> u64 {
        self.compress.total_in()
    }

    /// Compressed bytes produced so far.
    pub fn total_out(&self) -> u64 {
        self.compress.total_out()
    }

    /// True once a sink failure left the stream unusable.
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// The sink failure swallowed by a partial [`write`](Self::write).
    pub fn take_error(&mut self) -> Option<ProxyError> {
        self.error.take()
    }

    /// Compress `input`, handing each pass's output to `sink`.
    ///
    /// A pass takes at most one workspace of input. Passes repeat while input
    /// remains or the previous pass filled the workspace. Returns the number
    /// of input bytes whose compressed form reached `sink`. If `sink` fails
    /// after an earlier pass was delivered, that count is returned and the
    /// error is kept for [`take_error`](Self::take_error); a failure before
    /// anything was delivered is returned as is.
    pub fn write<F>(&mut self, input: &[u8], mut sink: F) -> Result<usize>
    where
        F: FnMut(&[u8]) -> Result<()>,
    {
        if self.broken {
            return Err(ProxyError::codec(
                &self.endpoint,
                "compressed stream broken by an earlier failed write",
            ));
        }

        let workspace_len = self.workspace.len();
        let mut consumed_total = 0usize;

        loop {
            let remaining = &input[consumed_total..];
            let take = remaining.len().min(workspace_len);

            let before_in = self.compress.total_in();
            let before_out = self.compress.total_out();
            let status = self
                .compress
                .compress(&remaining[..take], &mut self.workspace, FlushCompress::Sync)
                .map_err(|e| ProxyError::codec(&self.endpoint, e.to_string()))?;
            let consumed = (self.compress.total_in() - before_in) as usize;
            let produced = (self.compress.total_out() - before_out) as usize;
            self.passes += 1;

            tracing::debug!(
                endpoint = %self.endpoint,
                consumed,
                produced,
                ?status,
                "deflate pass"
            );

            if produced > 0 {
                if let Err(err) = sink(&self.workspace[..produced]) {
                    self.broken = true;
                    if consumed_total > 0 {
                        self.error = Some(err);
                        return Ok(consumed_total);
                    }
                    return Err(err);
                }
            }
            consumed_total += consumed;

            if consumed == 0 && produced == 0 {
                break;
            }
            if consumed_total == input.len() && produced < workspace_len {
                break;
            }
            if status == Status::StreamEnd {
                break;
            }
        }

        Ok(consumed_total)
    }

    /// End the zlib stream, handing the trailer to `sink`.
    pub fn finish<F>(&mut self, mut sink: F) -> Result<()>
    where
        F: FnMut(&[u8]) -> Result<()>,
    {
        loop {
            let before_out = self.compress.total_out();
            let status = self
                .compress
                .compress(&[], &mut self.workspace, FlushCompress::Finish)
                .map_err(|e| ProxyError::codec(&self.endpoint, e.to_string()))?;
            let produced = (self.compress.total_out() - before_out) as usize;
            if produced > 0 {
                sink(&self.workspace[..produced])?;
            }
            match status {
                Status::StreamEnd => return Ok(()),
                Status::Ok | Status::BufError if produced > 0 => continue,
                Status::Ok | Status::BufError => {
                    return Err(ProxyError::codec(
                        &self.endpoint,
                        "compressor stalled while finishing",
                    ))
                },
            }
        }
    }
}

impl std::fmt::Debug for Deflater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deflater")
            .field("endpoint", &self.endpoint)
            .field("workspace", &self.workspace.len())
            .field("total_in", &self.total_in())
            .field("total_out", &self.total_out())
            .field("passes", &self.passes)
            .finish()
    }
}
