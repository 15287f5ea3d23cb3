//! MUDitM error types.
//!
//! # Error Classification
//!
//! Errors are split by how the session reacts to them:
//!
//! - **Session fatal**: transport failures, codec failures, backpressure and
//!   handler contract violations end the session. The engine never retries.
//! - **Setup**: configuration, TLS and pattern compilation errors happen
//!   before the dispatch loop starts and abort the connection attempt.
//!
//! Peer EOF and would-block are *not* errors; the engine reports them as
//! [`SessionEnd`](crate::proxy::SessionEnd) and a skipped read respectively.

use std::io;

use thiserror::Error;

/// MUDitM proxy errors.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// Hard read or write failure on an endpoint transport.
    #[error("Transport error on {endpoint}: {source}")]
    Transport {
        /// Endpoint name.
        endpoint: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Malformed compressed stream or compressor failure.
    #[error("Codec error on {endpoint}: {message}")]
    Codec {
        /// Endpoint name.
        endpoint: String,
        /// Diagnostic from the codec.
        message: String,
    },

    /// A write was larger than the space left in a fixed buffer.
    #[error("Buffer overflow: {requested} bytes requested, {available} available")]
    BufferOverflow {
        /// Bytes the caller tried to write.
        requested: usize,
        /// Bytes the buffer could still take.
        available: usize,
    },

    /// An action reported the match as consumed but left it in the buffer.
    #[error("Action '{action}' on {endpoint} claimed a match it did not consume")]
    HandlerContract {
        /// Action name.
        action: &'static str,
        /// Endpoint whose input was being dispatched.
        endpoint: String,
    },

    /// The peer stopped accepting bytes and the write backlog filled up.
    #[error("Backpressure on {endpoint}: {pending} bytes waiting to be written")]
    Backpressure {
        /// Endpoint name.
        endpoint: String,
        /// Bytes held in the backlog.
        pending: usize,
    },

    /// Pattern set could not be compiled.
    #[error("Pattern error: {0}")]
    Pattern(String),

    /// TLS setup or session failure.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),

    /// Connection setup failure (resolve, connect, accept).
    #[error("Network error: {0}")]
    Network(String),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error outside an endpoint.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Result type alias for MUDitM operations
pub type Result<T> = std::result::Result<T, ProxyError>;

impl ProxyError {
    /// Wrap an I/O error raised by the named endpoint's transport.
    pub fn transport(endpoint: &str, source: io::Error) -> Self {
        ProxyError::Transport {
            endpoint: endpoint.to_string(),
            source,
        }
    }

    /// Build a codec error for the named endpoint.
    pub fn codec(endpoint: &str, message: impl Into<String>) -> Self {
        ProxyError::Codec {
            endpoint: endpoint.to_string(),
            message: message.into(),
        }
    }
}

impl From<toml::de::Error> for ProxyError {
    fn from(err: toml::de::Error) -> Self {
        ProxyError::Config(err.to_string())
    }
}

impl From<regex::Error> for ProxyError {
    fn from(err: regex::Error) -> Self {
        ProxyError::Pattern(err.to_string())
    }
}

impl From<rustls::Error> for ProxyError {
    fn from(err: rustls::Error) -> Self {
        ProxyError::Tls(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_display() {
        let err = ProxyError::transport(
            "Client",
            io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer"),
        );
        assert_eq!(err.to_string(), "Transport error on Client: reset by peer");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_overflow_display() {
        let err = ProxyError::BufferOverflow {
            requested: 10,
            available: 3,
        };
        assert!(err.to_string().contains("10 bytes requested"));
    }
}
