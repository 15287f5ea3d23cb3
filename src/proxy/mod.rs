//! Telnet intercepting proxy: endpoints, dispatch loop and listener.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────┐        ┌───────────────────────────────────────┐        ┌────────────┐
//! │ MUD client │◀──────▶│ client Endpoint ◀─ ProxyEngine ─▶ game │◀──────▶│ MUD server │
//! └────────────┘  TLS?  │   patterns ─▶ Actions ◀─ patterns      │  TLS?  └────────────┘
//!                 MCCP2 └───────────────────────────────────────┘  MCCP2
//! ```
//!
//! - [`ProxyServer`] accepts clients, connects to the game, sets up TLS on
//!   either side and runs one [`ProxyEngine`] per connection on its own
//!   tokio task.
//! - [`ProxyEngine`] waits for readiness and moves bytes between the two
//!   [`Endpoint`]s.
//! - [`pump`] matches each endpoint's input against its patterns and runs
//!   the bound [`Action`]s.
//!
//! # Usage
//!
//! ```rust,ignore
//! use muditm::config::Config;
//! use muditm::proxy::ProxyServer;
//!
//! let server = ProxyServer::new(Config::load(None)?)?;
//! server.run().await?;
//! ```

mod dispatch;
mod endpoint;
mod engine;
mod server;
mod stats;

use std::time::Duration;

pub use dispatch::{pump, Action, Dispatch, Disposition};
pub use endpoint::{Endpoint, DEFAULT_MAX_BACKLOG};
pub use engine::{ProxyEngine, SessionEnd};
pub use server::{
    proxy_header_v1, unmap, EndpointReport, ProxyServer, SessionOutcome, SessionReport,
    CONNECT_FAILED,
};
pub use stats::{unit_seconds, unit_value, IoStats, StatsSummary};

use crate::protocol::rules::RewriteRule;
use crate::protocol::CompressionPolicy;

/// Read-only settings shared by the actions of one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Name reported as `PROXY_NAME` in NEW-ENVIRON replies.
    pub proxy_name: String,
    /// Variables reported to the game with the client's address.
    pub environ_vars: Vec<String>,
    /// MCCP policy towards the client.
    pub client_compression: CompressionPolicy,
    /// MCCP policy towards the game.
    pub game_compression: CompressionPolicy,
    /// Literal rewrites applied to client input.
    pub client_rewrites: Vec<RewriteRule>,
    /// Literal rewrites applied to game output.
    pub game_rewrites: Vec<RewriteRule>,
    /// Upper bound on one readiness wait.
    pub tick: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            proxy_name: crate::proxy_name(),
            environ_vars: Vec::new(),
            client_compression: CompressionPolicy::default(),
            game_compression: CompressionPolicy::default(),
            client_rewrites: Vec::new(),
            game_rewrites: Vec::new(),
            tick: Duration::from_millis(1000),
        }
    }
}
