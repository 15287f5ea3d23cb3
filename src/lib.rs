//! # MUDitM - MUD in the Middle
//!
//! Telnet intercepting proxy for MUD games. It sits between a MUD client and
//! a game server, terminates TLS on either side independently, answers a
//! fixed set of telnet negotiations on the client's behalf and terminates
//! MCCP2 compression per side, while passing everything else through
//! untouched.
//!
//! ## Architecture
//!
//! ```text
//!  MUD client                     MUDitM                          MUD server
//!      |                            |                                 |
//!      |<------ IAC WILL MCCP2 -----|                                 |
//!      |------- IAC DO MCCP2 ------>|                                 |
//!      |<- IAC SB MCCP2 IAC SE -----|                                 |
//!      |<===== zlib(payload) =======|<========= payload ==============|
//!      |                            |<-- IAC SB NEW-ENVIRON SEND .. --|
//!      |                            |--- PROXY_NAME, IPADDRESS ------>|
//!      |                            |<------ IAC WILL MCCP2 ----------|
//!      |                            |------- IAC DO MCCP2 ----------->|
//!      |<======== payload ==========|<======= zlib(payload) =========|
//! ```
//!
//! ## Data plane
//!
//! | Layer        | Module        | Role                                        |
//! |--------------|---------------|---------------------------------------------|
//! | Buffer       | [`buffer`]    | fixed-capacity staging for reads and matches|
//! | Matcher      | [`pattern`]   | literal alternation with partial matches    |
//! | Codec        | [`codec`]     | MCCP2 inflate / deflate slots               |
//! | Negotiation  | [`protocol`]  | telnet constants, actions, pattern tables   |
//! | Transport    | [`transport`] | non-blocking TCP / TLS byte channels        |
//! | Engine       | [`proxy`]     | endpoints, dispatch loop, listener          |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use muditm::{Config, ProxyServer};
//!
//! let config = Config::load(None)?;
//! ProxyServer::new(config)?.run().await?;
//! ```
//!
//! ### Driving an engine directly
//!
//! ```rust,ignore
//! use muditm::proxy::{Endpoint, ProxyEngine, SessionConfig};
//! use muditm::protocol::rules::install_rules;
//! use muditm::transport::TcpTransport;
//!
//! let session = SessionConfig::default();
//! let mut client = Endpoint::new("Client", Box::new(TcpTransport::new(client_stream)));
//! let mut game = Endpoint::new("Game", Box::new(TcpTransport::new(game_stream)));
//! install_rules(&mut client, &mut game, &session)?;
//!
//! let mut engine = ProxyEngine::new(client, game, session);
//! let end = engine.run().await?;
//! ```
//!
//! ## Modules
//!
//! - [`buffer`]: Fixed-capacity byte buffer
//! - [`pattern`]: Pattern sets and the alternation matcher
//! - [`codec`]: Streaming zlib wrappers
//! - [`protocol`]: Telnet negotiation handling
//! - [`transport`]: Transport trait, TCP, TLS and in-memory transports
//! - [`proxy`]: Endpoints, dispatch, engine and listener
//! - [`config`]: Configuration management
//! - [`error`]: Error types and result aliases

pub mod buffer;
pub mod codec;
pub mod config;
pub mod error;
pub mod pattern;
pub mod protocol;
pub mod proxy;
pub mod transport;

// Re-exports for convenience
pub use buffer::Buffer;
pub use config::Config;
pub use error::{ProxyError, Result};
pub use pattern::{MatchOutcome, PatternSet};
pub use protocol::CompressionPolicy;
pub use proxy::{
    Action, Dispatch, Disposition, Endpoint, ProxyEngine, ProxyServer, SessionConfig, SessionEnd,
};
pub use transport::{Security, TcpTransport, TlsTransport, Transport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Short product name.
pub const SHORT_NAME: &str = "MUDitM";

/// Long product name.
pub const LONG_NAME: &str = "MUD in the Middle";

/// Protocol major version reported to games.
pub const MAJOR_VERSION: u32 = 1;

/// Protocol minor version reported to games.
pub const MINOR_VERSION: u32 = 0;

/// Name reported as `PROXY_NAME`, e.g. `MUDitM-1.0`.
pub fn proxy_name() -> String {
    format!("{}-{}.{}", SHORT_NAME, MAJOR_VERSION, MINOR_VERSION)
}
