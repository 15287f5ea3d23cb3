//! Telnet negotiation handled by the proxy.
//!
//! The proxy is not a telnet implementation. It answers a fixed set of
//! option-negotiation sequences on behalf of one side and passes everything
//! else through untouched.
//!
//! # Options
//!
//! | Option      | Code | Handling                                         |
//! |-------------|------|--------------------------------------------------|
//! | NEW-ENVIRON | 39   | game requests answered with proxy and peer info  |
//! | MCCP1       | 85   | refused or ignored                               |
//! | MCCP2       | 86   | terminated on each side independently            |
//! | MCCP3       | 87   | refused or ignored                               |
//!
//! # Sequences
//!
//! ```text
//! IAC WILL opt            255 251 opt
//! IAC DO   opt            255 253 opt
//! IAC SB   opt ... IAC SE 255 250 opt ... 255 240
//! ```
//!
//! The [`actions`] module holds the handlers, [`rules`] decides which
//! patterns each endpoint gets for its [`CompressionPolicy`].

pub mod actions;
pub mod environ;
pub mod mccp;
pub mod rules;

use serde::{Deserialize, Serialize};

/// Interpret As Command.
pub const IAC: u8 = 255;
/// Refuse or stop an option on the peer.
pub const DONT: u8 = 254;
/// Ask the peer to enable an option.
pub const DO: u8 = 253;
/// Refuse or stop an option locally.
pub const WONT: u8 = 252;
/// Offer to enable an option locally.
pub const WILL: u8 = 251;
/// Subnegotiation begin.
pub const SB: u8 = 250;
/// Subnegotiation end.
pub const SE: u8 = 240;

/// RFC 1572 environment option.
pub const NEW_ENVIRON: u8 = 39;
/// MUD Client Compression Protocol v1.
pub const MCCP1: u8 = 85;
/// MUD Client Compression Protocol v2.
pub const MCCP2: u8 = 86;
/// MUD Client Compression Protocol v3.
pub const MCCP3: u8 = 87;

/// Three-byte `IAC <verb> <option>` command.
pub const fn command(verb: u8, option: u8) -> [u8; 3] {
    [IAC, verb, option]
}

/// Empty subnegotiation `IAC SB <option> IAC SE`.
pub const fn empty_subnegotiation(option: u8) -> [u8; 5] {
    [IAC, SB, option, IAC, SE]
}

/// What a peer said about NEW-ENVIRON.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NegotiationState {
    /// Nothing seen yet.
    #[default]
    None,
    /// The peer sent `DO NEW-ENVIRON`.
    Do,
    /// The peer sent `WONT NEW-ENVIRON`.
    Wont,
}

/// How MCCP is treated on one side of the proxy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionPolicy {
    /// Pass negotiation through; stop matching once compression starts.
    Ignore,
    /// Refuse compression on this side.
    Disable,
    /// Terminate compression at the proxy (default).
    #[default]
    Enable,
}

impl CompressionPolicy {
    /// Lowercase name as used in configuration.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ignore => "ignore",
            Self::Disable => "disable",
            Self::Enable => "enable",
        }
    }
}

impl std::fmt::Display for CompressionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for CompressionPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ignore" => Ok(Self::Ignore),
            "disable" | "off" => Ok(Self::Disable),
            "enable" | "on" => Ok(Self::Enable),
            _ => Err(format!("Unknown compression policy: {}", s)),
        }
    }
}
