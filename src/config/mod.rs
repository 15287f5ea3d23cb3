//! Configuration management.
//!
//! Supports configuration from:
//! - TOML config files
//! - Environment variables
//! - CLI arguments (applied by the binary)
//!
//! # Example
//!
//! ```toml
//! [proxy]
//! listen = 4143
//! newenv_ipaddress = ["IPADDRESS"]
//! proxy_header = false
//!
//! [client]
//! security = "tls"
//! compression = "enable"
//!
//! [[client.rewrite]]
//! match = "\u0007"
//!
//! [game]
//! host = "mud.example.org"
//! service = "4000"
//! compression = "enable"
//!
//! [tls]
//! cert = "/etc/muditm/cert.pem"
//! key = "/etc/muditm/key.pem"
//! ```
//!
//! # Lookup order
//!
//! 1. explicit path (`--config`)
//! 2. `$MUDITM_CONFIG`
//! 3. `<config dir>/muditm/muditm.toml`
//! 4. `/etc/muditm.toml`
//! 5. built-in defaults

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ProxyError, Result};
use crate::protocol::rules::RewriteRule;
use crate::protocol::CompressionPolicy;
use crate::proxy::{SessionConfig, DEFAULT_MAX_BACKLOG};
use crate::transport::{Security, TlsConfig};

/// System-wide config file.
pub const SYSTEM_CONFIG: &str = "/etc/muditm.toml";

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Listener and session settings
    #[serde(default)]
    pub proxy: ProxyConfig,

    /// Client side
    #[serde(default)]
    pub client: ClientConfig,

    /// Game side
    #[serde(default)]
    pub game: GameConfig,

    /// Certificates
    #[serde(default)]
    pub tls: TlsConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProxyError::Config(format!("Failed to read config file {:?}: {e}", path))
        })?;

        toml::from_str(&content)
            .map_err(|e| ProxyError::Config(format!("Failed to parse config {:?}: {e}", path)))
    }

    /// First existing config file in lookup order.
    pub fn locate(explicit: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(path.to_path_buf());
        }
        if let Ok(path) = std::env::var("MUDITM_CONFIG") {
            return Some(PathBuf::from(path));
        }
        let user = dirs::config_dir().map(|dir| dir.join("muditm").join("muditm.toml"));
        user.into_iter()
            .chain(std::iter::once(PathBuf::from(SYSTEM_CONFIG)))
            .find(|path| path.is_file())
    }

    /// Load from the lookup order, then apply environment overrides.
    ///
    /// An explicit or `$MUDITM_CONFIG` path must exist; the default
    /// locations are optional.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let config = match Self::locate(explicit) {
            Some(path) => {
                tracing::debug!("Loading config from {:?}", path);
                Self::from_file(path)?
            },
            None => Self::default(),
        };
        let config = config.with_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply `MUDITM_LISTEN`, `MUDITM_GAME_HOST` and `MUDITM_GAME_SERVICE`.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(port) = std::env::var("MUDITM_LISTEN") {
            match port.parse() {
                Ok(port) => self.proxy.listen = port,
                Err(_) => tracing::warn!("Ignoring invalid MUDITM_LISTEN={}", port),
            }
        }
        if let Ok(host) = std::env::var("MUDITM_GAME_HOST") {
            self.game.host = host;
        }
        if let Ok(service) = std::env::var("MUDITM_GAME_SERVICE") {
            self.game.service = service;
        }
        self
    }

    /// Reject settings that cannot work.
    pub fn validate(&self) -> Result<()> {
        if self.proxy.tick_ms == 0 {
            return Err(ProxyError::Config("proxy.tick_ms must be > 0".to_string()));
        }
        if !(0.0..=1.0).contains(&self.proxy.stats_weight) {
            return Err(ProxyError::Config(format!(
                "proxy.stats_weight must be within 0..=1, got {}",
                self.proxy.stats_weight
            )));
        }
        if self.proxy.max_backlog == 0 {
            return Err(ProxyError::Config(
                "proxy.max_backlog must be > 0".to_string(),
            ));
        }
        if self.game.host.is_empty() || self.game.service.is_empty() {
            return Err(ProxyError::Config(
                "game.host and game.service are required".to_string(),
            ));
        }
        for rule in self.client.rewrite.iter().chain(&self.game.rewrite) {
            if rule.pattern.is_empty() {
                return Err(ProxyError::Config(
                    "rewrite rules need a non-empty match".to_string(),
                ));
            }
        }
        if self.needs_server_tls() {
            self.tls.cert_source()?;
        }
        Ok(())
    }

    /// True when clients connect over TLS.
    pub fn needs_server_tls(&self) -> bool {
        self.client.security == Security::Tls
    }

    /// Address the listener binds to.
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self.proxy.bind.parse().map_err(|e| {
            ProxyError::Config(format!("Invalid bind address {}: {e}", self.proxy.bind))
        })?;
        Ok(SocketAddr::new(ip, self.proxy.listen))
    }

    /// Settings handed to every session.
    pub fn to_session_config(&self, proxy_name: impl Into<String>) -> SessionConfig {
        SessionConfig {
            proxy_name: proxy_name.into(),
            environ_vars: self.proxy.newenv_ipaddress.clone(),
            client_compression: self.client.compression,
            game_compression: self.game.compression,
            client_rewrites: self.client.rewrite.clone(),
            game_rewrites: self.game.rewrite.clone(),
            tick: self.proxy.tick(),
        }
    }

    /// Effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| ProxyError::Config(format!("Failed to serialize config: {e}")))
    }
}

/// `[proxy]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Port to listen on
    pub listen: u16,

    /// Address to bind to
    pub bind: String,

    /// Append logs to this file instead of stderr
    pub log_file: Option<PathBuf>,

    /// Emit JSON log lines
    pub log_json: bool,

    /// Send a PROXY protocol v1 line to the game before any data
    pub proxy_header: bool,

    /// NEW-ENVIRON variables reported with the client address
    pub newenv_ipaddress: Vec<String>,

    /// Readiness wait bound in milliseconds
    pub tick_ms: u64,

    /// Seconds between rate checkpoints
    pub stats_interval_secs: u64,

    /// Weight of the newest sample in the rate average
    pub stats_weight: f64,

    /// Bytes a slow peer may fall behind before the session is dropped
    pub max_backlog: usize,

    /// Serve a single connection, then exit
    pub once: bool,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen: 4143,
            bind: "::".to_string(),
            log_file: None,
            log_json: false,
            proxy_header: false,
            newenv_ipaddress: Vec::new(),
            tick_ms: 1000,
            stats_interval_secs: 60,
            stats_weight: 0.5,
            max_backlog: DEFAULT_MAX_BACKLOG,
            once: false,
        }
    }
}

impl ProxyConfig {
    /// Readiness wait bound.
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    /// Rate checkpoint interval.
    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs.max(1))
    }
}

/// `[client]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Transport security towards the client
    pub security: Security,

    /// MCCP handling towards the client
    pub compression: CompressionPolicy,

    /// Literal rewrites applied to what the client sends
    pub rewrite: Vec<RewriteRule>,
}

/// `[game]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    /// Game host name or address
    pub host: String,

    /// Game port or service name
    pub service: String,

    /// Transport security towards the game
    pub security: Security,

    /// MCCP handling towards the game
    pub compression: CompressionPolicy,

    /// Literal rewrites applied to what the game sends
    pub rewrite: Vec<RewriteRule>,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            host: "::1".to_string(),
            service: "4000".to_string(),
            security: Security::None,
            compression: CompressionPolicy::Enable,
            rewrite: Vec::new(),
        }
    }
}

impl GameConfig {
    /// `host:port` string for resolution; bare IPv6 hosts are bracketed.
    pub fn target(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.service)
        } else {
            format!("{}:{}", self.host, self.service)
        }
    }
}
