//! Listener and per-connection session supervisor.
//!
//! # Connection lifecycle
//!
//! ```text
//! accept ─▶ TLS accept? ─▶ connect game (each resolved address) ─▶ TLS connect?
//!        ─▶ PROXY header? ─▶ install patterns ─▶ offer MCCP2 to client
//!        ─▶ ProxyEngine::run (rate checkpoints every stats interval)
//!        ─▶ drain backlogs ─▶ SessionReport ─▶ reporter task
//! ```
//!
//! Every connection runs on its own tokio task inside a `session` span
//! carrying a random id and the client address, so log lines from
//! concurrent sessions stay apart.
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

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{ProxyError, Result};
use crate::protocol::mccp::offer_compression;
use crate::protocol::rules::install_rules;
use crate::transport::{Security, TcpTransport, TlsConfig, TlsTransport, Transport};

use super::endpoint::Endpoint;
use super::engine::{ProxyEngine, SessionEnd};
use super::stats::{IoStats, StatsSummary};
use super::SessionConfig;

/// Line sent to the client when the game cannot be reached.
pub const CONNECT_FAILED: &[u8] = b"Couldn't connect to server!\r\n";

/// How long backlogs may drain once a session has ended.
const DRAIN_LIMIT: Duration = Duration::from_secs(2);

/// How a session finished.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionOutcome {
    /// One side closed its connection.
    PeerClosed {
        /// Endpoint that closed.
        endpoint: String,
    },
    /// The session ran and then failed.
    Failed {
        /// Error text.
        error: String,
    },
    /// The session never reached the dispatch loop.
    SetupFailed {
        /// Error text.
        error: String,
    },
}

/// Counters for one endpoint at session end.
#[derive(Debug, Clone, Serialize)]
pub struct EndpointReport {
    /// Endpoint name.
    pub name: String,
    /// Transport kind.
    pub transport: String,
    /// Bytes on the wire.
    pub raw: StatsSummary,
    /// Bytes before compression / after decompression.
    pub payload: StatsSummary,
    /// Inbound saving in percent, when the inbound side was compressed.
    pub ratio_in: Option<f64>,
    /// Outbound saving in percent, when the outbound side was compressed.
    pub ratio_out: Option<f64>,
    #[serde(skip)]
    raw_human: String,
    #[serde(skip)]
    payload_human: String,
}

/// Percent saved by compression, `None` when nothing was compressed.
fn compression_ratio(raw: u64, payload: u64) -> Option<f64> {
    if payload == 0 || raw == payload {
        return None;
    }
    Some(100.0 * (1.0 - raw as f64 / payload as f64))
}

impl EndpointReport {
    /// Snapshot an endpoint's statistics.
    pub fn from_endpoint(endpoint: &Endpoint) -> Self {
        Self::from_stats(
            endpoint.name(),
            endpoint.transport_name(),
            endpoint.raw_stats(),
            endpoint.payload_stats(),
        )
    }

    fn from_stats(name: &str, transport: &str, raw: &IoStats, payload: &IoStats) -> Self {
        Self {
            name: name.to_string(),
            transport: transport.to_string(),
            raw: raw.summary(),
            payload: payload.summary(),
            ratio_in: compression_ratio(raw.bytes_in(), payload.bytes_in()),
            ratio_out: compression_ratio(raw.bytes_out(), payload.bytes_out()),
            raw_human: raw.human(),
            payload_human: payload.human(),
        }
    }

    fn log(&self) {
        tracing::info!("{} sock {}", self.name, self.raw_human);
        tracing::debug!("{} mccp {}", self.name, self.payload_human);

        if self.ratio_in.is_none() && self.ratio_out.is_none() {
            return;
        }
        let mut line = format!("{} compression ratio ", self.name);
        if let Some(ratio) = self.ratio_in {
            line.push_str(&format!("{:3.2}% in ", ratio));
        }
        if let Some(ratio) = self.ratio_out {
            line.push_str(&format!("{:3.2}% out", ratio));
        }
        tracing::info!("{}", line.trim_end());
    }
}

/// Summary of a finished session, sent to the reporter task.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    /// Session id, as in the log span.
    pub id: String,
    /// Client address.
    pub peer: String,
    /// Accept time.
    pub started_at: DateTime<Utc>,
    /// End time.
    pub ended_at: DateTime<Utc>,
    /// Wall-clock duration.
    pub duration_secs: f64,
    /// How it ended.
    pub outcome: SessionOutcome,
    /// Client side counters.
    pub client: Option<EndpointReport>,
    /// Game side counters.
    pub game: Option<EndpointReport>,
}

impl SessionReport {
    fn new(id: Uuid, peer: SocketAddr, started_at: DateTime<Utc>, outcome: SessionOutcome) -> Self {
        let ended_at = Utc::now();
        let duration_secs = (ended_at - started_at)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        Self {
            id: id.to_string(),
            peer: peer.to_string(),
            started_at,
            ended_at,
            duration_secs,
            outcome,
            client: None,
            game: None,
        }
    }

    /// Write the report to the log.
    pub fn log(&self) {
        match &self.outcome {
            SessionOutcome::PeerClosed { endpoint } => {
                tracing::info!(
                    session = %self.id,
                    "Session from {} closed by {} after {}",
                    self.peer,
                    endpoint,
                    super::unit_seconds(self.duration_secs)
                );
            },
            SessionOutcome::Failed { error } => {
                tracing::warn!(session = %self.id, "Proxy ended abnormally: {}", error);
            },
            SessionOutcome::SetupFailed { error } => {
                tracing::warn!(session = %self.id, "Session setup failed: {}", error);
            },
        }
        for endpoint in self.client.iter().chain(self.game.iter()) {
            endpoint.log();
        }
        if tracing::enabled!(tracing::Level::DEBUG) {
            match serde_json::to_string(self) {
                Ok(json) => tracing::debug!("report {}", json),
                Err(e) => tracing::debug!("report not serializable: {}", e),
            }
        }
    }
}

/// Format a PROXY protocol v1 header for a connection from `source` to
/// `destination`. IPv4-mapped IPv6 addresses are reported as IPv4.
pub fn proxy_header_v1(source: SocketAddr, destination: SocketAddr) -> String {
    let src = unmap(source.ip());
    let dst = unmap(destination.ip());
    let (family, src, dst) = match (src, dst) {
        (IpAddr::V4(_), IpAddr::V4(_)) => ("TCP4", src, dst),
        _ => ("TCP6", to_v6(src), to_v6(dst)),
    };
    format!(
        "PROXY {} {} {} {} {}\r\n",
        family,
        src,
        dst,
        source.port(),
        destination.port()
    )
}

/// Drop the `::ffff:` prefix of IPv4-mapped addresses.
pub fn unmap(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map_or(ip, IpAddr::V4),
        IpAddr::V4(_) => ip,
    }
}

fn to_v6(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V4(v4) => IpAddr::V6(v4.to_ipv6_mapped()),
        IpAddr::V6(_) => ip,
    }
}

/// Settings shared by all session tasks.
struct Shared {
    config: Config,
    session: SessionConfig,
    server_tls: Option<Arc<rustls::ServerConfig>>,
    client_tls: Option<Arc<rustls::ClientConfig>>,
}

/// MUDitM listener.
#[derive(Clone)]
pub struct ProxyServer {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for ProxyServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyServer")
            .field("config", &self.shared.config)
            .field("server_tls", &self.shared.server_tls.is_some())
            .field("client_tls", &self.shared.client_tls.is_some())
            .finish()
    }
}

impl ProxyServer {
    /// Validate `config` and prepare TLS material.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let server_tls = match config.client.security {
            Security::Tls => Some(config.tls.server_config()?),
            Security::None => None,
        };
        let client_tls = match config.game.security {
            Security::Tls => Some(TlsConfig::client_config()),
            Security::None => None,
        };
        let session = config.to_session_config(crate::proxy_name());

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                session,
                server_tls,
                client_tls,
            }),
        })
    }

    /// Effective configuration.
    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// Bind the configured listen address.
    pub async fn bind(&self) -> Result<TcpListener> {
        let addr = self.shared.config.listen_addr()?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ProxyError::Network(format!("Failed to bind {}: {}", addr, e)))?;
        tracing::info!("Listening on {}", addr);
        Ok(listener)
    }

    /// Bind and serve until the listener fails (or after one session in
    /// `once` mode).
    pub async fn run(&self) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Serve an already bound listener, logging session reports.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let (tx, rx) = mpsc::unbounded_channel();
        let reporter = tokio::spawn(log_reports(rx));
        let result = self.serve_reporting(listener, tx).await;
        // The reporter ends once every session task has dropped its sender.
        if reporter.await.is_err() {
            tracing::warn!("Report logger task panicked");
        }
        result
    }

    /// Serve a listener, sending each finished session's report to `reports`.
    pub async fn serve_reporting(
        &self,
        listener: TcpListener,
        reports: mpsc::UnboundedSender<SessionReport>,
    ) -> Result<()> {
        tracing::info!(
            "Starting {}, game at {}",
            self.shared.session.proxy_name,
            self.shared.config.game.target()
        );
        tracing::info!("Accepting client connections");

        loop {
            let (stream, peer) = listener
                .accept()
                .await
                .map_err(|e| ProxyError::Network(format!("Accept failed: {}", e)))?;

            let id = Uuid::new_v4();
            let span = tracing::info_span!("session", id = %id, peer = %unmap(peer.ip()));
            let shared = Arc::clone(&self.shared);
            let reports = reports.clone();
            let session = async move {
                let report = run_session(&shared, id, stream, peer).await;
                if reports.send(report).is_err() {
                    tracing::debug!("Report receiver gone");
                }
            }
            .instrument(span);

            if self.shared.config.proxy.once {
                session.await;
                tracing::info!("Shutdown complete.");
                return Ok(());
            }
            tokio::spawn(session);
        }
    }
}

async fn log_reports(mut rx: mpsc::UnboundedReceiver<SessionReport>) {
    while let Some(report) = rx.recv().await {
        report.log();
    }
}

/// Everything from accept to report for one client.
async fn run_session(
    shared: &Shared,
    id: Uuid,
    stream: TcpStream,
    peer: SocketAddr,
) -> SessionReport {
    let started_at = Utc::now();
    tracing::info!("Connect from {}", unmap(peer.ip()));

    let local = stream.local_addr().ok();
    let mut client = match accept_client(shared, stream, peer).await {
        Ok(client) => client,
        Err(e) => {
            return SessionReport::new(
                id,
                peer,
                started_at,
                SessionOutcome::SetupFailed {
                    error: e.to_string(),
                },
            )
        },
    };

    let game = match connect_game(shared).await {
        Ok(game) => game,
        Err(e) => {
            tracing::warn!("{}", e);
            if let Err(e) = client.send(CONNECT_FAILED) {
                tracing::debug!("Could not tell the client: {}", e);
            }
            let _ = client.drain_until(Instant::now() + DRAIN_LIMIT).await;
            let mut report = SessionReport::new(
                id,
                peer,
                started_at,
                SessionOutcome::SetupFailed {
                    error: e.to_string(),
                },
            );
            report.client = Some(EndpointReport::from_endpoint(&client));
            return report;
        },
    };

    let mut engine = match prepare_engine(shared, client, game, peer, local) {
        Ok(engine) => engine,
        Err((e, client, game)) => {
            let mut report = SessionReport::new(
                id,
                peer,
                started_at,
                SessionOutcome::SetupFailed {
                    error: e.to_string(),
                },
            );
            report.client = Some(EndpointReport::from_endpoint(&client));
            report.game = Some(EndpointReport::from_endpoint(&game));
            return report;
        },
    };

    let outcome = match drive(shared, &mut engine).await {
        Ok(SessionEnd::PeerClosed { endpoint }) => SessionOutcome::PeerClosed { endpoint },
        Err(e) => SessionOutcome::Failed {
            error: e.to_string(),
        },
    };
    if let Err(e) = engine.drain(DRAIN_LIMIT).await {
        tracing::debug!("Drain at close failed: {}", e);
    }

    let (client, game) = engine.into_endpoints();
    let mut report = SessionReport::new(id, peer, started_at, outcome);
    report.client = Some(EndpointReport::from_endpoint(&client));
    report.game = Some(EndpointReport::from_endpoint(&game));
    report
}

async fn accept_client(shared: &Shared, stream: TcpStream, peer: SocketAddr) -> Result<Endpoint> {
    let transport: Box<dyn Transport> = match &shared.server_tls {
        Some(tls) => {
            let transport = TlsTransport::accept(stream, Arc::clone(tls)).await?;
            tracing::debug!("Client TLS {:?}", transport.protocol_version());
            Box::new(transport)
        },
        None => Box::new(TcpTransport::new(stream)),
    };

    let mut client = Endpoint::new("Client", transport);
    client.set_policy(shared.config.client.compression);
    client.set_peer_address(unmap(peer.ip()).to_string());
    client.set_max_backlog(shared.config.proxy.max_backlog);
    Ok(client)
}

async fn connect_game(shared: &Shared) -> Result<Endpoint> {
    let game_config = &shared.config.game;
    let target = game_config.target();
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host(target.as_str())
        .await
        .map_err(|e| ProxyError::Network(format!("Could not resolve {}: {}", target, e)))?
        .collect();

    let mut last_error = None;
    let mut connected = None;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                tracing::debug!("Connected to game at {}", addr);
                connected = Some(stream);
                break;
            },
            Err(e) => {
                tracing::debug!("Connect to {} failed: {}", addr, e);
                last_error = Some(e);
            },
        }
    }
    let stream = connected.ok_or_else(|| {
        ProxyError::Network(format!(
            "Couldn't connect to game server {}: {}",
            target,
            last_error.map_or_else(|| "no addresses".to_string(), |e| e.to_string())
        ))
    })?;

    let transport: Box<dyn Transport> = match &shared.client_tls {
        Some(tls) => {
            let transport =
                TlsTransport::connect(stream, Arc::clone(tls), &game_config.host).await?;
            tracing::debug!("Game TLS {:?}", transport.protocol_version());
            Box::new(transport)
        },
        None => Box::new(TcpTransport::new(stream)),
    };

    let mut game = Endpoint::new("Game", transport);
    game.set_policy(game_config.compression);
    game.set_max_backlog(shared.config.proxy.max_backlog);
    Ok(game)
}

/// Header, patterns and compression offer; hands the endpoints back on
/// failure so their counters still make it into the report.
fn prepare_engine(
    shared: &Shared,
    mut client: Endpoint,
    mut game: Endpoint,
    peer: SocketAddr,
    local: Option<SocketAddr>,
) -> std::result::Result<ProxyEngine, (ProxyError, Endpoint, Endpoint)> {
    match setup_endpoints(shared, &mut client, &mut game, peer, local) {
        Ok(()) => Ok(ProxyEngine::new(client, game, shared.session.clone())),
        Err(e) => Err((e, client, game)),
    }
}

fn setup_endpoints(
    shared: &Shared,
    client: &mut Endpoint,
    game: &mut Endpoint,
    peer: SocketAddr,
    local: Option<SocketAddr>,
) -> Result<()> {
    if shared.config.proxy.proxy_header {
        let local = local.ok_or_else(|| {
            ProxyError::Network("Client socket has no local address".to_string())
        })?;
        let header = proxy_header_v1(peer, local);
        tracing::info!("Sent {} to {}", header.trim_end(), game.name());
        game.send(header.as_bytes())?;
    }
    install_rules(client, game, &shared.session)?;
    offer_compression(client)?;
    Ok(())
}

/// Run the engine, refreshing rate estimates every stats interval.
async fn drive(shared: &Shared, engine: &mut ProxyEngine) -> Result<SessionEnd> {
    let interval = shared.config.proxy.stats_interval();
    let weight = shared.config.proxy.stats_weight;
    let mut last_checkpoint = Instant::now();

    loop {
        if let Some(end) = engine.step().await? {
            return Ok(end);
        }
        if last_checkpoint.elapsed() >= interval {
            last_checkpoint = Instant::now();
            engine.checkpoint_stats(weight);
            tracing::debug!(
                "{} {} / {} {}",
                engine.client().name(),
                engine.client().raw_stats().human_rate(),
                engine.game().name(),
                engine.game().raw_stats().human_rate()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_proxy_header_v4() {
        assert_eq!(
            proxy_header_v1(addr("192.0.2.1:50000"), addr("198.51.100.2:4143")),
            "PROXY TCP4 192.0.2.1 198.51.100.2 50000 4143\r\n"
        );
    }

    #[test]
    fn test_proxy_header_mapped_is_v4() {
        assert_eq!(
            proxy_header_v1(addr("[::ffff:192.0.2.1]:50000"), addr("[::ffff:10.0.0.1]:4143")),
            "PROXY TCP4 192.0.2.1 10.0.0.1 50000 4143\r\n"
        );
    }

    #[test]
    fn test_proxy_header_v6() {
        assert_eq!(
            proxy_header_v1(addr("[2001:db8::1]:1234"), addr("[2001:db8::2]:4143")),
            "PROXY TCP6 2001:db8::1 2001:db8::2 1234 4143\r\n"
        );
    }

    #[test]
    fn test_unmap() {
        assert_eq!(
            unmap("::ffff:127.0.0.1".parse().unwrap()).to_string(),
            "127.0.0.1"
        );
        assert_eq!(unmap("::1".parse().unwrap()).to_string(), "::1");
    }

    #[test]
    fn test_compression_ratio() {
        assert_eq!(compression_ratio(100, 100), None);
        assert_eq!(compression_ratio(0, 0), None);
        assert_eq!(compression_ratio(25, 100), Some(75.0));
    }

    #[test]
    fn test_report_serializes_outcome() {
        let report = SessionReport::new(
            Uuid::nil(),
            addr("127.0.0.1:9"),
            Utc::now(),
            SessionOutcome::PeerClosed {
                endpoint: "Game".to_string(),
            },
        );
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["outcome"]["kind"], "peer_closed");
        assert_eq!(json["outcome"]["endpoint"], "Game");
        assert!(json["client"].is_null());
    }

    #[test]
    fn test_server_new_requires_certificate_for_tls_clients() {
        let mut config = Config::default();
        config.client.security = Security::Tls;
        assert!(ProxyServer::new(config).is_err());
    }
}
