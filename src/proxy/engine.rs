//! Readiness-driven loop over the two endpoints of a session.
//!
//! ```text
//!            ┌────────────── step() ──────────────┐
//!            │ wait (bounded by tick) for:        │
//!            │   client readable / game readable  │
//!            │   writable, if a backlog exists    │
//!            ├────────────────────────────────────┤
//!            │ drain backlogs                     │
//!            │ client readable → read, pump → game│
//!            │ game readable   → read, pump → client
//!            └────────────────────────────────────┘
//! ```
//!
//! Endpoints with input already decoded below the input buffer (inflater
//! workspace, TLS plaintext) skip the wait. A side is not read while its
//! peer has a backlog, so a slow reader throttles the fast writer instead
//! of growing memory.

use std::time::{Duration, Instant};

use crate::error::Result;
use crate::transport::ReadOutcome;

use super::dispatch::pump;
use super::endpoint::Endpoint;
use super::SessionConfig;

/// How a session ended without error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// The named endpoint closed its side.
    PeerClosed {
        /// Endpoint name.
        endpoint: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Client,
    Game,
}

#[derive(Debug, Clone, Copy)]
enum Wake {
    Readable(Side),
    Writable,
}

/// The client and game endpoints of one session.
#[derive(Debug)]
pub struct ProxyEngine {
    client: Endpoint,
    game: Endpoint,
    session: SessionConfig,
}

impl ProxyEngine {
    /// Pair two endpoints whose patterns are already installed.
    pub fn new(client: Endpoint, game: Endpoint, session: SessionConfig) -> Self {
        Self {
            client,
            game,
            session,
        }
    }

    /// The client endpoint.
    pub fn client(&self) -> &Endpoint {
        &self.client
    }

    /// The game endpoint.
    pub fn game(&self) -> &Endpoint {
        &self.game
    }

    /// Mutable client endpoint.
    pub fn client_mut(&mut self) -> &mut Endpoint {
        &mut self.client
    }

    /// Mutable game endpoint.
    pub fn game_mut(&mut self) -> &mut Endpoint {
        &mut self.game
    }

    /// Session settings.
    pub fn session(&self) -> &SessionConfig {
        &self.session
    }

    /// Refresh the rate estimates of both endpoints.
    pub fn checkpoint_stats(&mut self, weight: f64) {
        self.client.checkpoint(weight);
        self.game.checkpoint(weight);
    }

    /// Give the endpoints back, e.g. for final statistics.
    pub fn into_endpoints(self) -> (Endpoint, Endpoint) {
        (self.client, self.game)
    }

    /// Run until a peer closes or an error ends the session.
    pub async fn run(&mut self) -> Result<SessionEnd> {
        loop {
            if let Some(end) = self.step().await? {
                return Ok(end);
            }
        }
    }

    /// One readiness cycle. Returns `Some` once a peer closed.
    ///
    /// A cycle with nothing ready returns `Ok(None)` after the tick.
    pub async fn step(&mut self) -> Result<Option<SessionEnd>> {
        let mut client_ready = self.client.pending_input() && !self.game.has_backlog();
        let mut game_ready = self.game.pending_input() && !self.client.has_backlog();

        if !client_ready && !game_ready {
            match self.wait().await {
                None => {},
                Some(Wake::Readable(Side::Client)) => client_ready = true,
                Some(Wake::Readable(Side::Game)) => game_ready = true,
                Some(Wake::Writable) => {},
            }
        }

        self.client.flush_backlog()?;
        self.game.flush_backlog()?;

        if client_ready {
            if let Some(end) = self.service(Side::Client)? {
                return Ok(Some(end));
            }
        }
        if game_ready {
            if let Some(end) = self.service(Side::Game)? {
                return Ok(Some(end));
            }
        }
        Ok(None)
    }

    /// Wait for the first readiness event, or `None` after one tick.
    async fn wait(&self) -> Option<Wake> {
        let client = &self.client;
        let game = &self.game;
        let client_backlog = client.has_backlog();
        let game_backlog = game.has_backlog();

        // Readiness errors resurface from the following try_read/try_write.
        let ready = async {
            tokio::select! {
                _ = client.readable(), if !game_backlog => Wake::Readable(Side::Client),
                _ = game.readable(), if !client_backlog => Wake::Readable(Side::Game),
                _ = client.writable(), if client_backlog => Wake::Writable,
                _ = game.writable(), if game_backlog => Wake::Writable,
            }
        };
        tokio::time::timeout(self.session.tick, ready).await.ok()
    }

    /// Read once from `side` and pump its input to the other side.
    fn service(&mut self, side: Side) -> Result<Option<SessionEnd>> {
        let (from, to) = match side {
            Side::Client => (&mut self.client, &mut self.game),
            Side::Game => (&mut self.game, &mut self.client),
        };

        match from.read_into_input()? {
            ReadOutcome::Closed => {
                tracing::info!("{} closed the connection", from.name());
                let held = from.input().len();
                if held > 0 {
                    // A partial match can no longer complete.
                    tracing::debug!("{} forwarding {} held bytes at close", from.name(), held);
                    from.forward_to(to, held)?;
                }
                Ok(Some(SessionEnd::PeerClosed {
                    endpoint: from.name().to_string(),
                }))
            },
            ReadOutcome::WouldBlock => Ok(None),
            ReadOutcome::Data(n) => {
                tracing::trace!(endpoint = from.name(), bytes = n, "read");
                pump(from, to, &self.session)?;
                Ok(None)
            },
        }
    }

    /// Try to write out remaining backlogs, giving up after `limit`.
    pub async fn drain(&mut self, limit: Duration) -> Result<()> {
        let deadline = Instant::now() + limit;
        for endpoint in [&mut self.client, &mut self.game] {
            if !endpoint.drain_until(deadline).await? {
                break;
            }
        }
        Ok(())
    }
}
