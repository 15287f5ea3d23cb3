//! MCCP2 termination.
//!
//! Each side is handled on its own: the game may compress towards the proxy
//! and the proxy may compress towards the client, in any combination.
//!
//! ```text
//! game   → IAC WILL MCCP2          proxy → game   IAC DO MCCP2
//! game   → IAC SB MCCP2 IAC SE     inbound inflate starts after the marker
//! client → IAC DO MCCP2            proxy → client IAC SB MCCP2 IAC SE,
//!                                  outbound deflate starts
//! client → IAC DONT MCCP2          outbound deflate finishes
//! ```

use crate::error::Result;
use crate::proxy::{Action, Dispatch, Disposition, Endpoint};

use super::{command, empty_subnegotiation, CompressionPolicy, MCCP2, WILL};

/// Compression started with `ignore` policy: the stream turns opaque, so
/// stop matching and let it through.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompressIgnore;

impl Action for CompressIgnore {
    fn name(&self) -> &'static str {
        "mccp-ignore"
    }

    fn apply(&self, ctx: &mut Dispatch<'_>) -> Result<Disposition> {
        tracing::info!(
            "{} started compression, pattern matching disabled",
            ctx.from.name()
        );
        ctx.from.set_matching(false);
        Ok(Disposition::Forward)
    }
}

/// The client accepted MCCP2: announce the stream and compress from here on.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompressDo;

impl Action for CompressDo {
    fn name(&self) -> &'static str {
        "mccp2-do"
    }

    fn apply(&self, ctx: &mut Dispatch<'_>) -> Result<Disposition> {
        ctx.consume();
        if ctx.from.is_deflating() {
            tracing::debug!("{} repeated DO MCCP2, ignored", ctx.from.name());
            return Ok(Disposition::Consumed);
        }

        tracing::info!("{} does mccp2, starting compression", ctx.from.name());
        ctx.from.send(&empty_subnegotiation(MCCP2))?;
        ctx.from.start_deflate()?;
        Ok(Disposition::Consumed)
    }
}

/// The client asked to stop MCCP2.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompressDont;

impl Action for CompressDont {
    fn name(&self) -> &'static str {
        "mccp2-dont"
    }

    fn apply(&self, ctx: &mut Dispatch<'_>) -> Result<Disposition> {
        tracing::info!("{} dont mccp2, stopping compression", ctx.from.name());
        ctx.consume();
        ctx.from.stop_deflate()?;
        Ok(Disposition::Consumed)
    }
}

/// The game's compressed stream begins right after this marker.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompressStart;

impl Action for CompressStart {
    fn name(&self) -> &'static str {
        "mccp2-start"
    }

    fn apply(&self, ctx: &mut Dispatch<'_>) -> Result<Disposition> {
        tracing::info!("{} started mccp2 stream", ctx.from.name());
        ctx.consume();
        ctx.from.start_inflate()?;
        Ok(Disposition::Consumed)
    }
}

/// Offer MCCP2 to a client whose policy is `enable`.
///
/// Returns whether the offer was sent.
pub fn offer_compression(client: &mut Endpoint) -> Result<bool> {
    if client.policy() != CompressionPolicy::Enable {
        return Ok(false);
    }
    tracing::debug!("offering mccp2 to {}", client.name());
    client.send(&command(WILL, MCCP2))?;
    Ok(true)
}
