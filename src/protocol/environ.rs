//! NEW-ENVIRON (RFC 1572) handling.
//!
//! The game asks for the client's environment; the proxy answers on the
//! client's behalf with its own name and the client's address, so the game
//! sees who is really connected.
//!
//! ```text
//! game   → IAC SB NEW-ENVIRON SEND [VAR] IAC SE
//! proxy  → IAC SB NEW-ENVIRON IS VAR "PROXY_NAME" VALUE "MUDitM-1.0" IAC SE
//!          IAC SB NEW-ENVIRON IS VAR "<var>" VALUE "<client addr>" IAC SE  (per var)
//! ```
//!
//! Names and values are escaped: `IAC` is doubled and the RFC 1572 type
//! codes are prefixed with `ESC`.

use crate::error::Result;
use crate::proxy::{Action, Dispatch, Disposition};

use super::{NegotiationState, IAC, NEW_ENVIRON, SB, SE, WILL};

/// `IS` qualifier.
pub const IS: u8 = 0;
/// `SEND` qualifier.
pub const SEND: u8 = 1;
/// `INFO` qualifier.
pub const INFO: u8 = 2;
/// Well-known variable marker.
pub const VAR: u8 = 0;
/// Value marker.
pub const VALUE: u8 = 1;
/// Escape marker.
pub const ESC: u8 = 2;
/// User variable marker.
pub const USERVAR: u8 = 3;

/// Name under which the proxy reports itself.
pub const PROXY_NAME_VAR: &str = "PROXY_NAME";

fn push_escaped(out: &mut Vec<u8>, text: &[u8]) {
    for &byte in text {
        match byte {
            IAC => out.extend_from_slice(&[IAC, IAC]),
            VAR | VALUE | ESC | USERVAR => out.extend_from_slice(&[ESC, byte]),
            _ => out.push(byte),
        }
    }
}

/// Encode one `IAC SB NEW-ENVIRON IS VAR name VALUE value IAC SE` record.
pub fn is_pair(name: &str, value: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(name.len() + value.len() + 8);
    out.extend_from_slice(&[IAC, SB, NEW_ENVIRON, IS, VAR]);
    push_escaped(&mut out, name.as_bytes());
    out.push(VALUE);
    push_escaped(&mut out, value.as_bytes());
    out.extend_from_slice(&[IAC, SE]);
    out
}

/// Answer a game's environment request.
///
/// The request is consumed when the client already refused NEW-ENVIRON,
/// otherwise it is forwarded so the client can answer too.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvironRequest;

impl Action for EnvironRequest {
    fn name(&self) -> &'static str {
        "environ-request"
    }

    fn apply(&self, ctx: &mut Dispatch<'_>) -> Result<Disposition> {
        tracing::info!("{} requested new-environ info", ctx.from.name());

        let mut reply = is_pair(PROXY_NAME_VAR, &ctx.session.proxy_name);
        let address = ctx.to.peer_address().unwrap_or_default().to_string();
        for var in &ctx.session.environ_vars {
            reply.extend(is_pair(var, &address));
            tracing::info!("Sent {} '{}' to {}", var, address, ctx.from.name());
        }
        ctx.from.send(&reply)?;

        if ctx.to.state() == NegotiationState::Wont {
            ctx.consume();
            return Ok(Disposition::Consumed);
        }
        Ok(Disposition::Forward)
    }
}

/// The client refused NEW-ENVIRON: remember it and accept on its behalf.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvironClientWont;

impl Action for EnvironClientWont {
    fn name(&self) -> &'static str {
        "environ-client-wont"
    }

    fn apply(&self, ctx: &mut Dispatch<'_>) -> Result<Disposition> {
        tracing::info!("{} wont new-environ", ctx.from.name());
        ctx.from.set_state(NegotiationState::Wont);
        ctx.consume();
        ctx.to.send(&[IAC, WILL, NEW_ENVIRON])?;
        Ok(Disposition::Consumed)
    }
}

/// The game asked for NEW-ENVIRON: remember it.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvironDoes;

impl Action for EnvironDoes {
    fn name(&self) -> &'static str {
        "environ-does"
    }

    fn apply(&self, ctx: &mut Dispatch<'_>) -> Result<Disposition> {
        tracing::info!("{} does new-environ", ctx.from.name());
        ctx.from.set_state(NegotiationState::Do);
        Ok(Disposition::Forward)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_is_pair_layout() {
        assert_eq!(
            is_pair("IPADDRESS", "10.0.0.1"),
            [
                &hex!("ff fa 27 00 00")[..],
                b"IPADDRESS",
                &[VALUE],
                b"10.0.0.1",
                &hex!("ff f0"),
            ]
            .concat()
        );
    }

    #[test]
    fn test_is_pair_escapes_control_bytes() {
        let encoded = is_pair("A\u{1}", "\u{3}");
        assert_eq!(
            encoded,
            hex!("ff fa 27 00 00 41 02 01 01 02 03 ff f0").to_vec()
        );
    }

    #[test]
    fn test_iac_doubled() {
        let mut out = Vec::new();
        push_escaped(&mut out, &[b'x', IAC, b'y']);
        assert_eq!(out, [b'x', IAC, IAC, b'y']);
    }
}
