//! General-purpose actions.
//!
//! | Action       | Disposition | Effect                                            |
//! |--------------|-------------|---------------------------------------------------|
//! | [`Remove`]     | Consumed    | match dropped                                   |
//! | [`Substitute`] | Consumed    | match replaced by fixed bytes towards the peer  |
//! | [`Respond`]    | Consumed    | `IAC <verb> <opt>` answered back to the sender  |

use crate::error::Result;
use crate::proxy::{Action, Dispatch, Disposition};

use super::IAC;

/// Drop the match.
#[derive(Debug, Clone, Copy, Default)]
pub struct Remove;

impl Action for Remove {
    fn name(&self) -> &'static str {
        "remove"
    }

    fn apply(&self, ctx: &mut Dispatch<'_>) -> Result<Disposition> {
        ctx.consume();
        Ok(Disposition::Consumed)
    }
}

/// Replace the match with fixed bytes on the way to the peer.
#[derive(Debug, Clone)]
pub struct Substitute {
    replacement: Vec<u8>,
}

impl Substitute {
    /// Substitute `replacement` for every match.
    pub fn new(replacement: impl Into<Vec<u8>>) -> Self {
        Self {
            replacement: replacement.into(),
        }
    }

    /// Substitute the word `REDACTED`.
    pub fn redact() -> Self {
        Self::new(b"REDACTED".to_vec())
    }
}

impl Action for Substitute {
    fn name(&self) -> &'static str {
        "substitute"
    }

    fn apply(&self, ctx: &mut Dispatch<'_>) -> Result<Disposition> {
        ctx.consume();
        ctx.to.send(&self.replacement)?;
        Ok(Disposition::Consumed)
    }
}

/// Answer a three-byte `IAC <verb> <option>` with `IAC <reply> <option>`.
///
/// The answer goes back to the endpoint that asked; the question is not
/// passed on.
#[derive(Debug, Clone, Copy)]
pub struct Respond {
    reply: u8,
}

impl Respond {
    /// Answer with `reply` (one of `DO`, `DONT`, `WILL`, `WONT`).
    pub fn new(reply: u8) -> Self {
        Self { reply }
    }
}

impl Action for Respond {
    fn name(&self) -> &'static str {
        "respond"
    }

    fn apply(&self, ctx: &mut Dispatch<'_>) -> Result<Disposition> {
        let Some(&option) = ctx.matched().get(2) else {
            tracing::warn!(
                "respond bound to a {}-byte pattern, forwarding",
                ctx.match_len
            );
            return Ok(Disposition::Forward);
        };

        tracing::debug!(
            "send IAC {} {} to {}",
            self.reply,
            option,
            ctx.from.name()
        );
        ctx.consume();
        ctx.from.send(&[IAC, self.reply, option])?;
        Ok(Disposition::Consumed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{DONT, MCCP2, WILL, WONT};
    use crate::proxy::{pump, Endpoint, SessionConfig};
    use crate::transport::{MemoryHandle, MemoryTransport};
    use std::sync::Arc;

    fn pair() -> (Endpoint, MemoryHandle, Endpoint, MemoryHandle) {
        let (a, ha) = MemoryTransport::new();
        let (b, hb) = MemoryTransport::new();
        (
            Endpoint::new("game", Box::new(a)),
            ha,
            Endpoint::new("client", Box::new(b)),
            hb,
        )
    }

    fn run(pattern: &[u8], action: Arc<dyn Action>, input: &[u8]) -> (Vec<u8>, Vec<u8>) {
        let (mut game, gh, mut client, ch) = pair();
        game.patterns_mut().add(pattern.to_vec(), action).unwrap();
        game.patterns_mut().compile().unwrap();
        gh.push_read(input.to_vec());
        game.read_into_input().unwrap();
        pump(&mut game, &mut client, &SessionConfig::default()).unwrap();
        (gh.written(), ch.written())
    }

    #[test]
    fn test_remove() {
        let (back, forward) = run(b"spam", Arc::new(Remove), b"eggs spam ham");
        assert!(back.is_empty());
        assert_eq!(forward, b"eggs  ham");
    }

    #[test]
    fn test_redact() {
        let (_, forward) = run(b"hunter2", Arc::new(Substitute::redact()), b"pw: hunter2\r\n");
        assert_eq!(forward, b"pw: REDACTED\r\n");
    }

    #[test]
    fn test_respond_answers_sender() {
        let (back, forward) = run(
            &[IAC, WILL, MCCP2],
            Arc::new(Respond::new(DONT)),
            &[b'a', IAC, WILL, MCCP2, b'b'],
        );
        assert_eq!(back, [IAC, DONT, MCCP2]);
        assert_eq!(forward, b"ab");
    }

    #[test]
    fn test_respond_short_pattern_forwards() {
        let (back, forward) = run(&[IAC, WONT], Arc::new(Respond::new(DONT)), &[IAC, WONT]);
        assert!(back.is_empty());
        assert_eq!(forward, [IAC, WONT]);
    }
}
