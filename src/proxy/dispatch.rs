//! Match-and-dispatch over an endpoint's input buffer.
//!
//! [`pump`] drains one direction: it matches the front of `from`'s input,
//! forwards unmatched bytes to `to` verbatim, and hands each match to the
//! [`Action`] registered for it.
//!
//! # Action contract
//!
//! | Disposition | Action did                                  | Engine does                        |
//! |-------------|---------------------------------------------|------------------------------------|
//! | `Forward`   | observed only                               | forwards the match, then pops it   |
//! | `Consumed`  | popped the match (maybe queued replacement) | nothing                            |
//!
//! An action that reports `Consumed` without shrinking the input would make
//! the loop spin on the same match; debug builds panic, release builds end
//! the session with [`ProxyError::HandlerContract`].

use std::sync::Arc;

use crate::error::{ProxyError, Result};
use crate::pattern::MatchOutcome;

use super::endpoint::Endpoint;
use super::SessionConfig;

/// What the engine should do with a match after its action ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The action removed the match from the input.
    Consumed,
    /// Forward the matched bytes to the other side unchanged.
    Forward,
}

/// Behaviour bound to a pattern.
pub trait Action: Send + Sync + std::fmt::Debug {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// React to a match at the front of `ctx.from`'s input buffer.
    fn apply(&self, ctx: &mut Dispatch<'_>) -> Result<Disposition>;
}

/// Everything an action can see and touch for one match.
#[derive(Debug)]
pub struct Dispatch<'a> {
    /// Endpoint the match was read from; the match is at the front of its
    /// input buffer.
    pub from: &'a mut Endpoint,
    /// The other endpoint.
    pub to: &'a mut Endpoint,
    /// Length of the match.
    pub match_len: usize,
    /// Session-wide settings.
    pub session: &'a SessionConfig,
}

impl Dispatch<'_> {
    /// The matched bytes.
    pub fn matched(&self) -> &[u8] {
        let input = self.from.input().as_slice();
        &input[..self.match_len.min(input.len())]
    }

    /// Pop the match from the input buffer.
    pub fn consume(&mut self) {
        let n = self.match_len;
        self.from.input_mut().pop(n);
    }
}

/// Drain `from`'s input towards `to`, dispatching every match.
///
/// Stops when the input is empty or only a partial match remains.
pub fn pump(from: &mut Endpoint, to: &mut Endpoint, session: &SessionConfig) -> Result<()> {
    while !from.input().is_empty() {
        if !from.matching_enabled() {
            let n = from.input().len();
            from.forward_to(to, n)?;
            break;
        }

        match from.scan() {
            MatchOutcome::NoMatch => {
                let n = from.input().len();
                from.forward_to(to, n)?;
            },
            MatchOutcome::Partial { start } => {
                if from.input().available() > 0 {
                    break;
                }
                // A full buffer can never complete the match; let it go.
                let n = if start > 0 { start } else { from.input().len() };
                tracing::warn!(
                    "{} input full with a partial match at {}, forwarding {} bytes",
                    from.name(),
                    start,
                    n
                );
                from.forward_to(to, n)?;
            },
            MatchOutcome::Match { index, start, end } => {
                from.forward_to(to, start)?;
                let match_len = end - start;

                let Some(action) = from.patterns().get(index).map(|p| Arc::clone(&p.action))
                else {
                    tracing::warn!(
                        "{} matched pattern {} with no action, forwarding",
                        from.name(),
                        index
                    );
                    from.forward_to(to, match_len)?;
                    continue;
                };

                tracing::debug!(
                    endpoint = from.name(),
                    action = action.name(),
                    index,
                    match_len,
                    "dispatch"
                );

                let before = from.input().len();
                let disposition = {
                    let mut ctx = Dispatch {
                        from: &mut *from,
                        to: &mut *to,
                        match_len,
                        session,
                    };
                    action.apply(&mut ctx)?
                };

                match disposition {
                    Disposition::Forward => from.forward_to(to, match_len)?,
                    Disposition::Consumed => {
                        let after = from.input().len();
                        debug_assert!(
                            after < before,
                            "action '{}' reported Consumed but left the input untouched",
                            action.name()
                        );
                        if after >= before {
                            return Err(ProxyError::HandlerContract {
                                action: action.name(),
                                endpoint: from.name().to_string(),
                            });
                        }
                    },
                }
            },
        }
    }
    Ok(())
}
