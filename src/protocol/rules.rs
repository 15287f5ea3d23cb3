//! Pattern tables installed on each endpoint before a session starts.
//!
//! # Game side
//!
//! | Pattern                             | Policy  | Action              |
//! |-------------------------------------|---------|---------------------|
//! | `IAC SB NEW-ENVIRON SEND IAC SE`     | any     | [`EnvironRequest`]  |
//! | `IAC SB NEW-ENVIRON SEND VAR IAC SE` | any     | [`EnvironRequest`]  |
//! | `IAC DO NEW-ENVIRON`                 | any     | [`EnvironDoes`]     |
//! | `IAC SB MCCP{1,2,3} IAC SE`          | ignore  | [`CompressIgnore`]  |
//! | `IAC WILL MCCP{1,2,3}`               | disable | `Respond(DONT)`     |
//! | `IAC WILL MCCP2`                     | enable  | `Respond(DO)`       |
//! | `IAC SB MCCP2 IAC SE`                | enable  | [`CompressStart`]   |
//!
//! # Client side
//!
//! | Pattern                 | Policy  | Action                |
//! |-------------------------|---------|-----------------------|
//! | `IAC WONT NEW-ENVIRON`  | any     | [`EnvironClientWont`] |
//! | `IAC DO MCCP{1,2,3}`    | disable | `Respond(WONT)`       |
//! | `IAC DO MCCP2`          | enable  | [`CompressDo`]        |
//! | `IAC DONT MCCP2`        | enable  | [`CompressDont`]      |
//!
//! Configured rewrites follow the protocol patterns on each side, so a
//! telnet sequence always wins over a rewrite starting at the same byte.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::proxy::{Action, Endpoint, SessionConfig};

use super::actions::{Remove, Respond, Substitute};
use super::environ::{EnvironClientWont, EnvironDoes, EnvironRequest, SEND, VAR};
use super::mccp::{CompressDo, CompressDont, CompressIgnore, CompressStart};
use super::{
    command, empty_subnegotiation, CompressionPolicy, DO, DONT, IAC, MCCP1, MCCP2, MCCP3,
    NEW_ENVIRON, SB, SE, WILL, WONT,
};

const MCCP_OPTIONS: [u8; 3] = [MCCP1, MCCP2, MCCP3];

/// A literal rewrite: `pattern` is replaced by `replace`, or dropped when
/// no replacement is given.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewriteRule {
    /// Literal text to look for.
    #[serde(rename = "match")]
    pub pattern: String,
    /// Replacement text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replace: Option<String>,
}

impl RewriteRule {
    /// Action implementing this rule.
    pub fn action(&self) -> Arc<dyn Action> {
        match &self.replace {
            Some(text) => Arc::new(Substitute::new(text.as_bytes())),
            None => Arc::new(Remove),
        }
    }
}

/// Game-side patterns for `policy`, in precedence order.
pub fn game_rules(policy: CompressionPolicy) -> Vec<(Vec<u8>, Arc<dyn Action>)> {
    let request: Arc<dyn Action> = Arc::new(EnvironRequest);
    let mut rules: Vec<(Vec<u8>, Arc<dyn Action>)> = vec![
        (
            vec![IAC, SB, NEW_ENVIRON, SEND, IAC, SE],
            Arc::clone(&request),
        ),
        (vec![IAC, SB, NEW_ENVIRON, SEND, VAR, IAC, SE], request),
        (command(DO, NEW_ENVIRON).to_vec(), Arc::new(EnvironDoes)),
    ];

    match policy {
        CompressionPolicy::Ignore => {
            for option in MCCP_OPTIONS {
                rules.push((
                    empty_subnegotiation(option).to_vec(),
                    Arc::new(CompressIgnore),
                ));
            }
        },
        CompressionPolicy::Disable => {
            for option in MCCP_OPTIONS {
                rules.push((command(WILL, option).to_vec(), Arc::new(Respond::new(DONT))));
            }
        },
        CompressionPolicy::Enable => {
            rules.push((command(WILL, MCCP2).to_vec(), Arc::new(Respond::new(DO))));
            rules.push((
                empty_subnegotiation(MCCP2).to_vec(),
                Arc::new(CompressStart),
            ));
        },
    }
    rules
}

/// Client-side patterns for `policy`, in precedence order.
pub fn client_rules(policy: CompressionPolicy) -> Vec<(Vec<u8>, Arc<dyn Action>)> {
    let mut rules: Vec<(Vec<u8>, Arc<dyn Action>)> = vec![(
        command(WONT, NEW_ENVIRON).to_vec(),
        Arc::new(EnvironClientWont),
    )];

    match policy {
        CompressionPolicy::Ignore => {},
        CompressionPolicy::Disable => {
            for option in MCCP_OPTIONS {
                rules.push((command(DO, option).to_vec(), Arc::new(Respond::new(WONT))));
            }
        },
        CompressionPolicy::Enable => {
            rules.push((command(DO, MCCP2).to_vec(), Arc::new(CompressDo)));
            rules.push((command(DONT, MCCP2).to_vec(), Arc::new(CompressDont)));
        },
    }
    rules
}

fn install(
    endpoint: &mut Endpoint,
    rules: Vec<(Vec<u8>, Arc<dyn Action>)>,
    rewrites: &[RewriteRule],
) -> Result<()> {
    let patterns = endpoint.patterns_mut();
    for (bytes, action) in rules {
        patterns.add(bytes, action)?;
    }
    for rule in rewrites {
        patterns.add(rule.pattern.as_bytes(), rule.action())?;
    }
    patterns.compile()?;
    tracing::debug!(
        "{} has {} patterns for compression policy {}",
        endpoint.name(),
        endpoint.patterns().len(),
        endpoint.policy()
    );
    Ok(())
}

/// Install and compile the pattern tables of both endpoints.
///
/// Each endpoint's compression policy must already be set.
pub fn install_rules(
    client: &mut Endpoint,
    game: &mut Endpoint,
    session: &SessionConfig,
) -> Result<()> {
    install(game, game_rules(game.policy()), &session.game_rewrites)?;
    install(client, client_rules(client.policy()), &session.client_rewrites)?;
    Ok(())
}
