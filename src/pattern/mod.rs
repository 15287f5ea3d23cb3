//! Ordered literal pattern sets.
//!
//! Each endpoint carries one [`PatternSet`]: literal byte sequences bound 1:1
//! to an [`Action`]. Registration order is precedence order. The set is
//! filled before a session starts and then compiled once into a [`Matcher`].
//!
//! ```text
//! index  pattern                    action
//! -----  -------------------------  ------------------
//!   0    IAC SB NEW-ENVIRON SEND .. environ-request
//!   1    IAC DO MCCP2               compress-do
//!   2    IAC DONT MCCP2             compress-dont
//! ```

mod matcher;

use std::sync::Arc;

pub use matcher::{MatchOutcome, Matcher};

use crate::error::{ProxyError, Result};
use crate::proxy::Action;

/// A literal byte sequence and the action bound to it.
#[derive(Debug, Clone)]
pub struct Pattern {
    /// Bytes to match, compared literally.
    pub bytes: Vec<u8>,
    /// Behaviour run when the bytes match.
    pub action: Arc<dyn Action>,
}

/// Registration-ordered patterns plus their compiled matcher.
#[derive(Debug, Default)]
pub struct PatternSet {
    patterns: Vec<Pattern>,
    matcher: Option<Matcher>,
}

impl PatternSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a pattern. Invalidates any earlier compilation.
    pub fn add(&mut self, bytes: impl Into<Vec<u8>>, action: Arc<dyn Action>) -> Result<()> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(ProxyError::Pattern(format!(
                "empty pattern for action '{}'",
                action.name()
            )));
        }
        self.patterns.push(Pattern { bytes, action });
        self.matcher = None;
        Ok(())
    }

    /// Compile the current patterns. A no-op for an empty set.
    pub fn compile(&mut self) -> Result<()> {
        if self.patterns.is_empty() {
            self.matcher = None;
            return Ok(());
        }
        let literals: Vec<Vec<u8>> = self.patterns.iter().map(|p| p.bytes.clone()).collect();
        self.matcher = Some(Matcher::compile(&literals)?);
        tracing::debug!(patterns = self.patterns.len(), "pattern set compiled");
        Ok(())
    }

    /// True once [`compile`](Self::compile) has run on a non-empty set.
    pub fn is_compiled(&self) -> bool {
        self.matcher.is_some()
    }

    /// Pattern at registration index `index`.
    pub fn get(&self, index: usize) -> Option<&Pattern> {
        self.patterns.get(index)
    }

    /// Number of registered patterns.
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Scan `haystack`. Uncompiled sets never match.
    pub fn find(&mut self, haystack: &[u8]) -> MatchOutcome {
        match self.matcher.as_mut() {
            Some(matcher) => matcher.find(haystack),
            None => MatchOutcome::NoMatch,
        }
    }
}
