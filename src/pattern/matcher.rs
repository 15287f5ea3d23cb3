//! Literal alternation matcher with partial-match detection.
//!
//! Full matches come from a single `regex::bytes::Regex` built as
//! `(p0)|(p1)|...`, every literal byte escaped as `\xHH` so nothing in a
//! pattern is interpreted as syntax. The regex crate uses leftmost-first
//! semantics, so at the leftmost start position the lowest-index alternative
//! wins, and the capture group that participated maps straight back to the
//! registration index.
//!
//! The regex engine has no notion of "ran out of input", so partial matches
//! are found separately: only the last `longest - 1` positions of the
//! haystack can hold a proper prefix of a pattern, so that window is checked
//! directly. A partial beats a full match when it starts earlier, or at the
//! same position with a lower index (an earlier alternative ran off the end
//! before a later one completed).

use regex::bytes::{CaptureLocations, Regex, RegexBuilder};

use crate::error::{ProxyError, Result};

/// Result of scanning a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    /// No pattern matches and no pattern prefix sits at the tail.
    NoMatch,
    /// The bytes from `start` to the end are a proper prefix of a pattern.
    Partial {
        /// Offset where the incomplete sequence begins.
        start: usize,
    },
    /// Pattern `index` matched `[start, end)`.
    Match {
        /// Registration index of the pattern.
        index: usize,
        /// Offset of the first matched byte.
        start: usize,
        /// Offset one past the last matched byte.
        end: usize,
    },
}

/// Compiled alternation of literal byte patterns.
#[derive(Debug, Clone)]
pub struct Matcher {
    regex: Regex,
    locations: CaptureLocations,
    literals: Vec<Vec<u8>>,
    longest: usize,
}

impl Matcher {
    /// Compile `literals` in order. Empty literals are rejected.
    pub fn compile(literals: &[Vec<u8>]) -> Result<Self> {
        if let Some(index) = literals.iter().position(Vec::is_empty) {
            return Err(ProxyError::Pattern(format!("pattern {index} is empty")));
        }

        let mut source = String::new();
        for (i, literal) in literals.iter().enumerate() {
            if i > 0 {
                source.push('|');
            }
            source.push('(');
            for byte in literal {
                source.push_str(&format!("\\x{byte:02X}"));
            }
            source.push(')');
        }

        let regex = RegexBuilder::new(&source).unicode(false).build()?;
        let locations = regex.capture_locations();
        let longest = literals.iter().map(Vec::len).max().unwrap_or(0);

        Ok(Self {
            regex,
            locations,
            literals: literals.to_vec(),
            longest,
        })
    }

    /// Number of compiled patterns.
    pub fn len(&self) -> usize {
        self.literals.len()
    }

    /// True when no patterns were compiled.
    pub fn is_empty(&self) -> bool {
        self.literals.is_empty()
    }

    /// Scan `haystack` from the front.
    pub fn find(&mut self, haystack: &[u8]) -> MatchOutcome {
        let full = self
            .regex
            .captures_read(&mut self.locations, haystack)
            .and_then(|m| {
                (0..self.literals.len())
                    .find(|&i| self.locations.get(i + 1).is_some())
                    .map(|index| (index, m.start(), m.end()))
            });

        let partial = self.earliest_partial(haystack);

        match (full, partial) {
            (Some((index, start, end)), Some((p_start, p_index))) => {
                if p_start < start || (p_start == start && p_index < index) {
                    MatchOutcome::Partial { start: p_start }
                } else {
                    MatchOutcome::Match { index, start, end }
                }
            },
            (Some((index, start, end)), None) => MatchOutcome::Match { index, start, end },
            (None, Some((start, _))) => MatchOutcome::Partial { start },
            (None, None) => MatchOutcome::NoMatch,
        }
    }

    /// Leftmost tail position that is a proper prefix of some pattern, with
    /// the lowest pattern index at that position.
    fn earliest_partial(&self, haystack: &[u8]) -> Option<(usize, usize)> {
        let window = haystack
            .len()
            .saturating_sub(self.longest.saturating_sub(1));

        (window..haystack.len()).find_map(|start| {
            let tail = &haystack[start..];
            self.literals
                .iter()
                .position(|lit| lit.len() > tail.len() && lit.starts_with(tail))
                .map(|index| (start, index))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(patterns: &[&[u8]]) -> Matcher {
        let literals: Vec<Vec<u8>> = patterns.iter().map(|p| p.to_vec()).collect();
        Matcher::compile(&literals).unwrap()
    }

    #[test]
    fn test_no_match() {
        let mut m = compile(&[b"\xFF\xFD\x27"]);
        assert_eq!(m.find(b"hello there"), MatchOutcome::NoMatch);
        assert_eq!(m.find(b""), MatchOutcome::NoMatch);
    }

    #[test]
    fn test_full_match_reports_index_and_extent() {
        let mut m = compile(&[b"abc", b"\xFF\xFB\x56"]);
        assert_eq!(
            m.find(b"xy\xFF\xFB\x56z"),
            MatchOutcome::Match {
                index: 1,
                start: 2,
                end: 5
            }
        );
    }

    #[test]
    fn test_partial_at_tail() {
        let mut m = compile(&[b"\xFF\xFA\x27\x01\xFF\xF0"]);
        assert_eq!(
            m.find(b"text\xFF\xFA\x27"),
            MatchOutcome::Partial { start: 4 }
        );
    }

    #[test]
    fn test_lower_index_wins_at_same_position() {
        let mut m = compile(&[b"ab", b"abc"]);
        assert_eq!(
            m.find(b"abcd"),
            MatchOutcome::Match {
                index: 0,
                start: 0,
                end: 2
            }
        );

        let mut m = compile(&[b"abc", b"ab"]);
        assert_eq!(
            m.find(b"abcd"),
            MatchOutcome::Match {
                index: 0,
                start: 0,
                end: 3
            }
        );
    }

    #[test]
    fn test_earlier_alternative_running_off_the_end_is_partial() {
        // "abcd" is still possible at 0, and it was registered first.
        let mut m = compile(&[b"abcd", b"ab"]);
        assert_eq!(m.find(b"abc"), MatchOutcome::Partial { start: 0 });

        // Registered the other way round the complete match wins.
        let mut m = compile(&[b"ab", b"abcd"]);
        assert_eq!(
            m.find(b"abc"),
            MatchOutcome::Match {
                index: 0,
                start: 0,
                end: 2
            }
        );
    }

    #[test]
    fn test_full_match_before_partial_wins() {
        let mut m = compile(&[b"\xFF\xFD\x27", b"\xFF\xFA\x56\xFF\xF0"]);
        assert_eq!(
            m.find(b"\xFF\xFD\x27 then \xFF\xFA"),
            MatchOutcome::Match {
                index: 0,
                start: 0,
                end: 3
            }
        );
    }

    #[test]
    fn test_bytes_are_not_regex_syntax() {
        let mut m = compile(&[b"a.c", b"(x|y)"]);
        assert_eq!(m.find(b"abc"), MatchOutcome::NoMatch);
        assert_eq!(
            m.find(b"--(x|y)"),
            MatchOutcome::Match {
                index: 1,
                start: 2,
                end: 7
            }
        );
    }

    #[test]
    fn test_empty_pattern_rejected() {
        let err = Matcher::compile(&[b"ok".to_vec(), Vec::new()]).unwrap_err();
        assert!(matches!(err, ProxyError::Pattern(_)));
    }
}
