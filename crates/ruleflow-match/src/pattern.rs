// ruleflow-match/src/pattern.rs
// ============================================================================
// Module: Segmented Wildcard Patterns
// Description: Pattern grammar with single-segment wildcards.
// Purpose: Parse, match, and capture against separator-delimited keys.
// Dependencies: serde, thiserror
// ============================================================================

//! ## Overview
//! A pattern is a separator-delimited sequence of segments where `*` matches
//! exactly one segment. Multi-segment wildcards (`**`) are not part of the
//! grammar and are rejected at parse time, as are wildcards embedded inside a
//! literal segment. Patterns with no wildcard are exact keys.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Pattern Errors
// ============================================================================

/// Errors produced while parsing a pattern.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    /// The pattern string was empty.
    #[error("pattern is empty")]
    Empty,
    /// The pattern contained an empty segment (leading, trailing, or doubled separator).
    #[error("pattern {0:?} contains an empty segment")]
    EmptySegment(String),
    /// The pattern used the undefined multi-segment wildcard.
    #[error("pattern {0:?} uses the undefined multi-segment wildcard `**`")]
    MultiSegmentWildcard(String),
    /// The pattern embedded a wildcard inside a literal segment.
    #[error("pattern {0:?} embeds a wildcard inside a literal segment")]
    EmbeddedWildcard(String),
}

// ============================================================================
// SECTION: Pattern Grammar
// ============================================================================

/// One parsed pattern segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
enum Segment {
    /// Literal segment matched verbatim.
    Literal(String),
    /// Wildcard segment matching exactly one key segment.
    Wildcard,
}

/// Parsed segmented wildcard pattern.
///
/// # Invariants
/// - At least one segment; no segment is empty.
/// - Literal segments contain no `*`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pattern {
    /// Original pattern text.
    raw: String,
    /// Separator the pattern was parsed with.
    separator: char,
    /// Parsed segments.
    segments: Vec<Segment>,
    /// Literal prefix (segments before the first wildcard) joined by the separator.
    prefix: String,
}

impl Pattern {
    /// Parses a pattern using the provided segment separator.
    ///
    /// # Errors
    ///
    /// Returns [`PatternError`] when the pattern is empty, contains empty
    /// segments, or uses a wildcard form outside the grammar.
    pub fn parse(raw: &str, separator: char) -> Result<Self, PatternError> {
        if raw.is_empty() {
            return Err(PatternError::Empty);
        }

        let mut segments = Vec::new();
        for segment in raw.split(separator) {
            if segment.is_empty() {
                return Err(PatternError::EmptySegment(raw.to_string()));
            }
            if segment == "*" {
                segments.push(Segment::Wildcard);
                continue;
            }
            if segment == "**" {
                return Err(PatternError::MultiSegmentWildcard(raw.to_string()));
            }
            if segment.contains('*') {
                return Err(PatternError::EmbeddedWildcard(raw.to_string()));
            }
            segments.push(Segment::Literal(segment.to_string()));
        }

        let prefix = join_prefix(&segments, separator);
        Ok(Self {
            raw: raw.to_string(),
            separator,
            segments,
            prefix,
        })
    }

    /// Returns the original pattern text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Returns the separator the pattern was parsed with.
    #[must_use]
    pub const fn separator(&self) -> char {
        self.separator
    }

    /// Returns true when the pattern contains no wildcard segments.
    #[must_use]
    pub fn is_exact(&self) -> bool {
        self.segments
            .iter()
            .all(|segment| matches!(segment, Segment::Literal(_)))
    }

    /// Returns the literal prefix segments joined by the separator.
    ///
    /// The prefix is empty when the first segment is a wildcard.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Returns true when the key matches this pattern.
    #[must_use]
    pub fn matches(&self, key: &str) -> bool {
        self.capture_segments(key).is_some()
    }

    /// Returns the key segments matched by wildcard positions, in order.
    ///
    /// Returns `None` when the key does not match the pattern. Exact
    /// patterns yield an empty capture list on match.
    #[must_use]
    pub fn captures(&self, key: &str) -> Option<Vec<String>> {
        self.capture_segments(key)
            .map(|captures| captures.into_iter().map(str::to_string).collect())
    }

    /// Matches the key and collects wildcard captures as borrowed segments.
    fn capture_segments<'key>(&self, key: &'key str) -> Option<Vec<&'key str>> {
        let key_segments: Vec<&str> = key.split(self.separator).collect();
        if key_segments.len() != self.segments.len() {
            return None;
        }

        let mut captures = Vec::new();
        for (segment, key_segment) in self.segments.iter().zip(&key_segments) {
            match segment {
                Segment::Literal(literal) => {
                    if literal != key_segment {
                        return None;
                    }
                }
                Segment::Wildcard => {
                    if key_segment.is_empty() {
                        return None;
                    }
                    captures.push(*key_segment);
                }
            }
        }

        Some(captures)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.raw.fmt(f)
    }
}

/// Joins the literal segments before the first wildcard.
fn join_prefix(segments: &[Segment], separator: char) -> String {
    let mut prefix = String::new();
    for segment in segments {
        let Segment::Literal(literal) = segment else {
            break;
        };
        if !prefix.is_empty() {
            prefix.push(separator);
        }
        prefix.push_str(literal);
    }
    prefix
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(
        clippy::panic,
        clippy::unwrap_used,
        clippy::expect_used,
        reason = "Test-only assertions are permitted."
    )]

    use super::Pattern;
    use super::PatternError;

    #[test]
    fn exact_pattern_matches_itself_only() {
        let pattern = Pattern::parse("customer:42:score", ':').unwrap();
        assert!(pattern.is_exact());
        assert!(pattern.matches("customer:42:score"));
        assert!(!pattern.matches("customer:42"));
        assert!(!pattern.matches("customer:42:score:extra"));
    }

    #[test]
    fn wildcard_matches_single_segment() {
        let pattern = Pattern::parse("customer:*:score", ':').unwrap();
        assert!(!pattern.is_exact());
        assert!(pattern.matches("customer:42:score"));
        assert!(pattern.matches("customer:abc:score"));
        assert!(!pattern.matches("customer:score"));
        assert!(!pattern.matches("customer:a:b:score"));
    }

    #[test]
    fn captures_return_wildcard_segments_in_order() {
        let pattern = Pattern::parse("order:*:line:*", ':').unwrap();
        let captures = pattern.captures("order:9:line:3").unwrap();
        assert_eq!(captures, vec!["9".to_string(), "3".to_string()]);
        assert!(pattern.captures("order:9:line").is_none());
    }

    #[test]
    fn prefix_stops_at_first_wildcard() {
        let pattern = Pattern::parse("login.failed.*", '.').unwrap();
        assert_eq!(pattern.prefix(), "login.failed");
        let leading = Pattern::parse("*.failed", '.').unwrap();
        assert_eq!(leading.prefix(), "");
    }

    #[test]
    fn multi_segment_wildcard_is_rejected() {
        assert_eq!(
            Pattern::parse("orders.**", '.'),
            Err(PatternError::MultiSegmentWildcard("orders.**".to_string()))
        );
    }

    #[test]
    fn embedded_wildcard_is_rejected() {
        assert_eq!(
            Pattern::parse("orders.a*b", '.'),
            Err(PatternError::EmbeddedWildcard("orders.a*b".to_string()))
        );
    }

    #[test]
    fn empty_forms_are_rejected() {
        assert_eq!(Pattern::parse("", ':'), Err(PatternError::Empty));
        assert_eq!(
            Pattern::parse("a::b", ':'),
            Err(PatternError::EmptySegment("a::b".to_string()))
        );
        assert_eq!(
            Pattern::parse(":a", ':'),
            Err(PatternError::EmptySegment(":a".to_string()))
        );
    }
}
