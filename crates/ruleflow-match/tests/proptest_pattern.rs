// ruleflow-match/tests/proptest_pattern.rs
// ============================================================================
// Module: Pattern Property-Based Tests
// Description: Property tests for the segmented wildcard grammar.
// Purpose: Detect panics and matching invariants across wide input ranges.
// ============================================================================

//! Property-based tests for pattern grammar invariants.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

use proptest::prelude::*;
use ruleflow_match::Pattern;
use ruleflow_match::PatternIndex;

/// Strategy producing non-empty literal segments without wildcards.
fn segment_strategy() -> impl Strategy<Value = String> {
    "[a-z0-9_-]{1,8}"
}

/// Strategy producing a key of 1..=5 segments joined by `:`.
fn key_strategy() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(segment_strategy(), 1 .. 6)
}

proptest! {
    #[test]
    fn exact_pattern_always_matches_its_own_key(segments in key_strategy()) {
        let key = segments.join(":");
        let pattern = Pattern::parse(&key, ':').unwrap();
        prop_assert!(pattern.is_exact());
        prop_assert!(pattern.matches(&key));
        prop_assert_eq!(pattern.captures(&key).unwrap().len(), 0);
    }

    #[test]
    fn wildcarding_any_segment_still_matches(
        segments in key_strategy(),
        choice in any::<prop::sample::Index>(),
    ) {
        let key = segments.join(":");
        let wildcard_at = choice.index(segments.len());
        let mut pattern_segments = segments.clone();
        pattern_segments[wildcard_at] = "*".to_string();
        let pattern = Pattern::parse(&pattern_segments.join(":"), ':').unwrap();

        prop_assert!(pattern.matches(&key));
        let captures = pattern.captures(&key).unwrap();
        prop_assert_eq!(captures, vec![segments[wildcard_at].clone()]);
    }

    #[test]
    fn segment_count_mismatch_never_matches(
        segments in key_strategy(),
        extra in segment_strategy(),
    ) {
        let pattern = Pattern::parse(&segments.join(":"), ':').unwrap();
        let longer = format!("{}:{extra}", segments.join(":"));
        prop_assert!(!pattern.matches(&longer));
    }

    #[test]
    fn index_candidates_agree_with_direct_matching(
        patterns in prop::collection::vec(key_strategy(), 1 .. 8),
        key in key_strategy(),
        wildcard_mask in prop::collection::vec(any::<bool>(), 1 .. 8),
    ) {
        let key = key.join(":");
        let mut index = PatternIndex::new(':');
        let mut parsed = Vec::new();
        for (id, segments) in patterns.iter().enumerate() {
            let mut segments = segments.clone();
            if wildcard_mask.get(id).copied().unwrap_or(false) {
                segments[0] = "*".to_string();
            }
            let pattern = Pattern::parse(&segments.join(":"), ':').unwrap();
            index.insert(pattern.clone(), id);
            parsed.push(pattern);
        }

        let candidates = index.candidates(&key);
        for (id, pattern) in parsed.iter().enumerate() {
            prop_assert_eq!(candidates.contains(&id), pattern.matches(&key));
        }
    }
}
