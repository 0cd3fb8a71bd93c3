// ruleflow-match/src/index.rs
// ============================================================================
// Module: Pattern Inverted Index
// Description: Prefix-bucketed index from patterns to opaque ids.
// Purpose: Resolve a concrete key to matching pattern owners sub-linearly.
// Dependencies: crate::pattern
// ============================================================================

//! ## Overview
//! The index buckets exact patterns by their full key and wildcard patterns
//! by their literal prefix. Resolving a key probes the exact bucket plus one
//! bucket per key prefix (including the empty prefix), so lookup cost scales
//! with the segment count of the key rather than the number of registered
//! patterns.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use crate::pattern::Pattern;

// ============================================================================
// SECTION: Pattern Index
// ============================================================================

/// Inverted index from segmented patterns to owner ids.
///
/// # Invariants
/// - All registered patterns share the index separator.
/// - The same `(pattern, id)` pair is stored at most once.
#[derive(Debug, Clone)]
pub struct PatternIndex<T> {
    /// Segment separator shared by all registered patterns.
    separator: char,
    /// Exact patterns bucketed by their full key.
    exact: BTreeMap<String, BTreeSet<T>>,
    /// Wildcard patterns bucketed by literal prefix.
    wildcards: BTreeMap<String, Vec<(Pattern, T)>>,
}

impl<T> PatternIndex<T>
where
    T: Ord + Clone,
{
    /// Creates an empty index for the provided separator.
    #[must_use]
    pub const fn new(separator: char) -> Self {
        Self {
            separator,
            exact: BTreeMap::new(),
            wildcards: BTreeMap::new(),
        }
    }

    /// Returns the separator shared by all registered patterns.
    #[must_use]
    pub const fn separator(&self) -> char {
        self.separator
    }

    /// Registers a pattern for the owner id.
    ///
    /// Re-inserting the same `(pattern, id)` pair is a no-op.
    pub fn insert(&mut self, pattern: Pattern, id: T) {
        if pattern.is_exact() {
            self.exact
                .entry(pattern.as_str().to_string())
                .or_default()
                .insert(id);
            return;
        }

        let bucket = self
            .wildcards
            .entry(pattern.prefix().to_string())
            .or_default();
        let already_present = bucket
            .iter()
            .any(|(existing, owner)| existing.as_str() == pattern.as_str() && *owner == id);
        if !already_present {
            bucket.push((pattern, id));
        }
    }

    /// Removes a previously registered `(pattern, id)` pair.
    ///
    /// Returns true when the pair was present.
    pub fn remove(&mut self, pattern: &Pattern, id: &T) -> bool {
        if pattern.is_exact() {
            let Some(owners) = self.exact.get_mut(pattern.as_str()) else {
                return false;
            };
            let removed = owners.remove(id);
            if owners.is_empty() {
                self.exact.remove(pattern.as_str());
            }
            return removed;
        }

        let Some(bucket) = self.wildcards.get_mut(pattern.prefix()) else {
            return false;
        };
        let before = bucket.len();
        bucket.retain(|(existing, owner)| {
            existing.as_str() != pattern.as_str() || owner != id
        });
        let removed = bucket.len() < before;
        if bucket.is_empty() {
            self.wildcards.remove(pattern.prefix());
        }
        removed
    }

    /// Removes every pattern owned by the id.
    pub fn remove_owner(&mut self, id: &T) {
        self.exact.retain(|_, owners| {
            owners.remove(id);
            !owners.is_empty()
        });
        self.wildcards.retain(|_, bucket| {
            bucket.retain(|(_, owner)| owner != id);
            !bucket.is_empty()
        });
    }

    /// Drops every registered pattern.
    pub fn clear(&mut self) {
        self.exact.clear();
        self.wildcards.clear();
    }

    /// Resolves a key to the set of owner ids whose patterns match it.
    #[must_use]
    pub fn candidates(&self, key: &str) -> BTreeSet<T> {
        let mut owners = BTreeSet::new();

        if let Some(exact_owners) = self.exact.get(key) {
            owners.extend(exact_owners.iter().cloned());
        }

        for prefix in key_prefixes(key, self.separator) {
            let Some(bucket) = self.wildcards.get(prefix.as_str()) else {
                continue;
            };
            for (pattern, owner) in bucket {
                if pattern.matches(key) {
                    owners.insert(owner.clone());
                }
            }
        }

        owners
    }

    /// Returns true when no patterns are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.wildcards.is_empty()
    }
}

/// Enumerates the prefixes of a key, from empty to the full key.
fn key_prefixes(key: &str, separator: char) -> Vec<String> {
    let mut prefixes = vec![String::new()];
    let mut current = String::new();
    for segment in key.split(separator) {
        if !current.is_empty() {
            current.push(separator);
        }
        current.push_str(segment);
        prefixes.push(current.clone());
    }
    prefixes
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

    use super::PatternIndex;
    use crate::pattern::Pattern;

    fn index_with(patterns: &[(&str, u32)]) -> PatternIndex<u32> {
        let mut index = PatternIndex::new(':');
        for (raw, id) in patterns {
            index.insert(Pattern::parse(raw, ':').unwrap(), *id);
        }
        index
    }

    #[test]
    fn exact_and_wildcard_candidates_combine() {
        let index = index_with(&[
            ("customer:42:score", 1),
            ("customer:*:score", 2),
            ("order:*", 3),
        ]);
        let owners = index.candidates("customer:42:score");
        assert_eq!(owners.into_iter().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn leading_wildcard_lives_in_the_empty_prefix_bucket() {
        let index = index_with(&[("*:score", 7)]);
        assert!(index.candidates("customer:score").contains(&7));
        assert!(index.candidates("customer:42:score").is_empty());
    }

    #[test]
    fn remove_owner_clears_all_buckets() {
        let mut index = index_with(&[("a:b", 1), ("a:*", 1), ("a:*", 2)]);
        index.remove_owner(&1);
        assert!(index.candidates("a:b").contains(&2));
        assert!(!index.candidates("a:b").contains(&1));
    }

    #[test]
    fn remove_returns_presence() {
        let mut index = index_with(&[("a:*", 1)]);
        let pattern = Pattern::parse("a:*", ':').unwrap();
        assert!(index.remove(&pattern, &1));
        assert!(!index.remove(&pattern, &1));
        assert!(index.is_empty());
    }
}
