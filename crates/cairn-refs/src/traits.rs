//! The [`RefIndex`] trait defining the ref and alias storage interface.

use std::time::Duration;

use cairn_types::Locator;

use crate::error::RefResult;
use crate::types::{AliasEntry, RefTarget};

/// Storage backend for named refs and the alias discovery index.
///
/// Implementations must be thread-safe (`Send + Sync`). Ref writes are
/// last-write-wins; there is no optimistic concurrency. Callers are expected
/// to update a ref only once the target's full transitive tree is durable.
pub trait RefIndex: Send + Sync {
    /// Create or update a ref. Last write wins.
    fn write_ref(&self, name: &str, target: &RefTarget) -> RefResult<()>;

    /// Read a ref, or `None` if it does not exist.
    ///
    /// `cache_time` bounds acceptable staleness: a backend may serve a value
    /// it fetched within the bound without consulting authoritative storage,
    /// trading freshness for reduced read amplification on hot names. Pass
    /// `None` for an authoritative read.
    fn try_read_ref(&self, name: &str, cache_time: Option<Duration>)
        -> RefResult<Option<RefTarget>>;

    /// Delete a ref. Returns `true` if it existed.
    fn delete_ref(&self, name: &str) -> RefResult<bool>;

    /// List all refs whose name starts with `prefix`, sorted by name.
    ///
    /// Pass `""` to list everything.
    fn list_refs(&self, prefix: &str) -> RefResult<Vec<(String, RefTarget)>>;

    /// Add an entry to an alias. Multiple targets may share one name.
    fn add_alias(&self, name: &str, entry: AliasEntry) -> RefResult<()>;

    /// Remove the alias entry for `locator` under `name`. Returns `true` if
    /// it existed.
    fn remove_alias(&self, name: &str, locator: &Locator) -> RefResult<bool>;

    /// Look up alias entries, best first: descending rank, then most
    /// recently added. At most `max_results` entries are returned.
    fn find_aliases(&self, name: &str, max_results: usize) -> RefResult<Vec<AliasEntry>>;
}

/// Order alias entries best-first and truncate to `max_results`.
///
/// Entries must arrive in insertion order; the sort is stable so recency
/// breaks rank ties (later insertion wins).
pub(crate) fn rank_aliases(mut entries: Vec<AliasEntry>, max_results: usize) -> Vec<AliasEntry> {
    entries.reverse(); // most recent first
    entries.sort_by(|a, b| b.rank.cmp(&a.rank)); // stable: recency preserved within rank
    entries.truncate(max_results);
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(tag: &str, rank: u64) -> AliasEntry {
        AliasEntry::new(Locator::from_raw(tag), rank, Vec::new())
    }

    #[test]
    fn rank_orders_descending() {
        let ranked = rank_aliases(vec![entry("low", 1), entry("high", 9), entry("mid", 5)], 10);
        let tags: Vec<_> = ranked.iter().map(|e| e.locator.as_str()).collect();
        assert_eq!(tags, vec!["high", "mid", "low"]);
    }

    #[test]
    fn equal_rank_breaks_by_recency() {
        let ranked = rank_aliases(vec![entry("older", 3), entry("newer", 3)], 10);
        let tags: Vec<_> = ranked.iter().map(|e| e.locator.as_str()).collect();
        assert_eq!(tags, vec!["newer", "older"]);
    }

    #[test]
    fn truncates_to_max_results() {
        let ranked = rank_aliases(vec![entry("a", 3), entry("b", 2), entry("c", 1)], 2);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].locator.as_str(), "a");
    }
}
