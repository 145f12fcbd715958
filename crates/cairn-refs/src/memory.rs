//! In-memory ref index for testing and ephemeral use.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use cairn_types::Locator;

use crate::error::RefResult;
use crate::names::validate_name;
use crate::traits::{rank_aliases, RefIndex};
use crate::types::{AliasEntry, RefTarget};

/// An in-memory implementation of [`RefIndex`].
///
/// All data lives in `HashMap`s behind `RwLock`s and is lost on drop. Reads
/// are always current, so `cache_time` has no effect here.
#[derive(Debug, Default)]
pub struct MemoryRefIndex {
    refs: RwLock<HashMap<String, RefTarget>>,
    aliases: RwLock<HashMap<String, Vec<AliasEntry>>>,
}

impl MemoryRefIndex {
    /// Create a new empty index.
    pub fn new() -> Self {
        Self::default()
    }
}

impl RefIndex for MemoryRefIndex {
    fn write_ref(&self, name: &str, target: &RefTarget) -> RefResult<()> {
        validate_name(name)?;
        let mut refs = self.refs.write().expect("lock poisoned");
        refs.insert(name.to_string(), target.clone());
        Ok(())
    }

    fn try_read_ref(
        &self,
        name: &str,
        _cache_time: Option<Duration>,
    ) -> RefResult<Option<RefTarget>> {
        let refs = self.refs.read().expect("lock poisoned");
        Ok(refs.get(name).cloned())
    }

    fn delete_ref(&self, name: &str) -> RefResult<bool> {
        let mut refs = self.refs.write().expect("lock poisoned");
        Ok(refs.remove(name).is_some())
    }

    fn list_refs(&self, prefix: &str) -> RefResult<Vec<(String, RefTarget)>> {
        let refs = self.refs.read().expect("lock poisoned");
        let mut result: Vec<(String, RefTarget)> = refs
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        result.sort_by(|(a, _), (b, _)| a.cmp(b));
        Ok(result)
    }

    fn add_alias(&self, name: &str, entry: AliasEntry) -> RefResult<()> {
        validate_name(name)?;
        let mut aliases = self.aliases.write().expect("lock poisoned");
        let entries = aliases.entry(name.to_string()).or_default();
        // Re-adding a locator moves it to the back (most recent).
        entries.retain(|e| e.locator != entry.locator);
        entries.push(entry);
        Ok(())
    }

    fn remove_alias(&self, name: &str, locator: &Locator) -> RefResult<bool> {
        let mut aliases = self.aliases.write().expect("lock poisoned");
        match aliases.get_mut(name) {
            Some(entries) => {
                let before = entries.len();
                entries.retain(|e| e.locator != *locator);
                let removed = entries.len() != before;
                if entries.is_empty() {
                    aliases.remove(name);
                }
                Ok(removed)
            }
            None => Ok(false),
        }
    }

    fn find_aliases(&self, name: &str, max_results: usize) -> RefResult<Vec<AliasEntry>> {
        let aliases = self.aliases.read().expect("lock poisoned");
        let entries = aliases.get(name).cloned().unwrap_or_default();
        Ok(rank_aliases(entries, max_results))
    }
}
