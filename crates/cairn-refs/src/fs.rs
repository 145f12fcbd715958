//! Filesystem-backed ref index.
//!
//! Refs are JSON documents under `<root>/refs/<name>` (names may nest into
//! subdirectories); aliases are JSON documents under `<root>/aliases/<name>`.
//! All writes go through a temp file and an atomic rename, so concurrent
//! readers never observe a torn document.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use cairn_types::Locator;

use crate::error::{RefError, RefResult};
use crate::names::validate_name;
use crate::traits::{rank_aliases, RefIndex};
use crate::types::{AliasEntry, RefTarget};

/// A cached authoritative read, for bounded-staleness serving.
struct CachedRef {
    target: Option<RefTarget>,
    fetched_at: Instant,
}

/// Filesystem implementation of [`RefIndex`].
///
/// Hot names can be served from a per-process read cache when the caller
/// passes a `cache_time` bound, cutting disk reads for refs that are polled
/// far more often than they change.
pub struct FsRefIndex {
    root: PathBuf,
    read_cache: RwLock<HashMap<String, CachedRef>>,
}

impl FsRefIndex {
    /// Open (creating directories as needed) an index rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> RefResult<Self> {
        let root = root.into();
        fs::create_dir_all(root.join("refs"))?;
        fs::create_dir_all(root.join("aliases"))?;
        fs::create_dir_all(root.join("tmp"))?;
        Ok(Self {
            root,
            read_cache: RwLock::new(HashMap::new()),
        })
    }

    fn ref_path(&self, name: &str) -> PathBuf {
        self.root.join("refs").join(name)
    }

    fn alias_path(&self, name: &str) -> PathBuf {
        self.root.join("aliases").join(name)
    }

    fn write_document<T: serde::Serialize>(&self, path: &Path, value: &T) -> RefResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(value)
            .map_err(|e| RefError::Serialization(e.to_string()))?;
        let mut tmp = tempfile::NamedTempFile::new_in(self.root.join("tmp"))?;
        tmp.write_all(&json)?;
        tmp.flush()?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }

    fn read_document<T: serde::de::DeserializeOwned>(&self, path: &Path) -> RefResult<Option<T>> {
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let value = serde_json::from_slice(&data).map_err(|e| RefError::CorruptDocument {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(Some(value))
    }

    /// Authoritative disk read, refreshing the read cache.
    fn read_ref_from_disk(&self, name: &str) -> RefResult<Option<RefTarget>> {
        let target: Option<RefTarget> = self.read_document(&self.ref_path(name))?;
        let mut cache = self.read_cache.write().expect("lock poisoned");
        cache.insert(
            name.to_string(),
            CachedRef {
                target: target.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(target)
    }
}

impl RefIndex for FsRefIndex {
    fn write_ref(&self, name: &str, target: &RefTarget) -> RefResult<()> {
        validate_name(name)?;
        self.write_document(&self.ref_path(name), target)?;
        let mut cache = self.read_cache.write().expect("lock poisoned");
        cache.insert(
            name.to_string(),
            CachedRef {
                target: Some(target.clone()),
                fetched_at: Instant::now(),
            },
        );
        Ok(())
    }

    fn try_read_ref(
        &self,
        name: &str,
        cache_time: Option<Duration>,
    ) -> RefResult<Option<RefTarget>> {
        if let Some(bound) = cache_time {
            let cache = self.read_cache.read().expect("lock poisoned");
            if let Some(cached) = cache.get(name) {
                if cached.fetched_at.elapsed() <= bound {
                    return Ok(cached.target.clone());
                }
            }
        }
        self.read_ref_from_disk(name)
    }

    fn delete_ref(&self, name: &str) -> RefResult<bool> {
        let path = self.ref_path(name);
        let existed = match fs::remove_file(&path) {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => return Err(e.into()),
        };
        self.read_cache
            .write()
            .expect("lock poisoned")
            .remove(name);
        Ok(existed)
    }

    fn list_refs(&self, prefix: &str) -> RefResult<Vec<(String, RefTarget)>> {
        let refs_root = self.root.join("refs");
        let mut result = Vec::new();
        collect_refs(&refs_root, &refs_root, &mut result)?;
        result.retain(|(name, _)| name.starts_with(prefix));
        result.sort_by(|(a, _), (b, _)| a.cmp(b));
        Ok(result)
    }

    fn add_alias(&self, name: &str, entry: AliasEntry) -> RefResult<()> {
        validate_name(name)?;
        let path = self.alias_path(name);
        let mut entries: Vec<AliasEntry> = self.read_document(&path)?.unwrap_or_default();
        // Re-adding a locator moves it to the back (most recent).
        entries.retain(|e| e.locator != entry.locator);
        entries.push(entry);
        self.write_document(&path, &entries)
    }

    fn remove_alias(&self, name: &str, locator: &Locator) -> RefResult<bool> {
        let path = self.alias_path(name);
        let mut entries: Vec<AliasEntry> = match self.read_document(&path)? {
            Some(entries) => entries,
            None => return Ok(false),
        };
        let before = entries.len();
        entries.retain(|e| e.locator != *locator);
        let removed = entries.len() != before;
        if !removed {
            return Ok(false);
        }
        if entries.is_empty() {
            fs::remove_file(&path)?;
        } else {
            self.write_document(&path, &entries)?;
        }
        Ok(true)
    }

    fn find_aliases(&self, name: &str, max_results: usize) -> RefResult<Vec<AliasEntry>> {
        let entries: Vec<AliasEntry> = self
            .read_document(&self.alias_path(name))?
            .unwrap_or_default();
        Ok(rank_aliases(entries, max_results))
    }
}

fn collect_refs(
    root: &Path,
    dir: &Path,
    out: &mut Vec<(String, RefTarget)>,
) -> RefResult<()> {
    let read = match fs::read_dir(dir) {
        Ok(read) => read,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    for entry in read {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_refs(root, &path, out)?;
        } else {
            let name = path
                .strip_prefix(root)
                .expect("entry is under refs root")
                .to_string_lossy()
                .replace('\\', "/");
            match fs::read(&path) {
                Ok(data) => match serde_json::from_slice::<RefTarget>(&data) {
                    Ok(target) => out.push((name, target)),
                    Err(e) => {
                        tracing::warn!(ref_name = %name, "skipping corrupt ref document: {e}");
                    }
                },
                Err(e) => return Err(e.into()),
            }
        }
    }
    Ok(())
}

impl std::fmt::Debug for FsRefIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsRefIndex")
            .field("root", &self.root)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_types::HashDomain;

    fn temp_index() -> (tempfile::TempDir, FsRefIndex) {
        let dir = tempfile::tempdir().unwrap();
        let index = FsRefIndex::open(dir.path()).unwrap();
        (dir, index)
    }

    fn target(seed: &[u8]) -> RefTarget {
        let hash = HashDomain::NODE.hash(seed);
        let locator = Locator::derive(Some("bundle"), &HashDomain::BUNDLE.hash(seed)).unwrap();
        RefTarget::new(hash, locator)
    }

    #[test]
    fn write_read_delete_roundtrip() {
        let (_dir, index) = temp_index();
        let t = target(b"tree");
        index.write_ref("builds/latest", &t).unwrap();
        assert_eq!(index.try_read_ref("builds/latest", None).unwrap(), Some(t));
        assert!(index.delete_ref("builds/latest").unwrap());
        assert!(index.try_read_ref("builds/latest", None).unwrap().is_none());
    }

    #[test]
    fn refs_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let t = target(b"persisted");
        {
            let index = FsRefIndex::open(dir.path()).unwrap();
            index.write_ref("keep", &t).unwrap();
        }
        let index = FsRefIndex::open(dir.path()).unwrap();
        assert_eq!(index.try_read_ref("keep", None).unwrap(), Some(t));
    }

    #[test]
    fn cache_time_serves_stale_value() {
        let (_dir, index) = temp_index();
        let first = target(b"first");
        index.write_ref("hot", &first).unwrap();

        // Prime the read cache, then update the ref behind its back on disk
        // through a second index instance (no shared cache).
        index.try_read_ref("hot", None).unwrap();
        let second = target(b"second");
        let other = FsRefIndex::open(index.root.clone()).unwrap();
        other.write_ref("hot", &second).unwrap();

        // Within the bound the stale cached value is acceptable.
        let stale = index
            .try_read_ref("hot", Some(Duration::from_secs(3600)))
            .unwrap();
        assert_eq!(stale, Some(first));

        // An authoritative read sees the update.
        let fresh = index.try_read_ref("hot", None).unwrap();
        assert_eq!(fresh, Some(second));
    }

    #[test]
    fn zero_cache_time_is_authoritative() {
        let (_dir, index) = temp_index();
        let first = target(b"a");
        index.write_ref("r", &first).unwrap();

        let second = target(b"b");
        let other = FsRefIndex::open(index.root.clone()).unwrap();
        other.write_ref("r", &second).unwrap();

        // Zero bound: nothing cached is fresh enough (elapsed > 0), so the
        // read falls through to disk.
        let read = index.try_read_ref("r", Some(Duration::ZERO)).unwrap();
        assert_eq!(read, Some(second));
    }

    #[test]
    fn list_refs_walks_nested_names() {
        let (_dir, index) = temp_index();
        index.write_ref("builds/linux/latest", &target(b"a")).unwrap();
        index.write_ref("builds/mac/latest", &target(b"b")).unwrap();
        index.write_ref("release", &target(b"c")).unwrap();

        let all = index.list_refs("").unwrap();
        assert_eq!(all.len(), 3);
        let builds = index.list_refs("builds/").unwrap();
        assert_eq!(builds.len(), 2);
        assert_eq!(builds[0].0, "builds/linux/latest");
    }

    #[test]
    fn aliases_roundtrip_on_disk() {
        let (_dir, index) = temp_index();
        index
            .add_alias(
                "shader-cache",
                AliasEntry::new(Locator::from_raw("v1"), 1, b"win64".to_vec()),
            )
            .unwrap();
        index
            .add_alias(
                "shader-cache",
                AliasEntry::new(Locator::from_raw("v2"), 5, b"win64".to_vec()),
            )
            .unwrap();

        let found = index.find_aliases("shader-cache", 10).unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].locator.as_str(), "v2");
        assert_eq!(found[0].data, b"win64");

        assert!(index
            .remove_alias("shader-cache", &Locator::from_raw("v2"))
            .unwrap());
        let found = index.find_aliases("shader-cache", 10).unwrap();
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn corrupt_ref_document_errors_on_read() {
        let (_dir, index) = temp_index();
        index.write_ref("broken", &target(b"x")).unwrap();
        fs::write(index.ref_path("broken"), b"not json").unwrap();

        let err = index.try_read_ref("broken", None).unwrap_err();
        assert!(matches!(err, RefError::CorruptDocument { .. }));
    }
}
