use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use cairn_store::{BlobReader, BlobRecord, StoreResult};
use cairn_types::{CancelToken, Locator};
use lru::LruCache;

/// Sizing and expiration knobs for [`LocalCache`].
#[derive(Clone, Copy, Debug)]
pub struct LocalCacheConfig {
    /// Approximate byte budget for cached payloads.
    pub max_bytes: u64,
    /// Sliding expiration for positive entries; refreshed on every hit.
    pub positive_ttl: Duration,
    /// Fixed, short expiration for negative (absent) results.
    pub negative_ttl: Duration,
}

impl Default for LocalCacheConfig {
    fn default() -> Self {
        Self {
            max_bytes: 256 * 1024 * 1024,
            positive_ttl: Duration::from_secs(300),
            negative_ttl: Duration::from_secs(2),
        }
    }
}

struct CacheEntry {
    /// `None` caches a confirmed miss.
    record: Option<Arc<BlobRecord>>,
    expires_at: Instant,
    charge: u64,
}

/// Accounting charged to a negative entry; small but nonzero so a flood of
/// misses still ages out real payloads correctly.
const NEGATIVE_CHARGE: u64 = 64;

struct LocalState {
    entries: LruCache<Locator, CacheEntry>,
    total_bytes: u64,
}

/// Size-bounded in-memory cache over any [`BlobReader`].
///
/// Records are immutable, so entries never need invalidation -- only aging.
/// Expired entries are dropped on access; the byte budget is enforced by
/// evicting least-recently-used entries after each insert.
pub struct LocalCache {
    inner: Arc<dyn BlobReader>,
    config: LocalCacheConfig,
    state: Mutex<LocalState>,
}

impl LocalCache {
    /// Create a cache over `inner`.
    pub fn new(inner: Arc<dyn BlobReader>, config: LocalCacheConfig) -> Self {
        Self {
            inner,
            config,
            state: Mutex::new(LocalState {
                entries: LruCache::unbounded(),
                total_bytes: 0,
            }),
        }
    }

    /// Number of live entries (positive and negative).
    pub fn len(&self) -> usize {
        self.state.lock().expect("lock poisoned").entries.len()
    }

    /// Returns `true` if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes currently charged against the budget.
    pub fn total_bytes(&self) -> u64 {
        self.state.lock().expect("lock poisoned").total_bytes
    }

    fn lookup(&self, locator: &Locator) -> Option<Option<Arc<BlobRecord>>> {
        let now = Instant::now();
        let mut state = self.state.lock().expect("lock poisoned");
        let expired = match state.entries.get_mut(locator) {
            Some(entry) if entry.expires_at > now => {
                if entry.record.is_some() {
                    // Sliding expiration: hot positive entries stay put.
                    entry.expires_at = now + self.config.positive_ttl;
                }
                return Some(entry.record.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            if let Some(entry) = state.entries.pop(locator) {
                state.total_bytes -= entry.charge;
            }
        }
        None
    }

    fn insert(&self, locator: Locator, record: Option<Arc<BlobRecord>>) {
        let now = Instant::now();
        let (charge, ttl) = match &record {
            Some(record) => (record.payload_len().max(1), self.config.positive_ttl),
            None => (NEGATIVE_CHARGE, self.config.negative_ttl),
        };

        let mut state = self.state.lock().expect("lock poisoned");
        if let Some(old) = state.entries.pop(&locator) {
            state.total_bytes -= old.charge;
        }
        state.entries.put(
            locator,
            CacheEntry {
                record,
                expires_at: now + ttl,
                charge,
            },
        );
        state.total_bytes += charge;

        while state.total_bytes > self.config.max_bytes && state.entries.len() > 1 {
            if let Some((evicted_locator, evicted)) = state.entries.pop_lru() {
                state.total_bytes -= evicted.charge;
                tracing::trace!(locator = %evicted_locator, bytes = evicted.charge, "evicted");
            } else {
                break;
            }
        }
    }
}

impl BlobReader for LocalCache {
    fn read(&self, locator: &Locator, cancel: &CancelToken) -> StoreResult<Option<BlobRecord>> {
        cancel.check()?;
        if let Some(cached) = self.lookup(locator) {
            return Ok(cached.map(|record| (*record).clone()));
        }

        let fetched = self.inner.read(locator, cancel)?;
        self.insert(locator.clone(), fetched.clone().map(Arc::new));
        Ok(fetched)
    }
}

impl std::fmt::Debug for LocalCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCache")
            .field("entries", &self.len())
            .field("total_bytes", &self.total_bytes())
            .finish()
    }
}
