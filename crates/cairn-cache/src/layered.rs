use std::sync::Arc;

use cairn_store::{BlobReader, BlobRecord, StoreResult};
use cairn_types::{CancelToken, Locator};

use crate::dedup::DedupReader;
use crate::local::{LocalCache, LocalCacheConfig};

/// The standard read stack: local LRU, then request coalescing, then the
/// persistent backend.
///
/// A read is satisfied by the first layer able to produce it. On a local
/// miss the coalescer ensures exactly one backend call per locator is in
/// flight; the local layer populates itself with the result on the way back
/// up. Handing this to a bundle opener makes repeated bundle opens --
/// diamond import graphs included -- stop costing backend round-trips.
pub struct LayeredCache {
    local: LocalCache,
}

impl LayeredCache {
    /// Compose the stack over the authoritative `persistent` reader.
    pub fn new(persistent: Arc<dyn BlobReader>, config: LocalCacheConfig) -> Self {
        let dedup = Arc::new(DedupReader::new(persistent));
        Self {
            local: LocalCache::new(dedup as Arc<dyn BlobReader>, config),
        }
    }

    /// The local layer, for inspection.
    pub fn local(&self) -> &LocalCache {
        &self.local
    }
}

impl BlobReader for LayeredCache {
    fn read(&self, locator: &Locator, cancel: &CancelToken) -> StoreResult<Option<BlobRecord>> {
        self.local.read(locator, cancel)
    }
}

impl std::fmt::Debug for LayeredCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayeredCache")
            .field("local", &self.local)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_store::{BlobStore, MemoryBlobStore, NodeRef};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    struct CountingReader {
        inner: Arc<dyn BlobReader>,
        reads: AtomicUsize,
        delay: Duration,
    }

    impl BlobReader for CountingReader {
        fn read(
            &self,
            locator: &Locator,
            cancel: &CancelToken,
        ) -> StoreResult<Option<BlobRecord>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                thread::sleep(self.delay);
            }
            self.inner.read(locator, cancel)
        }
    }

    fn stack(
        payload: &[u8],
        delay: Duration,
    ) -> (Arc<CountingReader>, LayeredCache, NodeRef) {
        let store = Arc::new(MemoryBlobStore::new());
        let node = store
            .write(
                &BlobRecord::blob(payload.to_vec()),
                None,
                &CancelToken::new(),
            )
            .unwrap()
            .handle
            .resolve()
            .unwrap();
        let counter = Arc::new(CountingReader {
            inner: store as Arc<dyn BlobReader>,
            reads: AtomicUsize::new(0),
            delay,
        });
        let cache = LayeredCache::new(
            Arc::clone(&counter) as Arc<dyn BlobReader>,
            LocalCacheConfig::default(),
        );
        (counter, cache, node)
    }

    #[test]
    fn full_miss_populates_local_layer() {
        let (counter, cache, node) = stack(b"populate me", Duration::ZERO);
        let cancel = CancelToken::new();

        let record = cache.read(&node.locator, &cancel).unwrap().unwrap();
        assert_eq!(record.payload, b"populate me");
        assert_eq!(counter.reads.load(Ordering::SeqCst), 1);
        assert_eq!(cache.local().len(), 1);

        // Satisfied by the local layer now.
        cache.read(&node.locator, &cancel).unwrap().unwrap();
        assert_eq!(counter.reads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn concurrent_cold_reads_cost_one_backend_call() {
        let (counter, cache, node) = stack(b"cold start", Duration::from_millis(40));
        let cache = Arc::new(cache);

        let n = 6;
        let barrier = Arc::new(Barrier::new(n));
        let handles: Vec<_> = (0..n)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let barrier = Arc::clone(&barrier);
                let locator = node.locator.clone();
                thread::spawn(move || {
                    barrier.wait();
                    cache.read(&locator, &CancelToken::new()).unwrap().unwrap()
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap().payload, b"cold start");
        }

        // Racing threads may each miss the local layer, but the dedup layer
        // admits exactly one backend call.
        assert_eq!(counter.reads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn missing_locator_is_a_clean_none() {
        let (counter, cache, _) = stack(b"x", Duration::ZERO);
        let cancel = CancelToken::new();
        let missing = Locator::from_raw("not here");

        assert!(cache.read(&missing, &cancel).unwrap().is_none());
        assert!(cache.read(&missing, &cancel).unwrap().is_none());
        // Second read is served by the negative cache.
        assert_eq!(counter.reads.load(Ordering::SeqCst), 1);
    }
}
