use std::collections::HashMap;
use std::sync::RwLock;

use cairn_types::{CancelToken, Locator};

use crate::error::StoreResult;
use crate::handle::{Handle, NodeRef};
use crate::record::BlobRecord;
use crate::traits::{verify_record, BlobReader, BlobStore, WriteReceipt};

/// In-memory, `HashMap`-based blob store.
///
/// Intended for tests and embedding. All records are held in memory behind a
/// `RwLock`; records are cloned on read.
pub struct MemoryBlobStore {
    records: RwLock<HashMap<Locator, BlobRecord>>,
}

impl MemoryBlobStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Number of records currently stored.
    pub fn len(&self) -> usize {
        self.records.read().expect("lock poisoned").len()
    }

    /// Returns `true` if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.records.read().expect("lock poisoned").is_empty()
    }

    /// Total payload bytes across all stored records.
    pub fn total_payload_bytes(&self) -> u64 {
        self.records
            .read()
            .expect("lock poisoned")
            .values()
            .map(|r| r.payload_len())
            .sum()
    }
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BlobReader for MemoryBlobStore {
    fn read(&self, locator: &Locator, cancel: &CancelToken) -> StoreResult<Option<BlobRecord>> {
        cancel.check()?;
        let map = self.records.read().expect("lock poisoned");
        match map.get(locator) {
            Some(record) => {
                verify_record(locator, record)?;
                Ok(Some(record.clone()))
            }
            None => Ok(None),
        }
    }
}

impl BlobStore for MemoryBlobStore {
    fn write(
        &self,
        record: &BlobRecord,
        prefix: Option<&str>,
        cancel: &CancelToken,
    ) -> StoreResult<WriteReceipt> {
        cancel.check()?;
        let hash = record.hash();
        let locator = Locator::derive(prefix, &hash)?;
        let mut map = self.records.write().expect("lock poisoned");
        // Idempotent: identical payload maps to the same locator, so a
        // pre-existing entry is necessarily the same content.
        map.entry(locator.clone()).or_insert_with(|| record.clone());
        Ok(WriteReceipt {
            handle: Handle::flushed(NodeRef::standalone(locator, hash)),
            redirect: None,
        })
    }

    fn exists(&self, locator: &Locator) -> StoreResult<bool> {
        let map = self.records.read().expect("lock poisoned");
        Ok(map.contains_key(locator))
    }
}

impl std::fmt::Debug for MemoryBlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBlobStore")
            .field("record_count", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordKind;
    use cairn_types::Cancelled;
    use std::sync::Arc;

    fn write_blob(store: &MemoryBlobStore, payload: &[u8]) -> NodeRef {
        let record = BlobRecord::blob(payload.to_vec());
        store
            .write(&record, None, &CancelToken::new())
            .unwrap()
            .handle
            .resolve()
            .unwrap()
    }

    // -----------------------------------------------------------------------
    // Core read/write
    // -----------------------------------------------------------------------

    #[test]
    fn write_and_read_back() {
        let store = MemoryBlobStore::new();
        let node = write_blob(&store, b"hello world");

        let record = store
            .read(&node.locator, &CancelToken::new())
            .unwrap()
            .expect("should exist");
        assert_eq!(record.payload, b"hello world");
        assert_eq!(record.hash(), node.hash);
    }

    #[test]
    fn read_missing_returns_none() {
        let store = MemoryBlobStore::new();
        let locator = Locator::from_raw("missing");
        assert!(store.read(&locator, &CancelToken::new()).unwrap().is_none());
    }

    #[test]
    fn read_required_maps_to_not_found() {
        let store = MemoryBlobStore::new();
        let locator = Locator::from_raw("missing");
        let err = store
            .read_required(&locator, &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, crate::StoreError::NotFound(_)));
    }

    // -----------------------------------------------------------------------
    // Content addressing
    // -----------------------------------------------------------------------

    #[test]
    fn identical_payload_yields_same_locator_once() {
        let store = MemoryBlobStore::new();
        let a = write_blob(&store, b"identical content");
        let b = write_blob(&store, b"identical content");
        assert_eq!(a.locator, b.locator);
        assert_eq!(a.hash, b.hash);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn different_payloads_yield_different_locators() {
        let store = MemoryBlobStore::new();
        let a = write_blob(&store, b"aaa");
        let b = write_blob(&store, b"bbb");
        assert_ne!(a.locator, b.locator);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn prefix_shows_up_in_locator() {
        let store = MemoryBlobStore::new();
        let record = BlobRecord::blob(b"prefixed".to_vec());
        let receipt = store
            .write(&record, Some("chunk"), &CancelToken::new())
            .unwrap();
        let node = receipt.handle.resolve().unwrap();
        assert_eq!(node.locator.prefix(), Some("chunk"));
    }

    // -----------------------------------------------------------------------
    // Integrity
    // -----------------------------------------------------------------------

    #[test]
    fn corrupted_record_fails_read() {
        let store = MemoryBlobStore::new();
        let node = write_blob(&store, b"pristine");

        // Corrupt the stored payload behind the store's back.
        {
            let mut map = store.records.write().unwrap();
            map.get_mut(&node.locator).unwrap().payload = b"tampered".to_vec();
        }

        let err = store
            .read(&node.locator, &CancelToken::new())
            .unwrap_err();
        assert!(err.is_corruption());
    }

    // -----------------------------------------------------------------------
    // Streaming default
    // -----------------------------------------------------------------------

    #[test]
    fn write_stream_matches_write() {
        let store = MemoryBlobStore::new();
        let direct = write_blob(&store, b"streamed bytes");

        let mut cursor = std::io::Cursor::new(b"streamed bytes".to_vec());
        let receipt = store
            .write_stream(
                RecordKind::Blob,
                Vec::new(),
                &mut cursor,
                None,
                &CancelToken::new(),
            )
            .unwrap();
        assert_eq!(receipt.handle.resolve().unwrap().locator, direct.locator);
    }

    // -----------------------------------------------------------------------
    // Cancellation
    // -----------------------------------------------------------------------

    #[test]
    fn cancelled_token_aborts_operations() {
        let store = MemoryBlobStore::new();
        let cancel = CancelToken::new();
        cancel.cancel();

        let record = BlobRecord::blob(b"never stored".to_vec());
        let err = store.write(&record, None, &cancel).unwrap_err();
        assert!(matches!(err, crate::StoreError::Cancelled(Cancelled)));
        assert!(store.is_empty());
    }

    // -----------------------------------------------------------------------
    // Concurrency
    // -----------------------------------------------------------------------

    #[test]
    fn concurrent_reads_are_safe() {
        use std::thread;

        let store = Arc::new(MemoryBlobStore::new());
        let node = write_blob(&store, b"shared data");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                let locator = node.locator.clone();
                let expected = node.hash;
                thread::spawn(move || {
                    let record = store
                        .read(&locator, &CancelToken::new())
                        .unwrap()
                        .expect("should exist");
                    assert_eq!(record.hash(), expected);
                })
            })
            .collect();

        for h in handles {
            h.join().expect("thread should not panic");
        }
    }
}
