use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use cairn_types::{CancelToken, Locator};

use crate::error::StoreResult;
use crate::handle::{Handle, NodeRef};
use crate::record::BlobRecord;
use crate::traits::{verify_record, BlobReader, BlobStore, WriteReceipt};

/// Minimal key/value medium a [`KvBlobStore`] can sit on.
///
/// Implementations only move opaque bytes; framing, hashing and verification
/// all stay in the store adapter so any embedded or hosted KV service can
/// serve as a backend without reimplementing the contract.
pub trait KvBackend: Send + Sync {
    /// Fetch the value stored under `key`, if any.
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Store `value` under `key`. Overwriting an existing key with identical
    /// bytes must be a no-op.
    fn put(&self, key: &str, value: &[u8]) -> StoreResult<()>;

    /// Check whether `key` exists.
    fn contains(&self, key: &str) -> StoreResult<bool>;
}

/// In-memory [`KvBackend`] for tests and embedding.
#[derive(Default)]
pub struct MemoryKvBackend {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryKvBackend {
    /// Create a new empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys stored.
    pub fn len(&self) -> usize {
        self.entries.read().expect("lock poisoned").len()
    }

    /// Returns `true` if no keys are stored.
    pub fn is_empty(&self) -> bool {
        self.entries.read().expect("lock poisoned").is_empty()
    }
}

impl KvBackend for MemoryKvBackend {
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let map = self.entries.read().expect("lock poisoned");
        Ok(map.get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        let mut map = self.entries.write().expect("lock poisoned");
        map.entry(key.to_string()).or_insert_with(|| value.to_vec());
        Ok(())
    }

    fn contains(&self, key: &str) -> StoreResult<bool> {
        let map = self.entries.read().expect("lock poisoned");
        Ok(map.contains_key(key))
    }
}

/// Blob store adapter over any [`KvBackend`].
///
/// Records are stored under their locator string, encoded with the standard
/// record framing; the namespace prefix keeps multiple stores from colliding
/// on a shared medium.
pub struct KvBlobStore {
    backend: Arc<dyn KvBackend>,
    namespace: String,
}

impl KvBlobStore {
    /// Create a store over `backend`, scoping all keys with `namespace`.
    pub fn new(backend: Arc<dyn KvBackend>, namespace: impl Into<String>) -> Self {
        Self {
            backend,
            namespace: namespace.into(),
        }
    }

    fn key_for(&self, locator: &Locator) -> String {
        format!("{}/{}", self.namespace, locator)
    }
}

impl BlobReader for KvBlobStore {
    fn read(&self, locator: &Locator, cancel: &CancelToken) -> StoreResult<Option<BlobRecord>> {
        cancel.check()?;
        match self.backend.get(&self.key_for(locator))? {
            Some(bytes) => {
                let record = BlobRecord::decode(&bytes)?;
                verify_record(locator, &record)?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }
}

impl BlobStore for KvBlobStore {
    fn write(
        &self,
        record: &BlobRecord,
        prefix: Option<&str>,
        cancel: &CancelToken,
    ) -> StoreResult<WriteReceipt> {
        cancel.check()?;
        let hash = record.hash();
        let locator = Locator::derive(prefix, &hash)?;
        self.backend.put(&self.key_for(&locator), &record.encode())?;
        Ok(WriteReceipt {
            handle: Handle::flushed(NodeRef::standalone(locator, hash)),
            redirect: None,
        })
    }

    fn exists(&self, locator: &Locator) -> StoreResult<bool> {
        self.backend.contains(&self.key_for(locator))
    }
}

impl std::fmt::Debug for KvBlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvBlobStore")
            .field("namespace", &self.namespace)
            .finish()
    }
}
