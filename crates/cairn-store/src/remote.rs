use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use cairn_types::{CancelToken, Locator};

use crate::error::StoreResult;
use crate::handle::{Handle, NodeRef};
use crate::record::BlobRecord;
use crate::traits::{verify_record, BlobReader, BlobStore, RedirectTarget, WriteReceipt};

/// Wire transport to a remote blob endpoint.
///
/// The store adapter handles framing, hashing and verification; transports
/// only move opaque bytes. A transport that supports pre-signed transfers
/// returns a URL from [`presign_put`](RemoteTransport::presign_put) and the
/// store will redirect large payloads instead of shipping them through the
/// control path.
pub trait RemoteTransport: Send + Sync {
    /// Upload bytes under `key` through the control path.
    fn put(&self, key: &str, bytes: &[u8], cancel: &CancelToken) -> StoreResult<()>;

    /// Fetch the bytes stored under `key`, if present.
    fn get(&self, key: &str, cancel: &CancelToken) -> StoreResult<Option<Vec<u8>>>;

    /// Check whether `key` exists.
    fn contains(&self, key: &str) -> StoreResult<bool>;

    /// Pre-sign a direct upload for `key`, or `None` if unsupported.
    fn presign_put(&self, key: &str) -> StoreResult<Option<String>>;
}

/// Remote blob store with optional pre-signed redirect for large payloads.
///
/// Payloads at or above `redirect_threshold` are not uploaded through the
/// control path; instead the caller receives a [`RedirectTarget`] and moves
/// the encoded record to the target itself. Redirected writes are eventually
/// consistent: a subsequent direct read may miss until the transfer lands.
/// Callers requiring strong read-after-write consistency should disable the
/// threshold.
pub struct RemoteBlobStore {
    transport: Arc<dyn RemoteTransport>,
    redirect_threshold: Option<usize>,
}

impl RemoteBlobStore {
    /// Default payload size at which writes are redirected.
    pub const DEFAULT_REDIRECT_THRESHOLD: usize = 1024 * 1024;

    /// Create a store over `transport` with the default redirect threshold.
    pub fn new(transport: Arc<dyn RemoteTransport>) -> Self {
        Self {
            transport,
            redirect_threshold: Some(Self::DEFAULT_REDIRECT_THRESHOLD),
        }
    }

    /// Override or disable (`None`) the redirect threshold.
    pub fn with_redirect_threshold(mut self, threshold: Option<usize>) -> Self {
        self.redirect_threshold = threshold;
        self
    }
}

impl BlobReader for RemoteBlobStore {
    fn read(&self, locator: &Locator, cancel: &CancelToken) -> StoreResult<Option<BlobRecord>> {
        cancel.check()?;
        match self.transport.get(locator.as_str(), cancel)? {
            Some(bytes) => {
                let record = BlobRecord::decode(&bytes)?;
                verify_record(locator, &record)?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }
}

impl BlobStore for RemoteBlobStore {
    fn write(
        &self,
        record: &BlobRecord,
        prefix: Option<&str>,
        cancel: &CancelToken,
    ) -> StoreResult<WriteReceipt> {
        cancel.check()?;
        let hash = record.hash();
        let locator = Locator::derive(prefix, &hash)?;
        let handle = Handle::flushed(NodeRef::standalone(locator.clone(), hash));

        let wants_redirect = self
            .redirect_threshold
            .is_some_and(|t| record.payload.len() >= t);
        if wants_redirect {
            if let Some(url) = self.transport.presign_put(locator.as_str())? {
                tracing::debug!(locator = %locator, "redirecting large payload transfer");
                return Ok(WriteReceipt {
                    handle,
                    redirect: Some(RedirectTarget { url, locator }),
                });
            }
        }

        if !self.transport.contains(locator.as_str())? {
            self.transport
                .put(locator.as_str(), &record.encode(), cancel)?;
        }
        Ok(WriteReceipt {
            handle,
            redirect: None,
        })
    }

    fn exists(&self, locator: &Locator) -> StoreResult<bool> {
        self.transport.contains(locator.as_str())
    }
}

impl std::fmt::Debug for RemoteBlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteBlobStore")
            .field("redirect_threshold", &self.redirect_threshold)
            .finish()
    }
}

/// In-process [`RemoteTransport`] for tests and embedding.
///
/// Models the consistency behavior of a real redirecting endpoint: bytes
/// transferred against a pre-signed URL land in a pending area and only
/// become readable after [`settle`](InProcessTransport::settle), mirroring
/// the eventual consistency of redirected writes.
#[derive(Default)]
pub struct InProcessTransport {
    visible: RwLock<HashMap<String, Vec<u8>>>,
    pending: RwLock<HashMap<String, Vec<u8>>>,
}

impl InProcessTransport {
    const URL_SCHEME: &'static str = "inproc://";

    /// Create an empty transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Complete a redirected transfer: deliver `bytes` to a pre-signed URL.
    pub fn complete_redirect(&self, url: &str, bytes: &[u8]) -> bool {
        match url.strip_prefix(Self::URL_SCHEME) {
            Some(key) => {
                self.pending
                    .write()
                    .expect("lock poisoned")
                    .insert(key.to_string(), bytes.to_vec());
                true
            }
            None => false,
        }
    }

    /// Make all completed redirected transfers visible to reads.
    pub fn settle(&self) {
        let mut pending = self.pending.write().expect("lock poisoned");
        let mut visible = self.visible.write().expect("lock poisoned");
        for (key, bytes) in pending.drain() {
            visible.entry(key).or_insert(bytes);
        }
    }
}

impl RemoteTransport for InProcessTransport {
    fn put(&self, key: &str, bytes: &[u8], cancel: &CancelToken) -> StoreResult<()> {
        cancel.check()?;
        self.visible
            .write()
            .expect("lock poisoned")
            .entry(key.to_string())
            .or_insert_with(|| bytes.to_vec());
        Ok(())
    }

    fn get(&self, key: &str, cancel: &CancelToken) -> StoreResult<Option<Vec<u8>>> {
        cancel.check()?;
        let map = self.visible.read().expect("lock poisoned");
        Ok(map.get(key).cloned())
    }

    fn contains(&self, key: &str) -> StoreResult<bool> {
        let map = self.visible.read().expect("lock poisoned");
        Ok(map.contains_key(key))
    }

    fn presign_put(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(Some(format!("{}{key}", Self::URL_SCHEME)))
    }
}
