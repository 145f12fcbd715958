use std::io::Read;

use cairn_types::{CancelToken, Locator};

use crate::error::{StoreError, StoreResult};
use crate::handle::Handle;
use crate::record::{BlobRecord, RecordKind};

/// Pre-signed transfer target returned by backends that support moving
/// payload bytes directly between the caller and the storage medium.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RedirectTarget {
    /// Where the caller should transfer the encoded record bytes.
    pub url: String,
    /// The locator the record will be readable under once transferred.
    pub locator: Locator,
}

/// Result of a blob write.
#[derive(Clone, Debug)]
pub struct WriteReceipt {
    /// Flushed handle for the written record.
    pub handle: Handle,
    /// Present when the backend redirected the transfer instead of moving
    /// the payload through the control path. The caller completes the
    /// transfer against [`RedirectTarget::url`]; until it does, and for
    /// eventually-consistent media some time after, a direct read of the
    /// locator may miss.
    pub redirect: Option<RedirectTarget>,
}

/// Read-only view of a blob store.
///
/// This is the subset the bundle reader and the cache layers consume; keeping
/// it separate means read paths cannot accidentally depend on write-side or
/// backend-specific behavior.
pub trait BlobReader: Send + Sync {
    /// Read a record by locator.
    ///
    /// Returns `Ok(None)` if the record does not exist. Implementations
    /// verify the recomputed payload hash against the locator and fail with
    /// [`StoreError::HashMismatch`] on disagreement -- corruption is never
    /// silently tolerated.
    fn read(&self, locator: &Locator, cancel: &CancelToken) -> StoreResult<Option<BlobRecord>>;

    /// Read a record that must exist, mapping absence to
    /// [`StoreError::NotFound`].
    fn read_required(&self, locator: &Locator, cancel: &CancelToken) -> StoreResult<BlobRecord> {
        self.read(locator, cancel)?
            .ok_or_else(|| StoreError::NotFound(locator.clone()))
    }
}

/// Content-addressed blob store.
///
/// All implementations must satisfy these invariants:
/// - Records are immutable once written; the same payload always resolves to
///   the same locator (idempotent write, no duplicate storage).
/// - The content hash covers the raw payload only, never the framing.
/// - Concurrent reads are always safe.
/// - All I/O errors are propagated, never silently ignored.
pub trait BlobStore: BlobReader {
    /// Write a record and return a flushed handle for it.
    ///
    /// If a record with the same payload already exists this is a no-op that
    /// returns the existing locator. Backends supporting pre-signed transfer
    /// may return a [`RedirectTarget`] instead of moving the payload through
    /// the control path; such writes are eventually consistent and callers
    /// requiring strong read-after-write must avoid the redirect path.
    fn write(
        &self,
        record: &BlobRecord,
        prefix: Option<&str>,
        cancel: &CancelToken,
    ) -> StoreResult<WriteReceipt>;

    /// Check whether a record exists.
    fn exists(&self, locator: &Locator) -> StoreResult<bool>;

    /// Write a record whose payload is streamed from `payload`.
    ///
    /// The default implementation buffers the stream and delegates to
    /// [`write`](BlobStore::write). Backends able to hash while spooling
    /// (e.g. the filesystem store) override this to avoid holding the whole
    /// payload in memory.
    fn write_stream(
        &self,
        kind: RecordKind,
        imports: Vec<Locator>,
        payload: &mut dyn Read,
        prefix: Option<&str>,
        cancel: &CancelToken,
    ) -> StoreResult<WriteReceipt> {
        cancel.check()?;
        let mut buf = Vec::new();
        payload.read_to_end(&mut buf)?;
        self.write(&BlobRecord::new(kind, imports, buf), prefix, cancel)
    }
}

/// Verify a read-back record against the hash embedded in its locator.
///
/// Shared by every backend so the integrity contract cannot drift between
/// implementations. Locators without an embedded hash (foreign schemes) are
/// accepted as-is.
pub fn verify_record(locator: &Locator, record: &BlobRecord) -> StoreResult<()> {
    if let Some(expected) = locator.embedded_hash() {
        let computed = record.hash();
        if computed != expected {
            return Err(StoreError::HashMismatch {
                locator: locator.clone(),
                expected: expected.to_hex(),
                computed: computed.to_hex(),
            });
        }
    }
    Ok(())
}
