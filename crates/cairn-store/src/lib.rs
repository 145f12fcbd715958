//! Durable content-addressed blob storage for Cairn.
//!
//! Every record in Cairn -- raw blobs and packed bundles alike -- is stored as
//! an immutable [`BlobRecord`] addressed by a [`Locator`](cairn_types::Locator)
//! derived from its payload hash.
//!
//! # Design Rules
//!
//! 1. Blobs are immutable once written; content-addressing guarantees that
//!    the same payload always resolves to the same locator (idempotent write).
//! 2. The content hash covers the raw payload only, never the record framing.
//! 3. Reads verify the recomputed payload hash against the locator; a
//!    mismatch is surfaced as corruption, never silently tolerated.
//! 4. Concurrent reads are always safe (records are immutable).
//! 5. All backends implement the one [`BlobStore`] trait; no backend-specific
//!    logic leaks into callers.
//! 6. All I/O errors are propagated, never silently ignored.
//!
//! # Backends
//!
//! - [`MemoryBlobStore`] -- `HashMap`-based store for tests and embedding
//! - [`FsBlobStore`] -- sharded object directory with atomic rename writes
//! - [`KvBlobStore`] -- adapter over any [`KvBackend`] key/value medium
//! - [`RemoteBlobStore`] -- remote endpoint with optional pre-signed redirect
//!   transfers for large payloads

pub mod error;
pub mod fs;
pub mod handle;
pub mod kv;
pub mod memory;
pub mod record;
pub mod remote;
pub mod traits;
pub mod varint;

// Re-export primary types at crate root for ergonomic imports.
pub use error::{StoreError, StoreResult};
pub use fs::FsBlobStore;
pub use handle::{Handle, NodeRef};
pub use kv::{KvBackend, KvBlobStore, MemoryKvBackend};
pub use memory::MemoryBlobStore;
pub use record::{BlobRecord, RecordKind};
pub use remote::{InProcessTransport, RemoteBlobStore, RemoteTransport};
pub use traits::{BlobReader, BlobStore, RedirectTarget, WriteReceipt};
