use cairn_refs::RefError;
use cairn_store::StoreError;
use cairn_types::{Cancelled, Locator};

/// Errors from bundle packing and reading.
#[derive(Debug, thiserror::Error)]
pub enum BundleError {
    /// The bundle's bytes are malformed, truncated, or fail verification.
    ///
    /// `offset` is the byte position within the bundle payload where decoding
    /// failed. Corruption is fatal to the operation and never masked.
    #[error("corrupt bundle {locator} at offset {offset}: {reason}")]
    Corruption {
        locator: Locator,
        offset: u64,
        reason: String,
    },

    /// An import's recorded export count disagrees with the opened target.
    ///
    /// This is a corruption-class failure: the import table was written
    /// against a different version of the target than the one resolved.
    #[error(
        "import count mismatch in {locator}: {import} has {actual} exports, {recorded} recorded"
    )]
    ImportCountMismatch {
        locator: Locator,
        import: Locator,
        recorded: u32,
        actual: u32,
    },

    /// The referenced bundle blob does not exist.
    #[error("bundle not found: {0}")]
    NotFound(Locator),

    /// An export index is outside the bundle's export table.
    #[error("export {index} out of range for {locator} ({count} exports)")]
    ExportOutOfRange {
        locator: Locator,
        index: u32,
        count: u32,
    },

    /// The writer has already flushed; no further nodes can be appended.
    #[error("bundle writer is closed")]
    WriterClosed,

    /// A reference handle is buffered in another writer and not yet durable.
    #[error("referenced node is not flushed and does not belong to this writer")]
    UnflushedReference,

    /// Packet compression failed.
    #[error("compression failed: {0}")]
    Compression(String),

    /// Failure in the underlying blob store.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Failure updating the ref index.
    #[error(transparent)]
    Ref(#[from] RefError),

    /// The operation observed a cancelled token.
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

impl BundleError {
    /// Returns `true` for corruption-class failures (fatal, never masked).
    pub fn is_corruption(&self) -> bool {
        match self {
            Self::Corruption { .. } | Self::ImportCountMismatch { .. } => true,
            Self::Store(e) => e.is_corruption(),
            _ => false,
        }
    }
}

/// Result alias for bundle operations.
pub type BundleResult<T> = Result<T, BundleError>;
