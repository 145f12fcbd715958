use cairn_types::{Cancelled, Locator, TypeError};

/// Errors from blob store operations.
///
/// The taxonomy matters to callers: absence ([`NotFound`]), corruption
/// ([`HashMismatch`], [`MalformedRecord`]), transient I/O ([`Io`]) and
/// cancellation ([`Cancelled`]) each call for a different response, so they
/// are never collapsed into a generic failure.
///
/// [`NotFound`]: StoreError::NotFound
/// [`HashMismatch`]: StoreError::HashMismatch
/// [`MalformedRecord`]: StoreError::MalformedRecord
/// [`Io`]: StoreError::Io
/// [`Cancelled`]: StoreError::Cancelled
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested record was not found.
    #[error("blob not found: {0}")]
    NotFound(Locator),

    /// Content hash mismatch on read (data corruption).
    #[error("hash mismatch for {locator}: expected {expected}, computed {computed}")]
    HashMismatch {
        locator: Locator,
        expected: String,
        computed: String,
    },

    /// The record framing is malformed or truncated.
    #[error("malformed record: {reason}")]
    MalformedRecord { reason: String },

    /// A buffered handle was used where a flushed node reference is required.
    #[error("handle is not flushed")]
    NotFlushed,

    /// Identifier construction or parsing failed.
    #[error(transparent)]
    Type(#[from] TypeError),

    /// I/O error from the underlying storage medium. Retryable by the
    /// caller; never retried internally.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The operation observed a cancelled token.
    #[error(transparent)]
    Cancelled(#[from] Cancelled),

    /// Serialization or deserialization failure in backend metadata.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Returns `true` for corruption-class failures (fatal, never masked).
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::HashMismatch { .. } | Self::MalformedRecord { .. }
        )
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
