use thiserror::Error;

/// Errors from ref and alias index operations.
#[derive(Debug, Error)]
pub enum RefError {
    /// A ref or alias name failed validation.
    #[error("invalid name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },

    /// I/O error from the underlying storage.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored ref or alias document could not be decoded.
    #[error("corrupt index document {path}: {reason}")]
    CorruptDocument { path: String, reason: String },

    /// Serialization failure while persisting a document.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result alias for ref operations.
pub type RefResult<T> = Result<T, RefError>;
