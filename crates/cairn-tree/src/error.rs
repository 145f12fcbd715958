use std::path::PathBuf;

use cairn_bundle::BundleError;
use cairn_store::StoreError;
use cairn_types::{Cancelled, ContentHash, Locator};

/// Errors from tree packing and extraction.
#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    /// Chunker configuration is unusable.
    #[error("invalid chunk bounds: {reason}")]
    InvalidChunkBounds { reason: String },

    /// A tree node payload could not be decoded.
    #[error("malformed tree node: {reason}")]
    MalformedNode { reason: String },

    /// The pack source is not a directory.
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),

    /// The referenced root node is not present in its bundle.
    #[error("root node {hash} not found in bundle {locator}")]
    RootNotFound {
        locator: Locator,
        hash: ContentHash,
    },

    /// The walk encountered a file type the codec does not represent.
    #[error("unsupported file type: {0}")]
    UnsupportedFileType(PathBuf),

    /// Failure walking the source tree.
    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),

    /// I/O failure reading the source or writing the extraction target.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failure in the bundle layer.
    #[error(transparent)]
    Bundle(#[from] BundleError),

    /// Failure in the blob store.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The operation observed a cancelled token.
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

/// Result alias for tree operations.
pub type TreeResult<T> = Result<T, TreeError>;
