use thiserror::Error;

/// Errors from constructing or parsing core identifier types.
#[derive(Debug, Error)]
pub enum TypeError {
    /// A hex string could not be decoded.
    #[error("invalid hex: {0}")]
    InvalidHex(String),

    /// A decoded value had the wrong byte length.
    #[error("invalid length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    /// A locator or locator prefix is malformed.
    #[error("invalid locator: {reason}")]
    InvalidLocator { reason: String },
}
