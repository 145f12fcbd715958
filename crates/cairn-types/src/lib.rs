//! Core identifiers and shared primitives for the Cairn bundle store.
//!
//! Every durable byte record in Cairn is addressed by a [`Locator`] and
//! verified against a [`ContentHash`]. The hash is always computed over the
//! record's raw payload only -- never over framing bytes -- so that hashes
//! stay stable across storage backends and container formats. Cross-bundle
//! import validation depends on that boundary holding everywhere.
//!
//! Long-running operations take a [`CancelToken`], a shared flag checked at
//! operation boundaries. Cancellation surfaces as [`Cancelled`], which every
//! layer maps into its own error type.

pub mod cancel;
pub mod error;
pub mod hash;
pub mod locator;

// Re-export primary types at crate root for ergonomic imports.
pub use cancel::{CancelToken, Cancelled};
pub use error::TypeError;
pub use hash::{ContentHash, HashDomain};
pub use locator::Locator;
