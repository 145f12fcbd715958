//! The bundle container: packing many logical nodes into one physical blob.
//!
//! Storing every chunk and tree node as its own blob would drown a backend in
//! tiny objects. A *bundle* batches them: one blob whose payload is a header
//! (Imports, Exports, Packets tables) followed by concatenated compressed
//! packet bytes.
//!
//! - An **export** is a node defined in this bundle: hash, byte length, and
//!   the references it holds (local export indices or import-table entries).
//! - An **import** names another bundle: its locator, the subset of its
//!   exports actually used, and that bundle's total export count, recorded so
//!   resolution can detect a swapped or truncated target.
//! - A **packet** is one compressed run of concatenated export payloads.
//!
//! [`BundleWriter`] is the single-producer packer: appends assign export
//! indices monotonically, packet thresholds bound memory, and flush writes
//! the bundle as one blob before any ref is published. [`Bundle`] parses the
//! header lazily and decompresses packets on first touch. Memoizing repeated
//! opens is deliberately left to the layered cache above the store.

pub mod dump;
pub mod error;
pub mod format;
pub mod reader;
pub mod writer;

// Re-export primary types at crate root for ergonomic imports.
pub use dump::BundleDump;
pub use error::{BundleError, BundleResult};
pub use format::{
    Compression, ExportEntry, ImportEntry, PacketEntry, RefSlot, BUNDLE_MAGIC, BUNDLE_VERSION,
};
pub use reader::{Bundle, BundleOpener, ResolvedNode};
pub use writer::{BundleWriter, PacketLimit};
