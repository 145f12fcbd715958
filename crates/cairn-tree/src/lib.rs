//! Directory and file trees over the bundle layer.
//!
//! Files are split with content-defined chunking: a gear rolling hash picks
//! boundaries from the bytes themselves, so an insertion early in a file
//! shifts only nearby chunks and everything after the next boundary
//! deduplicates against the previous version. Each chunk becomes a leaf node
//! in a bundle; multi-chunk files get an interior node carrying ordered child
//! references with cumulative lengths; directories are appended only after
//! all children, making a directory hash a pure function of its resolved
//! subtree. Identical subtrees anywhere collapse to one stored instance.
//!
//! [`pack`] walks a source directory into a [`BundleWriter`]; [`unpack`]
//! recreates the tree byte-for-byte, preserving zero-length files. Extraction
//! failures leave partially-written files behind: there is no directory-level
//! atomicity here, and callers wanting it should extract to a staging path
//! and rename.
//!
//! [`BundleWriter`]: cairn_bundle::BundleWriter

pub mod chunker;
pub mod error;
pub mod node;
pub mod pack;
pub mod unpack;

// Re-export primary types at crate root for ergonomic imports.
pub use chunker::{ChunkStream, Chunker, ChunkerConfig};
pub use error::{TreeError, TreeResult};
pub use node::{ChunkIndexNode, DirEntry, DirNode, EntryKind};
pub use pack::pack;
pub use unpack::unpack;
