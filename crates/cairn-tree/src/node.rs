//! Binary encodings of directory and chunked-file nodes.
//!
//! Leaf nodes are raw chunk bytes with no framing, so a node payload must be
//! interpreted through its parent: directory entries carry the child's kind.
//! Directory and chunk-index payloads embed each child's content hash, which
//! makes a node's hash a pure function of its fully-resolved subtree --
//! identical subtrees hash identically wherever they appear.

use cairn_store::varint::{decode_varint, encode_varint};
use cairn_types::ContentHash;

use crate::error::{TreeError, TreeResult};

/// What a directory entry points at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    /// A file stored as a single leaf node.
    File,
    /// A file stored as a chunk-index node fanning out to leaf chunks.
    ChunkedFile,
    /// A subdirectory node.
    Dir,
}

impl EntryKind {
    /// Serialize to a kind byte.
    pub fn kind_byte(&self) -> u8 {
        match self {
            Self::File => 1,
            Self::ChunkedFile => 2,
            Self::Dir => 3,
        }
    }

    /// Parse from a kind byte.
    pub fn from_kind_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::File),
            2 => Some(Self::ChunkedFile),
            3 => Some(Self::Dir),
            _ => None,
        }
    }
}

/// One entry in a directory node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    /// Entry name (no path separators).
    pub name: String,
    /// How to interpret the child node.
    pub kind: EntryKind,
    /// Total file bytes (zero for directories).
    pub size: u64,
    /// Content hash of the child node's payload.
    pub hash: ContentHash,
}

/// Ordered mapping of unique names to child entries.
///
/// Entries are sorted by name; the node's reference list in the export table
/// carries the children in the same order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DirNode {
    pub entries: Vec<DirEntry>,
}

impl DirNode {
    /// Create a directory node, sorting entries by name.
    pub fn new(mut entries: Vec<DirEntry>) -> Self {
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Self { entries }
    }

    /// Look up an entry by name.
    pub fn get(&self, name: &str) -> Option<&DirEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` for an empty directory.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Encode to the node payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(16 + self.entries.len() * 48);
        encode_varint(&mut buf, self.entries.len() as u64);
        for entry in &self.entries {
            buf.push(entry.kind.kind_byte());
            let raw = entry.name.as_bytes();
            encode_varint(&mut buf, raw.len() as u64);
            buf.extend_from_slice(raw);
            encode_varint(&mut buf, entry.size);
            buf.extend_from_slice(entry.hash.as_bytes());
        }
        buf
    }

    /// Decode from a node payload.
    pub fn decode(data: &[u8]) -> TreeResult<Self> {
        let mut pos = 0;
        let (count, consumed) =
            decode_varint(data).map_err(|e| malformed(format!("entry count: {e}")))?;
        pos += consumed;

        let mut entries = Vec::with_capacity(count as usize);
        for i in 0..count {
            let kind_byte = *data
                .get(pos)
                .ok_or_else(|| malformed(format!("entry {i}: truncated kind")))?;
            let kind = EntryKind::from_kind_byte(kind_byte)
                .ok_or_else(|| malformed(format!("entry {i}: unknown kind byte {kind_byte}")))?;
            pos += 1;

            let (name_len, consumed) = decode_varint(&data[pos..])
                .map_err(|e| malformed(format!("entry {i} name length: {e}")))?;
            pos += consumed;
            let end = pos + name_len as usize;
            let raw = data
                .get(pos..end)
                .ok_or_else(|| malformed(format!("entry {i}: name truncated")))?;
            let name = std::str::from_utf8(raw)
                .map_err(|_| malformed(format!("entry {i}: name is not valid UTF-8")))?
                .to_string();
            pos = end;

            let (size, consumed) = decode_varint(&data[pos..])
                .map_err(|e| malformed(format!("entry {i} size: {e}")))?;
            pos += consumed;

            let digest = data
                .get(pos..pos + 32)
                .ok_or_else(|| malformed(format!("entry {i}: hash truncated")))?;
            pos += 32;

            entries.push(DirEntry {
                name,
                kind,
                size,
                hash: ContentHash::from_digest(digest.try_into().expect("slice is 32 bytes")),
            });
        }

        if pos != data.len() {
            return Err(malformed(format!(
                "{} trailing bytes after directory entries",
                data.len() - pos
            )));
        }

        // Names must be sorted and unique for hash determinism.
        for pair in entries.windows(2) {
            if pair[0].name >= pair[1].name {
                return Err(malformed(format!(
                    "entries out of order: {:?} before {:?}",
                    pair[0].name, pair[1].name
                )));
            }
        }

        Ok(Self { entries })
    }
}

/// Interior node of a chunked file: ordered chunk hashes with cumulative
/// end offsets, enabling reconstruction or partial reads without touching
/// unrelated chunks.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChunkIndexNode {
    /// For chunk `i`: the total file length through the end of chunk `i`.
    pub cumulative_ends: Vec<u64>,
    /// Content hash of each chunk, in file order.
    pub chunk_hashes: Vec<ContentHash>,
}

impl ChunkIndexNode {
    /// Build from per-chunk (length, hash) pairs in file order.
    pub fn from_chunks(chunks: &[(u64, ContentHash)]) -> Self {
        let mut cumulative_ends = Vec::with_capacity(chunks.len());
        let mut chunk_hashes = Vec::with_capacity(chunks.len());
        let mut total = 0u64;
        for (len, hash) in chunks {
            total += len;
            cumulative_ends.push(total);
            chunk_hashes.push(*hash);
        }
        Self {
            cumulative_ends,
            chunk_hashes,
        }
    }

    /// Total file length.
    pub fn total_len(&self) -> u64 {
        self.cumulative_ends.last().copied().unwrap_or(0)
    }

    /// Number of chunks.
    pub fn len(&self) -> usize {
        self.chunk_hashes.len()
    }

    /// Returns `true` if the file has no chunks.
    pub fn is_empty(&self) -> bool {
        self.chunk_hashes.is_empty()
    }

    /// Length of chunk `i`.
    pub fn chunk_len(&self, i: usize) -> u64 {
        let start = if i == 0 {
            0
        } else {
            self.cumulative_ends[i - 1]
        };
        self.cumulative_ends[i] - start
    }

    /// Index of the chunk containing byte `offset`, for partial reads.
    pub fn chunk_for_offset(&self, offset: u64) -> Option<usize> {
        if offset >= self.total_len() {
            return None;
        }
        Some(self.cumulative_ends.partition_point(|&end| end <= offset))
    }

    /// Encode to the node payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8 + self.chunk_hashes.len() * 40);
        encode_varint(&mut buf, self.chunk_hashes.len() as u64);
        for (end, hash) in self.cumulative_ends.iter().zip(&self.chunk_hashes) {
            encode_varint(&mut buf, *end);
            buf.extend_from_slice(hash.as_bytes());
        }
        buf
    }

    /// Decode from a node payload.
    pub fn decode(data: &[u8]) -> TreeResult<Self> {
        let mut pos = 0;
        let (count, consumed) =
            decode_varint(data).map_err(|e| malformed(format!("chunk count: {e}")))?;
        pos += consumed;

        let mut cumulative_ends = Vec::with_capacity(count as usize);
        let mut chunk_hashes = Vec::with_capacity(count as usize);
        let mut prev = 0u64;
        for i in 0..count {
            let (end, consumed) = decode_varint(&data[pos..])
                .map_err(|e| malformed(format!("chunk {i} cumulative end: {e}")))?;
            pos += consumed;
            if end < prev || (end == prev && i > 0) {
                return Err(malformed(format!(
                    "chunk {i}: cumulative ends not increasing ({prev} then {end})"
                )));
            }
            prev = end;

            let digest = data
                .get(pos..pos + 32)
                .ok_or_else(|| malformed(format!("chunk {i}: hash truncated")))?;
            pos += 32;

            cumulative_ends.push(end);
            chunk_hashes.push(ContentHash::from_digest(
                digest.try_into().expect("slice is 32 bytes"),
            ));
        }

        if pos != data.len() {
            return Err(malformed(format!(
                "{} trailing bytes after chunk index",
                data.len() - pos
            )));
        }

        Ok(Self {
            cumulative_ends,
            chunk_hashes,
        })
    }
}

fn malformed(reason: impl Into<String>) -> TreeError {
    TreeError::MalformedNode {
        reason: reason.into(),
    }
}
