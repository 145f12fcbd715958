use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Cryptographic digest of a record's raw payload.
///
/// A `ContentHash` is the domain-separated BLAKE3 hash of a payload. Identical
/// payloads always produce the same hash, making records deduplicatable and
/// verifiable. The hash never covers framing bytes (kind tags, import tables):
/// it is a pure function of the payload.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Create a `ContentHash` from a pre-computed digest.
    pub fn from_digest(digest: [u8; 32]) -> Self {
        Self(digest)
    }

    /// The null hash (all zeros). Represents "no content".
    pub const fn null() -> Self {
        Self([0u8; 32])
    }

    /// Returns `true` if this is the null hash.
    pub fn is_null(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// The raw 32-byte digest.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Hex-encoded string representation.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short hex representation (first 8 characters).
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..4])
    }

    /// Parse from a hex string.
    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        let bytes = hex::decode(s).map_err(|e| TypeError::InvalidHex(e.to_string()))?;
        if bytes.len() != 32 {
            return Err(TypeError::InvalidLength {
                expected: 32,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.short_hex())
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl From<[u8; 32]> for ContentHash {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl From<ContentHash> for [u8; 32] {
    fn from(hash: ContentHash) -> Self {
        hash.0
    }
}

/// Domain-separated BLAKE3 hasher.
///
/// Each domain carries a tag (e.g. `"cairn-blob-v1"`) that is prepended to
/// every hash computation, so records of different kinds with identical bytes
/// never collide.
pub struct HashDomain {
    tag: &'static str,
}

impl HashDomain {
    /// Domain for opaque blob payloads.
    pub const BLOB: Self = Self {
        tag: "cairn-blob-v1",
    };
    /// Domain for bundle container payloads.
    pub const BUNDLE: Self = Self {
        tag: "cairn-bundle-v1",
    };
    /// Domain for logical nodes packed inside bundles (chunks, tree nodes).
    pub const NODE: Self = Self {
        tag: "cairn-node-v1",
    };

    /// Create a hasher with a custom domain tag.
    pub const fn new(tag: &'static str) -> Self {
        Self { tag }
    }

    /// Hash a payload with domain separation.
    pub fn hash(&self, payload: &[u8]) -> ContentHash {
        ContentHash::from_digest(*self.hasher().update(payload).finalize().as_bytes())
    }

    /// Incremental hasher pre-seeded with this domain, for streaming payloads.
    pub fn hasher(&self) -> blake3::Hasher {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.tag.as_bytes());
        hasher.update(b":");
        hasher
    }

    /// Verify that a payload produces the expected hash.
    pub fn verify(&self, payload: &[u8], expected: &ContentHash) -> bool {
        self.hash(payload) == *expected
    }

    /// The domain tag.
    pub fn tag(&self) -> &str {
        self.tag
    }
}
