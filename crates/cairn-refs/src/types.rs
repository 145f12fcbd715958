use cairn_types::{ContentHash, Locator};
use serde::{Deserialize, Serialize};

/// What a ref points at: the root node's content hash plus the locator of the
/// blob containing it.
///
/// Both halves travel together so a reader can fetch the blob and verify the
/// root hash without a second index lookup.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefTarget {
    /// Content hash of the root node.
    pub hash: ContentHash,
    /// Locator of the blob (bundle) holding the root node.
    pub locator: Locator,
}

impl RefTarget {
    /// Create a new target.
    pub fn new(hash: ContentHash, locator: Locator) -> Self {
        Self { hash, locator }
    }
}

/// One entry in the alias discovery index.
///
/// Many targets may share an alias name; `rank` breaks ties (higher wins),
/// and at equal rank the most recently added entry wins. `data` is an opaque
/// payload for the publisher (version strings, platform tags).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasEntry {
    /// Locator of the aliased blob.
    pub locator: Locator,
    /// Tie-break rank; higher ranks sort first.
    pub rank: u64,
    /// Opaque publisher data carried with the entry.
    #[serde(with = "serde_bytes_vec")]
    pub data: Vec<u8>,
}

impl AliasEntry {
    /// Create a new alias entry.
    pub fn new(locator: Locator, rank: u64, data: Vec<u8>) -> Self {
        Self {
            locator,
            rank,
            data,
        }
    }
}

/// Compact JSON encoding for opaque alias data (hex string rather than a
/// byte-per-element array).
mod serde_bytes_vec {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        hex::decode(&text).map_err(serde::de::Error::custom)
    }
}
