use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use cairn_bundle::{Compression, PacketLimit};
use cairn_cache::LocalCacheConfig;
use cairn_tree::ChunkerConfig;
use serde::{Deserialize, Serialize};

/// Configuration for the cairn CLI.
///
/// Loaded from a TOML file; every field has a default, so a partial (or
/// absent) file works. Flags override the file.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root directory for the blob store and ref index.
    pub store_root: PathBuf,
    /// Packet compression: "zstd" or "none".
    pub compression: String,
    /// Content-defined chunking bounds, in bytes.
    pub chunk: ChunkSection,
    /// Packet thresholds bounding writer memory.
    pub packet: PacketSection,
    /// Local read cache sizing and expiration.
    pub cache: CacheSection,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkSection {
    pub min_size: usize,
    pub avg_size: usize,
    pub max_size: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PacketSection {
    pub max_bytes: usize,
    pub max_nodes: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub max_bytes: u64,
    pub positive_ttl_secs: u64,
    pub negative_ttl_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_root: PathBuf::from(".cairn"),
            compression: "zstd".to_string(),
            chunk: ChunkSection::default(),
            packet: PacketSection::default(),
            cache: CacheSection::default(),
        }
    }
}

impl Default for ChunkSection {
    fn default() -> Self {
        let defaults = ChunkerConfig::default();
        Self {
            min_size: defaults.min_size,
            avg_size: defaults.avg_size,
            max_size: defaults.max_size,
        }
    }
}

impl Default for PacketSection {
    fn default() -> Self {
        let defaults = PacketLimit::default();
        Self {
            max_bytes: defaults.max_bytes,
            max_nodes: defaults.max_nodes,
        }
    }
}

impl Default for CacheSection {
    fn default() -> Self {
        let defaults = LocalCacheConfig::default();
        Self {
            max_bytes: defaults.max_bytes,
            positive_ttl_secs: defaults.positive_ttl.as_secs(),
            negative_ttl_secs: defaults.negative_ttl.as_secs(),
        }
    }
}

impl Config {
    /// Load configuration.
    ///
    /// An explicit `path` must exist; otherwise `./cairn.toml` is used when
    /// present, else defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let chosen = match path {
            Some(path) => Some(path.to_path_buf()),
            None => {
                let default = PathBuf::from("cairn.toml");
                default.exists().then_some(default)
            }
        };
        match chosen {
            Some(path) => {
                let text = std::fs::read_to_string(&path)
                    .with_context(|| format!("reading config {}", path.display()))?;
                toml::from_str(&text)
                    .with_context(|| format!("parsing config {}", path.display()))
            }
            None => Ok(Self::default()),
        }
    }

    /// The chunker bounds.
    pub fn chunker_config(&self) -> ChunkerConfig {
        ChunkerConfig {
            min_size: self.chunk.min_size,
            avg_size: self.chunk.avg_size,
            max_size: self.chunk.max_size,
        }
    }

    /// The packet thresholds.
    pub fn packet_limit(&self) -> PacketLimit {
        PacketLimit {
            max_bytes: self.packet.max_bytes,
            max_nodes: self.packet.max_nodes,
        }
    }

    /// The local cache sizing.
    pub fn cache_config(&self) -> LocalCacheConfig {
        LocalCacheConfig {
            max_bytes: self.cache.max_bytes,
            positive_ttl: Duration::from_secs(self.cache.positive_ttl_secs),
            negative_ttl: Duration::from_secs(self.cache.negative_ttl_secs),
        }
    }

    /// The configured packet compression.
    pub fn compression(&self) -> anyhow::Result<Compression> {
        match self.compression.as_str() {
            "zstd" => Ok(Compression::Zstd),
            "none" => Ok(Compression::None),
            other => anyhow::bail!("unknown compression {other:?} (expected \"zstd\" or \"none\")"),
        }
    }
}
