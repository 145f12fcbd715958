//! Content-defined chunking with a gear rolling hash.
//!
//! Boundaries are chosen where the rolling hash of the trailing bytes hits a
//! mask, so they depend on content, not position: shifting a file's bytes by
//! inserting data early moves only the boundaries near the edit, and chunks
//! after the next boundary are byte-identical to the previous version. Chunk
//! sizes are bounded by `[min_size, max_size]` with `avg_size` controlling
//! boundary probability.

use std::io::Read;

use crate::error::{TreeError, TreeResult};

/// Chunk size bounds.
#[derive(Clone, Copy, Debug)]
pub struct ChunkerConfig {
    /// No boundary is considered before this many bytes.
    pub min_size: usize,
    /// Target average chunk size; must be a power of two.
    pub avg_size: usize,
    /// A boundary is forced at this many bytes.
    pub max_size: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            min_size: 16 * 1024,
            avg_size: 64 * 1024,
            max_size: 256 * 1024,
        }
    }
}

/// Seed for the gear table; deriving the table from a fixed seed keeps the
/// format stable without embedding 256 literal constants.
const GEAR_SEED: u64 = u64::from_be_bytes(*b"cairn-v1");

/// Gear rolling-hash chunker.
pub struct Chunker {
    table: [u64; 256],
    mask: u64,
    config: ChunkerConfig,
}

impl Chunker {
    /// Create a chunker, validating the size bounds.
    pub fn new(config: ChunkerConfig) -> TreeResult<Self> {
        if config.min_size == 0 {
            return Err(TreeError::InvalidChunkBounds {
                reason: "min_size must be positive".into(),
            });
        }
        if !(config.min_size <= config.avg_size && config.avg_size <= config.max_size) {
            return Err(TreeError::InvalidChunkBounds {
                reason: format!(
                    "bounds must nest: min {} <= avg {} <= max {}",
                    config.min_size, config.avg_size, config.max_size
                ),
            });
        }
        if !config.avg_size.is_power_of_two() {
            return Err(TreeError::InvalidChunkBounds {
                reason: format!("avg_size {} is not a power of two", config.avg_size),
            });
        }

        let bits = config.avg_size.trailing_zeros();
        // Older bytes shift toward the high bits, so masking there judges a
        // wider window than the low bits would.
        let mask = !0u64 << (64 - bits);

        let mut state = GEAR_SEED;
        let table = std::array::from_fn(|_| splitmix64(&mut state));

        Ok(Self {
            table,
            mask,
            config,
        })
    }

    /// Create a chunker with the default bounds.
    pub fn with_defaults() -> Self {
        Self::new(ChunkerConfig::default()).expect("default bounds are valid")
    }

    /// The configured bounds.
    pub fn config(&self) -> ChunkerConfig {
        self.config
    }

    /// Length of the first chunk of `data`.
    ///
    /// Deterministic in the content alone. Returns `data.len()` when the data
    /// ends before a boundary; callers feeding a partial window should supply
    /// at least `max_size` bytes when more are available.
    pub fn next_boundary(&self, data: &[u8]) -> usize {
        if data.len() <= self.config.min_size {
            return data.len();
        }
        let limit = data.len().min(self.config.max_size);

        let mut hash = 0u64;
        for (i, &byte) in data[..limit].iter().enumerate() {
            hash = (hash << 1).wrapping_add(self.table[byte as usize]);
            if i >= self.config.min_size && hash & self.mask == 0 {
                return i + 1;
            }
        }
        limit
    }

    /// Split an in-memory buffer into chunks.
    pub fn split<'d>(&self, mut data: &'d [u8]) -> Vec<&'d [u8]> {
        let mut chunks = Vec::new();
        while !data.is_empty() {
            let boundary = self.next_boundary(data);
            let (chunk, rest) = data.split_at(boundary);
            chunks.push(chunk);
            data = rest;
        }
        chunks
    }

    /// Chunk a reader incrementally, holding at most `max_size` buffered
    /// bytes plus one refill.
    pub fn stream<R: Read>(&self, reader: R) -> ChunkStream<'_, R> {
        ChunkStream {
            chunker: self,
            reader,
            buf: Vec::new(),
            eof: false,
        }
    }
}

/// Iterator of chunks read incrementally from a reader.
pub struct ChunkStream<'c, R: Read> {
    chunker: &'c Chunker,
    reader: R,
    buf: Vec<u8>,
    eof: bool,
}

impl<R: Read> ChunkStream<'_, R> {
    /// Top the buffer up to at least `max_size` bytes or EOF, so boundary
    /// decisions are never made on an artificially short window.
    fn fill(&mut self) -> std::io::Result<()> {
        let target = self.chunker.config.max_size;
        let mut scratch = [0u8; 64 * 1024];
        while !self.eof && self.buf.len() < target {
            let n = self.reader.read(&mut scratch)?;
            if n == 0 {
                self.eof = true;
            } else {
                self.buf.extend_from_slice(&scratch[..n]);
            }
        }
        Ok(())
    }
}

impl<R: Read> Iterator for ChunkStream<'_, R> {
    type Item = std::io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Err(e) = self.fill() {
            return Some(Err(e));
        }
        if self.buf.is_empty() {
            return None;
        }
        let boundary = self.chunker.next_boundary(&self.buf);
        let rest = self.buf.split_off(boundary);
        let chunk = std::mem::replace(&mut self.buf, rest);
        Some(Ok(chunk))
    }
}

fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}
