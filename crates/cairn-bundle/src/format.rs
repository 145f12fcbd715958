//! Binary layout of the bundle container.
//!
//! A bundle payload is `[magic][version][Imports][Exports][Packets][packet
//! bytes]`. Table boundaries are derived structurally while parsing; there
//! are no separate length prefixes. All integers are varints except hashes
//! (32 raw bytes) and single tag bytes.

use cairn_types::{ContentHash, Locator};
use cairn_store::varint::{decode_varint, encode_varint};

/// Magic bytes opening every bundle payload.
pub const BUNDLE_MAGIC: &[u8; 4] = b"cbdl";

/// Current bundle format version.
pub const BUNDLE_VERSION: u8 = 1;

/// Compression applied to a packet's bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Compression {
    /// Stored uncompressed.
    None,
    /// Zstandard.
    Zstd,
}

impl Compression {
    /// Serialize to a tag byte for the wire format.
    pub fn tag_byte(&self) -> u8 {
        match self {
            Self::None => 0,
            Self::Zstd => 1,
        }
    }

    /// Parse from a tag byte.
    pub fn from_tag_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::None),
            1 => Some(Self::Zstd),
            _ => None,
        }
    }
}

impl std::fmt::Display for Compression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Zstd => write!(f, "zstd"),
        }
    }
}

/// A reference held by an export: either another export in the same bundle,
/// or an export of an imported bundle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefSlot {
    /// Index into this bundle's export table.
    Local(u32),
    /// Entry in the import table plus an export index within that target.
    Imported { import: u32, export: u32 },
}

/// One entry in the Imports table: a cross-bundle reference.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImportEntry {
    /// Locator of the imported bundle.
    pub locator: Locator,
    /// The subset of the target's export indices actually referenced,
    /// sorted ascending.
    pub used_exports: Vec<u32>,
    /// The target's total export count at import time, for validation.
    pub export_count: u32,
}

/// One entry in the Exports table: a logical node defined in this bundle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExportEntry {
    /// Content hash of the node's payload.
    pub hash: ContentHash,
    /// Payload length in bytes.
    pub length: u64,
    /// References this node holds, in payload order.
    pub refs: Vec<RefSlot>,
}

/// One entry in the Packets table: a compressed run of export payloads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PacketEntry {
    /// Length of the packet's bytes as stored.
    pub encoded_len: u64,
    /// Length after decompression.
    pub decoded_len: u64,
    /// How the packet is compressed.
    pub compression: Compression,
}

/// The parsed header tables of a bundle.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BundleHeader {
    pub imports: Vec<ImportEntry>,
    pub exports: Vec<ExportEntry>,
    pub packets: Vec<PacketEntry>,
}

/// A structural parse failure, positioned within the bundle payload.
///
/// The reader attaches the bundle locator when surfacing this as a
/// corruption error.
#[derive(Debug)]
pub struct ParseError {
    pub offset: u64,
    pub reason: String,
}

impl BundleHeader {
    /// Encode the header tables (everything before the packet bytes).
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(BUNDLE_MAGIC);
        buf.push(BUNDLE_VERSION);

        // Imports table.
        encode_varint(&mut buf, self.imports.len() as u64);
        for import in &self.imports {
            let raw = import.locator.as_str().as_bytes();
            encode_varint(&mut buf, raw.len() as u64);
            buf.extend_from_slice(raw);
            encode_varint(&mut buf, import.used_exports.len() as u64);
            for &index in &import.used_exports {
                encode_varint(&mut buf, index as u64);
            }
            encode_varint(&mut buf, import.export_count as u64);
        }

        // Exports table.
        encode_varint(&mut buf, self.exports.len() as u64);
        for export in &self.exports {
            buf.extend_from_slice(export.hash.as_bytes());
            encode_varint(&mut buf, export.length);
            encode_varint(&mut buf, export.refs.len() as u64);
            for slot in &export.refs {
                match slot {
                    RefSlot::Local(index) => {
                        encode_varint(&mut buf, (*index as u64) << 1);
                    }
                    RefSlot::Imported { import, export } => {
                        encode_varint(&mut buf, ((*import as u64) << 1) | 1);
                        encode_varint(&mut buf, *export as u64);
                    }
                }
            }
        }

        // Packets table.
        encode_varint(&mut buf, self.packets.len() as u64);
        for packet in &self.packets {
            encode_varint(&mut buf, packet.encoded_len);
            encode_varint(&mut buf, packet.decoded_len);
            buf.push(packet.compression.tag_byte());
        }

        buf
    }

    /// Parse the header tables from the front of a bundle payload.
    ///
    /// Returns the header and its encoded length; packet bytes start right
    /// after. Only the tables are touched -- no packet is decompressed.
    pub fn parse(data: &[u8]) -> Result<(Self, usize), ParseError> {
        let mut cursor = Cursor::new(data);

        let magic = cursor.take(4, "bundle magic")?;
        if magic != BUNDLE_MAGIC {
            return Err(cursor.fail(format!(
                "bad bundle magic: {:?}",
                String::from_utf8_lossy(magic)
            )));
        }
        let version = cursor.take_byte("bundle version")?;
        if version != BUNDLE_VERSION {
            return Err(cursor.fail(format!("unsupported bundle version: {version}")));
        }

        // Imports table.
        let import_count = cursor.take_varint("import count")?;
        let mut imports = Vec::with_capacity(import_count as usize);
        for i in 0..import_count {
            let len = cursor.take_varint("import locator length")?;
            let raw = cursor.take(len as usize, "import locator")?;
            let text = std::str::from_utf8(raw)
                .map_err(|_| cursor.fail(format!("import {i} locator is not valid UTF-8")))?;
            let locator = Locator::from_raw(text);

            let used_count = cursor.take_varint("used export count")?;
            let mut used_exports = Vec::with_capacity(used_count as usize);
            for _ in 0..used_count {
                used_exports.push(cursor.take_varint("used export index")? as u32);
            }
            let export_count = cursor.take_varint("import export count")? as u32;
            imports.push(ImportEntry {
                locator,
                used_exports,
                export_count,
            });
        }

        // Exports table.
        let export_count = cursor.take_varint("export count")?;
        let mut exports = Vec::with_capacity(export_count as usize);
        for _ in 0..export_count {
            let digest = cursor.take(32, "export hash")?;
            let hash = ContentHash::from_digest(digest.try_into().expect("slice is 32 bytes"));
            let length = cursor.take_varint("export length")?;
            let ref_count = cursor.take_varint("export ref count")?;
            let mut refs = Vec::with_capacity(ref_count as usize);
            for _ in 0..ref_count {
                let tagged = cursor.take_varint("export ref")?;
                if tagged & 1 == 0 {
                    refs.push(RefSlot::Local((tagged >> 1) as u32));
                } else {
                    let export = cursor.take_varint("imported export index")? as u32;
                    refs.push(RefSlot::Imported {
                        import: (tagged >> 1) as u32,
                        export,
                    });
                }
            }
            exports.push(ExportEntry { hash, length, refs });
        }

        // Packets table.
        let packet_count = cursor.take_varint("packet count")?;
        let mut packets = Vec::with_capacity(packet_count as usize);
        for _ in 0..packet_count {
            let encoded_len = cursor.take_varint("packet encoded length")?;
            let decoded_len = cursor.take_varint("packet decoded length")?;
            let tag = cursor.take_byte("packet compression tag")?;
            let compression = Compression::from_tag_byte(tag)
                .ok_or_else(|| cursor.fail(format!("unknown compression tag: {tag}")))?;
            packets.push(PacketEntry {
                encoded_len,
                decoded_len,
                compression,
            });
        }

        // Cross-table sanity: local refs and import indices must be in range.
        let export_total = exports.len() as u64;
        let import_total = imports.len() as u64;
        for (i, export) in exports.iter().enumerate() {
            for slot in &export.refs {
                match slot {
                    RefSlot::Local(index) => {
                        if *index as u64 >= export_total {
                            return Err(cursor.fail(format!(
                                "export {i} references local export {index} of {export_total}"
                            )));
                        }
                    }
                    RefSlot::Imported { import, .. } => {
                        if *import as u64 >= import_total {
                            return Err(cursor.fail(format!(
                                "export {i} references import {import} of {import_total}"
                            )));
                        }
                    }
                }
            }
        }

        let header = Self {
            imports,
            exports,
            packets,
        };
        Ok((header, cursor.pos))
    }
}

/// Bounds-checked forward reader over a byte slice.
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn fail(&self, reason: impl Into<String>) -> ParseError {
        ParseError {
            offset: self.pos as u64,
            reason: reason.into(),
        }
    }

    fn take(&mut self, n: usize, what: &str) -> Result<&'a [u8], ParseError> {
        let end = self.pos.checked_add(n).ok_or_else(|| self.fail(format!("{what}: length overflow")))?;
        let slice = self
            .data
            .get(self.pos..end)
            .ok_or_else(|| self.fail(format!("{what}: truncated")))?;
        self.pos = end;
        Ok(slice)
    }

    fn take_byte(&mut self, what: &str) -> Result<u8, ParseError> {
        Ok(self.take(1, what)?[0])
    }

    fn take_varint(&mut self, what: &str) -> Result<u64, ParseError> {
        let (value, consumed) = decode_varint(&self.data[self.pos.min(self.data.len())..])
            .map_err(|e| self.fail(format!("{what}: {e}")))?;
        self.pos += consumed;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_types::HashDomain;

    fn sample_header() -> BundleHeader {
        BundleHeader {
            imports: vec![ImportEntry {
                locator: Locator::from_raw("bundle-feedface"),
                used_exports: vec![0, 3, 7],
                export_count: 12,
            }],
            exports: vec![
                ExportEntry {
                    hash: HashDomain::NODE.hash(b"leaf"),
                    length: 4,
                    refs: vec![],
                },
                ExportEntry {
                    hash: HashDomain::NODE.hash(b"parent"),
                    length: 64,
                    refs: vec![
                        RefSlot::Local(0),
                        RefSlot::Imported {
                            import: 0,
                            export: 7,
                        },
                    ],
                },
            ],
            packets: vec![
                PacketEntry {
                    encoded_len: 40,
                    decoded_len: 68,
                    compression: Compression::Zstd,
                },
            ],
        }
    }

    #[test]
    fn header_roundtrip() {
        let header = sample_header();
        let encoded = header.encode();
        let (parsed, consumed) = BundleHeader::parse(&encoded).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(consumed, encoded.len());
    }

    #[test]
    fn empty_header_roundtrip() {
        let header = BundleHeader::default();
        let (parsed, _) = BundleHeader::parse(&header.encode()).unwrap();
        assert!(parsed.imports.is_empty());
        assert!(parsed.exports.is_empty());
        assert!(parsed.packets.is_empty());
    }

    #[test]
    fn parse_stops_at_packet_bytes() {
        let header = sample_header();
        let mut payload = header.encode();
        let header_len = payload.len();
        payload.extend_from_slice(&[0xAA; 40]); // packet bytes
        let (_, consumed) = BundleHeader::parse(&payload).unwrap();
        assert_eq!(consumed, header_len);
    }

    #[test]
    fn reject_bad_magic() {
        let err = BundleHeader::parse(b"nope\x01").unwrap_err();
        assert!(err.reason.contains("magic"));
    }

    #[test]
    fn reject_bad_version() {
        let mut data = BUNDLE_MAGIC.to_vec();
        data.push(42);
        let err = BundleHeader::parse(&data).unwrap_err();
        assert!(err.reason.contains("version"));
    }

    #[test]
    fn truncated_header_reports_offset() {
        let encoded = sample_header().encode();
        let err = BundleHeader::parse(&encoded[..10]).unwrap_err();
        assert!(err.offset <= 10);
        assert!(err.reason.contains("truncated") || err.reason.contains("varint"));
    }

    #[test]
    fn reject_unknown_compression_tag() {
        let mut header = sample_header();
        header.packets[0].compression = Compression::Zstd;
        let mut encoded = header.encode();
        // The compression tag is the last byte of the header.
        let last = encoded.len() - 1;
        encoded[last] = 9;
        let err = BundleHeader::parse(&encoded).unwrap_err();
        assert!(err.reason.contains("compression"));
    }

    #[test]
    fn reject_out_of_range_local_ref() {
        let mut header = sample_header();
        header.exports[1].refs[0] = RefSlot::Local(99);
        let err = BundleHeader::parse(&header.encode()).unwrap_err();
        assert!(err.reason.contains("local export"));
    }

    #[test]
    fn reject_out_of_range_import_ref() {
        let mut header = sample_header();
        header.exports[1].refs[1] = RefSlot::Imported {
            import: 5,
            export: 0,
        };
        let err = BundleHeader::parse(&header.encode()).unwrap_err();
        assert!(err.reason.contains("import"));
    }

    #[test]
    fn compression_tag_roundtrip() {
        for c in [Compression::None, Compression::Zstd] {
            assert_eq!(Compression::from_tag_byte(c.tag_byte()), Some(c));
        }
        assert!(Compression::from_tag_byte(9).is_none());
    }
}
