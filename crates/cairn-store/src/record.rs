use cairn_types::{ContentHash, HashDomain, Locator};

use crate::error::{StoreError, StoreResult};
use crate::varint::{decode_varint, encode_varint};

/// Magic bytes opening every encoded blob record.
pub const RECORD_MAGIC: &[u8; 4] = b"crec";

/// Current record format version.
pub const RECORD_VERSION: u8 = 1;

/// The kind of record stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum RecordKind {
    /// Opaque payload bytes (a single stand-alone object).
    Blob,
    /// A bundle container: header tables plus concatenated packets.
    Bundle,
}

impl RecordKind {
    /// Serialize to a type byte for the wire format.
    pub fn type_byte(&self) -> u8 {
        match self {
            Self::Blob => 1,
            Self::Bundle => 2,
        }
    }

    /// Parse from a type byte.
    pub fn from_type_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::Blob),
            2 => Some(Self::Bundle),
            _ => None,
        }
    }

    /// The hash domain for payloads of this kind.
    pub fn hash_domain(&self) -> HashDomain {
        match self {
            Self::Blob => HashDomain::BLOB,
            Self::Bundle => HashDomain::BUNDLE,
        }
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Blob => write!(f, "blob"),
            Self::Bundle => write!(f, "bundle"),
        }
    }
}

/// The unit of storage: kind tag, import locators, raw payload.
///
/// Wire framing is `[magic][version][kind byte][varint import count][for each
/// import: varint length + UTF-8 locator][payload to end]`. The content hash
/// is computed over `payload` only, independent of the framing; import
/// validation across bundles depends on that boundary staying fixed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlobRecord {
    /// The kind of this record.
    pub kind: RecordKind,
    /// Locators of records this one references (e.g. imported bundles).
    pub imports: Vec<Locator>,
    /// The raw payload bytes.
    pub payload: Vec<u8>,
}

impl BlobRecord {
    /// Create a new record.
    pub fn new(kind: RecordKind, imports: Vec<Locator>, payload: Vec<u8>) -> Self {
        Self {
            kind,
            imports,
            payload,
        }
    }

    /// Create a plain blob record with no imports.
    pub fn blob(payload: Vec<u8>) -> Self {
        Self::new(RecordKind::Blob, Vec::new(), payload)
    }

    /// The content hash of this record's payload.
    pub fn hash(&self) -> ContentHash {
        self.kind.hash_domain().hash(&self.payload)
    }

    /// Payload size in bytes.
    pub fn payload_len(&self) -> u64 {
        self.payload.len() as u64
    }

    /// Encode the framing header (everything before the payload).
    pub fn encode_header(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(16);
        buf.extend_from_slice(RECORD_MAGIC);
        buf.push(RECORD_VERSION);
        buf.push(self.kind.type_byte());
        encode_varint(&mut buf, self.imports.len() as u64);
        for import in &self.imports {
            let raw = import.as_str().as_bytes();
            encode_varint(&mut buf, raw.len() as u64);
            buf.extend_from_slice(raw);
        }
        buf
    }

    /// Encode the full record (framing header followed by payload).
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = self.encode_header();
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Decode a record from its wire form.
    pub fn decode(data: &[u8]) -> StoreResult<Self> {
        let mut pos = 0;

        let magic = data.get(0..4).ok_or_else(|| malformed("record too short"))?;
        if magic != RECORD_MAGIC {
            return Err(malformed(format!(
                "bad record magic: {:?}",
                String::from_utf8_lossy(magic)
            )));
        }
        pos += 4;

        let version = *data.get(pos).ok_or_else(|| malformed("missing version"))?;
        if version != RECORD_VERSION {
            return Err(malformed(format!("unsupported record version: {version}")));
        }
        pos += 1;

        let type_byte = *data.get(pos).ok_or_else(|| malformed("missing kind byte"))?;
        let kind = RecordKind::from_type_byte(type_byte)
            .ok_or_else(|| malformed(format!("unknown record kind byte: {type_byte}")))?;
        pos += 1;

        let (import_count, consumed) =
            decode_varint(&data[pos..]).map_err(|e| malformed(format!("import count: {e}")))?;
        pos += consumed;

        let mut imports = Vec::with_capacity(import_count as usize);
        for i in 0..import_count {
            let (len, consumed) = decode_varint(&data[pos..])
                .map_err(|e| malformed(format!("import {i} length: {e}")))?;
            pos += consumed;
            let end = pos + len as usize;
            let raw = data
                .get(pos..end)
                .ok_or_else(|| malformed(format!("import {i} extends beyond record")))?;
            let text = std::str::from_utf8(raw)
                .map_err(|_| malformed(format!("import {i} is not valid UTF-8")))?;
            imports.push(Locator::from_raw(text));
            pos = end;
        }

        Ok(Self {
            kind,
            imports,
            payload: data[pos..].to_vec(),
        })
    }
}

fn malformed(reason: impl Into<String>) -> StoreError {
    StoreError::MalformedRecord {
        reason: reason.into(),
    }
}
