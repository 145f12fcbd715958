use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use cairn_store::{BlobReader, BlobRecord, NodeRef, RecordKind};
use cairn_types::{CancelToken, HashDomain, Locator};

use crate::error::{BundleError, BundleResult};
use crate::format::{BundleHeader, Compression, ExportEntry, ImportEntry, PacketEntry, RefSlot};

/// A parsed bundle: header tables plus lazily-decoded packet bytes.
///
/// Construction parses only the tables; no packet is decompressed until an
/// export inside it is read, and each packet is decoded at most once per
/// `Bundle` instance. Memoizing repeated *opens* of the same bundle is the
/// layered cache's job, not duplicated here.
pub struct Bundle {
    locator: Locator,
    header: BundleHeader,
    header_len: usize,
    packet_region: Vec<u8>,
    /// Encoded byte offset of each packet within the packet region.
    packet_offsets: Vec<u64>,
    /// Offset of each export within the concatenated decoded stream.
    export_offsets: Vec<u64>,
    decoded: Mutex<HashMap<usize, Arc<Vec<u8>>>>,
}

/// A reference resolved to a concrete bundle and export index.
#[derive(Clone, Debug)]
pub struct ResolvedNode {
    pub bundle: Arc<Bundle>,
    pub index: u32,
}

impl ResolvedNode {
    /// Read the node's payload bytes.
    pub fn read(&self) -> BundleResult<Vec<u8>> {
        self.bundle.read_export(self.index)
    }

    /// The node's export entry.
    pub fn entry(&self) -> &ExportEntry {
        &self.bundle.exports()[self.index as usize]
    }

    /// The node's durable reference.
    pub fn node_ref(&self) -> NodeRef {
        self.bundle.node_ref(self.index)
    }
}

impl Bundle {
    /// Parse a bundle from its stored record.
    ///
    /// Only the header tables are decoded; packet bytes are retained but not
    /// decompressed.
    pub fn parse(locator: Locator, record: &BlobRecord) -> BundleResult<Self> {
        if record.kind != RecordKind::Bundle {
            return Err(BundleError::Corruption {
                locator,
                offset: 0,
                reason: format!("expected bundle record, got {}", record.kind),
            });
        }
        let (header, header_len) =
            BundleHeader::parse(&record.payload).map_err(|e| BundleError::Corruption {
                locator: locator.clone(),
                offset: e.offset,
                reason: e.reason,
            })?;

        let mut packet_offsets = Vec::with_capacity(header.packets.len());
        let mut encoded_total = 0u64;
        for packet in &header.packets {
            packet_offsets.push(encoded_total);
            encoded_total += packet.encoded_len;
        }

        let mut export_offsets = Vec::with_capacity(header.exports.len());
        let mut decoded_total = 0u64;
        for export in &header.exports {
            export_offsets.push(decoded_total);
            decoded_total += export.length;
        }

        Ok(Self {
            locator,
            header,
            header_len,
            packet_region: record.payload[header_len..].to_vec(),
            packet_offsets,
            export_offsets,
            decoded: Mutex::new(HashMap::new()),
        })
    }

    /// The bundle's locator.
    pub fn locator(&self) -> &Locator {
        &self.locator
    }

    /// The Imports table.
    pub fn imports(&self) -> &[ImportEntry] {
        &self.header.imports
    }

    /// The Exports table.
    pub fn exports(&self) -> &[ExportEntry] {
        &self.header.exports
    }

    /// The Packets table.
    pub fn packets(&self) -> &[PacketEntry] {
        &self.header.packets
    }

    /// Total number of exports.
    pub fn export_count(&self) -> u32 {
        self.header.exports.len() as u32
    }

    /// Encoded length of the header tables.
    pub fn header_len(&self) -> usize {
        self.header_len
    }

    /// Durable reference to export `index` of this bundle.
    pub fn node_ref(&self, index: u32) -> NodeRef {
        let export = &self.header.exports[index as usize];
        NodeRef {
            locator: self.locator.clone(),
            hash: export.hash,
            export_index: index,
            export_count: self.export_count(),
        }
    }

    fn corruption(&self, offset: u64, reason: impl Into<String>) -> BundleError {
        BundleError::Corruption {
            locator: self.locator.clone(),
            offset,
            reason: reason.into(),
        }
    }

    /// Read one export's payload bytes.
    ///
    /// Locates the owning packet by accumulating export lengths against the
    /// Packets table, decompresses that packet if not already cached, slices
    /// the export, and verifies its hash. Every structural disagreement is
    /// corruption, positioned within the bundle payload.
    pub fn read_export(&self, index: u32) -> BundleResult<Vec<u8>> {
        let export = self
            .header
            .exports
            .get(index as usize)
            .ok_or_else(|| BundleError::ExportOutOfRange {
                locator: self.locator.clone(),
                index,
                count: self.export_count(),
            })?;
        // Zero-length exports occupy no packet bytes at all.
        if export.length == 0 {
            if !HashDomain::NODE.verify(&[], &export.hash) {
                return Err(self.corruption(
                    self.header_len as u64,
                    format!("zero-length export {index} hash mismatch"),
                ));
            }
            return Ok(Vec::new());
        }

        let start = self.export_offsets[index as usize];
        let end = start + export.length;

        // Find the packet whose decoded range holds [start, end).
        let mut decoded_start = 0u64;
        let mut owner = None;
        for (k, packet) in self.header.packets.iter().enumerate() {
            let decoded_end = decoded_start + packet.decoded_len;
            if start < decoded_end {
                owner = Some((k, decoded_start, decoded_end));
                break;
            }
            decoded_start = decoded_end;
        }
        let (k, decoded_start, decoded_end) = owner.ok_or_else(|| {
            self.corruption(
                self.header_len as u64,
                format!("export {index} lies beyond declared packet lengths"),
            )
        })?;
        if end > decoded_end {
            return Err(self.corruption(
                self.header_len as u64 + self.packet_offsets[k],
                format!("export {index} crosses a packet boundary"),
            ));
        }

        let decoded = self.decode_packet(k)?;
        let lo = (start - decoded_start) as usize;
        let hi = (end - decoded_start) as usize;
        let bytes = &decoded[lo..hi];

        if !HashDomain::NODE.verify(bytes, &export.hash) {
            return Err(self.corruption(
                self.header_len as u64 + self.packet_offsets[k],
                format!("export {index} hash mismatch"),
            ));
        }
        Ok(bytes.to_vec())
    }

    /// Decompress packet `k`, caching the result for later exports.
    fn decode_packet(&self, k: usize) -> BundleResult<Arc<Vec<u8>>> {
        if let Some(cached) = self.decoded.lock().expect("lock poisoned").get(&k) {
            return Ok(Arc::clone(cached));
        }

        let packet = &self.header.packets[k];
        let payload_offset = self.header_len as u64 + self.packet_offsets[k];
        let lo = self.packet_offsets[k] as usize;
        let hi = lo + packet.encoded_len as usize;
        let encoded = self.packet_region.get(lo..hi).ok_or_else(|| {
            self.corruption(
                payload_offset,
                format!(
                    "packet {k} extends beyond bundle payload ({} of {} bytes)",
                    hi,
                    self.packet_region.len()
                ),
            )
        })?;

        let decoded = match packet.compression {
            Compression::Zstd => zstd::decode_all(encoded).map_err(|e| {
                self.corruption(payload_offset, format!("packet {k} decompression failed: {e}"))
            })?,
            Compression::None => encoded.to_vec(),
        };
        if decoded.len() as u64 != packet.decoded_len {
            return Err(self.corruption(
                payload_offset,
                format!(
                    "packet {k} decoded to {} bytes, {} declared",
                    decoded.len(),
                    packet.decoded_len
                ),
            ));
        }

        let decoded = Arc::new(decoded);
        self.decoded
            .lock()
            .expect("lock poisoned")
            .insert(k, Arc::clone(&decoded));
        Ok(decoded)
    }

    /// Resolve one of an export's references to a concrete node.
    ///
    /// Local references stay within this bundle; imported references open the
    /// target through `opener` and validate its export count against the
    /// recorded one. Diamond-shaped import graphs are fine: every open goes
    /// through the opener's backing reader, which is where memoization lives.
    pub fn resolve_ref(
        self: &Arc<Self>,
        slot: RefSlot,
        opener: &BundleOpener,
        cancel: &CancelToken,
    ) -> BundleResult<ResolvedNode> {
        match slot {
            RefSlot::Local(index) => Ok(ResolvedNode {
                bundle: Arc::clone(self),
                index,
            }),
            RefSlot::Imported { import, export } => {
                let entry = &self.header.imports[import as usize];
                let target = opener.open(&entry.locator, cancel)?;
                if target.export_count() != entry.export_count {
                    return Err(BundleError::ImportCountMismatch {
                        locator: self.locator.clone(),
                        import: entry.locator.clone(),
                        recorded: entry.export_count,
                        actual: target.export_count(),
                    });
                }
                if export >= target.export_count() {
                    return Err(BundleError::ExportOutOfRange {
                        locator: entry.locator.clone(),
                        index: export,
                        count: target.export_count(),
                    });
                }
                Ok(ResolvedNode {
                    bundle: target,
                    index: export,
                })
            }
        }
    }
}

impl std::fmt::Debug for Bundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bundle")
            .field("locator", &self.locator)
            .field("imports", &self.header.imports.len())
            .field("exports", &self.header.exports.len())
            .field("packets", &self.header.packets.len())
            .finish()
    }
}

/// Opens bundles through any [`BlobReader`].
///
/// In production the reader is the layered cache, which coalesces concurrent
/// fetches and memoizes hot blobs; the opener itself deliberately keeps no
/// state so that policy lives in one place.
pub struct BundleOpener {
    source: Arc<dyn BlobReader>,
}

impl BundleOpener {
    /// Create an opener over `source`.
    pub fn new(source: Arc<dyn BlobReader>) -> Self {
        Self { source }
    }

    /// Fetch and parse the bundle at `locator`.
    pub fn open(&self, locator: &Locator, cancel: &CancelToken) -> BundleResult<Arc<Bundle>> {
        let record = match self.source.read(locator, cancel)? {
            Some(record) => record,
            None => return Err(BundleError::NotFound(locator.clone())),
        };
        Ok(Arc::new(Bundle::parse(locator.clone(), &record)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::{BundleWriter, PacketLimit};
    use cairn_store::{BlobStore, MemoryBlobStore};

    fn store() -> Arc<MemoryBlobStore> {
        Arc::new(MemoryBlobStore::new())
    }

    fn opener(store: &Arc<MemoryBlobStore>) -> BundleOpener {
        BundleOpener::new(Arc::clone(store) as Arc<dyn BlobReader>)
    }

    /// Build a bundle of the given payloads, returning its locator.
    fn build_bundle(store: &Arc<MemoryBlobStore>, payloads: &[&[u8]]) -> Locator {
        let mut writer = BundleWriter::new(Arc::clone(store) as Arc<dyn BlobStore>);
        let cancel = CancelToken::new();
        for payload in payloads {
            writer.append(payload, &[], &cancel).unwrap();
        }
        writer.flush(&cancel).unwrap().locator
    }

    #[test]
    fn read_export_returns_exact_bytes() {
        let store = store();
        let locator = build_bundle(&store, &[b"alpha", b"beta contents", b""]);
        let bundle = opener(&store).open(&locator, &CancelToken::new()).unwrap();

        assert_eq!(bundle.read_export(0).unwrap(), b"alpha");
        assert_eq!(bundle.read_export(1).unwrap(), b"beta contents");
        assert_eq!(bundle.read_export(2).unwrap(), b"");
        for (i, export) in bundle.exports().iter().enumerate() {
            assert_eq!(
                bundle.read_export(i as u32).unwrap().len() as u64,
                export.length
            );
        }
    }

    #[test]
    fn exports_spanning_multiple_packets() {
        let store = store();
        let cancel = CancelToken::new();
        let mut writer = BundleWriter::new(Arc::clone(&store) as Arc<dyn BlobStore>)
            .with_packet_limit(PacketLimit {
                max_bytes: 16,
                max_nodes: 1024,
            });
        let payloads: Vec<Vec<u8>> = (0..6u8).map(|i| vec![i; 10]).collect();
        for p in &payloads {
            writer.append(p, &[], &cancel).unwrap();
        }
        let locator = writer.flush(&cancel).unwrap().locator;

        let bundle = opener(&store).open(&locator, &cancel).unwrap();
        assert!(bundle.packets().len() > 1);
        for (i, p) in payloads.iter().enumerate() {
            assert_eq!(&bundle.read_export(i as u32).unwrap(), p);
        }
    }

    #[test]
    fn open_missing_bundle_is_not_found() {
        let store = store();
        let err = opener(&store)
            .open(&Locator::from_raw("absent"), &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, BundleError::NotFound(_)));
    }

    #[test]
    fn export_out_of_range() {
        let store = store();
        let locator = build_bundle(&store, &[b"only"]);
        let bundle = opener(&store).open(&locator, &CancelToken::new()).unwrap();
        let err = bundle.read_export(5).unwrap_err();
        assert!(matches!(err, BundleError::ExportOutOfRange { .. }));
    }

    #[test]
    fn resolve_local_and_imported_refs() {
        let store = store();
        let cancel = CancelToken::new();

        let mut first = BundleWriter::new(Arc::clone(&store) as Arc<dyn BlobStore>);
        let shared = first.append(b"shared dependency", &[], &cancel).unwrap();
        first.flush(&cancel).unwrap();

        let mut second = BundleWriter::new(Arc::clone(&store) as Arc<dyn BlobStore>);
        let leaf = second.append(b"local leaf", &[], &cancel).unwrap();
        let parent = second
            .append(b"parent", &[leaf, shared], &cancel)
            .unwrap();
        second.flush(&cancel).unwrap();

        let op = opener(&store);
        let parent_ref = parent.resolve().unwrap();
        let bundle = op.open(&parent_ref.locator, &cancel).unwrap();
        let refs = bundle.exports()[parent_ref.export_index as usize]
            .refs
            .clone();
        assert_eq!(refs.len(), 2);

        let local = bundle.resolve_ref(refs[0], &op, &cancel).unwrap();
        assert_eq!(local.read().unwrap(), b"local leaf");

        let imported = bundle.resolve_ref(refs[1], &op, &cancel).unwrap();
        assert_eq!(imported.read().unwrap(), b"shared dependency");
        assert_ne!(imported.bundle.locator(), bundle.locator());
    }

    #[test]
    fn diamond_imports_resolve_cleanly() {
        let store = store();
        let cancel = CancelToken::new();

        // base <- left, base <- right, top <- {left, right}
        let mut base = BundleWriter::new(Arc::clone(&store) as Arc<dyn BlobStore>);
        let shared = base.append(b"diamond base", &[], &cancel).unwrap();
        base.flush(&cancel).unwrap();

        let mut left = BundleWriter::new(Arc::clone(&store) as Arc<dyn BlobStore>);
        let l = left.append(b"left", &[shared.clone()], &cancel).unwrap();
        left.flush(&cancel).unwrap();

        let mut right = BundleWriter::new(Arc::clone(&store) as Arc<dyn BlobStore>);
        let r = right.append(b"right", &[shared], &cancel).unwrap();
        right.flush(&cancel).unwrap();

        let mut top = BundleWriter::new(Arc::clone(&store) as Arc<dyn BlobStore>);
        let t = top.append(b"top", &[l, r], &cancel).unwrap();
        top.flush(&cancel).unwrap();

        // Walk the whole diamond down to the base through both arms.
        let op = opener(&store);
        let top_node = t.resolve().unwrap();
        let top_bundle = op.open(&top_node.locator, &cancel).unwrap();
        let arm_slots = top_bundle.exports()[top_node.export_index as usize]
            .refs
            .clone();
        for slot in arm_slots {
            let arm = top_bundle.resolve_ref(slot, &op, &cancel).unwrap();
            let base_slot = arm.entry().refs[0];
            let base_node = arm.bundle.resolve_ref(base_slot, &op, &cancel).unwrap();
            assert_eq!(base_node.read().unwrap(), b"diamond base");
        }
    }

    #[test]
    fn import_count_mismatch_is_corruption() {
        let store = store();
        let cancel = CancelToken::new();

        // A real imported bundle with one export.
        let imported_locator = build_bundle(&store, &[b"import me"]);

        // Hand-build a bundle whose import entry records the wrong count.
        let payload_bytes = b"x".to_vec();
        let header = BundleHeader {
            imports: vec![ImportEntry {
                locator: imported_locator,
                used_exports: vec![0],
                export_count: 4, // actual is 1
            }],
            exports: vec![ExportEntry {
                hash: HashDomain::NODE.hash(&payload_bytes),
                length: payload_bytes.len() as u64,
                refs: vec![RefSlot::Imported {
                    import: 0,
                    export: 0,
                }],
            }],
            packets: vec![PacketEntry {
                encoded_len: payload_bytes.len() as u64,
                decoded_len: payload_bytes.len() as u64,
                compression: Compression::None,
            }],
        };
        let mut payload = header.encode();
        payload.extend_from_slice(&payload_bytes);
        let record = BlobRecord::new(RecordKind::Bundle, Vec::new(), payload);
        let locator = store
            .write(&record, None, &cancel)
            .unwrap()
            .handle
            .resolve()
            .unwrap()
            .locator;

        let op = opener(&store);
        let bundle = op.open(&locator, &cancel).unwrap();
        let slot = bundle.exports()[0].refs[0];
        let err = bundle.resolve_ref(slot, &op, &cancel).unwrap_err();
        match err {
            BundleError::ImportCountMismatch {
                recorded, actual, ..
            } => {
                assert_eq!(recorded, 4);
                assert_eq!(actual, 1);
            }
            other => panic!("expected ImportCountMismatch, got {other:?}"),
        }
    }

    #[test]
    fn truncated_packet_declared_length_is_corruption() {
        let store = store();
        let cancel = CancelToken::new();

        // Compress a packet, then declare a shorter encoded length than the
        // bytes actually present. Decoding the truncated frame must fail with
        // corruption naming the bundle locator and the packet's offset.
        let payload_bytes = b"some packet contents that compress".to_vec();
        let encoded = zstd::encode_all(payload_bytes.as_slice(), 3).unwrap();
        let truncated_len = (encoded.len() - 5) as u64;
        let header = BundleHeader {
            imports: vec![],
            exports: vec![ExportEntry {
                hash: HashDomain::NODE.hash(&payload_bytes),
                length: payload_bytes.len() as u64,
                refs: vec![],
            }],
            packets: vec![PacketEntry {
                encoded_len: truncated_len,
                decoded_len: payload_bytes.len() as u64,
                compression: Compression::Zstd,
            }],
        };
        let header_bytes = header.encode();
        let header_len = header_bytes.len() as u64;
        let mut payload = header_bytes;
        payload.extend_from_slice(&encoded);
        let record = BlobRecord::new(RecordKind::Bundle, Vec::new(), payload);
        let locator = store
            .write(&record, None, &cancel)
            .unwrap()
            .handle
            .resolve()
            .unwrap()
            .locator;

        let bundle = opener(&store).open(&locator, &cancel).unwrap();
        let err = bundle.read_export(0).unwrap_err();
        match err {
            BundleError::Corruption {
                locator: named,
                offset,
                ..
            } => {
                assert_eq!(named, locator);
                assert_eq!(offset, header_len); // first packet starts right after the header
            }
            other => panic!("expected Corruption, got {other:?}"),
        }
    }

    #[test]
    fn export_hash_mismatch_is_corruption() {
        let store = store();
        let cancel = CancelToken::new();

        // Packet bytes decode fine but do not match the export's hash.
        let actual = b"actual bytes".to_vec();
        let header = BundleHeader {
            imports: vec![],
            exports: vec![ExportEntry {
                hash: HashDomain::NODE.hash(b"expected bytes"),
                length: actual.len() as u64,
                refs: vec![],
            }],
            packets: vec![PacketEntry {
                encoded_len: actual.len() as u64,
                decoded_len: actual.len() as u64,
                compression: Compression::None,
            }],
        };
        let mut payload = header.encode();
        payload.extend_from_slice(&actual);
        let record = BlobRecord::new(RecordKind::Bundle, Vec::new(), payload);
        let locator = store
            .write(&record, None, &cancel)
            .unwrap()
            .handle
            .resolve()
            .unwrap()
            .locator;

        let bundle = opener(&store).open(&locator, &cancel).unwrap();
        let err = bundle.read_export(0).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn packet_cache_decodes_once_per_bundle() {
        let store = store();
        let locator = build_bundle(&store, &[b"one", b"two", b"three"]);
        let bundle = opener(&store).open(&locator, &CancelToken::new()).unwrap();

        bundle.read_export(0).unwrap();
        assert_eq!(bundle.decoded.lock().unwrap().len(), 1);
        bundle.read_export(1).unwrap();
        bundle.read_export(2).unwrap();
        // Same packet: still one cached decode.
        assert_eq!(bundle.decoded.lock().unwrap().len(), 1);
    }

    #[test]
    fn non_bundle_record_is_rejected() {
        let record = BlobRecord::blob(b"not a bundle".to_vec());
        let err = Bundle::parse(Locator::from_raw("x"), &record).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn parse_does_not_touch_packets() {
        let store = store();
        let locator = build_bundle(&store, &[b"lazy"]);
        let bundle = opener(&store).open(&locator, &CancelToken::new()).unwrap();
        assert!(bundle.decoded.lock().unwrap().is_empty());
    }

    #[test]
    fn node_ref_carries_export_count() {
        let store = store();
        let locator = build_bundle(&store, &[b"a", b"b", b"c"]);
        let bundle = opener(&store).open(&locator, &CancelToken::new()).unwrap();
        let node = bundle.node_ref(1);
        assert_eq!(node.export_index, 1);
        assert_eq!(node.export_count, 3);
        assert_eq!(&node.locator, bundle.locator());
    }
}
