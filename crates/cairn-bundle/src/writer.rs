use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use cairn_refs::{RefIndex, RefTarget};
use cairn_store::{BlobRecord, BlobStore, Handle, NodeRef, RecordKind};
use cairn_types::{CancelToken, ContentHash, HashDomain, Locator};

use crate::error::{BundleError, BundleResult};
use crate::format::{BundleHeader, Compression, ExportEntry, ImportEntry, PacketEntry, RefSlot};

/// Packet thresholds bounding writer memory.
///
/// A writer never holds more than one in-progress packet's decoded payload
/// plus the open header tables and already-compressed packet bytes; whichever
/// bound trips first closes the current packet.
#[derive(Clone, Copy, Debug)]
pub struct PacketLimit {
    /// Close the packet once its decoded payload reaches this many bytes.
    pub max_bytes: usize,
    /// Close the packet once it holds this many nodes.
    pub max_nodes: usize,
}

impl Default for PacketLimit {
    fn default() -> Self {
        Self {
            max_bytes: 1024 * 1024,
            max_nodes: 1024,
        }
    }
}

/// Import table under construction.
struct ImportBuild {
    locator: Locator,
    used_exports: BTreeSet<u32>,
    export_count: u32,
}

/// Single-producer bundle packer.
///
/// Lifecycle: appends while open, packs packets as thresholds trip, then one
/// flush writes the bundle as a single blob and closes the writer. Export
/// indices are assigned once, at append time, monotonically; repeated flushes
/// return the memoized locator and never renumber anything.
///
/// Multiple independent writers may run against the same backend without
/// coordination: every bundle gets its own content-addressed locator, so
/// there is no shared mutable write target.
pub struct BundleWriter {
    store: Arc<dyn BlobStore>,
    compression: Compression,
    limit: PacketLimit,
    prefix: Option<String>,

    exports: Vec<ExportEntry>,
    handles: Vec<Handle>,
    local_by_hash: HashMap<ContentHash, u32>,
    imports: Vec<ImportBuild>,
    import_by_locator: HashMap<Locator, u32>,

    packets: Vec<PacketEntry>,
    packet_bytes: Vec<u8>,
    pending: Vec<u8>,
    pending_nodes: usize,

    flushed: Option<NodeRef>,
}

impl BundleWriter {
    /// Create a writer over `store` with default compression and limits.
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self {
            store,
            compression: Compression::Zstd,
            limit: PacketLimit::default(),
            prefix: Some("bundle".to_string()),
            exports: Vec::new(),
            handles: Vec::new(),
            local_by_hash: HashMap::new(),
            imports: Vec::new(),
            import_by_locator: HashMap::new(),
            packets: Vec::new(),
            packet_bytes: Vec::new(),
            pending: Vec::new(),
            pending_nodes: 0,
            flushed: None,
        }
    }

    /// Override the packet compression.
    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    /// Override the packet thresholds.
    pub fn with_packet_limit(mut self, limit: PacketLimit) -> Self {
        self.limit = limit;
        self
    }

    /// Override the locator prefix for the flushed bundle.
    pub fn with_prefix(mut self, prefix: Option<&str>) -> Self {
        self.prefix = prefix.map(str::to_string);
        self
    }

    /// Number of exports appended so far.
    pub fn export_count(&self) -> u32 {
        self.exports.len() as u32
    }

    /// Returns `true` if nothing has been appended.
    pub fn is_empty(&self) -> bool {
        self.exports.is_empty()
    }

    /// Returns `true` once the bundle has been flushed.
    pub fn is_flushed(&self) -> bool {
        self.flushed.is_some()
    }

    /// Append a node, returning a handle that resolves after flush.
    ///
    /// References to this writer's own exports become local indices;
    /// references to flushed external nodes are recorded in the import
    /// table. A buffered handle from another writer is an error.
    ///
    /// Appending a payload whose hash matches an existing export returns
    /// that export's handle: identical nodes collapse to one stored
    /// instance within the bundle.
    pub fn append(
        &mut self,
        payload: &[u8],
        refs: &[Handle],
        cancel: &CancelToken,
    ) -> BundleResult<Handle> {
        if self.flushed.is_some() {
            return Err(BundleError::WriterClosed);
        }
        cancel.check()?;

        let hash = HashDomain::NODE.hash(payload);
        if let Some(&index) = self.local_by_hash.get(&hash) {
            return Ok(self.handles[index as usize].clone());
        }

        let mut slots = Vec::with_capacity(refs.len());
        for handle in refs {
            slots.push(self.slot_for(handle)?);
        }

        let index = self.exports.len() as u32;
        self.exports.push(ExportEntry {
            hash,
            length: payload.len() as u64,
            refs: slots,
        });
        let handle = Handle::buffered(hash);
        self.handles.push(handle.clone());
        self.local_by_hash.insert(hash, index);

        self.pending.extend_from_slice(payload);
        self.pending_nodes += 1;
        if self.pending.len() >= self.limit.max_bytes || self.pending_nodes >= self.limit.max_nodes
        {
            self.pack_pending()?;
        }

        Ok(handle)
    }

    /// Map a reference handle to a table slot, registering imports as needed.
    fn slot_for(&mut self, handle: &Handle) -> BundleResult<RefSlot> {
        if let Some(node) = handle.resolve() {
            let import = match self.import_by_locator.get(&node.locator) {
                Some(&index) => {
                    let entry = &mut self.imports[index as usize];
                    if entry.export_count != node.export_count {
                        return Err(BundleError::ImportCountMismatch {
                            locator: node.locator.clone(),
                            import: entry.locator.clone(),
                            recorded: entry.export_count,
                            actual: node.export_count,
                        });
                    }
                    index
                }
                None => {
                    let index = self.imports.len() as u32;
                    self.imports.push(ImportBuild {
                        locator: node.locator.clone(),
                        used_exports: BTreeSet::new(),
                        export_count: node.export_count,
                    });
                    self.import_by_locator.insert(node.locator.clone(), index);
                    index
                }
            };
            self.imports[import as usize]
                .used_exports
                .insert(node.export_index);
            return Ok(RefSlot::Imported {
                import,
                export: node.export_index,
            });
        }

        // Buffered: acceptable only if it is one of ours.
        match self.local_by_hash.get(&handle.hash()) {
            Some(&index) => Ok(RefSlot::Local(index)),
            None => Err(BundleError::UnflushedReference),
        }
    }

    /// Close the in-progress packet: compress and move it to the packed area.
    fn pack_pending(&mut self) -> BundleResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let encoded = match self.compression {
            Compression::Zstd => zstd::encode_all(self.pending.as_slice(), 3)
                .map_err(|e| BundleError::Compression(e.to_string()))?,
            Compression::None => self.pending.clone(),
        };
        self.packets.push(PacketEntry {
            encoded_len: encoded.len() as u64,
            decoded_len: self.pending.len() as u64,
            compression: self.compression,
        });
        self.packet_bytes.extend_from_slice(&encoded);
        self.pending.clear();
        self.pending_nodes = 0;
        Ok(())
    }

    /// Write the bundle as one blob and mark every issued handle flushed.
    ///
    /// Idempotent: repeated calls return the memoized bundle reference.
    pub fn flush(&mut self, cancel: &CancelToken) -> BundleResult<NodeRef> {
        if let Some(node) = &self.flushed {
            return Ok(node.clone());
        }
        cancel.check()?;
        self.pack_pending()?;

        let header = BundleHeader {
            imports: self
                .imports
                .iter()
                .map(|b| ImportEntry {
                    locator: b.locator.clone(),
                    used_exports: b.used_exports.iter().copied().collect(),
                    export_count: b.export_count,
                })
                .collect(),
            exports: self.exports.clone(),
            packets: self.packets.clone(),
        };

        let mut payload = header.encode();
        payload.extend_from_slice(&self.packet_bytes);

        let import_locators: Vec<Locator> =
            self.imports.iter().map(|b| b.locator.clone()).collect();
        let record = BlobRecord::new(RecordKind::Bundle, import_locators, payload);
        let receipt = self
            .store
            .write(&record, self.prefix.as_deref(), cancel)?;
        let bundle = receipt.handle.resolve_required()?;

        let export_count = self.exports.len() as u32;
        for (index, handle) in self.handles.iter().enumerate() {
            handle.mark_flushed(NodeRef {
                locator: bundle.locator.clone(),
                hash: handle.hash(),
                export_index: index as u32,
                export_count,
            });
        }

        tracing::debug!(
            locator = %bundle.locator,
            exports = export_count,
            packets = self.packets.len(),
            "flushed bundle"
        );
        self.flushed = Some(bundle.clone());
        Ok(bundle)
    }

    /// Flush, then point `name` at `root` -- in that order.
    ///
    /// The ref is updated only after the bundle blob write durably succeeds;
    /// a cancelled or failed flush leaves the ref untouched, so a live ref
    /// can never reach a non-durable bundle.
    pub fn write_ref(
        &mut self,
        refs: &dyn RefIndex,
        name: &str,
        root: &Handle,
        cancel: &CancelToken,
    ) -> BundleResult<NodeRef> {
        self.flush(cancel)?;
        let node = root.resolve_required()?;
        refs.write_ref(name, &RefTarget::new(node.hash, node.locator.clone()))?;
        Ok(node)
    }
}

impl std::fmt::Debug for BundleWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BundleWriter")
            .field("exports", &self.exports.len())
            .field("packets", &self.packets.len())
            .field("pending_bytes", &self.pending.len())
            .field("flushed", &self.flushed.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_refs::MemoryRefIndex;
    use cairn_store::MemoryBlobStore;

    fn writer_over(store: &Arc<MemoryBlobStore>) -> BundleWriter {
        BundleWriter::new(Arc::clone(store) as Arc<dyn BlobStore>)
    }

    #[test]
    fn append_assigns_monotonic_indices() {
        let store = Arc::new(MemoryBlobStore::new());
        let mut writer = writer_over(&store);
        let cancel = CancelToken::new();

        writer.append(b"node zero", &[], &cancel).unwrap();
        writer.append(b"node one", &[], &cancel).unwrap();
        let bundle = writer.flush(&cancel).unwrap();

        assert_eq!(writer.export_count(), 2);
        assert_eq!(bundle.export_count, 1); // the bundle blob itself is standalone
    }

    #[test]
    fn duplicate_payload_returns_existing_handle() {
        let store = Arc::new(MemoryBlobStore::new());
        let mut writer = writer_over(&store);
        let cancel = CancelToken::new();

        let a = writer.append(b"same bytes", &[], &cancel).unwrap();
        let b = writer.append(b"same bytes", &[], &cancel).unwrap();
        assert_eq!(a.hash(), b.hash());
        assert_eq!(writer.export_count(), 1);
    }

    #[test]
    fn handles_resolve_after_flush() {
        let store = Arc::new(MemoryBlobStore::new());
        let mut writer = writer_over(&store);
        let cancel = CancelToken::new();

        let leaf = writer.append(b"leaf", &[], &cancel).unwrap();
        let parent = writer.append(b"parent", &[leaf.clone()], &cancel).unwrap();
        assert!(leaf.resolve().is_none());

        writer.flush(&cancel).unwrap();

        let leaf_ref = leaf.resolve().expect("flushed");
        let parent_ref = parent.resolve().expect("flushed");
        assert_eq!(leaf_ref.locator, parent_ref.locator);
        assert_eq!(leaf_ref.export_index, 0);
        assert_eq!(parent_ref.export_index, 1);
        assert_eq!(leaf_ref.export_count, 2);
    }

    #[test]
    fn flush_is_idempotent() {
        let store = Arc::new(MemoryBlobStore::new());
        let mut writer = writer_over(&store);
        let cancel = CancelToken::new();

        writer.append(b"only", &[], &cancel).unwrap();
        let first = writer.flush(&cancel).unwrap();
        let second = writer.flush(&cancel).unwrap();
        assert_eq!(first, second);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn append_after_flush_is_rejected() {
        let store = Arc::new(MemoryBlobStore::new());
        let mut writer = writer_over(&store);
        let cancel = CancelToken::new();

        writer.append(b"a", &[], &cancel).unwrap();
        writer.flush(&cancel).unwrap();
        let err = writer.append(b"b", &[], &cancel).unwrap_err();
        assert!(matches!(err, BundleError::WriterClosed));
    }

    #[test]
    fn packet_threshold_closes_packets() {
        let store = Arc::new(MemoryBlobStore::new());
        let mut writer = writer_over(&store).with_packet_limit(PacketLimit {
            max_bytes: 32,
            max_nodes: 1024,
        });
        let cancel = CancelToken::new();

        for i in 0..4u8 {
            writer.append(&[i; 20], &[], &cancel).unwrap();
        }
        writer.flush(&cancel).unwrap();
        // 20-byte nodes against a 32-byte bound: two nodes per packet.
        assert_eq!(writer.packets.len(), 2);
    }

    #[test]
    fn foreign_buffered_handle_is_rejected() {
        let store = Arc::new(MemoryBlobStore::new());
        let mut other = writer_over(&store);
        let cancel = CancelToken::new();
        let foreign = other.append(b"not yours", &[], &cancel).unwrap();

        let mut writer = writer_over(&store);
        let err = writer.append(b"node", &[foreign], &cancel).unwrap_err();
        assert!(matches!(err, BundleError::UnflushedReference));
    }

    #[test]
    fn cross_bundle_refs_are_recorded_as_imports() {
        let store = Arc::new(MemoryBlobStore::new());
        let cancel = CancelToken::new();

        let mut first = writer_over(&store);
        let imported = first.append(b"shared node", &[], &cancel).unwrap();
        first.flush(&cancel).unwrap();

        let mut second = writer_over(&store);
        second.append(b"uses import", &[imported.clone()], &cancel).unwrap();
        second.flush(&cancel).unwrap();

        assert_eq!(second.imports.len(), 1);
        let import = &second.imports[0];
        assert_eq!(import.locator, imported.resolve().unwrap().locator);
        assert_eq!(import.export_count, 1);
        assert!(import.used_exports.contains(&0));
    }

    #[test]
    fn write_ref_publishes_after_flush() {
        let store = Arc::new(MemoryBlobStore::new());
        let refs = MemoryRefIndex::new();
        let cancel = CancelToken::new();

        let mut writer = writer_over(&store);
        let root = writer.append(b"root node", &[], &cancel).unwrap();
        let node = writer
            .write_ref(&refs, "builds/latest", &root, &cancel)
            .unwrap();

        let target = refs.try_read_ref("builds/latest", None).unwrap().unwrap();
        assert_eq!(target.hash, node.hash);
        assert_eq!(target.locator, node.locator);
    }

    #[test]
    fn cancelled_flush_leaves_ref_unset() {
        let store = Arc::new(MemoryBlobStore::new());
        let refs = MemoryRefIndex::new();

        let mut writer = writer_over(&store);
        let root = writer.append(b"root", &[], &CancelToken::new()).unwrap();

        let cancel = CancelToken::new();
        cancel.cancel();
        let err = writer
            .write_ref(&refs, "builds/latest", &root, &cancel)
            .unwrap_err();
        assert!(matches!(err, BundleError::Cancelled(_)));
        assert!(refs.try_read_ref("builds/latest", None).unwrap().is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn uncompressed_writer_stores_raw_packets() {
        let store = Arc::new(MemoryBlobStore::new());
        let mut writer = writer_over(&store).with_compression(Compression::None);
        let cancel = CancelToken::new();

        writer.append(b"raw bytes", &[], &cancel).unwrap();
        writer.flush(&cancel).unwrap();
        assert_eq!(writer.packets[0].compression, Compression::None);
        assert_eq!(writer.packets[0].encoded_len, writer.packets[0].decoded_len);
    }
}
