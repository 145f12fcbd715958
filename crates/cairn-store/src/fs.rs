use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use cairn_types::{CancelToken, Locator};

use crate::error::StoreResult;
use crate::handle::{Handle, NodeRef};
use crate::record::{BlobRecord, RecordKind};
use crate::traits::{verify_record, BlobReader, BlobStore, WriteReceipt};

/// Filesystem blob store.
///
/// Records live under `<root>/objects/<shard>/<locator>` where `shard` is the
/// first two hex characters of the payload hash, keeping directory fan-out
/// bounded. Writes spool to `<root>/tmp` and are published with an atomic
/// rename, so readers never observe a partially-written record.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Open (creating directories as needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(root.join("objects"))?;
        fs::create_dir_all(root.join("tmp"))?;
        Ok(Self { root })
    }

    /// The store's root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, locator: &Locator) -> PathBuf {
        let shard = match locator.embedded_hash() {
            Some(hash) => hash.to_hex()[..2].to_string(),
            None => "xx".to_string(),
        };
        self.root.join("objects").join(shard).join(locator.as_str())
    }

    /// Publish encoded bytes at the locator's final path via temp + rename.
    fn publish(&self, locator: &Locator, encoded: &[u8]) -> StoreResult<()> {
        let path = self.object_path(locator);
        if path.exists() {
            // Idempotent: content-addressing guarantees identical bytes.
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut tmp = tempfile::NamedTempFile::new_in(self.root.join("tmp"))?;
        tmp.write_all(encoded)?;
        tmp.flush()?;
        tmp.persist(&path).map_err(|e| e.error)?;
        Ok(())
    }
}

impl BlobReader for FsBlobStore {
    fn read(&self, locator: &Locator, cancel: &CancelToken) -> StoreResult<Option<BlobRecord>> {
        cancel.check()?;
        let path = self.object_path(locator);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let record = BlobRecord::decode(&data)?;
        verify_record(locator, &record)?;
        Ok(Some(record))
    }
}

impl BlobStore for FsBlobStore {
    fn write(
        &self,
        record: &BlobRecord,
        prefix: Option<&str>,
        cancel: &CancelToken,
    ) -> StoreResult<WriteReceipt> {
        cancel.check()?;
        let hash = record.hash();
        let locator = Locator::derive(prefix, &hash)?;
        self.publish(&locator, &record.encode())?;
        Ok(WriteReceipt {
            handle: Handle::flushed(NodeRef::standalone(locator, hash)),
            redirect: None,
        })
    }

    fn exists(&self, locator: &Locator) -> StoreResult<bool> {
        Ok(self.object_path(locator).exists())
    }

    fn write_stream(
        &self,
        kind: RecordKind,
        imports: Vec<Locator>,
        payload: &mut dyn Read,
        prefix: Option<&str>,
        cancel: &CancelToken,
    ) -> StoreResult<WriteReceipt> {
        cancel.check()?;

        // Spool framing plus payload to a temp file while hashing the
        // payload, so the whole record never has to fit in memory. The
        // locator is only known once the stream ends.
        let framing = BlobRecord::new(kind, imports, Vec::new());
        let mut tmp = tempfile::NamedTempFile::new_in(self.root.join("tmp"))?;
        tmp.write_all(&framing.encode_header())?;

        let mut hasher = kind.hash_domain().hasher();
        let mut buf = [0u8; 64 * 1024];
        loop {
            cancel.check()?;
            let n = payload.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            tmp.write_all(&buf[..n])?;
        }
        tmp.flush()?;

        let hash = cairn_types::ContentHash::from_digest(*hasher.finalize().as_bytes());
        let locator = Locator::derive(prefix, &hash)?;
        let path = self.object_path(&locator);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        if path.exists() {
            // Already stored; drop the spooled duplicate.
            tmp.close()?;
        } else {
            tmp.persist(&path).map_err(|e| e.error)?;
        }
        Ok(WriteReceipt {
            handle: Handle::flushed(NodeRef::standalone(locator, hash)),
            redirect: None,
        })
    }
}

impl std::fmt::Debug for FsBlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsBlobStore")
            .field("root", &self.root)
            .finish()
    }
}
