//! Packing a source directory into a bundle.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use cairn_bundle::BundleWriter;
use cairn_store::Handle;
use cairn_types::{CancelToken, ContentHash};
use walkdir::WalkDir;

use crate::chunker::Chunker;
use crate::error::{TreeError, TreeResult};
use crate::node::{ChunkIndexNode, DirEntry, DirNode, EntryKind};

/// Pack `source` into `writer`, returning the root directory node's handle.
///
/// Depth-first with children appended before their parents, so every
/// directory payload embeds fully-resolved child hashes and a directory hash
/// is a pure function of its subtree. The walk is name-sorted for
/// deterministic output: packing unchanged content reproduces the root hash.
///
/// The returned handle resolves once the caller flushes the writer (directly
/// or through [`BundleWriter::write_ref`]).
pub fn pack(
    source: &Path,
    writer: &mut BundleWriter,
    chunker: &Chunker,
    cancel: &CancelToken,
) -> TreeResult<Handle> {
    if !source.is_dir() {
        return Err(TreeError::NotADirectory(source.to_path_buf()));
    }

    // Children accumulate under their parent path until the walk yields the
    // directory itself (contents-first), at which point it becomes a node.
    let mut pending: HashMap<PathBuf, Vec<(DirEntry, Handle)>> = HashMap::new();
    let mut root = None;

    for entry in WalkDir::new(source).contents_first(true).sort_by_file_name() {
        let entry = entry?;
        cancel.check()?;
        let path = entry.path();
        let file_type = entry.file_type();

        if file_type.is_symlink() {
            return Err(TreeError::UnsupportedFileType(path.to_path_buf()));
        }

        if file_type.is_file() {
            let (kind, size, handle) = pack_file(path, writer, chunker, cancel)?;
            let name = entry_name(path)?;
            let parent = path.parent().expect("file has a parent").to_path_buf();
            pending.entry(parent).or_default().push((
                DirEntry {
                    name,
                    kind,
                    size,
                    hash: handle.hash(),
                },
                handle,
            ));
        } else if file_type.is_dir() {
            let mut children = pending.remove(path).unwrap_or_default();
            children.sort_by(|(a, _), (b, _)| a.name.cmp(&b.name));
            let refs: Vec<Handle> = children.iter().map(|(_, h)| h.clone()).collect();
            let node = DirNode::new(children.into_iter().map(|(e, _)| e).collect());
            let handle = writer.append(&node.encode(), &refs, cancel)?;

            if path == source {
                root = Some(handle);
            } else {
                let name = entry_name(path)?;
                let parent = path.parent().expect("subdirectory has a parent").to_path_buf();
                pending.entry(parent).or_default().push((
                    DirEntry {
                        name,
                        kind: EntryKind::Dir,
                        size: 0,
                        hash: handle.hash(),
                    },
                    handle,
                ));
            }
        }
        // Other file types never reach here: walkdir reports them as files
        // or symlinks, both handled above.
    }

    let root = root.ok_or_else(|| TreeError::NotADirectory(source.to_path_buf()))?;
    tracing::debug!(
        source = %source.display(),
        exports = writer.export_count(),
        "packed tree"
    );
    Ok(root)
}

/// Chunk and append one file; small files become a single leaf.
fn pack_file(
    path: &Path,
    writer: &mut BundleWriter,
    chunker: &Chunker,
    cancel: &CancelToken,
) -> TreeResult<(EntryKind, u64, Handle)> {
    let file = fs::File::open(path)?;
    let mut chunks: Vec<(u64, ContentHash, Handle)> = Vec::new();
    for chunk in chunker.stream(file) {
        cancel.check()?;
        let chunk = chunk?;
        let handle = writer.append(&chunk, &[], cancel)?;
        chunks.push((chunk.len() as u64, handle.hash(), handle));
    }

    match chunks.len() {
        0 => {
            // Zero-length file: a single empty leaf.
            let handle = writer.append(&[], &[], cancel)?;
            Ok((EntryKind::File, 0, handle))
        }
        1 => {
            let (len, _, handle) = chunks.pop().expect("one chunk");
            Ok((EntryKind::File, len, handle))
        }
        _ => {
            let index = ChunkIndexNode::from_chunks(
                &chunks.iter().map(|(len, hash, _)| (*len, *hash)).collect::<Vec<_>>(),
            );
            let refs: Vec<Handle> = chunks.into_iter().map(|(_, _, h)| h).collect();
            let total = index.total_len();
            let handle = writer.append(&index.encode(), &refs, cancel)?;
            Ok((EntryKind::ChunkedFile, total, handle))
        }
    }
}

fn entry_name(path: &Path) -> TreeResult<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| TreeError::UnsupportedFileType(path.to_path_buf()))
}
