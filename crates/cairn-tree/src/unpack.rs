//! Extracting a packed tree back to the filesystem.

use std::fs;
use std::io::Write;
use std::path::Path;

use cairn_bundle::{BundleOpener, ResolvedNode};
use cairn_refs::RefTarget;
use cairn_types::CancelToken;

use crate::error::{TreeError, TreeResult};
use crate::node::{ChunkIndexNode, DirNode, EntryKind};

/// Extract the tree rooted at `root` into `target`.
///
/// Recreates directories, streams each file's chunks in order, and preserves
/// zero-length files; extracted bytes equal the bytes originally packed. A
/// failure mid-extraction leaves partially-written files on disk -- there is
/// no directory-level atomicity. Callers requiring atomicity should extract
/// to a staging path and rename.
pub fn unpack(
    opener: &BundleOpener,
    root: &RefTarget,
    target: &Path,
    cancel: &CancelToken,
) -> TreeResult<()> {
    let bundle = opener.open(&root.locator, cancel)?;
    let index = bundle
        .exports()
        .iter()
        .position(|e| e.hash == root.hash)
        .ok_or_else(|| TreeError::RootNotFound {
            locator: root.locator.clone(),
            hash: root.hash,
        })?;
    let node = ResolvedNode {
        bundle,
        index: index as u32,
    };

    fs::create_dir_all(target)?;
    extract_dir(&node, target, opener, cancel)
}

fn extract_dir(
    node: &ResolvedNode,
    target: &Path,
    opener: &BundleOpener,
    cancel: &CancelToken,
) -> TreeResult<()> {
    let dir = DirNode::decode(&node.read()?)?;
    let slots = node.entry().refs.clone();
    if slots.len() != dir.len() {
        return Err(TreeError::MalformedNode {
            reason: format!(
                "directory has {} entries but {} references",
                dir.len(),
                slots.len()
            ),
        });
    }

    for (entry, slot) in dir.entries.iter().zip(slots) {
        cancel.check()?;
        let child = node.bundle.resolve_ref(slot, opener, cancel)?;
        if child.entry().hash != entry.hash {
            return Err(TreeError::MalformedNode {
                reason: format!(
                    "entry {:?} hash disagrees with its reference",
                    entry.name
                ),
            });
        }

        let path = target.join(&entry.name);
        match entry.kind {
            EntryKind::Dir => {
                fs::create_dir_all(&path)?;
                extract_dir(&child, &path, opener, cancel)?;
            }
            EntryKind::File => {
                let bytes = child.read()?;
                if bytes.len() as u64 != entry.size {
                    return Err(TreeError::MalformedNode {
                        reason: format!(
                            "file {:?} is {} bytes, directory records {}",
                            entry.name,
                            bytes.len(),
                            entry.size
                        ),
                    });
                }
                fs::write(&path, bytes)?;
            }
            EntryKind::ChunkedFile => {
                extract_chunked(&child, &path, entry.size, opener, cancel)?;
            }
        }
    }
    Ok(())
}

fn extract_chunked(
    node: &ResolvedNode,
    path: &Path,
    expected_size: u64,
    opener: &BundleOpener,
    cancel: &CancelToken,
) -> TreeResult<()> {
    let index = ChunkIndexNode::decode(&node.read()?)?;
    let slots = node.entry().refs.clone();
    if slots.len() != index.len() {
        return Err(TreeError::MalformedNode {
            reason: format!(
                "chunk index lists {} chunks but {} references",
                index.len(),
                slots.len()
            ),
        });
    }
    if index.total_len() != expected_size {
        return Err(TreeError::MalformedNode {
            reason: format!(
                "chunk index totals {} bytes, directory records {}",
                index.total_len(),
                expected_size
            ),
        });
    }

    let mut file = std::io::BufWriter::new(fs::File::create(path)?);
    for (i, slot) in slots.into_iter().enumerate() {
        cancel.check()?;
        let chunk = node.bundle.resolve_ref(slot, opener, cancel)?;
        if chunk.entry().hash != index.chunk_hashes[i] {
            return Err(TreeError::MalformedNode {
                reason: format!("chunk {i} hash disagrees with its reference"),
            });
        }
        let bytes = chunk.read()?;
        if bytes.len() as u64 != index.chunk_len(i) {
            return Err(TreeError::MalformedNode {
                reason: format!(
                    "chunk {i} is {} bytes, index records {}",
                    bytes.len(),
                    index.chunk_len(i)
                ),
            });
        }
        file.write_all(&bytes)?;
    }
    file.flush()?;
    Ok(())
}
