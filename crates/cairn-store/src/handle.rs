use std::sync::{Arc, RwLock};

use cairn_types::{ContentHash, Locator};

use crate::error::{StoreError, StoreResult};

/// Fully-resolved reference to a durable node.
///
/// A node lives inside a bundle at a given export index; a stand-alone blob is
/// the degenerate case with one export. Carrying the export count here lets a
/// later writer record a validatable import entry from the reference alone,
/// without re-opening the target bundle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeRef {
    /// Locator of the blob (bundle) containing the node.
    pub locator: Locator,
    /// Content hash of the node's payload.
    pub hash: ContentHash,
    /// Index of the node in the containing bundle's export table.
    pub export_index: u32,
    /// Total number of exports in the containing bundle.
    pub export_count: u32,
}

impl NodeRef {
    /// Reference to a stand-alone blob (a one-export container).
    pub fn standalone(locator: Locator, hash: ContentHash) -> Self {
        Self {
            locator,
            hash,
            export_index: 0,
            export_count: 1,
        }
    }
}

#[derive(Debug)]
enum HandleState {
    /// The node is buffered in a writer and not yet durable.
    Buffered { hash: ContentHash },
    /// The node has been written; the reference is final.
    Flushed(NodeRef),
}

/// Reference to a node that is either buffered (in memory, not yet durable)
/// or flushed (resolved to a locator and hash).
///
/// Handles are cheap to clone; all clones share one state. The transition
/// from buffered to flushed happens exactly once -- [`mark_flushed`] is
/// idempotent and [`resolve`] is memoized, returning the same `NodeRef` for
/// the lifetime of the handle.
///
/// [`mark_flushed`]: Handle::mark_flushed
/// [`resolve`]: Handle::resolve
#[derive(Clone, Debug)]
pub struct Handle {
    state: Arc<RwLock<HandleState>>,
}

impl Handle {
    /// Create a handle for a node still buffered in a writer.
    ///
    /// The payload hash is known at append time even though the node is not
    /// yet durable.
    pub fn buffered(hash: ContentHash) -> Self {
        Self {
            state: Arc::new(RwLock::new(HandleState::Buffered { hash })),
        }
    }

    /// Create an already-flushed handle.
    pub fn flushed(node: NodeRef) -> Self {
        Self {
            state: Arc::new(RwLock::new(HandleState::Flushed(node))),
        }
    }

    /// The content hash of the referenced node (known in both states).
    pub fn hash(&self) -> ContentHash {
        match &*self.state.read().expect("lock poisoned") {
            HandleState::Buffered { hash } => *hash,
            HandleState::Flushed(node) => node.hash,
        }
    }

    /// Returns `true` once the node is durable.
    pub fn is_flushed(&self) -> bool {
        matches!(
            &*self.state.read().expect("lock poisoned"),
            HandleState::Flushed(_)
        )
    }

    /// The resolved reference, if the node has been flushed.
    pub fn resolve(&self) -> Option<NodeRef> {
        match &*self.state.read().expect("lock poisoned") {
            HandleState::Buffered { .. } => None,
            HandleState::Flushed(node) => Some(node.clone()),
        }
    }

    /// The resolved reference, or [`StoreError::NotFlushed`].
    pub fn resolve_required(&self) -> StoreResult<NodeRef> {
        self.resolve().ok_or(StoreError::NotFlushed)
    }

    /// Record the durable location of a buffered node.
    ///
    /// Idempotent: once flushed, later calls are ignored, so repeated flushes
    /// of unchanged writer state cannot re-point a handle.
    pub fn mark_flushed(&self, node: NodeRef) {
        let mut state = self.state.write().expect("lock poisoned");
        if matches!(&*state, HandleState::Buffered { .. }) {
            *state = HandleState::Flushed(node);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_types::HashDomain;

    fn sample_ref(payload: &[u8]) -> NodeRef {
        let hash = HashDomain::NODE.hash(payload);
        let locator = Locator::derive(Some("bundle"), &HashDomain::BUNDLE.hash(payload)).unwrap();
        NodeRef {
            locator,
            hash,
            export_index: 3,
            export_count: 7,
        }
    }

    #[test]
    fn buffered_handle_exposes_hash_only() {
        let hash = HashDomain::NODE.hash(b"pending");
        let handle = Handle::buffered(hash);
        assert_eq!(handle.hash(), hash);
        assert!(!handle.is_flushed());
        assert!(handle.resolve().is_none());
        assert!(matches!(
            handle.resolve_required(),
            Err(StoreError::NotFlushed)
        ));
    }

    #[test]
    fn mark_flushed_transitions_all_clones() {
        let node = sample_ref(b"content");
        let handle = Handle::buffered(node.hash);
        let clone = handle.clone();

        handle.mark_flushed(node.clone());
        assert!(clone.is_flushed());
        assert_eq!(clone.resolve(), Some(node));
    }

    #[test]
    fn mark_flushed_is_idempotent() {
        let first = sample_ref(b"first");
        let second = sample_ref(b"second");
        let handle = Handle::buffered(first.hash);

        handle.mark_flushed(first.clone());
        handle.mark_flushed(second);
        // First resolution wins; resolve is memoized.
        assert_eq!(handle.resolve(), Some(first));
    }

    #[test]
    fn standalone_ref_is_single_export() {
        let hash = HashDomain::BLOB.hash(b"blob");
        let locator = Locator::derive(None, &hash).unwrap();
        let node = NodeRef::standalone(locator, hash);
        assert_eq!(node.export_index, 0);
        assert_eq!(node.export_count, 1);
    }
}
