//! Node storage seam (spec §9: "Cyclic back-pointers [...] represented as
//! offsets, not owning references; lookups re-resolve via the buffer
//! manager, which guarantees stable identity for the lifetime of a ref.").
//!
//! The tree (`src/btree/tree.rs`) never holds a node by reference across an
//! operation boundary; it always goes through a [`NodeStore`] by offset.
//! This is the same decoupling idiom as [`crate::io::bioops`]: the
//! production implementation wires this to the blockmap allocator and
//! buffer manager (`BTREE` zone), while tests use
//! [`InMemoryNodeStore`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use parking_lot::RwLock;

use crate::error::{HammerError, Result};
use crate::layout::btree_node::BtreeNode;

pub trait NodeStore: Send + Sync {
    fn load(&self, offset: u64) -> Result<BtreeNode>;
    fn store(&self, offset: u64, node: &BtreeNode) -> Result<()>;
    /// Allocates a fresh, as-yet-unwritten node offset (spec §4.3:
    /// large/meta allocation from the `BTREE` zone).
    fn allocate(&self) -> Result<u64>;
    fn free(&self, offset: u64) -> Result<()>;
}

/// Test/reference node store: a plain map keyed by a monotonically
/// assigned fake "offset". Grounded on the teacher's use of an in-memory
/// `Filesystem` implementation purely to exercise algorithmic logic without
/// a real device.
pub struct InMemoryNodeStore {
    nodes: RwLock<HashMap<u64, BtreeNode>>,
    next_offset: AtomicU64,
}

impl InMemoryNodeStore {
    pub fn new() -> Self {
        InMemoryNodeStore {
            nodes: RwLock::new(HashMap::new()),
            // Offset 0 is reserved to mean "no subtree" (spec §3: rightmost
            // boundary's subtree_offset == 0); real offsets start at 1.
            next_offset: AtomicU64::new(1),
        }
    }
}

impl Default for InMemoryNodeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeStore for InMemoryNodeStore {
    fn load(&self, offset: u64) -> Result<BtreeNode> {
        self.nodes
            .read()
            .get(&offset)
            .cloned()
            .ok_or(HammerError::NotFound)
    }

    fn store(&self, offset: u64, node: &BtreeNode) -> Result<()> {
        self.nodes.write().insert(offset, node.clone());
        Ok(())
    }

    fn allocate(&self) -> Result<u64> {
        Ok(self.next_offset.fetch_add(1, AtomicOrdering::SeqCst))
    }

    fn free(&self, offset: u64) -> Result<()> {
        self.nodes.write().remove(&offset);
        Ok(())
    }
}
