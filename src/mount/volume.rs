//! Volume binding and the buffer-backed B-Tree node store (spec §2 C9 /
//! §4.9). Grounded on `original_source/hammer_vfsops.c` for volume bind
//! semantics and on [`crate::btree::node_store::NodeStore`]'s own doc
//! comment, which names this as the production wiring point for the BTREE
//! zone.

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::blockmap::Freemap;
use crate::btree::node_store::NodeStore;
use crate::error::Result;
use crate::io::buffer::{BufferKind, BufferManager};
use crate::io::device::BlockDevice;
use crate::layout::btree_node::{BtreeNode, BtreeNodeRaw};
use crate::layout::zone::Zone;
use crate::layout::{BIGBLOCK_SIZE, BUFFER_SIZE};

/// One bound device, addressed by `vol_no` (spec §6: "mount(volumes, ...)").
/// Multi-volume binds beyond the root volume aren't modeled here — the
/// blockmap and buffer manager already treat "a device with byte offsets"
/// uniformly, so a second member volume would just be another
/// [`BlockDevice`] behind the same allocator, which this crate's
/// single-volume [`crate::mount::Mount`] doesn't yet wire up. See
/// `DESIGN.md`.
pub struct Volume {
    pub device: Arc<dyn BlockDevice>,
    pub vol_no: i32,
}

impl Volume {
    pub fn new(device: Arc<dyn BlockDevice>, vol_no: i32) -> Self {
        Volume { device, vol_no }
    }
}

struct AppendCursor {
    bigblock_offset: u64,
    append_off: u64,
}

/// Persists B-Tree nodes through the buffer manager and the `BTREE` zone's
/// append allocator, one node per `BUFFER_SIZE`-aligned slot — a node's
/// encoded form (`INT_ELMS`/`LEAF_ELMS == 8`) is a couple KiB at most,
/// comfortably under one 16 KiB buffer. Nodes are written as
/// [`BufferKind::Meta`] buffers so they drain in the flusher's META stage
/// alongside the rest of the tree's structural state (spec §5 drain order).
pub struct BufferBackedNodeStore {
    buffers: Arc<BufferManager>,
    freemap: Arc<Freemap>,
    cursor: Mutex<Option<AppendCursor>>,
    flush_group: AtomicU64,
}

impl BufferBackedNodeStore {
    pub fn new(buffers: Arc<BufferManager>, freemap: Arc<Freemap>) -> Self {
        BufferBackedNodeStore {
            buffers,
            freemap,
            cursor: Mutex::new(None),
            flush_group: AtomicU64::new(1),
        }
    }

    /// Called by the mount when a transaction begins, so node slots
    /// allocated or freed under it attribute to the right flush group
    /// (spec §4.9).
    pub fn set_flush_group(&self, group: u64) {
        self.flush_group.store(group, AtomicOrdering::SeqCst);
    }
}

impl NodeStore for BufferBackedNodeStore {
    fn load(&self, offset: u64) -> Result<BtreeNode> {
        let handle = self.buffers.acquire(offset, BufferKind::Meta)?;
        let bytes = handle.read();
        let raw: &BtreeNodeRaw = bytemuck::from_bytes(&bytes[..std::mem::size_of::<BtreeNodeRaw>()]);
        BtreeNode::from_raw(raw)
    }

    fn store(&self, offset: u64, node: &BtreeNode) -> Result<()> {
        let raw = node.to_raw();
        let handle = self.buffers.acquire(offset, BufferKind::Meta)?;
        self.buffers.modify(&handle)?;
        self.buffers.write_region(&handle, 0, bytemuck::bytes_of(&raw))?;
        self.buffers.modify_done(&handle);
        self.buffers.release(handle, false)
    }

    fn allocate(&self) -> Result<u64> {
        let flush_group = self.flush_group.load(AtomicOrdering::SeqCst);
        let mut cursor = self.cursor.lock();
        if cursor.as_ref().map_or(true, |c| c.append_off + BUFFER_SIZE > BIGBLOCK_SIZE) {
            let bb = self.freemap.alloc_bigblock(Zone::Btree)?;
            *cursor = Some(AppendCursor { bigblock_offset: bb, append_off: 0 });
        }
        let c = cursor.as_mut().unwrap();
        let offset = c.bigblock_offset + c.append_off;

        let resv = self.freemap.reserve(Zone::Btree, c.bigblock_offset, BUFFER_SIZE, flush_group)?;
        self.freemap.finalize(resv, c.append_off, BUFFER_SIZE)?;
        c.append_off += BUFFER_SIZE;
        drop(cursor);

        // Zero-initialize the slot so a stray load() before the first
        // store() doesn't see whatever the device previously held there.
        let handle = self.buffers.new_buffer(offset, BufferKind::Meta)?;
        self.buffers.release(handle, false)?;
        Ok(offset)
    }

    fn free(&self, offset: u64) -> Result<()> {
        let bigblock_offset = (offset / BIGBLOCK_SIZE) * BIGBLOCK_SIZE;
        self.freemap
            .free(bigblock_offset, BUFFER_SIZE, self.flush_group.load(AtomicOrdering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::tree::BTree;
    use crate::io::device::InMemoryDevice;
    use crate::layout::base_element::BaseElement;
    use crate::layout::btree_node::LeafElement;

    fn store() -> BufferBackedNodeStore {
        let buffers = Arc::new(BufferManager::new(Arc::new(InMemoryDevice::new(64 << 20)), BUFFER_SIZE));
        let freemap = Arc::new(Freemap::new(64));
        BufferBackedNodeStore::new(buffers, freemap)
    }

    #[test]
    fn allocate_then_load_round_trips_a_node() {
        let s = store();
        let offset = s.allocate().unwrap();
        let mut node = BtreeNode::new_leaf(0);
        node.leaf_elements_mut().push(LeafElement {
            base: BaseElement::live(0, 7, 0, 7, 1),
            data_offset: 0x1000,
            data_len: 4,
            data_crc: 0xabcd,
        });
        s.store(offset, &node).unwrap();

        let reloaded = s.load(offset).unwrap();
        assert_eq!(reloaded.leaf_elements()[0].data_offset, 0x1000);
    }

    #[test]
    fn drives_a_whole_btree_across_many_splits() {
        let s = store();
        let tree = BTree::new(s);
        for i in 0..200u64 {
            tree.insert(LeafElement {
                base: BaseElement::live(0, i, 0, i, 1),
                data_offset: i,
                data_len: 0,
                data_crc: 0,
            })
            .unwrap();
        }
        for i in 0..200u64 {
            let found = tree.lookup(&BaseElement::live(0, i, 0, i, 0), None).unwrap();
            assert_eq!(found.data_offset, i);
        }
    }
}
