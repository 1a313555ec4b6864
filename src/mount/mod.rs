//! Mount lifecycle: volume bind, transactions, critical-error latch, and the
//! wiring that ties the buffer manager, freemap, UNDO FIFO, B-Tree, and
//! flusher into one live filesystem instance (spec §2 C9 / §4.9, §6).
//! Grounded on `original_source/hammer_vfsops.c`; the config surface this
//! module is built against follows the teacher's `DiskBufferConfigBuilder`
//! builder idiom (see `crate::config`).
//!
//! The layer1/layer2 occupancy table itself is still in-memory only (no
//! `FREEMAP`-zone persistence — see `DESIGN.md`), but `open_existing`
//! reconstructs it on every reopen rather than starting from "all blocks
//! free": it reserves the header's and UNDO ring's fixed blocks, then walks
//! the recovered B-Tree marking every node's and every live record's data
//! big block occupied, before any new allocation is allowed to run. See
//! `DESIGN.md`.

pub mod transaction;
pub mod volume;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::blockmap::{Freemap, ResvId, SpaceCheckSizing, SpaceRequest};
use crate::btree::node_store::NodeStore;
use crate::btree::tree::BTree;
use crate::config::MountConfig;
use crate::cursor::Cursor;
use crate::error::{HammerError, Result};
use crate::flusher::{Flusher, VolumeHeaderWriter};
use crate::io::buffer::{BufferHandle, BufferKind, BufferManager};
use crate::io::device::BlockDevice;
use crate::layout::base_element::{BaseElement, Tid};
use crate::layout::btree_node::{LeafElement, NodeBody};
use crate::layout::volume_header::{VolumeHeader, VolumeHeaderRaw, HAMMER_VOLUME_VERSION};
use crate::layout::zone::Zone;
use crate::layout::{BIGBLOCK_SIZE, BUFFER_SIZE, VOLUME_HEADER_OFFSET};
use crate::maintenance::{prune, rebalance, reblock, PrunePolicy, PruneStats, RebalanceReport, ReblockStats};
use crate::stats::MountStats;
use crate::undo::record::RedoWritePayload;
use crate::undo::recovery::{recover, recover_stage1, recover_stage2};
use crate::undo::UndoFifo;

pub use transaction::{Transaction, TransactionKind, CRCDOM, FLS};
pub use volume::{BufferBackedNodeStore, Volume};

/// Commits the in-memory volume header to the device, through the buffer
/// manager's `Volume` dirty tree. Kept separate from [`Mount`] itself so the
/// flusher's [`VolumeHeaderWriter`] dependency doesn't have to own a `Mount`
/// back-reference — the same decoupling idiom this crate already applies to
/// [`crate::btree::node_store::NodeStore`] and [`crate::io::bioops::BioOps`].
struct HeaderCommitter {
    buffers: Arc<BufferManager>,
    header: Arc<RwLock<VolumeHeader>>,
}

impl VolumeHeaderWriter for HeaderCommitter {
    fn commit_volume_header(&self) -> Result<()> {
        let raw = self.header.read().to_raw();
        let handle = self.buffers.acquire(VOLUME_HEADER_OFFSET, BufferKind::Volume)?;
        self.buffers.modify(&handle)?;
        self.buffers.write_region(&handle, 0, bytemuck::bytes_of(&raw))?;
        self.buffers.modify_done(&handle);
        self.buffers.release(handle, true)
    }
}

struct ZoneCursor {
    bigblock_offset: u64,
    append_off: u64,
}

/// A live, single-volume HAMMER mount (spec §6: `mount(volumes, flags,
/// asof?) -> hmp`). Multi-volume binds aren't modeled; see
/// [`volume::Volume`]'s doc comment.
pub struct Mount {
    volume: Volume,
    buffers: Arc<BufferManager>,
    freemap: Arc<Freemap>,
    undo: Arc<UndoFifo>,
    undo_ring_size: u64,
    tree: Arc<BTree<BufferBackedNodeStore>>,
    header: Arc<RwLock<VolumeHeader>>,
    flusher: Flusher<HeaderCommitter>,
    data_cursors: Mutex<HashMap<Zone, ZoneCursor>>,
    stats: Arc<MountStats>,
    read_only: AtomicBool,
    critical: Mutex<Option<HammerError>>,
    config: MountConfig,
}

impl Mount {
    /// Initializes a brand-new volume: a fresh header, a fresh freemap
    /// sized to the device, and an empty B-Tree (spec §6's `mount(...)`
    /// entry point when no prior header exists).
    pub fn mkfs(device: Arc<dyn BlockDevice>, vol_no: i32, config: MountConfig) -> Result<Self> {
        let total_bigblocks = device.size_bytes() / BIGBLOCK_SIZE;
        if total_bigblocks == 0 {
            return Err(HammerError::InvalidArgument {
                detail: "device too small to hold a single big block".to_string(),
            });
        }

        let buffers = Arc::new(BufferManager::new(device.clone(), BUFFER_SIZE));
        let freemap = Arc::new(Freemap::new(total_bigblocks));
        let stats = Arc::new(MountStats::new());
        let undo_base = BIGBLOCK_SIZE;
        reserve_fixed_zones(&freemap, undo_base, config.undo_ring_size);
        let undo = Arc::new(UndoFifo::new(buffers.clone(), undo_base, config.undo_ring_size, 0, 0, 1));
        undo.set_stats(stats.clone());
        buffers.set_undo_sink(undo.clone());

        let node_store = BufferBackedNodeStore::new(buffers.clone(), freemap.clone());
        let tree = Arc::new(BTree::new(node_store));

        let mut header_val = VolumeHeader::new(vol_no, 1, Uuid::new_v4());
        let mut root = header_val.blockmap_root(Zone::Undo);
        root.phys_offset = undo_base;
        header_val.set_blockmap_root(Zone::Undo, root);
        let header = Arc::new(RwLock::new(header_val));

        let committer = HeaderCommitter {
            buffers: buffers.clone(),
            header: header.clone(),
        };
        committer.commit_volume_header()?;
        let flusher = Flusher::new(buffers.clone(), undo.clone(), freemap.clone(), committer, config.flusher_worker_count);

        Ok(Mount {
            volume: Volume::new(device, vol_no),
            buffers,
            freemap,
            undo,
            undo_ring_size: config.undo_ring_size,
            tree,
            header,
            flusher,
            data_cursors: Mutex::new(HashMap::new()),
            stats,
            read_only: AtomicBool::new(false),
            critical: Mutex::new(None),
            config,
        })
    }

    /// Reopens an existing volume: reads and CRC-verifies the volume
    /// header, runs stage1 UNDO recovery, rebuilds the freemap and B-Tree
    /// over the repaired device, then (if `read_write`) runs stage2 REDO
    /// recovery through a resolver backed by that same B-Tree (spec §6:
    /// "supports update (RO↔RW) with version-check, stage1+stage2 recovery
    /// on RO→RW").
    pub fn open_existing(device: Arc<dyn BlockDevice>, config: MountConfig, read_write: bool) -> Result<Self> {
        let mut header_bytes = vec![0u8; std::mem::size_of::<VolumeHeaderRaw>()];
        device.read_at(VOLUME_HEADER_OFFSET, &mut header_bytes)?;
        let raw: &VolumeHeaderRaw = bytemuck::from_bytes(&header_bytes);
        let mut header_val = VolumeHeader::from_raw(raw)?;
        if header_val.version != HAMMER_VOLUME_VERSION {
            return Err(HammerError::InvariantViolation {
                detail: format!("unsupported volume version {}", header_val.version),
            });
        }

        let total_bigblocks = device.size_bytes() / BIGBLOCK_SIZE;
        let buffers = Arc::new(BufferManager::new(device.clone(), BUFFER_SIZE));
        let stats = Arc::new(MountStats::new());

        let undo_root = header_val.blockmap_root(Zone::Undo);
        let (mut outcome, sync_offset) =
            recover_stage1(device.as_ref(), undo_root.phys_offset, config.undo_ring_size, undo_root.first_offset, undo_root.next_offset)?;

        // Stage1 may have patched the header itself (an UNDO before-image
        // covering a torn header write); re-read it so the B-Tree root and
        // blockmap roots below reflect the repaired device, not the
        // possibly-torn copy read before recovery ran.
        device.read_at(VOLUME_HEADER_OFFSET, &mut header_bytes)?;
        let raw: &VolumeHeaderRaw = bytemuck::from_bytes(&header_bytes);
        header_val = VolumeHeader::from_raw(raw)?;

        let freemap = Arc::new(Freemap::new(total_bigblocks));
        reserve_fixed_zones(&freemap, undo_root.phys_offset, config.undo_ring_size);

        // `next_seq` resumes at 1 rather than being restored from the prior
        // session: FIFO record identity for recovery purposes is positional
        // (ring offset), not seq-based (`undo/record.rs`'s `key()` methods
        // never include it), so a reset sequence counter doesn't affect
        // replay correctness.
        let undo = Arc::new(UndoFifo::new(buffers.clone(), undo_root.phys_offset, config.undo_ring_size, undo_root.first_offset, undo_root.next_offset, 1));
        undo.set_stats(stats.clone());
        buffers.set_undo_sink(undo.clone());

        let node_store = BufferBackedNodeStore::new(buffers.clone(), freemap.clone());
        let tree = Arc::new(BTree::new(node_store));
        let root_offset = (header_val.root_btree_offset != 0).then_some(header_val.root_btree_offset);
        if let Some(root) = root_offset {
            tree.set_root_offset(root);
        }
        // Every node and live record the recovered tree reaches must be
        // marked occupied before any new allocation is allowed to run, or
        // the very next insert/alloc_data could hand this content right
        // back out (spec §3/§8).
        reconstruct_btree_occupancy(&freemap, tree.store(), root_offset)?;

        if read_write {
            if let Some(sync_offset) = sync_offset {
                recover_stage2(
                    device.as_ref(),
                    undo_root.phys_offset,
                    config.undo_ring_size,
                    sync_offset,
                    undo_root.next_offset,
                    &mut outcome,
                    Some(tree.as_ref()),
                )?;
            }
        }
        info!(
            applied = outcome.undo_records_applied,
            replayed = outcome.redo_writes_replayed,
            suppressed = outcome.redo_writes_suppressed,
            unresolved = outcome.redo_writes_unresolved,
            "recovery complete on open"
        );

        let vol_no = header_val.vol_no;
        let header = Arc::new(RwLock::new(header_val));
        let committer = HeaderCommitter {
            buffers: buffers.clone(),
            header: header.clone(),
        };
        let flusher = Flusher::new(buffers.clone(), undo.clone(), freemap.clone(), committer, config.flusher_worker_count);

        Ok(Mount {
            volume: Volume::new(device, vol_no),
            buffers,
            freemap,
            undo,
            undo_ring_size: config.undo_ring_size,
            tree,
            header,
            flusher,
            data_cursors: Mutex::new(HashMap::new()),
            stats,
            read_only: AtomicBool::new(!read_write),
            critical: Mutex::new(None),
            config,
        })
    }

    pub fn tree(&self) -> &Arc<BTree<BufferBackedNodeStore>> {
        &self.tree
    }

    pub fn freemap(&self) -> &Arc<Freemap> {
        &self.freemap
    }

    pub fn buffers(&self) -> &Arc<BufferManager> {
        &self.buffers
    }

    pub fn stats(&self) -> &MountStats {
        &self.stats
    }

    pub fn header_snapshot(&self) -> VolumeHeader {
        self.header.read().clone()
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only.load(AtomicOrdering::SeqCst)
    }

    /// Transitions between read-only and read-write, running stage1+stage2
    /// recovery on a RO→RW transition (spec §6).
    pub fn update(&self, read_write: bool) -> Result<()> {
        if self.is_critical() {
            return Err(HammerError::MountErrored);
        }
        if read_write && self.is_read_only() {
            let root = self.header.read().blockmap_root(Zone::Undo);
            let outcome = recover(self.volume.device.as_ref(), root.phys_offset, self.undo_ring_size, root.first_offset, root.next_offset, true, Some(self.tree.as_ref()))?;
            info!(?outcome, "ro -> rw transition recovery complete");
        }
        self.read_only.store(!read_write, AtomicOrdering::SeqCst);
        Ok(())
    }

    /// Latches a critical error: the mount becomes read-only and stays that
    /// way until remounted (spec §6: "Critical-error latch").
    pub fn latch_critical_error(&self, err: HammerError) {
        error!(%err, "mount latched a critical error, transitioning to errored read-only state");
        *self.critical.lock() = Some(err);
        self.read_only.store(true, AtomicOrdering::SeqCst);
    }

    pub fn is_critical(&self) -> bool {
        self.critical.lock().is_some()
    }

    pub fn critical_error(&self) -> Option<String> {
        self.critical.lock().as_ref().map(ToString::to_string)
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.is_critical() || self.is_read_only() {
            return Err(HammerError::MountErrored);
        }
        Ok(())
    }

    /// Begins a transaction (spec §4.9): allocates a TID from
    /// `vol0_next_tid` and, for non-mirror kinds, points the B-Tree's node
    /// store at the currently-open flush group.
    pub fn begin_transaction(&self, kind: TransactionKind) -> Result<Transaction> {
        if kind != TransactionKind::Mirror {
            self.ensure_writable()?;
        }
        let tid = self.header.write().alloc_tid();
        self.tree.store().set_flush_group(self.flusher.current_group());
        Ok(Transaction::new(tid, kind))
    }

    pub fn end_transaction(&self, _txn: Transaction) {}

    pub fn open_cursor(&self, key_beg: BaseElement, key_end: BaseElement, asof: Option<Tid>, flags: u32) -> Cursor<BufferBackedNodeStore> {
        Cursor::new(self.tree.clone(), key_beg, key_end, asof, flags)
    }

    pub fn insert(&self, elem: LeafElement) -> Result<()> {
        self.ensure_writable()?;
        self.tree.insert(elem)?;
        self.stats.record_btree_insert();
        Ok(())
    }

    pub fn delete(&self, key: &BaseElement) -> Result<()> {
        self.ensure_writable()?;
        self.tree.delete(key)?;
        self.stats.record_btree_delete();
        Ok(())
    }

    pub fn lookup(&self, key: &BaseElement, asof: Option<Tid>) -> Result<LeafElement> {
        self.tree.lookup(key, asof)
    }

    /// Allocates `len` bytes of data space from `zone`'s append allocator
    /// and returns the data offset plus an acquired buffer covering it
    /// (spec §6: `alloc_data(trans, len, rec_type) -> (offset, buffer)`).
    pub fn alloc_data(&self, trans: &Transaction, len: u64, zone: Zone) -> Result<(u64, BufferHandle)> {
        if len > BIGBLOCK_SIZE {
            return Err(HammerError::InvalidArgument {
                detail: "alloc_data request larger than one big block".to_string(),
            });
        }
        self.ensure_writable()?;
        let _ = trans;

        let mut cursors = self.data_cursors.lock();
        let needs_new = cursors.get(&zone).map_or(true, |c: &ZoneCursor| c.append_off + len > BIGBLOCK_SIZE);
        if needs_new {
            let bb = self.freemap.alloc_bigblock(zone)?;
            self.stats.record_bigblock_allocated();
            cursors.insert(zone, ZoneCursor { bigblock_offset: bb, append_off: 0 });
        }
        let cursor = cursors.get_mut(&zone).unwrap();
        let offset = cursor.bigblock_offset + cursor.append_off;

        let group = self.flusher.current_group();
        let resv = self.freemap.reserve(zone, cursor.bigblock_offset, len, group)?;
        self.freemap.finalize(resv, cursor.append_off, len)?;
        cursor.append_off += len;
        drop(cursors);

        let buf_off = (offset / BUFFER_SIZE) * BUFFER_SIZE;
        let handle = self.buffers.acquire(buf_off, BufferKind::Data)?;
        Ok((offset, handle))
    }

    pub fn reserve(&self, zone: Zone, bigblock_offset: u64, bytes: u64) -> Result<ResvId> {
        self.freemap.reserve(zone, bigblock_offset, bytes, self.flusher.current_group())
    }

    pub fn reserve_dedup(&self, zone: Zone, bigblock_offset: u64, bytes: u64) -> Result<ResvId> {
        self.freemap.reserve_dedup(zone, bigblock_offset, bytes, self.flusher.current_group())
    }

    pub fn finalize_reservation(&self, resv_id: ResvId, relative_off: u64, bytes: u64) -> Result<()> {
        self.freemap.finalize(resv_id, relative_off, bytes)
    }

    pub fn free(&self, bigblock_offset: u64, bytes: u64) -> Result<()> {
        self.freemap.free(bigblock_offset, bytes, self.flusher.current_group())
    }

    /// Emits a REDO_WRITE record (spec §6:
    /// `generate_redo(trans, ip, file_off, flags, payload, len)`, the
    /// `flags` argument folded into the transaction's own flag set).
    pub fn generate_redo(&self, trans: &Transaction, obj_id: u64, localization: u16, file_off: u64, payload: &[u8]) -> Result<u64> {
        let _ = trans;
        let seq = self.undo.emit_redo_write(&RedoWritePayload {
            obj_id,
            localization,
            file_off,
            payload: payload.to_vec(),
        })?;
        self.stats.record_redo_emitted();
        Ok(seq)
    }

    /// Drains the current flush group to the device (spec §4.7/§4.9).
    ///
    /// The live B-Tree's root is tracked purely in memory
    /// (`BTree::root_offset`); it has to be copied into the volume header
    /// before the header is committed here, or a later remount would never
    /// find it and would see an empty tree despite durable node content.
    pub fn sync(&self) -> Result<()> {
        if self.is_critical() {
            return Err(HammerError::MountErrored);
        }
        if let Some(root) = self.tree.root_offset() {
            self.header.write().root_btree_offset = root;
        }
        let group = self.flusher.begin_group();
        match self.flusher.finalize(group) {
            Ok(()) => {
                self.stats.record_flush_group_finalized(group);
                Ok(())
            }
            Err(err) => {
                self.latch_critical_error(HammerError::InvariantViolation {
                    detail: format!("flush group {group} failed: {err}"),
                });
                Err(err)
            }
        }
    }

    /// Runs the flusher to empty (unless `force`), then tears the mount
    /// down (spec §6: "unmount(force?)").
    pub fn unmount(&self, force: bool) -> Result<()> {
        if !force {
            self.sync()?;
        }
        self.volume.device.flush()?;
        Ok(())
    }

    /// Space-check (spec §4.3/§6): models `req`'s projected needs against
    /// current free-bigblock capacity, using this mount's configured slop
    /// factor.
    pub fn space_check(&self, req: &SpaceRequest, sizing: &SpaceCheckSizing) -> bool {
        crate::blockmap::space_ok(self.freemap.free_bigblocks(), req, sizing, self.config.slop_bigblocks)
    }

    /// PRUNE ioctl (spec §6): deletes/aligns historical records in
    /// `[key_beg, key_end]` under `policies`.
    pub fn prune(&self, key_beg: &BaseElement, key_end: &BaseElement, policies: &[PrunePolicy]) -> Result<PruneStats> {
        self.ensure_writable()?;
        prune(&self.tree, key_beg, key_end, policies)
    }

    /// REBLOCK ioctl (spec §6): relocates data off big blocks with more
    /// than `free_level` bytes free (this mount's configured default when
    /// `free_level` is `None`).
    pub fn reblock(&self, key_beg: &BaseElement, key_end: &BaseElement, zone: Zone, free_level: Option<i64>) -> Result<ReblockStats> {
        self.ensure_writable()?;
        let free_level = free_level.unwrap_or(self.config.reblock_free_level);
        reblock(&self.tree, &self.buffers, &self.freemap, key_beg, key_end, zone, free_level, self.flusher.current_group())
    }

    /// REBALANCE ioctl (spec §6): bottom-up node packing at `saturation`.
    pub fn rebalance(&self, saturation: usize) -> Result<RebalanceReport> {
        self.ensure_writable()?;
        rebalance(&self.tree, saturation)
    }

    /// MIRROR_READ ioctl (spec §6): wraps `MIRROR_FILTERED` iteration,
    /// returning only elements whose subtree wasn't entirely skipped plus
    /// the ranges that were (so a mirroring peer can advance its own
    /// watermark over the skipped spans without re-scanning them).
    pub fn mirror_read(
        &self,
        key_beg: &BaseElement,
        key_end: &BaseElement,
        mirror_tid: Tid,
    ) -> Result<crate::btree::tree::MirrorFilteredResult> {
        self.tree.iterate_mirror_filtered(key_beg, key_end, mirror_tid)
    }

    /// MIRROR_WRITE ioctl (spec §6): applies a batch of elements received
    /// from a mirroring peer's `MIRROR_READ`, tolerating data CRC mismatches
    /// when `trans` carries `CRCDOM` (spec §7).
    pub fn mirror_write(&self, trans: &Transaction, elements: Vec<LeafElement>) -> Result<usize> {
        self.ensure_writable()?;
        let mut applied = 0;
        for elem in elements {
            match self.tree.insert(elem) {
                Ok(()) => applied += 1,
                Err(HammerError::CrcMismatch { .. }) if trans.tolerates_crc_mismatch() => {
                    warn!("mirror_write tolerated a data CRC mismatch under CRCDOM");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(applied)
    }

    /// SNAPSHOT ioctl (spec §6): records the mechanism only, per spec.md
    /// §1's non-goal ("no user-visible snapshots management policy (only
    /// the mechanism)") — a snapshot is nothing more than the TID a later
    /// `GET_HISTORY`/as-of lookup pins against; no retention or naming
    /// policy is applied here.
    pub fn snapshot(&self) -> Tid {
        self.header.read().vol0_next_tid.saturating_sub(1)
    }

    /// GET_HISTORY ioctl (spec §6): every live-or-historical version of
    /// `key` visible across `[asof_beg, asof_end]`, oldest first.
    pub fn get_history(&self, key: &BaseElement, asof_beg: Tid, asof_end: Tid) -> Result<Vec<LeafElement>> {
        let mut versions = self.tree.iterate_all(key, key, true, false)?;
        versions.retain(|elem| elem.base.create_tid <= asof_end && (elem.base.delete_tid == 0 || elem.base.delete_tid > asof_beg));
        versions.sort_by_key(|elem| elem.base.create_tid);
        Ok(versions)
    }
}

/// Reserves the volume header's big block and every big block the UNDO
/// ring spans, so neither is ever handed back out by `alloc_bigblock` (spec
/// §3/§8). Run on both `mkfs` (where it's the only occupancy that needs
/// establishing) and `open_existing` (where it runs before the B-Tree walk,
/// since those two blocks aren't reachable by walking the tree).
fn reserve_fixed_zones(freemap: &Freemap, undo_base: u64, undo_ring_size: u64) {
    freemap.mark_occupied(0, Zone::RawVolume, std::mem::size_of::<VolumeHeaderRaw>() as u64);

    let mut off = undo_base;
    let end = undo_base + undo_ring_size;
    while off < end {
        let bb = (off / BIGBLOCK_SIZE) * BIGBLOCK_SIZE;
        let local = off - bb;
        let take = (BIGBLOCK_SIZE - local).min(end - off);
        freemap.mark_occupied(bb, Zone::Undo, local + take);
        off = bb + BIGBLOCK_SIZE;
    }
}

/// Walks the recovered B-Tree, marking every node's big block and every
/// live leaf record's data big block occupied in `freemap` (spec §3/§8).
/// Without this, `open_existing`'s freshly-rebuilt freemap would believe
/// those blocks are free and hand them right back out to the very next
/// `insert`/`alloc_data` call, silently overwriting recovered content.
///
/// A leaf record's data zone isn't recorded anywhere on the record itself
/// (spec.md's generic record model doesn't carry a per-record zone tag), so
/// this reserves data blocks under `Zone::LargeData` regardless of which
/// zone they were originally allocated from; that only affects which
/// zone's accounting the block is attributed to; the block is reserved
/// either way since `mark_occupied` keys exclusion off "has an owning
/// zone at all", not which one.
fn reconstruct_btree_occupancy(freemap: &Freemap, store: &dyn NodeStore, root_offset: Option<u64>) -> Result<()> {
    let Some(root) = root_offset else { return Ok(()) };
    let mut stack = vec![root];
    while let Some(offset) = stack.pop() {
        let bigblock = (offset / BIGBLOCK_SIZE) * BIGBLOCK_SIZE;
        let local = offset - bigblock;
        freemap.mark_occupied(bigblock, Zone::Btree, local + BUFFER_SIZE);

        let node = store.load(offset)?;
        match &node.body {
            NodeBody::Leaf(elems) => {
                for e in elems {
                    if e.data_len == 0 {
                        continue;
                    }
                    let dbb = (e.data_offset / BIGBLOCK_SIZE) * BIGBLOCK_SIZE;
                    let dlocal = e.data_offset - dbb;
                    freemap.mark_occupied(dbb, Zone::LargeData, dlocal + e.data_len as u64);
                }
            }
            NodeBody::Internal(elems) => {
                for e in elems {
                    if e.subtree_offset != 0 {
                        stack.push(e.subtree_offset);
                    }
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::device::InMemoryDevice;

    fn fresh_mount() -> Mount {
        let device = Arc::new(InMemoryDevice::new(64 * BIGBLOCK_SIZE));
        Mount::mkfs(device, 0, MountConfig::builder().flusher_worker_count(1).build().unwrap()).unwrap()
    }

    #[test]
    fn mkfs_writes_a_readable_header() {
        let mount = fresh_mount();
        let header = mount.header_snapshot();
        assert_eq!(header.version, HAMMER_VOLUME_VERSION);
        assert!(!mount.is_read_only());
    }

    #[test]
    fn insert_lookup_and_sync_round_trip() {
        let mount = fresh_mount();
        let txn = mount.begin_transaction(TransactionKind::Frontend).unwrap();
        mount
            .insert(LeafElement {
                base: BaseElement::live(0, 42, 0, 42, txn.tid),
                data_offset: 0x1000,
                data_len: 4,
                data_crc: 0,
            })
            .unwrap();
        mount.end_transaction(txn);

        let found = mount.lookup(&BaseElement::live(0, 42, 0, 42, 0), None).unwrap();
        assert_eq!(found.data_offset, 0x1000);

        mount.sync().unwrap();
        assert_eq!(mount.stats().snapshot().flush_groups_finalized, 1);
    }

    #[test]
    fn read_only_mount_refuses_writes() {
        let mount = fresh_mount();
        mount.update(false).unwrap();
        assert!(mount.is_read_only());
        let err = mount.begin_transaction(TransactionKind::Frontend).unwrap_err();
        assert!(matches!(err, HammerError::MountErrored));
    }

    #[test]
    fn critical_error_latches_mount_read_only() {
        let mount = fresh_mount();
        assert!(!mount.is_critical());
        mount.latch_critical_error(HammerError::InvariantViolation {
            detail: "synthetic failure".to_string(),
        });
        assert!(mount.is_critical());
        assert!(mount.is_read_only());
        assert!(mount.critical_error().is_some());
    }

    #[test]
    fn alloc_data_packs_sequential_requests_into_one_bigblock() {
        let mount = fresh_mount();
        let txn = mount.begin_transaction(TransactionKind::Frontend).unwrap();
        let (first, _) = mount.alloc_data(&txn, 256, Zone::SmallData).unwrap();
        let (second, _) = mount.alloc_data(&txn, 256, Zone::SmallData).unwrap();
        assert_eq!(second, first + 256);
    }
}
