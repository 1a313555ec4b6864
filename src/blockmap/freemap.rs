//! Two-layer big-block allocator and per-zone append allocator (spec §2 C4
//! / §4.3). Grounded on `original_source/hammer_blockmap.c` /
//! `hammer_freemap.c`.
//!
//! Structural mutation here takes one coarse [`parking_lot::Mutex`] rather
//! than the separate `blkmap_lock`/`free_lock` pair spec §5 names, the same
//! simplification [`crate::btree::tree`] applies to B-Tree structural
//! locking: short critical sections around a single in-memory table don't
//! benefit from finer-grained locks without a concurrent benchmark to
//! justify the complexity. See `DESIGN.md`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::blockmap::layer::{BlockmapTable, LAYER1_SPAN_BLOCKS};
use crate::blockmap::reservation::{Reservation, RESV_LAYER2FREE, RESV_ONDELAY};
use crate::error::{HammerError, Result};
use crate::layout::zone::Zone;
use crate::layout::BIGBLOCK_SIZE;

/// A big-block allocation handle returned to the caller of
/// [`Freemap::alloc_bigblock`]/[`Freemap::reserve`]: the zone-virtual
/// offset of the big block and, for reservations, an id used to finalize
/// or drop it.
pub type ResvId = u64;

/// Identifies the volume member a big block belongs to, for the
/// `volume_to_remove` bias (spec §9 open question: "sufficient only for
/// one removal at a time").
pub type VolumeId = u32;

struct Inner {
    table: BlockmapTable,
    next_block_idx: u64,
    resv_next_id: u64,
    resvs: HashMap<ResvId, Reservation>,
    /// Which volume member owns each allocated big block, for the
    /// `volume_to_remove` bias.
    block_volumes: HashMap<u64, VolumeId>,
    volume_to_remove: Option<VolumeId>,
}

pub struct Freemap {
    inner: Mutex<Inner>,
    done_seq: AtomicU64,
}

impl Freemap {
    pub fn new(total_bigblocks: u64) -> Self {
        Freemap {
            inner: Mutex::new(Inner {
                table: BlockmapTable::new(total_bigblocks),
                next_block_idx: 0,
                resv_next_id: 1,
                resvs: HashMap::new(),
                block_volumes: HashMap::new(),
                volume_to_remove: None,
            }),
            done_seq: AtomicU64::new(0),
        }
    }

    /// Advances the flusher's done-seq horizon, which governs when
    /// `LAYER2FREE` reservations may finally be retired (spec §4.3/§8).
    pub fn advance_done_seq(&self, done_seq: u64) {
        self.done_seq.fetch_max(done_seq, AtomicOrdering::SeqCst);
    }

    pub fn free_bigblocks(&self) -> u64 {
        self.inner.lock().table.free_bigblocks()
    }

    /// Free-byte count of the big block owning `bigblock_offset` (spec
    /// §4.8: the reblocker's `free_level` test reads exactly this number).
    pub fn bytes_free(&self, bigblock_offset: u64) -> i64 {
        let idx = Self::block_idx_of(bigblock_offset);
        self.inner.lock().table.layer2_at(idx).bytes_free
    }

    /// Biases the allocator away from `volume`, per spec §4.3/§9. Only one
    /// volume may be marked for removal at a time.
    pub fn begin_volume_remove(&self, volume: VolumeId) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.volume_to_remove.is_some() {
            return Err(HammerError::InvalidArgument {
                detail: "a volume remove is already in progress".to_string(),
            });
        }
        inner.volume_to_remove = Some(volume);
        Ok(())
    }

    pub fn end_volume_remove(&self) {
        self.inner.lock().volume_to_remove = None;
    }

    /// Allocates a fresh big block to `zone` (spec §4.3 steps 1-3): scans
    /// from the allocator's cursor forward, skipping free layer1 spans and
    /// blocks owned by another zone or biased away by `volume_to_remove`.
    /// Two complete loops without a match is `ENOSPC`.
    pub fn alloc_bigblock(&self, zone: Zone) -> Result<u64> {
        self.alloc_bigblock_on_volume(zone, 0)
    }

    /// Same as [`Self::alloc_bigblock`], but records that the allocated
    /// block belongs to `volume` so a later `volume_to_remove` bias can
    /// skip it (spec §4.3/§9).
    pub fn alloc_bigblock_on_volume(&self, zone: Zone, volume: VolumeId) -> Result<u64> {
        let mut inner = self.inner.lock();
        let span_count = inner.table.span_count();
        if span_count == 0 {
            return Err(HammerError::NoSpace { zone });
        }
        let total_blocks = span_count * LAYER1_SPAN_BLOCKS;
        let start = inner.next_block_idx % total_blocks;
        let mut idx = start;
        let mut loops = 0u32;

        loop {
            let span = idx / LAYER1_SPAN_BLOCKS;
            let l1 = inner.table.layer1_at(span);
            if l1.is_unavail() || l1.blocks_free == 0 {
                // Skip the entire span (spec §4.3 step 1).
                idx = (span + 1) * LAYER1_SPAN_BLOCKS;
            } else {
                let l2 = inner.table.layer2_at(idx);
                let owner = inner.block_volumes.get(&idx).copied();
                let biased_away = inner.volume_to_remove.is_some() && inner.volume_to_remove == owner;
                if l2.is_free() && !biased_away {
                    inner.table.assign(idx, zone);
                    inner.block_volumes.insert(idx, volume);
                    inner.next_block_idx = idx + 1;
                    let offset = idx * BIGBLOCK_SIZE;
                    trace!(?zone, idx, offset, "big block allocated");
                    return Ok(offset);
                }
                idx += 1;
            }
            if idx >= total_blocks {
                idx = 0;
                loops += 1;
                if loops >= 2 {
                    return Err(HammerError::NoSpace { zone });
                }
            }
        }
    }

    fn block_idx_of(offset: u64) -> u64 {
        offset / BIGBLOCK_SIZE
    }

    /// Idempotently marks the big block covering `bigblock_offset` as owned
    /// by `zone` with at least `used_through` bytes occupied from its start
    /// (spec §3/§8 "Sum over owned layer2 entries of bytes_free equals
    /// volume's free accounting"). Used to reconstruct occupancy from
    /// recovered content — walking the volume header's fixed blocks and the
    /// recovered B-Tree on reopen — where calling
    /// [`BlockmapTable::assign`](crate::blockmap::layer::BlockmapTable::assign)
    /// directly would be wrong: it unconditionally resets the layer2 entry,
    /// so a second call against a block that already holds other recovered
    /// content would clobber it. Calling this more than once against the
    /// same block only ever grows its recorded usage, never shrinks it, so
    /// the order nodes/records are visited in doesn't matter.
    pub fn mark_occupied(&self, bigblock_offset: u64, zone: Zone, used_through: u64) {
        let mut inner = self.inner.lock();
        let idx = Self::block_idx_of(bigblock_offset);
        if inner.table.layer2_at(idx).is_free() {
            inner.table.assign(idx, zone);
        }
        let l2 = inner.table.layer2_at(idx);
        let new_used = used_through.min(BIGBLOCK_SIZE) as i64;
        let cur_used = BIGBLOCK_SIZE as i64 - l2.bytes_free;
        if new_used > cur_used {
            inner.table.adjust_bytes_free(idx, cur_used - new_used);
        }
        if used_through > l2.append_off {
            inner.table.set_append_off(idx, used_through.min(BIGBLOCK_SIZE));
        }
    }

    /// Front-end reservation from a zone's append allocator (spec §4.3:
    /// "reserve(zone, bytes): allocates from the zone without yet
    /// modifying layer2"). Returns the reserved offset and a `ResvId` the
    /// backend later [`Self::finalize`]s.
    pub fn reserve(&self, zone: Zone, bigblock_offset: u64, bytes: u64, flush_group: u64) -> Result<ResvId> {
        let mut inner = self.inner.lock();
        let idx = Self::block_idx_of(bigblock_offset);
        let l2 = inner.table.layer2_at(idx);
        if l2.owning_zone() != Some(zone) {
            return Err(HammerError::InvariantViolation {
                detail: "reserve against a big block not owned by this zone".to_string(),
            });
        }
        if l2.append_off + bytes > BIGBLOCK_SIZE {
            return Err(HammerError::NoSpace { zone });
        }
        let id = inner.resv_next_id;
        inner.resv_next_id += 1;
        inner.resvs.insert(id, Reservation::new(bigblock_offset, zone, 0, flush_group, l2.append_off));
        Ok(id)
    }

    /// Dedup-aware reservation (spec §4.3: "like reserve but only
    /// decrements bytes_free").
    pub fn reserve_dedup(&self, zone: Zone, bigblock_offset: u64, bytes: u64, flush_group: u64) -> Result<ResvId> {
        let mut inner = self.inner.lock();
        let idx = Self::block_idx_of(bigblock_offset);
        inner.table.adjust_bytes_free(idx, -(bytes as i64));
        let id = inner.resv_next_id;
        inner.resv_next_id += 1;
        inner.resvs.insert(id, Reservation::new(bigblock_offset, zone, 0, flush_group, 0));
        Ok(id)
    }

    /// Backend commit of a reservation under UNDO (spec §4.3: "sets
    /// layer2.append_off = max(append_off, relative_off+bytes)").
    pub fn finalize(&self, resv_id: ResvId, relative_off: u64, bytes: u64) -> Result<()> {
        let mut inner = self.inner.lock();
        let resv = inner.resvs.get(&resv_id).ok_or(HammerError::NotFound)?;
        let idx = Self::block_idx_of(resv.zone2_offset);
        let new_append = relative_off + bytes;
        let current = inner.table.layer2_at(idx).append_off;
        inner.table.set_append_off(idx, current.max(new_append));
        inner.table.adjust_bytes_free(idx, -(bytes as i64));
        inner.resvs.remove(&resv_id);
        Ok(())
    }

    /// Releases bytes back to a big block's free accounting (spec §4.3:
    /// "free(zone_off, bytes)"). If the block becomes fully free, installs
    /// a delayed `LAYER2FREE` reservation rather than resetting it
    /// immediately.
    pub fn free(&self, bigblock_offset: u64, bytes: u64, flush_group: u64) -> Result<()> {
        let mut inner = self.inner.lock();
        let idx = Self::block_idx_of(bigblock_offset);
        inner.table.adjust_bytes_free(idx, bytes as i64);
        let l2 = inner.table.layer2_at(idx);
        if l2.bytes_free >= BIGBLOCK_SIZE as i64 {
            let zone = l2.owning_zone().ok_or_else(|| HammerError::InvariantViolation {
                detail: "freed fully-empty block had no owning zone".to_string(),
            })?;
            let id = inner.resv_next_id;
            inner.resv_next_id += 1;
            inner.resvs.insert(
                id,
                Reservation::new_delay_sentinel(bigblock_offset, zone, RESV_LAYER2FREE | RESV_ONDELAY, flush_group, l2.append_off),
            );
            debug!(bigblock_offset, flush_group, "big block fully freed, delayed reservation installed");
        }
        Ok(())
    }

    /// Called periodically (by the flusher or a background sweep) to
    /// retire `LAYER2FREE` reservations whose delay horizon has passed
    /// (spec §4.3: "Only then does reserve_complete() reset zone=0 and
    /// increment blocks_free").
    pub fn reserve_complete_sweep(&self) -> Vec<u64> {
        let mut inner = self.inner.lock();
        let done_seq = self.done_seq.load(AtomicOrdering::SeqCst);
        let ready: Vec<(ResvId, u64)> = inner
            .resvs
            .iter()
            .filter(|(_, r)| r.is_layer2_free() && r.eligible_for_release(done_seq) && r.refs() == 0)
            .map(|(id, r)| (*id, r.zone2_offset))
            .collect();
        let mut released_offsets = Vec::with_capacity(ready.len());
        for (id, offset) in ready {
            inner.resvs.remove(&id);
            let idx = Self::block_idx_of(offset);
            inner.table.reset_to_free(idx);
            released_offsets.push(offset);
        }
        released_offsets
    }

    /// Drops one reference from a reservation, making it eligible for the
    /// next [`Self::reserve_complete_sweep`] once its delay horizon has
    /// also passed.
    pub fn drop_reservation_ref(&self, resv_id: ResvId) {
        let inner = self.inner.lock();
        if let Some(resv) = inner.resvs.get(&resv_id) {
            resv.release();
        }
    }

    pub fn pending_reservation_count(&self) -> usize {
        self.inner.lock().resvs.len()
    }
}
