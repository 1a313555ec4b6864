//! Layer1/Layer2 table bookkeeping (spec §3/§4.3): the two-level indirect
//! table that maps zone-virtual big-block offsets to physical big-block
//! offsets and tracks ownership/free counters.
//!
//! A real mount persists these through the `FREEMAP` zone via the buffer
//! manager; this module holds the decoded, CRC-verified in-memory view that
//! [`crate::blockmap::freemap::Freemap`] mutates, the same decoupling idiom
//! [`crate::btree::node_store::NodeStore`] uses for B-Tree nodes.

use std::collections::HashMap;

use crate::layout::blockmap_entry::{Layer1Entry, Layer2Entry, LAYER1_UNAVAIL};
use crate::layout::zone::Zone;
use crate::layout::BIGBLOCK_SIZE;

/// Number of big blocks tracked by one layer1 span. Real HAMMER sizes this
/// so one layer1 entry covers exactly the big blocks addressable by one
/// layer2 big block's worth of `Layer2Entry` records; this crate's
/// in-memory table keeps the same two-level shape without needing the
/// layer2 table to itself live in a big block.
pub const LAYER1_SPAN_BLOCKS: u64 = 512;

/// The two-level blockmap table for a single zone-virtual address space.
/// Layer1 entries are dense (indexed by span number); layer2 entries are
/// sparse (only populated once a span is actually touched).
pub struct BlockmapTable {
    layer1: Vec<Layer1Entry>,
    layer2: HashMap<u64, Layer2Entry>,
}

impl BlockmapTable {
    /// Builds a table sized to address `total_bigblocks` big blocks, all
    /// initially free.
    pub fn new(total_bigblocks: u64) -> Self {
        let spans = total_bigblocks.div_ceil(LAYER1_SPAN_BLOCKS);
        let mut layer1 = Vec::with_capacity(spans as usize);
        for span in 0..spans {
            let blocks_in_span = LAYER1_SPAN_BLOCKS.min(total_bigblocks - span * LAYER1_SPAN_BLOCKS);
            layer1.push(
                Layer1Entry {
                    phys_offset: span * LAYER1_SPAN_BLOCKS * BIGBLOCK_SIZE,
                    blocks_free: blocks_in_span as u32,
                    layer1_crc: 0,
                    _reserved: 0,
                }
                .with_crc(),
            );
        }
        BlockmapTable {
            layer1,
            layer2: HashMap::new(),
        }
    }

    pub fn span_count(&self) -> u64 {
        self.layer1.len() as u64
    }

    pub fn layer1_at(&self, span: u64) -> Layer1Entry {
        self.layer1[span as usize]
    }

    pub fn layer2_at(&self, block_idx: u64) -> Layer2Entry {
        self.layer2.get(&block_idx).copied().unwrap_or(Layer2Entry::FREE)
    }

    /// Marks `block_idx` owned by `zone`, decrementing the covering
    /// layer1's `blocks_free` counter (spec §4.3 step 2).
    pub fn assign(&mut self, block_idx: u64, zone: Zone) {
        let span = block_idx / LAYER1_SPAN_BLOCKS;
        self.layer1[span as usize].blocks_free = self.layer1[span as usize].blocks_free.saturating_sub(1);
        self.layer1[span as usize] = self.layer1[span as usize].with_crc();
        self.layer2.insert(
            block_idx,
            Layer2Entry {
                zone: zone as u8,
                _pad: [0; 7],
                append_off: 0,
                bytes_free: BIGBLOCK_SIZE as i64,
                entry_crc: 0,
                _reserved: 0,
            }
            .with_crc(),
        );
    }

    /// Resets `block_idx` to free: `zone=0`, `append_off=0` (spec §3
    /// invariant: "freeing sets zone=0 and append_off=0"), and restores
    /// the covering layer1's `blocks_free` counter.
    pub fn reset_to_free(&mut self, block_idx: u64) {
        let span = block_idx / LAYER1_SPAN_BLOCKS;
        self.layer1[span as usize].blocks_free += 1;
        self.layer1[span as usize] = self.layer1[span as usize].with_crc();
        self.layer2.remove(&block_idx);
    }

    /// Adjusts `bytes_free` for an owned block by `delta` (positive on
    /// free, negative on allocate/reserve_dedup), capped so it never
    /// exceeds one big block and never underflows past `-2 *
    /// BIGBLOCK_SIZE` (spec §4.3: "2x bigblock underflow guard").
    pub fn adjust_bytes_free(&mut self, block_idx: u64, delta: i64) {
        let entry = self.layer2.entry(block_idx).or_insert(Layer2Entry::FREE);
        let updated = (entry.bytes_free + delta).clamp(-2 * BIGBLOCK_SIZE as i64, BIGBLOCK_SIZE as i64);
        *entry = Layer2Entry {
            bytes_free: updated,
            ..*entry
        }
        .with_crc();
    }

    pub fn set_append_off(&mut self, block_idx: u64, append_off: u64) {
        let entry = self.layer2.entry(block_idx).or_insert(Layer2Entry::FREE);
        *entry = Layer2Entry { append_off, ..*entry }.with_crc();
    }

    pub fn mark_span_unavail(&mut self, span: u64) {
        self.layer1[span as usize] = Layer1Entry::UNAVAIL;
    }

    /// Sum of `bigblock_size - bytes_free` over every owned layer2 entry
    /// (spec §8 "Free accounting").
    pub fn used_bytes_total(&self) -> i64 {
        self.layer2
            .values()
            .filter(|e| !e.is_free())
            .map(|e| BIGBLOCK_SIZE as i64 - e.bytes_free)
            .sum()
    }

    pub fn free_bigblocks(&self) -> u64 {
        self.layer1.iter().filter(|e| !e.is_unavail()).map(|e| e.blocks_free as u64).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_table_is_all_free() {
        let table = BlockmapTable::new(1024);
        assert_eq!(table.free_bigblocks(), 1024);
        assert!(table.layer2_at(0).is_free());
    }

    #[test]
    fn assign_then_reset_restores_blocks_free() {
        let mut table = BlockmapTable::new(16);
        let before = table.free_bigblocks();
        table.assign(3, Zone::Meta);
        assert_eq!(table.free_bigblocks(), before - 1);
        assert_eq!(table.layer2_at(3).owning_zone(), Some(Zone::Meta));

        table.reset_to_free(3);
        assert_eq!(table.free_bigblocks(), before);
        assert!(table.layer2_at(3).is_free());
    }

    #[test]
    fn bytes_free_clamped_to_dedup_floor() {
        let mut table = BlockmapTable::new(4);
        table.assign(0, Zone::LargeData);
        table.adjust_bytes_free(0, -(BIGBLOCK_SIZE as i64) * 10);
        assert_eq!(table.layer2_at(0).bytes_free, -2 * BIGBLOCK_SIZE as i64);
    }
}
