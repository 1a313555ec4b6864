//! Layer1 and Layer2 blockmap entries (spec §3/§6), grounded on
//! `original_source/hammer_blockmap.c`.

use bytemuck::{Pod, Zeroable};

use crate::layout::crc::{crc32, verify};
use crate::layout::zone::Zone;

/// Sentinel `blocks_free` value marking a layer1 span that doesn't back any
/// real big blocks (spec §6: "UNAVAIL sentinel").
pub const LAYER1_UNAVAIL: u32 = u32::MAX;

/// Maps a span of the zone-virtual address space to a layer2 physical
/// offset, and tracks how many big blocks in that span remain unallocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct Layer1Entry {
    pub phys_offset: u64,
    pub blocks_free: u32,
    pub layer1_crc: u32,
    pub _reserved: u64,
}

impl Layer1Entry {
    pub const UNAVAIL: Layer1Entry = Layer1Entry {
        phys_offset: 0,
        blocks_free: LAYER1_UNAVAIL,
        layer1_crc: 0,
        _reserved: 0,
    };

    pub fn is_unavail(&self) -> bool {
        self.blocks_free == LAYER1_UNAVAIL
    }

    pub fn with_crc(mut self) -> Self {
        self.layer1_crc = 0;
        self.layer1_crc = crc32(bytemuck::bytes_of(&self));
        self
    }

    pub fn verify_crc(&self) -> crate::error::Result<()> {
        let mut zeroed = *self;
        let stored = zeroed.layer1_crc;
        zeroed.layer1_crc = 0;
        verify(stored, crc32(bytemuck::bytes_of(&zeroed)))
    }
}

/// Describes a single big block: owning zone, append high-water mark, and
/// remaining free bytes (which may go negative under dedup debt, hence
/// `i64`; spec §3: "bytes_free (which may go negative under dedup)").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct Layer2Entry {
    pub zone: u8,
    pub _pad: [u8; 7],
    pub append_off: u64,
    pub bytes_free: i64,
    pub entry_crc: u32,
    pub _reserved: u32,
}

impl Layer2Entry {
    pub const FREE: Layer2Entry = Layer2Entry {
        zone: 0,
        _pad: [0; 7],
        append_off: 0,
        bytes_free: 0,
        entry_crc: 0,
        _reserved: 0,
    };

    pub fn owning_zone(&self) -> Option<Zone> {
        Zone::from_tag(self.zone)
    }

    pub fn is_free(&self) -> bool {
        self.zone == 0
    }

    pub fn with_crc(mut self) -> Self {
        self.entry_crc = 0;
        self.entry_crc = crc32(bytemuck::bytes_of(&self));
        self
    }

    pub fn verify_crc(&self) -> crate::error::Result<()> {
        let mut zeroed = *self;
        let stored = zeroed.entry_crc;
        zeroed.entry_crc = 0;
        verify(stored, crc32(bytemuck::bytes_of(&zeroed)))
    }
}
