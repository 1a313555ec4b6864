//! Volume header: fixed offset at the start of each volume (spec §6).
//! Carries the magic/version, the root B-Tree offset, per-zone blockmap
//! roots, the next-TID counter, free-bigblock accounting, and the fsid.

use bytemuck::{Pod, Zeroable};

use crate::layout::crc::{crc32, verify};
use crate::layout::zone::Zone;
use crate::layout::Tid;

pub const HAMMER_MAGIC: u64 = 0x4861_6d6d_6572_4653; // "HammerFS"
pub const HAMMER_VOLUME_VERSION: u32 = 6;

/// One root-per-zone blockmap pointer. The root volume carries one of these
/// for every allocatable [`Zone`] (spec §3: "owns ... blockmap roots").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct BlockmapRoot {
    pub phys_offset: u64,
    pub first_offset: u64,
    pub next_offset: u64,
    pub alloc_offset: u64,
}

impl BlockmapRoot {
    pub const ZERO: BlockmapRoot = BlockmapRoot {
        phys_offset: 0,
        first_offset: 0,
        next_offset: 0,
        alloc_offset: 0,
    };
}

/// The number of zones addressed through per-zone blockmap roots
/// (`Zone::is_allocatable()`).
pub const NUM_ZONES: usize = 8;

#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct VolumeHeaderRaw {
    pub magic: u64,
    pub version: u32,
    pub vol_no: i32,
    pub nvolumes: i32,
    pub _pad0: i32,
    pub fsid: [u8; 16],
    pub root_btree_offset: u64,
    pub blockmap: [BlockmapRoot; NUM_ZONES],
    pub vol0_next_tid: Tid,
    pub vol0_stat_inodes: u64,
    pub vol0_stat_freebigblocks: u64,
    pub crc: u32,
    pub _pad1: u32,
}

/// In-memory, ergonomic view of a volume header. `to_raw`/`from_raw` cross
/// to/from the `#[repr(C)]`, CRC-checked on-disk form.
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeHeader {
    pub version: u32,
    pub vol_no: i32,
    pub nvolumes: i32,
    pub fsid: uuid::Uuid,
    pub root_btree_offset: u64,
    pub blockmap: [BlockmapRoot; NUM_ZONES],
    pub vol0_next_tid: Tid,
    pub vol0_stat_inodes: u64,
    pub vol0_stat_freebigblocks: u64,
}

impl VolumeHeader {
    pub fn new(vol_no: i32, nvolumes: i32, fsid: uuid::Uuid) -> Self {
        VolumeHeader {
            version: HAMMER_VOLUME_VERSION,
            vol_no,
            nvolumes,
            fsid,
            root_btree_offset: 0,
            blockmap: [BlockmapRoot::ZERO; NUM_ZONES],
            vol0_next_tid: 1,
            vol0_stat_inodes: 0,
            vol0_stat_freebigblocks: 0,
        }
    }

    pub fn blockmap_root(&self, zone: Zone) -> BlockmapRoot {
        self.blockmap[zone as usize - 1]
    }

    pub fn set_blockmap_root(&mut self, zone: Zone, root: BlockmapRoot) {
        self.blockmap[zone as usize - 1] = root;
    }

    /// Allocates the next transaction ID, the way `vol0_next_tid` is bumped
    /// under the sync lock at `begin_transaction` (spec §4.9).
    pub fn alloc_tid(&mut self) -> Tid {
        let tid = self.vol0_next_tid;
        self.vol0_next_tid += 1;
        tid
    }

    pub fn to_raw(&self) -> VolumeHeaderRaw {
        let mut raw = VolumeHeaderRaw {
            magic: HAMMER_MAGIC,
            version: self.version,
            vol_no: self.vol_no,
            nvolumes: self.nvolumes,
            _pad0: 0,
            fsid: *self.fsid.as_bytes(),
            root_btree_offset: self.root_btree_offset,
            blockmap: self.blockmap,
            vol0_next_tid: self.vol0_next_tid,
            vol0_stat_inodes: self.vol0_stat_inodes,
            vol0_stat_freebigblocks: self.vol0_stat_freebigblocks,
            crc: 0,
            _pad1: 0,
        };
        raw.crc = crc32(bytemuck::bytes_of(&raw));
        raw
    }

    pub fn from_raw(raw: &VolumeHeaderRaw) -> crate::error::Result<Self> {
        let mut zeroed = *raw;
        let stored_crc = zeroed.crc;
        zeroed.crc = 0;
        verify(stored_crc, crc32(bytemuck::bytes_of(&zeroed)))?;

        if raw.magic != HAMMER_MAGIC {
            return Err(crate::error::HammerError::InvariantViolation {
                detail: format!("bad volume magic {:#x}", raw.magic),
            });
        }

        Ok(VolumeHeader {
            version: raw.version,
            vol_no: raw.vol_no,
            nvolumes: raw.nvolumes,
            fsid: uuid::Uuid::from_bytes(raw.fsid),
            root_btree_offset: raw.root_btree_offset,
            blockmap: raw.blockmap,
            vol0_next_tid: raw.vol0_next_tid,
            vol0_stat_inodes: raw.vol0_stat_inodes,
            vol0_stat_freebigblocks: raw.vol0_stat_freebigblocks,
        })
    }
}
