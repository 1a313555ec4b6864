//! On-disk layout and CRC codec (spec §2 C1): volume header, layer1/layer2
//! blockmap entries, B-Tree node layout, FIFO record headers, and the CRC
//! helpers every on-disk struct uses.

pub mod base_element;
pub mod blockmap_entry;
pub mod btree_node;
pub mod crc;
pub mod fifo_record;
pub mod volume_header;
pub mod zone;

pub use base_element::{BaseElement, Tid, TID_MAX};
pub use zone::Zone;

/// A big block is a fixed power-of-two size (spec §3: "8 MiB in the
/// reference layout").
pub const BIGBLOCK_SIZE: u64 = 8 * 1024 * 1024;
/// A buffer is another fixed power-of-two (spec §3: "typically 16 KiB").
pub const BUFFER_SIZE: u64 = 16 * 1024;
/// Bytes granularity within a buffer (spec §3).
pub const ALLOC_ALIGN: u64 = 16;

/// Fixed device offset of the volume header (spec §6: "fixed offset at
/// start of each volume").
pub const VOLUME_HEADER_OFFSET: u64 = 0;

/// Accessor mirroring [`BUFFER_SIZE`] for call sites that want a function
/// rather than a const (kept so `MountConfig` can eventually override it
/// without every caller switching from a const import).
pub fn mod_buffer_size() -> u64 {
    BUFFER_SIZE
}
