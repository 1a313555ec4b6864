//! 64-bit tagged offsets: top 4 bits carry a zone tag, low 60 bits carry a
//! physical/virtual offset. See spec §3/§6; constant naming follows
//! `HAMMER_ZONE_ENCODE`/`HAMMER_ZONE_DECODE` in
//! `original_source/hammer_blockmap.c`.

const ZONE_SHIFT: u32 = 60;
const ZONE_MASK: u64 = 0xF << ZONE_SHIFT;
const OFFSET_MASK: u64 = !ZONE_MASK;

/// Allocator zones. One per purpose, so the blockmap can check ownership of
/// every big block it manages (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Zone {
    RawVolume = 1,
    RawBuffer = 2,
    Freemap = 3,
    Undo = 4,
    Btree = 5,
    Meta = 6,
    LargeData = 7,
    SmallData = 8,
}

impl Zone {
    pub const ALL: [Zone; 8] = [
        Zone::RawVolume,
        Zone::RawBuffer,
        Zone::Freemap,
        Zone::Undo,
        Zone::Btree,
        Zone::Meta,
        Zone::LargeData,
        Zone::SmallData,
    ];

    pub fn from_tag(tag: u8) -> Option<Zone> {
        Some(match tag {
            1 => Zone::RawVolume,
            2 => Zone::RawBuffer,
            3 => Zone::Freemap,
            4 => Zone::Undo,
            5 => Zone::Btree,
            6 => Zone::Meta,
            7 => Zone::LargeData,
            8 => Zone::SmallData,
            _ => return None,
        })
    }

    /// Allocation zones that the per-zone append allocator (§4.3) serves.
    /// `RawVolume`/`RawBuffer`/`Freemap` are addressed directly, never
    /// through the zoned blockmap.
    pub fn is_allocatable(self) -> bool {
        !matches!(self, Zone::RawVolume | Zone::RawBuffer | Zone::Freemap)
    }
}

/// Encodes a zone tag and a 60-bit offset into a single tagged 64-bit value.
///
/// # Panics
/// Panics if `offset` doesn't fit in 60 bits; callers never construct
/// offsets that large (the largest meaningful offset is bounded by a
/// volume's logical size, which is far smaller).
pub fn encode(zone: Zone, offset: u64) -> u64 {
    assert_eq!(offset & ZONE_MASK, 0, "offset overflows 60 bits");
    ((zone as u64) << ZONE_SHIFT) | (offset & OFFSET_MASK)
}

/// Splits a tagged offset into its zone and offset parts. Returns `None`
/// if the top 4 bits don't name a recognized zone.
pub fn decode(raw: u64) -> Option<(Zone, u64)> {
    let tag = (raw >> ZONE_SHIFT) as u8;
    Zone::from_tag(tag).map(|z| (z, raw & OFFSET_MASK))
}

pub fn decode_offset(raw: u64) -> u64 {
    raw & OFFSET_MASK
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_encode_decode() {
        for &zone in Zone::ALL.iter() {
            let off = 0x0123_4567_89AB_CDEFu64 & OFFSET_MASK;
            let tagged = encode(zone, off);
            let (got_zone, got_off) = decode(tagged).expect("known zone decodes");
            assert_eq!(got_zone, zone);
            assert_eq!(got_off, off);
        }
    }

    #[test]
    fn unrecognized_zone_tag_is_none() {
        let raw = 0x0u64; // tag 0 is not in Zone::ALL
        assert!(decode(raw).is_none());
    }
}
