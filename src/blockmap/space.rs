//! Space-check formula (spec §4.3/§6): models future allocation needs and
//! compares them against free-bigblock capacity, so a caller can reject a
//! request before attempting it rather than discovering `ENOSPC` mid-way
//! through a multi-step operation.

use crate::layout::BIGBLOCK_SIZE;

/// Per-request sizing constants the space check uses to translate
/// projected inode/record counts into bytes (spec §4.3). Reference values
/// follow `original_source/hammer_subs.c`'s reservation heuristics.
#[derive(Debug, Clone, Copy)]
pub struct SpaceCheckSizing {
    pub inode_bytes: u64,
    pub record_bytes: u64,
}

impl Default for SpaceCheckSizing {
    fn default() -> Self {
        SpaceCheckSizing {
            inode_bytes: 2048,
            record_bytes: 256,
        }
    }
}

/// A single space-check request: the projected resource needs of an
/// in-flight operation (spec §4.3).
#[derive(Debug, Clone, Copy, Default)]
pub struct SpaceRequest {
    pub rsv_inodes: u64,
    pub rsv_recs: u64,
    pub rsv_databytes: u64,
    pub rsv_fromdelay: u64,
    pub dirtybuf_cap: u64,
}

/// Checks whether `free_bigblocks` has enough headroom for `req`, per the
/// formula in spec §4.3: `rsv_inodes * inode_bytes + rsv_recs *
/// record_bytes + rsv_databytes + rsv_fromdelay * bigblock + dirtybuf_cap +
/// slop * bigblock`.
pub fn space_ok(free_bigblocks: u64, req: &SpaceRequest, sizing: &SpaceCheckSizing, slop: u64) -> bool {
    let needed_bytes = req.rsv_inodes * sizing.inode_bytes
        + req.rsv_recs * sizing.record_bytes
        + req.rsv_databytes
        + req.rsv_fromdelay * BIGBLOCK_SIZE
        + req.dirtybuf_cap
        + slop * BIGBLOCK_SIZE;
    let needed_bigblocks = needed_bytes.div_ceil(BIGBLOCK_SIZE);
    needed_bigblocks <= free_bigblocks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_when_projected_need_exceeds_free_capacity() {
        let sizing = SpaceCheckSizing::default();
        let req = SpaceRequest {
            rsv_inodes: 10_000,
            ..Default::default()
        };
        // 10,000 inodes * 2048 bytes ~= 20MB, which is > 1 big block (8MiB).
        assert!(!space_ok(1, &req, &sizing, 0));
        assert!(space_ok(100, &req, &sizing, 0));
    }

    #[test]
    fn slop_factor_reserves_extra_headroom() {
        let sizing = SpaceCheckSizing::default();
        let req = SpaceRequest::default();
        assert!(space_ok(1, &req, &sizing, 0));
        assert!(!space_ok(0, &req, &sizing, 1), "slop of 1 bigblock needs at least 1 free bigblock");
    }
}
