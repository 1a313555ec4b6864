//! In-memory reservation sentinel (spec §3/§4.3): pins a big block against
//! premature reuse, either because the frontend reserved its append region
//! ahead of backend commit, or because its contents were freed but must
//! survive enough flush groups to be unreachable from recovery
//! (`LAYER2FREE`).
//!
//! Grounded on `original_source/hammer_blockmap.c`'s `hammer_reserve`
//! structure.

use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};

use crate::layout::zone::Zone;

/// The big block's layer2 entry has been reset to free but the reservation
/// survives until `flush_group` clears the delay horizon.
pub const RESV_LAYER2FREE: u8 = 0b01;
/// Marked for delayed reuse (on the flusher's delay list) rather than
/// immediately available.
pub const RESV_ONDELAY: u8 = 0b10;

/// Pins a single big block (keyed by its zone2 base offset) against reuse.
pub struct Reservation {
    pub zone2_offset: u64,
    pub zone: Zone,
    pub flags: u8,
    /// The flush_group number recorded when this reservation was created;
    /// a `LAYER2FREE` reservation may not be finalized back to free until
    /// the flusher's done-seq passes `flush_group + 1` (spec §8
    /// "Reservation safety").
    pub flush_group: u64,
    /// Snapshot of the big block's append offset at reservation time, so a
    /// backend `finalize` knows where the frontend's reserved append
    /// region actually started.
    pub append_off_snapshot: u64,
    refs: AtomicU32,
}

impl Reservation {
    /// A reservation pinned by an active front-end caller (spec §4.3
    /// `reserve`/`reserve_dedup`): starts with one reference.
    pub fn new(zone2_offset: u64, zone: Zone, flags: u8, flush_group: u64, append_off_snapshot: u64) -> Self {
        Reservation {
            zone2_offset,
            zone,
            flags,
            flush_group,
            append_off_snapshot,
            refs: AtomicU32::new(1),
        }
    }

    /// A delayed `LAYER2FREE` sentinel (spec §4.3 `free`): nobody holds it
    /// open, so it starts at zero references and is eligible for the
    /// sweep as soon as its flush-group horizon clears.
    pub fn new_delay_sentinel(zone2_offset: u64, zone: Zone, flags: u8, flush_group: u64, append_off_snapshot: u64) -> Self {
        Reservation {
            zone2_offset,
            zone,
            flags,
            flush_group,
            append_off_snapshot,
            refs: AtomicU32::new(0),
        }
    }

    pub fn add_ref(&self) {
        self.refs.fetch_add(1, AtomicOrdering::SeqCst);
    }

    /// Releases one reference; returns `true` if this was the last one
    /// (spec §5: "Reservations have ref counts; last-ref on a fully-free
    /// block triggers buffer invalidation and layer2 reset").
    pub fn release(&self) -> bool {
        self.refs.fetch_sub(1, AtomicOrdering::SeqCst) == 1
    }

    pub fn refs(&self) -> u32 {
        self.refs.load(AtomicOrdering::SeqCst)
    }

    pub fn is_layer2_free(&self) -> bool {
        self.flags & RESV_LAYER2FREE != 0
    }

    pub fn is_on_delay(&self) -> bool {
        self.flags & RESV_ONDELAY != 0
    }

    /// Whether this reservation may be retired given the flusher's current
    /// done-seq (spec §4.3/§8): only once done-seq has passed
    /// `flush_group + 1`.
    pub fn eligible_for_release(&self, done_seq: u64) -> bool {
        done_seq > self.flush_group + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_combine() {
        let flags = RESV_LAYER2FREE | RESV_ONDELAY;
        let resv = Reservation::new(0x1000, Zone::Meta, flags, 0, 0);
        assert!(resv.is_layer2_free());
        assert!(resv.is_on_delay());
    }

    #[test]
    fn eligible_only_after_flush_group_plus_one() {
        let resv = Reservation::new(0x1000, Zone::Meta, RESV_LAYER2FREE, 10, 0);
        assert!(!resv.eligible_for_release(10));
        assert!(!resv.eligible_for_release(11));
        assert!(resv.eligible_for_release(12));
    }

    #[test]
    fn ref_counting_reports_last_release() {
        let resv = Reservation::new(0x2000, Zone::Btree, 0, 0, 0);
        resv.add_ref();
        assert_eq!(resv.refs(), 2);
        assert!(!resv.release());
        assert!(resv.release());
    }
}
