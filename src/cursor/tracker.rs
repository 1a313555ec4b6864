//! Cursor flag set and the meta-state machine (spec §3/§4.6): `locked`,
//! `unlocked+tracked`, `done`. Grounded on `original_source/hammer_cursor.c`'s
//! flag bits; kept as plain `u32` constants rather than a `bitflags` crate
//! dependency, matching [`crate::blockmap::reservation`]'s flag style.

/// As-of (historical) query: visibility is evaluated against `asof` rather
/// than "currently live".
pub const ASOF: u32 = 1 << 0;
/// Cursor is positioned for an insert; lookup proactively splits full
/// ancestors while descending (spec §4.4 step 2).
pub const INSERT: u32 = 1 << 1;
/// `key_end` is inclusive rather than exclusive.
pub const END_INCLUSIVE: u32 = 1 << 2;
/// The cursor's last advance landed on-disk content rather than a cached
/// in-memory hint; iteration skips the current element before resuming.
pub const ATEDISK: u32 = 1 << 3;
/// The cursor was unlocked across a structural change; the next step must
/// re-validate its position rather than assume it's still exact.
pub const RETEST: u32 = 1 << 4;
/// Iteration tolerates landing out of `[key_beg, key_end)` by silently
/// advancing, rather than treating it as a bug (spec §4.4).
pub const ITERATE_CHECK: u32 = 1 << 5;
/// This cursor belongs to a reblock pass (spec §4.8).
pub const REBLOCKING: u32 = 1 << 6;
/// Mirroring iteration: skip subtrees whose `mirror_tid` is below a floor.
pub const MIRROR_FILTERED: u32 = 1 << 7;
/// This cursor belongs to a prune pass (spec §4.8).
pub const PRUNING: u32 = 1 << 8;
/// The cursor is linked on its node's tracked list (spec §4.6).
pub const TRACKED: u32 = 1 << 9;
/// Set when a tracked cursor's element was deleted out from under it; on
/// relock, `ATEDISK` is cleared and `RETEST` is set (spec §4.6).
pub const TRACKED_RIPOUT: u32 = 1 << 10;
/// Backend (maintenance) context: enables boundary correction and other
/// edits normally forbidden to front-end cursors (spec §5).
pub const BACKEND: u32 = 1 << 11;
/// Skip populating the generic in-memory page cache for this traversal.
pub const NOSWAPCACHE: u32 = 1 << 12;
/// As-of miss armed a `create_check` retry (spec §4.4).
pub const CREATE_CHECK: u32 = 1 << 13;
/// Caller wants the raw leaf element, not just whether it exists.
pub const GET_LEAF: u32 = 1 << 14;
/// Caller wants the leaf's data payload fetched too.
pub const GET_DATA: u32 = 1 << 15;

/// The cursor's meta-state (spec §4.6): whether it currently holds node
/// locks, has released them but remains linked for relocation, or has
/// finished its traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    Locked,
    UnlockedTracked,
    Done,
}

#[derive(Debug, Clone, Copy)]
pub struct FlagSet(pub u32);

impl FlagSet {
    pub fn new(bits: u32) -> Self {
        FlagSet(bits)
    }

    pub fn contains(self, flag: u32) -> bool {
        self.0 & flag != 0
    }

    pub fn set(&mut self, flag: u32) {
        self.0 |= flag;
    }

    pub fn clear(&mut self, flag: u32) {
        self.0 &= !flag;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_clear_round_trip() {
        let mut flags = FlagSet::new(0);
        flags.set(ASOF);
        flags.set(INSERT);
        assert!(flags.contains(ASOF));
        assert!(flags.contains(INSERT));
        flags.clear(ASOF);
        assert!(!flags.contains(ASOF));
        assert!(flags.contains(INSERT));
    }

    #[test]
    fn tracked_ripout_transition_matches_spec() {
        let mut flags = FlagSet::new(ATEDISK | TRACKED);
        // spec §4.6: on relock with TRACKED_RIPOUT set, ATEDISK clears and
        // RETEST is armed.
        flags.set(TRACKED_RIPOUT);
        if flags.contains(TRACKED_RIPOUT) {
            flags.clear(ATEDISK);
            flags.set(RETEST);
        }
        assert!(!flags.contains(ATEDISK));
        assert!(flags.contains(RETEST));
    }
}
