//! The B-Tree comparator's full ordering key, per spec §3/§4.4:
//! `(localization, obj_id, rec_type, key, create_tid)`, with `create_tid == 0`
//! treated as positive infinity. Grounded on
//! `original_source/hammer_btree.c::hammer_btree_cmp`.

use bytemuck::{Pod, Zeroable};
use std::cmp::Ordering;

pub type Tid = u64;

/// `create_tid`/`delete_tid` sentinel meaning "current" / "never deleted".
pub const TID_MAX: Tid = u64::MAX;

/// A record key plus its live/historical bracket. Every leaf element and
/// every internal boundary element carries one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct BaseElement {
    pub obj_id: u64,
    pub key: u64,
    pub create_tid: Tid,
    pub delete_tid: Tid,
    pub rec_type: u16,
    pub localization: u16,
    pub btype: u8,
    pub _reserved: [u8; 3],
}

impl BaseElement {
    pub const ZERO: BaseElement = BaseElement {
        obj_id: 0,
        key: 0,
        create_tid: 0,
        delete_tid: 0,
        rec_type: 0,
        localization: 0,
        btype: 0,
        _reserved: [0; 3],
    };

    /// Upper sentinel used as the rightmost boundary's key in an internal
    /// node (spec §3: "subtree_offset of the rightmost boundary is 0");
    /// compares greater than any real key under key-only comparison.
    pub const POSITIVE_INFINITY: BaseElement = BaseElement {
        obj_id: u64::MAX,
        key: u64::MAX,
        create_tid: 0,
        delete_tid: 0,
        rec_type: u16::MAX,
        localization: u16::MAX,
        btype: 0,
        _reserved: [0; 3],
    };

    pub fn live(
        localization: u16,
        obj_id: u64,
        rec_type: u16,
        key: u64,
        create_tid: Tid,
    ) -> Self {
        BaseElement {
            obj_id,
            key,
            create_tid,
            delete_tid: 0,
            rec_type,
            localization,
            btype: 0,
            _reserved: [0; 3],
        }
    }

    /// Whether this element is visible to an as-of query at timestamp `asof`
    /// (spec §3: "create_tid ≤ T < delete_tid (or delete_tid=0)").
    pub fn visible_at(&self, asof: Tid) -> bool {
        self.create_tid <= asof && (self.delete_tid == 0 || asof < self.delete_tid)
    }

    pub fn is_historical(&self) -> bool {
        self.delete_tid != 0
    }

    /// The highest TID that this element's lifespan implies, used to seed
    /// `mirror_tid` aggregation (spec §4.4).
    pub fn max_tid(&self) -> Tid {
        self.create_tid.max(self.delete_tid)
    }
}

/// Orders two `create_tid`s treating `0` as +infinity, per
/// `hammer_btree_cmp`.
fn cmp_create_tid(a: Tid, b: Tid) -> Ordering {
    match (a == 0, b == 0) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.cmp(&b),
    }
}

/// The full comparator ordering used throughout the B-Tree: lexicographic on
/// `(localization, obj_id, rec_type, key, create_tid)`.
pub fn cmp(a: &BaseElement, b: &BaseElement) -> Ordering {
    a.localization
        .cmp(&b.localization)
        .then_with(|| a.obj_id.cmp(&b.obj_id))
        .then_with(|| a.rec_type.cmp(&b.rec_type))
        .then_with(|| a.key.cmp(&b.key))
        .then_with(|| cmp_create_tid(a.create_tid, b.create_tid))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_tid_zero_sorts_as_infinity() {
        let older = BaseElement::live(0, 1, 0, 1, 100);
        let newer_but_undeletable = BaseElement::live(0, 1, 0, 1, 0);
        assert_eq!(cmp(&older, &newer_but_undeletable), Ordering::Less);
    }

    #[test]
    fn ordering_follows_field_priority() {
        let a = BaseElement::live(0, 1, 0, 5, 10);
        let b = BaseElement::live(0, 2, 0, 1, 10);
        assert_eq!(cmp(&a, &b), Ordering::Less, "obj_id dominates key");
    }

    #[test]
    fn visibility_window() {
        let e = BaseElement {
            create_tid: 100,
            delete_tid: 200,
            ..BaseElement::live(0, 1, 0, 1, 100)
        };
        assert!(!e.visible_at(50));
        assert!(e.visible_at(100));
        assert!(e.visible_at(150));
        assert!(!e.visible_at(200));

        let live = BaseElement::live(0, 1, 0, 1, 100);
        assert!(live.visible_at(TID_MAX));
        assert!(!live.visible_at(50));
    }
}
