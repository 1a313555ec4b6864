//! Re-exports the base-element comparator under `crate::btree::comparator`
//! (spec §4.4), plus the key-only comparisons the tree's descent logic needs
//! that ignore `create_tid` entirely (boundary containment checks care only
//! about whether a key falls within `[left_bound, right_bound)`, not which
//! historical version it names).

use std::cmp::Ordering;

use crate::layout::base_element::BaseElement;

pub use crate::layout::base_element::cmp;

/// Orders two elements ignoring `create_tid`, used when testing whether a
/// search key falls inside a node's `[left_bound, right_bound)` span —
/// boundaries bracket a *key*, not a specific historical version of it.
pub fn cmp_key_only(a: &BaseElement, b: &BaseElement) -> Ordering {
    a.localization
        .cmp(&b.localization)
        .then_with(|| a.obj_id.cmp(&b.obj_id))
        .then_with(|| a.rec_type.cmp(&b.rec_type))
        .then_with(|| a.key.cmp(&b.key))
}

/// Whether `key` falls within `[left, right)` by key-only comparison. A
/// `right` of `None` means "unbounded" (rightmost child in the tree).
pub fn key_in_bounds(key: &BaseElement, left: &BaseElement, right: Option<&BaseElement>) -> bool {
    cmp_key_only(key, left) != Ordering::Less
        && right.map_or(true, |r| cmp_key_only(key, r) == Ordering::Less)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_only_ignores_create_tid() {
        let a = BaseElement::live(0, 1, 0, 5, 10);
        let b = BaseElement::live(0, 1, 0, 5, 200);
        assert_eq!(cmp_key_only(&a, &b), Ordering::Equal);
    }

    #[test]
    fn bounds_check_is_left_inclusive_right_exclusive() {
        let left = BaseElement::live(0, 1, 0, 0, 0);
        let right = BaseElement::live(0, 1, 0, 10, 0);
        let inside = BaseElement::live(0, 1, 0, 5, 0);
        assert!(key_in_bounds(&left, &left, Some(&right)));
        assert!(key_in_bounds(&inside, &left, Some(&right)));
        assert!(!key_in_bounds(&right, &left, Some(&right)));
    }
}
