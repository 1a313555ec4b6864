//! Ordered storage keyed by `(localization, obj_id, rec_type, key,
//! create_tid)` (spec §2 C5 / §4.4): lookup with as-of visibility, insert,
//! delete, split, a bottom-up rebalance packer, and mirror-TID propagation.
//! Grounded on `original_source/hammer_btree.c`; node persistence goes
//! through [`NodeStore`] rather than the real kernel buffer cache, per the
//! same decoupling idiom as [`crate::io::bioops`].
//!
//! Structural mutation in this rendition takes one coarse `RwLock` over the
//! whole tree rather than per-node lock upgrade with `EDEADLK` retry (spec
//! §4.5): the per-node child-lock discipline the original uses to bound
//! contention has no payoff without a real concurrent benchmark to justify
//! it, so this keeps the externally-observable semantics (ordering,
//! mirror-TID monotonicity, as-of visibility) while collapsing the lock
//! granularity. See `DESIGN.md`.

use std::cmp::Ordering;

use parking_lot::RwLock;

use crate::btree::comparator;
use crate::btree::node_store::NodeStore;
use crate::error::{HammerError, Result};
use crate::layout::base_element::{BaseElement, Tid, TID_MAX};
use crate::layout::btree_node::{BtreeNode, InternalElement, LeafElement, NodeBody, LEAF_ELMS};

#[derive(Debug, Default, Clone)]
pub struct MirrorFilteredResult {
    pub elements: Vec<LeafElement>,
    /// Ranges skipped because their subtree's `mirror_tid` was below the
    /// requested floor, clipped to the query range (spec §4.4).
    pub skipped: Vec<(BaseElement, BaseElement)>,
}

pub struct BTree<S: NodeStore> {
    store: S,
    root_offset: RwLock<Option<u64>>,
    lock: RwLock<()>,
}

impl<S: NodeStore> BTree<S> {
    pub fn new(store: S) -> Self {
        BTree {
            store,
            root_offset: RwLock::new(None),
            lock: RwLock::new(()),
        }
    }

    /// The backing node store, for administrative callers (e.g. the mount's
    /// transaction setup) that need to reach it directly rather than through
    /// tree operations.
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn root_offset(&self) -> Option<u64> {
        *self.root_offset.read()
    }

    /// Restores a root offset recovered from a volume header (`Mount::open_existing`).
    pub fn set_root_offset(&self, offset: u64) {
        *self.root_offset.write() = Some(offset);
    }

    fn descend_to_leaf(&self, key: &BaseElement) -> Result<u64> {
        let mut cur = self.root_offset.read().ok_or(HammerError::NotFound)?;
        loop {
            let node = self.store.load(cur)?;
            match &node.body {
                NodeBody::Leaf(_) => return Ok(cur),
                NodeBody::Internal(elems) => {
                    let mut next = None;
                    for i in 0..elems.len() {
                        let left = &elems[i].base;
                        let right = elems.get(i + 1).map(|e| &e.base);
                        if comparator::key_in_bounds(key, left, right) {
                            next = Some(elems[i].subtree_offset);
                            break;
                        }
                    }
                    let next = match next {
                        Some(n) => n,
                        None => return Err(HammerError::NotFound),
                    };
                    if next == 0 {
                        return Err(HammerError::NotFound);
                    }
                    cur = next;
                }
            }
        }
    }

    /// Historical (as-of) descent (spec §4.4: "CREATE_CHECK"). `descend_to_leaf`
    /// ignores `create_tid` when choosing a child, which is correct for a
    /// write-path descent (the element being inserted/deleted always names
    /// its own exact `create_tid`, so there's never more than one matching
    /// leaf to choose between) but wrong for an as-of read once two versions
    /// of the same key have split across sibling leaves: a split's separator
    /// is the real `BaseElement` of the first element on the right side
    /// (`split_leaf`), carrying its actual `create_tid`, so the full
    /// comparator already orders boundaries by create_tid too (spec: "This
    /// is why internal nodes participate in the ordering by create_tid").
    /// Descending by the floor of `(key, asof)` under the full order lands
    /// directly on the leaf holding the version visible at `asof`, which is
    /// the same outcome the original's arm-and-retry loop achieves by
    /// backing `key_beg.create_tid` off to `create_check - 1` and
    /// redescending — just without the extra round trip.
    fn descend_to_leaf_asof(&self, key: &BaseElement, asof: Tid) -> Result<u64> {
        let probe = BaseElement { create_tid: asof, ..*key };
        let mut cur = self.root_offset.read().ok_or(HammerError::NotFound)?;
        loop {
            let node = self.store.load(cur)?;
            match &node.body {
                NodeBody::Leaf(_) => return Ok(cur),
                NodeBody::Internal(elems) => {
                    let mut next = None;
                    for e in elems.iter() {
                        if comparator::cmp(&probe, &e.base) != Ordering::Less {
                            next = Some(e.subtree_offset);
                        } else {
                            break;
                        }
                    }
                    let next = match next {
                        Some(n) if n != 0 => n,
                        _ => return Err(HammerError::NotFound),
                    };
                    cur = next;
                }
            }
        }
    }

    /// Looks up the version of `key` visible at `asof` (spec §3/§4.4); a
    /// `None` asof means "the current live version".
    pub fn lookup(&self, key: &BaseElement, asof: Option<Tid>) -> Result<LeafElement> {
        let _guard = self.lock.read();
        let target = asof.unwrap_or(TID_MAX);
        let leaf_off = self.descend_to_leaf_asof(key, target)?;
        let node = self.store.load(leaf_off)?;
        match &node.body {
            NodeBody::Leaf(elems) => elems
                .iter()
                .find(|e| comparator::cmp_key_only(&e.base, key) == Ordering::Equal && e.base.visible_at(target))
                .copied()
                .ok_or(HammerError::NotFound),
            NodeBody::Internal(_) => Err(HammerError::InvariantViolation {
                detail: "descend landed on an internal node".to_string(),
            }),
        }
    }

    pub fn insert(&self, elem: LeafElement) -> Result<()> {
        let _guard = self.lock.write();
        if self.root_offset.read().is_none() {
            let mut root = BtreeNode::new_leaf(0);
            root.leaf_elements_mut().push(elem);
            root.mirror_tid = elem.base.max_tid();
            let off = self.store.allocate()?;
            self.store.store(off, &root)?;
            *self.root_offset.write() = Some(off);
            return Ok(());
        }
        let leaf_off = self.descend_to_leaf(&elem.base)?;
        self.insert_into_leaf(leaf_off, elem)
    }

    fn insert_into_leaf(&self, leaf_off: u64, elem: LeafElement) -> Result<()> {
        let mut leaf = self.store.load(leaf_off)?;
        {
            let elems = leaf.leaf_elements_mut();
            let pos = elems.partition_point(|e| comparator::cmp(&e.base, &elem.base) == Ordering::Less);
            if elems.get(pos).map_or(false, |e| e.base == elem.base) {
                return Err(HammerError::InvariantViolation {
                    detail: "duplicate key on insert".to_string(),
                });
            }
            elems.insert(pos, elem);
        }
        leaf.mirror_tid = leaf.mirror_tid.max(elem.base.max_tid());
        if leaf.is_full() {
            self.split_leaf(leaf_off, leaf)
        } else {
            self.store.store(leaf_off, &leaf)?;
            self.propagate_mirror_tid(leaf_off, elem.base.max_tid())
        }
    }

    /// Split index per spec §4.4: `(count+1)/2`. The rightmost-edge,
    /// first-split `3*(count+1)/4` heuristic is not reproduced (see
    /// `DESIGN.md`); every split here uses the even split point.
    fn split_leaf(&self, leaf_off: u64, mut leaf: BtreeNode) -> Result<()> {
        let elems = leaf.leaf_elements().to_vec();
        let split_idx = (elems.len() + 1) / 2;
        let left_elems = elems[..split_idx].to_vec();
        let right_elems = elems[split_idx..].to_vec();

        let left_mirror = left_elems.iter().map(|e| e.base.max_tid()).fold(0, u64::max);
        let right_mirror = right_elems.iter().map(|e| e.base.max_tid()).fold(0, u64::max);
        let separator = right_elems[0].base;

        *leaf.leaf_elements_mut() = left_elems;
        leaf.mirror_tid = left_mirror;

        let mut right_node = BtreeNode::new_leaf(leaf.parent_offset);
        *right_node.leaf_elements_mut() = right_elems;
        right_node.mirror_tid = right_mirror;

        let right_off = self.store.allocate()?;
        self.store.store(leaf_off, &leaf)?;
        self.store.store(right_off, &right_node)?;

        self.attach_split(leaf_off, right_off, separator, right_mirror)?;
        self.propagate_mirror_tid(leaf_off, left_mirror.max(right_mirror))
    }

    fn split_internal(&self, node_off: u64, mut node: BtreeNode) -> Result<()> {
        let elems = node.internal_elements().to_vec();
        let total = elems.len();
        let split_idx = total / 2;

        let left_sentinel = InternalElement {
            base: elems[split_idx].base,
            subtree_offset: 0,
            mirror_tid: 0,
            btype: 0,
            _reserved: [0; 7],
        };
        let mut left_elems = elems[..split_idx].to_vec();
        left_elems.push(left_sentinel);
        let right_elems = elems[split_idx..].to_vec();

        let left_mirror = left_elems.iter().map(|e| e.mirror_tid).fold(0, u64::max);
        let right_mirror = right_elems.iter().map(|e| e.mirror_tid).fold(0, u64::max);
        let separator = right_elems[0].base;

        *node.internal_elements_mut() = left_elems;
        node.mirror_tid = left_mirror;

        let mut right_node = BtreeNode::new_internal(node.parent_offset);
        *right_node.internal_elements_mut() = right_elems.clone();
        right_node.mirror_tid = right_mirror;

        let right_off = self.store.allocate()?;
        for e in &right_elems {
            if e.subtree_offset != 0 {
                let mut child = self.store.load(e.subtree_offset)?;
                child.parent_offset = right_off;
                self.store.store(e.subtree_offset, &child)?;
            }
        }
        self.store.store(node_off, &node)?;
        self.store.store(right_off, &right_node)?;

        self.attach_split(node_off, right_off, separator, right_mirror)
    }

    /// Wires a freshly split pair of siblings into their parent, splitting
    /// the parent in turn if it is now full, or minting a new root if
    /// `left_off` was the root (spec §4.4).
    fn attach_split(&self, left_off: u64, right_off: u64, separator: BaseElement, right_mirror: Tid) -> Result<()> {
        let left = self.store.load(left_off)?;
        let parent_off = left.parent_offset;

        if parent_off == 0 {
            let left_lower = node_lower_bound(&left);
            let mut root = BtreeNode::new_internal(0);
            root.internal_elements_mut().push(InternalElement {
                base: left_lower,
                subtree_offset: left_off,
                mirror_tid: left.mirror_tid,
                btype: 0,
                _reserved: [0; 7],
            });
            root.internal_elements_mut().push(InternalElement {
                base: separator,
                subtree_offset: right_off,
                mirror_tid: right_mirror,
                btype: 0,
                _reserved: [0; 7],
            });
            root.internal_elements_mut().push(InternalElement {
                base: BaseElement::POSITIVE_INFINITY,
                subtree_offset: 0,
                mirror_tid: 0,
                btype: 0,
                _reserved: [0; 7],
            });
            root.mirror_tid = left.mirror_tid.max(right_mirror);
            let root_off = self.store.allocate()?;
            self.store.store(root_off, &root)?;

            let mut left = left;
            left.parent_offset = root_off;
            self.store.store(left_off, &left)?;
            let mut right = self.store.load(right_off)?;
            right.parent_offset = root_off;
            self.store.store(right_off, &right)?;

            *self.root_offset.write() = Some(root_off);
            return Ok(());
        }

        let mut right = self.store.load(right_off)?;
        right.parent_offset = parent_off;
        self.store.store(right_off, &right)?;

        let mut parent = self.store.load(parent_off)?;
        {
            let elems = parent.internal_elements_mut();
            let pos = elems
                .iter()
                .position(|e| e.subtree_offset == left_off)
                .ok_or_else(|| HammerError::InvariantViolation {
                    detail: "split parent missing left child boundary".to_string(),
                })?;
            elems.insert(
                pos + 1,
                InternalElement {
                    base: separator,
                    subtree_offset: right_off,
                    mirror_tid: right_mirror,
                    btype: 0,
                    _reserved: [0; 7],
                },
            );
        }
        parent.mirror_tid = parent.mirror_tid.max(right_mirror);

        if parent.is_full() {
            self.split_internal(parent_off, parent)
        } else {
            self.store.store(parent_off, &parent)
        }
    }

    fn propagate_mirror_tid(&self, start_off: u64, new_tid: Tid) -> Result<()> {
        let mut child_off = start_off;
        loop {
            let child = self.store.load(child_off)?;
            let parent_off = child.parent_offset;
            if parent_off == 0 {
                return Ok(());
            }
            let mut parent = self.store.load(parent_off)?;
            let mut changed = false;
            for e in parent.internal_elements_mut() {
                if e.subtree_offset == child_off && e.mirror_tid < new_tid {
                    e.mirror_tid = new_tid;
                    changed = true;
                }
            }
            if parent.mirror_tid < new_tid {
                parent.mirror_tid = new_tid;
                changed = true;
            }
            if changed {
                self.store.store(parent_off, &parent)?;
            }
            child_off = parent_off;
        }
    }

    /// Removes the live or historical element whose full key (including
    /// `create_tid`) matches `key` exactly.
    pub fn delete(&self, key: &BaseElement) -> Result<()> {
        let _guard = self.lock.write();
        let leaf_off = self.descend_to_leaf(key)?;
        let mut leaf = self.store.load(leaf_off)?;
        let pos = leaf
            .leaf_elements()
            .iter()
            .position(|e| comparator::cmp(&e.base, key) == Ordering::Equal)
            .ok_or(HammerError::NotFound)?;
        leaf.leaf_elements_mut().remove(pos);

        if leaf.leaf_elements().is_empty() {
            self.detach_empty_leaf(leaf_off, leaf)
        } else {
            leaf.mirror_tid = leaf.leaf_elements().iter().map(|e| e.base.max_tid()).fold(0, u64::max);
            self.store.store(leaf_off, &leaf)
        }
    }

    fn detach_empty_leaf(&self, leaf_off: u64, leaf: BtreeNode) -> Result<()> {
        if leaf.parent_offset == 0 {
            // Root node: may become an empty leaf but never an empty
            // internal (spec §4.4).
            self.store.store(leaf_off, &leaf)
        } else {
            let parent_off = leaf.parent_offset;
            self.store.free(leaf_off)?;
            self.detach_child(parent_off, leaf_off)
        }
    }

    fn detach_child(&self, parent_off: u64, child_off: u64) -> Result<()> {
        let mut parent = self.store.load(parent_off)?;
        {
            let elems = parent.internal_elements_mut();
            let pos = elems
                .iter()
                .position(|e| e.subtree_offset == child_off)
                .ok_or_else(|| HammerError::InvariantViolation {
                    detail: "detach: child missing from parent".to_string(),
                })?;
            elems.remove(pos);
        }
        parent.mirror_tid = parent.internal_elements().iter().map(|e| e.mirror_tid).fold(0, u64::max);

        if parent.count() == 0 {
            if parent.parent_offset == 0 {
                // Root collapsed to no real children: replace with an
                // empty leaf rather than leave an empty internal root.
                let empty_leaf = BtreeNode::new_leaf(0);
                return self.store.store(parent_off, &empty_leaf);
            }
            let grandparent = parent.parent_offset;
            self.store.free(parent_off)?;
            self.detach_child(grandparent, parent_off)
        } else {
            self.store.store(parent_off, &parent)
        }
    }

    /// In-order scan of `[key_beg, key_end]`/`[key_beg, key_end)` depending
    /// on `end_inclusive`, returned reversed when `reverse` is set (spec
    /// §4.4 iteration semantics).
    pub fn iterate(
        &self,
        key_beg: &BaseElement,
        key_end: &BaseElement,
        asof: Option<Tid>,
        end_inclusive: bool,
        reverse: bool,
    ) -> Result<Vec<LeafElement>> {
        let _guard = self.lock.read();
        let mut out = Vec::new();
        if let Some(root) = *self.root_offset.read() {
            self.collect_range(root, key_beg, key_end, asof, end_inclusive, &mut out)?;
        }
        if reverse {
            out.reverse();
        }
        Ok(out)
    }

    fn collect_range(
        &self,
        node_off: u64,
        key_beg: &BaseElement,
        key_end: &BaseElement,
        asof: Option<Tid>,
        end_inclusive: bool,
        out: &mut Vec<LeafElement>,
    ) -> Result<()> {
        let node = self.store.load(node_off)?;
        match &node.body {
            NodeBody::Leaf(elems) => {
                let target = asof.unwrap_or(TID_MAX);
                for e in elems {
                    if comparator::cmp_key_only(&e.base, key_beg) == Ordering::Less {
                        continue;
                    }
                    let past_end = if end_inclusive {
                        comparator::cmp_key_only(&e.base, key_end) == Ordering::Greater
                    } else {
                        comparator::cmp_key_only(&e.base, key_end) != Ordering::Less
                    };
                    if past_end {
                        continue;
                    }
                    if e.base.visible_at(target) {
                        out.push(*e);
                    }
                }
            }
            NodeBody::Internal(elems) => {
                for i in 0..elems.len() {
                    let child = elems[i].subtree_offset;
                    if child == 0 {
                        continue;
                    }
                    let left = &elems[i].base;
                    let right = elems.get(i + 1).map(|e| &e.base);
                    if let Some(right) = right {
                        if comparator::cmp_key_only(right, key_beg) != Ordering::Greater {
                            continue;
                        }
                    }
                    if comparator::cmp_key_only(left, key_end) == Ordering::Greater {
                        continue;
                    }
                    self.collect_range(child, key_beg, key_end, asof, end_inclusive, out)?;
                }
            }
        }
        Ok(())
    }

    /// Like [`Self::iterate`] but returns every version in range regardless
    /// of visibility, live or historical (spec §4.8: prune/reblock/mirror
    /// backends need to see `delete_tid != 0` records that a visibility-
    /// filtered scan would hide).
    pub fn iterate_all(&self, key_beg: &BaseElement, key_end: &BaseElement, end_inclusive: bool, reverse: bool) -> Result<Vec<LeafElement>> {
        let _guard = self.lock.read();
        let mut out = Vec::new();
        if let Some(root) = *self.root_offset.read() {
            self.collect_range_all(root, key_beg, key_end, end_inclusive, &mut out)?;
        }
        if reverse {
            out.reverse();
        }
        Ok(out)
    }

    fn collect_range_all(&self, node_off: u64, key_beg: &BaseElement, key_end: &BaseElement, end_inclusive: bool, out: &mut Vec<LeafElement>) -> Result<()> {
        let node = self.store.load(node_off)?;
        match &node.body {
            NodeBody::Leaf(elems) => {
                for e in elems {
                    if comparator::cmp_key_only(&e.base, key_beg) == Ordering::Less {
                        continue;
                    }
                    let past_end = if end_inclusive {
                        comparator::cmp_key_only(&e.base, key_end) == Ordering::Greater
                    } else {
                        comparator::cmp_key_only(&e.base, key_end) != Ordering::Less
                    };
                    if past_end {
                        continue;
                    }
                    out.push(*e);
                }
            }
            NodeBody::Internal(elems) => {
                for i in 0..elems.len() {
                    let child = elems[i].subtree_offset;
                    if child == 0 {
                        continue;
                    }
                    let left = &elems[i].base;
                    let right = elems.get(i + 1).map(|e| &e.base);
                    if let Some(right) = right {
                        if comparator::cmp_key_only(right, key_beg) != Ordering::Greater {
                            continue;
                        }
                    }
                    if comparator::cmp_key_only(left, key_end) == Ordering::Greater {
                        continue;
                    }
                    self.collect_range_all(child, key_beg, key_end, end_inclusive, out)?;
                }
            }
        }
        Ok(())
    }

    /// Mirroring iteration (spec §4.4): skips whole subtrees whose
    /// `mirror_tid` is strictly less than `floor`, reporting the skipped
    /// span (clipped to the query range) so the caller can advance past it
    /// without descending.
    pub fn iterate_mirror_filtered(
        &self,
        key_beg: &BaseElement,
        key_end: &BaseElement,
        floor: Tid,
    ) -> Result<MirrorFilteredResult> {
        let _guard = self.lock.read();
        let mut result = MirrorFilteredResult::default();
        if let Some(root) = *self.root_offset.read() {
            self.collect_mirror_filtered(root, key_beg, key_end, floor, &mut result)?;
        }
        Ok(result)
    }

    fn collect_mirror_filtered(
        &self,
        node_off: u64,
        key_beg: &BaseElement,
        key_end: &BaseElement,
        floor: Tid,
        result: &mut MirrorFilteredResult,
    ) -> Result<()> {
        let node = self.store.load(node_off)?;
        if node.mirror_tid < floor {
            let (first, last) = node_bounds(&node);
            let skip_beg = if comparator::cmp_key_only(&first, key_beg) == Ordering::Less {
                *key_beg
            } else {
                first
            };
            let skip_end = if comparator::cmp_key_only(&last, key_end) == Ordering::Greater {
                *key_end
            } else {
                last
            };
            result.skipped.push((skip_beg, skip_end));
            return Ok(());
        }
        match &node.body {
            NodeBody::Leaf(elems) => {
                for e in elems {
                    if comparator::cmp_key_only(&e.base, key_beg) != Ordering::Less
                        && comparator::cmp_key_only(&e.base, key_end) != Ordering::Greater
                        && e.base.max_tid() >= floor
                    {
                        result.elements.push(*e);
                    }
                }
            }
            NodeBody::Internal(elems) => {
                for i in 0..elems.len() {
                    let child = elems[i].subtree_offset;
                    if child == 0 {
                        continue;
                    }
                    let left = &elems[i].base;
                    let right = elems.get(i + 1).map(|e| &e.base);
                    if let Some(right) = right {
                        if comparator::cmp_key_only(right, key_beg) != Ordering::Greater {
                            continue;
                        }
                    }
                    if comparator::cmp_key_only(left, key_end) == Ordering::Greater {
                        continue;
                    }
                    self.collect_mirror_filtered(child, key_beg, key_end, floor, result)?;
                }
            }
        }
        Ok(())
    }

    /// Bottom-up packer (spec §4.4/§4.8): for every internal node whose
    /// direct children are all leaves, repacks their combined elements
    /// across as few leaves as possible while keeping each at least
    /// `saturation` full (except possibly the last). Returns the number of
    /// nodes freed.
    pub fn rebalance(&self, saturation: usize) -> Result<usize> {
        let _guard = self.lock.write();
        let root = match *self.root_offset.read() {
            Some(r) => r,
            None => return Ok(0),
        };
        let mut freed = 0;
        self.rebalance_node(root, saturation, &mut freed)?;
        Ok(freed)
    }

    fn rebalance_node(&self, node_off: u64, saturation: usize, freed: &mut usize) -> Result<()> {
        let node = self.store.load(node_off)?;
        if let NodeBody::Internal(elems) = &node.body {
            let children: Vec<u64> = elems.iter().filter(|e| e.subtree_offset != 0).map(|e| e.subtree_offset).collect();
            for c in children {
                self.rebalance_node(c, saturation, freed)?;
            }
            self.pack_children(node_off, saturation, freed)?;
        }
        Ok(())
    }

    fn pack_children(&self, node_off: u64, saturation: usize, freed: &mut usize) -> Result<()> {
        let node = self.store.load(node_off)?;
        let child_slots: Vec<(usize, u64)> = match &node.body {
            NodeBody::Internal(v) => v
                .iter()
                .enumerate()
                .filter(|(_, e)| e.subtree_offset != 0)
                .map(|(i, e)| (i, e.subtree_offset))
                .collect(),
            NodeBody::Leaf(_) => return Ok(()),
        };
        if child_slots.len() < 2 {
            return Ok(());
        }
        let children: Vec<(usize, u64, BtreeNode)> = child_slots
            .iter()
            .map(|&(i, off)| self.store.load(off).map(|n| (i, off, n)))
            .collect::<Result<_>>()?;
        if !children.iter().all(|(_, _, n)| matches!(n.body, NodeBody::Leaf(_))) {
            return Ok(());
        }

        let mut all_elems: Vec<LeafElement> = Vec::new();
        for (_, _, n) in &children {
            if let NodeBody::Leaf(v) = &n.body {
                all_elems.extend(v.iter().copied());
            }
        }
        all_elems.sort_by(|a, b| comparator::cmp(&a.base, &b.base));

        let group_size = saturation.clamp(1, LEAF_ELMS);
        let mut groups: Vec<Vec<LeafElement>> = Vec::new();
        let mut iter = all_elems.into_iter().peekable();
        while iter.peek().is_some() {
            groups.push(iter.by_ref().take(group_size).collect());
        }
        if groups.len() > 1 {
            let last_len = groups.last().unwrap().len();
            if last_len < group_size && groups[groups.len() - 2].len() + last_len <= LEAF_ELMS {
                let tail = groups.pop().unwrap();
                groups.last_mut().unwrap().extend(tail);
            }
        }

        let offsets: Vec<u64> = children.iter().map(|(_, off, _)| *off).collect();
        let mut node = node;
        let mut new_internal = match &node.body {
            NodeBody::Internal(v) => v.clone(),
            NodeBody::Leaf(_) => unreachable!(),
        };

        for (slot_off, group) in offsets.iter().zip(groups.iter()) {
            let (elem_idx, _) = *child_slots.iter().find(|(_, off)| off == slot_off).unwrap();
            let mut leaf = BtreeNode::new_leaf(node_off);
            *leaf.leaf_elements_mut() = group.clone();
            leaf.mirror_tid = group.iter().map(|e| e.base.max_tid()).fold(0, u64::max);
            self.store.store(*slot_off, &leaf)?;
            new_internal[elem_idx].base = group[0].base;
            new_internal[elem_idx].mirror_tid = leaf.mirror_tid;
        }

        if groups.len() < offsets.len() {
            for slot_off in &offsets[groups.len()..] {
                self.store.free(*slot_off)?;
                *freed += 1;
            }
            let kept: Vec<u64> = offsets[..groups.len()].to_vec();
            new_internal.retain(|e| e.subtree_offset == 0 || kept.contains(&e.subtree_offset));
        }

        node.mirror_tid = new_internal.iter().map(|e| e.mirror_tid).fold(0, u64::max);
        match &mut node.body {
            NodeBody::Internal(v) => *v = new_internal,
            NodeBody::Leaf(_) => unreachable!(),
        }
        self.store.store(node_off, &node)
    }
}

/// Backs REDO recovery's destination resolution (spec §4.2) with a live
/// B-Tree lookup: a `REDO_WRITE`'s `(obj_id, localization, file_off)` names
/// the same triple a regular-file data record is filed under, with
/// `file_off` in the `key` slot (rec_type isn't known to the FIFO payload,
/// so every rec_type at that key is considered). The live (never-deleted)
/// match, if any, gives the device offset and capacity to replay into.
impl<S: NodeStore> crate::undo::recovery::RedoResolver for BTree<S> {
    fn resolve(&self, obj_id: u64, localization: u16, file_off: u64) -> Option<(u64, u64)> {
        let beg = BaseElement {
            obj_id,
            key: file_off,
            create_tid: 0,
            delete_tid: 0,
            rec_type: 0,
            localization,
            btype: 0,
            _reserved: [0; 3],
        };
        let end = BaseElement { rec_type: u16::MAX, ..beg };
        let matches = self.iterate_all(&beg, &end, true, false).ok()?;
        matches.into_iter().find(|e| e.base.delete_tid == 0).map(|e| (e.data_offset, e.data_len as u64))
    }
}

fn node_lower_bound(node: &BtreeNode) -> BaseElement {
    match &node.body {
        NodeBody::Leaf(v) => v.first().map(|e| e.base).unwrap_or(BaseElement::ZERO),
        NodeBody::Internal(v) => v.first().map(|e| e.base).unwrap_or(BaseElement::ZERO),
    }
}

fn node_bounds(node: &BtreeNode) -> (BaseElement, BaseElement) {
    match &node.body {
        NodeBody::Leaf(v) => {
            let first = v.first().map(|e| e.base).unwrap_or(BaseElement::ZERO);
            let last = v.last().map(|e| e.base).unwrap_or(BaseElement::ZERO);
            (first, last)
        }
        NodeBody::Internal(v) => {
            let first = v.first().map(|e| e.base).unwrap_or(BaseElement::ZERO);
            let last_idx = v.len().saturating_sub(2);
            let last = v.get(last_idx).map(|e| e.base).unwrap_or(first);
            (first, last)
        }
    }
}

/// Property-based tests covering spec §8's "Round-trip" and "Order"
/// testable properties over arbitrary key sets, the way the teacher's
/// `disk_v2::common::tests` uses `proptest` to fuzz its ledger/sequencer
/// invariants rather than only a handful of hand-picked cases.
#[cfg(test)]
mod proptests {
    use proptest::collection::hash_set;
    use proptest::prelude::*;

    use super::*;
    use crate::btree::node_store::InMemoryNodeStore;

    fn leaf_for(obj_id: u64, create_tid: Tid) -> LeafElement {
        LeafElement {
            base: BaseElement::live(0, obj_id, 0, obj_id, create_tid),
            data_offset: obj_id,
            data_len: 0,
            data_crc: 0,
        }
    }

    proptest! {
        /// Every inserted key is independently `lookup`-able afterward,
        /// regardless of insertion order or how many splits it triggers
        /// (spec §8 "Round-trip").
        #[test]
        fn arbitrary_key_sets_round_trip_through_insert_and_lookup(
            keys in hash_set(0u64..5000, 1..300)
        ) {
            let tree = BTree::new(InMemoryNodeStore::new());
            for &k in &keys {
                tree.insert(leaf_for(k, 1)).unwrap();
            }
            for &k in &keys {
                let found = tree.lookup(&BaseElement::live(0, k, 0, k, 0), None).unwrap();
                prop_assert_eq!(found.base.obj_id, k);
                prop_assert_eq!(found.data_offset, k);
            }
        }

        /// Forward iteration over any key set always comes back in strictly
        /// increasing comparator order, and reverse iteration is its exact
        /// mirror (spec §8 "Order").
        #[test]
        fn iteration_over_arbitrary_key_sets_is_strictly_ordered(
            keys in hash_set(0u64..5000, 1..300)
        ) {
            let tree = BTree::new(InMemoryNodeStore::new());
            for &k in &keys {
                tree.insert(leaf_for(k, 1)).unwrap();
            }
            let beg = BaseElement::live(0, 0, 0, 0, 0);
            let end = BaseElement::live(0, u64::MAX, 0, u64::MAX, 0);
            let forward = tree.iterate(&beg, &end, None, true, false).unwrap();
            prop_assert_eq!(forward.len(), keys.len());
            for w in forward.windows(2) {
                prop_assert_eq!(comparator::cmp_key_only(&w[0].base, &w[1].base), Ordering::Less);
            }
            let reverse = tree.iterate(&beg, &end, None, true, true).unwrap();
            let forward_rev: Vec<u64> = forward.iter().rev().map(|e| e.base.obj_id).collect();
            let reverse_ids: Vec<u64> = reverse.iter().map(|e| e.base.obj_id).collect();
            prop_assert_eq!(forward_rev, reverse_ids);
        }

        /// Every internal node's mirror_tid bound must dominate every
        /// descendant's create/delete tid (spec §8 "Mirror-TID monotonicity"),
        /// here checked via the mirror-filtered iterator: a floor one past
        /// the maximum tid present must skip everything and find nothing.
        #[test]
        fn mirror_filtered_floor_above_every_tid_skips_the_whole_tree(
            keys in hash_set(0u64..2000, 1..200)
        ) {
            let tree = BTree::new(InMemoryNodeStore::new());
            let max_tid = keys.len() as u64 + 10;
            for &k in &keys {
                tree.insert(leaf_for(k, k % max_tid + 1)).unwrap();
            }
            let beg = BaseElement::live(0, 0, 0, 0, 0);
            let end = BaseElement::live(0, u64::MAX, 0, u64::MAX, 0);
            let result = tree.iterate_mirror_filtered(&beg, &end, max_tid + 1).unwrap();
            prop_assert!(result.elements.is_empty());
        }
    }
}
