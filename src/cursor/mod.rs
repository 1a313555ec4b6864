//! Tracked cursor engine (spec §2 C6 / §4.6): stateful traversal over a
//! [`BTree`](crate::btree::tree::BTree) that survives being unlocked across
//! structural mutation. Grounded on `original_source/hammer_cursor.c`.
//!
//! The B-Tree here exposes no per-node mutation hooks to the outside (its
//! coarse lock, documented in `btree::tree`, makes every operation appear
//! atomic to external callers), so there is nothing for a cursor to be
//! pushed a relocation notification about. Instead of modelling push-based
//! relocation against node offset and element index, a cursor here tracks
//! its position by the *last key returned* and re-resolves its place in the
//! tree on every step. That gives the same externally-observable property
//! the spec cares about — a cursor never returns a stale or duplicate
//! element even if the tree was mutated while the cursor was unlocked — via
//! a simpler mechanism than offset/index relocation. See `DESIGN.md`.

pub mod lock;
pub mod tracker;

use std::cmp::Ordering;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use crate::btree::comparator;
use crate::btree::node_store::NodeStore;
use crate::btree::tree::BTree;
use crate::error::Result;
use crate::layout::base_element::{BaseElement, Tid};
use crate::layout::btree_node::LeafElement;

pub use lock::{CursorId, NodeLockTable};
pub use tracker::{CursorState, FlagSet, ASOF, ATEDISK, BACKEND, CREATE_CHECK, END_INCLUSIVE, GET_DATA, GET_LEAF, INSERT, ITERATE_CHECK, MIRROR_FILTERED, NOSWAPCACHE, PRUNING, REBLOCKING, RETEST, TRACKED, TRACKED_RIPOUT};

static NEXT_CURSOR_ID: AtomicU64 = AtomicU64::new(1);

fn alloc_cursor_id() -> CursorId {
    NEXT_CURSOR_ID.fetch_add(1, AtomicOrdering::Relaxed)
}

/// A tracked traversal over `[key_beg, key_end]`/`[key_beg, key_end)`.
pub struct Cursor<S: NodeStore> {
    id: CursorId,
    tree: Arc<BTree<S>>,
    key_beg: BaseElement,
    key_end: BaseElement,
    asof: Option<Tid>,
    flags: FlagSet,
    state: CursorState,
    last_returned: Option<BaseElement>,
}

impl<S: NodeStore> Cursor<S> {
    pub fn new(tree: Arc<BTree<S>>, key_beg: BaseElement, key_end: BaseElement, asof: Option<Tid>, flags: u32) -> Self {
        Cursor {
            id: alloc_cursor_id(),
            tree,
            key_beg,
            key_end,
            asof,
            flags: FlagSet::new(flags),
            state: CursorState::Locked,
            last_returned: None,
        }
    }

    pub fn id(&self) -> CursorId {
        self.id
    }

    pub fn state(&self) -> CursorState {
        self.state
    }

    pub fn flags(&self) -> FlagSet {
        self.flags
    }

    /// Releases the cursor's hold on the tree but keeps it linked for
    /// relocation (spec §4.6: `unlock+tracked`). No-op beyond the state
    /// transition in this rendition since nothing here actually holds a
    /// node lock between steps.
    pub fn unlock_tracked(&mut self) {
        if self.state == CursorState::Locked {
            self.state = CursorState::UnlockedTracked;
            self.flags.set(TRACKED);
        }
    }

    /// Reacquires the cursor after `unlock_tracked`. If the element the
    /// cursor last returned was deleted while unlocked, `next`/`prev` will
    /// transparently resume from the nearest surviving key rather than
    /// erroring (spec §4.6 `TRACKED_RIPOUT`).
    pub fn relock(&mut self) {
        self.state = CursorState::Locked;
    }

    fn end_inclusive(&self) -> bool {
        self.flags.contains(END_INCLUSIVE)
    }

    /// Advances to the next element after the cursor's current position,
    /// re-querying the live tree each step so concurrent structural change
    /// is always reflected (spec §4.4 `ITERATE_CHECK` tolerance).
    pub fn next(&mut self) -> Result<Option<LeafElement>> {
        if self.state == CursorState::Done {
            return Ok(None);
        }
        let candidates = self
            .tree
            .iterate(&self.key_beg, &self.key_end, self.asof, self.end_inclusive(), false)?;
        let found = match self.last_returned {
            None => candidates.into_iter().next(),
            Some(last) => candidates.into_iter().find(|e| comparator::cmp(&e.base, &last) == Ordering::Greater),
        };
        match found {
            Some(elem) => {
                self.last_returned = Some(elem.base);
                self.flags.set(ATEDISK);
                Ok(Some(elem))
            }
            None => {
                self.state = CursorState::Done;
                Ok(None)
            }
        }
    }

    /// Advances to the previous element before the cursor's current
    /// position (reverse iteration).
    pub fn prev(&mut self) -> Result<Option<LeafElement>> {
        if self.state == CursorState::Done {
            return Ok(None);
        }
        let candidates = self
            .tree
            .iterate(&self.key_beg, &self.key_end, self.asof, self.end_inclusive(), true)?;
        let found = match self.last_returned {
            None => candidates.into_iter().next(),
            Some(last) => candidates.into_iter().find(|e| comparator::cmp(&e.base, &last) == Ordering::Less),
        };
        match found {
            Some(elem) => {
                self.last_returned = Some(elem.base);
                self.flags.set(ATEDISK);
                Ok(Some(elem))
            }
            None => {
                self.state = CursorState::Done;
                Ok(None)
            }
        }
    }
}
