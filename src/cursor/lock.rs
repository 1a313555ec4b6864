//! Non-blocking node lock table and `EDEADLK` simulation (spec §4.5/§4.6).
//!
//! The B-Tree itself (see [`crate::btree::tree`]) collapses its internal
//! locking to one coarse `RwLock`, so this table does not guard real node
//! mutation. It exists for cursors that need the *external* contract the
//! spec describes: attempting to lock a node another cursor already holds
//! fails immediately with [`HammerError::Deadlock`] rather than blocking, so
//! the caller can release everything it holds and retry the descent from the
//! root (the same non-blocking try-lock-and-retry discipline
//! `original_source/hammer_cursor.c` uses to avoid lock-order inversions
//! between concurrent cursors).

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::error::{HammerError, Result};

pub type CursorId = u64;

#[derive(Default)]
pub struct NodeLockTable {
    owners: Mutex<HashMap<u64, CursorId>>,
}

impl NodeLockTable {
    pub fn new() -> Self {
        NodeLockTable {
            owners: Mutex::new(HashMap::new()),
        }
    }

    /// Attempts to lock `node_offset` for `cursor_id`. Reentrant: a cursor
    /// that already owns the node succeeds trivially. Fails with
    /// `Deadlock{node_offset}` if another cursor holds it.
    pub fn try_lock(&self, node_offset: u64, cursor_id: CursorId) -> Result<()> {
        let mut owners = self.owners.lock();
        match owners.get(&node_offset) {
            Some(&owner) if owner == cursor_id => Ok(()),
            Some(_) => Err(HammerError::Deadlock { node_offset }),
            None => {
                owners.insert(node_offset, cursor_id);
                Ok(())
            }
        }
    }

    pub fn unlock(&self, node_offset: u64, cursor_id: CursorId) {
        let mut owners = self.owners.lock();
        if owners.get(&node_offset) == Some(&cursor_id) {
            owners.remove(&node_offset);
        }
    }

    /// Releases every node `cursor_id` holds. Used when a cursor hits
    /// `Deadlock` and must drop back to the root before retrying (spec
    /// §4.5).
    pub fn release_all(&self, cursor_id: CursorId) {
        let mut owners = self.owners.lock();
        owners.retain(|_, &mut owner| owner != cursor_id);
    }

    pub fn holds(&self, node_offset: u64, cursor_id: CursorId) -> bool {
        self.owners.lock().get(&node_offset) == Some(&cursor_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reentrant_lock_by_same_cursor_succeeds() {
        let table = NodeLockTable::new();
        table.try_lock(0x1000, 1).unwrap();
        table.try_lock(0x1000, 1).unwrap();
        assert!(table.holds(0x1000, 1));
    }

    #[test]
    fn conflicting_cursor_gets_deadlock_error() {
        let table = NodeLockTable::new();
        table.try_lock(0x1000, 1).unwrap();
        let err = table.try_lock(0x1000, 2).unwrap_err();
        assert!(matches!(err, HammerError::Deadlock { node_offset: 0x1000 }));
    }

    #[test]
    fn release_all_frees_every_node_for_that_cursor() {
        let table = NodeLockTable::new();
        table.try_lock(0x1000, 1).unwrap();
        table.try_lock(0x2000, 1).unwrap();
        table.release_all(1);
        table.try_lock(0x1000, 2).unwrap();
        table.try_lock(0x2000, 2).unwrap();
    }
}
