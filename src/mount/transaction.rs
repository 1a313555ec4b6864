//! Transaction handles (spec §4.9): the unit that may emit UNDO/REDO.
//! Grounded on `original_source/hammer_vfsops.c`'s
//! `hammer_start_transaction`/`hammer_done_transaction` pair.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::layout::base_element::Tid;

/// Flusher transaction: the only kind permitted to sync meta-data writes
/// mount-wide (spec §4.9).
pub const FLS: u32 = 1 << 0;
/// Tolerant of data CRC failures, used during mirroring scans (spec §4.9).
pub const CRCDOM: u32 = 1 << 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionKind {
    /// Front-end: may add records, reserve space, queue inodes; never syncs.
    Frontend,
    /// The single flusher transaction; the only one permitted to sync.
    Flusher,
    /// Read-only mirror/history scan, carries CRCDOM by convention.
    Mirror,
}

/// A TID allocated from `vol0_next_tid`, a wall-clock timestamp, a kind, and
/// a flag set (spec §4.9). Front-end transactions may add records, reserve
/// space, and queue inodes but never sync; only the flusher transaction
/// syncs meta-data.
#[derive(Debug, Clone, Copy)]
pub struct Transaction {
    pub tid: Tid,
    pub kind: TransactionKind,
    pub flags: u32,
    pub started_at_unix_secs: u64,
}

impl Transaction {
    pub(crate) fn new(tid: Tid, kind: TransactionKind) -> Self {
        let flags = match kind {
            TransactionKind::Frontend => 0,
            TransactionKind::Flusher => FLS,
            TransactionKind::Mirror => CRCDOM,
        };
        let started_at_unix_secs = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
        Transaction {
            tid,
            kind,
            flags,
            started_at_unix_secs,
        }
    }

    pub fn may_sync(&self) -> bool {
        self.flags & FLS != 0
    }

    pub fn tolerates_crc_mismatch(&self) -> bool {
        self.flags & CRCDOM != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_flusher_transactions_may_sync() {
        assert!(!Transaction::new(1, TransactionKind::Frontend).may_sync());
        assert!(Transaction::new(1, TransactionKind::Flusher).may_sync());
    }

    #[test]
    fn mirror_transactions_tolerate_crc_mismatch() {
        assert!(Transaction::new(1, TransactionKind::Mirror).tolerates_crc_mismatch());
        assert!(!Transaction::new(1, TransactionKind::Frontend).tolerates_crc_mismatch());
    }
}
