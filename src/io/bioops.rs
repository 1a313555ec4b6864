//! The kernel buffer-cache callback contract (spec §4.1/§9): "Callbacks
//! from the kernel buffer cache (bioops) -> represented as a trait object /
//! interface implemented by the buffer manager; the only surface the core
//! relies on is {start, complete, deallocate, checkwrite, fsync, sync,
//! movedeps, countdeps, checkread}."
//!
//! This crate owns both sides of that boundary (there is no real kernel
//! here), so [`BufferManager`](crate::io::buffer::BufferManager) is both the
//! caller and the implementor of [`BioOps`]. The trait still exists as a
//! named seam because it documents, and lets tests substitute, the exact
//! contract spec §4.1 describes.
//!
//! `fsync`/`sync`/`movedeps`/`countdeps` are named in the full kernel bioops
//! surface but aren't reproduced here: they exist to let a real buffer cache
//! force dependency-ordered writeback and track soft-update dependency
//! chains between *other* kernel subsystems' buffers, which has no
//! counterpart when this crate is the only thing on either side of the
//! callback. `BufferManager::flush_buffer` already performs that work
//! directly wherever a real kernel would have reached it through those
//! hooks.

use crate::io::buffer::BufferKind;

/// Outcome of a `checkwrite`/`checkread` query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    Allow,
    Refuse,
}

/// The bioops contract a real kernel buffer cache would call into.
pub trait BioOps: Send + Sync {
    /// Called when an I/O actually starts; used for running-write
    /// accounting.
    fn start(&self, buf_offset: u64);

    /// Called when an I/O completes; unblocks anything waiting on the
    /// buffer's interlock.
    fn complete(&self, buf_offset: u64, result: std::io::Result<()>);

    /// Whether a buffer may be disassociated from its kernel buffer right
    /// now. Refused while any ref or modify window is open (spec §4.1).
    fn deallocate(&self, buf_offset: u64) -> CheckOutcome;

    /// Whether a write may proceed. VOLUME/META buffers may only be written
    /// by the flusher (spec §4.1); DATA/UNDO buffers are always permitted
    /// and flip the buffer's `running` flag.
    fn checkwrite(&self, buf_offset: u64, kind: BufferKind, is_flusher: bool) -> CheckOutcome;

    /// Whether a read may proceed; reads are essentially always allowed
    /// barring a latched mount-critical error.
    fn checkread(&self, buf_offset: u64) -> CheckOutcome;
}
