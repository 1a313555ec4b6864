//! Flush-group drain (spec §2 C7 / §4.7): takes a mount's accumulated dirty
//! state and commits it to the device in the crash-safe order spec §5
//! describes — `DATA buffers -> UNDO records -> volume header -> META
//! buffers -> volume header` — with the two volume-header writes bracketing
//! the meta commit so a crash between them still leaves a self-consistent
//! picture recoverable from the first header generation. Grounded on
//! `original_source/hammer_flusher.c`.

pub mod group;
pub mod worker;

use std::sync::Arc;

use crossbeam_queue::SegQueue;
use tracing::{debug, info};

use crate::blockmap::Freemap;
use crate::error::Result;
use crate::io::buffer::{BufferKind, BufferManager};
use crate::undo::UndoFifo;

pub use group::FlushGroupTracker;
pub use worker::FlushWorkerPool;

/// Commits the volume header to the device. Kept as a trait (rather than a
/// direct `Mount` dependency) so the flusher can be exercised without
/// standing up a whole mount, the same decoupling idiom as
/// [`crate::btree::node_store::NodeStore`] and [`crate::io::bioops::BioOps`].
pub trait VolumeHeaderWriter: Send + Sync {
    fn commit_volume_header(&self) -> Result<()>;
}

/// Fraction of the UNDO/REDO ring occupied before the flusher must run a
/// dummy finalize cycle purely to advance `first_offset` (spec §4.7).
const DUMMY_CYCLE_THRESHOLD: f64 = 0.75;

pub struct Flusher<W: VolumeHeaderWriter> {
    buffers: Arc<BufferManager>,
    undo: Arc<UndoFifo>,
    freemap: Arc<Freemap>,
    header_writer: W,
    groups: FlushGroupTracker,
    workers: FlushWorkerPool,
}

impl<W: VolumeHeaderWriter> Flusher<W> {
    pub fn new(buffers: Arc<BufferManager>, undo: Arc<UndoFifo>, freemap: Arc<Freemap>, header_writer: W, worker_count: usize) -> Self {
        Flusher {
            buffers,
            undo,
            freemap,
            header_writer,
            groups: FlushGroupTracker::new(),
            workers: FlushWorkerPool::new(worker_count),
        }
    }

    pub fn current_group(&self) -> u64 {
        self.groups.current()
    }

    pub fn begin_group(&self) -> u64 {
        self.groups.begin_next()
    }

    /// Whether the UNDO/REDO ring is full enough that a dummy finalize
    /// (one with no new writes) is needed just to advance `first_offset`
    /// and reclaim ring space (spec §4.7).
    pub fn needs_dummy_cycle(&self) -> bool {
        self.undo.fraction_full() > DUMMY_CYCLE_THRESHOLD
    }

    /// Drains every dirty buffer belonging to `group` in the spec §5 order
    /// and advances the flusher's done-seq watermark.
    pub fn finalize(&self, group: u64) -> Result<()> {
        debug!(group, "flush: stage 1, draining data buffers");
        self.flush_stage(BufferKind::Data)?;

        debug!(group, "flush: stage 2, draining undo buffers");
        self.flush_stage(BufferKind::Undo)?;

        debug!(group, "flush: committing volume header (pre-meta)");
        self.header_writer.commit_volume_header()?;

        debug!(group, "flush: stage 3, draining meta buffers");
        self.flush_stage(BufferKind::Meta)?;

        debug!(group, "flush: committing volume header (post-meta)");
        self.header_writer.commit_volume_header()?;

        let (_, next_offset) = self.undo.offsets();
        self.undo.advance_first_offset(next_offset);

        self.groups.mark_done(group);
        self.freemap.advance_done_seq(self.groups.done_seq());
        info!(group, done_seq = self.groups.done_seq(), "flush group finalized");
        Ok(())
    }

    /// Drains every dirty buffer of `kind` across the worker pool.
    /// `completed` collects the offsets as each job finishes so the caller
    /// can log how many buffers actually reached the device this stage,
    /// even though jobs complete out of order across pool threads — a
    /// lock-free queue fits that single-producer-per-thread/single-consumer
    /// shape better than a `Mutex<Vec<_>>` the master would contend on.
    fn flush_stage(&self, kind: BufferKind) -> Result<()> {
        let offsets = self.buffers.dirty_offsets(kind);
        if offsets.is_empty() {
            return Ok(());
        }
        let expected = offsets.len();
        let completed = Arc::new(SegQueue::new());
        let jobs: Vec<_> = offsets
            .into_iter()
            .map(|offset| {
                let buffers = self.buffers.clone();
                let completed = completed.clone();
                move || -> Result<()> {
                    let handle = buffers.acquire(offset, kind)?;
                    buffers.write_interlock(&handle)?;
                    let result = buffers.flush_buffer(&handle);
                    buffers.done_interlock(&handle);
                    buffers.release(handle, false)?;
                    if result.is_ok() {
                        completed.push(offset);
                    }
                    result
                }
            })
            .collect();
        let outcome = self.workers.run_stage(jobs);
        debug!(?kind, expected, flushed = completed.len(), "flush stage drained");
        outcome
    }
}
