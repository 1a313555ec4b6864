//! Ring allocation, PAD insertion, and sequence assignment for the UNDO/
//! REDO FIFO (spec §2 C3 / §4.2). Grounded on `original_source/hammer_redo.c`
//! for the allocation algorithm and on the teacher's `disk_v2::ledger`
//! ring-buffer accounting for the first/next-offset bookkeeping idiom.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use crate::error::{HammerError, Result};
use crate::io::buffer::{BufferKind, BufferManager, UndoSink};
use crate::layout::fifo_record::{encode_pad, align_up, FifoHeader, FifoRecord, FifoRecordType, FIFO_ALIGN};
use crate::layout::mod_buffer_size;
use crate::stats::MountStats;
use crate::undo::record::{RedoSyncPayload, RedoTermTruncPayload, RedoTermWritePayload, RedoWritePayload, UndoPayload};

struct FifoState {
    first_offset: u64,
    next_offset: u64,
    next_seq: u64,
}

/// The UNDO/REDO ring itself: a fixed-size, zone-relative span on the root
/// volume, described by `(first_offset, next_offset)` (spec §4.2).
pub struct UndoFifo {
    buffers: std::sync::Arc<BufferManager>,
    /// Absolute device byte offset of ring position 0.
    base_offset: u64,
    ring_size: u64,
    state: Mutex<FifoState>,
    /// Mount statistics handle, wired in after construction the same way
    /// `BufferManager::set_undo_sink` is — `UndoFifo` itself doesn't need a
    /// stats handle to function, only to report through one.
    stats: RwLock<Option<Arc<MountStats>>>,
}

impl UndoFifo {
    pub fn new(buffers: std::sync::Arc<BufferManager>, base_offset: u64, ring_size: u64, first_offset: u64, next_offset: u64, next_seq: u64) -> Self {
        UndoFifo {
            buffers,
            base_offset,
            ring_size,
            state: Mutex::new(FifoState {
                first_offset,
                next_offset,
                next_seq,
            }),
            stats: RwLock::new(None),
        }
    }

    pub fn set_stats(&self, stats: Arc<MountStats>) {
        *self.stats.write() = Some(stats);
    }

    pub fn offsets(&self) -> (u64, u64) {
        let s = self.state.lock();
        (s.first_offset, s.next_offset)
    }

    pub fn next_seq(&self) -> u64 {
        self.state.lock().next_seq
    }

    /// Fraction of the ring currently occupied by undrained records; the
    /// flusher runs a "dummy" finalize cycle when this exceeds 3/4 (spec
    /// §4.7).
    pub fn fraction_full(&self) -> f64 {
        let s = self.state.lock();
        let used = if s.next_offset >= s.first_offset {
            s.next_offset - s.first_offset
        } else {
            self.ring_size - s.first_offset + s.next_offset
        };
        used as f64 / self.ring_size as f64
    }

    /// Called by the flusher once the records behind `new_first` are fully
    /// durable and no longer needed for stage1 recovery (spec §4.7:
    /// "advance cached first_offset to snapshotted next_offset").
    pub fn advance_first_offset(&self, new_first: u64) {
        self.state.lock().first_offset = new_first;
    }

    pub fn emit_undo(&self, zone_offset: u64, before: &[u8]) -> Result<u64> {
        let payload = UndoPayload {
            zone_offset,
            before: before.to_vec(),
        }
        .encode();
        self.emit(FifoRecordType::Undo, payload)
    }

    pub fn emit_redo_write(&self, p: &RedoWritePayload) -> Result<u64> {
        self.emit(FifoRecordType::RedoWrite, p.encode())
    }

    pub fn emit_redo_term_write(&self, p: &RedoTermWritePayload) -> Result<u64> {
        self.emit(FifoRecordType::RedoTermWrite, p.encode())
    }

    pub fn emit_redo_term_trunc(&self, p: &RedoTermTruncPayload) -> Result<u64> {
        self.emit(FifoRecordType::RedoTermTrunc, p.encode())
    }

    pub fn emit_redo_sync(&self, offset: u64) -> Result<u64> {
        self.emit(FifoRecordType::RedoSync, RedoSyncPayload { offset }.encode())
    }

    fn emit(&self, rec_type: FifoRecordType, payload: Vec<u8>) -> Result<u64> {
        let mut state = self.state.lock();
        let seq = state.next_seq;
        let record = FifoRecord { rec_type, seq, payload };
        let framed_len = record.framed_len();

        if framed_len > self.ring_size {
            return Err(HammerError::InvariantViolation {
                detail: "undo/redo record larger than the ring".to_string(),
            });
        }

        if state.next_offset + framed_len > self.ring_size {
            let pad_len = self.ring_size - state.next_offset;
            if pad_len >= FIFO_ALIGN {
                let pad = encode_pad(pad_len);
                self.write_ring_bytes(state.next_offset, &pad)?;
            }
            state.next_offset = 0;
        }

        if ring_would_overtake(state.first_offset, state.next_offset, framed_len, self.ring_size) {
            return Err(HammerError::NoSpace {
                zone: crate::layout::zone::Zone::Undo,
            });
        }

        let bytes = record.encode();
        self.write_ring_bytes(state.next_offset, &bytes)?;
        trace!(seq, ?rec_type, framed_len, "undo/redo record emitted");
        state.next_offset = (state.next_offset + framed_len) % self.ring_size;
        state.next_seq += 1;
        Ok(seq)
    }

    fn write_ring_bytes(&self, ring_pos: u64, bytes: &[u8]) -> Result<()> {
        let buffer_size = mod_buffer_size();
        let mut remaining = bytes;
        let mut pos = ring_pos;
        while !remaining.is_empty() {
            let abs = self.base_offset + pos;
            let buf_off = (abs / buffer_size) * buffer_size;
            let within = (abs - buf_off) as usize;
            let take = remaining.len().min(buffer_size as usize - within);

            let handle = self.buffers.acquire(buf_off, BufferKind::Undo)?;
            self.buffers.modify(&handle)?;
            self.buffers.write_region(&handle, within, &remaining[..take])?;
            self.buffers.modify_done(&handle);
            self.buffers.release(handle, false)?;

            remaining = &remaining[take..];
            pos += take as u64;
        }
        Ok(())
    }
}

impl UndoSink for UndoFifo {
    fn record_before_image(&self, zone_offset: u64, before: &[u8]) -> Result<()> {
        debug!(zone_offset, len = before.len(), "recording undo before-image");
        self.emit_undo(zone_offset, before)?;
        if let Some(stats) = self.stats.read().clone() {
            stats.record_undo_emitted();
        }
        Ok(())
    }
}

fn ring_would_overtake(first: u64, next: u64, len: u64, ring_size: u64) -> bool {
    if first == next {
        return len > ring_size;
    }
    let distance_to_first = if first > next { first - next } else { ring_size - next + first };
    len > distance_to_first
}

/// Rounds `size` up to the FIFO alignment boundary (exposed for callers
/// sizing a ring up front).
pub fn round_ring_size(size: u64) -> u64 {
    align_up(size, FIFO_ALIGN)
}

/// Checks that a header-only peek is at least self-consistent, used by
/// recovery before committing to a full decode.
pub fn looks_like_header(buf: &[u8]) -> bool {
    FifoHeader::decode(buf).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::device::InMemoryDevice;
    use std::sync::Arc;

    fn fifo(ring_size: u64) -> UndoFifo {
        let buffers = Arc::new(BufferManager::new(Arc::new(InMemoryDevice::new(1 << 20)), mod_buffer_size()));
        UndoFifo::new(buffers, 0, ring_size, 0, 0, 1)
    }

    #[test]
    fn emit_advances_next_offset_and_seq() {
        let f = fifo(64 * 1024);
        let seq = f.emit_undo(0x1000, b"before-image").unwrap();
        assert_eq!(seq, 1);
        assert_eq!(f.next_seq(), 2);
        let (first, next) = f.offsets();
        assert_eq!(first, 0);
        assert!(next > 0);
    }

    #[test]
    fn wraps_with_pad_near_ring_end() {
        let ring_size = FIFO_ALIGN * 3;
        let f = fifo(ring_size);
        // Force next_offset close to the end so the next record must wrap.
        f.state.lock().next_offset = ring_size - 16;
        f.emit_undo(0x2000, b"x").unwrap();
        let (_, next) = f.offsets();
        assert!(next < ring_size);
    }

    #[test]
    fn refuses_to_overtake_first_offset() {
        let ring_size = FIFO_ALIGN * 2;
        let f = fifo(ring_size);
        {
            let mut s = f.state.lock();
            s.first_offset = FIFO_ALIGN;
            s.next_offset = FIFO_ALIGN;
        }
        // Ring is "full" (first == next but non-empty semantically); any
        // record should be refused once there's truly no room ahead.
        f.state.lock().first_offset = FIFO_ALIGN / 2;
        let big_payload = vec![0u8; (FIFO_ALIGN * 2) as usize];
        assert!(f.emit_undo(0x3000, &big_payload).is_err());
    }
}
