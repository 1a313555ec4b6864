//! UNDO/REDO FIFO (spec §2 C3 / §4.2): ring allocation, typed payloads, and
//! the two-stage crash recovery walk.

pub mod fifo;
pub mod record;
pub mod recovery;

pub use fifo::UndoFifo;
pub use recovery::{recover, RecoveryOutcome};
