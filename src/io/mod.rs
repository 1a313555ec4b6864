//! Buffered I/O layer (spec §2 C2): a pluggable block device, a buffer
//! manager that passively associates buffers with it, and the bioops
//! callback contract between the two.

pub mod bioops;
pub mod buffer;
pub mod device;

pub use bioops::{BioOps, CheckOutcome};
pub use buffer::{BufferHandle, BufferKind, BufferManager, UndoSink};
pub use device::{BlockDevice, FileDevice, InMemoryDevice};
