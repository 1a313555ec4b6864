//! Top-level error kinds surfaced by the core, per spec §7.
//!
//! Individual modules define their own `Snafu` enums for local detail; this
//! type is what crosses the mount/ioctl boundary (spec §6/§7).

use snafu::Snafu;

/// POSIX-flavored error kinds the core can return.
#[derive(Debug, Snafu)]
pub enum HammerError {
    /// Iterator/lookup miss. Benign.
    #[snafu(display("not found"))]
    NotFound,

    /// A structural operation could not acquire every lock it needed without
    /// risking a cycle. The caller must release and redo the operation.
    #[snafu(display("deadlock avoided while locking {node_offset:#x}"))]
    Deadlock { node_offset: u64 },

    /// No free big block could be found for `zone` after two full scans.
    #[snafu(display("no space left for zone {zone:?}"))]
    NoSpace { zone: crate::layout::Zone },

    /// An on-disk invariant was violated. Fatal for the mount.
    #[snafu(display("invariant violation: {detail}"))]
    InvariantViolation { detail: String },

    /// Underlying device I/O failed. Fatal for the mount.
    #[snafu(display("device I/O error: {source}"))]
    Io { source: std::io::Error },

    /// CRC mismatch on a meta-data structure (always fatal) or on a data
    /// buffer (tolerated only when the transaction carries `CRCDOM`).
    #[snafu(display("crc mismatch: expected {expected:#x}, computed {computed:#x}"))]
    CrcMismatch { expected: u32, computed: u32 },

    /// CRC mismatch on a data buffer, tolerated because the transaction was
    /// marked `CRCDOM` (used during mirroring scans).
    #[snafu(display("tolerated data crc mismatch (CRCDOM)"))]
    DataDomainMismatch,

    /// A long-running scan (prune/reblock/rebalance) was cancelled via the
    /// signal-check hook. Partial progress is recorded by the caller.
    #[snafu(display("interrupted"))]
    Interrupted,

    /// The mount has latched a critical error and is now read-only.
    #[snafu(display("mount is in errored read-only state"))]
    MountErrored,

    /// A supplied argument failed validation.
    #[snafu(display("invalid argument: {detail}"))]
    InvalidArgument { detail: String },
}

impl HammerError {
    /// Maps this error to the ioctl exit code scheme described in spec §6/§7.
    pub fn errno(&self) -> i32 {
        match self {
            HammerError::NotFound => libc_like::ENOENT,
            HammerError::Deadlock { .. } => libc_like::EDEADLK,
            HammerError::NoSpace { .. } => libc_like::ENOSPC,
            HammerError::InvariantViolation { .. } => libc_like::ERANGE,
            HammerError::Io { .. } => libc_like::EIO,
            HammerError::CrcMismatch { .. } => libc_like::ERANGE,
            HammerError::DataDomainMismatch => libc_like::EDOM,
            HammerError::Interrupted => libc_like::EINTR,
            HammerError::MountErrored => libc_like::EROFS,
            HammerError::InvalidArgument { .. } => libc_like::EINVAL,
        }
    }

    /// Whether this error is benign enough that a caller may retry the
    /// operation exactly once (spec §7 propagation policy).
    pub fn is_locally_retryable(&self) -> bool {
        matches!(self, HammerError::Deadlock { .. })
    }
}

impl From<std::io::Error> for HammerError {
    fn from(source: std::io::Error) -> Self {
        HammerError::Io { source }
    }
}

/// Small stand-in for the handful of errno values spec §6/§7 names, so this
/// crate doesn't need a dependency on `libc` just for integer constants.
mod libc_like {
    pub const ENOENT: i32 = 2;
    pub const EIO: i32 = 5;
    pub const EINVAL: i32 = 22;
    pub const ENOSPC: i32 = 28;
    pub const EDEADLK: i32 = 35;
    pub const EDOM: i32 = 33;
    pub const EINTR: i32 = 4;
    pub const EROFS: i32 = 30;
}

pub type Result<T> = std::result::Result<T, HammerError>;
