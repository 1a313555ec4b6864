//! Validated mount configuration (SPEC_FULL.md §0: "a builder type per
//! tunable surface, modeled on `DiskBufferConfigBuilder`"). Grounded on
//! `disk_v2::common::{DiskBufferConfig, DiskBufferConfigBuilder}` —
//! `Option<T>` fields on the builder, `unwrap_or`-defaulted and validated in
//! `build()`, which returns a `Result` rather than panicking.

use serde::{Deserialize, Serialize};
use snafu::Snafu;

use crate::layout::BUFFER_SIZE;

/// Default size of the UNDO/REDO FIFO ring (spec §4.2). Kept well under a
/// single big block so a fresh `mkfs` on a small in-memory device still has
/// room for at least one data big block.
pub const DEFAULT_UNDO_RING_SIZE: u64 = 4 * 1024 * 1024;

/// Default number of slave threads in the flusher's worker pool (spec §4.7:
/// "a master thread and N slave threads").
pub const DEFAULT_FLUSHER_WORKER_COUNT: usize = 4;

/// Default dirty-meta cap, in bytes, that triggers a non-final finalize
/// cycle (spec §4.7: "When dirty-meta exceeds a cap (meta_limit)...").
pub const DEFAULT_META_LIMIT: u64 = 64 * 1024 * 1024;

/// Default `free_level` the reblocker uses when the caller doesn't supply
/// one explicitly (spec §4.8, §8 scenario 5 uses `bigblock/2`).
pub const DEFAULT_REBLOCK_FREE_LEVEL: i64 = (crate::layout::BIGBLOCK_SIZE / 2) as i64;

/// Default slop factor for the space-check formula (spec §4.3).
pub const DEFAULT_SLOP_BIGBLOCKS: u64 = 4;

#[derive(Debug, Snafu)]
pub enum ConfigError {
    #[snafu(display("parameter '{param_name}' was invalid: {reason}"))]
    InvalidParameter { param_name: &'static str, reason: String },
}

/// Validated mount configuration. Constructed only through
/// [`MountConfigBuilder::build`]. `Serialize`/`Deserialize` let a mount-option
/// layer (out of scope here, spec §1) persist a validated config as e.g. TOML
/// rather than re-deriving it from raw flags on every mount.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountConfig {
    pub undo_ring_size: u64,
    pub flusher_worker_count: usize,
    pub meta_limit: u64,
    pub reblock_free_level: i64,
    pub slop_bigblocks: u64,
}

impl MountConfig {
    pub fn builder() -> MountConfigBuilder {
        MountConfigBuilder::default()
    }
}

/// Builder for [`MountConfig`] (SPEC_FULL.md §0). Every tunable starts
/// unset and is defaulted in [`Self::build`], the same two-phase
/// set-then-validate shape as the teacher's `DiskBufferConfigBuilder`.
#[derive(Debug, Clone, Default)]
pub struct MountConfigBuilder {
    undo_ring_size: Option<u64>,
    flusher_worker_count: Option<usize>,
    meta_limit: Option<u64>,
    reblock_free_level: Option<i64>,
    slop_bigblocks: Option<u64>,
}

impl MountConfigBuilder {
    /// Size, in bytes, of the UNDO/REDO FIFO ring (spec §4.2). Defaults to
    /// 4 MiB.
    pub fn undo_ring_size(mut self, bytes: u64) -> Self {
        self.undo_ring_size = Some(bytes);
        self
    }

    /// Number of slave threads in the flusher's worker pool (spec §4.7).
    /// Defaults to 4.
    pub fn flusher_worker_count(mut self, count: usize) -> Self {
        self.flusher_worker_count = Some(count);
        self
    }

    /// Dirty-meta byte cap that forces a non-final finalize cycle (spec
    /// §4.7). Defaults to 64 MiB.
    pub fn meta_limit(mut self, bytes: u64) -> Self {
        self.meta_limit = Some(bytes);
        self
    }

    /// Default `free_level` passed to the reblocker when the ioctl
    /// argument block doesn't override it (spec §4.8). Defaults to half a
    /// big block.
    pub fn reblock_free_level(mut self, bytes: i64) -> Self {
        self.reblock_free_level = Some(bytes);
        self
    }

    /// Slop factor (in big blocks) added to the space-check formula (spec
    /// §4.3). Defaults to 4.
    pub fn slop_bigblocks(mut self, bigblocks: u64) -> Self {
        self.slop_bigblocks = Some(bigblocks);
        self
    }

    pub fn build(self) -> Result<MountConfig, ConfigError> {
        let undo_ring_size = self.undo_ring_size.unwrap_or(DEFAULT_UNDO_RING_SIZE);
        let flusher_worker_count = self.flusher_worker_count.unwrap_or(DEFAULT_FLUSHER_WORKER_COUNT);
        let meta_limit = self.meta_limit.unwrap_or(DEFAULT_META_LIMIT);
        let reblock_free_level = self.reblock_free_level.unwrap_or(DEFAULT_REBLOCK_FREE_LEVEL);
        let slop_bigblocks = self.slop_bigblocks.unwrap_or(DEFAULT_SLOP_BIGBLOCKS);

        if undo_ring_size < BUFFER_SIZE {
            return Err(ConfigError::InvalidParameter {
                param_name: "undo_ring_size",
                reason: format!("must be at least one buffer ({BUFFER_SIZE} bytes)"),
            });
        }
        if undo_ring_size % 512 != 0 {
            return Err(ConfigError::InvalidParameter {
                param_name: "undo_ring_size",
                reason: "must be a multiple of the FIFO's 512-byte alignment boundary".to_string(),
            });
        }
        if flusher_worker_count == 0 {
            return Err(ConfigError::InvalidParameter {
                param_name: "flusher_worker_count",
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(MountConfig {
            undo_ring_size,
            flusher_worker_count,
            meta_limit,
            reblock_free_level,
            slop_bigblocks,
        })
    }
}
