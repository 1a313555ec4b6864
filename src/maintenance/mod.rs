//! Background maintenance backends (spec §4.8): prune, reblock, rebalance.
//! Each is grounded on its own file under `original_source/` (`hammer_prune.c`,
//! `hammer_reblock.c`, `hammer_rebalance.c`) and is driven externally through
//! the ioctl surface rather than running as its own cursor-owning loop here —
//! see each submodule's doc-comment for what was and wasn't carried over.

pub mod prune;
pub mod reblock;
pub mod rebalance;

pub use prune::{prune, PrunePolicy, PruneStats};
pub use reblock::{reblock, ReblockStats};
pub use rebalance::{rebalance, RebalanceReport};
