//! Ordered B+Tree index (spec §2 C5): comparator, node persistence seam,
//! and the tree operations themselves.

pub mod comparator;
pub mod node_store;
pub mod tree;

pub use node_store::{InMemoryNodeStore, NodeStore};
pub use tree::{BTree, MirrorFilteredResult};
