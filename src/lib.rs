//! The HAMMER core storage engine
//!
//! A versioned, transactional, crash-consistent storage engine: a two-layer
//! big-block allocator, a modified B+Tree index with historical (as-of)
//! lookup, a tracked cursor engine, a passively-associated buffer manager,
//! a flusher that drains work in numbered flush groups, and an UNDO/REDO
//! FIFO that makes multi-block commits atomic and crash recovery bounded.
//! See `SPEC_FULL.md` for the full component breakdown.

#![deny(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::type_complexity)]

#[macro_use]
extern crate tracing;

pub mod blockmap;
pub mod btree;
pub mod config;
pub mod cursor;
pub mod error;
pub mod flusher;
pub mod io;
pub mod ioctl;
pub mod layout;
pub mod maintenance;
pub mod mount;
pub mod stats;
pub mod undo;

pub use config::{ConfigError, MountConfig, MountConfigBuilder};
pub use error::{HammerError, Result};
pub use mount::Mount;
