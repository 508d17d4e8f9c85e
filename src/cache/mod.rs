//! Partitioned response cache.
//!
//! This module provides:
//! - Named, versioned partitions of immutable response snapshots
//! - SQLite and in-memory storage backends
//! - The cache-first and network-first strategies used by the router

mod layer;
mod storage;
mod traits;

pub use layer::CacheLayer;
pub use storage::{MemoryPartitionStore, PartitionStore, SqlitePartitionStore};
pub use traits::{CacheResult, CacheSource, PartitionNames, PartitionRole, ResponseSnapshot};
