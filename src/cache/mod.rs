//! Generation-partitioned response storage.
//!
//! This module provides the storage side of the interceptor:
//! - Partitions stored responses into named generations
//! - Keys entries by normalized request (method + URL)
//! - Whole-entry writes, whole-generation deletes
//! - In-memory and SQLite backends behind one trait

mod storage;
mod traits;

pub use storage::{CacheStorage, MemoryStorage, SqliteStorage};
pub use traits::{CacheResult, CacheSource, CachedEntry};
