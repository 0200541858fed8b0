//! Generic caching layer for data persistence between runs.
//!
//! This module provides a backend-agnostic caching mechanism that:
//! - Stores JSON payloads under keys whose leading segment picks the TTL
//! - Treats expired entries as absent and removes them on read
//! - Invalidates families of keys by regex pattern after writes
//! - Never surfaces storage errors to callers

mod category;
mod layer;
mod manager;
mod storage;
mod traits;

pub use category::TtlTable;
pub use layer::CacheLayer;
pub use manager::CacheManager;
#[cfg(test)]
pub use storage::MemoryStorage;
pub use storage::{KeyValueStore, NoopStorage, SqliteStorage, StorageError, StorageResult};
pub use traits::{CacheResult, CacheSource, Cacheable};
