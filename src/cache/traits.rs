//! Core traits and types for the caching system.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

/// Trait for records that can live inside a cached list page.
///
/// Implementors must provide a unique identifier and a sort key; list pages
/// are kept newest-first by descending sort key.
pub trait Cacheable: Clone + Send + Sync + Serialize + DeserializeOwned {
  /// Unique identifier for this record (server id or temporary id)
  fn cache_key(&self) -> &str;

  /// Value list pages are ordered by, descending (e.g. creation timestamp).
  fn sort_key(&self) -> &str;

  /// Leading key segment for this record's list pages (e.g. "orders")
  fn category() -> &'static str;
}

/// A stored cache value together with its write time and lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
  pub payload: Value,
  /// Milliseconds since epoch when the entry was written
  pub written_at: i64,
  /// Lifetime resolved from the key's category at write time
  pub ttl_ms: i64,
}

impl CacheEntry {
  /// An entry is valid only while `now - written_at < ttl`.
  pub fn is_expired(&self, now_ms: i64) -> bool {
    now_ms - self.written_at >= self.ttl_ms
  }
}

/// Result from a read, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
}

impl<T> CacheResult<T> {
  pub fn from_cache(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
    }
  }

  pub fn from_network(data: T, source: CacheSource) -> Self {
    Self { data, source }
  }
}

/// Indicates where read data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Local TTL cache
  Cache,
  /// Edge key-value cache in front of the API
  Edge,
  /// Primary script API
  Primary,
}

impl std::fmt::Display for CacheSource {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      CacheSource::Cache => write!(f, "cache"),
      CacheSource::Edge => write!(f, "edge"),
      CacheSource::Primary => write!(f, "api"),
    }
  }
}
