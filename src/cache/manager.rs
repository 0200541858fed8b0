//! Keyed TTL cache over a key-value store.
//!
//! Caching is a best-effort optimization: nothing in here returns an error to
//! the caller. Storage failures are logged and the operation degrades to a miss
//! or a dropped write.

use regex::Regex;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::category::TtlTable;
use super::storage::{KeyValueStore, StorageError};
use super::traits::CacheEntry;
use crate::clock::Clock;

/// Entries older than this are evicted when the store runs out of room.
pub const EVICTION_AGE: Duration = Duration::from_secs(24 * 60 * 60);

pub struct CacheManager {
  store: Box<dyn KeyValueStore>,
  ttl: TtlTable,
  clock: Arc<dyn Clock>,
}

impl CacheManager {
  pub fn new(store: Box<dyn KeyValueStore>, ttl: TtlTable, clock: Arc<dyn Clock>) -> Self {
    Self { store, ttl, clock }
  }

  /// Compose a key from a category prefix and parameters: `orders_list_1_20`.
  pub fn key<P: std::fmt::Display>(prefix: &str, parts: &[P]) -> String {
    let mut key = prefix.to_string();
    for part in parts {
      key.push('_');
      key.push_str(&part.to_string());
    }
    key
  }

  /// Read a payload if present and not expired.
  ///
  /// Expired and undecodable entries are removed as a side effect.
  pub fn get(&self, key: &str) -> Option<Value> {
    let raw = match self.store.get(key) {
      Ok(Some(raw)) => raw,
      Ok(None) => return None,
      Err(e) => {
        warn!(key, error = %e, "Cache read failed");
        return None;
      }
    };

    let entry: CacheEntry = match serde_json::from_str(&raw) {
      Ok(entry) => entry,
      Err(e) => {
        warn!(key, error = %e, "Dropping undecodable cache entry");
        self.remove(key);
        return None;
      }
    };

    if entry.is_expired(self.clock.now_ms()) {
      debug!(key, "Cache entry expired");
      self.remove(key);
      return None;
    }

    Some(entry.payload)
  }

  /// Typed read. A payload that doesn't decode as `T` counts as a miss.
  pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
    let value = self.get(key)?;
    match serde_json::from_value(value) {
      Ok(data) => Some(data),
      Err(e) => {
        debug!(key, error = %e, "Cached payload has unexpected shape");
        None
      }
    }
  }

  /// Store a payload stamped with the current time.
  ///
  /// When the store is full, entries older than [`EVICTION_AGE`] are evicted
  /// and the write is retried once; if that fails too the write is dropped.
  pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
    let payload = match serde_json::to_value(value) {
      Ok(payload) => payload,
      Err(e) => {
        warn!(key, error = %e, "Failed to serialize cache payload");
        return;
      }
    };

    let now = self.clock.now_ms();
    let entry = CacheEntry {
      payload,
      written_at: now,
      ttl_ms: self.ttl.ttl_for(key),
    };
    let raw = match serde_json::to_string(&entry) {
      Ok(raw) => raw,
      Err(e) => {
        warn!(key, error = %e, "Failed to encode cache entry");
        return;
      }
    };

    match self.store.set(key, &raw) {
      Ok(()) => {}
      Err(StorageError::QuotaExceeded { used, limit }) => {
        let evicted = self.clear_old(EVICTION_AGE);
        debug!(key, used, limit, evicted, "Cache full, evicted old entries");
        if let Err(e) = self.store.set(key, &raw) {
          warn!(key, error = %e, "Dropping cache write after eviction");
        }
      }
      Err(e) => warn!(key, error = %e, "Cache write failed"),
    }
  }

  /// Delete a single entry.
  pub fn remove(&self, key: &str) {
    if let Err(e) = self.store.remove(key) {
      warn!(key, error = %e, "Cache remove failed");
    }
  }

  /// Delete every key matching a regex pattern such as `^orders_`.
  /// Returns the number of keys removed.
  pub fn clear_by_prefix(&self, pattern: &str) -> usize {
    let regex = match Regex::new(pattern) {
      Ok(regex) => regex,
      Err(e) => {
        warn!(pattern, error = %e, "Invalid cache invalidation pattern");
        return 0;
      }
    };
    self.remove_where(|key, _| regex.is_match(key))
  }

  /// Delete every cache entry. Other namespaces (session, pending writes)
  /// live in separate stores and are untouched.
  pub fn clear_all(&self) -> usize {
    match self.store.clear() {
      Ok(count) => count,
      Err(e) => {
        warn!(error = %e, "Cache clear failed");
        0
      }
    }
  }

  /// Delete entries written more than `max_age` ago, plus any that can't be decoded.
  pub fn clear_old(&self, max_age: Duration) -> usize {
    let cutoff = self.clock.now_ms() - max_age.as_millis() as i64;
    self.remove_where(|_, raw| match raw {
      Some(raw) => serde_json::from_str::<CacheEntry>(raw)
        .map(|entry| entry.written_at < cutoff)
        .unwrap_or(true),
      None => false,
    })
  }

  /// Keys currently in the store, expired or not.
  pub fn keys(&self) -> Vec<String> {
    self.store.keys().unwrap_or_else(|e| {
      warn!(error = %e, "Cache key enumeration failed");
      Vec::new()
    })
  }

  fn remove_where<F>(&self, predicate: F) -> usize
  where
    F: Fn(&str, Option<&str>) -> bool,
  {
    let mut removed = 0;
    for key in self.keys() {
      let raw = self.store.get(&key).ok().flatten();
      if predicate(&key, raw.as_deref()) {
        match self.store.remove(&key) {
          Ok(()) => removed += 1,
          Err(e) => warn!(key, error = %e, "Cache remove failed"),
        }
      }
    }
    removed
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::storage::MemoryStorage;
  use crate::clock::ManualClock;
  use serde_json::json;

  fn manager_with(store: MemoryStorage) -> (CacheManager, ManualClock) {
    let clock = ManualClock::new(0);
    let manager = CacheManager::new(Box::new(store), TtlTable::default(), Arc::new(clock.clone()));
    (manager, clock)
  }

  #[test]
  fn test_key_composition() {
    assert_eq!(CacheManager::key("orders", &["list", "1", "20"]), "orders_list_1_20");
    assert_eq!(CacheManager::key("product", &["detail", "P7"]), "product_detail_P7");
    assert_eq!(CacheManager::key::<&str>("settings", &[]), "settings");
  }

  #[test]
  fn test_orders_ttl_end_to_end() {
    let (cache, clock) = manager_with(MemoryStorage::new());
    let value = json!({"items": [{"id": "5"}], "total": 1});

    cache.set("orders_list_1_20", &value);

    clock.set(800_000);
    assert_eq!(cache.get("orders_list_1_20"), Some(value));

    clock.set(900_001);
    assert_eq!(cache.get("orders_list_1_20"), None);
    assert!(!cache.keys().contains(&"orders_list_1_20".to_string()));
  }

  #[test]
  fn test_expiry_exactly_at_ttl() {
    let (cache, clock) = manager_with(MemoryStorage::new());
    cache.set("settings", &json!({"a": 1}));
    clock.set(crate::cache::category::DEFAULT_TTL_MS - 1);
    assert!(cache.get("settings").is_some());
    clock.set(crate::cache::category::DEFAULT_TTL_MS);
    assert!(cache.get("settings").is_none());
    assert!(cache.keys().is_empty());
  }

  #[test]
  fn test_write_then_read_returns_equal_value() {
    let (cache, _) = manager_with(MemoryStorage::new());
    let value = json!({
      "items": [{"id": "1", "total": 12.5, "tags": ["a", null]}],
      "nested": {"deep": [1, 2, 3]},
      "flag": false
    });
    cache.set("reports_dashboard", &value);
    assert_eq!(cache.get("reports_dashboard"), Some(value));
  }

  #[test]
  fn test_clear_by_prefix_removes_all_pages() {
    let (cache, _) = manager_with(MemoryStorage::new());
    cache.set("orders_list_1_20", &json!({"page": 1}));
    cache.set("orders_list_2_20", &json!({"page": 2}));
    cache.set("order_detail_9", &json!({"id": "9"}));
    cache.set("products_list_1_20", &json!({"page": 1}));

    assert_eq!(cache.clear_by_prefix("^orders_"), 2);
    assert_eq!(cache.get("orders_list_1_20"), None);
    assert_eq!(cache.get("orders_list_2_20"), None);
    assert!(cache.get("order_detail_9").is_some());
    assert!(cache.get("products_list_1_20").is_some());
  }

  #[test]
  fn test_invalid_pattern_removes_nothing() {
    let (cache, _) = manager_with(MemoryStorage::new());
    cache.set("orders_list_1_20", &json!(1));
    assert_eq!(cache.clear_by_prefix("^orders_("), 0);
    assert!(cache.get("orders_list_1_20").is_some());
  }

  #[test]
  fn test_quota_evicts_old_entries_and_retries() {
    let (cache, clock) = manager_with(MemoryStorage::with_quota(220));
    cache.set("reports_old", &json!("x".repeat(60)));

    clock.set(EVICTION_AGE.as_millis() as i64 + 1);
    cache.set("reports_new", &json!("y".repeat(60)));

    assert!(cache.keys().contains(&"reports_new".to_string()));
    assert!(!cache.keys().contains(&"reports_old".to_string()));
  }

  #[test]
  fn test_quota_drops_write_when_nothing_is_old() {
    let (cache, _) = manager_with(MemoryStorage::with_quota(150));
    cache.set("reports_a", &json!("x".repeat(60)));
    cache.set("reports_b", &json!("y".repeat(60)));

    assert!(cache.get("reports_a").is_some());
    assert!(cache.get("reports_b").is_none());
  }

  #[test]
  fn test_undecodable_entry_is_removed() {
    let store = MemoryStorage::new();
    store.set("orders_list_1_20", "not json").unwrap();
    let (cache, _) = manager_with(store);
    assert_eq!(cache.get("orders_list_1_20"), None);
    assert!(cache.keys().is_empty());
  }

  #[test]
  fn test_clear_all_counts() {
    let (cache, _) = manager_with(MemoryStorage::new());
    cache.set("orders_list_1_20", &json!(1));
    cache.set("customers_list_1_1000", &json!(2));
    assert_eq!(cache.clear_all(), 2);
    assert!(cache.keys().is_empty());
  }

  #[test]
  fn test_get_as_shape_mismatch_is_miss() {
    let (cache, _) = manager_with(MemoryStorage::new());
    cache.set("orders_list_1_20", &json!({"items": "nope"}));
    let typed: Option<Vec<String>> = cache.get_as("orders_list_1_20");
    assert!(typed.is_none());
  }
}
