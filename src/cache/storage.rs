//! Key-value storage trait and its SQLite, in-memory and no-op implementations.

use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Errors raised by a key-value store.
///
/// These never leave the cache or queue boundary; callers log and carry on.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
  #[error("storage quota exceeded ({used} of {limit} bytes)")]
  QuotaExceeded { used: usize, limit: usize },
  #[error("sqlite: {0}")]
  Sqlite(#[from] rusqlite::Error),
  #[error("lock poisoned")]
  LockPoisoned,
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Synchronous string key-value store.
pub trait KeyValueStore: Send + Sync {
  /// Read a value.
  fn get(&self, key: &str) -> StorageResult<Option<String>>;

  /// Write a value, replacing any previous one.
  fn set(&self, key: &str, value: &str) -> StorageResult<()>;

  /// Delete a value. Missing keys are not an error.
  fn remove(&self, key: &str) -> StorageResult<()>;

  /// Enumerate every key in the store.
  fn keys(&self) -> StorageResult<Vec<String>>;

  /// Delete everything in the store, returning how many keys were removed.
  fn clear(&self) -> StorageResult<usize>;
}

/// Shared stores, e.g. one in-memory store handed to several owners.
impl<S: KeyValueStore + ?Sized> KeyValueStore for Arc<S> {
  fn get(&self, key: &str) -> StorageResult<Option<String>> {
    (**self).get(key)
  }

  fn set(&self, key: &str, value: &str) -> StorageResult<()> {
    (**self).set(key, value)
  }

  fn remove(&self, key: &str) -> StorageResult<()> {
    (**self).remove(key)
  }

  fn keys(&self) -> StorageResult<Vec<String>> {
    (**self).keys()
  }

  fn clear(&self) -> StorageResult<usize> {
    (**self).clear()
  }
}

/// Storage implementation that doesn't keep anything.
/// Used when caching is disabled - all operations are no-ops.
pub struct NoopStorage;

impl KeyValueStore for NoopStorage {
  fn get(&self, _key: &str) -> StorageResult<Option<String>> {
    Ok(None) // Always miss
  }

  fn set(&self, _key: &str, _value: &str) -> StorageResult<()> {
    Ok(()) // Discard
  }

  fn remove(&self, _key: &str) -> StorageResult<()> {
    Ok(())
  }

  fn keys(&self) -> StorageResult<Vec<String>> {
    Ok(Vec::new())
  }

  fn clear(&self) -> StorageResult<usize> {
    Ok(0)
  }
}

/// In-memory store with an optional byte quota (key + value lengths).
#[cfg(test)]
#[derive(Default)]
pub struct MemoryStorage {
  entries: Mutex<BTreeMap<String, String>>,
  max_bytes: Option<usize>,
}

#[cfg(test)]
impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_quota(max_bytes: usize) -> Self {
    Self {
      entries: Mutex::new(BTreeMap::new()),
      max_bytes: Some(max_bytes),
    }
  }
}

#[cfg(test)]
impl KeyValueStore for MemoryStorage {
  fn get(&self, key: &str) -> StorageResult<Option<String>> {
    let entries = self.entries.lock().map_err(|_| StorageError::LockPoisoned)?;
    Ok(entries.get(key).cloned())
  }

  fn set(&self, key: &str, value: &str) -> StorageResult<()> {
    let mut entries = self.entries.lock().map_err(|_| StorageError::LockPoisoned)?;
    if let Some(limit) = self.max_bytes {
      let others: usize = entries
        .iter()
        .filter(|(k, _)| k.as_str() != key)
        .map(|(k, v)| k.len() + v.len())
        .sum();
      let used = others + key.len() + value.len();
      if used > limit {
        return Err(StorageError::QuotaExceeded { used, limit });
      }
    }
    entries.insert(key.to_string(), value.to_string());
    Ok(())
  }

  fn remove(&self, key: &str) -> StorageResult<()> {
    let mut entries = self.entries.lock().map_err(|_| StorageError::LockPoisoned)?;
    entries.remove(key);
    Ok(())
  }

  fn keys(&self) -> StorageResult<Vec<String>> {
    let entries = self.entries.lock().map_err(|_| StorageError::LockPoisoned)?;
    Ok(entries.keys().cloned().collect())
  }

  fn clear(&self) -> StorageResult<usize> {
    let mut entries = self.entries.lock().map_err(|_| StorageError::LockPoisoned)?;
    let count = entries.len();
    entries.clear();
    Ok(count)
  }
}

/// SQLite-backed store over one namespace of the `kv` table.
pub struct SqliteStorage {
  conn: Arc<Mutex<Connection>>,
  namespace: String,
  max_bytes: Option<usize>,
}

impl SqliteStorage {
  /// Create a store over `namespace` sharing an open connection.
  pub fn new(conn: Arc<Mutex<Connection>>, namespace: &str, max_bytes: Option<usize>) -> Self {
    Self {
      conn,
      namespace: namespace.to_string(),
      max_bytes,
    }
  }

  fn conn(&self) -> StorageResult<std::sync::MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|_| StorageError::LockPoisoned)
  }
}

impl KeyValueStore for SqliteStorage {
  fn get(&self, key: &str) -> StorageResult<Option<String>> {
    let conn = self.conn()?;
    let value = conn
      .query_row(
        "SELECT value FROM kv WHERE namespace = ? AND key = ?",
        params![self.namespace, key],
        |row| row.get(0),
      )
      .optional()?;
    Ok(value)
  }

  fn set(&self, key: &str, value: &str) -> StorageResult<()> {
    let conn = self.conn()?;

    if let Some(limit) = self.max_bytes {
      // Size of everything else in the namespace, the replaced row excluded
      let others: i64 = conn.query_row(
        "SELECT COALESCE(SUM(LENGTH(key) + LENGTH(value)), 0) FROM kv
         WHERE namespace = ? AND key != ?",
        params![self.namespace, key],
        |row| row.get(0),
      )?;
      let used = others as usize + key.len() + value.len();
      if used > limit {
        return Err(StorageError::QuotaExceeded { used, limit });
      }
    }

    conn.execute(
      "INSERT OR REPLACE INTO kv (namespace, key, value) VALUES (?, ?, ?)",
      params![self.namespace, key, value],
    )?;
    Ok(())
  }

  fn remove(&self, key: &str) -> StorageResult<()> {
    let conn = self.conn()?;
    conn.execute(
      "DELETE FROM kv WHERE namespace = ? AND key = ?",
      params![self.namespace, key],
    )?;
    Ok(())
  }

  fn keys(&self) -> StorageResult<Vec<String>> {
    let conn = self.conn()?;
    let mut stmt = conn.prepare("SELECT key FROM kv WHERE namespace = ? ORDER BY key")?;
    let keys = stmt
      .query_map(params![self.namespace], |row| row.get(0))?
      .collect::<Result<Vec<String>, _>>()?;
    Ok(keys)
  }

  fn clear(&self) -> StorageResult<usize> {
    let conn = self.conn()?;
    let removed = conn.execute(
      "DELETE FROM kv WHERE namespace = ?",
      params![self.namespace],
    )?;
    Ok(removed)
  }
}
