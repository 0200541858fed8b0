//! Durable queue of writes that were dispatched but not yet confirmed.
//!
//! Entries survive a restart so an unconfirmed write can be replayed on the
//! next load. The in-memory in-flight set backs the navigation guard.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

use crate::cache::KeyValueStore;

const QUEUE_KEY: &str = "writes";

/// Process-wide counter so ids minted in the same millisecond still differ.
static TEMP_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Mint a temporary record id: `temp_<ms>_<n>`.
pub fn next_temp_id(now_ms: i64) -> String {
  let n = TEMP_ID_COUNTER.fetch_add(1, Ordering::SeqCst) + 1;
  format!("temp_{}_{}", now_ms, n)
}

pub fn is_temp_id(id: &str) -> bool {
  id.starts_with("temp_")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingWrite {
  pub temp_id: String,
  /// API action the payload is sent with
  pub action: String,
  /// Exact request body
  pub payload: Value,
  /// Milliseconds since epoch
  pub created_at: i64,
}

impl PendingWrite {
  pub fn is_stale(&self, now_ms: i64, window: Duration) -> bool {
    now_ms - self.created_at >= window.as_millis() as i64
  }
}

pub struct PendingQueue {
  store: Box<dyn KeyValueStore>,
  in_flight: BTreeSet<String>,
}

impl PendingQueue {
  pub fn new(store: Box<dyn KeyValueStore>) -> Self {
    Self {
      store,
      in_flight: BTreeSet::new(),
    }
  }

  /// Persisted entries in insertion order. Unreadable queues read as empty.
  pub fn entries(&self) -> Vec<PendingWrite> {
    match self.store.get(QUEUE_KEY) {
      Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|e| {
        warn!(error = %e, "Pending queue is unreadable, ignoring it");
        Vec::new()
      }),
      Ok(None) => Vec::new(),
      Err(e) => {
        warn!(error = %e, "Failed to read pending queue");
        Vec::new()
      }
    }
  }

  fn persist(&self, entries: &[PendingWrite]) {
    let result = if entries.is_empty() {
      self.store.remove(QUEUE_KEY)
    } else {
      match serde_json::to_string(entries) {
        Ok(raw) => self.store.set(QUEUE_KEY, &raw),
        Err(e) => {
          warn!(error = %e, "Failed to encode pending queue");
          return;
        }
      }
    };
    if let Err(e) = result {
      warn!(error = %e, "Failed to persist pending queue");
    }
  }

  /// Register a write before it is dispatched.
  pub fn start(&mut self, write: PendingWrite) {
    debug!(temp_id = %write.temp_id, action = %write.action, "Pending write registered");
    self.in_flight.insert(write.temp_id.clone());
    let mut entries = self.entries();
    entries.retain(|e| e.temp_id != write.temp_id);
    entries.push(write);
    self.persist(&entries);
  }

  /// Forget a write that was confirmed or definitively rejected.
  pub fn end(&mut self, temp_id: &str) {
    self.in_flight.remove(temp_id);
    let mut entries = self.entries();
    let before = entries.len();
    entries.retain(|e| e.temp_id != temp_id);
    if entries.len() != before {
      self.persist(&entries);
    }
    debug!(temp_id, "Pending write cleared");
  }

  /// Remove stale entries from storage and return the rest, oldest first.
  pub fn take_fresh(&mut self, now_ms: i64, window: Duration) -> Vec<PendingWrite> {
    let entries = self.entries();
    let (stale, fresh): (Vec<_>, Vec<_>) = entries
      .into_iter()
      .partition(|e| e.is_stale(now_ms, window));
    if !stale.is_empty() {
      debug!(count = stale.len(), "Discarding stale pending writes");
      self.persist(&fresh);
    }
    fresh
  }

  pub fn contains(&self, temp_id: &str) -> bool {
    self.entries().iter().any(|e| e.temp_id == temp_id)
  }

  /// Writes dispatched by this process that have not settled.
  pub fn in_flight(&self) -> impl Iterator<Item = &str> {
    self.in_flight.iter().map(String::as_str)
  }

  pub fn has_in_flight(&self) -> bool {
    !self.in_flight.is_empty()
  }

  /// Track a replayed write as in flight without touching storage.
  pub(crate) fn mark_in_flight(&mut self, temp_id: &str) {
    self.in_flight.insert(temp_id.to_string());
  }

  pub(crate) fn unmark_in_flight(&mut self, temp_id: &str) {
    self.in_flight.remove(temp_id);
  }
}
