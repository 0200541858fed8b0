//! Wall-clock abstraction so TTL and staleness checks can be driven by tests.

#[cfg(test)]
use std::sync::atomic::{AtomicI64, Ordering};
#[cfg(test)]
use std::sync::Arc;

/// Source of the current time in milliseconds since the Unix epoch.
pub trait Clock: Send + Sync {
  fn now_ms(&self) -> i64;
}

/// Real time, read from the system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now_ms(&self) -> i64 {
    chrono::Utc::now().timestamp_millis()
  }
}

/// Manually driven clock. Clones share the same instant.
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
  now: Arc<AtomicI64>,
}

#[cfg(test)]
impl ManualClock {
  pub fn new(start_ms: i64) -> Self {
    Self {
      now: Arc::new(AtomicI64::new(start_ms)),
    }
  }

  pub fn set(&self, ms: i64) {
    self.now.store(ms, Ordering::SeqCst);
  }

  pub fn advance(&self, ms: i64) {
    self.now.fetch_add(ms, Ordering::SeqCst);
  }
}

#[cfg(test)]
impl Clock for ManualClock {
  fn now_ms(&self) -> i64 {
    self.now.load(Ordering::SeqCst)
  }
}
