//! Category-to-TTL resolution.
//!
//! A key's category is its leading segment up to the first `_`
//! (`orders_list_1_20` -> `orders`).

use std::collections::HashMap;
use std::time::Duration;

const MINUTE_MS: i64 = 60 * 1000;

/// TTL for categories that are not in the table.
pub const DEFAULT_TTL_MS: i64 = 5 * MINUTE_MS;

const DEFAULT_TABLE: &[(&str, i64)] = &[
  ("products", 15 * MINUTE_MS),
  ("orders", 15 * MINUTE_MS),
  ("inventory", 15 * MINUTE_MS),
  ("customers", 15 * MINUTE_MS),
  ("reports", 15 * MINUTE_MS),
  ("dashboard", 15 * MINUTE_MS),
];

/// Extract the category segment of a cache key.
pub fn category_of(key: &str) -> &str {
  key.split('_').next().unwrap_or(key)
}

/// Static category table with a conservative fallback.
#[derive(Debug, Clone)]
pub struct TtlTable {
  by_category: HashMap<String, i64>,
  fallback_ms: i64,
}

impl Default for TtlTable {
  fn default() -> Self {
    Self {
      by_category: DEFAULT_TABLE
        .iter()
        .map(|(name, ttl)| (name.to_string(), *ttl))
        .collect(),
      fallback_ms: DEFAULT_TTL_MS,
    }
  }
}

impl TtlTable {
  /// Default table with per-category overrides applied.
  pub fn with_overrides(overrides: &HashMap<String, u64>) -> Self {
    let mut table = Self::default();
    for (category, secs) in overrides {
      let ttl = Duration::from_secs(*secs).as_millis() as i64;
      if ttl <= table.fallback_ms {
        tracing::warn!(
          category = %category,
          ttl_ms = ttl,
          "TTL override is not longer than the fallback TTL"
        );
      }
      table.by_category.insert(category.clone(), ttl);
    }
    table
  }

  /// TTL in milliseconds for a cache key.
  pub fn ttl_for(&self, key: &str) -> i64 {
    self
      .by_category
      .get(category_of(key))
      .copied()
      .unwrap_or(self.fallback_ms)
  }
}
