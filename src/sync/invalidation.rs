//! Which cached categories each write can make stale.
//!
//! Wider is safer: an extra refetch costs latency, a missed pattern shows
//! stale derived numbers such as stock value after a sale.

use tracing::info;

use crate::api::OrderStatus;
use crate::cache::CacheManager;

/// A write that changes server data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteAction {
  /// Product created, updated or deleted
  ProductChanged,
  /// New order (may have created a customer)
  OrderCreated,
  OrderStatusChanged(OrderStatus),
  MovementCreated,
  InvoiceCreated { order_id: String },
  SettingsUpdated,
  Logout,
}

/// Keys to drop for a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidationScope {
  Patterns(Vec<String>),
  Everything,
}

fn patterns(list: &[&str]) -> InvalidationScope {
  InvalidationScope::Patterns(list.iter().map(|p| p.to_string()).collect())
}

impl WriteAction {
  pub fn scope(&self) -> InvalidationScope {
    match self {
      WriteAction::ProductChanged => patterns(&[
        "^products_",
        "^product_",
        "^reports_stock_value",
        "^reports_low_stock",
        "^reports_dashboard",
        "^dashboard_",
      ]),
      WriteAction::OrderCreated => {
        patterns(&["^customers_", "^reports_dashboard", "^dashboard_"])
      }
      WriteAction::OrderStatusChanged(status) if status.moves_stock() => patterns(&[
        "^order_",
        "^inventory_",
        "^products_",
        "^product_",
        "^reports_",
        "^dashboard_",
      ]),
      WriteAction::OrderStatusChanged(_) => patterns(&["^order_"]),
      WriteAction::MovementCreated => patterns(&[
        "^inventory_",
        "^products_",
        "^product_",
        "^reports_stock_value",
        "^reports_inventory_movement",
        "^reports_dashboard",
        "^dashboard_",
      ]),
      WriteAction::InvoiceCreated { order_id } => InvalidationScope::Patterns(vec![
        "^invoices_".to_string(),
        "^invoice_".to_string(),
        format!("^order_detail_{}$", regex::escape(order_id)),
      ]),
      WriteAction::SettingsUpdated | WriteAction::Logout => InvalidationScope::Everything,
    }
  }
}

/// Drop every cache entry `action` can have made stale. Returns the count.
pub fn invalidate(cache: &CacheManager, action: &WriteAction) -> usize {
  let removed = match action.scope() {
    InvalidationScope::Everything => cache.clear_all(),
    InvalidationScope::Patterns(patterns) => patterns
      .iter()
      .map(|pattern| cache.clear_by_prefix(pattern))
      .sum(),
  };
  info!(?action, removed, "Cache invalidated");
  removed
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{MemoryStorage, TtlTable};
  use crate::clock::ManualClock;
  use std::sync::Arc;

  const KEYS: &[&str] = &[
    "orders_list_1_20",
    "order_detail_7",
    "order_detail_77",
    "inventory_movements_1_20",
    "inventory_summary_1_20",
    "products_list_1_20",
    "product_detail_P1",
    "customers_list_1_1000",
    "invoices_list_1_50",
    "invoice_detail_3",
    "reports_stock_value",
    "reports_sales",
    "reports_dashboard",
    "dashboard_summary",
    "settings",
  ];

  fn seeded() -> CacheManager {
    let cache = CacheManager::new(
      Box::new(MemoryStorage::new()),
      TtlTable::default(),
      Arc::new(ManualClock::new(0)),
    );
    for key in KEYS {
      cache.set(key, &1);
    }
    cache
  }

  fn remaining(cache: &CacheManager) -> Vec<String> {
    cache.keys()
  }

  #[test]
  fn test_plain_status_change_only_touches_order_detail() {
    let cache = seeded();
    let removed = invalidate(&cache, &WriteAction::OrderStatusChanged(OrderStatus::Cancel));
    assert_eq!(removed, 2);
    let left = remaining(&cache);
    assert!(left.contains(&"orders_list_1_20".to_string()));
    assert!(!left.contains(&"order_detail_7".to_string()));
    assert!(left.contains(&"inventory_movements_1_20".to_string()));
  }

  #[test]
  fn test_done_status_change_reaches_stock_and_reports() {
    let cache = seeded();
    invalidate(&cache, &WriteAction::OrderStatusChanged(OrderStatus::Done));
    let left = remaining(&cache);
    for gone in [
      "order_detail_7",
      "inventory_summary_1_20",
      "products_list_1_20",
      "product_detail_P1",
      "reports_sales",
      "dashboard_summary",
    ] {
      assert!(!left.contains(&gone.to_string()), "{} should be gone", gone);
    }
    assert!(left.contains(&"invoices_list_1_50".to_string()));
    assert!(left.contains(&"customers_list_1_1000".to_string()));
  }

  #[test]
  fn test_product_change() {
    let cache = seeded();
    invalidate(&cache, &WriteAction::ProductChanged);
    let left = remaining(&cache);
    assert!(!left.contains(&"products_list_1_20".to_string()));
    assert!(!left.contains(&"reports_stock_value".to_string()));
    assert!(!left.contains(&"reports_dashboard".to_string()));
    assert!(left.contains(&"reports_sales".to_string()));
    assert!(left.contains(&"orders_list_1_20".to_string()));
  }

  #[test]
  fn test_movement_created() {
    let cache = seeded();
    invalidate(&cache, &WriteAction::MovementCreated);
    let left = remaining(&cache);
    assert!(!left.contains(&"inventory_movements_1_20".to_string()));
    assert!(!left.contains(&"product_detail_P1".to_string()));
    assert!(left.contains(&"orders_list_1_20".to_string()));
  }

  #[test]
  fn test_invoice_created_targets_one_order() {
    let cache = seeded();
    invalidate(
      &cache,
      &WriteAction::InvoiceCreated {
        order_id: "7".to_string(),
      },
    );
    let left = remaining(&cache);
    assert!(!left.contains(&"invoices_list_1_50".to_string()));
    assert!(!left.contains(&"invoice_detail_3".to_string()));
    assert!(!left.contains(&"order_detail_7".to_string()));
    assert!(left.contains(&"order_detail_77".to_string()));
  }

  #[test]
  fn test_settings_and_logout_flush_everything() {
    for action in [WriteAction::SettingsUpdated, WriteAction::Logout] {
      let cache = seeded();
      assert_eq!(invalidate(&cache, &action), KEYS.len());
      assert!(remaining(&cache).is_empty());
    }
  }
}
