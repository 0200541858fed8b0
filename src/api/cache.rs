//! Caching implementations for admin API types.

use crate::cache::{CacheManager, Cacheable};

use super::types::{Movement, Order};

// ============================================================================
// Cacheable implementations
// ============================================================================

impl Cacheable for Order {
  fn cache_key(&self) -> &str {
    &self.id
  }

  fn sort_key(&self) -> &str {
    &self.created_at
  }

  fn category() -> &'static str {
    "orders"
  }
}

impl Cacheable for Movement {
  fn cache_key(&self) -> &str {
    &self.id
  }

  fn sort_key(&self) -> &str {
    &self.created_at
  }

  fn category() -> &'static str {
    "inventory"
  }
}

// ============================================================================
// Query key types
// ============================================================================

/// Cache keys for API reads.
///
/// Keys stay human readable because invalidation matches them by prefix.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueryKey {
  /// One page of a list resource: `orders_list_1_20`, `inventory_movements_2_20`
  List {
    resource: String,
    view: String,
    page: u32,
    limit: u32,
  },
  /// A single record: `product_detail_P7`
  Detail { kind: String, id: String },
  /// A named report: `reports_dashboard`
  Report { name: String },
}

impl QueryKey {
  pub fn list(resource: &str, view: &str, page: u32, limit: u32) -> Self {
    Self::List {
      resource: resource.to_string(),
      view: view.to_string(),
      page,
      limit,
    }
  }

  /// Key of the page a coordinator of `T` records owns.
  pub fn page_of<T: Cacheable>(view: &str, page: u32, limit: u32) -> Self {
    Self::list(T::category(), view, page, limit)
  }

  pub fn detail(kind: &str, id: &str) -> Self {
    Self::Detail {
      kind: kind.to_string(),
      id: id.to_string(),
    }
  }

  pub fn report(name: &str) -> Self {
    Self::Report {
      name: name.to_string(),
    }
  }

  pub fn cache_key(&self) -> String {
    match self {
      Self::List {
        resource,
        view,
        page,
        limit,
      } => CacheManager::key(resource, &[view.clone(), page.to_string(), limit.to_string()]),
      Self::Detail { kind, id } => CacheManager::key(kind, &["detail", id.as_str()]),
      Self::Report { name } => CacheManager::key("reports", &[name.as_str()]),
    }
  }

  pub fn description(&self) -> String {
    match self {
      Self::List {
        resource,
        page,
        limit,
        ..
      } => format!("{} page {} ({} per page)", resource, page, limit),
      Self::Detail { kind, id } => format!("{} {}", kind, id),
      Self::Report { name } => format!("report {}", name),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_cache_keys() {
    assert_eq!(QueryKey::list("orders", "list", 1, 20).cache_key(), "orders_list_1_20");
    assert_eq!(
      QueryKey::page_of::<Movement>("movements", 2, 20).cache_key(),
      "inventory_movements_2_20"
    );
    assert_eq!(QueryKey::detail("product", "P7").cache_key(), "product_detail_P7");
    assert_eq!(QueryKey::report("dashboard").cache_key(), "reports_dashboard");
  }

  #[test]
  fn test_description() {
    assert_eq!(
      QueryKey::list("orders", "list", 1, 20).description(),
      "orders page 1 (20 per page)"
    );
  }
}
