//! Read path: local cache, then the edge worker, then the script API.

use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

use crate::cache::{CacheLayer, CacheManager, CacheResult, CacheSource};

use super::cache::QueryKey;
use super::client::Backend;
use super::error::ApiError;
use super::types::{ListPage, Movement, Order, Product};
use super::worker::EdgeClient;

/// How a paginated resource is addressed on each backend.
#[derive(Debug, Clone, Copy)]
pub struct ListResource {
  /// Leading cache-key segment
  pub category: &'static str,
  /// Second cache-key segment
  pub view: &'static str,
  /// Script API action
  pub action: &'static str,
  /// Edge worker path
  pub edge_path: &'static str,
}

pub const ORDERS: ListResource = ListResource {
  category: "orders",
  view: "list",
  action: "orders.list",
  edge_path: "/orders",
};

pub const MOVEMENTS: ListResource = ListResource {
  category: "inventory",
  view: "movements",
  action: "inventory.list",
  edge_path: "/inventory",
};

pub const PRODUCTS: ListResource = ListResource {
  category: "products",
  view: "list",
  action: "products.list",
  edge_path: "/products",
};

impl ListResource {
  pub fn key(&self, page: u32, limit: u32) -> QueryKey {
    QueryKey::list(self.category, self.view, page, limit)
  }
}

/// API client with transparent caching support.
///
/// Writes never go through here; see the sync module.
#[derive(Clone)]
pub struct CachedApiClient {
  inner: Arc<dyn Backend>,
  edge: Option<EdgeClient>,
  cache: CacheLayer,
}

impl CachedApiClient {
  pub fn new(inner: Arc<dyn Backend>, edge: Option<EdgeClient>, cache: Arc<CacheManager>) -> Self {
    Self {
      inner,
      edge,
      cache: CacheLayer::new(cache),
    }
  }

  /// Get one page of a list resource with caching.
  pub async fn list<T>(
    &self,
    resource: ListResource,
    page: u32,
    limit: u32,
  ) -> Result<CacheResult<ListPage<T>>, ApiError>
  where
    T: Serialize + DeserializeOwned,
  {
    let key = resource.key(page, limit);
    debug!(query = %key.description(), "Reading list");
    self
      .cache
      .fetch(&key.cache_key(), || async move {
        let params = [("page", page.to_string()), ("limit", limit.to_string())];
        if let Some(data) = self.edge_read(resource.edge_path, &params).await {
          if let Ok(list) = serde_json::from_value(data) {
            return Ok((list, CacheSource::Edge));
          }
        }
        let data = self
          .inner
          .call(resource.action, json!({"page": page, "limit": limit}))
          .await?;
        let list = serde_json::from_value(data).map_err(ApiError::unparseable)?;
        Ok((list, CacheSource::Primary))
      })
      .await
  }

  pub async fn orders(&self, page: u32, limit: u32) -> Result<CacheResult<ListPage<Order>>, ApiError> {
    self.list(ORDERS, page, limit).await
  }

  pub async fn movements(
    &self,
    page: u32,
    limit: u32,
  ) -> Result<CacheResult<ListPage<Movement>>, ApiError> {
    self.list(MOVEMENTS, page, limit).await
  }

  pub async fn products(
    &self,
    page: u32,
    limit: u32,
  ) -> Result<CacheResult<ListPage<Product>>, ApiError> {
    self.list(PRODUCTS, page, limit).await
  }

  /// Get a single product with caching.
  pub async fn product(&self, id: &str) -> Result<CacheResult<Product>, ApiError> {
    self.detail("product", "products.get", id).await
  }

  async fn detail<T>(&self, kind: &str, action: &str, id: &str) -> Result<CacheResult<T>, ApiError>
  where
    T: Serialize + DeserializeOwned,
  {
    let key = QueryKey::detail(kind, id);
    self
      .cache
      .fetch(&key.cache_key(), || async move {
        let data = self.inner.call(action, json!({ "id": id })).await?;
        let record = serde_json::from_value(data).map_err(ApiError::unparseable)?;
        Ok((record, CacheSource::Primary))
      })
      .await
  }

  /// Get a named report with caching.
  pub async fn report(&self, name: &str) -> Result<CacheResult<Value>, ApiError> {
    let key = QueryKey::report(name);
    self
      .cache
      .fetch(&key.cache_key(), || async move {
        if let Some(data) = self.edge_read("/reports", &[("type", name.to_string())]).await {
          return Ok((data, CacheSource::Edge));
        }
        let data = self.inner.call(&format!("reports.{}", name), json!({})).await?;
        Ok((data, CacheSource::Primary))
      })
      .await
  }

  async fn edge_read(&self, path: &str, params: &[(&str, String)]) -> Option<Value> {
    match &self.edge {
      Some(edge) => edge.get(path, params).await,
      None => None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{MemoryStorage, TtlTable};
  use crate::clock::ManualClock;
  use crate::sync::testing::ScriptedBackend;
  use std::time::Duration;
  use wiremock::matchers::method;
  use wiremock::{Mock, MockServer, ResponseTemplate};

  fn cache() -> Arc<CacheManager> {
    Arc::new(CacheManager::new(
      Box::new(MemoryStorage::new()),
      TtlTable::default(),
      Arc::new(ManualClock::new(0)),
    ))
  }

  fn page_json() -> Value {
    json!({"items": [{"id": "5", "created_at": "2026-10-19 09:00:00"}], "total": 1, "page": 1, "limit": 20, "totalPages": 1})
  }

  #[tokio::test]
  async fn test_primary_then_cache() {
    let backend = Arc::new(ScriptedBackend::new());
    backend.push_ok(page_json());
    let cache = cache();
    let client = CachedApiClient::new(backend.clone(), None, cache.clone());

    let first = client.orders(1, 20).await.unwrap();
    assert_eq!(first.source, CacheSource::Primary);
    assert_eq!(first.data.items[0].id, "5");
    assert!(cache.get("orders_list_1_20").is_some());

    let second = client.orders(1, 20).await.unwrap();
    assert_eq!(second.source, CacheSource::Cache);
    assert_eq!(backend.calls().len(), 1);
    assert_eq!(backend.calls()[0].0, "orders.list");
  }

  #[tokio::test]
  async fn test_edge_miss_falls_back_to_primary() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .respond_with(
        ResponseTemplate::new(200).set_body_json(json!({"success": false, "fallback": true})),
      )
      .mount(&server)
      .await;
    let edge = EdgeClient::new(&server.uri(), "key", Duration::from_secs(2)).unwrap();

    let backend = Arc::new(ScriptedBackend::new());
    backend.push_ok(page_json());
    let client = CachedApiClient::new(backend.clone(), Some(edge), cache());

    let result = client.movements(1, 20).await.unwrap();
    assert_eq!(result.source, CacheSource::Primary);
    assert_eq!(backend.calls()[0].0, "inventory.list");
  }

  #[tokio::test]
  async fn test_edge_hit_skips_primary() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .respond_with(
        ResponseTemplate::new(200).set_body_json(json!({"success": true, "data": page_json()})),
      )
      .mount(&server)
      .await;
    let edge = EdgeClient::new(&server.uri(), "key", Duration::from_secs(2)).unwrap();

    let backend = Arc::new(ScriptedBackend::new());
    let client = CachedApiClient::new(backend.clone(), Some(edge), cache());

    let result = client.orders(1, 20).await.unwrap();
    assert_eq!(result.source, CacheSource::Edge);
    assert!(backend.calls().is_empty());
  }

  #[tokio::test]
  async fn test_primary_error_propagates_and_is_not_cached() {
    let backend = Arc::new(ScriptedBackend::new());
    backend.push_err(ApiError::rejected(Some("Unauthorized".to_string())));
    let cache = cache();
    let client = CachedApiClient::new(backend, None, cache.clone());

    let err = client.product("P1").await.unwrap_err();
    assert!(err.is_auth_expired());
    assert!(cache.keys().is_empty());
  }
}
