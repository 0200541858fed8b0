//! Read-through layer that orchestrates the local cache with network fetching.

use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::Arc;

use super::manager::CacheManager;
use super::traits::{CacheResult, CacheSource};

/// Cache layer that manages caching logic and network fetching.
///
/// This layer sits between the application and the network clients,
/// answering from the local cache while entries are fresh.
#[derive(Clone)]
pub struct CacheLayer {
  cache: Arc<CacheManager>,
}

impl CacheLayer {
  pub fn new(cache: Arc<CacheManager>) -> Self {
    Self { cache }
  }

  #[cfg(test)]
  pub fn cache(&self) -> &Arc<CacheManager> {
    &self.cache
  }

  /// Fetch with a cache-first strategy.
  ///
  /// 1. Check cache - if present and fresh, return immediately
  /// 2. Otherwise call the fetcher, which reports which backend answered
  /// 3. Store the fetched value under `key`
  ///
  /// Fetch errors propagate and nothing is cached.
  pub async fn fetch<T, E, F, Fut>(&self, key: &str, fetcher: F) -> Result<CacheResult<T>, E>
  where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<(T, CacheSource), E>>,
  {
    if let Some(cached) = self.cache.get_as::<T>(key) {
      return Ok(CacheResult::from_cache(cached));
    }

    let (data, source) = fetcher().await?;
    self.cache.set(key, &data);
    Ok(CacheResult::from_network(data, source))
  }
}
