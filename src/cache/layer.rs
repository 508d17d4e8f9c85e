//! Cache layer that orchestrates caching strategies with network fetching.

use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use super::storage::PartitionStore;
use super::traits::{CacheResult, ResponseSnapshot};
use crate::error::EngineResult;
use crate::http::{Request, Response};

/// Cache layer that applies cache-vs-network precedence policies.
///
/// The fetcher is passed per call so the layer stays independent of how the
/// network is reached.
pub struct CacheLayer<S: PartitionStore + ?Sized> {
  storage: Arc<S>,
}

impl<S: PartitionStore + ?Sized> CacheLayer<S> {
  /// Create a new cache layer with the given storage backend.
  pub fn new(storage: Arc<S>) -> Self {
    Self { storage }
  }

  pub fn storage(&self) -> &S {
    &self.storage
  }

  /// Look up a snapshot for `request`; storage failures count as a miss.
  pub fn lookup(&self, partition: &str, request: &Request) -> Option<ResponseSnapshot> {
    match self.storage.get(partition, &request.cache_key()) {
      Ok(found) => found,
      Err(e) => {
        warn!(partition, url = %request.url, error = %e, "Cache lookup failed");
        None
      }
    }
  }

  /// Store a successful response; failures are logged, never surfaced.
  pub fn store(&self, partition: &str, request: &Request, response: &Response) {
    let snapshot = ResponseSnapshot::capture(request.url.as_str(), response);
    if let Err(e) = self.storage.put(partition, &request.cache_key(), &snapshot) {
      warn!(partition, url = %request.url, error = %e, "Failed to store snapshot");
    }
  }

  /// Cache-first.
  ///
  /// 1. Serve from the partition if present
  /// 2. Otherwise fetch, store a successful response, return it
  /// 3. A fetch error with no cached copy propagates
  pub async fn cache_first<F, Fut>(
    &self,
    partition: &str,
    request: &Request,
    fetcher: F,
  ) -> EngineResult<CacheResult<Response>>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = EngineResult<Response>>,
  {
    if let Some(cached) = self.lookup(partition, request) {
      debug!(partition, url = %request.url, "Cache hit");
      return Ok(CacheResult::from_cache(cached.to_response(), cached.cached_at));
    }

    let response = fetcher().await?;
    if response.ok() {
      self.store(partition, request, &response);
    }
    Ok(CacheResult::from_network(response))
  }

  /// Network-first.
  ///
  /// 1. Try the network; store OK responses when `store` is set
  /// 2. On network failure serve the cached snapshot (offline mode)
  /// 3. With no snapshot either, return the network error for the caller
  ///    to apply its own fallback
  pub async fn network_first<F, Fut>(
    &self,
    partition: &str,
    request: &Request,
    store: bool,
    fetcher: F,
  ) -> EngineResult<CacheResult<Response>>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = EngineResult<Response>>,
  {
    match fetcher().await {
      Ok(response) => {
        if store && response.ok() {
          self.store(partition, request, &response);
        }
        Ok(CacheResult::from_network(response))
      }
      Err(err) => match self.lookup(partition, request) {
        Some(cached) => {
          debug!(partition, url = %request.url, error = %err, "Network failed, serving cache");
          Ok(CacheResult::offline(cached.to_response(), cached.cached_at))
        }
        None => Err(err),
      },
    }
  }
}

impl<S: PartitionStore + ?Sized> Clone for CacheLayer<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
    }
  }
}
