//! Strategy dispatch for intercepted requests.

use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

use crate::cache::{CacheLayer, CacheResult, PartitionNames, PartitionStore, ResponseSnapshot};
use crate::error::EngineResult;
use crate::http::{Fetch, Request, Response};
use crate::router::{RequestClass, Router};

/// What the engine did with an intercepted request.
#[derive(Debug, Clone)]
pub enum Interception {
  /// Left to the platform; the engine did not respond.
  Bypass,
  Respond(CacheResult<Response>),
}

impl Interception {
  pub fn response(&self) -> Option<&Response> {
    match self {
      Self::Bypass => None,
      Self::Respond(result) => Some(&result.data),
    }
  }
}

/// Payload served for the crisis-resources endpoint when offline with no cache.
pub fn crisis_offline_payload() -> serde_json::Value {
  json!({
    "immediate_help": [
      {
        "name": "Emergency Services",
        "phone": "911",
        "available": "24/7"
      }
    ],
    "offline": true
  })
}

/// Applies the per-class caching strategy.
pub struct StrategyEngine {
  router: Router,
  cache: CacheLayer<dyn PartitionStore>,
  partitions: PartitionNames,
  fetcher: Arc<dyn Fetch>,
  origin: Url,
}

impl StrategyEngine {
  pub fn new(
    router: Router,
    cache: CacheLayer<dyn PartitionStore>,
    partitions: PartitionNames,
    fetcher: Arc<dyn Fetch>,
    origin: Url,
  ) -> Self {
    Self {
      router,
      cache,
      partitions,
      fetcher,
      origin,
    }
  }

  /// Route a request to its strategy.
  ///
  /// Only a static-asset miss with no network reaches the caller as an error.
  pub async fn handle(&self, request: &Request) -> EngineResult<Interception> {
    let class = self.router.classify(request);
    debug!(url = %request.url, ?class, "Classified request");

    let result = match class {
      RequestClass::Bypass(_) => return Ok(Interception::Bypass),
      RequestClass::Api => self.api(request).await?,
      RequestClass::Static => self.static_asset(request).await?,
      RequestClass::Dynamic => self.dynamic(request).await?,
    };

    Ok(Interception::Respond(result))
  }

  async fn api(&self, request: &Request) -> EngineResult<CacheResult<Response>> {
    let path = request.path();
    let store = self.router.is_api_cacheable(path);

    match self
      .cache
      .network_first(&self.partitions.api, request, store, || {
        self.fetcher.fetch(request)
      })
      .await
    {
      Ok(result) => Ok(result),
      Err(err) if self.router.is_crisis(path) => {
        warn!(url = %request.url, error = %err, "Serving built-in crisis resources");
        Ok(CacheResult::synthesized(Response::json(
          200,
          &crisis_offline_payload(),
        )?))
      }
      Err(err) => Err(err),
    }
  }

  async fn static_asset(&self, request: &Request) -> EngineResult<CacheResult<Response>> {
    self
      .cache
      .cache_first(&self.partitions.static_assets, request, || {
        self.fetcher.fetch(request)
      })
      .await
  }

  async fn dynamic(&self, request: &Request) -> EngineResult<CacheResult<Response>> {
    match self
      .cache
      .network_first(&self.partitions.dynamic, request, true, || {
        self.fetcher.fetch(request)
      })
      .await
    {
      Ok(result) => Ok(result),
      Err(err) => {
        if let Some(root) = self.root_document() {
          debug!(url = %request.url, error = %err, "Serving cached root document");
          return Ok(CacheResult::offline(root.to_response(), root.cached_at));
        }
        warn!(url = %request.url, error = %err, "Offline with nothing cached");
        Ok(CacheResult::synthesized(Response::text(503, "Offline")))
      }
    }
  }

  fn root_document(&self) -> Option<ResponseSnapshot> {
    let root = Request::get(self.origin.join("/").ok()?);
    self.cache.lookup(&self.partitions.static_assets, &root)
  }
}
