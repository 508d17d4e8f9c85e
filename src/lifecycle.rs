//! Install and activation.

use futures::future::{join_all, try_join_all};
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

use crate::cache::{CacheLayer, PartitionNames, PartitionRole, PartitionStore, ResponseSnapshot};
use crate::error::{EngineError, EngineResult};
use crate::http::{Fetch, Request, Response};
use crate::platform::Platform;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
  pub precached: usize,
  pub prewarmed: usize,
  pub prewarm_failures: usize,
  /// The new version should take over without waiting for old clients.
  pub skip_waiting: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationReport {
  /// Stale partitions that were deleted
  pub deleted: Vec<String>,
  pub claimed: bool,
}

/// Pre-warms partitions on install and garbage-collects them on activation.
pub struct Lifecycle {
  cache: CacheLayer<dyn PartitionStore>,
  partitions: PartitionNames,
  fetcher: Arc<dyn Fetch>,
  platform: Arc<dyn Platform>,
  origin: Url,
  static_manifest: Vec<String>,
  api_prewarm: Vec<String>,
}

impl Lifecycle {
  pub fn new(
    cache: CacheLayer<dyn PartitionStore>,
    partitions: PartitionNames,
    fetcher: Arc<dyn Fetch>,
    platform: Arc<dyn Platform>,
    origin: Url,
    static_manifest: Vec<String>,
    api_prewarm: Vec<String>,
  ) -> Self {
    Self {
      cache,
      partitions,
      fetcher,
      platform,
      origin,
      static_manifest,
      api_prewarm,
    }
  }

  fn resolve(&self, path: &str) -> EngineResult<Request> {
    self
      .origin
      .join(path)
      .map(Request::get)
      .map_err(|e| EngineError::InvalidRequest(format!("{}: {}", path, e)))
  }

  /// Pre-cache the static manifest, then pre-warm the API partition best
  /// effort. Static fetches and writes are all or nothing; an unreachable
  /// backend never fails install.
  pub async fn install(&self) -> EngineResult<InstallReport> {
    for role in PartitionRole::ALL {
      self.cache.storage().open_partition(self.partitions.get(role))?;
    }

    let requests = self
      .static_manifest
      .iter()
      .map(|path| self.resolve(path))
      .collect::<EngineResult<Vec<_>>>()?;

    let responses = try_join_all(requests.iter().map(|req| self.fetch_ok(req))).await?;
    let entries = requests
      .iter()
      .zip(&responses)
      .map(|(request, response)| {
        (
          request.cache_key(),
          ResponseSnapshot::capture(request.url.as_str(), response),
        )
      })
      .collect::<Vec<_>>();
    self
      .cache
      .storage()
      .put_all(&self.partitions.static_assets, &entries)?;
    info!(
      count = requests.len(),
      partition = %self.partitions.static_assets,
      "Static assets cached"
    );

    let mut report = InstallReport {
      precached: requests.len(),
      skip_waiting: true,
      ..InstallReport::default()
    };

    let prewarm = self
      .api_prewarm
      .iter()
      .filter_map(|path| match self.resolve(path) {
        Ok(req) => Some(req),
        Err(e) => {
          warn!(path, error = %e, "Skipping invalid pre-warm path");
          None
        }
      })
      .collect::<Vec<_>>();

    let results = join_all(prewarm.iter().map(|req| self.fetch_ok(req))).await;
    for (request, result) in prewarm.iter().zip(results) {
      match result {
        Ok(response) => {
          self.cache.store(&self.partitions.api, request, &response);
          report.prewarmed += 1;
        }
        Err(e) => {
          warn!(url = %request.url, error = %e, "API pre-warm failed");
          report.prewarm_failures += 1;
        }
      }
    }

    Ok(report)
  }

  async fn fetch_ok(&self, request: &Request) -> EngineResult<Response> {
    let response = self.fetcher.fetch(request).await?;
    if !response.ok() {
      return Err(EngineError::network(
        request.url.as_str(),
        format!("status {}", response.status),
      ));
    }
    Ok(response)
  }

  /// Delete every partition that is not current, then claim all clients.
  pub async fn activate(&self) -> EngineResult<ActivationReport> {
    let mut deleted = Vec::new();
    for name in self.cache.storage().partitions()? {
      if self.partitions.is_current(&name) {
        continue;
      }
      if self.cache.storage().delete_partition(&name)? {
        info!(partition = %name, "Deleted stale partition");
        deleted.push(name);
      }
    }

    self.platform.claim().await?;

    Ok(ActivationReport {
      deleted,
      claimed: true,
    })
  }
}
