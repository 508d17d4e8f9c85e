//! Core types for the partitioned response cache.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::http::Response;

/// Immutable copy of a successful response, owned by one partition.
///
/// Re-fetching replaces the snapshot; it is never mutated in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseSnapshot {
  pub url: String,
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
  pub cached_at: DateTime<Utc>,
}

impl ResponseSnapshot {
  pub fn capture(url: &str, response: &Response) -> Self {
    Self {
      url: url.to_string(),
      status: response.status,
      headers: response.headers.clone(),
      body: response.body.clone(),
      cached_at: Utc::now(),
    }
  }

  pub fn to_response(&self) -> Response {
    Response {
      status: self.status,
      headers: self.headers.clone(),
      body: self.body.clone(),
    }
  }
}

/// Logical role of a partition. Exactly one partition per role is current.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartitionRole {
  Static,
  Dynamic,
  Api,
}

impl PartitionRole {
  pub const ALL: [PartitionRole; 3] = [Self::Static, Self::Dynamic, Self::Api];

  pub fn prefix(self) -> &'static str {
    match self {
      Self::Static => "static",
      Self::Dynamic => "dynamic",
      Self::Api => "api",
    }
  }
}

/// The three current partition names for the running build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionNames {
  pub static_assets: String,
  pub dynamic: String,
  pub api: String,
}

impl PartitionNames {
  /// Names are `<role>-<version>`, each role versioned independently.
  pub fn new(static_version: &str, dynamic_version: &str, api_version: &str) -> Self {
    Self {
      static_assets: format!("{}-{}", PartitionRole::Static.prefix(), static_version),
      dynamic: format!("{}-{}", PartitionRole::Dynamic.prefix(), dynamic_version),
      api: format!("{}-{}", PartitionRole::Api.prefix(), api_version),
    }
  }

  pub fn get(&self, role: PartitionRole) -> &str {
    match role {
      PartitionRole::Static => &self.static_assets,
      PartitionRole::Dynamic => &self.dynamic,
      PartitionRole::Api => &self.api,
    }
  }

  pub fn is_current(&self, name: &str) -> bool {
    PartitionRole::ALL.iter().any(|role| self.get(*role) == name)
  }
}

/// Result from a strategy, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Served from a partition without touching the network.
  pub fn from_cache(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
      cached_at: Some(cached_at),
    }
  }

  /// Network failed, serving a cached copy.
  pub fn offline(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      cached_at: Some(cached_at),
    }
  }

  /// Network failed and nothing was cached; the engine built the response.
  pub fn synthesized(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Synthesized,
      cached_at: None,
    }
  }
}

/// Indicates where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Cache hit, network not consulted
  Cache,
  /// Offline mode - network unavailable, serving cached data
  Offline,
  /// Offline with no cached copy - built-in fallback payload
  Synthesized,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_partition_names_are_role_and_version() {
    let names = PartitionNames::new("v3", "v3", "v4");
    assert_eq!(names.get(PartitionRole::Static), "static-v3");
    assert_eq!(names.get(PartitionRole::Dynamic), "dynamic-v3");
    assert_eq!(names.get(PartitionRole::Api), "api-v4");
    assert!(names.is_current("api-v4"));
    assert!(!names.is_current("api-v3"));
  }

  #[test]
  fn test_snapshot_roundtrips_response() {
    let response = Response::text(200, "hello");
    let snapshot = ResponseSnapshot::capture("http://localhost/", &response);
    assert_eq!(snapshot.to_response(), response);
  }
}
