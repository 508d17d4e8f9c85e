//! Request classification.

use reqwest::Method;

use crate::config::CacheConfig;
use crate::http::Request;

/// How an intercepted request is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
  /// Not ours: left to the platform untouched.
  Bypass(BypassReason),
  /// `/api/*`, network-first.
  Api,
  /// In the static manifest, cache-first.
  Static,
  /// Everything else, network-first with cache and offline fallbacks.
  Dynamic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BypassReason {
  Method,
  Scheme,
}

/// Classifies requests by method, scheme and path.
#[derive(Debug, Clone)]
pub struct Router {
  static_manifest: Vec<String>,
  api_cache_allowlist: Vec<String>,
  crisis_path: String,
}

impl Router {
  pub fn new(config: &CacheConfig) -> Self {
    Self {
      static_manifest: config.static_manifest.clone(),
      api_cache_allowlist: config.api_cache_allowlist.clone(),
      crisis_path: config.crisis_path.clone(),
    }
  }

  /// Classify in fixed precedence: bypass, API, static, dynamic.
  ///
  /// The API prefix wins even when the path is also in the static manifest.
  pub fn classify(&self, request: &Request) -> RequestClass {
    if request.method != Method::GET {
      return RequestClass::Bypass(BypassReason::Method);
    }
    if !request.is_network_scheme() {
      return RequestClass::Bypass(BypassReason::Scheme);
    }

    let path = request.path();
    if path.starts_with("/api/") {
      RequestClass::Api
    } else if self.is_static(path) {
      RequestClass::Static
    } else {
      RequestClass::Dynamic
    }
  }

  /// Exact match on any manifest entry, suffix match on non-root entries.
  pub fn is_static(&self, path: &str) -> bool {
    self
      .static_manifest
      .iter()
      .any(|entry| path == entry || (entry != "/" && path.ends_with(entry.as_str())))
  }

  /// Whether a successful response for this API path may be cached.
  pub fn is_api_cacheable(&self, path: &str) -> bool {
    self
      .api_cache_allowlist
      .iter()
      .any(|allowed| path.starts_with(allowed.as_str()))
  }

  pub fn is_crisis(&self, path: &str) -> bool {
    path == self.crisis_path
  }
}
