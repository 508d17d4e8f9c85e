//! Request/response model and the network seam.

use async_trait::async_trait;
use reqwest::Method;
use serde::Serialize;
use sha2::{Digest, Sha256};
use url::Url;

use crate::error::{EngineError, EngineResult};

/// An outbound request issued by the host application.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub headers: Vec<(String, String)>,
  pub body: Option<Vec<u8>>,
}

impl Request {
  pub fn new(method: Method, url: Url) -> Self {
    Self {
      method,
      url,
      headers: Vec::new(),
      body: None,
    }
  }

  pub fn get(url: Url) -> Self {
    Self::new(Method::GET, url)
  }

  /// Build a POST carrying a JSON body.
  pub fn post_json<T: Serialize>(url: Url, body: &T) -> EngineResult<Self> {
    let body = serde_json::to_vec(body)?;
    Ok(
      Self::new(Method::POST, url)
        .with_header("content-type", "application/json")
        .with_body(body),
    )
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  pub fn with_body(mut self, body: Vec<u8>) -> Self {
    self.body = Some(body);
    self
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  pub fn path(&self) -> &str {
    self.url.path()
  }

  /// Only plain network schemes can be intercepted.
  pub fn is_network_scheme(&self) -> bool {
    matches!(self.url.scheme(), "http" | "https")
  }

  /// Stable, fixed-length key derived from method and URL.
  pub fn cache_key(&self) -> String {
    request_key(&self.method, &self.url)
  }
}

/// SHA256 of `"<METHOD> <url>"`, hex encoded.
pub fn request_key(method: &Method, url: &Url) -> String {
  let mut hasher = Sha256::new();
  hasher.update(method.as_str().as_bytes());
  hasher.update(b" ");
  hasher.update(url.as_str().as_bytes());
  hex::encode(hasher.finalize())
}

/// A response, either from the network, a partition, or synthesized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16, body: Vec<u8>) -> Self {
    Self {
      status,
      headers: Vec::new(),
      body,
    }
  }

  pub fn json(status: u16, value: &serde_json::Value) -> EngineResult<Self> {
    Ok(Self {
      status,
      headers: vec![("content-type".to_string(), "application/json".to_string())],
      body: serde_json::to_vec(value)?,
    })
  }

  pub fn text(status: u16, text: &str) -> Self {
    Self {
      status,
      headers: vec![("content-type".to_string(), "text/plain".to_string())],
      body: text.as_bytes().to_vec(),
    }
  }

  /// 2xx status.
  pub fn ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  pub fn json_body(&self) -> EngineResult<serde_json::Value> {
    Ok(serde_json::from_slice(&self.body)?)
  }
}

/// Performs network requests on behalf of the engine.
#[async_trait]
pub trait Fetch: Send + Sync {
  /// Returns `Err(EngineError::Network)` only when no response was produced.
  /// HTTP error statuses are returned as responses.
  async fn fetch(&self, request: &Request) -> EngineResult<Response>;
}

/// reqwest-backed fetcher used outside of tests.
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
}

impl HttpFetcher {
  pub fn new() -> EngineResult<Self> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("moodsync/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| EngineError::network("<client>", e))?;
    Ok(Self { client })
  }
}

#[async_trait]
impl Fetch for HttpFetcher {
  async fn fetch(&self, request: &Request) -> EngineResult<Response> {
    let mut builder = self
      .client
      .request(request.method.clone(), request.url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let response = builder
      .send()
      .await
      .map_err(|e| EngineError::network(request.url.as_str(), e))?;

    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
      .collect();
    let body = response
      .bytes()
      .await
      .map_err(|e| EngineError::network(request.url.as_str(), e))?
      .to_vec();

    Ok(Response {
      status,
      headers,
      body,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
  }

  #[test]
  fn test_cache_key_depends_on_method_and_url() {
    let get = Request::get(url("http://localhost:3000/api/crisis/resources"));
    let same = Request::get(url("http://localhost:3000/api/crisis/resources"));
    let post = Request::new(Method::POST, url("http://localhost:3000/api/crisis/resources"));
    let other = Request::get(url("http://localhost:3000/api/auth/preferences"));

    assert_eq!(get.cache_key(), same.cache_key());
    assert_ne!(get.cache_key(), post.cache_key());
    assert_ne!(get.cache_key(), other.cache_key());
    assert_eq!(get.cache_key().len(), 64);
  }

  #[test]
  fn test_network_scheme() {
    assert!(Request::get(url("https://example.com/")).is_network_scheme());
    assert!(!Request::get(url("chrome-extension://abc/page.html")).is_network_scheme());
    assert!(!Request::get(url("data:text/plain,hello")).is_network_scheme());
  }

  #[test]
  fn test_response_helpers() {
    let resp = Response::json(200, &serde_json::json!({"offline": true})).unwrap();
    assert!(resp.ok());
    assert_eq!(resp.header("Content-Type"), Some("application/json"));
    assert_eq!(resp.json_body().unwrap()["offline"], true);

    let unavailable = Response::text(503, "Offline");
    assert!(!unavailable.ok());
    assert_eq!(unavailable.body, b"Offline");
  }
}
