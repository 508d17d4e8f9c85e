//! Scripted network for unit tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::error::{EngineError, EngineResult};
use crate::http::{Fetch, Request, Response};

type Handler = Box<dyn Fn(&Request) -> Option<EngineResult<Response>> + Send + Sync>;

/// Answers by path; unknown paths and offline mode are transport errors.
#[derive(Default)]
pub struct ScriptedFetch {
  routes: Mutex<HashMap<String, Response>>,
  handler: Mutex<Option<Handler>>,
  offline: AtomicBool,
  log: Mutex<Vec<Request>>,
}

impl ScriptedFetch {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn respond(&self, path: &str, response: Response) {
    self
      .routes
      .lock()
      .unwrap()
      .insert(path.to_string(), response);
  }

  /// Consulted before the route table.
  pub fn handle(
    &self,
    handler: impl Fn(&Request) -> Option<EngineResult<Response>> + Send + Sync + 'static,
  ) {
    *self.handler.lock().unwrap() = Some(Box::new(handler));
  }

  pub fn go_offline(&self) {
    self.offline.store(true, Ordering::SeqCst);
  }

  pub fn go_online(&self) {
    self.offline.store(false, Ordering::SeqCst);
  }

  pub fn requests(&self) -> Vec<Request> {
    self.log.lock().unwrap().clone()
  }

  pub fn calls(&self, path: &str) -> usize {
    self
      .log
      .lock()
      .unwrap()
      .iter()
      .filter(|r| r.path() == path)
      .count()
  }
}

#[async_trait]
impl Fetch for ScriptedFetch {
  async fn fetch(&self, request: &Request) -> EngineResult<Response> {
    self.log.lock().unwrap().push(request.clone());

    if self.offline.load(Ordering::SeqCst) {
      return Err(EngineError::network(request.url.as_str(), "offline"));
    }

    if let Some(handler) = self.handler.lock().unwrap().as_ref() {
      if let Some(result) = handler(request) {
        return result;
      }
    }

    self
      .routes
      .lock()
      .unwrap()
      .get(request.path())
      .cloned()
      .ok_or_else(|| EngineError::network(request.url.as_str(), "connection refused"))
  }
}
