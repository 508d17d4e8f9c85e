//! Host platform seam: clients, notifications and deferred sync.

use async_trait::async_trait;
use std::sync::Mutex;
use tracing::info;

use crate::error::{EngineError, EngineResult};
use crate::push::Notification;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientKind {
  Window,
  Worker,
  SharedWorker,
}

/// An open client of the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
  pub id: String,
  pub url: String,
  pub kind: ClientKind,
}

/// Everything the engine needs from the environment it runs in.
#[async_trait]
pub trait Platform: Send + Sync {
  /// All open clients, controlled or not.
  async fn clients(&self) -> EngineResult<Vec<ClientInfo>>;

  async fn focus(&self, client_id: &str) -> EngineResult<()>;

  async fn open_window(&self, url: &str) -> EngineResult<()>;

  /// Take control of every open client without a reload.
  async fn claim(&self) -> EngineResult<()>;

  async fn show_notification(&self, notification: &Notification) -> EngineResult<()>;

  async fn close_notification(&self, notification: &Notification) -> EngineResult<()>;

  /// Register a tag with the deferred-execution facility.
  async fn register_sync(&self, tag: &str) -> EngineResult<()>;
}

/// Platform for the command line: no real clients, everything is logged
/// and remembered so the caller can report it.
#[derive(Default)]
pub struct LocalPlatform {
  state: Mutex<LocalState>,
}

#[derive(Debug, Default, Clone)]
pub struct LocalState {
  pub clients: Vec<ClientInfo>,
  pub claimed: bool,
  pub shown: Vec<Notification>,
  pub closed: usize,
  pub opened: Vec<String>,
  pub focused: Vec<String>,
  pub sync_tags: Vec<String>,
}

impl LocalPlatform {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_clients(clients: Vec<ClientInfo>) -> Self {
    Self {
      state: Mutex::new(LocalState {
        clients,
        ..LocalState::default()
      }),
    }
  }

  /// Copy of everything recorded so far.
  pub fn snapshot(&self) -> LocalState {
    self.state.lock().map(|s| s.clone()).unwrap_or_default()
  }

  fn with_state<T>(&self, f: impl FnOnce(&mut LocalState) -> T) -> EngineResult<T> {
    let mut state = self
      .state
      .lock()
      .map_err(|e| EngineError::Platform(format!("Lock poisoned: {}", e)))?;
    Ok(f(&mut state))
  }
}

#[async_trait]
impl Platform for LocalPlatform {
  async fn clients(&self) -> EngineResult<Vec<ClientInfo>> {
    self.with_state(|s| s.clients.clone())
  }

  async fn focus(&self, client_id: &str) -> EngineResult<()> {
    info!(client_id, "Focus client");
    self.with_state(|s| s.focused.push(client_id.to_string()))
  }

  async fn open_window(&self, url: &str) -> EngineResult<()> {
    info!(url, "Open window");
    self.with_state(|s| s.opened.push(url.to_string()))
  }

  async fn claim(&self) -> EngineResult<()> {
    self.with_state(|s| s.claimed = true)
  }

  async fn show_notification(&self, notification: &Notification) -> EngineResult<()> {
    info!(title = %notification.title, body = %notification.body, "Show notification");
    self.with_state(|s| s.shown.push(notification.clone()))
  }

  async fn close_notification(&self, _notification: &Notification) -> EngineResult<()> {
    self.with_state(|s| s.closed += 1)
  }

  async fn register_sync(&self, tag: &str) -> EngineResult<()> {
    info!(tag, "Sync registered");
    self.with_state(|s| {
      if !s.sync_tags.iter().any(|t| t == tag) {
        s.sync_tags.push(tag.to_string());
      }
    })
  }
}
