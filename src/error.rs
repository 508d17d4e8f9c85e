//! Error types for the offline engine.

use thiserror::Error;

/// Result alias used across the engine.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// All errors the engine can surface to the host.
#[derive(Debug, Error)]
pub enum EngineError {
  /// Transport-level failure: the request never produced a response.
  #[error("network error for {url}: {message}")]
  Network { url: String, message: String },

  /// Failure reading or writing a partition or the mutation queue.
  #[error("storage error: {0}")]
  Storage(String),

  #[error("serialization error: {0}")]
  Json(#[from] serde_json::Error),

  /// A sync trigger arrived for a tag no handler is registered for.
  #[error("unknown sync tag: {0}")]
  UnknownSyncTag(String),

  #[error("invalid request: {0}")]
  InvalidRequest(String),

  /// The host platform refused an operation (window, notification, sync registration).
  #[error("platform error: {0}")]
  Platform(String),
}

impl EngineError {
  pub(crate) fn network(url: impl Into<String>, message: impl ToString) -> Self {
    Self::Network {
      url: url.into(),
      message: message.to_string(),
    }
  }

  pub(crate) fn storage(context: &str, err: impl std::fmt::Display) -> Self {
    Self::Storage(format!("{}: {}", context, err))
  }

  /// Whether the error came from the transport rather than from local state.
  pub fn is_network(&self) -> bool {
    matches!(self, Self::Network { .. })
  }
}
