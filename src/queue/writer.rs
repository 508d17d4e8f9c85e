//! Host-side write path: submit a mood, queue it when offline.

use std::sync::Arc;
use tracing::{debug, error, info};
use url::Url;

use super::storage::MutationStore;
use super::types::MoodPayload;
use crate::http::{Fetch, Request, Response};

/// Result of a host write. Never an error: offline writes succeed locally.
#[derive(Debug, Clone)]
pub enum WriteOutcome {
  /// The backend accepted the write.
  Submitted(Response),
  /// The backend answered with a client error; queuing would not help.
  Rejected(Response),
  /// Stored for replay. `id` is `None` when even local persistence failed.
  Queued { id: Option<i64> },
}

impl WriteOutcome {
  pub fn is_queued(&self) -> bool {
    matches!(self, Self::Queued { .. })
  }
}

/// Submits mood writes, falling back to the durable queue.
#[derive(Clone)]
pub struct OfflineWriter {
  fetcher: Arc<dyn Fetch>,
  queue: Arc<dyn MutationStore>,
  endpoint: Url,
}

impl OfflineWriter {
  pub fn new(fetcher: Arc<dyn Fetch>, queue: Arc<dyn MutationStore>, endpoint: Url) -> Self {
    Self {
      fetcher,
      queue,
      endpoint,
    }
  }

  /// Submit a mood write; connectivity loss or a server error queues it.
  pub async fn track_mood(&self, payload: MoodPayload, auth_token: Option<&str>) -> WriteOutcome {
    let request = match build_track_request(&self.endpoint, &payload, auth_token) {
      Ok(request) => request,
      Err(e) => {
        error!(error = %e, "Failed to encode mood write, queuing instead");
        return self.queue(&payload, auth_token);
      }
    };

    match self.fetcher.fetch(&request).await {
      Ok(response) if response.ok() => WriteOutcome::Submitted(response),
      Ok(response) if response.status >= 500 => {
        debug!(status = response.status, "Server error, queuing mood write");
        self.queue(&payload, auth_token)
      }
      Ok(response) => WriteOutcome::Rejected(response),
      Err(e) => {
        debug!(error = %e, "Network unavailable, queuing mood write");
        self.queue(&payload, auth_token)
      }
    }
  }

  /// Persist a write for later replay. Persistence failures are logged only.
  pub fn queue(&self, payload: &MoodPayload, auth_token: Option<&str>) -> WriteOutcome {
    match self.queue.enqueue(payload, auth_token) {
      Ok(entry) => {
        info!(id = entry.id, score = payload.score, "Mood queued for sync");
        WriteOutcome::Queued { id: Some(entry.id) }
      }
      Err(e) => {
        error!(error = %e, "Failed to persist queued mood");
        WriteOutcome::Queued { id: None }
      }
    }
  }
}

/// `POST <endpoint>` with the payload as JSON and the captured bearer token.
pub fn build_track_request(
  endpoint: &Url,
  payload: &MoodPayload,
  auth_token: Option<&str>,
) -> crate::error::EngineResult<Request> {
  let request = Request::post_json(endpoint.clone(), payload)?;
  Ok(match auth_token {
    Some(token) => request.with_header("authorization", &format!("Bearer {}", token)),
    None => request,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::{EngineError, EngineResult};
  use crate::queue::MemoryMutationStore;
  use crate::testing::ScriptedFetch;

  /// Queue whose writes always fail.
  struct BrokenQueue;

  impl MutationStore for BrokenQueue {
    fn enqueue(
      &self,
      _payload: &MoodPayload,
      _auth_token: Option<&str>,
    ) -> EngineResult<crate::queue::MutationEntry> {
      Err(EngineError::Storage("disk full".to_string()))
    }
    fn pending(&self) -> EngineResult<Vec<crate::queue::MutationEntry>> {
      Ok(Vec::new())
    }
    fn get(&self, _id: i64) -> EngineResult<Option<crate::queue::MutationEntry>> {
      Ok(None)
    }
    fn remove(&self, _id: i64) -> EngineResult<bool> {
      Ok(false)
    }
    fn mark_synced(&self, _id: i64) -> EngineResult<bool> {
      Ok(false)
    }
    fn purge(&self) -> EngineResult<usize> {
      Ok(0)
    }
  }

  fn endpoint() -> Url {
    Url::parse("http://localhost:8000/api/mood/track").unwrap()
  }

  #[tokio::test]
  async fn test_online_write_submits() {
    let fetch = Arc::new(ScriptedFetch::new());
    fetch.respond("/api/mood/track", Response::text(200, "{\"success\":true}"));
    let queue = Arc::new(MemoryMutationStore::new());
    let writer = OfflineWriter::new(fetch.clone(), queue.clone(), endpoint());

    let outcome = writer
      .track_mood(MoodPayload::new(8, &["happy"]), Some("tok"))
      .await;

    assert!(matches!(outcome, WriteOutcome::Submitted(_)));
    assert_eq!(queue.pending_count().unwrap(), 0);
    let sent = fetch.requests();
    assert_eq!(sent[0].header("authorization"), Some("Bearer tok"));
  }

  #[tokio::test]
  async fn test_offline_write_queues() {
    let fetch = Arc::new(ScriptedFetch::new());
    fetch.go_offline();
    let queue = Arc::new(MemoryMutationStore::new());
    let writer = OfflineWriter::new(fetch, queue.clone(), endpoint());

    let outcome = writer.track_mood(MoodPayload::new(2, &["sad"]), None).await;

    assert!(matches!(outcome, WriteOutcome::Queued { id: Some(1) }));
    assert_eq!(queue.pending().unwrap()[0].payload, MoodPayload::new(2, &["sad"]));
  }

  #[tokio::test]
  async fn test_server_error_queues_client_error_rejects() {
    let fetch = Arc::new(ScriptedFetch::new());
    let queue = Arc::new(MemoryMutationStore::new());
    let writer = OfflineWriter::new(fetch.clone(), queue.clone(), endpoint());

    fetch.respond("/api/mood/track", Response::text(503, "down"));
    assert!(writer
      .track_mood(MoodPayload::new(4, &["meh"]), None)
      .await
      .is_queued());

    fetch.respond("/api/mood/track", Response::text(422, "invalid"));
    assert!(matches!(
      writer.track_mood(MoodPayload::new(0, &[]), None).await,
      WriteOutcome::Rejected(_)
    ));
    assert_eq!(queue.pending_count().unwrap(), 1);
  }

  #[tokio::test]
  async fn test_persistence_failure_still_reports_queued() {
    let fetch = Arc::new(ScriptedFetch::new());
    fetch.go_offline();
    let writer = OfflineWriter::new(fetch, Arc::new(BrokenQueue), endpoint());

    let outcome = writer.track_mood(MoodPayload::new(2, &["sad"]), None).await;
    assert!(matches!(outcome, WriteOutcome::Queued { id: None }));
  }
}
