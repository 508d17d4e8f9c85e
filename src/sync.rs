//! Sync scheduler: drains the mutation queue when connectivity returns.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::error::{EngineError, EngineResult};
use crate::http::Fetch;
use crate::messaging::{ClientChannel, ClientMessage};
use crate::queue::{build_track_request, EntryStatus, MutationEntry, MutationStore};

/// Status the backend uses for a write it has already applied.
const ALREADY_APPLIED: u16 = 409;

/// Outcome of replaying one queued entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayOutcome {
  Accepted,
  /// The server had already applied it; treated as success.
  AlreadyApplied,
  /// Not in the queue (or no longer pending): nothing was sent.
  Missing,
  /// Left pending for the next trigger.
  Failed(String),
}

impl ReplayOutcome {
  pub fn is_success(&self) -> bool {
    matches!(self, Self::Accepted | Self::AlreadyApplied)
  }
}

/// Summary of one sync pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
  pub tag: String,
  pub attempted: usize,
  pub synced: usize,
  pub failed: usize,
  /// Another pass for the same tag was already running.
  pub skipped: bool,
}

/// Replays queued writes, strictly one after another.
pub struct SyncScheduler {
  queue: Arc<dyn MutationStore>,
  fetcher: Arc<dyn Fetch>,
  channel: Arc<ClientChannel>,
  endpoint: Url,
  tag: String,
  in_flight: Mutex<HashSet<String>>,
}

impl SyncScheduler {
  pub fn new(
    queue: Arc<dyn MutationStore>,
    fetcher: Arc<dyn Fetch>,
    channel: Arc<ClientChannel>,
    endpoint: Url,
    tag: impl Into<String>,
  ) -> Self {
    Self {
      queue,
      fetcher,
      channel,
      endpoint,
      tag: tag.into(),
      in_flight: Mutex::new(HashSet::new()),
    }
  }

  /// Run one pass for `tag`.
  ///
  /// Each pending entry is replayed in creation order; a failure leaves the
  /// entry pending and moves on. Entries queued while the pass runs are
  /// replayed before it ends. Clients get `SYNC_COMPLETE` when at least one
  /// entry was synced.
  pub async fn run(&self, tag: &str) -> EngineResult<SyncReport> {
    if tag != self.tag {
      return Err(EngineError::UnknownSyncTag(tag.to_string()));
    }

    let Some(_guard) = InFlightGuard::acquire(&self.in_flight, tag) else {
      debug!(tag, "Sync already in flight, skipping");
      return Ok(SyncReport {
        tag: tag.to_string(),
        skipped: true,
        ..SyncReport::default()
      });
    };

    let mut report = SyncReport {
      tag: tag.to_string(),
      ..SyncReport::default()
    };

    // Re-read until nothing new: triggers for writes queued mid-pass were skipped
    let mut seen = HashSet::new();
    loop {
      let batch: Vec<MutationEntry> = self
        .queue
        .pending()?
        .into_iter()
        .filter(|entry| seen.insert(entry.id))
        .collect();
      if batch.is_empty() {
        break;
      }

      info!(tag, pending = batch.len(), "Starting queue replay");

      for entry in batch {
        let outcome = match self.queue.get(entry.id) {
          Ok(Some(current)) if current.status == EntryStatus::Pending => {
            self.replay_entry(&current).await
          }
          Ok(_) => ReplayOutcome::Missing,
          Err(e) => ReplayOutcome::Failed(e.to_string()),
        };

        match outcome {
          ReplayOutcome::Missing => continue,
          ReplayOutcome::Failed(reason) => {
            warn!(id = entry.id, reason = %reason, "Replay failed, entry stays pending");
            report.attempted += 1;
            report.failed += 1;
          }
          _ => {
            report.attempted += 1;
            report.synced += 1;
          }
        }
      }
    }

    if report.attempted == 0 {
      return Ok(report);
    }

    info!(
      tag,
      synced = report.synced,
      failed = report.failed,
      "Queue replay finished"
    );

    if report.synced > 0 {
      self
        .channel
        .broadcast(ClientMessage::sync_complete(report.synced));
    }

    Ok(report)
  }

  /// Replay a single entry by id. An id no longer pending is a no-op.
  pub async fn replay(&self, id: i64) -> EngineResult<ReplayOutcome> {
    match self.queue.get(id)? {
      Some(entry) if entry.status == EntryStatus::Pending => Ok(self.replay_entry(&entry).await),
      _ => Ok(ReplayOutcome::Missing),
    }
  }

  async fn replay_entry(&self, entry: &MutationEntry) -> ReplayOutcome {
    let request =
      match build_track_request(&self.endpoint, &entry.payload, entry.auth_token.as_deref()) {
        Ok(request) => request,
        Err(e) => return ReplayOutcome::Failed(e.to_string()),
      };

    let outcome = match self.fetcher.fetch(&request).await {
      Ok(response) if response.ok() => ReplayOutcome::Accepted,
      Ok(response) if response.status == ALREADY_APPLIED => ReplayOutcome::AlreadyApplied,
      Ok(response) => ReplayOutcome::Failed(format!("server responded {}", response.status)),
      Err(e) => ReplayOutcome::Failed(e.to_string()),
    };

    if outcome.is_success() {
      self.settle(entry.id);
    }
    outcome
  }

  /// Remove an accepted entry; if that fails, at least hide it from replay.
  fn settle(&self, id: i64) {
    if let Err(e) = self.queue.remove(id) {
      error!(id, error = %e, "Failed to remove synced entry");
      if let Err(e) = self.queue.mark_synced(id) {
        error!(id, error = %e, "Failed to mark entry synced");
      }
    }
  }
}

/// Marks a tag in flight until dropped.
struct InFlightGuard<'a> {
  set: &'a Mutex<HashSet<String>>,
  tag: String,
}

impl<'a> InFlightGuard<'a> {
  fn acquire(set: &'a Mutex<HashSet<String>>, tag: &str) -> Option<Self> {
    let mut tags = set.lock().ok()?;
    if !tags.insert(tag.to_string()) {
      return None;
    }
    Some(Self {
      set,
      tag: tag.to_string(),
    })
  }
}

impl Drop for InFlightGuard<'_> {
  fn drop(&mut self) {
    if let Ok(mut tags) = self.set.lock() {
      tags.remove(&self.tag);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::http::{Request, Response};
  use crate::queue::{MemoryMutationStore, MoodPayload};
  use crate::testing::ScriptedFetch;
  use async_trait::async_trait;
  use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
  use tokio::sync::Notify;

  fn scheduler(
    fetch: Arc<ScriptedFetch>,
  ) -> (SyncScheduler, Arc<MemoryMutationStore>, Arc<ClientChannel>) {
    let queue = Arc::new(MemoryMutationStore::new());
    let channel = Arc::new(ClientChannel::new());
    let scheduler = SyncScheduler::new(
      queue.clone(),
      fetch,
      channel.clone(),
      Url::parse("http://localhost:8000/api/mood/track").unwrap(),
      "mood-sync",
    );
    (scheduler, queue, channel)
  }

  fn score_of(request: &crate::http::Request) -> u64 {
    let body: serde_json::Value =
      serde_json::from_slice(request.body.as_deref().unwrap_or_default()).unwrap();
    body["score"].as_u64().unwrap()
  }

  #[tokio::test]
  async fn test_rejected_entry_stays_others_removed() {
    let fetch = Arc::new(ScriptedFetch::new());
    fetch.handle(|req| {
      if score_of(req) == 2 {
        Some(Ok(Response::text(500, "nope")))
      } else {
        Some(Ok(Response::text(200, "ok")))
      }
    });
    let (scheduler, queue, _) = scheduler(fetch.clone());
    for score in 1..=3 {
      queue.enqueue(&MoodPayload::new(score, &["x"]), None).unwrap();
    }

    let report = scheduler.run("mood-sync").await.unwrap();

    assert_eq!(report.synced, 2);
    assert_eq!(report.failed, 1);
    let remaining: Vec<i64> = queue.pending().unwrap().iter().map(|e| e.id).collect();
    assert_eq!(remaining, vec![2]);
    assert_eq!(queue.get(2).unwrap().unwrap().payload, MoodPayload::new(2, &["x"]));

    // Replayed sequentially, in creation order
    let order: Vec<u64> = fetch.requests().iter().map(score_of).collect();
    assert_eq!(order, vec![1, 2, 3]);
  }

  #[tokio::test]
  async fn test_already_applied_counts_as_success() {
    let fetch = Arc::new(ScriptedFetch::new());
    fetch.respond("/api/mood/track", Response::text(409, "duplicate"));
    let (scheduler, queue, _) = scheduler(fetch);
    queue.enqueue(&MoodPayload::new(6, &["ok"]), None).unwrap();

    let report = scheduler.run("mood-sync").await.unwrap();
    assert_eq!(report.synced, 1);
    assert_eq!(queue.pending_count().unwrap(), 0);
  }

  #[tokio::test]
  async fn test_replaying_removed_id_is_noop() {
    let fetch = Arc::new(ScriptedFetch::new());
    fetch.respond("/api/mood/track", Response::text(200, "ok"));
    let (scheduler, queue, _) = scheduler(fetch.clone());
    let entry = queue.enqueue(&MoodPayload::new(6, &["ok"]), None).unwrap();

    assert_eq!(scheduler.replay(entry.id).await.unwrap(), ReplayOutcome::Accepted);
    assert_eq!(scheduler.replay(entry.id).await.unwrap(), ReplayOutcome::Missing);
    assert_eq!(fetch.requests().len(), 1);
  }

  #[tokio::test]
  async fn test_offline_pass_keeps_everything_and_stays_quiet() {
    let fetch = Arc::new(ScriptedFetch::new());
    fetch.go_offline();
    let (scheduler, queue, channel) = scheduler(fetch);
    let mut rx = channel.subscribe();
    queue.enqueue(&MoodPayload::new(3, &["low"]), Some("t")).unwrap();

    let report = scheduler.run("mood-sync").await.unwrap();
    assert_eq!(report.synced, 0);
    assert_eq!(report.failed, 1);
    assert_eq!(queue.pending_count().unwrap(), 1);
    assert!(rx.try_recv().is_err());
  }

  #[tokio::test]
  async fn test_success_broadcasts_count() {
    let fetch = Arc::new(ScriptedFetch::new());
    fetch.respond("/api/mood/track", Response::text(201, "created"));
    let (scheduler, queue, channel) = scheduler(fetch.clone());
    let mut rx = channel.subscribe();
    queue.enqueue(&MoodPayload::new(3, &["low"]), Some("tok")).unwrap();
    queue.enqueue(&MoodPayload::new(4, &["meh"]), None).unwrap();

    scheduler.run("mood-sync").await.unwrap();

    assert_eq!(rx.recv().await.unwrap(), ClientMessage::sync_complete(2));
    let sent = fetch.requests();
    assert_eq!(sent[0].header("authorization"), Some("Bearer tok"));
    assert_eq!(sent[1].header("authorization"), None);
  }

  #[tokio::test]
  async fn test_unknown_tag() {
    let (scheduler, _, _) = scheduler(Arc::new(ScriptedFetch::new()));
    assert!(matches!(
      scheduler.run("photo-sync").await,
      Err(EngineError::UnknownSyncTag(_))
    ));
  }

  /// Holds the first request until released.
  #[derive(Default)]
  struct GatedFetch {
    entered: Notify,
    release: Notify,
    held: AtomicBool,
    sent: AtomicUsize,
  }

  #[async_trait]
  impl Fetch for GatedFetch {
    async fn fetch(&self, _request: &Request) -> EngineResult<Response> {
      self.sent.fetch_add(1, Ordering::SeqCst);
      if !self.held.swap(true, Ordering::SeqCst) {
        self.entered.notify_one();
        self.release.notified().await;
      }
      Ok(Response::text(201, "created"))
    }
  }

  #[tokio::test]
  async fn test_trigger_during_pass_is_skipped_but_new_writes_still_drain() {
    let fetch = Arc::new(GatedFetch::default());
    let queue = Arc::new(MemoryMutationStore::new());
    let channel = Arc::new(ClientChannel::new());
    let mut rx = channel.subscribe();
    let scheduler = SyncScheduler::new(
      queue.clone(),
      fetch.clone(),
      channel,
      Url::parse("http://localhost:8000/api/mood/track").unwrap(),
      "mood-sync",
    );
    queue.enqueue(&MoodPayload::new(4, &["tired"]), None).unwrap();

    let first = scheduler.run("mood-sync");
    let second = async {
      fetch.entered.notified().await;
      queue.enqueue(&MoodPayload::new(8, &["happy"]), None).unwrap();
      let report = scheduler.run("mood-sync").await.unwrap();
      fetch.release.notify_one();
      report
    };
    let (first, second) = tokio::join!(first, second);

    assert!(second.skipped);
    assert_eq!(second.attempted, 0);
    let first = first.unwrap();
    assert_eq!(first.synced, 2);
    assert_eq!(fetch.sent.load(Ordering::SeqCst), 2);
    assert_eq!(queue.pending_count().unwrap(), 0);
    assert_eq!(rx.recv().await.unwrap(), ClientMessage::sync_complete(2));
  }

  #[tokio::test]
  async fn test_failed_entry_is_tried_once_per_pass() {
    let fetch = Arc::new(ScriptedFetch::new());
    fetch.go_offline();
    let (scheduler, queue, _) = scheduler(fetch.clone());
    queue.enqueue(&MoodPayload::new(3, &["low"]), None).unwrap();

    let report = scheduler.run("mood-sync").await.unwrap();
    assert_eq!(report.attempted, 1);
    assert_eq!(fetch.requests().len(), 1);
  }

  #[test]
  fn test_in_flight_guard_is_exclusive_per_tag() {
    let set = Mutex::new(HashSet::new());
    let first = InFlightGuard::acquire(&set, "mood-sync");
    assert!(first.is_some());
    assert!(InFlightGuard::acquire(&set, "mood-sync").is_none());
    assert!(InFlightGuard::acquire(&set, "other").is_some());
    drop(first);
    assert!(InFlightGuard::acquire(&set, "mood-sync").is_some());
  }
}
