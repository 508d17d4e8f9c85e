//! Duplex, fire-and-forget channel between the engine and host clients.

use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::EngineResult;
use crate::queue::MoodPayload;

/// Messages exchanged with host clients, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
  /// Host asks for a named sync task to be registered.
  ScheduleSync { tag: String },
  /// Host asks for a just-created mood to be persisted immediately.
  CacheMood {
    mood: MoodPayload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    token: Option<String>,
  },
  /// Engine tells clients a sync pass replayed some writes.
  SyncComplete { data: SyncCompleteData },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCompleteData {
  #[serde(rename = "syncedMoods")]
  pub synced_moods: usize,
}

impl ClientMessage {
  pub fn sync_complete(synced_moods: usize) -> Self {
    Self::SyncComplete {
      data: SyncCompleteData { synced_moods },
    }
  }

  /// Decode a message; an unknown `type` is an error, not silently dropped.
  pub fn from_json(raw: &str) -> EngineResult<Self> {
    Ok(serde_json::from_str(raw)?)
  }

  pub fn to_json(&self) -> EngineResult<String> {
    Ok(serde_json::to_string(self)?)
  }
}

const CHANNEL_CAPACITY: usize = 64;

/// Outbound broadcast to every connected client.
///
/// Closing drops the sender: subscribers then see the channel end and
/// later broadcasts are discarded.
pub struct ClientChannel {
  tx: RwLock<Option<broadcast::Sender<ClientMessage>>>,
}

impl ClientChannel {
  pub fn new() -> Self {
    let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
    Self {
      tx: RwLock::new(Some(tx)),
    }
  }

  /// Connect a client. A closed channel yields an already-ended receiver.
  pub fn subscribe(&self) -> broadcast::Receiver<ClientMessage> {
    match self.tx.read().ok().and_then(|tx| tx.as_ref().map(|tx| tx.subscribe())) {
      Some(rx) => rx,
      None => broadcast::channel(1).1,
    }
  }

  /// Best-effort delivery; returns how many clients received it.
  pub fn broadcast(&self, message: ClientMessage) -> usize {
    let guard = match self.tx.read() {
      Ok(guard) => guard,
      Err(_) => return 0,
    };
    match guard.as_ref().map(|tx| tx.send(message)) {
      Some(Ok(receivers)) => receivers,
      // No connected clients is not a failure
      Some(Err(_)) | None => {
        debug!("Broadcast with no connected clients");
        0
      }
    }
  }

  pub fn close(&self) {
    if let Ok(mut tx) = self.tx.write() {
      tx.take();
    }
  }
}

impl Default for ClientChannel {
  fn default() -> Self {
    Self::new()
  }
}
