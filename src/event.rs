use crate::http::Request;
use crate::lifecycle::{ActivationReport, InstallReport};
use crate::messaging::ClientMessage;
use crate::push::{ClickOutcome, Notification, NotificationClick};
use crate::queue::WriteOutcome;
use crate::strategy::Interception;
use crate::sync::SyncReport;

/// Everything the platform can hand to the engine
#[derive(Debug, Clone)]
pub enum Event {
  /// New version installed: pre-warm partitions
  Install,
  /// New version took over: collect stale partitions, claim clients
  Activate,
  /// Outbound request from a client
  Fetch(Request),
  /// Deferred sync fired (connectivity restored)
  Sync { tag: String },
  /// Raw push payload, if any
  Push(Option<Vec<u8>>),
  /// User interacted with a notification
  NotificationClick(NotificationClick),
  /// Message posted by a client
  Message(ClientMessage),
}

impl Event {
  pub fn name(&self) -> &'static str {
    match self {
      Event::Install => "install",
      Event::Activate => "activate",
      Event::Fetch(_) => "fetch",
      Event::Sync { .. } => "sync",
      Event::Push(_) => "push",
      Event::NotificationClick(_) => "notificationclick",
      Event::Message(_) => "message",
    }
  }
}

/// What handling an event produced
#[derive(Debug, Clone)]
pub enum Outcome {
  Installed(InstallReport),
  Activated(ActivationReport),
  Fetched(Interception),
  Synced(SyncReport),
  Notified(Notification),
  Clicked(ClickOutcome),
  Messaged(MessageOutcome),
}

/// Result of an inbound client message
#[derive(Debug, Clone)]
pub enum MessageOutcome {
  /// Sync registration was requested; `registered` is false when the
  /// platform refused it
  SyncScheduled { tag: String, registered: bool },
  MoodCached(WriteOutcome),
  /// Outbound-only message received from a client
  Ignored,
}
