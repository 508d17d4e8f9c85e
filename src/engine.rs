//! The engine instance: owns partitions, queue and collaborators, and
//! dispatches platform events.

use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

use crate::cache::{CacheLayer, PartitionNames, PartitionStore};
use crate::config::Config;
use crate::error::{EngineError, EngineResult};
use crate::event::{Event, MessageOutcome, Outcome};
use crate::http::Fetch;
use crate::lifecycle::Lifecycle;
use crate::messaging::{ClientChannel, ClientMessage};
use crate::platform::Platform;
use crate::push::PushRouter;
use crate::queue::{MutationStore, OfflineWriter};
use crate::router::Router;
use crate::strategy::StrategyEngine;
use crate::sync::SyncScheduler;

/// One running engine version.
///
/// Construct once at process start with [`Engine::new`], share it as
/// `Arc<Engine>`, and call [`Engine::shutdown`] when a newer version takes
/// over. Operations already spawned keep running to completion.
pub struct Engine {
  partitions: Arc<dyn PartitionStore>,
  queue: Arc<dyn MutationStore>,
  platform: Arc<dyn Platform>,
  channel: Arc<ClientChannel>,
  names: PartitionNames,
  strategy: StrategyEngine,
  lifecycle: Lifecycle,
  scheduler: SyncScheduler,
  writer: OfflineWriter,
  push: PushRouter,
}

impl Engine {
  pub fn new(
    config: &Config,
    partitions: Arc<dyn PartitionStore>,
    queue: Arc<dyn MutationStore>,
    fetcher: Arc<dyn Fetch>,
    platform: Arc<dyn Platform>,
  ) -> EngineResult<Self> {
    let names = config.cache.partition_names();
    let cache: CacheLayer<dyn PartitionStore> = CacheLayer::new(Arc::clone(&partitions));
    let channel = Arc::new(ClientChannel::new());
    let track_endpoint = config
      .backend
      .join(&config.sync.track_path)
      .map_err(|e| EngineError::InvalidRequest(format!("{}: {}", config.sync.track_path, e)))?;

    let strategy = StrategyEngine::new(
      Router::new(&config.cache),
      cache.clone(),
      names.clone(),
      Arc::clone(&fetcher),
      config.origin.clone(),
    );
    let lifecycle = Lifecycle::new(
      cache,
      names.clone(),
      Arc::clone(&fetcher),
      Arc::clone(&platform),
      config.origin.clone(),
      config.cache.static_manifest.clone(),
      config.cache.api_prewarm.clone(),
    );
    let scheduler = SyncScheduler::new(
      Arc::clone(&queue),
      Arc::clone(&fetcher),
      Arc::clone(&channel),
      track_endpoint.clone(),
      config.sync.tag.clone(),
    );
    let writer = OfflineWriter::new(fetcher, Arc::clone(&queue), track_endpoint);

    info!(
      static_partition = %names.static_assets,
      dynamic_partition = %names.dynamic,
      api_partition = %names.api,
      "Engine initialized"
    );

    Ok(Self {
      partitions,
      queue,
      platform,
      channel,
      names,
      strategy,
      lifecycle,
      scheduler,
      writer,
      push: PushRouter::new(config.notifications.clone()),
    })
  }

  /// Handle one event to completion.
  pub async fn handle(&self, event: Event) -> EngineResult<Outcome> {
    debug!(event = event.name(), "Handling event");
    match event {
      Event::Install => Ok(Outcome::Installed(self.lifecycle.install().await?)),
      Event::Activate => Ok(Outcome::Activated(self.lifecycle.activate().await?)),
      Event::Fetch(request) => Ok(Outcome::Fetched(self.strategy.handle(&request).await?)),
      Event::Sync { tag } => Ok(Outcome::Synced(self.scheduler.run(&tag).await?)),
      Event::Push(payload) => Ok(Outcome::Notified(
        self
          .push
          .show(self.platform.as_ref(), payload.as_deref())
          .await?,
      )),
      Event::NotificationClick(click) => Ok(Outcome::Clicked(
        self.push.click(self.platform.as_ref(), &click).await?,
      )),
      Event::Message(message) => Ok(Outcome::Messaged(self.handle_message(message).await)),
    }
  }

  /// Run one event as its own task. The platform must keep the engine
  /// alive until the returned handle completes.
  pub fn spawn(self: &Arc<Self>, event: Event) -> JoinHandle<EngineResult<Outcome>> {
    let engine = Arc::clone(self);
    let span = tracing::info_span!("event", name = event.name());
    tokio::spawn(async move { engine.handle(event).await }.instrument(span))
  }

  async fn handle_message(&self, message: ClientMessage) -> MessageOutcome {
    match message {
      ClientMessage::ScheduleSync { tag } => {
        let registered = match self.platform.register_sync(&tag).await {
          Ok(()) => true,
          Err(e) => {
            warn!(tag = %tag, error = %e, "Sync registration failed");
            false
          }
        };
        MessageOutcome::SyncScheduled { tag, registered }
      }
      ClientMessage::CacheMood { mood, token } => {
        MessageOutcome::MoodCached(self.writer.queue(&mood, token.as_deref()))
      }
      ClientMessage::SyncComplete { .. } => {
        debug!("Ignoring SYNC_COMPLETE sent by a client");
        MessageOutcome::Ignored
      }
    }
  }

  /// Connect a client to outbound broadcasts.
  pub fn subscribe(&self) -> broadcast::Receiver<ClientMessage> {
    self.channel.subscribe()
  }

  /// Host write path with offline fallback.
  pub fn writer(&self) -> &OfflineWriter {
    &self.writer
  }

  pub fn push(&self) -> &PushRouter {
    &self.push
  }

  pub fn queue(&self) -> &dyn MutationStore {
    self.queue.as_ref()
  }

  pub fn partitions(&self) -> &dyn PartitionStore {
    self.partitions.as_ref()
  }

  pub fn partition_names(&self) -> &PartitionNames {
    &self.names
  }

  /// Stop broadcasting to clients. Connected receivers see the channel end.
  pub fn shutdown(&self) {
    info!("Engine shutting down");
    self.channel.close();
  }
}
