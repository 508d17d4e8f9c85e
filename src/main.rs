use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use moodsync::cache::SqlitePartitionStore;
use moodsync::http::{HttpFetcher, Request};
use moodsync::messaging::ClientMessage;
use moodsync::platform::LocalPlatform;
use moodsync::push::NotificationClick;
use moodsync::queue::{MoodPayload, SqliteMutationStore, WriteOutcome};
use moodsync::strategy::Interception;
use moodsync::{Config, Engine, Event, Outcome};

#[derive(Parser, Debug)]
#[command(name = "moodsync")]
#[command(about = "Offline-first caching and sync engine for the mood tracker")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/moodsync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Also log to stderr
  #[arg(short, long)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Pre-cache the static manifest and pre-warm API responses
  Install,
  /// Delete stale partitions
  Activate,
  /// Send a GET through the caching strategies
  Fetch { url: String },
  /// Submit a mood write, queuing it if the backend is unreachable
  Track {
    /// Mood payload as JSON, e.g. '{"score":7,"emotions":["calm"]}'
    json: String,
  },
  /// List pending queued writes
  Queue,
  /// Drop every queued write
  Purge,
  /// Replay queued writes now
  Sync {
    #[arg(long)]
    tag: Option<String>,
  },
  /// Render a push payload as a notification
  Push { json: Option<String> },
  /// Route a notification click
  Click {
    #[arg(long)]
    action: Option<String>,
    /// Notification data.url
    #[arg(long)]
    url: Option<String>,
  },
  /// Post a client message to the engine
  Message { json: String },
  /// List partitions and their entry counts
  Partitions,
}

fn init_tracing(log_dir: &Path, verbose: bool) -> WorkerGuard {
  let file_appender = tracing_appender::rolling::daily(log_dir, "moodsync.log");
  let (writer, guard) = tracing_appender::non_blocking(file_appender);
  let filter = EnvFilter::try_from_env("MOODSYNC_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

  let stderr = verbose.then(|| fmt::layer().with_writer(std::io::stderr));

  tracing_subscriber::registry()
    .with(filter)
    .with(fmt::layer().with_writer(writer).with_ansi(false))
    .with(stderr)
    .init();

  guard
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;
  let data_dir = config.data_dir()?;
  let _guard = init_tracing(&data_dir.join("logs"), args.verbose);

  let engine = Arc::new(Engine::new(
    &config,
    Arc::new(SqlitePartitionStore::open_at(&data_dir.join("cache.db"))?),
    Arc::new(SqliteMutationStore::open_at(&data_dir.join("queue.db"))?),
    Arc::new(HttpFetcher::new()?),
    Arc::new(LocalPlatform::new()),
  )?);

  let result = run(&engine, &config, args.command).await;
  engine.shutdown();
  result
}

async fn run(engine: &Arc<Engine>, config: &Config, command: Command) -> Result<()> {
  match command {
    Command::Install => {
      if let Outcome::Installed(report) = engine.spawn(Event::Install).await?? {
        println!(
          "Installed: {} static assets, {} API responses pre-warmed ({} failed)",
          report.precached, report.prewarmed, report.prewarm_failures
        );
      }
    }
    Command::Activate => {
      if let Outcome::Activated(report) = engine.spawn(Event::Activate).await?? {
        if report.deleted.is_empty() {
          println!("Activated: no stale partitions");
        } else {
          println!("Activated: deleted {}", report.deleted.join(", "));
        }
      }
    }
    Command::Fetch { url } => {
      let url = config
        .origin
        .join(&url)
        .map_err(|e| eyre!("Invalid url {}: {}", url, e))?;
      let outcome = engine
        .spawn(Event::Fetch(Request::get(url)))
        .await??;
      match outcome {
        Outcome::Fetched(Interception::Respond(result)) => {
          println!("{} ({:?})", result.data.status, result.source);
          println!("{}", String::from_utf8_lossy(&result.data.body));
        }
        Outcome::Fetched(Interception::Bypass) => println!("Not intercepted"),
        _ => {}
      }
    }
    Command::Track { json } => {
      let payload: MoodPayload =
        serde_json::from_str(&json).map_err(|e| eyre!("Invalid mood payload: {}", e))?;
      let token = Config::get_auth_token();
      match engine.writer().track_mood(payload, token.as_deref()).await {
        WriteOutcome::Submitted(response) => println!("Submitted ({})", response.status),
        WriteOutcome::Rejected(response) => println!(
          "Rejected ({}): {}",
          response.status,
          String::from_utf8_lossy(&response.body)
        ),
        WriteOutcome::Queued { id: Some(id) } => println!("Offline: queued as #{}", id),
        WriteOutcome::Queued { id: None } => println!("Offline: queued (not persisted)"),
      }
    }
    Command::Queue => {
      let pending = engine.queue().pending()?;
      if pending.is_empty() {
        println!("Queue is empty");
      }
      for entry in pending {
        println!(
          "#{} {} score={} emotions={}",
          entry.id,
          entry.created_at.format("%Y-%m-%d %H:%M:%S"),
          entry.payload.score,
          entry.payload.emotions.join(",")
        );
      }
    }
    Command::Purge => {
      println!("Purged {} entries", engine.queue().purge()?);
    }
    Command::Sync { tag } => {
      let tag = tag.unwrap_or_else(|| config.sync.tag.clone());
      let mut rx = engine.subscribe();
      if let Outcome::Synced(report) = engine.spawn(Event::Sync { tag }).await?? {
        println!(
          "Synced {} of {} ({} still pending)",
          report.synced,
          report.attempted,
          engine.queue().pending_count()?
        );
      }
      if let Ok(message) = rx.try_recv() {
        println!("{}", message.to_json()?);
      }
    }
    Command::Push { json } => {
      let payload = json.map(String::into_bytes);
      if let Outcome::Notified(notification) = engine.spawn(Event::Push(payload)).await?? {
        println!("{}", serde_json::to_string_pretty(&notification)?);
      }
    }
    Command::Click { action, url } => {
      let mut notification = engine.push().render(None);
      notification.data.url = url;
      let click = NotificationClick {
        action,
        notification,
      };
      if let Outcome::Clicked(outcome) = engine.spawn(Event::NotificationClick(click)).await?? {
        println!("{:?}", outcome);
      }
    }
    Command::Message { json } => {
      let message = ClientMessage::from_json(&json)?;
      if let Outcome::Messaged(outcome) = engine.spawn(Event::Message(message)).await?? {
        println!("{:?}", outcome);
      }
    }
    Command::Partitions => {
      let names = engine.partition_names();
      for name in engine.partitions().partitions()? {
        let marker = if names.is_current(&name) { "*" } else { " " };
        println!(
          "{} {} ({} entries)",
          marker,
          name,
          engine.partitions().urls(&name)?.len()
        );
      }
    }
  }

  Ok(())
}
