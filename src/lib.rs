//! Offline-first caching and sync engine for the mood tracking app.
//!
//! The engine sits between the application and the network:
//! - classifies every outbound request and applies a caching strategy
//! - keeps failed mood writes in a durable queue and replays them when
//!   connectivity returns
//! - renders push notifications and routes clicks back to the app
//! - talks to open clients over a fire-and-forget message channel

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod http;
pub mod lifecycle;
pub mod messaging;
pub mod platform;
pub mod push;
pub mod queue;
pub mod router;
pub mod strategy;
pub mod sync;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use engine::Engine;
pub use error::{EngineError, EngineResult};
pub use event::{Event, MessageOutcome, Outcome};
