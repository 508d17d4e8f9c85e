//! Durable queue of mood writes that could not reach the backend.
//!
//! Entries are created by the host when a write fails for lack of
//! connectivity, survive restarts, and are removed by the sync scheduler
//! once the backend accepts them.

mod storage;
mod types;
mod writer;

pub use storage::{MemoryMutationStore, MutationStore, SqliteMutationStore};
pub use types::{EntryStatus, MoodPayload, MutationEntry};
pub use writer::{build_track_request, OfflineWriter, WriteOutcome};
