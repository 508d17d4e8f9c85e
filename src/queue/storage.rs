//! Durable mutation queue storage.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use super::types::{EntryStatus, MoodPayload, MutationEntry};
use crate::error::{EngineError, EngineResult};

/// Trait for mutation queue backends.
///
/// The queue holds only work: entries leave it once the server accepts them.
pub trait MutationStore: Send + Sync {
  /// Persist a new pending entry and return it with its assigned id.
  fn enqueue(&self, payload: &MoodPayload, auth_token: Option<&str>)
    -> EngineResult<MutationEntry>;

  /// Pending entries in creation order.
  fn pending(&self) -> EngineResult<Vec<MutationEntry>>;

  fn get(&self, id: i64) -> EngineResult<Option<MutationEntry>>;

  /// Remove an entry. Removing an absent id is not an error.
  fn remove(&self, id: i64) -> EngineResult<bool>;

  /// Hide an entry from replay without removing it.
  fn mark_synced(&self, id: i64) -> EngineResult<bool>;

  /// Drop every entry, pending or not. Returns how many were dropped.
  fn purge(&self) -> EngineResult<usize>;

  fn pending_count(&self) -> EngineResult<usize> {
    Ok(self.pending()?.len())
  }
}

/// SQLite-backed queue; survives process restarts.
pub struct SqliteMutationStore {
  conn: Mutex<Connection>,
}

impl SqliteMutationStore {
  pub fn open_at(path: &Path) -> EngineResult<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| EngineError::storage("Failed to create queue directory", e))?;
    }

    let conn = Connection::open(path).map_err(|e| {
      EngineError::storage(&format!("Failed to open queue database at {}", path.display()), e)
    })?;

    Self::with_connection(conn)
  }

  pub fn open_in_memory() -> EngineResult<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| EngineError::storage("Failed to open in-memory queue", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> EngineResult<Self> {
    conn
      .execute_batch(QUEUE_SCHEMA)
      .map_err(|e| EngineError::storage("Failed to run queue migrations", e))?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn lock(&self) -> EngineResult<std::sync::MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| EngineError::storage("Lock poisoned", e))
  }
}

/// AUTOINCREMENT keeps ids monotonic even after deletes.
const QUEUE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS mutation_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    payload TEXT NOT NULL,
    created_at TEXT NOT NULL,
    auth_token TEXT,
    status TEXT NOT NULL DEFAULT 'pending'
);

CREATE INDEX IF NOT EXISTS idx_mutation_queue_status ON mutation_queue(status, id);
"#;

const ENTRY_COLUMNS: &str = "id, payload, created_at, auth_token, status";

type RawEntry = (i64, String, String, Option<String>, String);

fn read_raw(row: &Row<'_>) -> rusqlite::Result<RawEntry> {
  Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn decode((id, payload, created_at, auth_token, status): RawEntry) -> EngineResult<MutationEntry> {
  Ok(MutationEntry {
    id,
    payload: serde_json::from_str(&payload)?,
    created_at: DateTime::parse_from_rfc3339(&created_at)
      .map(|dt| dt.with_timezone(&Utc))
      .map_err(|e| EngineError::storage(&format!("Bad created_at on entry {}", id), e))?,
    auth_token,
    status: EntryStatus::parse(&status)
      .ok_or_else(|| EngineError::Storage(format!("Bad status '{}' on entry {}", status, id)))?,
  })
}

impl MutationStore for SqliteMutationStore {
  fn enqueue(
    &self,
    payload: &MoodPayload,
    auth_token: Option<&str>,
  ) -> EngineResult<MutationEntry> {
    let conn = self.lock()?;
    let created_at = Utc::now();
    let data = serde_json::to_string(payload)?;

    conn
      .execute(
        "INSERT INTO mutation_queue (payload, created_at, auth_token, status)
         VALUES (?, ?, ?, ?)",
        params![
          data,
          created_at.to_rfc3339(),
          auth_token,
          EntryStatus::Pending.as_str()
        ],
      )
      .map_err(|e| EngineError::storage("Failed to enqueue mutation", e))?;

    Ok(MutationEntry {
      id: conn.last_insert_rowid(),
      payload: payload.clone(),
      created_at,
      auth_token: auth_token.map(String::from),
      status: EntryStatus::Pending,
    })
  }

  fn pending(&self) -> EngineResult<Vec<MutationEntry>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare(&format!(
        "SELECT {} FROM mutation_queue WHERE status = ? ORDER BY id",
        ENTRY_COLUMNS
      ))
      .map_err(|e| EngineError::storage("Failed to prepare query", e))?;

    let rows = stmt
      .query_map(params![EntryStatus::Pending.as_str()], read_raw)
      .map_err(|e| EngineError::storage("Failed to read queue", e))?
      .collect::<Result<Vec<_>, _>>()
      .map_err(|e| EngineError::storage("Failed to read queue row", e))?;

    rows.into_iter().map(decode).collect()
  }

  fn get(&self, id: i64) -> EngineResult<Option<MutationEntry>> {
    let conn = self.lock()?;
    let raw = conn
      .query_row(
        &format!("SELECT {} FROM mutation_queue WHERE id = ?", ENTRY_COLUMNS),
        params![id],
        read_raw,
      )
      .optional()
      .map_err(|e| EngineError::storage("Failed to read queue entry", e))?;

    raw.map(decode).transpose()
  }

  fn remove(&self, id: i64) -> EngineResult<bool> {
    let conn = self.lock()?;
    let removed = conn
      .execute("DELETE FROM mutation_queue WHERE id = ?", params![id])
      .map_err(|e| EngineError::storage("Failed to remove queue entry", e))?;
    Ok(removed > 0)
  }

  fn mark_synced(&self, id: i64) -> EngineResult<bool> {
    let conn = self.lock()?;
    let updated = conn
      .execute(
        "UPDATE mutation_queue SET status = ? WHERE id = ?",
        params![EntryStatus::Synced.as_str(), id],
      )
      .map_err(|e| EngineError::storage("Failed to update queue entry", e))?;
    Ok(updated > 0)
  }

  fn purge(&self) -> EngineResult<usize> {
    let conn = self.lock()?;
    conn
      .execute("DELETE FROM mutation_queue", [])
      .map_err(|e| EngineError::storage("Failed to purge queue", e))
  }

  fn pending_count(&self) -> EngineResult<usize> {
    let conn = self.lock()?;
    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM mutation_queue WHERE status = ?",
        params![EntryStatus::Pending.as_str()],
        |row| row.get(0),
      )
      .map_err(|e| EngineError::storage("Failed to count queue", e))?;
    Ok(count as usize)
  }
}

/// Volatile queue, for tests and dry runs.
#[derive(Default)]
pub struct MemoryMutationStore {
  inner: Mutex<MemoryQueue>,
}

#[derive(Default)]
struct MemoryQueue {
  last_id: i64,
  entries: BTreeMap<i64, MutationEntry>,
}

impl MemoryMutationStore {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> EngineResult<std::sync::MutexGuard<'_, MemoryQueue>> {
    self
      .inner
      .lock()
      .map_err(|e| EngineError::storage("Lock poisoned", e))
  }
}

impl MutationStore for MemoryMutationStore {
  fn enqueue(
    &self,
    payload: &MoodPayload,
    auth_token: Option<&str>,
  ) -> EngineResult<MutationEntry> {
    let mut queue = self.lock()?;
    queue.last_id += 1;
    let entry = MutationEntry {
      id: queue.last_id,
      payload: payload.clone(),
      created_at: Utc::now(),
      auth_token: auth_token.map(String::from),
      status: EntryStatus::Pending,
    };
    queue.entries.insert(entry.id, entry.clone());
    Ok(entry)
  }

  fn pending(&self) -> EngineResult<Vec<MutationEntry>> {
    Ok(
      self
        .lock()?
        .entries
        .values()
        .filter(|e| e.status == EntryStatus::Pending)
        .cloned()
        .collect(),
    )
  }

  fn get(&self, id: i64) -> EngineResult<Option<MutationEntry>> {
    Ok(self.lock()?.entries.get(&id).cloned())
  }

  fn remove(&self, id: i64) -> EngineResult<bool> {
    Ok(self.lock()?.entries.remove(&id).is_some())
  }

  fn mark_synced(&self, id: i64) -> EngineResult<bool> {
    match self.lock()?.entries.get_mut(&id) {
      Some(entry) => {
        entry.status = EntryStatus::Synced;
        Ok(true)
      }
      None => Ok(false),
    }
  }

  fn purge(&self) -> EngineResult<usize> {
    let mut queue = self.lock()?;
    let count = queue.entries.len();
    queue.entries.clear();
    Ok(count)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn exercise(store: &dyn MutationStore) {
    let first = store
      .enqueue(&MoodPayload::new(2, &["sad"]), Some("token-a"))
      .unwrap();
    let second = store.enqueue(&MoodPayload::new(7, &["calm"]), None).unwrap();
    let third = store
      .enqueue(&MoodPayload::new(5, &["tired", "okay"]), None)
      .unwrap();

    assert!(first.id < second.id && second.id < third.id);
    let ids: Vec<i64> = store.pending().unwrap().iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![first.id, second.id, third.id]);
    assert_eq!(store.pending_count().unwrap(), 3);

    let loaded = store.get(first.id).unwrap().unwrap();
    assert_eq!(loaded.payload, MoodPayload::new(2, &["sad"]));
    assert_eq!(loaded.auth_token.as_deref(), Some("token-a"));

    assert!(store.mark_synced(second.id).unwrap());
    let ids: Vec<i64> = store.pending().unwrap().iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![first.id, third.id]);

    assert!(store.remove(first.id).unwrap());
    assert!(!store.remove(first.id).unwrap());
    assert!(store.get(first.id).unwrap().is_none());

    // Ids are never reused
    let fourth = store.enqueue(&MoodPayload::new(6, &["fine"]), None).unwrap();
    assert!(fourth.id > third.id);

    assert_eq!(store.purge().unwrap(), 3);
    assert_eq!(store.pending_count().unwrap(), 0);
  }

  #[test]
  fn test_sqlite_queue() {
    exercise(&SqliteMutationStore::open_in_memory().unwrap());
  }

  #[test]
  fn test_memory_queue() {
    exercise(&MemoryMutationStore::new());
  }

  #[test]
  fn test_sqlite_queue_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queue.db");

    let mut payload = MoodPayload::new(3, &["anxious"]);
    payload.notes = Some("rough commute".to_string());
    payload.weather = Some("rain".to_string());

    let id = {
      let store = SqliteMutationStore::open_at(&path).unwrap();
      store.enqueue(&payload, Some("token")).unwrap().id
    };

    let store = SqliteMutationStore::open_at(&path).unwrap();
    let pending = store.pending().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, id);
    assert_eq!(pending[0].payload, payload);
    assert_eq!(pending[0].status, EntryStatus::Pending);
  }
}
