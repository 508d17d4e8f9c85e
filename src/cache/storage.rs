//! Partition storage trait with SQLite and in-memory implementations.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use super::traits::ResponseSnapshot;
use crate::error::{EngineError, EngineResult};

/// Trait for partition storage backends.
///
/// Writes are keyed by `(partition, request_key)`: a put replaces the whole
/// snapshot, so concurrent writers never race on a read-modify-write.
pub trait PartitionStore: Send + Sync {
  /// Create the partition if it does not exist yet.
  fn open_partition(&self, name: &str) -> EngineResult<()>;

  /// Names of every partition currently present.
  fn partitions(&self) -> EngineResult<Vec<String>>;

  /// Delete a partition and all of its entries. Returns whether it existed.
  fn delete_partition(&self, name: &str) -> EngineResult<bool>;

  /// Look up a snapshot by request key.
  fn get(&self, partition: &str, request_key: &str) -> EngineResult<Option<ResponseSnapshot>>;

  /// Store (or replace) a snapshot, creating the partition on demand.
  fn put(&self, partition: &str, request_key: &str, snapshot: &ResponseSnapshot)
    -> EngineResult<()>;

  /// Store several snapshots in one partition: either all of them land or
  /// none do.
  fn put_all(&self, partition: &str, entries: &[(String, ResponseSnapshot)]) -> EngineResult<()>;

  /// URLs of the entries in a partition.
  fn urls(&self, partition: &str) -> EngineResult<Vec<String>>;
}

/// SQLite-based partition storage.
pub struct SqlitePartitionStore {
  conn: Mutex<Connection>,
}

impl SqlitePartitionStore {
  /// Open (or create) the store at `path`.
  pub fn open_at(path: &Path) -> EngineResult<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| EngineError::storage("Failed to create cache directory", e))?;
    }

    let conn = Connection::open(path).map_err(|e| {
      EngineError::storage(&format!("Failed to open cache database at {}", path.display()), e)
    })?;

    Self::with_connection(conn)
  }

  /// Volatile store, mostly for tests.
  pub fn open_in_memory() -> EngineResult<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| EngineError::storage("Failed to open in-memory cache", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> EngineResult<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  fn run_migrations(&self) -> EngineResult<()> {
    let conn = self.lock()?;
    conn
      .execute_batch(PARTITION_SCHEMA)
      .map_err(|e| EngineError::storage("Failed to run cache migrations", e))
  }

  fn lock(&self) -> EngineResult<std::sync::MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| EngineError::storage("Lock poisoned", e))
  }
}

/// Schema for partition tables.
const PARTITION_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS partitions (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL
);

-- One snapshot per request key per partition
CREATE TABLE IF NOT EXISTS partition_entries (
    partition TEXT NOT NULL,
    request_key TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL,
    PRIMARY KEY (partition, request_key)
);

CREATE INDEX IF NOT EXISTS idx_partition_entries_partition
    ON partition_entries(partition);
"#;

impl PartitionStore for SqlitePartitionStore {
  fn open_partition(&self, name: &str) -> EngineResult<()> {
    let conn = self.lock()?;
    conn
      .execute(
        "INSERT OR IGNORE INTO partitions (name, created_at) VALUES (?, ?)",
        params![name, Utc::now().to_rfc3339()],
      )
      .map_err(|e| EngineError::storage("Failed to create partition", e))?;
    Ok(())
  }

  fn partitions(&self) -> EngineResult<Vec<String>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT name FROM partitions ORDER BY name")
      .map_err(|e| EngineError::storage("Failed to prepare query", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| EngineError::storage("Failed to list partitions", e))?
      .collect::<Result<Vec<String>, _>>()
      .map_err(|e| EngineError::storage("Failed to read partition name", e))?;

    Ok(names)
  }

  fn delete_partition(&self, name: &str) -> EngineResult<bool> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| EngineError::storage("Failed to begin transaction", e))?;

    tx.execute(
      "DELETE FROM partition_entries WHERE partition = ?",
      params![name],
    )
    .map_err(|e| EngineError::storage("Failed to delete partition entries", e))?;

    let removed = tx
      .execute("DELETE FROM partitions WHERE name = ?", params![name])
      .map_err(|e| EngineError::storage("Failed to delete partition", e))?;

    tx.commit()
      .map_err(|e| EngineError::storage("Failed to commit transaction", e))?;

    Ok(removed > 0)
  }

  fn get(&self, partition: &str, request_key: &str) -> EngineResult<Option<ResponseSnapshot>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare(
        "SELECT url, status, headers, body, cached_at FROM partition_entries
         WHERE partition = ? AND request_key = ?",
      )
      .map_err(|e| EngineError::storage("Failed to prepare query", e))?;

    let row: Option<(String, u16, String, Vec<u8>, String)> = stmt
      .query_row(params![partition, request_key], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
      })
      .optional()
      .map_err(|e| EngineError::storage("Failed to read snapshot", e))?;

    match row {
      Some((url, status, headers, body, cached_at)) => Ok(Some(ResponseSnapshot {
        url,
        status,
        headers: serde_json::from_str(&headers)?,
        body,
        cached_at: parse_datetime(&cached_at)?,
      })),
      None => Ok(None),
    }
  }

  fn put(
    &self,
    partition: &str,
    request_key: &str,
    snapshot: &ResponseSnapshot,
  ) -> EngineResult<()> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| EngineError::storage("Failed to begin transaction", e))?;

    write_entry(&tx, partition, request_key, snapshot)?;

    tx.commit()
      .map_err(|e| EngineError::storage("Failed to commit transaction", e))?;

    Ok(())
  }

  fn put_all(&self, partition: &str, entries: &[(String, ResponseSnapshot)]) -> EngineResult<()> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| EngineError::storage("Failed to begin transaction", e))?;

    // Dropping the transaction on error rolls every row back
    for (request_key, snapshot) in entries {
      write_entry(&tx, partition, request_key, snapshot)?;
    }

    tx.commit()
      .map_err(|e| EngineError::storage("Failed to commit transaction", e))?;

    Ok(())
  }

  fn urls(&self, partition: &str) -> EngineResult<Vec<String>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT url FROM partition_entries WHERE partition = ? ORDER BY url")
      .map_err(|e| EngineError::storage("Failed to prepare query", e))?;

    let urls = stmt
      .query_map(params![partition], |row| row.get(0))
      .map_err(|e| EngineError::storage("Failed to list entries", e))?
      .collect::<Result<Vec<String>, _>>()
      .map_err(|e| EngineError::storage("Failed to read entry url", e))?;

    Ok(urls)
  }
}

fn write_entry(
  conn: &Connection,
  partition: &str,
  request_key: &str,
  snapshot: &ResponseSnapshot,
) -> EngineResult<()> {
  let headers = serde_json::to_string(&snapshot.headers)?;

  conn
    .execute(
      "INSERT OR IGNORE INTO partitions (name, created_at) VALUES (?, ?)",
      params![partition, Utc::now().to_rfc3339()],
    )
    .map_err(|e| EngineError::storage("Failed to create partition", e))?;

  conn
    .execute(
      "INSERT OR REPLACE INTO partition_entries
         (partition, request_key, url, status, headers, body, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, ?)",
      params![
        partition,
        request_key,
        snapshot.url,
        snapshot.status,
        headers,
        snapshot.body,
        snapshot.cached_at.to_rfc3339()
      ],
    )
    .map_err(|e| EngineError::storage("Failed to store snapshot", e))?;

  Ok(())
}

/// Partition storage that lives only as long as the process.
#[derive(Default)]
pub struct MemoryPartitionStore {
  partitions: Mutex<BTreeMap<String, BTreeMap<String, ResponseSnapshot>>>,
}

impl MemoryPartitionStore {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(
    &self,
  ) -> EngineResult<std::sync::MutexGuard<'_, BTreeMap<String, BTreeMap<String, ResponseSnapshot>>>>
  {
    self
      .partitions
      .lock()
      .map_err(|e| EngineError::storage("Lock poisoned", e))
  }
}

impl PartitionStore for MemoryPartitionStore {
  fn open_partition(&self, name: &str) -> EngineResult<()> {
    self.lock()?.entry(name.to_string()).or_default();
    Ok(())
  }

  fn partitions(&self) -> EngineResult<Vec<String>> {
    Ok(self.lock()?.keys().cloned().collect())
  }

  fn delete_partition(&self, name: &str) -> EngineResult<bool> {
    Ok(self.lock()?.remove(name).is_some())
  }

  fn get(&self, partition: &str, request_key: &str) -> EngineResult<Option<ResponseSnapshot>> {
    Ok(
      self
        .lock()?
        .get(partition)
        .and_then(|entries| entries.get(request_key))
        .cloned(),
    )
  }

  fn put(
    &self,
    partition: &str,
    request_key: &str,
    snapshot: &ResponseSnapshot,
  ) -> EngineResult<()> {
    self
      .lock()?
      .entry(partition.to_string())
      .or_default()
      .insert(request_key.to_string(), snapshot.clone());
    Ok(())
  }

  fn put_all(&self, partition: &str, entries: &[(String, ResponseSnapshot)]) -> EngineResult<()> {
    let mut partitions = self.lock()?;
    let target = partitions.entry(partition.to_string()).or_default();
    for (request_key, snapshot) in entries {
      target.insert(request_key.clone(), snapshot.clone());
    }
    Ok(())
  }

  fn urls(&self, partition: &str) -> EngineResult<Vec<String>> {
    let mut urls: Vec<String> = self
      .lock()?
      .get(partition)
      .map(|entries| entries.values().map(|s| s.url.clone()).collect())
      .unwrap_or_default();
    urls.sort();
    Ok(urls)
  }
}

/// Parse an RFC 3339 timestamp written by this module.
fn parse_datetime(s: &str) -> EngineResult<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| EngineError::storage(&format!("Failed to parse datetime '{}'", s), e))
}
