//! Blob store implementations: in-memory and SQLite.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::traits::{BlobStore, CachedResponse};
use crate::error::{Result, SyncError};

/// Blob store that lives and dies with the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
  partitions: Mutex<HashMap<String, HashMap<String, CachedResponse>>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  fn with_partitions<T>(
    &self,
    f: impl FnOnce(&mut HashMap<String, HashMap<String, CachedResponse>>) -> T,
  ) -> Result<T> {
    let mut partitions = self
      .partitions
      .lock()
      .map_err(|e| SyncError::Store(format!("Lock poisoned: {}", e)))?;
    Ok(f(&mut partitions))
  }
}

impl BlobStore for MemoryStore {
  fn partition_names(&self) -> Result<Vec<String>> {
    self.with_partitions(|p| p.keys().cloned().collect())
  }

  fn delete_partition(&self, partition: &str) -> Result<bool> {
    self.with_partitions(|p| p.remove(partition).is_some())
  }

  fn get(&self, partition: &str, key: &str) -> Result<Option<CachedResponse>> {
    self.with_partitions(|p| p.get(partition).and_then(|entries| entries.get(key).cloned()))
  }

  fn put(&self, partition: &str, key: &str, response: &CachedResponse) -> Result<()> {
    self.with_partitions(|p| {
      p.entry(partition.to_string())
        .or_default()
        .insert(key.to_string(), response.clone());
    })
  }

  fn len(&self, partition: &str) -> Result<usize> {
    self.with_partitions(|p| p.get(partition).map_or(0, HashMap::len))
  }
}

/// SQLite-backed blob store.
///
/// Entries survive a restart on disk, but the engine wipes its partition at
/// the start of every session, so nothing is ever served across sessions.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open the store at `path`, or at the default location.
  pub fn open(path: Option<&Path>) -> Result<Self> {
    let path = match path {
      Some(p) => p.to_path_buf(),
      None => Self::default_path()?,
    };

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| SyncError::Store(format!("Failed to create cache directory: {}", e)))?;
    }

    let conn = Connection::open(&path).map_err(|e| {
      SyncError::Store(format!(
        "Failed to open cache database at {}: {}",
        path.display(),
        e
      ))
    })?;

    Self::from_connection(conn)
  }

  /// Open a private in-memory database.
  pub fn open_in_memory() -> Result<Self> {
    Self::from_connection(Connection::open_in_memory()?)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| SyncError::Store("Could not determine data directory".to_string()))?;

    Ok(data_dir.join("pagesync").join("cache.db"))
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| SyncError::Store(format!("Failed to run cache migrations: {}", e)))?;
    Ok(())
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| SyncError::Store(format!("Lock poisoned: {}", e)))
  }
}

const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_entries (
    partition TEXT NOT NULL,
    cache_key TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    fetched_at TEXT NOT NULL,
    PRIMARY KEY (partition, cache_key)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_partition ON cache_entries(partition);
"#;

impl BlobStore for SqliteStore {
  fn partition_names(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT DISTINCT partition FROM cache_entries")
      .map_err(|e| SyncError::Store(format!("Failed to prepare query: {}", e)))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| SyncError::Store(format!("Failed to list partitions: {}", e)))?
      .collect::<std::result::Result<Vec<String>, _>>()?;

    Ok(names)
  }

  fn delete_partition(&self, partition: &str) -> Result<bool> {
    let conn = self.lock()?;
    let deleted = conn
      .execute(
        "DELETE FROM cache_entries WHERE partition = ?",
        params![partition],
      )
      .map_err(|e| SyncError::Store(format!("Failed to delete partition {}: {}", partition, e)))?;
    Ok(deleted > 0)
  }

  fn get(&self, partition: &str, key: &str) -> Result<Option<CachedResponse>> {
    let conn = self.lock()?;
    let row: Option<(u16, String, Vec<u8>, String)> = conn
      .query_row(
        "SELECT status, headers, body, fetched_at FROM cache_entries
         WHERE partition = ? AND cache_key = ?",
        params![partition, key],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()
      .map_err(|e| SyncError::Store(format!("Failed to read cache entry: {}", e)))?;

    let Some((status, headers, body, fetched_at)) = row else {
      return Ok(None);
    };

    let headers: BTreeMap<String, String> = serde_json::from_str(&headers)
      .map_err(|e| SyncError::Store(format!("Failed to deserialize headers: {}", e)))?;

    Ok(Some(CachedResponse {
      status,
      headers,
      body,
      fetched_at: parse_datetime(&fetched_at)?,
    }))
  }

  fn put(&self, partition: &str, key: &str, response: &CachedResponse) -> Result<()> {
    let conn = self.lock()?;
    let headers = serde_json::to_string(&response.headers)
      .map_err(|e| SyncError::Store(format!("Failed to serialize headers: {}", e)))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO cache_entries (partition, cache_key, status, headers, body, fetched_at)
         VALUES (?, ?, ?, ?, ?, ?)",
        params![
          partition,
          key,
          response.status,
          headers,
          response.body,
          response.fetched_at.to_rfc3339()
        ],
      )
      .map_err(|e| SyncError::Store(format!("Failed to store cache entry: {}", e)))?;

    Ok(())
  }

  fn len(&self, partition: &str) -> Result<usize> {
    let conn = self.lock()?;
    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM cache_entries WHERE partition = ?",
        params![partition],
        |row| row.get(0),
      )
      .map_err(|e| SyncError::Store(format!("Failed to count cache entries: {}", e)))?;
    Ok(count as usize)
  }
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| SyncError::Store(format!("Failed to parse datetime '{}': {}", s, e)))
}
