//! Cache storage trait and its in-memory and SQLite implementations.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::traits::CachedEntry;
use crate::interceptor::ResponseSnapshot;

/// Trait for cache storage backends.
///
/// Storage is partitioned into named generations. Every method is atomic on
/// its own; nothing is coordinated across calls.
pub trait CacheStorage: Send + Sync {
  /// Create the generation if it does not exist.
  fn open(&self, generation: &str) -> Result<()>;

  /// Whether the generation exists.
  fn has(&self, generation: &str) -> Result<bool>;

  /// All generation names, oldest first.
  fn keys(&self) -> Result<Vec<String>>;

  /// Delete a generation and every entry in it. Returns false if it did not exist.
  fn delete(&self, generation: &str) -> Result<bool>;

  /// Look up an entry in one generation.
  fn match_entry(&self, generation: &str, key: &str) -> Result<Option<CachedEntry>>;

  /// Store (or replace) a single entry, opening the generation if needed.
  fn put(&self, generation: &str, key: &str, response: &ResponseSnapshot) -> Result<()>;

  /// Store several entries at once: either all are written or none are.
  fn put_all(&self, generation: &str, entries: &[(String, ResponseSnapshot)]) -> Result<()>;

  /// Keys of every entry in a generation, sorted.
  fn entry_keys(&self, generation: &str) -> Result<Vec<String>>;
}

/// Ephemeral storage held in process memory.
#[derive(Debug, Default)]
pub struct MemoryStorage {
  generations: Mutex<Vec<(String, BTreeMap<String, CachedEntry>)>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> MutexGuard<'_, Vec<(String, BTreeMap<String, CachedEntry>)>> {
    self
      .generations
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
  }
}

fn generation_mut<'a>(
  generations: &'a mut Vec<(String, BTreeMap<String, CachedEntry>)>,
  name: &str,
) -> &'a mut BTreeMap<String, CachedEntry> {
  let index = match generations.iter().position(|(n, _)| n == name) {
    Some(index) => index,
    None => {
      generations.push((name.to_string(), BTreeMap::new()));
      generations.len() - 1
    }
  };
  &mut generations[index].1
}

impl CacheStorage for MemoryStorage {
  fn open(&self, generation: &str) -> Result<()> {
    generation_mut(&mut self.lock(), generation);
    Ok(())
  }

  fn has(&self, generation: &str) -> Result<bool> {
    Ok(self.lock().iter().any(|(n, _)| n == generation))
  }

  fn keys(&self) -> Result<Vec<String>> {
    Ok(self.lock().iter().map(|(n, _)| n.clone()).collect())
  }

  fn delete(&self, generation: &str) -> Result<bool> {
    let mut generations = self.lock();
    let before = generations.len();
    generations.retain(|(n, _)| n != generation);
    Ok(generations.len() != before)
  }

  fn match_entry(&self, generation: &str, key: &str) -> Result<Option<CachedEntry>> {
    Ok(
      self
        .lock()
        .iter()
        .find(|(n, _)| n == generation)
        .and_then(|(_, entries)| entries.get(key).cloned()),
    )
  }

  fn put(&self, generation: &str, key: &str, response: &ResponseSnapshot) -> Result<()> {
    generation_mut(&mut self.lock(), generation)
      .insert(key.to_string(), CachedEntry::new(response.clone()));
    Ok(())
  }

  fn put_all(&self, generation: &str, entries: &[(String, ResponseSnapshot)]) -> Result<()> {
    let mut generations = self.lock();
    let target = generation_mut(&mut generations, generation);
    for (key, response) in entries {
      target.insert(key.clone(), CachedEntry::new(response.clone()));
    }
    Ok(())
  }

  fn entry_keys(&self, generation: &str) -> Result<Vec<String>> {
    Ok(
      self
        .lock()
        .iter()
        .find(|(n, _)| n == generation)
        .map(|(_, entries)| entries.keys().cloned().collect())
        .unwrap_or_default(),
    )
  }
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the database at `path`.
  pub fn open_path(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// A private database that disappears when dropped.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;

    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;

    Ok(storage)
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    self
      .lock()?
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS generations (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS cache_entries (
    generation TEXT NOT NULL,
    cache_key TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (generation, cache_key)
);
"#;

const OPEN_GENERATION: &str = "INSERT OR IGNORE INTO generations (name) VALUES (?)";

const UPSERT_ENTRY: &str = "INSERT OR REPLACE INTO cache_entries
     (generation, cache_key, status, headers, body, cached_at)
     VALUES (?, ?, ?, ?, ?, datetime('now'))";

fn insert_entry(
  conn: &Connection,
  generation: &str,
  key: &str,
  response: &ResponseSnapshot,
) -> Result<()> {
  let headers = serde_json::to_string(&response.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

  conn
    .execute(
      UPSERT_ENTRY,
      params![generation, key, response.status, headers, response.body],
    )
    .map_err(|e| eyre!("Failed to store entry {}: {}", key, e))?;

  Ok(())
}

impl CacheStorage for SqliteStorage {
  fn open(&self, generation: &str) -> Result<()> {
    self
      .lock()?
      .execute(OPEN_GENERATION, params![generation])
      .map_err(|e| eyre!("Failed to open generation {}: {}", generation, e))?;
    Ok(())
  }

  fn has(&self, generation: &str) -> Result<bool> {
    let conn = self.lock()?;
    let found: Option<i64> = conn
      .query_row(
        "SELECT 1 FROM generations WHERE name = ?",
        params![generation],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up generation {}: {}", generation, e))?;

    Ok(found.is_some())
  }

  fn keys(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT name FROM generations ORDER BY rowid")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list generations: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read generation name: {}", e))?;

    Ok(names)
  }

  fn delete(&self, generation: &str) -> Result<bool> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "DELETE FROM cache_entries WHERE generation = ?",
      params![generation],
    )
    .map_err(|e| eyre!("Failed to delete entries of {}: {}", generation, e))?;

    let removed = tx
      .execute("DELETE FROM generations WHERE name = ?", params![generation])
      .map_err(|e| eyre!("Failed to delete generation {}: {}", generation, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  fn match_entry(&self, generation: &str, key: &str) -> Result<Option<CachedEntry>> {
    let conn = self.lock()?;
    let row: Option<(u16, String, Vec<u8>, String)> = conn
      .query_row(
        "SELECT status, headers, body, cached_at FROM cache_entries
         WHERE generation = ? AND cache_key = ?",
        params![generation, key],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up {}: {}", key, e))?;

    match row {
      Some((status, headers, body, cached_at_str)) => {
        let headers = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Failed to deserialize headers of {}: {}", key, e))?;
        Ok(Some(CachedEntry {
          response: ResponseSnapshot {
            status,
            headers,
            body,
          },
          cached_at: parse_datetime(&cached_at_str)?,
        }))
      }
      None => Ok(None),
    }
  }

  fn put(&self, generation: &str, key: &str, response: &ResponseSnapshot) -> Result<()> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(OPEN_GENERATION, params![generation])
      .map_err(|e| eyre!("Failed to open generation {}: {}", generation, e))?;
    insert_entry(&tx, generation, key, response)?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))
  }

  fn put_all(&self, generation: &str, entries: &[(String, ResponseSnapshot)]) -> Result<()> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(OPEN_GENERATION, params![generation])
      .map_err(|e| eyre!("Failed to open generation {}: {}", generation, e))?;
    for (key, response) in entries {
      insert_entry(&tx, generation, key, response)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))
  }

  fn entry_keys(&self, generation: &str) -> Result<Vec<String>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT cache_key FROM cache_entries WHERE generation = ? ORDER BY cache_key")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let keys = stmt
      .query_map(params![generation], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list entries of {}: {}", generation, e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read entry key: {}", e))?;

    Ok(keys)
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
