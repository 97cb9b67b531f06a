//! Cache store trait and the SQLite / in-memory backends.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use super::traits::{CachedSnapshot, RequestKey, ResponseSnapshot};

/// Trait for named, versioned cache stores.
///
/// A store maps request identities to response snapshots. The controller
/// keeps exactly one store per application version and purges the rest on
/// activation.
pub trait CacheStore: Send + Sync {
  /// Store a single snapshot. Best-effort: callers may ignore failures.
  fn put(&self, store: &str, key: &RequestKey, snapshot: &ResponseSnapshot) -> Result<()>;

  /// Store a batch of snapshots atomically: either every entry commits or
  /// none do.
  fn put_all(&self, store: &str, entries: &[(RequestKey, ResponseSnapshot)]) -> Result<()>;

  /// Look up a snapshot by request identity.
  fn get(&self, store: &str, key: &RequestKey) -> Result<Option<CachedSnapshot>>;

  /// Names of all stores currently on disk.
  fn list_stores(&self) -> Result<Vec<String>>;

  /// Delete a store and all of its entries.
  fn delete_store(&self, store: &str) -> Result<()>;

  /// Number of entries in a store. Zero if the store does not exist.
  fn entry_count(&self, store: &str) -> Result<u64>;

  /// Record the hash of the shell entry document for update checks.
  fn set_shell_hash(&self, store: &str, hash: &str) -> Result<()>;

  /// The recorded shell hash, if any.
  fn shell_hash(&self, store: &str) -> Result<Option<String>>;
}

/// SQLite-backed cache store.
pub struct SqliteCacheStore {
  conn: Mutex<Connection>,
}

impl SqliteCacheStore {
  /// Open (or create) the store database at the default location.
  pub fn open() -> Result<Self> {
    let path = Self::default_path()?;

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    Self::open_at(&path)
  }

  /// Open (or create) the store database at an explicit path.
  pub fn open_at(path: &Path) -> Result<Self> {
    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  /// Get the default database path.
  fn default_path() -> Result<std::path::PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("tatame").join("shell-cache.db"))
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for the shell cache.
const CACHE_SCHEMA: &str = r#"
-- One row per named (versioned) store
CREATE TABLE IF NOT EXISTS shell_stores (
    name TEXT PRIMARY KEY,
    shell_hash TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Response snapshots, keyed by request identity within a store
CREATE TABLE IF NOT EXISTS shell_entries (
    store_name TEXT NOT NULL,
    entry_key TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    snapshot BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (store_name, entry_key)
);

CREATE INDEX IF NOT EXISTS idx_shell_entries_store ON shell_entries(store_name);
"#;

impl CacheStore for SqliteCacheStore {
  fn put(&self, store: &str, key: &RequestKey, snapshot: &ResponseSnapshot) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let data =
      serde_json::to_vec(snapshot).map_err(|e| eyre!("Failed to serialize snapshot: {}", e))?;

    conn
      .execute(
        "INSERT OR IGNORE INTO shell_stores (name) VALUES (?)",
        params![store],
      )
      .map_err(|e| eyre!("Failed to register store: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO shell_entries (store_name, entry_key, method, url, snapshot, cached_at)
         VALUES (?, ?, ?, ?, ?, datetime('now'))",
        params![store, key.entry_key(), key.method.as_str(), key.url, data],
      )
      .map_err(|e| eyre!("Failed to store snapshot: {}", e))?;

    Ok(())
  }

  fn put_all(&self, store: &str, entries: &[(RequestKey, ResponseSnapshot)]) -> Result<()> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    // Dropping the transaction without commit rolls everything back, which
    // is what keeps the bulk populate all-or-nothing.
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "INSERT OR IGNORE INTO shell_stores (name) VALUES (?)",
      params![store],
    )
    .map_err(|e| eyre!("Failed to register store: {}", e))?;

    for (key, snapshot) in entries {
      let data =
        serde_json::to_vec(snapshot).map_err(|e| eyre!("Failed to serialize snapshot: {}", e))?;

      tx.execute(
        "INSERT OR REPLACE INTO shell_entries (store_name, entry_key, method, url, snapshot, cached_at)
         VALUES (?, ?, ?, ?, ?, datetime('now'))",
        params![store, key.entry_key(), key.method.as_str(), key.url, data],
      )
      .map_err(|e| eyre!("Failed to store snapshot: {}", e))?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn get(&self, store: &str, key: &RequestKey) -> Result<Option<CachedSnapshot>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT snapshot, cached_at FROM shell_entries
         WHERE store_name = ? AND entry_key = ?",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let result: Option<(Vec<u8>, String)> = stmt
      .query_row(params![store, key.entry_key()], |row| {
        Ok((row.get(0)?, row.get(1)?))
      })
      .ok();

    match result {
      Some((data, cached_at_str)) => {
        let snapshot: ResponseSnapshot = serde_json::from_slice(&data)
          .map_err(|e| eyre!("Failed to deserialize snapshot: {}", e))?;
        let cached_at = parse_datetime(&cached_at_str)?;
        Ok(Some(CachedSnapshot {
          snapshot,
          cached_at,
        }))
      }
      None => Ok(None),
    }
  }

  fn list_stores(&self) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT name FROM shell_stores ORDER BY name")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names: Vec<String> = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list stores: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    Ok(names)
  }

  fn delete_store(&self, store: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "DELETE FROM shell_entries WHERE store_name = ?",
        params![store],
      )
      .map_err(|e| eyre!("Failed to delete store entries: {}", e))?;

    conn
      .execute("DELETE FROM shell_stores WHERE name = ?", params![store])
      .map_err(|e| eyre!("Failed to delete store: {}", e))?;

    Ok(())
  }

  fn entry_count(&self, store: &str) -> Result<u64> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let count: u64 = conn
      .query_row(
        "SELECT COUNT(*) FROM shell_entries WHERE store_name = ?",
        params![store],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count entries: {}", e))?;

    Ok(count)
  }

  fn set_shell_hash(&self, store: &str, hash: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT INTO shell_stores (name, shell_hash) VALUES (?, ?)
         ON CONFLICT(name) DO UPDATE SET shell_hash = excluded.shell_hash",
        params![store, hash],
      )
      .map_err(|e| eyre!("Failed to record shell hash: {}", e))?;

    Ok(())
  }

  fn shell_hash(&self, store: &str) -> Result<Option<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT shell_hash FROM shell_stores WHERE name = ?")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let result: Option<Option<String>> = stmt.query_row(params![store], |row| row.get(0)).ok();

    Ok(result.flatten())
  }
}

/// In-memory cache store. Used by tests and ephemeral runs where nothing
/// should touch disk.
#[derive(Default)]
pub struct MemoryCacheStore {
  stores: Mutex<HashMap<String, MemoryStoreData>>,
}

#[derive(Default)]
struct MemoryStoreData {
  entries: HashMap<String, (ResponseSnapshot, DateTime<Utc>)>,
  shell_hash: Option<String>,
}

impl MemoryCacheStore {
  pub fn new() -> Self {
    Self::default()
  }

  fn with_stores<R>(&self, f: impl FnOnce(&mut HashMap<String, MemoryStoreData>) -> R) -> Result<R> {
    let mut stores = self
      .stores
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(f(&mut stores))
  }
}

impl CacheStore for MemoryCacheStore {
  fn put(&self, store: &str, key: &RequestKey, snapshot: &ResponseSnapshot) -> Result<()> {
    self.with_stores(|stores| {
      stores
        .entry(store.to_string())
        .or_default()
        .entries
        .insert(key.entry_key(), (snapshot.clone(), Utc::now()));
    })
  }

  fn put_all(&self, store: &str, entries: &[(RequestKey, ResponseSnapshot)]) -> Result<()> {
    self.with_stores(|stores| {
      let data = stores.entry(store.to_string()).or_default();
      for (key, snapshot) in entries {
        data
          .entries
          .insert(key.entry_key(), (snapshot.clone(), Utc::now()));
      }
    })
  }

  fn get(&self, store: &str, key: &RequestKey) -> Result<Option<CachedSnapshot>> {
    self.with_stores(|stores| {
      stores.get(store).and_then(|data| {
        data
          .entries
          .get(&key.entry_key())
          .map(|(snapshot, cached_at)| CachedSnapshot {
            snapshot: snapshot.clone(),
            cached_at: *cached_at,
          })
      })
    })
  }

  fn list_stores(&self) -> Result<Vec<String>> {
    self.with_stores(|stores| {
      let mut names: Vec<String> = stores.keys().cloned().collect();
      names.sort();
      names
    })
  }

  fn delete_store(&self, store: &str) -> Result<()> {
    self.with_stores(|stores| {
      stores.remove(store);
    })
  }

  fn entry_count(&self, store: &str) -> Result<u64> {
    self.with_stores(|stores| {
      stores
        .get(store)
        .map(|data| data.entries.len() as u64)
        .unwrap_or(0)
    })
  }

  fn set_shell_hash(&self, store: &str, hash: &str) -> Result<()> {
    self.with_stores(|stores| {
      stores.entry(store.to_string()).or_default().shell_hash = Some(hash.to_string());
    })
  }

  fn shell_hash(&self, store: &str) -> Result<Option<String>> {
    self.with_stores(|stores| stores.get(store).and_then(|data| data.shell_hash.clone()))
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
