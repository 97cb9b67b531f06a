//! Key-value persistence for client-side policy state.
//!
//! The install-prompt coordinator keeps its record in whatever the embedding
//! surface uses for per-profile storage (a cookie jar in the browser build).
//! Here that dependency is an explicit [`KvStore`] so the policy can run
//! against SQLite in production and a HashMap in tests.

use chrono::{DateTime, Duration, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

/// Minimal persistent key-value interface with optional expiry.
pub trait KvStore: Send + Sync {
  /// Read a value. Expired values read as absent.
  fn get(&self, key: &str) -> Result<Option<String>>;

  /// Write a value, optionally expiring after `ttl`.
  fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;
}

/// SQLite-backed key-value store.
pub struct SqliteKv {
  conn: Mutex<Connection>,
}

const KV_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    expires_at TEXT
);
"#;

impl SqliteKv {
  /// Open (or create) the store at the default location.
  pub fn open() -> Result<Self> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;
    let path = data_dir.join("tatame").join("client-state.db");

    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create state directory: {}", e))?;
    }

    Self::open_at(&path)
  }

  /// Open (or create) the store at an explicit path.
  pub fn open_at(path: &Path) -> Result<Self> {
    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open state database at {}: {}", path.display(), e))?;

    conn
      .execute_batch(KV_SCHEMA)
      .map_err(|e| eyre!("Failed to run state migrations: {}", e))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }
}

impl KvStore for SqliteKv {
  fn get(&self, key: &str) -> Result<Option<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT value, expires_at FROM kv WHERE key = ?")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let row: Option<(String, Option<String>)> = stmt
      .query_row(params![key], |row| Ok((row.get(0)?, row.get(1)?)))
      .ok();

    match row {
      Some((value, expires_at)) => {
        if let Some(expires_at) = expires_at {
          let expires_at: DateTime<Utc> = expires_at
            .parse()
            .map_err(|e| eyre!("Bad expiry on key {}: {}", key, e))?;
          if expires_at <= Utc::now() {
            return Ok(None);
          }
        }
        Ok(Some(value))
      }
      None => Ok(None),
    }
  }

  fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let expires_at = ttl.map(|ttl| (Utc::now() + ttl).to_rfc3339());

    conn
      .execute(
        "INSERT OR REPLACE INTO kv (key, value, expires_at) VALUES (?, ?, ?)",
        params![key, value, expires_at],
      )
      .map_err(|e| eyre!("Failed to write key {}: {}", key, e))?;

    Ok(())
  }
}

/// In-memory key-value store for tests.
#[derive(Default)]
pub struct MemoryKv {
  values: Mutex<HashMap<String, (String, Option<DateTime<Utc>>)>>,
}

impl MemoryKv {
  pub fn new() -> Self {
    Self::default()
  }
}

impl KvStore for MemoryKv {
  fn get(&self, key: &str) -> Result<Option<String>> {
    let values = self
      .values
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    Ok(values.get(key).and_then(|(value, expires_at)| {
      match expires_at {
        Some(expires_at) if *expires_at <= Utc::now() => None,
        _ => Some(value.clone()),
      }
    }))
  }

  fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
    let mut values = self
      .values
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let expires_at = ttl.map(|ttl| Utc::now() + ttl);
    values.insert(key.to_string(), (value.to_string(), expires_at));
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn exercise_basic(store: &dyn KvStore) {
    assert!(store.get("missing").unwrap().is_none());

    store.set("belt", "roxa", None).unwrap();
    assert_eq!(store.get("belt").unwrap().as_deref(), Some("roxa"));

    store.set("belt", "marrom", None).unwrap();
    assert_eq!(store.get("belt").unwrap().as_deref(), Some("marrom"));
  }

  fn exercise_expiry(store: &dyn KvStore) {
    store
      .set("ephemeral", "x", Some(Duration::seconds(-1)))
      .unwrap();
    assert!(store.get("ephemeral").unwrap().is_none());

    store
      .set("durable", "y", Some(Duration::days(30)))
      .unwrap();
    assert_eq!(store.get("durable").unwrap().as_deref(), Some("y"));
  }

  #[test]
  fn test_memory_basic() {
    exercise_basic(&MemoryKv::new());
  }

  #[test]
  fn test_memory_expiry() {
    exercise_expiry(&MemoryKv::new());
  }

  #[test]
  fn test_sqlite_basic() {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteKv::open_at(&dir.path().join("state.db")).unwrap();
    exercise_basic(&store);
  }

  #[test]
  fn test_sqlite_expiry() {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteKv::open_at(&dir.path().join("state.db")).unwrap();
    exercise_expiry(&store);
  }

  #[test]
  fn test_sqlite_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.db");

    {
      let store = SqliteKv::open_at(&path).unwrap();
      store.set("academy", "alliance", None).unwrap();
    }

    let store = SqliteKv::open_at(&path).unwrap();
    assert_eq!(store.get("academy").unwrap().as_deref(), Some("alliance"));
  }
}
