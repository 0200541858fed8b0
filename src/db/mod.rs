pub mod schema;

use color_eyre::{eyre::eyre, Result};
use rusqlite::Connection;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::cache::SqliteStorage;

/// Namespace holding TTL cache entries.
pub const CACHE_NAMESPACE: &str = "cache";
/// Namespace holding the pending-write recovery queue.
pub const PENDING_NAMESPACE: &str = "pending";
/// Namespace holding the signed-in session.
pub const SESSION_NAMESPACE: &str = "session";

/// Shared handle to the local SQLite database.
#[derive(Clone)]
pub struct Database {
  conn: Arc<Mutex<Connection>>,
}

impl Database {
  /// Open or create the database for the given API endpoint at the default location.
  ///
  /// Each endpoint gets its own file so caches of different backends never mix.
  pub fn open(api_url: &str) -> Result<Self> {
    let path = Self::default_path(api_url)?;
    Self::open_at(&path)
  }

  /// Open or create the database at an explicit path.
  pub fn open_at(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create database directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open database at {}: {}", path.display(), e))?;

    let db = Self {
      conn: Arc::new(Mutex::new(conn)),
    };
    db.run_migrations()?;

    Ok(db)
  }

  /// Open a throwaway in-memory database.
  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory database: {}", e))?;
    let db = Self {
      conn: Arc::new(Mutex::new(conn)),
    };
    db.run_migrations()?;
    Ok(db)
  }

  /// Directory holding databases and log files.
  pub fn data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("stockroom"))
  }

  /// Get the default database path for an API endpoint.
  fn default_path(api_url: &str) -> Result<PathBuf> {
    Ok(Self::data_dir()?.join(format!("{}.db", endpoint_digest(api_url))))
  }

  /// Run database migrations
  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    conn
      .execute_batch(schema::SCHEMA)
      .map_err(|e| eyre!("Failed to run migrations: {}", e))?;
    Ok(())
  }

  /// Key-value store over one namespace of the database.
  pub fn storage(&self, namespace: &str, max_bytes: Option<usize>) -> SqliteStorage {
    SqliteStorage::new(Arc::clone(&self.conn), namespace, max_bytes)
  }
}

/// Short, stable file name for an endpoint URL.
fn endpoint_digest(api_url: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(api_url.trim().trim_end_matches('/').as_bytes());
  let digest = hex::encode(hasher.finalize());
  digest[..12].to_string()
}
