//! SQLite persistence for session progress and settings, allowing both to
//! survive process restarts.

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use thiserror::Error;
use tokio::task;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage open failed: {0}")]
    OpenFailure(#[source] rusqlite::Error),

    #[error("storage read failed: {0}")]
    ReadFailure(#[source] rusqlite::Error),

    #[error("storage write failed: {0}")]
    WriteFailure(#[source] rusqlite::Error),

    #[error("storage task failed: {0}")]
    Task(#[from] task::JoinError),
}

/// Key-value store over a single SQLite table. Values are the serialized
/// records; callers own the format. All operations are a single attempt —
/// a failure is reported, never retried, and the in-memory state stays
/// authoritative for the running process.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (or create) a database at the given filesystem path.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(StoreError::OpenFailure)?;
        Self::migrate(&conn).map_err(StoreError::OpenFailure)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database. Useful for testing.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(StoreError::OpenFailure)?;
        Self::migrate(&conn).map_err(StoreError::OpenFailure)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create the schema if it does not already exist.
    fn migrate(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS records (
                key        TEXT PRIMARY KEY,
                value      TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );",
        )
    }

    /// Read the value stored under `key`, if any.
    pub async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let conn = Arc::clone(&self.conn);
        let key = key.to_string();
        task::spawn_blocking(move || {
            let conn = conn.lock().unwrap_or_else(|e| e.into_inner());
            conn.query_row(
                "SELECT value FROM records WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(StoreError::ReadFailure)
        })
        .await?
    }

    /// Upsert `value` under `key`.
    pub async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let conn = Arc::clone(&self.conn);
        let key = key.to_string();
        let value = value.to_string();
        task::spawn_blocking(move || {
            let conn = conn.lock().unwrap_or_else(|e| e.into_inner());
            conn.execute(
                "INSERT OR REPLACE INTO records (key, value, updated_at)
                 VALUES (?1, ?2, ?3)",
                params![key, value, Utc::now().to_rfc3339()],
            )
            .map(|_| ())
            .map_err(StoreError::WriteFailure)
        })
        .await?
    }

    /// Delete the row under `key`. Removing an absent key succeeds.
    pub async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let conn = Arc::clone(&self.conn);
        let key = key.to_string();
        task::spawn_blocking(move || {
            let conn = conn.lock().unwrap_or_else(|e| e.into_inner());
            conn.execute("DELETE FROM records WHERE key = ?1", params![key])
                .map(|_| ())
                .map_err(StoreError::WriteFailure)
        })
        .await?
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
