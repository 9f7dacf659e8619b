//! SQLite-backed user directory and message log
//!
//! Single-file database holding the users and messages tables. The rusqlite
//! connection is !Send, so it sits behind a std::sync::Mutex; every call is
//! a short, compute-bound critical section.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::{MessageStore, StoreError, StoreResult, StoredMessage, UserDirectory, UserProfile};

/// SQLite store implementing both collaborator traits
pub struct SqliteStore {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl SqliteStore {
    /// Create or open the store under `data_dir`
    pub fn new(data_dir: &Path) -> StoreResult<Self> {
        let path = data_dir.join("agora.db");

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        }

        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            ",
        )
        .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT NOT NULL
            )",
            [],
        )
        .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                room TEXT NOT NULL,
                sender_id TEXT NOT NULL,
                content TEXT NOT NULL,
                timestamp TEXT NOT NULL
            )",
            [],
        )
        .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_messages_room ON messages(room, timestamp)",
            [],
        )
        .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        tracing::info!(path = ?path, "sqlite store opened");
        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    fn lock(&self) -> StoreResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("store mutex poisoned".to_string()))
    }

    /// Insert or update a user's display name
    pub fn upsert_user(&self, user_id: &str, username: &str) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO users (id, username) VALUES (?, ?)
             ON CONFLICT(id) DO UPDATE SET username = excluded.username",
            params![user_id, username],
        )
        .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(())
    }

    /// The database file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl UserDirectory for SqliteStore {
    fn lookup(&self, user_id: &str) -> StoreResult<UserProfile> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare_cached("SELECT id, username FROM users WHERE id = ?")
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        stmt.query_row(params![user_id], |row| {
            Ok(UserProfile {
                user_id: row.get(0)?,
                username: row.get(1)?,
            })
        })
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
            other => StoreError::Unavailable(other.to_string()),
        })
    }
}

impl MessageStore for SqliteStore {
    fn append(
        &self,
        room: &str,
        sender_id: &str,
        content: &str,
        timestamp: DateTime<Utc>,
    ) -> StoreResult<()> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare_cached(
                "INSERT INTO messages (room, sender_id, content, timestamp)
                 VALUES (?, ?, ?, ?)",
            )
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        stmt.execute(params![room, sender_id, content, timestamp.to_rfc3339()])
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(())
    }

    fn recent(&self, room: &str, limit: usize) -> StoreResult<Vec<StoredMessage>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare_cached(
                "SELECT room, sender_id, content, timestamp FROM messages
                 WHERE room = ?
                 ORDER BY timestamp DESC, id DESC
                 LIMIT ?",
            )
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let rows = stmt
            .query_map(params![room, limit as i64], |row| {
                Ok(StoredMessage {
                    room: row.get(0)?,
                    sender_id: row.get(1)?,
                    content: row.get(2)?,
                    timestamp: row.get(3)?,
                })
            })
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        Ok(rows.filter_map(Result::ok).collect())
    }
}
