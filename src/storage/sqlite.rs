// SPDX-License-Identifier: MPL-2.0

use crate::storage::{StateStorage, StorageError};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

const SCHEMA: &str = r#"
PRAGMA user_version = 1;

CREATE TABLE IF NOT EXISTS kv (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at INTEGER NOT NULL
);
"#;

/// Slots stored in a SQLite file.
#[derive(Clone)]
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
    /// Open the default store at ~/.local/share/hashtribe/state.db
    pub fn open_default() -> Result<Self, StorageError> {
        Self::open(&Self::default_path()?)
    }

    /// Open or create the store at `path`.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StorageError::Path(format!("failed to create state dir: {}", e)))?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn default_path() -> Result<PathBuf, StorageError> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| StorageError::Path("could not find data directory".to_string()))?;
        Ok(data_dir.join("hashtribe").join("state.db"))
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("storage lock poisoned")
    }

    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }
}

impl StateStorage for SqliteStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let conn = self.conn();
        let value = conn
            .query_row("SELECT value FROM kv WHERE key = ?", [key], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let conn = self.conn();
        conn.execute(
            r#"
            INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
            params![key, value, Self::now()],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let conn = self.conn();
        conn.execute("DELETE FROM kv WHERE key = ?", [key])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_values_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("state.db");

        {
            let storage = SqliteStorage::open(&path).unwrap();
            storage.set("auth-storage", r#"{"user":null}"#).unwrap();
            storage.set("auth-storage", r#"{"user":{"id":"u1"}}"#).unwrap();
        }

        let storage = SqliteStorage::open(&path).unwrap();
        assert_eq!(
            storage.get("auth-storage").unwrap().as_deref(),
            Some(r#"{"user":{"id":"u1"}}"#)
        );

        storage.remove("auth-storage").unwrap();
        assert!(storage.get("auth-storage").unwrap().is_none());
    }

    #[test]
    fn test_missing_key_is_none() {
        let dir = TempDir::new().unwrap();
        let storage = SqliteStorage::open(&dir.path().join("state.db")).unwrap();
        assert!(storage.get("nothing").unwrap().is_none());
        storage.remove("nothing").unwrap();
    }
}
