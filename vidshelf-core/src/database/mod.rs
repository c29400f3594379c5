pub mod models;
pub mod repositories;

use crate::config::PathCase;
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

pub use repositories::{
    ConfigRepository, FolderRepository, MetadataRepository, Repository, VideoRepository,
};

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database query error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database lock poisoned")]
    Poisoned,
}

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS video_metadata (
        path_key TEXT PRIMARY KEY NOT NULL,
        path TEXT NOT NULL,
        data TEXT NOT NULL,
        updated_at INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS watched_folders (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        path_key TEXT NOT NULL UNIQUE,
        path TEXT NOT NULL,
        name TEXT NOT NULL,
        video_count INTEGER NOT NULL DEFAULT 0
    );

    CREATE TABLE IF NOT EXISTS cached_videos (
        path_key TEXT PRIMARY KEY NOT NULL,
        folder_key TEXT NOT NULL,
        position INTEGER NOT NULL,
        data TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_cached_videos_folder ON cached_videos(folder_key);

    CREATE TABLE IF NOT EXISTS app_config (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL,
        updated_at INTEGER NOT NULL
    );
"#;

/// Shared handle to the persisted library tables.
///
/// Every read and write goes through one connection behind a mutex, so each
/// per-path blob is read and replaced atomically and concurrent writers are
/// serialized.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    path_case: PathCase,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, DatabaseError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path_case: PathCase::default(),
        })
    }

    pub fn with_path_case(mut self, path_case: PathCase) -> Self {
        self.path_case = path_case;
        self
    }

    pub fn path_case(&self) -> PathCase {
        self.path_case
    }

    pub(crate) fn path_key(&self, path: &Path) -> String {
        self.path_case.key(path)
    }

    pub(crate) fn with_connection<T, F>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&mut Connection) -> Result<T, DatabaseError>,
    {
        let mut conn = self.conn.lock().map_err(|_| DatabaseError::Poisoned)?;
        f(&mut conn)
    }

    pub fn metadata(&self) -> MetadataRepository {
        MetadataRepository::new(self.clone())
    }

    pub fn folders(&self) -> FolderRepository {
        FolderRepository::new(self.clone())
    }

    pub fn videos(&self) -> VideoRepository {
        VideoRepository::new(self.clone())
    }

    pub fn config(&self) -> ConfigRepository {
        ConfigRepository::new(self.clone())
    }
}

pub(crate) fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_database_connection() {
        let temp_dir = tempdir().unwrap();
        let db_path = temp_dir.path().join("nested").join("test.db");

        let db = Database::open(&db_path).unwrap();
        assert!(db_path.exists());

        let result: i64 = db
            .with_connection(|conn| Ok(conn.query_row("SELECT 1", [], |row| row.get(0))?))
            .unwrap();
        assert_eq!(result, 1);
    }

    #[test]
    fn test_schema_is_idempotent() {
        let temp_dir = tempdir().unwrap();
        let db_path = temp_dir.path().join("test.db");

        drop(Database::open(&db_path).unwrap());
        let db = Database::open(&db_path).unwrap();

        let tables: i64 = db
            .with_connection(|conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN \
                     ('video_metadata', 'watched_folders', 'cached_videos', 'app_config')",
                    [],
                    |row| row.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(tables, 4);
    }
}
