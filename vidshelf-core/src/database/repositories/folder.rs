use super::{DatabaseError, Repository};
use crate::database::models::WatchedFolder;
use crate::database::Database;
use rusqlite::{params, OptionalExtension};
use std::path::{Path, PathBuf};

pub struct FolderRepository {
    db: Database,
}

impl Repository for FolderRepository {
    fn database(&self) -> &Database {
        &self.db
    }
}

impl FolderRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Subscribe to `path`. Adding an already watched folder returns the existing entry.
    pub fn add(&self, path: &Path) -> Result<WatchedFolder, DatabaseError> {
        if let Some(existing) = self.find(path)? {
            return Ok(existing);
        }

        let folder = WatchedFolder::new(path.to_path_buf());
        let key = self.db.path_key(path);
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO watched_folders (path_key, path, name, video_count) VALUES (?1, ?2, ?3, 0)",
                params![key, folder.path.to_string_lossy(), folder.name],
            )?;
            Ok(())
        })?;

        Ok(folder)
    }

    pub fn find(&self, path: &Path) -> Result<Option<WatchedFolder>, DatabaseError> {
        let key = self.db.path_key(path);
        self.with_connection(|conn| {
            Ok(conn
                .query_row(
                    "SELECT path, name, video_count FROM watched_folders WHERE path_key = ?1",
                    params![key],
                    |row| {
                        Ok(WatchedFolder {
                            path: PathBuf::from(row.get::<_, String>(0)?),
                            name: row.get(1)?,
                            video_count: row.get::<_, i64>(2)?.max(0) as u64,
                        })
                    },
                )
                .optional()?)
        })
    }

    pub fn remove(&self, path: &Path) -> Result<bool, DatabaseError> {
        let key = self.db.path_key(path);
        self.with_connection(|conn| {
            let deleted = conn.execute(
                "DELETE FROM watched_folders WHERE path_key = ?1",
                params![key],
            )?;
            Ok(deleted > 0)
        })
    }

    /// Watched folders in subscription order.
    pub fn list(&self) -> Result<Vec<WatchedFolder>, DatabaseError> {
        self.with_connection(|conn| {
            let mut stmt =
                conn.prepare("SELECT path, name, video_count FROM watched_folders ORDER BY id")?;
            let rows = stmt.query_map([], |row| {
                Ok(WatchedFolder {
                    path: PathBuf::from(row.get::<_, String>(0)?),
                    name: row.get(1)?,
                    video_count: row.get::<_, i64>(2)?.max(0) as u64,
                })
            })?;

            let mut folders = Vec::new();
            for row in rows {
                folders.push(row?);
            }
            Ok(folders)
        })
    }

    pub fn update_count(&self, path: &Path, video_count: u64) -> Result<bool, DatabaseError> {
        let key = self.db.path_key(path);
        self.with_connection(|conn| {
            let updated = conn.execute(
                "UPDATE watched_folders SET video_count = ?1 WHERE path_key = ?2",
                params![video_count as i64, key],
            )?;
            Ok(updated > 0)
        })
    }
}
