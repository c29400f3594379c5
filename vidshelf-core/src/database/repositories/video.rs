use super::{DatabaseError, Repository};
use crate::database::models::VideoRecord;
use crate::database::Database;
use rusqlite::{params, OptionalExtension};
use std::path::{Path, PathBuf};

/// Snapshot of the last scan results, used only to render something before
/// the first scan of a session completes.
pub struct VideoRepository {
    db: Database,
}

impl Repository for VideoRepository {
    fn database(&self) -> &Database {
        &self.db
    }
}

impl VideoRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Replace every cached record of `folder` with `records`, keeping their order.
    pub fn replace_folder(
        &self,
        folder: &Path,
        records: &[VideoRecord],
    ) -> Result<(), DatabaseError> {
        let folder_key = self.db.path_key(folder);
        let rows = records
            .iter()
            .map(|record| -> Result<(String, String), DatabaseError> {
                Ok((self.db.path_key(&record.path), serde_json::to_string(record)?))
            })
            .collect::<Result<Vec<_>, _>>()?;

        self.with_connection(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM cached_videos WHERE folder_key = ?1",
                params![folder_key],
            )?;
            {
                let mut stmt = tx.prepare(
                    "INSERT OR REPLACE INTO cached_videos (path_key, folder_key, position, data) \
                     VALUES (?1, ?2, ?3, ?4)",
                )?;
                for (position, (path_key, data)) in rows.iter().enumerate() {
                    stmt.execute(params![path_key, folder_key, position as i64, data])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
    }

    pub fn load_all(&self) -> Result<Vec<VideoRecord>, DatabaseError> {
        self.with_connection(|conn| {
            let mut stmt =
                conn.prepare("SELECT data FROM cached_videos ORDER BY folder_key, position")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

            let mut records = Vec::new();
            for row in rows {
                let data = row?;
                match serde_json::from_str::<VideoRecord>(&data) {
                    Ok(record) => records.push(record),
                    Err(e) => log::warn!("Skipping unreadable cached video record: {}", e),
                }
            }
            Ok(records)
        })
    }

    pub fn remove_path(&self, path: &Path) -> Result<bool, DatabaseError> {
        let key = self.db.path_key(path);
        self.with_connection(|conn| {
            let deleted = conn.execute(
                "DELETE FROM cached_videos WHERE path_key = ?1",
                params![key],
            )?;
            Ok(deleted > 0)
        })
    }

    /// Follow files that moved on disk. Each `(old, new)` pair with a cached
    /// row gets a row at `new` in the same folder. With `keep_sources` the old
    /// rows stay and the new ones are appended; otherwise they take the old
    /// rows' places. All old rows are read before any is written, so a new
    /// path may be another pair's old path. Returns how many rows were written.
    pub fn relocate_many(
        &self,
        moves: &[(PathBuf, PathBuf)],
        keep_sources: bool,
    ) -> Result<usize, DatabaseError> {
        self.with_connection(|conn| {
            let tx = conn.transaction()?;

            let mut found = Vec::with_capacity(moves.len());
            {
                let mut select = tx.prepare(
                    "SELECT folder_key, position, data FROM cached_videos WHERE path_key = ?1",
                )?;
                for (old_path, new_path) in moves {
                    let row = select
                        .query_row(params![self.db.path_key(old_path)], |row| {
                            Ok((
                                row.get::<_, String>(0)?,
                                row.get::<_, i64>(1)?,
                                row.get::<_, String>(2)?,
                            ))
                        })
                        .optional()?;
                    if let Some((folder_key, position, data)) = row {
                        let record: VideoRecord = serde_json::from_str(&data)?;
                        found.push((old_path, folder_key, position, record.relocated(new_path)));
                    }
                }
            }

            if !keep_sources {
                for (old_path, ..) in &found {
                    tx.execute(
                        "DELETE FROM cached_videos WHERE path_key = ?1",
                        params![self.db.path_key(old_path)],
                    )?;
                }
            }

            for (_, folder_key, position, record) in &found {
                let position = if keep_sources {
                    tx.query_row(
                        "SELECT COALESCE(MAX(position), -1) + 1 FROM cached_videos WHERE folder_key = ?1",
                        params![folder_key],
                        |row| row.get::<_, i64>(0),
                    )?
                } else {
                    *position
                };
                tx.execute(
                    "INSERT OR REPLACE INTO cached_videos (path_key, folder_key, position, data) \
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        self.db.path_key(&record.path),
                        folder_key,
                        position,
                        serde_json::to_string(record)?
                    ],
                )?;
            }

            tx.commit()?;
            Ok(found.len())
        })
    }

    pub fn remove_folder(&self, folder: &Path) -> Result<usize, DatabaseError> {
        let key = self.db.path_key(folder);
        self.with_connection(|conn| {
            Ok(conn.execute(
                "DELETE FROM cached_videos WHERE folder_key = ?1",
                params![key],
            )?)
        })
    }
}
