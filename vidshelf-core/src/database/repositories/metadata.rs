use super::{DatabaseError, Repository};
use crate::database::models::VideoMetadata;
use crate::database::{now_secs, Database};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};

/// Per-path user metadata (favorite, tags, last played, product code).
///
/// The store is the single source of truth for these fields. Reads of an
/// unknown path yield the zero-value default, and default values are never
/// written as rows.
pub struct MetadataRepository {
    db: Database,
}

impl Repository for MetadataRepository {
    fn database(&self) -> &Database {
        &self.db
    }
}

impl MetadataRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn get(&self, path: &Path) -> Result<VideoMetadata, DatabaseError> {
        let key = self.db.path_key(path);
        self.with_connection(|conn| read_blob(conn, &key))
    }

    /// Replace the whole metadata blob for `path`.
    pub fn set(&self, path: &Path, metadata: &VideoMetadata) -> Result<(), DatabaseError> {
        let key = self.db.path_key(path);
        self.with_connection(|conn| write_blob(conn, &key, path, metadata))
    }

    /// Read-modify-write under the store lock, so concurrent updates to the
    /// same path cannot drop each other's changes.
    pub fn update<F>(&self, path: &Path, f: F) -> Result<VideoMetadata, DatabaseError>
    where
        F: FnOnce(&mut VideoMetadata),
    {
        let key = self.db.path_key(path);
        self.with_connection(|conn| {
            let tx = conn.transaction()?;
            let mut metadata = read_blob(&tx, &key)?;
            f(&mut metadata);
            write_blob(&tx, &key, path, &metadata)?;
            tx.commit()?;
            Ok(metadata)
        })
    }

    pub fn remove(&self, path: &Path) -> Result<bool, DatabaseError> {
        let key = self.db.path_key(path);
        self.with_connection(|conn| {
            let deleted = conn.execute(
                "DELETE FROM video_metadata WHERE path_key = ?1",
                params![key],
            )?;
            Ok(deleted > 0)
        })
    }

    /// Move metadata from `old_path` to `new_path`. Only non-default metadata
    /// is carried over; returns whether anything moved.
    pub fn migrate(&self, old_path: &Path, new_path: &Path) -> Result<bool, DatabaseError> {
        let moves = [(old_path.to_path_buf(), new_path.to_path_buf())];
        Ok(self.migrate_many(&moves)? > 0)
    }

    /// Move metadata for a whole batch of `(old, new)` paths in one
    /// transaction. Every old blob is read before any row is touched, so a
    /// new path may be another entry's old path (swaps and chains).
    /// Returns how many non-default blobs moved.
    pub fn migrate_many(&self, moves: &[(PathBuf, PathBuf)]) -> Result<usize, DatabaseError> {
        self.with_connection(|conn| {
            let tx = conn.transaction()?;

            let mut carried = Vec::with_capacity(moves.len());
            for (old_path, new_path) in moves {
                let metadata = read_blob(&tx, &self.db.path_key(old_path))?;
                carried.push((new_path, metadata));
            }

            for (old_path, _) in moves {
                tx.execute(
                    "DELETE FROM video_metadata WHERE path_key = ?1",
                    params![self.db.path_key(old_path)],
                )?;
            }

            let mut moved = 0;
            for (new_path, metadata) in &carried {
                if metadata.is_default() {
                    continue;
                }
                write_blob(&tx, &self.db.path_key(new_path), new_path, metadata)?;
                moved += 1;
            }

            tx.commit()?;
            Ok(moved)
        })
    }

    pub fn count(&self) -> Result<i64, DatabaseError> {
        self.with_connection(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM video_metadata", [], |row| {
                row.get(0)
            })?)
        })
    }
}

fn read_blob(conn: &Connection, key: &str) -> Result<VideoMetadata, DatabaseError> {
    let data: Option<String> = conn
        .query_row(
            "SELECT data FROM video_metadata WHERE path_key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?;

    match data {
        Some(json) => Ok(serde_json::from_str(&json)?),
        None => Ok(VideoMetadata::default()),
    }
}

fn write_blob(
    conn: &Connection,
    key: &str,
    path: &Path,
    metadata: &VideoMetadata,
) -> Result<(), DatabaseError> {
    if metadata.is_default() {
        conn.execute("DELETE FROM video_metadata WHERE path_key = ?1", params![key])?;
        return Ok(());
    }

    let json = serde_json::to_string(metadata)?;
    conn.execute(
        "INSERT OR REPLACE INTO video_metadata (path_key, path, data, updated_at) \
         VALUES (?1, ?2, ?3, ?4)",
        params![key, path.to_string_lossy(), json, now_secs()],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PathCase;

    fn favorite() -> VideoMetadata {
        VideoMetadata {
            is_favorite: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_get_unknown_path_returns_default() {
        let db = Database::open_in_memory().unwrap();
        let metadata = db.metadata().get(Path::new("/v/missing.mp4")).unwrap();
        assert!(metadata.is_default());
    }

    #[test]
    fn test_set_and_get_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let repo = db.metadata();
        let path = Path::new("/v/a.mp4");

        let mut metadata = favorite();
        metadata.add_tag("Travel");
        metadata.last_played_time = Some(42.5);
        metadata.product_code = Some("ABC-123".to_string());
        repo.set(path, &metadata).unwrap();

        assert_eq!(repo.get(path).unwrap(), metadata);
    }

    #[test]
    fn test_default_metadata_is_not_stored() {
        let db = Database::open_in_memory().unwrap();
        let repo = db.metadata();
        let path = Path::new("/v/a.mp4");

        repo.set(path, &favorite()).unwrap();
        assert_eq!(repo.count().unwrap(), 1);

        repo.set(path, &VideoMetadata::default()).unwrap();
        assert_eq!(repo.count().unwrap(), 0);
    }

    #[test]
    fn test_update_composes_changes() {
        let db = Database::open_in_memory().unwrap();
        let repo = db.metadata();
        let path = Path::new("/v/a.mp4");

        repo.update(path, |m| m.is_favorite = true).unwrap();
        repo.update(path, |m| {
            m.add_tag("beach");
        })
        .unwrap();

        let metadata = repo.get(path).unwrap();
        assert!(metadata.is_favorite);
        assert!(metadata.tags.contains("beach"));
    }

    #[test]
    fn test_concurrent_updates_are_not_lost() {
        let db = Database::open_in_memory().unwrap();
        let path = PathBuf::from("/v/a.mp4");

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let repo = db.metadata();
                let path = path.clone();
                std::thread::spawn(move || {
                    repo.update(&path, |m| {
                        m.add_tag(&format!("tag{}", i));
                    })
                    .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(db.metadata().get(&path).unwrap().tags.len(), 8);
    }

    #[test]
    fn test_migrate_moves_metadata() {
        let db = Database::open_in_memory().unwrap();
        let repo = db.metadata();
        let old_path = Path::new("/v/old.mp4");
        let new_path = Path::new("/v/new.mp4");

        repo.set(old_path, &favorite()).unwrap();
        assert!(repo.migrate(old_path, new_path).unwrap());

        assert!(repo.get(new_path).unwrap().is_favorite);
        assert!(repo.get(old_path).unwrap().is_default());
    }

    #[test]
    fn test_migrate_default_metadata_is_noop() {
        let db = Database::open_in_memory().unwrap();
        let repo = db.metadata();

        assert!(!repo
            .migrate(Path::new("/v/old.mp4"), Path::new("/v/new.mp4"))
            .unwrap());
        assert_eq!(repo.count().unwrap(), 0);
    }

    #[test]
    fn test_migrate_many_handles_swaps_and_chains() {
        let db = Database::open_in_memory().unwrap();
        let repo = db.metadata();
        let a = PathBuf::from("/v/a.mp4");
        let one = PathBuf::from("/v/001.mp4");
        let two = PathBuf::from("/v/002.mp4");

        repo.set(&a, &favorite()).unwrap();
        repo.update(&one, |m| {
            m.add_tag("first");
        })
        .unwrap();
        repo.update(&two, |m| m.last_played_time = Some(9.0)).unwrap();

        // a -> 001, 001 -> 002, 002 -> a
        let moves = vec![
            (a.clone(), one.clone()),
            (one.clone(), two.clone()),
            (two.clone(), a.clone()),
        ];
        assert_eq!(repo.migrate_many(&moves).unwrap(), 3);

        let at_one = repo.get(&one).unwrap();
        assert!(at_one.is_favorite);
        assert!(at_one.tags.is_empty());
        let at_two = repo.get(&two).unwrap();
        assert!(at_two.tags.contains("first"));
        assert!(!at_two.is_favorite);
        assert_eq!(repo.get(&a).unwrap().last_played_time, Some(9.0));
        assert_eq!(repo.count().unwrap(), 3);
    }

    #[test]
    fn test_case_insensitive_keys() {
        let db = Database::open_in_memory()
            .unwrap()
            .with_path_case(PathCase::Insensitive);
        let repo = db.metadata();

        repo.set(Path::new("/Videos/Clip.MP4"), &favorite()).unwrap();
        assert!(repo.get(Path::new("/videos/clip.mp4")).unwrap().is_favorite);
    }

    #[test]
    fn test_case_sensitive_keys() {
        let db = Database::open_in_memory()
            .unwrap()
            .with_path_case(PathCase::Sensitive);
        let repo = db.metadata();

        repo.set(Path::new("/Videos/Clip.MP4"), &favorite()).unwrap();
        assert!(repo.get(Path::new("/videos/clip.mp4")).unwrap().is_default());
    }

    #[test]
    fn test_remove() {
        let db = Database::open_in_memory().unwrap();
        let repo = db.metadata();
        let path = Path::new("/v/a.mp4");

        repo.set(path, &favorite()).unwrap();
        assert!(repo.remove(path).unwrap());
        assert!(!repo.remove(path).unwrap());
        assert!(repo.get(path).unwrap().is_default());
    }
}
