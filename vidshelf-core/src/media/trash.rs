use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use uuid::Uuid;

const HISTORY_FILE: &str = ".history.jsonl";

#[derive(Debug, Error)]
pub enum TrashError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("File not found: {path}")]
    NotFound { path: String },

    #[error("Trash history is empty")]
    EmptyHistory,

    #[error("Invalid trash index {index}; {len} record(s) available")]
    InvalidIndex { index: usize, len: usize },

    #[error("Refusing to overwrite existing file: {path}")]
    DestinationExists { path: String },

    #[error("Trash history lock poisoned")]
    Poisoned,
}

/// One line of the trash history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrashRecord {
    pub timestamp: String,
    pub original: PathBuf,
    pub trashed: PathBuf,
}

/// Recoverable delete: files are moved into the trash directory and every
/// move is appended to a JSONL history so it can be undone.
pub struct TrashBin {
    dir: PathBuf,
    history_lock: Mutex<()>,
}

impl TrashBin {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            history_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn history_file(&self) -> PathBuf {
        self.dir.join(HISTORY_FILE)
    }

    pub fn move_to_trash(&self, path: &Path) -> Result<TrashRecord, TrashError> {
        if !path.is_file() {
            return Err(TrashError::NotFound {
                path: path.to_string_lossy().to_string(),
            });
        }
        fs::create_dir_all(&self.dir)?;

        let now = Utc::now();
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        let mut trashed = self
            .dir
            .join(format!("{}_{}", now.format("%Y%m%dT%H%M%S%3f"), name));
        if trashed.exists() {
            trashed = self.dir.join(format!(
                "{}_{}_{}",
                now.format("%Y%m%dT%H%M%S%3f"),
                &Uuid::new_v4().simple().to_string()[..8],
                name
            ));
        }

        move_file(path, &trashed)?;

        let record = TrashRecord {
            timestamp: now.to_rfc3339(),
            original: path.to_path_buf(),
            trashed,
        };

        let _guard = self.history_lock.lock().map_err(|_| TrashError::Poisoned)?;
        let mut out = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.history_file())?;
        writeln!(out, "{}", serde_json::to_string(&record)?)?;

        log::info!(
            "Moved {} to trash as {}",
            record.original.display(),
            record.trashed.display()
        );
        Ok(record)
    }

    /// History records, oldest first. Malformed lines are skipped.
    pub fn list(&self) -> Result<Vec<TrashRecord>, TrashError> {
        let _guard = self.history_lock.lock().map_err(|_| TrashError::Poisoned)?;
        Ok(self.read_history()?.into_iter().map(|(record, _)| record).collect())
    }

    fn read_history(&self) -> Result<Vec<(TrashRecord, String)>, TrashError> {
        let f = match File::open(self.history_file()) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut stored = Vec::new();
        for (i, line) in BufReader::new(f).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<TrashRecord>(&line) {
                Ok(record) => stored.push((record, line)),
                Err(e) => log::warn!("Skipping malformed trash history entry {}: {}", i, e),
            }
        }
        Ok(stored)
    }

    /// Move a trashed file back to where it came from. Restores the latest
    /// record when `index` is `None`.
    pub fn restore(&self, index: Option<usize>) -> Result<TrashRecord, TrashError> {
        let _guard = self.history_lock.lock().map_err(|_| TrashError::Poisoned)?;
        let mut stored = self.read_history()?;
        if stored.is_empty() {
            return Err(TrashError::EmptyHistory);
        }

        let index = index.unwrap_or(stored.len() - 1);
        if index >= stored.len() {
            return Err(TrashError::InvalidIndex {
                index,
                len: stored.len(),
            });
        }

        let record = stored[index].0.clone();
        if !record.trashed.exists() {
            return Err(TrashError::NotFound {
                path: record.trashed.to_string_lossy().to_string(),
            });
        }
        if record.original.exists() {
            return Err(TrashError::DestinationExists {
                path: record.original.to_string_lossy().to_string(),
            });
        }
        if let Some(parent) = record.original.parent() {
            fs::create_dir_all(parent)?;
        }
        move_file(&record.trashed, &record.original)?;

        stored.remove(index);
        let remaining: Vec<String> = stored.into_iter().map(|(_, line)| line).collect();
        let content = if remaining.is_empty() {
            String::new()
        } else {
            remaining.join("\n") + "\n"
        };
        fs::write(self.history_file(), content)?;

        log::info!("Restored {} from trash", record.original.display());
        Ok(record)
    }
}

/// Rename, falling back to copy and remove when the trash lives on another filesystem.
fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            if fs::copy(from, to).is_err() {
                let _ = fs::remove_file(to);
                return Err(rename_err);
            }
            fs::remove_file(from)
        }
    }
}
