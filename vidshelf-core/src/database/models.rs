use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

// Video record models
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoRecord {
    pub id: String,
    pub path: PathBuf,
    pub name: String,
    pub extension: String, // lowercase, leading dot
    pub size: u64,
    pub created_at: String,
    pub thumbnail_path: Option<PathBuf>,
    pub duration: Option<u64>, // seconds
    pub is_favorite: bool,
    pub tags: Vec<String>,
    pub last_played_time: Option<f64>,
    pub product_code: Option<String>,
}

impl VideoRecord {
    /// Copy the user-owned fields from persisted metadata onto the record.
    pub fn apply_metadata(&mut self, metadata: &VideoMetadata) {
        self.is_favorite = metadata.is_favorite;
        self.tags = metadata.tags.iter().cloned().collect();
        self.last_played_time = metadata.last_played_time;
        self.product_code = metadata.product_code.clone();
    }

    pub fn folder(&self) -> Option<&Path> {
        self.path.parent()
    }

    /// The same video after its file moved to `path`. Name, extension and
    /// size follow the new file; thumbnail and duration are kept.
    pub fn relocated(&self, path: &Path) -> VideoRecord {
        let mut record = self.clone();
        record.name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_default();
        record.extension = path
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
            .unwrap_or_default();
        if let Ok(metadata) = fs::metadata(path) {
            record.size = metadata.len();
        }
        record.path = path.to_path_buf();
        record
    }
}

/// The persisted, user-owned part of a video record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VideoMetadata {
    pub is_favorite: bool,
    pub tags: BTreeSet<String>,
    pub last_played_time: Option<f64>,
    pub product_code: Option<String>,
}

impl VideoMetadata {
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }

    /// Insert a tag after normalization. Returns false for blank or already present tags.
    pub fn add_tag(&mut self, tag: &str) -> bool {
        match normalize_tag(tag) {
            Some(tag) => self.tags.insert(tag),
            None => false,
        }
    }

    pub fn remove_tag(&mut self, tag: &str) -> bool {
        match normalize_tag(tag) {
            Some(tag) => self.tags.remove(&tag),
            None => false,
        }
    }
}

pub fn normalize_tag(tag: &str) -> Option<String> {
    let tag = tag.trim().to_lowercase();
    if tag.is_empty() {
        None
    } else {
        Some(tag)
    }
}

// Watched folder models
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchedFolder {
    pub path: PathBuf,
    pub name: String,
    pub video_count: u64,
}

impl WatchedFolder {
    pub fn new(path: PathBuf) -> Self {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| path.to_string_lossy().to_string());

        Self {
            path,
            name,
            video_count: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_are_normalized_and_deduplicated() {
        let mut metadata = VideoMetadata::default();

        assert!(metadata.add_tag("  Holiday "));
        assert!(!metadata.add_tag("holiday"));
        assert!(!metadata.add_tag("   "));
        assert!(metadata.add_tag("Beach"));

        let tags: Vec<_> = metadata.tags.iter().cloned().collect();
        assert_eq!(tags, vec!["beach".to_string(), "holiday".to_string()]);

        assert!(metadata.remove_tag("HOLIDAY"));
        assert!(!metadata.remove_tag("holiday"));
    }

    #[test]
    fn test_default_metadata_detection() {
        let mut metadata = VideoMetadata::default();
        assert!(metadata.is_default());

        metadata.is_favorite = true;
        assert!(!metadata.is_default());
    }

    #[test]
    fn test_metadata_blob_tolerates_missing_fields() {
        let metadata: VideoMetadata = serde_json::from_str(r#"{"isFavorite":true}"#).unwrap();
        assert!(metadata.is_favorite);
        assert!(metadata.tags.is_empty());
        assert_eq!(metadata.last_played_time, None);
    }

    #[test]
    fn test_watched_folder_name_from_path() {
        let folder = WatchedFolder::new(PathBuf::from("/media/videos/Holidays"));
        assert_eq!(folder.name, "Holidays");
        assert_eq!(folder.video_count, 0);
    }
}
