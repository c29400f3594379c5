use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const APP_DIR_NAME: &str = "vidshelf";
pub const DATA_DIR_ENV: &str = "VIDSHELF_DATA_DIR";

/// How paths are compared when they are used as identity keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathCase {
    /// Follow the host platform: insensitive on Windows and macOS.
    #[default]
    Auto,
    Sensitive,
    Insensitive,
}

impl PathCase {
    pub fn is_insensitive(self) -> bool {
        match self {
            PathCase::Auto => cfg!(any(windows, target_os = "macos")),
            PathCase::Sensitive => false,
            PathCase::Insensitive => true,
        }
    }

    /// Identity key for a path under this policy.
    pub fn key(self, path: &Path) -> String {
        let raw = path.to_string_lossy();
        if self.is_insensitive() {
            raw.to_lowercase()
        } else {
            raw.into_owned()
        }
    }

    pub fn same(self, a: &Path, b: &Path) -> bool {
        self.key(a) == self.key(b)
    }
}

impl fmt::Display for PathCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            PathCase::Auto => "auto",
            PathCase::Sensitive => "sensitive",
            PathCase::Insensitive => "insensitive",
        };
        f.write_str(value)
    }
}

impl FromStr for PathCase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(PathCase::Auto),
            "sensitive" => Ok(PathCase::Sensitive),
            "insensitive" => Ok(PathCase::Insensitive),
            other => Err(format!("unknown path case policy: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub supported_extensions: Vec<String>,
    pub thumbnail_width: u32,
    pub thumbnail_seek_percent: u8,
    pub thumbnail_schema_suffix: String,
    pub ffmpeg_command: String,
    pub ffprobe_command: String,
    pub tool_timeout_secs: u64,
    pub rename_sequence_width: usize,
    pub path_case: PathCase,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            supported_extensions: [
                ".mp4", ".mkv", ".mov", ".webm", ".avi", ".wmv", ".flv", ".m4v", ".mpg", ".mpeg",
                ".ts", ".3gp",
            ]
            .iter()
            .map(|ext| ext.to_string())
            .collect(),
            thumbnail_width: 320,
            thumbnail_seek_percent: 20,
            thumbnail_schema_suffix: "_v2".to_string(),
            ffmpeg_command: "ffmpeg".to_string(),
            ffprobe_command: "ffprobe".to_string(),
            tool_timeout_secs: 60,
            rename_sequence_width: 3,
            path_case: PathCase::Auto,
        }
    }
}

impl AppConfig {
    /// Lowercase, dot-prefixed extension of `path` when it is a supported video type.
    pub fn video_extension(&self, path: &Path) -> Option<String> {
        let ext = format!(".{}", path.extension()?.to_string_lossy().to_lowercase());
        self.supported_extensions
            .iter()
            .any(|supported| supported.eq_ignore_ascii_case(&ext))
            .then_some(ext)
    }

    pub fn is_supported(&self, path: &Path) -> bool {
        self.video_extension(path).is_some()
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs.max(1))
    }
}

/// On-disk layout of the application data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPaths {
    pub root: PathBuf,
    pub database: PathBuf,
    pub thumbnails: PathBuf,
    pub trash: PathBuf,
}

impl DataPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            database: root.join("vidshelf.db"),
            thumbnails: root.join("thumbnails"),
            trash: root.join("trash"),
            root,
        }
    }

    /// Resolve from an explicit override, then `VIDSHELF_DATA_DIR`, then the platform data dir.
    pub fn resolve(override_dir: Option<PathBuf>) -> std::io::Result<Self> {
        let root = override_dir
            .or_else(|| std::env::var_os(DATA_DIR_ENV).map(PathBuf::from))
            .or_else(|| dirs::data_dir().map(|dir| dir.join(APP_DIR_NAME)))
            .or_else(|| dirs::home_dir().map(|dir| dir.join(format!(".{}", APP_DIR_NAME))))
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "Could not determine a data directory",
                )
            })?;

        Ok(Self::new(root))
    }

    pub fn ensure(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.root)?;
        fs::create_dir_all(&self.thumbnails)?;
        fs::create_dir_all(&self.trash)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_supported_extension_detection() {
        let config = AppConfig::default();

        assert_eq!(
            config.video_extension(Path::new("/v/clip.MP4")),
            Some(".mp4".to_string())
        );
        assert!(config.is_supported(Path::new("movie.mkv")));
        assert!(config.is_supported(Path::new("movie.Webm")));
        assert!(!config.is_supported(Path::new("notes.txt")));
        assert!(!config.is_supported(Path::new("mp4")));
    }

    #[test]
    fn test_path_case_keys() {
        let a = Path::new("/Videos/Clip.mp4");
        let b = Path::new("/videos/clip.mp4");

        assert!(PathCase::Insensitive.same(a, b));
        assert!(!PathCase::Sensitive.same(a, b));
        assert_eq!(PathCase::Insensitive.key(a), "/videos/clip.mp4");
    }

    #[test]
    fn test_path_case_parse() {
        assert_eq!("Insensitive".parse::<PathCase>(), Ok(PathCase::Insensitive));
        assert_eq!(" auto ".parse::<PathCase>(), Ok(PathCase::Auto));
        assert!("sometimes".parse::<PathCase>().is_err());
    }

    #[test]
    fn test_data_paths_layout() {
        let temp_dir = TempDir::new().unwrap();
        let paths = DataPaths::new(temp_dir.path().join("lib"));
        paths.ensure().unwrap();

        assert!(paths.thumbnails.is_dir());
        assert!(paths.trash.is_dir());
        assert_eq!(paths.database, temp_dir.path().join("lib").join("vidshelf.db"));
    }

    #[test]
    fn test_explicit_data_dir_wins() {
        let temp_dir = TempDir::new().unwrap();
        let paths = DataPaths::resolve(Some(temp_dir.path().to_path_buf())).unwrap();
        assert_eq!(paths.root, temp_dir.path());
    }
}
