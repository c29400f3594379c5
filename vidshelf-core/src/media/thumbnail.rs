use crate::config::AppConfig;
use crate::media::hash::CacheKey;
use crate::media::tools::{ToolError, ToolRunner};
use async_trait::async_trait;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ThumbnailError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error("Extractor produced no image at {path}")]
    MissingOutput { path: String },
}

impl ThumbnailError {
    pub fn is_missing_tool(&self) -> bool {
        matches!(self, ThumbnailError::Tool(e) if e.is_missing())
    }

    pub fn missing_tool(&self) -> Option<&str> {
        match self {
            ThumbnailError::Tool(e) => e.missing_tool(),
            _ => None,
        }
    }
}

/// External frame extractor: writes one JPEG frame of `source` to
/// `output_dir/file_name`, scaled to `width` with the aspect ratio kept,
/// taken at `seek_percent` of `duration` (the first frame when unknown).
#[async_trait]
pub trait ThumbnailExtractor: Send + Sync {
    async fn extract(
        &self,
        source: &Path,
        output_dir: &Path,
        file_name: &str,
        width: u32,
        seek_percent: u8,
        duration: Option<f64>,
    ) -> Result<(), ThumbnailError>;
}

/// `ffmpeg`-backed extractor.
pub struct FfmpegThumbnailExtractor {
    runner: ToolRunner,
}

impl FfmpegThumbnailExtractor {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            runner: ToolRunner::new(command, timeout),
        }
    }
}

#[async_trait]
impl ThumbnailExtractor for FfmpegThumbnailExtractor {
    async fn extract(
        &self,
        source: &Path,
        output_dir: &Path,
        file_name: &str,
        width: u32,
        seek_percent: u8,
        duration: Option<f64>,
    ) -> Result<(), ThumbnailError> {
        let seek = duration
            .map(|total| seek_position(total, seek_percent))
            .unwrap_or(0.0);

        fs::create_dir_all(output_dir)?;
        let target = output_dir.join(file_name);
        // Extract next to the target and rename, so a concurrent extraction
        // of the same key never exposes a half-written file.
        let partial = output_dir.join(format!(".{}.{}.jpg", file_name, Uuid::new_v4().simple()));

        let args: Vec<OsString> = vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-ss".into(),
            format!("{:.3}", seek).into(),
            "-i".into(),
            source.as_os_str().to_os_string(),
            "-frames:v".into(),
            "1".into(),
            "-vf".into(),
            format!("scale={}:-2", width).into(),
            "-q:v".into(),
            "3".into(),
            "-f".into(),
            "image2".into(),
            "-y".into(),
            partial.as_os_str().to_os_string(),
        ];

        let result = self.runner.output(args).await;
        if let Err(e) = result {
            let _ = fs::remove_file(&partial);
            return Err(e.into());
        }

        if !partial.exists() {
            return Err(ThumbnailError::MissingOutput {
                path: target.to_string_lossy().to_string(),
            });
        }

        fs::rename(&partial, &target).map_err(|e| {
            let _ = fs::remove_file(&partial);
            ThumbnailError::Io(e)
        })?;
        Ok(())
    }
}

pub(crate) fn seek_position(duration_secs: f64, seek_percent: u8) -> f64 {
    if !duration_secs.is_finite() || duration_secs <= 0.0 {
        return 0.0;
    }
    duration_secs * f64::from(seek_percent.min(100)) / 100.0
}

/// Content-addressed thumbnail store.
///
/// Artifacts live in one flat directory as `{cache_key}{schema_suffix}.jpg`.
/// An existing file is a cache hit with no further validation; misses run the
/// extractor once and never overwrite or delete existing artifacts. Bumping
/// the schema suffix orphans older artifacts instead of reaping them.
pub struct ThumbnailCache {
    thumbnails_dir: PathBuf,
    schema_suffix: String,
    width: u32,
    seek_percent: u8,
    extractor: Arc<dyn ThumbnailExtractor>,
}

impl ThumbnailCache {
    pub fn new(thumbnails_dir: impl Into<PathBuf>, extractor: Arc<dyn ThumbnailExtractor>) -> Self {
        let defaults = AppConfig::default();
        Self {
            thumbnails_dir: thumbnails_dir.into(),
            schema_suffix: defaults.thumbnail_schema_suffix,
            width: defaults.thumbnail_width,
            seek_percent: defaults.thumbnail_seek_percent,
            extractor,
        }
    }

    pub fn from_config(
        config: &AppConfig,
        thumbnails_dir: impl Into<PathBuf>,
        extractor: Arc<dyn ThumbnailExtractor>,
    ) -> Self {
        Self::new(thumbnails_dir, extractor).with_settings(
            config.thumbnail_width,
            config.thumbnail_seek_percent,
            &config.thumbnail_schema_suffix,
        )
    }

    pub fn with_settings(mut self, width: u32, seek_percent: u8, schema_suffix: &str) -> Self {
        self.width = width;
        self.seek_percent = seek_percent.min(100);
        self.schema_suffix = schema_suffix.to_string();
        self
    }

    pub fn thumbnails_dir(&self) -> &Path {
        &self.thumbnails_dir
    }

    pub fn artifact_name(&self, key: &CacheKey) -> String {
        format!("{}{}.jpg", key, self.schema_suffix)
    }

    pub fn thumbnail_path(&self, key: &CacheKey) -> PathBuf {
        self.thumbnails_dir.join(self.artifact_name(key))
    }

    /// Existing artifact for `key`, without generating anything.
    pub fn lookup(&self, key: &CacheKey) -> Option<PathBuf> {
        let path = self.thumbnail_path(key);
        path.is_file().then_some(path)
    }

    /// Cached artifact for `key`, or a fresh extraction from `source`.
    /// `duration` is the source's length in seconds when already known.
    pub async fn try_get_or_create(
        &self,
        source: &Path,
        key: &CacheKey,
        duration: Option<f64>,
    ) -> Result<PathBuf, ThumbnailError> {
        if let Some(hit) = self.lookup(key) {
            return Ok(hit);
        }

        let file_name = self.artifact_name(key);
        self.extractor
            .extract(
                source,
                &self.thumbnails_dir,
                &file_name,
                self.width,
                self.seek_percent,
                duration,
            )
            .await?;

        let path = self.thumbnails_dir.join(&file_name);
        if path.is_file() {
            log::debug!("Generated thumbnail for {}", source.display());
            Ok(path)
        } else {
            Err(ThumbnailError::MissingOutput {
                path: path.to_string_lossy().to_string(),
            })
        }
    }

    /// Cached or freshly extracted thumbnail; extraction failures are logged and yield `None`.
    pub async fn get_or_create(
        &self,
        source: &Path,
        key: &CacheKey,
        duration: Option<f64>,
    ) -> Option<PathBuf> {
        match self.try_get_or_create(source, key, duration).await {
            Ok(path) => Some(path),
            Err(e) => {
                log::warn!("Thumbnail generation failed for {}: {}", source.display(), e);
                None
            }
        }
    }
}
