use crate::config::{AppConfig, DataPaths};
use crate::database::models::{VideoMetadata, VideoRecord, WatchedFolder};
use crate::database::{Database, DatabaseError};
use crate::media::catalog::{normalize_product_code, ProductCatalog, ProductData};
use crate::media::convert::{
    ConversionEvent, ConversionResult, ConversionSupervisor, ConvertError, FfmpegTranscoder,
    Transcoder,
};
use crate::media::probe::{DurationService, FfprobeProber, MediaProber};
use crate::media::rename::{BatchRenameReport, FileOperations, RenameError, RenamePlan};
use crate::media::scanner::{FolderScanner, ScanEvent, ScanOutcome};
use crate::media::thumbnail::{FfmpegThumbnailExtractor, ThumbnailCache, ThumbnailExtractor};
use crate::media::trash::{TrashBin, TrashError, TrashRecord};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Rename(#[from] RenameError),

    #[error(transparent)]
    Convert(#[from] ConvertError),

    #[error(transparent)]
    Trash(#[from] TrashError),

    #[error("Not a directory: {path}")]
    NotADirectory { path: String },

    #[error("Invalid product code: {code:?}")]
    InvalidProductCode { code: String },

    #[error("No product catalog is configured")]
    CatalogUnavailable,
}

/// External tools the library drives.
#[derive(Clone)]
pub struct MediaTools {
    pub extractor: Arc<dyn ThumbnailExtractor>,
    pub prober: Arc<dyn MediaProber>,
    pub transcoder: Arc<dyn Transcoder>,
}

impl MediaTools {
    /// `ffmpeg` / `ffprobe` as configured.
    pub fn ffmpeg(config: &AppConfig) -> Self {
        let prober: Arc<dyn MediaProber> = Arc::new(FfprobeProber::new(
            config.ffprobe_command.clone(),
            config.tool_timeout(),
        ));
        let durations = DurationService::new(prober.clone());
        Self {
            extractor: Arc::new(FfmpegThumbnailExtractor::new(
                config.ffmpeg_command.clone(),
                config.tool_timeout(),
            )),
            transcoder: Arc::new(FfmpegTranscoder::new(
                config.ffmpeg_command.clone(),
                durations,
            )),
            prober,
        }
    }
}

/// Application facade: watched folders, scans, metadata actions and file
/// operations over one data directory.
pub struct VideoManager {
    paths: DataPaths,
    config: AppConfig,
    db: Database,
    scanner: FolderScanner,
    files: FileOperations,
    trash: Arc<TrashBin>,
    converter: ConversionSupervisor,
    catalog: Option<Arc<dyn ProductCatalog>>,
}

impl VideoManager {
    /// Open the data directory with the configured ffmpeg tools.
    pub fn open(paths: DataPaths) -> Result<Self, ManagerError> {
        paths.ensure()?;
        let db = Database::open(&paths.database)?;
        let config = db.config().get_config()?;
        let tools = MediaTools::ffmpeg(&config);
        Ok(Self::with_tools(paths, db, config, tools))
    }

    pub fn with_tools(
        paths: DataPaths,
        db: Database,
        config: AppConfig,
        tools: MediaTools,
    ) -> Self {
        let db = db.with_path_case(config.path_case);
        let trash = Arc::new(TrashBin::new(paths.trash.clone()));
        let thumbnails = Arc::new(ThumbnailCache::from_config(
            &config,
            paths.thumbnails.clone(),
            tools.extractor,
        ));
        let scanner = FolderScanner::new(
            config.clone(),
            thumbnails,
            DurationService::new(tools.prober),
            db.metadata(),
        );
        let files = FileOperations::new(db.clone(), trash.clone(), config.rename_sequence_width);
        let converter = ConversionSupervisor::new(tools.transcoder, db.clone(), trash.clone());

        Self {
            paths,
            config,
            db,
            scanner,
            files,
            trash,
            converter,
            catalog: None,
        }
    }

    pub fn with_catalog(mut self, catalog: Arc<dyn ProductCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn paths(&self) -> &DataPaths {
        &self.paths
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Persist one configuration value; takes effect the next time the library is opened.
    pub fn set_config_value(&self, key: &str, value: &str) -> Result<bool, ManagerError> {
        Ok(self.db.config().set_value(key, value)?)
    }

    // Watched folders

    pub fn add_folder(&self, path: &Path) -> Result<WatchedFolder, ManagerError> {
        let path = path.canonicalize()?;
        if !path.is_dir() {
            return Err(ManagerError::NotADirectory {
                path: path.to_string_lossy().to_string(),
            });
        }
        let folder = self.db.folders().add(&path)?;
        log::info!("Watching folder {}", folder.path.display());
        Ok(folder)
    }

    /// Stop watching `path` and forget its cached records.
    pub fn remove_folder(&self, path: &Path) -> Result<bool, ManagerError> {
        let path = resolve(path);
        let removed = self.db.folders().remove(&path)?;
        if removed {
            self.db.videos().remove_folder(&path)?;
            log::info!("Stopped watching folder {}", path.display());
        }
        Ok(removed)
    }

    pub fn folders(&self) -> Result<Vec<WatchedFolder>, ManagerError> {
        Ok(self.db.folders().list()?)
    }

    // Scans

    /// Scan every watched folder one after another into `events`.
    pub async fn scan_all(
        &self,
        events: &mpsc::UnboundedSender<ScanEvent>,
    ) -> Result<Vec<ScanOutcome>, ManagerError> {
        let folders: Vec<PathBuf> = self.folders()?.into_iter().map(|f| f.path).collect();
        log::info!("Scanning {} watched folder(s)", folders.len());

        let mut outcomes = Vec::with_capacity(folders.len());
        for folder in &folders {
            if events.is_closed() {
                log::info!("Event consumer closed, skipping remaining folders");
                break;
            }
            let outcome = self.scanner.scan_folder(folder, events).await;
            self.persist_outcome(&outcome);
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    pub async fn scan_folder(
        &self,
        folder: &Path,
        events: &mpsc::UnboundedSender<ScanEvent>,
    ) -> ScanOutcome {
        let folder = resolve(folder);
        let outcome = self.scanner.scan_folder(&folder, events).await;
        self.persist_outcome(&outcome);
        outcome
    }

    /// Store the snapshot and count of a completed scan of a watched folder.
    fn persist_outcome(&self, outcome: &ScanOutcome) {
        if !outcome.is_complete() {
            return;
        }
        let folders = self.db.folders();
        match folders.update_count(&outcome.folder, outcome.total as u64) {
            Ok(true) => {}
            Ok(false) => return,
            Err(e) => {
                log::warn!(
                    "Failed to update video count for {}: {}",
                    outcome.folder.display(),
                    e
                );
                return;
            }
        }
        if let Err(e) = self
            .db
            .videos()
            .replace_folder(&outcome.folder, &outcome.records)
        {
            log::warn!(
                "Failed to cache scan results for {}: {}",
                outcome.folder.display(),
                e
            );
        }
    }

    /// Records from the last completed scans, for display before a fresh scan
    /// finishes. User-owned fields come from the metadata store, not the snapshot.
    pub fn load_cached_videos(&self) -> Result<Vec<VideoRecord>, ManagerError> {
        let metadata = self.db.metadata();
        let mut records = self.db.videos().load_all()?;
        for record in &mut records {
            record.apply_metadata(&metadata.get(&record.path)?);
        }
        Ok(records)
    }

    // Metadata

    pub fn metadata(&self, path: &Path) -> Result<VideoMetadata, ManagerError> {
        Ok(self.db.metadata().get(path)?)
    }

    /// Flip the favorite flag; returns the new value.
    pub fn toggle_favorite(&self, path: &Path) -> Result<bool, ManagerError> {
        let metadata = self
            .db
            .metadata()
            .update(path, |metadata| metadata.is_favorite = !metadata.is_favorite)?;
        Ok(metadata.is_favorite)
    }

    pub fn add_tag(&self, path: &Path, tag: &str) -> Result<VideoMetadata, ManagerError> {
        Ok(self.db.metadata().update(path, |metadata| {
            metadata.add_tag(tag);
        })?)
    }

    pub fn remove_tag(&self, path: &Path, tag: &str) -> Result<VideoMetadata, ManagerError> {
        Ok(self.db.metadata().update(path, |metadata| {
            metadata.remove_tag(tag);
        })?)
    }

    pub fn set_last_played(
        &self,
        path: &Path,
        seconds: Option<f64>,
    ) -> Result<VideoMetadata, ManagerError> {
        let seconds = seconds.filter(|s| s.is_finite() && *s >= 0.0);
        Ok(self
            .db
            .metadata()
            .update(path, |metadata| metadata.last_played_time = seconds)?)
    }

    pub fn set_product_code(
        &self,
        path: &Path,
        code: Option<&str>,
    ) -> Result<VideoMetadata, ManagerError> {
        let code = code.and_then(normalize_product_code);
        Ok(self
            .db
            .metadata()
            .update(path, |metadata| metadata.product_code = code)?)
    }

    /// Look `code` up in the catalog, store it on `path` and merge the catalog tags.
    pub async fn apply_product_data(
        &self,
        path: &Path,
        code: &str,
    ) -> Result<Option<ProductData>, ManagerError> {
        let catalog = self
            .catalog
            .as_ref()
            .ok_or(ManagerError::CatalogUnavailable)?;
        let code = normalize_product_code(code).ok_or_else(|| ManagerError::InvalidProductCode {
            code: code.to_string(),
        })?;

        let data = catalog.fetch_product_data(&code).await;
        if data.is_none() {
            log::warn!("No catalog entry for product code {}", code);
        }

        self.db.metadata().update(path, |metadata| {
            metadata.product_code = Some(code.clone());
            if let Some(data) = &data {
                for tag in &data.tags {
                    metadata.add_tag(tag);
                }
            }
        })?;
        Ok(data)
    }

    // File operations

    pub fn rename_video(&self, path: &Path, new_name: &str) -> Result<PathBuf, ManagerError> {
        Ok(self.files.rename_file(&resolve(path), new_name)?)
    }

    pub fn plan_batch_rename(&self, paths: &[PathBuf]) -> Result<RenamePlan, ManagerError> {
        let paths: Vec<PathBuf> = paths.iter().map(|p| resolve(p)).collect();
        Ok(self.files.plan_batch_rename(&paths)?)
    }

    pub fn batch_rename(&self, paths: &[PathBuf]) -> BatchRenameReport {
        let paths: Vec<PathBuf> = paths.iter().map(|p| resolve(p)).collect();
        self.files.batch_rename(&paths)
    }

    pub fn delete_video(&self, path: &Path) -> Result<TrashRecord, ManagerError> {
        Ok(self.files.delete_file(&resolve(path))?)
    }

    pub fn trash_history(&self) -> Result<Vec<TrashRecord>, ManagerError> {
        Ok(self.trash.list()?)
    }

    /// Restore a trashed file (the latest when `index` is `None`).
    pub fn restore_from_trash(&self, index: Option<usize>) -> Result<TrashRecord, ManagerError> {
        Ok(self.trash.restore(index)?)
    }

    pub async fn convert(
        &self,
        path: &Path,
        delete_original: bool,
        events: &mpsc::UnboundedSender<ConversionEvent>,
    ) -> Result<ConversionResult, ManagerError> {
        Ok(self
            .converter
            .convert(&resolve(path), delete_original, events)
            .await?)
    }

    pub fn cancel_conversion(&self, path: &Path) -> bool {
        self.converter.cancel(&resolve(path))
    }
}

/// Canonical form of `path` when it exists, otherwise the path as given.
fn resolve(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::probe::ProbeError;
    use crate::media::thumbnail::ThumbnailError;
    use async_trait::async_trait;
    use std::fs;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    struct StubExtractor;

    #[async_trait]
    impl ThumbnailExtractor for StubExtractor {
        async fn extract(
            &self,
            _source: &Path,
            output_dir: &Path,
            file_name: &str,
            _width: u32,
            _seek_percent: u8,
            _duration: Option<f64>,
        ) -> Result<(), ThumbnailError> {
            fs::create_dir_all(output_dir)?;
            fs::write(output_dir.join(file_name), b"jpg")?;
            Ok(())
        }
    }

    struct StubProber;

    #[async_trait]
    impl MediaProber for StubProber {
        async fn duration(&self, _path: &Path) -> Result<f64, ProbeError> {
            Ok(61.5)
        }
    }

    struct StubTranscoder;

    #[async_trait]
    impl Transcoder for StubTranscoder {
        async fn transcode(
            &self,
            source: &Path,
            output: &Path,
            _progress: &(dyn Fn(f64) + Send + Sync),
            _cancel: &CancellationToken,
        ) -> Result<(), ConvertError> {
            fs::copy(source, output)?;
            Ok(())
        }
    }

    struct StubCatalog;

    #[async_trait]
    impl ProductCatalog for StubCatalog {
        async fn fetch_product_data(&self, code: &str) -> Option<ProductData> {
            (code == "ABC-123").then(|| ProductData {
                title: "Sample".to_string(),
                tags: vec!["Drama".to_string(), " Outdoor ".to_string()],
                ..Default::default()
            })
        }
    }

    struct Fixture {
        _data: TempDir,
        videos: TempDir,
        manager: VideoManager,
    }

    fn fixture() -> Fixture {
        let data = TempDir::new().unwrap();
        let videos = TempDir::new().unwrap();
        let paths = DataPaths::new(data.path());
        paths.ensure().unwrap();
        let db = Database::open(&paths.database).unwrap();
        let config = AppConfig::default();
        let tools = MediaTools {
            extractor: Arc::new(StubExtractor),
            prober: Arc::new(StubProber),
            transcoder: Arc::new(StubTranscoder),
        };
        let manager =
            VideoManager::with_tools(paths, db, config, tools).with_catalog(Arc::new(StubCatalog));
        Fixture {
            _data: data,
            videos,
            manager,
        }
    }

    impl Fixture {
        fn folder(&self) -> PathBuf {
            self.videos.path().canonicalize().unwrap()
        }

        fn touch(&self, name: &str) -> PathBuf {
            let path = self.folder().join(name);
            fs::write(&path, b"video").unwrap();
            path
        }
    }

    #[tokio::test]
    async fn test_startup_scan_persists_snapshot_and_counts() {
        let fx = fixture();
        fx.touch("a.mp4");
        fx.touch("b.mkv");
        fx.touch("readme.txt");
        fx.manager.add_folder(fx.videos.path()).unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let outcomes = fx.manager.scan_all(&tx).await.unwrap();

        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].total, 2);
        let mut ready = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, ScanEvent::VideoReady { .. }) {
                ready += 1;
            }
        }
        assert_eq!(ready, 2);

        let folders = fx.manager.folders().unwrap();
        assert_eq!(folders[0].video_count, 2);

        let cached = fx.manager.load_cached_videos().unwrap();
        assert_eq!(cached.len(), 2);
        assert_eq!(cached[0].duration, Some(61));
    }

    #[tokio::test]
    async fn test_cached_videos_reflect_current_metadata() {
        let fx = fixture();
        let clip = fx.touch("a.mp4");
        fx.manager.add_folder(fx.videos.path()).unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        fx.manager.scan_all(&tx).await.unwrap();

        assert!(fx.manager.toggle_favorite(&clip).unwrap());
        fx.manager.add_tag(&clip, "later").unwrap();

        let cached = fx.manager.load_cached_videos().unwrap();
        assert_eq!(cached.len(), 1);
        assert!(cached[0].is_favorite);
        assert_eq!(cached[0].tags, vec!["later".to_string()]);
    }

    #[tokio::test]
    async fn test_renamed_and_converted_files_stay_in_snapshot() {
        let fx = fixture();
        let clip = fx.touch("clip.mp4");
        let other = fx.touch("other.avi");
        fx.manager.add_folder(fx.videos.path()).unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        fx.manager.scan_all(&tx).await.unwrap();
        fx.manager.toggle_favorite(&clip).unwrap();

        let renamed = fx.manager.rename_video(&clip, "beach").unwrap();
        let (events, _events_rx) = mpsc::unbounded_channel();
        let converted = fx.manager.convert(&other, false, &events).await.unwrap();

        let cached = fx.manager.load_cached_videos().unwrap();
        let paths: Vec<_> = cached.iter().map(|r| r.path.clone()).collect();
        assert_eq!(paths, vec![renamed.clone(), other.clone(), converted.output]);
        assert_eq!(cached[0].name, "beach");
        assert!(cached[0].is_favorite);
        assert_eq!(cached[2].extension, ".mp4");
        assert_eq!(cached[2].duration, Some(61));
    }

    #[tokio::test]
    async fn test_remove_folder_drops_snapshot() {
        let fx = fixture();
        fx.touch("a.mp4");
        fx.manager.add_folder(fx.videos.path()).unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        fx.manager.scan_all(&tx).await.unwrap();

        assert!(fx.manager.remove_folder(fx.videos.path()).unwrap());
        assert!(fx.manager.folders().unwrap().is_empty());
        assert!(fx.manager.load_cached_videos().unwrap().is_empty());
        assert!(!fx.manager.remove_folder(fx.videos.path()).unwrap());
    }

    #[tokio::test]
    async fn test_add_folder_rejects_files() {
        let fx = fixture();
        let file = fx.touch("a.mp4");

        assert!(matches!(
            fx.manager.add_folder(&file),
            Err(ManagerError::NotADirectory { .. })
        ));
    }

    #[test]
    fn test_metadata_actions() {
        let fx = fixture();
        let clip = fx.touch("clip.mp4");

        assert!(fx.manager.toggle_favorite(&clip).unwrap());
        fx.manager.add_tag(&clip, " Holiday ").unwrap();
        fx.manager.add_tag(&clip, "beach").unwrap();
        fx.manager.remove_tag(&clip, "BEACH").unwrap();
        fx.manager.set_last_played(&clip, Some(33.0)).unwrap();
        fx.manager.set_product_code(&clip, Some(" xyz-1 ")).unwrap();

        let metadata = fx.manager.metadata(&clip).unwrap();
        assert!(metadata.is_favorite);
        assert_eq!(metadata.tags.iter().collect::<Vec<_>>(), vec!["holiday"]);
        assert_eq!(metadata.last_played_time, Some(33.0));
        assert_eq!(metadata.product_code.as_deref(), Some("XYZ-1"));

        assert!(!fx.manager.toggle_favorite(&clip).unwrap());
    }

    #[tokio::test]
    async fn test_apply_product_data_merges_tags() {
        let fx = fixture();
        let clip = fx.touch("clip.mp4");
        fx.manager.add_tag(&clip, "mine").unwrap();

        let data = fx.manager.apply_product_data(&clip, "abc-123").await.unwrap();

        assert_eq!(data.unwrap().title, "Sample");
        let metadata = fx.manager.metadata(&clip).unwrap();
        assert_eq!(metadata.product_code.as_deref(), Some("ABC-123"));
        assert_eq!(
            metadata.tags.iter().collect::<Vec<_>>(),
            vec!["drama", "mine", "outdoor"]
        );

        let missing = fx.manager.apply_product_data(&clip, "zzz-9").await.unwrap();
        assert!(missing.is_none());
        assert!(matches!(
            fx.manager.apply_product_data(&clip, "  ").await,
            Err(ManagerError::InvalidProductCode { .. })
        ));
    }

    #[test]
    fn test_delete_and_restore() {
        let fx = fixture();
        let clip = fx.touch("clip.mp4");

        fx.manager.delete_video(&clip).unwrap();
        assert!(!clip.exists());
        assert_eq!(fx.manager.trash_history().unwrap().len(), 1);

        let restored = fx.manager.restore_from_trash(None).unwrap();
        assert_eq!(restored.original, clip);
        assert!(clip.is_file());
    }

    #[tokio::test]
    async fn test_convert_with_delete_original() {
        let fx = fixture();
        let clip = fx.touch("clip.avi");
        fx.manager.toggle_favorite(&clip).unwrap();

        let (tx, _rx) = mpsc::unbounded_channel();
        let result = fx.manager.convert(&clip, true, &tx).await.unwrap();

        assert!(!clip.exists());
        assert!(fx.manager.metadata(&result.output).unwrap().is_favorite);
        assert_eq!(fx.manager.trash_history().unwrap().len(), 1);
    }
}
