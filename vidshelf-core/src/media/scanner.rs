use crate::config::AppConfig;
use crate::database::models::VideoRecord;
use crate::database::MetadataRepository;
use crate::media::hash::HashService;
use crate::media::probe::DurationService;
use crate::media::thumbnail::ThumbnailCache;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Invalid path: {path}")]
    InvalidPath { path: String },

    #[error("Directory walk error: {0}")]
    Walk(#[from] walkdir::Error),
}

/// Events streamed to the consumer while a folder is scanned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ScanEvent {
    VideoReady { video: VideoRecord },
    ScanComplete { folder: PathBuf, total: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScanPhase {
    Idle,
    Enumerating,
    Processing,
    Complete,
    Aborted,
}

/// Summary of one folder scan.
#[derive(Debug, Clone)]
pub struct ScanOutcome {
    pub folder: PathBuf,
    pub phase: ScanPhase,
    /// Candidate files found during enumeration.
    pub total: usize,
    /// Records delivered to the consumer, in emission order.
    pub records: Vec<VideoRecord>,
    pub thumbnail_failures: usize,
    pub duration_failures: usize,
    /// External tools found absent while scanning.
    pub missing_tools: BTreeSet<String>,
    pub error: Option<String>,
}

impl ScanOutcome {
    fn new(folder: &Path) -> Self {
        Self {
            folder: folder.to_path_buf(),
            phase: ScanPhase::Idle,
            total: 0,
            records: Vec::new(),
            thumbnail_failures: 0,
            duration_failures: 0,
            missing_tools: BTreeSet::new(),
            error: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.phase == ScanPhase::Complete
    }

    fn transition(&mut self, phase: ScanPhase) {
        log::debug!(
            "Scan of {}: {:?} -> {:?}",
            self.folder.display(),
            self.phase,
            phase
        );
        self.phase = phase;
    }
}

/// A file that survived enumeration and stat.
#[derive(Debug, Clone)]
struct Candidate {
    path: PathBuf,
    extension: String,
    size: u64,
    created_at: String,
}

/// Progressive folder scanner.
///
/// Files of one folder are processed strictly one after another: hash,
/// duration, thumbnail, metadata, then the finished record is emitted before
/// the next file starts. Every scan ends with exactly one `ScanComplete`.
pub struct FolderScanner {
    config: AppConfig,
    hash_service: HashService,
    thumbnails: Arc<ThumbnailCache>,
    durations: DurationService,
    metadata: MetadataRepository,
}

impl FolderScanner {
    pub fn new(
        config: AppConfig,
        thumbnails: Arc<ThumbnailCache>,
        durations: DurationService,
        metadata: MetadataRepository,
    ) -> Self {
        Self {
            config,
            hash_service: HashService::new(),
            thumbnails,
            durations,
            metadata,
        }
    }

    /// Scan folders one after another into the same event stream.
    pub async fn scan_folders(
        &self,
        folders: &[PathBuf],
        events: &mpsc::UnboundedSender<ScanEvent>,
    ) -> Vec<ScanOutcome> {
        let mut outcomes = Vec::with_capacity(folders.len());
        for folder in folders {
            if events.is_closed() {
                log::info!("Event consumer closed, skipping remaining folders");
                break;
            }
            outcomes.push(self.scan_folder(folder, events).await);
        }
        outcomes
    }

    pub async fn scan_folder(
        &self,
        folder: &Path,
        events: &mpsc::UnboundedSender<ScanEvent>,
    ) -> ScanOutcome {
        let mut outcome = ScanOutcome::new(folder);
        log::info!("Scanning folder: {}", folder.display());

        outcome.transition(ScanPhase::Enumerating);
        let candidates = match self.enumerate(folder) {
            Ok(candidates) => candidates,
            Err(e) => {
                log::error!("Failed to read folder {}: {}", folder.display(), e);
                outcome.error = Some(e.to_string());
                outcome.transition(ScanPhase::Aborted);
                Self::complete(events, folder, 0);
                return outcome;
            }
        };
        outcome.total = candidates.len();

        outcome.transition(ScanPhase::Processing);
        for candidate in candidates {
            if events.is_closed() {
                log::info!(
                    "Event consumer closed, stopping scan of {}",
                    folder.display()
                );
                outcome.transition(ScanPhase::Aborted);
                break;
            }

            let record = self.process_file(candidate, &mut outcome).await;

            if events.is_closed()
                || events
                    .send(ScanEvent::VideoReady {
                        video: record.clone(),
                    })
                    .is_err()
            {
                log::info!(
                    "Event consumer closed, stopping scan of {}",
                    folder.display()
                );
                outcome.transition(ScanPhase::Aborted);
                break;
            }
            outcome.records.push(record);
        }

        if outcome.phase == ScanPhase::Processing {
            outcome.transition(ScanPhase::Complete);
        }
        Self::complete(events, folder, outcome.total);

        log::info!(
            "Scan of {} finished: {} of {} videos ({} without thumbnail, {} without duration)",
            folder.display(),
            outcome.records.len(),
            outcome.total,
            outcome.thumbnail_failures,
            outcome.duration_failures
        );
        outcome
    }

    fn complete(events: &mpsc::UnboundedSender<ScanEvent>, folder: &Path, total: usize) {
        let _ = events.send(ScanEvent::ScanComplete {
            folder: folder.to_path_buf(),
            total,
        });
    }

    /// Immediate regular files of `folder` with a supported extension, sorted by name.
    fn enumerate(&self, folder: &Path) -> Result<Vec<Candidate>, ScanError> {
        if !folder.is_dir() {
            return Err(ScanError::InvalidPath {
                path: folder.to_string_lossy().to_string(),
            });
        }

        let walker = WalkDir::new(folder)
            .min_depth(1)
            .max_depth(1)
            .follow_links(true)
            .sort_by_file_name();

        let mut candidates = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.depth() == 0 => return Err(e.into()),
                Err(e) => {
                    log::warn!("Skipping unreadable entry in {}: {}", folder.display(), e);
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }
            let Some(extension) = self.config.video_extension(entry.path()) else {
                continue;
            };

            match entry.metadata() {
                Ok(metadata) => candidates.push(Candidate {
                    path: entry.path().to_path_buf(),
                    extension,
                    size: metadata.len(),
                    created_at: created_at(&metadata),
                }),
                Err(e) => {
                    log::warn!("Failed to stat {}: {}", entry.path().display(), e);
                }
            }
        }

        Ok(candidates)
    }

    async fn process_file(&self, candidate: Candidate, outcome: &mut ScanOutcome) -> VideoRecord {
        let path = candidate.path;
        log::debug!("Processing {}", path.display());

        let key = self.hash_service.cache_key(&path);

        // Read once; the extractor seeks from the same value.
        let seconds = match self.durations.seconds(&path).await {
            Ok(seconds) => Some(seconds),
            Err(e) => {
                log::warn!("Failed to probe duration of {}: {}", path.display(), e);
                if let Some(tool) = e.missing_tool() {
                    outcome.missing_tools.insert(tool.to_string());
                }
                outcome.duration_failures += 1;
                None
            }
        };
        let duration = seconds.map(|seconds| seconds.floor() as u64);

        let thumbnail_path = match self
            .thumbnails
            .try_get_or_create(&path, &key, seconds)
            .await
        {
            Ok(thumbnail) => Some(thumbnail),
            Err(e) => {
                log::warn!("Thumbnail generation failed for {}: {}", path.display(), e);
                if let Some(tool) = e.missing_tool() {
                    outcome.missing_tools.insert(tool.to_string());
                }
                outcome.thumbnail_failures += 1;
                None
            }
        };

        let metadata = self.metadata.get(&path).unwrap_or_else(|e| {
            log::warn!("Failed to read metadata for {}: {}", path.display(), e);
            Default::default()
        });

        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_default();

        let mut record = VideoRecord {
            id: format!("vid_{}", Uuid::new_v4().simple()),
            name,
            extension: candidate.extension,
            size: candidate.size,
            created_at: candidate.created_at,
            thumbnail_path,
            duration,
            is_favorite: false,
            tags: Vec::new(),
            last_played_time: None,
            product_code: None,
            path,
        };
        record.apply_metadata(&metadata);
        record
    }
}

/// Creation time as RFC 3339, falling back to the modification time where
/// the filesystem does not record creation.
fn created_at(metadata: &fs::Metadata) -> String {
    metadata
        .created()
        .or_else(|_| metadata.modified())
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now())
        .to_rfc3339()
}
