use crate::database::{Database, DatabaseError};
use crate::media::probe::DurationService;
use crate::media::tools::{stderr_tail, ToolError, ToolRunner};
use crate::media::trash::{TrashBin, TrashError, TrashRecord};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("A conversion of {path} is already running")]
    AlreadyRunning { path: String },

    #[error("Conversion of {path} was cancelled")]
    Cancelled { path: String },

    #[error("File not found: {path}")]
    NotFound { path: String },

    #[error("Transcoder produced no output at {path}")]
    MissingOutput { path: String },

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Trash error: {0}")]
    Trash(#[from] TrashError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Conversion registry lock poisoned")]
    Poisoned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConversionStatus {
    Started,
    Converting,
    Completed,
    Failed,
    Cancelled,
}

/// Events streamed to the consumer while a conversion runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ConversionEvent {
    Progress {
        path: PathBuf,
        percent: f64,
        status: ConversionStatus,
    },
    VideoRemoved {
        path: PathBuf,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConversionResult {
    pub source: PathBuf,
    pub output: PathBuf,
    pub original_trashed: Option<TrashRecord>,
}

/// External transcoder: converts `source` into `output` with a fixed
/// profile, reporting percent complete through `progress`. Must stop and
/// return once `cancel` fires.
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn transcode(
        &self,
        source: &Path,
        output: &Path,
        progress: &(dyn Fn(f64) + Send + Sync),
        cancel: &CancellationToken,
    ) -> Result<(), ConvertError>;
}

/// `ffmpeg` transcoder: H.264/AAC in an MP4 container with fast start.
pub struct FfmpegTranscoder {
    runner: ToolRunner,
    durations: DurationService,
}

impl FfmpegTranscoder {
    /// Transcodes are not time-limited; `ToolRunner`'s timeout is unused here.
    pub fn new(command: impl Into<String>, durations: DurationService) -> Self {
        Self {
            runner: ToolRunner::new(command, Duration::MAX),
            durations,
        }
    }

    fn args(source: &Path, output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = ["-hide_banner", "-nostats", "-loglevel", "error", "-y", "-i"]
            .iter()
            .map(OsString::from)
            .collect();
        args.push(source.as_os_str().to_os_string());
        args.extend(
            [
                "-c:v",
                "libx264",
                "-preset",
                "medium",
                "-crf",
                "23",
                "-c:a",
                "aac",
                "-b:a",
                "128k",
                "-movflags",
                "+faststart",
                "-progress",
                "pipe:1",
            ]
            .iter()
            .map(OsString::from),
        );
        args.push(output.as_os_str().to_os_string());
        args
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(
        &self,
        source: &Path,
        output: &Path,
        progress: &(dyn Fn(f64) + Send + Sync),
        cancel: &CancellationToken,
    ) -> Result<(), ConvertError> {
        let total = match self.durations.seconds(source).await {
            Ok(seconds) if seconds > 0.0 => Some(seconds),
            _ => {
                log::warn!(
                    "Unknown duration for {}, progress will not be reported",
                    source.display()
                );
                None
            }
        };

        let mut cmd = self.runner.command(Self::args(source, output))?;
        log::info!("Converting {} to {}", source.display(), output.display());
        let mut child = self.runner.spawn(&mut cmd)?;

        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let _ = stderr.read_to_end(&mut buf).await;
                buf
            })
        });

        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        let _ = child.kill().await;
                        let tool = self.runner.program().to_string();
                        return Err(ToolError::Cancelled { tool }.into());
                    }
                    line = lines.next_line() => match line {
                        Ok(Some(line)) => {
                            if let Some(percent) = parse_progress(&line, total) {
                                progress(percent);
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            log::debug!("Stopped reading transcoder progress: {}", e);
                            break;
                        }
                    }
                }
            }
        }

        let status = tokio::select! {
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                return Err(ToolError::Cancelled { tool: self.runner.program().to_string() }.into());
            }
            status = child.wait() => status?,
        };

        if status.success() {
            Ok(())
        } else {
            let stderr = match stderr_task {
                Some(task) => task.await.unwrap_or_default(),
                None => Vec::new(),
            };
            Err(ToolError::Failed {
                tool: self.runner.program().to_string(),
                status: status.to_string(),
                stderr: stderr_tail(&stderr),
            }
            .into())
        }
    }
}

/// Percent complete from one `-progress` line, capped below 100 until the
/// transcoder exits.
pub(crate) fn parse_progress(line: &str, total_secs: Option<f64>) -> Option<f64> {
    let total = total_secs.filter(|t| *t > 0.0)?;
    let (key, value) = line.trim().split_once('=')?;
    // `out_time_ms` is in microseconds as well.
    if key != "out_time_us" && key != "out_time_ms" {
        return None;
    }
    let micros: f64 = value.trim().parse().ok()?;
    let seconds = micros / 1_000_000.0;
    Some((seconds / total * 100.0).clamp(0.0, 99.0))
}

/// Output path next to `source`: `<stem>.mp4`, or `<stem>_converted.mp4`
/// when the source already is an MP4 or the plain name is taken.
pub fn output_path_for(source: &Path) -> PathBuf {
    output_path_where(source, |candidate| !candidate.exists())
}

/// First output candidate for `source` that `is_free` accepts.
fn output_path_where(source: &Path, is_free: impl Fn(&Path) -> bool) -> PathBuf {
    let dir = source.parent().unwrap_or_else(|| Path::new(""));
    let stem = source
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_default();
    let is_mp4 = source
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("mp4"));

    let plain = dir.join(format!("{}.mp4", stem));
    if !is_mp4 && is_free(&plain) {
        return plain;
    }

    let converted = dir.join(format!("{}_converted.mp4", stem));
    if is_free(&converted) {
        return converted;
    }
    (2..)
        .map(|n| dir.join(format!("{}_converted_{}.mp4", stem, n)))
        .find(|candidate| is_free(candidate))
        .unwrap_or(converted)
}

/// Runs conversions, at most one per source path.
///
/// The registries of in-flight sources and of reserved output paths are
/// owned here; entries are added on start and removed when the run ends,
/// however it ends. Two runs never write the same output.
pub struct ConversionSupervisor {
    transcoder: Arc<dyn Transcoder>,
    db: Database,
    trash: Arc<TrashBin>,
    active: Mutex<HashMap<String, CancellationToken>>,
    outputs: Mutex<HashMap<String, PathBuf>>,
}

/// Removes a registry entry when the conversion finishes or is dropped.
struct RegistryGuard<'a, V> {
    registry: &'a Mutex<HashMap<String, V>>,
    key: String,
}

impl<V> Drop for RegistryGuard<'_, V> {
    fn drop(&mut self) {
        if let Ok(mut registry) = self.registry.lock() {
            registry.remove(&self.key);
        }
    }
}

impl ConversionSupervisor {
    pub fn new(transcoder: Arc<dyn Transcoder>, db: Database, trash: Arc<TrashBin>) -> Self {
        Self {
            transcoder,
            db,
            trash,
            active: Mutex::new(HashMap::new()),
            outputs: Mutex::new(HashMap::new()),
        }
    }

    fn register(
        &self,
        path: &Path,
    ) -> Result<(RegistryGuard<'_, CancellationToken>, CancellationToken), ConvertError> {
        let key = self.db.path_case().key(path);
        let mut active = self.active.lock().map_err(|_| ConvertError::Poisoned)?;
        if active.contains_key(&key) {
            return Err(ConvertError::AlreadyRunning {
                path: path.to_string_lossy().to_string(),
            });
        }
        let token = CancellationToken::new();
        active.insert(key.clone(), token.clone());
        Ok((
            RegistryGuard {
                registry: &self.active,
                key,
            },
            token,
        ))
    }

    /// Pick an output for `source` that neither exists on disk nor is
    /// reserved by another running conversion, and reserve it.
    fn reserve_output(
        &self,
        source: &Path,
    ) -> Result<(RegistryGuard<'_, PathBuf>, PathBuf), ConvertError> {
        let path_case = self.db.path_case();
        let mut outputs = self.outputs.lock().map_err(|_| ConvertError::Poisoned)?;
        let output = output_path_where(source, |candidate| {
            !candidate.exists() && !outputs.contains_key(&path_case.key(candidate))
        });
        let key = path_case.key(&output);
        outputs.insert(key.clone(), source.to_path_buf());
        Ok((
            RegistryGuard {
                registry: &self.outputs,
                key,
            },
            output,
        ))
    }

    pub fn is_running(&self, path: &Path) -> bool {
        let key = self.db.path_case().key(path);
        self.active
            .lock()
            .map(|active| active.contains_key(&key))
            .unwrap_or(false)
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().map(|active| active.len()).unwrap_or(0)
    }

    /// Cancel the conversion of `path`. Returns false when none is running.
    pub fn cancel(&self, path: &Path) -> bool {
        let key = self.db.path_case().key(path);
        let token = match self.active.lock() {
            Ok(active) => active.get(&key).cloned(),
            Err(_) => None,
        };
        match token {
            Some(token) => {
                log::info!("Cancelling conversion of {}", path.display());
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn convert(
        &self,
        path: &Path,
        delete_original: bool,
        events: &mpsc::UnboundedSender<ConversionEvent>,
    ) -> Result<ConversionResult, ConvertError> {
        if !path.is_file() {
            return Err(ConvertError::NotFound {
                path: path.to_string_lossy().to_string(),
            });
        }
        let (_guard, token) = self.register(path)?;

        let emit = |percent: f64, status: ConversionStatus| {
            let _ = events.send(ConversionEvent::Progress {
                path: path.to_path_buf(),
                percent,
                status,
            });
        };

        let (_reservation, output) = self.reserve_output(path)?;
        emit(0.0, ConversionStatus::Started);

        let report = |percent: f64| emit(percent, ConversionStatus::Converting);
        let result = self
            .transcoder
            .transcode(path, &output, &report, &token)
            .await
            .and_then(|()| {
                if output.is_file() {
                    Ok(())
                } else {
                    Err(ConvertError::MissingOutput {
                        path: output.to_string_lossy().to_string(),
                    })
                }
            });

        if let Err(e) = result {
            if output.exists() {
                if let Err(remove_err) = fs::remove_file(&output) {
                    log::warn!(
                        "Failed to remove partial output {}: {}",
                        output.display(),
                        remove_err
                    );
                }
            }
            if token.is_cancelled() {
                log::info!("Conversion of {} cancelled", path.display());
                emit(0.0, ConversionStatus::Cancelled);
                return Err(ConvertError::Cancelled {
                    path: path.to_string_lossy().to_string(),
                });
            }
            log::error!("Conversion of {} failed: {}", path.display(), e);
            emit(0.0, ConversionStatus::Failed);
            return Err(e);
        }

        emit(100.0, ConversionStatus::Completed);
        log::info!("Converted {} to {}", path.display(), output.display());

        let original_trashed = if delete_original {
            self.retire_original(path, &output, events)
        } else {
            None
        };
        if original_trashed.is_none() {
            let moves = [(path.to_path_buf(), output.clone())];
            if let Err(e) = self.db.videos().relocate_many(&moves, true) {
                log::warn!("Failed to cache record for {}: {}", output.display(), e);
            }
        }

        Ok(ConversionResult {
            source: path.to_path_buf(),
            output,
            original_trashed,
        })
    }

    /// Trash the source of a finished conversion and hand its metadata to the output.
    fn retire_original(
        &self,
        path: &Path,
        output: &Path,
        events: &mpsc::UnboundedSender<ConversionEvent>,
    ) -> Option<TrashRecord> {
        let record = match self.trash.move_to_trash(path) {
            Ok(record) => record,
            Err(e) => {
                log::error!("Failed to trash original {}: {}", path.display(), e);
                return None;
            }
        };

        if let Err(e) = self.db.metadata().migrate(path, output) {
            log::warn!(
                "Failed to migrate metadata from {} to {}: {}",
                path.display(),
                output.display(),
                e
            );
        }
        let moves = [(path.to_path_buf(), output.to_path_buf())];
        if let Err(e) = self.db.videos().relocate_many(&moves, false) {
            log::warn!(
                "Failed to move cached record from {} to {}: {}",
                path.display(),
                output.display(),
                e
            );
        }

        let _ = events.send(ConversionEvent::VideoRemoved {
            path: path.to_path_buf(),
        });
        Some(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::VideoRecord;
    use tempfile::TempDir;

    /// Writes the output in two steps, reporting progress in between.
    struct CopyTranscoder;

    #[async_trait]
    impl Transcoder for CopyTranscoder {
        async fn transcode(
            &self,
            source: &Path,
            output: &Path,
            progress: &(dyn Fn(f64) + Send + Sync),
            _cancel: &CancellationToken,
        ) -> Result<(), ConvertError> {
            progress(50.0);
            fs::copy(source, output)?;
            Ok(())
        }
    }

    struct FailingTranscoder;

    #[async_trait]
    impl Transcoder for FailingTranscoder {
        async fn transcode(
            &self,
            _source: &Path,
            output: &Path,
            _progress: &(dyn Fn(f64) + Send + Sync),
            _cancel: &CancellationToken,
        ) -> Result<(), ConvertError> {
            fs::write(output, b"partial")?;
            Err(ToolError::Failed {
                tool: "ffmpeg".to_string(),
                status: "exit status: 1".to_string(),
                stderr: "Conversion failed!".to_string(),
            }
            .into())
        }
    }

    /// Leaves a partial file and runs until cancelled.
    struct StuckTranscoder;

    #[async_trait]
    impl Transcoder for StuckTranscoder {
        async fn transcode(
            &self,
            _source: &Path,
            output: &Path,
            progress: &(dyn Fn(f64) + Send + Sync),
            cancel: &CancellationToken,
        ) -> Result<(), ConvertError> {
            fs::write(output, b"partial")?;
            progress(10.0);
            cancel.cancelled().await;
            Err(ToolError::Cancelled {
                tool: "ffmpeg".to_string(),
            }
            .into())
        }
    }

    /// Records the output it was given, then waits for a second run to
    /// arrive before writing, so two conversions overlap.
    struct PairedTranscoder {
        barrier: tokio::sync::Barrier,
        outputs: Mutex<Vec<PathBuf>>,
    }

    #[async_trait]
    impl Transcoder for PairedTranscoder {
        async fn transcode(
            &self,
            source: &Path,
            output: &Path,
            _progress: &(dyn Fn(f64) + Send + Sync),
            _cancel: &CancellationToken,
        ) -> Result<(), ConvertError> {
            self.outputs.lock().unwrap().push(output.to_path_buf());
            self.barrier.wait().await;
            fs::copy(source, output)?;
            Ok(())
        }
    }

    struct Fixture {
        dir: TempDir,
        db: Database,
        supervisor: Arc<ConversionSupervisor>,
    }

    fn fixture(transcoder: Arc<dyn Transcoder>) -> Fixture {
        let dir = TempDir::new().unwrap();
        let db = Database::open_in_memory().unwrap();
        let trash = Arc::new(TrashBin::new(dir.path().join(".trash")));
        let supervisor = Arc::new(ConversionSupervisor::new(transcoder, db.clone(), trash));
        Fixture {
            dir,
            db,
            supervisor,
        }
    }

    impl Fixture {
        fn touch(&self, name: &str) -> PathBuf {
            let path = self.dir.path().join(name);
            fs::write(&path, b"video").unwrap();
            path
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ConversionEvent>) -> Vec<ConversionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn statuses(events: &[ConversionEvent]) -> Vec<ConversionStatus> {
        events
            .iter()
            .filter_map(|event| match event {
                ConversionEvent::Progress { status, .. } => Some(*status),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_output_path_naming() {
        let dir = TempDir::new().unwrap();
        let mkv = dir.path().join("clip.mkv");
        let mp4 = dir.path().join("movie.mp4");

        assert_eq!(output_path_for(&mkv), dir.path().join("clip.mp4"));
        assert_eq!(output_path_for(&mp4), dir.path().join("movie_converted.mp4"));

        fs::write(dir.path().join("clip.mp4"), b"x").unwrap();
        assert_eq!(output_path_for(&mkv), dir.path().join("clip_converted.mp4"));

        fs::write(dir.path().join("clip_converted.mp4"), b"x").unwrap();
        assert_eq!(
            output_path_for(&mkv),
            dir.path().join("clip_converted_2.mp4")
        );
    }

    #[test]
    fn test_parse_progress() {
        assert_eq!(parse_progress("out_time_us=5000000", Some(10.0)), Some(50.0));
        assert_eq!(parse_progress("out_time_ms=2500000", Some(10.0)), Some(25.0));
        assert_eq!(parse_progress("out_time_us=20000000", Some(10.0)), Some(99.0));
        assert_eq!(parse_progress("out_time_us=N/A", Some(10.0)), None);
        assert_eq!(parse_progress("frame=12", Some(10.0)), None);
        assert_eq!(parse_progress("out_time_us=5000000", None), None);
    }

    #[tokio::test]
    async fn test_successful_conversion_keeps_original() {
        let fx = fixture(Arc::new(CopyTranscoder));
        let source = fx.touch("clip.mkv");

        let (tx, mut rx) = mpsc::unbounded_channel();
        let result = fx.supervisor.convert(&source, false, &tx).await.unwrap();

        assert_eq!(result.output, fx.dir.path().join("clip.mp4"));
        assert!(result.output.is_file());
        assert!(source.is_file());
        assert!(result.original_trashed.is_none());
        assert_eq!(
            statuses(&drain(&mut rx)),
            vec![
                ConversionStatus::Started,
                ConversionStatus::Converting,
                ConversionStatus::Completed
            ]
        );
        assert_eq!(fx.supervisor.active_count(), 0);
    }

    #[tokio::test]
    async fn test_delete_original_trashes_and_migrates() {
        let fx = fixture(Arc::new(CopyTranscoder));
        let source = fx.touch("clip.avi");
        fx.db
            .metadata()
            .update(&source, |metadata| {
                metadata.add_tag("keep");
            })
            .unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let result = fx.supervisor.convert(&source, true, &tx).await.unwrap();

        assert!(!source.exists());
        assert!(result.original_trashed.unwrap().trashed.is_file());
        assert!(fx.db.metadata().get(&result.output).unwrap().tags.contains("keep"));
        assert!(fx.db.metadata().get(&source).unwrap().is_default());

        let events = drain(&mut rx);
        assert_eq!(
            events.last(),
            Some(&ConversionEvent::VideoRemoved { path: source })
        );
    }

    #[tokio::test]
    async fn test_failure_removes_partial_output() {
        let fx = fixture(Arc::new(FailingTranscoder));
        let source = fx.touch("clip.mkv");

        let (tx, mut rx) = mpsc::unbounded_channel();
        let err = fx.supervisor.convert(&source, true, &tx).await.unwrap_err();

        assert!(matches!(err, ConvertError::Tool(ToolError::Failed { .. })));
        assert!(!fx.dir.path().join("clip.mp4").exists());
        assert!(source.is_file());
        assert_eq!(
            statuses(&drain(&mut rx)),
            vec![ConversionStatus::Started, ConversionStatus::Failed]
        );
    }

    #[tokio::test]
    async fn test_second_conversion_of_same_path_is_rejected_and_cancel_cleans_up() {
        let fx = fixture(Arc::new(StuckTranscoder));
        let source = fx.touch("clip.mkv");

        let (tx, mut rx) = mpsc::unbounded_channel();
        let supervisor = fx.supervisor.clone();
        let first_source = source.clone();
        let first_tx = tx.clone();
        let first = tokio::spawn(async move {
            supervisor.convert(&first_source, false, &first_tx).await
        });

        // Wait until the first run is inside the transcoder.
        loop {
            match rx.recv().await.unwrap() {
                ConversionEvent::Progress {
                    status: ConversionStatus::Converting,
                    ..
                } => break,
                _ => continue,
            }
        }
        assert!(fx.supervisor.is_running(&source));

        let second = fx.supervisor.convert(&source, false, &tx).await;
        assert!(matches!(second, Err(ConvertError::AlreadyRunning { .. })));

        assert!(fx.supervisor.cancel(&source));
        let result = first.await.unwrap();
        assert!(matches!(result, Err(ConvertError::Cancelled { .. })));
        assert!(!fx.dir.path().join("clip.mp4").exists());
        assert!(source.is_file());
        assert!(!fx.supervisor.is_running(&source));
        assert!(!fx.supervisor.cancel(&source));
    }

    #[tokio::test]
    async fn test_concurrent_conversions_never_share_an_output() {
        let transcoder = Arc::new(PairedTranscoder {
            barrier: tokio::sync::Barrier::new(2),
            outputs: Mutex::new(Vec::new()),
        });
        let fx = fixture(transcoder.clone());
        let mkv = fx.touch("clip.mkv");
        let avi = fx.touch("clip.avi");

        let (tx, _rx) = mpsc::unbounded_channel();
        let (first, second) = tokio::join!(
            fx.supervisor.convert(&mkv, true, &tx),
            fx.supervisor.convert(&avi, true, &tx)
        );
        let first = first.unwrap();
        let second = second.unwrap();

        assert_eq!(first.output, fx.dir.path().join("clip.mp4"));
        assert_eq!(second.output, fx.dir.path().join("clip_converted.mp4"));
        assert_eq!(
            *transcoder.outputs.lock().unwrap(),
            vec![first.output.clone(), second.output.clone()]
        );
        assert!(first.output.is_file());
        assert!(second.output.is_file());
        assert!(!mkv.exists());
        assert!(!avi.exists());
        assert_eq!(fx.supervisor.active_count(), 0);

        assert!(fx.supervisor.outputs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_conversion_output_joins_snapshot() {
        let fx = fixture(Arc::new(CopyTranscoder));
        let source = fx.touch("clip.mkv");
        let record = VideoRecord {
            id: "vid_1".to_string(),
            path: source.clone(),
            name: "clip".to_string(),
            extension: ".mkv".to_string(),
            size: 5,
            created_at: "2024-01-01T00:00:00+00:00".to_string(),
            thumbnail_path: None,
            duration: Some(30),
            is_favorite: false,
            tags: Vec::new(),
            last_played_time: None,
            product_code: None,
        };
        fx.db
            .videos()
            .replace_folder(fx.dir.path(), &[record])
            .unwrap();

        let (tx, _rx) = mpsc::unbounded_channel();
        let result = fx.supervisor.convert(&source, false, &tx).await.unwrap();

        let cached = fx.db.videos().load_all().unwrap();
        assert_eq!(cached.len(), 2);
        assert_eq!(cached[0].path, source);
        assert_eq!(cached[1].path, result.output);
        assert_eq!(cached[1].extension, ".mp4");
        assert_eq!(cached[1].duration, Some(30));
    }

    #[tokio::test]
    async fn test_missing_source() {
        let fx = fixture(Arc::new(CopyTranscoder));
        let (tx, _rx) = mpsc::unbounded_channel();

        let err = fx
            .supervisor
            .convert(&fx.dir.path().join("nope.mkv"), false, &tx)
            .await
            .unwrap_err();
        assert!(matches!(err, ConvertError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_missing_ffmpeg() {
        use crate::media::probe::FfprobeProber;

        let dir = TempDir::new().unwrap();
        let source = dir.path().join("clip.mkv");
        fs::write(&source, b"video").unwrap();
        let durations = DurationService::new(Arc::new(FfprobeProber::new(
            "vidshelf-no-such-ffprobe",
            Duration::from_secs(5),
        )));
        let transcoder = FfmpegTranscoder::new("vidshelf-no-such-ffmpeg", durations);

        let err = transcoder
            .transcode(
                &source,
                &dir.path().join("clip.mp4"),
                &|_| {},
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ConvertError::Tool(ToolError::NotFound { .. })));
    }
}
