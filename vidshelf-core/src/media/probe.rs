use crate::media::tools::{ToolError, ToolRunner};
use async_trait::async_trait;
use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error("Unreadable duration in prober output: {output:?}")]
    InvalidOutput { output: String },
}

impl ProbeError {
    pub fn is_missing(&self) -> bool {
        matches!(self, ProbeError::Tool(e) if e.is_missing())
    }

    pub fn missing_tool(&self) -> Option<&str> {
        match self {
            ProbeError::Tool(e) => e.missing_tool(),
            _ => None,
        }
    }
}

/// External media-probing tool: reports the container duration in seconds.
#[async_trait]
pub trait MediaProber: Send + Sync {
    async fn duration(&self, path: &Path) -> Result<f64, ProbeError>;
}

/// `ffprobe`-backed prober.
pub struct FfprobeProber {
    runner: ToolRunner,
}

impl FfprobeProber {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            runner: ToolRunner::new(command, timeout),
        }
    }
}

#[async_trait]
impl MediaProber for FfprobeProber {
    async fn duration(&self, path: &Path) -> Result<f64, ProbeError> {
        let output = self
            .runner
            .output([
                OsStr::new("-v"),
                OsStr::new("error"),
                OsStr::new("-show_entries"),
                OsStr::new("format=duration"),
                OsStr::new("-of"),
                OsStr::new("default=noprint_wrappers=1:nokey=1"),
                path.as_os_str(),
            ])
            .await?;

        parse_duration(&String::from_utf8_lossy(&output.stdout))
    }
}

pub(crate) fn parse_duration(output: &str) -> Result<f64, ProbeError> {
    output
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .and_then(|line| line.parse::<f64>().ok())
        .filter(|seconds| seconds.is_finite() && *seconds >= 0.0)
        .ok_or_else(|| ProbeError::InvalidOutput {
            output: output.trim().to_string(),
        })
}

/// Duration lookups with per-file failures degraded to `None`.
#[derive(Clone)]
pub struct DurationService {
    prober: Arc<dyn MediaProber>,
}

impl DurationService {
    pub fn new(prober: Arc<dyn MediaProber>) -> Self {
        Self { prober }
    }

    /// Whole seconds, floored.
    pub async fn try_probe(&self, path: &Path) -> Result<u64, ProbeError> {
        let seconds = self.prober.duration(path).await?;
        Ok(seconds.floor() as u64)
    }

    pub async fn probe(&self, path: &Path) -> Option<u64> {
        match self.try_probe(path).await {
            Ok(seconds) => Some(seconds),
            Err(e) => {
                log::warn!("Failed to probe duration of {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Raw fractional duration, used for seek and progress calculations.
    pub async fn seconds(&self, path: &Path) -> Result<f64, ProbeError> {
        self.prober.duration(path).await
    }
}
