//! Duration probing for assembled media files.

use crate::services::errors::{UploadError, UploadResult};
use async_trait::async_trait;
use std::{path::Path, time::Duration};
use tokio::process::Command;
use tracing::debug;

/// Reports the real playback duration of a local media file.
#[async_trait]
pub trait MediaProbe: Send + Sync {
    /// Fails with `UploadError::UnreadableMedia` if the file cannot be decoded.
    async fn duration(&self, path: &Path) -> UploadResult<Duration>;
}

const PROBE_TIMEOUT: Duration = Duration::from_secs(120);

/// `MediaProbe` backed by the `ffprobe` binary.
#[derive(Clone, Debug)]
pub struct FfprobeMediaProbe {
    binary: String,
}

impl FfprobeMediaProbe {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl MediaProbe for FfprobeMediaProbe {
    async fn duration(&self, path: &Path) -> UploadResult<Duration> {
        let output = Command::new(&self.binary)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(path)
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(PROBE_TIMEOUT, output)
            .await
            .map_err(|_| UploadError::UnreadableMedia("ffprobe timed out".into()))?
            .map_err(|err| UploadError::UnreadableMedia(format!("could not run ffprobe: {}", err)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(UploadError::UnreadableMedia(format!(
                "ffprobe exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let duration = parse_duration(&stdout)?;
        debug!(path = %path.display(), seconds = duration.as_secs_f64(), "probed media duration");
        Ok(duration)
    }
}

/// Parse the `format=duration` value printed by ffprobe.
fn parse_duration(output: &str) -> UploadResult<Duration> {
    let value = output
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .ok_or_else(|| UploadError::UnreadableMedia("ffprobe reported no duration".into()))?;

    match value.parse::<f64>() {
        Ok(seconds) if seconds.is_finite() && seconds >= 0.0 => Ok(Duration::from_secs_f64(seconds)),
        _ => Err(UploadError::UnreadableMedia(format!(
            "unexpected duration `{}`",
            value
        ))),
    }
}
