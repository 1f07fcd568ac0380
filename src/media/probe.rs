//! Media metadata collaborator.
//!
//! The orchestrator needs the input duration to turn the codec tool's
//! `out_time` ticks into a progress percentage. Lookup goes through the
//! [`MediaMetadataService`] trait so deployments can plug in their catalog
//! service; the shipped implementation shells out to `ffprobe`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::{debug, warn};

use crate::error_handling::types::ProbeError;
use crate::media::types::MediaInfo;

#[async_trait]
pub trait MediaMetadataService: Send + Sync {
    /// Resolves metadata for a media item. `input_path` is the path the
    /// caller supplied in the request; implementations may use either key.
    async fn lookup(&self, media_id: &str, input_path: &Path) -> Result<MediaInfo, ProbeError>;
}

/// Metadata service that probes the input file with `ffprobe`.
pub struct FfprobeMetadataService {
    ffprobe_path: PathBuf,
}

impl FfprobeMetadataService {
    pub fn new<P: AsRef<Path>>(ffprobe_path: P) -> Self {
        Self {
            ffprobe_path: ffprobe_path.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl MediaMetadataService for FfprobeMetadataService {
    async fn lookup(&self, media_id: &str, input_path: &Path) -> Result<MediaInfo, ProbeError> {
        debug!(
            "Probing media {} at {} with {}",
            media_id,
            input_path.display(),
            self.ffprobe_path.display()
        );

        let output = tokio::process::Command::new(&self.ffprobe_path)
            .arg("-v")
            .arg("error")
            .arg("-show_entries")
            .arg("format=duration")
            .arg("-of")
            .arg("default=nw=1:nk=1")
            .arg(input_path.as_os_str())
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("ffprobe failed for {}: {}", input_path.display(), stderr.trim());
            return Err(ProbeError::ToolFailed(stderr.trim().to_string()));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let first = stdout.lines().next().unwrap_or_default().trim();
        let duration = first
            .parse::<f64>()
            .map_err(|_| ProbeError::Unparseable(first.to_string()))?;

        let size_bytes = tokio::fs::metadata(input_path).await.ok().map(|m| m.len());

        Ok(MediaInfo {
            duration_seconds: if duration > 0.0 { Some(duration) } else { None },
            size_bytes,
        })
    }
}
