use std::path::PathBuf;

use serde::Deserialize;

use crate::media::types::{AudioCodec, Container, VideoCodec};

/// Which session store backend to run.
#[derive(Debug, PartialEq, Clone, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// SQLite database (durable; the default).
    Database,
    /// In-memory store (sessions do not survive restarts).
    Memory,
}

impl Default for StorageBackend {
    fn default() -> Self {
        StorageBackend::Database
    }
}

/// Storage roots and database location.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Root directory for workspaces and published artifacts.
    pub root: PathBuf,
    /// SeaORM DSN for the session database. Defaults to a SQLite file
    /// under the storage root.
    #[serde(default)]
    pub database_url: Option<String>,
    #[serde(default)]
    pub backend: StorageBackend,
}

/// Concurrency and timing limits.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_concurrent_sessions")]
    pub max_concurrent_sessions: usize,
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
    #[serde(default = "default_queue_timeout_secs")]
    pub queue_timeout_secs: u64,
    #[serde(default = "default_session_timeout_secs")]
    pub session_timeout_secs: u64,
    /// Grace window between the polite stop signal and the forced kill.
    #[serde(default = "default_stop_grace_secs")]
    pub stop_grace_secs: u64,
    /// How long shutdown waits for in-flight sessions to drain.
    #[serde(default = "default_shutdown_drain_secs")]
    pub shutdown_drain_secs: u64,
    /// Cool-down applied to a provider after a launch failure.
    #[serde(default = "default_provider_quarantine_secs")]
    pub provider_quarantine_secs: u64,
    /// Cadence of progress writes to the session store, in milliseconds.
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_concurrent_sessions: default_max_concurrent_sessions(),
            max_queue_size: default_max_queue_size(),
            queue_timeout_secs: default_queue_timeout_secs(),
            session_timeout_secs: default_session_timeout_secs(),
            stop_grace_secs: default_stop_grace_secs(),
            shutdown_drain_secs: default_shutdown_drain_secs(),
            provider_quarantine_secs: default_provider_quarantine_secs(),
            progress_interval_ms: default_progress_interval_ms(),
        }
    }
}

fn default_max_concurrent_sessions() -> usize {
    4
}
fn default_max_queue_size() -> usize {
    16
}
fn default_queue_timeout_secs() -> u64 {
    120
}
fn default_session_timeout_secs() -> u64 {
    4 * 3600
}
fn default_stop_grace_secs() -> u64 {
    5
}
fn default_shutdown_drain_secs() -> u64 {
    15
}
fn default_provider_quarantine_secs() -> u64 {
    300
}
fn default_progress_interval_ms() -> u64 {
    1000
}

/// Retention and eviction policy for the cleanup service.
#[derive(Debug, Clone, Deserialize)]
pub struct CleanupConfig {
    #[serde(default = "default_cleanup_interval_secs")]
    pub interval_secs: u64,
    /// Terminal sessions older than this are purged.
    #[serde(default = "default_session_retention_secs")]
    pub session_retention_secs: u64,
    /// Artifacts above the size threshold are evicted after this age.
    #[serde(default = "default_large_artifact_retention_secs")]
    pub large_artifact_retention_secs: u64,
    #[serde(default = "default_artifact_size_threshold_bytes")]
    pub artifact_size_threshold_bytes: u64,
    /// Total store cap; least-recently-published artifacts are evicted
    /// beyond it. Zero disables the cap.
    #[serde(default)]
    pub max_store_bytes: u64,
    /// Grace after startup before non-terminal sessions without a live
    /// supervisor are swept as orphans.
    #[serde(default = "default_orphan_grace_secs")]
    pub orphan_grace_secs: u64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_cleanup_interval_secs(),
            session_retention_secs: default_session_retention_secs(),
            large_artifact_retention_secs: default_large_artifact_retention_secs(),
            artifact_size_threshold_bytes: default_artifact_size_threshold_bytes(),
            max_store_bytes: 0,
            orphan_grace_secs: default_orphan_grace_secs(),
        }
    }
}

fn default_cleanup_interval_secs() -> u64 {
    300
}
fn default_session_retention_secs() -> u64 {
    7 * 24 * 3600
}
fn default_large_artifact_retention_secs() -> u64 {
    24 * 3600
}
fn default_artifact_size_threshold_bytes() -> u64 {
    8 * 1024 * 1024 * 1024
}
fn default_orphan_grace_secs() -> u64 {
    120
}

/// Codec tool locations.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,
    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: PathBuf,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            ffprobe_path: default_ffprobe_path(),
        }
    }
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}
fn default_ffprobe_path() -> PathBuf {
    PathBuf::from("ffprobe")
}

/// One provider declaration from the configuration file.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ProviderConfig {
    /// Builtin provider driving the configured ffmpeg binary.
    Ffmpeg {
        id: String,
        #[serde(default)]
        display_name: Option<String>,
        #[serde(default)]
        priority: i32,
        /// Overrides the global ffmpeg path for this provider.
        #[serde(default)]
        executable: Option<PathBuf>,
        #[serde(default)]
        hw_accel: bool,
        #[serde(default)]
        containers: Option<Vec<Container>>,
        #[serde(default)]
        video_codecs: Option<Vec<VideoCodec>>,
        #[serde(default)]
        audio_codecs: Option<Vec<AudioCodec>>,
        #[serde(default)]
        max_concurrent: Option<u32>,
    },
    /// Out-of-process plugin provider; identity and capabilities come from
    /// its handshake.
    Plugin {
        command: PathBuf,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default = "default_plugin_handshake_timeout_secs")]
        handshake_timeout_secs: u64,
    },
}

fn default_plugin_handshake_timeout_secs() -> u64 {
    10
}
