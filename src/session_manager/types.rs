use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::session_store::types::{Session, SessionStats, SessionStatus};

/// Caller-facing reference to a session.
#[derive(Debug, Clone, Serialize)]
pub struct TranscodeHandle {
    pub session_id: Uuid,
    pub provider_id: String,
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
    pub directory_path: PathBuf,
    /// Status at the time the handle was produced.
    pub status: SessionStatus,
    /// Canonical artifact directory, once published.
    pub artifact_path: Option<PathBuf>,
}

impl TranscodeHandle {
    pub fn from_session(session: &Session) -> Self {
        Self {
            session_id: session.id,
            provider_id: session.provider_id.clone(),
            content_hash: session.content_hash.clone(),
            created_at: session.created_at,
            directory_path: session.directory_path.clone(),
            status: session.status,
            artifact_path: None,
        }
    }
}

/// Point-in-time progress report for a session.
#[derive(Debug, Clone, Serialize)]
pub struct Progress {
    pub status: SessionStatus,
    pub progress_percent: f64,
    pub stats: SessionStats,
    pub estimated_time_remaining_seconds: Option<f64>,
}

/// Runtime bookkeeping for one in-flight session.
pub struct ActiveTranscode {
    /// Cancels the queued wait or the running supervisor.
    pub cancel: CancellationToken,
    pub content_hash: String,
    /// Driver task handle, awaited during shutdown drain.
    pub handle: Option<JoinHandle<()>>,
}

/// Registry of in-flight sessions, shared with the cleanup service for
/// orphan detection (read-only there).
pub type ActiveSessions = Arc<Mutex<HashMap<Uuid, ActiveTranscode>>>;
