//! Plain data types persisted by the session store.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::media::content_hash;
use crate::media::types::TranscodeRequest;

/// Lifecycle state of a transcode session.
///
/// `Completed`, `Failed`, `Cancelled` and `Timeout` are terminal; a session
/// in a terminal state never leaves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Queued,
    Starting,
    Running,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Queued => "queued",
            SessionStatus::Starting => "starting",
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Cancelled => "cancelled",
            SessionStatus::Timeout => "timeout",
        }
    }

    pub fn parse(s: &str) -> Option<SessionStatus> {
        match s {
            "pending" => Some(SessionStatus::Pending),
            "queued" => Some(SessionStatus::Queued),
            "starting" => Some(SessionStatus::Starting),
            "running" => Some(SessionStatus::Running),
            "completed" => Some(SessionStatus::Completed),
            "failed" => Some(SessionStatus::Failed),
            "cancelled" => Some(SessionStatus::Cancelled),
            "timeout" => Some(SessionStatus::Timeout),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed
                | SessionStatus::Failed
                | SessionStatus::Cancelled
                | SessionStatus::Timeout
        )
    }

    /// All non-terminal states, in lifecycle order.
    pub const ACTIVE: [SessionStatus; 4] = [
        SessionStatus::Pending,
        SessionStatus::Queued,
        SessionStatus::Starting,
        SessionStatus::Running,
    ];

    /// The statically allowed transition table.
    pub fn can_transition_to(&self, to: SessionStatus) -> bool {
        use SessionStatus::*;
        match self {
            Pending => matches!(to, Queued | Starting | Cancelled | Failed),
            Queued => matches!(to, Starting | Cancelled | Failed | Timeout),
            Starting => matches!(to, Running | Failed | Cancelled | Timeout),
            Running => matches!(to, Completed | Failed | Cancelled | Timeout),
            _ => false,
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Worker statistics refreshed while a session runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionStats {
    /// Size of the input in bytes, filled once at start when known.
    pub bytes_in: u64,
    /// Bytes written to the output so far.
    pub bytes_out: u64,
    /// Frames processed.
    pub frames: u64,
    /// Current encode rate in frames per second.
    pub fps: f64,
    /// Current output bitrate in kbit/s.
    pub bitrate_kbps: f64,
    /// Encode speed as a multiple of realtime.
    pub speed: f64,
    /// Worker process CPU usage in percent.
    pub cpu_percent: f32,
    /// Worker process resident memory in bytes.
    pub mem_bytes: u64,
    /// Media seconds processed so far.
    pub out_time_seconds: f64,
    /// Estimated seconds until completion, when derivable.
    pub eta_seconds: Option<f64>,
}

/// A tracked transcode session from request to terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Unique session identifier.
    pub id: Uuid,
    /// Content fingerprint shared by all sessions for the same output.
    pub content_hash: String,
    /// Identifier of the provider selected for this session.
    pub provider_id: String,
    pub status: SessionStatus,
    /// Monotonically non-decreasing progress in [0, 100].
    pub progress_percent: f64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Private workspace directory for in-flight output.
    pub directory_path: PathBuf,
    pub error_message: Option<String>,
    /// The originating request, persisted verbatim.
    pub request: TranscodeRequest,
    pub stats: SessionStats,
}

impl Session {
    /// Builds a fresh `pending` session for a request. The workspace
    /// directory is assigned by the caller once the id is known.
    pub fn new(provider_id: &str, request: TranscodeRequest) -> Self {
        let hash = content_hash(&request);
        Session {
            id: Uuid::new_v4(),
            content_hash: hash,
            provider_id: provider_id.to_string(),
            status: SessionStatus::Pending,
            progress_percent: 0.0,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            directory_path: PathBuf::new(),
            error_message: None,
            request,
            stats: SessionStats::default(),
        }
    }
}

/// Criteria for filtering session queries.
#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    /// Match by status.
    pub status: Option<SessionStatus>,
    /// Match by content hash.
    pub content_hash: Option<String>,
}
