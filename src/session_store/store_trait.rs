//! Session Store trait
//!
//! Defines the interface session store backends implement. The store owns
//! session records exclusively: status moves only through the
//! compare-and-set primitive, and terminal states are absorbing. All
//! methods return a `Result` so persistence failures surface to the caller;
//! the store itself never retries.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error_handling::types::StoreError;
use crate::session_store::types::{Session, SessionFilter, SessionStats, SessionStatus};

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Inserts a new `pending` session. Fails with
    /// [`StoreError::DuplicateActive`] when a non-terminal session already
    /// exists for the same content hash; the check and insert are atomic.
    async fn create_session(&self, session: Session) -> Result<Session, StoreError>;

    /// Atomic compare-and-set status transition. The transition is applied
    /// only when the current status is in `from`; otherwise
    /// [`StoreError::IllegalTransition`] is returned. Entering `starting`
    /// records `started_at`; entering a terminal state records `ended_at`
    /// and `reason`, durably, before this returns.
    async fn update_status(
        &self,
        id: Uuid,
        from: &[SessionStatus],
        to: SessionStatus,
        reason: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Refreshes progress and stats without touching status.
    /// Last-writer-wins.
    async fn update_progress(
        &self,
        id: Uuid,
        progress_percent: f64,
        stats: &SessionStats,
    ) -> Result<(), StoreError>;

    /// Terminal transition to `completed`; pins progress to 100.
    async fn complete_session(&self, id: Uuid) -> Result<(), StoreError>;

    /// Terminal transition to `failed` with a diagnostic.
    async fn fail_session(&self, id: Uuid, error: &str) -> Result<(), StoreError>;

    /// Terminal transition to `cancelled`.
    async fn cancel_session(&self, id: Uuid, reason: &str) -> Result<(), StoreError>;

    async fn get_session(&self, id: Uuid) -> Result<Option<Session>, StoreError>;

    /// Non-terminal sessions for a content hash (the dedup lookup).
    async fn list_active_by_content_hash(&self, hash: &str) -> Result<Vec<Session>, StoreError>;

    /// All non-terminal sessions.
    async fn list_active(&self) -> Result<Vec<Session>, StoreError>;

    /// Sessions matching an optional filter.
    async fn list_sessions(&self, filter: Option<SessionFilter>) -> Result<Vec<Session>, StoreError>;

    /// Deletes terminal sessions that ended before `cutoff`; returns the
    /// number of purged records.
    async fn purge_terminal_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError>;
}
