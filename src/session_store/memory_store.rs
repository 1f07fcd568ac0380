//! In-memory session store.
//!
//! Non-durable backend with the same semantics as the SQLite store,
//! including the dedup invariant and the compare-and-set rules. Used by
//! tests and available for ephemeral deployments.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error_handling::types::StoreError;
use crate::session_store::store_trait::SessionStore;
use crate::session_store::types::{Session, SessionFilter, SessionStats, SessionStatus};

#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<Uuid, Session>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<Uuid, Session>>, StoreError> {
        self.sessions.lock().map_err(|_| StoreError::WriteFailed)
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create_session(&self, session: Session) -> Result<Session, StoreError> {
        let mut sessions = self.lock()?;
        if let Some(active) = sessions
            .values()
            .find(|s| s.content_hash == session.content_hash && !s.status.is_terminal())
        {
            return Err(StoreError::DuplicateActive(active.id));
        }
        sessions.insert(session.id, session.clone());
        Ok(session)
    }

    async fn update_status(
        &self,
        id: Uuid,
        from: &[SessionStatus],
        to: SessionStatus,
        reason: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut sessions = self.lock()?;
        let session = sessions.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if session.status.is_terminal() || !from.contains(&session.status) {
            return Err(StoreError::IllegalTransition {
                current: session.status,
                requested: to,
            });
        }
        session.status = to;
        if to == SessionStatus::Starting {
            session.started_at = Some(Utc::now());
        }
        if to.is_terminal() {
            session.ended_at = Some(Utc::now());
            session.error_message = reason.map(|r| r.to_string());
        }
        Ok(())
    }

    async fn update_progress(
        &self,
        id: Uuid,
        progress_percent: f64,
        stats: &SessionStats,
    ) -> Result<(), StoreError> {
        let mut sessions = self.lock()?;
        let session = sessions.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        session.progress_percent = progress_percent;
        session.stats = stats.clone();
        Ok(())
    }

    async fn complete_session(&self, id: Uuid) -> Result<(), StoreError> {
        self.update_status(id, &[SessionStatus::Running], SessionStatus::Completed, None)
            .await?;
        let mut sessions = self.lock()?;
        if let Some(session) = sessions.get_mut(&id) {
            session.progress_percent = 100.0;
        }
        Ok(())
    }

    async fn fail_session(&self, id: Uuid, error: &str) -> Result<(), StoreError> {
        self.update_status(
            id,
            &SessionStatus::ACTIVE,
            SessionStatus::Failed,
            Some(error),
        )
        .await
    }

    async fn cancel_session(&self, id: Uuid, reason: &str) -> Result<(), StoreError> {
        self.update_status(
            id,
            &SessionStatus::ACTIVE,
            SessionStatus::Cancelled,
            Some(reason),
        )
        .await
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<Session>, StoreError> {
        Ok(self.lock()?.get(&id).cloned())
    }

    async fn list_active_by_content_hash(&self, hash: &str) -> Result<Vec<Session>, StoreError> {
        let sessions = self.lock()?;
        let mut found: Vec<Session> = sessions
            .values()
            .filter(|s| s.content_hash == hash && !s.status.is_terminal())
            .cloned()
            .collect();
        found.sort_by_key(|s| s.created_at);
        Ok(found)
    }

    async fn list_active(&self) -> Result<Vec<Session>, StoreError> {
        let sessions = self.lock()?;
        Ok(sessions
            .values()
            .filter(|s| !s.status.is_terminal())
            .cloned()
            .collect())
    }

    async fn list_sessions(
        &self,
        filter: Option<SessionFilter>,
    ) -> Result<Vec<Session>, StoreError> {
        let sessions = self.lock()?;
        let mut found: Vec<Session> = sessions
            .values()
            .filter(|s| match &filter {
                Some(f) => {
                    f.status.map_or(true, |status| s.status == status)
                        && f.content_hash
                            .as_deref()
                            .map_or(true, |hash| s.content_hash == hash)
                }
                None => true,
            })
            .cloned()
            .collect();
        found.sort_by_key(|s| s.created_at);
        Ok(found)
    }

    async fn purge_terminal_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut sessions = self.lock()?;
        let before = sessions.len();
        sessions.retain(|_, s| {
            !(s.status.is_terminal() && s.ended_at.map_or(false, |ended| ended < cutoff))
        });
        Ok(before - sessions.len())
    }
}
