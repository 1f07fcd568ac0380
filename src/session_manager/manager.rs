use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error_handling::types::{
    AdmissionError, ProviderError, StoreError, TranscodeError,
};
use crate::media::content_hash;
use crate::media::probe::MediaMetadataService;
use crate::media::types::TranscodeRequest;
use crate::provider_registry::provider::TranscodeProvider;
use crate::resource_manager::{AdmissionSlot, QueueSeat, ResourceManager};
use crate::session_manager::types::{ActiveSessions, ActiveTranscode, Progress, TranscodeHandle};
use crate::session_store::types::{Session, SessionFilter, SessionStatus};
use crate::worker_supervisor::supervisor::{run_session, SupervisorContext};

enum Admission {
    Immediate(AdmissionSlot),
    Queued(QueueSeat),
}

/// The orchestrator's public core.
///
/// `start_transcode` runs dedup, selection and admission triage inline so
/// capacity rejections are synchronous, then hands the session to a
/// detached driver task that waits for a slot (when queued) and runs the
/// supervisor.
pub struct SessionManager {
    ctx: Arc<SupervisorContext>,
    resources: Arc<ResourceManager>,
    metadata: Arc<dyn MediaMetadataService>,
    active: ActiveSessions,
    shutdown: CancellationToken,
}

impl SessionManager {
    pub fn new(
        ctx: Arc<SupervisorContext>,
        resources: Arc<ResourceManager>,
        metadata: Arc<dyn MediaMetadataService>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            ctx,
            resources,
            metadata,
            active: Arc::new(Mutex::new(HashMap::new())),
            shutdown,
        }
    }

    /// In-flight session registry, shared with the cleanup service.
    pub fn active_sessions(&self) -> ActiveSessions {
        self.active.clone()
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().map(|map| map.len()).unwrap_or(0)
    }

    /// Starts (or dedups onto) a transcode for the request and returns a
    /// handle immediately; the work itself runs on a detached task.
    pub async fn start_transcode(
        &self,
        request: TranscodeRequest,
    ) -> Result<TranscodeHandle, TranscodeError> {
        request.validate()?;
        let hash = content_hash(&request);

        // Dedup: a live session for the same hash is the same work.
        if let Some(existing) = self
            .ctx
            .store
            .list_active_by_content_hash(&hash)
            .await?
            .into_iter()
            .next()
        {
            debug!(
                "Deduplicating request for media {} onto active session {}",
                request.media_id, existing.id
            );
            return Ok(self.handle_for(&existing));
        }

        // Dedup: a completed session whose artifact still exists resolves
        // immediately to a terminal handle.
        if let Some(artifact) = self.ctx.content_store.lookup(&hash)? {
            let completed = self
                .ctx
                .store
                .list_sessions(Some(SessionFilter {
                    status: Some(SessionStatus::Completed),
                    content_hash: Some(hash.clone()),
                }))
                .await?;
            if let Some(done) = completed.into_iter().last() {
                debug!(
                    "Request for media {} already satisfied by artifact {}",
                    request.media_id, hash
                );
                let mut handle = self.handle_for(&done);
                handle.artifact_path = Some(artifact.path);
                return Ok(handle);
            }
        }

        let provider = self.ctx.registry.select(&request).map_err(|e| match e {
            ProviderError::NoCompatibleProvider => TranscodeError::NoCompatibleProvider,
            other => TranscodeError::ProviderUnavailable(other.to_string()),
        })?;
        let provider_id = provider.info().id;

        // Metadata failures degrade to indeterminate progress, never to a
        // rejected request.
        let media_info = match self
            .metadata
            .lookup(&request.media_id, &request.input_path)
            .await
        {
            Ok(info) => info,
            Err(e) => {
                warn!(
                    "Metadata lookup failed for media {}: {}; progress will be indeterminate",
                    request.media_id, e
                );
                Default::default()
            }
        };

        let mut session = Session::new(&provider_id, request);
        session.directory_path = self.ctx.content_store.workspace_path(session.id);
        let session = match self.ctx.store.create_session(session).await {
            Ok(session) => session,
            Err(StoreError::DuplicateActive(winner)) => {
                // Lost the creation race against an identical request;
                // both callers observe the winner's session.
                debug!("Lost dedup race; returning session {}", winner);
                let winner = self
                    .ctx
                    .store
                    .get_session(winner)
                    .await?
                    .ok_or_else(|| TranscodeError::Storage("dedup winner vanished".into()))?;
                return Ok(self.handle_for(&winner));
            }
            Err(e) => return Err(e.into()),
        };
        let id = session.id;

        let cancel = self.shutdown.child_token();
        let admission = match self.resources.try_admit() {
            Some(slot) => {
                self.ctx
                    .store
                    .update_status(id, &[SessionStatus::Pending], SessionStatus::Starting, None)
                    .await?;
                Admission::Immediate(slot)
            }
            None => match self.resources.reserve_seat() {
                Ok(seat) => {
                    self.ctx
                        .store
                        .update_status(id, &[SessionStatus::Pending], SessionStatus::Queued, None)
                        .await?;
                    Admission::Queued(seat)
                }
                Err(AdmissionError::AtCapacity) => {
                    if let Err(e) = self
                        .ctx
                        .store
                        .fail_session(id, "rejected: admission queue full")
                        .await
                    {
                        error!("Session {}: capacity rejection write failed: {}", id, e);
                    }
                    return Err(TranscodeError::AtCapacity);
                }
                Err(e) => return Err(e.into()),
            },
        };

        self.ctx.registry.session_started(&provider_id);
        if let Ok(mut map) = self.active.lock() {
            map.insert(
                id,
                ActiveTranscode {
                    cancel: cancel.clone(),
                    content_hash: hash,
                    handle: None,
                },
            );
        }

        let handle_snapshot = {
            let mut handle = self.handle_for(&session);
            handle.status = match &admission {
                Admission::Immediate(_) => SessionStatus::Starting,
                Admission::Queued(_) => SessionStatus::Queued,
            };
            handle
        };

        let driver = {
            let ctx = self.ctx.clone();
            let resources = self.resources.clone();
            let active = self.active.clone();
            let provider_id = provider_id.clone();
            tokio::spawn(async move {
                drive_session(
                    ctx.clone(),
                    resources,
                    provider,
                    session,
                    media_info.duration_seconds,
                    media_info.size_bytes,
                    cancel,
                    admission,
                )
                .await;
                ctx.registry.session_ended(&provider_id);
                if let Ok(mut map) = active.lock() {
                    map.remove(&id);
                }
            })
        };
        if let Ok(mut map) = self.active.lock() {
            if let Some(entry) = map.get_mut(&id) {
                entry.handle = Some(driver);
            }
        }

        Ok(handle_snapshot)
    }

    /// Progress report for a session.
    pub async fn get_progress(&self, id: Uuid) -> Result<Progress, TranscodeError> {
        let session = self
            .ctx
            .store
            .get_session(id)
            .await?
            .ok_or(TranscodeError::NotFound(id))?;
        Ok(Progress {
            status: session.status,
            progress_percent: session.progress_percent,
            estimated_time_remaining_seconds: session.stats.eta_seconds,
            stats: session.stats,
        })
    }

    /// Stops a session. Idempotent: stopping a terminal or unknown session
    /// succeeds silently.
    pub async fn stop_transcode(&self, id: Uuid) -> Result<(), TranscodeError> {
        let cancel = self
            .active
            .lock()
            .ok()
            .and_then(|map| map.get(&id).map(|entry| entry.cancel.clone()));
        if let Some(cancel) = cancel {
            info!("Stop requested for in-flight session {}", id);
            cancel.cancel();
            return Ok(());
        }

        match self.ctx.store.get_session(id).await? {
            None => Ok(()),
            Some(session) if session.status.is_terminal() => Ok(()),
            Some(_) => {
                // No live supervisor owns it (e.g. orphaned); settle the
                // record directly.
                match self.ctx.store.cancel_session(id, "stopped by caller").await {
                    Ok(()) => Ok(()),
                    Err(StoreError::IllegalTransition { .. }) => Ok(()),
                    Err(e) => Err(e.into()),
                }
            }
        }
    }

    /// Blocks until the session reaches a terminal state, mapping
    /// non-success outcomes onto the public error kinds.
    pub async fn wait_for_completion(&self, id: Uuid) -> Result<Session, TranscodeError> {
        loop {
            let session = self.get_session(id).await?;
            match session.status {
                SessionStatus::Completed => return Ok(session),
                SessionStatus::Cancelled => return Err(TranscodeError::Cancelled),
                SessionStatus::Timeout => {
                    // A session that never started timed out while queued.
                    if session.started_at.is_none() {
                        return Err(TranscodeError::QueueTimeout);
                    }
                    return Err(TranscodeError::Timeout);
                }
                SessionStatus::Failed => {
                    let diagnostic = session.error_message.unwrap_or_default();
                    if let Some(rest) = diagnostic.strip_prefix("provider unavailable: ") {
                        return Err(TranscodeError::ProviderUnavailable(rest.to_string()));
                    }
                    return Err(TranscodeError::WorkerFailed {
                        exit_code: None,
                        diagnostic,
                    });
                }
                _ => tokio::time::sleep(Duration::from_millis(100)).await,
            }
        }
    }

    pub async fn get_session(&self, id: Uuid) -> Result<Session, TranscodeError> {
        self.ctx
            .store
            .get_session(id)
            .await?
            .ok_or(TranscodeError::NotFound(id))
    }

    pub async fn list_sessions(
        &self,
        filter: Option<SessionFilter>,
    ) -> Result<Vec<Session>, TranscodeError> {
        Ok(self.ctx.store.list_sessions(filter).await?)
    }

    pub fn list_providers(&self) -> Vec<crate::provider_registry::types::ProviderDescriptor> {
        self.ctx.registry.descriptors()
    }

    /// Cancels every in-flight session and waits for the drivers to drain,
    /// up to `drain_timeout` overall.
    pub async fn shutdown(&self, drain_timeout: Duration) {
        info!(
            "Shutting down session manager ({} in-flight session(s))",
            self.active_count()
        );
        self.shutdown.cancel();

        let handles: Vec<(Uuid, tokio::task::JoinHandle<()>)> = match self.active.lock() {
            Ok(mut map) => map
                .iter_mut()
                .filter_map(|(id, entry)| entry.handle.take().map(|h| (*id, h)))
                .collect(),
            Err(_) => Vec::new(),
        };

        let deadline = tokio::time::Instant::now() + drain_timeout;
        for (id, handle) in handles {
            match tokio::time::timeout_at(deadline, handle).await {
                Ok(Ok(())) => debug!("Session {} drained", id),
                Ok(Err(e)) => error!("Session {} driver panicked: {}", id, e),
                Err(_) => {
                    warn!("Session {} did not drain before the shutdown deadline", id);
                }
            }
        }
        info!("Session manager shutdown complete");
    }

    fn handle_for(&self, session: &Session) -> TranscodeHandle {
        let mut handle = TranscodeHandle::from_session(session);
        if session.status == SessionStatus::Completed {
            if let Ok(Some(artifact)) = self.ctx.content_store.lookup(&session.content_hash) {
                handle.artifact_path = Some(artifact.path);
            }
        }
        handle
    }
}

/// Driver body for one session: waits out the queue when admission was
/// deferred, then runs the supervisor with the slot held.
#[allow(clippy::too_many_arguments)]
async fn drive_session(
    ctx: Arc<SupervisorContext>,
    resources: Arc<ResourceManager>,
    provider: Arc<dyn TranscodeProvider>,
    session: Session,
    input_duration: Option<f64>,
    input_size_bytes: Option<u64>,
    cancel: CancellationToken,
    admission: Admission,
) {
    let id = session.id;
    let slot = match admission {
        Admission::Immediate(slot) => Some(slot),
        Admission::Queued(seat) => match resources.wait_for_slot(seat, &cancel).await {
            Ok(slot) => {
                match ctx
                    .store
                    .update_status(id, &[SessionStatus::Queued], SessionStatus::Starting, None)
                    .await
                {
                    Ok(()) => Some(slot),
                    Err(e) => {
                        // Typically a concurrent cancellation settled the
                        // record first; give the slot back.
                        debug!("Session {}: queued->starting refused: {}", id, e);
                        None
                    }
                }
            }
            Err(AdmissionError::QueueTimeout) => {
                warn!("Session {}: timed out in admission queue", id);
                if let Err(e) = ctx
                    .store
                    .update_status(
                        id,
                        &[SessionStatus::Queued],
                        SessionStatus::Timeout,
                        Some("timed out waiting for an admission slot"),
                    )
                    .await
                {
                    debug!("Session {}: queue timeout transition refused: {}", id, e);
                }
                None
            }
            Err(AdmissionError::Cancelled) => {
                if let Err(e) = ctx
                    .store
                    .cancel_session(id, "cancelled while queued")
                    .await
                {
                    debug!("Session {}: queued cancel refused: {}", id, e);
                }
                None
            }
            Err(AdmissionError::AtCapacity) => None,
        },
    };

    if let Some(slot) = slot {
        run_session(
            &ctx,
            provider,
            session,
            input_duration,
            input_size_bytes,
            cancel,
            slot,
        )
        .await;
    }
}
