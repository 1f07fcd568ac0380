//! Periodic cleanup: session retention, artifact eviction, orphan and
//! workspace sweeps.
//!
//! Every duty is best-effort per cycle; failures are logged and retried on
//! the next interval, never surfaced to in-flight requests.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use crate::configuration::types::CleanupConfig;
use crate::content_store::ContentStore;
use crate::error_handling::types::ContentStoreError;
use crate::session_manager::types::ActiveSessions;
use crate::session_store::store_trait::SessionStore;

pub struct CleanupService {
    store: Arc<dyn SessionStore>,
    content_store: Arc<ContentStore>,
    active: ActiveSessions,
    config: CleanupConfig,
    started_at: Instant,
}

impl CleanupService {
    pub fn new(
        store: Arc<dyn SessionStore>,
        content_store: Arc<ContentStore>,
        active: ActiveSessions,
        config: CleanupConfig,
    ) -> Self {
        Self {
            store,
            content_store,
            active,
            config,
            started_at: Instant::now(),
        }
    }

    /// Runs the cleanup loop until shutdown fires.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            "Cleanup service running every {}s",
            self.config.interval_secs
        );
        let mut ticker = tokio::time::interval(Duration::from_secs(self.config.interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so a restart does not
        // sweep before supervisors re-register.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => self.cycle().await,
                _ = shutdown.cancelled() => {
                    info!("Cleanup service stopping");
                    break;
                }
            }
        }
    }

    /// One full cleanup cycle.
    pub async fn cycle(&self) {
        self.purge_expired_sessions().await;
        self.sweep_orphaned_sessions().await;
        self.evict_artifacts().await;
        self.sweep_stray_workspaces().await;
    }

    async fn purge_expired_sessions(&self) {
        let cutoff = Utc::now() - chrono::Duration::seconds(self.config.session_retention_secs as i64);
        match self.store.purge_terminal_older_than(cutoff).await {
            Ok(0) => {}
            Ok(purged) => info!("Cleanup purged {} expired session(s)", purged),
            Err(e) => warn!("Session purge failed, retrying next cycle: {}", e),
        }
    }

    /// Fails non-terminal sessions with no live supervisor. Covers records
    /// left behind by a crash of a previous process instance.
    async fn sweep_orphaned_sessions(&self) {
        if self.started_at.elapsed() < Duration::from_secs(self.config.orphan_grace_secs) {
            return;
        }
        let sessions = match self.store.list_active().await {
            Ok(sessions) => sessions,
            Err(e) => {
                warn!("Orphan sweep could not list active sessions: {}", e);
                return;
            }
        };
        let grace = chrono::Duration::seconds(self.config.orphan_grace_secs as i64);
        let now = Utc::now();
        for session in sessions {
            let supervised = self
                .active
                .lock()
                .map(|map| map.contains_key(&session.id))
                .unwrap_or(true);
            if supervised || now - session.created_at < grace {
                continue;
            }
            warn!(
                "Failing orphaned session {} (status {}, no owning supervisor)",
                session.id, session.status
            );
            if let Err(e) = self
                .store
                .fail_session(session.id, "orphaned: no owning supervisor after restart")
                .await
            {
                debug!("Orphan transition refused for {}: {}", session.id, e);
            }
            if let Err(e) = self.content_store.purge_workspace(session.id) {
                warn!("Orphan workspace purge failed for {}: {}", session.id, e);
            }
        }
    }

    async fn evict_artifacts(&self) {
        let mut artifacts = match self.content_store.list_artifacts() {
            Ok(artifacts) => artifacts,
            Err(e) => {
                warn!("Artifact listing failed, retrying next cycle: {}", e);
                return;
            }
        };
        let now = Utc::now();
        let large_retention =
            chrono::Duration::seconds(self.config.large_artifact_retention_secs as i64);

        // Oversize artifacts age out on a short leash.
        let mut remaining = Vec::new();
        for artifact in artifacts.drain(..) {
            let oversize = artifact.total_bytes > self.config.artifact_size_threshold_bytes;
            if oversize && now - artifact.published_at > large_retention {
                match self.content_store.delete(&artifact.content_hash).await {
                    Ok(()) => info!(
                        "Evicted oversize artifact {} ({} bytes)",
                        artifact.content_hash, artifact.total_bytes
                    ),
                    Err(ContentStoreError::ArtifactInUse(_)) => remaining.push(artifact),
                    Err(e) => {
                        warn!("Eviction of {} failed: {}", artifact.content_hash, e);
                        remaining.push(artifact);
                    }
                }
            } else {
                remaining.push(artifact);
            }
        }

        // Enforce the total cap, least-recently-published first.
        if self.config.max_store_bytes == 0 {
            return;
        }
        let mut total: u64 = remaining.iter().map(|a| a.total_bytes).sum();
        if total <= self.config.max_store_bytes {
            return;
        }
        remaining.sort_by_key(|a| a.published_at);
        for artifact in remaining {
            if total <= self.config.max_store_bytes {
                break;
            }
            match self.content_store.delete(&artifact.content_hash).await {
                Ok(()) => {
                    info!(
                        "Evicted artifact {} ({} bytes) to respect the store cap",
                        artifact.content_hash, artifact.total_bytes
                    );
                    total = total.saturating_sub(artifact.total_bytes);
                }
                Err(ContentStoreError::ArtifactInUse(_)) => {
                    debug!("Skipping in-use artifact {}", artifact.content_hash)
                }
                Err(e) => warn!("Eviction of {} failed: {}", artifact.content_hash, e),
            }
        }
    }

    /// Removes staging directories whose session is gone or terminal.
    async fn sweep_stray_workspaces(&self) {
        let workspaces = match self.content_store.list_workspaces() {
            Ok(workspaces) => workspaces,
            Err(e) => {
                warn!("Workspace listing failed, retrying next cycle: {}", e);
                return;
            }
        };
        for id in workspaces {
            let supervised = self
                .active
                .lock()
                .map(|map| map.contains_key(&id))
                .unwrap_or(true);
            if supervised {
                continue;
            }
            let stray = match self.store.get_session(id).await {
                Ok(None) => true,
                Ok(Some(session)) => session.status.is_terminal(),
                Err(e) => {
                    warn!("Workspace sweep lookup failed for {}: {}", id, e);
                    false
                }
            };
            if stray {
                debug!("Sweeping stray workspace for session {}", id);
                if let Err(e) = self.content_store.purge_workspace(id) {
                    warn!("Stray workspace purge failed for {}: {}", id, e);
                }
            }
        }
    }
}
