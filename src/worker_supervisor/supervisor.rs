//! The per-session supervisor task.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio_util::sync::CancellationToken;

use crate::content_store::ContentStore;
use crate::provider_registry::provider::{
    ProgressEvent, ProgressTick, TranscodeJobSpec, TranscodeProvider, WorkerExit, WorkerHandle,
};
use crate::provider_registry::registry::ProviderRegistry;
use crate::resource_manager::AdmissionSlot;
use crate::session_store::store_trait::SessionStore;
use crate::session_store::types::{Session, SessionStats, SessionStatus};
use crate::worker_supervisor::proc_stats::ProcessSampler;
use crate::worker_supervisor::progress::{compute_progress_percent, estimate_eta_seconds};

/// Shared handles and tuning every supervisor needs.
pub struct SupervisorContext {
    pub store: Arc<dyn SessionStore>,
    pub content_store: Arc<ContentStore>,
    pub registry: Arc<ProviderRegistry>,
    /// Wall-clock limit per session, enforced from start.
    pub session_timeout: Duration,
    /// Grace window between the polite stop signal and the forced kill.
    pub stop_grace: Duration,
    /// Cadence of progress writes to the session store.
    pub progress_interval: Duration,
}

enum Outcome {
    Exited(WorkerExit),
    Cancelled,
    TimedOut,
}

/// Runs one session to its terminal state. The session must already be in
/// `starting`; the admission slot is held until this returns.
pub async fn run_session(
    ctx: &SupervisorContext,
    provider: Arc<dyn TranscodeProvider>,
    session: Session,
    input_duration: Option<f64>,
    input_size_bytes: Option<u64>,
    cancel: CancellationToken,
    slot: AdmissionSlot,
) {
    let _slot = slot;
    let id = session.id;
    let provider_id = provider.info().id;

    let workspace = match ctx.content_store.workspace(id) {
        Ok(workspace) => workspace,
        Err(e) => {
            error!("Session {}: failed to create workspace: {}", id, e);
            record_failure(ctx, id, &format!("workspace creation failed: {}", e)).await;
            return;
        }
    };

    let job = TranscodeJobSpec {
        session_id: id,
        request: session.request.clone(),
        workspace: workspace.clone(),
        input_duration_seconds: input_duration,
    };

    let launch = match provider.start(job).await {
        Ok(launch) => launch,
        Err(crate::error_handling::types::ProviderError::LaunchFailed(msg)) => {
            warn!(
                "Session {}: provider {} failed to launch: {}",
                id, provider_id, msg
            );
            ctx.registry.quarantine(&provider_id);
            record_failure(ctx, id, &format!("provider unavailable: {}", msg)).await;
            purge_workspace(ctx, id);
            return;
        }
        Err(e) => {
            error!("Session {}: provider {} start error: {}", id, provider_id, e);
            record_failure(ctx, id, &format!("provider start error: {}", e)).await;
            purge_workspace(ctx, id);
            return;
        }
    };
    let mut handle = launch.handle;
    let mut progress = launch.progress;

    info!(
        "Session {}: worker launched via provider {} (pid {:?})",
        id,
        provider_id,
        handle.pid()
    );

    let mut sampler = ProcessSampler::new(handle.pid());
    let mut duration = input_duration;
    let mut stats = SessionStats::default();
    stats.bytes_in = input_size_bytes.unwrap_or(0);
    let mut last_out_time = 0.0f64;
    let mut percent = 0.0f64;
    let mut running = false;
    let mut dirty = false;
    let mut progress_open = true;

    let deadline = tokio::time::Instant::now() + ctx.session_timeout;
    let mut flush_timer = tokio::time::interval(ctx.progress_interval);
    flush_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let outcome = loop {
        tokio::select! {
            event = progress.recv(), if progress_open => {
                match event {
                    Some(ProgressEvent::Tick(tick)) => {
                        // Ticks that report a lower out_time than the last
                        // observed one are dropped; percent is monotonic.
                        if let Some(out_time) = tick.out_time_seconds {
                            if out_time < last_out_time {
                                debug!(
                                    "Session {}: dropping regressed progress tick ({} < {})",
                                    id, out_time, last_out_time
                                );
                                continue;
                            }
                            last_out_time = out_time.max(0.0);
                        }
                        apply_tick(&mut stats, &tick);
                        let computed = compute_progress_percent(duration, last_out_time);
                        if computed > percent {
                            // Hold just under 100 until the terminal
                            // transition pins the final value.
                            percent = computed.min(99.9);
                        }
                        stats.out_time_seconds = last_out_time;
                        dirty = true;

                        if !running {
                            running = true;
                            mark_running(ctx, id).await;
                            flush_progress(ctx, id, percent, &mut stats, &mut sampler, duration)
                                .await;
                            dirty = false;
                        }
                    }
                    Some(ProgressEvent::DurationDetected(detected)) => {
                        if duration.is_none() && detected > 0.0 {
                            debug!(
                                "Session {}: input duration {}s recovered from tool output",
                                id, detected
                            );
                            duration = Some(detected);
                        }
                    }
                    None => {
                        // Reader tasks ended. Not terminal by itself; the
                        // process exit decides the outcome.
                        progress_open = false;
                    }
                }
            }
            _ = flush_timer.tick() => {
                if dirty {
                    flush_progress(ctx, id, percent, &mut stats, &mut sampler, duration).await;
                    dirty = false;
                }
            }
            exit = handle.wait() => {
                match exit {
                    Ok(exit) => break Outcome::Exited(exit),
                    Err(e) => {
                        warn!("Session {}: wait on worker failed: {}", id, e);
                        break Outcome::Exited(WorkerExit { success: false, code: None });
                    }
                }
            }
            _ = cancel.cancelled() => break Outcome::Cancelled,
            _ = tokio::time::sleep_until(deadline) => break Outcome::TimedOut,
        }
    };

    match outcome {
        Outcome::Exited(exit) if exit.success && !cancel.is_cancelled() => {
            // Catch any final ticks that raced the exit notification.
            while let Ok(event) = progress.try_recv() {
                if let ProgressEvent::Tick(tick) = event {
                    if let Some(out_time) = tick.out_time_seconds {
                        if out_time >= last_out_time {
                            last_out_time = out_time;
                        }
                    }
                    apply_tick(&mut stats, &tick);
                }
            }
            stats.out_time_seconds = last_out_time;
            stats.eta_seconds = Some(0.0);
            let final_percent = compute_progress_percent(duration, last_out_time).max(percent);
            if let Err(e) = ctx.store.update_progress(id, final_percent, &stats).await {
                warn!("Session {}: final progress write failed: {}", id, e);
            }

            if !running {
                // The tool exited before its first progress line; pass
                // through running so the terminal transition stays legal.
                mark_running(ctx, id).await;
            }

            match ctx.content_store.publish(&workspace, &session.content_hash) {
                Ok(artifact) => {
                    if let Err(e) = ctx.store.complete_session(id).await {
                        error!("Session {}: completion write failed: {}", id, e);
                    } else {
                        info!(
                            "Session {}: completed; artifact {} published at {}",
                            id,
                            session.content_hash,
                            artifact.path.display()
                        );
                    }
                }
                Err(e) => {
                    error!("Session {}: publish failed: {}", id, e);
                    record_failure(ctx, id, &format!("artifact publish failed: {}", e)).await;
                    purge_workspace(ctx, id);
                }
            }
        }
        Outcome::Exited(exit) => {
            // The reader tasks hold the progress channel open; once it
            // closes, the stderr tail is complete.
            let _ = tokio::time::timeout(Duration::from_millis(500), async {
                while progress.recv().await.is_some() {}
            })
            .await;
            let tail = handle.stderr_tail();
            let code_desc = match exit.code {
                Some(code) => format!("exit code {}", code),
                None => "terminated by signal".to_string(),
            };
            let reason = if tail.is_empty() {
                format!("worker exited with {}", code_desc)
            } else {
                format!("worker exited with {}: {}", code_desc, tail)
            };
            warn!("Session {}: {}", id, reason);
            record_failure(ctx, id, &reason).await;
            purge_workspace(ctx, id);
        }
        Outcome::Cancelled => {
            info!("Session {}: cancellation requested, stopping worker", id);
            stop_with_grace(handle.as_mut(), ctx.stop_grace).await;
            if let Err(e) = ctx.store.cancel_session(id, "cancelled by caller or shutdown").await {
                debug!("Session {}: cancel transition refused: {}", id, e);
            }
            purge_workspace(ctx, id);
        }
        Outcome::TimedOut => {
            warn!(
                "Session {}: exceeded wall-clock limit of {:?}, stopping worker",
                id, ctx.session_timeout
            );
            stop_with_grace(handle.as_mut(), ctx.stop_grace).await;
            if let Err(e) = ctx
                .store
                .update_status(
                    id,
                    &[SessionStatus::Starting, SessionStatus::Running],
                    SessionStatus::Timeout,
                    Some("session exceeded its wall-clock limit"),
                )
                .await
            {
                debug!("Session {}: timeout transition refused: {}", id, e);
            }
            purge_workspace(ctx, id);
        }
    }
}

/// Two-phase termination: polite stop signal, bounded grace, forced kill.
/// The post-kill reap is bounded too, so a worker whose transport never
/// closes cannot wedge the supervisor.
async fn stop_with_grace(handle: &mut dyn WorkerHandle, grace: Duration) {
    if handle.signal_stop().await.is_ok()
        && tokio::time::timeout(grace, handle.wait()).await.is_ok()
    {
        return;
    }
    debug!("Worker ignored the polite stop; killing");
    let _ = handle.kill().await;
    let _ = tokio::time::timeout(grace, handle.wait()).await;
}

fn apply_tick(stats: &mut SessionStats, tick: &ProgressTick) {
    if let Some(frames) = tick.frames {
        stats.frames = frames;
    }
    if let Some(fps) = tick.fps {
        stats.fps = fps;
    }
    if let Some(bitrate) = tick.bitrate_kbps {
        stats.bitrate_kbps = bitrate;
    }
    if let Some(bytes) = tick.total_size_bytes {
        stats.bytes_out = bytes;
    }
    if let Some(speed) = tick.speed {
        stats.speed = speed;
    }
}

async fn mark_running(ctx: &SupervisorContext, id: uuid::Uuid) {
    if let Err(e) = ctx
        .store
        .update_status(
            id,
            &[SessionStatus::Starting],
            SessionStatus::Running,
            None,
        )
        .await
    {
        // Lost a race with cancellation; the outcome handling settles it.
        debug!("Session {}: starting->running refused: {}", id, e);
    }
}

async fn flush_progress(
    ctx: &SupervisorContext,
    id: uuid::Uuid,
    percent: f64,
    stats: &mut SessionStats,
    sampler: &mut ProcessSampler,
    duration: Option<f64>,
) {
    if let Some((cpu, mem)) = sampler.sample() {
        stats.cpu_percent = cpu;
        stats.mem_bytes = mem;
    }
    stats.eta_seconds = estimate_eta_seconds(duration, stats.out_time_seconds, stats.speed);
    if let Err(e) = ctx.store.update_progress(id, percent, stats).await {
        // Progress writes are best-effort; the next cadence retries.
        warn!("Session {}: progress write failed: {}", id, e);
    }
}

async fn record_failure(ctx: &SupervisorContext, id: uuid::Uuid, reason: &str) {
    if let Err(e) = ctx.store.fail_session(id, reason).await {
        debug!("Session {}: failure transition refused: {}", id, e);
    }
}

fn purge_workspace(ctx: &SupervisorContext, id: uuid::Uuid) {
    if let Err(e) = ctx.content_store.purge_workspace(id) {
        warn!("Session {}: workspace purge failed: {}", id, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_handling::types::ProviderError;
    use crate::provider_registry::provider::{WorkerLaunch, WorkerHandle};
    use crate::provider_registry::types::{ProviderCapabilities, ProviderInfo};
    use crate::resource_manager::ResourceManager;
    use crate::session_store::memory_store::MemorySessionStore;
    use crate::media::types::{AudioCodec, Container, Preset, TranscodeRequest, VideoCodec};
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    struct ScriptedWorker {
        exit_rx: mpsc::Receiver<WorkerExit>,
        stop_tx: mpsc::Sender<()>,
        exit: Option<WorkerExit>,
        tail: String,
        stop_seen: Arc<AtomicBool>,
    }

    #[async_trait]
    impl WorkerHandle for ScriptedWorker {
        fn pid(&self) -> Option<u32> {
            None
        }

        async fn wait(&mut self) -> Result<WorkerExit, ProviderError> {
            if let Some(exit) = self.exit {
                return Ok(exit);
            }
            let exit = self
                .exit_rx
                .recv()
                .await
                .unwrap_or(WorkerExit { success: false, code: None });
            self.exit = Some(exit);
            Ok(exit)
        }

        async fn signal_stop(&mut self) -> Result<(), ProviderError> {
            self.stop_seen.store(true, Ordering::SeqCst);
            let _ = self.stop_tx.send(()).await;
            Ok(())
        }

        async fn kill(&mut self) -> Result<(), ProviderError> {
            let _ = self.stop_tx.send(()).await;
            Ok(())
        }

        fn stderr_tail(&self) -> String {
            self.tail.clone()
        }
    }

    /// Provider whose worker plays a fixed script of progress events and
    /// then exits. A polite stop short-circuits the run.
    struct ScriptedProvider {
        events: Vec<ProgressEvent>,
        run_for: Duration,
        exit: WorkerExit,
        write_output: bool,
        tail: String,
        stop_seen: Arc<AtomicBool>,
    }

    #[async_trait]
    impl TranscodeProvider for ScriptedProvider {
        fn info(&self) -> ProviderInfo {
            ProviderInfo {
                id: "scripted".to_string(),
                display_name: "Scripted".to_string(),
                priority: 0,
            }
        }

        fn capabilities(&self) -> ProviderCapabilities {
            ProviderCapabilities {
                containers: vec![Container::Mp4],
                video_codecs: vec![VideoCodec::H264],
                audio_codecs: vec![AudioCodec::Aac],
                hw_accel: false,
                max_concurrent: None,
            }
        }

        async fn start(&self, job: TranscodeJobSpec) -> Result<WorkerLaunch, ProviderError> {
            if self.write_output {
                std::fs::write(job.workspace.join("output.mp4"), b"encoded")?;
            }
            let (progress_tx, progress_rx) = mpsc::channel(16);
            let (exit_tx, exit_rx) = mpsc::channel(1);
            let (stop_tx, mut stop_rx) = mpsc::channel(1);
            let events = self.events.clone();
            let run_for = self.run_for;
            let exit = self.exit;
            tokio::spawn(async move {
                for event in events {
                    if progress_tx.send(event).await.is_err() {
                        return;
                    }
                }
                drop(progress_tx);
                tokio::select! {
                    _ = tokio::time::sleep(run_for) => {
                        let _ = exit_tx.send(exit).await;
                    }
                    _ = stop_rx.recv() => {
                        let _ = exit_tx.send(WorkerExit { success: false, code: None }).await;
                    }
                }
            });
            Ok(WorkerLaunch {
                handle: Box::new(ScriptedWorker {
                    exit_rx,
                    stop_tx,
                    exit: None,
                    tail: self.tail.clone(),
                    stop_seen: self.stop_seen.clone(),
                }),
                progress: progress_rx,
            })
        }
    }

    struct Harness {
        ctx: SupervisorContext,
        store: Arc<MemorySessionStore>,
        resources: ResourceManager,
        _dir: TempDir,
    }

    fn harness(session_timeout: Duration) -> Harness {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemorySessionStore::new());
        let content_store = Arc::new(
            crate::content_store::ContentStore::new(dir.path(), store.clone()).unwrap(),
        );
        let registry = Arc::new(ProviderRegistry::new(Duration::from_secs(60)));
        Harness {
            ctx: SupervisorContext {
                store: store.clone(),
                content_store,
                registry,
                session_timeout,
                stop_grace: Duration::from_millis(200),
                progress_interval: Duration::from_millis(20),
            },
            store,
            resources: ResourceManager::new(4, 4, Duration::from_secs(5)),
            _dir: dir,
        }
    }

    fn request() -> TranscodeRequest {
        TranscodeRequest {
            media_id: "M1".to_string(),
            input_path: PathBuf::from("/media/in.mkv"),
            container: Container::Mp4,
            video_codec: VideoCodec::H264,
            audio_codec: AudioCodec::Aac,
            quality: 23,
            preset: Preset::Medium,
            max_height: None,
            max_bitrate_kbps: None,
            start_offset_seconds: None,
            options: BTreeMap::new(),
        }
    }

    async fn starting_session(h: &Harness) -> Session {
        let session = Session::new("scripted", request());
        let session = h.store.create_session(session).await.unwrap();
        h.store
            .update_status(
                session.id,
                &[SessionStatus::Pending],
                SessionStatus::Starting,
                None,
            )
            .await
            .unwrap();
        session
    }

    fn tick(out_time: f64) -> ProgressEvent {
        ProgressEvent::Tick(ProgressTick {
            out_time_seconds: Some(out_time),
            frames: Some((out_time * 24.0) as u64),
            fps: Some(24.0),
            bitrate_kbps: Some(1800.0),
            total_size_bytes: Some((out_time * 100_000.0) as u64),
            speed: Some(1.5),
            end: false,
        })
    }

    #[tokio::test]
    async fn happy_path_completes_and_publishes() {
        let h = harness(Duration::from_secs(10));
        let session = starting_session(&h).await;
        let hash = session.content_hash.clone();
        let provider = Arc::new(ScriptedProvider {
            events: vec![tick(30.0), tick(60.0), tick(120.0)],
            run_for: Duration::from_millis(50),
            exit: WorkerExit { success: true, code: Some(0) },
            write_output: true,
            tail: String::new(),
            stop_seen: Arc::new(AtomicBool::new(false)),
        });

        run_session(
            &h.ctx,
            provider,
            session.clone(),
            Some(120.0),
            Some(1_000_000),
            CancellationToken::new(),
            h.resources.try_admit().unwrap(),
        )
        .await;

        let done = h.store.get_session(session.id).await.unwrap().unwrap();
        assert_eq!(done.status, SessionStatus::Completed);
        assert_eq!(done.progress_percent, 100.0);
        assert!(done.stats.frames > 0);
        assert!(h.ctx.content_store.lookup(&hash).unwrap().is_some());
        // The workspace was promoted, not left behind.
        assert!(!h.ctx.content_store.workspace_path(session.id).exists());
    }

    #[tokio::test]
    async fn nonzero_exit_fails_with_stderr_tail() {
        let h = harness(Duration::from_secs(10));
        let session = starting_session(&h).await;
        let provider = Arc::new(ScriptedProvider {
            events: vec![tick(10.0)],
            run_for: Duration::from_millis(30),
            exit: WorkerExit { success: false, code: Some(1) },
            write_output: true,
            tail: "conversion failed: unsupported pixel format".to_string(),
            stop_seen: Arc::new(AtomicBool::new(false)),
        });

        run_session(
            &h.ctx,
            provider,
            session.clone(),
            Some(120.0),
            None,
            CancellationToken::new(),
            h.resources.try_admit().unwrap(),
        )
        .await;

        let done = h.store.get_session(session.id).await.unwrap().unwrap();
        assert_eq!(done.status, SessionStatus::Failed);
        let message = done.error_message.unwrap();
        assert!(message.contains("exit code 1"));
        assert!(message.contains("unsupported pixel format"));
        assert!(h.ctx.content_store.lookup(&session.content_hash).unwrap().is_none());
        assert!(!h.ctx.content_store.workspace_path(session.id).exists());
    }

    #[tokio::test]
    async fn cancellation_stops_politely_and_purges() {
        let h = harness(Duration::from_secs(10));
        let session = starting_session(&h).await;
        let stop_seen = Arc::new(AtomicBool::new(false));
        let provider = Arc::new(ScriptedProvider {
            events: vec![tick(5.0)],
            run_for: Duration::from_secs(30),
            exit: WorkerExit { success: true, code: Some(0) },
            write_output: true,
            tail: String::new(),
            stop_seen: stop_seen.clone(),
        });

        let cancel = CancellationToken::new();
        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(80)).await;
                cancel.cancel();
            })
        };

        run_session(
            &h.ctx,
            provider,
            session.clone(),
            Some(120.0),
            None,
            cancel,
            h.resources.try_admit().unwrap(),
        )
        .await;
        canceller.await.unwrap();

        assert!(stop_seen.load(Ordering::SeqCst));
        let done = h.store.get_session(session.id).await.unwrap().unwrap();
        assert_eq!(done.status, SessionStatus::Cancelled);
        assert!(!h.ctx.content_store.workspace_path(session.id).exists());
        assert!(h.ctx.content_store.lookup(&session.content_hash).unwrap().is_none());
    }

    #[tokio::test]
    async fn wall_clock_timeout_yields_timeout_status() {
        let h = harness(Duration::from_millis(150));
        let session = starting_session(&h).await;
        let provider = Arc::new(ScriptedProvider {
            events: vec![tick(1.0)],
            run_for: Duration::from_secs(30),
            exit: WorkerExit { success: true, code: Some(0) },
            write_output: true,
            tail: String::new(),
            stop_seen: Arc::new(AtomicBool::new(false)),
        });

        run_session(
            &h.ctx,
            provider,
            session.clone(),
            Some(120.0),
            None,
            CancellationToken::new(),
            h.resources.try_admit().unwrap(),
        )
        .await;

        let done = h.store.get_session(session.id).await.unwrap().unwrap();
        assert_eq!(done.status, SessionStatus::Timeout);
        assert!(!h.ctx.content_store.workspace_path(session.id).exists());
        assert!(h.ctx.content_store.lookup(&session.content_hash).unwrap().is_none());
    }

    #[tokio::test]
    async fn launch_failure_quarantines_the_provider() {
        struct Unlaunchable;
        #[async_trait]
        impl TranscodeProvider for Unlaunchable {
            fn info(&self) -> ProviderInfo {
                ProviderInfo {
                    id: "broken".to_string(),
                    display_name: "Broken".to_string(),
                    priority: 0,
                }
            }
            fn capabilities(&self) -> ProviderCapabilities {
                ProviderCapabilities {
                    containers: vec![Container::Mp4],
                    video_codecs: vec![VideoCodec::H264],
                    audio_codecs: vec![AudioCodec::Aac],
                    hw_accel: false,
                    max_concurrent: None,
                }
            }
            async fn start(&self, _job: TranscodeJobSpec) -> Result<WorkerLaunch, ProviderError> {
                Err(ProviderError::LaunchFailed("binary not on path".into()))
            }
        }

        let h = harness(Duration::from_secs(10));
        let provider: Arc<dyn TranscodeProvider> = Arc::new(Unlaunchable);
        h.ctx.registry.register(provider.clone());
        let session = starting_session(&h).await;

        run_session(
            &h.ctx,
            provider,
            session.clone(),
            None,
            None,
            CancellationToken::new(),
            h.resources.try_admit().unwrap(),
        )
        .await;

        let done = h.store.get_session(session.id).await.unwrap().unwrap();
        assert_eq!(done.status, SessionStatus::Failed);
        assert!(done.error_message.unwrap().contains("provider unavailable"));
        assert!(h.ctx.registry.is_quarantined("broken"));
    }

    #[tokio::test]
    async fn unknown_duration_reports_zero_until_exit() {
        let h = harness(Duration::from_secs(10));
        let session = starting_session(&h).await;
        let provider = Arc::new(ScriptedProvider {
            events: vec![tick(10.0), tick(20.0)],
            run_for: Duration::from_millis(40),
            exit: WorkerExit { success: true, code: Some(0) },
            write_output: true,
            tail: String::new(),
            stop_seen: Arc::new(AtomicBool::new(false)),
        });

        run_session(
            &h.ctx,
            provider,
            session.clone(),
            None,
            None,
            CancellationToken::new(),
            h.resources.try_admit().unwrap(),
        )
        .await;

        // Terminal detection worked despite indeterminate progress, and
        // completion still pins 100.
        let done = h.store.get_session(session.id).await.unwrap().unwrap();
        assert_eq!(done.status, SessionStatus::Completed);
        assert_eq!(done.progress_percent, 100.0);
    }

    #[tokio::test]
    async fn regressed_ticks_never_lower_the_percent() {
        let h = harness(Duration::from_secs(10));
        let session = starting_session(&h).await;
        let provider = Arc::new(ScriptedProvider {
            events: vec![tick(60.0), tick(30.0), tick(45.0)],
            run_for: Duration::from_millis(120),
            exit: WorkerExit { success: false, code: Some(1) },
            write_output: false,
            tail: String::new(),
            stop_seen: Arc::new(AtomicBool::new(false)),
        });

        run_session(
            &h.ctx,
            provider,
            session.clone(),
            Some(120.0),
            None,
            CancellationToken::new(),
            h.resources.try_admit().unwrap(),
        )
        .await;

        let done = h.store.get_session(session.id).await.unwrap().unwrap();
        // 60s of 120s was the high-water mark; the regressed ticks after it
        // must not pull the percentage back.
        assert!(done.progress_percent >= 50.0 - 1e-9);
        assert!(done.progress_percent < 100.0);
    }
}
