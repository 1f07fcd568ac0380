//! End-to-end scenarios against a mock codec tool.
//!
//! Each test generates a small shell script that behaves like the codec
//! tool (structured `key=value` progress on stdout, output file as last
//! argument) and drives the full orchestrator core through it.

#![cfg(unix)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serial_test::serial;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use transmux::content_store::ContentStore;
use transmux::error_handling::types::{ProbeError, TranscodeError};
use transmux::media::content_hash;
use transmux::media::probe::MediaMetadataService;
use transmux::media::types::{
    AudioCodec, Container, MediaInfo, Preset, TranscodeRequest, VideoCodec,
};
use transmux::provider_registry::ffmpeg_provider::FfmpegProvider;
use transmux::provider_registry::registry::ProviderRegistry;
use transmux::provider_registry::types::{ProviderCapabilities, ProviderInfo};
use transmux::resource_manager::ResourceManager;
use transmux::session_manager::manager::SessionManager;
use transmux::session_store::memory_store::MemorySessionStore;
use transmux::session_store::types::{Session, SessionStatus};
use transmux::worker_supervisor::supervisor::SupervisorContext;

/// Emits four progress ticks over ~1.2s, writes the output, exits 0.
const MEDIUM_TOOL: &str = r#"#!/bin/sh
OUT=""
for a in "$@"; do OUT="$a"; done
i=1
while [ "$i" -le 4 ]; do
  secs=$((30 * i))
  echo "frame=$((secs * 24))"
  echo "fps=24.0"
  echo "total_size=$((secs * 1000))"
  printf 'out_time=00:%02d:%02d.000000\n' $((secs / 60)) $((secs % 60))
  echo "speed=10x"
  if [ "$i" -eq 4 ]; then echo "progress=end"; else echo "progress=continue"; fi
  sleep 0.3
  i=$((i + 1))
done
echo "encoded by mock tool" > "$OUT"
exit 0
"#;

/// Emits one tick then blocks until signalled.
const SLOW_TOOL: &str = r#"#!/bin/sh
echo "out_time=00:00:01.000000"
echo "progress=continue"
exec sleep 30
"#;

/// Reports a little progress, then fails with a diagnostic on stderr.
const FAILING_TOOL: &str = r#"#!/bin/sh
echo "out_time=00:00:10.000000"
echo "progress=continue"
echo "Conversion failed: unsupported codec parameters" >&2
exit 3
"#;

struct StubMetadata {
    duration: Option<f64>,
}

#[async_trait]
impl MediaMetadataService for StubMetadata {
    async fn lookup(&self, _media_id: &str, _input_path: &Path) -> Result<MediaInfo, ProbeError> {
        Ok(MediaInfo {
            duration_seconds: self.duration,
            size_bytes: Some(5_000_000),
        })
    }
}

struct Harness {
    manager: SessionManager,
    content_store: Arc<ContentStore>,
    registry: Arc<ProviderRegistry>,
    _dir: TempDir,
}

struct HarnessOptions {
    tool_body: &'static str,
    max_concurrent: usize,
    max_queue: usize,
    queue_timeout: Duration,
    session_timeout: Duration,
    input_duration: Option<f64>,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            tool_body: MEDIUM_TOOL,
            max_concurrent: 4,
            max_queue: 4,
            queue_timeout: Duration::from_secs(10),
            session_timeout: Duration::from_secs(20),
            input_duration: Some(120.0),
        }
    }
}

fn write_tool(dir: &Path, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join("mock-codec-tool");
    std::fs::write(&path, body).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

fn harness(options: HarnessOptions) -> Harness {
    let dir = TempDir::new().unwrap();
    let tool = write_tool(dir.path(), options.tool_body);

    let store = Arc::new(MemorySessionStore::new());
    let content_store = Arc::new(ContentStore::new(dir.path().join("data"), store.clone()).unwrap());
    let registry = Arc::new(ProviderRegistry::new(Duration::from_secs(60)));
    registry.register(Arc::new(FfmpegProvider::new(
        ProviderInfo {
            id: "mock".to_string(),
            display_name: "Mock codec tool".to_string(),
            priority: 10,
        },
        ProviderCapabilities {
            containers: vec![Container::Mp4, Container::Mkv],
            video_codecs: vec![VideoCodec::H264, VideoCodec::Hevc],
            audio_codecs: vec![AudioCodec::Aac],
            hw_accel: false,
            max_concurrent: None,
        },
        tool,
    )));

    let ctx = Arc::new(SupervisorContext {
        store,
        content_store: content_store.clone(),
        registry: registry.clone(),
        session_timeout: options.session_timeout,
        stop_grace: Duration::from_millis(500),
        progress_interval: Duration::from_millis(50),
    });
    let resources = Arc::new(ResourceManager::new(
        options.max_concurrent,
        options.max_queue,
        options.queue_timeout,
    ));
    let manager = SessionManager::new(
        ctx,
        resources,
        Arc::new(StubMetadata {
            duration: options.input_duration,
        }),
        CancellationToken::new(),
    );
    Harness {
        manager,
        content_store,
        registry,
        _dir: dir,
    }
}

fn request(media_id: &str) -> TranscodeRequest {
    TranscodeRequest {
        media_id: media_id.to_string(),
        input_path: PathBuf::from("/media/library/movie.mkv"),
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

async fn wait_terminal(harness: &Harness, id: Uuid) -> Session {
    for _ in 0..300 {
        let session = harness.manager.get_session(id).await.unwrap();
        if session.status.is_terminal() {
            return session;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("session {} never reached a terminal state", id);
}

// Happy path: pending through running to completed, progress hits 100,
// and the artifact is published under the request's content hash.
#[tokio::test]
#[serial]
async fn happy_path_completes_with_published_artifact() {
    let harness = harness(HarnessOptions::default());
    let r1 = request("M1");
    let expected_hash = content_hash(&r1);

    let handle = harness.manager.start_transcode(r1).await.unwrap();
    assert_eq!(handle.content_hash, expected_hash);
    assert_eq!(handle.status, SessionStatus::Starting);

    // Progress must be monotonically non-decreasing while it runs.
    let mut last_percent = 0.0f64;
    for _ in 0..20 {
        if let Ok(progress) = harness.manager.get_progress(handle.session_id).await {
            assert!(progress.progress_percent >= last_percent);
            last_percent = progress.progress_percent;
            if progress.status.is_terminal() {
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let done = wait_terminal(&harness, handle.session_id).await;
    assert_eq!(done.status, SessionStatus::Completed);
    assert_eq!(done.progress_percent, 100.0);
    assert_eq!(done.content_hash, expected_hash);
    assert!(done.stats.frames > 0);

    let artifact = harness.content_store.lookup(&expected_hash).unwrap().unwrap();
    assert!(artifact.path.join("output.mp4").is_file());
    // Workspace was promoted, not left dangling.
    assert!(!harness
        .content_store
        .workspace_path(handle.session_id)
        .exists());
}

// Two concurrent identical requests create exactly one session.
#[tokio::test]
#[serial]
async fn concurrent_identical_requests_dedup_to_one_session() {
    let harness = harness(HarnessOptions::default());

    let (first, second) = tokio::join!(
        harness.manager.start_transcode(request("M1")),
        harness.manager.start_transcode(request("M1")),
    );
    let first = first.unwrap();
    let second = second.unwrap();
    assert_eq!(first.session_id, second.session_id);

    let sessions = harness.manager.list_sessions(None).await.unwrap();
    assert_eq!(sessions.len(), 1);

    let done = wait_terminal(&harness, first.session_id).await;
    assert_eq!(done.status, SessionStatus::Completed);
}

// Admission honors the global cap and the bounded queue, and a released
// slot wakes the queued session.
#[tokio::test]
#[serial]
async fn admission_queues_overflow_and_rejects_beyond_the_queue() {
    let harness = harness(HarnessOptions {
        max_concurrent: 2,
        max_queue: 1,
        ..Default::default()
    });

    let r1 = harness.manager.start_transcode(request("M1")).await.unwrap();
    let r2 = harness.manager.start_transcode(request("M2")).await.unwrap();
    assert_eq!(r1.status, SessionStatus::Starting);
    assert_eq!(r2.status, SessionStatus::Starting);

    let r3 = harness.manager.start_transcode(request("M3")).await.unwrap();
    assert_eq!(r3.status, SessionStatus::Queued);

    match harness.manager.start_transcode(request("M4")).await {
        Err(TranscodeError::AtCapacity) => {}
        other => panic!("expected AtCapacity, got {:?}", other.map(|h| h.status)),
    }

    // While the first two run, no more than two sessions are starting or
    // running.
    let sessions = harness.manager.list_sessions(None).await.unwrap();
    let active = sessions
        .iter()
        .filter(|s| {
            matches!(s.status, SessionStatus::Starting | SessionStatus::Running)
        })
        .count();
    assert!(active <= 2);

    // The queued session runs to completion once a slot frees up.
    let done = wait_terminal(&harness, r3.session_id).await;
    assert_eq!(done.status, SessionStatus::Completed);
}

// A session that exceeds its wall-clock limit terminates as `timeout`,
// its workspace is purged and nothing is published.
#[tokio::test]
#[serial]
async fn slow_worker_times_out_and_publishes_nothing() {
    let harness = harness(HarnessOptions {
        tool_body: SLOW_TOOL,
        session_timeout: Duration::from_secs(1),
        ..Default::default()
    });

    let r5 = request("M5");
    let hash = content_hash(&r5);
    let handle = harness.manager.start_transcode(r5).await.unwrap();

    let started = std::time::Instant::now();
    let done = wait_terminal(&harness, handle.session_id).await;
    assert_eq!(done.status, SessionStatus::Timeout);
    // 1s limit plus 0.5s grace, with scheduling headroom.
    assert!(started.elapsed() < Duration::from_secs(5));

    assert!(harness.content_store.lookup(&hash).unwrap().is_none());
    assert!(!harness
        .content_store
        .workspace_path(handle.session_id)
        .exists());
}

// Cancellation escalates politely, the session ends `cancelled`, and
// stopping again still succeeds.
#[tokio::test]
#[serial]
async fn stop_cancels_a_running_session_idempotently() {
    let harness = harness(HarnessOptions {
        tool_body: SLOW_TOOL,
        ..Default::default()
    });

    let handle = harness.manager.start_transcode(request("M6")).await.unwrap();
    // Let it reach running.
    tokio::time::sleep(Duration::from_millis(300)).await;

    harness.manager.stop_transcode(handle.session_id).await.unwrap();
    let done = wait_terminal(&harness, handle.session_id).await;
    assert_eq!(done.status, SessionStatus::Cancelled);
    assert!(!harness
        .content_store
        .workspace_path(handle.session_id)
        .exists());

    harness.manager.stop_transcode(handle.session_id).await.unwrap();
    harness.manager.stop_transcode(Uuid::new_v4()).await.unwrap();
}

// A missing codec tool fails the first session with a provider
// diagnostic and quarantines the provider, so the next request fails fast
// with NoCompatibleProvider.
#[tokio::test]
#[serial]
async fn missing_tool_quarantines_the_provider() {
    let harness = harness(HarnessOptions::default());
    // Sabotage the tool after registration, as if the binary were renamed
    // on disk.
    let tool = harness._dir.path().join("mock-codec-tool");
    std::fs::remove_file(&tool).unwrap();

    let handle = harness.manager.start_transcode(request("M7")).await.unwrap();
    let done = wait_terminal(&harness, handle.session_id).await;
    assert_eq!(done.status, SessionStatus::Failed);
    assert!(done.error_message.unwrap().contains("provider unavailable"));
    assert!(harness.registry.is_quarantined("mock"));

    match harness.manager.start_transcode(request("M8")).await {
        Err(TranscodeError::NoCompatibleProvider) => {}
        other => panic!(
            "expected NoCompatibleProvider, got {:?}",
            other.map(|h| h.status)
        ),
    }
}

// Non-zero exits carry a bounded stderr diagnostic.
#[tokio::test]
#[serial]
async fn failing_tool_reports_the_stderr_tail() {
    let harness = harness(HarnessOptions {
        tool_body: FAILING_TOOL,
        ..Default::default()
    });

    let handle = harness.manager.start_transcode(request("M9")).await.unwrap();
    let done = wait_terminal(&harness, handle.session_id).await;
    assert_eq!(done.status, SessionStatus::Failed);
    let message = done.error_message.unwrap();
    assert!(message.contains("exit code 3"));
    assert!(message.contains("unsupported codec parameters"));
}

// Unknown input duration: progress stays indeterminate, terminal
// detection still works and completion pins 100.
#[tokio::test]
#[serial]
async fn unknown_duration_still_completes() {
    let harness = harness(HarnessOptions {
        input_duration: None,
        ..Default::default()
    });

    let handle = harness.manager.start_transcode(request("M10")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;
    if let Ok(progress) = harness.manager.get_progress(handle.session_id).await {
        if !progress.status.is_terminal() {
            assert_eq!(progress.progress_percent, 0.0);
        }
    }

    let done = wait_terminal(&harness, handle.session_id).await;
    assert_eq!(done.status, SessionStatus::Completed);
    assert_eq!(done.progress_percent, 100.0);
}

// A finished session's artifact satisfies repeat requests without a new
// worker.
#[tokio::test]
#[serial]
async fn repeat_request_reuses_the_published_artifact() {
    let harness = harness(HarnessOptions::default());

    let first = harness.manager.start_transcode(request("M11")).await.unwrap();
    wait_terminal(&harness, first.session_id).await;

    let again = harness.manager.start_transcode(request("M11")).await.unwrap();
    assert_eq!(again.session_id, first.session_id);
    assert_eq!(again.status, SessionStatus::Completed);
    let artifact = again.artifact_path.unwrap();
    assert!(artifact.join("output.mp4").is_file());

    let sessions = harness.manager.list_sessions(None).await.unwrap();
    assert_eq!(sessions.len(), 1);
}
