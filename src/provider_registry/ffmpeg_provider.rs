//! Builtin in-process provider wrapping the system ffmpeg binary.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use log::{debug, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

use crate::error_handling::types::ProviderError;
use crate::media::types::{AudioCodec, TranscodeRequest, VideoCodec};
use crate::provider_registry::provider::{
    ProgressEvent, TranscodeJobSpec, TranscodeProvider, WorkerExit, WorkerHandle, WorkerLaunch,
};
use crate::provider_registry::types::{
    ProviderCapabilities, ProviderInfo, OPTION_REQUIRE_HW_ACCEL,
};
use crate::worker_supervisor::progress::{parse_duration_header, ProgressAccumulator};

/// Upper bound kept from the tool's stderr for terminal diagnostics.
const STDERR_TAIL_BYTES: usize = 4 * 1024;

pub struct FfmpegProvider {
    info: ProviderInfo,
    capabilities: ProviderCapabilities,
    ffmpeg_path: PathBuf,
}

impl FfmpegProvider {
    pub fn new(
        info: ProviderInfo,
        capabilities: ProviderCapabilities,
        ffmpeg_path: PathBuf,
    ) -> Self {
        Self {
            info,
            capabilities,
            ffmpeg_path,
        }
    }

    /// Checks whether the configured binary responds to `-version`.
    pub async fn probe_tool(path: &Path) -> bool {
        let available = Command::new(path)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false);
        debug!("Codec tool availability check for {}: {}", path.display(), available);
        available
    }
}

/// Builds the ffmpeg argument vector for a job. The output lands inside
/// the workspace; the caller promotes it on success.
pub fn build_ffmpeg_args(
    request: &TranscodeRequest,
    workspace: &Path,
    hw_accel: bool,
) -> Vec<String> {
    let mut args: Vec<String> = vec!["-hide_banner".into(), "-y".into()];

    if hw_accel {
        args.extend(["-hwaccel".into(), "auto".into()]);
    }
    if let Some(offset) = request.start_offset_seconds {
        args.extend(["-ss".into(), format!("{offset:.3}")]);
    }
    args.extend(["-i".into(), request.input_path.to_string_lossy().into_owned()]);

    args.extend(["-c:v".into(), request.video_codec.encoder().into()]);
    if request.video_codec != VideoCodec::Copy {
        args.extend(["-preset".into(), request.preset.as_str().into()]);
        args.extend(["-crf".into(), request.quality.to_string()]);
        if request.video_codec == VideoCodec::Vp9 {
            // VP9 constant-quality mode needs an explicit zero bitrate.
            args.extend(["-b:v".into(), "0".into()]);
        }
        if let Some(max_height) = request.max_height {
            args.extend(["-vf".into(), format!("scale=-2:min(ih,{max_height})")]);
        }
        if let Some(cap) = request.max_bitrate_kbps {
            args.extend([
                "-maxrate".into(),
                format!("{cap}k"),
                "-bufsize".into(),
                format!("{}k", cap * 2),
            ]);
        }
    }

    args.extend(["-c:a".into(), request.audio_codec.encoder().into()]);
    if matches!(
        request.audio_codec,
        AudioCodec::Aac | AudioCodec::Opus | AudioCodec::Mp3
    ) {
        args.extend(["-b:a".into(), "160k".into()]);
    }

    for (key, value) in &request.options {
        if key == OPTION_REQUIRE_HW_ACCEL {
            continue;
        }
        args.push(format!("-{key}"));
        if !value.is_empty() {
            args.push(value.clone());
        }
    }

    args.extend(["-progress".into(), "pipe:1".into(), "-nostats".into()]);
    args.extend(["-f".into(), request.container.muxer().into()]);
    args.push(
        workspace
            .join(format!("output.{}", request.container.file_extension()))
            .to_string_lossy()
            .into_owned(),
    );
    args
}

#[async_trait]
impl TranscodeProvider for FfmpegProvider {
    fn info(&self) -> ProviderInfo {
        self.info.clone()
    }

    fn capabilities(&self) -> ProviderCapabilities {
        self.capabilities.clone()
    }

    async fn start(&self, job: TranscodeJobSpec) -> Result<WorkerLaunch, ProviderError> {
        let args = build_ffmpeg_args(&job.request, &job.workspace, self.capabilities.hw_accel);
        debug!(
            "Session {}: spawning {} {}",
            job.session_id,
            self.ffmpeg_path.display(),
            args.join(" ")
        );

        let mut child = Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ProviderError::LaunchFailed(format!(
                    "failed to spawn {}: {}",
                    self.ffmpeg_path.display(),
                    e
                ))
            })?;

        let pid = child.id();
        let (tx, rx) = mpsc::channel::<ProgressEvent>(64);
        let tail = Arc::new(Mutex::new(TailBuffer::new(STDERR_TAIL_BYTES)));

        if let Some(stdout) = child.stdout.take() {
            let tx = tx.clone();
            let session_id = job.session_id;
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                let mut acc = ProgressAccumulator::new();
                while let Ok(Some(line)) = lines.next_line().await {
                    if let Some(tick) = acc.push_line(&line) {
                        if tx.send(ProgressEvent::Tick(tick)).await.is_err() {
                            break;
                        }
                    }
                }
                debug!("stdout progress stream ended for session {}", session_id);
            });
        }

        if let Some(stderr) = child.stderr.take() {
            let tx = tx.clone();
            let tail = tail.clone();
            let session_id = job.session_id;
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                let mut acc = ProgressAccumulator::new();
                let mut duration_sent = false;
                while let Ok(Some(line)) = lines.next_line().await {
                    if let Ok(mut tail) = tail.lock() {
                        tail.push(&line);
                    }
                    if !duration_sent {
                        if let Some(duration) = parse_duration_header(&line) {
                            duration_sent = true;
                            if tx
                                .send(ProgressEvent::DurationDetected(duration))
                                .await
                                .is_err()
                            {
                                break;
                            }
                        }
                    }
                    // Classic builds report stats on stderr instead of the
                    // structured pipe; feed those through as well.
                    if let Some(tick) = acc.push_line(&line) {
                        if tx.send(ProgressEvent::Tick(tick)).await.is_err() {
                            break;
                        }
                    }
                }
                debug!("stderr stream ended for session {}", session_id);
            });
        }

        Ok(WorkerLaunch {
            handle: Box::new(FfmpegWorker {
                child,
                pid,
                tail,
                exit: None,
            }),
            progress: rx,
        })
    }
}

/// Bounded byte-budget ring of recent stderr lines.
struct TailBuffer {
    lines: VecDeque<String>,
    bytes: usize,
    budget: usize,
}

impl TailBuffer {
    fn new(budget: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            bytes: 0,
            budget,
        }
    }

    fn push(&mut self, line: &str) {
        self.bytes += line.len() + 1;
        self.lines.push_back(line.to_string());
        while self.bytes > self.budget {
            match self.lines.pop_front() {
                Some(dropped) => self.bytes -= dropped.len() + 1,
                None => break,
            }
        }
    }

    fn as_string(&self) -> String {
        self.lines
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

struct FfmpegWorker {
    child: Child,
    pid: Option<u32>,
    tail: Arc<Mutex<TailBuffer>>,
    exit: Option<WorkerExit>,
}

#[async_trait]
impl WorkerHandle for FfmpegWorker {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    async fn wait(&mut self) -> Result<WorkerExit, ProviderError> {
        if let Some(exit) = self.exit {
            return Ok(exit);
        }
        let status = self.child.wait().await?;
        let exit = WorkerExit {
            success: status.success(),
            code: status.code(),
        };
        self.exit = Some(exit);
        Ok(exit)
    }

    async fn signal_stop(&mut self) -> Result<(), ProviderError> {
        #[cfg(unix)]
        {
            if let Some(pid) = self.pid {
                use nix::sys::signal::{kill, Signal};
                use nix::unistd::Pid;
                return match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                    Ok(()) => Ok(()),
                    Err(errno) => {
                        warn!("SIGTERM to pid {} failed: {}", pid, errno);
                        Err(ProviderError::IoError(std::io::Error::from_raw_os_error(
                            errno as i32,
                        )))
                    }
                };
            }
        }
        // No pid (or no signals on this platform): escalate directly.
        self.child.start_kill().map_err(ProviderError::IoError)
    }

    async fn kill(&mut self) -> Result<(), ProviderError> {
        if let Err(e) = self.child.start_kill() {
            // Already gone is fine.
            if e.kind() != std::io::ErrorKind::InvalidInput {
                return Err(ProviderError::IoError(e));
            }
        }
        let _ = self.wait().await?;
        Ok(())
    }

    fn stderr_tail(&self) -> String {
        self.tail
            .lock()
            .map(|t| t.as_string())
            .unwrap_or_default()
    }
}
