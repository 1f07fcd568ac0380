//! Out-of-process plugin provider adapter.
//!
//! A plugin is a child process that prints one handshake line on stdout,
//! `TRANSMUX-PLUGIN/1 <tcp-addr>`, followed by one JSON line advertising
//! its identity and capability set. Afterwards the registry dials the
//! address and speaks newline-delimited JSON per worker: a `start` request,
//! an optional `stop` request, a stream of `progress`/`log` messages and a
//! final `exit` message. Closing the transport shuts the worker down.

use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

use crate::error_handling::types::ProviderError;
use crate::media::types::TranscodeRequest;
use crate::provider_registry::provider::{
    ProgressEvent, ProgressTick, TranscodeJobSpec, TranscodeProvider, WorkerExit, WorkerHandle,
    WorkerLaunch,
};
use crate::provider_registry::types::{ProviderCapabilities, ProviderInfo};

/// Fixed banner a plugin must print as its first stdout token.
pub const PLUGIN_BANNER: &str = "TRANSMUX-PLUGIN/1";

/// Identity and capabilities a plugin advertises at handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginHandshake {
    pub id: String,
    pub display_name: String,
    pub priority: i32,
    pub capabilities: ProviderCapabilities,
}

#[derive(Serialize)]
struct StartMessage<'a> {
    op: &'static str,
    session_id: String,
    request: &'a TranscodeRequest,
    workspace: String,
    input_duration_seconds: Option<f64>,
}

#[derive(Serialize)]
struct StopMessage {
    op: &'static str,
}

/// One message from the plugin's per-worker stream.
#[derive(Debug, Deserialize)]
struct PluginMessage {
    op: String,
    #[serde(default)]
    out_time_seconds: Option<f64>,
    #[serde(default)]
    frames: Option<u64>,
    #[serde(default)]
    fps: Option<f64>,
    #[serde(default)]
    bitrate_kbps: Option<f64>,
    #[serde(default)]
    total_size_bytes: Option<u64>,
    #[serde(default)]
    speed: Option<f64>,
    #[serde(default)]
    duration_seconds: Option<f64>,
    #[serde(default)]
    code: Option<i32>,
    #[serde(default)]
    line: Option<String>,
}

/// Provider reached through a plugin child process.
pub struct PluginProvider {
    handshake: PluginHandshake,
    endpoint: String,
    child: Mutex<Option<Child>>,
}

impl PluginProvider {
    /// Spawns the plugin executable and performs the stdout handshake.
    pub async fn launch(
        command: &std::path::Path,
        args: &[String],
        handshake_timeout: Duration,
    ) -> Result<Self, ProviderError> {
        info!("Launching plugin provider: {}", command.display());
        let mut child = Command::new(command)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ProviderError::LaunchFailed(format!(
                    "failed to spawn plugin {}: {}",
                    command.display(),
                    e
                ))
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ProviderError::HandshakeFailed("plugin stdout not captured".into()))?;
        let mut lines = BufReader::new(stdout).lines();

        let handshake = tokio::time::timeout(handshake_timeout, async {
            let banner_line = lines
                .next_line()
                .await?
                .ok_or_else(|| ProviderError::HandshakeFailed("plugin closed stdout".into()))?;
            let mut parts = banner_line.split_whitespace();
            match parts.next() {
                Some(banner) if banner == PLUGIN_BANNER => {}
                other => {
                    return Err(ProviderError::HandshakeFailed(format!(
                        "unexpected banner: {:?}",
                        other
                    )))
                }
            }
            let endpoint = parts
                .next()
                .ok_or_else(|| {
                    ProviderError::HandshakeFailed("banner carries no endpoint address".into())
                })?
                .to_string();

            let capability_line = lines
                .next_line()
                .await?
                .ok_or_else(|| ProviderError::HandshakeFailed("missing capability line".into()))?;
            let handshake: PluginHandshake = serde_json::from_str(&capability_line)
                .map_err(|e| ProviderError::HandshakeFailed(format!("bad capability JSON: {e}")))?;
            Ok((endpoint, handshake))
        })
        .await
        .map_err(|_| ProviderError::HandshakeFailed("handshake timed out".into()))?;

        let (endpoint, handshake) = handshake?;
        info!(
            "Plugin provider {} registered at {} (priority {})",
            handshake.id, endpoint, handshake.priority
        );
        Ok(Self {
            handshake,
            endpoint,
            child: Mutex::new(Some(child)),
        })
    }

    /// Builds an adapter for an already-listening plugin endpoint. Used by
    /// tests and by deployments that manage the plugin process themselves.
    pub fn from_endpoint(handshake: PluginHandshake, endpoint: String) -> Self {
        Self {
            handshake,
            endpoint,
            child: Mutex::new(None),
        }
    }

    /// Shuts the plugin process down by dropping its transport and child.
    pub async fn shutdown(&self) {
        let child = match self.child.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        if let Some(mut child) = child {
            debug!("Stopping plugin provider {}", self.handshake.id);
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
    }
}

#[async_trait]
impl TranscodeProvider for PluginProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            id: self.handshake.id.clone(),
            display_name: self.handshake.display_name.clone(),
            priority: self.handshake.priority,
        }
    }

    fn capabilities(&self) -> ProviderCapabilities {
        self.handshake.capabilities.clone()
    }

    async fn start(&self, job: TranscodeJobSpec) -> Result<WorkerLaunch, ProviderError> {
        let stream = TcpStream::connect(&self.endpoint).await.map_err(|e| {
            ProviderError::LaunchFailed(format!(
                "plugin {} unreachable at {}: {}",
                self.handshake.id, self.endpoint, e
            ))
        })?;
        let (read_half, mut write_half) = stream.into_split();

        let start = StartMessage {
            op: "start",
            session_id: job.session_id.to_string(),
            request: &job.request,
            workspace: job.workspace.to_string_lossy().into_owned(),
            input_duration_seconds: job.input_duration_seconds,
        };
        let mut payload = serde_json::to_string(&start)
            .map_err(|e| ProviderError::Protocol(format!("failed to encode start: {e}")))?;
        payload.push('\n');
        write_half.write_all(payload.as_bytes()).await.map_err(|e| {
            ProviderError::LaunchFailed(format!(
                "plugin {} rejected start: {}",
                self.handshake.id, e
            ))
        })?;

        let (progress_tx, progress_rx) = mpsc::channel::<ProgressEvent>(64);
        let (exit_tx, exit_rx) = mpsc::channel::<Option<i32>>(1);
        let tail = Arc::new(Mutex::new(Vec::<String>::new()));

        let reader_tail = tail.clone();
        let plugin_id = self.handshake.id.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(read_half).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let message: PluginMessage = match serde_json::from_str(&line) {
                    Ok(m) => m,
                    Err(e) => {
                        warn!("Plugin {} sent malformed message: {}", plugin_id, e);
                        continue;
                    }
                };
                match message.op.as_str() {
                    "progress" => {
                        let tick = ProgressTick {
                            out_time_seconds: message.out_time_seconds,
                            frames: message.frames,
                            fps: message.fps,
                            bitrate_kbps: message.bitrate_kbps,
                            total_size_bytes: message.total_size_bytes,
                            speed: message.speed,
                            end: false,
                        };
                        if progress_tx.send(ProgressEvent::Tick(tick)).await.is_err() {
                            break;
                        }
                    }
                    "duration" => {
                        if let Some(duration) = message.duration_seconds {
                            if progress_tx
                                .send(ProgressEvent::DurationDetected(duration))
                                .await
                                .is_err()
                            {
                                break;
                            }
                        }
                    }
                    "log" => {
                        if let (Some(line), Ok(mut tail)) = (message.line, reader_tail.lock()) {
                            tail.push(line);
                            if tail.len() > 64 {
                                tail.remove(0);
                            }
                        }
                    }
                    "exit" => {
                        let _ = exit_tx.send(message.code).await;
                        break;
                    }
                    other => {
                        debug!("Plugin {} sent unknown op {}", plugin_id, other);
                    }
                }
            }
        });

        Ok(WorkerLaunch {
            handle: Box::new(PluginWorker {
                writer: Some(write_half),
                exit_rx,
                exit: None,
                tail,
            }),
            progress: progress_rx,
        })
    }
}

struct PluginWorker {
    writer: Option<OwnedWriteHalf>,
    exit_rx: mpsc::Receiver<Option<i32>>,
    exit: Option<WorkerExit>,
    tail: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl WorkerHandle for PluginWorker {
    fn pid(&self) -> Option<u32> {
        None
    }

    async fn wait(&mut self) -> Result<WorkerExit, ProviderError> {
        if let Some(exit) = self.exit {
            return Ok(exit);
        }
        let exit = match self.exit_rx.recv().await {
            Some(code) => WorkerExit {
                success: code == Some(0),
                code,
            },
            // Stream ended without an exit message; treat as a dead worker.
            None => WorkerExit {
                success: false,
                code: None,
            },
        };
        self.exit = Some(exit);
        Ok(exit)
    }

    async fn signal_stop(&mut self) -> Result<(), ProviderError> {
        if let Some(writer) = self.writer.as_mut() {
            let mut payload = serde_json::to_string(&StopMessage { op: "stop" })
                .map_err(|e| ProviderError::Protocol(e.to_string()))?;
            payload.push('\n');
            writer.write_all(payload.as_bytes()).await?;
        }
        Ok(())
    }

    async fn kill(&mut self) -> Result<(), ProviderError> {
        // Closing the transport is the forced stop for plugin workers.
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.shutdown().await;
        }
        Ok(())
    }

    fn stderr_tail(&self) -> String {
        self.tail
            .lock()
            .map(|t| t.join("\n"))
            .unwrap_or_default()
    }
}
