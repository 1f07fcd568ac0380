//! The provider contract.
//!
//! A provider starts exactly one worker per call and hands back a
//! [`WorkerLaunch`]: a control handle plus a progress channel. Upward
//! notifications travel only as messages on that channel; the supervisor
//! owns all store writes.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error_handling::types::ProviderError;
use crate::media::types::TranscodeRequest;
use crate::provider_registry::types::{ProviderCapabilities, ProviderInfo};

/// Everything a provider needs to start one worker.
#[derive(Debug, Clone)]
pub struct TranscodeJobSpec {
    pub session_id: Uuid,
    pub request: TranscodeRequest,
    /// Private staging directory the worker writes into.
    pub workspace: PathBuf,
    /// Input duration when the metadata collaborator resolved one.
    pub input_duration_seconds: Option<f64>,
}

/// One progress tick derived from the tool's structured output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressTick {
    /// Media seconds processed (`out_time`).
    pub out_time_seconds: Option<f64>,
    pub frames: Option<u64>,
    pub fps: Option<f64>,
    pub bitrate_kbps: Option<f64>,
    /// Output bytes written so far (`total_size`).
    pub total_size_bytes: Option<u64>,
    /// Encode speed as a multiple of realtime.
    pub speed: Option<f64>,
    /// Set when the tool flagged the end of its progress stream.
    pub end: bool,
}

/// Messages flowing from the worker's reader tasks to the supervisor.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    Tick(ProgressTick),
    /// Input duration discovered from the tool's own output, used when the
    /// upfront metadata probe could not resolve one.
    DurationDetected(f64),
}

/// Exit summary of a worker process.
#[derive(Debug, Clone, Copy)]
pub struct WorkerExit {
    pub success: bool,
    pub code: Option<i32>,
}

/// Control handle over one running worker.
#[async_trait]
pub trait WorkerHandle: Send {
    /// OS process id, when the worker is a local child process.
    fn pid(&self) -> Option<u32>;

    /// Waits for the worker to exit. Safe to call again after completion.
    async fn wait(&mut self) -> Result<WorkerExit, ProviderError>;

    /// Polite stop request (first phase of the two-phase escalation).
    async fn signal_stop(&mut self) -> Result<(), ProviderError>;

    /// Forced termination (second phase).
    async fn kill(&mut self) -> Result<(), ProviderError>;

    /// Bounded tail of the worker's diagnostic output.
    fn stderr_tail(&self) -> String;
}

/// A started worker: control handle plus its progress stream.
pub struct WorkerLaunch {
    pub handle: Box<dyn WorkerHandle>,
    pub progress: mpsc::Receiver<ProgressEvent>,
}

/// A transcoding backend.
#[async_trait]
pub trait TranscodeProvider: Send + Sync {
    fn info(&self) -> ProviderInfo;

    fn capabilities(&self) -> ProviderCapabilities;

    /// Launches one worker for the job. A failure to even start the
    /// backing tool must surface as [`ProviderError::LaunchFailed`] so the
    /// registry can quarantine this provider.
    async fn start(&self, job: TranscodeJobSpec) -> Result<WorkerLaunch, ProviderError>;
}
