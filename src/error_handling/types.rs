//! Error types for every component of the orchestrator.
//!
//! Each component defines its error enum here; the session manager is the
//! only place where internal errors are translated into the caller-visible
//! [`TranscodeError`] kinds. Raw I/O errors never cross the public API
//! boundary.

use std::path::PathBuf;

use uuid::Uuid;

use crate::media::types::{AudioCodec, Container, VideoCodec};
use crate::session_store::types::SessionStatus;

/// Errors raised while loading or validating the configuration file.
#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    TomlError(String),
    MissingField(String),
    NotInRange(String),
    DirectoryDoesNotExist(String),
    InvalidProvider(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(err) => write!(f, "IO error reading configuration: {}", err),
            ConfigError::TomlError(msg) => write!(f, "TOML parse error: {}", msg),
            ConfigError::MissingField(field) => write!(f, "Missing configuration field: {}", field),
            ConfigError::NotInRange(msg) => write!(f, "Configuration value out of range: {}", msg),
            ConfigError::DirectoryDoesNotExist(dir) => {
                write!(f, "Configured directory does not exist: {}", dir)
            }
            ConfigError::InvalidProvider(msg) => {
                write!(f, "Invalid provider declaration: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

/// Validation failures for an incoming transcode request.
#[derive(Debug)]
pub enum RequestError {
    EmptyMediaId,
    EmptyInputPath,
    IncompatibleVideoCodec(VideoCodec, Container),
    IncompatibleAudioCodec(AudioCodec, Container),
    QualityOutOfRange(i32),
    NegativeStartOffset(f64),
}

impl std::fmt::Display for RequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestError::EmptyMediaId => write!(f, "media identifier must not be empty"),
            RequestError::EmptyInputPath => write!(f, "input path must not be empty"),
            RequestError::IncompatibleVideoCodec(codec, container) => {
                write!(
                    f,
                    "video codec {} is not valid in a {} container",
                    codec, container
                )
            }
            RequestError::IncompatibleAudioCodec(codec, container) => {
                write!(
                    f,
                    "audio codec {} is not valid in a {} container",
                    codec, container
                )
            }
            RequestError::QualityOutOfRange(q) => {
                write!(f, "quality value {} is outside the accepted range", q)
            }
            RequestError::NegativeStartOffset(v) => {
                write!(f, "start offset {} must not be negative", v)
            }
        }
    }
}

impl std::error::Error for RequestError {}

/// Failures surfaced by the media metadata collaborator.
#[derive(Debug)]
pub enum ProbeError {
    ToolFailed(String),
    IoError(std::io::Error),
    Unparseable(String),
}

impl std::fmt::Display for ProbeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeError::ToolFailed(msg) => write!(f, "metadata probe failed: {}", msg),
            ProbeError::IoError(err) => write!(f, "IO error during metadata probe: {}", err),
            ProbeError::Unparseable(out) => {
                write!(f, "metadata probe produced unparseable output: {}", out)
            }
        }
    }
}

impl std::error::Error for ProbeError {}

impl From<std::io::Error> for ProbeError {
    fn from(err: std::io::Error) -> Self {
        ProbeError::IoError(err)
    }
}

/// Errors raised by session store backends.
#[derive(Debug)]
pub enum StoreError {
    /// A non-terminal session for the same content hash already exists.
    DuplicateActive(Uuid),
    /// The compare-and-set status transition found the session in a state
    /// outside the caller's `from` set (or already terminal).
    IllegalTransition {
        current: SessionStatus,
        requested: SessionStatus,
    },
    NotFound(Uuid),
    ConnectionFailed,
    ReadFailed,
    WriteFailed,
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::DuplicateActive(id) => {
                write!(
                    f,
                    "an active session {} already exists for this content hash",
                    id
                )
            }
            StoreError::IllegalTransition { current, requested } => {
                write!(f, "illegal session transition {} -> {}", current, requested)
            }
            StoreError::NotFound(id) => write!(f, "session {} not found", id),
            StoreError::ConnectionFailed => write!(f, "session store connection failed"),
            StoreError::ReadFailed => write!(f, "session store read failed"),
            StoreError::WriteFailed => write!(f, "session store write failed"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Errors raised by the content-addressable artifact store.
#[derive(Debug)]
pub enum ContentStoreError {
    /// Publish would cross a filesystem boundary; a directory rename cannot
    /// be atomic there, so the store refuses.
    CrossFilesystem(PathBuf, PathBuf),
    /// An active session still references the artifact.
    ArtifactInUse(String),
    ArtifactNotFound(String),
    IoError(std::io::Error),
}

impl std::fmt::Display for ContentStoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContentStoreError::CrossFilesystem(from, to) => write!(
                f,
                "refusing non-atomic publish across filesystems: {} -> {}",
                from.display(),
                to.display()
            ),
            ContentStoreError::ArtifactInUse(hash) => {
                write!(f, "artifact {} is referenced by an active session", hash)
            }
            ContentStoreError::ArtifactNotFound(hash) => {
                write!(f, "no artifact stored for content hash {}", hash)
            }
            ContentStoreError::IoError(err) => write!(f, "content store IO error: {}", err),
        }
    }
}

impl std::error::Error for ContentStoreError {}

impl From<std::io::Error> for ContentStoreError {
    fn from(err: std::io::Error) -> Self {
        ContentStoreError::IoError(err)
    }
}

/// Errors raised by providers and the provider registry.
#[derive(Debug)]
pub enum ProviderError {
    /// The external tool or plugin process could not be launched. Triggers
    /// quarantine for the provider.
    LaunchFailed(String),
    /// No registered, non-quarantined provider satisfies the request.
    NoCompatibleProvider,
    /// Deregistration refused while sessions are in flight.
    DeregisterBusy(String),
    HandshakeFailed(String),
    Protocol(String),
    IoError(std::io::Error),
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderError::LaunchFailed(msg) => write!(f, "provider launch failed: {}", msg),
            ProviderError::NoCompatibleProvider => {
                write!(f, "no compatible provider for this request")
            }
            ProviderError::DeregisterBusy(id) => {
                write!(
                    f,
                    "provider {} has in-flight sessions and cannot be deregistered",
                    id
                )
            }
            ProviderError::HandshakeFailed(msg) => write!(f, "plugin handshake failed: {}", msg),
            ProviderError::Protocol(msg) => write!(f, "plugin protocol error: {}", msg),
            ProviderError::IoError(err) => write!(f, "provider IO error: {}", err),
        }
    }
}

impl std::error::Error for ProviderError {}

impl From<std::io::Error> for ProviderError {
    fn from(err: std::io::Error) -> Self {
        ProviderError::IoError(err)
    }
}

/// Admission outcomes that do not grant a slot.
#[derive(Debug, PartialEq, Eq)]
pub enum AdmissionError {
    /// The queue is full; the caller may retry later.
    AtCapacity,
    /// The request waited longer than the queue timeout.
    QueueTimeout,
    /// The caller or the service shutdown cancelled the wait.
    Cancelled,
}

impl std::fmt::Display for AdmissionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdmissionError::AtCapacity => write!(f, "admission queue is full"),
            AdmissionError::QueueTimeout => write!(f, "timed out waiting for an admission slot"),
            AdmissionError::Cancelled => write!(f, "admission wait was cancelled"),
        }
    }
}

impl std::error::Error for AdmissionError {}

/// Caller-visible error kinds of the public API surface.
///
/// Every internal error is translated into one of these at the session
/// manager boundary.
#[derive(Debug)]
pub enum TranscodeError {
    InvalidRequest(String),
    NoCompatibleProvider,
    AtCapacity,
    QueueTimeout,
    ProviderUnavailable(String),
    WorkerFailed {
        exit_code: Option<i32>,
        diagnostic: String,
    },
    Cancelled,
    Timeout,
    NotFound(Uuid),
    Storage(String),
}

impl std::fmt::Display for TranscodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TranscodeError::InvalidRequest(msg) => write!(f, "invalid request: {}", msg),
            TranscodeError::NoCompatibleProvider => {
                write!(f, "no compatible provider for this request")
            }
            TranscodeError::AtCapacity => write!(f, "service is at capacity"),
            TranscodeError::QueueTimeout => {
                write!(f, "request timed out in the admission queue")
            }
            TranscodeError::ProviderUnavailable(id) => {
                write!(f, "provider {} is unavailable", id)
            }
            TranscodeError::WorkerFailed {
                exit_code,
                diagnostic,
            } => match exit_code {
                Some(code) => write!(f, "worker exited with code {}: {}", code, diagnostic),
                None => write!(f, "worker terminated by signal: {}", diagnostic),
            },
            TranscodeError::Cancelled => write!(f, "session was cancelled"),
            TranscodeError::Timeout => write!(f, "session exceeded its wall-clock limit"),
            TranscodeError::NotFound(id) => write!(f, "unknown session id {}", id),
            TranscodeError::Storage(msg) => write!(f, "storage error: {}", msg),
        }
    }
}

impl std::error::Error for TranscodeError {}

impl From<RequestError> for TranscodeError {
    fn from(err: RequestError) -> Self {
        TranscodeError::InvalidRequest(err.to_string())
    }
}

impl From<StoreError> for TranscodeError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => TranscodeError::NotFound(id),
            other => TranscodeError::Storage(other.to_string()),
        }
    }
}

impl From<ContentStoreError> for TranscodeError {
    fn from(err: ContentStoreError) -> Self {
        TranscodeError::Storage(err.to_string())
    }
}

impl From<AdmissionError> for TranscodeError {
    fn from(err: AdmissionError) -> Self {
        match err {
            AdmissionError::AtCapacity => TranscodeError::AtCapacity,
            AdmissionError::QueueTimeout => TranscodeError::QueueTimeout,
            AdmissionError::Cancelled => TranscodeError::Cancelled,
        }
    }
}

/// Failures while assembling the orchestrator at startup.
#[derive(Debug)]
pub enum OrchestratorError {
    Config(ConfigError),
    Storage(StoreError),
    ContentStore(ContentStoreError),
    Provider(ProviderError),
}

impl std::fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrchestratorError::Config(err) => write!(f, "configuration error: {}", err),
            OrchestratorError::Storage(err) => write!(f, "session store error: {}", err),
            OrchestratorError::ContentStore(err) => write!(f, "content store error: {}", err),
            OrchestratorError::Provider(err) => write!(f, "provider error: {}", err),
        }
    }
}

impl std::error::Error for OrchestratorError {}

impl From<ConfigError> for OrchestratorError {
    fn from(err: ConfigError) -> Self {
        OrchestratorError::Config(err)
    }
}

impl From<StoreError> for OrchestratorError {
    fn from(err: StoreError) -> Self {
        OrchestratorError::Storage(err)
    }
}

impl From<ContentStoreError> for OrchestratorError {
    fn from(err: ContentStoreError) -> Self {
        OrchestratorError::ContentStore(err)
    }
}

impl From<ProviderError> for OrchestratorError {
    fn from(err: ProviderError) -> Self {
        OrchestratorError::Provider(err)
    }
}
