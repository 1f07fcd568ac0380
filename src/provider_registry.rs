//! Provider registry and selection.
//!
//! Providers are the strategies that know how to drive a concrete
//! transcoder backend: the builtin in-process ffmpeg wrapper and the
//! out-of-process plugin adapter. The registry owns the set of registered
//! providers and picks one per request.

pub mod ffmpeg_provider;
pub mod plugin_provider;
pub mod provider;
pub mod registry;
pub mod types;

pub use ffmpeg_provider::FfmpegProvider;
pub use plugin_provider::PluginProvider;
pub use provider::{
    ProgressEvent, ProgressTick, TranscodeJobSpec, TranscodeProvider, WorkerExit, WorkerHandle,
    WorkerLaunch,
};
pub use registry::ProviderRegistry;
pub use types::{ProviderCapabilities, ProviderDescriptor, ProviderInfo};
