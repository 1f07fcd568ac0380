//! Composition root: builds every component from the configuration, runs
//! the service until a shutdown signal arrives, then drains gracefully.

use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cleanup_service::CleanupService;
use crate::configuration::config::Config;
use crate::configuration::types::{ProviderConfig, StorageBackend};
use crate::content_store::ContentStore;
use crate::error_handling::types::{ContentStoreError, OrchestratorError};
use crate::media::probe::FfprobeMetadataService;
use crate::media::types::{AudioCodec, Container, VideoCodec};
use crate::provider_registry::ffmpeg_provider::FfmpegProvider;
use crate::provider_registry::plugin_provider::PluginProvider;
use crate::provider_registry::registry::ProviderRegistry;
use crate::provider_registry::types::{ProviderCapabilities, ProviderInfo};
use crate::resource_manager::ResourceManager;
use crate::session_manager::manager::SessionManager;
use crate::session_store::memory_store::MemorySessionStore;
use crate::session_store::sqlite_store::SqliteSessionStore;
use crate::session_store::store_trait::SessionStore;
use crate::worker_supervisor::supervisor::SupervisorContext;

/// Service-level counters exposed for operators.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStats {
    pub active_sessions: usize,
    pub queued_sessions: usize,
    pub max_concurrent_sessions: usize,
    pub store_bytes: u64,
    pub provider_count: usize,
}

pub struct Orchestrator {
    config: Config,
    manager: Arc<SessionManager>,
    resources: Arc<ResourceManager>,
    content_store: Arc<ContentStore>,
    registry: Arc<ProviderRegistry>,
    cleanup: Option<CleanupService>,
    cleanup_handle: Option<JoinHandle<()>>,
    plugins: Vec<Arc<PluginProvider>>,
    shutdown: CancellationToken,
}

impl Orchestrator {
    pub async fn new(config: Config) -> Result<Self, OrchestratorError> {
        config.validate()?;
        std::fs::create_dir_all(&config.storage.root)
            .map_err(|e| OrchestratorError::ContentStore(ContentStoreError::IoError(e)))?;

        let store: Arc<dyn SessionStore> = match config.storage.backend {
            StorageBackend::Database => {
                info!("Initializing database session store");
                Arc::new(SqliteSessionStore::connect(&config.database_url()).await?)
            }
            StorageBackend::Memory => {
                info!("Initializing in-memory session store");
                Arc::new(MemorySessionStore::new())
            }
        };

        let content_store = Arc::new(ContentStore::new(&config.storage.root, store.clone())?);
        let registry = Arc::new(ProviderRegistry::new(Duration::from_secs(
            config.limits.provider_quarantine_secs,
        )));

        let mut plugins = Vec::new();
        for provider_config in &config.providers {
            match provider_config {
                ProviderConfig::Ffmpeg {
                    id,
                    display_name,
                    priority,
                    executable,
                    hw_accel,
                    containers,
                    video_codecs,
                    audio_codecs,
                    max_concurrent,
                } => {
                    let path = executable
                        .clone()
                        .unwrap_or_else(|| config.tools.ffmpeg_path.clone());
                    if !FfmpegProvider::probe_tool(&path).await {
                        warn!(
                            "Codec tool for provider {} not responding at {}; \
                             it will be quarantined on its first launch failure",
                            id,
                            path.display()
                        );
                    }
                    let info = ProviderInfo {
                        id: id.clone(),
                        display_name: display_name.clone().unwrap_or_else(|| id.clone()),
                        priority: *priority,
                    };
                    let capabilities = ProviderCapabilities {
                        containers: containers.clone().unwrap_or_else(default_containers),
                        video_codecs: video_codecs.clone().unwrap_or_else(default_video_codecs),
                        audio_codecs: audio_codecs.clone().unwrap_or_else(default_audio_codecs),
                        hw_accel: *hw_accel,
                        max_concurrent: *max_concurrent,
                    };
                    registry.register(Arc::new(FfmpegProvider::new(info, capabilities, path)));
                }
                ProviderConfig::Plugin {
                    command,
                    args,
                    handshake_timeout_secs,
                } => {
                    match PluginProvider::launch(
                        command,
                        args,
                        Duration::from_secs(*handshake_timeout_secs),
                    )
                    .await
                    {
                        Ok(plugin) => {
                            let plugin = Arc::new(plugin);
                            registry.register(plugin.clone());
                            plugins.push(plugin);
                        }
                        Err(e) => {
                            // A broken plugin must not keep the service down.
                            error!("Plugin {} failed to start: {}", command.display(), e);
                        }
                    }
                }
            }
        }

        if registry.descriptors().is_empty() {
            info!(
                "No providers declared; registering the default codec tool at {}",
                config.tools.ffmpeg_path.display()
            );
            registry.register(Arc::new(FfmpegProvider::new(
                ProviderInfo {
                    id: "ffmpeg".to_string(),
                    display_name: "ffmpeg".to_string(),
                    priority: 0,
                },
                ProviderCapabilities {
                    containers: default_containers(),
                    video_codecs: default_video_codecs(),
                    audio_codecs: default_audio_codecs(),
                    hw_accel: false,
                    max_concurrent: None,
                },
                config.tools.ffmpeg_path.clone(),
            )));
        }

        let resources = Arc::new(ResourceManager::new(
            config.limits.max_concurrent_sessions,
            config.limits.max_queue_size,
            Duration::from_secs(config.limits.queue_timeout_secs),
        ));
        let ctx = Arc::new(SupervisorContext {
            store: store.clone(),
            content_store: content_store.clone(),
            registry: registry.clone(),
            session_timeout: Duration::from_secs(config.limits.session_timeout_secs),
            stop_grace: Duration::from_secs(config.limits.stop_grace_secs),
            progress_interval: Duration::from_millis(config.limits.progress_interval_ms),
        });
        let metadata = Arc::new(FfprobeMetadataService::new(&config.tools.ffprobe_path));

        let shutdown = CancellationToken::new();
        let manager = Arc::new(SessionManager::new(
            ctx,
            resources.clone(),
            metadata,
            shutdown.child_token(),
        ));

        let cleanup = CleanupService::new(
            store,
            content_store.clone(),
            manager.active_sessions(),
            config.cleanup.clone(),
        );

        Ok(Self {
            config,
            manager,
            resources,
            content_store,
            registry,
            cleanup: Some(cleanup),
            cleanup_handle: None,
            plugins,
            shutdown,
        })
    }

    /// The public API surface. Transports hold this.
    pub fn session_manager(&self) -> Arc<SessionManager> {
        self.manager.clone()
    }

    pub fn stats(&self) -> OrchestratorStats {
        OrchestratorStats {
            active_sessions: self.manager.active_count(),
            queued_sessions: self.resources.queued(),
            max_concurrent_sessions: self.resources.max_concurrent(),
            store_bytes: self.content_store.total_bytes().unwrap_or(0),
            provider_count: self.registry.descriptors().len(),
        }
    }

    /// Runs until the shutdown channel fires, then drains gracefully.
    pub async fn run(
        &mut self,
        mut shutdown_rx: tokio::sync::broadcast::Receiver<()>,
    ) -> Result<(), OrchestratorError> {
        if let Some(cleanup) = self.cleanup.take() {
            let token = self.shutdown.child_token();
            self.cleanup_handle = Some(tokio::spawn(cleanup.run(token)));
        }
        info!("Orchestrator is operational");

        if shutdown_rx.recv().await.is_err() {
            info!("Shutdown channel closed, stopping orchestrator");
        }

        self.shutdown().await;
        Ok(())
    }

    /// Cancels all work, waits for supervisors to drain, stops cleanup and
    /// plugin processes.
    pub async fn shutdown(&mut self) {
        info!("Starting orchestrator shutdown...");
        self.manager
            .shutdown(Duration::from_secs(self.config.limits.shutdown_drain_secs))
            .await;
        self.shutdown.cancel();

        if let Some(handle) = self.cleanup_handle.take() {
            match handle.await {
                Ok(()) => info!("Cleanup service stopped"),
                Err(e) => error!("Cleanup task terminated with error: {}", e),
            }
        }
        for plugin in &self.plugins {
            plugin.shutdown().await;
        }
        info!("Orchestrator shutdown completed");
    }
}

fn default_containers() -> Vec<Container> {
    vec![
        Container::Mp4,
        Container::Mkv,
        Container::Webm,
        Container::Mov,
        Container::MpegTs,
    ]
}

fn default_video_codecs() -> Vec<VideoCodec> {
    vec![
        VideoCodec::H264,
        VideoCodec::Hevc,
        VideoCodec::Av1,
        VideoCodec::Vp9,
    ]
}

fn default_audio_codecs() -> Vec<AudioCodec> {
    vec![
        AudioCodec::Aac,
        AudioCodec::Opus,
        AudioCodec::Mp3,
        AudioCodec::Flac,
    ]
}
