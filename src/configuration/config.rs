use std::path::Path;

use log::info;
use serde::Deserialize;

use crate::configuration::types::{
    CleanupConfig, LimitsConfig, ProviderConfig, StorageConfig, ToolsConfig,
};
use crate::error_handling::types::ConfigError;

/// Top-level service configuration, loaded from a TOML file.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub storage: StorageConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub cleanup: CleanupConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

impl Config {
    /// Loads and validates the configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Config, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&raw).map_err(|e| ConfigError::TomlError(e.to_string()))?;
        config.validate()?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Checks value ranges and declaration consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.root.as_os_str().is_empty() {
            return Err(ConfigError::MissingField("storage.root".to_string()));
        }
        if self.limits.max_concurrent_sessions == 0 {
            return Err(ConfigError::NotInRange(
                "limits.max_concurrent_sessions must be at least 1".to_string(),
            ));
        }
        if self.limits.session_timeout_secs == 0 {
            return Err(ConfigError::NotInRange(
                "limits.session_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.cleanup.interval_secs == 0 {
            return Err(ConfigError::NotInRange(
                "cleanup.interval_secs must be at least 1".to_string(),
            ));
        }
        if let Some(parent) = self.storage.root.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                return Err(ConfigError::DirectoryDoesNotExist(
                    parent.to_string_lossy().into_owned(),
                ));
            }
        }

        let mut ffmpeg_ids: Vec<&str> = Vec::new();
        for provider in &self.providers {
            if let ProviderConfig::Ffmpeg { id, .. } = provider {
                if id.trim().is_empty() {
                    return Err(ConfigError::InvalidProvider(
                        "ffmpeg provider with empty id".to_string(),
                    ));
                }
                if ffmpeg_ids.contains(&id.as_str()) {
                    return Err(ConfigError::InvalidProvider(format!(
                        "duplicate provider id {}",
                        id
                    )));
                }
                ffmpeg_ids.push(id);
            }
        }
        Ok(())
    }

    /// Effective session database DSN: the configured URL or a SQLite file
    /// under the storage root.
    pub fn database_url(&self) -> String {
        match &self.storage.database_url {
            Some(url) => url.clone(),
            None => format!(
                "sqlite://{}?mode=rwc",
                self.storage.root.join("sessions.sqlite3").to_string_lossy()
            ),
        }
    }
}
