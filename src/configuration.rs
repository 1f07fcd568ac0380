//! Service configuration: TOML file loading, validation and the typed
//! sections consumed by each component.

pub mod config;
pub mod types;

pub use config::Config;
pub use types::{
    CleanupConfig, LimitsConfig, ProviderConfig, StorageBackend, StorageConfig, ToolsConfig,
};
