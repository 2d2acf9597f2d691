use crate::error::{ExportError, Result};
use serde::Deserialize;
use std::fs;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub export: ExportConfig,
    pub remote_source: RemoteSourceConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExportConfig {
    /// Maximum number of exports in flight at once.
    pub parallel: usize,
    /// Fixed logical name the shared bundle is persisted under.
    pub bundle_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteSourceConfig {
    /// Base URL that catalog `Remote` paths are fetched relative to.
    pub base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Root directory artifacts are published under.
    pub root: String,
    /// Directory of local result-set fixtures for the file-backed warehouse.
    pub warehouse_dir: String,
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path =
            std::env::var("DATASHIP_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
        let config_content = fs::read_to_string(&config_path).map_err(|e| {
            ExportError::Config(format!("Failed to read config file '{config_path}': {e}"))
        })?;

        let config: Config = toml::from_str(&config_content)?;
        Ok(config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            export: ExportConfig {
                parallel: 4,
                bundle_name: "dataship_shared_data.zip".to_string(),
            },
            remote_source: RemoteSourceConfig {
                base_url: "https://raw.githubusercontent.com/example/warehouse-sql/main"
                    .to_string(),
            },
            storage: StorageConfig {
                root: "output/blobs".to_string(),
                warehouse_dir: "fixtures".to_string(),
            },
        }
    }
}
