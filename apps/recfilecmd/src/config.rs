use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot parse {path}: {source}")]
    ParseToml {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid configuration: {message}")]
    Invalid { message: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub logs_dir: PathBuf,
    /// Floor for slots per fixed page; pages grow until it holds.
    #[serde(default = "default_min_slots")]
    pub min_slots_per_page: u32,
}

fn default_min_slots() -> u32 {
    recfile::metadata::DEFAULT_MIN_SLOTS_PER_PAGE
}

impl EngineConfig {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref().to_path_buf();
        let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        let config: EngineConfig = toml::from_str(&text).map_err(|source| ConfigError::ParseToml {
            path: path.clone(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.data_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid {
                message: "storage.data_dir must not be empty".to_string(),
            });
        }
        if self.storage.min_slots_per_page == 0 {
            return Err(ConfigError::Invalid {
                message: "storage.min_slots_per_page must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}
