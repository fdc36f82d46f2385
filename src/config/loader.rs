use std::path::Path;

use crate::error::{AppError, AppResult, ConfigError};

use super::types::{ConfigFile, NodeConfig};

/// Resolve the node config: defaults, then the config file if one was given.
pub fn load_config(path: Option<&Path>) -> AppResult<NodeConfig> {
    let mut config = NodeConfig::default();
    let Some(path) = path else {
        return Ok(config);
    };

    let raw = std::fs::read_to_string(path).map_err(|err| {
        AppError::config(ConfigError::Read {
            path: path.display().to_string(),
            source: err,
        })
    })?;
    let file: ConfigFile = toml::from_str(&raw).map_err(|err| {
        AppError::config(ConfigError::Parse {
            path: path.display().to_string(),
            source: err,
        })
    })?;
    config.apply_file(&file);
    tracing::debug!("Loaded config from {}", path.display());
    Ok(config)
}
