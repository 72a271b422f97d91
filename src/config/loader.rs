/// Configuration loading from TOML file and environment
use std::path::Path;

use crate::data::keeps_grid;
use crate::error::{GridError, Result};
use crate::types::Config;

const ENV_PREFIX: &str = "TSGRID";

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| GridError::ConfigError(format!("Failed to read config file: {}", e)))?;

    let config: Config = toml::from_str(&content)
        .map_err(|e| GridError::ConfigError(format!("Failed to parse config: {}", e)))?;

    validate_config(&config)?;

    Ok(config)
}

/// Layer defaults, an optional TOML file and `TSGRID_*` environment variables
pub fn load_layered_config(path: Option<&Path>) -> Result<Config> {
    let mut builder = ::config::Config::builder();

    if let Some(path) = path {
        if !path.is_file() {
            return Err(GridError::ConfigError(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        builder = builder.add_source(::config::File::from(path).format(::config::FileFormat::Toml));
    }

    builder = builder.add_source(
        ::config::Environment::with_prefix(ENV_PREFIX)
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("resolutions")
            .with_list_parse_key("highlow_markers")
            .with_list_parse_key("sum_markers"),
    );

    let config: Config = builder
        .build()
        .and_then(|c| c.try_deserialize())
        .map_err(|e| GridError::ConfigError(format!("Failed to load config: {}", e)))?;

    validate_config(&config)?;

    Ok(config)
}

pub fn validate_config(config: &Config) -> Result<()> {
    if config.resolutions.is_empty() {
        return Err(GridError::ConfigError("resolutions is empty".to_string()));
    }

    for &resolution in &config.resolutions {
        if !keeps_grid(resolution) {
            return Err(GridError::ConfigError(format!(
                "Invalid resolution: {} (zero, or rounds onto an off-grid minute)",
                resolution
            )));
        }
    }

    if config.log_level.trim().is_empty() {
        return Err(GridError::ConfigError("log_level is empty".to_string()));
    }

    Ok(())
}
