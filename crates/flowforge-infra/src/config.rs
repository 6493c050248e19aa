//! Engine configuration loader.
//!
//! Reads a `flowforge.toml` file and deserializes it into [`EngineConfig`].
//! [`load_engine_config`] falls back to defaults when the file is missing or
//! malformed; [`try_load_engine_config`] reports those problems instead.

use std::path::{Path, PathBuf};

use flowforge_types::config::EngineConfig;

/// Default file name looked up by the CLI when `--config` is not given.
pub const CONFIG_FILE_NAME: &str = "flowforge.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Load engine configuration from `path`.
///
/// - If the file does not exist, returns [`EngineConfig::default()`].
/// - If the file exists but cannot be read or parsed, logs a warning and
///   returns the default.
/// - Otherwise returns the parsed config.
pub async fn load_engine_config(path: &Path) -> EngineConfig {
    match try_load_engine_config(path).await {
        Ok(config) => config,
        Err(ConfigError::Read { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config file found at {}, using defaults", path.display());
            EngineConfig::default()
        }
        Err(err) => {
            tracing::warn!("{err}, using defaults");
            EngineConfig::default()
        }
    }
}

/// Strict variant of [`load_engine_config`]: a missing or invalid file is an
/// error.
pub async fn try_load_engine_config(path: &Path) -> Result<EngineConfig, ConfigError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

    toml::from_str::<EngineConfig>(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
