//! Configuration loading for Stratum.
//!
//! [`ConfigLoader::load()`] reads `config.toml` from the application configuration
//! directory (see [`crate::paths::get_app_config_dir`]). A missing or empty file yields
//! the default [`CoreConfig`]. Every loaded configuration is passed through
//! validation, which:
//! - normalizes log level and format to lowercase and rejects unknown values,
//! - resolves relative log file paths against the application state directory,
//! - rejects negative damage padding and zero-valued limits.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::CoreConfig;
use crate::error::{ConfigError, CoreError};
use crate::paths::{get_app_config_dir, get_app_state_dir, CONFIG_FILE_NAME};

const VALID_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const VALID_FORMATS: [&str; 2] = ["text", "json"];

/// Namespace for configuration loading.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads and validates the configuration from the default location.
    pub fn load() -> Result<CoreConfig, CoreError> {
        let path = get_app_config_dir()?.join(CONFIG_FILE_NAME);
        Self::load_from_path(&path)
    }

    /// Loads and validates the configuration from `path`.
    ///
    /// A missing file is not an error; other read failures map to
    /// [`ConfigError::ReadError`].
    pub fn load_from_path(path: &Path) -> Result<CoreConfig, CoreError> {
        match fs::read_to_string(path) {
            Ok(content) => {
                tracing::debug!(path = %path.display(), "Loading configuration file");
                Self::load_from_str(&content)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "Configuration file not found, using defaults");
                let mut config = CoreConfig::default();
                Self::validate_config(&mut config)?;
                Ok(config)
            }
            Err(source) => Err(CoreError::Config(ConfigError::ReadError {
                path: path.to_path_buf(),
                source,
            })),
        }
    }

    /// Parses and validates a configuration document.
    pub fn load_from_str(content: &str) -> Result<CoreConfig, CoreError> {
        let mut config: CoreConfig = if content.trim().is_empty() {
            CoreConfig::default()
        } else {
            toml::from_str(content).map_err(ConfigError::ParseError)?
        };
        Self::validate_config(&mut config)?;
        Ok(config)
    }

    /// Validates `config` in place, normalizing values where possible.
    pub fn validate_config(config: &mut CoreConfig) -> Result<(), CoreError> {
        let level = config.logging.level.to_lowercase();
        if !VALID_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log level '{}'. Must be one of: {}",
                config.logging.level,
                VALID_LEVELS.join(", ")
            ))
            .into());
        }
        config.logging.level = level;

        let format = config.logging.format.to_lowercase();
        if !VALID_FORMATS.contains(&format.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log format '{}'. Must be one of: {}",
                config.logging.format,
                VALID_FORMATS.join(", ")
            ))
            .into());
        }
        config.logging.format = format;

        if let Some(file_path) = config.logging.file_path.take() {
            config.logging.file_path = Some(Self::resolve_log_path(file_path)?);
        }

        let compositor = &config.compositor;
        if compositor.damage_padding < 0 {
            return Err(ConfigError::ValidationError(format!(
                "damage_padding must not be negative (got {})",
                compositor.damage_padding
            ))
            .into());
        }
        if compositor.max_damage_rects == 0 {
            return Err(ConfigError::ValidationError(
                "max_damage_rects must be greater than zero".to_string(),
            )
            .into());
        }
        if compositor.cursor_size == 0 {
            return Err(ConfigError::ValidationError(
                "cursor_size must be greater than zero".to_string(),
            )
            .into());
        }
        Ok(())
    }

    fn resolve_log_path(path: PathBuf) -> Result<PathBuf, CoreError> {
        if path.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(
                "Log file path must not be empty".to_string(),
            )
            .into());
        }
        if path.is_absolute() {
            Ok(path)
        } else {
            Ok(get_app_state_dir()?.join("logs").join(path))
        }
    }
}
