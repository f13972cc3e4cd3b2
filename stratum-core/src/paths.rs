//! XDG base directory resolution for Stratum.
//!
//! Application directories are derived through `directories-next` from the
//! `QUALIFIER`, `ORGANIZATION` and `APPLICATION` constants, e.g.
//! `~/.config/stratum` for configuration on Linux.

use std::path::{Path, PathBuf};
use directories_next::{BaseDirs, ProjectDirs};
use crate::error::{CoreError, ConfigError};

const QUALIFIER: &str = "org";
const ORGANIZATION: &str = "Stratum";
const APPLICATION: &str = "stratum";

/// Name of the configuration file looked up in [`get_app_config_dir`].
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Returns the application-specific configuration directory.
pub fn get_app_config_dir() -> Result<PathBuf, CoreError> {
    ProjectDirs::from(QUALIFIER, ORGANIZATION, APPLICATION)
        .map(|dirs| dirs.config_dir().to_path_buf())
        .ok_or_else(|| CoreError::Config(ConfigError::DirectoryUnavailable {
            dir_type: "App Config".to_string(),
        }))
}

/// Returns the application-specific state directory, used for log files.
///
/// On Linux this honors `$XDG_STATE_HOME` and falls back to `~/.local/state`;
/// elsewhere the local data directory is used.
pub fn get_app_state_dir() -> Result<PathBuf, CoreError> {
    BaseDirs::new()
        .map(|dirs| {
            #[cfg(target_os = "linux")]
            {
                match std::env::var("XDG_STATE_HOME") {
                    Ok(state_home) if !state_home.is_empty() => PathBuf::from(state_home),
                    _ => dirs.home_dir().join(".local/state"),
                }
            }
            #[cfg(not(target_os = "linux"))]
            {
                dirs.data_local_dir().to_path_buf()
            }
        })
        .map(|base| base.join(APPLICATION))
        .ok_or_else(|| CoreError::Config(ConfigError::DirectoryUnavailable {
            dir_type: "App State".to_string(),
        }))
}

/// Ensures that a directory exists at `path`, creating missing parents.
///
/// Fails when the path exists but is not a directory.
pub fn ensure_dir_exists(path: &Path) -> Result<(), CoreError> {
    if path.exists() {
        if path.is_dir() {
            return Ok(());
        }
        return Err(CoreError::Filesystem {
            message: "Path exists but is not a directory".to_string(),
            path: path.to_path_buf(),
            source: std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                "Path exists but is not a directory",
            ),
        });
    }
    std::fs::create_dir_all(path).map_err(|source| CoreError::Filesystem {
        message: "Failed to create directory".to_string(),
        path: path.to_path_buf(),
        source,
    })
}
