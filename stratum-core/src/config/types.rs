//! Configuration data structures.
//!
//! All structs reject unknown fields and fall back to [`super::defaults`] for
//! anything missing from the source.

use serde::Deserialize;
use std::path::PathBuf;
use super::defaults;

/// Configuration settings for the logging subsystem.
///
/// ```
/// use stratum_core::config::LoggingConfig;
///
/// let toml_str = r#"
/// level = "debug"
/// format = "json"
/// "#;
/// let log_config: LoggingConfig = toml::from_str(toml_str).unwrap();
/// assert_eq!(log_config.level, "debug");
/// assert_eq!(log_config.file_path, None);
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// One of "trace", "debug", "info", "warn", "error" (case-insensitive).
    #[serde(default = "defaults::default_log_level")]
    pub level: String,
    /// Optional log file. Relative paths resolve against the application state directory.
    #[serde(default = "defaults::default_log_file_path")]
    pub file_path: Option<PathBuf>,
    /// "text" or "json".
    #[serde(default = "defaults::default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        defaults::default_logging_config()
    }
}

/// How several exclusive zones anchored to the same output edge combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusiveZonePolicy {
    /// Only the highest-priority positive reservation on an edge is reserved;
    /// later reservations on that edge are placed but reserve nothing extra.
    #[default]
    HighestPriority,
    /// Every positive reservation on an edge is stacked after the previous one.
    Accumulate,
}

/// Settings consumed by the compositor core.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompositorConfig {
    /// Padding in buffer pixels added around damaged rectangles before presenting.
    #[serde(default = "defaults::default_damage_padding")]
    pub damage_padding: i32,
    /// Above this many rectangles a damage region collapses to its bounding box.
    #[serde(default = "defaults::default_max_damage_rects")]
    pub max_damage_rects: usize,
    /// Render fractional scales at the next integer scale and downsample.
    #[serde(default = "defaults::default_true")]
    pub oversampling: bool,
    /// Allow hardware cursor planes where the backend supports them.
    #[serde(default = "defaults::default_true")]
    pub hardware_cursor: bool,
    #[serde(default)]
    pub exclusive_zone_policy: ExclusiveZonePolicy,
    /// Logical cursor size in pixels.
    #[serde(default = "defaults::default_cursor_size")]
    pub cursor_size: u32,
    /// Request a repaint of software-cursor outputs on every cursor move.
    #[serde(default = "defaults::default_true")]
    pub repaint_on_cursor_move: bool,
}

impl Default for CompositorConfig {
    fn default() -> Self {
        defaults::default_compositor_config()
    }
}

/// Root configuration structure.
///
/// ```
/// use stratum_core::config::{CoreConfig, ExclusiveZonePolicy};
///
/// let toml_str = r#"
/// [logging]
/// level = "warn"
///
/// [compositor]
/// exclusive_zone_policy = "accumulate"
/// "#;
/// let config: CoreConfig = toml::from_str(toml_str).unwrap();
/// assert_eq!(config.logging.level, "warn");
/// assert_eq!(config.compositor.exclusive_zone_policy, ExclusiveZonePolicy::Accumulate);
/// assert!(config.compositor.oversampling);
/// ```
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CoreConfig {
    #[serde(default = "defaults::default_logging_config")]
    pub logging: LoggingConfig,
    #[serde(default = "defaults::default_compositor_config")]
    pub compositor: CompositorConfig,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_compositor_config_defaults() {
        let config = CompositorConfig::default();
        assert_eq!(config.damage_padding, 2);
        assert_eq!(config.max_damage_rects, 64);
        assert!(config.oversampling);
        assert!(config.hardware_cursor);
        assert_eq!(config.exclusive_zone_policy, ExclusiveZonePolicy::HighestPriority);
        assert_eq!(config.cursor_size, 24);
    }

    #[test]
    fn test_empty_document_yields_defaults() {
        let config: CoreConfig = toml::from_str("").unwrap();
        assert_eq!(config, CoreConfig::default());
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        let result: Result<CoreConfig, _> = toml::from_str("[compositor]\nwobbly_windows = true\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_partial_compositor_section() {
        let config: CoreConfig =
            toml::from_str("[compositor]\nhardware_cursor = false\ndamage_padding = 0\n").unwrap();
        assert!(!config.compositor.hardware_cursor);
        assert_eq!(config.compositor.damage_padding, 0);
        assert_eq!(config.compositor.max_damage_rects, 64);
        assert_eq!(config.logging, LoggingConfig::default());
    }
}
