//! Default configuration values.
//!
//! These functions back the `#[serde(default = ...)]` attributes in [`super::types`].

use super::types::{CompositorConfig, ExclusiveZonePolicy, LoggingConfig};
use std::path::PathBuf;

pub(super) fn default_logging_config() -> LoggingConfig {
    LoggingConfig {
        level: default_log_level(),
        file_path: default_log_file_path(),
        format: default_log_format(),
    }
}

/// `"info"`
pub(super) fn default_log_level() -> String {
    "info".to_string()
}

/// No log file by default.
pub(super) fn default_log_file_path() -> Option<PathBuf> {
    None
}

/// `"text"`
pub(super) fn default_log_format() -> String {
    "text".to_string()
}

pub(super) fn default_compositor_config() -> CompositorConfig {
    CompositorConfig {
        damage_padding: default_damage_padding(),
        max_damage_rects: default_max_damage_rects(),
        oversampling: default_true(),
        hardware_cursor: default_true(),
        exclusive_zone_policy: ExclusiveZonePolicy::default(),
        cursor_size: default_cursor_size(),
        repaint_on_cursor_move: default_true(),
    }
}

/// Pixels added around each damaged rectangle to absorb filtering artifacts.
pub(super) fn default_damage_padding() -> i32 {
    2
}

pub(super) fn default_max_damage_rects() -> usize {
    64
}

pub(super) fn default_cursor_size() -> u32 {
    24
}

pub(super) fn default_true() -> bool {
    true
}
