//! Configuration Management for Stratum.
//!
//! - [`types`]: the schema ([`CoreConfig`], [`LoggingConfig`], [`CompositorConfig`]).
//! - [`defaults`]: default values used by `serde` for missing fields.
//! - [`loader`]: [`ConfigLoader`], which locates, parses and validates `config.toml`.
//!
//! A missing configuration file is not an error: the defaults are used instead.
//! Parsing errors map to [`crate::error::ConfigError::ParseError`] and invalid values to
//! [`crate::error::ConfigError::ValidationError`].

pub mod defaults;
pub mod types;
pub mod loader;

pub use types::{CoreConfig, LoggingConfig, CompositorConfig, ExclusiveZonePolicy};
pub use loader::ConfigLoader;
