//! # Stratum Core Library (`stratum-core`)
//!
//! `stratum-core` is the infrastructure layer shared by the Stratum compositor crates.
//! It provides:
//!
//! - **Error Handling**: [`CoreError`] and the specific [`ConfigError`] and [`LoggingError`].
//! - **Configuration Management**: TOML-based loading with defaults and validation through
//!   [`ConfigLoader`], producing a [`CoreConfig`] that carries both the logging settings
//!   and the [`CompositorConfig`] consumed by `stratum-compositor-core`.
//! - **Logging**: a `tracing` based setup with console and optional rolling file output.
//!
//! ```rust,ignore
//! use stratum_core::config::ConfigLoader;
//! use stratum_core::logging::init_logging;
//! use stratum_core::error::CoreError;
//!
//! fn main() -> Result<(), CoreError> {
//!     let config = ConfigLoader::load()?;
//!     init_logging(&config.logging, false)?;
//!     tracing::info!("Stratum core initialized.");
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod config;
pub mod logging;
pub mod paths;

pub use error::{CoreError, ConfigError, LoggingError};
pub use config::{
    CoreConfig, LoggingConfig, CompositorConfig, ExclusiveZonePolicy, ConfigLoader,
};
pub use logging::{init_logging, init_minimal_logging};
