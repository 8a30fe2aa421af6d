//! Railsweep Core - Foundation crate for the railsweep viewport sweeper.
//!
//! This crate provides the geographic and credential types, error handling and
//! configuration management that every other railsweep crate depends on.
//!
//! # Modules
//!
//! - [`error`] - Central error types using thiserror
//! - [`config`] - TOML-based configuration with XDG paths and env overrides
//! - [`types`] - Shared value types (`BoundingBox`, `Tile`, `Credential`, `DelayRange`, `Timestamp`)
//!
//! # Example
//!
//! ```rust
//! use railsweep_core::{AppConfig, BoundingBox};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::default();
//! config.validate()?;
//!
//! let bbox = BoundingBox::new(110.0, -10.0, 155.0, -45.0)?;
//! assert!(bbox.width() > 0.0);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use config::{
    AppConfig, AuthConfig, BrowserConfig, EmptyPayloadPolicy, LoginStrategy, OutputConfig,
    RemoteConfig, SweepConfig, SweepMode,
};
pub use error::{ConfigError, ConfigResult, RailsweepError, Result};
pub use types::{BoundingBox, Credential, DelayRange, Tile, Timestamp};
