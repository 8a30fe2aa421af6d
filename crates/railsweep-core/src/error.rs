//! Error types shared by the railsweep crates.

use thiserror::Error;

/// Invalid values rejected by the core types.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RailsweepError {
    /// Bounding box edges are not finite or not ordered
    #[error("invalid bounding box: {0}")]
    InvalidBoundingBox(String),

    /// Cookie name or value unusable in a `Cookie` header
    #[error("invalid credential: {0}")]
    InvalidCredential(String),

    /// Delay range with min above max
    #[error("invalid delay range: {0}")]
    InvalidDelay(String),

    /// Millisecond value chrono cannot represent
    #[error("timestamp out of range: {0} ms")]
    TimestampOutOfRange(i64),
}

/// Errors loading, saving or validating the configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// No platform config directory
    #[error("could not determine config directory (XDG base directories not available)")]
    NoConfigDir,

    /// Explicit config path does not exist
    #[error("config file not found at {path}")]
    NotFound {
        /// Path that was given
        path: String,
    },

    /// Malformed TOML
    #[error("failed to parse config TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Config could not be written back as TOML
    #[error("failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// Reading or writing the config file failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A field failed validation, named by its dotted TOML path
    #[error("invalid config value for {field}: {reason}")]
    InvalidValue {
        /// Dotted field path, e.g. `sweep.tile_size_deg`
        field: String,
        /// What is wrong with it
        reason: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result alias for the core value types.
pub type Result<T> = std::result::Result<T, RailsweepError>;

/// Result alias for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err =
            RailsweepError::InvalidBoundingBox("west (150) must be less than east (110)".into());
        assert_eq!(
            err.to_string(),
            "invalid bounding box: west (150) must be less than east (110)"
        );
        assert_eq!(
            RailsweepError::TimestampOutOfRange(i64::MAX).to_string(),
            format!("timestamp out of range: {} ms", i64::MAX)
        );
    }

    #[test]
    fn test_invalid_value_display() {
        let err = ConfigError::invalid("sweep.tile_size_deg", "must be positive");
        assert_eq!(
            err.to_string(),
            "invalid config value for sweep.tile_size_deg: must be positive"
        );
    }
}
