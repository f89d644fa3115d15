//! Configuration error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading a relaynet configuration file.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("Failed to read config {path}: {source}")]
    Read {
        /// Path that was being read.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML or does not match the schema.
    #[error("Failed to parse config {path}: {source}")]
    Parse {
        /// Path that was being parsed.
        path: PathBuf,
        /// Underlying TOML failure.
        #[source]
        source: toml::de::Error,
    },

    /// A field has a value outside its allowed range.
    #[error("Invalid config value for '{field}': {reason}")]
    Invalid {
        /// Dotted field name.
        field: String,
        /// Why it was rejected.
        reason: String,
    },
}

/// Alias for Result with ConfigError.
pub type ConfigResult<T> = Result<T, ConfigError>;
