//! Configuration error types

use std::io;
use thiserror::Error;

/// Result type for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors that can occur when loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file
    #[error("failed to read config file '{path}': {source}")]
    IoError {
        /// Path to the file
        path: String,
        /// Underlying IO error
        #[source]
        source: io::Error,
    },

    /// Failed to parse TOML
    #[error("failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Required field missing
    #[error("[{section}] is missing required field '{field}'")]
    MissingField {
        /// Config section name
        section: &'static str,
        /// Missing field name
        field: &'static str,
    },

    /// A URL field failed to parse
    #[error("invalid {field} '{url}': {message}")]
    InvalidUrl {
        /// Field name
        field: &'static str,
        /// The offending value
        url: String,
        /// Parser message
        message: String,
    },
}
