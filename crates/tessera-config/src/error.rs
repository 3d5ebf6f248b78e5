//! Configuration error types.

use thiserror::Error;

/// Errors raised while loading or interpreting framework properties.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A properties file could not be read.
    #[error("failed to read {path}: {source}")]
    ReadError {
        /// The file path.
        path: String,
        /// The underlying error.
        source: std::io::Error,
    },

    /// A properties file is not valid TOML.
    #[error("failed to parse {path}: {source}")]
    ParseError {
        /// The file path, or `<embedded defaults>`.
        path: String,
        /// The underlying error.
        source: toml::de::Error,
    },

    /// A property value is unusable and has no safe fallback.
    #[error("invalid value for {field}: {message}")]
    ValidationError {
        /// The property key.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// A `${key}` reference refers back to itself.
    #[error("cyclic reference to '{0}' in property value")]
    CyclicReference(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
