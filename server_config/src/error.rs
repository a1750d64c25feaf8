//! Error types for the server_config crate.

use thiserror::Error;

/// Result type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors that can occur while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// I/O error when reading the configuration file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error parsing the YAML configuration.
    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    /// Configuration file not found.
    #[error("Configuration not found: {0}")]
    NotFound(String),

    /// Configuration validation failed.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Configuration path error.
    #[error("Path error: {0}")]
    PathError(String),

    /// Malformed scope specification.
    #[error("Invalid scope: {0}")]
    InvalidScope(String),
}

impl ConfigError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

impl From<ConfigError> for ops_shared_types::OpsError {
    fn from(err: ConfigError) -> Self {
        ops_shared_types::OpsError::Config(err.to_string())
    }
}
