//! Configuration error types

use std::path::PathBuf;
use thiserror::Error;

/// Configuration result type
pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", .path.display())]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    /// An environment override is present but unusable
    #[error("Invalid value for {var}: {message}")]
    EnvError { var: String, message: String },

    /// A domain's values are individually or jointly out of range
    #[error("Invalid {domain} configuration: {message}")]
    DomainError { domain: String, message: String },
}
