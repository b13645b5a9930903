//! Top-level error types

use std::io;

use thiserror::Error;

/// Top-level error type
#[derive(Debug, Error)]
pub enum ClearwayError {
    /// Configuration errors (file loading, validation)
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// DNS proxy errors
    #[error("DNS error: {0}")]
    Dns(#[from] crate::dns::DnsError),

    /// Blocking probe errors
    #[error("probe error: {0}")]
    Check(#[from] crate::check::CheckError),

    /// Routing control errors
    #[error("route error: {0}")]
    Route(#[from] crate::route::RouteError),

    /// Governor lifecycle errors
    #[error("governor error: {0}")]
    Governor(#[from] crate::governor::GovernorError),

    /// I/O errors not covered by other categories
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File not found or inaccessible
    #[error("configuration file not found: {path}")]
    FileNotFound {
        /// The path that was tried
        path: String,
    },

    /// JSON parsing error
    #[error("failed to parse configuration: {0}")]
    Parse(String),

    /// Validation error (invalid values, missing required fields)
    #[error("configuration validation failed: {0}")]
    Validation(String),

    /// I/O error while reading configuration or override files
    #[error("I/O error reading configuration: {0}")]
    Io(#[from] io::Error),
}

/// Type alias for Result with [`ClearwayError`]
pub type Result<T> = std::result::Result<T, ClearwayError>;
