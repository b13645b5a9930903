//! Error types for the DNS observation proxy

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Error types for proxy operations
///
/// Data-plane failures are absorbed by the server loops: a failed upstream
/// exchange closes the client connection so the client retries, and nothing
/// here ever surfaces to the resolution path as a synthesized answer.
#[derive(Debug, Error)]
pub enum DnsError {
    /// A listen or upstream URI could not be parsed
    #[error("invalid DNS address {uri:?}: {reason}")]
    Addr {
        /// The offending URI
        uri: String,
        /// What was wrong with it
        reason: String,
    },

    /// Network I/O failure
    #[error("network error: {reason}")]
    Network {
        /// Description of the failure
        reason: String,
        /// Underlying I/O error, if available
        #[source]
        source: Option<io::Error>,
    },

    /// Upstream exchange failure
    #[error("upstream {upstream} failed: {reason}")]
    Upstream {
        /// Upstream server address
        upstream: String,
        /// Description of the failure
        reason: String,
    },

    /// Exchange deadline exceeded
    #[error("DNS exchange timed out after {timeout:?}: {context}")]
    Timeout {
        /// What timed out
        context: String,
        /// The deadline that was exceeded
        timeout: Duration,
    },

    /// Invalid proxy configuration
    #[error("invalid DNS configuration: {reason}")]
    Config {
        /// Description of the configuration error
        reason: String,
    },
}

impl DnsError {
    /// Create an address error
    pub fn addr(uri: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Addr {
            uri: uri.into(),
            reason: reason.into(),
        }
    }

    /// Create a network error without an I/O source
    pub fn network(reason: impl Into<String>) -> Self {
        Self::Network {
            reason: reason.into(),
            source: None,
        }
    }

    /// Create a network error from an I/O error
    pub fn network_io(reason: impl Into<String>, source: io::Error) -> Self {
        Self::Network {
            reason: reason.into(),
            source: Some(source),
        }
    }

    /// Create an upstream error
    pub fn upstream(upstream: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Upstream {
            upstream: upstream.into(),
            reason: reason.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(context: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            context: context.into(),
            timeout,
        }
    }

    /// Create a configuration error
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }
}

impl From<io::Error> for DnsError {
    fn from(err: io::Error) -> Self {
        Self::Network {
            reason: err.to_string(),
            source: Some(err),
        }
    }
}

/// Type alias for Result with [`DnsError`]
pub type DnsResult<T> = std::result::Result<T, DnsError>;
