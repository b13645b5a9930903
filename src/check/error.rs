//! Error types for the blocking probe

use std::time::Duration;

use thiserror::Error;

/// Error types for probe operations
#[derive(Debug, Error)]
pub enum CheckError {
    /// A probe interface is missing or down
    #[error("interface {device:?}: {reason}")]
    Device {
        /// Interface name
        device: String,
        /// What is wrong with it
        reason: String,
    },

    /// No mapping registered for a synthetic authority
    ///
    /// Indicates a probe dialed an authority that was never registered or
    /// was already released. This is an internal invariant violation.
    #[error("unable to resolve probe authority {authority:?}")]
    Resolve {
        /// The synthetic authority that failed to resolve
        authority: String,
    },

    /// Connect failure on one leg
    #[error("dial {target} via {device:?} failed: {reason}")]
    Dial {
        /// Interface used
        device: String,
        /// Target address
        target: std::net::SocketAddr,
        /// Description of the failure
        reason: String,
    },

    /// TLS failure on one leg
    #[error("TLS to {host:?} failed: {reason}")]
    Tls {
        /// Server name presented
        host: String,
        /// Description of the failure
        reason: String,
    },

    /// HTTP failure on one leg
    #[error("HTTP request failed: {reason}")]
    Http {
        /// Description of the failure
        reason: String,
    },

    /// Per-leg deadline exceeded
    #[error("probe leg timed out after {timeout:?}")]
    Timeout {
        /// The deadline that was exceeded
        timeout: Duration,
    },

    /// Both probe legs failed with transport errors
    ///
    /// The verdict is indeterminate. The caller must not classify the site
    /// from this probe.
    #[error("probe of {fqdn:?} failed on both interfaces: direct: {direct}; tunnel: {tunnel}")]
    BothLegsFailed {
        /// The probed name
        fqdn: String,
        /// Direct leg failure
        direct: String,
        /// Tunnel leg failure
        tunnel: String,
    },
}

impl CheckError {
    /// Create a device error
    pub fn device(device: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Device {
            device: device.into(),
            reason: reason.into(),
        }
    }

    /// Create an HTTP error
    pub fn http(reason: impl Into<String>) -> Self {
        Self::Http {
            reason: reason.into(),
        }
    }

    /// Whether this error means the verdict is indeterminate
    #[must_use]
    pub fn is_indeterminate(&self) -> bool {
        matches!(self, Self::BothLegsFailed { .. })
    }
}

/// Type alias for Result with [`CheckError`]
pub type CheckResult<T> = std::result::Result<T, CheckError>;
