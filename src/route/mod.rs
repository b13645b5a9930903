//! Routing control plane
//!
//! The governor steers traffic by announcing and withdrawing single-host
//! prefixes through a [`RouteSpeaker`]. Both operations are idempotent:
//! announcing a present route and withdrawing an absent one are no-ops, so
//! concurrent observations of the same address need no coordination.
//!
//! The dynamic-routing protocol session that exports these prefixes to the
//! router is an external collaborator. [`RibSpeaker`] implements the local
//! routing information base such a session advertises, carrying the
//! session parameters (router id, ASNs, next hops) from configuration.

pub mod rib;

use std::net::IpAddr;

use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use thiserror::Error;

use crate::dns::IpFamily;

pub use rib::{RibSpeaker, RouteConfig};

/// Error types for route operations
#[derive(Debug, Error)]
pub enum RouteError {
    /// The address does not belong to the stated family
    #[error("address {ip} is not {family}")]
    FamilyMismatch {
        /// The offending address
        ip: IpAddr,
        /// The family the caller claimed
        family: IpFamily,
    },

    /// Invalid speaker configuration
    #[error("invalid route configuration: {reason}")]
    Config {
        /// Description of the configuration error
        reason: String,
    },
}

impl RouteError {
    /// Create a configuration error
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }
}

/// Type alias for Result with [`RouteError`]
pub type RouteResult<T> = std::result::Result<T, RouteError>;

/// Single-host prefix for an address, family-checked
///
/// # Errors
///
/// Returns [`RouteError::FamilyMismatch`] when the address and the claimed
/// family disagree. Announce and withdraw must agree on the family, so the
/// check runs on both paths.
pub fn host_prefix(ip: IpAddr, family: IpFamily) -> RouteResult<IpNet> {
    match (ip, family) {
        (IpAddr::V4(v4), IpFamily::V4) => Ok(IpNet::V4(
            Ipv4Net::new(v4, 32).expect("/32 is a valid IPv4 prefix length"),
        )),
        (IpAddr::V6(v6), IpFamily::V6) => Ok(IpNet::V6(
            Ipv6Net::new(v6, 128).expect("/128 is a valid IPv6 prefix length"),
        )),
        _ => Err(RouteError::FamilyMismatch { ip, family }),
    }
}

/// Route announcement surface used by the governor
///
/// Implementations must be idempotent and internally serialized; callers
/// invoke them from cache eviction hooks and probe workers concurrently.
pub trait RouteSpeaker: Send + Sync {
    /// Announce a single-host route; a present route is a no-op
    ///
    /// # Errors
    ///
    /// Family mismatches and speaker-side failures. Callers log and
    /// continue; the next observation re-attempts.
    fn upsert_route(&self, ip: IpAddr, family: IpFamily) -> RouteResult<()>;

    /// Withdraw a single-host route; an absent route is a no-op
    ///
    /// # Errors
    ///
    /// Family mismatches and speaker-side failures.
    fn withdraw_route(&self, ip: IpAddr, family: IpFamily) -> RouteResult<()>;
}
