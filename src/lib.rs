//! clearway: DNS-observing censorship-circumvention router
//!
//! clearway sits on the DNS path of a home or small-office router. It
//! forwards every client query verbatim to one upstream resolver and
//! watches the answers go by. Each resolved address is classified per
//! site: addresses that an active two-interface probe finds censored on
//! the direct uplink are announced as single-host routes so the router
//! steers their traffic into the tunnel; everything else stays direct.
//!
//! # Architecture
//!
//! ```text
//! LAN client ──► DNS proxy ──► upstream resolver
//!                   │ A/AAAA answers
//!                   ▼
//!             Site governor ──► probe queue ──► blocking probe
//!                   │                            (direct + tunnel HEAD)
//!                   ▼
//!             Route speaker ──► /32 and /128 routes ──► router
//! ```
//!
//! The data plane is never harmed by the control plane: probe failures
//! and route errors are logged and absorbed while name resolution keeps
//! flowing.
//!
//! # Modules
//!
//! - [`config`]: configuration document and loading
//! - [`dns`]: observation DNS proxy (UDP/TCP service, upstream exchange)
//! - [`check`]: two-interface differential blocking probe
//! - [`governor`]: decision and routing controller
//! - [`route`]: route speaker interface and local RIB
//! - [`error`]: error types

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]

pub mod check;
pub mod config;
pub mod dns;
pub mod error;
pub mod governor;
pub mod route;

// Re-export commonly used types at the crate root
pub use check::{HttpProber, ProbeConfig, ProbeResolver, Prober};
pub use config::{load_config, load_config_str, load_config_with_env, Config};
pub use dns::{
    DnsProxy, IpFamily, ListenAddr, ObservationSink, ObserveFilter, ResolvedRecord, UpstreamAddr,
    UpstreamExchanger,
};
pub use error::{ClearwayError, ConfigError};
pub use governor::{Decision, DomainList, GovernorConfig, SiteGovernor};
pub use route::{host_prefix, RibSpeaker, RouteConfig, RouteSpeaker};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
