//! Site governor
//!
//! The decision and routing controller. It couples three bounded TTL-LRU
//! caches:
//!
//! - the observed-answer history, whose eviction withdraws the record's
//!   route
//! - the per-FQDN decisions cache
//! - the blocked-sites registry, whose retirement withdraws all of a
//!   site's routes
//!
//! and runs a bounded pool of probe workers plus a periodic re-verifier.

pub mod governor;
pub mod history;
mod reverify;
pub mod site;
pub mod vpn_sites;

pub use governor::{Decision, GovernorConfig, GovernorError, SiteGovernor};
pub use history::{EvictionObserver, HistoryKey, IpHistory};
pub use site::{site_from_fqdn, DomainList};
pub use vpn_sites::{RetirementObserver, VpnSiteEntry, VpnSites};
