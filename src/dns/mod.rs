//! Observation DNS proxy
//!
//! The DNS plane of the router. It relays client queries verbatim to one
//! configured upstream (UDP, TCP or TLS) and, in parallel, lifts every
//! A/AAAA answer of a standard query into an observation record for the
//! site governor.
//!
//! ```text
//! LAN client ──► DnsProxy ──► upstream resolver
//!                   │
//!                   └──► ResolvedRecord ──► governor
//! ```
//!
//! The proxy is transparent to EDNS, DNSSEC and unusual opcodes; anything
//! it cannot parse is still forwarded, just never observed.

pub mod client;
pub mod config;
pub mod error;
pub mod observe;
pub mod server;
pub mod types;

pub use client::UpstreamExchanger;
pub use config::{
    DnsClientConfig, DnsServerConfig, ListenAddr, ListenTransport, UpstreamAddr, UpstreamScheme,
    DEFAULT_TIMEOUT, DEFAULT_UPSTREAM,
};
pub use error::{DnsError, DnsResult};
pub use observe::{extract_observations, MIN_OBSERVED_TTL};
pub use server::{DnsProxy, ProxyStats};
pub use types::{IpFamily, ObservationSink, ObserveFilter, ResolvedRecord};
