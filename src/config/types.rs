//! Configuration document
//!
//! The recognized structure, with every default spelled out:
//!
//! ```text
//! Config
//! ├── log.level
//! ├── dns
//! │   ├── server: { addrs, read_timeout_secs, write_timeout_secs, max_tcp_queries }
//! │   ├── client: { addr, dial_timeout_secs, read_timeout_secs, write_timeout_secs }
//! │   ├── observable_nets
//! │   └── observable_families
//! ├── route: { router_id, local_asn, peer_asn, peer_nets, next_hop_v4, next_hop_v6 }
//! └── checker: { direct_dev, vpn_dev, concurrency, queue_size, ... }
//! ```

use std::collections::HashSet;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::PathBuf;
use std::time::Duration;

use ipnet::IpNet;
use serde::{Deserialize, Serialize};

use crate::check::ProbeConfig;
use crate::dns::{
    DnsClientConfig, DnsServerConfig, IpFamily, ListenAddr, ObserveFilter, UpstreamAddr,
};
use crate::error::ConfigError;
use crate::governor::{DomainList, GovernorConfig};
use crate::route::RouteConfig;

/// Root configuration document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Logging options
    #[serde(default)]
    pub log: LogSection,
    /// DNS proxy options
    #[serde(default)]
    pub dns: DnsSection,
    /// Route speaker session options
    #[serde(default)]
    pub route: RouteSection,
    /// Probe and governor options
    #[serde(default)]
    pub checker: CheckerSection,
}

impl Config {
    /// Validate the whole document
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] naming the offending field.
    /// Interface liveness is checked later by the prober, not here.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server_config()?;
        self.client_config()?;
        self.route_config()
            .validate()
            .map_err(|e| ConfigError::Validation(e.to_string()))?;

        if self.checker.direct_dev.is_empty() {
            return Err(ConfigError::Validation(
                "checker.direct_dev must be set".into(),
            ));
        }
        if self.checker.vpn_dev.is_empty() {
            return Err(ConfigError::Validation("checker.vpn_dev must be set".into()));
        }
        if self.checker.concurrency == 0 {
            return Err(ConfigError::Validation(
                "checker.concurrency must be positive".into(),
            ));
        }
        if self.checker.queue_size == 0 {
            return Err(ConfigError::Validation(
                "checker.queue_size must be positive".into(),
            ));
        }

        Ok(())
    }

    /// Parsed DNS server configuration
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] for an unparseable listen URI.
    pub fn server_config(&self) -> Result<DnsServerConfig, ConfigError> {
        let addrs = self
            .dns
            .server
            .addrs
            .iter()
            .map(|uri| ListenAddr::parse(uri))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ConfigError::Validation(e.to_string()))?;

        Ok(DnsServerConfig {
            addrs,
            read_timeout: Duration::from_secs(self.dns.server.read_timeout_secs),
            write_timeout: Duration::from_secs(self.dns.server.write_timeout_secs),
            max_tcp_queries: self.dns.server.max_tcp_queries,
        })
    }

    /// Parsed DNS client configuration
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] for an unparseable upstream URI.
    pub fn client_config(&self) -> Result<DnsClientConfig, ConfigError> {
        let upstream = UpstreamAddr::parse(&self.dns.client.addr)
            .map_err(|e| ConfigError::Validation(e.to_string()))?;

        Ok(DnsClientConfig {
            upstream,
            dial_timeout: Duration::from_secs(self.dns.client.dial_timeout_secs),
            read_timeout: Duration::from_secs(self.dns.client.read_timeout_secs),
            write_timeout: Duration::from_secs(self.dns.client.write_timeout_secs),
        })
    }

    /// Observation filters derived from the DNS section
    #[must_use]
    pub fn observe_filters(&self) -> Vec<ObserveFilter> {
        let mut filters = Vec::new();
        if !self.dns.observable_nets.is_empty() {
            filters.push(ObserveFilter::SourceNets(self.dns.observable_nets.clone()));
        }
        if !self.dns.observable_families.is_empty() {
            let families: HashSet<IpFamily> =
                self.dns.observable_families.iter().copied().collect();
            filters.push(ObserveFilter::Families(families));
        }
        filters
    }

    /// Route speaker session parameters
    #[must_use]
    pub fn route_config(&self) -> RouteConfig {
        RouteConfig {
            router_id: self.route.router_id,
            local_asn: self.route.local_asn,
            peer_asn: self.route.peer_asn,
            peer_nets: self.route.peer_nets.clone(),
            next_hop_v4: self.route.next_hop_v4,
            next_hop_v6: self.route.next_hop_v6,
        }
    }

    /// Probe configuration
    #[must_use]
    pub fn probe_config(&self) -> ProbeConfig {
        ProbeConfig::new(&self.checker.direct_dev, &self.checker.vpn_dev)
            .with_timeout(Duration::from_secs(self.checker.probe_timeout_secs))
            .with_double_check(self.checker.double_check)
    }

    /// Governor configuration, loading the static override lists
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] when an override file exists but cannot
    /// be read. Missing files yield empty lists.
    pub fn governor_config(&self) -> Result<GovernorConfig, ConfigError> {
        let direct_domains = DomainList::load(self.checker.direct_domains.as_deref())?;
        let tunnel_domains = DomainList::load(self.checker.vpn_domains.as_deref())?;

        Ok(GovernorConfig {
            concurrency: self.checker.concurrency,
            queue_size: self.checker.queue_size,
            ip_history_size: self.checker.ip_history_size,
            ip_history_ttl: Duration::from_secs(self.checker.ip_history_ttl_secs),
            decisions_size: self.checker.decisions_size,
            decisions_ttl: Duration::from_secs(self.checker.decisions_ttl_secs),
            vpn_sites_size: self.checker.vpn_sites_size,
            vpn_sites_ttl: Duration::from_secs(self.checker.vpn_sites_ttl_secs),
            recheck_period: Duration::from_secs(self.checker.recheck_period_secs),
            direct_domains,
            tunnel_domains,
        })
    }
}

/// Logging options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogSection {
    /// Log level: trace, debug, info, warn or error
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// DNS proxy options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DnsSection {
    /// Server side options
    #[serde(default)]
    pub server: DnsServerSection,
    /// Client side options
    #[serde(default)]
    pub client: DnsClientSection,
    /// Client networks eligible for observation; empty observes all
    #[serde(default)]
    pub observable_nets: Vec<IpNet>,
    /// Record families eligible for observation; empty observes all
    #[serde(default)]
    pub observable_families: Vec<IpFamily>,
}

/// DNS server options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DnsServerSection {
    /// Listen URIs
    #[serde(default = "default_listen_addrs")]
    pub addrs: Vec<String>,
    /// Read deadline in seconds
    #[serde(default = "default_timeout_secs")]
    pub read_timeout_secs: u64,
    /// Write deadline in seconds, independent of the read deadline
    #[serde(default = "default_timeout_secs")]
    pub write_timeout_secs: u64,
    /// Queries per TCP connection, 0 for unbounded
    #[serde(default)]
    pub max_tcp_queries: u32,
}

fn default_listen_addrs() -> Vec<String> {
    vec!["udp://:53".to_string(), "tcp://:53".to_string()]
}

fn default_timeout_secs() -> u64 {
    2
}

impl Default for DnsServerSection {
    fn default() -> Self {
        Self {
            addrs: default_listen_addrs(),
            read_timeout_secs: default_timeout_secs(),
            write_timeout_secs: default_timeout_secs(),
            max_tcp_queries: 0,
        }
    }
}

/// DNS client options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DnsClientSection {
    /// Upstream URI
    #[serde(default = "default_upstream")]
    pub addr: String,
    /// Connect deadline in seconds
    #[serde(default = "default_timeout_secs")]
    pub dial_timeout_secs: u64,
    /// Read deadline in seconds
    #[serde(default = "default_timeout_secs")]
    pub read_timeout_secs: u64,
    /// Write deadline in seconds
    #[serde(default = "default_timeout_secs")]
    pub write_timeout_secs: u64,
}

fn default_upstream() -> String {
    crate::dns::DEFAULT_UPSTREAM.to_string()
}

impl Default for DnsClientSection {
    fn default() -> Self {
        Self {
            addr: default_upstream(),
            dial_timeout_secs: default_timeout_secs(),
            read_timeout_secs: default_timeout_secs(),
            write_timeout_secs: default_timeout_secs(),
        }
    }
}

/// Route speaker session options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouteSection {
    /// Router identifier presented to peers
    #[serde(default = "default_router_id")]
    pub router_id: Ipv4Addr,
    /// Local autonomous system number
    #[serde(default = "default_local_asn")]
    pub local_asn: u32,
    /// Peer autonomous system number
    #[serde(default = "default_peer_asn")]
    pub peer_asn: u32,
    /// Networks dynamic peers may connect from
    #[serde(default = "default_peer_nets")]
    pub peer_nets: Vec<IpNet>,
    /// Next hop for announced IPv4 prefixes
    #[serde(default)]
    pub next_hop_v4: Option<Ipv4Addr>,
    /// Next hop for announced IPv6 prefixes
    #[serde(default)]
    pub next_hop_v6: Option<Ipv6Addr>,
}

fn default_router_id() -> Ipv4Addr {
    Ipv4Addr::new(1, 3, 3, 7)
}

fn default_local_asn() -> u32 {
    65543
}

fn default_peer_asn() -> u32 {
    65542
}

fn default_peer_nets() -> Vec<IpNet> {
    vec![
        "0.0.0.0/0".parse().expect("valid default peer net"),
        "::/0".parse().expect("valid default peer net"),
    ]
}

impl Default for RouteSection {
    fn default() -> Self {
        Self {
            router_id: default_router_id(),
            local_asn: default_local_asn(),
            peer_asn: default_peer_asn(),
            peer_nets: default_peer_nets(),
            next_hop_v4: None,
            next_hop_v6: None,
        }
    }
}

/// Probe and governor options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CheckerSection {
    /// Interface carrying direct traffic
    #[serde(default)]
    pub direct_dev: String,
    /// Interface carrying tunneled traffic
    #[serde(default)]
    pub vpn_dev: String,
    /// Probe workers
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Probe backlog
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
    /// Per-leg probe deadline in seconds
    #[serde(default = "default_timeout_secs")]
    pub probe_timeout_secs: u64,
    /// Confirm positive verdicts with a second probe
    #[serde(default = "default_double_check")]
    pub double_check: bool,
    /// Bound of the observed-answer history
    #[serde(default = "default_ip_history_size")]
    pub ip_history_size: u64,
    /// TTL of observed answers in seconds
    #[serde(default = "default_ip_history_ttl_secs")]
    pub ip_history_ttl_secs: u64,
    /// Bound of the decisions cache
    #[serde(default = "default_decisions_size")]
    pub decisions_size: u64,
    /// TTL of cached decisions in seconds
    #[serde(default = "default_decisions_ttl_secs")]
    pub decisions_ttl_secs: u64,
    /// Bound of the blocked-sites registry
    #[serde(default = "default_vpn_sites_size")]
    pub vpn_sites_size: u64,
    /// TTL of blocked-site entries in seconds
    #[serde(default = "default_vpn_sites_ttl_secs")]
    pub vpn_sites_ttl_secs: u64,
    /// Offline re-verify interval in seconds
    #[serde(default = "default_recheck_period_secs")]
    pub recheck_period_secs: u64,
    /// Optional file of names forced onto the direct uplink
    #[serde(default)]
    pub direct_domains: Option<PathBuf>,
    /// Optional file of names forced through the tunnel
    #[serde(default)]
    pub vpn_domains: Option<PathBuf>,
}

fn default_concurrency() -> usize {
    32
}

fn default_queue_size() -> usize {
    1024
}

fn default_double_check() -> bool {
    true
}

fn default_ip_history_size() -> u64 {
    32_384
}

fn default_ip_history_ttl_secs() -> u64 {
    600
}

fn default_decisions_size() -> u64 {
    129_536
}

fn default_decisions_ttl_secs() -> u64 {
    1800
}

fn default_vpn_sites_size() -> u64 {
    32_384
}

fn default_vpn_sites_ttl_secs() -> u64 {
    7 * 24 * 3600
}

fn default_recheck_period_secs() -> u64 {
    1800
}

impl Default for CheckerSection {
    fn default() -> Self {
        Self {
            direct_dev: String::new(),
            vpn_dev: String::new(),
            concurrency: default_concurrency(),
            queue_size: default_queue_size(),
            probe_timeout_secs: default_timeout_secs(),
            double_check: default_double_check(),
            ip_history_size: default_ip_history_size(),
            ip_history_ttl_secs: default_ip_history_ttl_secs(),
            decisions_size: default_decisions_size(),
            decisions_ttl_secs: default_decisions_ttl_secs(),
            vpn_sites_size: default_vpn_sites_size(),
            vpn_sites_ttl_secs: default_vpn_sites_ttl_secs(),
            recheck_period_secs: default_recheck_period_secs(),
            direct_domains: None,
            vpn_domains: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_complete() {
        let cfg = Config::default();
        assert_eq!(cfg.dns.server.addrs, vec!["udp://:53", "tcp://:53"]);
        assert_eq!(cfg.dns.client.addr, "tcp://1.1.1.1:53");
        assert_eq!(cfg.checker.concurrency, 32);
        assert_eq!(cfg.checker.queue_size, 1024);
        assert_eq!(cfg.checker.ip_history_size, 32_384);
        assert_eq!(cfg.checker.ip_history_ttl_secs, 600);
        assert_eq!(cfg.checker.decisions_size, 129_536);
        assert_eq!(cfg.checker.decisions_ttl_secs, 1800);
        assert_eq!(cfg.checker.vpn_sites_ttl_secs, 604_800);
        assert_eq!(cfg.checker.recheck_period_secs, 1800);
        assert!(cfg.checker.double_check);
    }

    #[test]
    fn missing_devices_fail_validation() {
        let cfg = Config::default();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("direct_dev"));
    }

    #[test]
    fn minimal_document_with_devices_validates() {
        let cfg: Config = serde_json::from_str(
            r#"{ "checker": { "direct_dev": "eth0", "vpn_dev": "tun0" } }"#,
        )
        .unwrap();
        cfg.validate().unwrap();
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let result = serde_json::from_str::<Config>(r#"{ "dsn": {} }"#);
        assert!(result.is_err());
    }

    #[test]
    fn bad_listen_uri_fails_validation() {
        let cfg: Config = serde_json::from_str(
            r#"{
                "dns": { "server": { "addrs": ["icmp://:53"] } },
                "checker": { "direct_dev": "eth0", "vpn_dev": "tun0" }
            }"#,
        )
        .unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn filters_follow_configured_sections() {
        let cfg: Config = serde_json::from_str(
            r#"{
                "dns": {
                    "observable_nets": ["192.168.0.0/16"],
                    "observable_families": ["ipv4"]
                }
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.observe_filters().len(), 2);
        assert!(Config::default().observe_filters().is_empty());
    }

    #[test]
    fn read_and_write_timeouts_stay_independent() {
        let cfg: Config = serde_json::from_str(
            r#"{ "dns": { "server": { "write_timeout_secs": 9 } } }"#,
        )
        .unwrap();
        let server = cfg.server_config().unwrap();
        assert_eq!(server.read_timeout, Duration::from_secs(2));
        assert_eq!(server.write_timeout, Duration::from_secs(9));
    }
}
