//! Core types shared by the DNS observation plane
//!
//! The proxy forwards client queries verbatim and, on the side, lifts every
//! qualifying answer into a [`ResolvedRecord`] that is handed to an
//! [`ObservationSink`]. Observation filters gate which answers are lifted.

use std::collections::HashSet;
use std::fmt;
use std::net::IpAddr;

use async_trait::async_trait;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};

/// Address family of an observed answer record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpFamily {
    /// IPv4 (A records)
    #[serde(rename = "ipv4")]
    V4,
    /// IPv6 (AAAA records)
    #[serde(rename = "ipv6")]
    V6,
}

impl IpFamily {
    /// Family of a concrete address
    #[must_use]
    pub fn of(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => Self::V4,
            IpAddr::V6(_) => Self::V6,
        }
    }

    /// Check that an address belongs to this family
    #[must_use]
    pub fn matches(self, ip: IpAddr) -> bool {
        Self::of(ip) == self
    }
}

impl fmt::Display for IpFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V4 => write!(f, "ipv4"),
            Self::V6 => write!(f, "ipv6"),
        }
    }
}

/// One observed answer record
///
/// Produced by the proxy for every A/AAAA answer of a standard query that
/// passes the configured filters. The FQDN is the name of the query's first
/// A/AAAA question, not the answer's owner name, so CNAME chains surface
/// under the name the client asked for. Downstream classification relies on
/// this.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRecord {
    /// Queried name, trailing dot preserved
    pub fqdn: String,
    /// Address family of `ip`
    pub family: IpFamily,
    /// Resolved address
    pub ip: IpAddr,
    /// Answer TTL in seconds, floored at emission
    pub ttl_secs: u32,
}

impl ResolvedRecord {
    /// Create a record, deriving the family from the address
    #[must_use]
    pub fn new(fqdn: impl Into<String>, ip: IpAddr, ttl_secs: u32) -> Self {
        Self {
            fqdn: fqdn.into(),
            family: IpFamily::of(ip),
            ip,
            ttl_secs,
        }
    }
}

/// Receiver of observed answer records
///
/// Implemented by the site governor. Invoked inline on the query path, so a
/// slow sink delays the client's response rather than dropping observations.
#[async_trait]
pub trait ObservationSink: Send + Sync {
    /// Called once per qualifying answer record
    async fn on_resolved(&self, record: ResolvedRecord);
}

/// Gate deciding whether an answer is observed
///
/// All configured filters must allow a record for it to reach the sink.
#[derive(Debug, Clone)]
pub enum ObserveFilter {
    /// Client source address must fall inside one of the networks
    SourceNets(Vec<IpNet>),
    /// Record family must be in the permitted set
    Families(HashSet<IpFamily>),
}

impl ObserveFilter {
    /// Evaluate the filter for a record and the client that triggered it
    #[must_use]
    pub fn allows(&self, record: &ResolvedRecord, client: IpAddr) -> bool {
        match self {
            Self::SourceNets(nets) => nets.iter().any(|net| net.contains(&client)),
            Self::Families(kinds) => kinds.contains(&record.family),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn family_of_address() {
        assert_eq!(IpFamily::of(IpAddr::V4(Ipv4Addr::LOCALHOST)), IpFamily::V4);
        assert_eq!(IpFamily::of(IpAddr::V6(Ipv6Addr::LOCALHOST)), IpFamily::V6);
        assert!(IpFamily::V4.matches(IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4))));
        assert!(!IpFamily::V6.matches(IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4))));
    }

    #[test]
    fn family_serde_round_trip() {
        assert_eq!(serde_json::to_string(&IpFamily::V4).unwrap(), "\"ipv4\"");
        assert_eq!(
            serde_json::from_str::<IpFamily>("\"ipv6\"").unwrap(),
            IpFamily::V6
        );
    }

    #[test]
    fn record_derives_family() {
        let rr = ResolvedRecord::new("example.com.", IpAddr::V6(Ipv6Addr::LOCALHOST), 90);
        assert_eq!(rr.family, IpFamily::V6);
    }

    #[test]
    fn source_nets_filter() {
        let filter = ObserveFilter::SourceNets(vec!["192.168.0.0/16".parse().unwrap()]);
        let rr = ResolvedRecord::new("example.com.", "1.2.3.4".parse().unwrap(), 90);

        assert!(filter.allows(&rr, "192.168.1.10".parse().unwrap()));
        assert!(!filter.allows(&rr, "10.0.0.1".parse().unwrap()));
    }

    #[test]
    fn families_filter() {
        let filter = ObserveFilter::Families([IpFamily::V4].into_iter().collect());
        let v4 = ResolvedRecord::new("example.com.", "1.2.3.4".parse().unwrap(), 90);
        let v6 = ResolvedRecord::new("example.com.", "2001:db8::1".parse().unwrap(), 90);
        let client: IpAddr = "192.168.1.10".parse().unwrap();

        assert!(filter.allows(&v4, client));
        assert!(!filter.allows(&v6, client));
    }
}
