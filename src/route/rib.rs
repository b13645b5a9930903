//! Local routing information base
//!
//! Holds the set of announced single-host prefixes together with the
//! session parameters a routing-protocol speaker needs to export them.
//! The set is the source of truth for idempotence: an upsert of a present
//! prefix and a withdraw of an absent one return without effect.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnet::IpNet;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{host_prefix, RouteError, RouteResult, RouteSpeaker};
use crate::dns::IpFamily;

/// Session parameters of the exporting protocol speaker
#[derive(Debug, Clone)]
pub struct RouteConfig {
    /// Router identifier presented to peers
    pub router_id: Ipv4Addr,
    /// Local autonomous system number
    pub local_asn: u32,
    /// Peer autonomous system number
    pub peer_asn: u32,
    /// Networks dynamic peers may connect from
    pub peer_nets: Vec<IpNet>,
    /// Next hop attached to announced IPv4 prefixes
    pub next_hop_v4: Option<Ipv4Addr>,
    /// Next hop attached to announced IPv6 prefixes
    pub next_hop_v6: Option<Ipv6Addr>,
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            router_id: Ipv4Addr::new(1, 3, 3, 7),
            local_asn: 65543,
            peer_asn: 65542,
            peer_nets: vec![
                "0.0.0.0/0".parse().expect("valid default peer net"),
                "::/0".parse().expect("valid default peer net"),
            ],
            next_hop_v4: None,
            next_hop_v6: None,
        }
    }
}

impl RouteConfig {
    /// Validate session parameters
    ///
    /// # Errors
    ///
    /// Returns [`RouteError::Config`] when an ASN is zero.
    pub fn validate(&self) -> RouteResult<()> {
        if self.local_asn == 0 {
            return Err(RouteError::config("local ASN must be set"));
        }
        if self.peer_asn == 0 {
            return Err(RouteError::config("peer ASN must be set"));
        }
        Ok(())
    }
}

/// The RIB a routing-protocol session exports
pub struct RibSpeaker {
    cfg: RouteConfig,
    announced: RwLock<HashSet<IpNet>>,
}

impl RibSpeaker {
    /// Create an empty RIB with the given session parameters
    #[must_use]
    pub fn new(cfg: RouteConfig) -> Self {
        Self {
            cfg,
            announced: RwLock::new(HashSet::new()),
        }
    }

    /// Snapshot of all announced prefixes
    #[must_use]
    pub fn routes(&self) -> Vec<IpNet> {
        self.announced.read().iter().copied().collect()
    }

    /// Whether a prefix is currently announced
    #[must_use]
    pub fn contains(&self, net: &IpNet) -> bool {
        self.announced.read().contains(net)
    }

    /// Number of announced prefixes
    #[must_use]
    pub fn len(&self) -> usize {
        self.announced.read().len()
    }

    /// Whether nothing is announced
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.announced.read().is_empty()
    }

    /// Hold the speaker session open until cancelled
    ///
    /// The protocol session that peers with the router attaches here; the
    /// RIB itself only has to outlive it.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            router_id = %self.cfg.router_id,
            local_asn = self.cfg.local_asn,
            peer_asn = self.cfg.peer_asn,
            "route speaker started"
        );
        cancel.cancelled().await;

        let left = self.len();
        if left > 0 {
            warn!(routes = left, "route speaker stopping with routes still announced");
        }
        info!("route speaker stopped");
    }

    fn next_hop(&self, family: IpFamily) -> String {
        match family {
            IpFamily::V4 => self
                .cfg
                .next_hop_v4
                .map_or_else(|| "-".to_string(), |h| h.to_string()),
            IpFamily::V6 => self
                .cfg
                .next_hop_v6
                .map_or_else(|| "-".to_string(), |h| h.to_string()),
        }
    }
}

impl RouteSpeaker for RibSpeaker {
    fn upsert_route(&self, ip: IpAddr, family: IpFamily) -> RouteResult<()> {
        let net = host_prefix(ip, family)?;

        if !self.announced.write().insert(net) {
            return Ok(());
        }

        info!(prefix = %net, next_hop = %self.next_hop(family), "announced route");
        Ok(())
    }

    fn withdraw_route(&self, ip: IpAddr, family: IpFamily) -> RouteResult<()> {
        let net = host_prefix(ip, family)?;

        if !self.announced.write().remove(&net) {
            debug!(prefix = %net, "withdraw of absent route ignored");
            return Ok(());
        }

        info!(prefix = %net, "withdrew route");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn speaker() -> RibSpeaker {
        RibSpeaker::new(RouteConfig::default())
    }

    #[test]
    fn upsert_is_idempotent() {
        let rib = speaker();
        let ip: IpAddr = "1.2.3.4".parse().unwrap();

        rib.upsert_route(ip, IpFamily::V4).unwrap();
        rib.upsert_route(ip, IpFamily::V4).unwrap();

        assert_eq!(rib.len(), 1);
        assert!(rib.contains(&"1.2.3.4/32".parse().unwrap()));
    }

    #[test]
    fn withdraw_is_idempotent() {
        let rib = speaker();
        let ip: IpAddr = "1.2.3.4".parse().unwrap();

        rib.upsert_route(ip, IpFamily::V4).unwrap();
        rib.withdraw_route(ip, IpFamily::V4).unwrap();
        rib.withdraw_route(ip, IpFamily::V4).unwrap();

        assert!(rib.is_empty());
    }

    #[test]
    fn v6_routes_are_full_length_prefixes() {
        let rib = speaker();
        let ip: IpAddr = "2001:db8::1".parse().unwrap();

        rib.upsert_route(ip, IpFamily::V6).unwrap();
        assert!(rib.contains(&"2001:db8::1/128".parse().unwrap()));

        rib.withdraw_route(ip, IpFamily::V6).unwrap();
        assert!(rib.is_empty());
    }

    #[test]
    fn family_mismatch_rejected_on_both_paths() {
        let rib = speaker();
        let ip: IpAddr = "1.2.3.4".parse().unwrap();

        assert!(rib.upsert_route(ip, IpFamily::V6).is_err());
        assert!(rib.withdraw_route(ip, IpFamily::V6).is_err());
        assert!(rib.is_empty());
    }

    #[test]
    fn config_validates_asns() {
        let mut cfg = RouteConfig::default();
        assert!(cfg.validate().is_ok());

        cfg.local_asn = 0;
        assert!(cfg.validate().is_err());
    }
}
