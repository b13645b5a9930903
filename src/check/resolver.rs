//! Per-probe synthetic host resolver
//!
//! The HTTPS client must connect to one specific address while still
//! presenting the real FQDN for SNI and certificate validation. Instead of
//! touching system resolution, each probe registers a unique synthetic
//! authority (`fqdn:counter`) mapped to the real `ip:443` target, builds
//! its request URL against that authority and releases the mapping when
//! the probe returns. The dialer consults only this table.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;

/// Synthetic authority table
///
/// One mutex covers both the port counter and the map; registration and
/// release are single short critical sections.
#[derive(Debug, Default)]
pub struct ProbeResolver {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    cur_port: i32,
    targets: HashMap<String, SocketAddr>,
}

impl Inner {
    /// Next synthetic port, wrapping through positive values only
    fn next_port(&mut self) -> i32 {
        self.cur_port = self.cur_port.wrapping_add(1);
        if self.cur_port <= 0 {
            self.cur_port = 1;
        }
        self.cur_port
    }
}

impl ProbeResolver {
    /// Create an empty resolver
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a target and return the guard holding its authority
    ///
    /// The mapping is removed when the guard drops, so no entry can leak
    /// across probes regardless of how the probe exits.
    #[must_use]
    pub fn register(self: &Arc<Self>, fqdn: &str, target: SocketAddr) -> ResolverGuard {
        let authority = {
            let mut inner = self.inner.lock();
            let authority = format!("{}:{}", fqdn, inner.next_port());
            inner.targets.insert(authority.clone(), target);
            authority
        };

        ResolverGuard {
            resolver: Arc::clone(self),
            authority,
        }
    }

    /// Look up the target behind a synthetic authority
    #[must_use]
    pub fn lookup(&self, authority: &str) -> Option<SocketAddr> {
        self.inner.lock().targets.get(authority).copied()
    }

    /// Number of live mappings
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().targets.len()
    }

    /// Whether no mappings are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn release(&self, authority: &str) {
        self.inner.lock().targets.remove(authority);
    }
}

/// Releases a registered mapping on drop
pub struct ResolverGuard {
    resolver: Arc<ProbeResolver>,
    authority: String,
}

impl ResolverGuard {
    /// The synthetic authority to build the probe URL against
    #[must_use]
    pub fn authority(&self) -> &str {
        &self.authority
    }
}

impl Drop for ResolverGuard {
    fn drop(&mut self) {
        self.resolver.release(&self.authority);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> SocketAddr {
        "1.2.3.4:443".parse().unwrap()
    }

    #[test]
    fn register_and_lookup() {
        let resolver = ProbeResolver::new();
        let guard = resolver.register("example.com.", target());

        assert_eq!(guard.authority(), "example.com.:1");
        assert_eq!(resolver.lookup(guard.authority()), Some(target()));
        assert_eq!(resolver.lookup("example.com.:999"), None);
    }

    #[test]
    fn guard_drop_releases_mapping() {
        let resolver = ProbeResolver::new();
        {
            let _guard = resolver.register("example.com.", target());
            assert_eq!(resolver.len(), 1);
        }
        assert!(resolver.is_empty());
    }

    #[test]
    fn authorities_are_unique_per_probe() {
        let resolver = ProbeResolver::new();
        let a = resolver.register("example.com.", target());
        let b = resolver.register("example.com.", "5.6.7.8:443".parse().unwrap());

        assert_ne!(a.authority(), b.authority());
        assert_eq!(resolver.lookup(a.authority()), Some(target()));
        assert_eq!(
            resolver.lookup(b.authority()),
            Some("5.6.7.8:443".parse().unwrap())
        );
    }

    #[test]
    fn port_counter_wraps_through_positive_values() {
        let resolver = ProbeResolver::new();
        resolver.inner.lock().cur_port = i32::MAX;

        let guard = resolver.register("example.com.", target());
        // i32::MAX wraps negative and is reset to 1
        assert_eq!(guard.authority(), "example.com.:1");
    }
}
