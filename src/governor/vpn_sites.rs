//! Registry of sites currently believed blocked
//!
//! One entry per blocked site, carrying the set of FQDNs under it that
//! produced a confirming probe. Entries live in a bounded TTL-LRU; a
//! confirming probe refreshes the TTL, the re-verifier retires entries
//! that come back clean, and TTL expiry retires entries nobody confirms.
//! Every removal except a refresh runs the same retirement notification,
//! which the governor wires to withdrawing all routes cached for the site.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use moka::notification::RemovalCause;
use moka::sync::Cache;
use parking_lot::Mutex;
use tracing::debug;

/// Observer invoked once per retired site
pub type RetirementObserver = Arc<dyn Fn(&str) + Send + Sync>;

/// Blocked FQDNs grouped under one site
///
/// The set is guarded by its own mutex, held only for the map operation,
/// never across I/O. The aggregate is opaque: callers get snapshots, not
/// references into the set.
#[derive(Debug, Default)]
pub struct VpnSiteEntry {
    fqdns: Mutex<HashSet<String>>,
}

impl VpnSiteEntry {
    fn with_fqdn(fqdn: &str) -> Arc<Self> {
        let entry = Arc::new(Self::default());
        entry.insert_fqdn(fqdn);
        entry
    }

    /// Record a blocked FQDN; returns whether it was new
    pub fn insert_fqdn(&self, fqdn: &str) -> bool {
        self.fqdns.lock().insert(fqdn.to_string())
    }

    /// Whether an FQDN is recorded
    #[must_use]
    pub fn contains(&self, fqdn: &str) -> bool {
        self.fqdns.lock().contains(fqdn)
    }

    /// Snapshot of the blocked FQDNs
    #[must_use]
    pub fn fqdns(&self) -> Vec<String> {
        self.fqdns.lock().iter().cloned().collect()
    }

    /// Number of blocked FQDNs
    #[must_use]
    pub fn len(&self) -> usize {
        self.fqdns.lock().len()
    }

    /// Whether no FQDN is recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Bounded TTL-LRU of blocked sites
pub struct VpnSites {
    cache: Cache<String, Arc<VpnSiteEntry>>,
}

impl VpnSites {
    /// Create a registry bound to `max_entries` sites with a uniform TTL
    #[must_use]
    pub fn new(max_entries: u64, ttl: Duration, on_retire: RetirementObserver) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .eviction_listener(move |site: Arc<String>, _entry, cause| {
                if cause == RemovalCause::Replaced {
                    // TTL refresh of a still-blocked site
                    return;
                }
                debug!(site = %site, ?cause, "vpn site retired");
                on_retire(&site);
            })
            .build();

        Self { cache }
    }

    /// Entry for a site, when one exists and has not expired
    #[must_use]
    pub fn get(&self, site: &str) -> Option<Arc<VpnSiteEntry>> {
        self.cache.get(site)
    }

    /// Whether a site is currently registered
    #[must_use]
    pub fn contains(&self, site: &str) -> bool {
        self.cache.contains_key(site)
    }

    /// Register a confirming probe for `fqdn` under `site`
    ///
    /// Creates the entry when the site is new, records the FQDN and
    /// refreshes the TTL either way.
    pub fn mark_blocked(&self, site: &str, fqdn: &str) -> Arc<VpnSiteEntry> {
        let entry = match self.cache.get(site) {
            Some(entry) => {
                entry.insert_fqdn(fqdn);
                entry
            }
            None => VpnSiteEntry::with_fqdn(fqdn),
        };

        self.cache.insert(site.to_string(), Arc::clone(&entry));
        entry
    }

    /// Refresh an entry's TTL without touching its FQDN set
    pub fn touch(&self, site: &str, entry: &Arc<VpnSiteEntry>) {
        self.cache.insert(site.to_string(), Arc::clone(entry));
    }

    /// Retire a site, running the retirement notification
    pub fn retire(&self, site: &str) {
        self.cache.invalidate(site);
        self.cache.run_pending_tasks();
    }

    /// Snapshot of all live entries
    #[must_use]
    pub fn iter(&self) -> Vec<(String, Arc<VpnSiteEntry>)> {
        self.cache
            .iter()
            .map(|(site, entry)| ((*site).clone(), entry))
            .collect()
    }

    /// Approximate number of registered sites
    #[must_use]
    pub fn len(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Whether no site is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Process pending maintenance so evictions become visible
    pub fn flush(&self) {
        self.cache.run_pending_tasks();
    }

    /// Drop every entry, running the retirement notification for each
    pub fn stop(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks();
    }
}
