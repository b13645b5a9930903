//! Observed-answer history
//!
//! The authoritative set of addresses the governor must keep announced
//! while a site is classified as blocked: a bounded TTL-LRU keyed by
//! `(site, fqdn+ip)` with a per-site index for fan-out. Every removal,
//! whether by TTL expiry, LRU overflow, explicit invalidation or cache
//! stop, runs the same on-evict notification exactly once; replacing an
//! entry (a re-observation extending its TTL) does not.
//!
//! The notification is an explicit observer rather than behavior baked
//! into the cache so the route-withdrawal coupling can be driven directly
//! in tests.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use moka::notification::RemovalCause;
use moka::sync::Cache;
use tracing::trace;

use crate::dns::ResolvedRecord;

/// Observer invoked once per evicted record
pub type EvictionObserver = Arc<dyn Fn(&ResolvedRecord) + Send + Sync>;

/// Cache key: one observed answer under one site
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HistoryKey {
    site: String,
    entry: String,
}

impl HistoryKey {
    fn new(site: &str, record: &ResolvedRecord) -> Self {
        Self {
            site: site.to_string(),
            entry: format!("{}{}", record.fqdn, record.ip),
        }
    }
}

/// Two-level bounded TTL-LRU of observed answers
pub struct IpHistory {
    cache: Cache<HistoryKey, ResolvedRecord>,
    index: Arc<DashMap<String, HashSet<HistoryKey>>>,
}

impl IpHistory {
    /// Create a history bound to `max_entries` records with a uniform TTL
    ///
    /// `on_evict` fires for every record leaving the cache for any reason
    /// except replacement.
    #[must_use]
    pub fn new(max_entries: u64, ttl: Duration, on_evict: EvictionObserver) -> Self {
        let index: Arc<DashMap<String, HashSet<HistoryKey>>> = Arc::new(DashMap::new());
        let listener_index = Arc::clone(&index);

        let cache = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .eviction_listener(move |key: Arc<HistoryKey>, record: ResolvedRecord, cause| {
                if cause == RemovalCause::Replaced {
                    // TTL extension of a re-observed record, nothing left
                    return;
                }

                if let Some(mut keys) = listener_index.get_mut(&key.site) {
                    keys.remove(key.as_ref());
                }
                listener_index.remove_if(&key.site, |_, keys| keys.is_empty());

                trace!(site = %key.site, fqdn = %record.fqdn, ip = %record.ip, ?cause, "history entry evicted");
                on_evict(&record);
            })
            .build();

        Self { cache, index }
    }

    /// Insert a record or extend the TTL of an identical one
    pub fn observe(&self, site: &str, record: ResolvedRecord) {
        let key = HistoryKey::new(site, &record);
        // the insert resets the entry's TTL when the key already exists
        self.cache.insert(key.clone(), record);
        self.index.entry(site.to_string()).or_default().insert(key);
    }

    /// All live records cached under a site
    ///
    /// Stale index entries (records evicted concurrently with an insert)
    /// are pruned on the way.
    #[must_use]
    pub fn for_site(&self, site: &str) -> Vec<ResolvedRecord> {
        let Some(keys) = self.index.get(site).map(|entry| entry.value().clone()) else {
            return Vec::new();
        };

        let mut records = Vec::with_capacity(keys.len());
        let mut stale = Vec::new();
        for key in keys {
            match self.cache.get(&key) {
                Some(record) => records.push(record),
                None => stale.push(key),
            }
        }

        if !stale.is_empty() {
            if let Some(mut keys) = self.index.get_mut(site) {
                for key in stale {
                    keys.remove(&key);
                }
            }
        }

        records
    }

    /// Whether a record is currently cached
    #[must_use]
    pub fn contains(&self, site: &str, record: &ResolvedRecord) -> bool {
        self.cache.contains_key(&HistoryKey::new(site, record))
    }

    /// Approximate number of cached records
    #[must_use]
    pub fn len(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Whether the history is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evict one record, running the on-evict notification
    ///
    /// The same path TTL expiry and overflow eviction take, exposed so the
    /// eviction coupling can be driven deterministically.
    pub fn evict(&self, site: &str, record: &ResolvedRecord) {
        self.cache.invalidate(&HistoryKey::new(site, record));
        self.cache.run_pending_tasks();
    }

    /// Process pending maintenance so evictions become visible
    ///
    /// moka defers eviction work; deterministic tests and the shutdown
    /// path call this to force it.
    pub fn flush(&self) {
        self.cache.run_pending_tasks();
    }

    /// Drop every record, running the on-evict notification for each
    pub fn stop(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks();
    }
}
