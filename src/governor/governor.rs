//! The site governor
//!
//! Receives observation records from the DNS proxy, classifies each site,
//! schedules probes on a bounded worker pool, caches verdicts and drives
//! the routing control plane.
//!
//! Per-site lifecycle:
//!
//! ```text
//!         (first A/AAAA observed)
//! UNSEEN ────────────────────────▶ PROBING
//!                                     │
//!              direct path OK         │ direct blocked,
//!                                     │ tunnel OK
//!    ┌──────── DIRECT ◀───────┐       ▼
//!    │                        │    BLOCKED ──(re-verify clean)──▶ DIRECT
//!    │   (TTL expiry)         │       │
//!    └────────▶ UNSEEN        │       │ (TTL expiry without refresh)
//!                             │       ▼
//!                             └──── UNSEEN
//! ```
//!
//! Ordering between concurrent observations of one FQDN is not defined;
//! two simultaneous queries may enqueue two probes for the same site.
//! Idempotent route announcement and site registration absorb the race.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moka::sync::Cache;
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::history::{EvictionObserver, IpHistory};
use super::reverify;
use super::site::{site_from_fqdn, DomainList};
use super::vpn_sites::{RetirementObserver, VpnSites};
use crate::check::Prober;
use crate::dns::{ObservationSink, ResolvedRecord};
use crate::route::RouteSpeaker;

/// Error types for governor lifecycle operations
#[derive(Debug, Error)]
pub enum GovernorError {
    /// Workers did not drain within the shutdown deadline
    ///
    /// The drain continues in the background; the caller is expected to
    /// exit regardless.
    #[error("governor shutdown exceeded {waited:?} while draining probe workers")]
    ShutdownTimeout {
        /// The deadline that was exceeded
        waited: Duration,
    },
}

/// Per-FQDN routing decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Traffic stays on the direct uplink
    Direct,
    /// Traffic is steered through the tunnel
    Tunnel,
    /// Use the direct uplink for now, but probe
    DirectCheck,
    /// Steer through the tunnel already, and probe
    TunnelCheck,
}

impl Decision {
    /// Whether this decision schedules a probe
    #[must_use]
    pub fn needs_probe(self) -> bool {
        matches!(self, Self::DirectCheck | Self::TunnelCheck)
    }
}

/// Governor tuning knobs
#[derive(Debug, Clone)]
pub struct GovernorConfig {
    /// Number of probe workers
    pub concurrency: usize,
    /// Probe backlog; producers block when it is full
    pub queue_size: usize,
    /// Bound of the observed-answer history
    pub ip_history_size: u64,
    /// TTL of observed answers
    pub ip_history_ttl: Duration,
    /// Bound of the per-FQDN decisions cache
    pub decisions_size: u64,
    /// TTL of cached decisions
    pub decisions_ttl: Duration,
    /// Bound of the blocked-sites registry
    pub vpn_sites_size: u64,
    /// TTL of blocked-site entries
    pub vpn_sites_ttl: Duration,
    /// Interval of the offline re-verifier
    pub recheck_period: Duration,
    /// Names forced onto the direct uplink
    pub direct_domains: DomainList,
    /// Names forced through the tunnel
    pub tunnel_domains: DomainList,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            concurrency: 32,
            queue_size: 1024,
            ip_history_size: 32_384,
            ip_history_ttl: Duration::from_secs(600),
            decisions_size: 129_536,
            decisions_ttl: Duration::from_secs(1800),
            vpn_sites_size: 32_384,
            vpn_sites_ttl: Duration::from_secs(7 * 24 * 3600),
            recheck_period: Duration::from_secs(1800),
            direct_domains: DomainList::default(),
            tunnel_domains: DomainList::default(),
        }
    }
}

/// One queued probe
pub(crate) struct ProbeJob {
    pub(crate) record: ResolvedRecord,
    pub(crate) site: String,
}

/// Decision and routing controller
pub struct SiteGovernor {
    pub(crate) speaker: Arc<dyn RouteSpeaker>,
    pub(crate) prober: Arc<dyn Prober>,
    pub(crate) history: Arc<IpHistory>,
    pub(crate) decisions: Cache<String, Decision>,
    pub(crate) vpn_sites: Arc<VpnSites>,
    pub(crate) cancel: CancellationToken,
    pub(crate) recheck_period: Duration,
    direct_domains: DomainList,
    tunnel_domains: DomainList,
    concurrency: usize,
    queue: RwLock<Option<mpsc::Sender<ProbeJob>>>,
    queue_rx: Mutex<Option<mpsc::Receiver<ProbeJob>>>,
    started: AtomicBool,
    closed_tx: watch::Sender<bool>,
    closed_rx: watch::Receiver<bool>,
}

impl SiteGovernor {
    /// Create a governor over the given speaker and prober
    ///
    /// The observed-answer history withdraws a record's route whenever the
    /// record leaves the cache, and the blocked-sites registry withdraws
    /// all of a site's cached routes whenever the site is retired. Both
    /// couplings are wired here so the caches themselves stay generic.
    #[must_use]
    pub fn new(
        cfg: GovernorConfig,
        speaker: Arc<dyn RouteSpeaker>,
        prober: Arc<dyn Prober>,
    ) -> Arc<Self> {
        let withdraw_speaker = Arc::clone(&speaker);
        let on_evict: EvictionObserver = Arc::new(move |record: &ResolvedRecord| {
            match withdraw_speaker.withdraw_route(record.ip, record.family) {
                Ok(()) => {
                    debug!(fqdn = %record.fqdn, ip = %record.ip, "withdrew route for evicted record");
                }
                Err(e) => {
                    error!(fqdn = %record.fqdn, ip = %record.ip, error = %e, "unable to withdraw route");
                }
            }
        });

        let history = Arc::new(IpHistory::new(
            cfg.ip_history_size,
            cfg.ip_history_ttl,
            on_evict,
        ));

        let retire_history = Arc::clone(&history);
        let retire_speaker = Arc::clone(&speaker);
        let on_retire: RetirementObserver = Arc::new(move |site: &str| {
            for record in retire_history.for_site(site) {
                if let Err(e) = retire_speaker.withdraw_route(record.ip, record.family) {
                    error!(site = %site, ip = %record.ip, error = %e, "unable to withdraw route");
                }
            }
        });

        let vpn_sites = Arc::new(VpnSites::new(
            cfg.vpn_sites_size,
            cfg.vpn_sites_ttl,
            on_retire,
        ));

        let decisions = Cache::builder()
            .max_capacity(cfg.decisions_size)
            .time_to_live(cfg.decisions_ttl)
            .build();

        let (queue_tx, queue_rx) = mpsc::channel(cfg.queue_size);
        let (closed_tx, closed_rx) = watch::channel(false);

        Arc::new(Self {
            speaker,
            prober,
            history,
            decisions,
            vpn_sites,
            cancel: CancellationToken::new(),
            recheck_period: cfg.recheck_period,
            direct_domains: cfg.direct_domains,
            tunnel_domains: cfg.tunnel_domains,
            concurrency: cfg.concurrency.max(1),
            queue: RwLock::new(Some(queue_tx)),
            queue_rx: Mutex::new(Some(queue_rx)),
            started: AtomicBool::new(false),
            closed_tx,
            closed_rx,
        })
    }

    /// Run the probe workers and the re-verifier until shutdown
    ///
    /// Workers exit when the probe queue is closed by [`shutdown`];
    /// the re-verifier exits on cancellation.
    ///
    /// [`shutdown`]: Self::shutdown
    pub async fn run(self: Arc<Self>) {
        let Some(queue_rx) = self.queue_rx.lock().take() else {
            warn!("governor run invoked twice");
            return;
        };
        self.started.store(true, Ordering::SeqCst);

        let queue_rx = Arc::new(tokio::sync::Mutex::new(queue_rx));
        let mut workers = JoinSet::new();
        for worker in 0..self.concurrency {
            let governor = Arc::clone(&self);
            let queue_rx = Arc::clone(&queue_rx);
            workers.spawn(async move { governor.probe_worker(worker, queue_rx).await });
        }
        info!(workers = self.concurrency, "governor started");

        let reverifier = tokio::spawn(reverify::run(Arc::clone(&self)));

        while workers.join_next().await.is_some() {}
        let _ = reverifier.await;

        debug!("probe workers drained");
        let _ = self.closed_tx.send(true);
    }

    /// Shut the governor down, withdrawing every announced route
    ///
    /// The probe queue is closed and workers drain their backlog; when
    /// `deadline` passes first a timeout error is returned while the drain
    /// continues in the background. The caches are stopped either way,
    /// which runs their on-delete hooks and retracts all routing state.
    ///
    /// # Errors
    ///
    /// Returns [`GovernorError::ShutdownTimeout`] when workers do not
    /// drain in time.
    pub async fn shutdown(&self, deadline: Duration) -> Result<(), GovernorError> {
        info!("governor shutting down");
        self.cancel.cancel();
        *self.queue.write() = None;

        let timed_out = if self.started.load(Ordering::SeqCst) {
            let mut closed = self.closed_rx.clone();
            let result = tokio::time::timeout(deadline, closed.wait_for(|done| *done)).await;
            result.is_err()
        } else {
            false
        };

        self.history.stop();
        self.vpn_sites.stop();
        self.decisions.invalidate_all();

        if timed_out {
            return Err(GovernorError::ShutdownTimeout { waited: deadline });
        }
        Ok(())
    }

    /// Classify an FQDN
    ///
    /// Static lists win outright, a non-classifiable name is conservative
    /// direct, and a fresh cached decision overrides the provisional
    /// check-state derived from the blocked-sites registry.
    pub fn classify(&self, fqdn: &str, site: Option<&str>) -> Decision {
        if self.direct_domains.matches(fqdn) {
            return Decision::Direct;
        }
        if self.tunnel_domains.matches(fqdn) {
            return Decision::Tunnel;
        }
        let Some(site) = site else {
            // cannot group the name, leave it on the direct path
            return Decision::Direct;
        };

        let provisional = if self.vpn_sites.contains(site) {
            Decision::TunnelCheck
        } else {
            Decision::DirectCheck
        };

        self.decisions.get(fqdn).unwrap_or(provisional)
    }

    async fn probe_worker(
        self: Arc<Self>,
        worker: usize,
        queue_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<ProbeJob>>>,
    ) {
        trace!(worker, "probe worker started");
        loop {
            let job = { queue_rx.lock().await.recv().await };
            let Some(job) = job else { break };

            if self.cancel.is_cancelled() {
                // draining for shutdown, the backlog is not probed
                continue;
            }
            self.complete_probe(job).await;
        }
        trace!(worker, "probe worker stopped");
    }

    async fn complete_probe(&self, job: ProbeJob) {
        let ProbeJob { record, site } = job;
        let verdict = self
            .prober
            .is_blocked(&record.fqdn, record.ip, record.family)
            .await;

        // once a site is known blocked, stay pessimistic until the
        // re-verifier clears it, whatever this probe said
        if let Some(entry) = self.vpn_sites.get(&site) {
            if let Err(e) = &verdict {
                debug!(site = %site, fqdn = %record.fqdn, error = %e, "probe failed for known blocked site");
            }
            entry.insert_fqdn(&record.fqdn);
            self.vpn_sites.touch(&site, &entry);
            self.decisions.insert(record.fqdn, Decision::Tunnel);
            return;
        }

        match verdict {
            Ok(false) => {
                debug!(fqdn = %record.fqdn, ip = %record.ip, "reachable on the direct path");
                self.decisions.insert(record.fqdn, Decision::Direct);
            }
            Ok(true) => {
                for cached in self.history.for_site(&site) {
                    self.announce(&cached);
                }
                self.vpn_sites.mark_blocked(&site, &record.fqdn);
                info!(site = %site, fqdn = %record.fqdn, ip = %record.ip, "blocked on the direct path, steering through tunnel");
                self.decisions.insert(record.fqdn, Decision::Tunnel);
            }
            Err(e) => {
                // indeterminate, the next observation will retry
                warn!(fqdn = %record.fqdn, ip = %record.ip, error = %e, "probe failed");
            }
        }
    }

    pub(crate) fn announce(&self, record: &ResolvedRecord) {
        match self.speaker.upsert_route(record.ip, record.family) {
            Ok(()) => {
                debug!(fqdn = %record.fqdn, ip = %record.ip, "announced route");
            }
            Err(e) => {
                error!(fqdn = %record.fqdn, ip = %record.ip, error = %e, "unable to announce route");
            }
        }
    }

    async fn enqueue(&self, record: ResolvedRecord, site: String) {
        let sender = self.queue.read().clone();
        let Some(sender) = sender else {
            return;
        };

        // a full queue blocks the observation path by design
        if sender.send(ProbeJob { record, site }).await.is_err() {
            debug!("probe queue closed, dropping job");
        }
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    /// Cached decision for an FQDN, if fresh
    #[must_use]
    pub fn decision_for(&self, fqdn: &str) -> Option<Decision> {
        self.decisions.get(fqdn)
    }

    /// Whether a site is currently registered as blocked
    #[must_use]
    pub fn is_vpn_site(&self, site: &str) -> bool {
        self.vpn_sites.contains(site)
    }

    /// Blocked FQDNs recorded for a site
    #[must_use]
    pub fn blocked_fqdns(&self, site: &str) -> Vec<String> {
        self.vpn_sites
            .get(site)
            .map(|entry| entry.fqdns())
            .unwrap_or_default()
    }

    /// Observed records cached under a site
    #[must_use]
    pub fn cached_records(&self, site: &str) -> Vec<ResolvedRecord> {
        self.history.for_site(site)
    }

    /// The observed-answer history
    ///
    /// Exposed so operators and tests can drive evictions directly; every
    /// eviction withdraws the record's route through the same hook the
    /// TTL and overflow paths use.
    #[must_use]
    pub fn history(&self) -> &IpHistory {
        &self.history
    }

    /// Force deferred cache maintenance, making evictions observable
    pub fn flush_caches(&self) {
        self.history.flush();
        self.vpn_sites.flush();
        self.decisions.run_pending_tasks();
    }
}

#[async_trait]
impl ObservationSink for SiteGovernor {
    async fn on_resolved(&self, record: ResolvedRecord) {
        let site = site_from_fqdn(&record.fqdn);
        match &site {
            Some(site) => self.history.observe(site, record.clone()),
            None => warn!(fqdn = %record.fqdn, "unable to derive site"),
        }

        let decision = self.classify(&record.fqdn, site.as_deref());
        debug!(fqdn = %record.fqdn, ip = %record.ip, ?decision, "observation classified");

        match decision {
            Decision::Direct => {}
            Decision::Tunnel => self.announce(&record),
            Decision::TunnelCheck => {
                self.announce(&record);
                if let Some(site) = site {
                    self.enqueue(record, site).await;
                }
            }
            Decision::DirectCheck => {
                if let Some(site) = site {
                    self.enqueue(record, site).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::{CheckError, CheckResult};
    use crate::dns::IpFamily;
    use crate::route::RouteResult;
    use std::net::IpAddr;

    struct NullSpeaker;

    impl RouteSpeaker for NullSpeaker {
        fn upsert_route(&self, _ip: IpAddr, _family: IpFamily) -> RouteResult<()> {
            Ok(())
        }
        fn withdraw_route(&self, _ip: IpAddr, _family: IpFamily) -> RouteResult<()> {
            Ok(())
        }
    }

    struct NullProber;

    #[async_trait]
    impl Prober for NullProber {
        async fn is_blocked(
            &self,
            _fqdn: &str,
            _ip: IpAddr,
            _family: IpFamily,
        ) -> CheckResult<bool> {
            Err(CheckError::http("not wired in this test"))
        }
    }

    fn governor(cfg: GovernorConfig) -> Arc<SiteGovernor> {
        SiteGovernor::new(cfg, Arc::new(NullSpeaker), Arc::new(NullProber))
    }

    #[test]
    fn static_lists_dominate_classification() {
        let cfg = GovernorConfig {
            direct_domains: DomainList::from_patterns(["ru"]),
            tunnel_domains: DomainList::from_patterns(["blocked.example"]),
            ..GovernorConfig::default()
        };
        let gov = governor(cfg);

        assert_eq!(
            gov.classify("foo.example.ru.", Some("example.ru.")),
            Decision::Direct
        );
        assert_eq!(
            gov.classify("www.blocked.example.", Some("blocked.example.")),
            Decision::Tunnel
        );
    }

    #[test]
    fn unclassifiable_names_default_to_direct() {
        let gov = governor(GovernorConfig::default());
        assert_eq!(gov.classify("com.", None), Decision::Direct);
    }

    #[test]
    fn unknown_site_gets_direct_check() {
        let gov = governor(GovernorConfig::default());
        assert_eq!(
            gov.classify("www.example.com.", Some("example.com.")),
            Decision::DirectCheck
        );
    }

    #[test]
    fn known_vpn_site_upgrades_to_tunnel_check() {
        let gov = governor(GovernorConfig::default());
        gov.vpn_sites.mark_blocked("example.com.", "www.example.com.");

        assert_eq!(
            gov.classify("mail.example.com.", Some("example.com.")),
            Decision::TunnelCheck
        );
    }

    #[test]
    fn cached_decision_overrides_provisional() {
        let gov = governor(GovernorConfig::default());
        gov.decisions
            .insert("www.example.com.".to_string(), Decision::Tunnel);

        assert_eq!(
            gov.classify("www.example.com.", Some("example.com.")),
            Decision::Tunnel
        );
        // other names under the site are unaffected
        assert_eq!(
            gov.classify("mail.example.com.", Some("example.com.")),
            Decision::DirectCheck
        );
    }

    #[test]
    fn decision_needs_probe() {
        assert!(Decision::DirectCheck.needs_probe());
        assert!(Decision::TunnelCheck.needs_probe());
        assert!(!Decision::Direct.needs_probe());
        assert!(!Decision::Tunnel.needs_probe());
    }

    #[tokio::test]
    async fn shutdown_without_run_does_not_wait() {
        let gov = governor(GovernorConfig::default());
        let started = std::time::Instant::now();
        gov.shutdown(Duration::from_secs(30)).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
