//! Offline re-verification of blocked sites
//!
//! Sites stay registered as blocked for up to a week without traffic, so a
//! periodic sweep re-probes them and retires the ones that have come back.
//! A single confirmed block anywhere under the site keeps it registered;
//! an indeterminate probe keeps it registered too, since retiring a site
//! on a flaky probe would expose its users to the censor.

use std::sync::Arc;

use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::governor::SiteGovernor;

/// Drive the periodic sweep until the governor is cancelled
pub(crate) async fn run(governor: Arc<SiteGovernor>) {
    let mut ticker = tokio::time::interval(governor.recheck_period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the immediate first tick; verdicts are probe-fresh already
    ticker.tick().await;

    loop {
        tokio::select! {
            () = governor.cancel.cancelled() => break,
            _ = ticker.tick() => governor.reverify().await,
        }
    }
    debug!("re-verifier stopped");
}

impl SiteGovernor {
    /// Run one re-verification sweep over every registered site
    ///
    /// For each site, every blocked FQDN is probed against every address
    /// still cached for the site; the first confirmed block wins and the
    /// entry's TTL is extended. A site with no confirming probe left is
    /// retired, which withdraws all of its cached routes.
    pub async fn reverify(&self) {
        self.vpn_sites.flush();
        let sites = self.vpn_sites.iter();
        if sites.is_empty() {
            return;
        }
        debug!(sites = sites.len(), "re-verifying blocked sites");

        for (site, entry) in sites {
            if self.cancel.is_cancelled() {
                return;
            }

            let records = self.history.for_site(&site);
            let mut still_blocked = false;

            'fqdns: for fqdn in entry.fqdns() {
                for record in &records {
                    match self
                        .prober
                        .is_blocked(&fqdn, record.ip, record.family)
                        .await
                    {
                        Ok(true) => {
                            still_blocked = true;
                            break 'fqdns;
                        }
                        Err(e) => {
                            warn!(site = %site, fqdn = %fqdn, ip = %record.ip, error = %e,
                                "recheck indeterminate, keeping site blocked");
                            still_blocked = true;
                            break 'fqdns;
                        }
                        Ok(false) => {}
                    }
                }
            }

            if still_blocked {
                debug!(site = %site, "site still blocked");
                self.vpn_sites.touch(&site, &entry);
            } else {
                info!(site = %site, "site no longer blocked, retiring");
                self.vpn_sites.retire(&site);
            }
        }
    }
}
