//! Observation DNS proxy server
//!
//! One listener task per configured endpoint, each dispatching queries into
//! spawned handler tasks. The handler relays the query bytes verbatim to
//! the upstream and, when the exchange succeeds and the configured filters
//! allow it, lifts the answer's A/AAAA records into the observation sink
//! before the response is written back.
//!
//! ```text
//! LAN client ──► listener ──► upstream exchange ──► verbatim response
//!                                   │
//!                                   └─► filters ──► ObservationSink
//! ```
//!
//! An upstream failure closes the client connection without a response.
//! The client retries; nothing is answered from here and nothing is cached
//! by the client as a failure.

pub mod tcp;
pub mod udp;

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use hickory_proto::op::Message;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::client::UpstreamExchanger;
use super::config::{DnsServerConfig, ListenTransport};
use super::error::DnsResult;
use super::observe::extract_observations;
use super::types::{ObservationSink, ObserveFilter};

/// Counters for the proxy data plane
#[derive(Debug, Default)]
pub struct ProxyStats {
    queries: AtomicU64,
    upstream_errors: AtomicU64,
    observations: AtomicU64,
}

impl ProxyStats {
    /// Total queries relayed
    #[must_use]
    pub fn queries(&self) -> u64 {
        self.queries.load(Ordering::Relaxed)
    }

    /// Exchanges that failed and closed the client connection
    #[must_use]
    pub fn upstream_errors(&self) -> u64 {
        self.upstream_errors.load(Ordering::Relaxed)
    }

    /// Records handed to the observation sink
    #[must_use]
    pub fn observations(&self) -> u64 {
        self.observations.load(Ordering::Relaxed)
    }
}

/// Shared state of all listener and handler tasks
pub(crate) struct ProxyInner {
    pub(crate) cfg: DnsServerConfig,
    pub(crate) exchanger: UpstreamExchanger,
    pub(crate) sink: Arc<dyn ObservationSink>,
    pub(crate) filters: Vec<ObserveFilter>,
    pub(crate) stats: ProxyStats,
}

impl ProxyInner {
    /// Relay one query; `None` means close the client connection unanswered
    pub(crate) async fn relay(&self, query: Vec<u8>, client: SocketAddr) -> Option<Vec<u8>> {
        self.stats.queries.fetch_add(1, Ordering::Relaxed);

        let response = match self.exchanger.exchange(&query).await {
            Ok(response) => response,
            Err(e) => {
                self.stats.upstream_errors.fetch_add(1, Ordering::Relaxed);
                warn!(
                    upstream = %self.exchanger.upstream(),
                    client = %client,
                    error = %e,
                    "upstream exchange failed, closing client connection"
                );
                return None;
            }
        };

        // Observation runs before the reply so a full probe queue applies
        // backpressure to the resolving client instead of dropping records.
        self.observe(&query, &response, client.ip()).await;

        Some(response)
    }

    async fn observe(&self, query: &[u8], response: &[u8], client: IpAddr) {
        let (Ok(query), Ok(response)) = (Message::from_vec(query), Message::from_vec(response))
        else {
            debug!(client = %client, "unparseable exchange, skipping observation");
            return;
        };

        for record in extract_observations(&query, &response) {
            if !self.filters.iter().all(|f| f.allows(&record, client)) {
                continue;
            }

            self.stats.observations.fetch_add(1, Ordering::Relaxed);
            self.sink.on_resolved(record).await;
        }
    }
}

/// The observation DNS proxy
pub struct DnsProxy {
    inner: Arc<ProxyInner>,
}

impl DnsProxy {
    /// Create a proxy over the given upstream exchanger and sink
    #[must_use]
    pub fn new(
        cfg: DnsServerConfig,
        exchanger: UpstreamExchanger,
        filters: Vec<ObserveFilter>,
        sink: Arc<dyn ObservationSink>,
    ) -> Self {
        Self {
            inner: Arc::new(ProxyInner {
                cfg,
                exchanger,
                sink,
                filters,
                stats: ProxyStats::default(),
            }),
        }
    }

    /// Data-plane counters
    #[must_use]
    pub fn stats(&self) -> &ProxyStats {
        &self.inner.stats
    }

    /// Serve all configured endpoints until the token is cancelled
    ///
    /// # Errors
    ///
    /// Returns the first fatal listener error (bind failure, permission).
    /// Per-query errors never surface here.
    pub async fn run(&self, cancel: CancellationToken) -> DnsResult<()> {
        let mut listeners = JoinSet::new();

        for endpoint in self.inner.cfg.addrs.clone() {
            let inner = Arc::clone(&self.inner);
            let cancel = cancel.child_token();
            info!(endpoint = %endpoint, "starting DNS listener");

            match endpoint.transport {
                ListenTransport::Udp => {
                    listeners.spawn(udp::serve(inner, endpoint.addr, cancel));
                }
                ListenTransport::Tcp => {
                    listeners.spawn(tcp::serve(inner, endpoint.addr, cancel));
                }
            }
        }

        let mut first_err = None;
        while let Some(joined) = listeners.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(error = %e, "DNS listener exited with error");
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                    // one dead listener takes the proxy down
                    cancel.cancel();
                }
                Err(e) => warn!(error = %e, "DNS listener task panicked"),
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
