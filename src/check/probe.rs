//! Two-interface differential HTTPS probe
//!
//! A candidate `(fqdn, ip)` is probed with one HTTPS `HEAD` per uplink,
//! both legs running concurrently: one socket bound to the direct
//! interface, one to the tunnel interface. The censor answers 403 on the
//! direct path for a blocked site, so the verdict is
//!
//! ```text
//! blocked  =  direct refused  AND  tunnel acceptable
//! ```
//!
//! where "acceptable" is any HTTP status other than 403 and a transport
//! error counts as refused. Both legs failing with transport errors makes
//! the verdict indeterminate and surfaces as an error.
//!
//! Name resolution is bypassed entirely: the request is built against a
//! synthetic authority registered in the [`ProbeResolver`], which the
//! bound dialer consults, while TLS still carries and validates the real
//! FQDN. Redirects are not followed; a 30x is just "not 403".

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http::{header, Method, Request, StatusCode};
use http_body_util::{BodyExt, Empty};
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tracing::{debug, trace, warn};

use super::config::ProbeConfig;
use super::dialer::{tls_connector, BoundDialer};
use super::error::{CheckError, CheckResult};
use super::resolver::ProbeResolver;
use crate::dns::IpFamily;

/// Probes connect to the HTTPS port regardless of the observed record
const HTTPS_PORT: u16 = 443;

/// How much of a response body is read and discarded per leg
const MAX_BODY_DRAIN: usize = 128 << 10;

/// Verdict source for the governor
///
/// The production implementation is [`HttpProber`]; tests script their own.
#[async_trait]
pub trait Prober: Send + Sync {
    /// Decide whether `ip` serves `fqdn` only through the tunnel
    ///
    /// # Errors
    ///
    /// An error means the verdict is indeterminate, not that the site is
    /// reachable or blocked.
    async fn is_blocked(&self, fqdn: &str, ip: IpAddr, family: IpFamily) -> CheckResult<bool>;
}

/// The production two-interface prober
pub struct HttpProber {
    cfg: ProbeConfig,
    resolver: Arc<ProbeResolver>,
    direct: BoundDialer,
    tunnel: BoundDialer,
    tls: TlsConnector,
}

impl HttpProber {
    /// Create a prober, validating both interfaces
    ///
    /// # Errors
    ///
    /// Returns [`CheckError::Device`] when an interface is missing or down.
    pub fn new(cfg: ProbeConfig) -> CheckResult<Self> {
        cfg.validate()?;

        Ok(Self {
            direct: BoundDialer::new(&cfg.direct_dev),
            tunnel: BoundDialer::new(&cfg.vpn_dev),
            resolver: ProbeResolver::new(),
            tls: tls_connector(),
            cfg,
        })
    }

    /// The synthetic-host table, exposed for inspection in tests
    #[must_use]
    pub fn resolver(&self) -> &Arc<ProbeResolver> {
        &self.resolver
    }

    async fn check_once(&self, fqdn: &str, authority: &str) -> CheckResult<bool> {
        let (direct, tunnel) = tokio::join!(
            self.probe_leg(&self.direct, authority),
            self.probe_leg(&self.tunnel, authority),
        );
        combine_verdict(fqdn, direct, tunnel)
    }

    async fn probe_leg(&self, dialer: &BoundDialer, authority: &str) -> CheckResult<bool> {
        timeout(self.cfg.timeout, self.probe_leg_inner(dialer, authority))
            .await
            .map_err(|_| CheckError::Timeout {
                timeout: self.cfg.timeout,
            })?
    }

    async fn probe_leg_inner(&self, dialer: &BoundDialer, authority: &str) -> CheckResult<bool> {
        let target = self
            .resolver
            .lookup(authority)
            .ok_or_else(|| CheckError::Resolve {
                authority: authority.to_string(),
            })?;

        let host = sni_host(authority);
        let stream = dialer.dial(target).await?;

        let server_name = ServerName::try_from(host.clone()).map_err(|e| CheckError::Tls {
            host: host.clone(),
            reason: e.to_string(),
        })?;
        let tls = self
            .tls
            .connect(server_name, stream)
            .await
            .map_err(|e| CheckError::Tls {
                host: host.clone(),
                reason: e.to_string(),
            })?;

        let (mut sender, conn) = http1::handshake(TokioIo::new(tls))
            .await
            .map_err(|e| CheckError::http(format!("handshake: {e}")))?;
        tokio::spawn(async move {
            // connection errors resurface through send_request
            let _ = conn.await;
        });

        let request = Request::builder()
            .method(Method::HEAD)
            .uri("/")
            .header(header::HOST, authority)
            .body(Empty::<Bytes>::new())
            .map_err(|e| CheckError::http(format!("request: {e}")))?;

        let response = sender
            .send_request(request)
            .await
            .map_err(|e| CheckError::http(format!("send: {e}")))?;

        let status = response.status();
        drain_body(response.into_body()).await;

        trace!(device = %dialer.device(), host = %host, status = %status, "probe leg done");
        Ok(status != StatusCode::FORBIDDEN)
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn is_blocked(&self, fqdn: &str, ip: IpAddr, family: IpFamily) -> CheckResult<bool> {
        if !family.matches(ip) {
            warn!(fqdn, ip = %ip, family = %family, "record family does not match its address");
        }

        let guard = self.resolver.register(fqdn, SocketAddr::new(ip, HTTPS_PORT));
        let authority = guard.authority().to_string();

        let mut blocked = self.check_once(fqdn, &authority).await?;
        if blocked && self.cfg.double_check {
            blocked = self.check_once(fqdn, &authority).await?;
            if !blocked {
                warn!(fqdn, ip = %ip, "flaky fqdn, first probe said blocked");
            }
        }

        debug!(fqdn, ip = %ip, blocked, "probe verdict");
        Ok(blocked)
    }
}

/// Merge two leg outcomes into one verdict
///
/// A single failed leg counts as unreachable on that side; two failed legs
/// make the probe indeterminate.
fn combine_verdict(
    fqdn: &str,
    direct: CheckResult<bool>,
    tunnel: CheckResult<bool>,
) -> CheckResult<bool> {
    if let (Err(direct), Err(tunnel)) = (&direct, &tunnel) {
        return Err(CheckError::BothLegsFailed {
            fqdn: fqdn.to_string(),
            direct: direct.to_string(),
            tunnel: tunnel.to_string(),
        });
    }

    let direct_ok = direct.unwrap_or(false);
    let tunnel_ok = tunnel.unwrap_or(false);
    Ok(!direct_ok && tunnel_ok)
}

/// Real host behind a synthetic authority, suitable for SNI
fn sni_host(authority: &str) -> String {
    let host = authority
        .rsplit_once(':')
        .map_or(authority, |(host, _)| host);
    host.trim_end_matches('.').to_string()
}

async fn drain_body(mut body: hyper::body::Incoming) {
    let mut drained = 0usize;
    while drained < MAX_BODY_DRAIN {
        match body.frame().await {
            Some(Ok(frame)) => {
                if let Some(data) = frame.data_ref() {
                    drained += data.len();
                }
            }
            Some(Err(_)) | None => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leg_err() -> CheckError {
        CheckError::http("connection reset")
    }

    #[test]
    fn blocked_needs_direct_refusal_and_tunnel_success() {
        assert!(combine_verdict("f.", Ok(false), Ok(true)).unwrap());
        assert!(!combine_verdict("f.", Ok(true), Ok(true)).unwrap());
        assert!(!combine_verdict("f.", Ok(true), Ok(false)).unwrap());
        assert!(!combine_verdict("f.", Ok(false), Ok(false)).unwrap());
    }

    #[test]
    fn single_leg_error_counts_as_unreachable() {
        // direct dead, tunnel fine: looks blocked
        assert!(combine_verdict("f.", Err(leg_err()), Ok(true)).unwrap());
        // tunnel dead: can never be confirmed blocked
        assert!(!combine_verdict("f.", Ok(false), Err(leg_err())).unwrap());
        assert!(!combine_verdict("f.", Ok(true), Err(leg_err())).unwrap());
    }

    #[test]
    fn both_legs_error_is_indeterminate() {
        let err = combine_verdict("f.", Err(leg_err()), Err(leg_err())).unwrap_err();
        assert!(err.is_indeterminate());
        assert!(err.to_string().contains("both interfaces"));
    }

    #[test]
    fn sni_host_strips_synthetic_port_and_root_dot() {
        assert_eq!(sni_host("www.example.com.:17"), "www.example.com");
        assert_eq!(sni_host("www.example.com."), "www.example.com");
        assert_eq!(sni_host("example.com:443"), "example.com");
    }
}
