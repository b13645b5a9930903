//! DNS proxy configuration types
//!
//! Listen endpoints and the upstream are expressed as URIs so the transport
//! is part of the address: `udp://:53`, `tcp://192.168.1.1:5353`,
//! `tls://1.1.1.1:853`. A host-less authority binds the wildcard address.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use super::error::{DnsError, DnsResult};

/// Default read/write/dial deadline for both server and client sockets
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Default upstream resolver
pub const DEFAULT_UPSTREAM: &str = "tcp://1.1.1.1:53";

/// Transport of a listen endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenTransport {
    /// Datagram service
    Udp,
    /// Stream service with 2-byte length framing
    Tcp,
}

impl fmt::Display for ListenTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Udp => write!(f, "udp"),
            Self::Tcp => write!(f, "tcp"),
        }
    }
}

/// Protocol used to reach the upstream resolver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamScheme {
    /// Plain UDP (RFC 1035)
    Udp,
    /// Plain TCP (RFC 1035)
    Tcp,
    /// DNS over TLS (RFC 7858)
    Tls,
}

impl fmt::Display for UpstreamScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Udp => write!(f, "udp"),
            Self::Tcp => write!(f, "tcp"),
            Self::Tls => write!(f, "tls"),
        }
    }
}

/// A parsed listen endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenAddr {
    /// Transport to serve on
    pub transport: ListenTransport,
    /// Socket address to bind
    pub addr: SocketAddr,
}

impl ListenAddr {
    /// Parse a `udp://host:port` or `tcp://host:port` URI
    ///
    /// # Errors
    ///
    /// Returns [`DnsError::Addr`] for unknown schemes or unparseable
    /// authorities.
    pub fn parse(uri: &str) -> DnsResult<Self> {
        let (scheme, rest) = split_uri(uri)?;
        let transport = match scheme {
            "udp" => ListenTransport::Udp,
            "tcp" => ListenTransport::Tcp,
            other => {
                return Err(DnsError::addr(
                    uri,
                    format!("unsupported listen scheme {other:?}"),
                ))
            }
        };

        Ok(Self {
            transport,
            addr: parse_authority(uri, rest)?,
        })
    }
}

impl fmt::Display for ListenAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.transport, self.addr)
    }
}

/// A parsed upstream endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamAddr {
    /// Protocol to use
    pub scheme: UpstreamScheme,
    /// Resolver address
    pub addr: SocketAddr,
}

impl UpstreamAddr {
    /// Parse an upstream URI; a bare authority defaults to UDP
    ///
    /// # Errors
    ///
    /// Returns [`DnsError::Addr`] for unknown schemes or unparseable
    /// authorities.
    pub fn parse(uri: &str) -> DnsResult<Self> {
        let (scheme, rest) = match uri.find("://") {
            Some(_) => split_uri(uri)?,
            None => ("udp", uri),
        };

        let scheme = match scheme {
            "udp" => UpstreamScheme::Udp,
            "tcp" => UpstreamScheme::Tcp,
            "tls" => UpstreamScheme::Tls,
            other => {
                return Err(DnsError::addr(
                    uri,
                    format!("unsupported upstream scheme {other:?}"),
                ))
            }
        };

        Ok(Self {
            scheme,
            addr: parse_authority(uri, rest)?,
        })
    }
}

impl fmt::Display for UpstreamAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.addr)
    }
}

fn split_uri(uri: &str) -> DnsResult<(&str, &str)> {
    let Some(idx) = uri.find("://") else {
        return Err(DnsError::addr(uri, "missing scheme"));
    };
    Ok((&uri[..idx], &uri[idx + 3..]))
}

fn parse_authority(uri: &str, authority: &str) -> DnsResult<SocketAddr> {
    // ":53" and "" bind the wildcard address
    if let Some(port) = authority.strip_prefix(':') {
        let port: u16 = port
            .parse()
            .map_err(|_| DnsError::addr(uri, format!("invalid port {port:?}")))?;
        return Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port));
    }

    authority
        .parse()
        .map_err(|e| DnsError::addr(uri, format!("invalid authority: {e}")))
}

/// Server side configuration of the proxy
#[derive(Debug, Clone)]
pub struct DnsServerConfig {
    /// Endpoints to serve on
    pub addrs: Vec<ListenAddr>,
    /// Per-socket read deadline
    pub read_timeout: Duration,
    /// Per-socket write deadline, independent of the read deadline
    pub write_timeout: Duration,
    /// Maximum queries served on one TCP connection, 0 for unbounded
    pub max_tcp_queries: u32,
}

impl Default for DnsServerConfig {
    fn default() -> Self {
        Self {
            addrs: vec![
                ListenAddr::parse("udp://:53").expect("valid default address"),
                ListenAddr::parse("tcp://:53").expect("valid default address"),
            ],
            read_timeout: DEFAULT_TIMEOUT,
            write_timeout: DEFAULT_TIMEOUT,
            max_tcp_queries: 0,
        }
    }
}

/// Client side configuration of the proxy
#[derive(Debug, Clone)]
pub struct DnsClientConfig {
    /// The single upstream resolver
    pub upstream: UpstreamAddr,
    /// Connect deadline
    pub dial_timeout: Duration,
    /// Response read deadline
    pub read_timeout: Duration,
    /// Query write deadline
    pub write_timeout: Duration,
}

impl Default for DnsClientConfig {
    fn default() -> Self {
        Self {
            upstream: UpstreamAddr::parse(DEFAULT_UPSTREAM).expect("valid default upstream"),
            dial_timeout: DEFAULT_TIMEOUT,
            read_timeout: DEFAULT_TIMEOUT,
            write_timeout: DEFAULT_TIMEOUT,
        }
    }
}
