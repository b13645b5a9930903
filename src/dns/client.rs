//! Upstream exchange
//!
//! One configured upstream, reached over UDP, TCP or TLS depending on the
//! URI scheme. Queries are relayed byte for byte; this client never builds
//! or rewrites messages. Stream transports use the standard 2-byte length
//! framing.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tracing::trace;

use super::config::{DnsClientConfig, UpstreamScheme};
use super::error::{DnsError, DnsResult};

/// Largest answer we accept from a UDP upstream
const UDP_RECV_BUFFER_SIZE: usize = 4096;

/// Largest answer we accept from a stream upstream
const MAX_STREAM_MESSAGE_SIZE: usize = 65535;

/// Byte-level DNS client for the configured upstream
pub struct UpstreamExchanger {
    cfg: DnsClientConfig,
    tls: Option<TlsConnector>,
}

impl UpstreamExchanger {
    /// Create an exchanger, preparing the TLS connector when needed
    #[must_use]
    pub fn new(cfg: DnsClientConfig) -> Self {
        let tls = match cfg.upstream.scheme {
            UpstreamScheme::Tls => Some(TlsConnector::from(Arc::new(
                crate::check::tls_client_config(),
            ))),
            _ => None,
        };
        Self { cfg, tls }
    }

    /// The configured upstream, for logging
    #[must_use]
    pub fn upstream(&self) -> String {
        self.cfg.upstream.to_string()
    }

    /// Relay one query and return the verbatim response bytes
    ///
    /// # Errors
    ///
    /// Returns an error on connect, read or write failure or when a
    /// deadline is exceeded. Callers close the client connection without
    /// responding so the client retries instead of caching a failure.
    pub async fn exchange(&self, query: &[u8]) -> DnsResult<Vec<u8>> {
        match self.cfg.upstream.scheme {
            UpstreamScheme::Udp => self.exchange_udp(query).await,
            UpstreamScheme::Tcp => self.exchange_tcp(query).await,
            UpstreamScheme::Tls => self.exchange_tls(query).await,
        }
    }

    async fn exchange_udp(&self, query: &[u8]) -> DnsResult<Vec<u8>> {
        let upstream = self.cfg.upstream.addr;
        let bind: std::net::SocketAddr = if upstream.is_ipv4() {
            "0.0.0.0:0".parse().expect("valid bind address")
        } else {
            "[::]:0".parse().expect("valid bind address")
        };

        let socket = UdpSocket::bind(bind)
            .await
            .map_err(|e| DnsError::network_io("failed to bind upstream UDP socket", e))?;
        socket
            .connect(upstream)
            .await
            .map_err(|e| DnsError::network_io("failed to connect upstream UDP socket", e))?;

        timeout(self.cfg.write_timeout, socket.send(query))
            .await
            .map_err(|_| DnsError::timeout("upstream UDP send", self.cfg.write_timeout))?
            .map_err(|e| DnsError::network_io("upstream UDP send failed", e))?;

        let mut buf = vec![0u8; UDP_RECV_BUFFER_SIZE];
        let len = timeout(self.cfg.read_timeout, socket.recv(&mut buf))
            .await
            .map_err(|_| DnsError::timeout("upstream UDP recv", self.cfg.read_timeout))?
            .map_err(|e| DnsError::network_io("upstream UDP recv failed", e))?;

        buf.truncate(len);
        trace!(upstream = %self.cfg.upstream, len, "upstream UDP exchange done");
        Ok(buf)
    }

    async fn exchange_tcp(&self, query: &[u8]) -> DnsResult<Vec<u8>> {
        let stream = self.dial().await?;
        self.framed_exchange(stream, query).await
    }

    async fn exchange_tls(&self, query: &[u8]) -> DnsResult<Vec<u8>> {
        let connector = self.tls.as_ref().expect("TLS connector is prepared for tls scheme");
        let server_name = rustls::pki_types::ServerName::try_from(
            self.cfg.upstream.addr.ip().to_string(),
        )
        .map_err(|e| DnsError::config(format!("invalid upstream TLS name: {e}")))?;

        let tcp = self.dial().await?;
        let stream = timeout(self.cfg.dial_timeout, connector.connect(server_name, tcp))
            .await
            .map_err(|_| DnsError::timeout("upstream TLS handshake", self.cfg.dial_timeout))?
            .map_err(|e| {
                DnsError::upstream(self.cfg.upstream.to_string(), format!("TLS handshake: {e}"))
            })?;

        self.framed_exchange(stream, query).await
    }

    async fn dial(&self) -> DnsResult<TcpStream> {
        let stream = timeout(self.cfg.dial_timeout, TcpStream::connect(self.cfg.upstream.addr))
            .await
            .map_err(|_| DnsError::timeout("upstream dial", self.cfg.dial_timeout))?
            .map_err(|e| {
                DnsError::upstream(self.cfg.upstream.to_string(), format!("dial: {e}"))
            })?;
        Ok(stream)
    }

    async fn framed_exchange<S>(&self, mut stream: S, query: &[u8]) -> DnsResult<Vec<u8>>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let len = u16::try_from(query.len())
            .map_err(|_| DnsError::network("query exceeds DNS message size"))?;

        timeout(self.cfg.write_timeout, async {
            stream.write_all(&len.to_be_bytes()).await?;
            stream.write_all(query).await?;
            stream.flush().await
        })
        .await
        .map_err(|_| DnsError::timeout("upstream stream send", self.cfg.write_timeout))?
        .map_err(|e| DnsError::network_io("upstream stream send failed", e))?;

        let response = timeout(self.cfg.read_timeout, async {
            let mut len_buf = [0u8; 2];
            stream.read_exact(&mut len_buf).await?;
            let len = usize::from(u16::from_be_bytes(len_buf)).min(MAX_STREAM_MESSAGE_SIZE);
            let mut buf = vec![0u8; len];
            stream.read_exact(&mut buf).await?;
            Ok::<_, std::io::Error>(buf)
        })
        .await
        .map_err(|_| DnsError::timeout("upstream stream recv", self.cfg.read_timeout))?
        .map_err(|e| DnsError::network_io("upstream stream recv failed", e))?;

        trace!(upstream = %self.cfg.upstream, len = response.len(), "upstream stream exchange done");
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::config::UpstreamAddr;
    use std::time::Duration;
    use tokio::net::TcpListener;

    fn client_for(upstream: &str) -> UpstreamExchanger {
        UpstreamExchanger::new(DnsClientConfig {
            upstream: UpstreamAddr::parse(upstream).unwrap(),
            dial_timeout: Duration::from_millis(500),
            read_timeout: Duration::from_millis(500),
            write_timeout: Duration::from_millis(500),
        })
    }

    #[tokio::test]
    async fn udp_exchange_round_trip() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();

        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            let (len, src) = server.recv_from(&mut buf).await.unwrap();
            // echo the query back as the "response"
            server.send_to(&buf[..len], src).await.unwrap();
        });

        let client = client_for(&format!("udp://{addr}"));
        let response = client.exchange(b"\x12\x34query").await.unwrap();
        assert_eq!(response, b"\x12\x34query");
    }

    #[tokio::test]
    async fn tcp_exchange_uses_length_framing() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut len_buf = [0u8; 2];
            stream.read_exact(&mut len_buf).await.unwrap();
            let len = usize::from(u16::from_be_bytes(len_buf));
            let mut buf = vec![0u8; len];
            stream.read_exact(&mut buf).await.unwrap();

            stream.write_all(&len_buf).await.unwrap();
            stream.write_all(&buf).await.unwrap();
        });

        let client = client_for(&format!("tcp://{addr}"));
        let response = client.exchange(b"\x56\x78query").await.unwrap();
        assert_eq!(response, b"\x56\x78query");
    }

    #[tokio::test]
    async fn udp_exchange_times_out_without_answer() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();
        // server never answers

        let client = client_for(&format!("udp://{addr}"));
        let err = client.exchange(b"query").await.unwrap_err();
        assert!(matches!(err, DnsError::Timeout { .. }));
    }
}
