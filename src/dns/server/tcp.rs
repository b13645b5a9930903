//! TCP listener of the observation proxy
//!
//! Standard 2-byte length framing on both sides. A connection serves
//! queries until the client closes, a deadline passes, the per-connection
//! query limit is reached or the upstream fails (which closes the
//! connection without a response, like the UDP path).

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use super::ProxyInner;
use crate::dns::error::{DnsError, DnsResult};

/// Largest DNS message accepted over TCP
pub const MAX_TCP_MESSAGE_SIZE: usize = 65535;

/// Serve one TCP endpoint until cancelled
pub(crate) async fn serve(
    inner: Arc<ProxyInner>,
    addr: SocketAddr,
    cancel: CancellationToken,
) -> DnsResult<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| DnsError::network_io(format!("failed to bind tcp://{addr}"), e))?;
    info!(addr = %addr, "TCP DNS listener bound");

    loop {
        let (stream, client) = tokio::select! {
            () = cancel.cancelled() => {
                info!(addr = %addr, "TCP DNS listener shutting down");
                return Ok(());
            }
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    debug!(addr = %addr, error = %e, "TCP accept failed");
                    continue;
                }
            },
        };

        trace!(client = %client, "accepted TCP DNS connection");
        let inner = Arc::clone(&inner);
        let cancel = cancel.child_token();
        tokio::spawn(async move {
            if let Err(e) = serve_connection(inner, stream, client, cancel).await {
                debug!(client = %client, error = %e, "TCP DNS connection closed");
            }
        });
    }
}

async fn serve_connection(
    inner: Arc<ProxyInner>,
    mut stream: TcpStream,
    client: SocketAddr,
    cancel: CancellationToken,
) -> DnsResult<()> {
    let read_timeout = inner.cfg.read_timeout;
    let write_timeout = inner.cfg.write_timeout;
    let max_queries = inner.cfg.max_tcp_queries;
    let mut served: u32 = 0;

    loop {
        if max_queries > 0 && served >= max_queries {
            debug!(client = %client, served, "per-connection query limit reached");
            return Ok(());
        }

        let query = tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            read = read_frame(&mut stream, read_timeout) => match read? {
                Some(query) => query,
                None => return Ok(()), // client closed
            },
        };

        served += 1;
        let Some(response) = inner.relay(query, client).await else {
            // upstream failed: drop the connection unanswered
            return Ok(());
        };

        write_frame(&mut stream, &response, write_timeout).await?;
    }
}

async fn read_frame(
    stream: &mut TcpStream,
    deadline: std::time::Duration,
) -> DnsResult<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 2];
    match timeout(deadline, stream.read_exact(&mut len_buf)).await {
        Err(_) => return Err(DnsError::timeout("TCP query read", deadline)),
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Ok(Err(e)) => return Err(DnsError::network_io("TCP query read failed", e)),
        Ok(Ok(_)) => {}
    }

    let len = usize::from(u16::from_be_bytes(len_buf));
    if len == 0 || len > MAX_TCP_MESSAGE_SIZE {
        return Err(DnsError::network(format!("invalid TCP frame length {len}")));
    }

    let mut buf = vec![0u8; len];
    timeout(deadline, stream.read_exact(&mut buf))
        .await
        .map_err(|_| DnsError::timeout("TCP query read", deadline))?
        .map_err(|e| DnsError::network_io("TCP query read failed", e))?;
    Ok(Some(buf))
}

async fn write_frame(
    stream: &mut TcpStream,
    response: &[u8],
    deadline: std::time::Duration,
) -> DnsResult<()> {
    let len = u16::try_from(response.len())
        .map_err(|_| DnsError::network("response exceeds DNS message size"))?;

    timeout(deadline, async {
        stream.write_all(&len.to_be_bytes()).await?;
        stream.write_all(response).await?;
        stream.flush().await
    })
    .await
    .map_err(|_| DnsError::timeout("TCP response write", deadline))?
    .map_err(|e| DnsError::network_io("TCP response write failed", e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::client::UpstreamExchanger;
    use crate::dns::config::{DnsClientConfig, DnsServerConfig, UpstreamAddr};
    use crate::dns::server::ProxyStats;
    use crate::dns::types::{ObservationSink, ResolvedRecord};
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::net::{TcpListener, UdpSocket};

    struct NullSink;

    #[async_trait]
    impl ObservationSink for NullSink {
        async fn on_resolved(&self, _record: ResolvedRecord) {}
    }

    async fn spawn_udp_upstream(response: Vec<u8>) -> SocketAddr {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            loop {
                let Ok((_, src)) = socket.recv_from(&mut buf).await else {
                    return;
                };
                let _ = socket.send_to(&response, src).await;
            }
        });
        addr
    }

    fn inner_with_upstream(upstream: SocketAddr, max_tcp_queries: u32) -> Arc<ProxyInner> {
        let mut cfg = DnsServerConfig::default();
        cfg.max_tcp_queries = max_tcp_queries;
        cfg.read_timeout = Duration::from_millis(500);
        cfg.write_timeout = Duration::from_millis(500);

        Arc::new(ProxyInner {
            cfg,
            exchanger: UpstreamExchanger::new(DnsClientConfig {
                upstream: UpstreamAddr::parse(&format!("udp://{upstream}")).unwrap(),
                dial_timeout: Duration::from_millis(500),
                read_timeout: Duration::from_millis(500),
                write_timeout: Duration::from_millis(500),
            }),
            sink: Arc::new(NullSink),
            filters: Vec::new(),
            stats: ProxyStats::default(),
        })
    }

    #[tokio::test]
    async fn relays_framed_queries() {
        let upstream = spawn_udp_upstream(b"answer".to_vec()).await;
        let inner = inner_with_upstream(upstream, 0);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let cancel = CancellationToken::new();
        tokio::spawn(serve(inner, addr, cancel.clone()));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(&5u16.to_be_bytes()).await.unwrap();
        client.write_all(b"query").await.unwrap();

        let mut len_buf = [0u8; 2];
        client.read_exact(&mut len_buf).await.unwrap();
        let mut buf = vec![0u8; usize::from(u16::from_be_bytes(len_buf))];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, b"answer");

        cancel.cancel();
    }

    #[tokio::test]
    async fn query_limit_closes_connection() {
        let upstream = spawn_udp_upstream(b"answer".to_vec()).await;
        let inner = inner_with_upstream(upstream, 1);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let cancel = CancellationToken::new();
        tokio::spawn(serve(inner, addr, cancel.clone()));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        for _ in 0..2 {
            client.write_all(&5u16.to_be_bytes()).await.unwrap();
            client.write_all(b"query").await.unwrap();
        }

        let mut len_buf = [0u8; 2];
        client.read_exact(&mut len_buf).await.unwrap();
        let mut buf = vec![0u8; usize::from(u16::from_be_bytes(len_buf))];
        client.read_exact(&mut buf).await.unwrap();

        // second query is never answered, the server closes after one
        let eof = tokio::time::timeout(Duration::from_secs(2), client.read_exact(&mut len_buf))
            .await
            .expect("connection closed in time");
        assert!(eof.is_err());

        cancel.cancel();
    }
}
