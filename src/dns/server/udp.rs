//! UDP listener of the observation proxy

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use super::ProxyInner;
use crate::dns::error::{DnsError, DnsResult};

/// Largest query accepted over UDP (EDNS0 payloads included)
pub const MAX_UDP_MESSAGE_SIZE: usize = 4096;

/// Serve one UDP endpoint until cancelled
///
/// Each datagram is handled in its own task so a slow upstream exchange for
/// one client never blocks the receive loop.
pub(crate) async fn serve(
    inner: Arc<ProxyInner>,
    addr: SocketAddr,
    cancel: CancellationToken,
) -> DnsResult<()> {
    let socket = Arc::new(
        UdpSocket::bind(addr)
            .await
            .map_err(|e| DnsError::network_io(format!("failed to bind udp://{addr}"), e))?,
    );
    info!(addr = %addr, "UDP DNS listener bound");

    let mut buf = vec![0u8; MAX_UDP_MESSAGE_SIZE];
    loop {
        let (len, client) = tokio::select! {
            () = cancel.cancelled() => {
                info!(addr = %addr, "UDP DNS listener shutting down");
                return Ok(());
            }
            received = socket.recv_from(&mut buf) => match received {
                Ok(received) => received,
                Err(e) => {
                    debug!(addr = %addr, error = %e, "UDP recv failed");
                    continue;
                }
            },
        };

        trace!(client = %client, len, "received UDP query");
        let query = buf[..len].to_vec();
        let inner = Arc::clone(&inner);
        let socket = Arc::clone(&socket);

        tokio::spawn(async move {
            // an upstream failure produces no reply, the client retries
            if let Some(response) = inner.relay(query, client).await {
                if let Err(e) = socket.send_to(&response, client).await {
                    debug!(client = %client, error = %e, "failed to send UDP response");
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::client::UpstreamExchanger;
    use crate::dns::config::{DnsClientConfig, DnsServerConfig, UpstreamAddr};
    use crate::dns::types::{ObservationSink, ResolvedRecord};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingSink {
        seen: Mutex<Vec<ResolvedRecord>>,
    }

    #[async_trait]
    impl ObservationSink for RecordingSink {
        async fn on_resolved(&self, record: ResolvedRecord) {
            self.seen.lock().push(record);
        }
    }

    /// Upstream that answers every query with a fixed response
    async fn spawn_upstream(response: Vec<u8>) -> SocketAddr {
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

    fn a_response(query_name: &str, ip: [u8; 4]) -> Vec<u8> {
        use hickory_proto::op::{Message, MessageType, OpCode, Query};
        use hickory_proto::rr::rdata::A;
        use hickory_proto::rr::{Name, RData, Record, RecordType};
        use std::str::FromStr;

        let name = Name::from_str(query_name).unwrap();
        let mut msg = Message::new();
        msg.set_id(0x0101);
        msg.set_message_type(MessageType::Response);
        msg.set_op_code(OpCode::Query);
        msg.add_query(Query::query(name.clone(), RecordType::A));
        msg.add_answer(Record::from_rdata(name, 300, RData::A(A(ip.into()))));
        msg.to_vec().unwrap()
    }

    fn a_query(query_name: &str) -> Vec<u8> {
        use hickory_proto::op::{Message, MessageType, OpCode, Query};
        use hickory_proto::rr::{Name, RecordType};
        use std::str::FromStr;

        let mut msg = Message::new();
        msg.set_id(0x0101);
        msg.set_message_type(MessageType::Query);
        msg.set_op_code(OpCode::Query);
        msg.add_query(Query::query(Name::from_str(query_name).unwrap(), RecordType::A));
        msg.to_vec().unwrap()
    }

    #[tokio::test]
    async fn forwards_verbatim_and_observes() {
        let response = a_response("www.example.com.", [1, 2, 3, 4]);
        let upstream = spawn_upstream(response.clone()).await;

        let sink = Arc::new(RecordingSink::default());
        let inner = Arc::new(ProxyInner {
            cfg: DnsServerConfig::default(),
            exchanger: UpstreamExchanger::new(DnsClientConfig {
                upstream: UpstreamAddr::parse(&format!("udp://{upstream}")).unwrap(),
                dial_timeout: Duration::from_millis(500),
                read_timeout: Duration::from_millis(500),
                write_timeout: Duration::from_millis(500),
            }),
            sink: sink.clone(),
            filters: Vec::new(),
            stats: super::super::ProxyStats::default(),
        });

        let cancel = CancellationToken::new();
        let listen: SocketAddr = "127.0.0.1:0".parse().unwrap();
        // bind through a scratch socket first to learn a free port
        let scratch = UdpSocket::bind(listen).await.unwrap();
        let listen = scratch.local_addr().unwrap();
        drop(scratch);

        let server = tokio::spawn(serve(Arc::clone(&inner), listen, cancel.clone()));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(&a_query("www.example.com."), listen).await.unwrap();

        let mut buf = [0u8; 512];
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), client.recv_from(&mut buf))
            .await
            .expect("proxy answered")
            .unwrap();

        // response relayed verbatim
        assert_eq!(&buf[..len], response.as_slice());

        // observation emitted for the A answer
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if !sink.seen.lock().is_empty() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("observation emitted");

        let seen = sink.seen.lock().clone();
        assert_eq!(seen[0].fqdn, "www.example.com.");
        assert_eq!(seen[0].ip, "1.2.3.4".parse::<std::net::IpAddr>().unwrap());

        cancel.cancel();
        let _ = server.await;
    }
}
