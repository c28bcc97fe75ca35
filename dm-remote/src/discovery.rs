//! Discovery client
//!
//! Broadcasts the discovery token more than once, since a single datagram
//! may be lost, and collects every status reply that arrives inside the
//! scan window. Replies that do not decode are skipped.

use crate::error::Result;
use crate::registry::{DeviceId, Observation};
use dm_common::protocol::DISCOVERY_MAGIC;
use dm_common::StatusPayload;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

/// Number of probes sent per scan
pub const PROBE_COUNT: u32 = 2;

/// Gap between consecutive probes
pub const PROBE_GAP: Duration = Duration::from_millis(150);

const RECV_BUFFER: usize = 2048;

#[derive(Debug, Clone)]
pub struct DiscoveryClient {
    target: SocketAddr,
    probes: u32,
    probe_gap: Duration,
    window: Duration,
}

impl DiscoveryClient {
    /// Broadcast scanner for the given discovery port
    pub fn new(discovery_port: u16, window: Duration) -> Self {
        Self::with_target(
            SocketAddr::from((Ipv4Addr::BROADCAST, discovery_port)),
            window,
        )
    }

    /// Scanner probing one specific address instead of broadcasting
    pub fn with_target(target: SocketAddr, window: Duration) -> Self {
        Self {
            target,
            probes: PROBE_COUNT,
            probe_gap: PROBE_GAP,
            window,
        }
    }

    /// Probe and collect replies until the window closes
    ///
    /// The window is measured from the first probe. Fails only when the
    /// socket cannot be opened or no probe could be sent at all.
    pub async fn scan(&self) -> Result<Vec<Observation>> {
        let bind_addr = if self.target.is_ipv4() {
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
        } else {
            SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
        };
        let socket = UdpSocket::bind(bind_addr).await?;
        socket.set_broadcast(true)?;

        let started = Instant::now();
        let deadline = started + self.window;
        let mut next_probe = started;
        let mut sent = 0u32;
        let mut delivered = 0u32;
        let mut last_send_error = None;
        let mut replies = Vec::new();
        let mut buf = [0u8; RECV_BUFFER];

        debug!("Scanning {} for {:?}", self.target, self.window);

        loop {
            if sent < self.probes && Instant::now() >= next_probe {
                match socket.send_to(DISCOVERY_MAGIC, self.target).await {
                    Ok(_) => delivered += 1,
                    Err(e) => {
                        debug!("Discovery probe to {} failed: {}", self.target, e);
                        last_send_error = Some(e);
                    }
                }
                sent += 1;
                next_probe += self.probe_gap;
            }

            let wake = if sent < self.probes {
                next_probe.min(deadline)
            } else {
                deadline
            };

            match timeout_at(wake, socket.recv_from(&mut buf)).await {
                Err(_) => {
                    if Instant::now() >= deadline {
                        break;
                    }
                }
                Ok(Ok((len, peer))) => match StatusPayload::decode(&buf[..len]) {
                    Ok(status) => {
                        let id = DeviceId::new(peer.ip(), status.http_port);
                        debug!("Discovery reply from {} ({})", id, status.name);
                        replies.push(Observation::new(id, status, started));
                    }
                    Err(e) => debug!("Ignoring malformed reply from {}: {}", peer, e),
                },
                Ok(Err(e)) => {
                    debug!("Discovery receive error: {}", e);
                    if Instant::now() >= deadline {
                        break;
                    }
                }
            }
        }

        if delivered == 0 {
            if let Some(e) = last_send_error {
                warn!("No discovery probe could be sent to {}", self.target);
                return Err(e.into());
            }
        }

        Ok(replies)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test helper: fake engine answering every datagram with `reply`
    async fn fake_responder(reply: Vec<u8>) -> SocketAddr {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 256];
            while let Ok((_, peer)) = socket.recv_from(&mut buf).await {
                let _ = socket.send_to(&reply, peer).await;
            }
        });
        addr
    }

    #[tokio::test]
    async fn test_scan_collects_reply_per_probe() {
        let reply = br#"{"name":"Kit","http_port":46000,"bpm":132,"running":true}"#.to_vec();
        let target = fake_responder(reply).await;

        let client = DiscoveryClient::with_target(target, Duration::from_millis(400));
        let replies = client.scan().await.unwrap();

        // One reply per probe, same device
        assert_eq!(replies.len(), PROBE_COUNT as usize);
        for reply in &replies {
            assert_eq!(reply.id, DeviceId::new(target.ip(), 46000));
            assert_eq!(reply.status.bpm, 132);
            assert!(reply.status.running);
        }
    }

    #[tokio::test]
    async fn test_partial_reply_uses_defaults() {
        let target = fake_responder(br#"{"bpm":90}"#.to_vec()).await;
        let client = DiscoveryClient::with_target(target, Duration::from_millis(300));
        let replies = client.scan().await.unwrap();

        let first = &replies[0];
        assert_eq!(first.status.name, dm_common::protocol::DEFAULT_NAME);
        assert_eq!(first.id.port, dm_common::protocol::HTTP_PORT);
        assert_eq!(first.status.bpm, 90);
    }

    #[tokio::test]
    async fn test_malformed_replies_are_ignored() {
        let target = fake_responder(b"not json".to_vec()).await;
        let client = DiscoveryClient::with_target(target, Duration::from_millis(300));
        assert!(client.scan().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_silent_network_yields_empty_scan() {
        // Bound but never answers
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = silent.local_addr().unwrap();

        let client = DiscoveryClient::with_target(target, Duration::from_millis(250));
        let started = std::time::Instant::now();
        let replies = client.scan().await.unwrap();
        assert!(replies.is_empty());
        assert!(started.elapsed() >= Duration::from_millis(250));
    }
}
