//! Discovery responder
//!
//! Answers UDP broadcast probes carrying the discovery token with a unicast
//! JSON status document. Stateless: each probe gets exactly one reply and
//! clients are expected to probe more than once.

use crate::error::{Error, Result};
use crate::scheduler::BeatScheduler;
use crate::status::InstanceInfo;
use dm_common::protocol::is_discovery_probe;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Largest datagram read; probes are far smaller
const RECV_BUFFER: usize = 1024;

pub struct DiscoveryResponder {
    socket: UdpSocket,
    scheduler: Arc<BeatScheduler>,
    info: Arc<InstanceInfo>,
}

impl DiscoveryResponder {
    /// Bind the responder socket
    pub async fn bind(
        addr: SocketAddr,
        scheduler: Arc<BeatScheduler>,
        info: Arc<InstanceInfo>,
    ) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| Error::Discovery(format!("Failed to bind {}: {}", addr, e)))?;
        socket.set_broadcast(true)?;
        Ok(Self {
            socket,
            scheduler,
            info,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Serve probes until cancelled
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        info!("Discovery responder listening on {}", self.local_addr()?);
        let mut buf = [0u8; RECV_BUFFER];
        loop {
            let received = tokio::select! {
                _ = cancel.cancelled() => break,
                received = self.socket.recv_from(&mut buf) => received,
            };

            let (len, peer) = match received {
                Ok(received) => received,
                Err(e) => {
                    // e.g. ICMP port unreachable surfaced on the next read
                    debug!("Discovery receive error: {}", e);
                    continue;
                }
            };
            if !is_discovery_probe(&buf[..len]) {
                continue;
            }
            self.reply(peer).await;
        }
        info!("Discovery responder stopped");
        Ok(())
    }

    async fn reply(&self, peer: SocketAddr) {
        let status = self.info.status(&self.scheduler).await;
        let bytes = match status.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Failed to encode discovery reply: {}", e);
                return;
            }
        };
        match self.socket.send_to(&bytes, peer).await {
            Ok(_) => debug!("Answered discovery probe from {}", peer),
            Err(e) => debug!("Discovery reply to {} failed: {}", peer, e),
        }
    }
}
