//! HTTP client for an engine's control API

use crate::error::{RemoteError, Result};
use crate::registry::DeviceId;
use dm_common::protocol::TempoRequest;
use dm_common::StatusPayload;
use std::fmt;
use std::time::Duration;
use tracing::debug;

const USER_AGENT: &str = concat!("dm-remote/", env!("CARGO_PKG_VERSION"));

/// Write operations a remote can issue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    SetTempo(u32),
}

impl Command {
    fn path(&self) -> &'static str {
        match self {
            Command::Start => "/start",
            Command::Stop => "/stop",
            Command::SetTempo(_) => "/tempo",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Start => write!(f, "start"),
            Command::Stop => write!(f, "stop"),
            Command::SetTempo(bpm) => write!(f, "tempo {}", bpm),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ControlClient {
    http_client: reqwest::Client,
}

impl ControlClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;
        Ok(Self { http_client })
    }

    /// GET /status
    pub async fn status(&self, device: DeviceId) -> Result<StatusPayload> {
        let url = format!("{}/status", device.base_url());
        let response = self.http_client.get(&url).send().await?;
        Self::decode(device, response).await
    }

    /// Send a command and return the status document it answered with
    pub async fn send(&self, device: DeviceId, command: Command) -> Result<StatusPayload> {
        let url = format!("{}{}", device.base_url(), command.path());
        debug!(device = %device, command = %command, "Issuing command");

        let request = self.http_client.post(&url);
        let request = match command {
            Command::SetTempo(bpm) => request.json(&TempoRequest { bpm }),
            Command::Start | Command::Stop => request,
        };
        let response = request.send().await?;
        Self::decode(device, response).await
    }

    async fn decode(device: DeviceId, response: reqwest::Response) -> Result<StatusPayload> {
        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(RemoteError::Transient(format!(
                "{} answered {}: {}",
                device, status, error_text
            )));
        }

        let bytes = response.bytes().await?;
        StatusPayload::decode(&bytes)
            .map_err(|e| RemoteError::Malformed(format!("{}: {}", device, e)))
    }
}
