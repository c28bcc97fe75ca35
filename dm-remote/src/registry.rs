//! Known devices and the last state each one reported
//!
//! A device is identified by the address it answered from plus the control
//! port it advertised. Every reply carries the instant its request was sent,
//! and a reply older than the one already applied is discarded, so a slow
//! poll can never overwrite the result of a newer command.

use dm_common::StatusPayload;
use std::collections::BTreeMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use tokio::time::Instant;

/// Identity of a remote engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId {
    pub addr: IpAddr,
    pub port: u16,
}

impl DeviceId {
    pub fn new(addr: IpAddr, port: u16) -> Self {
        Self { addr, port }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.addr, self.port)
    }

    /// Base URL of the device's control API
    pub fn base_url(&self) -> String {
        format!("http://{}", self.socket_addr())
    }
}

impl From<SocketAddr> for DeviceId {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip(), addr.port())
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.socket_addr())
    }
}

impl FromStr for DeviceId {
    type Err = std::net::AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<SocketAddr>().map(DeviceId::from)
    }
}

/// Last known state of one device
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceRecord {
    pub id: DeviceId,
    pub name: String,
    pub last_known_bpm: u32,
    pub last_known_running: bool,
    /// When the most recent applied reply arrived
    pub last_seen: Instant,
    /// When the request behind the most recent applied reply was sent
    pub requested_at: Instant,
}

impl DeviceRecord {
    fn from_observation(observation: Observation) -> Self {
        Self {
            id: observation.id,
            name: observation.status.name,
            last_known_bpm: observation.status.bpm,
            last_known_running: observation.status.running,
            last_seen: observation.received_at,
            requested_at: observation.requested_at,
        }
    }
}

/// One status reply, tagged with its request time
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub id: DeviceId,
    pub status: StatusPayload,
    pub requested_at: Instant,
    pub received_at: Instant,
}

impl Observation {
    pub fn new(id: DeviceId, status: StatusPayload, requested_at: Instant) -> Self {
        Self {
            id,
            status,
            requested_at,
            received_at: Instant::now(),
        }
    }
}

/// Outcome of reconciling a scan against the previous registry contents
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanDiff {
    pub added: Vec<DeviceId>,
    pub retained: Vec<DeviceId>,
    pub removed: Vec<DeviceId>,
}

impl ScanDiff {
    pub fn is_unchanged(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Devices keyed by identity
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    records: BTreeMap<DeviceId, DeviceRecord>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: &DeviceId) -> Option<&DeviceRecord> {
        self.records.get(id)
    }

    pub fn contains(&self, id: &DeviceId) -> bool {
        self.records.contains_key(id)
    }

    /// Records ordered by identity
    pub fn devices(&self) -> Vec<DeviceRecord> {
        self.records.values().cloned().collect()
    }

    /// Merge one reply
    ///
    /// Returns false when the reply is older than the one already applied
    /// for this device, in which case nothing changes.
    pub fn observe(&mut self, observation: Observation) -> bool {
        match self.records.get_mut(&observation.id) {
            Some(record) if observation.requested_at < record.requested_at => {
                tracing::trace!(
                    device = %observation.id,
                    "Discarding stale status reply"
                );
                false
            }
            Some(record) => {
                *record = DeviceRecord::from_observation(observation);
                true
            }
            None => {
                self.records
                    .insert(observation.id, DeviceRecord::from_observation(observation));
                true
            }
        }
    }

    /// Replace the registry with the result of a scan
    ///
    /// Duplicate replies from one device merge into a single record. Devices
    /// that did not answer are dropped.
    pub fn reconcile(&mut self, replies: Vec<Observation>) -> ScanDiff {
        let mut fresh = DeviceRegistry::new();
        for reply in replies {
            fresh.observe(reply);
        }

        let mut diff = ScanDiff::default();
        for id in fresh.records.keys() {
            if self.records.contains_key(id) {
                diff.retained.push(*id);
            } else {
                diff.added.push(*id);
            }
        }
        for id in self.records.keys() {
            if !fresh.records.contains_key(id) {
                diff.removed.push(*id);
            }
        }

        self.records = fresh.records;
        diff
    }
}
