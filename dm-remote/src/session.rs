//! Remote controller session
//!
//! Owns the device registry, the selected device and its poll task. Scans,
//! polls and commands run independently: a poll in flight never delays a
//! command, and each command schedules its own status refresh.

use crate::client::{Command, ControlClient};
use crate::discovery::DiscoveryClient;
use crate::error::{RemoteError, Result};
use crate::registry::{DeviceId, DeviceRecord, DeviceRegistry, Observation, ScanDiff};
use dm_common::Settings;
use dm_common::StatusPayload;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

/// State shared with the poll and refresh tasks
struct Shared {
    client: ControlClient,
    registry: RwLock<DeviceRegistry>,
    selected: watch::Sender<Option<DeviceRecord>>,
    adjusting: AtomicBool,
}

impl Shared {
    fn selected_id(&self) -> Option<DeviceId> {
        self.selected.borrow().as_ref().map(|record| record.id)
    }

    /// Merge a reply for a device the registry already holds
    ///
    /// Replies for devices a scan has since dropped are discarded.
    async fn apply(&self, id: DeviceId, status: StatusPayload, requested_at: Instant) -> bool {
        self.merge(id, status, requested_at, false).await
    }

    /// Merge a reply and republish it if it concerns the selected device
    async fn merge(
        &self,
        id: DeviceId,
        status: StatusPayload,
        requested_at: Instant,
        admit: bool,
    ) -> bool {
        let mut registry = self.registry.write().await;
        if !admit && !registry.contains(&id) {
            trace!("Reply from {} dropped: no longer registered", id);
            return false;
        }
        if !registry.observe(Observation::new(id, status, requested_at)) {
            return false;
        }
        if self.selected_id() == Some(id) {
            let record = registry.get(&id).cloned();
            self.selected.send_if_modified(|current| {
                if *current != record {
                    *current = record;
                    true
                } else {
                    false
                }
            });
        }
        true
    }

    /// Fetch and apply the device's status, logging failures
    async fn refresh(&self, id: DeviceId) -> bool {
        let requested_at = Instant::now();
        match self.client.status(id).await {
            Ok(status) => self.apply(id, status, requested_at).await,
            Err(e) => {
                debug!("Status refresh of {} failed: {}", id, e);
                false
            }
        }
    }

    /// One periodic poll; skipped or dropped while an adjustment is open
    async fn poll(&self, id: DeviceId) {
        if self.adjusting.load(Ordering::Acquire) {
            trace!("Poll of {} skipped during adjustment", id);
            return;
        }
        let requested_at = Instant::now();
        match self.client.status(id).await {
            Ok(status) => {
                if self.adjusting.load(Ordering::Acquire) {
                    trace!("Poll reply from {} dropped during adjustment", id);
                    return;
                }
                self.apply(id, status, requested_at).await;
            }
            Err(e) => debug!("Poll of {} failed: {}", id, e),
        }
    }
}

struct Poller {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct RemoteController {
    discovery: DiscoveryClient,
    poll_interval: Duration,
    shared: Arc<Shared>,
    poller: Mutex<Option<Poller>>,
}

impl RemoteController {
    pub fn new(discovery: DiscoveryClient, client: ControlClient, poll_interval: Duration) -> Self {
        let (selected, _) = watch::channel(None);
        Self {
            discovery,
            poll_interval,
            shared: Arc::new(Shared {
                client,
                registry: RwLock::new(DeviceRegistry::new()),
                selected,
                adjusting: AtomicBool::new(false),
            }),
            poller: Mutex::new(None),
        }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let discovery = DiscoveryClient::new(
            settings.remote.discovery_port,
            Duration::from_millis(settings.client.scan_window_ms),
        );
        let client = ControlClient::new(Duration::from_millis(settings.client.request_timeout_ms))?;
        Ok(Self::new(
            discovery,
            client,
            Duration::from_millis(settings.client.poll_interval_ms),
        ))
    }

    /// Probe the network and replace the registry with whoever answered
    ///
    /// On failure the registry keeps its previous contents.
    pub async fn scan(&self) -> Result<ScanDiff> {
        let replies = self.discovery.scan().await?;
        let diff = self.shared.registry.write().await.reconcile(replies);
        info!(
            "Scan found {} device(s): {} new, {} gone",
            diff.added.len() + diff.retained.len(),
            diff.added.len(),
            diff.removed.len()
        );

        // Keep the selection view in step with the registry
        if let Some(id) = self.shared.selected_id() {
            if diff.removed.contains(&id) {
                info!("Selected device {} no longer answers; deselecting", id);
                self.deselect().await;
            } else {
                let record = self.shared.registry.read().await.get(&id).cloned();
                if let Some(record) = record {
                    self.shared.selected.send_replace(Some(record));
                }
            }
        }
        Ok(diff)
    }

    pub async fn devices(&self) -> Vec<DeviceRecord> {
        self.shared.registry.read().await.devices()
    }

    pub async fn device(&self, id: DeviceId) -> Option<DeviceRecord> {
        self.shared.registry.read().await.get(&id).cloned()
    }

    /// Fetch a device's status directly and add it to the registry
    ///
    /// Used for devices given by address rather than found by a scan.
    pub async fn connect(&self, id: DeviceId) -> Result<DeviceRecord> {
        let requested_at = Instant::now();
        let status = self.shared.client.status(id).await?;
        self.shared.merge(id, status, requested_at, true).await;
        self.device(id).await.ok_or(RemoteError::UnknownDevice(id))
    }

    /// Make `id` the active target and start polling it
    ///
    /// Replaces any previous selection and its poll task.
    pub async fn select(&self, id: DeviceId) -> Result<DeviceRecord> {
        let record = self
            .device(id)
            .await
            .ok_or(RemoteError::UnknownDevice(id))?;

        let mut poller = self.poller.lock().await;
        if let Some(previous) = poller.take() {
            previous.cancel.cancel();
        }
        self.shared.selected.send_replace(Some(record.clone()));

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(poll_loop(
            Arc::clone(&self.shared),
            id,
            self.poll_interval,
            cancel.clone(),
        ));
        *poller = Some(Poller { cancel, handle });

        info!("Selected {} ({})", id, record.name);
        Ok(record)
    }

    /// Leave the selected-device context and stop polling
    pub async fn deselect(&self) {
        if let Some(previous) = self.poller.lock().await.take() {
            previous.cancel.cancel();
            if let Err(e) = previous.handle.await {
                debug!("Poll task ended abnormally: {}", e);
            }
        }
        self.shared.selected.send_replace(None);
    }

    pub fn selected(&self) -> Option<DeviceId> {
        self.shared.selected_id()
    }

    /// Follow the selected device's record as polls and commands update it
    pub fn watch_selected(&self) -> watch::Receiver<Option<DeviceRecord>> {
        self.shared.selected.subscribe()
    }

    /// Suspend polling while a local tempo gesture is in progress
    pub fn begin_adjust(&self) {
        self.shared.adjusting.store(true, Ordering::Release);
    }

    pub fn end_adjust(&self) {
        self.shared.adjusting.store(false, Ordering::Release);
    }

    pub fn is_adjusting(&self) -> bool {
        self.shared.adjusting.load(Ordering::Acquire)
    }

    /// Send a command to the selected device
    ///
    /// The reply is applied at once, and a follow-up status refresh is
    /// scheduled whether or not the command succeeded.
    pub async fn issue(&self, command: Command) -> Result<StatusPayload> {
        let id = self.selected().ok_or(RemoteError::NoDeviceSelected)?;
        let requested_at = Instant::now();
        let result = self.shared.client.send(id, command).await;

        if let Ok(status) = &result {
            self.shared.apply(id, status.clone(), requested_at).await;
        }

        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            shared.refresh(id).await;
        });

        result
    }

    /// Fetch the selected device's status now
    pub async fn refresh(&self) -> Result<bool> {
        let id = self.selected().ok_or(RemoteError::NoDeviceSelected)?;
        Ok(self.shared.refresh(id).await)
    }
}

impl Drop for RemoteController {
    fn drop(&mut self) {
        if let Some(poller) = self.poller.get_mut().take() {
            poller.cancel.cancel();
        }
    }
}

async fn poll_loop(shared: Arc<Shared>, id: DeviceId, period: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    debug!("Polling {} every {:?}", id, period);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = shared.poll(id) => {}
        }
    }
    debug!("Stopped polling {}", id);
}
