// ── Device coordinator ──
//
// Lifecycle owner for the sync engine. Discovers devices, seeds the
// canonical store, and runs one monitor per device plus the debouncer,
// the trigger router and the push listener. Reads never touch the
// network; writes to an entry go through that entry's monitor.

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use chrono::Utc;
use climate_cloud::{CloudClient, CommandAck, CommandKind, CommandPayload, DeviceDescriptor, Error};
use dashmap::DashMap;
use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::CoordinatorConfig;
use crate::control::Control;
use crate::debounce::{Debouncer, Released};
use crate::error::CoreError;
use crate::hub::{SubscriberHub, Subscription};
use crate::listener::{CloudListener, ListenerState};
use crate::model::{DeviceId, DeviceState, Staleness, StateDelta, TriggerReason};
use crate::monitor::{MonitorContext, MonitorHandle, MonitorMessage, MonitorStatus, spawn_monitor};
use crate::notify::{ChangeListeners, ListenerId};
use crate::single_flight::SingleFlight;
use crate::store::DeviceStore;

type MonitorMap = DashMap<DeviceId, MonitorHandle>;

/// Outcome of [`DeviceCoordinator::rediscover`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RediscoveryReport {
    pub added: Vec<DeviceId>,
    pub removed: Vec<DeviceId>,
}

impl RediscoveryReport {
    pub fn is_unchanged(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

// ── DeviceCoordinator ────────────────────────────────────────────────

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<CoordinatorInner>`. Constructed idle: call
/// [`start()`](Self::start) to discover devices and spawn background
/// tasks, [`shutdown()`](Self::shutdown) to stop them.
pub struct DeviceCoordinator<C: CloudClient> {
    inner: Arc<CoordinatorInner<C>>,
}

impl<C: CloudClient> Clone for DeviceCoordinator<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct CoordinatorInner<C> {
    client: Arc<C>,
    config: Arc<CoordinatorConfig>,
    store: Arc<DeviceStore>,
    listeners: Arc<ChangeListeners>,
    hub: SubscriberHub,
    flights: SingleFlight<DeviceId>,
    monitors: Arc<MonitorMap>,
    debouncer: OnceLock<Debouncer>,
    listener_state: watch::Sender<ListenerState>,
    started: AtomicBool,
    cancel: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl<C: CloudClient> DeviceCoordinator<C> {
    /// Create a coordinator over `client`. Does NOT touch the network.
    pub fn new(client: Arc<C>, config: CoordinatorConfig) -> Self {
        let hub = SubscriberHub::new(config.subscriber_queue_capacity);
        let listeners = Arc::new(ChangeListeners::new());
        let fanout = hub.clone();
        listeners.register(Arc::new(move |state| fanout.broadcast(state)));
        let (listener_state, _) = watch::channel(ListenerState::Disconnected);

        Self {
            inner: Arc::new(CoordinatorInner {
                client,
                config: Arc::new(config),
                store: Arc::new(DeviceStore::new()),
                listeners,
                hub,
                flights: SingleFlight::new(),
                monitors: Arc::new(DashMap::new()),
                debouncer: OnceLock::new(),
                listener_state,
                started: AtomicBool::new(false),
                cancel: CancellationToken::new(),
                task_handles: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.inner.config
    }

    /// Access the canonical store.
    pub fn store(&self) -> &Arc<DeviceStore> {
        &self.inner.store
    }

    pub fn client(&self) -> &Arc<C> {
        &self.inner.client
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Discover devices and spawn the background tasks.
    ///
    /// Discovery is retried `discovery_attempts` times. Each discovered
    /// device gets a monitor that performs an initial fetch.
    pub async fn start(&self) -> Result<(), CoreError> {
        if self.inner.cancel.is_cancelled() {
            return Err(CoreError::ShuttingDown);
        }
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(CoreError::AlreadyStarted);
        }

        let descriptors = match self.discover().await {
            Ok(descriptors) => descriptors,
            Err(e) => {
                self.inner.started.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };
        self.inner.store.seed(&descriptors);

        let config = &self.inner.config;
        let (debouncer, released, debounce_task) =
            Debouncer::spawn(config.debounce_window, self.inner.cancel.child_token());
        let _ = self.inner.debouncer.set(debouncer.clone());

        let mut handles = self.inner.task_handles.lock().await;
        handles.push(debounce_task);
        handles.push(tokio::spawn(route_released(
            released,
            Arc::clone(&self.inner.monitors),
            self.inner.cancel.clone(),
        )));

        let ctx = self.monitor_context(debouncer);
        for id in self.inner.store.ids().iter() {
            self.spawn_monitor(&ctx, id.clone());
        }

        if config.push_enabled {
            let listener = CloudListener::new(self.clone(), config.reconnect.clone());
            handles.push(tokio::spawn(listener.run(self.inner.cancel.child_token())));
        }

        info!(devices = self.inner.store.len(), "coordinator started");
        Ok(())
    }

    /// Stop every background task. In-flight fetches get
    /// `shutdown_grace` to finish before they are aborted. Idempotent.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();

        let ids: Vec<DeviceId> = self.inner.monitors.iter().map(|e| e.key().clone()).collect();
        let monitor_tasks: Vec<JoinHandle<()>> = ids
            .iter()
            .filter_map(|id| self.inner.monitors.remove(id))
            .map(|(_, handle)| handle.task)
            .collect();
        join_all(monitor_tasks).await;

        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        drop(handles);

        self.inner.hub.close_all();
        self.set_listener_state(ListenerState::Disconnected);
        debug!("coordinator stopped");
    }

    pub fn is_running(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst) && !self.inner.cancel.is_cancelled()
    }

    /// List devices once and reconcile the monitor set: new ids get a
    /// monitor, vanished ids lose theirs and their entry.
    pub async fn rediscover(&self) -> Result<RediscoveryReport, CoreError> {
        let debouncer = self.running_debouncer()?.clone();
        let descriptors = self.list_devices_once().await?;

        let listed: HashSet<&DeviceId> = descriptors.iter().map(|d| &d.id).collect();
        let removed: Vec<DeviceId> = self
            .inner
            .store
            .ids()
            .iter()
            .filter(|id| !listed.contains(id))
            .cloned()
            .collect();

        for id in &removed {
            if let Some((_, handle)) = self.inner.monitors.remove(id) {
                handle.cancel.cancel();
            }
            self.inner.store.remove(id);
        }

        let added = self.inner.store.seed(&descriptors);
        let ctx = self.monitor_context(debouncer);
        for id in &added {
            self.spawn_monitor(&ctx, id.clone());
        }

        let report = RediscoveryReport { added, removed };
        if !report.is_unchanged() {
            info!(
                added = report.added.len(),
                removed = report.removed.len(),
                "device set changed"
            );
        }
        Ok(report)
    }

    // ── Reads ────────────────────────────────────────────────────────

    /// Current entry for `id`. Never waits on the network.
    pub fn snapshot(&self, id: &DeviceId) -> Option<Arc<DeviceState>> {
        self.inner.store.get(id)
    }

    /// Every entry, in discovery order.
    pub fn all_snapshots(&self) -> Vec<Arc<DeviceState>> {
        self.inner.store.all()
    }

    /// [`snapshot`](Self::snapshot) with its freshness against
    /// `stale_after`.
    pub fn snapshot_with_staleness(&self, id: &DeviceId) -> Option<(Arc<DeviceState>, Staleness)> {
        let state = self.inner.store.get(id)?;
        let staleness = state.staleness(Utc::now(), self.stale_threshold());
        Some((state, staleness))
    }

    /// [`all_snapshots`](Self::all_snapshots) with freshness indicators.
    pub fn all_snapshots_with_staleness(&self) -> Vec<(Arc<DeviceState>, Staleness)> {
        let now = Utc::now();
        let threshold = self.stale_threshold();
        self.inner
            .store
            .all()
            .into_iter()
            .map(|state| {
                let staleness = state.staleness(now, threshold);
                (state, staleness)
            })
            .collect()
    }

    /// Resolve a user-supplied identifier: exact id, then name (case
    /// insensitive), then name substring.
    pub fn find_device(&self, query: &str) -> Result<Arc<DeviceState>, CoreError> {
        let not_found = || CoreError::DeviceNotFound {
            query: query.to_owned(),
        };
        if query.trim().is_empty() {
            return Err(not_found());
        }
        if let Some(state) = self.inner.store.get(&DeviceId::from(query)) {
            return Ok(state);
        }

        let needle = query.to_lowercase();
        let all = self.inner.store.all();
        all.iter()
            .find(|s| s.name.to_lowercase() == needle)
            .or_else(|| all.iter().find(|s| s.name.to_lowercase().contains(&needle)))
            .cloned()
            .ok_or_else(not_found)
    }

    pub fn monitor_status(&self, id: &DeviceId) -> Option<MonitorStatus> {
        self.inner
            .monitors
            .get(id)
            .map(|handle| handle.status.borrow().clone())
    }

    /// Subscribe to push listener state changes.
    pub fn listener_state(&self) -> watch::Receiver<ListenerState> {
        self.inner.listener_state.subscribe()
    }

    // ── Triggers and local updates ───────────────────────────────────

    /// Request a refresh of `id`. Returns immediately; the fetch runs
    /// after the debounce window.
    pub fn trigger(&self, id: &DeviceId, reason: TriggerReason) -> Result<(), CoreError> {
        if !self.inner.store.contains(id) {
            return Err(CoreError::UnknownDevice {
                device_id: id.clone(),
            });
        }
        self.running_debouncer()?
            .trigger(id.clone(), reason)
            .map_err(|_| CoreError::ShuttingDown)
    }

    /// Merge `delta` into the entry as an optimistic overlay, notify
    /// listeners, then trigger a reconciling fetch. The merged entry is
    /// readable when this returns.
    pub async fn apply_local_command(
        &self,
        id: &DeviceId,
        delta: StateDelta,
    ) -> Result<Arc<DeviceState>, CoreError> {
        let unknown = || CoreError::UnknownDevice {
            device_id: id.clone(),
        };
        if !self.inner.store.contains(id) {
            return Err(unknown());
        }
        self.running_debouncer()?;
        let mailbox = self
            .inner
            .monitors
            .get(id)
            .map(|handle| handle.mailbox.clone())
            .ok_or_else(unknown)?;

        let (ack, merged) = oneshot::channel();
        mailbox
            .send(MonitorMessage::LocalDelta { delta, ack })
            .await
            .map_err(|_| CoreError::ShuttingDown)?;
        let state = merged
            .await
            .map_err(|_| CoreError::ShuttingDown)?
            .ok_or_else(unknown)?;

        self.trigger(id, TriggerReason::LocalCommand)?;
        Ok(state)
    }

    /// Validate `control`, send it to the cloud, and apply the matching
    /// optimistic delta. Returns the merged entry.
    pub async fn execute(&self, id: &DeviceId, control: Control) -> Result<Arc<DeviceState>, CoreError> {
        let (kind, payload, delta) = control.into_command()?;

        let state = self.snapshot(id).ok_or_else(|| CoreError::UnknownDevice {
            device_id: id.clone(),
        })?;
        if !state.online {
            return Err(CoreError::DeviceOffline {
                device_id: id.clone(),
                name: state.name.clone(),
            });
        }
        self.running_debouncer()?;

        let ack = self.send_command(id, kind, payload).await?;
        debug!(device_id = %id, kind = %ack.kind, "command accepted");

        self.apply_local_command(id, delta).await
    }

    // ── Observers ────────────────────────────────────────────────────

    /// Register a synchronous change callback. It runs on the writing
    /// monitor's task after every applied change and must not block.
    pub fn register_change_listener<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&Arc<DeviceState>) + Send + Sync + 'static,
    {
        self.inner.listeners.register(Arc::new(callback))
    }

    /// Idempotent. Returns whether a listener was removed.
    pub fn remove_change_listener(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove(id)
    }

    /// Registered change listeners, the built-in hub fan-out included.
    pub fn change_listener_count(&self) -> usize {
        self.inner.listeners.len()
    }

    /// Subscribe to the coordinator's hub. The first message is the full
    /// snapshot, then one update per change.
    pub fn subscribe(&self) -> Subscription {
        let store = Arc::clone(&self.inner.store);
        self.inner.hub.subscribe(move || store.all())
    }

    pub fn hub(&self) -> &SubscriberHub {
        &self.inner.hub
    }

    // ── Crate internals ──────────────────────────────────────────────

    fn stale_threshold(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.inner.config.stale_after).unwrap_or(chrono::Duration::MAX)
    }

    pub(crate) fn set_listener_state(&self, state: ListenerState) {
        self.inner.listener_state.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn running_debouncer(&self) -> Result<&Debouncer, CoreError> {
        if self.inner.cancel.is_cancelled() {
            return Err(CoreError::ShuttingDown);
        }
        self.inner.debouncer.get().ok_or(CoreError::NotStarted)
    }

    fn monitor_context(&self, debouncer: Debouncer) -> MonitorContext<C> {
        MonitorContext {
            client: Arc::clone(&self.inner.client),
            store: Arc::clone(&self.inner.store),
            listeners: Arc::clone(&self.inner.listeners),
            flights: self.inner.flights.clone(),
            config: Arc::clone(&self.inner.config),
            debouncer,
        }
    }

    fn spawn_monitor(&self, ctx: &MonitorContext<C>, id: DeviceId) {
        let handle = spawn_monitor(ctx.clone(), id.clone(), self.inner.cancel.child_token());
        if let Some(previous) = self.inner.monitors.insert(id, handle) {
            previous.cancel.cancel();
        }
    }

    async fn discover(&self) -> Result<Vec<DeviceDescriptor>, CoreError> {
        let config = &self.inner.config;
        let attempts = config.discovery_attempts.max(1);
        let mut reason = String::new();

        for attempt in 1..=attempts {
            match self.list_devices_once().await {
                Ok(descriptors) => {
                    debug!(attempt, devices = descriptors.len(), "device discovery complete");
                    return Ok(descriptors);
                }
                Err(e) => {
                    warn!(attempt, error = %e, "device discovery failed");
                    reason = e.to_string();
                }
            }

            if attempt < attempts {
                let delay = config.discovery_backoff.nominal(attempt);
                tokio::select! {
                    biased;
                    () = self.inner.cancel.cancelled() => return Err(CoreError::ShuttingDown),
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }

        Err(CoreError::DiscoveryFailed { attempts, reason })
    }

    async fn list_devices_once(&self) -> Result<Vec<DeviceDescriptor>, CoreError> {
        let client = &self.inner.client;
        let limit = self.inner.config.fetch_timeout;

        match with_timeout(limit, client.list_devices()).await {
            Err(e) if e.is_auth_expired() => {
                with_timeout(limit, client.reauthenticate()).await?;
                Ok(with_timeout(limit, client.list_devices()).await?)
            }
            other => Ok(other?),
        }
    }

    async fn send_command(
        &self,
        id: &DeviceId,
        kind: CommandKind,
        payload: CommandPayload,
    ) -> Result<CommandAck, CoreError> {
        let client = &self.inner.client;
        let limit = self.inner.config.command_timeout;

        match with_timeout(limit, client.send_command(id, kind, payload.clone())).await {
            Err(e) if e.is_auth_expired() => {
                with_timeout(limit, client.reauthenticate()).await?;
                Ok(with_timeout(limit, client.send_command(id, kind, payload)).await?)
            }
            other => Ok(other?),
        }
    }
}

async fn with_timeout<T>(
    limit: std::time::Duration,
    call: impl Future<Output = Result<T, Error>>,
) -> Result<T, Error> {
    timeout(limit, call)
        .await
        .map_err(|_| Error::Timeout { timeout: limit })?
}

// ── Background tasks ─────────────────────────────────────────────────

/// Forward debounced requests to the owning monitor's mailbox.
async fn route_released(
    mut released: mpsc::UnboundedReceiver<Released>,
    monitors: Arc<MonitorMap>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            request = released.recv() => {
                let Some(Released { device_id, reason }) = request else { break };
                let Some(mailbox) = monitors.get(&device_id).map(|m| m.mailbox.clone()) else {
                    trace!(device_id = %device_id, "no monitor for released trigger");
                    continue;
                };
                if mailbox.try_send(MonitorMessage::Wake(reason)).is_err() {
                    trace!(device_id = %device_id, %reason, "monitor mailbox full, wake already pending");
                }
            }
        }
    }
}
