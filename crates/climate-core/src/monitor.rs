// ── Per-device monitor ──
//
// One task per device, the only writer of that device's store entry.
// Wakes arrive on a bounded mailbox from the trigger router; the fetch
// itself runs as a separate task under a single-flight guard so the
// monitor keeps serving its mailbox (optimistic deltas, new wakes) while
// a cloud call is outstanding.

use std::sync::Arc;
use std::time::Duration;

use climate_cloud::{CloudClient, Error, RemoteState};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, sleep_until, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use crate::config::CoordinatorConfig;
use crate::debounce::Debouncer;
use crate::model::{DeviceId, DeviceState, StateDelta, TriggerReason};
use crate::notify::ChangeListeners;
use crate::single_flight::{FlightGuard, SingleFlight};
use crate::store::{ApplyOutcome, DeviceStore};

/// Mailbox depth. Wakes are sent with `try_send`; a full mailbox already
/// holds a pending wake.
pub(crate) const MAILBOX_CAPACITY: usize = 16;

// ── Status ───────────────────────────────────────────────────────────

/// What a monitor is doing right now.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorPhase {
    #[default]
    Idle,
    Fetching,
    Backoff,
}

/// Observable monitor state, published on every transition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorStatus {
    pub phase: MonitorPhase,
    pub consecutive_failures: u32,
    /// Consecutive failures caused by authentication.
    pub auth_failures: u32,
    /// Fetches started since the monitor was spawned.
    pub fetches: u64,
    /// Reason of the most recently started fetch.
    pub last_trigger: Option<TriggerReason>,
}

// ── Messages ─────────────────────────────────────────────────────────

pub(crate) enum MonitorMessage {
    Wake(TriggerReason),
    /// Merge an optimistic delta; the ack carries the merged entry, or
    /// `None` if the entry is gone.
    LocalDelta {
        delta: StateDelta,
        ack: oneshot::Sender<Option<Arc<DeviceState>>>,
    },
}

/// Coordinator side of a running monitor.
pub(crate) struct MonitorHandle {
    pub mailbox: mpsc::Sender<MonitorMessage>,
    pub status: watch::Receiver<MonitorStatus>,
    pub cancel: CancellationToken,
    pub task: JoinHandle<()>,
}

/// Everything a monitor shares with the coordinator.
pub(crate) struct MonitorContext<C> {
    pub client: Arc<C>,
    pub store: Arc<DeviceStore>,
    pub listeners: Arc<ChangeListeners>,
    pub flights: SingleFlight<DeviceId>,
    pub config: Arc<CoordinatorConfig>,
    pub debouncer: Debouncer,
}

impl<C> Clone for MonitorContext<C> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            store: Arc::clone(&self.store),
            listeners: Arc::clone(&self.listeners),
            flights: self.flights.clone(),
            config: Arc::clone(&self.config),
            debouncer: self.debouncer.clone(),
        }
    }
}

/// Spawn the monitor for `id`. The first fetch starts immediately with
/// reason [`TriggerReason::Startup`].
pub(crate) fn spawn_monitor<C: CloudClient>(
    ctx: MonitorContext<C>,
    id: DeviceId,
    cancel: CancellationToken,
) -> MonitorHandle {
    let (mailbox, rx) = mpsc::channel(MAILBOX_CAPACITY);
    let (status_tx, status) = watch::channel(MonitorStatus::default());
    let monitor = Monitor {
        ctx,
        id,
        status: status_tx,
    };
    let task = tokio::spawn(monitor.run(rx, cancel.clone()));

    MonitorHandle {
        mailbox,
        status,
        cancel,
        task,
    }
}

// ── Monitor task ─────────────────────────────────────────────────────

type FetchResult = Result<RemoteState, Error>;

struct Monitor<C> {
    ctx: MonitorContext<C>,
    id: DeviceId,
    status: watch::Sender<MonitorStatus>,
}

/// Loop-local scheduling state.
struct Schedule {
    /// Wake waiting for the next fetch slot.
    pending: Option<TriggerReason>,
    /// Reason of the fetch currently in flight.
    current: TriggerReason,
    backoff_until: Option<Instant>,
    next_poll: Instant,
    failures: u32,
    auth_failures: u32,
}

impl Schedule {
    fn record(&mut self, reason: TriggerReason) {
        self.pending = Some(self.pending.map_or(reason, |held| held.max(reason)));
    }
}

impl<C: CloudClient> Monitor<C> {
    async fn run(self, mut mailbox: mpsc::Receiver<MonitorMessage>, cancel: CancellationToken) {
        let poll_interval = self.ctx.config.idle_poll_interval;
        let mut in_flight: Option<JoinHandle<FetchResult>> = None;
        let mut sched = Schedule {
            pending: Some(TriggerReason::Startup),
            current: TriggerReason::Startup,
            backoff_until: None,
            next_poll: Instant::now() + poll_interval,
            failures: 0,
            auth_failures: 0,
        };

        debug!(device_id = %self.id, "monitor started");

        loop {
            if in_flight.is_none() && sched.backoff_until.is_none() {
                if let Some(reason) = sched.pending.take() {
                    in_flight = self.start_fetch(reason, &mut sched);
                }
            }

            let backoff_deadline = sched.backoff_until.unwrap_or_else(Instant::now);
            let idle = in_flight.is_none() && sched.backoff_until.is_none() && self.is_idle();

            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                message = mailbox.recv() => {
                    let Some(message) = message else { break };
                    self.handle_message(message, in_flight.is_some(), &mut sched);
                }
                joined = join_in_flight(&mut in_flight), if in_flight.is_some() => {
                    in_flight = None;
                    self.finish_fetch(joined, &mut sched);
                    sched.next_poll = Instant::now() + poll_interval;
                }
                () = sleep_until(backoff_deadline), if sched.backoff_until.is_some() => {
                    sched.backoff_until = None;
                    self.publish(|s| s.phase = MonitorPhase::Idle);
                    trace!(device_id = %self.id, "backoff lapsed");
                }
                () = sleep_until(sched.next_poll), if idle => {
                    sched.next_poll = Instant::now() + poll_interval;
                    trace!(device_id = %self.id, "idle poll due");
                    if self.ctx.debouncer.trigger(self.id.clone(), TriggerReason::Poll).is_err() {
                        break;
                    }
                }
            }
        }

        self.drain(in_flight).await;
        debug!(device_id = %self.id, "monitor stopped");
    }

    fn is_idle(&self) -> bool {
        self.ctx.store.get(&self.id).is_some_and(|state| state.is_idle())
    }

    fn handle_message(&self, message: MonitorMessage, fetching: bool, sched: &mut Schedule) {
        match message {
            MonitorMessage::Wake(reason) => {
                if fetching {
                    // The in-flight read may predate a local command.
                    if reason == TriggerReason::LocalCommand {
                        sched.record(reason);
                    } else {
                        trace!(device_id = %self.id, %reason, "fetch in flight, wake absorbed");
                    }
                } else {
                    sched.record(reason);
                }
            }
            MonitorMessage::LocalDelta { delta, ack } => {
                let merged = self.ctx.store.apply_delta(&self.id, &delta);
                if let Some(state) = &merged {
                    self.ctx.listeners.notify(state);
                }
                let _ = ack.send(merged);
            }
        }
    }

    fn start_fetch(&self, reason: TriggerReason, sched: &mut Schedule) -> Option<JoinHandle<FetchResult>> {
        let Some(guard) = self.ctx.flights.try_acquire(self.id.clone()) else {
            // A previous monitor for this id is still draining.
            sched.pending = Some(reason);
            sched.backoff_until = Some(Instant::now() + self.ctx.config.debounce_window);
            return None;
        };

        sched.current = reason;
        self.publish(|s| {
            s.phase = MonitorPhase::Fetching;
            s.fetches += 1;
            s.last_trigger = Some(reason);
        });
        debug!(device_id = %self.id, %reason, "fetching device state");

        Some(tokio::spawn(fetch_task(
            guard,
            Arc::clone(&self.ctx.client),
            self.id.clone(),
            self.ctx.config.fetch_timeout,
        )))
    }

    fn finish_fetch(&self, joined: Result<FetchResult, JoinError>, sched: &mut Schedule) {
        let result = joined.unwrap_or_else(|e| Err(Error::Network(format!("fetch task failed: {e}"))));

        match result {
            Ok(remote) => {
                sched.failures = 0;
                sched.auth_failures = 0;
                self.publish(|s| {
                    s.phase = MonitorPhase::Idle;
                    s.consecutive_failures = 0;
                    s.auth_failures = 0;
                });
                self.apply(remote);
            }
            Err(e) if e.is_unreachable() => {
                debug!(device_id = %self.id, error = %e, "device unreachable");
                if let Some(state) = self.ctx.store.mark_offline(&self.id) {
                    self.ctx.listeners.notify(&state);
                }
                self.publish(|s| s.phase = MonitorPhase::Idle);
            }
            Err(e) => self.enter_backoff(&e, sched),
        }
    }

    fn apply(&self, remote: RemoteState) {
        match self.ctx.store.apply_fetch(&self.id, remote) {
            ApplyOutcome::Applied(state) => self.ctx.listeners.notify(&state),
            ApplyOutcome::Stale => {
                debug!(device_id = %self.id, "discarded fetch older than current entry");
            }
            ApplyOutcome::Unknown => {
                debug!(device_id = %self.id, "entry removed while fetching");
            }
        }
    }

    fn enter_backoff(&self, err: &Error, sched: &mut Schedule) {
        sched.failures = sched.failures.saturating_add(1);
        let config = &self.ctx.config;

        let mut delay = config
            .fetch_backoff
            .jittered(sched.failures, &mut rand::thread_rng());
        if err.is_throttled() {
            delay = delay
                .max(config.throttle_min_delay)
                .max(err.retry_after().unwrap_or(Duration::ZERO));
        }
        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);

        if err.is_auth_failure() {
            sched.auth_failures = sched.auth_failures.saturating_add(1);
            if sched.auth_failures >= config.auth_escalation_after {
                error!(
                    device_id = %self.id,
                    failures = sched.auth_failures,
                    "re-authentication keeps failing"
                );
            } else {
                warn!(device_id = %self.id, error = %err, delay_ms, "re-authentication failed");
            }
        } else {
            warn!(
                device_id = %self.id,
                error = %err,
                failures = sched.failures,
                delay_ms,
                "fetch failed, backing off"
            );
        }

        // Retry the failed reason once backoff lapses.
        sched.record(sched.current);
        sched.backoff_until = Some(Instant::now() + delay);
        let (failures, auth_failures) = (sched.failures, sched.auth_failures);
        self.publish(|s| {
            s.phase = MonitorPhase::Backoff;
            s.consecutive_failures = failures;
            s.auth_failures = auth_failures;
        });
    }

    /// Give an in-flight fetch `shutdown_grace` to land, then abort it.
    async fn drain(&self, in_flight: Option<JoinHandle<FetchResult>>) {
        let Some(mut handle) = in_flight else { return };
        match timeout(self.ctx.config.shutdown_grace, &mut handle).await {
            Ok(Ok(Ok(remote))) => self.apply(remote),
            Ok(_) => {}
            Err(_) => {
                handle.abort();
                debug!(device_id = %self.id, "in-flight fetch abandoned");
            }
        }
    }

    fn publish(&self, update: impl FnOnce(&mut MonitorStatus)) {
        self.status.send_modify(update);
    }
}

async fn join_in_flight(
    in_flight: &mut Option<JoinHandle<FetchResult>>,
) -> Result<FetchResult, JoinError> {
    match in_flight {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

async fn fetch_task<C: CloudClient>(
    _guard: FlightGuard<DeviceId>,
    client: Arc<C>,
    id: DeviceId,
    fetch_timeout: Duration,
) -> FetchResult {
    fetch_with_reauth(client.as_ref(), &id, fetch_timeout).await
}

/// Fetch once; on an expired session re-authenticate and fetch once more.
pub(crate) async fn fetch_with_reauth<C: CloudClient>(
    client: &C,
    id: &DeviceId,
    fetch_timeout: Duration,
) -> FetchResult {
    match timed_fetch(client, id, fetch_timeout).await {
        Err(e) if e.is_auth_expired() => {
            debug!(device_id = %id, "session expired, re-authenticating");
            timeout(fetch_timeout, client.reauthenticate())
                .await
                .map_err(|_| Error::Timeout {
                    timeout: fetch_timeout,
                })??;
            timed_fetch(client, id, fetch_timeout).await
        }
        other => other,
    }
}

async fn timed_fetch<C: CloudClient>(client: &C, id: &DeviceId, fetch_timeout: Duration) -> FetchResult {
    timeout(fetch_timeout, client.fetch_state(id))
        .await
        .map_err(|_| Error::Timeout {
            timeout: fetch_timeout,
        })?
}
