// ── Subscriber fan-out ──
//
// Every canonical-store change is offered to every live subscription
// through one `broadcast` channel. A subscriber that falls more than
// `capacity` updates behind loses the oldest ones (`Lagged`) and keeps
// going; broadcasting never waits on a subscriber.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError as BroadcastTryRecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::model::{DeviceId, DeviceState};

// ── Messages ─────────────────────────────────────────────────────────

/// Outbound message shapes, serialized with a `type` tag.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubMessage {
    /// Full snapshot, sent once to each new subscription.
    InitialState { devices: Vec<Arc<DeviceState>> },
    /// One device changed.
    DeviceUpdate {
        #[serde(rename = "deviceId")]
        device_id: DeviceId,
        state: Arc<DeviceState>,
    },
}

/// Handle identifying one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

// ── SubscriberHub ────────────────────────────────────────────────────

struct HubInner {
    event_tx: broadcast::Sender<Arc<HubMessage>>,
    /// Close signal per live subscription; children of `closed`.
    subscribers: DashMap<SubscriptionId, CancellationToken>,
    closed: CancellationToken,
    next_id: AtomicU64,
    capacity: usize,
}

/// Fan-out point between the coordinator and its observers.
///
/// Cheaply cloneable. The registry is a `DashMap`, separate from the
/// canonical store.
#[derive(Clone)]
pub struct SubscriberHub {
    inner: Arc<HubInner>,
}

impl SubscriberHub {
    /// `capacity` bounds each subscription's undelivered updates. The
    /// channel rounds it up to a power of two.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1).next_power_of_two();
        let (event_tx, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(HubInner {
                event_tx,
                subscribers: DashMap::new(),
                closed: CancellationToken::new(),
                next_id: AtomicU64::new(1),
                capacity,
            }),
        }
    }

    /// Register a subscription. `snapshot` is taken *after* registration,
    /// so no change can fall between the snapshot and the first update.
    ///
    /// On a closed hub the subscription still yields its snapshot, then
    /// ends.
    pub fn subscribe<F>(&self, snapshot: F) -> Subscription
    where
        F: FnOnce() -> Vec<Arc<DeviceState>>,
    {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let event_rx = self.inner.event_tx.subscribe();
        let closed = self.inner.closed.child_token();
        if !closed.is_cancelled() {
            self.inner.subscribers.insert(id, closed.clone());
        }

        let initial = Arc::new(HubMessage::InitialState {
            devices: snapshot(),
        });
        debug!(subscription = %id, "subscriber added");

        Subscription {
            id,
            initial: Some(initial),
            event_rx,
            closed,
            lagged: 0,
            capacity: self.inner.capacity,
            hub: Arc::downgrade(&self.inner),
        }
    }

    /// Remove a subscription. Unknown or already-removed ids are ignored.
    /// Returns whether anything was removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        remove_subscriber(&self.inner, id)
    }

    /// End every subscription, current and future. Pending `recv` calls
    /// return `None`. Returns how many subscriptions were closed.
    pub fn close_all(&self) -> usize {
        self.inner.closed.cancel();
        let mut closed = 0;
        self.inner.subscribers.retain(|_, _| {
            closed += 1;
            false
        });
        if closed > 0 {
            debug!(subscribers = closed, "subscriber hub closed");
        }
        closed
    }

    /// Offer a device change to every subscription.
    pub fn broadcast(&self, state: &Arc<DeviceState>) {
        let message = Arc::new(HubMessage::DeviceUpdate {
            device_id: state.id.clone(),
            state: Arc::clone(state),
        });
        // No receivers is not an error.
        if let Ok(receivers) = self.inner.event_tx.send(message) {
            trace!(device_id = %state.id, receivers, "update broadcast");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }
}

fn remove_subscriber(inner: &HubInner, id: SubscriptionId) -> bool {
    match inner.subscribers.remove(&id) {
        Some((_, closed)) => {
            closed.cancel();
            debug!(subscription = %id, "subscriber removed");
            true
        }
        None => false,
    }
}

// ── Subscription ─────────────────────────────────────────────────────

/// Receiving side of one subscription. Dropping it unsubscribes.
pub struct Subscription {
    id: SubscriptionId,
    initial: Option<Arc<HubMessage>>,
    event_rx: broadcast::Receiver<Arc<HubMessage>>,
    closed: CancellationToken,
    lagged: u64,
    capacity: usize,
    hub: Weak<HubInner>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Next message: the initial snapshot first, then updates in order.
    /// `None` once unsubscribed or the hub is closed.
    pub async fn recv(&mut self) -> Option<Arc<HubMessage>> {
        if let Some(initial) = self.initial.take() {
            return Some(initial);
        }
        loop {
            let received = tokio::select! {
                biased;
                () = self.closed.cancelled() => return None,
                received = self.event_rx.recv() => received,
            };
            match received {
                Ok(message) => return Some(message),
                Err(RecvError::Lagged(n)) => {
                    trace!(subscription = %self.id, skipped = n, "subscriber lagged");
                    self.lagged += n;
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Result<Arc<HubMessage>, TryRecvError> {
        if let Some(initial) = self.initial.take() {
            return Ok(initial);
        }
        if self.closed.is_cancelled() {
            return Err(TryRecvError::Closed);
        }
        loop {
            match self.event_rx.try_recv() {
                Ok(message) => return Ok(message),
                Err(BroadcastTryRecvError::Lagged(n)) => self.lagged += n,
                Err(BroadcastTryRecvError::Empty) => return Err(TryRecvError::Empty),
                Err(BroadcastTryRecvError::Closed) => return Err(TryRecvError::Closed),
            }
        }
    }

    /// Updates this subscription has lost so far, including ones already
    /// overwritten but not yet noticed by a receive.
    pub fn dropped(&self) -> u64 {
        let behind = self.event_rx.len().saturating_sub(self.capacity);
        self.lagged + u64::try_from(behind).unwrap_or(u64::MAX)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.hub.upgrade() {
            remove_subscriber(&inner, self.id);
        }
    }
}

/// Why [`Subscription::try_recv`] returned nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryRecvError {
    Empty,
    Closed,
}
