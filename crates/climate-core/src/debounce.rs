// ── Per-device trigger debouncer ──
//
// Each trigger (re)arms a quiet-window timer for its device. When the
// window passes with no further trigger, one request is released for that
// device. Timers for different devices live in one DelayQueue and never
// wait on each other.

use std::collections::HashMap;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::time::{DelayQueue, delay_queue};
use tracing::trace;

use crate::model::{DeviceId, TriggerReason};

/// A coalesced refresh request leaving the debouncer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Released {
    pub device_id: DeviceId,
    /// Strongest reason among the collapsed triggers.
    pub reason: TriggerReason,
}

/// The debouncer task is gone (shutdown).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebouncerClosed;

/// Handle for submitting triggers. Cheap to clone; never blocks.
#[derive(Debug, Clone)]
pub struct Debouncer {
    tx: mpsc::UnboundedSender<(DeviceId, TriggerReason)>,
}

impl Debouncer {
    /// Spawn the debounce task. Released requests arrive on the returned
    /// receiver; the task exits when `cancel` fires or every handle is dropped.
    pub fn spawn(
        window: Duration,
        cancel: CancellationToken,
    ) -> (Self, mpsc::UnboundedReceiver<Released>, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(debounce_task(window, rx, out_tx, cancel));
        (Self { tx }, out_rx, handle)
    }

    pub fn trigger(&self, device_id: DeviceId, reason: TriggerReason) -> Result<(), DebouncerClosed> {
        self.tx.send((device_id, reason)).map_err(|_| DebouncerClosed)
    }
}

async fn debounce_task(
    window: Duration,
    mut rx: mpsc::UnboundedReceiver<(DeviceId, TriggerReason)>,
    out: mpsc::UnboundedSender<Released>,
    cancel: CancellationToken,
) {
    let mut timers: DelayQueue<DeviceId> = DelayQueue::new();
    let mut pending: HashMap<DeviceId, (delay_queue::Key, TriggerReason)> = HashMap::new();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            request = rx.recv() => {
                let Some((device_id, reason)) = request else { break };
                if let Some((key, held)) = pending.get_mut(&device_id) {
                    timers.reset(key, window);
                    *held = (*held).max(reason);
                    trace!(device_id = %device_id, %reason, "debounce window extended");
                } else {
                    let key = timers.insert(device_id.clone(), window);
                    pending.insert(device_id, (key, reason));
                }
            }
            Some(expired) = timers.next(), if !timers.is_empty() => {
                let device_id = expired.into_inner();
                let Some((_, reason)) = pending.remove(&device_id) else { continue };
                if out.send(Released { device_id, reason }).is_err() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tokio::time::{advance, sleep};

    const WINDOW: Duration = Duration::from_millis(300);

    fn id(s: &str) -> DeviceId {
        DeviceId::from(s)
    }

    #[tokio::test(start_paused = true)]
    async fn burst_releases_once() {
        let (debouncer, mut released, _task) = Debouncer::spawn(WINDOW, CancellationToken::new());

        for _ in 0..5 {
            debouncer.trigger(id("ac-1"), TriggerReason::Push).unwrap();
            sleep(Duration::from_millis(50)).await;
        }

        let first = released.recv().await.unwrap();
        assert_eq!(first.device_id, id("ac-1"));
        assert_eq!(first.reason, TriggerReason::Push);

        sleep(Duration::from_secs(5)).await;
        assert!(released.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn window_restarts_on_each_trigger() {
        let (debouncer, mut released, _task) = Debouncer::spawn(WINDOW, CancellationToken::new());

        debouncer.trigger(id("ac-1"), TriggerReason::Poll).unwrap();
        sleep(Duration::from_millis(250)).await;
        debouncer.trigger(id("ac-1"), TriggerReason::Poll).unwrap();
        sleep(Duration::from_millis(250)).await;
        assert!(released.try_recv().is_err(), "released before quiet window passed");

        sleep(Duration::from_millis(100)).await;
        assert_eq!(released.recv().await.unwrap().device_id, id("ac-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn devices_are_independent() {
        let (debouncer, mut released, _task) = Debouncer::spawn(WINDOW, CancellationToken::new());

        debouncer.trigger(id("ac-1"), TriggerReason::Push).unwrap();
        sleep(Duration::from_millis(100)).await;
        debouncer.trigger(id("ac-1"), TriggerReason::Push).unwrap();
        sleep(Duration::from_millis(100)).await;
        debouncer.trigger(id("ac-2"), TriggerReason::Push).unwrap();
        // ac-1 keeps receiving triggers; ac-2 must not wait for it.
        for _ in 0..5 {
            debouncer.trigger(id("ac-1"), TriggerReason::Push).unwrap();
            sleep(Duration::from_millis(100)).await;
        }

        let first = released.recv().await.unwrap();
        assert_eq!(first.device_id, id("ac-2"));
    }

    #[tokio::test(start_paused = true)]
    async fn keeps_strongest_reason() {
        let (debouncer, mut released, _task) = Debouncer::spawn(WINDOW, CancellationToken::new());

        debouncer.trigger(id("ac-3"), TriggerReason::LocalCommand).unwrap();
        debouncer.trigger(id("ac-3"), TriggerReason::Push).unwrap();
        advance(Duration::from_millis(10)).await;
        debouncer.trigger(id("ac-3"), TriggerReason::Poll).unwrap();

        assert_eq!(released.recv().await.unwrap().reason, TriggerReason::LocalCommand);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_task() {
        let cancel = CancellationToken::new();
        let (debouncer, _released, task) = Debouncer::spawn(WINDOW, cancel.clone());

        cancel.cancel();
        task.await.unwrap();
        assert_eq!(debouncer.trigger(id("ac-1"), TriggerReason::Push), Err(DebouncerClosed));
    }
}
