// ── Cloud push listener ──
//
// Keeps the push channel open for the life of the coordinator and turns
// each push event into a `push` trigger. Connection failures are logged
// and retried with exponential backoff; while the channel is down the
// system falls back to idle polling and optimistic updates.

use climate_cloud::{CloudClient, Error, PushStream};
use futures_util::StreamExt;
use serde::Serialize;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ReconnectConfig;
use crate::coordinator::DeviceCoordinator;
use crate::error::CoreError;
use crate::model::TriggerReason;

/// Push channel state observable by consumers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ListenerState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// How a connected session ended.
enum SessionEnd {
    Cancelled,
    Closed,
    Failed(Error),
}

pub(crate) struct CloudListener<C: CloudClient> {
    coordinator: DeviceCoordinator<C>,
    reconnect: ReconnectConfig,
}

impl<C: CloudClient> CloudListener<C> {
    pub(crate) fn new(coordinator: DeviceCoordinator<C>, reconnect: ReconnectConfig) -> Self {
        Self {
            coordinator,
            reconnect,
        }
    }

    /// Connect, dispatch, reconnect. Returns only when `cancel` fires.
    pub(crate) async fn run(self, cancel: CancellationToken) {
        let connect_timeout = self.coordinator.config().fetch_timeout;
        let mut failures: u32 = 0;

        loop {
            self.coordinator.set_listener_state(ListenerState::Connecting);

            let opened = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                opened = timeout(connect_timeout, self.coordinator.client().open_push_channel()) => {
                    opened.unwrap_or(Err(Error::Timeout { timeout: connect_timeout }))
                }
            };

            match opened {
                Ok(stream) => {
                    failures = 0;
                    self.coordinator.set_listener_state(ListenerState::Connected);
                    info!("push channel connected");

                    match self.pump(stream, &cancel).await {
                        SessionEnd::Cancelled => break,
                        SessionEnd::Closed => info!("push channel closed"),
                        SessionEnd::Failed(e) => warn!(error = %e, "push channel failed"),
                    }
                }
                Err(e) => warn!(error = %e, "push channel connect failed"),
            }

            self.coordinator.set_listener_state(ListenerState::Disconnected);
            failures = failures.saturating_add(1);
            let delay = self.reconnect.delay_for(failures);
            info!(
                attempt = failures,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "reconnecting push channel"
            );

            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = sleep(delay) => {}
            }
        }

        self.coordinator.set_listener_state(ListenerState::Disconnected);
        debug!("push listener stopped");
    }

    async fn pump(&self, mut stream: PushStream, cancel: &CancellationToken) -> SessionEnd {
        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => return SessionEnd::Cancelled,
                next = stream.next() => next,
            };

            match next {
                Some(Ok(event)) => {
                    match self.coordinator.trigger(&event.device_id, TriggerReason::Push) {
                        Ok(()) => {}
                        Err(CoreError::UnknownDevice { device_id }) => {
                            debug!(device_id = %device_id, "push for unknown device ignored");
                        }
                        Err(_) if self.coordinator.is_shutting_down() => return SessionEnd::Cancelled,
                        Err(e) => warn!(device_id = %event.device_id, error = %e, "push dispatch failed"),
                    }
                }
                Some(Err(e)) => return SessionEnd::Failed(e),
                None => return SessionEnd::Closed,
            }
        }
    }
}
