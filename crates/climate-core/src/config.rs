// ── Runtime configuration for the coordinator ──
//
// Built by the embedding application (see climate-config) and passed to
// `DeviceCoordinator::new` -- core never reads config files.

use std::time::Duration;

/// Exponential backoff bounds shared by fetch retries and reconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Delay after the first failure.
    pub base: Duration,
    /// Upper bound on any delay.
    pub ceiling: Duration,
}

/// Push listener reconnection policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 5s.
    pub initial_delay: Duration,
    /// Upper bound on backoff delay. Default: 300s.
    pub max_delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
        }
    }
}

/// Configuration for a [`DeviceCoordinator`](crate::DeviceCoordinator).
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Quiet period a device's triggers must observe before one fetch runs.
    pub debounce_window: Duration,
    /// Poll cadence for devices recorded offline or powered off.
    pub idle_poll_interval: Duration,
    /// Deadline for a single `fetch_state` call.
    pub fetch_timeout: Duration,
    /// Deadline for a single `send_command` call.
    pub command_timeout: Duration,
    /// Backoff applied to a device's monitor after failed fetches.
    pub fetch_backoff: BackoffConfig,
    /// Minimum delay after the cloud signals rate limiting or overload.
    pub throttle_min_delay: Duration,
    /// Consecutive auth failures before they are logged as errors.
    pub auth_escalation_after: u32,
    /// Discovery attempts made by `start()` before giving up.
    pub discovery_attempts: u32,
    /// Backoff between discovery attempts.
    pub discovery_backoff: BackoffConfig,
    /// How long an in-flight fetch may keep running after shutdown.
    pub shutdown_grace: Duration,
    /// Bound on each subscriber's undelivered updates, rounded up to a
    /// power of two.
    pub subscriber_queue_capacity: usize,
    /// Age after which a reading is reported stale.
    pub stale_after: Duration,
    /// Run the push listener alongside the monitors.
    pub push_enabled: bool,
    pub reconnect: ReconnectConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            debounce_window: Duration::from_millis(300),
            idle_poll_interval: Duration::from_secs(60),
            fetch_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(10),
            fetch_backoff: BackoffConfig {
                base: Duration::from_secs(2),
                ceiling: Duration::from_secs(120),
            },
            throttle_min_delay: Duration::from_secs(30),
            auth_escalation_after: 3,
            discovery_attempts: 3,
            discovery_backoff: BackoffConfig {
                base: Duration::from_secs(1),
                ceiling: Duration::from_secs(10),
            },
            shutdown_grace: Duration::from_secs(2),
            subscriber_queue_capacity: 256,
            stale_after: Duration::from_secs(300),
            push_enabled: true,
            reconnect: ReconnectConfig::default(),
        }
    }
}
