//! Sync engine between a device cloud and its observers.
//!
//! This crate keeps a live, whole-degree mirror of every air conditioner on
//! an account and serves it without ever blocking a read on the network:
//!
//! - **[`DeviceCoordinator`]** -- Central facade. [`start()`](DeviceCoordinator::start)
//!   discovers devices and spawns one monitor task per device, the trigger
//!   debouncer and the push listener. Reads are plain snapshots; writes go
//!   through [`execute()`](DeviceCoordinator::execute) or
//!   [`apply_local_command()`](DeviceCoordinator::apply_local_command).
//!
//! - **[`DeviceStore`]** -- Canonical state, `DashMap` of immutable
//!   `Arc<DeviceState>` entries. A fetch older than the entry is discarded;
//!   optimistic overlays never advance `last_updated`.
//!
//! - **[`Debouncer`]** / **[`SingleFlight`]** -- Collapse trigger bursts per
//!   device into one fetch, and keep at most one fetch in flight per device.
//!
//! - **[`SubscriberHub`]** -- Fan-out to any number of observers through
//!   bounded per-subscriber queues that drop the oldest update on overflow.
//!
//! - **[`Control`]** -- Validated user commands mapped to cloud payloads and
//!   optimistic [`StateDelta`]s.

pub mod backoff;
pub mod config;
pub mod control;
pub mod convert;
pub mod coordinator;
pub mod debounce;
pub mod error;
pub mod hub;
pub mod listener;
pub mod model;
pub mod monitor;
pub mod notify;
pub mod single_flight;
pub mod store;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{BackoffConfig, CoordinatorConfig, ReconnectConfig};
pub use control::{Control, MAX_TEMPERATURE, MIN_TEMPERATURE, SwingDirection};
pub use coordinator::{DeviceCoordinator, RediscoveryReport};
pub use debounce::{Debouncer, Released};
pub use error::CoreError;
pub use hub::{HubMessage, SubscriberHub, Subscription, SubscriptionId, TryRecvError};
pub use listener::ListenerState;
pub use monitor::{MonitorPhase, MonitorStatus};
pub use notify::{ChangeCallback, ListenerId};
pub use single_flight::{FlightGuard, SingleFlight};
pub use store::{ApplyOutcome, DeviceStore};

pub use model::{
    DeviceId, DeviceState, FanSpeed, OperatingMode, Staleness, StateDelta, StateOrigin, TriggerReason,
};
