use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Why a device refresh was requested.
///
/// Ordered by priority: when requests collapse, the greatest one is kept.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum TriggerReason {
    /// First fetch after the monitor started.
    Startup,
    /// Idle-poll timer for an offline or switched-off device.
    Poll,
    /// Push notification from the cloud.
    Push,
    /// Reconciliation after an optimistic local command.
    LocalCommand,
}
