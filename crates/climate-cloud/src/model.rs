// ── Wire-level types ──
//
// Everything a CloudClient hands back or accepts. Temperatures stay in
// the cloud's native tenths-of-a-degree; climate-core converts them.

use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::params;

/// Free-form parameter map (`{"pwr": 1, "temp": 220, ...}`).
pub type ParamMap = serde_json::Map<String, serde_json::Value>;

// ── DeviceId ────────────────────────────────────────────────────────

/// Stable, opaque identifier the cloud assigns to a device
/// (the vendor calls it an endpoint id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DeviceId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_owned()))
    }
}

impl From<String> for DeviceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl Borrow<str> for DeviceId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

// ── Discovery ───────────────────────────────────────────────────────

/// One entry of `list_devices()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub id: DeviceId,
    pub name: String,
}

impl DeviceDescriptor {
    pub fn new(id: impl Into<DeviceId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

// ── State ───────────────────────────────────────────────────────────

/// Result of `fetch_state()`, as the cloud reports it.
///
/// `mode_code` and `fan_code` carry the raw `ac_mode` / `ac_mark`
/// parameter values; temperatures are tenths of a degree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteState {
    pub online: bool,
    pub power: bool,
    pub mode_code: Option<i64>,
    pub fan_code: Option<i64>,
    pub target_tenths: Option<i32>,
    pub ambient_tenths: Option<i32>,
    #[serde(default)]
    pub params: ParamMap,
    /// Server-side time the state was read. Orders competing results.
    pub timestamp: DateTime<Utc>,
}

impl RemoteState {
    /// Decode a raw vendor parameter map (`{"pwr":1,"temp":220,...}`).
    /// Missing or non-integer values decode as absent; `pwr` defaults to off.
    pub fn from_params(online: bool, params: ParamMap, timestamp: DateTime<Utc>) -> Self {
        let int = |key: &str| params.get(key).and_then(serde_json::Value::as_i64);
        let tenths = |key: &str| int(key).and_then(|v| i32::try_from(v).ok());

        let power = int(params::POWER) == Some(1);
        let mode_code = int(params::MODE);
        let fan_code = int(params::FAN_SPEED);
        let target_tenths = tenths(params::TARGET_TEMPERATURE);
        let ambient_tenths = tenths(params::AMBIENT_TEMPERATURE);

        Self {
            online,
            power,
            mode_code,
            fan_code,
            target_tenths,
            ambient_tenths,
            params,
            timestamp,
        }
    }
}

// ── Push ────────────────────────────────────────────────────────────

/// A "something changed on this device" notification from the push channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushEvent {
    pub device_id: DeviceId,
    /// Whatever the relay attached to the notification. Informational only;
    /// the coordinator always re-fetches.
    #[serde(default)]
    pub change_hint: Option<serde_json::Value>,
}

// ── Commands ────────────────────────────────────────────────────────

/// Category of a `send_command()` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CommandKind {
    Power,
    Temperature,
    Mode,
    Fan,
    Swing,
}

/// Parameter writes for one command, keyed by vendor parameter name.
pub type CommandPayload = ParamMap;

/// What the cloud echoes back after accepting a command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandAck {
    pub device_id: DeviceId,
    pub kind: CommandKind,
    #[serde(default)]
    pub params: ParamMap,
}
