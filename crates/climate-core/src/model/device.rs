// ── Device domain types ──
//
// The canonical, whole-degree view of one air conditioner. Built from
// cloud reads in `convert`, overlaid by local commands in `delta`.

use chrono::{DateTime, Utc};
use climate_cloud::{DeviceId, ParamMap};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[non_exhaustive]
pub enum OperatingMode {
    Cool,
    Heat,
    Dry,
    Fan,
    Auto,
    #[default]
    Unknown,
}

/// Fan speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[non_exhaustive]
pub enum FanSpeed {
    #[default]
    Auto,
    Low,
    Medium,
    High,
    Turbo,
    Mute,
}

/// Where the current value of an entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateOrigin {
    /// Seeded from discovery; nothing fetched yet.
    Discovered,
    /// Authoritative server read.
    Fetched,
    /// Local command overlay awaiting reconciliation.
    Optimistic,
}

/// Freshness indicator shown next to a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Staleness {
    Fresh,
    Stale,
    Unknown,
}

/// One device in the canonical store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceState {
    pub id: DeviceId,
    pub name: String,
    pub online: bool,
    pub power: bool,
    pub mode: OperatingMode,
    pub fan_speed: FanSpeed,
    /// Whole degrees.
    pub target_temperature: Option<i32>,
    /// Whole degrees.
    pub ambient_temperature: Option<i32>,
    #[serde(default)]
    pub params: ParamMap,
    pub last_updated: Option<DateTime<Utc>>,
    pub origin: StateOrigin,
}

impl DeviceState {
    /// Placeholder entry for a device that has been discovered but not
    /// fetched yet.
    pub fn discovered(id: DeviceId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            online: false,
            power: false,
            mode: OperatingMode::Unknown,
            fan_speed: FanSpeed::Auto,
            target_temperature: None,
            ambient_temperature: None,
            params: ParamMap::new(),
            last_updated: None,
            origin: StateOrigin::Discovered,
        }
    }

    /// Offline or switched off: the states push notifications don't cover.
    pub fn is_idle(&self) -> bool {
        !self.online || !self.power
    }

    pub fn is_optimistic(&self) -> bool {
        self.origin == StateOrigin::Optimistic
    }

    /// Derive the freshness indicator from `last_updated` and `online`.
    pub fn staleness(&self, now: DateTime<Utc>, threshold: chrono::Duration) -> Staleness {
        match self.last_updated {
            None => Staleness::Unknown,
            Some(_) if !self.online => Staleness::Stale,
            Some(at) if now - at > threshold => Staleness::Stale,
            Some(_) => Staleness::Fresh,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn fetched(online: bool, at: DateTime<Utc>) -> DeviceState {
        DeviceState {
            online,
            last_updated: Some(at),
            origin: StateOrigin::Fetched,
            ..DeviceState::discovered(DeviceId::from("ac-1"), "Bedroom")
        }
    }

    #[test]
    fn staleness_unknown_before_first_fetch() {
        let state = DeviceState::discovered(DeviceId::from("ac-1"), "Bedroom");
        assert_eq!(
            state.staleness(Utc::now(), chrono::Duration::minutes(5)),
            Staleness::Unknown
        );
    }

    #[test]
    fn staleness_tracks_age_and_online() {
        let now = Utc::now();
        let threshold = chrono::Duration::minutes(5);

        assert_eq!(fetched(true, now).staleness(now, threshold), Staleness::Fresh);
        assert_eq!(fetched(false, now).staleness(now, threshold), Staleness::Stale);
        assert_eq!(
            fetched(true, now - chrono::Duration::minutes(6)).staleness(now, threshold),
            Staleness::Stale
        );
    }

    #[test]
    fn modes_parse_from_user_words() {
        assert_eq!("Cool".parse::<OperatingMode>().unwrap(), OperatingMode::Cool);
        assert_eq!("turbo".parse::<FanSpeed>().unwrap(), FanSpeed::Turbo);
        assert!("blast".parse::<FanSpeed>().is_err());
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(DeviceState::discovered(DeviceId::from("ac-1"), "Den")).unwrap();
        assert!(json.get("targetTemperature").is_some());
        assert_eq!(json["fanSpeed"], "auto");
        assert_eq!(json["origin"], "discovered");
    }
}
