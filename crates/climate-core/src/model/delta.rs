// ── Optimistic local delta ──
//
// The part of a device's state a successful command is known to have
// changed. Merged into the canonical entry before the server confirms.

use climate_cloud::ParamMap;
use serde::{Deserialize, Serialize};

use super::device::{DeviceState, FanSpeed, OperatingMode, StateOrigin};

/// Known change produced by a local command. Whole-degree units.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateDelta {
    pub power: Option<bool>,
    pub mode: Option<OperatingMode>,
    pub fan_speed: Option<FanSpeed>,
    pub target_temperature: Option<i32>,
    /// Raw parameters to overwrite in the pass-through map.
    #[serde(default)]
    pub params: ParamMap,
}

impl StateDelta {
    pub fn is_empty(&self) -> bool {
        self.power.is_none()
            && self.mode.is_none()
            && self.fan_speed.is_none()
            && self.target_temperature.is_none()
            && self.params.is_empty()
    }

    /// Merge onto `base`, producing the optimistic entry.
    ///
    /// `last_updated` is left alone: only server reads advance it, so the
    /// next authoritative fetch is never mistaken for stale.
    pub fn apply_to(&self, base: &DeviceState) -> DeviceState {
        let mut next = base.clone();
        if let Some(power) = self.power {
            next.power = power;
        }
        if let Some(mode) = self.mode {
            next.mode = mode;
        }
        if let Some(fan) = self.fan_speed {
            next.fan_speed = fan;
        }
        if let Some(target) = self.target_temperature {
            next.target_temperature = Some(target);
        }
        for (key, value) in &self.params {
            next.params.insert(key.clone(), value.clone());
        }
        next.origin = StateOrigin::Optimistic;
        next
    }
}
