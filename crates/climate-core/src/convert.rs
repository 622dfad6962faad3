// ── Cloud-to-domain conversions ──
//
// The unit boundary. Cloud reads arrive in tenths of a degree with raw
// mode/fan codes; everything past this module is whole degrees and enums.
// Outbound temperatures are converted back in `control`.

use climate_cloud::{DeviceId, RemoteState, params};

use crate::model::{DeviceState, FanSpeed, OperatingMode, StateOrigin};

// ── Temperature ────────────────────────────────────────────────────

/// Tenths of a degree to whole degrees, rounding half away from zero.
pub fn tenths_to_degrees(tenths: i32) -> i32 {
    let whole = tenths / 10;
    let rest = tenths % 10;
    if rest >= 5 {
        whole + 1
    } else if rest <= -5 {
        whole - 1
    } else {
        whole
    }
}

/// Whole degrees to the cloud's tenths.
pub fn degrees_to_tenths(degrees: i32) -> i32 {
    degrees.saturating_mul(10)
}

// ── Codes ──────────────────────────────────────────────────────────

impl OperatingMode {
    pub fn from_code(code: i64) -> Self {
        match code {
            params::mode::COOL => Self::Cool,
            params::mode::HEAT => Self::Heat,
            params::mode::DRY => Self::Dry,
            params::mode::FAN => Self::Fan,
            params::mode::AUTO => Self::Auto,
            _ => Self::Unknown,
        }
    }

    /// `None` for [`OperatingMode::Unknown`], which cannot be commanded.
    pub fn code(self) -> Option<i64> {
        match self {
            Self::Cool => Some(params::mode::COOL),
            Self::Heat => Some(params::mode::HEAT),
            Self::Dry => Some(params::mode::DRY),
            Self::Fan => Some(params::mode::FAN),
            Self::Auto => Some(params::mode::AUTO),
            Self::Unknown => None,
        }
    }
}

impl FanSpeed {
    /// Unrecognised codes read as `Auto`.
    pub fn from_code(code: i64) -> Self {
        match code {
            params::fan::LOW => Self::Low,
            params::fan::MEDIUM => Self::Medium,
            params::fan::HIGH => Self::High,
            params::fan::TURBO => Self::Turbo,
            params::fan::MUTE => Self::Mute,
            _ => Self::Auto,
        }
    }

    pub fn code(self) -> i64 {
        match self {
            Self::Auto => params::fan::AUTO,
            Self::Low => params::fan::LOW,
            Self::Medium => params::fan::MEDIUM,
            Self::High => params::fan::HIGH,
            Self::Turbo => params::fan::TURBO,
            Self::Mute => params::fan::MUTE,
        }
    }
}

// ── State ──────────────────────────────────────────────────────────

/// Build the canonical entry for a successful fetch.
pub(crate) fn device_state_from_remote(id: DeviceId, name: String, remote: RemoteState) -> DeviceState {
    DeviceState {
        id,
        name,
        online: remote.online,
        power: remote.power,
        mode: remote.mode_code.map_or(OperatingMode::Unknown, OperatingMode::from_code),
        fan_speed: remote.fan_code.map_or(FanSpeed::Auto, FanSpeed::from_code),
        target_temperature: remote.target_tenths.map(tenths_to_degrees),
        ambient_temperature: remote.ambient_tenths.map(tenths_to_degrees),
        params: remote.params,
        last_updated: Some(remote.timestamp),
        origin: StateOrigin::Fetched,
    }
}
