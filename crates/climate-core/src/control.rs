// ── Device controls ──
//
// User-facing control vocabulary. A validated `Control` maps to the
// cloud write (`CommandKind` + payload, in cloud units) and to the
// optimistic `StateDelta` applied once the cloud accepts it.

use std::str::FromStr;

use climate_cloud::{CommandKind, CommandPayload, ParamMap, params};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString, VariantNames};

use crate::convert::degrees_to_tenths;
use crate::error::CoreError;
use crate::model::{FanSpeed, OperatingMode, StateDelta};

/// Lowest settable target temperature, whole degrees.
pub const MIN_TEMPERATURE: i32 = 16;
/// Highest settable target temperature, whole degrees.
pub const MAX_TEMPERATURE: i32 = 30;

/// Louver axis for [`Control::Swing`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, VariantNames,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum SwingDirection {
    Vertical,
    Horizontal,
}

impl SwingDirection {
    fn param(self) -> &'static str {
        match self {
            Self::Vertical => params::SWING_VERTICAL,
            Self::Horizontal => params::SWING_HORIZONTAL,
        }
    }
}

/// One write operation against a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Power(bool),
    /// Whole degrees.
    Temperature(i32),
    Mode(OperatingMode),
    FanSpeed(FanSpeed),
    Swing { direction: SwingDirection, on: bool },
}

impl Control {
    /// Parse a mode name (`"cool"`, `"heat"`, ...).
    pub fn mode(name: &str) -> Result<Self, CoreError> {
        match OperatingMode::from_str(name) {
            Ok(mode) if mode != OperatingMode::Unknown => Ok(Self::Mode(mode)),
            _ => Err(invalid("mode", name, "one of: cool, heat, dry, fan, auto")),
        }
    }

    /// Parse a fan speed name (`"auto"`, `"turbo"`, ...).
    pub fn fan_speed(name: &str) -> Result<Self, CoreError> {
        FanSpeed::from_str(name)
            .map(Self::FanSpeed)
            .map_err(|_| invalid("fan speed", name, "one of: auto, low, medium, high, turbo, mute"))
    }

    /// Parse a swing axis (`"vertical"` or `"horizontal"`).
    pub fn swing(direction: &str, on: bool) -> Result<Self, CoreError> {
        SwingDirection::from_str(direction)
            .map(|direction| Self::Swing { direction, on })
            .map_err(|_| {
                invalid(
                    "swing direction",
                    direction,
                    &format!("one of: {}", SwingDirection::VARIANTS.join(", ")),
                )
            })
    }

    /// Range- and value-check without building anything.
    pub fn validate(&self) -> Result<(), CoreError> {
        match *self {
            Self::Temperature(degrees) if !(MIN_TEMPERATURE..=MAX_TEMPERATURE).contains(&degrees) => {
                Err(invalid(
                    "temperature",
                    &degrees.to_string(),
                    &format!("{MIN_TEMPERATURE}-{MAX_TEMPERATURE}"),
                ))
            }
            Self::Mode(OperatingMode::Unknown) => {
                Err(invalid("mode", "unknown", "one of: cool, heat, dry, fan, auto"))
            }
            _ => Ok(()),
        }
    }

    /// Validate and split into the cloud write and the optimistic delta.
    pub fn into_command(self) -> Result<(CommandKind, CommandPayload, StateDelta), CoreError> {
        self.validate()?;

        let mut payload = ParamMap::new();
        let mut delta = StateDelta::default();

        let kind = match self {
            Self::Power(on) => {
                payload.insert(params::POWER.into(), flag(on));
                delta.power = Some(on);
                CommandKind::Power
            }
            Self::Temperature(degrees) => {
                payload.insert(
                    params::TARGET_TEMPERATURE.into(),
                    degrees_to_tenths(degrees).into(),
                );
                delta.target_temperature = Some(degrees);
                CommandKind::Temperature
            }
            Self::Mode(mode) => {
                let code = mode
                    .code()
                    .ok_or_else(|| invalid("mode", &mode.to_string(), "a concrete mode"))?;
                payload.insert(params::MODE.into(), code.into());
                delta.mode = Some(mode);
                CommandKind::Mode
            }
            Self::FanSpeed(speed) => {
                payload.insert(params::FAN_SPEED.into(), speed.code().into());
                delta.fan_speed = Some(speed);
                CommandKind::Fan
            }
            Self::Swing { direction, on } => {
                payload.insert(direction.param().into(), flag(on));
                delta.params.insert(direction.param().into(), flag(on));
                CommandKind::Swing
            }
        };

        Ok((kind, payload, delta))
    }
}

fn flag(on: bool) -> Value {
    Value::from(i64::from(on))
}

fn invalid(name: &'static str, value: &str, expected: &str) -> CoreError {
    CoreError::InvalidParameter {
        name,
        value: value.to_owned(),
        expected: expected.to_owned(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn temperature_goes_out_in_tenths() {
        let (kind, payload, delta) = Control::Temperature(22).into_command().unwrap();

        assert_eq!(kind, CommandKind::Temperature);
        assert_eq!(payload.get("temp"), Some(&json!(220)));
        assert_eq!(delta.target_temperature, Some(22));
    }

    #[test]
    fn temperature_bounds_are_inclusive() {
        assert!(Control::Temperature(16).validate().is_ok());
        assert!(Control::Temperature(30).validate().is_ok());

        let err = Control::Temperature(31).into_command().unwrap_err();
        assert_eq!(err.to_string(), "Invalid temperature '31': expected 16-30");
        assert!(matches!(
            Control::Temperature(15).validate(),
            Err(CoreError::InvalidParameter { name: "temperature", .. })
        ));
    }

    #[test]
    fn mode_names_parse_case_insensitively() {
        assert_eq!(Control::mode("COOL").unwrap(), Control::Mode(OperatingMode::Cool));
        assert!(Control::mode("unknown").is_err());
        assert!(Control::mode("blast").is_err());

        let (_, payload, delta) = Control::mode("auto").unwrap().into_command().unwrap();
        assert_eq!(payload.get("ac_mode"), Some(&json!(4)));
        assert_eq!(delta.mode, Some(OperatingMode::Auto));
    }

    #[test]
    fn fan_speed_maps_to_mark() {
        let (kind, payload, _) = Control::fan_speed("turbo").unwrap().into_command().unwrap();
        assert_eq!(kind, CommandKind::Fan);
        assert_eq!(payload.get("ac_mark"), Some(&json!(4)));
    }

    #[test]
    fn swing_writes_axis_param() {
        let (kind, payload, delta) = Control::swing("horizontal", true).unwrap().into_command().unwrap();

        assert_eq!(kind, CommandKind::Swing);
        assert_eq!(payload.get("ac_hdir"), Some(&json!(1)));
        assert_eq!(delta.params.get("ac_hdir"), Some(&json!(1)));
        assert!(delta.power.is_none());
    }

    #[test]
    fn bad_swing_axis_lists_choices() {
        let err = Control::swing("diagonal", true).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid swing direction 'diagonal': expected one of: vertical, horizontal"
        );
    }

    #[test]
    fn power_is_a_flag() {
        let (_, payload, delta) = Control::Power(false).into_command().unwrap();
        assert_eq!(payload.get("pwr"), Some(&json!(0)));
        assert_eq!(delta.power, Some(false));
    }
}
