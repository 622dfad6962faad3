//! Vendor parameter names and value encodings.
//!
//! These are the keys the cloud uses in state reads and command payloads.

/// Power: `0` off, `1` on.
pub const POWER: &str = "pwr";
/// Target temperature, tenths of a degree.
pub const TARGET_TEMPERATURE: &str = "temp";
/// Ambient temperature, tenths of a degree. Read-only.
pub const AMBIENT_TEMPERATURE: &str = "envtemp";
/// Operating mode code, see [`mode`].
pub const MODE: &str = "ac_mode";
/// Fan speed code, see [`fan`].
pub const FAN_SPEED: &str = "ac_mark";
/// Vertical louver swing: `0` fixed, `1` swinging.
pub const SWING_VERTICAL: &str = "ac_vdir";
/// Horizontal louver swing: `0` fixed, `1` swinging.
pub const SWING_HORIZONTAL: &str = "ac_hdir";

/// `ac_mode` values.
pub mod mode {
    pub const COOL: i64 = 0;
    pub const HEAT: i64 = 1;
    pub const DRY: i64 = 2;
    pub const FAN: i64 = 3;
    pub const AUTO: i64 = 4;
}

/// `ac_mark` values.
pub mod fan {
    pub const AUTO: i64 = 0;
    pub const LOW: i64 = 1;
    pub const MEDIUM: i64 = 2;
    pub const HIGH: i64 = 3;
    pub const TURBO: i64 = 4;
    pub const MUTE: i64 = 5;
}
