pub mod delta;
pub mod device;
pub mod trigger;

pub use climate_cloud::DeviceId;
pub use delta::StateDelta;
pub use device::{DeviceState, FanSpeed, OperatingMode, StateOrigin, Staleness};
pub use trigger::TriggerReason;
