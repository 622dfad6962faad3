// ── Canonical state storage ──
//
// The coordinator's in-memory source of truth. Reads are plain `DashMap`
// lookups; writes come only from the coordinator and its monitor tasks.

mod device_store;

pub use device_store::{ApplyOutcome, DeviceStore};
