// ── Core error types ──
//
// Errors surfaced by the coordinator. Monitors never return these to
// callers -- their failures feed backoff. These come back from start,
// trigger, execute and friends. `From<climate_cloud::Error>` maps the
// cloud taxonomy into domain variants.

use climate_cloud::DeviceId;
use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Lookup errors ────────────────────────────────────────────────
    /// Operation on an id absent from the canonical store.
    #[error("Unknown device: {device_id}")]
    UnknownDevice { device_id: DeviceId },

    /// Free-text lookup matched nothing.
    #[error("Device not found: {query}")]
    DeviceNotFound { query: String },

    // ── Control errors ───────────────────────────────────────────────
    #[error("Device {name} ({device_id}) is offline")]
    DeviceOffline { device_id: DeviceId, name: String },

    #[error("Invalid {name} '{value}': expected {expected}")]
    InvalidParameter {
        name: &'static str,
        value: String,
        expected: String,
    },

    // ── Lifecycle errors ─────────────────────────────────────────────
    #[error("Device discovery failed after {attempts} attempt(s): {reason}")]
    DiscoveryFailed { attempts: u32, reason: String },

    #[error("Coordinator already started")]
    AlreadyStarted,

    #[error("Coordinator not started")]
    NotStarted,

    #[error("Coordinator is shutting down")]
    ShuttingDown,

    // ── Cloud errors (wrapped, not exposed raw) ──────────────────────
    #[error("Cloud call timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Rate limited by the cloud")]
    RateLimited,

    #[error("Device {device_id} is unreachable")]
    DeviceUnreachable { device_id: DeviceId },

    #[error("Cloud error: {message}")]
    Cloud { message: String },
}

impl From<climate_cloud::Error> for CoreError {
    fn from(err: climate_cloud::Error) -> Self {
        match err {
            climate_cloud::Error::AuthExpired => CoreError::AuthenticationFailed {
                message: "Session expired -- re-authentication required".into(),
            },
            climate_cloud::Error::Authentication { message } => {
                CoreError::AuthenticationFailed { message }
            }
            climate_cloud::Error::Timeout { timeout } => CoreError::Timeout {
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            },
            climate_cloud::Error::RateLimited { .. } | climate_cloud::Error::ServerBusy { .. } => {
                CoreError::RateLimited
            }
            climate_cloud::Error::DeviceUnreachable { device_id } => {
                CoreError::DeviceUnreachable { device_id }
            }
            climate_cloud::Error::UnknownDevice { device_id } => {
                CoreError::UnknownDevice { device_id }
            }
            other => CoreError::Cloud {
                message: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn cloud_errors_map_to_domain_variants() {
        let timeout = CoreError::from(climate_cloud::Error::Timeout {
            timeout: Duration::from_secs(2),
        });
        assert!(matches!(timeout, CoreError::Timeout { timeout_ms: 2000 }));

        let busy = CoreError::from(climate_cloud::Error::ServerBusy {
            message: "overloaded".into(),
        });
        assert!(matches!(busy, CoreError::RateLimited));

        let net = CoreError::from(climate_cloud::Error::Network("reset".into()));
        assert_eq!(net.to_string(), "Cloud error: Network error: reset");
    }
}
