use std::time::Duration;

use thiserror::Error;

use crate::model::DeviceId;

/// Top-level error type for the `climate-cloud` crate.
///
/// Covers every failure a [`CloudClient`](crate::CloudClient) can report:
/// authentication, transport, throttling, device reachability and the
/// push relay. `climate-core` classifies these into retry policy.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// The session token was rejected; re-authenticating may fix it.
    #[error("Session expired -- re-authentication required")]
    AuthExpired,

    /// Login failed outright (wrong credentials, locked account).
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    // ── Transport ───────────────────────────────────────────────────
    /// Connection refused, DNS failure, reset, etc.
    #[error("Network error: {0}")]
    Network(String),

    /// The call did not complete within its deadline.
    #[error("Request timed out after {}ms", .timeout.as_millis())]
    Timeout { timeout: Duration },

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    // ── Throttling ──────────────────────────────────────────────────
    /// Rate limited by the cloud. `retry_after` is the server's hint, if any.
    #[error("Rate limited{}", retry_hint(.retry_after.as_ref()))]
    RateLimited { retry_after: Option<Duration> },

    /// The cloud reported itself overloaded.
    #[error("Server busy: {message}")]
    ServerBusy { message: String },

    // ── Devices ─────────────────────────────────────────────────────
    /// The device did not answer its gateway (powered down, out of Wi-Fi).
    #[error("Device {device_id} is unreachable")]
    DeviceUnreachable { device_id: DeviceId },

    /// The cloud does not know this device.
    #[error("Device {device_id} not known to the cloud")]
    UnknownDevice { device_id: DeviceId },

    // ── Protocol ────────────────────────────────────────────────────
    /// The cloud answered with a non-success status code.
    #[error("Cloud API error (status {status}): {message}")]
    Protocol { status: i64, message: String },

    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },

    // ── Push relay ──────────────────────────────────────────────────
    /// WebSocket connection to the push relay failed.
    #[error("Push relay connection failed: {0}")]
    WebSocketConnect(String),

    /// The push relay closed the channel or rejected a keepalive.
    #[error("Push channel closed (status {status}): {reason}")]
    PushClosed { status: i64, reason: String },
}

impl Error {
    /// Returns `true` if this error indicates the session has expired
    /// and re-authentication might resolve it.
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, Self::AuthExpired)
    }

    /// Returns `true` for any authentication problem: an expired session
    /// or a rejected login.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::AuthExpired | Self::Authentication { .. })
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Network(_)
                | Self::Timeout { .. }
                | Self::RateLimited { .. }
                | Self::ServerBusy { .. }
                | Self::WebSocketConnect(_)
                | Self::PushClosed { .. }
                | Self::Protocol { .. }
        )
    }

    /// Returns `true` if the cloud asked us to slow down.
    pub fn is_throttled(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::ServerBusy { .. })
    }

    /// Returns `true` for the benign "device is offline" failure.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::DeviceUnreachable { .. })
    }

    /// Server-provided retry hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

fn retry_hint(retry_after: Option<&Duration>) -> String {
    retry_after
        .map(|d| format!(" -- retry after {}s", d.as_secs()))
        .unwrap_or_default()
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Deserialization {
            message: e.to_string(),
            body: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttling_is_transient() {
        let err = Error::RateLimited {
            retry_after: Some(Duration::from_secs(30)),
        };
        assert!(err.is_transient());
        assert!(err.is_throttled());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(30)));
        assert_eq!(err.to_string(), "Rate limited -- retry after 30s");
    }

    #[test]
    fn unreachable_is_not_transient() {
        let err = Error::DeviceUnreachable {
            device_id: DeviceId::from("ac-1"),
        };
        assert!(err.is_unreachable());
        assert!(!err.is_transient());
        assert!(!err.is_auth_expired());
    }

    #[test]
    fn both_auth_variants_are_auth_failures() {
        assert!(Error::AuthExpired.is_auth_failure());
        let rejected = Error::Authentication {
            message: "bad password".into(),
        };
        assert!(rejected.is_auth_failure());
        assert!(!rejected.is_auth_expired());
        assert!(!Error::Network("reset".into()).is_auth_failure());
    }

    #[test]
    fn timeout_message_uses_millis() {
        let err = Error::Timeout {
            timeout: Duration::from_millis(1500),
        };
        assert_eq!(err.to_string(), "Request timed out after 1500ms");
    }
}
