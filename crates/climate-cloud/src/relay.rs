//! Push relay channel over WebSocket.
//!
//! The vendor announces device changes through a relay service. After
//! the upgrade the client sends an `init` frame carrying its login
//! session, the relay answers `initk`, and from then on pushes
//! `{"msgtype":"push","data":{"endpointId":...}}` frames. The client must
//! `ping` periodically; a non-zero `pingk` status means the session is gone.
//!
//! [`open_relay_channel`] turns that conversation into a [`PushStream`],
//! suitable as the body of [`CloudClient::open_push_channel`](crate::CloudClient::open_push_channel).
//! Reconnection is the caller's business.
//!
//! # Example
//!
//! ```rust,ignore
//! use climate_cloud::relay::{RelaySession, open_relay_channel};
//! use climate_cloud::Region;
//!
//! let session = RelaySession::new(Region::Eu.relay_url()?, login_session, user_id);
//! let mut events = open_relay_channel(session).await?;
//! while let Some(event) = events.next().await {
//!     println!("{}", event?.device_id);
//! }
//! ```

use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder};
use url::Url;

use crate::client::PushStream;
use crate::error::Error;
use crate::model::{DeviceId, PushEvent};

/// Keepalive cadence the relay expects.
pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(10);

const RELAY_PATH: &str = "/appsync/apprelay/relayconnect";

// ── Region ───────────────────────────────────────────────────────────

/// Vendor cloud region. Each has its own relay host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Region {
    #[default]
    Eu,
    Usa,
    Cn,
}

impl Region {
    fn relay_host(self) -> &'static str {
        match self {
            Self::Eu => "wss://app-relay-deu-f0e9ebbb.smarthomecs.de",
            Self::Usa => "wss://app-relay-usa-fd7cc04c.smarthomecs.com",
            Self::Cn => "wss://app-relay-chn-31a93883.ibroadlink.com",
        }
    }

    /// Full relay endpoint for this region.
    pub fn relay_url(self) -> Result<Url, Error> {
        Ok(Url::parse(self.relay_host())?.join(RELAY_PATH)?)
    }
}

// ── RelaySession ─────────────────────────────────────────────────────

/// Everything needed to open one relay connection. Produced by whatever
/// performed the login.
#[derive(Debug, Clone)]
pub struct RelaySession {
    pub url: Url,
    pub login_session: SecretString,
    pub user_id: String,
    /// Extra upgrade headers. The relay validates the same headers the
    /// REST API uses during the handshake.
    pub headers: Vec<(String, String)>,
    pub keepalive: Duration,
}

impl RelaySession {
    pub fn new(url: Url, login_session: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            url,
            login_session: SecretString::from(login_session.into()),
            user_id: user_id.into(),
            headers: Vec::new(),
            keepalive: DEFAULT_KEEPALIVE,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

// ── Frames ───────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct InitFrame<'a> {
    data: InitData,
    messageid: String,
    msgtype: &'static str,
    scope: InitScope<'a>,
}

#[derive(Debug, Serialize)]
struct InitData {
    relayrule: &'static str,
}

#[derive(Debug, Serialize)]
struct InitScope<'a> {
    loginsession: &'a str,
    userid: &'a str,
}

#[derive(Debug, Serialize)]
struct PingFrame {
    messageid: String,
    msgtype: &'static str,
}

/// Inbound frame envelope. Only the fields we route on are typed.
#[derive(Debug, Deserialize)]
struct RelayFrame {
    #[serde(default)]
    msgtype: Option<String>,
    #[serde(default)]
    status: Option<i64>,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

/// What a single inbound text frame means to the channel.
#[derive(Debug, PartialEq)]
pub(crate) enum Inbound {
    Ready,
    KeepaliveAck,
    Push(PushEvent),
    Rejected { msgtype: String, status: i64 },
    Ignored,
}

enum Step {
    Keepalive,
    Frame(Option<Result<tungstenite::Message, tungstenite::Error>>),
}

fn message_id() -> String {
    format!("{}000", Utc::now().timestamp())
}

/// Classify one text frame from the relay.
pub(crate) fn parse_frame(text: &str) -> Inbound {
    let frame: RelayFrame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            tracing::debug!(error = %e, "Failed to parse relay frame");
            return Inbound::Ignored;
        }
    };

    let msgtype = frame.msgtype.as_deref().unwrap_or("");
    let status = frame.status.unwrap_or(-1);

    match msgtype {
        "initk" | "pingk" if status != 0 => Inbound::Rejected {
            msgtype: msgtype.to_owned(),
            status,
        },
        "initk" => Inbound::Ready,
        "pingk" => Inbound::KeepaliveAck,
        "push" => {
            let Some(data) = frame.data else {
                return Inbound::Ignored;
            };
            let Some(endpoint) = data.get("endpointId").and_then(serde_json::Value::as_str)
            else {
                tracing::debug!("Push frame without endpointId");
                return Inbound::Ignored;
            };
            Inbound::Push(PushEvent {
                device_id: DeviceId::from(endpoint),
                change_hint: Some(data),
            })
        }
        other => {
            tracing::trace!(msgtype = other, "Ignoring relay frame");
            Inbound::Ignored
        }
    }
}

// ── Channel ──────────────────────────────────────────────────────────

/// Connect to the relay, authenticate, and stream push events.
///
/// Returns once the upgrade succeeded and the `init` frame is sent; the
/// `initk` answer is checked inside the stream. The stream ends on a
/// clean close and yields an error for everything else.
pub async fn open_relay_channel(session: RelaySession) -> Result<PushStream, Error> {
    tracing::info!(url = %session.url, "Connecting to push relay");

    let uri: tungstenite::http::Uri = session
        .url
        .as_str()
        .parse()
        .map_err(|e: tungstenite::http::uri::InvalidUri| Error::WebSocketConnect(e.to_string()))?;

    let mut request = ClientRequestBuilder::new(uri);
    for (name, value) in &session.headers {
        request = request.with_header(name.as_str(), value.as_str());
    }

    let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

    let (mut write, mut read) = ws_stream.split();

    let init = serde_json::to_string(&InitFrame {
        data: InitData { relayrule: "share" },
        messageid: message_id(),
        msgtype: "init",
        scope: InitScope {
            loginsession: session.login_session.expose_secret(),
            userid: &session.user_id,
        },
    })?;
    write
        .send(tungstenite::Message::text(init))
        .await
        .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

    tracing::debug!("Push relay init sent");

    let keepalive = session.keepalive;
    let stream = async_stream::try_stream! {
        let mut ticker = tokio::time::interval(keepalive);
        ticker.tick().await; // consume the immediate first tick

        loop {
            let step = tokio::select! {
                _ = ticker.tick() => Step::Keepalive,
                frame = read.next() => Step::Frame(frame),
            };

            match step {
                Step::Keepalive => {
                    let ping = serde_json::to_string(&PingFrame {
                        messageid: message_id(),
                        msgtype: "ping",
                    })?;
                    write
                        .send(tungstenite::Message::text(ping))
                        .await
                        .map_err(|e| Error::WebSocketConnect(e.to_string()))?;
                    tracing::trace!("Push relay keepalive sent");
                }
                Step::Frame(Some(Ok(tungstenite::Message::Text(text)))) => match parse_frame(&text) {
                    Inbound::Push(event) => yield event,
                    Inbound::Ready => tracing::info!("Push relay session initialized"),
                    Inbound::KeepaliveAck => tracing::trace!("Push relay keepalive acknowledged"),
                    Inbound::Rejected { msgtype, status } => {
                        Err(Error::PushClosed {
                            status,
                            reason: format!("{msgtype} rejected"),
                        })?;
                    }
                    Inbound::Ignored => {}
                },
                Step::Frame(Some(Ok(tungstenite::Message::Close(frame)))) => {
                    if let Some(ref cf) = frame {
                        tracing::info!(code = %cf.code, reason = %cf.reason, "Push relay closed");
                    } else {
                        tracing::info!("Push relay closed (no payload)");
                    }
                    break;
                }
                Step::Frame(Some(Ok(_))) => {
                    // Binary, Ping, Pong, Frame -- tungstenite answers pings itself
                }
                Step::Frame(Some(Err(e))) => {
                    Err(Error::WebSocketConnect(e.to_string()))?;
                }
                Step::Frame(None) => {
                    tracing::info!("Push relay stream ended");
                    break;
                }
            }
        }
    };

    Ok(Box::pin(stream))
}
