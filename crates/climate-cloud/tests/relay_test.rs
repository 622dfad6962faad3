#![allow(clippy::unwrap_used)]
// Integration tests for the push relay channel against a local
// WebSocket server speaking the relay's frame protocol.

use std::time::Duration;

use climate_cloud::relay::{RelaySession, open_relay_channel};
use climate_cloud::{Error, PushEvent};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

/// Accept one connection, check the init frame, then play `script`.
async fn spawn_relay(script: Vec<&'static str>) -> Url {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();

        let Some(Ok(Message::Text(init))) = ws.next().await else {
            panic!("expected init frame");
        };
        let init: serde_json::Value = serde_json::from_str(&init).unwrap();
        assert_eq!(init["msgtype"], "init");
        assert_eq!(init["scope"]["loginsession"], "session-token");
        assert_eq!(init["scope"]["userid"], "user-1");

        for frame in script {
            ws.send(Message::text(frame)).await.unwrap();
        }
        ws.close(None).await.unwrap();
    });

    Url::parse(&format!("ws://{addr}/appsync/apprelay/relayconnect")).unwrap()
}

fn session(url: Url) -> RelaySession {
    let mut session = RelaySession::new(url, "session-token", "user-1");
    session.keepalive = Duration::from_secs(60);
    session
}

// ── Push delivery ───────────────────────────────────────────────────

#[tokio::test]
async fn test_push_frames_become_events() {
    let url = spawn_relay(vec![
        r#"{"msgtype":"initk","status":0}"#,
        r#"{"msgtype":"push","data":{"endpointId":"ac-1"}}"#,
        r#"{"msgtype":"notice","data":{}}"#,
        r#"{"msgtype":"push","data":{"endpointId":"ac-2"}}"#,
    ])
    .await;

    let stream = open_relay_channel(session(url)).await.unwrap();
    let events: Vec<PushEvent> = stream.map(Result::unwrap).collect().await;

    let ids: Vec<&str> = events.iter().map(|e| e.device_id.as_str()).collect();
    assert_eq!(ids, vec!["ac-1", "ac-2"]);
}

// ── Rejection ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_rejected_init_fails_stream() {
    let url = spawn_relay(vec![r#"{"msgtype":"initk","status":-1}"#]).await;

    let mut stream = open_relay_channel(session(url)).await.unwrap();
    let first = stream.next().await.unwrap();
    assert!(matches!(first, Err(Error::PushClosed { status: -1, .. })));
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn test_connect_refused_is_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let url = Url::parse(&format!("ws://{addr}/relay")).unwrap();
    let result = open_relay_channel(session(url)).await;
    assert!(matches!(result, Err(Error::WebSocketConnect(_))));
}
