//! Reconnecting WebSocket client for a Worker's outbound link to Relay
//! (§6.4). Owns the connect → `auth` → `auth_result` handshake and the
//! bidirectional frame loop; callers exchange raw [`Value`] frames over
//! channels so the Worker binary can layer its own routing without this
//! crate needing to know about conversations, devices, or tool state.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::reconnect::ReconnectBackoff;
use crate::types::LinkError;

const WELCOME_TIMEOUT: Duration = Duration::from_secs(10);

/// A fully-configured client ready to connect to Relay. Create via
/// [`RelayLinkBuilder`](crate::builder::RelayLinkBuilder).
pub struct RelayLinkClient {
    pub(crate) relay_url: String,
    pub(crate) device_type: String,
    pub(crate) device_index: Option<u8>,
    pub(crate) id_token: Option<String>,
    pub(crate) share_id: Option<String>,
    pub(crate) reconnect_backoff: ReconnectBackoff,
}

impl RelayLinkClient {
    pub fn builder() -> crate::builder::RelayLinkBuilder {
        crate::builder::RelayLinkBuilder::new()
    }

    /// Run the client. Connects, authenticates, and forwards frames
    /// between the socket and the given channels until `shutdown` fires
    /// or the reconnect policy gives up.
    ///
    /// `outbound_rx` carries frames this side wants to send to Relay;
    /// `inbound_tx` carries every frame Relay sends back, including
    /// `auth_result`, `device_status`, and routed application frames.
    pub async fn run(
        self,
        mut outbound_rx: mpsc::Receiver<Value>,
        inbound_tx: mpsc::Sender<Value>,
        shutdown: CancellationToken,
    ) -> Result<(), LinkError> {
        let mut attempt: u32 = 0;

        loop {
            if shutdown.is_cancelled() {
                return Err(LinkError::Shutdown);
            }

            let result = tokio::select! {
                r = self.connect_and_run(&mut outbound_rx, &inbound_tx, &shutdown) => r,
                _ = shutdown.cancelled() => {
                    tracing::info!(url = %self.relay_url, "shutdown requested");
                    return Err(LinkError::Shutdown);
                }
            };

            match result {
                Ok(authenticated) => {
                    tracing::info!(
                        url = %self.relay_url,
                        authenticated,
                        "relay connection closed"
                    );
                    if authenticated {
                        attempt = 0;
                    }
                }
                Err(e) => {
                    tracing::warn!(url = %self.relay_url, attempt, error = %e, "relay connection lost");
                }
            }

            if self.reconnect_backoff.should_give_up(attempt) {
                return Err(LinkError::ReconnectExhausted(attempt));
            }

            let delay = self.reconnect_backoff.delay_for_attempt(attempt);
            tracing::info!(delay_ms = delay.as_millis() as u64, attempt = attempt + 1, "reconnecting to relay");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.cancelled() => return Err(LinkError::Shutdown),
            }
            attempt += 1;
        }
    }

    /// Single connection lifecycle: connect -> auth handshake -> frame
    /// loop. Returns `Ok(true)` if `auth_result{success:true}` was
    /// observed before the socket closed.
    async fn connect_and_run(
        &self,
        outbound_rx: &mut mpsc::Receiver<Value>,
        inbound_tx: &mpsc::Sender<Value>,
        shutdown: &CancellationToken,
    ) -> Result<bool, LinkError> {
        let (ws, _response) = tokio_tungstenite::connect_async(&self.relay_url)
            .await
            .map_err(|e| LinkError::WebSocket(e.to_string()))?;
        let (mut sink, mut stream) = ws.split();

        let auth_frame = serde_json::json!({
            "type": "auth",
            "deviceType": self.device_type,
            "deviceId": self.device_index,
            "idToken": self.id_token,
            "shareId": self.share_id,
        });
        send_frame(&mut sink, &auth_frame).await?;

        let auth_result = tokio::time::timeout(WELCOME_TIMEOUT, async {
            while let Some(Ok(msg)) = stream.next().await {
                if let Message::Text(text) = msg {
                    if let Ok(value) = serde_json::from_str::<Value>(&text) {
                        if value.get("type").and_then(Value::as_str) == Some("auth_result") {
                            return Some(value);
                        }
                    }
                }
            }
            None
        })
        .await
        .map_err(|_| LinkError::Handshake("auth_result timeout".into()))?
        .ok_or_else(|| LinkError::Handshake("connection closed before auth_result".into()))?;

        let authenticated = auth_result
            .get("success")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let _ = inbound_tx.send(auth_result.clone()).await;
        if !authenticated {
            let reason = auth_result
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("auth failed")
                .to_string();
            return Err(LinkError::Handshake(reason));
        }

        tracing::info!(url = %self.relay_url, "relay authenticated us");

        loop {
            tokio::select! {
                outbound = outbound_rx.recv() => {
                    match outbound {
                        Some(frame) => send_frame(&mut sink, &frame).await?,
                        None => break,
                    }
                }
                inbound = stream.next() => {
                    match inbound {
                        Some(Ok(Message::Text(text))) => {
                            if let Ok(value) = serde_json::from_str::<Value>(&text) {
                                if inbound_tx.send(value).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::debug!(error = %e, "relay websocket error");
                            break;
                        }
                    }
                }
                _ = shutdown.cancelled() => break,
            }
        }

        Ok(true)
    }
}

async fn send_frame(
    sink: &mut (impl SinkExt<Message> + Unpin),
    frame: &Value,
) -> Result<(), LinkError> {
    let json = serde_json::to_string(frame).map_err(|e| LinkError::Other(e.into()))?;
    sink.send(Message::Text(json))
        .await
        .map_err(|_| LinkError::WebSocket("send failed".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client() -> RelayLinkClient {
        RelayLinkClient {
            relay_url: "ws://127.0.0.1:8787".into(),
            device_type: "pylon".into(),
            device_index: Some(1),
            id_token: None,
            share_id: None,
            reconnect_backoff: ReconnectBackoff::default(),
        }
    }

    #[test]
    fn builder_round_trips_identity_fields() {
        let client = test_client();
        assert_eq!(client.device_type, "pylon");
        assert_eq!(client.device_index, Some(1));
    }
}
