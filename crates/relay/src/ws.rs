//! WebSocket endpoint (§4.6, §6.4): one task per connection running the
//! `unauthenticated -> authenticated(deviceType)` state machine, grounded
//! on the teacher's `nodes::ws::handle_socket` shape (split socket, a
//! writer task fed by an outbound `mpsc` channel, a reader loop
//! dispatching inbound frames, cleanup on exit).

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::net::SocketAddr;
use tokio::sync::mpsc;

use pylon_domain::entities::{DeviceType, RelayClient};
use pylon_domain::id::{encode_client, encode_pylon, Env};
use pylon_domain::trace::{self, TraceEvent};
use pylon_protocol::relay::{forward_frame, DeviceInfo, InboundFrame, OutboundFrame};

use crate::auth::{authenticate_app, authenticate_pylon, authenticate_viewer};
use crate::registry::{ClientRegistry, ConnectedClient};
use crate::routing::resolve_targets;
use crate::state::AppState;

pub async fn relay_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, addr.ip().to_string()))
}

async fn handle_socket(socket: WebSocket, state: AppState, ip: String) {
    let (mut sink, mut stream) = socket.split();

    if send(&mut sink, &OutboundFrame::Connected).await.is_err() {
        return;
    }

    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Value>(64);
    let writer = tokio::spawn(async move {
        while let Some(value) = outbound_rx.recv().await {
            if send_value(&mut sink, &value).await.is_err() {
                break;
            }
        }
    });

    let connection_id = state.clients.next_connection_id();
    let mut authenticated: Option<DeviceType> = None;

    while let Some(Ok(msg)) = stream.next().await {
        let Message::Text(text) = msg else {
            if matches!(msg, Message::Close(_)) {
                break;
            }
            continue;
        };

        let frame: InboundFrame = match serde_json::from_str(&text) {
            Ok(f) => f,
            Err(_) => continue,
        };

        if authenticated.is_none() {
            if frame.kind != pylon_protocol::relay::KIND_AUTH {
                let _ = outbound_tx
                    .send(serde_json::to_value(OutboundFrame::Error { error: "Not authenticated".into() }).unwrap())
                    .await;
                continue;
            }

            match do_auth(&state, &frame, connection_id, &ip, outbound_tx.clone()).await {
                Ok(device_type) => {
                    authenticated = Some(device_type);
                    broadcast_device_status(&state.clients).await;
                }
                Err(error) => {
                    let _ = outbound_tx
                        .send(serde_json::to_value(OutboundFrame::AuthResult { success: false, error: Some(error), device: None }).unwrap())
                        .await;
                }
            }
            continue;
        }

        let sender_type = authenticated.expect("checked above");
        handle_authenticated_frame(&state, connection_id, sender_type, frame, &outbound_tx).await;
    }

    writer.abort();
    let removed = state.clients.remove(connection_id);
    if let Some(removed) = removed {
        trace::emit(TraceEvent::DeviceDisconnected {
            device_id: removed.device_id_raw(),
            device_type: format!("{:?}", removed.client.device_type).to_lowercase(),
        });
        broadcast_device_status(&state.clients).await;
        if removed.client.device_type != DeviceType::Pylon {
            let frame = OutboundFrame::ClientDisconnect {
                device_index: removed.client.device_index,
                device_type: format!("{:?}", removed.client.device_type).to_lowercase(),
            };
            if let Ok(value) = serde_json::to_value(&frame) {
                for sink in state.clients.sinks_for_type(DeviceType::Pylon) {
                    let _ = sink.send(value.clone()).await;
                }
            }
        }
    }
}

async fn do_auth(
    state: &AppState,
    frame: &InboundFrame,
    connection_id: u64,
    ip: &str,
    outbound_tx: mpsc::Sender<Value>,
) -> Result<DeviceType, String> {
    let device_type = match frame.device_type.as_deref() {
        Some("pylon") => DeviceType::Pylon,
        Some("app") => DeviceType::App,
        Some("viewer") => DeviceType::Viewer,
        other => return Err(format!("unknown deviceType {other:?}")),
    };

    let (device_index, email, share_id, pylon_id, client_id) = match device_type {
        DeviceType::Pylon => {
            let outcome = authenticate_pylon(frame.device_id, ip, &state.config.pylon_ip_allowlist)
                .map_err(|e| e.as_response_message())?;
            let env = parse_env(&state.config.env);
            let pylon_id = encode_pylon(env, outcome.device_index).map_err(|e| e.as_response_message())?;
            (outcome.device_index, None, None, Some(pylon_id), None)
        }
        DeviceType::App => {
            let device_index = state.clients.allocate_client_index().ok_or_else(|| "no free device index".to_string())?;
            let email = authenticate_app(frame.id_token.as_deref(), &state.config.oauth_email_allowlist, state.verifier.as_ref())
                .await
                .map_err(|e| e.as_response_message())?;
            let env = parse_env(&state.config.env);
            let client_id = encode_client(env, device_index).map_err(|e| e.as_response_message())?;
            (device_index, email, None, None, Some(client_id))
        }
        DeviceType::Viewer => {
            let share_id = authenticate_viewer(frame.share_id.as_deref()).map_err(|e| e.as_response_message())?;
            let device_index = state.clients.allocate_client_index().ok_or_else(|| "no free device index".to_string())?;
            let env = parse_env(&state.config.env);
            let client_id = encode_client(env, device_index).map_err(|e| e.as_response_message())?;
            (device_index, None, Some(share_id.to_string()), None, Some(client_id))
        }
    };

    let client = RelayClient {
        ip: ip.to_string(),
        device_index,
        device_type,
        authenticated: true,
        share_id,
        email: email.clone(),
    };

    let device_id_raw = pylon_id.map(|p| p.raw()).or_else(|| client_id.map(|c| c.raw())).unwrap_or(0);

    state.clients.insert(ConnectedClient {
        connection_id,
        client,
        pylon_id,
        client_id,
        sink: outbound_tx.clone(),
    });

    trace::emit(TraceEvent::DeviceAuthenticated { device_id: device_id_raw, device_type: format!("{device_type:?}").to_lowercase() });

    let device = DeviceInfo {
        device_id: device_id_raw,
        device_index,
        device_type: format!("{device_type:?}").to_lowercase(),
    };
    let _ = outbound_tx
        .send(serde_json::to_value(OutboundFrame::AuthResult { success: true, error: None, device: Some(device) }).unwrap())
        .await;

    Ok(device_type)
}

async fn handle_authenticated_frame(
    state: &AppState,
    connection_id: u64,
    sender_type: DeviceType,
    frame: InboundFrame,
    outbound_tx: &mpsc::Sender<Value>,
) {
    match frame.kind.as_str() {
        "get_devices" | "getDevices" => {
            let devices = device_list(&state.clients);
            let _ = outbound_tx.send(serde_json::to_value(OutboundFrame::DeviceList { devices }).unwrap()).await;
        }
        "ping" => {
            let _ = outbound_tx.send(serde_json::to_value(OutboundFrame::Pong).unwrap()).await;
        }
        "auth" => {
            // Already authenticated; a second auth frame is a no-op ack.
        }
        _ => {
            let Some(from) = state.clients.device_id_of(connection_id) else { return };
            trace::emit(TraceEvent::FrameRouted { from, to: frame.to, broadcast: frame.broadcast.clone() });
            let value = forward_frame(&frame.kind, frame.payload.clone(), from);
            for sink in resolve_targets(&frame, sender_type, &state.config.viewer_allowed_types, &state.clients) {
                let _ = sink.send(value.clone()).await;
            }
        }
    }
}

fn device_list(clients: &ClientRegistry) -> Vec<DeviceInfo> {
    clients
        .list()
        .into_iter()
        .map(|(device_id, device_index, device_type)| DeviceInfo {
            device_id,
            device_index,
            device_type: format!("{device_type:?}").to_lowercase(),
        })
        .collect()
}

async fn broadcast_device_status(clients: &ClientRegistry) {
    let devices = device_list(clients);
    if let Ok(value) = serde_json::to_value(OutboundFrame::DeviceStatus { devices }) {
        for sink in clients.all_sinks() {
            let _ = sink.send(value.clone()).await;
        }
    }
}

fn parse_env(raw: &str) -> Env {
    match raw {
        "release" => Env::Release,
        "stage" => Env::Stage,
        _ => Env::Dev,
    }
}

async fn send(sink: &mut (impl SinkExt<Message> + Unpin), frame: &OutboundFrame) -> Result<(), ()> {
    let json = serde_json::to_string(frame).map_err(|_| ())?;
    sink.send(Message::Text(json)).await.map_err(|_| ())
}

async fn send_value(sink: &mut (impl SinkExt<Message> + Unpin), value: &Value) -> Result<(), ()> {
    let json = serde_json::to_string(value).map_err(|_| ())?;
    sink.send(Message::Text(json)).await.map_err(|_| ())
}
