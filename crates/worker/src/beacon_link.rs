//! `LlmAdapter` implementation for the Worker: a single persistent TCP
//! connection to Beacon (§4.5, §6.2) multiplexing every in-flight
//! `query` by `conversationId`, mirroring `beacon::connection`'s
//! one-writer-behind-a-mutex discipline from the other side of the wire.
//!
//! Unlike Beacon's own in-process adapter, a query's terminal marker
//! cannot be "the stream returned `None`" — Beacon never sends an
//! explicit end-of-stream frame (§6.1 describes `result` as the terminal
//! turn marker, not a framing primitive). This link treats an observed
//! `SdkMessage::Result` as the signal to close that conversation's local
//! channel after forwarding it, reproducing the same-process behavior
//! `pylon_session::SessionManager` expects from `stream.next() -> None`.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};

use pylon_domain::error::{Error, Result};
use pylon_session::{CanUseTool, CanUseToolRequest, CanUseToolResult, LlmAdapter, QueryOptions, SdkMessage};

type OneShotWaiters = Arc<Mutex<VecDeque<oneshot::Sender<Value>>>>;
type Subscribers = Arc<Mutex<HashMap<u32, mpsc::UnboundedSender<SdkMessage>>>>;
type CanUseTools = Arc<Mutex<HashMap<u32, Arc<dyn CanUseTool>>>>;

/// A lookup result as returned by Beacon's `lookup` action (§4.5), used
/// by the Worker's tool server to resolve `toolUseId -> convId` for
/// `lookup_and_*` callbacks.
#[derive(Debug, Clone)]
pub struct LookupResult {
    pub conv_id: u32,
    pub mcp_host: String,
    pub mcp_port: u16,
}

/// The Worker's outbound link to Beacon. One instance per process,
/// shared by `pylon_session::SessionManager` (as its `LlmAdapter`) and
/// the tool server (for `lookup`).
pub struct BeaconLink {
    writer: Arc<AsyncMutex<OwnedWriteHalf>>,
    subscribers: Subscribers,
    can_use_tools: CanUseTools,
    one_shot_waiters: OneShotWaiters,
}

impl BeaconLink {
    /// Connects to Beacon and spawns the single reader task that demuxes
    /// every line for the lifetime of the connection.
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        let stream = TcpStream::connect((host, port)).await.map_err(Error::Io)?;
        let (read_half, write_half) = stream.into_split();
        let writer = Arc::new(AsyncMutex::new(write_half));
        let subscribers: Subscribers = Arc::new(Mutex::new(HashMap::new()));
        let can_use_tools: CanUseTools = Arc::new(Mutex::new(HashMap::new()));
        let one_shot_waiters: OneShotWaiters = Arc::new(Mutex::new(VecDeque::new()));

        tokio::spawn(run_reader(
            BufReader::new(read_half),
            subscribers.clone(),
            can_use_tools.clone(),
            one_shot_waiters.clone(),
            writer.clone(),
        ));

        Ok(Self {
            writer,
            subscribers,
            can_use_tools,
            one_shot_waiters,
        })
    }

    /// `register {pylonId, mcpHost, mcpPort, env, force?}` (§4.5). One-shot
    /// requests are answered in order, so the waiter queue is FIFO —
    /// callers must not issue two one-shot requests concurrently without
    /// awaiting the first.
    pub async fn register(&self, pylon_id: u8, mcp_host: &str, mcp_port: u16, env: &str, force: bool) -> Result<()> {
        let response = self
            .one_shot(json!({
                "action": "register",
                "pylon_id": pylon_id,
                "mcp_host": mcp_host,
                "mcp_port": mcp_port,
                "env": env,
                "force": force,
            }))
            .await?;
        ok_or_error(&response)
    }

    pub async fn unregister(&self, pylon_id: u8) -> Result<()> {
        let response = self.one_shot(json!({"action": "unregister", "pylon_id": pylon_id})).await?;
        ok_or_error(&response)
    }

    pub async fn lookup(&self, tool_use_id: &str) -> Result<LookupResult> {
        let response = self
            .one_shot(json!({"action": "lookup", "tool_use_id": tool_use_id}))
            .await?;
        ok_or_error(&response)?;
        let conv_id = response
            .get("convId")
            .and_then(Value::as_u64)
            .ok_or_else(|| Error::AdapterError { underlying: "lookup response missing convId".into() })?;
        let mcp_host = response
            .get("mcpHost")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::AdapterError { underlying: "lookup response missing mcpHost".into() })?
            .to_string();
        let mcp_port = response
            .get("mcpPort")
            .and_then(Value::as_u64)
            .ok_or_else(|| Error::AdapterError { underlying: "lookup response missing mcpPort".into() })?;
        Ok(LookupResult {
            conv_id: conv_id as u32,
            mcp_host,
            mcp_port: mcp_port as u16,
        })
    }

    async fn one_shot(&self, request: Value) -> Result<Value> {
        let (tx, rx) = oneshot::channel();
        self.one_shot_waiters.lock().push_back(tx);
        send_line(&self.writer, &request).await?;
        rx.await.map_err(|_| Error::TransportClosed)
    }
}

#[async_trait]
impl LlmAdapter for BeaconLink {
    async fn query(&self, options: QueryOptions) -> Result<BoxStream<'static, SdkMessage>> {
        let conv_id = options
            .conversation_id
            .ok_or_else(|| Error::InvalidId("query requires a conversationId".into()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().insert(conv_id, tx);
        if let Some(can_use_tool) = options.can_use_tool.clone() {
            self.can_use_tools.lock().insert(conv_id, can_use_tool);
        }

        let wire_options = json!({
            "prompt": options.prompt,
            "cwd": options.cwd,
            "includePartialMessages": options.include_partial_messages,
            "settingSources": options.setting_sources,
            "resume": options.resume,
            "mcpServers": options.mcp_servers,
            "env": options.env,
        });

        send_line(
            &self.writer,
            &json!({"action": "query", "conv_id": conv_id, "options": wire_options}),
        )
        .await?;

        let stream = async_stream::stream! {
            let mut rx = rx;
            while let Some(message) = rx.recv().await {
                yield message;
            }
        };
        Ok(Box::pin(stream))
    }
}

fn ok_or_error(response: &Value) -> Result<()> {
    let success = response.get("success").and_then(Value::as_bool).unwrap_or(false);
    if success {
        Ok(())
    } else {
        let message = response
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("beacon request failed")
            .to_string();
        Err(Error::AdapterError { underlying: message })
    }
}

async fn run_reader(
    mut reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
    subscribers: Subscribers,
    can_use_tools: CanUseTools,
    one_shot_waiters: OneShotWaiters,
    writer: Arc<AsyncMutex<OwnedWriteHalf>>,
) {
    let mut line = String::new();
    loop {
        line.clear();
        let bytes_read = match reader.read_line(&mut line).await {
            Ok(n) => n,
            Err(_) => break,
        };
        if bytes_read == 0 {
            break;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let Ok(value) = serde_json::from_str::<Value>(trimmed) else {
            continue;
        };

        match value.get("type").and_then(Value::as_str) {
            Some("event") => handle_event_frame(&value, &subscribers),
            Some("error") => handle_error_frame(&value, &subscribers, &can_use_tools),
            Some("permission_request") => {
                handle_permission_request(&value, &can_use_tools, writer.clone());
            }
            Some("pong") => {}
            Some(_) => {}
            None => {
                if let Some(tx) = one_shot_waiters.lock().pop_front() {
                    let _ = tx.send(value);
                }
            }
        }
    }

    subscribers.lock().clear();
    can_use_tools.lock().clear();
}

fn handle_event_frame(value: &Value, subscribers: &Subscribers) {
    let Some(conv_id) = value.get("conversationId").and_then(Value::as_u64) else {
        return;
    };
    let conv_id = conv_id as u32;
    let Some(message) = value.get("message") else { return };
    let Ok(sdk_message) = serde_json::from_value::<SdkMessage>(message.clone()) else {
        return;
    };

    let is_terminal = matches!(sdk_message, SdkMessage::Result { .. });
    let sent = {
        let guard = subscribers.lock();
        guard.get(&conv_id).map(|tx| tx.send(sdk_message).is_ok())
    };
    if sent.is_none() || is_terminal {
        subscribers.lock().remove(&conv_id);
    }
}

fn handle_error_frame(value: &Value, subscribers: &Subscribers, can_use_tools: &CanUseTools) {
    let Some(conv_id) = value.get("conversationId").and_then(Value::as_u64) else {
        return;
    };
    let conv_id = conv_id as u32;
    // Dropping the sender (without forwarding a value) ends the stream;
    // the Session Manager surfaces a terminal error on its own via the
    // adapter's `Err` path only for the initial `query()` call, so a
    // mid-stream error here simply closes the channel the same way a
    // same-process adapter's failed future would.
    subscribers.lock().remove(&conv_id);
    can_use_tools.lock().remove(&conv_id);
    if let Some(message) = value.get("error").and_then(Value::as_str) {
        tracing::warn!(conv_id, error = %message, "beacon reported a query error");
    }
}

fn handle_permission_request(value: &Value, can_use_tools: &CanUseTools, writer: Arc<AsyncMutex<OwnedWriteHalf>>) {
    let Some(conv_id) = value.get("conversationId").and_then(Value::as_u64) else {
        return;
    };
    let conv_id = conv_id as u32;
    let Some(tool_use_id) = value.get("toolUseId").and_then(Value::as_str).map(str::to_string) else {
        return;
    };
    let tool_name = value.get("toolName").and_then(Value::as_str).unwrap_or_default().to_string();
    let input = value.get("input").cloned().unwrap_or(Value::Null);
    let can_use_tool = can_use_tools.lock().get(&conv_id).cloned();

    tokio::spawn(async move {
        let result = match can_use_tool {
            Some(handler) => {
                handler
                    .can_use_tool(CanUseToolRequest { tool_name, input, tool_use_id: tool_use_id.clone() })
                    .await
            }
            None => CanUseToolResult::Deny { message: "no pending canUseTool handler for this conversation".into() },
        };

        let frame = match result {
            CanUseToolResult::Allow { updated_input } => json!({
                "action": "permission_response",
                "tool_use_id": tool_use_id,
                "behavior": "allow",
                "updated_input": updated_input,
            }),
            CanUseToolResult::Deny { message } => json!({
                "action": "permission_response",
                "tool_use_id": tool_use_id,
                "behavior": "deny",
                "message": message,
            }),
        };
        let _ = send_line(&writer, &frame).await;
    });
}

async fn send_line(writer: &Arc<AsyncMutex<OwnedWriteHalf>>, value: &Value) -> Result<()> {
    let mut json = serde_json::to_string(value).map_err(|_| Error::InvalidJson)?;
    json.push('\n');
    let mut guard = writer.lock().await;
    guard.write_all(json.as_bytes()).await.map_err(Error::Io)?;
    guard.flush().await.map_err(Error::Io)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_or_error_extracts_message_on_failure() {
        let response = json!({"success": false, "error": "pylon not registered"});
        let err = ok_or_error(&response).unwrap_err();
        assert!(err.to_string().contains("pylon not registered"));
    }

    #[test]
    fn ok_or_error_passes_through_success() {
        let response = json!({"success": true});
        assert!(ok_or_error(&response).is_ok());
    }
}
