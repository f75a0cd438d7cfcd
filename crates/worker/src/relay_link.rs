//! The Worker's outbound link to Relay (§6.4): authenticates as a `pylon`
//! device via `pylon_link::RelayLinkClient`, forwards the Session
//! Manager's event stream out, and dispatches inbound app commands into
//! `SessionManager`/`WorkspaceStore`/`MessageStore`.
//!
//! §6.4 leaves the `type` vocabulary of forward-routed frames entirely to
//! the implementer ("any forward-routed type"); the command/event names
//! below are this Worker's own, chosen to mirror `pylon_session`'s public
//! operation names one-for-one so the wire surface needs no separate
//! translation table.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use pylon_domain::entities::{PermissionDecision, PermissionMode};
use pylon_domain::id::ConvId;
use pylon_messages::MessageStore;
use pylon_session::{SendMessageOptions, SessionEvent, SessionEventSink, SessionManager};
use pylon_workspace::WorkspaceStore;

use crate::beacon_link::BeaconLink;

const INBOUND_CHANNEL_CAPACITY: usize = 256;
const OUTBOUND_CHANNEL_CAPACITY: usize = 256;

/// Forwards a `SessionManager`'s event stream to Relay as `session_event`
/// frames broadcast to every connected `app` client.
pub struct RelayEventSink {
    outbound: mpsc::Sender<Value>,
}

impl RelayEventSink {
    pub fn new(outbound: mpsc::Sender<Value>) -> Self {
        Self { outbound }
    }
}

impl SessionEventSink for RelayEventSink {
    fn emit(&self, conv_id: ConvId, event: SessionEvent) {
        let frame = json!({
            "type": "session_event",
            "broadcast": "app",
            "payload": {"convId": conv_id.raw(), "event": event},
        });
        let _ = self.outbound.try_send(frame);
    }
}

/// Inbound command vocabulary, one variant per `SessionManager`/store
/// operation this Worker exposes to app clients. `requestId` round-trips
/// so the sender can correlate a `command_result` frame; omitted entirely
/// means no reply is sent.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum AppCommand {
    SendMessage {
        conv_id: u32,
        prompt: String,
        #[serde(default)]
        working_dir: String,
        #[serde(default)]
        claude_session_id: Option<String>,
        #[serde(default)]
        system_prompt: Option<String>,
        #[serde(default)]
        system_reminder: Option<String>,
        #[serde(default)]
        request_id: Option<String>,
    },
    Stop {
        conv_id: u32,
        #[serde(default)]
        request_id: Option<String>,
    },
    RespondPermission {
        conv_id: u32,
        tool_use_id: String,
        decision: PermissionDecision,
        #[serde(default)]
        request_id: Option<String>,
    },
    RespondQuestion {
        conv_id: u32,
        #[serde(default)]
        tool_use_id: Option<String>,
        answer: String,
        #[serde(default)]
        request_id: Option<String>,
    },
    CreateWorkspace {
        name: String,
        working_dir: String,
        #[serde(default)]
        request_id: Option<String>,
    },
    RenameWorkspace {
        workspace_id: u16,
        name: String,
        #[serde(default)]
        request_id: Option<String>,
    },
    DeleteWorkspace {
        workspace_id: u16,
        #[serde(default)]
        request_id: Option<String>,
    },
    ListWorkspaces {
        #[serde(default)]
        request_id: Option<String>,
    },
    CreateConversation {
        workspace_id: u16,
        name: String,
        #[serde(default)]
        request_id: Option<String>,
    },
    DeleteConversation {
        conv_id: u32,
        #[serde(default)]
        request_id: Option<String>,
    },
    ListConversations {
        workspace_id: u16,
        #[serde(default)]
        request_id: Option<String>,
    },
    LinkDocument {
        conv_id: u32,
        path: String,
        #[serde(default)]
        request_id: Option<String>,
    },
    UnlinkDocument {
        conv_id: u32,
        path: String,
        #[serde(default)]
        request_id: Option<String>,
    },
    ListDocuments {
        conv_id: u32,
        #[serde(default)]
        request_id: Option<String>,
    },
    SetActiveWorkspace {
        workspace_id: u16,
        #[serde(default)]
        conv_id: Option<u32>,
        #[serde(default)]
        request_id: Option<String>,
    },
    SetPermissionMode {
        conv_id: u32,
        mode: PermissionMode,
        #[serde(default)]
        request_id: Option<String>,
    },
    SetCustomSystemPrompt {
        conv_id: u32,
        #[serde(default)]
        prompt: Option<String>,
        #[serde(default)]
        request_id: Option<String>,
    },
    GetMessages {
        conv_id: u32,
        #[serde(default = "default_limit")]
        limit: usize,
        #[serde(default)]
        offset: usize,
        #[serde(default)]
        request_id: Option<String>,
    },
    GetSharedMessageHistory {
        conv_id: u32,
        #[serde(default)]
        request_id: Option<String>,
    },
}

fn default_limit() -> usize {
    50
}

/// Dispatches inbound app commands against the Worker's state, wraps
/// results into `command_result` frames addressed back to the sender.
pub struct CommandRouter {
    session: Arc<SessionManager<BeaconLink>>,
    workspace: Arc<WorkspaceStore>,
    messages: Arc<MessageStore>,
    outbound: mpsc::Sender<Value>,
}

impl CommandRouter {
    pub fn new(
        session: Arc<SessionManager<BeaconLink>>,
        workspace: Arc<WorkspaceStore>,
        messages: Arc<MessageStore>,
        outbound: mpsc::Sender<Value>,
    ) -> Self {
        Self { session, workspace, messages, outbound }
    }

    /// Parses and dispatches one inbound Relay frame's `payload`. Frames
    /// with an unrecognized `type` are ignored — they belong to Relay's
    /// own control surface (`auth_result`, `device_status`, …) or to a
    /// command vocabulary this Worker doesn't speak, not an error.
    pub async fn handle_frame(&self, frame: Value) {
        let Some(frame_type) = frame.get("type").and_then(Value::as_str) else {
            return;
        };
        let Some(from) = frame.get("from").and_then(Value::as_u64) else {
            return;
        };
        let payload = frame.get("payload").cloned().unwrap_or(Value::Null);

        let mut tagged = payload;
        if let Value::Object(ref mut map) = tagged {
            map.insert("type".into(), Value::String(frame_type.to_string()));
        } else {
            return;
        }

        let Ok(command) = serde_json::from_value::<AppCommand>(tagged) else {
            return;
        };

        if let Some((request_id, result)) = self.dispatch(command).await {
            let frame = json!({
                "type": "command_result",
                "to": from as u8,
                "payload": {"requestId": request_id, "result": result},
            });
            let _ = self.outbound.send(frame).await;
        }
    }

    async fn dispatch(&self, command: AppCommand) -> Option<(Option<String>, Value)> {
        match command {
            AppCommand::SendMessage { conv_id, prompt, working_dir, claude_session_id, system_prompt, system_reminder, request_id } => {
                let result = match parse_conv_id(conv_id) {
                    Ok(conv_id) => self
                        .session
                        .send_message(
                            conv_id,
                            prompt,
                            SendMessageOptions { working_dir, claude_session_id, system_prompt, system_reminder },
                        )
                        .await
                        .map(|()| json!({"success": true}))
                        .unwrap_or_else(|e| json!({"success": false, "error": e.as_response_message()})),
                    Err(e) => e,
                };
                Some((request_id, result))
            }
            AppCommand::Stop { conv_id, request_id } => {
                let result = match parse_conv_id(conv_id) {
                    Ok(conv_id) => {
                        self.session.stop(conv_id);
                        json!({"success": true})
                    }
                    Err(e) => e,
                };
                Some((request_id, result))
            }
            AppCommand::RespondPermission { conv_id, tool_use_id, decision, request_id } => {
                let result = match parse_conv_id(conv_id) {
                    Ok(conv_id) => {
                        let resolved = self.session.respond_permission(conv_id, &tool_use_id, decision);
                        json!({"success": resolved})
                    }
                    Err(e) => e,
                };
                Some((request_id, result))
            }
            AppCommand::RespondQuestion { conv_id, tool_use_id, answer, request_id } => {
                let result = match parse_conv_id(conv_id) {
                    Ok(conv_id) => {
                        let resolved = self.session.respond_question(conv_id, tool_use_id.as_deref(), answer);
                        json!({"success": resolved})
                    }
                    Err(e) => e,
                };
                Some((request_id, result))
            }
            AppCommand::CreateWorkspace { name, working_dir, request_id } => {
                let result = self
                    .workspace
                    .create_workspace(name, working_dir)
                    .map(|id| json!({"success": true, "workspaceId": id.raw()}))
                    .unwrap_or_else(|e| json!({"success": false, "error": e.as_response_message()}));
                Some((request_id, result))
            }
            AppCommand::RenameWorkspace { workspace_id, name, request_id } => {
                let result = parse_workspace_id(workspace_id).and_then(|id| {
                    self.workspace
                        .rename_workspace(id, name)
                        .map(|()| json!({"success": true}))
                        .map_err(|e| json!({"success": false, "error": e.as_response_message()}))
                });
                Some((request_id, result.unwrap_or_else(|e| e)))
            }
            AppCommand::DeleteWorkspace { workspace_id, request_id } => {
                let result = parse_workspace_id(workspace_id).and_then(|id| {
                    self.workspace
                        .delete_workspace(id)
                        .map(|()| json!({"success": true}))
                        .map_err(|e| json!({"success": false, "error": e.as_response_message()}))
                });
                Some((request_id, result.unwrap_or_else(|e| e)))
            }
            AppCommand::ListWorkspaces { request_id } => {
                let workspaces = self.workspace.list_workspaces();
                Some((request_id, json!({"success": true, "workspaces": workspaces})))
            }
            AppCommand::CreateConversation { workspace_id, name, request_id } => {
                let result = parse_workspace_id(workspace_id).and_then(|id| {
                    self.workspace
                        .create_conversation(id, name)
                        .map(|conv_id| json!({"success": true, "convId": conv_id.raw()}))
                        .map_err(|e| json!({"success": false, "error": e.as_response_message()}))
                });
                Some((request_id, result.unwrap_or_else(|e| e)))
            }
            AppCommand::DeleteConversation { conv_id, request_id } => {
                let result = match parse_conv_id(conv_id) {
                    Ok(conv_id) => self
                        .workspace
                        .delete_conversation(conv_id)
                        .map(|()| json!({"success": true}))
                        .unwrap_or_else(|e| json!({"success": false, "error": e.as_response_message()})),
                    Err(e) => e,
                };
                Some((request_id, result))
            }
            AppCommand::ListConversations { workspace_id, request_id } => {
                let result = parse_workspace_id(workspace_id).and_then(|id| {
                    self.workspace
                        .list_conversations(id)
                        .map(|convs| json!({"success": true, "conversations": convs}))
                        .map_err(|e| json!({"success": false, "error": e.as_response_message()}))
                });
                Some((request_id, result.unwrap_or_else(|e| e)))
            }
            AppCommand::LinkDocument { conv_id, path, request_id } => {
                let result = match parse_conv_id(conv_id) {
                    Ok(conv_id) => self
                        .workspace
                        .link_document(conv_id, &path)
                        .map(|()| json!({"success": true}))
                        .unwrap_or_else(|e| json!({"success": false, "error": e.as_response_message()})),
                    Err(e) => e,
                };
                Some((request_id, result))
            }
            AppCommand::UnlinkDocument { conv_id, path, request_id } => {
                let result = match parse_conv_id(conv_id) {
                    Ok(conv_id) => self
                        .workspace
                        .unlink_document(conv_id, &path)
                        .map(|()| json!({"success": true}))
                        .unwrap_or_else(|e| json!({"success": false, "error": e.as_response_message()})),
                    Err(e) => e,
                };
                Some((request_id, result))
            }
            AppCommand::ListDocuments { conv_id, request_id } => {
                let result = match parse_conv_id(conv_id) {
                    Ok(conv_id) => self
                        .workspace
                        .list_documents(conv_id)
                        .map(|documents| json!({"success": true, "documents": documents}))
                        .unwrap_or_else(|e| json!({"success": false, "error": e.as_response_message()})),
                    Err(e) => e,
                };
                Some((request_id, result))
            }
            AppCommand::SetActiveWorkspace { workspace_id, conv_id, request_id } => {
                let result = parse_workspace_id(workspace_id).and_then(|workspace_id| {
                    let conv_id = conv_id.map(parse_conv_id_raw).transpose()?;
                    self.workspace
                        .set_active_workspace(workspace_id, conv_id)
                        .map(|()| json!({"success": true}))
                        .map_err(|e| json!({"success": false, "error": e.as_response_message()}))
                });
                Some((request_id, result.unwrap_or_else(|e| e)))
            }
            AppCommand::SetPermissionMode { conv_id, mode, request_id } => {
                let result = match parse_conv_id(conv_id) {
                    Ok(conv_id) => self
                        .workspace
                        .set_permission_mode(conv_id, mode)
                        .map(|()| json!({"success": true}))
                        .unwrap_or_else(|e| json!({"success": false, "error": e.as_response_message()})),
                    Err(e) => e,
                };
                Some((request_id, result))
            }
            AppCommand::SetCustomSystemPrompt { conv_id, prompt, request_id } => {
                let result = match parse_conv_id(conv_id) {
                    Ok(conv_id) => self
                        .workspace
                        .set_custom_system_prompt(conv_id, prompt)
                        .map(|()| json!({"success": true}))
                        .unwrap_or_else(|e| json!({"success": false, "error": e.as_response_message()})),
                    Err(e) => e,
                };
                Some((request_id, result))
            }
            AppCommand::GetMessages { conv_id, limit, offset, request_id } => {
                let result = match parse_conv_id(conv_id) {
                    Ok(conv_id) => self
                        .messages
                        .get_messages(conv_id, limit, offset)
                        .map(|messages| json!({"success": true, "messages": messages}))
                        .unwrap_or_else(|e| json!({"success": false, "error": e.as_response_message()})),
                    Err(e) => e,
                };
                Some((request_id, result))
            }
            AppCommand::GetSharedMessageHistory { conv_id, request_id } => {
                let result = match parse_conv_id(conv_id) {
                    Ok(conv_id) => self
                        .messages
                        .get_shared_message_history(conv_id)
                        .map(|messages| json!({"success": true, "messages": messages}))
                        .unwrap_or_else(|e| json!({"success": false, "error": e.as_response_message()})),
                    Err(e) => e,
                };
                Some((request_id, result))
            }
        }
    }
}

fn parse_conv_id(raw: u32) -> Result<ConvId, Value> {
    ConvId::try_from(raw).map_err(|e| json!({"success": false, "error": e.as_response_message()}))
}

fn parse_conv_id_raw(raw: u32) -> Result<ConvId, Value> {
    parse_conv_id(raw)
}

fn parse_workspace_id(raw: u16) -> Result<pylon_domain::id::WorkspaceId, Value> {
    pylon_domain::id::WorkspaceId::try_from(raw).map_err(|e| json!({"success": false, "error": e.as_response_message()}))
}

/// Owns the outbound/inbound channel pair wired into `RelayLinkClient`.
/// `run` drives the WebSocket client to completion (until `shutdown`
/// fires or reconnect gives up) while a sibling task drains inbound
/// frames into the router.
pub struct WorkerRelayLink {
    client: pylon_link::RelayLinkClient,
    outbound_tx: mpsc::Sender<Value>,
    outbound_rx: mpsc::Receiver<Value>,
    inbound_tx: mpsc::Sender<Value>,
    inbound_rx: mpsc::Receiver<Value>,
}

impl WorkerRelayLink {
    pub fn new(relay_url: &str, device_index: u8) -> Result<Self, pylon_link::LinkError> {
        let client = pylon_link::RelayLinkBuilder::new()
            .relay_url(relay_url)
            .device_type("pylon")
            .device_index(device_index)
            .build()?;
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        Ok(Self { client, outbound_tx, outbound_rx, inbound_tx, inbound_rx })
    }

    /// A clonable sender any `SessionEventSink`/command reply path can use
    /// to push frames out to Relay.
    pub fn outbound_sender(&self) -> mpsc::Sender<Value> {
        self.outbound_tx.clone()
    }

    /// Runs the link to completion, dispatching every inbound frame to
    /// `router` as it arrives. Returns when the link gives up reconnecting
    /// or `shutdown` is triggered.
    pub async fn run(self, router: Arc<CommandRouter>, shutdown: CancellationToken) {
        let Self { client, outbound_rx, inbound_tx, mut inbound_rx, .. } = self;

        let drain_shutdown = shutdown.clone();
        let drain = tokio::spawn(async move {
            loop {
                tokio::select! {
                    frame = inbound_rx.recv() => {
                        match frame {
                            Some(frame) => router.handle_frame(frame).await,
                            None => break,
                        }
                    }
                    _ = drain_shutdown.cancelled() => break,
                }
            }
        });

        if let Err(e) = client.run(outbound_rx, inbound_tx, shutdown).await {
            tracing::warn!(error = %e, "relay link terminated");
        }
        drain.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_message_command_parses_from_tagged_payload() {
        let payload = json!({
            "type": "sendMessage",
            "convId": 65601,
            "prompt": "hi",
            "workingDir": "/tmp",
        });
        let command: AppCommand = serde_json::from_value(payload).unwrap();
        assert!(matches!(command, AppCommand::SendMessage { conv_id: 65601, .. }));
    }

    #[test]
    fn respond_permission_command_parses_decision() {
        let payload = json!({
            "type": "respondPermission",
            "convId": 1,
            "toolUseId": "perm_1_abc",
            "decision": "allow",
        });
        let command: AppCommand = serde_json::from_value(payload).unwrap();
        assert!(matches!(command, AppCommand::RespondPermission { decision: PermissionDecision::Allow, .. }));
    }
}
