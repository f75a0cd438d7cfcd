//! The Worker's local Tool Server (§6.3): TCP, newline-delimited JSON,
//! grounded on `beacon::connection`'s per-socket accept/read/dispatch
//! shape (one task per connection, a single writer line per request, the
//! socket kept open across unknown-action/malformed-JSON responses per
//! §7).
//!
//! `lookup_and_*` actions first resolve `toolUseId -> convId` through
//! `BeaconLink::lookup` — the MCP tool process calling in only knows its
//! own `toolUseId`, never the conversation it belongs to.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use pylon_domain::entities::{ConversationStatus, MessageBody, PermissionMode, Role};
use pylon_domain::id::ConvId;
use pylon_messages::MessageStore;
use pylon_protocol::toolserver::{ToolServerRequest, ToolServerResponse};
use pylon_workspace::WorkspaceStore;

use crate::beacon_link::BeaconLink;

/// Invoked when `lookup_and_create_conversation` succeeds, so the caller
/// (the worker binary) can wire autorun detection / status broadcast
/// without this module depending on either.
pub trait ConversationCreateHook: Send + Sync {
    fn on_conversation_create(&self, conv_id: ConvId);
}

pub struct ToolServer {
    workspace: Arc<WorkspaceStore>,
    messages: Arc<MessageStore>,
    beacon: Arc<BeaconLink>,
    on_create: Arc<dyn ConversationCreateHook>,
}

impl ToolServer {
    pub fn new(
        workspace: Arc<WorkspaceStore>,
        messages: Arc<MessageStore>,
        beacon: Arc<BeaconLink>,
        on_create: Arc<dyn ConversationCreateHook>,
    ) -> Self {
        Self { workspace, messages, beacon, on_create }
    }

    pub async fn serve(self: Arc<Self>, listener: TcpListener) {
        loop {
            let (socket, peer) = match listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::warn!(error = %e, "tool server accept failed");
                    continue;
                }
            };
            tracing::debug!(peer = %peer, "tool server connection accepted");
            let server = self.clone();
            tokio::spawn(async move {
                server.handle_connection(socket).await;
            });
        }
    }

    async fn handle_connection(self: Arc<Self>, socket: TcpStream) {
        let (read_half, mut write_half) = socket.into_split();
        let mut reader = BufReader::new(read_half);
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

            let response = self.dispatch(trimmed).await;
            if write_response(&mut write_half, &response).await.is_err() {
                break;
            }
        }
    }

    async fn dispatch(&self, line: &str) -> ToolServerResponse {
        let request: ToolServerRequest = match pylon_protocol::parse_tagged_request(line, "action") {
            pylon_protocol::ParsedRequest::Ok(req) => req,
            pylon_protocol::ParsedRequest::UnknownAction(action) => {
                return ToolServerResponse::unknown_action(&action)
            }
            pylon_protocol::ParsedRequest::InvalidJson => return ToolServerResponse::invalid_json(),
        };

        match request {
            ToolServerRequest::Link { conv_id, path } => match parse_conv_id(conv_id) {
                Ok(conv_id) => self.link(conv_id, &path),
                Err(e) => e,
            },
            ToolServerRequest::Unlink { conv_id, path } => match parse_conv_id(conv_id) {
                Ok(conv_id) => self.unlink(conv_id, &path),
                Err(e) => e,
            },
            ToolServerRequest::List { conv_id } => match parse_conv_id(conv_id) {
                Ok(conv_id) => self.list(conv_id),
                Err(e) => e,
            },
            ToolServerRequest::SendFile { conv_id, path, description } => match parse_conv_id(conv_id) {
                Ok(conv_id) => self.send_file(conv_id, path, description),
                Err(e) => e,
            },
            ToolServerRequest::GetStatus { conv_id } => match parse_conv_id(conv_id) {
                Ok(conv_id) => self.get_status(conv_id),
                Err(e) => e,
            },
            ToolServerRequest::LookupAndLink { tool_use_id, path } => {
                match self.resolve(&tool_use_id).await {
                    Ok(conv_id) => self.link(conv_id, &path),
                    Err(e) => e,
                }
            }
            ToolServerRequest::LookupAndUnlink { tool_use_id, path } => {
                match self.resolve(&tool_use_id).await {
                    Ok(conv_id) => self.unlink(conv_id, &path),
                    Err(e) => e,
                }
            }
            ToolServerRequest::LookupAndList { tool_use_id } => match self.resolve(&tool_use_id).await {
                Ok(conv_id) => self.list(conv_id),
                Err(e) => e,
            },
            ToolServerRequest::LookupAndSendFile { tool_use_id, path, description } => {
                match self.resolve(&tool_use_id).await {
                    Ok(conv_id) => self.send_file(conv_id, path, description),
                    Err(e) => e,
                }
            }
            ToolServerRequest::LookupAndGetStatus { tool_use_id } => match self.resolve(&tool_use_id).await {
                Ok(conv_id) => self.get_status(conv_id),
                Err(e) => e,
            },
            ToolServerRequest::LookupAndCreateConversation { tool_use_id, name } => {
                self.lookup_and_create_conversation(&tool_use_id, name).await
            }
        }
    }

    /// `toolUseId -> convId` via Beacon's `lookup` (§4.5's "tool
    /// callbacks must never embed host/port" rule; the reverse direction
    /// — resolving a conversation — is this method's job).
    async fn resolve(&self, tool_use_id: &str) -> Result<ConvId, ToolServerResponse> {
        let lookup = self.beacon.lookup(tool_use_id).await.map_err(|e| ToolServerResponse::err(e.to_string()))?;
        parse_conv_id(lookup.conv_id)
    }

    fn link(&self, conv_id: ConvId, path: &str) -> ToolServerResponse {
        match self.workspace.link_document(conv_id, path) {
            Ok(()) => ToolServerResponse::ok(),
            Err(e) => ToolServerResponse::err(e.as_response_message()),
        }
    }

    fn unlink(&self, conv_id: ConvId, path: &str) -> ToolServerResponse {
        match self.workspace.unlink_document(conv_id, path) {
            Ok(()) => ToolServerResponse::ok(),
            Err(e) => ToolServerResponse::err(e.as_response_message()),
        }
    }

    fn list(&self, conv_id: ConvId) -> ToolServerResponse {
        match self.workspace.list_documents(conv_id) {
            Ok(documents) => ToolServerResponse { success: true, documents: Some(documents), ..Default::default() },
            Err(e) => ToolServerResponse::err(e.as_response_message()),
        }
    }

    fn send_file(&self, conv_id: ConvId, path: String, description: Option<String>) -> ToolServerResponse {
        match self.messages.append(conv_id, Role::System, MessageBody::FileAttachment { path, description }) {
            Ok(_) => ToolServerResponse::ok(),
            Err(e) => ToolServerResponse::err(e.as_response_message()),
        }
    }

    fn get_status(&self, conv_id: ConvId) -> ToolServerResponse {
        match self.workspace.get_conversation(conv_id) {
            Some(conversation) => ToolServerResponse {
                success: true,
                status: Some(serde_json::json!({
                    "status": status_label(conversation.status),
                    "unread": conversation.unread,
                    "permissionMode": permission_label(conversation.permission_mode),
                })),
                ..Default::default()
            },
            None => ToolServerResponse::err(
                pylon_domain::error::Error::not_found(pylon_domain::error::EntityKind::Conversation, conv_id.raw().to_string())
                    .as_response_message(),
            ),
        }
    }

    async fn lookup_and_create_conversation(&self, tool_use_id: &str, name: String) -> ToolServerResponse {
        let conv_id = match self.resolve(tool_use_id).await {
            Ok(id) => id,
            Err(e) => return e,
        };
        match self.workspace.create_conversation(conv_id.workspace(), name) {
            Ok(new_conv_id) => {
                self.on_create.on_conversation_create(new_conv_id);
                ToolServerResponse { success: true, conv_id: Some(new_conv_id.raw()), ..Default::default() }
            }
            Err(e) => ToolServerResponse::err(e.as_response_message()),
        }
    }
}

fn parse_conv_id(raw: u32) -> Result<ConvId, ToolServerResponse> {
    ConvId::try_from(raw).map_err(|e| ToolServerResponse::err(e.as_response_message()))
}

fn status_label(status: ConversationStatus) -> &'static str {
    match status {
        ConversationStatus::Idle => "idle",
        ConversationStatus::Working => "working",
        ConversationStatus::Waiting => "waiting",
        ConversationStatus::Offline => "offline",
    }
}

fn permission_label(mode: PermissionMode) -> &'static str {
    match mode {
        PermissionMode::Default => "default",
        PermissionMode::AcceptEdits => "acceptEdits",
        PermissionMode::BypassPermissions => "bypassPermissions",
    }
}

async fn write_response(
    write_half: &mut tokio::net::tcp::OwnedWriteHalf,
    response: &ToolServerResponse,
) -> std::io::Result<()> {
    let mut json = serde_json::to_string(response).unwrap_or_else(|_| "{\"success\":false}".to_string());
    json.push('\n');
    write_half.write_all(json.as_bytes()).await?;
    write_half.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_label_matches_wire_vocabulary() {
        assert_eq!(status_label(ConversationStatus::Waiting), "waiting");
    }

    #[test]
    fn permission_label_matches_wire_vocabulary() {
        assert_eq!(permission_label(PermissionMode::AcceptEdits), "acceptEdits");
    }
}
