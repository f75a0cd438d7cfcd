//! The Session Manager (§4.4): one object per running `convId` turn,
//! driving the adapter's message stream into Message Store writes and a
//! caller-injected event stream. Grounded on the teacher's
//! `runtime::{turn,cancel,approval}` trio — `run_turn`'s spawn-a-channel
//! shape, `cancel::CancelToken`'s cooperative-cancellation discipline,
//! and `approval::ApprovalStore`'s oneshot-keyed pending map (here
//! generalized into `pylon_link::PendingRegistry`).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::Value;

use pylon_domain::entities::{
    ConversationStatus, MessageBody, PermissionDecision, PermissionMode, Role,
};
use pylon_domain::error::Result;
use pylon_domain::id::ConvId;
use pylon_link::PendingRegistry;
use pylon_messages::MessageStore;
use pylon_workspace::WorkspaceStore;

use crate::adapter::{
    AssistantMessage, CanUseTool, CanUseToolRequest, CanUseToolResult, ContentBlock, LlmAdapter,
    QueryOptions, SdkMessage, StreamEventKind, SystemSubtype,
};
use crate::events::{SessionEvent, SessionEventSink};
use crate::permission::{generate_tool_use_id, PermissionPolicy, PermissionVerdict};
use crate::state::{SessionRuntime, TurnState};

/// Truncation applied to a tool's completion output/error *in the event
/// stream*, distinct from the Message Store's own (tighter) summarization.
const EVENT_OUTPUT_TRUNCATE_AT: usize = 1000;
const EVENT_ERROR_TRUNCATE_AT: usize = 200;

/// Teardown grace period `sendMessage` waits after cancelling a running
/// turn before starting the next one (§4.4).
const CANCEL_TEARDOWN_DELAY: Duration = Duration::from_millis(200);

#[derive(Debug, Clone)]
enum PermissionOutcome {
    Allow { updated_input: Option<Value> },
    Deny { message: String },
}

#[derive(Debug, Clone)]
enum QuestionOutcome {
    Answered(String),
    Stopped,
}

#[derive(Debug, Clone, Default)]
pub struct SendMessageOptions {
    pub working_dir: String,
    pub claude_session_id: Option<String>,
    pub system_prompt: Option<String>,
    pub system_reminder: Option<String>,
}

pub struct SessionManager<A: LlmAdapter> {
    adapter: Arc<A>,
    workspace: Arc<WorkspaceStore>,
    messages: Arc<MessageStore>,
    policy: Arc<dyn PermissionPolicy>,
    sink: Arc<dyn SessionEventSink>,
    running: parking_lot::RwLock<HashMap<ConvId, Arc<SessionRuntime>>>,
    last_event: parking_lot::RwLock<HashMap<ConvId, SessionEvent>>,
    permissions: PendingRegistry<String, PermissionOutcome>,
    questions: PendingRegistry<String, QuestionOutcome>,
}

impl<A: LlmAdapter + 'static> SessionManager<A> {
    pub fn new(
        adapter: Arc<A>,
        workspace: Arc<WorkspaceStore>,
        messages: Arc<MessageStore>,
        policy: Arc<dyn PermissionPolicy>,
        sink: Arc<dyn SessionEventSink>,
    ) -> Self {
        Self {
            adapter,
            workspace,
            messages,
            policy,
            sink,
            running: parking_lot::RwLock::new(HashMap::new()),
            last_event: parking_lot::RwLock::new(HashMap::new()),
            permissions: PendingRegistry::new(),
            questions: PendingRegistry::new(),
        }
    }

    fn emit(&self, conv_id: ConvId, event: SessionEvent) {
        self.last_event.write().insert(conv_id, event.clone());
        self.sink.emit(conv_id, event);
    }

    fn set_status(&self, conv_id: ConvId, status: ConversationStatus) {
        let _ = self.workspace.set_status(conv_id, status);
        self.emit(conv_id, SessionEvent::State { status });
    }

    // ── Query operations ─────────────────────────────────────────────

    pub fn has_active_session(&self, conv_id: ConvId) -> bool {
        self.running.read().contains_key(&conv_id)
    }

    pub fn get_session_start_time(&self, conv_id: ConvId) -> Option<std::time::Instant> {
        self.running.read().get(&conv_id).map(|r| r.started_at)
    }

    pub fn get_active_session_ids(&self) -> Vec<ConvId> {
        self.running.read().keys().copied().collect()
    }

    pub fn get_pending_event(&self, conv_id: ConvId) -> Option<SessionEvent> {
        self.last_event.read().get(&conv_id).cloned()
    }

    pub fn abort_all_sessions(self: &Arc<Self>) {
        let ids = self.get_active_session_ids();
        for conv_id in ids {
            self.stop(conv_id);
        }
    }

    // ── Commands ──────────────────────────────────────────────────────

    /// At-most-one active invocation per `convId`: cancels and waits out
    /// any running turn before starting the new one.
    pub async fn send_message(
        self: &Arc<Self>,
        conv_id: ConvId,
        prompt: String,
        options: SendMessageOptions,
    ) -> Result<()> {
        if self.has_active_session(conv_id) {
            self.stop(conv_id);
            tokio::time::sleep(CANCEL_TEARDOWN_DELAY).await;
        }

        let runtime = Arc::new(SessionRuntime::new());
        self.running.write().insert(conv_id, runtime.clone());

        let manager = self.clone();
        tokio::spawn(async move {
            manager.run_turn(conv_id, runtime, prompt, options).await;
        });

        Ok(())
    }

    /// Best-effort cancel. Always ends in `idle`; rejects every pending
    /// permission/question for `convId` with a "Stopped" denial.
    pub fn stop(&self, conv_id: ConvId) {
        if let Some(runtime) = self.running.read().get(&conv_id).cloned() {
            runtime.cancel.cancel();

            let permission_ids = std::mem::take(&mut *runtime.pending_permission_ids.lock());
            for id in permission_ids {
                self.permissions.resolve(
                    &id,
                    PermissionOutcome::Deny {
                        message: "Stopped".into(),
                    },
                );
            }

            let question_ids = std::mem::take(&mut *runtime.pending_question_ids.lock());
            for id in question_ids {
                self.questions.resolve(&id, QuestionOutcome::Stopped);
            }
        }

        self.set_status(conv_id, ConversationStatus::Idle);
    }

    /// Resolves a waiting permission request. `allow`/`allowAll` returns
    /// the original input — no input edits. No-op if unmatched.
    pub fn respond_permission(
        &self,
        conv_id: ConvId,
        tool_use_id: &str,
        decision: PermissionDecision,
    ) -> bool {
        let outcome = match decision {
            PermissionDecision::Allow | PermissionDecision::AllowAll => {
                PermissionOutcome::Allow { updated_input: None }
            }
            PermissionDecision::Deny => PermissionOutcome::Deny {
                message: "Denied by user".into(),
            },
        };

        let resolved = self.permissions.resolve(&tool_use_id.to_string(), outcome);
        if resolved {
            if let Some(runtime) = self.running.read().get(&conv_id) {
                runtime
                    .pending_permission_ids
                    .lock()
                    .retain(|id| id != tool_use_id);
            }
        }
        resolved
    }

    /// Resolves a pending `AskUserQuestion`; falls back to the first
    /// pending question of `convId` if `tool_use_id` is unmatched.
    pub fn respond_question(&self, conv_id: ConvId, tool_use_id: Option<&str>, answer: String) -> bool {
        let target_id = {
            let running = self.running.read();
            let Some(runtime) = running.get(&conv_id) else {
                return false;
            };
            match tool_use_id {
                Some(id) if self.questions.contains(&id.to_string()) => Some(id.to_string()),
                _ => runtime.pending_question_ids.lock().first().cloned(),
            }
        };

        let Some(id) = target_id else {
            return false;
        };

        let resolved = self
            .questions
            .resolve(&id, QuestionOutcome::Answered(answer));
        if resolved {
            if let Some(runtime) = self.running.read().get(&conv_id) {
                runtime.pending_question_ids.lock().retain(|qid| qid != &id);
            }
        }
        resolved
    }

    // ── Turn execution ────────────────────────────────────────────────

    async fn run_turn(
        self: Arc<Self>,
        conv_id: ConvId,
        runtime: Arc<SessionRuntime>,
        prompt: String,
        options: SendMessageOptions,
    ) {
        self.set_status(conv_id, ConversationStatus::Working);

        let _ = self
            .messages
            .append(conv_id, Role::User, MessageBody::UserText { text: prompt.clone() });

        let final_prompt = match (&options.claude_session_id, &options.system_reminder) {
            (None, Some(reminder)) => {
                format!("<system-reminder>\n{reminder}\n</system-reminder>\n<prompt>\n{prompt}\n</prompt>")
            }
            _ => prompt,
        };

        let conversation = self.workspace.get_conversation(conv_id);
        let mode = conversation
            .as_ref()
            .map(|c| c.permission_mode)
            .unwrap_or(PermissionMode::Default);

        let can_use_tool: Arc<dyn CanUseTool> = Arc::new(SessionCanUseTool {
            manager: self.clone(),
            conv_id,
            runtime: runtime.clone(),
            mode,
        });

        let query_options = QueryOptions {
            prompt: final_prompt,
            cwd: options.working_dir,
            abort: runtime.cancel.clone(),
            conversation_id: Some(conv_id.raw()),
            include_partial_messages: true,
            setting_sources: Vec::new(),
            resume: options.claude_session_id,
            mcp_servers: None,
            env: None,
            can_use_tool: Some(can_use_tool),
        };

        let mut stream = match self.adapter.query(query_options).await {
            Ok(stream) => stream,
            Err(err) => {
                self.finish_with_error(conv_id, &runtime, err.to_string()).await;
                return;
            }
        };

        loop {
            tokio::select! {
                _ = runtime.cancel.cancelled() => {
                    self.finish_cancelled(conv_id, &runtime).await;
                    return;
                }
                next = stream.next() => {
                    match next {
                        Some(message) => {
                            if let Err(err) = self.handle_sdk_message(conv_id, &runtime, message) {
                                self.finish_with_error(conv_id, &runtime, err.to_string()).await;
                                return;
                            }
                        }
                        None => {
                            self.finish_success(conv_id, &runtime).await;
                            return;
                        }
                    }
                }
            }
        }
    }

    fn handle_sdk_message(
        &self,
        conv_id: ConvId,
        runtime: &SessionRuntime,
        message: SdkMessage,
    ) -> Result<()> {
        match message {
            SdkMessage::System {
                subtype,
                session_id,
                model,
                tools,
                ..
            } => match subtype {
                SystemSubtype::Init => {
                    if let Some(session_id) = session_id.clone() {
                        *runtime.sdk_session_id.lock() = Some(session_id.clone());
                        let _ = self.workspace.set_claude_session_id(conv_id, Some(session_id));
                    }
                    self.emit(
                        conv_id,
                        SessionEvent::Init {
                            sdk_session_id: session_id.unwrap_or_default(),
                            model: model.unwrap_or_default(),
                            tools: tools.unwrap_or_default(),
                        },
                    );
                }
                SystemSubtype::CompactBoundary => {
                    self.emit(conv_id, SessionEvent::CompactStart);
                    self.emit(conv_id, SessionEvent::CompactComplete);
                }
                SystemSubtype::Status => {}
            },
            SdkMessage::Assistant {
                message,
                parent_tool_use_id,
            } => self.handle_assistant_message(conv_id, runtime, message, parent_tool_use_id),
            SdkMessage::User { message, .. } => {
                for block in message.content {
                    self.handle_tool_result(conv_id, runtime, block);
                }
            }
            SdkMessage::StreamEvent { event, data } => {
                if event == StreamEventKind::ContentBlockDelta {
                    if let Some(delta) = data.get("text").and_then(Value::as_str) {
                        *runtime.turn_state.lock() = Some(TurnState::Responding);
                        runtime.text_buffer.lock().push_str(delta);
                        self.emit(conv_id, SessionEvent::Text { delta: delta.to_string() });
                    }
                }
            }
            SdkMessage::ToolProgress {
                tool_name,
                elapsed_time_seconds,
            } => {
                let tool_use_id = runtime
                    .pending_tools
                    .lock()
                    .iter()
                    .find(|(_, name)| **name == tool_name)
                    .map(|(id, _)| id.clone());
                self.emit(
                    conv_id,
                    SessionEvent::ToolProgress {
                        tool_use_id,
                        tool_name,
                        elapsed_time_seconds,
                    },
                );
            }
            SdkMessage::Result { .. } => {
                // Terminal marker handled uniformly by stream exhaustion
                // (`finish_success`); nothing further to do here.
            }
        }
        Ok(())
    }

    fn handle_assistant_message(
        &self,
        conv_id: ConvId,
        runtime: &SessionRuntime,
        message: AssistantMessage,
        parent_tool_use_id: Option<String>,
    ) {
        let text_blocks: Vec<&str> = message
            .content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();

        if !text_blocks.is_empty() {
            let joined = text_blocks.join("\n\n");
            self.emit(conv_id, SessionEvent::TextComplete { text: joined.clone() });
            let _ = self
                .messages
                .append(conv_id, Role::Assistant, MessageBody::AssistantText { text: joined });
            runtime.text_buffer.lock().clear();
        }

        for block in &message.content {
            if let ContentBlock::ToolUse { id, name, input } = block {
                runtime.pending_tools.lock().insert(id.clone(), name.clone());
                *runtime.turn_state.lock() = Some(TurnState::Tool(name.clone()));
                self.emit(
                    conv_id,
                    SessionEvent::ToolInfo {
                        tool_use_id: id.clone(),
                        tool_name: name.clone(),
                        input: input.clone(),
                        parent_tool_use_id: parent_tool_use_id.clone(),
                    },
                );
                let _ = self.messages.append(
                    conv_id,
                    Role::Assistant,
                    MessageBody::ToolStart {
                        tool_name: name.clone(),
                        tool_input: pylon_messages::summarize_tool_input(name, input),
                        parent_tool_use_id: parent_tool_use_id.clone(),
                    },
                );
            }
        }

        if let Some(usage) = message.usage {
            let mut totals = runtime.usage.lock();
            totals.add(usage.input_tokens, usage.output_tokens);
            self.emit(
                conv_id,
                SessionEvent::UsageUpdate {
                    input_tokens: totals.input_tokens,
                    output_tokens: totals.output_tokens,
                },
            );
        }
    }

    fn handle_tool_result(
        &self,
        conv_id: ConvId,
        runtime: &SessionRuntime,
        block: crate::adapter::ToolResultBlock,
    ) {
        let tool_name = runtime
            .pending_tools
            .lock()
            .remove(&block.tool_use_id)
            .unwrap_or_else(|| "unknown".to_string());

        let success = !block.is_error;
        let raw = block
            .content
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| block.content.to_string());

        let (output, error) = if success {
            (Some(truncate(&raw, EVENT_OUTPUT_TRUNCATE_AT)), None)
        } else {
            (None, Some(truncate(&raw, EVENT_ERROR_TRUNCATE_AT)))
        };

        self.emit(
            conv_id,
            SessionEvent::ToolComplete {
                tool_use_id: block.tool_use_id,
                tool_name: tool_name.clone(),
                success,
                output: output.clone(),
                error: error.clone(),
            },
        );

        let _ = self
            .messages
            .update_tool_complete(conv_id, &tool_name, success, output, error);
    }

    /// Removes `conv_id`'s `running` entry only if it still points at
    /// `runtime` — a `send_message` that raced ahead with a fresh
    /// `SessionRuntime` while this turn was tearing down must not have its
    /// new entry evicted by the old turn's cleanup.
    fn evict_if_current(&self, conv_id: ConvId, runtime: &Arc<SessionRuntime>) {
        let mut running = self.running.write();
        if let std::collections::hash_map::Entry::Occupied(entry) = running.entry(conv_id) {
            if Arc::ptr_eq(entry.get(), runtime) {
                entry.remove();
            }
        }
    }

    async fn finish_success(&self, conv_id: ConvId, runtime: &Arc<SessionRuntime>) {
        let duration_ms = runtime.started_at.elapsed().as_millis() as u64;
        let totals = *runtime.usage.lock();
        self.evict_if_current(conv_id, runtime);
        self.emit(
            conv_id,
            SessionEvent::Result {
                duration_ms,
                success: true,
                input_tokens: totals.input_tokens,
                output_tokens: totals.output_tokens,
            },
        );
        self.set_status(conv_id, ConversationStatus::Idle);
    }

    async fn finish_cancelled(&self, conv_id: ConvId, runtime: &Arc<SessionRuntime>) {
        self.evict_if_current(conv_id, runtime);
        let _ = self.messages.append(
            conv_id,
            Role::System,
            MessageBody::Aborted {
                reason: "Stopped".into(),
            },
        );
        self.emit(conv_id, SessionEvent::ClaudeAborted { reason: "user".into() });
        self.set_status(conv_id, ConversationStatus::Idle);
    }

    async fn finish_with_error(&self, conv_id: ConvId, runtime: &Arc<SessionRuntime>, message: String) {
        self.evict_if_current(conv_id, runtime);
        let _ = self.messages.append(
            conv_id,
            Role::System,
            MessageBody::SystemError {
                message: message.clone(),
            },
        );
        self.emit(conv_id, SessionEvent::Error { message });
        self.set_status(conv_id, ConversationStatus::Idle);
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max).collect();
        format!("{head}...")
    }
}

struct SessionCanUseTool<A: LlmAdapter> {
    manager: Arc<SessionManager<A>>,
    conv_id: ConvId,
    runtime: Arc<SessionRuntime>,
    mode: PermissionMode,
}

#[async_trait]
impl<A: LlmAdapter + 'static> CanUseTool for SessionCanUseTool<A> {
    async fn can_use_tool(&self, request: CanUseToolRequest) -> CanUseToolResult {
        if request.tool_name == "AskUserQuestion" {
            return self.ask_question(request).await;
        }

        match self
            .manager
            .policy
            .evaluate(&request.tool_name, &request.input, self.mode)
        {
            PermissionVerdict::Allow { updated_input } => CanUseToolResult::Allow { updated_input },
            PermissionVerdict::Deny { message } => CanUseToolResult::Deny { message },
            PermissionVerdict::Ask => self.ask_permission(request).await,
        }
    }
}

impl<A: LlmAdapter + 'static> SessionCanUseTool<A> {
    async fn ask_question(&self, request: CanUseToolRequest) -> CanUseToolResult {
        let id = request.tool_use_id.clone();
        self.runtime.pending_question_ids.lock().push(id.clone());
        self.manager.emit(
            self.conv_id,
            SessionEvent::AskQuestion {
                tool_use_id: id.clone(),
                input: request.input.clone(),
            },
        );
        self.manager.set_status(self.conv_id, ConversationStatus::Waiting);

        let rx = self.manager.questions.register(id);
        let outcome = rx.await.unwrap_or(QuestionOutcome::Stopped);

        self.manager.set_status(self.conv_id, ConversationStatus::Working);

        match outcome {
            QuestionOutcome::Answered(answer) => {
                let mut updated = request.input;
                if let Value::Object(ref mut map) = updated {
                    let mut answers = serde_json::Map::new();
                    answers.insert("0".to_string(), Value::String(answer));
                    map.insert("answers".to_string(), Value::Object(answers));
                }
                CanUseToolResult::Allow {
                    updated_input: Some(updated),
                }
            }
            QuestionOutcome::Stopped => CanUseToolResult::Deny {
                message: "Stopped".into(),
            },
        }
    }

    async fn ask_permission(&self, request: CanUseToolRequest) -> CanUseToolResult {
        let public_id = generate_tool_use_id();
        self.runtime
            .pending_permission_ids
            .lock()
            .push(public_id.clone());

        self.manager.emit(
            self.conv_id,
            SessionEvent::PermissionRequest {
                tool_use_id: public_id.clone(),
                tool_name: request.tool_name.clone(),
                input: request.input.clone(),
            },
        );
        self.manager.set_status(self.conv_id, ConversationStatus::Waiting);

        let rx = self.manager.permissions.register(public_id);
        let outcome = rx.await.unwrap_or(PermissionOutcome::Deny {
            message: "Stopped".into(),
        });

        self.manager.set_status(self.conv_id, ConversationStatus::Working);

        match outcome {
            PermissionOutcome::Allow { updated_input } => CanUseToolResult::Allow { updated_input },
            PermissionOutcome::Deny { message } => CanUseToolResult::Deny { message },
        }
    }
}
