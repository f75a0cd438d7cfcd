//! Per-conversation turn bookkeeping (§4.4): the cancellation handle, the
//! SDK's opaque resume token, the live tagged turn state, and the ids of
//! permission/question requests currently parked for this conversation.
//!
//! Cancellation is cooperative: `CancelHandle` is a [`CancellationToken`]
//! checked at the turn loop's suspension points (the `tokio::select!` in
//! `manager::run_turn`), not a hard interrupt.

use std::collections::HashMap;
use std::time::Instant;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

pub type CancelHandle = CancellationToken;

/// Tagged internal turn state while a session is actively streaming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnState {
    Thinking,
    Responding,
    Tool(String),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UsageTotals {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl UsageTotals {
    pub fn add(&mut self, input_delta: u64, output_delta: u64) {
        self.input_tokens += input_delta;
        self.output_tokens += output_delta;
    }
}

/// Live state for one in-flight turn, held for the lifetime of a single
/// `sendMessage` invocation.
pub struct SessionRuntime {
    pub cancel: CancelHandle,
    pub sdk_session_id: Mutex<Option<String>>,
    pub turn_state: Mutex<Option<TurnState>>,
    pub text_buffer: Mutex<String>,
    pub started_at: Instant,
    /// `toolUseId -> toolName`, for tools the SDK has started but not yet
    /// completed.
    pub pending_tools: Mutex<HashMap<String, String>>,
    pub usage: Mutex<UsageTotals>,
    /// Externally-addressable ids of permission requests currently parked
    /// for this conversation (drained with a "Stopped" denial on `stop`).
    pub pending_permission_ids: Mutex<Vec<String>>,
    /// Ids of pending `AskUserQuestion` requests, in arrival order (the
    /// first entry is the fallback target for an unmatched `toolUseId`).
    pub pending_question_ids: Mutex<Vec<String>>,
}

impl SessionRuntime {
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            sdk_session_id: Mutex::new(None),
            turn_state: Mutex::new(None),
            text_buffer: Mutex::new(String::new()),
            started_at: Instant::now(),
            pending_tools: Mutex::new(HashMap::new()),
            usage: Mutex::new(UsageTotals::default()),
            pending_permission_ids: Mutex::new(Vec::new()),
            pending_question_ids: Mutex::new(Vec::new()),
        }
    }
}

impl Default for SessionRuntime {
    fn default() -> Self {
        Self::new()
    }
}
