//! Shared error taxonomy (see §7 of the specification).
//!
//! Every crate in this workspace returns this single `Error` type so a
//! transport boundary (Beacon's TCP loop, Relay's WebSocket loop, the
//! Worker's tool server) can frame any failure as `{success:false, error}`
//! without knowing which layer produced it.

use thiserror::Error as ThisError;

pub type Result<T> = std::result::Result<T, Error>;

/// The kind of entity a `NotFound`/`Duplicate` error refers to. Carried
/// separately from the message so callers can match on it without parsing
/// strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Workspace,
    Conversation,
    ToolUseId,
    Document,
}

impl EntityKind {
    fn label(self) -> &'static str {
        match self {
            EntityKind::Workspace => "workspace",
            EntityKind::Conversation => "conversationId",
            EntityKind::ToolUseId => "toolUseId",
            EntityKind::Document => "path",
        }
    }
}

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("invalid id: {0}")]
    InvalidId(String),

    #[error("id space exhausted: {kind}")]
    IdExhausted { kind: &'static str },

    #[error("not authenticated")]
    NotAuthenticated,

    #[error("auth failed: {reason}")]
    AuthFailed { reason: String },

    #[error("pylon not registered")]
    NotRegistered,

    #[error("pylon already registered")]
    AlreadyRegistered,

    #[error("{kind} not found: target {detail}")]
    NotFound {
        kind: EntityKind,
        detail: String,
    },

    #[error("{kind} already linked: duplicate path {detail}")]
    Duplicate {
        kind: EntityKind,
        detail: String,
    },

    #[error("request timed out")]
    Timeout,

    #[error("transport closed")]
    TransportClosed,

    #[error("adapter error: {underlying}")]
    AdapterError { underlying: String },

    #[error("cancelled")]
    Cancelled,

    #[error("invalid json format")]
    InvalidJson,

    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl Error {
    pub fn not_found(kind: EntityKind, detail: impl Into<String>) -> Self {
        Error::NotFound {
            kind,
            detail: detail.into(),
        }
    }

    pub fn duplicate(kind: EntityKind, detail: impl Into<String>) -> Self {
        Error::Duplicate {
            kind,
            detail: detail.into(),
        }
    }

    /// Renders as the `{success:false, error:"..."}` frame shape used by
    /// every one-shot response across the three protocols.
    pub fn as_response_message(&self) -> String {
        self.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_message_carries_pinned_substrings() {
        let err = Error::not_found(EntityKind::Conversation, "c42");
        let msg = err.to_string();
        assert!(msg.contains("not found"));
        assert!(msg.contains("conversationId"));
        assert!(msg.contains("target"));
    }

    #[test]
    fn tool_use_id_not_found_carries_substring() {
        let err = Error::not_found(EntityKind::ToolUseId, "tu1");
        assert!(err.to_string().contains("toolUseId"));
    }

    #[test]
    fn document_not_found_carries_path_substring() {
        let err = Error::not_found(EntityKind::Document, "/a/b");
        assert!(err.to_string().contains("path"));
    }
}
