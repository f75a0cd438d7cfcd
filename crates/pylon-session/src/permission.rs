//! Permission FSM support (§4.4): the rule set is an injected trait
//! object, not hard-coded — the Session Manager owns no opinion about
//! which tools are auto-allowed.

use serde_json::Value;

use pylon_domain::entities::PermissionMode;

/// Tools considered safe to auto-allow regardless of mode; read-only and
/// side-effect-free.
const ALWAYS_SAFE_READ_ONLY: &[&str] = &["Read", "Glob", "Grep", "NotebookRead"];

#[derive(Debug, Clone)]
pub enum PermissionVerdict {
    Allow { updated_input: Option<Value> },
    Deny { message: String },
    Ask,
}

/// The deterministic rule set (external contract) referenced by §4.4 step
/// 1. A conversation's tools are gated by whichever policy the Worker
/// injects; this crate ships only the default.
pub trait PermissionPolicy: Send + Sync {
    fn evaluate(&self, tool_name: &str, input: &Value, mode: PermissionMode) -> PermissionVerdict;
}

/// Honors a conversation's `permissionMode`: `bypassPermissions` always
/// allows; `acceptEdits` allows edit-shaped tools plus the always-safe
/// read-only set and asks for everything else; `default` asks for
/// everything except the always-safe set.
pub struct DefaultPermissionPolicy;

impl PermissionPolicy for DefaultPermissionPolicy {
    fn evaluate(&self, tool_name: &str, _input: &Value, mode: PermissionMode) -> PermissionVerdict {
        match mode {
            PermissionMode::BypassPermissions => PermissionVerdict::Allow { updated_input: None },
            PermissionMode::AcceptEdits => {
                if matches!(tool_name, "Edit" | "Write" | "NotebookEdit")
                    || ALWAYS_SAFE_READ_ONLY.contains(&tool_name)
                {
                    PermissionVerdict::Allow { updated_input: None }
                } else {
                    PermissionVerdict::Ask
                }
            }
            PermissionMode::Default => {
                if ALWAYS_SAFE_READ_ONLY.contains(&tool_name) {
                    PermissionVerdict::Allow { updated_input: None }
                } else {
                    PermissionVerdict::Ask
                }
            }
        }
    }
}

/// Mints a fresh externally-addressable permission id, decoupled from
/// whatever internal id the SDK used for the tool call (§4.4 step 3).
pub fn generate_tool_use_id() -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let rand9: String = uuid::Uuid::new_v4().simple().to_string().chars().take(9).collect();
    format!("perm_{millis}_{rand9}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bypass_permissions_always_allows() {
        let policy = DefaultPermissionPolicy;
        let verdict = policy.evaluate("Bash", &json!({}), PermissionMode::BypassPermissions);
        assert!(matches!(verdict, PermissionVerdict::Allow { .. }));
    }

    #[test]
    fn accept_edits_allows_edit_tools_asks_for_others() {
        let policy = DefaultPermissionPolicy;
        assert!(matches!(
            policy.evaluate("Edit", &json!({}), PermissionMode::AcceptEdits),
            PermissionVerdict::Allow { .. }
        ));
        assert!(matches!(
            policy.evaluate("Bash", &json!({}), PermissionMode::AcceptEdits),
            PermissionVerdict::Ask
        ));
    }

    #[test]
    fn default_mode_allows_only_read_only_set() {
        let policy = DefaultPermissionPolicy;
        assert!(matches!(
            policy.evaluate("Read", &json!({}), PermissionMode::Default),
            PermissionVerdict::Allow { .. }
        ));
        assert!(matches!(
            policy.evaluate("Write", &json!({}), PermissionMode::Default),
            PermissionVerdict::Ask
        ));
    }

    #[test]
    fn generated_tool_use_id_matches_perm_prefix_shape() {
        let id = generate_tool_use_id();
        assert!(id.starts_with("perm_"));
        let parts: Vec<&str> = id.splitn(3, '_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[2].len(), 9);
    }
}
