//! Autorun doc detection (glossary): the first linked document in a
//! conversation whose frontmatter contains `autorun: true` is executed
//! automatically when a session starts.
//!
//! Frontmatter parsing here is deliberately narrow — a `---`-delimited
//! `key: value` scan, not a YAML parser — mirroring the scope note in §1
//! that document/file-attachment parsing is an external collaborator;
//! this module only needs one boolean out of the block.

use std::sync::Arc;

use pylon_domain::id::ConvId;
use pylon_session::{LlmAdapter, SendMessageOptions, SessionManager};
use pylon_workspace::WorkspaceStore;

/// Scans `conv_id`'s linked documents in order and returns the path of
/// the first one whose frontmatter sets `autorun: true`, reading each
/// candidate file through `read_file` (injected so tests don't touch
/// disk).
pub fn find_autorun_doc(
    workspace: &WorkspaceStore,
    conv_id: ConvId,
    read_file: impl Fn(&str) -> Option<String>,
) -> Option<String> {
    let conversation = workspace.get_conversation(conv_id)?;
    conversation
        .linked_documents
        .into_iter()
        .find(|path| read_file(path).is_some_and(|contents| frontmatter_autorun(&contents)))
}

/// `true` if the leading `---`-delimited frontmatter block contains an
/// `autorun: true` line. Anything not shaped like a frontmatter block
/// (no leading `---` line) is treated as `false`, not an error — a
/// document with no frontmatter simply never autoruns.
fn frontmatter_autorun(contents: &str) -> bool {
    let mut lines = contents.lines();
    if lines.next().map(str::trim) != Some("---") {
        return false;
    }
    for line in lines {
        if line.trim() == "---" {
            break;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        if key.trim() == "autorun" {
            return matches!(value.trim(), "true" | "True" | "TRUE");
        }
    }
    false
}

/// Runs the autorun doc for `conv_id`, if one is linked, as the
/// conversation's opening turn. No-op (and no session started) when
/// nothing qualifies.
pub async fn run_autorun_doc<A: LlmAdapter + 'static>(
    session: &Arc<SessionManager<A>>,
    workspace: &WorkspaceStore,
    conv_id: ConvId,
    working_dir: String,
    read_file: impl Fn(&str) -> Option<String>,
) {
    let Some(path) = find_autorun_doc(workspace, conv_id, read_file) else {
        return;
    };
    tracing::info!(conv_id = conv_id.raw(), path = %path, "running autorun doc");
    let prompt = format!("Follow the instructions in the linked document at {path}.");
    if let Err(e) = session
        .send_message(conv_id, prompt, SendMessageOptions { working_dir, ..Default::default() })
        .await
    {
        tracing::warn!(conv_id = conv_id.raw(), error = %e, "autorun doc failed to start");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_autorun_true_in_frontmatter() {
        let doc = "---\ntitle: Setup\nautorun: true\n---\n# Body\n";
        assert!(frontmatter_autorun(doc));
    }

    #[test]
    fn ignores_autorun_false() {
        let doc = "---\nautorun: false\n---\nBody\n";
        assert!(!frontmatter_autorun(doc));
    }

    #[test]
    fn ignores_documents_without_frontmatter() {
        let doc = "# Just a heading\nautorun: true\n";
        assert!(!frontmatter_autorun(doc));
    }

    #[test]
    fn find_autorun_doc_returns_first_matching_linked_document() {
        let pylon = pylon_domain::id::encode_pylon(pylon_domain::id::Env::Dev, 1).unwrap();
        let store = WorkspaceStore::new(pylon);
        let ws = store.create_workspace("ws", "/tmp").unwrap();
        let conv_id = store.create_conversation(ws, "conv").unwrap();
        store.link_document(conv_id, "notes.md").unwrap();
        store.link_document(conv_id, "setup.md").unwrap();

        let found = find_autorun_doc(&store, conv_id, |path| match path {
            "notes.md" => Some("---\nautorun: false\n---\n".to_string()),
            "setup.md" => Some("---\nautorun: true\n---\n".to_string()),
            _ => None,
        });
        assert_eq!(found.as_deref(), Some("setup.md"));
    }
}
