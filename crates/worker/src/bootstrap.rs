//! Worker process wiring (§4.2–§4.4, §6.6): loads the durable Workspace
//! Store snapshot, opens the Message Store, connects to Beacon, and
//! assembles the `SessionManager`, tool server, and Relay link into one
//! `WorkerApp`.
//!
//! Grounded on `beacon::main`'s load-config/bind/serve shape, generalized
//! into a struct because the Worker composes three concurrent surfaces
//! (Beacon link, tool server, Relay link) instead of one accept loop.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use pylon_domain::config::WorkerConfig;
use pylon_domain::error::{Error, Result};
use pylon_domain::id::{encode_pylon, ConvId, Env};
use pylon_messages::MessageStore;
use pylon_session::{DefaultPermissionPolicy, SessionManager};
use pylon_workspace::{persist, WorkspaceStore};

use crate::autorun::run_autorun_doc;
use crate::beacon_link::BeaconLink;
use crate::relay_link::{CommandRouter, RelayEventSink};
use crate::tool_server::{ConversationCreateHook, ToolServer};

/// A running Worker: the pieces `main` needs to hold onto and the task
/// handles that make up its concurrent surfaces.
pub struct WorkerApp {
    pub workspace: Arc<WorkspaceStore>,
    pub messages: Arc<MessageStore>,
    pub beacon: Arc<BeaconLink>,
    pub session: Arc<SessionManager<BeaconLink>>,
    pub shutdown: CancellationToken,
    snapshot_path: PathBuf,
}

impl WorkerApp {
    /// Resolves `envId` from config, connects to Beacon, registers this
    /// Pylon, loads the Workspace Store snapshot (resetting any
    /// `working`/`waiting` conversations left over from an unclean
    /// shutdown per §4.2), opens the Message Store, and wires the Session
    /// Manager to publish its event stream over `relay_outbound`.
    pub async fn bootstrap(
        config: &WorkerConfig,
        state_dir: &Path,
        relay_outbound: mpsc::Sender<Value>,
    ) -> Result<Arc<Self>> {
        let env = parse_env(&config.env);
        let pylon = encode_pylon(env, config.device_index)?;

        std::fs::create_dir_all(state_dir).map_err(Error::Io)?;
        let snapshot_path = state_dir.join("workspace.json");
        let snapshot = persist::load_snapshot(&snapshot_path)?;
        let workspace = Arc::new(WorkspaceStore::from_snapshot(pylon, snapshot));
        let reset = workspace.reset_active_conversations();
        if !reset.is_empty() {
            tracing::info!(count = reset.len(), "reset stale working/waiting conversations at startup");
        }
        persist_snapshot(&workspace, &snapshot_path)?;

        let messages = Arc::new(MessageStore::new(state_dir.join("messages"))?);

        let beacon = Arc::new(BeaconLink::connect(&config.beacon_host, config.beacon_port).await?);
        beacon
            .register(pylon.raw(), &config.beacon_host, config.tool_server_port, &config.env, false)
            .await?;

        let session = Arc::new(SessionManager::new(
            beacon.clone(),
            workspace.clone(),
            messages.clone(),
            Arc::new(DefaultPermissionPolicy),
            Arc::new(RelayEventSink::new(relay_outbound)),
        ));

        Ok(Arc::new(Self {
            workspace,
            messages,
            beacon,
            session,
            shutdown: CancellationToken::new(),
            snapshot_path,
        }))
    }

    pub fn persist(&self) -> Result<()> {
        persist_snapshot(&self.workspace, &self.snapshot_path)
    }

    pub async fn serve_tool_server(self: &Arc<Self>, port: u16) -> Result<()> {
        let listener = TcpListener::bind(("0.0.0.0", port)).await.map_err(Error::Io)?;
        tracing::info!(port, "tool server ready");
        let hook: Arc<dyn ConversationCreateHook> = Arc::new(PersistOnCreate { app: self.clone() });
        let server = Arc::new(ToolServer::new(self.workspace.clone(), self.messages.clone(), self.beacon.clone(), hook));
        server.serve(listener).await;
        Ok(())
    }

    pub fn command_router(self: &Arc<Self>, outbound: mpsc::Sender<Value>) -> Arc<CommandRouter> {
        Arc::new(CommandRouter::new(self.session.clone(), self.workspace.clone(), self.messages.clone(), outbound))
    }
}

struct PersistOnCreate {
    app: Arc<WorkerApp>,
}

impl ConversationCreateHook for PersistOnCreate {
    fn on_conversation_create(&self, conv_id: ConvId) {
        if let Err(e) = self.app.persist() {
            tracing::warn!(error = %e, "failed to persist workspace snapshot after conversation create");
        }
        let app = self.app.clone();
        let working_dir = app
            .workspace
            .get_workspace(conv_id.workspace())
            .map(|ws| ws.working_dir.to_string_lossy().into_owned())
            .unwrap_or_default();
        tokio::spawn(async move {
            run_autorun_doc(&app.session, &app.workspace, conv_id, working_dir, read_file_to_string).await;
        });
    }
}

fn read_file_to_string(path: &str) -> Option<String> {
    std::fs::read_to_string(path).ok()
}

fn persist_snapshot(workspace: &WorkspaceStore, path: &Path) -> Result<()> {
    persist::save_snapshot_atomic(path, &workspace.snapshot())
}

fn parse_env(raw: &str) -> Env {
    match raw {
        "release" | "prod" | "production" => Env::Release,
        "stage" | "staging" => Env::Stage,
        _ => Env::Dev,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_env_defaults_to_dev() {
        assert_eq!(parse_env("whatever"), Env::Dev);
        assert_eq!(parse_env("release"), Env::Release);
        assert_eq!(parse_env("stage"), Env::Stage);
    }
}
