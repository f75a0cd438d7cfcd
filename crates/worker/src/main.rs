//! Worker's binary entry point: load config, connect to Beacon, open the
//! durable stores, then run the Tool Server and the Relay link
//! concurrently until shutdown (§4.2–§4.4, §6.3, §6.4, §6.6).

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use pylon_domain::config::WorkerConfig;
use pylon_domain::pidfile;
use worker::bootstrap::WorkerApp;
use worker::relay_link::WorkerRelayLink;

#[derive(Parser, Debug)]
#[command(name = "worker", about = "Agent-side session manager (Workspace/Message store, Beacon client, Relay link)")]
struct Cli {
    /// TOML config file, overriding WORKER_CONFIG_DIR/config.toml and defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the configured tool server port.
    #[arg(long)]
    tool_server_port: Option<u16>,

    #[arg(long, default_value = "/tmp/worker.pid")]
    pid_file: PathBuf,

    /// Directory for the Workspace Store snapshot and Message Store logs.
    #[arg(long, env = "WORKER_STATE_DIR", default_value = "~/.config/pylon/state")]
    state_dir: PathBuf,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,worker=debug")))
        .json()
        .init();
}

fn load_config(cli: &Cli) -> anyhow::Result<WorkerConfig> {
    let mut config = if let Some(path) = &cli.config {
        toml::from_str(&std::fs::read_to_string(path)?)?
    } else if let Ok(dir) = std::env::var("WORKER_CONFIG_DIR") {
        let path = PathBuf::from(dir).join("config.toml");
        match std::fs::read_to_string(&path) {
            Ok(raw) => toml::from_str(&raw)?,
            Err(_) => WorkerConfig::default(),
        }
    } else if let Ok(raw) = std::env::var("WORKER_CONFIG") {
        toml::from_str(&raw).unwrap_or_default()
    } else {
        WorkerConfig::default()
    };

    if let Ok(dir) = std::env::var("CLAUDE_CONFIG_DIR") {
        config.claude_config_dir = dir;
    }
    if let Ok(port) = std::env::var("BEACON_PORT") {
        if let Ok(port) = port.parse() {
            config.beacon_port = port;
        }
    }
    if let Some(port) = cli.tool_server_port {
        config.tool_server_port = port;
    }
    Ok(config)
}

fn expand_home(path: &std::path::Path) -> PathBuf {
    let Ok(stripped) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    let home = std::env::var("HOME").unwrap_or_else(|_| "/root".to_string());
    PathBuf::from(home).join(stripped)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let state_dir = expand_home(&cli.state_dir);

    let _pid_handle = pidfile::write_pid_file(&cli.pid_file, |_pid| true)?;

    let link = WorkerRelayLink::new(&config.relay_url, config.device_index)?;
    let outbound = link.outbound_sender();

    let app = WorkerApp::bootstrap(&config, &state_dir, outbound.clone()).await?;
    tracing::info!(device_index = config.device_index, beacon_port = config.beacon_port, "worker ready");

    let router = app.command_router(outbound);

    let tool_server_app = app.clone();
    let tool_server_port = config.tool_server_port;
    tokio::spawn(async move {
        if let Err(e) = tool_server_app.serve_tool_server(tool_server_port).await {
            tracing::error!(error = %e, "tool server exited");
        }
    });

    tokio::select! {
        () = link.run(router, app.shutdown.clone()) => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown requested");
            app.shutdown.cancel();
        }
    }

    if let Err(e) = app.persist() {
        tracing::warn!(error = %e, "failed to persist workspace snapshot on shutdown");
    }
    Ok(())
}
