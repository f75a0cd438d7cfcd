//! Beacon's binary entry point: load config, bind the multiplexer's TCP
//! listener, accept connections forever (§4.5, §6.6).

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use beacon::{BeaconServer, ProcessLlmAdapter};
use pylon_domain::config::BeaconConfig;
use pylon_domain::pidfile;

#[derive(Parser, Debug)]
#[command(name = "beacon", about = "Single-process LLM SDK multiplexer")]
struct Cli {
    /// Override the configured listen port.
    #[arg(short, long)]
    port: Option<u16>,

    /// Path to the PID file guarding a single running instance.
    #[arg(long, default_value = "/tmp/beacon.pid")]
    pid_file: PathBuf,

    /// Command used to spawn the LLM SDK subprocess, e.g. `claude-sdk`.
    #[arg(long, env = "BEACON_SDK_COMMAND", default_value = "claude-sdk")]
    sdk_command: String,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,beacon=debug")),
        )
        .json()
        .init();
}

fn load_config(port_override: Option<u16>) -> BeaconConfig {
    let mut config = if let Ok(raw) = std::env::var("BEACON_CONFIG") {
        toml::from_str(&raw).unwrap_or_default()
    } else {
        BeaconConfig::default()
    };

    if let Ok(port) = std::env::var("BEACON_PORT") {
        if let Ok(port) = port.parse() {
            config.port = port;
        }
    }
    if let Some(port) = port_override {
        config.port = port;
    }
    config
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = load_config(cli.port);

    let _pid_handle = pidfile::write_pid_file(&cli.pid_file, |_pid| true)?;

    let adapter = Arc::new(ProcessLlmAdapter::new(cli.sdk_command, Vec::new()));
    let server = Arc::new(BeaconServer::new(adapter));

    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "beacon ready");

    loop {
        let (socket, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(error = %e, "beacon accept failed");
                continue;
            }
        };
        tracing::debug!(peer = %peer, "beacon connection accepted");
        let server = server.clone();
        tokio::spawn(async move {
            server.handle_connection(socket).await;
        });
    }
}

