//! Relay's binary entry point: bootstrap the registry, bind axum's router
//! with a WebSocket upgrade endpoint, serve forever (§4.6, §6.6).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::http::{HeaderValue, Method};
use axum::routing::get;
use axum::Router;
use clap::Parser;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use pylon_domain::config::{CorsConfig, RelayConfig};
use pylon_domain::pidfile;
use relay::{AppState, ClientRegistry, GoogleTokenInfoVerifier};

#[derive(Parser, Debug)]
#[command(name = "relay", about = "WebSocket hub federating Pylons and Apps")]
struct Cli {
    /// Override the configured listen port. Validated against 1..65535.
    #[arg(short, long)]
    port: Option<u16>,

    #[arg(long, default_value = "/tmp/relay.pid")]
    pid_file: PathBuf,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,relay=debug")))
        .json()
        .init();
}

fn load_config(port_override: Option<u16>) -> anyhow::Result<RelayConfig> {
    let mut config = if let Ok(raw) = std::env::var("RELAY_CONFIG") {
        toml::from_str(&raw)?
    } else {
        RelayConfig::default()
    };

    if let Ok(port) = std::env::var("PORT") {
        let port: u16 = port.parse().map_err(|_| anyhow::anyhow!("PORT must be 1..65535"))?;
        config.port = port;
    }
    if let Some(port) = port_override {
        if port == 0 {
            anyhow::bail!("port must be 1..65535");
        }
        config.port = port;
    }
    Ok(config)
}

fn build_cors_layer(cors: &CorsConfig) -> CorsLayer {
    use axum::http::header;

    if cors.allowed_origins.len() == 1 && cors.allowed_origins[0] == "*" {
        tracing::warn!("CORS configured with wildcard \"*\" — all origins allowed");
        return CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);
    }

    let mut exact: Vec<HeaderValue> = Vec::new();
    let mut wildcard_prefixes: Vec<String> = Vec::new();

    for origin in &cors.allowed_origins {
        if origin.ends_with(":*") {
            wildcard_prefixes.push(origin.trim_end_matches('*').to_owned());
        } else if let Ok(hv) = origin.parse::<HeaderValue>() {
            exact.push(hv);
        } else {
            tracing::warn!(origin = %origin, "invalid CORS origin, skipping");
        }
    }

    let allow_origin = if wildcard_prefixes.is_empty() {
        AllowOrigin::list(exact)
    } else {
        AllowOrigin::predicate(move |origin, _| {
            let origin_str = origin.to_str().unwrap_or("");
            if exact.iter().any(|e| e.as_bytes() == origin.as_bytes()) {
                return true;
            }
            wildcard_prefixes.iter().any(|prefix| {
                origin_str
                    .strip_prefix(prefix.as_str())
                    .map(|port| !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()))
                    .unwrap_or(false)
            })
        })
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = load_config(cli.port)?;

    let _pid_handle = pidfile::write_pid_file(&cli.pid_file, |_pid| true)?;

    let state = AppState {
        clients: Arc::new(ClientRegistry::new()),
        config: Arc::new(config.clone()),
        verifier: Arc::new(GoogleTokenInfoVerifier::new()),
    };

    let cors = build_cors_layer(&state.config.cors);
    let app = Router::new()
        .route("/v1/relay/ws", get(relay::ws::relay_ws))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "relay ready");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}
