//! Process orchestration engine — binary entry point.
//!
//! Wires configuration, tracing, the credential vault, persistence, the
//! process registry, and the protocol client together, then starts the
//! ambient `/metrics` endpoint. Accepting new processes over a network
//! surface is out of scope (spec §1); this binary is meant to be embedded
//! or driven by a caller that constructs an `Engine` and calls `submit`.

mod http;

use std::sync::Arc;

use dpp_consumer_engine::config::{resolve_config_path, EngineConfig};
use dpp_consumer_engine::vault::StaticVault;
use dpp_consumer_engine::Engine;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = resolve_config_path();
    let config = EngineConfig::load(&config_path).map_err(|e| {
        eprintln!("ERROR: failed to load config from {config_path}: {e}");
        e
    })?;

    dpp_consumer_engine::telemetry::init(config.server.log_format);

    if let Err(err) = config.validate() {
        error!(error = %err, "configuration validation failed");
        return Err(anyhow::anyhow!("configuration validation failed: {err}"));
    }

    info!(endpoint = %config.edc.endpoint, storage_root = %config.storage.root, "starting process orchestration engine");

    let vault = Arc::new(StaticVault::from_env());
    let metrics_port = config.server.metrics_port;
    // Held for the process lifetime; an embedding caller reaches it via
    // `Engine::new` directly and drives `submit`/`terminate` themselves.
    let _engine = Engine::new(config, vault)?;

    dpp_consumer_engine::metrics::init();
    if metrics_port == 0 {
        info!("metrics endpoint disabled");
    } else {
        tokio::spawn(async move {
            http::run_http_server(metrics_port).await;
        });
        info!(port = metrics_port, "metrics endpoint listening");
    }

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("received SIGINT, shutting down"),
        _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
    }

    Ok(())
}
