//! `ctxbridge` – bridges whitelisted transport topics to an NGSIv2 context
//! broker.
//!
//! The binary:
//!
//! 1. Loads `config.toml` (first argument, `CTXBRIDGE_CONFIG`, or
//!    `./config/config.toml`) and `whitelist.json` next to it.
//! 2. Binds every whitelisted topic and starts the store subscriptions.
//! 3. On Ctrl-C / SIGTERM, deletes every subscription and entity it created
//!    and releases every transport handle before exiting.
//!
//! The transport is the in-process [`LocalTransport`] loopback.

mod config;
mod telemetry;

use std::process::ExitCode;
use std::sync::Arc;

use ctxbridge_middleware::{BridgeRegistry, LocalTransport, TopicMatcher};
use ctxbridge_types::{BridgeError, StaticTypeResolver, Transport};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

fn main() -> ExitCode {
    // Tracing goes up before the runtime; see `telemetry::init_tracing`.
    let _guard = telemetry::init_tracing("ctxbridge");

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "failed to start async runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "bridge stopped with an error");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), BridgeError> {
    let config_path = config::config_path(std::env::args().nth(1));
    let cfg = config::load(&config_path)?;
    info!(path = %config_path.display(), node = %cfg.node_name, "configuration loaded");

    let transport: Arc<dyn Transport> = Arc::new(LocalTransport::default());
    let matcher = TopicMatcher::from_file(transport.clone(), config::whitelist_path(&config_path))?;
    let registry = BridgeRegistry::new(cfg, transport, Arc::new(StaticTypeResolver::common()), matcher);

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let (stop_tx, mut stop_rx) = mpsc::unbounded_channel::<()>();
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    }) {
        warn!(error = %e, "failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
    }

    let bound = registry.start().await?;
    info!(topics = bound.len(), "bridge running");
    for (topic, spec) in &bound {
        info!(topic = %topic, role = %spec.role, type_name = %spec.type_name, "bridged");
    }

    if stop_rx.recv().await.is_none() {
        // Handler not installed; fall back to Tokio's own Ctrl-C listener.
        let _ = tokio::signal::ctrl_c().await;
    }
    info!("shutdown requested");
    registry.shutdown_all().await;
    Ok(())
}
