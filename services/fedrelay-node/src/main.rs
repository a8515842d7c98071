use anyhow::{bail, Context};
use fedrelay_core::{logging, RelayConfig, SqliteStore, SystemClock};
use fedrelay_node::keyfile::load_or_create_key;
use fedrelay_node::{RelayService, Stores, PROTOCOL_VERSION, STORE_VERSION};
use fedrelay_trust_mesh::{LocalPolicyGate, StaticMetricsSource};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

const DATABASE_FILE: &str = "fedrelay.db";
const COORDINATOR_KEY_FILE: &str = "coordinator.key";

#[derive(Debug, Serialize)]
struct NodeVersionHandshake {
    version: &'static str,
    store_version: u32,
    protocol_version: u32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|arg| arg == "--version-json") {
        let handshake = NodeVersionHandshake {
            version: env!("CARGO_PKG_VERSION"),
            store_version: STORE_VERSION,
            protocol_version: PROTOCOL_VERSION,
        };
        println!("{}", serde_json::to_string(&handshake)?);
        return Ok(());
    }

    let config_path = parse_config_path(&args)?;
    let config = RelayConfig::from_file(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    logging::init_with_format(&config.node.log_format);

    let data_dir = config.node.data_dir.clone();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating {}", data_dir.display()))?;

    let store = Arc::new(SqliteStore::open(data_dir.join(DATABASE_FILE))?);
    let key_path = data_dir.join(COORDINATOR_KEY_FILE);
    let coordinator_signer = load_or_create_key(&key_path)
        .with_context(|| format!("loading coordinator key {}", key_path.display()))?;
    info!(
        coordinator_id = %config.node.coordinator_id,
        key_id = %coordinator_signer.key_id(),
        data_dir = %data_dir.display(),
        "Starting fedrelay node"
    );

    let policy = Arc::new(LocalPolicyGate::from_config(&config.policy, &config.relay));
    let service = RelayService::open(
        config,
        Stores::shared(store),
        policy,
        Arc::new(SystemClock),
        Some(coordinator_signer),
    )?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handles = service.spawn_background(Arc::new(StaticMetricsSource::new()), shutdown_rx);

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    shutdown_tx.send(true)?;

    for handle in handles {
        if let Err(e) = handle.await {
            warn!(error = %e, "Background task ended abnormally");
        }
    }
    info!("Node stopped");
    Ok(())
}

fn parse_config_path(args: &[String]) -> anyhow::Result<PathBuf> {
    let mut args_iter = args.iter();
    while let Some(arg) = args_iter.next() {
        if arg == "--config" {
            if let Some(path) = args_iter.next() {
                return Ok(PathBuf::from(path));
            }
            bail!("--config was provided without a path");
        }
    }

    bail!("missing required --config <path> argument")
}
