//! capctld - capability promotion control plane daemon
//!
//! Loads the durable state, then runs the promotion scheduler and the
//! maintenance loops until interrupted.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use capctl_core::{ControlPlane, ControlPlaneConfig};
use clap::Parser;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "capctld")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Capability promotion control plane daemon", long_about = None)]
struct Args {
    /// Control plane configuration file (TOML)
    #[arg(short, long, env = "CAPCTL_CONFIG")]
    config: Option<PathBuf>,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    log_json: bool,

    /// Seconds running promotions get to finish on shutdown
    #[arg(long, default_value = "30")]
    shutdown_grace_secs: u64,
}

fn load_config(path: Option<&PathBuf>) -> Result<ControlPlaneConfig> {
    match path {
        Some(p) => ControlPlaneConfig::load(p)
            .with_context(|| format!("Failed to load config {}", p.display())),
        None => Ok(ControlPlaneConfig::default()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(args.config.as_ref())?;

    let level = config.logging.level()?;
    capctl_core::init_tracing(args.log_json || config.logging.json, level);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        backend = ?config.store.backend,
        "capctld starting"
    );

    let cp = ControlPlane::builder(config)
        .build()
        .await
        .context("Failed to build control plane")?;
    let report = cp.hydrate().await.context("Failed to load durable state")?;
    info!(
        capabilities = report.capabilities,
        executions = report.executions,
        requeued = report.requeued,
        "state loaded"
    );

    let cp = Arc::new(cp);
    cp.start().await;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("shutdown requested");
    cp.shutdown(Duration::from_secs(args.shutdown_grace_secs)).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use capctl_core::StoreBackend;

    #[test]
    fn test_args_defaults() {
        let args = Args::try_parse_from(["capctld"]).unwrap();
        assert!(!args.log_json);
        assert_eq!(args.shutdown_grace_secs, 30);
    }

    #[test]
    fn test_load_config_resolves_relative_store_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capctl.toml");
        std::fs::write(
            &path,
            "[store]\nbackend = \"fs\"\npath = \"state\"\n\n[logging]\nlevel = \"debug\"\n",
        )
        .unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.store.backend, StoreBackend::Fs);
        assert_eq!(config.store.path, Some(dir.path().join("state")));
        assert_eq!(config.logging.level().unwrap(), tracing::Level::DEBUG);

        assert!(load_config(None).unwrap().store.path.is_none());
    }
}
