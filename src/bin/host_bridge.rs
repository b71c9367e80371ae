//! Headless host bridge binary for stdin/stdout JSON communication.
//!
//! Reads `InboundEnvelope` messages as newline-delimited JSON from stdin,
//! runs each through the progression engine and writes one
//! `OutboundEnvelope` per message to stdout.
//!
//! All tracing/diagnostic output goes to stderr so that stdout remains a
//! clean JSON protocol channel. The config path may be given as the first
//! argument; otherwise the platform default is used when it exists.

use std::path::PathBuf;
use std::sync::Arc;

use ecos::config::EcosConfig;
use ecos::engine::ProgressionEngine;
use ecos::host::stdio::run_stdio_bridge;

fn load_config() -> anyhow::Result<EcosConfig> {
    let explicit = std::env::args_os().nth(1).map(PathBuf::from);
    let path = explicit
        .clone()
        .unwrap_or_else(EcosConfig::default_config_path);
    if path.exists() {
        tracing::info!(path = %path.display(), "loading config");
        return Ok(EcosConfig::from_file(&path)?);
    }
    if explicit.is_some() {
        anyhow::bail!("config file not found: {}", path.display());
    }
    tracing::info!("no config file, using defaults");
    Ok(EcosConfig::default())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise tracing to stderr only (stdout is reserved for the JSON
    // protocol).
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("ecos-host starting");

    let config = load_config()?;
    let engine = ProgressionEngine::from_config(&config)
        .map_err(|e| anyhow::anyhow!("failed to start engine: {e}"))?;

    run_stdio_bridge(Arc::new(engine)).await.map_err(|e| {
        tracing::error!(error = %e, "ecos-host exited with error");
        anyhow::anyhow!("ecos-host failed: {e}")
    })?;

    tracing::info!("ecos-host shut down cleanly");
    Ok(())
}
