//! Call-handling host: serves the media stream endpoint backed by the
//! HTTP AI gateway.
//!
//! Usage: `lilt-host [config.toml]`. Without an argument, built-in
//! defaults are used.

use lilt::config::CallConfig;
use lilt::gateway::HttpGateway;
use std::path::Path;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => CallConfig::load(Path::new(&path))?,
        None => CallConfig::default(),
    };
    let config = Arc::new(config);

    tracing::info!("lilt-host starting");

    let gateway = Arc::new(HttpGateway::new(
        config.gateway.clone(),
        config.audio.synthesis_sample_rate,
    )?);

    lilt::server::serve(config, gateway).await.map_err(|e| {
        tracing::error!(error = %e, "lilt-host exited with error");
        anyhow::anyhow!("lilt-host failed: {e}")
    })?;

    Ok(())
}
