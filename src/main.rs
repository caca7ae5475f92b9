//! # Tenant Gateway Entry Point

use tenant_gateway::{
    config::ConfigLoader,
    runtime::{Gateway, install_signal_handler},
    telemetry,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration from layered env files and variables
    let config = ConfigLoader::new().load()?;
    telemetry::init_tracing(&config)?;

    tracing::info!(profile = %config.profile, "Loaded configuration");
    if let Ok(redacted_json) = config.redacted_json() {
        tracing::debug!(config = %redacted_json, "Effective configuration");
    }

    let shutdown = install_signal_handler();
    let gateway = Gateway::build(config).await?;
    gateway.run(shutdown).await
}
