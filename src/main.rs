use beehive::tracing::setup_tracing;
use clap::Parser;
use edge_hub::config::{HubConfig, DEFAULT_CONFIG_PATH};
use edge_hub::link::{tls, WebSocketLink};
use edge_hub::EdgeSystem;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Cloud link of an edge node.
#[derive(Debug, Parser)]
#[command(name = "edge-hub", version, about)]
struct Cli {
    /// Path of the TOML configuration file.
    #[arg(short, long, env = "EDGEHUB_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Timeout applied to sync requests sent without an explicit timeout.
    #[arg(long, default_value_t = 30)]
    sync_timeout_secs: u64,

    /// How long modules get to stop after Ctrl-C.
    #[arg(long, default_value_t = 5)]
    grace_secs: u64,
}

#[tokio::main]
async fn main() -> ExitCode {
    setup_tracing();
    let cli = Cli::parse();

    let config = match HubConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };
    // bad TLS material is a boot error, not a reconnect loop
    if let Err(e) = tls::client_config(&config.tls) {
        error!(error = %e, "invalid TLS material");
        return ExitCode::FAILURE;
    }

    let link = Arc::new(WebSocketLink::new(&config));
    let system = match EdgeSystem::builder(config)
        .link(link)
        .sync_timeout(Duration::from_secs(cli.sync_timeout_secs))
        .start()
    {
        Ok(system) => system,
        Err(e) => {
            error!(error = %e, "failed to start edge system");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
    }
    info!("shutdown signal received");
    system
        .shutdown(Duration::from_secs(cli.grace_secs))
        .await;
    ExitCode::SUCCESS
}
