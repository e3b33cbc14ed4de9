use std::path::PathBuf;

use palisade_core::config::GatewayConfig;
use palisade_gateway::run;
use palisade_observability::{init_tracing, install_propagator, ObservabilityConfig};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let config_dir = std::env::var("PALISADE_CONFIG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."));

    let config = match GatewayConfig::load(&config_dir) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    let _guard = init_tracing(&ObservabilityConfig::default());
    install_propagator();
    info!(
        routes = config.routes.len(),
        upstreams = config.upstreams.len(),
        "starting palisade"
    );

    if let Err(e) = run(config).await {
        error!(error = %e, "gateway exited with error");
        std::process::exit(1);
    }
}
