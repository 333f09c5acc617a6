#![deny(warnings)]
#![deny(clippy::unwrap_used)]

use std::sync::Arc;

use ssh_gateway::gateway::client::SshDialer;
use ssh_gateway::gateway::config::{GatewayConfig, config_path, load_config_file};
use ssh_gateway::gateway::jobs::JobRegistry;
use ssh_gateway::gateway::logging::{BroadcastSink, init_logging};
use ssh_gateway::gateway::storage::DashMapSessionRegistry;
use ssh_gateway::gateway::transport::{GatewayState, serve};
use ssh_gateway::gateway::DispatchRouter;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // The config file is required; fail before anything else starts
    let path = config_path();
    load_config_file(&path)?;

    let logs = BroadcastSink::new();
    init_logging(logs.clone())?;
    info!("Loaded configuration from {}", path.display());

    let config = GatewayConfig::from_env()?;
    let jobs = JobRegistry::builtin();
    info!("Registered jobs: {}", jobs.names().join(", "));
    info!("Working directory for transfers: {}", config.workdir.display());

    let router = DispatchRouter::new(
        Arc::new(DashMapSessionRegistry::new()),
        jobs,
        Arc::new(SshDialer::new(config.ssh.clone())),
        config.workdir.clone(),
    );

    serve(config.listen_addr(), GatewayState::new(Arc::new(router), logs)).await?;

    Ok(())
}
