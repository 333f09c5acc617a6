#![deny(warnings)]
#![deny(clippy::unwrap_used)]

use ssh_gateway::gateway::config::{ClientConfig, config_path, load_config_file};
use ssh_gateway::gateway::remote::GatewayClient;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_config_file(&config_path())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("info".parse().expect("valid directive")),
        )
        .init();

    let config = ClientConfig::from_env()?;
    let mut client = GatewayClient::connect(&config.gateway_url, config.reply_timeout).await?;
    info!("Connected to {}", config.gateway_url);

    let jobs = client.list_jobs().await?;
    println!("jobs: {}", jobs.join(", "));

    let ack = client.set_target(&config.target).await?;
    if !ack.result {
        warn!("Target rejected: {:?}", ack.error);
        client.close().await?;
        return Ok(());
    }

    for job in ["show_hostname", "show_uptime"] {
        let result = client.invoke(job, Vec::new()).await?;
        println!("{job}: {result}");
    }

    for line in client.server_log() {
        println!("{line}");
    }

    client.close().await?;
    Ok(())
}
