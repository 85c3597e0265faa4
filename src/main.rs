#![forbid(unsafe_code)]
#![deny(warnings)]
#![warn(clippy::pedantic)]

use loadgen_agent::{serve, AgentConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt = tracing_subscriber::fmt().with_env_filter(filter);
    fmt.json().init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let config = AgentConfig::from_env()?;
    info!(bind = %config.bind, cpu_target = config.cpu_target_percent, "starting load generator");
    serve(config).await?;
    Ok(())
}
