use anyhow::Context;
use std::net::SocketAddr;
use water_meter_bridge::{observability, server, AppConfig, MeterScheduler};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init_tracing();

    tracing::info!("Starting water meter bridge");
    let config = AppConfig::load()?;
    let identities = config.identities()?;
    let bind_addr: SocketAddr = config
        .bind_addr
        .parse()
        .with_context(|| format!("invalid bind_addr `{}`", config.bind_addr))?;

    // Each meter that passes the credential check gets its own refresh task:
    // one refresh immediately, then one every `update_interval_hours`
    let scheduler = MeterScheduler::start(&config, identities).await;
    if scheduler.coordinators().is_empty() {
        tracing::warn!("no meter passed setup; serving an empty state list");
    }

    server::serve(bind_addr, scheduler.coordinators().to_vec()).await
}
