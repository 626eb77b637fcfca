use fluxtrade::application::engine::TradingBot;
use fluxtrade::config::BotConfig;
use fluxtrade::domain::events::LoggingListener;
use fluxtrade::infrastructure::exchange::BingxClient;
use fluxtrade::infrastructure::{EventBus, InMemoryTradeStore};
use std::sync::Arc;
use tracing::{Level, error, info};
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env before reading any configuration
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    info!("Initializing Fluxtrade engine...");

    let config = BotConfig::from_env()?;
    if config.exchange.api_key.is_empty() {
        error!("BINGX_API_KEY is not set; refusing to start");
        anyhow::bail!("missing exchange credentials");
    }
    info!(
        "Mode: {} | scan every {:?} | max {} concurrent trades",
        if config.exchange.demo_mode { "DEMO (VST)" } else { "LIVE" },
        config.scan_interval(),
        config.max_concurrent_trades
    );

    let api = Arc::new(BingxClient::new(&config.exchange));
    let store = Arc::new(InMemoryTradeStore::new());
    let event_bus = EventBus::new();
    event_bus.subscribe(Arc::new(LoggingListener));

    let bot = TradingBot::build(config, api, store, event_bus);

    if let Err(e) = bot.start().await {
        error!("Failed to start trading bot: {}", e);
        anyhow::bail!("startup aborted: {}", e);
    }
    info!("Trading engine running. Press Ctrl-C to stop.");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    bot.stop().await;

    Ok(())
}
