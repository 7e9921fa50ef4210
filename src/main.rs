use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use teloxide::Bot;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use relaybot::builder::MessageBuilder;
use relaybot::bus::{Publisher, DEFAULT_CHANNEL};
use relaybot::config::Config;
use relaybot::delivery::bale::BaleClient;
use relaybot::delivery::DeliverySink;
use relaybot::packager::Packager;
use relaybot::platform::telegram::{self, TelegramFetcher};
use relaybot::platform::{AllowedChats, Relay};
use relaybot::scheduler::{tasks, Scheduler};
use relaybot::stats::RelayStats;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,relaybot=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    info!("  Source channels: {:?}", config.source.channels);
    info!("  Destination: {} (chat {})", config.destination.api_url, config.destination.chat_id);
    info!("  Chunk size: {}", config.delivery.chunk_size);
    info!("  Retry: {:?}", config.delivery.retry.strategy);

    let stats = Arc::new(RelayStats::new());

    info!("Creating channels and subscribers...");
    let publisher = Arc::new(Publisher::new());
    let packager = Packager::new(config.fernet()?, config.delivery.chunk_size);
    let destination = Arc::new(BaleClient::new(
        &config.destination.api_url,
        &config.destination.bot_token,
    ));
    let sink = Arc::new(DeliverySink::new(
        "bale",
        destination,
        packager,
        config.destination.chat_id,
        &config.delivery,
        Arc::clone(&stats),
    ));
    publisher.subscribe(DEFAULT_CHANNEL, sink).await;
    info!(
        "  Subscribers on '{}': {}",
        DEFAULT_CHANNEL,
        publisher.subscriber_count(DEFAULT_CHANNEL).await
    );

    let bot = Bot::new(&config.source.bot_token);
    let builder = MessageBuilder::new(
        Arc::new(TelegramFetcher::new(bot.clone())),
        config.delivery.max_file_size,
        Duration::from_secs(config.delivery.download_timeout_secs),
    );
    let relay = Arc::new(Relay::new(
        builder,
        publisher,
        DEFAULT_CHANNEL,
        AllowedChats::from_entries(&config.source.channels),
        Arc::clone(&stats),
    ));

    let mut scheduler = Scheduler::new().await?;
    tasks::register_heartbeat(&scheduler, &config.heartbeat.cron, Arc::clone(&stats)).await?;
    scheduler.start().await?;

    info!("Setup finished, waiting for messages...");
    telegram::run(bot, relay).await?;

    scheduler.shutdown().await?;
    info!("Relay stopped ({})", stats.snapshot());
    Ok(())
}
