// ABOUTME: Binary entry point wiring config, logging, the Discord client, and the feature manifest
// ABOUTME: Starts the feature loader and runs until the process receives ctrl-c

use anyhow::{Context, Result};
use offbeat::config::{Config, LoggingConfig};
use offbeat::features;
use offbeat::llm::{OpenAiProvider, TextProvider};
use offbeat::loader;
use offbeat::platform::{ChatClient, DiscordClient};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn init_logging(logging: &LoggingConfig) {
    // RUST_LOG wins over the configured level when set.
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    let fmt = tracing_subscriber::fmt::layer().with_ansi(logging.color);
    if logging.timestamp {
        tracing_subscriber::registry().with(filter).with(fmt).init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt.without_time())
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Set up panic hook to log panics before they crash the process
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("\n╔══════════════════════════════════════════════════════════╗");
        eprintln!("║ PANIC! Bot crashed with the following error:             ║");
        eprintln!("╚══════════════════════════════════════════════════════════╝\n");
        eprintln!("{}", panic_info);
        eprintln!("\nBacktrace:");
        eprintln!("{:?}", std::backtrace::Backtrace::force_capture());
    }));

    dotenvy::dotenv().ok();
    let config = Config::load()?;
    init_logging(&config.logging);

    tracing::info!(
        prefix = %config.bot.prefix,
        database = %config.database.path,
        disabled = config.bot.disabled_features.len(),
        llm = config.llm.api_key.is_some(),
        "Configuration loaded"
    );

    let client: Arc<dyn ChatClient> = DiscordClient::new();

    let provider = config.llm.api_key.clone().map(|key| {
        Arc::new(OpenAiProvider::new(
            config.llm.base_url.clone(),
            key,
            config.llm.model.clone(),
        )) as Arc<dyn TextProvider>
    });

    // No media player ships in this build; deployments inject their own engine
    // through features::manifest.
    let manifest = features::manifest(client, None, provider);

    let ctx = loader::start(manifest, config)
        .await
        .context("Startup failed")?;

    tracing::info!(
        features = ?ctx.enabled_features(),
        "Bot is running, press ctrl-c to stop"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutting down");

    Ok(())
}
