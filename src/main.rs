mod archive;
mod bot;
mod commands;
mod config;
mod error;
mod gate;
mod intake;
mod registry;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use rand::Rng;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::bot::App;
use crate::config::Settings;

const MAX_RECONNECT_ATTEMPTS: u32 = 5;
const RECONNECT_BASE_DELAY: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,mediakeep=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load settings
    let settings_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("settings.json"));

    info!("Loading settings from: {}", settings_path.display());
    let settings = Settings::load_or_init(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;

    info!("Settings loaded successfully");
    info!("  Media root: {}", settings.media_root.display());
    info!("  Admin id: {}", settings.admin_id()?);
    info!("  Session file: {}", settings.session_file.display());

    // Connect and pump updates, reconnecting a bounded number of times with
    // exponential backoff and jitter before giving up for good.
    let mut attempt = 0u32;
    loop {
        match connect_and_run(&settings).await {
            Ok(()) => return Ok(()),
            Err(err) if attempt < MAX_RECONNECT_ATTEMPTS => {
                attempt += 1;
                let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..1000));
                let delay = RECONNECT_BASE_DELAY * 2u32.pow(attempt - 1) + jitter;
                warn!(
                    "Connection lost ({:#}); reconnect attempt {}/{} in {:.1}s",
                    err,
                    attempt,
                    MAX_RECONNECT_ATTEMPTS,
                    delay.as_secs_f64()
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                return Err(err.context(format!(
                    "Giving up after {} reconnect attempts",
                    MAX_RECONNECT_ATTEMPTS
                )));
            }
        }
    }
}

async fn connect_and_run(settings: &Settings) -> Result<()> {
    let client = bot::connect(settings).await?;
    let app = Arc::new(App::new(client, settings.clone()).await?);
    info!("Bot is starting...");
    bot::run(app).await
}
