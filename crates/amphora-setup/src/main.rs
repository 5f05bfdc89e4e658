//! Storage bootstrap for Amphora.
//!
//! Connects to `PostgreSQL` (creating the database when it is missing),
//! provisions schemas, tables and timestamp triggers for every recognized
//! kind, connects the cache when write-through is enabled, logs where the
//! stores live and exits.
//!
//! # Startup Sequence
//!
//! 1. Initialize structured logging (tracing)
//! 2. Load configuration from `CLAY_STORAGE_*` environment variables
//! 3. Connect, create the database if needed, provision
//! 4. Connect the cache (when enabled)
//! 5. Log the servers and close the connections

use amphora_db::{Bootstrap, StorageConfig, setup};
use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Selects JSON log lines instead of human-readable text.
const LOG_FORMAT_VAR: &str = "CLAY_STORAGE_LOG_FORMAT";

/// Application entry point.
///
/// # Errors
///
/// Returns an error if configuration is invalid or a store cannot be
/// reached or provisioned.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize structured logging.
    init_tracing();
    info!("amphora-setup starting");

    // 2. Load configuration.
    let config = StorageConfig::from_env().context("invalid storage configuration")?;
    let kinds: Vec<&str> = config.kinds.iter().map(|(kind, _)| kind.name()).collect();
    info!(
        postgres = %config.postgres.describe(),
        cache_enabled = config.cache.enabled,
        kinds = ?kinds,
        timestamps = config.timestamps,
        "Configuration loaded"
    );

    // 3-4. Connect and provision.
    let Bootstrap { storage, servers } = setup(&config)
        .await
        .context("storage setup failed")?;
    info!(
        postgres = %servers.postgres,
        cache = servers.cache.as_deref().unwrap_or("disabled"),
        "Storage ready"
    );

    // 5. Shut down cleanly.
    storage.cache().close().await?;
    storage.durable().pool().close().await;
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var(LOG_FORMAT_VAR).is_ok_and(|format| format.eq_ignore_ascii_case("json"));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }
}
