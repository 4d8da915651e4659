//! reportkeeper -- execution history for scheduled dashboard and chart reports.
//!
//! This crate records every attempt to generate and deliver a report,
//! answers history questions over that log (last success, in-flight runs,
//! error-notification suppression), serves stored content and artifacts, and
//! applies per-schedule log retention.

pub mod artifacts;
pub mod config;
pub mod error;
pub mod history;
pub mod schedules;
pub mod storage;

use std::time::Duration;

use anyhow::Result;

use crate::config::ReportKeeperConfig;

/// Install the global tracing subscriber. `RUST_LOG` overrides the configured level.
pub fn init_logging(config: &config::LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if config.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Run the reportkeeper daemon: open the store and apply log retention on an
/// interval until interrupted.
pub async fn serve(config: &ReportKeeperConfig) -> Result<()> {
    tracing::info!(db_path = %config.storage.db_path, "Initializing database");
    let pool = storage::open_pool(&config.storage.db_path)?;

    let retention = if config.retention.enabled {
        let every = Duration::from_secs(config.retention.interval_secs.max(1));
        Some(tokio::spawn(history::retention::run_retention_loop(pool, every)))
    } else {
        tracing::info!("log retention disabled");
        None
    };

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");

    if let Some(task) = retention {
        task.abort();
    }
    Ok(())
}
