//! pulse daemon -- runs the notification engine's background loops over
//! the platform database.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use pulse_core::config::Config;
use pulse_core::db::Db;
use pulse_daemon::{Daemon, SqliteContentStats};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// pulse-daemon -- baseline sweeps, batch draining, store maintenance.
#[derive(Parser)]
#[command(name = "pulse-daemon", version, about)]
struct Cli {
    /// Path to config.toml (default: ~/.pulse/config.toml).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Force JSON log output regardless of config.
    #[arg(long, default_value_t = false)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .context("failed to load configuration")?;

    pulse_telemetry::logging::init_logging(
        "pulse-daemon",
        &config.general.log_level,
        cli.log_json || config.general.log_json,
    );

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = std::process::id(),
        "pulse daemon starting"
    );

    let db = Db::open(config.store.resolved_path())
        .await
        .context("failed to open database")?;
    let stats = Arc::new(
        SqliteContentStats::new(&db)
            .await
            .context("failed to probe host content tables")?,
    );
    let daemon = Daemon::with_db(config, db, stats);

    let shutdown = daemon.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown.trigger();
        }
    });

    daemon.run().await;
    Ok(())
}
