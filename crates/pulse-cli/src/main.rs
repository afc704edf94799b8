//! pulse operator CLI -- inspect and drive the notification engine's
//! stores without going through the daemon.

mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use pulse_core::config::Config;
use pulse_core::db::Db;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Exit codes: 0 success, 1 partial failure, 2 configuration error.
#[derive(Parser)]
#[command(name = "pulse", version, about)]
struct Cli {
    /// Path to config.toml (default: ~/.pulse/config.toml).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show engine status: pending batches, notifications, stale baselines.
    Status,

    /// Baseline maintenance.
    Baselines {
        #[command(subcommand)]
        command: BaselinesCommands,
    },

    /// Batch queue maintenance.
    Batches {
        #[command(subcommand)]
        command: BatchesCommands,
    },
}

#[derive(Subcommand)]
enum BaselinesCommands {
    /// Recompute baselines for one user, all recent authors, or the
    /// oldest stale rows.
    Recompute {
        /// Recompute a single user.
        #[arg(long, conflicts_with_all = ["all", "stale"])]
        user: Option<i64>,
        /// Recompute every author with activity in the last 90 days.
        #[arg(long, conflicts_with = "stale")]
        all: bool,
        /// Refresh only baselines past the staleness cutoff (fallback sweep).
        #[arg(long)]
        stale: bool,
    },
}

#[derive(Subcommand)]
enum BatchesCommands {
    /// Drain due batches into the notification store.
    Drain {
        /// Drain every pending batch regardless of its schedule.
        #[arg(long)]
        now: bool,
    },
    /// Hard-delete terminal batches older than the given age.
    Vacuum {
        /// Age threshold, e.g. "7d", "12h", "30m".
        #[arg(long = "older-than")]
        older_than: humantime::Duration,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    pulse_telemetry::logging::init_logging("pulse", "warn", false);

    let config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::from(2);
        }
    };

    let db = match Db::open(config.store.resolved_path()).await {
        Ok(db) => db,
        Err(e) => {
            eprintln!("failed to open database: {e}");
            return ExitCode::from(2);
        }
    };

    let result = match cli.command {
        Commands::Status => commands::status(&db, &config).await,
        Commands::Baselines {
            command: BaselinesCommands::Recompute { user, all, stale },
        } => commands::baselines_recompute(&db, &config, user, all, stale).await,
        Commands::Batches {
            command: BatchesCommands::Drain { now },
        } => commands::batches_drain(&db, now).await,
        Commands::Batches {
            command: BatchesCommands::Vacuum { older_than },
        } => commands::batches_vacuum(&db, older_than.into()).await,
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(1)
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_recompute_single_user() {
        let cli = Cli::try_parse_from(["pulse", "baselines", "recompute", "--user", "42"]).unwrap();
        match cli.command {
            Commands::Baselines {
                command: BaselinesCommands::Recompute { user, all, stale },
            } => {
                assert_eq!(user, Some(42));
                assert!(!all);
                assert!(!stale);
            }
            _ => panic!("wrong command"),
        }
    }

    #[test]
    fn recompute_targets_conflict() {
        assert!(
            Cli::try_parse_from(["pulse", "baselines", "recompute", "--user", "42", "--all"])
                .is_err()
        );
        assert!(
            Cli::try_parse_from(["pulse", "baselines", "recompute", "--all", "--stale"]).is_err()
        );
    }

    #[test]
    fn parses_vacuum_age() {
        let cli =
            Cli::try_parse_from(["pulse", "batches", "vacuum", "--older-than", "7d"]).unwrap();
        match cli.command {
            Commands::Batches {
                command: BatchesCommands::Vacuum { older_than },
            } => {
                let age: std::time::Duration = older_than.into();
                assert_eq!(age.as_secs(), 7 * 24 * 3600);
            }
            _ => panic!("wrong command"),
        }
    }

    #[test]
    fn rejects_garbage_age() {
        assert!(
            Cli::try_parse_from(["pulse", "batches", "vacuum", "--older-than", "soon"]).is_err()
        );
    }
}
