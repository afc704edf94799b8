use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{TimeDelta, Utc};

use pulse_core::activity::VoteActivityLog;
use pulse_core::baselines::BaselineStore;
use pulse_core::batches::BatchQueue;
use pulse_core::config::Config;
use pulse_core::db::Db;
use pulse_core::notifications::NotificationStore;
use pulse_core::settings::PreferencesStore;
use pulse_daemon::SqliteContentStats;
use pulse_engine::baseline::BaselineCalculator;
use pulse_engine::pipeline::NotificationPipeline;
use pulse_engine::scheduler::BatchScheduler;
use pulse_engine::traits::NoopPushSink;

/// Exit code: everything worked.
pub const EXIT_OK: u8 = 0;
/// Exit code: the command ran but some items failed.
pub const EXIT_PARTIAL: u8 = 1;
/// Exit code: bad configuration or usage.
pub const EXIT_CONFIG: u8 = 2;

/// Print a read-only snapshot of the engine's stores.
pub async fn status(db: &Db, config: &Config) -> Result<u8> {
    let queue = BatchQueue::new(db);
    let notifications = NotificationStore::new(db);
    let baselines = BaselineStore::new(db);

    let pending = queue.pending_count().await.context("pending count")?;
    let total = notifications
        .total_count()
        .await
        .context("notification count")?;
    let stale_cutoff = Utc::now() - TimeDelta::seconds(config.baseline.stale_after_secs as i64);
    let stale = baselines
        .count_stale(stale_cutoff)
        .await
        .context("stale baseline count")?;

    println!("pending batches:     {pending}");
    println!("notifications:       {total}");
    println!("stale baselines:     {stale}");
    Ok(EXIT_OK)
}

/// Recompute baselines for one user, every recent author, or only the
/// oldest stale rows (the fallback sweep).
pub async fn baselines_recompute(
    db: &Db,
    config: &Config,
    user: Option<i64>,
    all: bool,
    stale: bool,
) -> Result<u8> {
    let stats = Arc::new(SqliteContentStats::new(db).await.context("content stats")?);
    let calculator =
        BaselineCalculator::new(VoteActivityLog::new(db), BaselineStore::new(db), stats);

    let report = match (user, all, stale) {
        (Some(user_id), false, false) => {
            match calculator.recompute_user(user_id).await? {
                Some(baseline) => {
                    println!(
                        "user {user_id}: posts {:.3}/h, comments {:.3}/h ({} posts, {} comments)",
                        baseline.avg_post_votes_per_hour,
                        baseline.avg_comment_votes_per_hour,
                        baseline.total_posts,
                        baseline.total_comments,
                    );
                }
                None => println!("user {user_id}: no authored content, baseline skipped"),
            }
            return Ok(EXIT_OK);
        }
        (None, true, false) => calculator.run_full_sweep().await?,
        (None, false, true) => {
            calculator
                .run_stale_sweep(
                    Duration::from_secs(config.baseline.stale_after_secs),
                    config.baseline.stale_limit,
                )
                .await?
        }
        _ => {
            eprintln!("configuration error: pass exactly one of --user <id>, --all, or --stale");
            return Ok(EXIT_CONFIG);
        }
    };

    println!(
        "swept {} authors: {} updated, {} skipped, {} failed",
        report.scanned, report.updated, report.skipped, report.failed
    );
    Ok(if report.failed > 0 { EXIT_PARTIAL } else { EXIT_OK })
}

/// Drain due batches. With `now`, every pending batch is treated as due.
pub async fn batches_drain(db: &Db, now: bool) -> Result<u8> {
    let queue = BatchQueue::new(db);
    let pipeline = Arc::new(NotificationPipeline::new(
        PreferencesStore::new(db),
        NotificationStore::new(db),
        Arc::new(NoopPushSink),
    ));
    let scheduler = BatchScheduler::new(queue, pipeline);

    let horizon = if now {
        // Far enough ahead to catch every scheduled row.
        Utc::now() + TimeDelta::days(3650)
    } else {
        Utc::now()
    };
    let report = scheduler.run_tick(horizon).await?;
    println!(
        "drained {} batches, {} failed",
        report.processed, report.failed
    );
    Ok(if report.failed > 0 { EXIT_PARTIAL } else { EXIT_OK })
}

/// Hard-delete terminal batches older than `age`.
pub async fn batches_vacuum(db: &Db, age: Duration) -> Result<u8> {
    let queue = BatchQueue::new(db);
    let cutoff = Utc::now() - TimeDelta::from_std(age).context("age out of range")?;
    let removed = queue.vacuum(cutoff).await?;
    println!("vacuumed {removed} terminal batches");
    Ok(EXIT_OK)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::types::{ContentType, NewBatch};

    #[tokio::test]
    async fn drain_now_processes_future_batches() {
        let db = Db::open_in_memory().await.unwrap();
        let queue = BatchQueue::new(&db);
        queue
            .schedule(&NewBatch::velocity(
                1,
                ContentType::Post,
                10,
                8,
                Utc::now() + TimeDelta::minutes(15),
            ))
            .await
            .unwrap();

        // Without --now the future batch stays put.
        assert_eq!(batches_drain(&db, false).await.unwrap(), EXIT_OK);
        assert_eq!(queue.pending_count().await.unwrap(), 1);

        assert_eq!(batches_drain(&db, true).await.unwrap(), EXIT_OK);
        assert_eq!(queue.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn vacuum_removes_terminal_rows() {
        let db = Db::open_in_memory().await.unwrap();
        let queue = BatchQueue::new(&db);
        let batch = queue
            .schedule(&NewBatch::velocity(
                1,
                ContentType::Post,
                10,
                8,
                Utc::now() - TimeDelta::minutes(20),
            ))
            .await
            .unwrap()
            .unwrap();
        queue.mark_processed(batch.id).await.unwrap();

        assert_eq!(batches_vacuum(&db, Duration::ZERO).await.unwrap(), EXIT_OK);
        assert!(queue.get(batch.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn recompute_requires_a_target() {
        let db = Db::open_in_memory().await.unwrap();
        let config = Config::default();
        assert_eq!(
            baselines_recompute(&db, &config, None, false, false)
                .await
                .unwrap(),
            EXIT_CONFIG
        );
    }

    #[tokio::test]
    async fn recompute_single_user_without_content_is_ok() {
        let db = Db::open_in_memory().await.unwrap();
        let config = Config::default();
        assert_eq!(
            baselines_recompute(&db, &config, Some(7), false, false)
                .await
                .unwrap(),
            EXIT_OK
        );
    }

    #[tokio::test]
    async fn stale_sweep_runs_on_an_empty_store() {
        let db = Db::open_in_memory().await.unwrap();
        let config = Config::default();
        assert_eq!(
            baselines_recompute(&db, &config, None, false, true)
                .await
                .unwrap(),
            EXIT_OK
        );
    }

    #[tokio::test]
    async fn status_runs_on_an_empty_store() {
        let db = Db::open_in_memory().await.unwrap();
        assert_eq!(status(&db, &Config::default()).await.unwrap(), EXIT_OK);
    }
}
