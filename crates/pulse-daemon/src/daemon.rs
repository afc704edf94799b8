use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use tracing::{error, info, warn};

use pulse_core::activity::VoteActivityLog;
use pulse_core::baselines::BaselineStore;
use pulse_core::batches::BatchQueue;
use pulse_core::config::Config;
use pulse_core::db::Db;
use pulse_core::error::CoreError;
use pulse_core::shutdown::{DrainResult, ShutdownGuard, ShutdownSignal};
use pulse_engine::baseline::BaselineCalculator;
use pulse_engine::pipeline::NotificationPipeline;
use pulse_engine::scheduler::BatchScheduler;
use pulse_engine::traits::ContentStats;
use pulse_engine::NotificationEngine;
use pulse_live::SessionRegistry;

/// Loop cadences for the background daemon.
#[derive(Debug, Clone)]
pub struct DaemonIntervals {
    /// Batch scheduler tick (default: 15m).
    pub batch_tick: Duration,
    /// Full baseline sweep (default: 1h).
    pub baseline_sweep: Duration,
    /// Vote prune + batch vacuum (default: 1h).
    pub maintenance: Duration,
}

impl DaemonIntervals {
    pub fn from_config(config: &Config) -> Self {
        Self {
            batch_tick: config.batch.tick_cadence(),
            baseline_sweep: config.baseline.full_sweep_cadence(),
            maintenance: Duration::from_secs(3600),
        }
    }
}

impl Default for DaemonIntervals {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// The pulse background daemon.
///
/// Owns the live session registry, the ingress engine the host embeds,
/// and the three background loops: batch draining, baseline sweeping,
/// and store maintenance. Shuts down gracefully when the
/// [`ShutdownSignal`] fires, draining the in-flight tick first.
pub struct Daemon {
    config: Config,
    db: Db,
    registry: Arc<SessionRegistry>,
    engine: Arc<NotificationEngine>,
    stats: Arc<dyn ContentStats>,
    intervals: DaemonIntervals,
    shutdown: ShutdownSignal,
}

impl Daemon {
    /// Build a daemon over an already-open database handle.
    pub fn with_db(config: Config, db: Db, stats: Arc<dyn ContentStats>) -> Self {
        let registry = Arc::new(SessionRegistry::new(config.push.session_buffer));
        let engine = Arc::new(NotificationEngine::new(&db, &config, registry.clone()));
        let intervals = DaemonIntervals::from_config(&config);
        Self {
            config,
            db,
            registry,
            engine,
            stats,
            intervals,
            shutdown: ShutdownSignal::new(),
        }
    }

    /// Open (or create) the database from config and build the daemon.
    pub async fn new(config: Config, stats: Arc<dyn ContentStats>) -> Result<Self, CoreError> {
        let db = Db::open(config.store.resolved_path()).await?;
        Ok(Self::with_db(config, db, stats))
    }

    /// Override the loop cadences (tests, embedded hosts).
    pub fn set_intervals(&mut self, intervals: DaemonIntervals) {
        self.intervals = intervals;
    }

    /// The live session registry the push transport registers into.
    pub fn registry(&self) -> Arc<SessionRegistry> {
        self.registry.clone()
    }

    /// The ingress engine the host's vote/reply handlers call.
    pub fn engine(&self) -> Arc<NotificationEngine> {
        self.engine.clone()
    }

    /// A handle for triggering shutdown from another task.
    pub fn shutdown_handle(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Spawn the background loops, returning immediately (embedded mode).
    pub fn spawn_background_loops(&self) {
        let db = self.db.clone();
        let config = self.config.clone();
        let stats = self.stats.clone();
        let pipeline = self.engine.pipeline();
        let intervals = self.intervals.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            Self::run_loops(db, config, stats, pipeline, intervals, shutdown).await;
        });
    }

    /// Run the loops inline until shutdown (standalone mode).
    pub async fn run(&self) {
        info!(
            batch_tick_secs = self.intervals.batch_tick.as_secs(),
            baseline_sweep_secs = self.intervals.baseline_sweep.as_secs(),
            maintenance_secs = self.intervals.maintenance.as_secs(),
            "daemon starting event loop"
        );
        Self::run_loops(
            self.db.clone(),
            self.config.clone(),
            self.stats.clone(),
            self.engine.pipeline(),
            self.intervals.clone(),
            self.shutdown.clone(),
        )
        .await;
        info!("daemon stopped");
    }

    /// Trigger shutdown and wait for the loop task to drain.
    pub async fn stop_and_drain(&self, timeout: Duration) -> DrainResult {
        self.shutdown.trigger();
        let mut shutdown = self.shutdown.clone();
        shutdown.wait_for_drain(1, timeout).await
    }

    async fn run_loops(
        db: Db,
        config: Config,
        stats: Arc<dyn ContentStats>,
        pipeline: Arc<NotificationPipeline>,
        intervals: DaemonIntervals,
        shutdown: ShutdownSignal,
    ) {
        let activity = VoteActivityLog::new(&db);
        let queue = BatchQueue::new(&db);
        let scheduler = BatchScheduler::new(queue.clone(), pipeline);
        let calculator =
            BaselineCalculator::new(activity.clone(), BaselineStore::new(&db), stats);

        let tick_budget = config.batch.tick_budget();
        let sweep_budget = intervals.baseline_sweep - intervals.baseline_sweep / 10;
        let retention = TimeDelta::seconds(config.votes.retention_secs as i64);
        let vacuum_age = TimeDelta::seconds(config.batch.vacuum_age_secs as i64);

        let mut batch_interval = tokio::time::interval(intervals.batch_tick);
        let mut baseline_interval = tokio::time::interval(intervals.baseline_sweep);
        let mut maintenance_interval = tokio::time::interval(intervals.maintenance);

        // Consume the first immediate tick so the loops don't all fire at t=0.
        batch_interval.tick().await;
        baseline_interval.tick().await;
        maintenance_interval.tick().await;

        let mut shutdown_rx = shutdown.subscribe();
        let _drain_guard = ShutdownGuard::new(shutdown.clone());

        loop {
            tokio::select! {
                _ = batch_interval.tick() => {
                    match tokio::time::timeout(tick_budget, scheduler.run_tick(Utc::now())).await {
                        Ok(Ok(report)) => {
                            if report.failed > 0 {
                                warn!(failed = report.failed, "tick finished with failed batches");
                            }
                        }
                        Ok(Err(e)) => error!(error = %e, "scheduler tick failed"),
                        Err(_) => warn!(budget_secs = tick_budget.as_secs(), "tick budget exceeded"),
                    }
                }
                _ = baseline_interval.tick() => {
                    match tokio::time::timeout(sweep_budget, calculator.run_full_sweep()).await {
                        Ok(Ok(report)) => {
                            info!(
                                scanned = report.scanned,
                                updated = report.updated,
                                skipped = report.skipped,
                                failed = report.failed,
                                "baseline sweep completed"
                            );
                        }
                        Ok(Err(e)) => error!(error = %e, "baseline sweep failed"),
                        Err(_) => warn!("baseline sweep exceeded its budget"),
                    }
                }
                _ = maintenance_interval.tick() => {
                    let now = Utc::now();
                    match activity.prune(now - retention).await {
                        Ok(removed) if removed > 0 => info!(removed, "vote activity pruned"),
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "vote prune failed"),
                    }
                    match queue.vacuum(now - vacuum_age).await {
                        Ok(removed) if removed > 0 => info!(removed, "terminal batches vacuumed"),
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "batch vacuum failed"),
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("shutdown signal received, stopping background loops");
                    break;
                }
            }
        }

        let counters = pulse_telemetry::metrics::global().render();
        if !counters.is_empty() {
            info!(counters = %counters.trim_end().replace('\n', ", "), "final counter snapshot");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
