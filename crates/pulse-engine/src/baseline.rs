use std::sync::Arc;

use chrono::{TimeDelta, Utc};
use tracing::{debug, warn};

use pulse_core::activity::VoteActivityLog;
use pulse_core::baselines::BaselineStore;
use pulse_core::error::CoreError;
use pulse_core::types::{Baseline, ContentType, ExperienceLevel};
use pulse_telemetry::metrics::{self, Labels};

use crate::traits::ContentStats;

/// Outcome of one sweep over the author population.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Recomputes per-user engagement baselines from the vote activity log.
///
/// The observation window adapts to the author's experience level: new
/// authors are judged on the last 7 days, regulars on 30, power users
/// on 90. The full sweep covers every author with activity in the last
/// 90 days; the stale sweep is the fallback for throttled deployments.
pub struct BaselineCalculator {
    activity: VoteActivityLog,
    baselines: BaselineStore,
    stats: Arc<dyn ContentStats>,
}

impl BaselineCalculator {
    pub fn new(
        activity: VoteActivityLog,
        baselines: BaselineStore,
        stats: Arc<dyn ContentStats>,
    ) -> Self {
        Self {
            activity,
            baselines,
            stats,
        }
    }

    /// Recompute one user's baseline and upsert it.
    ///
    /// Returns `None` for users with no authored content: they are not
    /// represented in the baseline store at all.
    pub async fn recompute_user(&self, user_id: i64) -> Result<Option<Baseline>, CoreError> {
        let now = Utc::now();

        // Window selection uses the level implied by the *current* stored
        // totals; a brand-new author starts on the short window.
        let level = self
            .baselines
            .get(user_id)
            .await?
            .map(|b| b.experience_level())
            .unwrap_or(ExperienceLevel::New);
        let window_start = now - TimeDelta::days(level.window_days());

        let (total_posts, total_comments) = self.stats.authored_totals(user_id).await?;
        if total_posts == 0 && total_comments == 0 {
            debug!(user_id, "no authored content, baseline skipped");
            return Ok(None);
        }

        let avg_post = self
            .window_rate(user_id, ContentType::Post, window_start)
            .await?;
        let avg_comment = self
            .window_rate(user_id, ContentType::Comment, window_start)
            .await?;

        let baseline = Baseline {
            user_id,
            avg_post_votes_per_hour: avg_post,
            avg_comment_votes_per_hour: avg_comment,
            total_posts,
            total_comments,
            last_calculated_at: now,
        };
        self.baselines.upsert(&baseline).await?;

        debug!(
            user_id,
            level = ?level,
            avg_post,
            avg_comment,
            "baseline recomputed"
        );
        Ok(Some(baseline))
    }

    /// Mean votes-per-hour across the user's active contents in the window.
    ///
    /// Each content contributes `votes / hours_active`, where
    /// `hours_active` spans its first to last vote and is clamped to at
    /// least one hour so a single burst cannot explode the rate.
    async fn window_rate(
        &self,
        user_id: i64,
        content_type: ContentType,
        window_start: chrono::DateTime<Utc>,
    ) -> Result<f64, CoreError> {
        let groups = self
            .activity
            .author_content_activity(user_id, content_type, window_start)
            .await?;

        let rates: Vec<f64> = groups
            .iter()
            .filter(|g| g.votes > 0)
            .map(|g| {
                let span_hours = (g.last_vote_at - g.first_vote_at).num_seconds() as f64 / 3600.0;
                let hours_active = span_hours.max(1.0);
                g.votes as f64 / hours_active
            })
            .collect();

        if rates.is_empty() {
            return Ok(0.0);
        }
        Ok(rates.iter().sum::<f64>() / rates.len() as f64)
    }

    /// Recompute every author with logged activity in the last 90 days.
    ///
    /// Per-user failures are logged and skipped; the sweep always runs to
    /// the end of the author list.
    pub async fn run_full_sweep(&self) -> Result<SweepReport, CoreError> {
        let since = Utc::now() - TimeDelta::days(90);
        let authors = self.activity.distinct_authors(since).await?;
        let report = self.recompute_all(&authors).await;
        metrics::global().inc_by(
            metrics::BASELINE_SWEEP_USERS_TOTAL,
            Labels::new(&[("sweep", "full")]),
            report.scanned as u64,
        );
        Ok(report)
    }

    /// Fallback sweep: refresh up to `limit` baselines whose
    /// `last_calculated_at` is older than `stale_after`.
    pub async fn run_stale_sweep(
        &self,
        stale_after: std::time::Duration,
        limit: usize,
    ) -> Result<SweepReport, CoreError> {
        let cutoff = Utc::now()
            - TimeDelta::from_std(stale_after)
                .map_err(|e| CoreError::InputInvalid(format!("stale_after out of range: {e}")))?;
        let stale = self.baselines.stale(cutoff, limit).await?;
        let users: Vec<i64> = stale.iter().map(|b| b.user_id).collect();
        let report = self.recompute_all(&users).await;
        metrics::global().inc_by(
            metrics::BASELINE_SWEEP_USERS_TOTAL,
            Labels::new(&[("sweep", "stale")]),
            report.scanned as u64,
        );
        Ok(report)
    }

    async fn recompute_all(&self, users: &[i64]) -> SweepReport {
        let mut report = SweepReport {
            scanned: users.len(),
            ..SweepReport::default()
        };
        for &user_id in users {
            match self.recompute_user(user_id).await {
                Ok(Some(_)) => report.updated += 1,
                Ok(None) => report.skipped += 1,
                Err(e) => {
                    warn!(user_id, error = %e, "baseline recompute failed, skipping user");
                    report.failed += 1;
                }
            }
        }
        report
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
