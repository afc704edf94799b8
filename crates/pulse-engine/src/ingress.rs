use std::sync::Arc;

use chrono::{TimeDelta, Utc};
use tracing::{debug, warn};

use pulse_core::activity::VoteActivityLog;
use pulse_core::baselines::BaselineStore;
use pulse_core::batches::BatchQueue;
use pulse_core::config::Config;
use pulse_core::db::Db;
use pulse_core::error::CoreError;
use pulse_core::notifications::NotificationStore;
use pulse_core::settings::PreferencesStore;
use pulse_core::types::{ContentType, NewBatch, NewNotification, NotificationKind, VoteEvent};

use crate::milestone::MilestoneTracker;
use crate::pipeline::NotificationPipeline;
use crate::traits::{BaselineReader, PushSink};
use crate::velocity::{RuleVelocityPolicy, VelocityPolicy};

/// One vote mutation as reported by the host's vote handler, after the
/// vote row and score change committed.
#[derive(Debug, Clone, Copy)]
pub struct VoteRecord {
    pub content_type: ContentType,
    pub content_id: i64,
    pub author_id: i64,
    pub voter_id: i64,
    /// `false` covers both downvotes and removals.
    pub is_upvote: bool,
    /// The content's upvote count after this mutation.
    pub current_upvotes: i64,
}

/// Entry point the vote and reply handlers call into.
///
/// Owns the full evaluation chain for a vote: activity append, milestone
/// ladder, velocity detection, and the batch-or-immediate decision. The
/// append shares fate with the vote; everything after it is best-effort
/// and never surfaces to the voter.
pub struct NotificationEngine {
    activity: VoteActivityLog,
    baselines: Arc<dyn BaselineReader>,
    queue: BatchQueue,
    settings: PreferencesStore,
    pipeline: Arc<NotificationPipeline>,
    milestones: MilestoneTracker,
    policy: Arc<dyn VelocityPolicy>,
    window_hours: i64,
    velocity_delay: TimeDelta,
}

impl NotificationEngine {
    /// Wire the engine over one database handle with the default rule
    /// policy.
    pub fn new(db: &Db, config: &Config, push: Arc<dyn PushSink>) -> Self {
        let settings = PreferencesStore::new(db);
        let pipeline = Arc::new(NotificationPipeline::new(
            settings.clone(),
            NotificationStore::new(db),
            push,
        ));
        let milestones = MilestoneTracker::new(
            config.milestone.ladder.clone(),
            settings.clone(),
            pipeline.clone(),
        );
        Self {
            activity: VoteActivityLog::new(db),
            baselines: Arc::new(BaselineStore::new(db)),
            queue: BatchQueue::new(db),
            settings,
            pipeline,
            milestones,
            policy: Arc::new(RuleVelocityPolicy::from_config(&config.velocity)),
            window_hours: config.velocity.window_hours as i64,
            velocity_delay: TimeDelta::seconds(config.batch.velocity_delay_secs as i64),
        }
    }

    /// Swap the velocity policy (must stay a pure function of its inputs).
    pub fn with_policy(mut self, policy: Arc<dyn VelocityPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// The pipeline, for hosts that emit their own notification kinds.
    pub fn pipeline(&self) -> Arc<NotificationPipeline> {
        self.pipeline.clone()
    }

    /// Handle one committed vote mutation.
    ///
    /// The activity append failing aborts the vote (the caller rolls the
    /// whole mutation back and retries); milestone and velocity evaluation
    /// failures are logged and swallowed.
    pub async fn on_vote(&self, vote: VoteRecord) -> Result<(), CoreError> {
        if vote.voter_id == vote.author_id {
            // Self-votes on creation never enter analytics.
            return Ok(());
        }

        let event = VoteEvent::new(
            vote.content_type,
            vote.content_id,
            vote.author_id,
            vote.voter_id,
            vote.is_upvote,
        );
        self.activity.append(&event).await?;

        if let Err(e) = self
            .milestones
            .evaluate(
                vote.author_id,
                vote.content_type,
                vote.content_id,
                vote.current_upvotes,
            )
            .await
        {
            warn!(
                author_id = vote.author_id,
                content_id = vote.content_id,
                error = %e,
                "milestone evaluation failed"
            );
        }

        if let Err(e) = self.evaluate_velocity(&vote).await {
            warn!(
                author_id = vote.author_id,
                content_id = vote.content_id,
                error = %e,
                "velocity evaluation failed"
            );
        }

        Ok(())
    }

    /// Handle a new reply: notify the parent comment's author, unless
    /// they replied to themselves or opted out.
    pub async fn on_reply(
        &self,
        reply_comment_id: i64,
        parent_author_id: i64,
        reply_author_id: i64,
    ) -> Result<(), CoreError> {
        if parent_author_id == reply_author_id {
            return Ok(());
        }
        let prefs = self.settings.get(parent_author_id).await?;
        if !prefs.notify_comment_replies {
            return Ok(());
        }
        self.pipeline
            .emit(&NewNotification::reply(
                parent_author_id,
                reply_comment_id,
                reply_author_id,
            ))
            .await?;
        Ok(())
    }

    /// The C4 decision chain: observed rate vs baseline, then the
    /// hour-over-hour growth check that decides batched vs immediate.
    async fn evaluate_velocity(&self, vote: &VoteRecord) -> Result<(), CoreError> {
        let now = Utc::now();
        let window_start = now - TimeDelta::hours(self.window_hours);
        let recent = self
            .activity
            .count_since(vote.content_type, vote.content_id, window_start)
            .await?;
        let votes_per_hour = recent as f64 / self.window_hours as f64;

        let baseline = self.baselines.baseline(vote.author_id).await?;
        if !self
            .policy
            .should_notify(baseline.as_ref(), vote.content_type, votes_per_hour)
        {
            return Ok(());
        }

        let kind = NotificationKind::velocity_for(vote.content_type);
        let prefs = self.settings.get(vote.author_id).await?;
        if !prefs.allows(kind) {
            return Ok(());
        }

        let prev_hour = self
            .activity
            .count_between(
                vote.content_type,
                vote.content_id,
                now - TimeDelta::hours(2),
                now - TimeDelta::hours(1),
            )
            .await?;
        let curr_hour = self
            .activity
            .count_since(vote.content_type, vote.content_id, now - TimeDelta::hours(1))
            .await?;

        let vph_rounded = votes_per_hour.round() as i64;
        if self.policy.is_exponential(prev_hour, curr_hour) {
            // Upgrade: the scheduled nudge would be stale news.
            self.queue
                .cancel(vote.author_id, vote.content_type, vote.content_id)
                .await?;
            self.pipeline
                .emit(&NewNotification::velocity(
                    vote.author_id,
                    vote.content_type,
                    vote.content_id,
                    vph_rounded,
                ))
                .await?;
            debug!(
                author_id = vote.author_id,
                content_id = vote.content_id,
                votes_per_hour = vph_rounded,
                "exponential growth, immediate notification"
            );
        } else {
            let scheduled = self
                .queue
                .schedule(&NewBatch::velocity(
                    vote.author_id,
                    vote.content_type,
                    vote.content_id,
                    vph_rounded,
                    now + self.velocity_delay,
                ))
                .await?;
            debug!(
                author_id = vote.author_id,
                content_id = vote.content_id,
                votes_per_hour = vph_rounded,
                coalesced = scheduled.is_none(),
                "velocity trend batched"
            );
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::types::{Baseline, BatchStatus};

    use crate::traits::NoopPushSink;

    struct Fixture {
        engine: NotificationEngine,
        activity: VoteActivityLog,
        queue: BatchQueue,
        notifications: NotificationStore,
        baselines: BaselineStore,
    }

    async fn fixture() -> Fixture {
        let db = Db::open_in_memory().await.unwrap();
        Fixture {
            engine: NotificationEngine::new(&db, &Config::default(), Arc::new(NoopPushSink)),
            activity: VoteActivityLog::new(&db),
            queue: BatchQueue::new(&db),
            notifications: NotificationStore::new(&db),
            baselines: BaselineStore::new(&db),
        }
    }

    fn upvote(content_id: i64, author: i64, voter: i64, upvotes_after: i64) -> VoteRecord {
        VoteRecord {
            content_type: ContentType::Post,
            content_id,
            author_id: author,
            voter_id: voter,
            is_upvote: true,
            current_upvotes: upvotes_after,
        }
    }

    async fn seed_votes(activity: &VoteActivityLog, content_id: i64, count: i64, minutes_ago: i64) {
        for i in 0..count {
            activity
                .append(&VoteEvent::at(
                    ContentType::Post,
                    content_id,
                    1,
                    1000 + i,
                    true,
                    Utc::now() - TimeDelta::minutes(minutes_ago + i % 3),
                ))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn self_vote_does_nothing() {
        let f = fixture().await;
        f.engine.on_vote(upvote(10, 1, 1, 10)).await.unwrap();

        let count = f
            .activity
            .count_since(ContentType::Post, 10, Utc::now() - TimeDelta::hours(1))
            .await
            .unwrap();
        assert_eq!(count, 0);
        assert_eq!(f.notifications.total_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn milestone_fires_exactly_once_at_the_rung() {
        let f = fixture().await;
        f.engine.on_vote(upvote(10, 1, 2, 10)).await.unwrap();
        f.engine.on_vote(upvote(10, 1, 3, 11)).await.unwrap();

        let inbox = f.notifications.list(1, 10, 0).await.unwrap();
        let milestones: Vec<_> = inbox
            .iter()
            .filter(|n| n.notification_type == NotificationKind::PostMilestone)
            .collect();
        assert_eq!(milestones.len(), 1);
        assert_eq!(milestones[0].milestone_count, Some(10));
    }

    #[tokio::test]
    async fn new_user_burst_schedules_a_batch() {
        let f = fixture().await;
        // 14 earlier votes in the window; the 15th pushes vph to 5.0.
        seed_votes(&f.activity, 10, 14, 20).await;
        f.engine.on_vote(upvote(10, 1, 2000, 15)).await.unwrap();

        assert_eq!(f.queue.pending_count().await.unwrap(), 1);
        // Not exponential (no previous-hour history): nothing immediate.
        let velocity_rows: Vec<_> = f
            .notifications
            .list(1, 50, 0)
            .await
            .unwrap()
            .into_iter()
            .filter(|n| n.notification_type == NotificationKind::PostVelocity)
            .collect();
        assert!(velocity_rows.is_empty());
    }

    #[tokio::test]
    async fn repeat_trend_coalesces_into_one_batch() {
        let f = fixture().await;
        seed_votes(&f.activity, 10, 20, 10).await;
        f.engine.on_vote(upvote(10, 1, 2000, 21)).await.unwrap();
        f.engine.on_vote(upvote(10, 1, 2001, 22)).await.unwrap();

        assert_eq!(f.queue.pending_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn exponential_growth_emits_immediately_and_cancels_the_batch() {
        let f = fixture().await;
        let now = Utc::now();

        // Established author with a modest baseline.
        f.baselines
            .upsert(&Baseline {
                user_id: 1,
                avg_post_votes_per_hour: 2.0,
                avg_comment_votes_per_hour: 0.0,
                total_posts: 20,
                total_comments: 0,
                last_calculated_at: now,
            })
            .await
            .unwrap();

        // Previous hour: 5 votes. Current hour: 11 before the trigger.
        for i in 0..5i64 {
            f.activity
                .append(&VoteEvent::at(
                    ContentType::Post,
                    10,
                    1,
                    100 + i,
                    true,
                    now - TimeDelta::minutes(70 + i),
                ))
                .await
                .unwrap();
        }
        for i in 0..11i64 {
            f.activity
                .append(&VoteEvent::at(
                    ContentType::Post,
                    10,
                    1,
                    200 + i,
                    true,
                    now - TimeDelta::minutes(2 + i % 30),
                ))
                .await
                .unwrap();
        }
        // A batch from an earlier, slower trend is already pending.
        f.queue
            .schedule(&NewBatch::velocity(
                1,
                ContentType::Post,
                10,
                6,
                now + TimeDelta::minutes(15),
            ))
            .await
            .unwrap();

        f.engine.on_vote(upvote(10, 1, 999, 17)).await.unwrap();

        // Immediate notification, no pending batch left.
        let velocity_rows: Vec<_> = f
            .notifications
            .list(1, 50, 0)
            .await
            .unwrap()
            .into_iter()
            .filter(|n| n.notification_type == NotificationKind::PostVelocity)
            .collect();
        assert_eq!(velocity_rows.len(), 1);
        assert_eq!(f.queue.pending_count().await.unwrap(), 0);

        let cancelled = f
            .queue
            .due(now + TimeDelta::hours(1), 10)
            .await
            .unwrap();
        assert!(cancelled.is_empty());
    }

    #[tokio::test]
    async fn experienced_author_at_exactly_one_point_five_times_stays_quiet() {
        let f = fixture().await;
        let now = Utc::now();
        f.baselines
            .upsert(&Baseline {
                user_id: 1,
                avg_post_votes_per_hour: 4.0,
                avg_comment_votes_per_hour: 0.0,
                total_posts: 20,
                total_comments: 0,
                last_calculated_at: now,
            })
            .await
            .unwrap();

        // 18 votes over the 3h window = 6.0/h = exactly 1.5x of 4.0.
        for i in 0..17i64 {
            f.activity
                .append(&VoteEvent::at(
                    ContentType::Post,
                    10,
                    1,
                    100 + i,
                    true,
                    now - TimeDelta::minutes(5 + i * 9),
                ))
                .await
                .unwrap();
        }
        f.engine.on_vote(upvote(10, 1, 999, 18)).await.unwrap();

        assert_eq!(f.queue.pending_count().await.unwrap(), 0);
        let velocity_rows: Vec<_> = f
            .notifications
            .list(1, 50, 0)
            .await
            .unwrap()
            .into_iter()
            .filter(|n| n.notification_type == NotificationKind::PostVelocity)
            .collect();
        assert!(velocity_rows.is_empty());
    }

    #[tokio::test]
    async fn reply_notifies_parent_author() {
        let f = fixture().await;
        f.engine.on_reply(500, 1, 2).await.unwrap();

        let inbox = f.notifications.list(1, 10, 0).await.unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].notification_type, NotificationKind::CommentReply);
        assert_eq!(inbox[0].actor_id, Some(2));
    }

    #[tokio::test]
    async fn self_reply_never_notifies() {
        let f = fixture().await;
        f.engine.on_reply(500, 1, 1).await.unwrap();
        assert_eq!(f.notifications.total_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn velocity_batch_schedule_matches_the_delay() {
        let f = fixture().await;
        seed_votes(&f.activity, 10, 20, 10).await;
        let before = Utc::now();
        f.engine.on_vote(upvote(10, 1, 2000, 21)).await.unwrap();

        let due = f
            .queue
            .due(before + TimeDelta::minutes(16), 10)
            .await
            .unwrap();
        assert_eq!(due.len(), 1);
        let delta = due[0].scheduled_for - before;
        assert!(delta >= TimeDelta::minutes(14) && delta <= TimeDelta::minutes(16));
    }

    #[tokio::test]
    async fn batch_rows_track_status_transitions() {
        let f = fixture().await;
        seed_votes(&f.activity, 10, 20, 10).await;
        f.engine.on_vote(upvote(10, 1, 2000, 21)).await.unwrap();

        let pending = f
            .queue
            .due(Utc::now() + TimeDelta::hours(1), 10)
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].status, BatchStatus::Pending);
    }
}
