use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use pulse_core::batches::BatchQueue;
use pulse_core::error::CoreError;
use pulse_core::types::{NewNotification, NotificationKind, PendingBatch};
use pulse_telemetry::metrics::{self, Labels};

use crate::pipeline::NotificationPipeline;

/// Default page size for one drain pass.
pub const DRAIN_PAGE_SIZE: usize = 1000;

/// Outcome of one scheduler tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub processed: usize,
    pub failed: usize,
}

/// Drains due batches into the notification pipeline on a fixed tick.
///
/// Batches are processed in `scheduled_for` order, page by page, until a
/// page comes back short. A batch that fails stays pending and is picked
/// up again next tick, until vacuum removes it; one poisoned batch never
/// stalls the rest of the page.
pub struct BatchScheduler {
    queue: BatchQueue,
    pipeline: Arc<NotificationPipeline>,
    page_size: usize,
}

impl BatchScheduler {
    pub fn new(queue: BatchQueue, pipeline: Arc<NotificationPipeline>) -> Self {
        Self {
            queue,
            pipeline,
            page_size: DRAIN_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Drain everything due at `now`. Returns per-tick counters.
    pub async fn run_tick(&self, now: DateTime<Utc>) -> Result<TickReport, CoreError> {
        let mut report = TickReport::default();

        loop {
            let due = self.queue.due(now, self.page_size).await?;
            if due.is_empty() {
                break;
            }

            let mut page_processed = 0;
            for batch in &due {
                match self.process_batch(batch).await {
                    Ok(()) => {
                        page_processed += 1;
                        report.processed += 1;
                    }
                    Err(e) => {
                        warn!(
                            batch_id = batch.id,
                            user_id = batch.user_id,
                            error = %e,
                            "batch failed, will retry next tick"
                        );
                        report.failed += 1;
                    }
                }
            }

            // A full page of failures would spin on the same rows forever;
            // leave them for the next tick instead.
            if due.len() < self.page_size || page_processed == 0 {
                break;
            }
        }

        if report.processed > 0 || report.failed > 0 {
            info!(
                processed = report.processed,
                failed = report.failed,
                "scheduler tick drained"
            );
            metrics::global().inc_by(
                metrics::BATCHES_PROCESSED_TOTAL,
                Labels::empty(),
                report.processed as u64,
            );
        }
        Ok(report)
    }

    /// Synthesize the final notification, emit it, then retire the row.
    async fn process_batch(&self, batch: &PendingBatch) -> Result<(), CoreError> {
        let new = synthesize(batch);
        self.pipeline.emit(&new).await?;

        // Conditional pending -> processed; losing the race means another
        // drain already retired this row.
        if !self.queue.mark_processed(batch.id).await? {
            debug!(batch_id = batch.id, "batch already terminal, skipped mark");
        }
        Ok(())
    }
}

/// The notification a finished batch turns into.
fn synthesize(batch: &PendingBatch) -> NewNotification {
    match batch.notification_type {
        NotificationKind::PostVelocity | NotificationKind::CommentVelocity => {
            NewNotification::velocity(
                batch.user_id,
                batch.content_type,
                batch.content_id,
                batch.votes_per_hour.unwrap_or(0),
            )
        }
        NotificationKind::PostMilestone | NotificationKind::CommentMilestone => {
            NewNotification::milestone(
                batch.user_id,
                batch.content_type,
                batch.content_id,
                batch.milestone_count.unwrap_or(0),
            )
        }
        NotificationKind::CommentReply => NewNotification {
            user_id: batch.user_id,
            notification_type: NotificationKind::CommentReply,
            content_type: Some(batch.content_type),
            content_id: Some(batch.content_id),
            actor_id: None,
            milestone_count: None,
            votes_per_hour: None,
            message: "Someone replied to your comment".to_string(),
        },
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    use pulse_core::db::Db;
    use pulse_core::notifications::NotificationStore;
    use pulse_core::settings::PreferencesStore;
    use pulse_core::types::{BatchStatus, ContentType, NewBatch, Preferences};

    use crate::traits::NoopPushSink;

    async fn fixture() -> (
        BatchScheduler,
        BatchQueue,
        NotificationStore,
        PreferencesStore,
    ) {
        let db = Db::open_in_memory().await.unwrap();
        let queue = BatchQueue::new(&db);
        let notifications = NotificationStore::new(&db);
        let settings = PreferencesStore::new(&db);
        let pipeline = Arc::new(NotificationPipeline::new(
            settings.clone(),
            notifications.clone(),
            Arc::new(NoopPushSink),
        ));
        (
            BatchScheduler::new(queue.clone(), pipeline),
            queue,
            notifications,
            settings,
        )
    }

    fn due_batch(user: i64, content: i64, vph: i64, minutes_ago: i64) -> NewBatch {
        NewBatch::velocity(
            user,
            ContentType::Post,
            content,
            vph,
            Utc::now() - TimeDelta::minutes(minutes_ago),
        )
    }

    #[tokio::test]
    async fn tick_emits_and_retires_due_batches() {
        let (scheduler, queue, notifications, _) = fixture().await;
        let stored = queue
            .schedule(&due_batch(1, 10, 9, 5))
            .await
            .unwrap()
            .unwrap();
        queue.schedule(&due_batch(2, 20, 7, 3)).await.unwrap();

        let report = scheduler.run_tick(Utc::now()).await.unwrap();
        assert_eq!(report, TickReport { processed: 2, failed: 0 });

        assert_eq!(queue.pending_count().await.unwrap(), 0);
        let retired = queue.get(stored.id).await.unwrap().unwrap();
        assert_eq!(retired.status, BatchStatus::Processed);
        assert!(retired.processed_at.is_some());

        let inbox = notifications.list(1, 10, 0).await.unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].votes_per_hour, Some(9));
        assert!(inbox[0].message.contains("trending"));
    }

    #[tokio::test]
    async fn future_batches_wait_for_their_window() {
        let (scheduler, queue, notifications, _) = fixture().await;
        queue
            .schedule(&NewBatch::velocity(
                1,
                ContentType::Post,
                10,
                9,
                Utc::now() + TimeDelta::minutes(15),
            ))
            .await
            .unwrap();

        let report = scheduler.run_tick(Utc::now()).await.unwrap();
        assert_eq!(report.processed, 0);
        assert_eq!(queue.pending_count().await.unwrap(), 1);
        assert_eq!(notifications.total_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn drains_past_the_page_size() {
        let (scheduler, queue, notifications, _) = fixture().await;
        let scheduler = scheduler.with_page_size(2);
        for content in 1..=5i64 {
            queue
                .schedule(&due_batch(1, content, 6, content))
                .await
                .unwrap();
        }

        let report = scheduler.run_tick(Utc::now()).await.unwrap();
        assert_eq!(report.processed, 5);
        assert_eq!(queue.pending_count().await.unwrap(), 0);
        assert_eq!(notifications.total_count().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn suppressed_batches_still_retire() {
        let (scheduler, queue, notifications, settings) = fixture().await;
        let mut prefs = Preferences::default_for(1);
        prefs.notify_post_velocity = false;
        settings.upsert(&prefs).await.unwrap();
        queue.schedule(&due_batch(1, 10, 9, 5)).await.unwrap();

        let report = scheduler.run_tick(Utc::now()).await.unwrap();
        assert_eq!(report.processed, 1);
        // Preference said no: the row retires without an inbox entry.
        assert_eq!(queue.pending_count().await.unwrap(), 0);
        assert_eq!(notifications.total_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn cancelled_batches_are_not_drained() {
        let (scheduler, queue, notifications, _) = fixture().await;
        queue.schedule(&due_batch(1, 10, 9, 5)).await.unwrap();
        queue.cancel(1, ContentType::Post, 10).await.unwrap();

        let report = scheduler.run_tick(Utc::now()).await.unwrap();
        assert_eq!(report.processed, 0);
        assert_eq!(notifications.total_count().await.unwrap(), 0);
    }
}
