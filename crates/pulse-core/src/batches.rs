use chrono::{DateTime, Utc};

use crate::db::{bad_enum, ts_from_sql, ts_to_sql, Db};
use crate::error::CoreError;
use crate::types::{BatchStatus, ContentType, NewBatch, NotificationKind, PendingBatch};

/// Durable queue of deferred velocity notifications.
///
/// Scheduling is first-write-wins: while a pending row exists for the same
/// (`user_id`, `content_type`, `content_id`, `notification_type`), later
/// schedules are rejected and their payload discarded. The nudge already in
/// flight captures the trend.
#[derive(Clone)]
pub struct BatchQueue {
    db: Db,
}

impl BatchQueue {
    pub fn new(db: &Db) -> Self {
        Self { db: db.clone() }
    }

    /// Create a pending row. Returns the stored batch, or `None` when an
    /// identical pending row already exists (rejected, first write wins).
    pub async fn schedule(&self, batch: &NewBatch) -> Result<Option<PendingBatch>, CoreError> {
        let batch = batch.clone();
        self.db
            .conn()
            .call(move |conn| {
                let inserted = conn.execute(
                    "INSERT OR IGNORE INTO notification_batches
                        (user_id, content_type, content_id, notification_type,
                         votes_per_hour, milestone_count, scheduled_for, status, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'pending', ?8)",
                    rusqlite::params![
                        batch.user_id,
                        batch.content_type.as_str(),
                        batch.content_id,
                        batch.notification_type.as_str(),
                        batch.votes_per_hour,
                        batch.milestone_count,
                        ts_to_sql(batch.scheduled_for),
                        ts_to_sql(Utc::now()),
                    ],
                )?;
                if inserted == 0 {
                    return Ok(None);
                }
                let id = conn.last_insert_rowid();
                let mut stmt = conn.prepare(SELECT_BATCH)?;
                let mut rows = stmt.query(rusqlite::params![id])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_batch(row)?)),
                    None => Ok(None),
                }
            })
            .await
            .map_err(CoreError::from)
    }

    /// Cancel every pending row for the given content, for any notification
    /// type. Used when the same content upgrades to an immediate
    /// (exponential) notification. Returns the number of rows cancelled.
    pub async fn cancel(
        &self,
        user_id: i64,
        content_type: ContentType,
        content_id: i64,
    ) -> Result<usize, CoreError> {
        let now = ts_to_sql(Utc::now());
        self.db
            .conn()
            .call(move |conn| {
                let cancelled = conn.execute(
                    "UPDATE notification_batches
                     SET status = 'cancelled', processed_at = ?1
                     WHERE user_id = ?2 AND content_type = ?3 AND content_id = ?4
                       AND status = 'pending'",
                    rusqlite::params![now, user_id, content_type.as_str(), content_id],
                )?;
                Ok(cancelled)
            })
            .await
            .map_err(CoreError::from)
    }

    /// Pending rows with `scheduled_for <= before`, oldest schedule first.
    pub async fn due(
        &self,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<PendingBatch>, CoreError> {
        let before = ts_to_sql(before);
        self.db
            .conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, user_id, content_type, content_id, notification_type,
                            votes_per_hour, milestone_count, scheduled_for, status,
                            created_at, processed_at
                     FROM notification_batches
                     WHERE status = 'pending' AND scheduled_for <= ?1
                     ORDER BY scheduled_for ASC
                     LIMIT ?2",
                )?;
                let mut rows = stmt.query(rusqlite::params![before, limit as i64])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_batch(row)?);
                }
                Ok(out)
            })
            .await
            .map_err(CoreError::from)
    }

    /// Conditional `pending -> processed` transition. Returns `false` when
    /// the row was already terminal (lost the race or got cancelled).
    pub async fn mark_processed(&self, id: i64) -> Result<bool, CoreError> {
        let now = ts_to_sql(Utc::now());
        self.db
            .conn()
            .call(move |conn| {
                let updated = conn.execute(
                    "UPDATE notification_batches
                     SET status = 'processed', processed_at = ?1
                     WHERE id = ?2 AND status = 'pending'",
                    rusqlite::params![now, id],
                )?;
                Ok(updated > 0)
            })
            .await
            .map_err(CoreError::from)
    }

    /// Hard-delete terminal rows that reached their terminal state before
    /// the cutoff. Returns the number of rows removed.
    pub async fn vacuum(&self, before: DateTime<Utc>) -> Result<usize, CoreError> {
        let cutoff = ts_to_sql(before);
        self.db
            .conn()
            .call(move |conn| {
                let removed = conn.execute(
                    "DELETE FROM notification_batches
                     WHERE status IN ('processed', 'cancelled')
                       AND COALESCE(processed_at, created_at) < ?1",
                    rusqlite::params![cutoff],
                )?;
                Ok(removed)
            })
            .await
            .map_err(CoreError::from)
    }

    /// Number of rows still pending (operator status).
    pub async fn pending_count(&self) -> Result<i64, CoreError> {
        self.db
            .conn()
            .call(|conn| {
                let count = conn.query_row(
                    "SELECT COUNT(*) FROM notification_batches WHERE status = 'pending'",
                    [],
                    |row| row.get(0),
                )?;
                Ok(count)
            })
            .await
            .map_err(CoreError::from)
    }

    /// Fetch one batch by id (tests and operator tooling).
    pub async fn get(&self, id: i64) -> Result<Option<PendingBatch>, CoreError> {
        self.db
            .conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(SELECT_BATCH)?;
                let mut rows = stmt.query(rusqlite::params![id])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_batch(row)?)),
                    None => Ok(None),
                }
            })
            .await
            .map_err(CoreError::from)
    }
}

const SELECT_BATCH: &str = "SELECT id, user_id, content_type, content_id, notification_type,
        votes_per_hour, milestone_count, scheduled_for, status, created_at, processed_at
 FROM notification_batches WHERE id = ?1";

fn row_to_batch(row: &rusqlite::Row<'_>) -> rusqlite::Result<PendingBatch> {
    let content_type: String = row.get(2)?;
    let kind: String = row.get(4)?;
    let scheduled_for: String = row.get(7)?;
    let status: String = row.get(8)?;
    let created_at: String = row.get(9)?;
    let processed_at: Option<String> = row.get(10)?;

    Ok(PendingBatch {
        id: row.get(0)?,
        user_id: row.get(1)?,
        content_type: ContentType::parse(&content_type)
            .ok_or_else(|| bad_enum("content_type", &content_type))?,
        content_id: row.get(3)?,
        notification_type: NotificationKind::parse(&kind)
            .ok_or_else(|| bad_enum("notification_type", &kind))?,
        votes_per_hour: row.get(5)?,
        milestone_count: row.get(6)?,
        scheduled_for: ts_from_sql(&scheduled_for)?,
        status: BatchStatus::parse(&status).ok_or_else(|| bad_enum("status", &status))?,
        created_at: ts_from_sql(&created_at)?,
        processed_at: match processed_at {
            Some(raw) => Some(ts_from_sql(&raw)?),
            None => None,
        },
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    async fn queue() -> BatchQueue {
        let db = Db::open_in_memory().await.unwrap();
        BatchQueue::new(&db)
    }

    fn velocity_batch(user_id: i64, content_id: i64, vph: i64) -> NewBatch {
        NewBatch::velocity(
            user_id,
            ContentType::Post,
            content_id,
            vph,
            Utc::now() + TimeDelta::minutes(15),
        )
    }

    #[tokio::test]
    async fn schedule_creates_pending_row() {
        let queue = queue().await;
        let stored = queue
            .schedule(&velocity_batch(1, 10, 9))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, BatchStatus::Pending);
        assert_eq!(stored.votes_per_hour, Some(9));
        assert_eq!(stored.notification_type, NotificationKind::PostVelocity);
    }

    #[tokio::test]
    async fn duplicate_pending_is_rejected_first_write_wins() {
        let queue = queue().await;
        let first = queue.schedule(&velocity_batch(1, 10, 9)).await.unwrap();
        assert!(first.is_some());

        // Same keys, hotter payload: rejected, original payload survives.
        let second = queue.schedule(&velocity_batch(1, 10, 42)).await.unwrap();
        assert!(second.is_none());

        let kept = queue.get(first.unwrap().id).await.unwrap().unwrap();
        assert_eq!(kept.votes_per_hour, Some(9));
        assert_eq!(queue.pending_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn schedule_cancel_schedule_leaves_one_pending() {
        let queue = queue().await;
        queue.schedule(&velocity_batch(1, 10, 9)).await.unwrap();
        assert_eq!(queue.cancel(1, ContentType::Post, 10).await.unwrap(), 1);
        let again = queue.schedule(&velocity_batch(1, 10, 11)).await.unwrap();
        assert!(again.is_some());
        assert_eq!(queue.pending_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn cancel_only_touches_pending_rows() {
        let queue = queue().await;
        let batch = queue
            .schedule(&velocity_batch(1, 10, 9))
            .await
            .unwrap()
            .unwrap();
        assert!(queue.mark_processed(batch.id).await.unwrap());
        assert_eq!(queue.cancel(1, ContentType::Post, 10).await.unwrap(), 0);

        let got = queue.get(batch.id).await.unwrap().unwrap();
        assert_eq!(got.status, BatchStatus::Processed);
    }

    #[tokio::test]
    async fn due_orders_by_schedule_and_respects_limit() {
        let queue = queue().await;
        let now = Utc::now();
        for (content, offset_min) in [(10i64, -30i64), (20, -10), (30, 60)] {
            let batch = NewBatch::velocity(
                1,
                ContentType::Post,
                content,
                5,
                now + TimeDelta::minutes(offset_min),
            );
            queue.schedule(&batch).await.unwrap();
        }

        let due = queue.due(now, 10).await.unwrap();
        let contents: Vec<i64> = due.iter().map(|b| b.content_id).collect();
        assert_eq!(contents, vec![10, 20]);

        let just_one = queue.due(now, 1).await.unwrap();
        assert_eq!(just_one.len(), 1);
        assert_eq!(just_one[0].content_id, 10);
    }

    #[tokio::test]
    async fn mark_processed_is_a_one_way_transition() {
        let queue = queue().await;
        let batch = queue
            .schedule(&velocity_batch(1, 10, 9))
            .await
            .unwrap()
            .unwrap();
        assert!(queue.mark_processed(batch.id).await.unwrap());
        // Second attempt finds no pending row.
        assert!(!queue.mark_processed(batch.id).await.unwrap());
    }

    #[tokio::test]
    async fn vacuum_removes_only_old_terminal_rows() {
        let queue = queue().await;
        let processed = queue
            .schedule(&velocity_batch(1, 10, 9))
            .await
            .unwrap()
            .unwrap();
        queue.mark_processed(processed.id).await.unwrap();
        queue.schedule(&velocity_batch(2, 20, 9)).await.unwrap();

        // Nothing is older than a cutoff in the past.
        let past = Utc::now() - TimeDelta::days(7);
        assert_eq!(queue.vacuum(past).await.unwrap(), 0);

        // A future cutoff sweeps the processed row but not the pending one.
        let future = Utc::now() + TimeDelta::seconds(1);
        assert_eq!(queue.vacuum(future).await.unwrap(), 1);
        assert_eq!(queue.pending_count().await.unwrap(), 1);
    }
}
