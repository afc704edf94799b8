use chrono::{DateTime, Utc};

use crate::db::{ts_from_sql, ts_to_sql, Db};
use crate::error::CoreError;
use crate::types::Baseline;

/// Per-user engagement baselines. Written only by the baseline calculator;
/// read by the velocity detector.
#[derive(Clone)]
pub struct BaselineStore {
    db: Db,
}

impl BaselineStore {
    pub fn new(db: &Db) -> Self {
        Self { db: db.clone() }
    }

    pub async fn get(&self, user_id: i64) -> Result<Option<Baseline>, CoreError> {
        self.db
            .conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT user_id, avg_post_votes_per_hour, avg_comment_votes_per_hour,
                            total_posts, total_comments, last_calculated_at
                     FROM user_baselines WHERE user_id = ?1",
                )?;
                let mut rows = stmt.query(rusqlite::params![user_id])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_baseline(row)?)),
                    None => Ok(None),
                }
            })
            .await
            .map_err(CoreError::from)
    }

    /// Overwrite by `user_id`. The stored floats must be finite and
    /// non-negative; anything else is a calculator bug surfaced here.
    pub async fn upsert(&self, baseline: &Baseline) -> Result<(), CoreError> {
        if !baseline.avg_post_votes_per_hour.is_finite()
            || !baseline.avg_comment_votes_per_hour.is_finite()
            || baseline.avg_post_votes_per_hour < 0.0
            || baseline.avg_comment_votes_per_hour < 0.0
        {
            return Err(CoreError::InputInvalid(
                "baseline rates must be finite and non-negative".to_string(),
            ));
        }
        let baseline = baseline.clone();
        self.db
            .conn()
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO user_baselines
                        (user_id, avg_post_votes_per_hour, avg_comment_votes_per_hour,
                         total_posts, total_comments, last_calculated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(user_id) DO UPDATE SET
                        avg_post_votes_per_hour = excluded.avg_post_votes_per_hour,
                        avg_comment_votes_per_hour = excluded.avg_comment_votes_per_hour,
                        total_posts = excluded.total_posts,
                        total_comments = excluded.total_comments,
                        last_calculated_at = excluded.last_calculated_at",
                    rusqlite::params![
                        baseline.user_id,
                        baseline.avg_post_votes_per_hour,
                        baseline.avg_comment_votes_per_hour,
                        baseline.total_posts,
                        baseline.total_comments,
                        ts_to_sql(baseline.last_calculated_at),
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(CoreError::from)
    }

    /// Up to `limit` baselines with `last_calculated_at < cutoff`, oldest
    /// first. The fallback sweeper feeds on this.
    pub async fn stale(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Baseline>, CoreError> {
        let cutoff = ts_to_sql(cutoff);
        self.db
            .conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT user_id, avg_post_votes_per_hour, avg_comment_votes_per_hour,
                            total_posts, total_comments, last_calculated_at
                     FROM user_baselines
                     WHERE last_calculated_at < ?1
                     ORDER BY last_calculated_at ASC
                     LIMIT ?2",
                )?;
                let mut rows = stmt.query(rusqlite::params![cutoff, limit as i64])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_baseline(row)?);
                }
                Ok(out)
            })
            .await
            .map_err(CoreError::from)
    }

    /// How many baselines are older than the cutoff (operator status).
    pub async fn count_stale(&self, cutoff: DateTime<Utc>) -> Result<i64, CoreError> {
        let cutoff = ts_to_sql(cutoff);
        self.db
            .conn()
            .call(move |conn| {
                let count = conn.query_row(
                    "SELECT COUNT(*) FROM user_baselines WHERE last_calculated_at < ?1",
                    rusqlite::params![cutoff],
                    |row| row.get(0),
                )?;
                Ok(count)
            })
            .await
            .map_err(CoreError::from)
    }
}

fn row_to_baseline(row: &rusqlite::Row<'_>) -> rusqlite::Result<Baseline> {
    let calculated: String = row.get(5)?;
    Ok(Baseline {
        user_id: row.get(0)?,
        avg_post_votes_per_hour: row.get(1)?,
        avg_comment_votes_per_hour: row.get(2)?,
        total_posts: row.get(3)?,
        total_comments: row.get(4)?,
        last_calculated_at: ts_from_sql(&calculated)?,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
