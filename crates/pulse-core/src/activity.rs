use chrono::{DateTime, Utc};

use crate::db::{ts_from_sql, ts_to_sql, Db};
use crate::error::CoreError;
use crate::types::{ContentType, VoteEvent};

/// Append-only log of vote events, retained for the configured window.
///
/// Feeds the baseline calculator and the velocity detector. The append is
/// written in the same transaction as the vote itself when the host uses
/// [`append_in_tx`]; the async [`VoteActivityLog::append`] variant wraps a
/// transaction of its own.
#[derive(Clone)]
pub struct VoteActivityLog {
    db: Db,
}

/// Per-content aggregation of log rows inside a window, as consumed by the
/// baseline calculator.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentActivity {
    pub content_id: i64,
    pub votes: i64,
    pub first_vote_at: DateTime<Utc>,
    pub last_vote_at: DateTime<Utc>,
}

/// Insert one event using the caller's open transaction.
///
/// This is the production vote path: the vote row, the score mutation and
/// this append commit or roll back together.
pub fn append_in_tx(conn: &rusqlite::Connection, event: &VoteEvent) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO vote_activity
            (content_type, content_id, author_id, voter_id, is_upvote, created_at, hour_bucket)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        rusqlite::params![
            event.content_type.as_str(),
            event.content_id,
            event.author_id,
            event.voter_id,
            event.is_upvote,
            ts_to_sql(event.created_at),
            ts_to_sql(event.hour_bucket),
        ],
    )?;
    Ok(())
}

impl VoteActivityLog {
    pub fn new(db: &Db) -> Self {
        Self { db: db.clone() }
    }

    /// Persist one event in its own transaction.
    ///
    /// Self-votes violate the log invariant and are rejected; callers skip
    /// analytics for them instead of appending.
    pub async fn append(&self, event: &VoteEvent) -> Result<(), CoreError> {
        if event.is_self_vote() {
            return Err(CoreError::InputInvalid(
                "self-votes are excluded from the activity log".to_string(),
            ));
        }
        let event = event.clone();
        self.db
            .conn()
            .call(move |conn| {
                append_in_tx(conn, &event)?;
                Ok(())
            })
            .await
            .map_err(CoreError::from)
    }

    /// Votes on one content since `since` (inclusive).
    pub async fn count_since(
        &self,
        content_type: ContentType,
        content_id: i64,
        since: DateTime<Utc>,
    ) -> Result<i64, CoreError> {
        let since = ts_to_sql(since);
        self.db
            .conn()
            .call(move |conn| {
                let count = conn.query_row(
                    "SELECT COUNT(*) FROM vote_activity
                     WHERE content_type = ?1 AND content_id = ?2 AND created_at >= ?3",
                    rusqlite::params![content_type.as_str(), content_id, since],
                    |row| row.get(0),
                )?;
                Ok(count)
            })
            .await
            .map_err(CoreError::from)
    }

    /// Votes on one content in `[range_start, range_end)`.
    pub async fn count_between(
        &self,
        content_type: ContentType,
        content_id: i64,
        range_start: DateTime<Utc>,
        range_end: DateTime<Utc>,
    ) -> Result<i64, CoreError> {
        let start = ts_to_sql(range_start);
        let end = ts_to_sql(range_end);
        self.db
            .conn()
            .call(move |conn| {
                let count = conn.query_row(
                    "SELECT COUNT(*) FROM vote_activity
                     WHERE content_type = ?1 AND content_id = ?2
                       AND created_at >= ?3 AND created_at < ?4",
                    rusqlite::params![content_type.as_str(), content_id, start, end],
                    |row| row.get(0),
                )?;
                Ok(count)
            })
            .await
            .map_err(CoreError::from)
    }

    /// Authors with any logged activity since `since`, for the sweep.
    pub async fn distinct_authors(&self, since: DateTime<Utc>) -> Result<Vec<i64>, CoreError> {
        let since = ts_to_sql(since);
        self.db
            .conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT DISTINCT author_id FROM vote_activity
                     WHERE created_at >= ?1 ORDER BY author_id",
                )?;
                let mut rows = stmt.query(rusqlite::params![since])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row.get(0)?);
                }
                Ok(out)
            })
            .await
            .map_err(CoreError::from)
    }

    /// Per-content vote groups for one author inside a window, with the
    /// first/last event timestamps the rate computation needs.
    pub async fn author_content_activity(
        &self,
        author_id: i64,
        content_type: ContentType,
        since: DateTime<Utc>,
    ) -> Result<Vec<ContentActivity>, CoreError> {
        let since = ts_to_sql(since);
        self.db
            .conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT content_id, COUNT(*), MIN(created_at), MAX(created_at)
                     FROM vote_activity
                     WHERE author_id = ?1 AND content_type = ?2 AND created_at >= ?3
                     GROUP BY content_id",
                )?;
                let mut rows = stmt.query(rusqlite::params![
                    author_id,
                    content_type.as_str(),
                    since
                ])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    let first: String = row.get(2)?;
                    let last: String = row.get(3)?;
                    out.push(ContentActivity {
                        content_id: row.get(0)?,
                        votes: row.get(1)?,
                        first_vote_at: ts_from_sql(&first)?,
                        last_vote_at: ts_from_sql(&last)?,
                    });
                }
                Ok(out)
            })
            .await
            .map_err(CoreError::from)
    }

    /// Delete rows older than the cutoff. Idempotent; safe to run
    /// concurrently with appends.
    pub async fn prune(&self, older_than: DateTime<Utc>) -> Result<usize, CoreError> {
        let cutoff = ts_to_sql(older_than);
        self.db
            .conn()
            .call(move |conn| {
                let removed = conn.execute(
                    "DELETE FROM vote_activity WHERE created_at < ?1",
                    rusqlite::params![cutoff],
                )?;
                Ok(removed)
            })
            .await
            .map_err(CoreError::from)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    async fn log() -> VoteActivityLog {
        let db = Db::open_in_memory().await.unwrap();
        VoteActivityLog::new(&db)
    }

    fn event_at(content_id: i64, voter: i64, minutes_ago: i64) -> VoteEvent {
        VoteEvent::at(
            ContentType::Post,
            content_id,
            1,
            voter,
            true,
            Utc::now() - TimeDelta::minutes(minutes_ago),
        )
    }

    #[tokio::test]
    async fn append_and_count_since() {
        let log = log().await;
        log.append(&event_at(10, 2, 30)).await.unwrap();
        log.append(&event_at(10, 3, 90)).await.unwrap();

        let hour_ago = Utc::now() - TimeDelta::hours(1);
        let count = log
            .count_since(ContentType::Post, 10, hour_ago)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn count_between_is_half_open() {
        let log = log().await;
        let now = Utc::now();
        let exactly_2h = now - TimeDelta::hours(2);
        let exactly_1h = now - TimeDelta::hours(1);
        log.append(&VoteEvent::at(ContentType::Post, 10, 1, 2, true, exactly_2h))
            .await
            .unwrap();
        log.append(&VoteEvent::at(ContentType::Post, 10, 1, 3, true, exactly_1h))
            .await
            .unwrap();

        // [now-2h, now-1h): the event at exactly now-1h falls outside.
        let count = log
            .count_between(ContentType::Post, 10, exactly_2h, exactly_1h)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn self_vote_append_is_rejected() {
        let log = log().await;
        let event = VoteEvent::new(ContentType::Post, 10, 1, 1, true);
        let err = log.append(&event).await.unwrap_err();
        assert!(matches!(err, CoreError::InputInvalid(_)));
    }

    #[tokio::test]
    async fn counts_do_not_mix_content_types() {
        let log = log().await;
        let now = Utc::now();
        log.append(&VoteEvent::at(ContentType::Post, 10, 1, 2, true, now))
            .await
            .unwrap();
        log.append(&VoteEvent::at(ContentType::Comment, 10, 1, 3, true, now))
            .await
            .unwrap();

        let since = now - TimeDelta::hours(1);
        assert_eq!(
            log.count_since(ContentType::Post, 10, since).await.unwrap(),
            1
        );
        assert_eq!(
            log.count_since(ContentType::Comment, 10, since)
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn distinct_authors_in_window() {
        let log = log().await;
        let now = Utc::now();
        for (author, age_days) in [(1i64, 1i64), (1, 2), (2, 3), (3, 120)] {
            log.append(&VoteEvent::at(
                ContentType::Post,
                author * 100,
                author,
                author + 50,
                true,
                now - TimeDelta::days(age_days),
            ))
            .await
            .unwrap();
        }
        let authors = log
            .distinct_authors(now - TimeDelta::days(90))
            .await
            .unwrap();
        assert_eq!(authors, vec![1, 2]);
    }

    #[tokio::test]
    async fn author_content_activity_groups_by_content() {
        let log = log().await;
        let now = Utc::now();
        // Content 10: three votes over two hours. Content 20: one vote.
        for (voter, minutes) in [(4, 120), (5, 60), (6, 1)] {
            log.append(&event_at(10, voter, minutes)).await.unwrap();
        }
        log.append(&event_at(20, 9, 5)).await.unwrap();

        let mut groups = log
            .author_content_activity(1, ContentType::Post, now - TimeDelta::days(7))
            .await
            .unwrap();
        groups.sort_by_key(|g| g.content_id);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].content_id, 10);
        assert_eq!(groups[0].votes, 3);
        assert!(groups[0].first_vote_at < groups[0].last_vote_at);
        assert_eq!(groups[1].content_id, 20);
        assert_eq!(groups[1].votes, 1);
        assert_eq!(groups[1].first_vote_at, groups[1].last_vote_at);
    }

    #[tokio::test]
    async fn prune_removes_only_old_rows_and_is_idempotent() {
        let log = log().await;
        log.append(&event_at(10, 2, 60 * 24 * 8)).await.unwrap();
        log.append(&event_at(10, 3, 10)).await.unwrap();

        let cutoff = Utc::now() - TimeDelta::days(7);
        assert_eq!(log.prune(cutoff).await.unwrap(), 1);
        assert_eq!(log.prune(cutoff).await.unwrap(), 0);

        let remaining = log
            .count_since(ContentType::Post, 10, Utc::now() - TimeDelta::days(30))
            .await
            .unwrap();
        assert_eq!(remaining, 1);
    }
}
