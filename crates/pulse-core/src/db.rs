use std::path::Path;

use chrono::{DateTime, Utc};
use tokio_rusqlite::Connection;

use crate::error::CoreError;

/// Async SQLite handle shared by every store in this crate.
///
/// Cloning is cheap; all clones funnel into one connection worker, which
/// gives the single-writer semantics the stores rely on.
#[derive(Clone)]
pub struct Db {
    conn: Connection,
}

impl Db {
    /// Open (or create) a database at the given file path.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let conn = Connection::open(path.as_ref()).await?;
        let db = Self { conn };
        db.init_schema().await?;
        Ok(db)
    }

    /// Create a purely in-memory database (useful for tests).
    pub async fn open_in_memory() -> Result<Self, CoreError> {
        let conn = Connection::open_in_memory().await?;
        let db = Self { conn };
        db.init_schema().await?;
        Ok(db)
    }

    /// The underlying async connection, for store modules and for hosts
    /// composing their own transactions around the activity log.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    // -----------------------------------------------------------------------
    // Schema
    // -----------------------------------------------------------------------

    async fn init_schema(&self) -> Result<(), CoreError> {
        self.conn
            .call(|conn| {
                conn.execute_batch(
                    "
                    PRAGMA journal_mode=WAL;
                    PRAGMA synchronous=NORMAL;
                    PRAGMA busy_timeout=5000;
                    PRAGMA foreign_keys=ON;

                    CREATE TABLE IF NOT EXISTS vote_activity (
                        id           INTEGER PRIMARY KEY AUTOINCREMENT,
                        content_type TEXT    NOT NULL,
                        content_id   INTEGER NOT NULL,
                        author_id    INTEGER NOT NULL,
                        voter_id     INTEGER NOT NULL,
                        is_upvote    INTEGER NOT NULL,
                        created_at   TEXT    NOT NULL,
                        hour_bucket  TEXT    NOT NULL
                    );

                    CREATE INDEX IF NOT EXISTS idx_vote_activity_content
                        ON vote_activity(content_type, content_id, created_at);
                    CREATE INDEX IF NOT EXISTS idx_vote_activity_author
                        ON vote_activity(author_id, created_at);
                    CREATE INDEX IF NOT EXISTS idx_vote_activity_created
                        ON vote_activity(created_at);

                    CREATE TABLE IF NOT EXISTS user_baselines (
                        user_id                    INTEGER PRIMARY KEY,
                        avg_post_votes_per_hour    REAL    NOT NULL,
                        avg_comment_votes_per_hour REAL    NOT NULL,
                        total_posts                INTEGER NOT NULL,
                        total_comments             INTEGER NOT NULL,
                        last_calculated_at         TEXT    NOT NULL
                    );

                    CREATE INDEX IF NOT EXISTS idx_user_baselines_calculated
                        ON user_baselines(last_calculated_at);

                    CREATE TABLE IF NOT EXISTS notification_batches (
                        id                INTEGER PRIMARY KEY AUTOINCREMENT,
                        user_id           INTEGER NOT NULL,
                        content_type      TEXT    NOT NULL,
                        content_id        INTEGER NOT NULL,
                        notification_type TEXT    NOT NULL,
                        votes_per_hour    INTEGER,
                        milestone_count   INTEGER,
                        scheduled_for     TEXT    NOT NULL,
                        status            TEXT    NOT NULL DEFAULT 'pending',
                        created_at        TEXT    NOT NULL,
                        processed_at      TEXT
                    );

                    -- At most one pending batch per (user, content, type).
                    CREATE UNIQUE INDEX IF NOT EXISTS idx_batches_pending_unique
                        ON notification_batches(user_id, content_type, content_id, notification_type)
                        WHERE status = 'pending';
                    CREATE INDEX IF NOT EXISTS idx_batches_due
                        ON notification_batches(status, scheduled_for);

                    CREATE TABLE IF NOT EXISTS notifications (
                        id                INTEGER PRIMARY KEY AUTOINCREMENT,
                        user_id           INTEGER NOT NULL,
                        notification_type TEXT    NOT NULL,
                        content_type      TEXT,
                        content_id        INTEGER,
                        actor_id          INTEGER,
                        milestone_count   INTEGER,
                        votes_per_hour    INTEGER,
                        message           TEXT    NOT NULL,
                        read              INTEGER NOT NULL DEFAULT 0,
                        created_at        TEXT    NOT NULL
                    );

                    -- Milestone kinds are one-shot per (user, content, rung).
                    CREATE UNIQUE INDEX IF NOT EXISTS idx_notifications_milestone_unique
                        ON notifications(user_id, content_type, content_id, notification_type, milestone_count)
                        WHERE milestone_count IS NOT NULL;
                    CREATE INDEX IF NOT EXISTS idx_notifications_user
                        ON notifications(user_id, created_at);
                    CREATE INDEX IF NOT EXISTS idx_notifications_unread
                        ON notifications(user_id, read);

                    CREATE TABLE IF NOT EXISTS user_settings (
                        user_id                 INTEGER PRIMARY KEY,
                        notify_comment_replies  INTEGER NOT NULL,
                        notify_post_milestone   INTEGER NOT NULL,
                        notify_post_velocity    INTEGER NOT NULL,
                        notify_comment_milestone INTEGER NOT NULL,
                        notify_comment_velocity INTEGER NOT NULL,
                        daily_digest            INTEGER NOT NULL,
                        notification_sound      INTEGER NOT NULL,
                        show_read_receipts      INTEGER NOT NULL,
                        show_typing_indicators  INTEGER NOT NULL,
                        auto_append_invitation  INTEGER NOT NULL,
                        theme                   TEXT    NOT NULL,
                        media_gallery_filter    TEXT    NOT NULL
                    );
                    ",
                )?;
                Ok(())
            })
            .await
            .map_err(CoreError::from)
    }
}

// ---------------------------------------------------------------------------
// SQL <-> chrono helpers shared by the store modules
// ---------------------------------------------------------------------------

/// Format a timestamp for storage. RFC 3339 with fixed-width UTC offset
/// sorts lexicographically, which the range scans depend on.
pub(crate) fn ts_to_sql(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

/// Parse a stored timestamp, surfacing corruption as a column error rather
/// than panicking inside the row mapper.
pub(crate) fn ts_from_sql(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}

/// Column decode failure for enum-like TEXT columns.
pub(crate) fn bad_enum(column: &str, raw: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        format!("unrecognized {column}: {raw}").into(),
    )
}
