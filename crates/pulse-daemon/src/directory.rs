use async_trait::async_trait;
use tracing::warn;

use pulse_core::db::Db;
use pulse_core::error::CoreError;
use pulse_engine::traits::ContentStats;

/// All-time authored counts read from the host's `posts` and `comments`
/// tables in the shared database.
///
/// The host CRUD layer owns those tables; deployments running the engine
/// against a fresh database (or a host that keeps content elsewhere) get
/// zero counts, which the baseline calculator treats as "no content".
pub struct SqliteContentStats {
    db: Db,
    has_posts: bool,
    has_comments: bool,
}

impl SqliteContentStats {
    /// Probe once for the host tables, then serve counts from them.
    pub async fn new(db: &Db) -> Result<Self, CoreError> {
        let (has_posts, has_comments) = db
            .conn()
            .call(|conn| {
                Ok((
                    table_exists(conn, "posts")?,
                    table_exists(conn, "comments")?,
                ))
            })
            .await
            .map_err(CoreError::from)?;

        if !has_posts || !has_comments {
            warn!(
                has_posts,
                has_comments,
                "host content tables missing, authored counts will read as zero"
            );
        }

        Ok(Self {
            db: db.clone(),
            has_posts,
            has_comments,
        })
    }
}

fn table_exists(conn: &rusqlite::Connection, name: &str) -> rusqlite::Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        rusqlite::params![name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

#[async_trait]
impl ContentStats for SqliteContentStats {
    async fn authored_totals(&self, user_id: i64) -> Result<(i64, i64), CoreError> {
        let has_posts = self.has_posts;
        let has_comments = self.has_comments;
        self.db
            .conn()
            .call(move |conn| {
                let posts = if has_posts {
                    conn.query_row(
                        "SELECT COUNT(*) FROM posts WHERE author_id = ?1",
                        rusqlite::params![user_id],
                        |row| row.get(0),
                    )?
                } else {
                    0
                };
                let comments = if has_comments {
                    conn.query_row(
                        "SELECT COUNT(*) FROM comments WHERE author_id = ?1",
                        rusqlite::params![user_id],
                        |row| row.get(0),
                    )?
                } else {
                    0
                };
                Ok((posts, comments))
            })
            .await
            .map_err(CoreError::from)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
