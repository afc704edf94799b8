use chrono::Utc;

use crate::db::{bad_enum, ts_from_sql, ts_to_sql, Db};
use crate::error::CoreError;
use crate::types::{ContentType, NewNotification, Notification, NotificationKind};

/// Durable notification inbox. Writes are insert-only; the single mutation
/// is flipping `read`. Milestone kinds deduplicate on the unique index, so
/// a racing second voter past the same threshold cannot double-notify.
#[derive(Clone)]
pub struct NotificationStore {
    db: Db,
}

impl NotificationStore {
    pub fn new(db: &Db) -> Self {
        Self { db: db.clone() }
    }

    /// Insert a notification. Returns the stored row, or `None` when a
    /// milestone duplicate was silently dropped.
    pub async fn insert(&self, new: &NewNotification) -> Result<Option<Notification>, CoreError> {
        let new = new.clone();
        self.db
            .conn()
            .call(move |conn| {
                let inserted = conn.execute(
                    "INSERT OR IGNORE INTO notifications
                        (user_id, notification_type, content_type, content_id, actor_id,
                         milestone_count, votes_per_hour, message, read, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9)",
                    rusqlite::params![
                        new.user_id,
                        new.notification_type.as_str(),
                        new.content_type.map(|ct| ct.as_str()),
                        new.content_id,
                        new.actor_id,
                        new.milestone_count,
                        new.votes_per_hour,
                        new.message,
                        ts_to_sql(Utc::now()),
                    ],
                )?;
                if inserted == 0 {
                    return Ok(None);
                }
                let id = conn.last_insert_rowid();
                let mut stmt = conn.prepare(SELECT_NOTIFICATION)?;
                let mut rows = stmt.query(rusqlite::params![id])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_notification(row)?)),
                    None => Ok(None),
                }
            })
            .await
            .map_err(CoreError::from)
    }

    /// Inbox page for one user, newest first.
    pub async fn list(
        &self,
        user_id: i64,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Notification>, CoreError> {
        self.db
            .conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, user_id, notification_type, content_type, content_id,
                            actor_id, milestone_count, votes_per_hour, message, read, created_at
                     FROM notifications
                     WHERE user_id = ?1
                     ORDER BY created_at DESC, id DESC
                     LIMIT ?2 OFFSET ?3",
                )?;
                let mut rows =
                    stmt.query(rusqlite::params![user_id, limit as i64, offset as i64])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_notification(row)?);
                }
                Ok(out)
            })
            .await
            .map_err(CoreError::from)
    }

    pub async fn unread_count(&self, user_id: i64) -> Result<i64, CoreError> {
        self.db
            .conn()
            .call(move |conn| {
                let count = conn.query_row(
                    "SELECT COUNT(*) FROM notifications WHERE user_id = ?1 AND read = 0",
                    rusqlite::params![user_id],
                    |row| row.get(0),
                )?;
                Ok(count)
            })
            .await
            .map_err(CoreError::from)
    }

    /// Mark one notification read. The owner check keeps one user from
    /// acknowledging another user's inbox. Returns `false` when no row
    /// matched.
    pub async fn mark_read(&self, id: i64, user_id: i64) -> Result<bool, CoreError> {
        self.db
            .conn()
            .call(move |conn| {
                let updated = conn.execute(
                    "UPDATE notifications SET read = 1 WHERE id = ?1 AND user_id = ?2",
                    rusqlite::params![id, user_id],
                )?;
                Ok(updated > 0)
            })
            .await
            .map_err(CoreError::from)
    }

    pub async fn mark_all_read(&self, user_id: i64) -> Result<usize, CoreError> {
        self.db
            .conn()
            .call(move |conn| {
                let updated = conn.execute(
                    "UPDATE notifications SET read = 1 WHERE user_id = ?1 AND read = 0",
                    rusqlite::params![user_id],
                )?;
                Ok(updated)
            })
            .await
            .map_err(CoreError::from)
    }

    /// Delete on user request. Returns `false` when no row matched.
    pub async fn delete(&self, id: i64, user_id: i64) -> Result<bool, CoreError> {
        self.db
            .conn()
            .call(move |conn| {
                let removed = conn.execute(
                    "DELETE FROM notifications WHERE id = ?1 AND user_id = ?2",
                    rusqlite::params![id, user_id],
                )?;
                Ok(removed > 0)
            })
            .await
            .map_err(CoreError::from)
    }

    /// Total stored notifications (operator status).
    pub async fn total_count(&self) -> Result<i64, CoreError> {
        self.db
            .conn()
            .call(|conn| {
                let count =
                    conn.query_row("SELECT COUNT(*) FROM notifications", [], |row| row.get(0))?;
                Ok(count)
            })
            .await
            .map_err(CoreError::from)
    }
}

const SELECT_NOTIFICATION: &str = "SELECT id, user_id, notification_type, content_type, content_id,
        actor_id, milestone_count, votes_per_hour, message, read, created_at
 FROM notifications WHERE id = ?1";

fn row_to_notification(row: &rusqlite::Row<'_>) -> rusqlite::Result<Notification> {
    let kind: String = row.get(2)?;
    let content_type: Option<String> = row.get(3)?;
    let created_at: String = row.get(10)?;

    Ok(Notification {
        id: row.get(0)?,
        user_id: row.get(1)?,
        notification_type: NotificationKind::parse(&kind)
            .ok_or_else(|| bad_enum("notification_type", &kind))?,
        content_type: match content_type {
            Some(raw) => {
                Some(ContentType::parse(&raw).ok_or_else(|| bad_enum("content_type", &raw))?)
            }
            None => None,
        },
        content_id: row.get(4)?,
        actor_id: row.get(5)?,
        milestone_count: row.get(6)?,
        votes_per_hour: row.get(7)?,
        message: row.get(8)?,
        read: row.get(9)?,
        created_at: ts_from_sql(&created_at)?,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> NotificationStore {
        let db = Db::open_in_memory().await.unwrap();
        NotificationStore::new(&db)
    }

    #[tokio::test]
    async fn insert_returns_stored_row() {
        let store = store().await;
        let stored = store
            .insert(&NewNotification::milestone(1, ContentType::Post, 10, 50))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.user_id, 1);
        assert_eq!(stored.milestone_count, Some(50));
        assert!(!stored.read);
        assert_eq!(stored.message, "Your post reached 50 upvotes!");
    }

    #[tokio::test]
    async fn duplicate_milestone_is_a_silent_noop() {
        let store = store().await;
        let new = NewNotification::milestone(1, ContentType::Post, 10, 10);
        assert!(store.insert(&new).await.unwrap().is_some());
        assert!(store.insert(&new).await.unwrap().is_none());
        assert_eq!(store.total_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn distinct_milestones_both_insert() {
        let store = store().await;
        store
            .insert(&NewNotification::milestone(1, ContentType::Post, 10, 10))
            .await
            .unwrap();
        store
            .insert(&NewNotification::milestone(1, ContentType::Post, 10, 50))
            .await
            .unwrap();
        assert_eq!(store.total_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn non_milestone_kinds_never_deduplicate() {
        let store = store().await;
        let new = NewNotification::velocity(1, ContentType::Post, 10, 12);
        assert!(store.insert(&new).await.unwrap().is_some());
        assert!(store.insert(&new).await.unwrap().is_some());
        assert_eq!(store.total_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn list_is_newest_first_and_scoped_to_user() {
        let store = store().await;
        for milestone in [10, 50, 100] {
            store
                .insert(&NewNotification::milestone(1, ContentType::Post, 10, milestone))
                .await
                .unwrap();
        }
        store
            .insert(&NewNotification::milestone(2, ContentType::Post, 20, 10))
            .await
            .unwrap();

        let page = store.list(1, 10, 0).await.unwrap();
        assert_eq!(page.len(), 3);
        assert_eq!(page[0].milestone_count, Some(100));
        assert_eq!(page[2].milestone_count, Some(10));

        let second_page = store.list(1, 2, 2).await.unwrap();
        assert_eq!(second_page.len(), 1);
    }

    #[tokio::test]
    async fn unread_count_tracks_reads() {
        let store = store().await;
        let a = store
            .insert(&NewNotification::milestone(1, ContentType::Post, 10, 10))
            .await
            .unwrap()
            .unwrap();
        store
            .insert(&NewNotification::velocity(1, ContentType::Post, 10, 8))
            .await
            .unwrap();

        assert_eq!(store.unread_count(1).await.unwrap(), 2);
        assert!(store.mark_read(a.id, 1).await.unwrap());
        assert_eq!(store.unread_count(1).await.unwrap(), 1);
        assert_eq!(store.mark_all_read(1).await.unwrap(), 1);
        assert_eq!(store.unread_count(1).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn mark_read_requires_owner() {
        let store = store().await;
        let n = store
            .insert(&NewNotification::reply(1, 99, 2))
            .await
            .unwrap()
            .unwrap();
        assert!(!store.mark_read(n.id, 2).await.unwrap());
        assert!(store.mark_read(n.id, 1).await.unwrap());
    }

    #[tokio::test]
    async fn delete_requires_owner() {
        let store = store().await;
        let n = store
            .insert(&NewNotification::reply(1, 99, 2))
            .await
            .unwrap()
            .unwrap();
        assert!(!store.delete(n.id, 2).await.unwrap());
        assert!(store.delete(n.id, 1).await.unwrap());
        assert_eq!(store.total_count().await.unwrap(), 0);
    }
}
