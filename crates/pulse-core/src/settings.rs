use crate::db::{bad_enum, Db};
use crate::error::CoreError;
use crate::types::{MediaGalleryFilter, Preferences};

/// Per-user settings. A user without a stored row gets the defaults; the
/// row is only materialized when the owner updates something.
#[derive(Clone)]
pub struct PreferencesStore {
    db: Db,
}

impl PreferencesStore {
    pub fn new(db: &Db) -> Self {
        Self { db: db.clone() }
    }

    /// Stored preferences, or the lazily-applied defaults.
    pub async fn get(&self, user_id: i64) -> Result<Preferences, CoreError> {
        self.db
            .conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT user_id, notify_comment_replies, notify_post_milestone,
                            notify_post_velocity, notify_comment_milestone,
                            notify_comment_velocity, daily_digest, notification_sound,
                            show_read_receipts, show_typing_indicators,
                            auto_append_invitation, theme, media_gallery_filter
                     FROM user_settings WHERE user_id = ?1",
                )?;
                let mut rows = stmt.query(rusqlite::params![user_id])?;
                match rows.next()? {
                    Some(row) => Ok(row_to_preferences(row)?),
                    None => Ok(Preferences::default_for(user_id)),
                }
            })
            .await
            .map_err(CoreError::from)
    }

    /// Persist the owner's settings, overwriting by `user_id`.
    pub async fn upsert(&self, prefs: &Preferences) -> Result<(), CoreError> {
        let prefs = prefs.clone();
        self.db
            .conn()
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO user_settings
                        (user_id, notify_comment_replies, notify_post_milestone,
                         notify_post_velocity, notify_comment_milestone,
                         notify_comment_velocity, daily_digest, notification_sound,
                         show_read_receipts, show_typing_indicators,
                         auto_append_invitation, theme, media_gallery_filter)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                     ON CONFLICT(user_id) DO UPDATE SET
                        notify_comment_replies = excluded.notify_comment_replies,
                        notify_post_milestone = excluded.notify_post_milestone,
                        notify_post_velocity = excluded.notify_post_velocity,
                        notify_comment_milestone = excluded.notify_comment_milestone,
                        notify_comment_velocity = excluded.notify_comment_velocity,
                        daily_digest = excluded.daily_digest,
                        notification_sound = excluded.notification_sound,
                        show_read_receipts = excluded.show_read_receipts,
                        show_typing_indicators = excluded.show_typing_indicators,
                        auto_append_invitation = excluded.auto_append_invitation,
                        theme = excluded.theme,
                        media_gallery_filter = excluded.media_gallery_filter",
                    rusqlite::params![
                        prefs.user_id,
                        prefs.notify_comment_replies,
                        prefs.notify_post_milestone,
                        prefs.notify_post_velocity,
                        prefs.notify_comment_milestone,
                        prefs.notify_comment_velocity,
                        prefs.daily_digest,
                        prefs.notification_sound,
                        prefs.show_read_receipts,
                        prefs.show_typing_indicators,
                        prefs.auto_append_invitation,
                        prefs.theme,
                        prefs.media_gallery_filter.as_str(),
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(CoreError::from)
    }
}

fn row_to_preferences(row: &rusqlite::Row<'_>) -> rusqlite::Result<Preferences> {
    let filter: String = row.get(12)?;
    Ok(Preferences {
        user_id: row.get(0)?,
        notify_comment_replies: row.get(1)?,
        notify_post_milestone: row.get(2)?,
        notify_post_velocity: row.get(3)?,
        notify_comment_milestone: row.get(4)?,
        notify_comment_velocity: row.get(5)?,
        daily_digest: row.get(6)?,
        notification_sound: row.get(7)?,
        show_read_receipts: row.get(8)?,
        show_typing_indicators: row.get(9)?,
        auto_append_invitation: row.get(10)?,
        theme: row.get(11)?,
        media_gallery_filter: MediaGalleryFilter::parse(&filter)
            .ok_or_else(|| bad_enum("media_gallery_filter", &filter))?,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
