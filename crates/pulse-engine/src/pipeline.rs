use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use pulse_core::error::CoreError;
use pulse_core::notifications::NotificationStore;
use pulse_core::settings::PreferencesStore;
use pulse_core::types::{NewNotification, Notification, PushEnvelope};
use pulse_telemetry::metrics::{self, Labels};

use crate::traits::PushSink;

/// How an emit attempt ended.
#[derive(Debug, Clone, PartialEq)]
pub enum EmitOutcome {
    /// Persisted (and pushed live if the recipient was online).
    Delivered(Notification),
    /// A milestone duplicate: already persisted earlier, nothing pushed.
    Deduplicated,
    /// The recipient's preference toggle for this kind is off.
    Suppressed,
}

const INSERT_ATTEMPTS: u32 = 3;
const INSERT_BACKOFF: Duration = Duration::from_millis(50);

/// Dual-channel delivery: durable inbox insert, then best-effort live push.
///
/// The sources gate on preferences before calling in, and the pipeline
/// re-checks them here, so the toggle holds even for callers added later.
/// Push failure or overflow never affects the insert: the row is the
/// at-least-once channel, the push is at-most-once on top of it.
pub struct NotificationPipeline {
    settings: PreferencesStore,
    notifications: NotificationStore,
    push: Arc<dyn PushSink>,
}

impl NotificationPipeline {
    pub fn new(
        settings: PreferencesStore,
        notifications: NotificationStore,
        push: Arc<dyn PushSink>,
    ) -> Self {
        Self {
            settings,
            notifications,
            push,
        }
    }

    /// Persist a notification and push it to the recipient's live
    /// sessions when connected.
    pub async fn emit(&self, new: &NewNotification) -> Result<EmitOutcome, CoreError> {
        let prefs = self.settings.get(new.user_id).await?;
        if !prefs.allows(new.notification_type) {
            debug!(
                user_id = new.user_id,
                kind = new.notification_type.as_str(),
                "notification suppressed by preference"
            );
            return Ok(EmitOutcome::Suppressed);
        }

        let inserted = self.insert_with_retries(new).await?;
        let Some(notification) = inserted else {
            return Ok(EmitOutcome::Deduplicated);
        };

        metrics::global().inc(
            metrics::NOTIFICATIONS_EMITTED_TOTAL,
            Labels::new(&[("kind", new.notification_type.as_str())]),
        );

        if self.push.is_online(notification.user_id) {
            let sessions = self.push.deliver(
                notification.user_id,
                PushEnvelope::Notification(notification.clone()),
            );
            debug!(
                user_id = notification.user_id,
                notification_id = notification.id,
                sessions,
                "live push queued"
            );
        }

        Ok(EmitOutcome::Delivered(notification))
    }

    /// Insert with bounded retries on transient store errors. A duplicate
    /// milestone resolves to `None` without retrying.
    async fn insert_with_retries(
        &self,
        new: &NewNotification,
    ) -> Result<Option<Notification>, CoreError> {
        let mut attempt = 1;
        loop {
            match self.notifications.insert(new).await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_transient() && attempt < INSERT_ATTEMPTS => {
                    warn!(
                        user_id = new.user_id,
                        attempt,
                        error = %e,
                        "transient insert failure, retrying"
                    );
                    tokio::time::sleep(INSERT_BACKOFF * attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
