use std::sync::Arc;

use tracing::warn;

use pulse_core::error::CoreError;
use pulse_core::settings::PreferencesStore;
use pulse_core::types::{ContentType, NewNotification, NotificationKind};

use crate::pipeline::{EmitOutcome, NotificationPipeline};

/// Emits one-shot notifications when content crosses score thresholds.
///
/// The ladder walk is cumulative: every rung at or below the current
/// score is attempted on every qualifying vote, and the notification
/// store's unique index swallows the rungs already emitted. That keeps
/// the tracker stateless and safe under concurrent vote bursts: two
/// voters racing past 10 both attempt rung 10, exactly one row lands.
pub struct MilestoneTracker {
    ladder: Vec<i64>,
    settings: PreferencesStore,
    pipeline: Arc<NotificationPipeline>,
}

impl MilestoneTracker {
    pub fn new(
        ladder: Vec<i64>,
        settings: PreferencesStore,
        pipeline: Arc<NotificationPipeline>,
    ) -> Self {
        Self {
            ladder,
            settings,
            pipeline,
        }
    }

    /// Ladder rungs at or below the current score.
    pub fn crossed(&self, current_upvotes: i64) -> impl Iterator<Item = i64> + '_ {
        self.ladder
            .iter()
            .copied()
            .take_while(move |&rung| rung <= current_upvotes)
    }

    /// Evaluate milestones after a vote moved `current_upvotes`.
    ///
    /// Returns how many new notifications were actually created. Rungs
    /// that fail to emit are logged and skipped; the rest of the ladder
    /// still runs.
    pub async fn evaluate(
        &self,
        author_id: i64,
        content_type: ContentType,
        content_id: i64,
        current_upvotes: i64,
    ) -> Result<usize, CoreError> {
        let prefs = self.settings.get(author_id).await?;
        if !prefs.allows(NotificationKind::milestone_for(content_type)) {
            return Ok(0);
        }

        let mut created = 0;
        for rung in self.crossed(current_upvotes) {
            let new = NewNotification::milestone(author_id, content_type, content_id, rung);
            match self.pipeline.emit(&new).await {
                Ok(EmitOutcome::Delivered(_)) => created += 1,
                Ok(EmitOutcome::Deduplicated) | Ok(EmitOutcome::Suppressed) => {}
                Err(e) => {
                    warn!(
                        author_id,
                        content_id,
                        rung,
                        error = %e,
                        "milestone emit failed, continuing ladder"
                    );
                }
            }
        }
        Ok(created)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
