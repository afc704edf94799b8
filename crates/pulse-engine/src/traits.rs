use async_trait::async_trait;

use pulse_core::baselines::BaselineStore;
use pulse_core::error::CoreError;
use pulse_core::types::{Baseline, PushEnvelope};

// ---------------------------------------------------------------------------
// BaselineReader
// ---------------------------------------------------------------------------

/// Read seam between the velocity evaluation and the baseline store. The
/// calculator is the only writer; everything else sees this interface.
#[async_trait]
pub trait BaselineReader: Send + Sync {
    async fn baseline(&self, user_id: i64) -> Result<Option<Baseline>, CoreError>;
}

#[async_trait]
impl BaselineReader for BaselineStore {
    async fn baseline(&self, user_id: i64) -> Result<Option<Baseline>, CoreError> {
        self.get(user_id).await
    }
}

// ---------------------------------------------------------------------------
// ContentStats
// ---------------------------------------------------------------------------

/// All-time authored counts, served by the host's content repositories
/// (posts and comments live outside this engine).
#[async_trait]
pub trait ContentStats: Send + Sync {
    /// `(total_posts, total_comments)` authored by the user, all-time.
    async fn authored_totals(&self, user_id: i64) -> Result<(i64, i64), CoreError>;
}

// ---------------------------------------------------------------------------
// PushSink
// ---------------------------------------------------------------------------

/// Egress seam between the notification pipeline and the live session
/// registry. Implementations must never block the caller: delivery is
/// enqueue-only, and overflow policy lives behind the sink.
pub trait PushSink: Send + Sync {
    /// Whether the user has at least one open live session.
    fn is_online(&self, user_id: i64) -> bool;

    /// Fan an envelope out to every open session of the user. Returns the
    /// number of sessions the payload was queued for. Best-effort: a
    /// return of 0 is not an error.
    fn deliver(&self, user_id: i64, envelope: PushEnvelope) -> usize;
}

/// Sink for hosts without a live transport (operator CLI, tests): nobody
/// is ever online.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPushSink;

impl PushSink for NoopPushSink {
    fn is_online(&self, _user_id: i64) -> bool {
        false
    }

    fn deliver(&self, _user_id: i64, _envelope: PushEnvelope) -> usize {
        0
    }
}
