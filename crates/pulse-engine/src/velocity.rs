use pulse_core::config::VelocityConfig;
use pulse_core::types::{Baseline, ContentType};

/// Decides when a vote rate warrants nudging the author.
///
/// Implementations must be pure functions of their observable inputs
/// (no store reads, no clocks), so the emit-time preference guarantee
/// holds for any policy swapped in here.
pub trait VelocityPolicy: Send + Sync {
    /// Whether `votes_per_hour` on the author's content is notable given
    /// their baseline.
    fn should_notify(
        &self,
        baseline: Option<&Baseline>,
        content_type: ContentType,
        votes_per_hour: f64,
    ) -> bool;

    /// Whether hour-over-hour growth qualifies as exponential, which
    /// upgrades the notification from batched to immediate.
    fn is_exponential(&self, prev_hour_votes: i64, curr_hour_votes: i64) -> bool;
}

/// The default rule-based policy.
///
/// Novice authors (no baseline, or fewer than `min_history_items` authored
/// items) are judged against a flat absolute rate. Established authors
/// only hear about rates strictly above `baseline_multiplier` times their
/// own average.
#[derive(Debug, Clone)]
pub struct RuleVelocityPolicy {
    new_user_threshold_vph: f64,
    baseline_multiplier: f64,
    exponential_multiplier: f64,
    min_history_items: i64,
}

impl RuleVelocityPolicy {
    pub fn new(
        new_user_threshold_vph: f64,
        baseline_multiplier: f64,
        exponential_multiplier: f64,
    ) -> Self {
        Self {
            new_user_threshold_vph,
            baseline_multiplier,
            exponential_multiplier,
            min_history_items: 10,
        }
    }

    pub fn from_config(cfg: &VelocityConfig) -> Self {
        Self::new(
            cfg.new_user_threshold_vph,
            cfg.baseline_multiplier,
            cfg.exponential_multiplier,
        )
    }
}

impl Default for RuleVelocityPolicy {
    fn default() -> Self {
        Self::from_config(&VelocityConfig::default())
    }
}

impl VelocityPolicy for RuleVelocityPolicy {
    fn should_notify(
        &self,
        baseline: Option<&Baseline>,
        content_type: ContentType,
        votes_per_hour: f64,
    ) -> bool {
        match baseline {
            Some(b) if b.total_items() >= self.min_history_items => {
                // Strictly greater: exactly 1.5x the baseline stays quiet.
                votes_per_hour > self.baseline_multiplier * b.rate_for(content_type)
            }
            // No history worth comparing against: flat threshold, inclusive.
            _ => votes_per_hour >= self.new_user_threshold_vph,
        }
    }

    fn is_exponential(&self, prev_hour_votes: i64, curr_hour_votes: i64) -> bool {
        if prev_hour_votes <= 0 {
            return false;
        }
        curr_hour_votes as f64 >= self.exponential_multiplier * prev_hour_votes as f64
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
