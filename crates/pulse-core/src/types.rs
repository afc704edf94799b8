use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ContentType
// ---------------------------------------------------------------------------

/// The kind of user content a vote or notification refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Post,
    Comment,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Post => "post",
            ContentType::Comment => "comment",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "post" => Some(ContentType::Post),
            "comment" => Some(ContentType::Comment),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// NotificationKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    PostMilestone,
    CommentMilestone,
    PostVelocity,
    CommentVelocity,
    CommentReply,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::PostMilestone => "post_milestone",
            NotificationKind::CommentMilestone => "comment_milestone",
            NotificationKind::PostVelocity => "post_velocity",
            NotificationKind::CommentVelocity => "comment_velocity",
            NotificationKind::CommentReply => "comment_reply",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "post_milestone" => Some(NotificationKind::PostMilestone),
            "comment_milestone" => Some(NotificationKind::CommentMilestone),
            "post_velocity" => Some(NotificationKind::PostVelocity),
            "comment_velocity" => Some(NotificationKind::CommentVelocity),
            "comment_reply" => Some(NotificationKind::CommentReply),
            _ => None,
        }
    }

    /// Milestone kinds deduplicate on insert; the others do not.
    pub fn is_milestone(&self) -> bool {
        matches!(
            self,
            NotificationKind::PostMilestone | NotificationKind::CommentMilestone
        )
    }

    /// The milestone kind for votes on the given content type.
    pub fn milestone_for(content_type: ContentType) -> Self {
        match content_type {
            ContentType::Post => NotificationKind::PostMilestone,
            ContentType::Comment => NotificationKind::CommentMilestone,
        }
    }

    /// The velocity kind for votes on the given content type.
    pub fn velocity_for(content_type: ContentType) -> Self {
        match content_type {
            ContentType::Post => NotificationKind::PostVelocity,
            ContentType::Comment => NotificationKind::CommentVelocity,
        }
    }
}

// ---------------------------------------------------------------------------
// VoteEvent
// ---------------------------------------------------------------------------

/// One immutable row of the vote activity log.
///
/// Written in the same transaction as the vote itself, read by the baseline
/// calculator and the velocity detector, pruned after the retention window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteEvent {
    pub content_type: ContentType,
    pub content_id: i64,
    pub author_id: i64,
    pub voter_id: i64,
    pub is_upvote: bool,
    pub created_at: DateTime<Utc>,
    /// `created_at` truncated to the hour, for per-bucket aggregation.
    pub hour_bucket: DateTime<Utc>,
}

impl VoteEvent {
    /// Build an event stamped `now`. Self-votes are rejected by the caller;
    /// the constructor only derives the hour bucket.
    pub fn new(
        content_type: ContentType,
        content_id: i64,
        author_id: i64,
        voter_id: i64,
        is_upvote: bool,
    ) -> Self {
        Self::at(
            content_type,
            content_id,
            author_id,
            voter_id,
            is_upvote,
            Utc::now(),
        )
    }

    /// Build an event with an explicit timestamp (test fixtures, backfills).
    pub fn at(
        content_type: ContentType,
        content_id: i64,
        author_id: i64,
        voter_id: i64,
        is_upvote: bool,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            content_type,
            content_id,
            author_id,
            voter_id,
            is_upvote,
            created_at,
            hour_bucket: truncate_to_hour(created_at),
        }
    }

    /// A self-vote never enters the analytics pipeline.
    pub fn is_self_vote(&self) -> bool {
        self.voter_id == self.author_id
    }
}

/// Truncate a timestamp down to the start of its hour.
pub fn truncate_to_hour(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.duration_trunc(TimeDelta::hours(1)).unwrap_or(ts)
}

// ---------------------------------------------------------------------------
// ExperienceLevel
// ---------------------------------------------------------------------------

/// Author tier derived from lifetime authored items; selects the baseline
/// observation window and the velocity rule branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperienceLevel {
    New,
    Regular,
    Power,
}

impl ExperienceLevel {
    pub fn from_totals(total_items: i64) -> Self {
        match total_items {
            ..=50 => ExperienceLevel::New,
            51..=500 => ExperienceLevel::Regular,
            _ => ExperienceLevel::Power,
        }
    }

    /// Baseline observation window in days.
    pub fn window_days(&self) -> i64 {
        match self {
            ExperienceLevel::New => 7,
            ExperienceLevel::Regular => 30,
            ExperienceLevel::Power => 90,
        }
    }
}

// ---------------------------------------------------------------------------
// Baseline
// ---------------------------------------------------------------------------

/// Per-user rolling averages of votes/hour on authored content, plus
/// lifetime counts. Written only by the baseline calculator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub user_id: i64,
    pub avg_post_votes_per_hour: f64,
    pub avg_comment_votes_per_hour: f64,
    pub total_posts: i64,
    pub total_comments: i64,
    pub last_calculated_at: DateTime<Utc>,
}

impl Baseline {
    pub fn total_items(&self) -> i64 {
        self.total_posts + self.total_comments
    }

    pub fn experience_level(&self) -> ExperienceLevel {
        ExperienceLevel::from_totals(self.total_items())
    }

    /// The average rate relevant to the given content type.
    pub fn rate_for(&self, content_type: ContentType) -> f64 {
        match content_type {
            ContentType::Post => self.avg_post_votes_per_hour,
            ContentType::Comment => self.avg_comment_votes_per_hour,
        }
    }
}

// ---------------------------------------------------------------------------
// PendingBatch
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    Processed,
    Cancelled,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Processed => "processed",
            BatchStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(BatchStatus::Pending),
            "processed" => Some(BatchStatus::Processed),
            "cancelled" => Some(BatchStatus::Cancelled),
            _ => None,
        }
    }

    /// Status is monotonic: `pending` is the only non-terminal state.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, BatchStatus::Pending)
    }
}

/// A deferred velocity notification waiting out its cooling window.
///
/// At most one `pending` row may exist per
/// (`user_id`, `content_type`, `content_id`, `notification_type`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingBatch {
    pub id: i64,
    pub user_id: i64,
    pub content_type: ContentType,
    pub content_id: i64,
    pub notification_type: NotificationKind,
    pub votes_per_hour: Option<i64>,
    pub milestone_count: Option<i64>,
    pub scheduled_for: DateTime<Utc>,
    pub status: BatchStatus,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

/// Insert payload for [`PendingBatch`]; the store assigns `id`, `status`
/// and `created_at`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewBatch {
    pub user_id: i64,
    pub content_type: ContentType,
    pub content_id: i64,
    pub notification_type: NotificationKind,
    pub votes_per_hour: Option<i64>,
    pub milestone_count: Option<i64>,
    pub scheduled_for: DateTime<Utc>,
}

impl NewBatch {
    /// A velocity batch scheduled `delay` past `now`.
    pub fn velocity(
        user_id: i64,
        content_type: ContentType,
        content_id: i64,
        votes_per_hour: i64,
        scheduled_for: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id,
            content_type,
            content_id,
            notification_type: NotificationKind::velocity_for(content_type),
            votes_per_hour: Some(votes_per_hour),
            milestone_count: None,
            scheduled_for,
        }
    }
}

// ---------------------------------------------------------------------------
// Notification
// ---------------------------------------------------------------------------

/// A persisted notification row. Mutated only by setting `read = true`;
/// deleted only on user request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: i64,
    pub user_id: i64,
    pub notification_type: NotificationKind,
    pub content_type: Option<ContentType>,
    pub content_id: Option<i64>,
    pub actor_id: Option<i64>,
    pub milestone_count: Option<i64>,
    pub votes_per_hour: Option<i64>,
    pub message: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

/// Insert payload for [`Notification`]; the store assigns `id`, `read`
/// and `created_at`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewNotification {
    pub user_id: i64,
    pub notification_type: NotificationKind,
    pub content_type: Option<ContentType>,
    pub content_id: Option<i64>,
    pub actor_id: Option<i64>,
    pub milestone_count: Option<i64>,
    pub votes_per_hour: Option<i64>,
    pub message: String,
}

impl NewNotification {
    /// A milestone notification for content crossing `milestone` upvotes.
    pub fn milestone(
        user_id: i64,
        content_type: ContentType,
        content_id: i64,
        milestone: i64,
    ) -> Self {
        Self {
            user_id,
            notification_type: NotificationKind::milestone_for(content_type),
            content_type: Some(content_type),
            content_id: Some(content_id),
            actor_id: None,
            milestone_count: Some(milestone),
            votes_per_hour: None,
            message: format!(
                "Your {} reached {} upvotes!",
                content_type.as_str(),
                milestone
            ),
        }
    }

    /// A velocity notification for content trending at `votes_per_hour`.
    pub fn velocity(
        user_id: i64,
        content_type: ContentType,
        content_id: i64,
        votes_per_hour: i64,
    ) -> Self {
        Self {
            user_id,
            notification_type: NotificationKind::velocity_for(content_type),
            content_type: Some(content_type),
            content_id: Some(content_id),
            actor_id: None,
            milestone_count: None,
            votes_per_hour: Some(votes_per_hour),
            message: format!(
                "Your {} is trending: {} votes per hour",
                content_type.as_str(),
                votes_per_hour
            ),
        }
    }

    /// A reply notification for the parent comment's author.
    pub fn reply(parent_author_id: i64, reply_comment_id: i64, reply_author_id: i64) -> Self {
        Self {
            user_id: parent_author_id,
            notification_type: NotificationKind::CommentReply,
            content_type: Some(ContentType::Comment),
            content_id: Some(reply_comment_id),
            actor_id: Some(reply_author_id),
            milestone_count: None,
            votes_per_hour: None,
            message: "Someone replied to your comment".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Preferences
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaGalleryFilter {
    All,
    Mine,
    Theirs,
}

impl MediaGalleryFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaGalleryFilter::All => "all",
            MediaGalleryFilter::Mine => "mine",
            MediaGalleryFilter::Theirs => "theirs",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "all" => Some(MediaGalleryFilter::All),
            "mine" => Some(MediaGalleryFilter::Mine),
            "theirs" => Some(MediaGalleryFilter::Theirs),
            _ => None,
        }
    }
}

/// Per-user settings row, lazily defaulted on first read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preferences {
    pub user_id: i64,
    pub notify_comment_replies: bool,
    pub notify_post_milestone: bool,
    pub notify_post_velocity: bool,
    pub notify_comment_milestone: bool,
    pub notify_comment_velocity: bool,
    pub daily_digest: bool,
    pub notification_sound: bool,
    pub show_read_receipts: bool,
    pub show_typing_indicators: bool,
    pub auto_append_invitation: bool,
    pub theme: String,
    pub media_gallery_filter: MediaGalleryFilter,
}

impl Preferences {
    /// Defaults for a user without a stored settings row.
    pub fn default_for(user_id: i64) -> Self {
        Self {
            user_id,
            notify_comment_replies: true,
            notify_post_milestone: true,
            notify_post_velocity: true,
            notify_comment_milestone: true,
            notify_comment_velocity: true,
            daily_digest: false,
            notification_sound: true,
            show_read_receipts: true,
            show_typing_indicators: true,
            auto_append_invitation: false,
            theme: "default".to_string(),
            media_gallery_filter: MediaGalleryFilter::All,
        }
    }

    /// Whether the owner wants notifications of the given kind.
    pub fn allows(&self, kind: NotificationKind) -> bool {
        match kind {
            NotificationKind::PostMilestone => self.notify_post_milestone,
            NotificationKind::CommentMilestone => self.notify_comment_milestone,
            NotificationKind::PostVelocity => self.notify_post_velocity,
            NotificationKind::CommentVelocity => self.notify_comment_velocity,
            NotificationKind::CommentReply => self.notify_comment_replies,
        }
    }
}

// ---------------------------------------------------------------------------
// PushEnvelope
// ---------------------------------------------------------------------------

/// Wire envelope handed to the push transport for a live session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum PushEnvelope {
    Notification(Notification),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
