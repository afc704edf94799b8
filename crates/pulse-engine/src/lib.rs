//! The pulse notification engine.
//!
//! Turns vote events on user content into delivered notifications:
//! - [`baseline`]: per-user engagement baselines over adaptive windows
//! - [`velocity`]: the rule policy deciding when an author gets nudged
//! - [`milestone`]: one-shot score-threshold notifications
//! - [`scheduler`]: drains the cooling-window batch queue
//! - [`pipeline`]: durable insert plus best-effort live push
//! - [`ingress`]: the orchestrator the vote/reply handlers call into

pub mod baseline;
pub mod ingress;
pub mod milestone;
pub mod pipeline;
pub mod scheduler;
pub mod traits;
pub mod velocity;

pub use ingress::{NotificationEngine, VoteRecord};
pub use pipeline::{EmitOutcome, NotificationPipeline};
pub use traits::{BaselineReader, ContentStats, NoopPushSink, PushSink};
pub use velocity::{RuleVelocityPolicy, VelocityPolicy};
