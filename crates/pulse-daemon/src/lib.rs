//! The pulse background daemon: baseline sweeps, batch draining, and
//! store maintenance as long-lived loops with graceful shutdown.

pub mod daemon;
pub mod directory;

pub use daemon::{Daemon, DaemonIntervals};
pub use directory::SqliteContentStats;
