//! Core library for pulse, the notification engine of a social platform
//! backend.
//!
//! This crate provides:
//! - Domain types: vote events, engagement baselines, pending batches,
//!   notifications, and per-user preferences
//! - The SQLite persistence layer: vote activity log, baseline store,
//!   batch queue, notification store, preferences store
//! - Configuration and error taxonomy shared by every other crate
//! - Cooperative shutdown coordination for the background loops

pub mod activity;
pub mod baselines;
pub mod batches;
pub mod config;
pub mod db;
pub mod error;
pub mod notifications;
pub mod settings;
pub mod shutdown;
pub mod types;
