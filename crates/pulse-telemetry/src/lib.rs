//! Telemetry for pulse: logging bootstrap and lightweight counters.

pub mod logging;
pub mod metrics;
