use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration loaded from `~/.pulse/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub baseline: BaselineConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub votes: VotesConfig,
    #[serde(default)]
    pub velocity: VelocityConfig,
    #[serde(default)]
    pub milestone: MilestoneConfig,
    #[serde(default)]
    pub push: PushConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            store: StoreConfig::default(),
            baseline: BaselineConfig::default(),
            batch: BatchConfig::default(),
            votes: VotesConfig::default(),
            velocity: VelocityConfig::default(),
            milestone: MilestoneConfig::default(),
            push: PushConfig::default(),
        }
    }
}

impl Config {
    /// Load config from `~/.pulse/config.toml`, falling back to defaults
    /// when the file does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(path)
        } else {
            Ok(Config::default())
        }
    }

    /// Load from a specific path.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let cfg: Config = toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.baseline.full_sweep_cadence_secs == 0 {
            return Err(ConfigError::Invalid(
                "baseline.full_sweep_cadence_secs must be > 0".to_string(),
            ));
        }
        if self.batch.tick_cadence_secs == 0 {
            return Err(ConfigError::Invalid(
                "batch.tick_cadence_secs must be > 0".to_string(),
            ));
        }
        if self.velocity.window_hours == 0 {
            return Err(ConfigError::Invalid(
                "velocity.window_hours must be > 0".to_string(),
            ));
        }
        if self.milestone.ladder.is_empty() {
            return Err(ConfigError::Invalid(
                "milestone.ladder must not be empty".to_string(),
            ));
        }
        if self.milestone.ladder.windows(2).any(|w| w[0] >= w[1]) {
            return Err(ConfigError::Invalid(
                "milestone.ladder must be strictly ascending".to_string(),
            ));
        }
        Ok(())
    }

    fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".pulse")
            .join("config.toml")
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
    #[error("invalid: {0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// Section structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_json: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

fn default_store_path() -> String {
    "~/.pulse/pulse.db".into()
}

impl StoreConfig {
    /// Expand a leading `~` against the home directory.
    pub fn resolved_path(&self) -> PathBuf {
        if let Some(rest) = self.path.strip_prefix("~/") {
            if let Some(home) = dirs::home_dir() {
                return home.join(rest);
            }
        }
        PathBuf::from(&self.path)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineConfig {
    /// Full sweep loop period.
    #[serde(default = "default_full_sweep_cadence")]
    pub full_sweep_cadence_secs: u64,
    /// Stale-batch size for the fallback sweeper.
    #[serde(default = "default_stale_limit")]
    pub stale_limit: usize,
    /// Age at which a baseline is considered stale.
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            full_sweep_cadence_secs: default_full_sweep_cadence(),
            stale_limit: default_stale_limit(),
            stale_after_secs: default_stale_after(),
        }
    }
}

impl BaselineConfig {
    pub fn full_sweep_cadence(&self) -> Duration {
        Duration::from_secs(self.full_sweep_cadence_secs)
    }
}

fn default_full_sweep_cadence() -> u64 {
    3600
}
fn default_stale_limit() -> usize {
    1000
}
fn default_stale_after() -> u64 {
    86_400
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Scheduler loop period.
    #[serde(default = "default_tick_cadence")]
    pub tick_cadence_secs: u64,
    /// Offset added to now when scheduling a velocity batch.
    #[serde(default = "default_velocity_delay")]
    pub velocity_delay_secs: u64,
    /// Terminal row retention before hard delete.
    #[serde(default = "default_vacuum_age")]
    pub vacuum_age_secs: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            tick_cadence_secs: default_tick_cadence(),
            velocity_delay_secs: default_velocity_delay(),
            vacuum_age_secs: default_vacuum_age(),
        }
    }
}

impl BatchConfig {
    pub fn tick_cadence(&self) -> Duration {
        Duration::from_secs(self.tick_cadence_secs)
    }

    /// Per-tick work budget: cadence minus 10%.
    pub fn tick_budget(&self) -> Duration {
        Duration::from_secs(self.tick_cadence_secs - self.tick_cadence_secs / 10)
    }
}

fn default_tick_cadence() -> u64 {
    900
}
fn default_velocity_delay() -> u64 {
    900
}
fn default_vacuum_age() -> u64 {
    604_800
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VotesConfig {
    /// Vote activity retention before prune.
    #[serde(default = "default_votes_retention")]
    pub retention_secs: u64,
}

impl Default for VotesConfig {
    fn default() -> Self {
        Self {
            retention_secs: default_votes_retention(),
        }
    }
}

fn default_votes_retention() -> u64 {
    604_800
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VelocityConfig {
    #[serde(default = "default_new_user_threshold")]
    pub new_user_threshold_vph: f64,
    #[serde(default = "default_baseline_multiplier")]
    pub baseline_multiplier: f64,
    #[serde(default = "default_exponential_multiplier")]
    pub exponential_multiplier: f64,
    /// Trailing observation window for the current vote rate.
    #[serde(default = "default_window_hours")]
    pub window_hours: u32,
}

impl Default for VelocityConfig {
    fn default() -> Self {
        Self {
            new_user_threshold_vph: default_new_user_threshold(),
            baseline_multiplier: default_baseline_multiplier(),
            exponential_multiplier: default_exponential_multiplier(),
            window_hours: default_window_hours(),
        }
    }
}

fn default_new_user_threshold() -> f64 {
    5.0
}
fn default_baseline_multiplier() -> f64 {
    1.5
}
fn default_exponential_multiplier() -> f64 {
    2.0
}
fn default_window_hours() -> u32 {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MilestoneConfig {
    #[serde(default = "default_ladder")]
    pub ladder: Vec<i64>,
}

impl Default for MilestoneConfig {
    fn default() -> Self {
        Self {
            ladder: default_ladder(),
        }
    }
}

fn default_ladder() -> Vec<i64> {
    vec![10, 50, 100, 500, 1000, 5000, 10000]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushConfig {
    /// Per-session send buffer capacity, in payloads.
    #[serde(default = "default_session_buffer")]
    pub session_buffer: usize,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            session_buffer: default_session_buffer(),
        }
    }
}

fn default_session_buffer() -> usize {
    64
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = Config::default();
        assert_eq!(cfg.baseline.full_sweep_cadence_secs, 3600);
        assert_eq!(cfg.baseline.stale_limit, 1000);
        assert_eq!(cfg.batch.tick_cadence_secs, 900);
        assert_eq!(cfg.batch.velocity_delay_secs, 900);
        assert_eq!(cfg.batch.vacuum_age_secs, 604_800);
        assert_eq!(cfg.votes.retention_secs, 604_800);
        assert_eq!(cfg.velocity.new_user_threshold_vph, 5.0);
        assert_eq!(cfg.velocity.baseline_multiplier, 1.5);
        assert_eq!(cfg.velocity.exponential_multiplier, 2.0);
        assert_eq!(cfg.velocity.window_hours, 3);
        assert_eq!(cfg.milestone.ladder, vec![10, 50, 100, 500, 1000, 5000, 10000]);
        assert_eq!(cfg.push.session_buffer, 64);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            [batch]
            tick_cadence_secs = 60

            [velocity]
            baseline_multiplier = 2.5
            "#,
        )
        .unwrap();
        assert_eq!(cfg.batch.tick_cadence_secs, 60);
        assert_eq!(cfg.batch.velocity_delay_secs, 900);
        assert_eq!(cfg.velocity.baseline_multiplier, 2.5);
        assert_eq!(cfg.velocity.new_user_threshold_vph, 5.0);
    }

    #[test]
    fn zero_cadence_is_rejected() {
        let mut cfg = Config::default();
        cfg.batch.tick_cadence_secs = 0;
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn unsorted_ladder_is_rejected() {
        let mut cfg = Config::default();
        cfg.milestone.ladder = vec![10, 10, 50];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn tick_budget_is_cadence_minus_ten_percent() {
        let cfg = BatchConfig::default();
        assert_eq!(cfg.tick_budget(), Duration::from_secs(810));
    }

    #[test]
    fn round_trips_through_toml() {
        let cfg = Config::default();
        let text = cfg.to_toml().unwrap();
        let back: Config = toml::from_str(&text).unwrap();
        assert_eq!(back.milestone.ladder, cfg.milestone.ladder);
        assert_eq!(back.push.session_buffer, cfg.push.session_buffer);
    }

    #[test]
    fn load_from_missing_file_is_io_error() {
        let err = Config::load_from("/nonexistent/pulse.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
