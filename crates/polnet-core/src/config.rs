//! polnet Configuration Management
//!
//! Handles configuration from environment variables and TOML config files,
//! with defaults tuned for political newsletter coverage.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::Granularity;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Entity resolution thresholds and weights
    pub resolver: ResolverConfig,

    /// Relationship aggregation
    pub aggregator: AggregatorConfig,

    /// Temporal bucketing
    pub temporal: TemporalConfig,

    /// Graph analytics
    pub analytics: AnalyticsConfig,

    /// Persisted state locations
    pub store: StoreConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path,
            message: e.to_string(),
        })
    }

    /// Merge with environment variables (env takes precedence)
    pub fn with_env_override(mut self) -> Result<Self, ConfigError> {
        self.apply_env()?;
        Ok(self)
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        // Resolver
        if let Some(v) = env_parse("POLNET_MATCH_THRESHOLD")? {
            self.resolver.match_threshold = v;
        }
        if let Some(v) = env_parse("POLNET_AMBIGUITY_EPSILON")? {
            self.resolver.ambiguity_epsilon = v;
        }
        if let Some(v) = env_parse("POLNET_MAX_CANDIDATES")? {
            self.resolver.max_candidates = v;
        }

        // Aggregator
        if let Some(v) = env_parse("POLNET_CONTEXT_CAPACITY")? {
            self.aggregator.context_capacity = v;
        }

        // Temporal
        if let Some(v) = env_parse("POLNET_GRANULARITY")? {
            self.temporal.granularity = v;
        }

        // Analytics
        if let Some(v) = env_parse("POLNET_TREND_THRESHOLD")? {
            self.analytics.trend_threshold = v;
        }
        if let Some(v) = env_parse("POLNET_TREND_WINDOW_DAYS")? {
            self.analytics.trend_window_days = v;
        }
        if let Some(v) = env_parse("POLNET_MIN_TREND_STRENGTH")? {
            self.analytics.min_trend_strength = v;
        }
        if let Some(v) = env_parse("POLNET_COMMUNITY_SEED")? {
            self.analytics.community_seed = v;
        }
        if let Some(v) = env_parse("POLNET_RUN_ANALYTICS")? {
            self.analytics.run_after_batch = v;
        }

        // Store
        if let Ok(dir) = std::env::var("POLNET_STATE_DIR") {
            self.store.state_dir = PathBuf::from(dir);
        }

        // Logging
        if let Ok(level) = std::env::var("POLNET_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(v) = env_parse("POLNET_LOG_JSON")? {
            self.logging.json_format = v;
        }

        Ok(())
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        let r = &self.resolver;
        check_unit("resolver.match_threshold", r.match_threshold)?;
        check_unit("resolver.ambiguity_epsilon", r.ambiguity_epsilon)?;
        check_unit("resolver.surname_only_score", r.surname_only_score)?;
        let weight_sum = r.name_weight + r.category_weight + r.attribute_weight;
        if (weight_sum - 1.0).abs() > 1e-6 {
            return Err(ConfigError::InvalidValue {
                key: "resolver weights".to_string(),
                value: format!("sum {weight_sum}, expected 1.0"),
            });
        }
        if r.max_candidates == 0 {
            return Err(invalid("resolver.max_candidates", 0));
        }

        let a = &self.analytics;
        if !(0.0..1.0).contains(&a.damping) {
            return Err(invalid("analytics.damping", a.damping));
        }
        if a.trend_window_days <= 0 {
            return Err(invalid("analytics.trend_window_days", a.trend_window_days));
        }
        if a.trend_threshold < 0.0 {
            return Err(invalid("analytics.trend_threshold", a.trend_threshold));
        }
        if a.trend_slope_threshold < 0.0 {
            return Err(invalid("analytics.trend_slope_threshold", a.trend_slope_threshold));
        }
        if a.min_trend_strength < 0.0 {
            return Err(invalid("analytics.min_trend_strength", a.min_trend_strength));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().map(Some).map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw,
        }),
        Err(_) => Ok(None),
    }
}

fn check_unit(key: &str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(invalid(key, value))
    }
}

fn invalid(key: &str, value: impl std::fmt::Display) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

/// Entity resolution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Minimum composite score for an automatic merge
    pub match_threshold: f64,

    /// Band below the top score inside which a runner-up counts as a tie
    pub ambiguity_epsilon: f64,

    /// Weight of the name similarity component
    pub name_weight: f64,

    /// Weight of the category compatibility component
    pub category_weight: f64,

    /// Weight of the attribute agreement component
    pub attribute_weight: f64,

    /// Name score when only the surname is available on one side
    pub surname_only_score: f64,

    /// Candidate shortlist cap per mention
    pub max_candidates: usize,

    /// Retries of an optimistic merge after a conflict
    pub max_merge_retries: usize,

    /// Shortlist size from which candidates are scored in parallel
    pub parallel_scoring_min: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            match_threshold: 0.82,
            ambiguity_epsilon: 0.02,
            name_weight: 0.75,
            category_weight: 0.15,
            attribute_weight: 0.10,
            surname_only_score: 0.88,
            max_candidates: 50,
            max_merge_retries: 3,
            parallel_scoring_min: 64,
        }
    }
}

/// Relationship aggregation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Supporting contexts kept per edge
    pub context_capacity: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            context_capacity: 10,
        }
    }
}

/// Temporal index configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TemporalConfig {
    pub granularity: Granularity,
}

/// Graph analytics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    /// PageRank damping factor
    pub damping: f64,

    /// PageRank iteration cap
    pub max_iterations: usize,

    /// PageRank L1 convergence tolerance
    pub tolerance: f64,

    /// Seed for label propagation node ordering
    pub community_seed: u64,

    /// Label propagation sweep cap
    pub lpa_max_iterations: usize,

    /// Relative change beyond which a trend is rising or falling
    pub trend_threshold: f64,

    /// Width of the recent and prior trend windows
    pub trend_window_days: i64,

    /// Fitted slope beyond which a trend report is rising or declining
    pub trend_slope_threshold: f64,

    /// Trend reports weaker than this are dropped
    pub min_trend_strength: f64,

    /// Smallest community that gets a summary
    pub min_community_size: usize,

    /// Run analytics after each ingested batch
    pub run_after_batch: bool,

    /// Reuse the previous result and recompute only touched components
    pub incremental: bool,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            damping: 0.85,
            max_iterations: 100,
            tolerance: 1e-9,
            community_seed: 42,
            lpa_max_iterations: 50,
            trend_threshold: 0.25,
            trend_window_days: 30,
            trend_slope_threshold: 0.1,
            min_trend_strength: 0.5,
            min_community_size: 3,
            run_after_batch: false,
            incremental: true,
        }
    }
}

/// Persisted state configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding the event log and snapshot
    pub state_dir: PathBuf,

    /// Event log file name inside `state_dir`
    pub event_log_file: String,

    /// Snapshot file name inside `state_dir`
    pub snapshot_file: String,

    /// Review queue file name inside `state_dir`
    pub review_file: String,
}

impl StoreConfig {
    pub fn event_log_path(&self) -> PathBuf {
        self.state_dir.join(&self.event_log_file)
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.state_dir.join(&self.snapshot_file)
    }

    pub fn review_path(&self) -> PathBuf {
        self.state_dir.join(&self.review_file)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("./polnet-state"),
            event_log_file: "events.jsonl".to_string(),
            snapshot_file: "snapshot.json".to_string(),
            review_file: "review.json".to_string(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// JSON format for logs
    pub json_format: bool,

    /// Include file/line in logs
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            include_location: false,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}
