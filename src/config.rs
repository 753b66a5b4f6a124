// ABOUTME: Configuration loading and validation for the kiana process.
// ABOUTME: Reads KIANA_* environment variables; the database path itself is fixed.

use std::path::{Path, PathBuf};

use kiana_labels::DEFAULT_MAX_LABEL_LENGTH;
use thiserror::Error;

/// Database location, relative to the process working directory.
pub const DB_PATH: &str = "data/kiana.sqlite3";

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} must be a positive integer, got {value:?}")]
    NotPositive { var: &'static str, value: String },

    #[error("KIANA_SERIES_TABLE must be a plain SQL identifier, got {0:?}")]
    InvalidSeriesTable(String),
}

/// Process configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KianaConfig {
    pub max_label_length: usize,
    pub series_table: String,
    pub series_max_retained: usize,
    pub sample_interval_secs: u64,
    pub legacy_labels_json: Option<PathBuf>,
}

impl Default for KianaConfig {
    fn default() -> Self {
        Self {
            max_label_length: DEFAULT_MAX_LABEL_LENGTH,
            series_table: "gold_price".to_string(),
            series_max_retained: 288,
            sample_interval_secs: 300,
            legacy_labels_json: None,
        }
    }
}

impl KianaConfig {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// Environment variables:
    /// - KIANA_MAX_LABEL_LENGTH: longest accepted label, in characters (default: 15)
    /// - KIANA_SERIES_TABLE: table holding the sampled series (default: gold_price)
    /// - KIANA_SERIES_MAX_RETAINED: samples kept before eviction (default: 288)
    /// - KIANA_SAMPLE_INTERVAL_SECS: seconds between samples (default: 300)
    /// - KIANA_LEGACY_LABELS_JSON: legacy nickname file to import at startup (optional)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable lookup.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let set = |name: &str| var(name).filter(|v| !v.trim().is_empty());

        let max_label_length = positive(
            "KIANA_MAX_LABEL_LENGTH",
            set("KIANA_MAX_LABEL_LENGTH"),
            defaults.max_label_length as u64,
        )? as usize;

        let series_table = set("KIANA_SERIES_TABLE").unwrap_or(defaults.series_table);
        if !kiana_series::retention::is_valid_table_name(&series_table) {
            return Err(ConfigError::InvalidSeriesTable(series_table));
        }

        let series_max_retained = positive(
            "KIANA_SERIES_MAX_RETAINED",
            set("KIANA_SERIES_MAX_RETAINED"),
            defaults.series_max_retained as u64,
        )? as usize;

        let sample_interval_secs = positive(
            "KIANA_SAMPLE_INTERVAL_SECS",
            set("KIANA_SAMPLE_INTERVAL_SECS"),
            defaults.sample_interval_secs,
        )?;

        let legacy_labels_json = set("KIANA_LEGACY_LABELS_JSON").map(PathBuf::from);

        Ok(Self {
            max_label_length,
            series_table,
            series_max_retained,
            sample_interval_secs,
            legacy_labels_json,
        })
    }

    /// The fixed database path, resolved against `root`.
    pub fn db_path(root: &Path) -> PathBuf {
        root.join(DB_PATH)
    }
}

fn positive(var: &'static str, raw: Option<String>, default: u64) -> Result<u64, ConfigError> {
    let Some(raw) = raw else {
        return Ok(default);
    };
    match raw.trim().parse::<u64>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ConfigError::NotPositive { var, value: raw }),
    }
}
