//! Configuration management
//!
//! Everything is read from environment variables (a `.env` file is loaded
//! first when present) with typed defaults, then validated once.

use enroll_common::{EtlError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::db::{
    DbConfig, DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_IDLE_TIMEOUT_SECS, DEFAULT_MAX_CONNECTIONS,
    DEFAULT_MIN_CONNECTIONS,
};
use crate::extract::cache::DEFAULT_CACHE_TTL_SECS;
use crate::extract::sheet::{
    FeedbackConfig, DEFAULT_API_BASE, DEFAULT_FEEDBACK_BATCH_SIZE, DEFAULT_FEEDBACK_DELAY_MS,
    DEFAULT_RANGE, DEFAULT_TIMEOUT_SECS,
};
use crate::load::DEFAULT_BATCH_SIZE;
use crate::quality::RowCountRule;
use crate::retry::{
    RetryPolicy, DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY_MS,
};

// ============================================================================
// Pipeline Configuration Constants
// ============================================================================

/// Default allowed difference between expected and actual row counts.
pub const DEFAULT_ROW_TOLERANCE: i64 = 0;

/// Spreadsheet API settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SheetsConfig {
    pub spreadsheet_id: Option<String>,
    pub range: String,
    pub api_base: String,
    pub access_token: Option<String>,
    pub timeout_secs: u64,
    pub feedback_batch_size: usize,
    pub feedback_delay_ms: u64,
}

impl SheetsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn feedback(&self) -> FeedbackConfig {
        FeedbackConfig {
            batch_size: self.feedback_batch_size,
            delay: Duration::from_millis(self.feedback_delay_ms),
        }
    }
}

/// Loader and cache settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub batch_size: usize,
    pub cache_enabled: bool,
    pub cache_ttl_secs: u64,
}

/// Defaults for the row-count check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualitySettings {
    pub expected_rows: Option<i64>,
    pub row_tolerance: i64,
}

impl QualitySettings {
    /// Row-count rule, present only when an expected count is known
    pub fn row_count(&self) -> Option<RowCountRule> {
        self.expected_rows.map(|expected| RowCountRule {
            expected,
            tolerance: self.row_tolerance,
        })
    }
}

#[derive(Debug, Clone)]
pub struct EtlConfig {
    pub database: DbConfig,
    pub retry: RetryPolicy,
    pub sheets: SheetsConfig,
    pub pipeline: PipelineConfig,
    pub quality: QualitySettings,
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|s| s.trim().parse().ok()).unwrap_or(default)
}

fn parse_flag(value: Option<String>, default: bool) -> bool {
    match value.as_deref().map(|s| s.trim().to_ascii_lowercase()) {
        Some(s) if matches!(s.as_str(), "1" | "true" | "yes" | "on") => true,
        Some(s) if matches!(s.as_str(), "0" | "false" | "no" | "off") => false,
        _ => default,
    }
}

impl EtlConfig {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup, then validate
    pub fn from_lookup<F>(get: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let url = get("DATABASE_URL")
            .ok_or_else(|| EtlError::config("DATABASE_URL not set"))?;

        let config = EtlConfig {
            database: DbConfig {
                url,
                max_connections: parse_or(get("DB_MAX_CONNECTIONS"), DEFAULT_MAX_CONNECTIONS),
                min_connections: parse_or(get("DB_MIN_CONNECTIONS"), DEFAULT_MIN_CONNECTIONS),
                connect_timeout_secs: parse_or(
                    get("DB_CONNECT_TIMEOUT"),
                    DEFAULT_CONNECT_TIMEOUT_SECS,
                ),
                idle_timeout_secs: Some(parse_or(
                    get("DB_IDLE_TIMEOUT"),
                    DEFAULT_IDLE_TIMEOUT_SECS,
                )),
            },
            retry: RetryPolicy {
                max_attempts: parse_or(get("RETRY_MAX_ATTEMPTS"), DEFAULT_MAX_ATTEMPTS),
                base_delay: Duration::from_millis(parse_or(
                    get("RETRY_BASE_DELAY_MS"),
                    DEFAULT_BASE_DELAY_MS,
                )),
                max_delay: Duration::from_millis(parse_or(
                    get("RETRY_MAX_DELAY_MS"),
                    DEFAULT_MAX_DELAY_MS,
                )),
            },
            sheets: SheetsConfig {
                spreadsheet_id: get("SHEETS_SPREADSHEET_ID").filter(|s| !s.trim().is_empty()),
                range: get("SHEETS_RANGE").unwrap_or_else(|| DEFAULT_RANGE.to_string()),
                api_base: get("SHEETS_API_BASE").unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
                access_token: get("SHEETS_ACCESS_TOKEN").filter(|s| !s.trim().is_empty()),
                timeout_secs: parse_or(get("SHEETS_TIMEOUT_SECS"), DEFAULT_TIMEOUT_SECS),
                feedback_batch_size: parse_or(
                    get("SHEETS_FEEDBACK_BATCH_SIZE"),
                    DEFAULT_FEEDBACK_BATCH_SIZE,
                ),
                feedback_delay_ms: parse_or(
                    get("SHEETS_FEEDBACK_DELAY_MS"),
                    DEFAULT_FEEDBACK_DELAY_MS,
                ),
            },
            pipeline: PipelineConfig {
                batch_size: parse_or(get("ETL_BATCH_SIZE"), DEFAULT_BATCH_SIZE),
                cache_enabled: parse_flag(get("ETL_CACHE_ENABLED"), false),
                cache_ttl_secs: parse_or(get("ETL_CACHE_TTL_SECS"), DEFAULT_CACHE_TTL_SECS),
            },
            quality: QualitySettings {
                expected_rows: get("QUALITY_EXPECTED_ROWS").and_then(|s| s.trim().parse().ok()),
                row_tolerance: parse_or(get("QUALITY_ROW_TOLERANCE"), DEFAULT_ROW_TOLERANCE),
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.database.url.trim().is_empty() {
            return Err(EtlError::config("Database URL cannot be empty"));
        }

        if self.database.max_connections == 0 {
            return Err(EtlError::config(
                "Database max_connections must be greater than 0",
            ));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(EtlError::config(format!(
                "Database min_connections ({}) cannot be greater than max_connections ({})",
                self.database.min_connections, self.database.max_connections
            )));
        }

        if self.retry.max_attempts == 0 {
            return Err(EtlError::config("RETRY_MAX_ATTEMPTS must be greater than 0"));
        }

        if self.pipeline.batch_size == 0 {
            return Err(EtlError::config("ETL_BATCH_SIZE must be greater than 0"));
        }

        if self.sheets.feedback_batch_size == 0 {
            return Err(EtlError::config(
                "SHEETS_FEEDBACK_BATCH_SIZE must be greater than 0",
            ));
        }

        if self.quality.row_tolerance < 0 {
            return Err(EtlError::config("QUALITY_ROW_TOLERANCE cannot be negative"));
        }

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = EtlConfig::from_lookup(lookup(&[("DATABASE_URL", "postgres://db/enroll")]))
            .unwrap();

        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.database.min_connections, 1);
        assert_eq!(config.database.connect_timeout_secs, 10);
        assert_eq!(config.retry, RetryPolicy::default());
        assert_eq!(config.sheets.range, "Enrollments!A2:G");
        assert_eq!(config.sheets.api_base, "https://sheets.googleapis.com/v4");
        assert_eq!(config.sheets.feedback_batch_size, 50);
        assert_eq!(config.pipeline.batch_size, 500);
        assert!(!config.pipeline.cache_enabled);
        assert_eq!(config.pipeline.cache_ttl_secs, 300);
        assert_eq!(config.quality.row_count(), None);
    }

    #[test]
    fn test_overrides() {
        let config = EtlConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://db/enroll"),
            ("ETL_BATCH_SIZE", "100"),
            ("ETL_CACHE_ENABLED", "TRUE"),
            ("SHEETS_SPREADSHEET_ID", "abc123"),
            ("SHEETS_FEEDBACK_DELAY_MS", "250"),
            ("QUALITY_EXPECTED_ROWS", "120"),
            ("QUALITY_ROW_TOLERANCE", "3"),
            ("RETRY_MAX_ATTEMPTS", "not-a-number"),
        ]))
        .unwrap();

        assert_eq!(config.pipeline.batch_size, 100);
        assert!(config.pipeline.cache_enabled);
        assert_eq!(config.sheets.spreadsheet_id.as_deref(), Some("abc123"));
        assert_eq!(config.sheets.feedback().delay, Duration::from_millis(250));
        assert_eq!(config.retry.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert_eq!(
            config.quality.row_count(),
            Some(RowCountRule {
                expected: 120,
                tolerance: 3
            })
        );
    }

    #[test]
    fn test_missing_database_url() {
        let err = EtlConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        for (key, value) in [
            ("ETL_BATCH_SIZE", "0"),
            ("RETRY_MAX_ATTEMPTS", "0"),
            ("SHEETS_FEEDBACK_BATCH_SIZE", "0"),
            ("DB_MIN_CONNECTIONS", "9"),
            ("QUALITY_ROW_TOLERANCE", "-1"),
        ] {
            let result = EtlConfig::from_lookup(lookup(&[
                ("DATABASE_URL", "postgres://db/enroll"),
                (key, value),
            ]));
            assert!(matches!(result, Err(EtlError::Config(_))), "{key}={value}");
        }

        let result = EtlConfig::from_lookup(lookup(&[("DATABASE_URL", "  ")]));
        assert!(matches!(result, Err(EtlError::Config(_))));
    }

    #[test]
    #[serial]
    fn test_load_reads_process_env() {
        std::env::set_var("DATABASE_URL", "postgresql://localhost/test");
        std::env::set_var("DB_MAX_CONNECTIONS", "15");

        let config = EtlConfig::load().unwrap();
        assert_eq!(config.database.max_connections, 15);
        assert!(config.database.url.contains("localhost/test"));

        std::env::remove_var("DATABASE_URL");
        std::env::remove_var("DB_MAX_CONNECTIONS");
    }
}
