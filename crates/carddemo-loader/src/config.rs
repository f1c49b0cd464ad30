//! Configuration management

use std::str::FromStr;
use std::time::Duration;

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::db::DbConfig;
use crate::ingest::decimal::{CodecConfig, DecimalCodec, RoundingMode, SignConvention};
use crate::ingest::loader::{IsolationLevel, RetryPolicy, TransactionOptions};
use crate::ingest::pipeline::{
    PipelineOptions, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_SKIP_REASONS, DEFAULT_WORKERS,
};
use crate::ingest::validation::{
    default_max_amount, DateWindow, ValidationContext, DEFAULT_MAX_EXPIRATION_YEARS,
};

// ============================================================================
// Database Configuration Constants
// ============================================================================

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/carddemo";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;

/// Default minimum database connections in the pool.
pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 2;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default database idle timeout in seconds (10 minutes).
pub const DEFAULT_DATABASE_IDLE_TIMEOUT_SECS: u64 = 600;

// ============================================================================
// Persistence Configuration Constants
// ============================================================================

/// Default per-chunk transaction timeout in seconds.
pub const DEFAULT_TX_TIMEOUT_SECS: u64 = 30;

/// Default attempts per chunk, including the first.
pub const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 5;

/// Default delay before the first retry in milliseconds.
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 100;

/// Default backoff multiplier.
pub const DEFAULT_RETRY_MULTIPLIER: f64 = 2.0;

/// Default upper bound of a single backoff delay in milliseconds.
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 5000;

/// Migration configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub pipeline: PipelineOptions,
    pub persistence: PersistenceConfig,
    pub codec: CodecConfig,
    pub validation: ValidationConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

/// Chunk transaction and retry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    pub transaction_timeout_secs: u64,
    pub isolation: IsolationLevel,
    pub retry_max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_multiplier: f64,
    pub retry_max_delay_ms: u64,
}

/// Business rule limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    pub max_expiration_years: u32,
    pub date_min: NaiveDate,
    pub date_max: NaiveDate,
    pub max_amount: BigDecimal,
}

/// Parse `key` if set, falling back to `default`; an unparsable value is an error
fn env_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid {}='{}': {}", key, value, e)),
        _ => Ok(default),
    }
}

fn env_markers(key: &str, default: Vec<char>) -> Vec<char> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => value.trim().chars().collect(),
        _ => default,
    }
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Config::default();

        let config = Config {
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL")
                    .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
                max_connections: env_or(
                    "DATABASE_MAX_CONNECTIONS",
                    DEFAULT_DATABASE_MAX_CONNECTIONS,
                )?,
                min_connections: env_or(
                    "DATABASE_MIN_CONNECTIONS",
                    DEFAULT_DATABASE_MIN_CONNECTIONS,
                )?,
                connect_timeout_secs: env_or(
                    "DATABASE_CONNECT_TIMEOUT",
                    DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                )?,
                idle_timeout_secs: env_or(
                    "DATABASE_IDLE_TIMEOUT",
                    DEFAULT_DATABASE_IDLE_TIMEOUT_SECS,
                )?,
            },
            pipeline: PipelineOptions {
                chunk_size: env_or("MIGRATE_CHUNK_SIZE", DEFAULT_CHUNK_SIZE)?,
                workers: env_or("MIGRATE_WORKERS", DEFAULT_WORKERS)?,
                max_skip_reasons: env_or("MIGRATE_MAX_SKIP_REASONS", DEFAULT_MAX_SKIP_REASONS)?,
            },
            persistence: PersistenceConfig {
                transaction_timeout_secs: env_or(
                    "MIGRATE_TX_TIMEOUT_SECS",
                    DEFAULT_TX_TIMEOUT_SECS,
                )?,
                isolation: env_or("MIGRATE_ISOLATION", IsolationLevel::default())?,
                retry_max_attempts: env_or(
                    "MIGRATE_RETRY_MAX_ATTEMPTS",
                    DEFAULT_RETRY_MAX_ATTEMPTS,
                )?,
                retry_base_delay_ms: env_or(
                    "MIGRATE_RETRY_BASE_DELAY_MS",
                    DEFAULT_RETRY_BASE_DELAY_MS,
                )?,
                retry_multiplier: env_or("MIGRATE_RETRY_MULTIPLIER", DEFAULT_RETRY_MULTIPLIER)?,
                retry_max_delay_ms: env_or(
                    "MIGRATE_RETRY_MAX_DELAY_MS",
                    DEFAULT_RETRY_MAX_DELAY_MS,
                )?,
            },
            codec: CodecConfig {
                rounding: env_or("MIGRATE_ROUNDING_MODE", RoundingMode::default())?,
                sign: env_or("MIGRATE_SIGN_CONVENTION", SignConvention::default())?,
                positive_markers: env_markers(
                    "MIGRATE_POSITIVE_MARKERS",
                    defaults.codec.positive_markers,
                ),
                negative_markers: env_markers(
                    "MIGRATE_NEGATIVE_MARKERS",
                    defaults.codec.negative_markers,
                ),
                ..defaults.codec
            },
            validation: ValidationConfig {
                max_expiration_years: env_or(
                    "MIGRATE_MAX_EXPIRATION_YEARS",
                    DEFAULT_MAX_EXPIRATION_YEARS,
                )?,
                date_min: env_or("MIGRATE_DATE_MIN", defaults.validation.date_min)?,
                date_max: env_or("MIGRATE_DATE_MAX", defaults.validation.date_max)?,
                max_amount: env_or("MIGRATE_MAX_AMOUNT", defaults.validation.max_amount)?,
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        // Validate database URL
        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        // Validate connection pool settings
        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be greater than 0");
        }

        if self.database.min_connections > self.database.max_connections {
            anyhow::bail!(
                "Database min_connections ({}) cannot be greater than max_connections ({})",
                self.database.min_connections,
                self.database.max_connections
            );
        }

        // Validate pipeline sizing
        if self.pipeline.chunk_size == 0 {
            anyhow::bail!("MIGRATE_CHUNK_SIZE must be greater than 0");
        }

        if self.pipeline.workers == 0 {
            anyhow::bail!("MIGRATE_WORKERS must be greater than 0");
        }

        if self.pipeline.workers as u64 > u64::from(self.database.max_connections) {
            tracing::warn!(
                workers = self.pipeline.workers,
                max_connections = self.database.max_connections,
                "More chunk workers than pooled connections; workers will wait for connections"
            );
        }

        // Validate retry policy
        let p = &self.persistence;
        if p.transaction_timeout_secs == 0 {
            anyhow::bail!("MIGRATE_TX_TIMEOUT_SECS must be greater than 0");
        }

        if p.retry_max_attempts == 0 {
            anyhow::bail!("MIGRATE_RETRY_MAX_ATTEMPTS must be at least 1");
        }

        if !p.retry_multiplier.is_finite() || p.retry_multiplier < 1.0 {
            anyhow::bail!(
                "MIGRATE_RETRY_MULTIPLIER must be a finite number >= 1.0, got {}",
                p.retry_multiplier
            );
        }

        if p.retry_base_delay_ms > p.retry_max_delay_ms {
            anyhow::bail!(
                "Retry base delay ({} ms) cannot exceed max delay ({} ms)",
                p.retry_base_delay_ms,
                p.retry_max_delay_ms
            );
        }

        // Validate codec markers
        let c = &self.codec;
        if c.target_scale < 0 || c.implied_scale < 0 {
            anyhow::bail!("Decimal scales cannot be negative");
        }

        if c.sign == SignConvention::TrailingMarker {
            if c.positive_markers.is_empty() || c.negative_markers.is_empty() {
                anyhow::bail!("Sign markers cannot be empty");
            }

            if let Some(m) = c.positive_markers.iter().find(|m| c.negative_markers.contains(m)) {
                anyhow::bail!("Sign marker '{}' is both positive and negative", m);
            }

            if let Some(m) = c
                .positive_markers
                .iter()
                .chain(&c.negative_markers)
                .find(|m| m.is_ascii_digit() || m.is_whitespace())
            {
                anyhow::bail!("Sign marker '{}' cannot be a digit or whitespace", m);
            }
        }

        // Validate business limits
        let v = &self.validation;
        if v.date_min >= v.date_max {
            anyhow::bail!(
                "MIGRATE_DATE_MIN ({}) must be before MIGRATE_DATE_MAX ({})",
                v.date_min,
                v.date_max
            );
        }

        if v.max_amount <= BigDecimal::from(0) {
            anyhow::bail!("MIGRATE_MAX_AMOUNT must be positive");
        }

        Ok(())
    }

    pub fn db_config(&self) -> DbConfig {
        DbConfig {
            url: self.database.url.clone(),
            max_connections: self.database.max_connections,
            min_connections: self.database.min_connections,
            connect_timeout_secs: self.database.connect_timeout_secs,
            idle_timeout_secs: Some(self.database.idle_timeout_secs),
            max_lifetime_secs: None,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.persistence.retry_max_attempts,
            base_delay: Duration::from_millis(self.persistence.retry_base_delay_ms),
            multiplier: self.persistence.retry_multiplier,
            max_delay: Duration::from_millis(self.persistence.retry_max_delay_ms),
        }
    }

    pub fn transaction_options(&self) -> TransactionOptions {
        TransactionOptions {
            isolation: self.persistence.isolation,
            timeout: Duration::from_secs(self.persistence.transaction_timeout_secs),
        }
    }

    pub fn codec(&self) -> DecimalCodec {
        DecimalCodec::new(self.codec.clone())
    }

    /// Validation rules as of `today`
    pub fn validation_context(&self, today: NaiveDate) -> anyhow::Result<ValidationContext> {
        let v = &self.validation;
        Ok(ValidationContext::new(today, self.codec())?
            .with_dates(DateWindow {
                min: v.date_min,
                max: v.date_max,
            })
            .with_max_expiration_years(v.max_expiration_years)
            .with_max_amount(v.max_amount.clone()))
    }
}

impl Default for Config {
    fn default() -> Self {
        let dates = DateWindow::default();
        Self {
            database: DatabaseConfig {
                url: DEFAULT_DATABASE_URL.to_string(),
                max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
                min_connections: DEFAULT_DATABASE_MIN_CONNECTIONS,
                connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                idle_timeout_secs: DEFAULT_DATABASE_IDLE_TIMEOUT_SECS,
            },
            pipeline: PipelineOptions::default(),
            persistence: PersistenceConfig {
                transaction_timeout_secs: DEFAULT_TX_TIMEOUT_SECS,
                isolation: IsolationLevel::default(),
                retry_max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
                retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
                retry_multiplier: DEFAULT_RETRY_MULTIPLIER,
                retry_max_delay_ms: DEFAULT_RETRY_MAX_DELAY_MS,
            },
            codec: CodecConfig::default(),
            validation: ValidationConfig {
                max_expiration_years: DEFAULT_MAX_EXPIRATION_YEARS,
                date_min: dates.min,
                date_max: dates.max,
                max_amount: default_max_amount(),
            },
        }
    }
}
