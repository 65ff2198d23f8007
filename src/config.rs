//! Configuration Module
//!
//! Handles loading and validating server configuration from environment variables.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::cache::{ExpirationPolicy, StoreOptions, DEFAULT_SWEEP_INTERVAL, MIN_SWEEP_INTERVAL};
use crate::error::{CacheError, Result};

/// Server configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database file holding the cache table
    pub database_path: PathBuf,
    /// Cache table name
    pub table_name: String,
    /// Optional attached-database qualifier for the table
    pub schema_name: Option<String>,
    /// Expiration policy variant (`cache` or `session`)
    pub policy: String,
    /// Interval in seconds between expired-row sweeps
    pub sweep_interval: u64,
    /// Maximum pooled connections
    pub pool_size: u32,
    /// SQLite busy timeout in milliseconds
    pub busy_timeout_ms: u64,
    /// HTTP server port
    pub server_port: u16,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `DATABASE_PATH` - SQLite file (default: sql_cache.db)
    /// - `CACHE_TABLE` - Table name (default: Cache)
    /// - `CACHE_SCHEMA` - Attached database qualifier (default: none)
    /// - `CACHE_POLICY` - `cache` or `session` (default: cache)
    /// - `SWEEP_INTERVAL` - Sweep interval in seconds (default: 1800)
    /// - `POOL_SIZE` - Maximum pooled connections (default: 8)
    /// - `BUSY_TIMEOUT_MS` - SQLite busy timeout (default: 5000)
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            database_path: env::var("DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.database_path),
            table_name: env::var("CACHE_TABLE").unwrap_or(defaults.table_name),
            schema_name: env::var("CACHE_SCHEMA").ok().filter(|s| !s.is_empty()),
            policy: env::var("CACHE_POLICY").unwrap_or(defaults.policy),
            sweep_interval: parse_var("SWEEP_INTERVAL").unwrap_or(defaults.sweep_interval),
            pool_size: parse_var("POOL_SIZE").unwrap_or(defaults.pool_size),
            busy_timeout_ms: parse_var("BUSY_TIMEOUT_MS").unwrap_or(defaults.busy_timeout_ms),
            server_port: parse_var("SERVER_PORT").unwrap_or(defaults.server_port),
        }
    }

    /// Checks values that would otherwise fail later at store construction.
    pub fn validate(&self) -> Result<()> {
        if self.table_name.trim().is_empty() {
            return Err(CacheError::InvalidConfig(
                "CACHE_TABLE must not be empty".to_string(),
            ));
        }
        if self.pool_size == 0 {
            return Err(CacheError::InvalidConfig(
                "POOL_SIZE must be at least 1".to_string(),
            ));
        }
        if Duration::from_secs(self.sweep_interval) < MIN_SWEEP_INTERVAL {
            return Err(CacheError::InvalidConfig(format!(
                "SWEEP_INTERVAL must be at least {} seconds",
                MIN_SWEEP_INTERVAL.as_secs()
            )));
        }
        self.expiration_policy()?;
        Ok(())
    }

    pub fn expiration_policy(&self) -> Result<ExpirationPolicy> {
        self.policy.parse()
    }

    /// Store options derived from this configuration.
    pub fn store_options(&self) -> Result<StoreOptions> {
        Ok(StoreOptions {
            table_name: self.table_name.clone(),
            schema_name: self.schema_name.clone(),
            policy: self.expiration_policy()?,
            sweep_interval: Duration::from_secs(self.sweep_interval),
        })
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("sql_cache.db"),
            table_name: "Cache".to_string(),
            schema_name: None,
            policy: "cache".to_string(),
            sweep_interval: DEFAULT_SWEEP_INTERVAL.as_secs(),
            pool_size: 8,
            busy_timeout_ms: 5000,
            server_port: 3000,
        }
    }
}
