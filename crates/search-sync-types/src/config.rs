//! Configuration loading for the sync engine.
//!
//! Layered config: defaults -> config file -> env vars -> CLI flags.
//! Only the two connection strings are required; everything else has a
//! working default.

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Default config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "search-sync";

/// Environment variable prefix (`SEARCH_SYNC_DATABASE_URL`, ...).
pub const ENV_PREFIX: &str = "SEARCH_SYNC";

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Postgres connection string
    #[serde(default)]
    pub database_url: String,

    /// Document store base URL, e.g. `http://localhost:9200`
    #[serde(default)]
    pub elasticsearch_url: String,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Max pooled database connections. Must cover one cursor per entity
    /// kind during catchup plus enrichment and listener lookups.
    #[serde(default = "default_db_pool_size")]
    pub db_pool_size: usize,

    /// Interval between pending-update drains
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Bulk write attempts per chunk before failing
    #[serde(default = "default_bulk_max_attempts")]
    pub bulk_max_attempts: u32,

    /// Linear backoff step between bulk attempts
    #[serde(default = "default_bulk_backoff_base_ms")]
    pub bulk_backoff_base_ms: u64,

    /// Health polls before red indices are deleted
    #[serde(default = "default_red_index_max_polls")]
    pub red_index_max_polls: u32,

    /// Interval between red index health polls
    #[serde(default = "default_red_index_poll_interval_ms")]
    pub red_index_poll_interval_ms: u64,

    /// Cluster health wait timeout
    #[serde(default = "default_health_timeout_secs")]
    pub health_timeout_secs: u64,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_db_pool_size() -> usize {
    20
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_bulk_max_attempts() -> u32 {
    10
}

fn default_bulk_backoff_base_ms() -> u64 {
    5000
}

fn default_red_index_max_polls() -> u32 {
    10
}

fn default_red_index_poll_interval_ms() -> u64 {
    10_000
}

fn default_health_timeout_secs() -> u64 {
    60
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            elasticsearch_url: String::new(),
            log_level: default_log_level(),
            db_pool_size: default_db_pool_size(),
            poll_interval_ms: default_poll_interval_ms(),
            bulk_max_attempts: default_bulk_max_attempts(),
            bulk_backoff_base_ms: default_bulk_backoff_base_ms(),
            red_index_max_polls: default_red_index_max_polls(),
            red_index_poll_interval_ms: default_red_index_poll_interval_ms(),
            health_timeout_secs: default_health_timeout_secs(),
        }
    }
}

impl Settings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Config file (`./search-sync.toml`, optional)
    /// 3. CLI-specified config file (optional)
    /// 4. Environment variables (SEARCH_SYNC_*)
    ///
    /// CLI flags should be applied by the caller after this returns.
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, SyncError> {
        let mut builder = Config::builder()
            .set_default("log_level", default_log_level())
            .map_err(|e| SyncError::Config(e.to_string()))?
            .set_default("db_pool_size", default_db_pool_size() as i64)
            .map_err(|e| SyncError::Config(e.to_string()))?
            .set_default("poll_interval_ms", default_poll_interval_ms() as i64)
            .map_err(|e| SyncError::Config(e.to_string()))?
            .add_source(File::with_name(DEFAULT_CONFIG_FILE).required(false));

        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // SEARCH_SYNC_DATABASE_URL -> database_url; `__` nests.
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| SyncError::Config(e.to_string()))?;

        config
            .try_deserialize()
            .map_err(|e| SyncError::Config(e.to_string()))
    }

    /// Reject settings the engine cannot start with.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.database_url.trim().is_empty() {
            return Err(SyncError::Config("database_url is not set".to_string()));
        }
        if self.elasticsearch_url.trim().is_empty() {
            return Err(SyncError::Config(
                "elasticsearch_url is not set".to_string(),
            ));
        }
        if self.db_pool_size == 0 {
            return Err(SyncError::Config("db_pool_size must be > 0".to_string()));
        }
        if self.bulk_max_attempts == 0 {
            return Err(SyncError::Config(
                "bulk_max_attempts must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.log_level, "info");
        assert_eq!(settings.db_pool_size, 20);
        assert_eq!(settings.poll_interval_ms, 500);
        assert_eq!(settings.bulk_max_attempts, 10);
        assert_eq!(settings.bulk_backoff_base_ms, 5000);
    }

    #[test]
    fn test_validate_requires_connection_strings() {
        let mut settings = Settings::default();
        let err = settings.validate().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Configuration error: database_url is not set"
        );

        settings.database_url = "postgres://localhost/discovery".to_string();
        assert!(settings.validate().is_err());

        settings.elasticsearch_url = "http://localhost:9200".to_string();
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let settings = Settings {
            database_url: "postgres://localhost/discovery".to_string(),
            elasticsearch_url: "http://localhost:9200".to_string(),
            bulk_max_attempts: 0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_load_from_config_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "database_url = \"postgres://db/discovery\"\n\
             elasticsearch_url = \"http://es:9200\"\n\
             poll_interval_ms = 250"
        )
        .unwrap();

        let settings = Settings::load(Some(file.path().to_str().unwrap())).unwrap();
        assert_eq!(settings.database_url, "postgres://db/discovery");
        assert_eq!(settings.elasticsearch_url, "http://es:9200");
        assert_eq!(settings.poll_interval_ms, 250);
        assert_eq!(settings.bulk_max_attempts, 10);
    }

    #[test]
    fn test_missing_cli_config_file_is_an_error() {
        assert!(Settings::load(Some("/nonexistent/search-sync.toml")).is_err());
    }
}
