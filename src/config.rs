//! Configuration module
//!
//! Loads configuration from environment variables.

use std::env;
use std::time::Duration;

use crate::jobs::ProcessorConfig;

/// Application configuration
#[derive(Clone)]
pub struct Config {
    /// Database connection URL
    pub database_url: String,

    /// Maximum database connections in pool
    pub database_max_connections: u32,

    /// Environment (development, production)
    pub environment: String,

    /// Symmetric key for session tokens, exactly 32 bytes
    pub token_symmetric_key: String,

    /// Lifetime of access tokens issued by the API layer
    pub access_token_duration_secs: i64,

    /// Number of task worker loops
    pub worker_concurrency: usize,

    /// Idle delay between polls when no task is ready
    pub task_poll_interval_ms: u64,

    /// Visibility lease on claimed tasks
    pub task_lease_secs: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL").ok_or(ConfigError::MissingEnv("DATABASE_URL"))?;

        let database_max_connections = parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", 10)?;

        let environment = lookup("ENVIRONMENT").unwrap_or_else(|| "development".to_string());

        let token_symmetric_key =
            lookup("TOKEN_SYMMETRIC_KEY").ok_or(ConfigError::MissingEnv("TOKEN_SYMMETRIC_KEY"))?;

        let access_token_duration_secs = parse_or(&lookup, "ACCESS_TOKEN_DURATION_SECS", 900)?;
        if access_token_duration_secs <= 0 {
            return Err(ConfigError::InvalidValue("ACCESS_TOKEN_DURATION_SECS"));
        }

        let worker_concurrency = parse_or(&lookup, "WORKER_CONCURRENCY", 10)?;
        if worker_concurrency == 0 {
            return Err(ConfigError::InvalidValue("WORKER_CONCURRENCY"));
        }

        let task_poll_interval_ms = parse_or(&lookup, "TASK_POLL_INTERVAL_MS", 500)?;
        let task_lease_secs = parse_or(&lookup, "TASK_LEASE_SECS", 300)?;

        Ok(Self {
            database_url,
            database_max_connections,
            environment,
            token_symmetric_key,
            access_token_duration_secs,
            worker_concurrency,
            task_poll_interval_ms,
            task_lease_secs,
        })
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn access_token_duration(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.access_token_duration_secs)
    }

    /// Processor settings derived from the task variables
    pub fn processor_config(&self) -> ProcessorConfig {
        ProcessorConfig {
            concurrency: self.worker_concurrency,
            poll_interval: Duration::from_millis(self.task_poll_interval_ms),
            lease: Duration::from_secs(self.task_lease_secs),
            ..ProcessorConfig::default()
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("database_max_connections", &self.database_max_connections)
            .field("environment", &self.environment)
            .field("access_token_duration_secs", &self.access_token_duration_secs)
            .field("worker_concurrency", &self.worker_concurrency)
            .field("task_poll_interval_ms", &self.task_poll_interval_ms)
            .field("task_lease_secs", &self.task_lease_secs)
            .finish_non_exhaustive()
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue(key)),
        None => Ok(default),
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    const REQUIRED: [(&str, &str); 2] = [
        ("DATABASE_URL", "postgres://localhost/ledger"),
        ("TOKEN_SYMMETRIC_KEY", "0123456789abcdef0123456789abcdef"),
    ];

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&REQUIRED)).unwrap();

        assert_eq!(config.database_max_connections, 10);
        assert_eq!(config.environment, "development");
        assert!(!config.is_production());
        assert_eq!(config.access_token_duration(), chrono::Duration::minutes(15));
        assert_eq!(config.worker_concurrency, 10);

        let processor = config.processor_config();
        assert_eq!(processor.poll_interval, Duration::from_millis(500));
        assert_eq!(processor.lease, Duration::from_secs(300));
    }

    #[test]
    fn test_overrides() {
        let mut vars = REQUIRED.to_vec();
        vars.extend([
            ("ENVIRONMENT", "production"),
            ("WORKER_CONCURRENCY", "4"),
            ("TASK_LEASE_SECS", "60"),
        ]);
        let config = Config::from_lookup(lookup(&vars)).unwrap();

        assert!(config.is_production());
        assert_eq!(config.processor_config().concurrency, 4);
        assert_eq!(config.processor_config().lease, Duration::from_secs(60));
    }

    #[test]
    fn test_missing_required() {
        let result = Config::from_lookup(lookup(&[("DATABASE_URL", "postgres://localhost/ledger")]));
        assert!(matches!(result, Err(ConfigError::MissingEnv("TOKEN_SYMMETRIC_KEY"))));

        let result = Config::from_lookup(lookup(&[]));
        assert!(matches!(result, Err(ConfigError::MissingEnv("DATABASE_URL"))));
    }

    #[test]
    fn test_invalid_values() {
        for (key, value) in [
            ("DATABASE_MAX_CONNECTIONS", "many"),
            ("WORKER_CONCURRENCY", "0"),
            ("ACCESS_TOKEN_DURATION_SECS", "-5"),
        ] {
            let mut vars = REQUIRED.to_vec();
            vars.push((key, value));
            let result = Config::from_lookup(lookup(&vars));
            assert!(matches!(result, Err(ConfigError::InvalidValue(k)) if k == key), "{key}");
        }
    }

    #[test]
    fn test_debug_hides_secrets() {
        let config = Config::from_lookup(lookup(&REQUIRED)).unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("0123456789abcdef"));
        assert!(!debug.contains("postgres://"));
    }
}
