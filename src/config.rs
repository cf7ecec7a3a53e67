//! Configuration module
//!
//! Loads configuration from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => Err(()),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Environment (development, production)
    pub environment: String,

    pub log_format: LogFormat,

    /// Load demo members, accounts and loans at startup
    pub seed_demo_data: bool,

    /// Age at which an unconfirmed M-PESA posting is failed
    pub pending_settlement_timeout: Duration,

    /// How often the settlement sweep runs
    pub job_interval: Duration,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());

        let port = parse_var("PORT", "3000")?;

        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let log_format = parse_var("LOG_FORMAT", "pretty")?;

        let seed_demo_data = parse_var("SEED_DEMO_DATA", "true")?;

        let pending_settlement_timeout =
            Duration::from_secs(parse_var("PENDING_SETTLEMENT_TIMEOUT_SECS", "300")?);

        let job_interval_secs: u64 = parse_var("JOB_INTERVAL_SECS", "60")?;
        if job_interval_secs == 0 {
            return Err(ConfigError::InvalidValue("JOB_INTERVAL_SECS"));
        }

        Ok(Self {
            host,
            port,
            environment,
            log_format,
            seed_demo_data,
            pending_settlement_timeout,
            job_interval: Duration::from_secs(job_interval_secs),
        })
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

fn parse_var<T: FromStr>(name: &'static str, default: &str) -> Result<T, ConfigError> {
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|_| ConfigError::InvalidValue(name))
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}
