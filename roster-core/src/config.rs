//! Engine configuration.
//!
//! Unlike a user-facing CLI, this service is a single operator-configured
//! daemon: there is no per-user TOML file, so configuration is read
//! entirely from the process environment (see spec §6).

use std::env::VarError;
use std::time::Duration;

use thiserror::Error;

const DEFAULT_SERVICE_INTERVAL_SECS: u64 = 30;
const DEFAULT_UPDATES_LOOKBACK_HOURS: i64 = 24;
const DEFAULT_WELCOME_MESSAGE: &str = "Добрый день, я бот-консьерж. Я не читаю ваши сообщения и проверяю только наличие пользователей. Спишите мне пару слов";
const DEFAULT_REMOVED_MESSAGE: &str = "Пользователь был удалён из чата (ботом)";

/// Errors raised while assembling [`Config`] from the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// `DATABASE_URL` was not set.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// A variable was set but not valid UTF-8.
    #[error("environment variable {0} is not valid unicode")]
    NotUnicode(&'static str),

    /// A numeric variable failed to parse.
    #[error("environment variable {name} has invalid value {value:?}: {source}")]
    InvalidNumber {
        name: &'static str,
        value: String,
        #[source]
        source: std::num::ParseIntError,
    },
}

/// Runtime configuration for the reconciliation engine.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Postgres connection string for the [`crate::store::PgStore`].
    pub database_url: String,
    /// Time between reconciliation cycles.
    pub service_interval: Duration,
    /// How far back the update-stream drain looks for messages, per
    /// spec §4.5 step 7.
    pub updates_lookback_hours: i64,
    /// Sent once on first-time chat creation (spec §4.5).
    pub welcome_message: String,
    /// Sent when enforcement kicks a member (spec §8 scenario 4).
    pub removed_message: String,
    /// Number of owner/bot passes the engine may run concurrently.
    /// Defaults to 1 (sequential), the baseline in spec §5.
    pub concurrency: usize,
    /// Directory for rolling log files. `None` means stdout-only.
    pub log_dir: Option<String>,
    /// `"daily"` | `"hourly"` | `"never"`, only consulted when `log_dir`
    /// is set.
    pub log_rotation: String,
}

impl Config {
    /// Build configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] if `DATABASE_URL` is unset, or
    /// [`ConfigError::InvalidNumber`] if a numeric override fails to
    /// parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = require_env("DATABASE_URL")?;
        let service_interval_secs =
            optional_env_u64("SERVICE_INTERVAL", DEFAULT_SERVICE_INTERVAL_SECS)?;
        let updates_lookback_hours =
            optional_env_i64("UPDATES_LOOKBACK_HOURS", DEFAULT_UPDATES_LOOKBACK_HOURS)?;
        let concurrency = optional_env_u64("ROSTER_CONCURRENCY", 1)? as usize;
        let welcome_message = std::env::var("ROSTER_WELCOME_MESSAGE")
            .unwrap_or_else(|_| DEFAULT_WELCOME_MESSAGE.to_string());
        let removed_message = std::env::var("ROSTER_REMOVED_MESSAGE")
            .unwrap_or_else(|_| DEFAULT_REMOVED_MESSAGE.to_string());
        let log_dir = std::env::var("ROSTER_LOG_DIR").ok();
        let log_rotation =
            std::env::var("ROSTER_LOG_ROTATION").unwrap_or_else(|_| "daily".to_string());

        Ok(Self {
            database_url,
            service_interval: Duration::from_secs(service_interval_secs),
            updates_lookback_hours,
            welcome_message,
            removed_message,
            concurrency: concurrency.max(1),
            log_dir,
            log_rotation,
        })
    }
}

fn require_env(name: &'static str) -> Result<String, ConfigError> {
    match std::env::var(name) {
        Ok(value) => Ok(value),
        Err(VarError::NotPresent) => Err(ConfigError::Missing(name)),
        Err(VarError::NotUnicode(_)) => Err(ConfigError::NotUnicode(name)),
    }
}

fn optional_env_u64(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value
            .parse::<u64>()
            .map_err(|source| ConfigError::InvalidNumber { name, value, source }),
        Err(_) => Ok(default),
    }
}

fn optional_env_i64(name: &'static str, default: i64) -> Result<i64, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value
            .parse::<i64>()
            .map_err(|source| ConfigError::InvalidNumber { name, value, source }),
        Err(_) => Ok(default),
    }
}
