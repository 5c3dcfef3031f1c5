//! Application configuration

use std::env;
use std::time::Duration;

use huddle_realtime::{config as realtime, RealtimeConfig};

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub bind_address: String,

    // Database (messages fall back to an in-process store without it)
    pub database_url: Option<String>,
    pub database_max_connections: u32,

    // Redis (ephemeral state falls back to process memory without it)
    pub redis_url: Option<String>,

    // Authentication (bootstrap tokens are only checked when set)
    pub jwt_secret: Option<String>,

    // Managed WebSocket gateway (sockets are served locally without it)
    pub gateway_endpoint: Option<String>,
    pub gateway_api_token: Option<String>,
    pub gateway_timeout: Duration,

    // Realtime timeouts
    pub connection_ttl: Duration,
    pub presence_ttl: Duration,
    pub typing_ttl: Duration,
    pub store_purge_interval: Duration,

    // Logging
    pub json_logs: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            // Server
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),

            // Database
            database_url: non_empty("DATABASE_URL"),
            database_max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .unwrap_or(20),

            // Redis
            redis_url: non_empty("REDIS_URL"),

            // Authentication
            jwt_secret: match non_empty("JWT_SECRET") {
                Some(secret) if secret.len() < 32 => {
                    return Err(ConfigError::WeakSecret(
                        "JWT_SECRET must be at least 32 characters",
                    ));
                }
                secret => secret,
            },

            // Gateway
            gateway_endpoint: non_empty("GATEWAY_ENDPOINT"),
            gateway_api_token: non_empty("GATEWAY_API_TOKEN"),
            gateway_timeout: seconds("GATEWAY_TIMEOUT_SECS", realtime::DEFAULT_GATEWAY_TIMEOUT)?,

            // Realtime
            connection_ttl: seconds("CONNECTION_TTL_SECS", realtime::DEFAULT_CONNECTION_TTL)?,
            presence_ttl: seconds("PRESENCE_TTL_SECS", realtime::DEFAULT_PRESENCE_TTL)?,
            typing_ttl: seconds("TYPING_TTL_SECS", realtime::DEFAULT_TYPING_TTL)?,
            store_purge_interval: seconds("STORE_PURGE_INTERVAL_SECS", Duration::from_secs(60))?,

            // Logging
            json_logs: env::var("LOG_FORMAT")
                .map(|format| format.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
        })
    }

    pub fn realtime(&self) -> RealtimeConfig {
        RealtimeConfig {
            connection_ttl: self.connection_ttl,
            presence_ttl: self.presence_ttl,
            typing_ttl: self.typing_ttl,
        }
    }
}

fn non_empty(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

/// A positive number of seconds, or `default` when unset
fn seconds(name: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    match env::var(name) {
        Ok(raw) => match raw.trim().parse::<u64>() {
            Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
            _ => Err(ConfigError::Invalid(name)),
        },
        Err(_) => Ok(default),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),
    #[error("Weak secret: {0}")]
    WeakSecret(&'static str),
}
