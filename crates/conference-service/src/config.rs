//! Conference coordinator configuration.
//!
//! Configuration is loaded from environment variables. All sensitive
//! fields are redacted in Debug output.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use common::secret::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default HTTP bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default participant disconnect grace period in seconds.
pub const DEFAULT_DISCONNECT_GRACE_PERIOD_SECONDS: u64 = 30;

/// Default interval between reaper sweeps in seconds.
pub const DEFAULT_REAPER_INTERVAL_SECONDS: u64 = 5;

/// Default per-peer event channel capacity.
pub const DEFAULT_PEER_CHANNEL_CAPACITY: usize = 256;

/// Default bcrypt cost for conference passwords.
pub const DEFAULT_PASSWORD_HASH_COST: u32 = 10;

/// Default HTTP request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECONDS: u64 = 30;

/// Minimum decoded length of the reconnect secret.
pub const MIN_RECONNECT_SECRET_BYTES: usize = 32;

/// Conference coordinator configuration.
///
/// Sensitive fields are redacted in Debug output.
#[derive(Clone)]
pub struct Config {
    /// HTTP bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// Redis connection URL. When absent the in-memory repository is used.
    pub redis_url: Option<SecretString>,

    /// Master secret for reconnect binding tokens (base64-encoded).
    pub reconnect_secret: SecretString,

    /// How long a disconnected participant keeps its seat.
    pub disconnect_grace_period_seconds: u64,

    /// How often the reaper looks for expired disconnects.
    pub reaper_interval_seconds: u64,

    /// Bounded capacity of each peer's event channel.
    pub peer_channel_capacity: usize,

    /// bcrypt cost used when hashing conference passwords.
    pub password_hash_cost: u32,

    /// Per-request timeout applied by the HTTP layer.
    pub request_timeout_seconds: u64,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field(
                "redis_url",
                &self.redis_url.as_ref().map(|_| "[REDACTED]"),
            )
            .field("reconnect_secret", &"[REDACTED]")
            .field(
                "disconnect_grace_period_seconds",
                &self.disconnect_grace_period_seconds,
            )
            .field("reaper_interval_seconds", &self.reaper_interval_seconds)
            .field("peer_channel_capacity", &self.peer_channel_capacity)
            .field("password_hash_cost", &self.password_hash_cost)
            .field("request_timeout_seconds", &self.request_timeout_seconds)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a required variable is missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a required variable is missing or invalid.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let reconnect_secret = SecretString::from(
            vars.get("CONF_RECONNECT_SECRET")
                .ok_or_else(|| ConfigError::MissingEnvVar("CONF_RECONNECT_SECRET".to_string()))?
                .clone(),
        );
        decode_secret(&reconnect_secret)?;

        let redis_url = vars
            .get("REDIS_URL")
            .filter(|url| !url.is_empty())
            .map(|url| SecretString::from(url.clone()));

        let bind_address = vars
            .get("CONF_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let disconnect_grace_period_seconds = parse_or(
            vars,
            "CONF_DISCONNECT_GRACE_PERIOD_SECONDS",
            DEFAULT_DISCONNECT_GRACE_PERIOD_SECONDS,
        )?;

        let reaper_interval_seconds = parse_or(
            vars,
            "CONF_REAPER_INTERVAL_SECONDS",
            DEFAULT_REAPER_INTERVAL_SECONDS,
        )?;
        if reaper_interval_seconds == 0 {
            return Err(ConfigError::InvalidValue(
                "CONF_REAPER_INTERVAL_SECONDS must be greater than 0".to_string(),
            ));
        }

        let peer_channel_capacity = parse_or(
            vars,
            "CONF_PEER_CHANNEL_CAPACITY",
            DEFAULT_PEER_CHANNEL_CAPACITY,
        )?;
        if peer_channel_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "CONF_PEER_CHANNEL_CAPACITY must be greater than 0".to_string(),
            ));
        }

        let password_hash_cost =
            parse_or(vars, "CONF_PASSWORD_HASH_COST", DEFAULT_PASSWORD_HASH_COST)?;
        if !(4..=31).contains(&password_hash_cost) {
            return Err(ConfigError::InvalidValue(format!(
                "CONF_PASSWORD_HASH_COST must be between 4 and 31, got {password_hash_cost}"
            )));
        }

        let request_timeout_seconds = parse_or(
            vars,
            "CONF_REQUEST_TIMEOUT_SECONDS",
            DEFAULT_REQUEST_TIMEOUT_SECONDS,
        )?;

        Ok(Config {
            bind_address,
            redis_url,
            reconnect_secret,
            disconnect_grace_period_seconds,
            reaper_interval_seconds,
            peer_channel_capacity,
            password_hash_cost,
            request_timeout_seconds,
        })
    }

    /// Decoded reconnect master secret.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if the secret is not valid base64
    /// or decodes to fewer than 32 bytes.
    pub fn reconnect_secret_bytes(&self) -> Result<Vec<u8>, ConfigError> {
        decode_secret(&self.reconnect_secret)
    }

    #[must_use]
    pub fn disconnect_grace_period(&self) -> Duration {
        Duration::from_secs(self.disconnect_grace_period_seconds)
    }

    #[must_use]
    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_seconds)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

fn parse_or<T: std::str::FromStr>(
    vars: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{key} is not a valid number"))),
    }
}

fn decode_secret(secret: &SecretString) -> Result<Vec<u8>, ConfigError> {
    let bytes = STANDARD.decode(secret.expose_secret()).map_err(|_| {
        ConfigError::InvalidValue("CONF_RECONNECT_SECRET is not valid base64".to_string())
    })?;
    if bytes.len() < MIN_RECONNECT_SECRET_BYTES {
        return Err(ConfigError::InvalidValue(format!(
            "CONF_RECONNECT_SECRET must decode to at least {MIN_RECONNECT_SECRET_BYTES} bytes"
        )));
    }
    Ok(bytes)
}
