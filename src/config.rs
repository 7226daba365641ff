//! Process configuration, read from the environment (and `.env` when present).

use std::net::SocketAddr;
use std::time::Duration;

use axum::http::HeaderValue;
use thiserror::Error;

/// Rooms with no activity for this long are purged.
pub const DEFAULT_ROOM_INACTIVITY: Duration = Duration::from_secs(7 * 24 * 60 * 60);
pub const DEFAULT_MAILBOX_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: SocketAddr,
    pub cors_allow_origin: Option<HeaderValue>,
    pub session: SessionConfig,
}

/// Settings handed to every room session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub inactivity: Duration,
    pub mailbox_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            inactivity: DEFAULT_ROOM_INACTIVITY,
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite://roomchat.db?mode=rwc".to_string(),
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            cors_allow_origin: None,
            session: SessionConfig::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| dotenv::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(url) = lookup("DATABASE_URL") {
            config.database_url = url;
        }
        if let Some(addr) = lookup("BIND_ADDR") {
            config.bind_addr = parse("BIND_ADDR", addr)?;
        }
        if let Some(origin) = lookup("CORS_ALLOW_ORIGIN") {
            config.cors_allow_origin = Some(
                HeaderValue::from_str(&origin).map_err(|_| ConfigError::Invalid {
                    key: "CORS_ALLOW_ORIGIN",
                    value: origin.clone(),
                })?,
            );
        }
        if let Some(secs) = lookup("ROOM_INACTIVITY_SECS") {
            config.session.inactivity =
                Duration::from_secs(parse("ROOM_INACTIVITY_SECS", secs)?);
        }
        if let Some(capacity) = lookup("ROOM_MAILBOX_CAPACITY") {
            let capacity: usize = parse("ROOM_MAILBOX_CAPACITY", capacity)?;
            if capacity == 0 {
                return Err(ConfigError::Invalid {
                    key: "ROOM_MAILBOX_CAPACITY",
                    value: "0".to_string(),
                });
            }
            config.session.mailbox_capacity = capacity;
        }

        Ok(config)
    }
}

fn parse<T: std::str::FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid { key, value })
}
