//! Room Controller configuration.
//!
//! Configuration is loaded from environment variables with sensible
//! defaults; nothing here is secret (room passwords arrive from clients
//! at runtime and only their bcrypt hashes are kept).

use common::types::VideoQuality;
use std::collections::HashMap;
use std::env;
use thiserror::Error;

/// Default HTTP/WebSocket bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default bcrypt cost for room password hashing. Deliberately a slow,
/// salted hash; tests override this down to [`MIN_BCRYPT_COST`].
pub const DEFAULT_BCRYPT_COST: u32 = 10;

/// Cost bounds the bcrypt implementation accepts.
pub const MIN_BCRYPT_COST: u32 = 4;
pub const MAX_BCRYPT_COST: u32 = 31;

/// Default number of slug-collision retries before giving up.
pub const DEFAULT_SLUG_RETRIES: u32 = 8;

/// Room Controller configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP + WebSocket bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// Video quality applied when a join auto-creates a room.
    pub default_video_quality: VideoQuality,

    /// bcrypt cost factor for room passwords.
    pub bcrypt_cost: u32,

    /// How many fresh slugs to try when creating a room before failing.
    pub slug_retries: u32,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration value for {name}: {value}")]
    InvalidValue { name: String, value: String },
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            default_video_quality: VideoQuality::default(),
            bcrypt_cost: DEFAULT_BCRYPT_COST,
            slug_retries: DEFAULT_SLUG_RETRIES,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = vars
            .get("RC_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let default_video_quality = match vars.get("RC_DEFAULT_VIDEO_QUALITY") {
            None => VideoQuality::default(),
            Some(raw) => serde_json::from_value(serde_json::Value::String(raw.clone()))
                .map_err(|_| ConfigError::InvalidValue {
                    name: "RC_DEFAULT_VIDEO_QUALITY".to_string(),
                    value: raw.clone(),
                })?,
        };

        let bcrypt_cost = parse_or_default(vars, "RC_BCRYPT_COST", DEFAULT_BCRYPT_COST)?;
        if !(MIN_BCRYPT_COST..=MAX_BCRYPT_COST).contains(&bcrypt_cost) {
            return Err(ConfigError::InvalidValue {
                name: "RC_BCRYPT_COST".to_string(),
                value: bcrypt_cost.to_string(),
            });
        }

        let slug_retries = parse_or_default(vars, "RC_SLUG_RETRIES", DEFAULT_SLUG_RETRIES)?;

        Ok(Config {
            bind_address,
            default_video_quality,
            bcrypt_cost,
            slug_retries,
        })
    }
}

fn parse_or_default(
    vars: &HashMap<String, String>,
    name: &str,
    default: u32,
) -> Result<u32, ConfigError> {
    match vars.get(name) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
            name: name.to_string(),
            value: raw.clone(),
        }),
    }
}
