//! Process configuration, loaded from environment variables (see spec §6).

use clap::Parser;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid REDIS_URL: {0}")]
    RedisUrl(redis::RedisError),
}

/// Typed, validated configuration for the service.
///
/// `clap`'s `env` feature reads the same environment variables a plain
/// `std::env::var` lookup would, but rejects unparseable values with a
/// readable message instead of silently falling back to the default.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Online read-receipt index service")]
pub struct Config {
    /// Redis (or Redis-compatible stream) connection URL.
    #[arg(long, env = "REDIS_URL", default_value = "redis://localhost:6379/0")]
    pub redis_url: String,

    /// HTTP listen port.
    #[arg(long, env = "PORT", default_value_t = 8066)]
    pub port: u16,

    /// Retention window, in sequence units.
    #[arg(long, env = "WINDOW_SIZE", default_value_t = 1000)]
    pub window_size: i64,
}

impl Config {
    /// Parse `Config` from the process environment and validate it.
    ///
    /// A fatal startup failure (here, an unparseable `REDIS_URL`) is
    /// reported before any task is spawned, matching spec §6's "Exit"
    /// contract.
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::parse();
        redis::Client::open(config.redis_url.as_str()).map_err(ConfigError::RedisUrl)?;
        Ok(config)
    }
}
