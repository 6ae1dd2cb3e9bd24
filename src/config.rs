//! Configuration Module
//!
//! Handles loading cache configuration from environment variables.

use std::env;
use std::time::Duration;

/// Cache configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Maximum number of entries the cache can hold, None = unbounded
    pub max_size: Option<usize>,
    /// Extra delay in milliseconds added to every expiration wake-up
    pub expiration_slack_ms: u64,
}

impl CacheConfig {
    /// Creates a new CacheConfig by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_MAX_SIZE` - Maximum cache entries (default: unbounded, `0` also means unbounded)
    /// - `CACHE_EXPIRATION_SLACK_MS` - Expiration scheduling slack (default: 0)
    pub fn from_env() -> Self {
        Self {
            max_size: env::var("CACHE_MAX_SIZE")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .filter(|&size| size > 0),
            expiration_slack_ms: env::var("CACHE_EXPIRATION_SLACK_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
        }
    }

    /// Returns the expiration slack as a Duration.
    pub fn expiration_slack(&self) -> Duration {
        Duration::from_millis(self.expiration_slack_ms)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: None,
            expiration_slack_ms: 0,
        }
    }
}
