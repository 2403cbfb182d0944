//! Configuration Module
//!
//! Handles loading and managing engine and server configuration from
//! environment variables.

use std::env;
use std::path::PathBuf;

use crate::timespec;

/// Throttle window for hit/last-access bookkeeping outside debug mode.
pub const DEFAULT_ACCESS_THROTTLE_MS: u64 = 5_000;

/// Engine configuration.
///
/// Independent engines built from different configs share no state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Maximum number of entries, placeholders included
    pub max_size: usize,
    /// Largest estimated item size accepted by `set`, in bytes
    pub max_item_size: usize,
    /// TTL used when the caller does not pick one, in milliseconds
    pub default_ttl_ms: u64,
    /// Prefix for every durable-store key
    pub prefix: String,
    /// Persist entries when a backend is available
    pub persist: bool,
    /// Diagnostics mode: no access throttling
    pub debug: bool,
}

impl CacheConfig {
    /// Minimum time between two counted accesses of the same entry.
    pub fn access_throttle_ms(&self) -> u64 {
        if self.debug {
            0
        } else {
            DEFAULT_ACCESS_THROTTLE_MS
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 500,
            max_item_size: 1024 * 1024,
            default_ttl_ms: 5 * 60 * 1000,
            prefix: "swr:".to_string(),
            persist: true,
            debug: false,
        }
    }
}

/// Server configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Engine settings
    pub cache: CacheConfig,
    /// Directory for file-backed persistence; in-memory storage when unset
    pub storage_dir: Option<PathBuf>,
    /// HTTP server port
    pub server_port: u16,
    /// Interval between expired-entry sweeps, in milliseconds
    pub sweep_interval_ms: u64,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_MAX_SIZE` - Maximum cache entries (default: 500)
    /// - `CACHE_MAX_ITEM_SIZE` - Maximum item size in bytes (default: 1048576)
    /// - `CACHE_DEFAULT_TTL` - Default TTL, e.g. `5m` or `30000` (default: 5m)
    /// - `CACHE_PREFIX` - Durable-store key prefix (default: `swr:`)
    /// - `CACHE_PERSIST` - Persist entries (default: true)
    /// - `CACHE_DEBUG` - Disable access throttling (default: false)
    /// - `CACHE_STORAGE_DIR` - Directory for file persistence (default: unset)
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    /// - `SWEEP_INTERVAL` - Expired-entry sweep interval (default: 1s)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            cache: CacheConfig {
                max_size: env_parse("CACHE_MAX_SIZE").unwrap_or(defaults.cache.max_size),
                max_item_size: env_parse("CACHE_MAX_ITEM_SIZE")
                    .unwrap_or(defaults.cache.max_item_size),
                default_ttl_ms: env_duration("CACHE_DEFAULT_TTL")
                    .unwrap_or(defaults.cache.default_ttl_ms),
                prefix: env::var("CACHE_PREFIX").unwrap_or(defaults.cache.prefix),
                persist: env_bool("CACHE_PERSIST").unwrap_or(defaults.cache.persist),
                debug: env_bool("CACHE_DEBUG").unwrap_or(defaults.cache.debug),
            },
            storage_dir: env::var("CACHE_STORAGE_DIR")
                .ok()
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            server_port: env_parse("SERVER_PORT").unwrap_or(defaults.server_port),
            sweep_interval_ms: env_duration("SWEEP_INTERVAL")
                .unwrap_or(defaults.sweep_interval_ms),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            storage_dir: None,
            server_port: 3000,
            sweep_interval_ms: 1_000,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

fn env_duration(name: &str) -> Option<u64> {
    env::var(name).ok().and_then(|v| timespec::parse(v).ok())
}

fn env_bool(name: &str) -> Option<bool> {
    env::var(name)
        .ok()
        .and_then(|v| match v.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        })
}
