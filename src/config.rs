//! Runtime configuration, read from the environment with documented
//! defaults, mirroring the `BASE_DIR`/`DATA_DIR`/`CACHE_DIR` convention
//! of the system this engine is modeled after.

use std::env;
use std::path::PathBuf;

/// Recommended size of an [`crate::orderbook::order_list::OrderList`]
/// working set, per side, per market.
pub const DEFAULT_WORKING_SET_LIMIT: usize = 5_000;

/// Recommended pending-op count that triggers a flush.
pub const DEFAULT_FLUSH_COUNT: usize = 20_000;

/// Recommended wall-clock interval (milliseconds) that triggers a flush.
pub const DEFAULT_FLUSH_INTERVAL_MS: i64 = 1_000;

/// Engine-wide configuration.
///
/// Every field has a conservative default matching `spec.md`'s
/// recommended values; each can be overridden with an environment
/// variable for deployment tuning.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory under which every market's store and trade tape
    /// directories are created: `<cache_dir>/<market_code>/...`.
    pub cache_dir: PathBuf,

    /// Entries primed into an [`crate::orderbook::order_list::OrderList`]
    /// on construction and per refill.
    pub working_set_limit: usize,

    /// Pending-op count threshold that forces a flush.
    pub flush_count: usize,

    /// Wall-clock interval (milliseconds) that forces a flush even if
    /// `flush_count` has not been reached.
    pub flush_interval_ms: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("./data/cache"),
            working_set_limit: DEFAULT_WORKING_SET_LIMIT,
            flush_count: DEFAULT_FLUSH_COUNT,
            flush_interval_ms: DEFAULT_FLUSH_INTERVAL_MS,
        }
    }
}

impl Config {
    /// Build a `Config` from environment variables, falling back to
    /// defaults for anything unset or unparsable.
    ///
    /// Recognized variables: `MXENG_CACHE_DIR`, `MXENG_WORKING_SET_LIMIT`,
    /// `MXENG_FLUSH_COUNT`, `MXENG_FLUSH_INTERVAL_MS`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            cache_dir: env::var("MXENG_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_dir),
            working_set_limit: env_usize("MXENG_WORKING_SET_LIMIT", defaults.working_set_limit),
            flush_count: env_usize("MXENG_FLUSH_COUNT", defaults.flush_count),
            flush_interval_ms: env_i64("MXENG_FLUSH_INTERVAL_MS", defaults.flush_interval_ms),
        }
    }

    /// Directory holding the durable store files for `market_code`.
    pub fn market_dir(&self, market_code: &str) -> PathBuf {
        self.cache_dir.join(market_code)
    }

    /// Directory holding rotated trade-tape files for `market_code`.
    pub fn trades_dir(&self, market_code: &str) -> PathBuf {
        self.market_dir(market_code).join("trades")
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_i64(key: &str, default: i64) -> i64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
