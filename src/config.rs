use dotenvy::dotenv;
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database_url: String,
    /// Flat satoshi fee attached to every asset invoice (anti-spam floor).
    pub default_sat_fee: i64,
    /// Seconds between transfer-monitor heartbeats.
    pub heartbeat_interval_secs: u64,
    /// Seconds a cached preimage is retained before the heartbeat sweeps it.
    pub preimage_ttl_secs: u64,
    /// Upper bound on the settled-hash dedup cache.
    pub settled_cache_capacity: usize,
    /// Seconds a settled hash stays in the dedup cache.
    pub settled_cache_window_secs: u64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok(); // Load .env file if present

        Ok(Config {
            database_url: env::var("DATABASE_URL")?,
            default_sat_fee: env::var("DEFAULT_SAT_FEE")
                .unwrap_or_else(|_| "1".to_string())
                .parse()?,
            heartbeat_interval_secs: env::var("HEARTBEAT_INTERVAL_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()?,
            preimage_ttl_secs: env::var("PREIMAGE_TTL_SECS")
                .unwrap_or_else(|_| "86400".to_string())
                .parse()?,
            settled_cache_capacity: env::var("SETTLED_CACHE_CAPACITY")
                .unwrap_or_else(|_| "4096".to_string())
                .parse()?,
            settled_cache_window_secs: env::var("SETTLED_CACHE_WINDOW_SECS")
                .unwrap_or_else(|_| "3600".to_string())
                .parse()?,
        })
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn preimage_ttl(&self) -> Duration {
        Duration::from_secs(self.preimage_ttl_secs)
    }

    pub fn settled_cache_window(&self) -> Duration {
        Duration::from_secs(self.settled_cache_window_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database_url: String::new(),
            default_sat_fee: 1,
            heartbeat_interval_secs: 60,
            preimage_ttl_secs: 86_400,
            settled_cache_capacity: 4096,
            settled_cache_window_secs: 3600,
        }
    }
}
