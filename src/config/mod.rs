/// Engine configuration
///
/// Loaded from a JSON file with environment-variable overrides for the
/// endpoints that differ between deployments.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::core::constants::{
    BUY_LOCK_TTL_SECS, METADATA_FRESH_SECS, METADATA_TTL_SECS, MONITOR_ERROR_POLL_SECS,
    MONITOR_POLL_SECS,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub feed: FeedConfig,
    pub rpc_url: String,
    pub router: RouterConfig,
    pub relay: RelayConfig,
    pub providers: ProviderConfig,
    pub enrich: EnrichConfig,
    pub monitor: MonitorConfig,
    /// Buy lock TTL in seconds
    pub lock_ttl_secs: u64,
    /// Path to the sqlite position ledger
    pub db_path: String,
    /// Path to the user roster file
    pub users_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// WebSocket endpoint of the ledger feed
    pub url: String,
    pub reconnect_base_secs: u64,
    pub reconnect_max_secs: u64,
    /// Signature dedup window capacity
    pub dedup_capacity: usize,
    /// Signature dedup entry lifetime in seconds
    pub dedup_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Swap router API base URL
    pub api_url: String,
    pub request_timeout_secs: u64,
    /// Retry budget for a single buy/sell
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub url: String,
    pub tip_lamports: u64,
    /// How long to poll for a bundle to land before giving up (seconds)
    pub land_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub dexscreener_url: String,
    pub solscan_url: String,
    pub solscan_api_key: String,
    pub risk_url: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichConfig {
    /// A cached record younger than this is reused outright (seconds)
    pub cache_fresh_secs: i64,
    /// Cache eviction age (seconds)
    pub cache_ttl_secs: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub poll_secs: u64,
    pub error_poll_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            feed: FeedConfig::default(),
            rpc_url: "https://api.mainnet-beta.solana.com".to_string(),
            router: RouterConfig::default(),
            relay: RelayConfig::default(),
            providers: ProviderConfig::default(),
            enrich: EnrichConfig::default(),
            monitor: MonitorConfig::default(),
            lock_ttl_secs: BUY_LOCK_TTL_SECS,
            db_path: "data/positions.db".to_string(),
            users_path: "data/users.json".to_string(),
        }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            url: "wss://api.mainnet-beta.solana.com/".to_string(),
            reconnect_base_secs: 5,
            reconnect_max_secs: 60,
            dedup_capacity: 4096,
            dedup_ttl_secs: 600,
        }
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.jup.ag/ultra/v1".to_string(),
            request_timeout_secs: 30,
            max_attempts: 3,
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            url: "https://mainnet.block-engine.jito.wtf/api/v1/bundles".to_string(),
            tip_lamports: 10_000,
            land_timeout_secs: 60,
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            dexscreener_url: "https://api.dexscreener.com".to_string(),
            solscan_url: "https://pro-api.solscan.io/v2.0".to_string(),
            solscan_api_key: String::new(),
            risk_url: "https://api.rugcheck.xyz/v1".to_string(),
            request_timeout_secs: 15,
        }
    }
}

impl Default for EnrichConfig {
    fn default() -> Self {
        Self {
            cache_fresh_secs: METADATA_FRESH_SECS,
            cache_ttl_secs: METADATA_TTL_SECS,
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_secs: MONITOR_POLL_SECS,
            error_poll_secs: MONITOR_ERROR_POLL_SECS,
        }
    }
}

impl EngineConfig {
    /// Load from a JSON file, then apply environment overrides. A
    /// missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?
        } else {
            info!("Config file {} not found, using defaults", path.display());
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("SOLSNIPER_FEED_URL") {
            self.feed.url = url;
        }
        if let Ok(url) = std::env::var("SOLSNIPER_RPC_URL") {
            self.rpc_url = url;
        }
        if let Ok(url) = std::env::var("SOLSNIPER_ROUTER_URL") {
            self.router.api_url = url;
        }
        if let Ok(url) = std::env::var("SOLSNIPER_RELAY_URL") {
            self.relay.url = url;
        }
        if let Ok(key) = std::env::var("SOLSNIPER_SOLSCAN_API_KEY") {
            self.providers.solscan_api_key = key;
        }
        if let Ok(path) = std::env::var("SOLSNIPER_DB_PATH") {
            self.db_path = path;
        }
        if let Ok(path) = std::env::var("SOLSNIPER_USERS_PATH") {
            self.users_path = path;
        }
    }
}
