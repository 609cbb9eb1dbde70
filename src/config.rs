// =============================================================================
// Runtime Configuration — one frozen value built once at startup
// =============================================================================
//
// Every tunable named in the external-interfaces contract lives here, read
// from the process environment (optionally via a `.env` file) exactly once.
// No worker reads `std::env` after `RuntimeConfig::load` returns; the value
// is wrapped in `Arc` and cloned into every task.
// =============================================================================

use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::{Confidence, SideFilter};

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_string_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn default_retry_max() -> u32 {
    3
}

fn default_rpc_call_delay_ms() -> u64 {
    200
}

fn default_cache_max() -> usize {
    5000
}

fn default_batch_size() -> usize {
    100
}

fn default_final_advance_ms() -> i64 {
    5000
}

fn default_db_pool_size() -> u32 {
    10
}

fn default_stream() -> String {
    "bet_stream".to_string()
}

fn default_group() -> String {
    "bet_processors".to_string()
}

/// Trader tunables, enumerated in full in component §4.J.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraderConfig {
    pub enabled: bool,
    pub dry_run: bool,
    pub amount: rust_decimal::Decimal,
    pub min_confidence: Confidence,
    pub side_filter: SideFilter,
    pub delta_ms: i64,
    pub gas_bump: f64,
    pub arm_enabled: bool,
    pub arm_slope_min: f64,
    pub arm_volume_min: f64,
    pub arm_updiff_min: f64,
    pub arm_max_age_ms: i64,
}

impl TraderConfig {
    fn from_env(final_advance_ms: i64) -> Self {
        Self {
            enabled: env_or("TRADER_ENABLED", false),
            dry_run: env_or("TRADER_DRY_RUN", true),
            amount: env_string_or("TRADER_AMOUNT", "0.001")
                .parse()
                .unwrap_or_else(|_| "0.001".parse().unwrap()),
            min_confidence: env_string_or("TRADER_MIN_CONFIDENCE", "high")
                .parse()
                .unwrap_or(Confidence::High),
            side_filter: env_string_or("TRADER_SIDE_FILTER", "any")
                .parse()
                .unwrap_or(SideFilter::Any),
            delta_ms: env_or("TRADER_DELTA_MS", final_advance_ms),
            gas_bump: env_or("TRADER_GAS_BUMP", 1.2),
            arm_enabled: env_or("TRADER_ARM_ENABLED", true),
            arm_slope_min: env_or("TRADER_ARM_SLOPE_MIN", 0.05),
            arm_volume_min: env_or("TRADER_ARM_VOLUME_MIN", 1.5),
            arm_updiff_min: env_or("TRADER_ARM_UPDIFF_MIN", 0.10),
            arm_max_age_ms: env_or("TRADER_ARM_MAX_AGE_MS", 30_000),
        }
    }
}

/// Top-level frozen runtime configuration, built once in `main`.
#[derive(Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub database_url: String,
    pub redis_url: String,
    pub rpc_url: String,
    pub wss_url: String,
    pub contract_addr: String,
    /// `PRIVATE_KEY (trader only, never logged)`: excluded from `Serialize`
    /// and from `Debug` below.
    #[serde(skip_serializing)]
    pub private_key: String,

    pub retry_max: u32,
    pub rpc_call_delay_ms: u64,
    pub cache_max: usize,
    pub batch_size: usize,
    pub final_advance_ms: i64,

    pub redis_stream: String,
    pub redis_group: String,
    pub db_pool_size: u32,

    pub seed_epoch: Option<i64>,
    pub seed_block: Option<i64>,

    pub trader: TraderConfig,
}

impl RuntimeConfig {
    /// Build the configuration once from the process environment.
    ///
    /// Loads a `.env` file if present (development convenience); environment
    /// variables always take precedence over it.
    pub fn load() -> Result<Self> {
        let _ = dotenv::dotenv();

        let database_url =
            std::env::var("DATABASE_URL").context("DATABASE_URL is required")?;
        let rpc_url = std::env::var("RPC_URL").context("RPC_URL is required")?;
        let wss_url = std::env::var("WSS_URL").context("WSS_URL is required")?;
        let contract_addr =
            std::env::var("CONTRACT_ADDR").context("CONTRACT_ADDR is required")?;
        let redis_url = env_string_or("REDIS_URL", "redis://127.0.0.1:6379");
        let private_key = std::env::var("PRIVATE_KEY").unwrap_or_default();

        let final_advance_ms = env_or("FINAL_ADVANCE_MS", default_final_advance_ms());

        let cfg = Self {
            database_url,
            redis_url,
            rpc_url,
            wss_url,
            contract_addr,
            private_key,
            retry_max: env_or("RETRY_MAX", default_retry_max()),
            rpc_call_delay_ms: env_or("RPC_CALL_DELAY_MS", default_rpc_call_delay_ms()),
            cache_max: env_or("CACHE_MAX", default_cache_max()),
            batch_size: env_or("BATCH_SIZE", default_batch_size()),
            final_advance_ms,
            redis_stream: env_string_or("REDIS_STREAM", &default_stream()),
            redis_group: env_string_or("REDIS_GROUP", &default_group()),
            db_pool_size: env_or("DB_POOL_SIZE", default_db_pool_size()),
            seed_epoch: std::env::var("SEED_EPOCH").ok().and_then(|v| v.parse().ok()),
            seed_block: std::env::var("SEED_BLOCK").ok().and_then(|v| v.parse().ok()),
            trader: TraderConfig::from_env(final_advance_ms),
        };

        info!(
            rpc_url = %cfg.rpc_url,
            wss_url = %cfg.wss_url,
            contract_addr = %cfg.contract_addr,
            redis_stream = %cfg.redis_stream,
            trader_enabled = cfg.trader.enabled,
            trader_dry_run = cfg.trader.dry_run,
            "runtime config loaded"
        );

        Ok(cfg)
    }

    pub fn rpc_call_delay(&self) -> Duration {
        Duration::from_millis(self.rpc_call_delay_ms)
    }
}

impl std::fmt::Debug for RuntimeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeConfig")
            .field("database_url", &self.database_url)
            .field("redis_url", &self.redis_url)
            .field("rpc_url", &self.rpc_url)
            .field("wss_url", &self.wss_url)
            .field("contract_addr", &self.contract_addr)
            .field("private_key", &"<redacted>")
            .field("retry_max", &self.retry_max)
            .field("rpc_call_delay_ms", &self.rpc_call_delay_ms)
            .field("cache_max", &self.cache_max)
            .field("batch_size", &self.batch_size)
            .field("final_advance_ms", &self.final_advance_ms)
            .field("redis_stream", &self.redis_stream)
            .field("redis_group", &self.redis_group)
            .field("db_pool_size", &self.db_pool_size)
            .field("seed_epoch", &self.seed_epoch)
            .field("seed_block", &self.seed_block)
            .field("trader", &self.trader)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clear_env() {
        for key in [
            "DATABASE_URL",
            "RPC_URL",
            "WSS_URL",
            "CONTRACT_ADDR",
            "REDIS_URL",
            "PRIVATE_KEY",
            "FINAL_ADVANCE_MS",
            "TRADER_MIN_CONFIDENCE",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn load_fails_without_required_vars() {
        clear_env();
        assert!(RuntimeConfig::load().is_err());
    }

    #[test]
    fn load_applies_defaults_for_tuning_keys() {
        clear_env();
        std::env::set_var("DATABASE_URL", "postgres://x");
        std::env::set_var("RPC_URL", "http://localhost:8545");
        std::env::set_var("WSS_URL", "ws://localhost:8546");
        std::env::set_var("CONTRACT_ADDR", "0x0000000000000000000000000000000000dead");

        let cfg = RuntimeConfig::load().unwrap();
        assert_eq!(cfg.retry_max, 3);
        assert_eq!(cfg.final_advance_ms, 5000);
        assert_eq!(cfg.redis_stream, "bet_stream");
        assert_eq!(cfg.trader.delta_ms, cfg.final_advance_ms);
        assert_eq!(cfg.trader.min_confidence, Confidence::High);
        clear_env();
    }
}
