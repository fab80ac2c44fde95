use std::env;
use std::fs;
use std::str::FromStr;
use std::sync::Arc;

use ethers::providers::{Http, Provider};
use ethers::types::Address;
use eyre::{Result, WrapErr, eyre};
use rust_decimal::Decimal;
use serde::Deserialize;
use url::Url;

use crate::metrics::ApyCompounding;

/// One entry of the protocol/pool registry file.
#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    pub protocol: String,
    pub name: String,
    pub pool: Address,
    /// Contract answering `getSupplyRate(pool)` for this pool.
    pub rate_source: Address,
    #[serde(default = "default_risk_weight")]
    pub risk_weight: Decimal,
    /// Read-only pools are observed but never claimed from or rebalanced.
    #[serde(default)]
    pub read_only: bool,
}

fn default_risk_weight() -> Decimal {
    Decimal::ONE
}

#[derive(Debug, Deserialize)]
struct RegistryFile {
    pools: Vec<PoolConfig>,
}

pub struct Config {
    pub provider: Arc<Provider<Http>>,
    pub chain_id: u64,
    pub executor_private_key: String,
    pub database_url: String,

    // Contract surface
    pub vault_address: Address,
    pub agent_address: Address,
    pub native_usd_feed: Address,
    pub asset_decimals: u32,
    pub pools: Vec<PoolConfig>,

    // Claim guards
    pub min_claim_amount: Decimal,
    pub max_gas_cost_usd: Decimal,
    pub profit_margin_threshold: Decimal,
    pub reinvest_after_claim: bool,

    // Rebalancing
    pub safety_multiplier: Decimal,
    pub max_move_fraction: Decimal,
    pub apr_staleness_secs: i64,
    pub holding_period_days: u32,

    // Workers
    pub monitor_interval_secs: u64,
    pub rebalance_interval_secs: u64,
    pub confirmation_timeout_secs: u64,
    pub lease_ttl_secs: f64,
    pub pool_lock_ttl_secs: f64,
    pub rpc_rate_limit_per_sec: u32,

    pub apy_compounding: ApyCompounding,
    /// Identifies this process as a lease holder across instances.
    pub instance_id: String,
}

impl Config {
    pub async fn load() -> Result<Self> {
        let rpc_url = required("RPC_URL")?;
        Url::parse(&rpc_url).wrap_err("RPC_URL is not a valid URL")?;
        let provider =
            Provider::<Http>::try_from(rpc_url.as_str()).wrap_err("Failed to create provider")?;

        let registry_path = required("POOL_REGISTRY_PATH")?;
        let registry_raw = fs::read_to_string(&registry_path)
            .wrap_err_with(|| format!("Failed to read pool registry {registry_path}"))?;
        let registry: RegistryFile =
            serde_json::from_str(&registry_raw).wrap_err("Failed to parse pool registry")?;
        if registry.pools.is_empty() {
            return Err(eyre!("Pool registry {} lists no pools", registry_path));
        }

        let instance_id = format!(
            "{}-{}",
            env::var("HOSTNAME").unwrap_or_else(|_| "local".to_string()),
            std::process::id()
        );

        Ok(Config {
            provider: Arc::new(provider),
            chain_id: parse_env("CHAIN_ID", 1u64)?,
            executor_private_key: required("EXECUTOR_PRIVATE_KEY")?,
            database_url: required("DATABASE_URL")?,

            vault_address: required_address("YIELD_ALLOCATOR_VAULT_ADDRESS")?,
            agent_address: required_address("ALLOCATOR_AGENT_ADDRESS")?,
            native_usd_feed: required_address("NATIVE_USD_FEED_ADDRESS")?,
            asset_decimals: parse_env("ASSET_DECIMALS", 18u32)?,
            pools: registry.pools,

            min_claim_amount: parse_env("MIN_CLAIM_AMOUNT", Decimal::new(10, 0))?,
            max_gas_cost_usd: parse_env("MAX_GAS_COST_USD", Decimal::new(5, 0))?,
            profit_margin_threshold: parse_env("PROFIT_MARGIN_THRESHOLD", Decimal::new(5, 1))?,
            reinvest_after_claim: parse_env("REINVEST_AFTER_CLAIM", true)?,

            safety_multiplier: parse_env("REBALANCE_SAFETY_MULTIPLIER", Decimal::new(2, 0))?,
            max_move_fraction: parse_env("MAX_MOVE_FRACTION", Decimal::new(25, 2))?,
            apr_staleness_secs: parse_env("APR_STALENESS_SECS", 3600i64)?,
            holding_period_days: parse_env("HOLDING_PERIOD_DAYS", 7u32)?,

            monitor_interval_secs: parse_env("MONITOR_INTERVAL_SECS", 300u64)?,
            rebalance_interval_secs: parse_env("REBALANCE_INTERVAL_SECS", 3600u64)?,
            confirmation_timeout_secs: parse_env("CONFIRMATION_TIMEOUT_SECS", 180u64)?,
            lease_ttl_secs: parse_env("LEASE_TTL_SECS", 900.0f64)?,
            pool_lock_ttl_secs: parse_env("POOL_LOCK_TTL_SECS", 600.0f64)?,
            rpc_rate_limit_per_sec: parse_env("RPC_RATE_LIMIT_PER_SEC", 10u32)?,

            apy_compounding: parse_env("APY_COMPOUNDING", ApyCompounding::Daily)?,
            instance_id,
        })
    }

    /// Registry entries for one protocol, preserving file order.
    pub fn pools_for_protocol(&self, protocol: &str) -> Vec<&PoolConfig> {
        self.pools
            .iter()
            .filter(|p| p.protocol == protocol)
            .collect()
    }

    pub fn protocols(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for pool in &self.pools {
            if !seen.contains(&pool.protocol) {
                seen.push(pool.protocol.clone());
            }
        }
        seen
    }
}

fn required(key: &str) -> Result<String> {
    env::var(key).map_err(|_| eyre!("Missing required environment variable {key}"))
}

fn required_address(key: &str) -> Result<Address> {
    let raw = required(key)?;
    Address::from_str(&raw).map_err(|_| eyre!("{key} is not a valid address: {raw}"))
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|e| eyre!("Invalid value for {key}: {e}")),
        Err(_) => Ok(default),
    }
}
