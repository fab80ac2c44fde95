use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::providers::{Http, Provider};
use rust_decimal::Decimal;

use super::vault::YieldAllocatorVault;
use super::{ChainGateway, TxKind, TxSpec, decimal_to_u256, u256_to_decimal};
use crate::config::PoolConfig;
use crate::error::GatewayError;

// Write surface: funds only ever move through the allocator agent
abigen!(
    AllocatorAgent,
    r#"[
        function withdrawFromPool(address pool, uint256 amount) external
        function depositToPool(address pool, uint256 amount) external
        function swapViaRouter(address fromToken, address toToken, uint256 amountIn) external
    ]"#
);

// Aave-style rate source, annualized supply rate in ray (1e27)
abigen!(
    PoolRateSource,
    r#"[
        function getSupplyRate(address pool) external view returns (uint256)
    ]"#
);

const RAY_DECIMALS: u32 = 27;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterOp {
    GetBalance,
    GetRate,
    Claim,
    Swap,
    Deposit,
    Withdraw,
}

/// Capability interface every protocol integration implements. New protocols
/// are added by implementing this trait and registering the adapter; call
/// sites never inspect the concrete type.
#[async_trait]
pub trait ProtocolAdapter: Send + Sync {
    fn protocol(&self) -> &str;

    /// Read-only integrations report their write operations as unsupported
    /// here instead of failing at submission time.
    fn supports(&self, op: AdapterOp) -> bool;

    async fn get_balance(&self, pool: Address) -> Result<Decimal, GatewayError>;

    /// Current annualized supply rate for the pool, as a fraction.
    async fn get_rate(&self, pool: Address) -> Result<Decimal, GatewayError>;

    fn claim(&self, pool: Address, amount: Decimal) -> Result<TxSpec, GatewayError>;
    fn swap(
        &self,
        from_token: Address,
        to_token: Address,
        amount: Decimal,
    ) -> Result<TxSpec, GatewayError>;
    fn deposit(&self, pool: Address, amount: Decimal) -> Result<TxSpec, GatewayError>;
    fn withdraw(&self, pool: Address, amount: Decimal) -> Result<TxSpec, GatewayError>;
}

/// Adapter for pools the yield allocator vault deploys into. Reads go to the
/// vault and the pool's rate source; writes are routed through the allocator
/// agent contract.
pub struct AllocatorVaultAdapter {
    protocol: String,
    gateway: Arc<ChainGateway>,
    vault: YieldAllocatorVault<Provider<Http>>,
    agent: AllocatorAgent<Provider<Http>>,
    agent_address: Address,
    rate_sources: HashMap<Address, Address>,
    writable: HashSet<Address>,
    asset_decimals: u32,
}

impl AllocatorVaultAdapter {
    pub fn new(
        protocol: String,
        gateway: Arc<ChainGateway>,
        vault_address: Address,
        agent_address: Address,
        asset_decimals: u32,
        pools: &[&PoolConfig],
    ) -> Self {
        let vault = YieldAllocatorVault::new(vault_address, gateway.provider());
        let agent = AllocatorAgent::new(agent_address, gateway.provider());

        let rate_sources = pools
            .iter()
            .map(|p| (p.pool, p.rate_source))
            .collect::<HashMap<_, _>>();
        let writable = pools
            .iter()
            .filter(|p| !p.read_only)
            .map(|p| p.pool)
            .collect::<HashSet<_>>();

        Self {
            protocol,
            gateway,
            vault,
            agent,
            agent_address,
            rate_sources,
            writable,
            asset_decimals,
        }
    }

    fn require_writable(&self, pool: Address, operation: &'static str) -> Result<(), GatewayError> {
        if self.writable.contains(&pool) {
            Ok(())
        } else {
            Err(GatewayError::Unsupported {
                protocol: self.protocol.clone(),
                operation,
            })
        }
    }

    fn spec(&self, pool: Address, kind: TxKind, calldata: Option<Bytes>) -> Result<TxSpec, GatewayError> {
        let calldata = calldata.ok_or_else(|| GatewayError::Fatal {
            message: "agent call produced no calldata".to_string(),
        })?;
        Ok(TxSpec {
            protocol: self.protocol.clone(),
            pool,
            kind,
            to: self.agent_address,
            calldata,
            value: U256::zero(),
        })
    }
}

#[async_trait]
impl ProtocolAdapter for AllocatorVaultAdapter {
    fn protocol(&self) -> &str {
        &self.protocol
    }

    fn supports(&self, op: AdapterOp) -> bool {
        match op {
            AdapterOp::GetBalance | AdapterOp::GetRate => true,
            AdapterOp::Claim | AdapterOp::Swap | AdapterOp::Deposit | AdapterOp::Withdraw => {
                !self.writable.is_empty()
            }
        }
    }

    async fn get_balance(&self, pool: Address) -> Result<Decimal, GatewayError> {
        let raw = self
            .gateway
            .read("pool_principal", || {
                let call = self.vault.pool_principal(pool);
                async move { Ok(call.call().await?) }
            })
            .await?;
        Ok(u256_to_decimal(raw, self.asset_decimals))
    }

    async fn get_rate(&self, pool: Address) -> Result<Decimal, GatewayError> {
        let source = self.rate_sources.get(&pool).copied().ok_or_else(|| {
            GatewayError::DataUnavailable {
                attempts: 0,
                message: format!("no rate source configured for pool {pool:?}"),
            }
        })?;

        let rate_source = PoolRateSource::new(source, self.gateway.provider());
        let raw = self
            .gateway
            .read("pool_supply_rate", || {
                let call = rate_source.get_supply_rate(pool);
                async move { Ok(call.call().await?) }
            })
            .await?;
        Ok(u256_to_decimal(raw, RAY_DECIMALS))
    }

    fn claim(&self, pool: Address, amount: Decimal) -> Result<TxSpec, GatewayError> {
        self.require_writable(pool, "claim")?;
        let amount = decimal_to_u256(amount, self.asset_decimals)?;
        let calldata = self.agent.withdraw_from_pool(pool, amount).calldata();
        self.spec(pool, TxKind::Claim, calldata)
    }

    fn swap(
        &self,
        from_token: Address,
        to_token: Address,
        amount: Decimal,
    ) -> Result<TxSpec, GatewayError> {
        if self.writable.is_empty() {
            return Err(GatewayError::Unsupported {
                protocol: self.protocol.clone(),
                operation: "swap",
            });
        }
        let amount = decimal_to_u256(amount, self.asset_decimals)?;
        let calldata = self
            .agent
            .swap_via_router(from_token, to_token, amount)
            .calldata();
        self.spec(from_token, TxKind::Swap, calldata)
    }

    fn deposit(&self, pool: Address, amount: Decimal) -> Result<TxSpec, GatewayError> {
        self.require_writable(pool, "deposit")?;
        let amount = decimal_to_u256(amount, self.asset_decimals)?;
        let calldata = self.agent.deposit_to_pool(pool, amount).calldata();
        self.spec(pool, TxKind::Deposit, calldata)
    }

    fn withdraw(&self, pool: Address, amount: Decimal) -> Result<TxSpec, GatewayError> {
        self.require_writable(pool, "withdraw")?;
        let amount = decimal_to_u256(amount, self.asset_decimals)?;
        let calldata = self.agent.withdraw_from_pool(pool, amount).calldata();
        self.spec(pool, TxKind::Withdraw, calldata)
    }
}

/// Protocol name to adapter, built from the pool registry.
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn ProtocolAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    pub fn from_config(config: &crate::config::Config, gateway: Arc<ChainGateway>) -> Self {
        let mut registry = Self::new();
        for protocol in config.protocols() {
            let pools = config.pools_for_protocol(&protocol);
            let adapter = AllocatorVaultAdapter::new(
                protocol.clone(),
                gateway.clone(),
                config.vault_address,
                config.agent_address,
                config.asset_decimals,
                &pools,
            );
            registry.register(Arc::new(adapter));
        }
        registry
    }

    pub fn register(&mut self, adapter: Arc<dyn ProtocolAdapter>) {
        self.adapters.insert(adapter.protocol().to_string(), adapter);
    }

    pub fn get(&self, protocol: &str) -> Option<Arc<dyn ProtocolAdapter>> {
        self.adapters.get(protocol).cloned()
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}
