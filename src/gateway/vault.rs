use std::sync::Arc;

use chrono::{DateTime, Utc};
use ethers::prelude::*;
use ethers::providers::{Http, Provider};
use rust_decimal::Decimal;

use super::{ChainGateway, u256_to_decimal};
use crate::error::GatewayError;
use crate::metrics;

// Read surface of the yield allocator vault
abigen!(
    YieldAllocatorVault,
    r#"[
        function totalAssets() external view returns (uint256)
        function totalSupply() external view returns (uint256)
        function poolPrincipal(address pool) external view returns (uint256)
        function asset() external view returns (address)
    ]"#
);

abigen!(
    Erc20Token,
    r#"[
        function balanceOf(address account) external view returns (uint256)
        function decimals() external view returns (uint8)
        function symbol() external view returns (string)
    ]"#
);

/// Vault-level observation taken once per monitoring cycle.
#[derive(Debug, Clone, Copy)]
pub struct VaultState {
    pub captured_at: DateTime<Utc>,
    pub total_assets: Decimal,
    pub total_shares: Decimal,
    pub share_price: Option<Decimal>,
    /// Assets sitting in the vault, not deployed to any pool.
    pub idle_assets: Decimal,
}

pub struct VaultReader {
    gateway: Arc<ChainGateway>,
    vault: YieldAllocatorVault<Provider<Http>>,
    vault_address: Address,
    asset_decimals: u32,
}

impl VaultReader {
    pub fn new(gateway: Arc<ChainGateway>, vault_address: Address, asset_decimals: u32) -> Self {
        let vault = YieldAllocatorVault::new(vault_address, gateway.provider());
        Self {
            gateway,
            vault,
            vault_address,
            asset_decimals,
        }
    }

    pub fn address(&self) -> Address {
        self.vault_address
    }

    pub async fn read_state(&self) -> Result<VaultState, GatewayError> {
        let total_assets_raw = self
            .gateway
            .read("vault_total_assets", || {
                let call = self.vault.total_assets();
                async move { Ok(call.call().await?) }
            })
            .await?;

        let total_supply_raw = self
            .gateway
            .read("vault_total_supply", || {
                let call = self.vault.total_supply();
                async move { Ok(call.call().await?) }
            })
            .await?;

        let asset_address = self
            .gateway
            .read("vault_asset", || {
                let call = self.vault.asset();
                async move { Ok(call.call().await?) }
            })
            .await?;

        let asset = Erc20Token::new(asset_address, self.gateway.provider());
        let idle_raw = self
            .gateway
            .read("vault_idle_assets", || {
                let call = asset.balance_of(self.vault_address);
                async move { Ok(call.call().await?) }
            })
            .await?;

        let total_assets = u256_to_decimal(total_assets_raw, self.asset_decimals);
        let total_shares = u256_to_decimal(total_supply_raw, self.asset_decimals);

        Ok(VaultState {
            captured_at: Utc::now(),
            total_assets,
            total_shares,
            share_price: metrics::share_price(total_assets, total_shares),
            idle_assets: u256_to_decimal(idle_raw, self.asset_decimals),
        })
    }

    /// Principal the vault has deployed into one pool.
    pub async fn pool_principal(&self, pool: Address) -> Result<Decimal, GatewayError> {
        let raw = self
            .gateway
            .read("vault_pool_principal", || {
                let call = self.vault.pool_principal(pool);
                async move { Ok(call.call().await?) }
            })
            .await?;
        Ok(u256_to_decimal(raw, self.asset_decimals))
    }
}
