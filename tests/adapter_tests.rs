use std::collections::HashMap;

use async_trait::async_trait;
use ethers::types::{Address, Bytes, U256};
use rust_decimal::{Decimal, dec};

use yield_allocator_bot::error::GatewayError;
use yield_allocator_bot::gateway::adapter::{AdapterOp, AdapterRegistry, ProtocolAdapter};
use yield_allocator_bot::gateway::{TxKind, TxSpec};

/// Fixed-response adapter standing in for a real protocol integration.
struct StaticAdapter {
    protocol: String,
    balances: HashMap<Address, Decimal>,
    rates: HashMap<Address, Decimal>,
    read_only: bool,
}

impl StaticAdapter {
    fn new(protocol: &str, read_only: bool) -> Self {
        Self {
            protocol: protocol.to_string(),
            balances: HashMap::new(),
            rates: HashMap::new(),
            read_only,
        }
    }

    fn with_pool(mut self, pool: Address, balance: Decimal, rate: Decimal) -> Self {
        self.balances.insert(pool, balance);
        self.rates.insert(pool, rate);
        self
    }

    fn spec(&self, pool: Address, kind: TxKind) -> Result<TxSpec, GatewayError> {
        if self.read_only {
            return Err(GatewayError::Unsupported {
                protocol: self.protocol.clone(),
                operation: kind.as_str(),
            });
        }
        Ok(TxSpec {
            protocol: self.protocol.clone(),
            pool,
            kind,
            to: Address::zero(),
            calldata: Bytes::new(),
            value: U256::zero(),
        })
    }
}

#[async_trait]
impl ProtocolAdapter for StaticAdapter {
    fn protocol(&self) -> &str {
        &self.protocol
    }

    fn supports(&self, op: AdapterOp) -> bool {
        match op {
            AdapterOp::GetBalance | AdapterOp::GetRate => true,
            _ => !self.read_only,
        }
    }

    async fn get_balance(&self, pool: Address) -> Result<Decimal, GatewayError> {
        self.balances
            .get(&pool)
            .copied()
            .ok_or_else(|| GatewayError::DataUnavailable {
                attempts: 3,
                message: format!("pool {pool:?} unknown"),
            })
    }

    async fn get_rate(&self, pool: Address) -> Result<Decimal, GatewayError> {
        self.rates
            .get(&pool)
            .copied()
            .ok_or_else(|| GatewayError::DataUnavailable {
                attempts: 3,
                message: format!("pool {pool:?} unknown"),
            })
    }

    fn claim(&self, pool: Address, _amount: Decimal) -> Result<TxSpec, GatewayError> {
        self.spec(pool, TxKind::Claim)
    }

    fn swap(
        &self,
        from_token: Address,
        _to_token: Address,
        _amount: Decimal,
    ) -> Result<TxSpec, GatewayError> {
        self.spec(from_token, TxKind::Swap)
    }

    fn deposit(&self, pool: Address, _amount: Decimal) -> Result<TxSpec, GatewayError> {
        self.spec(pool, TxKind::Deposit)
    }

    fn withdraw(&self, pool: Address, _amount: Decimal) -> Result<TxSpec, GatewayError> {
        self.spec(pool, TxKind::Withdraw)
    }
}

fn pool(index: u64) -> Address {
    Address::from_low_u64_be(index)
}

#[tokio::test]
async fn registry_routes_by_protocol_name() {
    let mut registry = AdapterRegistry::new();
    registry.register(std::sync::Arc::new(
        StaticAdapter::new("hyperlend", false).with_pool(pool(1), dec!(100), dec!(0.05)),
    ));
    registry.register(std::sync::Arc::new(
        StaticAdapter::new("hypurrfi", false).with_pool(pool(2), dec!(200), dec!(0.07)),
    ));

    let adapter = registry.get("hyperlend").expect("registered adapter");
    assert_eq!(adapter.get_balance(pool(1)).await.unwrap(), dec!(100));
    assert_eq!(adapter.get_rate(pool(1)).await.unwrap(), dec!(0.05));

    assert!(registry.get("unknown").is_none());
}

#[tokio::test]
async fn unknown_pool_surfaces_as_data_unavailable() {
    let adapter = StaticAdapter::new("hyperlend", false).with_pool(pool(1), dec!(100), dec!(0.05));

    let err = adapter.get_balance(pool(9)).await.unwrap_err();
    assert!(matches!(err, GatewayError::DataUnavailable { .. }));
    // A per-pool failure excludes the pool, never the cycle
    assert!(err.is_per_pool());
}

#[test]
fn read_only_protocol_declares_writes_unsupported() {
    let adapter = StaticAdapter::new("watchlist", true).with_pool(pool(1), dec!(50), dec!(0.02));

    assert!(adapter.supports(AdapterOp::GetBalance));
    assert!(adapter.supports(AdapterOp::GetRate));
    assert!(!adapter.supports(AdapterOp::Claim));
    assert!(!adapter.supports(AdapterOp::Deposit));
    assert!(!adapter.supports(AdapterOp::Withdraw));

    let err = adapter.claim(pool(1), dec!(10)).unwrap_err();
    assert!(matches!(err, GatewayError::Unsupported { .. }));
}

#[test]
fn write_specs_carry_their_kind() {
    let adapter = StaticAdapter::new("hyperlend", false).with_pool(pool(1), dec!(100), dec!(0.05));

    assert_eq!(adapter.claim(pool(1), dec!(10)).unwrap().kind, TxKind::Claim);
    assert_eq!(
        adapter.deposit(pool(1), dec!(10)).unwrap().kind,
        TxKind::Deposit
    );
    assert_eq!(
        adapter.withdraw(pool(1), dec!(10)).unwrap().kind,
        TxKind::Withdraw
    );
}

#[tokio::test]
async fn fanned_out_reads_are_independent() {
    let adapter = StaticAdapter::new("hyperlend", false)
        .with_pool(pool(1), dec!(100), dec!(0.05))
        .with_pool(pool(2), dec!(200), dec!(0.07));

    // One bad pool in the fan-out leaves the others intact
    let results = futures::future::join_all(
        [pool(1), pool(9), pool(2)]
            .into_iter()
            .map(|p| adapter.get_balance(p)),
    )
    .await;

    assert_eq!(results[0].as_ref().unwrap(), &dec!(100));
    assert!(results[1].is_err());
    assert_eq!(results[2].as_ref().unwrap(), &dec!(200));
}
