pub mod adapter;
pub mod oracle;
pub mod retry;
pub mod vault;

use std::future::Future;
use std::num::NonZeroU32;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ethers::middleware::SignerMiddleware;
use ethers::prelude::*;
use ethers::providers::{Http, Provider};
use eyre::Result;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use nonzero_ext::nonzero;
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::GatewayError;
use oracle::NativePriceOracle;

pub type GatewayClient = SignerMiddleware<Provider<Http>, LocalWallet>;

const NATIVE_DECIMALS: u32 = 18;
const MAX_READ_ATTEMPTS: u32 = 3;
const MAX_SUBMIT_ATTEMPTS: u32 = 3;
const SUBMIT_BACKOFF_BASE_MS: u64 = 500;
const CONFIRMATION_POLL_SECS: u64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxKind {
    Claim,
    Swap,
    Deposit,
    Withdraw,
    Rebalance,
}

impl TxKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Claim => "claim",
            Self::Swap => "swap",
            Self::Deposit => "deposit",
            Self::Withdraw => "withdraw",
            Self::Rebalance => "rebalance",
        }
    }
}

/// A fully-formed write call, ready for gas estimation and broadcast.
#[derive(Debug, Clone)]
pub struct TxSpec {
    pub protocol: String,
    pub pool: Address,
    pub kind: TxKind,
    pub to: Address,
    pub calldata: Bytes,
    pub value: U256,
}

#[derive(Debug, Clone, Copy)]
pub struct GasEstimate {
    pub gas_limit: U256,
    pub gas_price: U256,
    pub cost_usd: Decimal,
}

/// Result of waiting on a broadcast transaction.
#[derive(Debug, Clone, Copy)]
pub enum TxOutcome {
    Confirmed { gas_cost_usd: Decimal },
    Reverted { gas_cost_usd: Decimal },
    /// No receipt within the confirmation window. The transaction may still
    /// land; reconciliation resolves it before any further action on the pool.
    TimedOut,
}

/// Resolution of a previously-unknown transaction, looked up by hash.
#[derive(Debug, Clone, Copy)]
pub enum TxResolution {
    Confirmed { gas_cost_usd: Decimal },
    Reverted { gas_cost_usd: Decimal },
}

/// Wraps all chain access: reads are retried and rate-limited, writes are
/// broadcast at most once past the RPC boundary.
pub struct ChainGateway {
    provider: Arc<Provider<Http>>,
    client: Arc<GatewayClient>,
    limiter: DefaultDirectRateLimiter,
    oracle: NativePriceOracle,
    confirm_timeout: Duration,
}

impl ChainGateway {
    pub fn new(config: &Config) -> Result<Self> {
        let wallet = LocalWallet::from_str(&config.executor_private_key)?
            .with_chain_id(config.chain_id);
        let client = Arc::new(SignerMiddleware::new((*config.provider).clone(), wallet));

        let per_second = NonZeroU32::new(config.rpc_rate_limit_per_sec)
            .unwrap_or(nonzero!(10u32));
        let limiter = RateLimiter::direct(Quota::per_second(per_second));

        let oracle = NativePriceOracle::new(config.provider.clone(), config.native_usd_feed);

        Ok(Self {
            provider: config.provider.clone(),
            client,
            limiter,
            oracle,
            confirm_timeout: Duration::from_secs(config.confirmation_timeout_secs),
        })
    }

    pub fn provider(&self) -> Arc<Provider<Http>> {
        self.provider.clone()
    }

    pub fn executor_address(&self) -> Address {
        self.client.address()
    }

    pub async fn pace(&self) {
        self.limiter.until_ready().await;
    }

    /// Retried, rate-limited read. Exhaustion surfaces as `DataUnavailable`
    /// for the caller's pool only.
    pub async fn read<T, F, Fut>(&self, op: &'static str, call: F) -> Result<T, GatewayError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = eyre::Result<T>>,
    {
        self.pace().await;
        retry::with_read_retry(op, MAX_READ_ATTEMPTS, call).await
    }

    pub async fn native_usd_price(&self) -> Result<Decimal, GatewayError> {
        self.pace().await;
        self.oracle
            .usd_price()
            .await
            .map_err(|e| GatewayError::unavailable(1, e))
    }

    pub async fn estimate_gas(&self, spec: &TxSpec) -> Result<GasEstimate, GatewayError> {
        let tx: TypedTransaction = TransactionRequest::new()
            .from(self.client.address())
            .to(spec.to)
            .data(spec.calldata.clone())
            .value(spec.value)
            .into();

        self.pace().await;
        let gas_limit = self
            .client
            .estimate_gas(&tx, None)
            .await
            .map_err(|e| GatewayError::GasEstimation {
                message: e.to_string(),
            })?;

        self.pace().await;
        let gas_price = self
            .client
            .get_gas_price()
            .await
            .map_err(|e| GatewayError::GasEstimation {
                message: e.to_string(),
            })?;

        let native_price = self.native_usd_price().await.map_err(|e| {
            GatewayError::GasEstimation {
                message: e.to_string(),
            }
        })?;

        let cost_native = u256_to_decimal(gas_limit * gas_price, NATIVE_DECIMALS);
        Ok(GasEstimate {
            gas_limit,
            gas_price,
            cost_usd: cost_native * native_price,
        })
    }

    /// Broadcast a write. Failures before broadcast are retried with backoff;
    /// once the RPC accepts the transaction there is exactly one broadcast.
    pub async fn submit(&self, spec: &TxSpec, gas: &GasEstimate) -> Result<TxHash, GatewayError> {
        let tx = TransactionRequest::new()
            .from(self.client.address())
            .to(spec.to)
            .data(spec.calldata.clone())
            .value(spec.value)
            .gas(gas.gas_limit)
            .gas_price(gas.gas_price);

        let mut last_error = String::new();
        for attempt in 1..=MAX_SUBMIT_ATTEMPTS {
            self.pace().await;
            match self.client.send_transaction(tx.clone(), None).await {
                Ok(pending) => {
                    let tx_hash = *pending;
                    info!(
                        kind = spec.kind.as_str(),
                        pool = ?spec.pool,
                        tx_hash = ?tx_hash,
                        "Transaction broadcast"
                    );
                    return Ok(tx_hash);
                }
                Err(e) => {
                    last_error = e.to_string();
                    if attempt < MAX_SUBMIT_ATTEMPTS {
                        let delay_ms = SUBMIT_BACKOFF_BASE_MS * 2u64.pow(attempt - 1);
                        warn!(
                            kind = spec.kind.as_str(),
                            pool = ?spec.pool,
                            attempt = attempt,
                            delay_ms = delay_ms,
                            error = %last_error,
                            "Submission rejected before broadcast, retrying"
                        );
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    }
                }
            }
        }

        Err(GatewayError::SubmissionFailed {
            attempts: MAX_SUBMIT_ATTEMPTS,
            message: last_error,
        })
    }

    /// Poll for a receipt within the confirmation window. A timeout is not a
    /// failure: the outcome is unknown until reconciliation resolves it.
    pub async fn await_confirmation(&self, tx_hash: TxHash) -> Result<TxOutcome, GatewayError> {
        let deadline = Instant::now() + self.confirm_timeout;

        loop {
            self.pace().await;
            match self.client.get_transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) => {
                    let gas_cost_usd = self.receipt_cost_usd(&receipt).await;
                    return Ok(if receipt_succeeded(&receipt) {
                        TxOutcome::Confirmed { gas_cost_usd }
                    } else {
                        TxOutcome::Reverted { gas_cost_usd }
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(tx_hash = ?tx_hash, error = %e, "Receipt poll failed");
                }
            }

            if Instant::now() >= deadline {
                warn!(
                    tx_hash = ?tx_hash,
                    timeout_secs = self.confirm_timeout.as_secs(),
                    "No confirmation within window, deferring to reconciliation"
                );
                return Ok(TxOutcome::TimedOut);
            }
            tokio::time::sleep(Duration::from_secs(CONFIRMATION_POLL_SECS)).await;
        }
    }

    /// One-shot receipt lookup used by the reconciliation pass.
    pub async fn lookup(&self, tx_hash: TxHash) -> Result<Option<TxResolution>, GatewayError> {
        let client = self.client.clone();
        let receipt = self
            .read("lookup_receipt", move || {
                let client = client.clone();
                async move { Ok(client.get_transaction_receipt(tx_hash).await?) }
            })
            .await?;

        match receipt {
            None => Ok(None),
            Some(receipt) => {
                let gas_cost_usd = self.receipt_cost_usd(&receipt).await;
                Ok(Some(if receipt_succeeded(&receipt) {
                    TxResolution::Confirmed { gas_cost_usd }
                } else {
                    TxResolution::Reverted { gas_cost_usd }
                }))
            }
        }
    }

    async fn receipt_cost_usd(&self, receipt: &TransactionReceipt) -> Decimal {
        let gas_used = receipt.gas_used.unwrap_or(U256::zero());
        let gas_price = receipt.effective_gas_price.unwrap_or(U256::zero());
        let cost_native = u256_to_decimal(gas_used * gas_price, NATIVE_DECIMALS);
        match self.native_usd_price().await {
            Ok(price) => cost_native * price,
            Err(e) => {
                warn!(error = %e, "Native price unavailable for receipt cost, recording zero");
                Decimal::ZERO
            }
        }
    }
}

fn receipt_succeeded(receipt: &TransactionReceipt) -> bool {
    receipt.status == Some(U64::one())
}

pub fn u256_to_decimal(val: U256, decimals: u32) -> Decimal {
    let formatted =
        ethers::utils::format_units(val, decimals as usize).unwrap_or_else(|_| "0".to_string());
    Decimal::from_str(&formatted).unwrap_or(Decimal::ZERO)
}

pub fn decimal_to_u256(val: Decimal, decimals: u32) -> Result<U256, GatewayError> {
    let parsed = ethers::utils::parse_units(val.to_string(), decimals as usize).map_err(|e| {
        GatewayError::Fatal {
            message: format!("amount {val} not representable on chain: {e}"),
        }
    })?;
    Ok(U256::from(parsed))
}
