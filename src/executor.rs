use std::sync::Arc;

use ethers::types::{Address, TxHash};
use eyre::Result;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::db::ledger::{LedgerManager, RunContext};
use crate::db::models::TxStatus;
use crate::db::models::transactions::NewTransactionModel;
use crate::gateway::{ChainGateway, GasEstimate, TxOutcome, TxResolution, TxSpec};
use crate::monitor::format_address;

/// Executes one write against the chain with the ledger as source of truth:
/// the transaction row exists before any broadcast, duplicate idempotency
/// keys drop the submission, and an unobserved confirmation parks the row in
/// `pending_reconcile` instead of retrying.
pub struct TxExecutor {
    gateway: Arc<ChainGateway>,
    ledger: Arc<LedgerManager>,
}

impl TxExecutor {
    pub fn new(gateway: Arc<ChainGateway>, ledger: Arc<LedgerManager>) -> Self {
        Self { gateway, ledger }
    }

    /// Record-then-submit. The caller derives the idempotency key (see
    /// `RunContext`); `None` means that key was already present and nothing
    /// touched the chain.
    #[allow(clippy::too_many_arguments)]
    pub async fn submit_recorded(
        &self,
        ctx: &RunContext,
        protocol: &str,
        pool: Address,
        spec: &TxSpec,
        amount: Decimal,
        gas: &GasEstimate,
        idempotency_key: String,
    ) -> Result<Option<TxStatus>> {
        let key = idempotency_key;
        let new_tx = NewTransactionModel {
            run_id: ctx.run_id,
            protocol: protocol.to_string(),
            pool_address: format_address(pool),
            kind: spec.kind.as_str().to_string(),
            requested_amount: amount,
            gas_estimate_usd: Some(gas.cost_usd),
            idempotency_key: key.clone(),
        };

        let Some(tx_id) = self.ledger.propose_transaction(&new_tx).await? else {
            warn!(
                idempotency_key = %key,
                "Idempotency key already recorded, dropping duplicate submission"
            );
            return Ok(None);
        };

        let status = match self.gateway.submit(spec, gas).await {
            Err(e) => {
                warn!(tx_id = tx_id, error = %e, "Submission failed before broadcast");
                self.ledger
                    .transaction_status(tx_id, TxStatus::Failed, None)
                    .await?;
                TxStatus::Failed
            }
            Ok(tx_hash) => {
                self.ledger
                    .transaction_submitted(tx_id, &format!("{tx_hash:?}"))
                    .await?;
                match self.gateway.await_confirmation(tx_hash).await? {
                    TxOutcome::Confirmed { gas_cost_usd } => {
                        info!(tx_id = tx_id, gas_cost_usd = %gas_cost_usd, "Transaction confirmed");
                        self.ledger
                            .transaction_status(tx_id, TxStatus::Confirmed, Some(gas_cost_usd))
                            .await?;
                        TxStatus::Confirmed
                    }
                    TxOutcome::Reverted { gas_cost_usd } => {
                        warn!(tx_id = tx_id, "Transaction reverted");
                        self.ledger
                            .transaction_status(tx_id, TxStatus::Reverted, Some(gas_cost_usd))
                            .await?;
                        TxStatus::Reverted
                    }
                    TxOutcome::TimedOut => {
                        self.ledger
                            .transaction_status(tx_id, TxStatus::PendingReconcile, None)
                            .await?;
                        TxStatus::PendingReconcile
                    }
                }
            }
        };

        Ok(Some(status))
    }
}

/// Resolve every `pending_reconcile` transaction by querying the chain for
/// its actual outcome. Runs at the start of each cycle, before any new
/// action can touch the same pools. Still-unknown transactions stay pending.
pub async fn reconcile_pending_transactions(
    ledger: &LedgerManager,
    gateway: &ChainGateway,
) -> Result<()> {
    let pending = ledger.pending_reconcile().await?;
    if pending.is_empty() {
        return Ok(());
    }
    info!(count = pending.len(), "Reconciling transactions with unknown outcome");

    for tx in pending {
        let Some(hash_str) = tx.tx_hash.as_deref() else {
            warn!(tx_id = tx.id, "Pending transaction has no hash, marking failed");
            ledger.transaction_status(tx.id, TxStatus::Failed, None).await?;
            continue;
        };
        let Ok(hash) = hash_str.parse::<TxHash>() else {
            warn!(tx_id = tx.id, tx_hash = hash_str, "Unparseable hash, marking failed");
            ledger.transaction_status(tx.id, TxStatus::Failed, None).await?;
            continue;
        };

        match gateway.lookup(hash).await {
            Ok(Some(TxResolution::Confirmed { gas_cost_usd })) => {
                info!(tx_id = tx.id, tx_hash = hash_str, "Reconciled as confirmed");
                ledger
                    .transaction_status(tx.id, TxStatus::Confirmed, Some(gas_cost_usd))
                    .await?;
            }
            Ok(Some(TxResolution::Reverted { gas_cost_usd })) => {
                warn!(tx_id = tx.id, tx_hash = hash_str, "Reconciled as reverted");
                ledger
                    .transaction_status(tx.id, TxStatus::Reverted, Some(gas_cost_usd))
                    .await?;
            }
            Ok(None) => {
                debug!(tx_id = tx.id, tx_hash = hash_str, "Still unresolved, leaving pending");
            }
            Err(e) => {
                warn!(tx_id = tx.id, error = %e, "Reconciliation lookup failed, leaving pending");
            }
        }
    }
    Ok(())
}
