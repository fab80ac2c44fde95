use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;

use super::models::monitor_runs::{MonitorRunModel, NewMonitorRunModel};
use super::models::pool_aprs::{NewPoolAprModel, PoolAprModel};
use super::models::pool_snapshots::NewPoolSnapshotModel;
use super::models::rebalancing_trades::NewRebalancingTradeModel;
use super::models::transactions::{NewTransactionModel, TransactionModel};
use super::models::vault_prices::{NewVaultPriceModel, VaultPriceModel};
use super::models::{RunStatus, TriggerMode, TxStatus};
use super::queries::{
    leases as leases_queries, monitor_runs as monitor_runs_queries,
    pool_aprs as pool_aprs_queries, pool_snapshots as pool_snapshots_queries,
    rebalancing_trades as trades_queries, transactions as transactions_queries,
    vault_prices as vault_prices_queries,
};
use super::{connection, schema};
use crate::config::Config;

/// Identity of one open run, threaded explicitly through every call in a
/// cycle so concurrent workers never observe each other's context.
#[derive(Debug, Clone, Copy)]
pub struct RunContext {
    pub run_id: i32,
    pub started_at: DateTime<Utc>,
}

impl RunContext {
    /// Idempotency key for a transaction initiated by this run. At most one
    /// submission per (run, pool, kind) can ever reach the chain.
    pub fn idempotency_key(&self, protocol: &str, pool_address: &str, kind: &str) -> String {
        format!("{}:{}:{}:{}", self.run_id, protocol, pool_address, kind)
    }

    /// Idempotency key for one leg of a rebalancing trade. Keyed by the
    /// trade row, not the pool: several moves can share a destination pool
    /// in one cycle, and each deposit leg must stay its own submission.
    pub fn trade_leg_key(&self, trade_id: i32, leg: &str) -> String {
        format!("{}:trade:{}:{}", self.run_id, trade_id, leg)
    }
}

/// Single source of truth for every cycle: runs, snapshots, APR series,
/// transactions, trades, and the exclusivity leases and pool locks.
pub struct LedgerManager {
    pub pool: PgPool,
}

impl LedgerManager {
    /// Creates the connection pool and ensures the schema exists.
    pub async fn init(config: &Config) -> Result<Self, sqlx::Error> {
        let pool = connection::create_pool(config).await?;
        schema::init_schema(&pool).await?;
        Ok(Self { pool })
    }

    // ==================== Runs ====================

    pub async fn open_run(
        &self,
        worker: &str,
        mode: TriggerMode,
    ) -> Result<RunContext, sqlx::Error> {
        let started_at = Utc::now();
        let run = NewMonitorRunModel {
            worker: worker.to_string(),
            started_at,
            trigger_mode: mode.as_str().to_string(),
        };
        let run_id = monitor_runs_queries::insert_monitor_run(&self.pool, &run).await?;
        Ok(RunContext { run_id, started_at })
    }

    pub async fn seal_run(
        &self,
        ctx: &RunContext,
        status: RunStatus,
        error_message: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        monitor_runs_queries::seal_monitor_run(
            &self.pool,
            ctx.run_id,
            status.as_str(),
            Utc::now(),
            error_message,
        )
        .await
    }

    pub async fn latest_run_for_worker(
        &self,
        worker: &str,
    ) -> Result<Option<MonitorRunModel>, sqlx::Error> {
        monitor_runs_queries::get_latest_run_for_worker(&self.pool, worker).await
    }

    // ==================== Observations ====================

    pub async fn record_pool_snapshot(
        &self,
        snapshot: &NewPoolSnapshotModel,
    ) -> Result<i32, sqlx::Error> {
        pool_snapshots_queries::insert_pool_snapshot(&self.pool, snapshot).await
    }

    pub async fn record_vault_price(
        &self,
        price: &NewVaultPriceModel,
    ) -> Result<i32, sqlx::Error> {
        vault_prices_queries::insert_vault_price(&self.pool, price).await
    }

    pub async fn latest_vault_price(&self) -> Result<Option<VaultPriceModel>, sqlx::Error> {
        vault_prices_queries::get_latest_vault_price(&self.pool).await
    }

    pub async fn vault_prices_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<VaultPriceModel>, sqlx::Error> {
        vault_prices_queries::get_vault_prices_since(&self.pool, since).await
    }

    pub async fn record_pool_apr(&self, apr: &NewPoolAprModel) -> Result<i32, sqlx::Error> {
        pool_aprs_queries::insert_pool_apr(&self.pool, apr).await
    }

    pub async fn latest_pool_aprs(&self, basis: &str) -> Result<Vec<PoolAprModel>, sqlx::Error> {
        pool_aprs_queries::get_latest_pool_aprs(&self.pool, basis).await
    }

    // ==================== Transactions & trades ====================

    /// `None` means the idempotency key is already present and this
    /// submission must be dropped, not retried.
    pub async fn propose_transaction(
        &self,
        tx: &NewTransactionModel,
    ) -> Result<Option<i32>, sqlx::Error> {
        transactions_queries::insert_transaction(&self.pool, tx).await
    }

    pub async fn transaction_submitted(&self, id: i32, tx_hash: &str) -> Result<(), sqlx::Error> {
        transactions_queries::mark_transaction_submitted(&self.pool, id, tx_hash).await
    }

    pub async fn transaction_status(
        &self,
        id: i32,
        status: TxStatus,
        gas_actual_usd: Option<Decimal>,
    ) -> Result<(), sqlx::Error> {
        transactions_queries::update_transaction_status(
            &self.pool,
            id,
            status.as_str(),
            gas_actual_usd,
        )
        .await
    }

    pub async fn pending_reconcile(&self) -> Result<Vec<TransactionModel>, sqlx::Error> {
        transactions_queries::get_pending_reconcile(&self.pool).await
    }

    pub async fn propose_trade(
        &self,
        trade: &NewRebalancingTradeModel,
    ) -> Result<i32, sqlx::Error> {
        trades_queries::insert_rebalancing_trade(&self.pool, trade).await
    }

    pub async fn trade_status(
        &self,
        id: i32,
        status: TxStatus,
        gas_cost_usd: Option<Decimal>,
    ) -> Result<(), sqlx::Error> {
        trades_queries::update_trade_status(&self.pool, id, status.as_str(), gas_cost_usd).await
    }

    // ==================== Leases & locks ====================

    pub async fn acquire_worker_lease(
        &self,
        worker: &str,
        holder: &str,
        ttl_secs: f64,
    ) -> Result<bool, sqlx::Error> {
        leases_queries::acquire_worker_lease(&self.pool, worker, holder, ttl_secs).await
    }

    pub async fn release_worker_lease(
        &self,
        worker: &str,
        holder: &str,
    ) -> Result<(), sqlx::Error> {
        leases_queries::release_worker_lease(&self.pool, worker, holder).await
    }

    pub async fn acquire_pool_lock(
        &self,
        protocol: &str,
        pool_address: &str,
        holder: &str,
        ttl_secs: f64,
    ) -> Result<bool, sqlx::Error> {
        leases_queries::acquire_pool_lock(&self.pool, protocol, pool_address, holder, ttl_secs)
            .await
    }

    pub async fn release_pool_lock(
        &self,
        protocol: &str,
        pool_address: &str,
        holder: &str,
    ) -> Result<(), sqlx::Error> {
        leases_queries::release_pool_lock(&self.pool, protocol, pool_address, holder).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotency_key_is_unique_per_run_pool_kind() {
        let ctx = RunContext {
            run_id: 7,
            started_at: Utc::now(),
        };
        let a = ctx.idempotency_key("hyperlend", "0xabc", "claim");
        let b = ctx.idempotency_key("hyperlend", "0xabc", "deposit");
        let c = ctx.idempotency_key("hyperlend", "0xdef", "claim");
        assert_eq!(a, "7:hyperlend:0xabc:claim");
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn trade_leg_keys_stay_distinct_across_moves_sharing_a_destination() {
        let ctx = RunContext {
            run_id: 7,
            started_at: Utc::now(),
        };
        // Two trades depositing into the same pool in one run
        let first_deposit = ctx.trade_leg_key(41, "deposit");
        let second_deposit = ctx.trade_leg_key(42, "deposit");
        assert_eq!(first_deposit, "7:trade:41:deposit");
        assert_ne!(first_deposit, second_deposit);
        // The two legs of one trade are distinct as well
        assert_ne!(ctx.trade_leg_key(41, "withdraw"), first_deposit);
    }
}
