pub mod leases;
pub mod monitor_runs;
pub mod pool_aprs;
pub mod pool_snapshots;
pub mod rebalancing_trades;
pub mod transactions;
pub mod vault_prices;
