use sqlx::{Executor, postgres::PgPool};

pub async fn init_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    pool.execute(include_str!("monitor_runs.sql")).await?;
    pool.execute(include_str!("pool_snapshots.sql")).await?;
    pool.execute(include_str!("pool_aprs.sql")).await?;
    pool.execute(include_str!("vault_prices.sql")).await?;
    pool.execute(include_str!("transactions.sql")).await?;
    pool.execute(include_str!("rebalancing_trades.sql")).await?;
    pool.execute(include_str!("locks.sql")).await?;

    // Indices on timestamp for rolling-window and reconciliation queries
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_pool_snapshots_run
        ON pool_snapshots(run_id);
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_pool_aprs_pool_window_end
        ON pool_aprs(protocol, pool_address, window_end);
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_vault_prices_captured_at
        ON vault_prices(captured_at);
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_transactions_status
        ON transactions(status);
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
