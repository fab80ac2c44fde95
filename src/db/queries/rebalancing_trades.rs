use rust_decimal::Decimal;
use sqlx::PgPool;

use crate::db::models::rebalancing_trades::NewRebalancingTradeModel;

pub async fn insert_rebalancing_trade(
    pool: &PgPool,
    trade: &NewRebalancingTradeModel,
) -> Result<i32, sqlx::Error> {
    sqlx::query_scalar::<_, i32>(
        r#"
        INSERT INTO rebalancing_trades
            (run_id, source_protocol, source_pool, dest_protocol, dest_pool,
             amount, expected_gain_usd, status, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, 'proposed', now(), now())
        RETURNING id
        "#,
    )
    .bind(trade.run_id)
    .bind(&trade.source_protocol)
    .bind(&trade.source_pool)
    .bind(&trade.dest_protocol)
    .bind(&trade.dest_pool)
    .bind(trade.amount)
    .bind(trade.expected_gain_usd)
    .fetch_one(pool)
    .await
}

pub async fn update_trade_status(
    pool: &PgPool,
    id: i32,
    status: &str,
    gas_cost_usd: Option<Decimal>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE rebalancing_trades
        SET status = $2, gas_cost_usd = COALESCE($3, gas_cost_usd), updated_at = now()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(status)
    .bind(gas_cost_usd)
    .execute(pool)
    .await?;
    Ok(())
}
