use sqlx::PgPool;

use crate::db::models::pool_aprs::{NewPoolAprModel, PoolAprModel};

pub async fn insert_pool_apr(pool: &PgPool, apr: &NewPoolAprModel) -> Result<i32, sqlx::Error> {
    sqlx::query_scalar::<_, i32>(
        r#"
        INSERT INTO pool_aprs
            (protocol, pool_address, window_start, window_end, apr, apy, basis, computed_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING id
        "#,
    )
    .bind(&apr.protocol)
    .bind(&apr.pool_address)
    .bind(apr.window_start)
    .bind(apr.window_end)
    .bind(apr.apr)
    .bind(apr.apy)
    .bind(&apr.basis)
    .bind(apr.computed_at)
    .fetch_one(pool)
    .await
}

/// Most recent APR row per pool, newest first. Staleness filtering happens in
/// the rebalancer, which knows the threshold.
pub async fn get_latest_pool_aprs(
    pool: &PgPool,
    basis: &str,
) -> Result<Vec<PoolAprModel>, sqlx::Error> {
    sqlx::query_as::<_, PoolAprModel>(
        r#"
        SELECT DISTINCT ON (protocol, pool_address)
            id, protocol, pool_address, window_start, window_end, apr, apy, basis, computed_at
        FROM pool_aprs
        WHERE basis = $1
        ORDER BY protocol, pool_address, computed_at DESC
        "#,
    )
    .bind(basis)
    .fetch_all(pool)
    .await
}
