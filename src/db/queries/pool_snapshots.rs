use sqlx::PgPool;

use crate::db::models::pool_snapshots::NewPoolSnapshotModel;

pub async fn insert_pool_snapshot(
    pool: &PgPool,
    snapshot: &NewPoolSnapshotModel,
) -> Result<i32, sqlx::Error> {
    sqlx::query_scalar::<_, i32>(
        r#"
        INSERT INTO pool_snapshots
            (run_id, protocol, pool_address, captured_at, balance, accrued_yield,
             rate_apr, data_status, action, skip_reason)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING id
        "#,
    )
    .bind(snapshot.run_id)
    .bind(&snapshot.protocol)
    .bind(&snapshot.pool_address)
    .bind(snapshot.captured_at)
    .bind(snapshot.balance)
    .bind(snapshot.accrued_yield)
    .bind(snapshot.rate_apr)
    .bind(&snapshot.data_status)
    .bind(&snapshot.action)
    .bind(&snapshot.skip_reason)
    .fetch_one(pool)
    .await
}
