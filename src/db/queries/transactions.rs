use sqlx::PgPool;

use crate::db::models::transactions::{NewTransactionModel, TransactionModel};

/// Insert a proposed transaction. Returns `None` when a row with the same
/// idempotency key already exists, in which case no new submission may be
/// attempted for this (run, pool, kind).
pub async fn insert_transaction(
    pool: &PgPool,
    tx: &NewTransactionModel,
) -> Result<Option<i32>, sqlx::Error> {
    sqlx::query_scalar::<_, i32>(
        r#"
        INSERT INTO transactions
            (run_id, protocol, pool_address, kind, requested_amount,
             gas_estimate_usd, status, idempotency_key, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, 'proposed', $7, now(), now())
        ON CONFLICT (idempotency_key) DO NOTHING
        RETURNING id
        "#,
    )
    .bind(tx.run_id)
    .bind(&tx.protocol)
    .bind(&tx.pool_address)
    .bind(&tx.kind)
    .bind(tx.requested_amount)
    .bind(tx.gas_estimate_usd)
    .bind(&tx.idempotency_key)
    .fetch_optional(pool)
    .await
}

pub async fn mark_transaction_submitted(
    pool: &PgPool,
    id: i32,
    tx_hash: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE transactions
        SET status = 'submitted', tx_hash = $2, updated_at = now()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(tx_hash)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn update_transaction_status(
    pool: &PgPool,
    id: i32,
    status: &str,
    gas_actual_usd: Option<rust_decimal::Decimal>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE transactions
        SET status = $2, gas_actual_usd = COALESCE($3, gas_actual_usd), updated_at = now()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(status)
    .bind(gas_actual_usd)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_pending_reconcile(pool: &PgPool) -> Result<Vec<TransactionModel>, sqlx::Error> {
    sqlx::query_as::<_, TransactionModel>(
        r#"
        SELECT id, run_id, protocol, pool_address, kind, requested_amount,
               gas_estimate_usd, gas_actual_usd, tx_hash, status, idempotency_key,
               created_at, updated_at
        FROM transactions
        WHERE status = 'pending_reconcile'
        ORDER BY created_at ASC
        "#,
    )
    .fetch_all(pool)
    .await
}
