use sqlx::PgPool;

/// Try to take the exclusive lease for one worker type. The conditional
/// write succeeds only when the lease row is absent, expired, or already
/// ours, so two process instances can never both hold it.
pub async fn acquire_worker_lease(
    pool: &PgPool,
    worker: &str,
    holder: &str,
    ttl_secs: f64,
) -> Result<bool, sqlx::Error> {
    let row = sqlx::query_scalar::<_, String>(
        r#"
        INSERT INTO worker_leases (worker, holder, acquired_at, expires_at)
        VALUES ($1, $2, now(), now() + make_interval(secs => $3))
        ON CONFLICT (worker) DO UPDATE
            SET holder = $2, acquired_at = now(), expires_at = now() + make_interval(secs => $3)
            WHERE worker_leases.expires_at < now() OR worker_leases.holder = $2
        RETURNING holder
        "#,
    )
    .bind(worker)
    .bind(holder)
    .bind(ttl_secs)
    .fetch_optional(pool)
    .await?;

    Ok(row.is_some())
}

pub async fn release_worker_lease(
    pool: &PgPool,
    worker: &str,
    holder: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM worker_leases WHERE worker = $1 AND holder = $2")
        .bind(worker)
        .bind(holder)
        .execute(pool)
        .await?;
    Ok(())
}

/// Per-pool lock serializing value-moving operations across worker types.
pub async fn acquire_pool_lock(
    pool: &PgPool,
    protocol: &str,
    pool_address: &str,
    holder: &str,
    ttl_secs: f64,
) -> Result<bool, sqlx::Error> {
    let row = sqlx::query_scalar::<_, String>(
        r#"
        INSERT INTO pool_locks (protocol, pool_address, holder, acquired_at, expires_at)
        VALUES ($1, $2, $3, now(), now() + make_interval(secs => $4))
        ON CONFLICT (protocol, pool_address) DO UPDATE
            SET holder = $3, acquired_at = now(), expires_at = now() + make_interval(secs => $4)
            WHERE pool_locks.expires_at < now() OR pool_locks.holder = $3
        RETURNING holder
        "#,
    )
    .bind(protocol)
    .bind(pool_address)
    .bind(holder)
    .bind(ttl_secs)
    .fetch_optional(pool)
    .await?;

    Ok(row.is_some())
}

pub async fn release_pool_lock(
    pool: &PgPool,
    protocol: &str,
    pool_address: &str,
    holder: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "DELETE FROM pool_locks WHERE protocol = $1 AND pool_address = $2 AND holder = $3",
    )
    .bind(protocol)
    .bind(pool_address)
    .bind(holder)
    .execute(pool)
    .await?;
    Ok(())
}
