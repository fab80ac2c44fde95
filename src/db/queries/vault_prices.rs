use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::db::models::vault_prices::{NewVaultPriceModel, VaultPriceModel};

pub async fn insert_vault_price(
    pool: &PgPool,
    price: &NewVaultPriceModel,
) -> Result<i32, sqlx::Error> {
    sqlx::query_scalar::<_, i32>(
        r#"
        INSERT INTO vault_prices (captured_at, total_assets, total_shares, share_price)
        VALUES ($1, $2, $3, $4)
        RETURNING id
        "#,
    )
    .bind(price.captured_at)
    .bind(price.total_assets)
    .bind(price.total_shares)
    .bind(price.share_price)
    .fetch_one(pool)
    .await
}

pub async fn get_latest_vault_price(
    pool: &PgPool,
) -> Result<Option<VaultPriceModel>, sqlx::Error> {
    sqlx::query_as::<_, VaultPriceModel>(
        r#"
        SELECT id, captured_at, total_assets, total_shares, share_price
        FROM vault_prices
        ORDER BY captured_at DESC
        LIMIT 1
        "#,
    )
    .fetch_optional(pool)
    .await
}

pub async fn get_vault_prices_since(
    pool: &PgPool,
    since: DateTime<Utc>,
) -> Result<Vec<VaultPriceModel>, sqlx::Error> {
    sqlx::query_as::<_, VaultPriceModel>(
        r#"
        SELECT id, captured_at, total_assets, total_shares, share_price
        FROM vault_prices
        WHERE captured_at >= $1
        ORDER BY captured_at ASC
        "#,
    )
    .bind(since)
    .fetch_all(pool)
    .await
}
