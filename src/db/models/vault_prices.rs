use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::FromRow;

#[derive(Debug, FromRow)]
pub struct VaultPriceModel {
    pub id: i32,
    pub captured_at: DateTime<Utc>,
    pub total_assets: Decimal,
    pub total_shares: Decimal,
    pub share_price: Decimal,
}

#[derive(Debug, Clone)]
pub struct NewVaultPriceModel {
    pub captured_at: DateTime<Utc>,
    pub total_assets: Decimal,
    pub total_shares: Decimal,
    pub share_price: Decimal,
}
