use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::FromRow;

#[derive(Debug, FromRow)]
pub struct PoolAprModel {
    pub id: i32,
    pub protocol: String,
    pub pool_address: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub apr: Decimal,
    pub apy: Decimal,
    pub basis: String,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPoolAprModel {
    pub protocol: String,
    pub pool_address: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub apr: Decimal,
    pub apy: Decimal,
    pub basis: String,
    pub computed_at: DateTime<Utc>,
}
