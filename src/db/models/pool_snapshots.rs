use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::FromRow;

#[derive(Debug, FromRow)]
pub struct PoolSnapshotModel {
    pub id: i32,
    pub run_id: i32,
    pub protocol: String,
    pub pool_address: String,
    pub captured_at: DateTime<Utc>,
    pub balance: Option<Decimal>,
    pub accrued_yield: Option<Decimal>,
    pub rate_apr: Option<Decimal>,
    pub data_status: String,
    pub action: String,
    pub skip_reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewPoolSnapshotModel {
    pub run_id: i32,
    pub protocol: String,
    pub pool_address: String,
    pub captured_at: DateTime<Utc>,
    pub balance: Option<Decimal>,
    pub accrued_yield: Option<Decimal>,
    pub rate_apr: Option<Decimal>,
    pub data_status: String,
    pub action: String,
    pub skip_reason: Option<String>,
}
