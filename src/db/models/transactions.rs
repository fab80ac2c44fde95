use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::FromRow;

#[derive(Debug, FromRow)]
pub struct TransactionModel {
    pub id: i32,
    pub run_id: i32,
    pub protocol: String,
    pub pool_address: String,
    pub kind: String,
    pub requested_amount: Decimal,
    pub gas_estimate_usd: Option<Decimal>,
    pub gas_actual_usd: Option<Decimal>,
    pub tx_hash: Option<String>,
    pub status: String,
    pub idempotency_key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewTransactionModel {
    pub run_id: i32,
    pub protocol: String,
    pub pool_address: String,
    pub kind: String,
    pub requested_amount: Decimal,
    pub gas_estimate_usd: Option<Decimal>,
    pub idempotency_key: String,
}
