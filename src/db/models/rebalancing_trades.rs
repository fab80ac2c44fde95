use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::FromRow;

#[derive(Debug, FromRow)]
pub struct RebalancingTradeModel {
    pub id: i32,
    pub run_id: i32,
    pub source_protocol: String,
    pub source_pool: String,
    pub dest_protocol: String,
    pub dest_pool: String,
    pub amount: Decimal,
    pub expected_gain_usd: Decimal,
    pub gas_cost_usd: Option<Decimal>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewRebalancingTradeModel {
    pub run_id: i32,
    pub source_protocol: String,
    pub source_pool: String,
    pub dest_protocol: String,
    pub dest_pool: String,
    pub amount: Decimal,
    pub expected_gain_usd: Decimal,
}
