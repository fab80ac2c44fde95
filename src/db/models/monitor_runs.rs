use chrono::{DateTime, Utc};
use sqlx::FromRow;

#[derive(Debug, FromRow)]
pub struct MonitorRunModel {
    pub id: i32,
    pub worker: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: String,
    pub trigger_mode: String,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewMonitorRunModel {
    pub worker: String,
    pub started_at: DateTime<Utc>,
    pub trigger_mode: String,
}
