use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::db::models::monitor_runs::{MonitorRunModel, NewMonitorRunModel};

pub async fn insert_monitor_run(
    pool: &PgPool,
    run: &NewMonitorRunModel,
) -> Result<i32, sqlx::Error> {
    sqlx::query_scalar::<_, i32>(
        r#"
        INSERT INTO monitor_runs (worker, started_at, status, trigger_mode)
        VALUES ($1, $2, 'running', $3)
        RETURNING id
        "#,
    )
    .bind(&run.worker)
    .bind(run.started_at)
    .bind(&run.trigger_mode)
    .fetch_one(pool)
    .await
}

pub async fn seal_monitor_run(
    pool: &PgPool,
    run_id: i32,
    status: &str,
    finished_at: DateTime<Utc>,
    error_message: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE monitor_runs
        SET status = $2, finished_at = $3, error_message = $4
        WHERE id = $1 AND finished_at IS NULL
        "#,
    )
    .bind(run_id)
    .bind(status)
    .bind(finished_at)
    .bind(error_message)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_latest_run_for_worker(
    pool: &PgPool,
    worker: &str,
) -> Result<Option<MonitorRunModel>, sqlx::Error> {
    sqlx::query_as::<_, MonitorRunModel>(
        r#"
        SELECT id, worker, started_at, finished_at, status, trigger_mode, error_message
        FROM monitor_runs
        WHERE worker = $1
        ORDER BY started_at DESC
        LIMIT 1
        "#,
    )
    .bind(worker)
    .fetch_optional(pool)
    .await
}
