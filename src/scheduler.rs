use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use eyre::Result;
use tokio::time::sleep;
use tracing::{error, info};

use crate::db::models::{RunStatus, TriggerMode};

/// Result of one worker cycle, as seen by the scheduler and by callers of
/// single-run mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Success,
    Partial,
    /// The cycle ran but produced no usable data.
    Failed,
    /// Another instance holds the worker lease; nothing was done.
    LeaseHeld,
}

impl CycleOutcome {
    pub fn run_status(&self) -> RunStatus {
        match self {
            Self::Success | Self::LeaseHeld => RunStatus::Success,
            Self::Partial => RunStatus::Partial,
            Self::Failed => RunStatus::Failed,
        }
    }

    /// Process exit code for single-run invocations: non-zero only when the
    /// cycle failed outright.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Failed => 1,
            _ => 0,
        }
    }
}

/// An independently scheduled worker. Cycles of one worker type never
/// overlap; the worker enforces that itself via its ledger lease.
#[async_trait]
pub trait Worker: Send + Sync {
    fn name(&self) -> &'static str;
    async fn run_cycle(&self, mode: TriggerMode) -> Result<CycleOutcome>;
}

/// Drives a worker either once or on a fixed interval. Shutdown is honored
/// only between cycles, so an in-flight cycle always finishes its ledger
/// writes before the process exits.
pub struct Scheduler {
    worker: Arc<dyn Worker>,
    interval: Duration,
}

impl Scheduler {
    pub fn new(worker: Arc<dyn Worker>, interval: Duration) -> Self {
        Self { worker, interval }
    }

    pub async fn run_once(&self) -> Result<CycleOutcome> {
        info!(worker = self.worker.name(), "Single-run cycle starting");
        let outcome = self.worker.run_cycle(TriggerMode::SingleRun).await?;
        info!(worker = self.worker.name(), outcome = ?outcome, "Single-run cycle finished");
        Ok(outcome)
    }

    pub async fn run_continuous(&self) -> Result<()> {
        info!(
            worker = self.worker.name(),
            interval_secs = self.interval.as_secs(),
            "Continuous mode started"
        );

        loop {
            match self.worker.run_cycle(TriggerMode::Scheduled).await {
                Ok(outcome) => {
                    info!(worker = self.worker.name(), outcome = ?outcome, "Cycle finished");
                }
                Err(e) => {
                    // The cycle sealed its run as failed; stay alive for the
                    // next tick so the failure is visible, not fatal
                    error!(worker = self.worker.name(), error = %format!("{e:#}"), "Cycle errored");
                }
            }

            tokio::select! {
                _ = sleep(self.interval) => {}
                _ = tokio::signal::ctrl_c() => {
                    info!(worker = self.worker.name(), "Shutdown signal received, exiting");
                    return Ok(());
                }
            }
        }
    }
}
