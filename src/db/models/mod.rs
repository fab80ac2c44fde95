pub mod monitor_runs;
pub mod pool_aprs;
pub mod pool_snapshots;
pub mod rebalancing_trades;
pub mod transactions;
pub mod vault_prices;

use std::fmt;

/// Outcome of a sealed monitoring or rebalancing run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Success,
    Partial,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerMode {
    Scheduled,
    Manual,
    SingleRun,
}

impl TriggerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Manual => "manual",
            Self::SingleRun => "single_run",
        }
    }
}

/// Shared state machine for transactions and rebalancing trades:
/// proposed -> submitted -> pending_reconcile? -> confirmed | failed | reverted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Proposed,
    Submitted,
    PendingReconcile,
    Confirmed,
    Failed,
    Reverted,
}

impl TxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Proposed => "proposed",
            Self::Submitted => "submitted",
            Self::PendingReconcile => "pending_reconcile",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
            Self::Reverted => "reverted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Confirmed | Self::Failed | Self::Reverted)
    }
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a pool snapshot carries real chain data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataStatus {
    Ok,
    Unavailable,
}

impl DataStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Unavailable => "unavailable",
        }
    }
}

/// What the monitor did about a pool this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotAction {
    Claimed,
    Skipped,
    None,
}

impl SnapshotAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Claimed => "claimed",
            Self::Skipped => "skipped",
            Self::None => "none",
        }
    }
}

/// How a PoolAPR row was derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AprBasis {
    SharePrice,
    RewardRate,
}

impl AprBasis {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SharePrice => "share_price",
            Self::RewardRate => "reward_rate",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(TxStatus::Confirmed.is_terminal());
        assert!(TxStatus::Failed.is_terminal());
        assert!(TxStatus::Reverted.is_terminal());
        assert!(!TxStatus::Proposed.is_terminal());
        assert!(!TxStatus::Submitted.is_terminal());
        assert!(!TxStatus::PendingReconcile.is_terminal());
    }
}
