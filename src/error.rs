use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors surfaced by the chain gateway and protocol adapters.
///
/// Per-pool read failures (`DataUnavailable`) and guard-level conditions are
/// absorbed at pool granularity by the workers; only `Fatal` conditions
/// propagate out of a cycle.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("chain data unavailable after {attempts} attempts: {message}")]
    DataUnavailable { attempts: u32, message: String },

    #[error("{operation} not supported by protocol {protocol}")]
    Unsupported {
        protocol: String,
        operation: &'static str,
    },

    #[error("submission rejected after {attempts} attempts: {message}")]
    SubmissionFailed { attempts: u32, message: String },

    #[error("gas estimation failed: {message}")]
    GasEstimation { message: String },

    #[error("fatal gateway error: {message}")]
    Fatal { message: String },
}

impl GatewayError {
    pub fn unavailable(attempts: u32, err: impl std::fmt::Display) -> Self {
        Self::DataUnavailable {
            attempts,
            message: err.to_string(),
        }
    }

    /// A read failure excludes one pool from the cycle; everything else is
    /// escalated by the caller.
    pub fn is_per_pool(&self) -> bool {
        matches!(
            self,
            Self::DataUnavailable { .. } | Self::Unsupported { .. } | Self::GasEstimation { .. }
        )
    }
}

/// Errors from time-weighted return computation.
///
/// `InsufficientData` is deliberately distinct from a zero return: a window
/// with fewer than two samples has no return at all.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MetricsError {
    #[error("insufficient data: {have} snapshot(s), need at least 2")]
    InsufficientData { have: usize },

    #[error("non-positive share price at {at}")]
    NonPositivePrice { at: DateTime<Utc> },

    #[error("window duration is zero or negative")]
    EmptyWindow,
}
