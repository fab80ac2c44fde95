use std::future::Future;

use tracing::{error, warn};

use crate::error::GatewayError;

pub(crate) const READ_BACKOFF_BASE_MS: u64 = 500;

/// Bounded exponential-backoff retry for chain reads.
///
/// Exhausting the attempts surfaces as `DataUnavailable`, which excludes the
/// affected pool from the cycle without aborting it. Never use this for
/// value-moving submissions.
pub async fn with_read_retry<T, F, Fut>(
    op: &'static str,
    max_attempts: u32,
    mut call: F,
) -> Result<T, GatewayError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = eyre::Result<T>>,
{
    let mut last_error: Option<eyre::Report> = None;

    for attempt in 1..=max_attempts {
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                last_error = Some(e);
                if attempt < max_attempts {
                    let delay_ms = READ_BACKOFF_BASE_MS * 2u64.pow(attempt - 1);
                    warn!(
                        op = op,
                        attempt = attempt,
                        delay_ms = delay_ms,
                        error = %last_error.as_ref().unwrap(),
                        "Chain read failed, retrying after delay"
                    );
                    tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
                }
            }
        }
    }

    error!(
        op = op,
        attempts = max_attempts,
        error = %last_error.as_ref().unwrap(),
        "Chain read failed after all retries"
    );
    Err(GatewayError::unavailable(
        max_attempts,
        last_error.unwrap(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result = with_read_retry("flaky_read", 3, move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(eyre::eyre!("transient node error"))
                } else {
                    Ok(42u64)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_bounded_attempts() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result: Result<u64, _> = with_read_retry("dead_read", 3, move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(eyre::eyre!("node unreachable"))
            }
        })
        .await;

        assert!(matches!(
            result.unwrap_err(),
            GatewayError::DataUnavailable { attempts: 3, .. }
        ));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
