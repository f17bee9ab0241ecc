//! Retry harness wrapping each pipeline stage.

use std::future::Future;

use tracing::warn;

use super::PipelineError;
use crate::config::RetryPolicy;
use crate::types::{CancelToken, Cancelled};

/// Run `op` until it succeeds, its error stops being retryable, or the
/// policy's attempt budget is spent. Backoff sleeps race against the
/// cancellation token.
pub async fn run_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    stage: &str,
    ct: &CancelToken,
    mut op: F,
) -> Result<T, PipelineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PipelineError>>,
{
    let mut attempt: u32 = 1;
    loop {
        ct.check()?;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_retryable() || attempt >= policy.max_attempts => {
                return Err(err);
            }
            Err(err) => {
                let delay = policy.delay_before(attempt + 1);
                warn!(
                    target: "filingrag::pipeline",
                    stage,
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "stage attempt failed; retrying"
                );
                if !delay.is_zero() {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = ct.cancelled() => return Err(Cancelled.into()),
                    }
                }
                attempt += 1;
            }
        }
    }
}
