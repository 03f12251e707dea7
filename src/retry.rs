//! Bounded retry loop for outcomes that a remote system reports asynchronously.
//!
//! GitHub computes mergeability in the background and merge attempts can race
//! with that computation, so most decisions are "try now, and if the answer is
//! not conclusive yet, look again a bit later". This module is the one place
//! that loop lives.
//!
//! An attempt reports one of three outcomes:
//!
//! - `Success`: done, stop.
//! - `Failure`: permanently rejected, stop without retrying.
//! - `Retry`: not conclusive yet, sleep and try again if budget remains.
//!
//! An `Err` from an attempt is fatal and is propagated as-is.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, info};

/// Retry budget for one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the initial attempt. Zero means the initial attempt only.
    pub max_retries: u32,

    /// Fixed delay before each retry.
    pub retry_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            max_retries,
            retry_delay,
        }
    }
}

/// What a single attempt concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    Failure,
    Retry,
}

/// Runs `attempt_initial`, then `attempt_retry` up to `policy.max_retries` times
/// while the outcome stays `Retry`.
///
/// The two hooks are separate because the first attempt usually works on state
/// the caller already has, while retries need to re-read it from the remote.
///
/// Returns `Ok(true)` on `Success` and `Ok(false)` on `Failure` or exhaustion.
/// `on_exhausted` is called once when the budget runs out with the outcome
/// still `Retry`.
pub async fn retry<E, I, IFut, R, RFut, X>(
    policy: RetryPolicy,
    attempt_initial: I,
    mut attempt_retry: R,
    on_exhausted: X,
) -> Result<bool, E>
where
    I: FnOnce() -> IFut,
    IFut: Future<Output = Result<AttemptOutcome, E>>,
    R: FnMut() -> RFut,
    RFut: Future<Output = Result<AttemptOutcome, E>>,
    X: FnOnce(),
{
    match attempt_initial().await? {
        AttemptOutcome::Success => return Ok(true),
        AttemptOutcome::Failure => return Ok(false),
        AttemptOutcome::Retry => {}
    }

    for run in 1..=policy.max_retries {
        if policy.retry_delay.is_zero() {
            info!(run, max_retries = policy.max_retries, "retrying");
        } else {
            info!(
                run,
                max_retries = policy.max_retries,
                delay_ms = policy.retry_delay.as_millis() as u64,
                "retrying after delay"
            );
            tokio::time::sleep(policy.retry_delay).await;
        }

        match attempt_retry().await? {
            AttemptOutcome::Success => return Ok(true),
            AttemptOutcome::Failure => return Ok(false),
            AttemptOutcome::Retry => debug!(run, "attempt inconclusive"),
        }
    }

    on_exhausted();
    Ok(false)
}
