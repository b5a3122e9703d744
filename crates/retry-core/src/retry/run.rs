//! Retry loop: run an operation until success, a permanent failure, or the
//! policy says stop.
//!
//! The operation receives the 1-based attempt number. The only suspension
//! point is the wait between attempts, which returns early when the policy's
//! cancel token fires.

use std::future::Future;
use std::time::{Duration, Instant};

use crate::retry::classify::{is_temporary, Classify};
use crate::retry::error::RetryError;
use crate::retry::policy::{RetryDecision, RetryOption, RetryPolicy, StopReason};

/// A failed attempt plus whether the sequence should continue.
#[derive(Debug)]
pub enum Failure<E> {
    /// Retry if the policy allows it.
    Transient(E),
    /// Stop and return this error immediately.
    Permanent(E),
}

impl<E> Failure<E> {
    /// Build from a `(continue_retry, err)` pair.
    pub fn new(continue_retry: bool, err: E) -> Self {
        if continue_retry {
            Failure::Transient(err)
        } else {
            Failure::Permanent(err)
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Failure::Transient(_))
    }

    pub fn into_inner(self) -> E {
        match self {
            Failure::Transient(e) | Failure::Permanent(e) => e,
        }
    }
}

impl<E: Classify> Failure<E> {
    /// Continue only if `is_temporary` says so.
    pub fn classify(err: E) -> Self {
        let transient = is_temporary(&err);
        Failure::new(transient, err)
    }
}

/// Retry `op` under a policy built from the default plus `options`.
pub fn do_retry<T, E, F, I>(op: F, options: I) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Result<T, Failure<E>>,
    E: std::error::Error + 'static,
    I: IntoIterator<Item = RetryOption>,
{
    run_with_retry(&RetryPolicy::from_options(options), op)
}

/// Retry `op` for as long as its errors are temporary per `is_temporary`.
pub fn do_temporary_error<T, E, F, I>(mut op: F, options: I) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Result<T, E>,
    E: Classify,
    I: IntoIterator<Item = RetryOption>,
{
    do_retry(|attempt| op(attempt).map_err(Failure::classify), options)
}

/// Runs `op` until it succeeds or `policy` says to stop.
/// On a transient failure, waits for the backoff delay then tries again.
pub fn run_with_retry<T, E, F>(policy: &RetryPolicy, mut op: F) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Result<T, Failure<E>>,
    E: std::error::Error + 'static,
{
    let start = Instant::now();
    let mut attempt = 1u32;
    loop {
        let last = match op(attempt) {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!("operation succeeded on attempt {}", attempt);
                }
                return Ok(value);
            }
            Err(Failure::Permanent(e)) => {
                tracing::debug!("attempt {} failed permanently: {}", attempt, e);
                return Err(RetryError::Permanent(e));
            }
            Err(Failure::Transient(e)) => e,
        };

        let (delay, last) = admit(policy, attempt, start.elapsed(), last)?;
        let cancelled = match &policy.cancel {
            Some(token) => token.wait_timeout(delay),
            None => {
                std::thread::sleep(delay);
                false
            }
        };
        attempt = next_attempt(attempt, cancelled, last)?;
    }
}

/// Async form of [`do_retry`].
pub async fn do_retry_async<T, E, F, Fut, I>(op: F, options: I) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, Failure<E>>>,
    E: std::error::Error + 'static,
    I: IntoIterator<Item = RetryOption>,
{
    let policy = RetryPolicy::from_options(options);
    run_with_retry_async(&policy, op).await
}

/// Async form of [`do_temporary_error`].
pub async fn do_temporary_error_async<T, E, F, Fut, I>(
    mut op: F,
    options: I,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Classify,
    I: IntoIterator<Item = RetryOption>,
{
    do_retry_async(
        |attempt| {
            let fut = op(attempt);
            async move { fut.await.map_err(Failure::classify) }
        },
        options,
    )
    .await
}

/// Async form of [`run_with_retry`]. Waits with `tokio::time::sleep`, raced
/// against the cancel token.
pub async fn run_with_retry_async<T, E, F, Fut>(
    policy: &RetryPolicy,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, Failure<E>>>,
    E: std::error::Error + 'static,
{
    let start = tokio::time::Instant::now();
    let mut attempt = 1u32;
    loop {
        let last = match op(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!("operation succeeded on attempt {}", attempt);
                }
                return Ok(value);
            }
            Err(Failure::Permanent(e)) => {
                tracing::debug!("attempt {} failed permanently: {}", attempt, e);
                return Err(RetryError::Permanent(e));
            }
            Err(Failure::Transient(e)) => e,
        };

        let (delay, last) = admit(policy, attempt, start.elapsed(), last)?;
        let cancelled = match &policy.cancel {
            Some(token) => tokio::select! {
                _ = tokio::time::sleep(delay) => false,
                _ = token.cancelled() => true,
            },
            None => {
                tokio::time::sleep(delay).await;
                false
            }
        };
        attempt = next_attempt(attempt, cancelled, last)?;
    }
}

/// Retry-admission check after a transient failure on `attempt`.
/// Hands `last` back with the delay so a cancelled wait can still report it.
fn admit<E>(
    policy: &RetryPolicy,
    attempt: u32,
    elapsed: Duration,
    last: E,
) -> Result<(Duration, E), RetryError<E>>
where
    E: std::error::Error + 'static,
{
    if policy.cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
        tracing::debug!("retry cancelled after attempt {}", attempt);
        return Err(RetryError::Cancelled {
            attempts: attempt,
            last,
        });
    }
    match policy.decide(attempt, elapsed) {
        RetryDecision::RetryAfter(delay) => {
            tracing::debug!(
                "attempt {} failed: {}; retrying in {:?}",
                attempt,
                last,
                delay
            );
            Ok((delay, last))
        }
        RetryDecision::Stop(StopReason::Exhausted) => {
            tracing::warn!("giving up after {} attempts: {}", attempt, last);
            Err(RetryError::Exhausted {
                attempts: attempt,
                last,
            })
        }
        RetryDecision::Stop(StopReason::DeadlineExceeded) => {
            tracing::warn!(
                "retry deadline exceeded after {} attempts ({:?}): {}",
                attempt,
                elapsed,
                last
            );
            Err(RetryError::DeadlineExceeded {
                attempts: attempt,
                elapsed,
                last,
            })
        }
    }
}

fn next_attempt<E>(attempt: u32, cancelled: bool, last: E) -> Result<u32, RetryError<E>>
where
    E: std::error::Error + 'static,
{
    if cancelled {
        tracing::debug!("retry wait cancelled after attempt {}", attempt);
        return Err(RetryError::Cancelled {
            attempts: attempt,
            last,
        });
    }
    attempt.checked_add(1).ok_or(RetryError::Exhausted {
        attempts: attempt,
        last,
    })
}
