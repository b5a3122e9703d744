use std::time::Duration;

use rand::Rng;

use crate::retry::cancel::CancelToken;

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// Same delay before every retry.
    Fixed(Duration),
    /// `initial + step * (n - 1)` before the n-th retry.
    Linear { initial: Duration, step: Duration },
    /// `initial * multiplier^(n - 1)` before the n-th retry.
    Exponential { initial: Duration, multiplier: f64 },
}

impl Backoff {
    /// Exponential doubling from `initial`.
    pub const fn exponential(initial: Duration) -> Self {
        Backoff::Exponential {
            initial,
            multiplier: 2.0,
        }
    }

    /// Uncapped delay before the `retry`-th retry (1-based; retry 1 follows
    /// attempt 1).
    pub fn delay(&self, retry: u32) -> Duration {
        let n = retry.max(1) - 1;
        match *self {
            Backoff::Fixed(d) => d,
            Backoff::Linear { initial, step } => initial.saturating_add(step.saturating_mul(n)),
            Backoff::Exponential {
                initial,
                multiplier,
            } => {
                if initial.is_zero() {
                    return Duration::ZERO;
                }
                let factor = multiplier.max(1.0).powi(n.min(i32::MAX as u32) as i32);
                // Overflowing or non-finite products saturate.
                Duration::try_from_secs_f64(initial.as_secs_f64() * factor).unwrap_or(Duration::MAX)
            }
        }
    }
}

/// Why the policy refused another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// `max_attempts` reached.
    Exhausted,
    /// The deadline has passed or the next wait would overrun it.
    DeadlineExceeded,
}

/// Decision returned by the retry policy after a transient failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Stop and surface the last error.
    Stop(StopReason),
    /// Retry after the given delay.
    RetryAfter(Duration),
}

/// Resolved retry configuration for one retry sequence.
///
/// Built from [`RetryPolicy::DEFAULT`] plus a list of [`RetryOption`]s and not
/// changed afterwards.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first). 0 = unlimited.
    pub max_attempts: u32,
    pub backoff: Backoff,
    /// Upper bound on any single delay, after jitter.
    pub max_delay: Duration,
    /// Fraction in `[0, 1]`; delays are drawn uniformly from `d ± d*jitter`.
    pub jitter: f64,
    /// Cap on wall-clock time spent in the sequence, checked before each wait.
    pub deadline: Option<Duration>,
    pub cancel: Option<CancelToken>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl RetryPolicy {
    pub const DEFAULT: RetryPolicy = RetryPolicy {
        max_attempts: 5,
        backoff: Backoff::exponential(Duration::from_millis(250)),
        max_delay: Duration::from_secs(30),
        jitter: 0.0,
        deadline: None,
        cancel: None,
    };

    /// Apply `options` in order to a copy of the default policy.
    pub fn from_options<I>(options: I) -> Self
    where
        I: IntoIterator<Item = RetryOption>,
    {
        let mut policy = Self::DEFAULT;
        for opt in options {
            opt.apply(&mut policy);
        }
        policy
    }

    /// Apply further options on top of this policy.
    pub fn with<I>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = RetryOption>,
    {
        for opt in options {
            opt.apply(&mut self);
        }
        self
    }

    /// Deterministic delay before the attempt following `attempt`, capped at
    /// `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff.delay(attempt).min(self.max_delay)
    }

    /// Perturb `delay` by up to ±`jitter`, capped at `max_delay`.
    pub fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter <= 0.0 || delay.is_zero() {
            return delay;
        }
        let secs = delay.as_secs_f64();
        let spread = secs * self.jitter;
        let lo = (secs - spread).max(0.0);
        let hi = secs + spread;
        let picked = rand::rng().random_range(lo..=hi);
        Duration::try_from_secs_f64(picked)
            .unwrap_or(delay)
            .min(self.max_delay)
    }

    /// Decide what happens after attempt `attempt` (1-based) failed
    /// transiently, `elapsed` into the sequence.
    pub fn decide(&self, attempt: u32, elapsed: Duration) -> RetryDecision {
        if self.max_attempts != 0 && attempt >= self.max_attempts {
            return RetryDecision::Stop(StopReason::Exhausted);
        }
        let delay = self.jittered(self.delay_for(attempt));
        if let Some(deadline) = self.deadline {
            if elapsed >= deadline || elapsed.saturating_add(delay) > deadline {
                return RetryDecision::Stop(StopReason::DeadlineExceeded);
            }
        }
        RetryDecision::RetryAfter(delay)
    }
}

/// One mutation of a [`RetryPolicy`]. Later options override earlier ones
/// targeting the same field.
#[derive(Debug, Clone)]
pub enum RetryOption {
    MaxAttempts(u32),
    Backoff(Backoff),
    Jitter(f64),
    Deadline(Duration),
    MaxDelay(Duration),
    Cancel(CancelToken),
}

impl RetryOption {
    pub fn apply(self, policy: &mut RetryPolicy) {
        match self {
            RetryOption::MaxAttempts(n) => policy.max_attempts = n,
            RetryOption::Backoff(b) => policy.backoff = b,
            RetryOption::Jitter(j) => {
                policy.jitter = if j.is_finite() { j.clamp(0.0, 1.0) } else { 0.0 };
            }
            RetryOption::Deadline(d) => policy.deadline = Some(d),
            RetryOption::MaxDelay(d) => policy.max_delay = d,
            RetryOption::Cancel(token) => policy.cancel = Some(token),
        }
    }
}

/// Cap total attempts (including the first); 0 means unlimited.
pub fn with_max_attempts(n: u32) -> RetryOption {
    RetryOption::MaxAttempts(n)
}

pub fn with_backoff(backoff: Backoff) -> RetryOption {
    RetryOption::Backoff(backoff)
}

/// Randomize each delay within ±`fraction` of its computed value.
pub fn with_jitter(fraction: f64) -> RetryOption {
    RetryOption::Jitter(fraction)
}

/// Cap total wall-clock time spent retrying.
pub fn with_deadline(deadline: Duration) -> RetryOption {
    RetryOption::Deadline(deadline)
}

pub fn with_max_delay(max_delay: Duration) -> RetryOption {
    RetryOption::MaxDelay(max_delay)
}

/// Interrupt waits (and stop the sequence) when `token` is cancelled.
pub fn with_cancel(token: CancelToken) -> RetryOption {
    RetryOption::Cancel(token)
}
