//! Terminal retry errors and the connection sentinels the classifier knows.

use std::time::Duration;

/// Outcome of a retry sequence that did not succeed.
///
/// Every variant carries the last error the operation returned; the engine
/// never replaces it with a synthetic "gave up" error.
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E>
where
    E: std::error::Error + 'static,
{
    /// The operation reported a failure that must not be retried.
    #[error(transparent)]
    Permanent(E),
    /// The attempt limit was reached while failures were still transient.
    #[error("retry exhausted after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: E,
    },
    /// The overall deadline elapsed (or the next wait would overrun it).
    #[error("retry deadline exceeded after {attempts} attempts ({elapsed:?}): {last}")]
    DeadlineExceeded {
        attempts: u32,
        elapsed: Duration,
        #[source]
        last: E,
    },
    /// The cancel token fired before or during an inter-attempt wait.
    #[error("retry cancelled after {attempts} attempts: {last}")]
    Cancelled {
        attempts: u32,
        #[source]
        last: E,
    },
}

impl<E> RetryError<E>
where
    E: std::error::Error + 'static,
{
    /// The last error returned by the operation.
    pub fn last(&self) -> &E {
        match self {
            RetryError::Permanent(e) => e,
            RetryError::Exhausted { last, .. }
            | RetryError::DeadlineExceeded { last, .. }
            | RetryError::Cancelled { last, .. } => last,
        }
    }

    pub fn into_last(self) -> E {
        match self {
            RetryError::Permanent(e) => e,
            RetryError::Exhausted { last, .. }
            | RetryError::DeadlineExceeded { last, .. }
            | RetryError::Cancelled { last, .. } => last,
        }
    }

    /// Number of attempts made; `None` for a permanent failure, which does not
    /// record how far the sequence got.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            RetryError::Permanent(_) => None,
            RetryError::Exhausted { attempts, .. }
            | RetryError::DeadlineExceeded { attempts, .. }
            | RetryError::Cancelled { attempts, .. } => Some(*attempts),
        }
    }

    /// True when the budget (attempts or deadline) ran out on transient errors.
    pub fn is_exhausted(&self) -> bool {
        matches!(
            self,
            RetryError::Exhausted { .. } | RetryError::DeadlineExceeded { .. }
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RetryError::Cancelled { .. })
    }
}

/// Well-known "this connection is dead" failures.
///
/// Drivers and connection wrappers return these so callers can retry on a
/// fresh connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConnError {
    /// Operation attempted on a connection that was already closed.
    #[error("connection is already closed")]
    Closed,
    /// Driver reported the connection as bad or stale.
    #[error("driver: bad connection")]
    BadConn,
}
