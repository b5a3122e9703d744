//! Transient-error classification and the retry loop it feeds.
//!
//! `classify` decides whether an error is worth retrying; `policy` resolves
//! attempt limits, backoff, jitter and deadline from a list of options; `run`
//! drives the attempt loop (blocking and async). Each call resolves its own
//! policy, so concurrent callers share nothing but an optional cancel token.

mod cancel;
mod classify;
mod error;
mod policy;
mod run;

pub use cancel::CancelToken;
pub use classify::{
    classify_curl_error, classify_io_error, classify_sqlx_error, is_temporary, is_temporary_error,
    is_temporary_result, is_transient_sqlstate, root_cause, sqlstate_class, sqlstate_class_name,
    Classify, Transience, MAX_CAUSE_DEPTH,
};
pub use error::{ConnError, RetryError};
pub use policy::{
    with_backoff, with_cancel, with_deadline, with_jitter, with_max_attempts, with_max_delay,
    Backoff, RetryDecision, RetryOption, RetryPolicy, StopReason,
};
pub use run::{
    do_retry, do_retry_async, do_temporary_error, do_temporary_error_async, run_with_retry,
    run_with_retry_async, Failure,
};
