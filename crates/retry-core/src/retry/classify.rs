//! Classify errors as transient (worth retrying) or permanent.
//!
//! The verdict is derived from the root of an error's `source()` chain:
//! transport failures (io, curl), dead-connection sentinels and database
//! errors whose SQLSTATE class is `40` (transaction rollback) or `08`
//! (connection exception) are transient. Everything else is permanent, and
//! an error that reports itself as a client error is never retried.

use std::error::Error as StdError;
use std::io;

use crate::retry::error::{ConnError, RetryError};

/// Upper bound on how many `source()` links are followed.
pub const MAX_CAUSE_DEPTH: usize = 32;

/// Retry verdict for a single error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transience {
    /// Likely to succeed if the same operation is retried unchanged.
    Transient,
    /// Deterministic failure; retrying cannot help.
    Permanent,
}

impl Transience {
    pub fn is_transient(self) -> bool {
        self == Transience::Transient
    }
}

/// Errors the classifier accepts.
///
/// The provided `client_error` reports `false`. A caller's error type
/// overrides it to mark failures that are the caller's fault (validation
/// errors and the like), which vetoes retries even when the same error wraps
/// a network failure.
pub trait Classify: StdError + 'static {
    fn client_error(&self) -> bool {
        false
    }
}

impl Classify for io::Error {}
impl Classify for sqlx::Error {}
impl Classify for curl::Error {}
impl Classify for ConnError {}

impl<E: Classify> Classify for RetryError<E> {
    fn client_error(&self) -> bool {
        self.last().client_error()
    }
}

/// Determine whether `err` is temporary, and thus the action can be retried.
pub fn is_temporary<E: Classify>(err: &E) -> bool {
    if err.client_error() {
        return false;
    }
    classify_chain(err, 0).is_transient()
}

/// `is_temporary` for a whole result: success has nothing to retry.
pub fn is_temporary_result<T, E: Classify>(result: &Result<T, E>) -> bool {
    match result {
        Ok(_) => false,
        Err(e) => is_temporary(e),
    }
}

/// Classify a type-erased error (e.g. the inside of an `anyhow::Error`).
/// Such errors cannot carry the client-error veto.
pub fn is_temporary_error(err: &(dyn StdError + 'static)) -> bool {
    classify_chain(err, 0).is_transient()
}

/// Walk `source()` to the innermost error.
///
/// The walk stops at a `sqlx::Error` (its sources are driver internals), on a
/// self-referential link, or after `MAX_CAUSE_DEPTH` steps.
pub fn root_cause<'a>(err: &'a (dyn StdError + 'static)) -> &'a (dyn StdError + 'static) {
    let mut cause = err;
    for _ in 0..MAX_CAUSE_DEPTH {
        if cause.is::<sqlx::Error>() {
            break;
        }
        match cause.source() {
            Some(next) if !same_error(next, cause) => cause = next,
            _ => break,
        }
    }
    cause
}

fn same_error(a: &(dyn StdError + 'static), b: &(dyn StdError + 'static)) -> bool {
    (a as *const dyn StdError).cast::<()>() == (b as *const dyn StdError).cast::<()>()
}

fn classify_chain(err: &(dyn StdError + 'static), depth: usize) -> Transience {
    let cause = root_cause(err);

    if let Some(e) = cause.downcast_ref::<io::Error>() {
        return classify_io_error_at(e, depth);
    }
    if let Some(e) = cause.downcast_ref::<curl::Error>() {
        return classify_curl_error(e);
    }
    if cause.is::<ConnError>() {
        return Transience::Transient;
    }
    if let Some(e) = cause.downcast_ref::<sqlx::Error>() {
        return classify_sqlx_error(e);
    }
    Transience::Permanent
}

/// Classify an io error: connection-level kinds are transient.
pub fn classify_io_error(e: &io::Error) -> Transience {
    classify_io_error_at(e, 0)
}

fn classify_io_error_at(e: &io::Error, depth: usize) -> Transience {
    use io::ErrorKind::*;
    match e.kind() {
        ConnectionRefused | ConnectionReset | ConnectionAborted | NotConnected | AddrInUse
        | AddrNotAvailable | BrokenPipe | TimedOut | Interrupted | UnexpectedEof
        | WouldBlock => Transience::Transient,
        // io::Error::source() skips a custom payload, so look at it directly.
        _ => match e.get_ref() {
            Some(inner) if depth < MAX_CAUSE_DEPTH => classify_chain(inner, depth + 1),
            _ => Transience::Permanent,
        },
    }
}

/// Classify a curl error: timeouts, connect/resolve failures and broken
/// transfers are transient.
pub fn classify_curl_error(e: &curl::Error) -> Transience {
    if e.is_operation_timedout()
        || e.is_couldnt_connect()
        || e.is_couldnt_resolve_host()
        || e.is_couldnt_resolve_proxy()
        || e.is_recv_error()
        || e.is_send_error()
        || e.is_got_nothing()
    {
        return Transience::Transient;
    }
    Transience::Permanent
}

/// Classify a database error.
///
/// Transport failures and dead-pool/worker sentinels are transient, as are
/// backend errors in SQLSTATE classes `40` and `08`.
pub fn classify_sqlx_error(e: &sqlx::Error) -> Transience {
    match e {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolClosed
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::WorkerCrashed => Transience::Transient,
        sqlx::Error::Database(db) => match db.code() {
            Some(code) if is_transient_sqlstate(&code) => Transience::Transient,
            _ => Transience::Permanent,
        },
        _ => Transience::Permanent,
    }
}

/// The two-character class of a five-character SQLSTATE code.
pub fn sqlstate_class(code: &str) -> Option<&str> {
    if code.len() == 5 && code.bytes().all(|b| b.is_ascii_alphanumeric()) {
        Some(&code[..2])
    } else {
        None
    }
}

/// Class 40 (Transaction Rollback) and class 08 (Connection Exception) are
/// the SQLSTATE classes where retrying is expected to succeed.
pub fn is_transient_sqlstate(code: &str) -> bool {
    matches!(sqlstate_class(code), Some("40" | "08"))
}

/// Human-readable name of a PostgreSQL SQLSTATE class.
pub fn sqlstate_class_name(class: &str) -> Option<&'static str> {
    let name = match class {
        "00" => "Successful Completion",
        "01" => "Warning",
        "02" => "No Data",
        "08" => "Connection Exception",
        "0A" => "Feature Not Supported",
        "22" => "Data Exception",
        "23" => "Integrity Constraint Violation",
        "25" => "Invalid Transaction State",
        "28" => "Invalid Authorization Specification",
        "40" => "Transaction Rollback",
        "42" => "Syntax Error or Access Rule Violation",
        "53" => "Insufficient Resources",
        "54" => "Program Limit Exceeded",
        "55" => "Object Not In Prerequisite State",
        "57" => "Operator Intervention",
        "58" => "System Error",
        "XX" => "Internal Error",
        _ => return None,
    };
    Some(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::borrow::Cow;
    use std::fmt;

    #[derive(Debug)]
    struct FakeDbError(&'static str);

    impl fmt::Display for FakeDbError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "database error {}", self.0)
        }
    }

    impl StdError for FakeDbError {}

    impl sqlx::error::DatabaseError for FakeDbError {
        fn message(&self) -> &str {
            "fake database error"
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            Some(Cow::Borrowed(self.0))
        }

        fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn StdError + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn StdError + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> sqlx::error::ErrorKind {
            sqlx::error::ErrorKind::Other
        }
    }

    fn db_error(code: &'static str) -> sqlx::Error {
        sqlx::Error::Database(Box::new(FakeDbError(code)))
    }

    #[derive(Debug, thiserror::Error)]
    #[error("query failed")]
    struct QueryFailed(#[source] Box<dyn StdError + Send + Sync>);

    impl Classify for QueryFailed {}

    #[derive(Debug, thiserror::Error)]
    #[error("invalid input")]
    struct InvalidInput(#[source] io::Error);

    impl Classify for InvalidInput {
        fn client_error(&self) -> bool {
            true
        }
    }

    #[derive(Debug, thiserror::Error)]
    #[error("loops forever")]
    struct SelfSource;

    impl Classify for SelfSource {}

    impl SelfSource {
        fn as_dyn(&self) -> &(dyn StdError + 'static) {
            self
        }
    }

    #[derive(Debug)]
    struct Cyclic;

    impl fmt::Display for Cyclic {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "cyclic")
        }
    }

    impl StdError for Cyclic {
        fn source(&self) -> Option<&(dyn StdError + 'static)> {
            Some(self)
        }
    }

    impl Classify for Cyclic {}

    #[test]
    fn ok_result_is_not_temporary() {
        let r: Result<(), io::Error> = Ok(());
        assert!(!is_temporary_result(&r));
    }

    #[test]
    fn client_error_vetoes_wrapped_network_error() {
        let err = InvalidInput(io::Error::from(io::ErrorKind::ConnectionReset));
        assert!(!is_temporary(&err));
    }

    #[test]
    fn wrapped_network_error_is_temporary() {
        let err = QueryFailed(Box::new(io::Error::from(io::ErrorKind::TimedOut)));
        assert!(is_temporary(&err));
    }

    #[test]
    fn other_io_kinds_are_permanent() {
        assert!(!is_temporary(&io::Error::from(io::ErrorKind::NotFound)));
        assert!(!is_temporary(&io::Error::from(io::ErrorKind::PermissionDenied)));
    }

    #[test]
    fn io_error_payload_is_classified() {
        let err = io::Error::new(io::ErrorKind::Other, ConnError::BadConn);
        assert!(is_temporary(&err));
        let err = io::Error::new(io::ErrorKind::Other, "plain message");
        assert!(!is_temporary(&err));
    }

    #[test]
    fn connection_sentinels_are_temporary() {
        assert!(is_temporary(&ConnError::Closed));
        assert!(is_temporary(&ConnError::BadConn));
        assert!(is_temporary(&sqlx::Error::PoolClosed));
        assert!(is_temporary(&sqlx::Error::WorkerCrashed));
        assert!(is_temporary(&sqlx::Error::PoolTimedOut));
        assert!(is_temporary(&QueryFailed(Box::new(ConnError::Closed))));
    }

    #[test]
    fn curl_transport_errors_are_temporary() {
        // CURLE_OPERATION_TIMEDOUT, CURLE_COULDNT_CONNECT, CURLE_COULDNT_RESOLVE_HOST
        for code in [28, 7, 6] {
            let err = curl::Error::new(code);
            assert_eq!(classify_curl_error(&err), Transience::Transient, "{err}");
            assert!(is_temporary(&err));
        }
        assert!(is_temporary(&QueryFailed(Box::new(curl::Error::new(28)))));
    }

    #[test]
    fn curl_local_errors_are_permanent() {
        // CURLE_URL_MALFORMAT, CURLE_READ_ERROR
        for code in [3, 26] {
            let err = curl::Error::new(code);
            assert_eq!(classify_curl_error(&err), Transience::Permanent, "{err}");
            assert!(!is_temporary(&err));
        }
    }

    #[test]
    fn sqlx_transport_errors_are_temporary() {
        let io_err = || sqlx::Error::Io(io::Error::from(io::ErrorKind::ConnectionReset));
        assert!(is_temporary(&io_err()));
        assert!(is_temporary(&QueryFailed(Box::new(io_err()))));
        let tls = sqlx::Error::Tls(Box::new(io::Error::from(io::ErrorKind::UnexpectedEof)));
        assert!(is_temporary(&tls));
        assert_eq!(classify_sqlx_error(&io_err()), Transience::Transient);
    }

    #[test]
    fn sqlstate_rollback_and_connection_classes_are_temporary() {
        assert!(is_temporary(&db_error("40001")));
        assert!(is_temporary(&db_error("40P01")));
        assert!(is_temporary(&db_error("08006")));
        assert!(is_temporary(&QueryFailed(Box::new(db_error("40001")))));
    }

    #[test]
    fn other_sqlstate_classes_are_permanent() {
        assert!(!is_temporary(&db_error("23505")));
        assert!(!is_temporary(&db_error("42601")));
        assert!(!is_temporary(&sqlx::Error::RowNotFound));
    }

    #[test]
    fn sqlstate_class_requires_five_chars() {
        assert_eq!(sqlstate_class("40001"), Some("40"));
        assert_eq!(sqlstate_class("08"), None);
        assert_eq!(sqlstate_class("400012"), None);
        assert_eq!(sqlstate_class("40-01"), None);
        assert!(!is_transient_sqlstate(""));
        assert_eq!(sqlstate_class_name("40"), Some("Transaction Rollback"));
        assert_eq!(sqlstate_class_name("ZZ"), None);
    }

    #[test]
    fn foreign_errors_are_permanent() {
        assert!(!is_temporary(&SelfSource));
        assert!(!is_temporary_error(SelfSource.as_dyn()));
    }

    #[test]
    fn self_referential_chain_terminates() {
        assert!(!is_temporary(&Cyclic));
        let root = root_cause(&Cyclic);
        assert!(root.is::<Cyclic>());
    }

    #[test]
    fn deep_chain_is_bounded() {
        let mut err: Box<dyn StdError + Send + Sync> =
            Box::new(io::Error::from(io::ErrorKind::ConnectionReset));
        for _ in 0..MAX_CAUSE_DEPTH * 2 {
            err = Box::new(QueryFailed(err));
        }
        let err = QueryFailed(err);
        // The walk gives up before reaching the io error at the bottom.
        assert!(!is_temporary(&err));
    }

    #[test]
    fn retry_error_forwards_client_verdict() {
        let err = RetryError::Permanent(InvalidInput(io::Error::from(
            io::ErrorKind::ConnectionReset,
        )));
        assert!(err.client_error());
        assert!(!is_temporary(&err));
    }
}
