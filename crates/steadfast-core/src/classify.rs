//! Failure classification.
//!
//! Errors reach the classifier as `&dyn Error`, so any error type can flow
//! through the retry executor. The default classifier recognises the crate's
//! own error types and `std::io::Error` anywhere in the `source()` chain;
//! everything else is [`FailureKind::Unknown`].

use std::error::Error;
use std::io;
use std::time::Duration;

use crate::error::{AttemptTimeout, Cancelled, OperationError};

/// Broad category of a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Request or attempt timeout.
    Timeout,
    /// Rate limiting or backpressure.
    RateLimited,
    /// 5xx-class server failure.
    Server,
    /// Transient transport failure.
    Network,
    /// Missing or invalid credentials.
    Unauthorized,
    /// Authenticated but not allowed.
    Forbidden,
    /// Malformed request.
    BadRequest,
    /// Resource does not exist (yet).
    NotFound,
    /// Conflicting concurrent modification.
    Conflict,
    /// Explicit cancellation.
    Cancelled,
    /// Not recognised.
    Unknown,
}

impl FailureKind {
    /// Default retry decision for this kind at a 0-based attempt index.
    ///
    /// `NotFound` is retried only after the very first attempt, `Conflict`
    /// only after the first two.
    pub fn is_retryable_at(self, attempt: u32) -> bool {
        match self {
            FailureKind::Timeout
            | FailureKind::RateLimited
            | FailureKind::Server
            | FailureKind::Network
            | FailureKind::Unknown => true,
            FailureKind::NotFound => attempt == 0,
            FailureKind::Conflict => attempt < 2,
            FailureKind::Unauthorized
            | FailureKind::Forbidden
            | FailureKind::BadRequest
            | FailureKind::Cancelled => false,
        }
    }
}

/// Classify an error by walking its `source()` chain.
///
/// The first recognised error in the chain decides the kind. A custom
/// `io::Error` is unwrapped to its payload, so
/// `io::Error::other(OperationError::..)` classifies like the inner error.
pub fn classify(error: &(dyn Error + 'static)) -> FailureKind {
    let mut current = Some(error);
    while let Some(err) = current {
        if let Some(kind) = classify_one(err) {
            return kind;
        }
        current = next_in_chain(err);
    }
    FailureKind::Unknown
}

/// The next error to inspect. `io::Error::source` skips its own payload and
/// returns the payload's source, so the payload is visited first.
fn next_in_chain<'a>(err: &'a (dyn Error + 'static)) -> Option<&'a (dyn Error + 'static)> {
    if let Some(inner) = err.downcast_ref::<io::Error>().and_then(io::Error::get_ref) {
        return Some(inner as &(dyn Error + 'static));
    }
    err.source()
}

fn classify_one(err: &(dyn Error + 'static)) -> Option<FailureKind> {
    if let Some(op) = err.downcast_ref::<OperationError>() {
        return Some(op.kind());
    }
    if err.is::<AttemptTimeout>() {
        return Some(FailureKind::Timeout);
    }
    if err.is::<Cancelled>() {
        return Some(FailureKind::Cancelled);
    }
    if let Some(io_err) = err.downcast_ref::<io::Error>() {
        return classify_io(io_err.kind());
    }
    None
}

fn classify_io(kind: io::ErrorKind) -> Option<FailureKind> {
    match kind {
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::NetworkUnreachable
        | io::ErrorKind::HostUnreachable => Some(FailureKind::Network),
        io::ErrorKind::TimedOut => Some(FailureKind::Timeout),
        io::ErrorKind::PermissionDenied => Some(FailureKind::Forbidden),
        io::ErrorKind::NotFound => Some(FailureKind::NotFound),
        io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData => Some(FailureKind::BadRequest),
        io::ErrorKind::Interrupted => Some(FailureKind::Cancelled),
        _ => None,
    }
}

/// The classifier used when a policy does not supply one.
pub fn default_is_retryable(error: &(dyn Error + 'static), attempt: u32) -> bool {
    classify(error).is_retryable_at(attempt)
}

/// A server-provided "retry after" hint, if one is present in the chain.
pub fn retry_after_hint(error: &(dyn Error + 'static)) -> Option<Duration> {
    let mut current = Some(error);
    while let Some(err) = current {
        if let Some(op) = err.downcast_ref::<OperationError>() {
            return op.retry_after();
        }
        current = next_in_chain(err);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NetworkCode;
    use rstest::rstest;

    #[derive(Debug, thiserror::Error)]
    #[error("loading record failed")]
    struct Wrapped(#[source] OperationError);

    #[rstest]
    #[case(OperationError::RequestTimeout("slow".into()), 0, true)]
    #[case(OperationError::RateLimit { retry_after: None }, 5, true)]
    #[case(OperationError::Server { status: 502, message: "bad gateway".into() }, 3, true)]
    #[case(OperationError::Network { code: NetworkCode::DnsTemporary, message: "dns".into() }, 1, true)]
    #[case(OperationError::Authentication("expired".into()), 0, false)]
    #[case(OperationError::PermissionDenied("nope".into()), 0, false)]
    #[case(OperationError::BadRequest("missing id".into()), 0, false)]
    #[case(OperationError::NotFound("row".into()), 0, true)]
    #[case(OperationError::NotFound("row".into()), 1, false)]
    #[case(OperationError::Conflict("version".into()), 1, true)]
    #[case(OperationError::Conflict("version".into()), 2, false)]
    #[case(OperationError::Cancelled, 0, false)]
    #[case(OperationError::Other("weird".into()), 0, true)]
    fn test_default_classifier(
        #[case] error: OperationError,
        #[case] attempt: u32,
        #[case] expected: bool,
    ) {
        assert_eq!(default_is_retryable(&error, attempt), expected);
    }

    #[rstest]
    #[case(io::ErrorKind::ConnectionReset, FailureKind::Network)]
    #[case(io::ErrorKind::NetworkUnreachable, FailureKind::Network)]
    #[case(io::ErrorKind::TimedOut, FailureKind::Timeout)]
    #[case(io::ErrorKind::PermissionDenied, FailureKind::Forbidden)]
    #[case(io::ErrorKind::Other, FailureKind::Unknown)]
    #[case(io::ErrorKind::InvalidData, FailureKind::BadRequest)]
    fn test_io_errors(#[case] kind: io::ErrorKind, #[case] expected: FailureKind) {
        let err = io::Error::new(kind, "io");
        assert_eq!(classify(&err), expected);
    }

    #[test]
    fn test_source_chain_is_walked() {
        let err = Wrapped(OperationError::Authentication("expired".into()));
        assert_eq!(classify(&err), FailureKind::Unauthorized);
        assert!(!default_is_retryable(&err, 0));
    }

    #[rstest]
    #[case(OperationError::Authentication("expired".into()), FailureKind::Unauthorized, false)]
    #[case(OperationError::BadRequest("schema".into()), FailureKind::BadRequest, false)]
    #[case(OperationError::Cancelled, FailureKind::Cancelled, false)]
    #[case(OperationError::from_status(503, "down"), FailureKind::Server, true)]
    fn test_operation_error_inside_io_error(
        #[case] inner: OperationError,
        #[case] expected: FailureKind,
        #[case] retryable: bool,
    ) {
        let err = io::Error::other(inner);

        assert_eq!(classify(&err), expected);
        assert_eq!(default_is_retryable(&err, 0), retryable);
    }

    #[test]
    fn test_io_kind_wins_over_payload() {
        let err = io::Error::new(
            io::ErrorKind::ConnectionReset,
            OperationError::Authentication("expired".into()),
        );
        assert_eq!(classify(&err), FailureKind::Network);
    }

    #[test]
    fn test_timeout_and_cancel_markers() {
        let timeout = AttemptTimeout {
            timeout: Duration::from_secs(1),
        };
        assert_eq!(classify(&timeout), FailureKind::Timeout);
        assert!(default_is_retryable(&timeout, 4));
        assert!(!default_is_retryable(&Cancelled, 0));
    }

    #[test]
    fn test_retry_after_hint_through_chain() {
        let err = Wrapped(OperationError::RateLimit {
            retry_after: Some(Duration::from_secs(2)),
        });
        assert_eq!(retry_after_hint(&err), Some(Duration::from_secs(2)));
        assert_eq!(retry_after_hint(&io::Error::other("x")), None);

        let wrapped = io::Error::other(OperationError::RateLimit {
            retry_after: Some(Duration::from_secs(9)),
        });
        assert_eq!(retry_after_hint(&wrapped), Some(Duration::from_secs(9)));
    }
}
