//! Error types for retried operations.
//!
//! [`OperationError`] is a ready-made error for remote calls whose variants the
//! default classifier understands. [`RetryError`] is what the retry executor
//! hands back once it gives up: always the *last* observed failure, together
//! with the number of attempts that were made.

use std::time::Duration;
use thiserror::Error;

use crate::classify::FailureKind;

/// Transient network failure codes recognised by the default classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkCode {
    /// Peer reset the connection (`ECONNRESET`).
    ConnectionReset,
    /// Temporary DNS resolution failure (`EAI_AGAIN`).
    DnsTemporary,
    /// Socket-level timeout (`ETIMEDOUT`).
    TimedOut,
    /// No route to the network (`ENETUNREACH`).
    NetworkUnreachable,
}

impl NetworkCode {
    /// Parse a conventional errno-style code name.
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "ECONNRESET" => Some(NetworkCode::ConnectionReset),
            "EAI_AGAIN" => Some(NetworkCode::DnsTemporary),
            "ETIMEDOUT" => Some(NetworkCode::TimedOut),
            "ENETUNREACH" => Some(NetworkCode::NetworkUnreachable),
            _ => None,
        }
    }

    /// The errno-style name of this code.
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkCode::ConnectionReset => "ECONNRESET",
            NetworkCode::DnsTemporary => "EAI_AGAIN",
            NetworkCode::TimedOut => "ETIMEDOUT",
            NetworkCode::NetworkUnreachable => "ENETUNREACH",
        }
    }
}

impl std::fmt::Display for NetworkCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a remote call, shaped after HTTP status classes.
#[derive(Debug, Error)]
pub enum OperationError {
    /// Malformed request (400, 422).
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Authentication failed (401).
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Permission denied (403).
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Resource not found (404).
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Request timed out on the server side (408).
    #[error("Request timeout: {0}")]
    RequestTimeout(String),

    /// Conflict (409).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Rate limit or backpressure signal (429).
    #[error("Rate limit exceeded")]
    RateLimit {
        /// Time to wait before retrying, if the server said so
        retry_after: Option<Duration>,
    },

    /// Server-side failure (5xx).
    #[error("Server error (status {status}): {message}")]
    Server {
        /// HTTP status code
        status: u16,
        /// Error message
        message: String,
    },

    /// Transport-level failure.
    #[error("Network error ({code}): {message}")]
    Network {
        /// Transient network code
        code: NetworkCode,
        /// Error message
        message: String,
    },

    /// The caller cancelled the operation.
    #[error("Operation cancelled")]
    Cancelled,

    /// Anything not covered above.
    #[error("{0}")]
    Other(String),
}

impl OperationError {
    /// Map an HTTP status code and message onto an error variant.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            400 | 422 => OperationError::BadRequest(message),
            401 => OperationError::Authentication(message),
            403 => OperationError::PermissionDenied(message),
            404 => OperationError::NotFound(message),
            408 => OperationError::RequestTimeout(message),
            409 => OperationError::Conflict(message),
            429 => OperationError::RateLimit { retry_after: None },
            500..=599 => OperationError::Server { status, message },
            _ => OperationError::Other(format!("status {status}: {message}")),
        }
    }

    /// Build a network error from an errno-style code, falling back to `Other`
    /// for codes that are not considered transient.
    pub fn network(code: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        match NetworkCode::from_code(code) {
            Some(code) => OperationError::Network { code, message },
            None => OperationError::Other(format!("{code}: {message}")),
        }
    }

    /// Failure category used by the default classifier.
    pub fn kind(&self) -> FailureKind {
        match self {
            OperationError::BadRequest(_) => FailureKind::BadRequest,
            OperationError::Authentication(_) => FailureKind::Unauthorized,
            OperationError::PermissionDenied(_) => FailureKind::Forbidden,
            OperationError::NotFound(_) => FailureKind::NotFound,
            OperationError::RequestTimeout(_) => FailureKind::Timeout,
            OperationError::Conflict(_) => FailureKind::Conflict,
            OperationError::RateLimit { .. } => FailureKind::RateLimited,
            OperationError::Server { .. } => FailureKind::Server,
            OperationError::Network { .. } => FailureKind::Network,
            OperationError::Cancelled => FailureKind::Cancelled,
            OperationError::Other(_) => FailureKind::Unknown,
        }
    }

    /// Whether the default classifier would retry this error on the first attempt.
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable_at(0)
    }

    /// Get retry delay if this is a rate limit error with retry-after.
    pub fn retry_after(&self) -> Option<Duration> {
        if let OperationError::RateLimit { retry_after } = self {
            *retry_after
        } else {
            None
        }
    }
}

/// A single attempt did not settle within its per-attempt timeout.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("attempt timed out after {timeout:?}")]
pub struct AttemptTimeout {
    /// The per-attempt timeout that elapsed
    pub timeout: Duration,
}

/// The retry loop observed a cancellation signal.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("operation cancelled")]
pub struct Cancelled;

/// Final failure raised by the retry executor.
///
/// Carries the last attempt's failure, never the first one.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// The operation itself failed.
    #[error("{source} (after {attempts} attempt(s))")]
    Operation {
        /// Last error returned by the operation
        source: E,
        /// Attempts made, including the first
        attempts: u32,
    },

    /// The last attempt exceeded its per-attempt timeout.
    #[error("attempt timed out after {timeout:?} (after {attempts} attempt(s))")]
    Timeout {
        /// The per-attempt timeout
        timeout: Duration,
        /// Attempts made, including the first
        attempts: u32,
    },

    /// A cancellation signal stopped the retry loop.
    #[error("operation cancelled (after {attempts} attempt(s))")]
    Cancelled {
        /// Attempts started before cancellation was observed
        attempts: u32,
    },
}

impl<E> RetryError<E> {
    /// Number of attempts that were started.
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Operation { attempts, .. }
            | RetryError::Timeout { attempts, .. }
            | RetryError::Cancelled { attempts } => *attempts,
        }
    }

    /// The operation's own error, if the last failure came from it.
    pub fn operation_error(&self) -> Option<&E> {
        match self {
            RetryError::Operation { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Consume and return the operation's own error, if any.
    pub fn into_operation_error(self) -> Option<E> {
        match self {
            RetryError::Operation { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Whether the loop ended because of a per-attempt timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, RetryError::Timeout { .. })
    }

    /// Whether the loop ended because of cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RetryError::Cancelled { .. })
    }
}

/// Invalid or unparsable configuration.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    /// A value violates an invariant.
    #[error("Invalid configuration for '{field}': {reason}")]
    Invalid {
        /// Offending field
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },

    /// An environment variable could not be parsed.
    #[error("Environment variable {var} has invalid value '{value}'")]
    Env {
        /// Variable name
        var: &'static str,
        /// Raw value found
        value: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status_mapping() {
        assert!(matches!(
            OperationError::from_status(401, "no"),
            OperationError::Authentication(_)
        ));
        assert!(matches!(
            OperationError::from_status(422, "bad field"),
            OperationError::BadRequest(_)
        ));
        assert!(matches!(
            OperationError::from_status(503, "busy"),
            OperationError::Server { status: 503, .. }
        ));
        assert!(matches!(
            OperationError::from_status(429, "slow down"),
            OperationError::RateLimit { retry_after: None }
        ));
        assert!(matches!(
            OperationError::from_status(418, "teapot"),
            OperationError::Other(_)
        ));
    }

    #[test]
    fn test_network_code_parsing() {
        assert!(matches!(
            OperationError::network("EAI_AGAIN", "dns"),
            OperationError::Network {
                code: NetworkCode::DnsTemporary,
                ..
            }
        ));
        assert!(matches!(
            OperationError::network("EACCES", "denied"),
            OperationError::Other(_)
        ));
        assert_eq!(NetworkCode::ConnectionReset.to_string(), "ECONNRESET");
    }

    #[test]
    fn test_retry_after_only_on_rate_limit() {
        let err = OperationError::RateLimit {
            retry_after: Some(Duration::from_secs(3)),
        };
        assert_eq!(err.retry_after(), Some(Duration::from_secs(3)));
        assert_eq!(OperationError::Cancelled.retry_after(), None);
    }

    #[test]
    fn test_retry_error_accessors() {
        let err: RetryError<OperationError> = RetryError::Operation {
            source: OperationError::NotFound("loan 7".into()),
            attempts: 2,
        };
        assert_eq!(err.attempts(), 2);
        assert!(err.to_string().contains("loan 7"));
        assert!(matches!(
            err.into_operation_error(),
            Some(OperationError::NotFound(_))
        ));

        let err: RetryError<OperationError> = RetryError::Timeout {
            timeout: Duration::from_millis(50),
            attempts: 3,
        };
        assert!(err.is_timeout());
        assert!(err.operation_error().is_none());
    }
}
