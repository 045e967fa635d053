//! Error types for request interception.
//!
//! Every failure an intercepted request can run into is one variant of
//! [`InterceptError`]. Request-time errors are delivered asynchronously (as a
//! [`RequestEvent::Error`](crate::RequestEvent::Error) and as the `Err` of the
//! pending response), setup errors are returned synchronously.

use std::sync::Arc;

/// Boxed error returned by user reply callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Closed set of error kinds, useful for matching without destructuring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    UnmatchedRequest,
    NetworkPolicyViolation,
    AbortedRequest,
    MalformedReply,
    UnsupportedCombination,
    UserCallbackFailure,
    InjectedError,
    Passthrough,
    AlreadyActive,
    EmptyTarget,
    InvalidTarget,
    NoRuntime,
    WriteAfterEnd,
    DriverTerminated,
}

/// Error types for intercepted requests
#[derive(Debug, Clone, thiserror::Error)]
pub enum InterceptError {
    #[error("No match for request {method} {url}")]
    UnmatchedRequest { method: String, url: String },
    #[error("Disallowed real connection to {host}")]
    NetworkPolicyViolation { host: String },
    #[error("socket hang up")]
    AbortedRequest,
    #[error("Malformed reply: {0}")]
    MalformedReply(String),
    #[error("Unsupported reply combination: {0}")]
    UnsupportedCombination(String),
    #[error("Reply callback failed: {0}")]
    UserCallbackFailure(String),
    #[error("{message}")]
    InjectedError {
        message: String,
        code: Option<String>,
    },
    #[error("{0}")]
    Passthrough(Arc<dyn std::error::Error + Send + Sync>),
    #[error("Interception is already active")]
    AlreadyActive,
    #[error("Request target must not be empty")]
    EmptyTarget,
    #[error("Invalid request target '{0}'")]
    InvalidTarget(String),
    #[error("Intercepted requests must be created inside a tokio runtime")]
    NoRuntime,
    #[error("write after end")]
    WriteAfterEnd,
    #[error("Request driver stopped before producing a response")]
    DriverTerminated,
}

impl InterceptError {
    /// Wrap a failure from the real transport so it propagates unchanged.
    pub fn passthrough<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        InterceptError::Passthrough(Arc::new(error))
    }

    /// Build the error a record's error reply raises.
    pub fn injected(message: impl Into<String>) -> Self {
        InterceptError::InjectedError {
            message: message.into(),
            code: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            InterceptError::UnmatchedRequest { .. } => ErrorKind::UnmatchedRequest,
            InterceptError::NetworkPolicyViolation { .. } => ErrorKind::NetworkPolicyViolation,
            InterceptError::AbortedRequest => ErrorKind::AbortedRequest,
            InterceptError::MalformedReply(_) => ErrorKind::MalformedReply,
            InterceptError::UnsupportedCombination(_) => ErrorKind::UnsupportedCombination,
            InterceptError::UserCallbackFailure(_) => ErrorKind::UserCallbackFailure,
            InterceptError::InjectedError { .. } => ErrorKind::InjectedError,
            InterceptError::Passthrough(_) => ErrorKind::Passthrough,
            InterceptError::AlreadyActive => ErrorKind::AlreadyActive,
            InterceptError::EmptyTarget => ErrorKind::EmptyTarget,
            InterceptError::InvalidTarget(_) => ErrorKind::InvalidTarget,
            InterceptError::NoRuntime => ErrorKind::NoRuntime,
            InterceptError::WriteAfterEnd => ErrorKind::WriteAfterEnd,
            InterceptError::DriverTerminated => ErrorKind::DriverTerminated,
        }
    }

    /// Transport-style error code, when the error kind carries one.
    pub fn code(&self) -> Option<&str> {
        match self {
            InterceptError::UnmatchedRequest { .. } => Some("ERR_NO_MATCH"),
            InterceptError::NetworkPolicyViolation { .. } => Some("ENETUNREACH"),
            InterceptError::AbortedRequest => Some("ECONNRESET"),
            InterceptError::MalformedReply(_) => Some("ERR_MALFORMED_REPLY"),
            InterceptError::UnsupportedCombination(_) => Some("ERR_UNSUPPORTED_COMBINATION"),
            InterceptError::UserCallbackFailure(_) => Some("ERR_REPLY_CALLBACK"),
            InterceptError::InjectedError { code, .. } => code.as_deref(),
            InterceptError::WriteAfterEnd => Some("ERR_STREAM_WRITE_AFTER_END"),
            _ => None,
        }
    }

    /// HTTP-like status marker. Only unmatched requests carry one (404).
    pub fn status(&self) -> Option<u16> {
        match self {
            InterceptError::UnmatchedRequest { .. } => Some(404),
            _ => None,
        }
    }

    /// Setup errors are the only ones raised synchronously.
    pub fn is_setup_error(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::AlreadyActive
                | ErrorKind::EmptyTarget
                | ErrorKind::InvalidTarget
                | ErrorKind::NoRuntime
        )
    }
}
