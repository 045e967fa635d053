//! Lifecycle vocabulary of an intercepted request.

use super::response::ResponseHead;
use crate::error::InterceptError;
use bytes::Bytes;

/// Observable event on an intercepted request, in emission order.
#[derive(Debug, Clone)]
pub enum RequestEvent {
    /// Synthetic connection established
    Connect,
    /// TLS handshake finished (https targets only)
    SecureConnect,
    /// A write was acknowledged
    Drain,
    /// Accumulated socket delay exceeded the configured timeout
    Timeout,
    Response(ResponseHead),
    Data(Bytes),
    /// End of the response body
    End,
    Abort,
    Error(InterceptError),
    Close,
}

impl RequestEvent {
    pub fn name(&self) -> &'static str {
        match self {
            RequestEvent::Connect => "connect",
            RequestEvent::SecureConnect => "secureConnect",
            RequestEvent::Drain => "drain",
            RequestEvent::Timeout => "timeout",
            RequestEvent::Response(_) => "response",
            RequestEvent::Data(_) => "data",
            RequestEvent::End => "end",
            RequestEvent::Abort => "abort",
            RequestEvent::Error(_) => "error",
            RequestEvent::Close => "close",
        }
    }
}

/// Internal states of the request state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Writing,
    Ended,
    Matching,
    Replying,
    Unmatched,
    Responding,
    Closed,
    Aborted,
}

impl RequestState {
    pub fn can_transition_to(self, next: RequestState) -> bool {
        use RequestState::*;
        match (self, next) {
            (Closed, _) | (Aborted, _) => false,
            (_, Aborted) => true,
            (Writing, Ended) => true,
            (Ended, Matching) => true,
            (Matching, Replying) | (Matching, Unmatched) => true,
            (Replying, Responding) | (Unmatched, Responding) => true,
            // Failures close the request straight from any live state
            (_, Closed) => true,
            _ => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RequestState::Closed | RequestState::Aborted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        use RequestState::*;
        let path = [Writing, Ended, Matching, Replying, Responding, Closed];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{:?}", pair);
        }
    }

    #[test]
    fn test_abort_from_any_live_state() {
        use RequestState::*;
        for state in [Writing, Ended, Matching, Replying, Unmatched, Responding] {
            assert!(state.can_transition_to(Aborted));
        }
        assert!(!Closed.can_transition_to(Aborted));
        assert!(!Aborted.can_transition_to(Aborted));
    }

    #[test]
    fn test_no_skipping_ahead() {
        use RequestState::*;
        assert!(!Writing.can_transition_to(Matching));
        assert!(!Ended.can_transition_to(Responding));
        assert!(!Replying.can_transition_to(Unmatched));
    }
}
