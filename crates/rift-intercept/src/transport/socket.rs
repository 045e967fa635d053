//! Synthetic transport bound to one intercepted request.
//!
//! No socket is ever opened. The transport only produces the connection-level
//! events a real one would (connect, secure connect, drain, timeout) through
//! the owning request's context.

use crate::request::{RequestContext, RequestEvent};
use crate::schedule;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Default)]
struct SocketState {
    timeout: Option<Duration>,
    total_delay: Duration,
    connected: bool,
    destroyed: bool,
}

pub struct SyntheticSocket {
    secure: bool,
    state: Mutex<SocketState>,
    request: Arc<RequestContext>,
}

impl SyntheticSocket {
    pub(crate) fn new(secure: bool, request: Arc<RequestContext>) -> Self {
        Self {
            secure,
            state: Mutex::new(SocketState::default()),
            request,
        }
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// Emit connect (and secure connect) on the next scheduling turn.
    pub(crate) async fn connect(&self) {
        schedule::next_turn().await;
        {
            let mut state = self.state.lock();
            if state.connected || state.destroyed {
                return;
            }
            state.connected = true;
        }
        if self.request.emit(RequestEvent::Connect) && self.secure {
            self.request.emit(RequestEvent::SecureConnect);
        }
    }

    pub fn set_timeout(&self, timeout: Duration) {
        self.state.lock().timeout = Some(timeout);
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.state.lock().timeout
    }

    /// Accumulated artificial delay applied so far.
    pub fn total_delay(&self) -> Duration {
        self.state.lock().total_delay
    }

    /// Add artificial delay without sleeping.
    ///
    /// Emits a timeout once the accumulated delay exceeds the configured
    /// timeout. Returns whether a timeout was emitted.
    pub fn apply_delay(&self, delay: Duration) -> bool {
        let timed_out = {
            let mut state = self.state.lock();
            if state.destroyed {
                return false;
            }
            state.total_delay += delay;
            matches!(state.timeout, Some(timeout) if state.total_delay > timeout)
        };
        if timed_out {
            debug!(
                delay_ms = delay.as_millis() as u64,
                "socket delay exceeded timeout"
            );
            return self.request.emit(RequestEvent::Timeout);
        }
        false
    }

    /// Acknowledge a write with a deferred drain.
    pub(crate) async fn acknowledge_write(&self) {
        schedule::immediate().await;
        if !self.state.lock().destroyed {
            self.request.emit(RequestEvent::Drain);
        }
    }

    /// Tear the transport down. Idempotent.
    pub fn destroy(&self) -> bool {
        let mut state = self.state.lock();
        if state.destroyed {
            return false;
        }
        state.destroyed = true;
        true
    }

    pub fn is_destroyed(&self) -> bool {
        self.state.lock().destroyed
    }
}
