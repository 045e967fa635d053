//! Per-request shared state.
//!
//! Everything observable about one request goes through a single lock: the
//! live head, buffered writes, the aborted timestamp, the state machine and
//! every outgoing event. An event is never emitted after abort, and abort
//! itself emits exactly once.

use super::events::{RequestEvent, RequestState};
use super::response::{BodySender, InterceptedResponse, ResponseBody, ResponseHead};
use crate::error::InterceptError;
use crate::target::RequestHead;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::trace;

pub(crate) type ResponseSender = oneshot::Sender<Result<InterceptedResponse, InterceptError>>;
pub(crate) type ResponseReceiver = oneshot::Receiver<Result<InterceptedResponse, InterceptError>>;

struct Inner {
    head: RequestHead,
    buffers: Vec<Bytes>,
    ended: bool,
    aborted_at: Option<Instant>,
    state: RequestState,
    events: mpsc::UnboundedSender<RequestEvent>,
    response: Option<ResponseSender>,
    body: Option<BodySender>,
}

impl Inner {
    fn emit(&self, event: RequestEvent) {
        trace!(event = event.name(), "request event");
        // The caller may have dropped its event receiver
        let _ = self.events.send(event);
    }

    fn transition(&mut self, next: RequestState) -> bool {
        if self.state.can_transition_to(next) {
            trace!(from = ?self.state, to = ?next, "request state");
            self.state = next;
            true
        } else {
            false
        }
    }

    /// Deliver an error to whoever is waiting: the pending response, or the
    /// body stream once the response has been handed out.
    fn deliver_error(&mut self, error: InterceptError) {
        if let Some(response) = self.response.take() {
            let _ = response.send(Err(error));
        } else if let Some(body) = self.body.take() {
            let _ = body.send(Err(error));
        }
    }
}

/// Finalized snapshot of the request taken when it ends.
pub(crate) struct Finalized {
    pub head: RequestHead,
    pub body: Bytes,
}

pub(crate) struct RequestContext {
    inner: Mutex<Inner>,
    cancel: CancellationToken,
}

impl RequestContext {
    pub fn new(
        head: RequestHead,
    ) -> (
        Self,
        mpsc::UnboundedReceiver<RequestEvent>,
        ResponseReceiver,
    ) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (response_tx, response_rx) = oneshot::channel();
        let ctx = Self {
            inner: Mutex::new(Inner {
                head,
                buffers: Vec::new(),
                ended: false,
                aborted_at: None,
                state: RequestState::Writing,
                events: events_tx,
                response: Some(response_tx),
                body: None,
            }),
            cancel: CancellationToken::new(),
        };
        (ctx, events_rx, response_rx)
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.lock().aborted_at.is_some()
    }

    pub fn aborted_at(&self) -> Option<Instant> {
        self.inner.lock().aborted_at
    }

    pub fn state(&self) -> RequestState {
        self.inner.lock().state
    }

    pub fn head(&self) -> RequestHead {
        self.inner.lock().head.clone()
    }

    pub fn with_head<R>(&self, f: impl FnOnce(&mut RequestHead) -> R) -> R {
        f(&mut self.inner.lock().head)
    }

    /// Buffer a chunk written by the caller.
    pub fn buffer(&self, chunk: Bytes) -> Result<(), InterceptError> {
        let mut inner = self.inner.lock();
        if inner.aborted_at.is_some() {
            return Err(InterceptError::AbortedRequest);
        }
        if inner.ended {
            return Err(InterceptError::WriteAfterEnd);
        }
        inner.buffers.push(chunk);
        Ok(())
    }

    /// Mark the request as ended. Returns false if it already was.
    pub fn end(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.ended {
            return false;
        }
        inner.ended = true;
        inner.transition(RequestState::Ended);
        true
    }

    /// Snapshot the live head and concatenated body for matching.
    pub fn finalize(&self) -> Finalized {
        let mut inner = self.inner.lock();
        inner.ended = true;
        inner.transition(RequestState::Ended);
        inner.transition(RequestState::Matching);
        let mut body = BytesMut::new();
        for chunk in &inner.buffers {
            body.extend_from_slice(chunk);
        }
        Finalized {
            head: inner.head.clone(),
            body: body.freeze(),
        }
    }

    pub fn transition(&self, next: RequestState) -> bool {
        self.inner.lock().transition(next)
    }

    /// Emit an event unless the request was aborted.
    pub fn emit(&self, event: RequestEvent) -> bool {
        let inner = self.inner.lock();
        if inner.aborted_at.is_some() {
            return false;
        }
        inner.emit(event);
        true
    }

    /// Hand the response head to the caller and open the body stream.
    pub fn respond(&self, head: ResponseHead) -> bool {
        let mut inner = self.inner.lock();
        if inner.aborted_at.is_some() || inner.state.is_terminal() {
            return false;
        }
        inner.transition(RequestState::Responding);
        let (body_tx, body) = ResponseBody::channel();
        inner.body = Some(body_tx);
        inner.emit(RequestEvent::Response(head.clone()));
        if let Some(response) = inner.response.take() {
            let _ = response.send(Ok(InterceptedResponse { head, body }));
        }
        true
    }

    /// Push one body chunk downstream.
    pub fn push_chunk(&self, chunk: Bytes) -> bool {
        let inner = self.inner.lock();
        if inner.aborted_at.is_some() {
            return false;
        }
        inner.emit(RequestEvent::Data(chunk.clone()));
        if let Some(body) = &inner.body {
            let _ = body.send(Ok(chunk));
        }
        true
    }

    /// End of body, then close.
    pub fn finish(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.aborted_at.is_some() || inner.state.is_terminal() {
            return false;
        }
        inner.emit(RequestEvent::End);
        inner.body = None;
        inner.transition(RequestState::Closed);
        inner.emit(RequestEvent::Close);
        true
    }

    /// Fail the request with a request-time error.
    pub fn fail(&self, error: InterceptError) -> bool {
        let mut inner = self.inner.lock();
        if inner.aborted_at.is_some() || inner.state.is_terminal() {
            return false;
        }
        inner.emit(RequestEvent::Error(error.clone()));
        inner.deliver_error(error);
        inner.body = None;
        inner.transition(RequestState::Closed);
        inner.emit(RequestEvent::Close);
        true
    }

    /// Abort the request. Only the first call has any effect.
    pub fn abort(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.aborted_at.is_some() || inner.state == RequestState::Closed {
            return false;
        }
        inner.aborted_at = Some(Instant::now());
        inner.transition(RequestState::Aborted);
        inner.emit(RequestEvent::Abort);
        inner.emit(RequestEvent::Error(InterceptError::AbortedRequest));
        inner.deliver_error(InterceptError::AbortedRequest);
        inner.body = None;
        inner.emit(RequestEvent::Close);
        drop(inner);
        self.cancel.cancel();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> (
        RequestContext,
        mpsc::UnboundedReceiver<RequestEvent>,
        ResponseReceiver,
    ) {
        RequestContext::new(RequestHead::get("http://x.test/").unwrap())
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<RequestEvent>) -> Vec<&'static str> {
        let mut names = Vec::new();
        while let Ok(event) = rx.try_recv() {
            names.push(event.name());
        }
        names
    }

    #[test]
    fn test_abort_is_idempotent() {
        let (ctx, mut events, _response) = context();
        assert!(ctx.abort());
        assert!(!ctx.abort());
        assert_eq!(drain(&mut events), vec!["abort", "error", "close"]);
        assert!(ctx.cancellation().is_cancelled());
    }

    #[test]
    fn test_abort_rejects_writes() {
        let (ctx, _events, _response) = context();
        ctx.abort();
        assert!(matches!(
            ctx.buffer(Bytes::from_static(b"x")),
            Err(InterceptError::AbortedRequest)
        ));
        assert!(!ctx.emit(RequestEvent::Drain));
    }

    #[test]
    fn test_write_after_end() {
        let (ctx, _events, _response) = context();
        ctx.buffer(Bytes::from_static(b"a")).unwrap();
        assert!(ctx.end());
        assert!(!ctx.end());
        assert!(matches!(
            ctx.buffer(Bytes::from_static(b"b")),
            Err(InterceptError::WriteAfterEnd)
        ));
    }

    #[test]
    fn test_finalize_concatenates_buffers() {
        let (ctx, _events, _response) = context();
        ctx.buffer(Bytes::from_static(b"he")).unwrap();
        ctx.buffer(Bytes::from_static(b"llo")).unwrap();
        let finalized = ctx.finalize();
        assert_eq!(finalized.body, Bytes::from_static(b"hello"));
        assert_eq!(ctx.state(), RequestState::Matching);
    }

    #[tokio::test]
    async fn test_abort_after_response_errors_body() {
        let (ctx, mut events, response) = context();
        ctx.transition(RequestState::Ended);
        ctx.transition(RequestState::Matching);
        ctx.transition(RequestState::Replying);
        assert!(ctx.respond(ResponseHead::new(200)));
        assert!(ctx.push_chunk(Bytes::from_static(b"first")));
        ctx.abort();
        assert!(!ctx.push_chunk(Bytes::from_static(b"second")));

        let response = response.await.unwrap().unwrap();
        let err = response.bytes().await.unwrap_err();
        assert!(matches!(err, InterceptError::AbortedRequest));
        assert_eq!(
            drain(&mut events),
            vec!["response", "data", "abort", "error", "close"]
        );
    }

    #[test]
    fn test_abort_after_close_is_noop() {
        let (ctx, mut events, _response) = context();
        ctx.fail(InterceptError::AbortedRequest);
        assert!(!ctx.abort());
        assert_eq!(drain(&mut events), vec!["error", "close"]);
    }
}
