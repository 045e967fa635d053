//! Intercepted outgoing requests.
//!
//! [`InterceptedRequest`] is the caller's handle: it buffers writes, exposes
//! the live head, and resolves to an [`InterceptedResponse`] on
//! [`end`](InterceptedRequest::end). Everything observable is driven by a
//! single task per request (see `driver`), started when the request is created.

mod captured;
mod driver;
mod events;
mod lifecycle;
mod response;

#[cfg(test)]
mod tests;

pub use captured::CapturedRequest;
pub use events::{RequestEvent, RequestState};
pub use response::{InterceptedResponse, ResponseBody, ResponseHead};

pub(crate) use lifecycle::RequestContext;

use crate::context::InterceptContext;
use crate::error::InterceptError;
use crate::metrics;
use crate::target::RequestHead;
use crate::transport::SyntheticSocket;
use bytes::Bytes;
use lifecycle::ResponseReceiver;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// Create the request and spawn its driver on the current runtime.
pub(crate) fn start(
    ctx: InterceptContext,
    head: RequestHead,
) -> Result<InterceptedRequest, InterceptError> {
    let runtime = tokio::runtime::Handle::try_current().map_err(|_| InterceptError::NoRuntime)?;
    let secure = head.target.protocol.is_secure();
    debug!("Intercepting {} {}", head.method, head.url());

    let (context, events, response) = RequestContext::new(head);
    let context = Arc::new(context);
    let socket = Arc::new(SyntheticSocket::new(secure, Arc::clone(&context)));
    let (finalize_tx, finalize_rx) = oneshot::channel();

    runtime.spawn(driver::drive(
        ctx,
        Arc::clone(&context),
        Arc::clone(&socket),
        finalize_rx,
    ));

    Ok(InterceptedRequest {
        context,
        socket,
        events: Some(events),
        response,
        finalize: finalize_tx,
    })
}

/// Handle to an in-flight intercepted request.
pub struct InterceptedRequest {
    context: Arc<RequestContext>,
    socket: Arc<SyntheticSocket>,
    events: Option<mpsc::UnboundedReceiver<RequestEvent>>,
    response: ResponseReceiver,
    finalize: oneshot::Sender<()>,
}

impl InterceptedRequest {
    /// Snapshot of the live request head.
    pub fn head(&self) -> RequestHead {
        self.context.head()
    }

    /// Set a header; the value in effect when the request ends is the one matched.
    pub fn set_header(&self, name: impl Into<String>, value: impl Into<String>) {
        let (name, value) = (name.into(), value.into());
        self.context.with_head(|head| head.headers.set(name, value));
    }

    pub fn remove_header(&self, name: &str) {
        self.context.with_head(|head| head.headers.remove(name));
    }

    /// Take the event receiver. Only the first call returns it.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<RequestEvent>> {
        self.events.take()
    }

    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            context: Arc::clone(&self.context),
            socket: Arc::clone(&self.socket),
        }
    }

    /// Timeout compared against the accumulated socket delay.
    pub fn set_timeout(&self, timeout: Duration) {
        self.socket.set_timeout(timeout);
    }

    pub fn socket(&self) -> &SyntheticSocket {
        &self.socket
    }

    pub fn state(&self) -> RequestState {
        self.context.state()
    }

    pub fn is_aborted(&self) -> bool {
        self.context.is_aborted()
    }

    pub fn aborted_at(&self) -> Option<Instant> {
        self.context.aborted_at()
    }

    /// Buffer a body chunk. Resolves once the write is acknowledged.
    pub async fn write(&mut self, chunk: impl Into<Bytes>) -> Result<(), InterceptError> {
        self.context.buffer(chunk.into())?;
        self.socket.acknowledge_write().await;
        Ok(())
    }

    /// Finish the request and wait for the response head.
    ///
    /// Request-time failures (no match, blocked connection, abort, reply
    /// errors) surface here, or on the body stream once the head was delivered.
    pub async fn end(self) -> Result<InterceptedResponse, InterceptError> {
        let InterceptedRequest {
            context,
            response,
            finalize,
            ..
        } = self;
        context.end();
        // The driver is gone only if the runtime is shutting down
        let _ = finalize.send(());
        match response.await {
            Ok(result) => result,
            Err(_) if context.is_aborted() => Err(InterceptError::AbortedRequest),
            Err(_) => Err(InterceptError::DriverTerminated),
        }
    }

    /// Write `body` and end the request.
    pub async fn send(mut self, body: impl Into<Bytes>) -> Result<InterceptedResponse, InterceptError> {
        let body = body.into();
        if !body.is_empty() {
            self.write(body).await?;
        }
        self.end().await
    }

    pub fn abort(&self) -> bool {
        self.abort_handle().abort()
    }
}

/// Aborts a request from anywhere, including after `end` consumed the request.
#[derive(Clone)]
pub struct AbortHandle {
    context: Arc<RequestContext>,
    socket: Arc<SyntheticSocket>,
}

impl AbortHandle {
    /// Abort the request. Only the first call emits anything.
    pub fn abort(&self) -> bool {
        self.socket.destroy();
        let aborted = self.context.abort();
        if aborted {
            debug!("Request aborted");
            metrics::record_abort();
        }
        aborted
    }

    pub fn is_aborted(&self) -> bool {
        self.context.is_aborted()
    }
}
