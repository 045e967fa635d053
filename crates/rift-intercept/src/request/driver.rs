//! The task that drives one intercepted request from connect to close.

use super::captured::CapturedRequest;
use super::events::RequestState;
use super::lifecycle::{Finalized, RequestContext};
use super::response::{InterceptedResponse, ResponseBody};
use crate::context::{InterceptContext, Resolution};
use crate::error::InterceptError;
use crate::expectation::Expectation;
use crate::metrics;
use crate::notify::ScopeEvent;
use crate::reply::{synthesize, ResponseSource, Synthesis};
use crate::schedule;
use crate::target::RequestHead;
use crate::transport::{OutboundRequest, SyntheticSocket};
use bytes::Bytes;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, warn};

pub(super) async fn drive(
    ctx: InterceptContext,
    request: Arc<RequestContext>,
    socket: Arc<SyntheticSocket>,
    finalize: oneshot::Receiver<()>,
) {
    socket.connect().await;

    let cancel = request.cancellation().clone();
    let ended = tokio::select! {
        biased;
        result = finalize => result.is_ok(),
        // Abort before end still finalizes
        _ = cancel.cancelled() => true,
    };
    if !ended && !request.is_aborted() {
        debug!("Request dropped before end");
        return;
    }

    let Finalized { head, body } = request.finalize();
    let captured = CapturedRequest::capture(&head, &body);

    if request.is_aborted() {
        if ctx.is_active() {
            if let Resolution::Matched(record) = ctx.resolve(&head, &captured) {
                debug!(
                    "Aborted request consumed expectation {}",
                    record.id()
                );
            }
        }
        metrics::record_request(&head.method, "aborted");
        return;
    }

    if !ctx.is_active() {
        debug!("Interception off, passing {} {} through", head.method, head.url());
        request.transition(RequestState::Unmatched);
        metrics::record_request(&head.method, "passthrough");
        passthrough(&ctx, &request, head, body).await;
        return;
    }

    match ctx.resolve(&head, &captured) {
        Resolution::Matched(record) => {
            metrics::record_request(&head.method, "matched");
            reply(&request, &socket, record, captured).await;
        }
        Resolution::Unmatched { pass_through } => {
            request.transition(RequestState::Unmatched);
            ctx.notify_no_match(captured);
            let authority = head.target.authority();
            if pass_through && ctx.is_net_connect_allowed(&authority) {
                debug!("No match for {} {}, passing through", head.method, head.url());
                metrics::record_request(&head.method, "passthrough");
                passthrough(&ctx, &request, head, body).await;
            } else if pass_through {
                warn!("Net connect not allowed for {}", authority);
                metrics::record_request(&head.method, "blocked");
                request.fail(InterceptError::NetworkPolicyViolation { host: authority });
            } else {
                debug!("No match for {} {}", head.method, head.url());
                metrics::record_request(&head.method, "unmatched");
                request.fail(InterceptError::UnmatchedRequest {
                    method: head.method.clone(),
                    url: head.url(),
                });
            }
        }
    }
}

/// Generate and emit the reply for a consumed record.
async fn reply(
    request: &RequestContext,
    socket: &SyntheticSocket,
    record: Arc<Expectation>,
    captured: CapturedRequest,
) {
    request.transition(RequestState::Replying);
    let scope = record.scope();
    scope.notify(ScopeEvent::Request {
        request: captured.clone(),
        expectation_id: record.id(),
        expectation: record.describe(),
        body: captured.parsed_body.clone(),
    });

    let cancel = request.cancellation().clone();
    let synthesized = match synthesize(&record, &captured).await {
        Ok(Synthesis::Reply(synthesized)) => synthesized,
        Ok(Synthesis::Error { error, delay }) => {
            metrics::record_delay("connection", delay);
            if schedule::timer(delay, &cancel).await {
                request.fail(error);
            }
            return;
        }
        Err(error) => {
            warn!("Reply for expectation {} failed: {}", record.id(), error);
            request.fail(error);
            return;
        }
    };

    let options = record.options();
    if !options.delay_socket.is_zero() {
        metrics::record_delay("socket", options.delay_socket);
        socket.apply_delay(options.delay_socket);
    }
    metrics::record_delay("connection", options.delay_connection);
    if !schedule::timer(options.delay_connection, &cancel).await {
        return;
    }

    let status = synthesized.head.status;
    if !request.respond(synthesized.head) {
        return;
    }

    metrics::record_delay("body", options.delay_body);
    if !schedule::timer(options.delay_body, &cancel).await {
        return;
    }

    match synthesized.body {
        ResponseSource::Chunks(chunks) => {
            for chunk in chunks {
                schedule::immediate().await;
                if !request.push_chunk(chunk) {
                    return;
                }
            }
        }
        ResponseSource::Stream(mut stream) => loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                next = stream.next() => next,
            };
            match next {
                Some(Ok(chunk)) => {
                    if !request.push_chunk(chunk) {
                        return;
                    }
                }
                Some(Err(e)) => {
                    warn!("Reply stream for expectation {} failed: {}", record.id(), e);
                    request.fail(InterceptError::UserCallbackFailure(format!(
                        "reply stream failed: {e}"
                    )));
                    return;
                }
                None => break,
            }
        },
    }

    if request.finish() {
        metrics::record_reply(status);
        scope.notify(ScopeEvent::Replied {
            request: captured,
            expectation_id: record.id(),
            expectation: record.describe(),
            status,
        });
    }
}

/// Hand the finalized request to the real transport and relay its response.
async fn passthrough(ctx: &InterceptContext, request: &RequestContext, head: RequestHead, body: Bytes) {
    let transport = ctx.transport();
    let cancel = request.cancellation().clone();
    let outbound = OutboundRequest::new(head).with_body(body);

    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        result = transport.send(outbound) => result,
    };
    let InterceptedResponse { head, body } = match result {
        Ok(response) => response,
        Err(error) => {
            debug!("Pass-through request failed: {}", error);
            request.fail(error);
            return;
        }
    };

    if request.respond(head) && relay(request, body).await {
        request.finish();
    }
}

/// Copy a real response body downstream. Returns false if the request ended early.
async fn relay(request: &RequestContext, mut body: ResponseBody) -> bool {
    let cancel = request.cancellation().clone();
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return false,
            next = body.next() => next,
        };
        match next {
            Some(Ok(chunk)) => {
                if !request.push_chunk(chunk) {
                    return false;
                }
            }
            Some(Err(error)) => {
                request.fail(error);
                return false;
            }
            None => return true,
        }
    }
}
