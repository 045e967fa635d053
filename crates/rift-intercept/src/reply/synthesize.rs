//! Turns a matched expectation and the captured request into a response.

use super::full::parse_full_reply;
use super::types::{BodyCallback, BodyStream, FullReplyCallback, Reply, ReplyBody};
use crate::error::InterceptError;
use crate::expectation::Expectation;
use crate::headers::{is_content_encoded, is_encoding, HeaderFn, HeaderList, HeaderValueSource, ReplyHeaders};
use crate::request::{CapturedRequest, ResponseHead};
use bytes::Bytes;
use futures::FutureExt;
use std::any::Any;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;
use tracing::debug;

/// How the body reaches the caller.
pub enum ResponseSource {
    /// Buffered chunks, emitted one per scheduling turn
    Chunks(VecDeque<Bytes>),
    Stream(BodyStream),
}

impl std::fmt::Debug for ResponseSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResponseSource::Chunks(chunks) => f.debug_tuple("Chunks").field(chunks).finish(),
            ResponseSource::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

#[derive(Debug)]
pub struct SynthesizedReply {
    pub head: ResponseHead,
    pub body: ResponseSource,
}

#[derive(Debug)]
pub enum Synthesis {
    Reply(SynthesizedReply),
    /// Raise `error` once `delay` has elapsed
    Error {
        error: InterceptError,
        delay: Duration,
    },
}

/// Build the reply for `record`.
pub async fn synthesize(
    record: &Expectation,
    request: &CapturedRequest,
) -> Result<Synthesis, InterceptError> {
    let options = record.options();
    let (status, body, extra_headers) = match record.reply() {
        Reply::Error(error) => {
            return Ok(Synthesis::Error {
                error: error.clone(),
                delay: options.delay_connection + options.delay_body,
            })
        }
        Reply::Static { status, body } => (*status, ReplyBody::from(body.clone()), HeaderList::new()),
        Reply::Buffer { status, bytes } => (*status, ReplyBody::Bytes(bytes.clone()), HeaderList::new()),
        Reply::Stream { status, factory } => (*status, ReplyBody::Stream(factory()), HeaderList::new()),
        Reply::Callback { status, callback } => {
            (*status, invoke_body_callback(callback, request).await?, HeaderList::new())
        }
        Reply::FullReply(callback) => {
            let value = invoke_full_callback(callback, request).await?;
            let full = parse_full_reply(value)?;
            (full.status, full.body, full.headers)
        }
    };

    // Declared headers first, then full-reply headers; dynamic values are
    // placeholders until the body is known.
    let mut headers = HeaderList::new();
    let mut dynamic: Vec<(usize, HeaderFn)> = Vec::new();
    for (name, value) in record.reply_headers() {
        push_header(&mut headers, &mut dynamic, name, value);
    }
    for (name, value) in extra_headers.iter() {
        headers.push(name, value);
    }

    let defaults = &record.scope().options().default_reply_headers;
    let encoded = is_content_encoded(&headers)
        || (!headers.contains("content-encoding") && default_encoding(defaults));
    let body = encode_body(body, &mut headers, encoded, request.binary, options.delay_body)?;

    for (name, value) in defaults {
        if !headers.contains(name) {
            push_header(&mut headers, &mut dynamic, name, value);
        }
    }

    let mut head = ResponseHead { status, headers };
    if !dynamic.is_empty() {
        let body_bytes: Vec<u8> = match &body {
            ResponseSource::Chunks(chunks) => chunks.iter().flat_map(|c| c.iter().copied()).collect(),
            ResponseSource::Stream(_) => Vec::new(),
        };
        for (index, f) in dynamic {
            let value = catch_unwind(AssertUnwindSafe(|| f(request, &head, &body_bytes)))
                .map_err(|panic| callback_panic("header function", panic))?;
            head.headers.set_value_at(index, value);
        }
    }

    debug!(
        "Synthesized {} reply {} for expectation {}",
        record.reply().kind(),
        head.status,
        record.id()
    );
    Ok(Synthesis::Reply(SynthesizedReply { head, body }))
}

/// A static scope default that will supply `Content-Encoding`.
fn default_encoding(defaults: &ReplyHeaders) -> bool {
    defaults.iter().any(|(name, value)| {
        name.eq_ignore_ascii_case("content-encoding")
            && matches!(value, HeaderValueSource::Static(v) if is_encoding(v))
    })
}

fn push_header(
    headers: &mut HeaderList,
    dynamic: &mut Vec<(usize, HeaderFn)>,
    name: &str,
    value: &HeaderValueSource,
) {
    match value {
        HeaderValueSource::Static(v) => headers.push(name, v.as_str()),
        HeaderValueSource::Dynamic(f) => {
            dynamic.push((headers.len(), f.clone()));
            headers.push(name, "");
        }
    }
}

async fn invoke_body_callback(
    callback: &BodyCallback,
    request: &CapturedRequest,
) -> Result<ReplyBody, InterceptError> {
    let result = match callback {
        BodyCallback::Sync(f) => catch_unwind(AssertUnwindSafe(|| f(request))),
        BodyCallback::Async(f) => {
            let f = f.clone();
            let request = request.clone();
            AssertUnwindSafe(async move { f(request).await })
                .catch_unwind()
                .await
        }
    };
    match result {
        Ok(Ok(body)) => Ok(body),
        Ok(Err(e)) => Err(InterceptError::UserCallbackFailure(e.to_string())),
        Err(panic) => Err(callback_panic("reply callback", panic)),
    }
}

async fn invoke_full_callback(
    callback: &FullReplyCallback,
    request: &CapturedRequest,
) -> Result<serde_json::Value, InterceptError> {
    let result = match callback {
        FullReplyCallback::Sync(f) => catch_unwind(AssertUnwindSafe(|| f(request))),
        FullReplyCallback::Async(f) => {
            let f = f.clone();
            let request = request.clone();
            AssertUnwindSafe(async move { f(request).await })
                .catch_unwind()
                .await
        }
    };
    match result {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(InterceptError::UserCallbackFailure(e.to_string())),
        Err(panic) => Err(callback_panic("full reply callback", panic)),
    }
}

fn callback_panic(what: &str, panic: Box<dyn Any + Send>) -> InterceptError {
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    InterceptError::UserCallbackFailure(format!("{what} panicked: {message}"))
}

/// Resolve the body into its delivery form, adjusting headers as needed.
fn encode_body(
    body: ReplyBody,
    headers: &mut HeaderList,
    encoded: bool,
    binary_request: bool,
    delay_body: Duration,
) -> Result<ResponseSource, InterceptError> {
    if let ReplyBody::Stream(stream) = body {
        return Ok(ResponseSource::Stream(stream));
    }

    if encoded {
        if !delay_body.is_zero() {
            return Err(InterceptError::UnsupportedCombination(
                "body delay is not supported with content-encoded replies".to_string(),
            ));
        }
        let chunks = match body {
            ReplyBody::Empty => VecDeque::new(),
            ReplyBody::Text(text) => VecDeque::from([decode_hex_chunk(&text)]),
            ReplyBody::Chunks(chunks) => chunks.iter().map(|c| decode_hex_chunk(c)).collect(),
            ReplyBody::Bytes(bytes) => VecDeque::from([bytes]),
            ReplyBody::Json(_) => {
                return Err(InterceptError::MalformedReply(
                    "content-encoded replies need pre-encoded hex chunks, not JSON".to_string(),
                ))
            }
            ReplyBody::Stream(_) => VecDeque::new(),
        };
        return Ok(ResponseSource::Chunks(chunks));
    }

    let chunks: VecDeque<Bytes> = match body {
        ReplyBody::Empty => VecDeque::new(),
        ReplyBody::Text(text) if binary_request => VecDeque::from([reinterpret_text(text)]),
        ReplyBody::Text(text) => VecDeque::from([Bytes::from(text)]),
        ReplyBody::Json(value) => {
            if !headers.contains("content-type") {
                headers.push("Content-Type", "application/json");
            }
            VecDeque::from([Bytes::from(value.to_string())])
        }
        ReplyBody::Bytes(bytes) => VecDeque::from([bytes]),
        ReplyBody::Chunks(chunks) => chunks.iter().map(|c| decode_hex_chunk(c)).collect(),
        ReplyBody::Stream(_) => VecDeque::new(),
    };
    Ok(ResponseSource::Chunks(
        chunks.into_iter().filter(|c| !c.is_empty()).collect(),
    ))
}

fn decode_hex_chunk(chunk: &str) -> Bytes {
    match hex::decode(chunk) {
        Ok(bytes) => Bytes::from(bytes),
        Err(_) => Bytes::copy_from_slice(chunk.as_bytes()),
    }
}

/// A textual reply to a binary request is tried as hex first.
///
/// Falls back to the UTF-8 bytes when decoding fails, yields nothing, or
/// does not cover the whole string.
fn reinterpret_text(text: String) -> Bytes {
    match hex::decode(&text) {
        Ok(decoded) if !decoded.is_empty() && decoded.len() * 2 == text.len() => Bytes::from(decoded),
        _ => Bytes::from(text),
    }
}
