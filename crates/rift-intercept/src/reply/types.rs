//! Reply specifications attached to expectations.

use crate::error::{BoxError, InterceptError};
use crate::request::CapturedRequest;
use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt};
use futures::stream::BoxStream;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Streamed reply body.
pub type BodyStream = BoxStream<'static, Result<Bytes, std::io::Error>>;

/// Builds a fresh stream for each reply, so persisted expectations can reply more than once.
pub type StreamFactory = Arc<dyn Fn() -> BodyStream + Send + Sync>;

pub type SyncBodyFn = Arc<dyn Fn(&CapturedRequest) -> Result<ReplyBody, BoxError> + Send + Sync>;
pub type AsyncBodyFn =
    Arc<dyn Fn(CapturedRequest) -> BoxFuture<'static, Result<ReplyBody, BoxError>> + Send + Sync>;
pub type SyncFullFn = Arc<dyn Fn(&CapturedRequest) -> Result<Value, BoxError> + Send + Sync>;
pub type AsyncFullFn =
    Arc<dyn Fn(CapturedRequest) -> BoxFuture<'static, Result<Value, BoxError>> + Send + Sync>;

/// Body declared up front.
#[derive(Debug, Clone, PartialEq)]
pub enum StaticBody {
    Empty,
    Text(String),
    /// Serialized on reply, `Content-Type: application/json` added if absent
    Json(Value),
    /// Pre-encoded hex chunks, emitted one by one without re-splitting
    Chunks(Vec<String>),
}

impl From<&str> for StaticBody {
    fn from(text: &str) -> Self {
        StaticBody::Text(text.to_string())
    }
}

impl From<String> for StaticBody {
    fn from(text: String) -> Self {
        StaticBody::Text(text)
    }
}

impl From<Value> for StaticBody {
    fn from(value: Value) -> Self {
        StaticBody::Json(value)
    }
}

impl From<Vec<String>> for StaticBody {
    fn from(chunks: Vec<String>) -> Self {
        StaticBody::Chunks(chunks)
    }
}

/// Body produced by a callback.
pub enum ReplyBody {
    Empty,
    Text(String),
    Json(Value),
    Bytes(Bytes),
    Chunks(Vec<String>),
    Stream(BodyStream),
}

impl ReplyBody {
    pub fn stream(stream: BodyStream) -> Self {
        ReplyBody::Stream(stream)
    }
}

impl fmt::Debug for ReplyBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplyBody::Empty => f.write_str("Empty"),
            ReplyBody::Text(t) => f.debug_tuple("Text").field(t).finish(),
            ReplyBody::Json(v) => f.debug_tuple("Json").field(v).finish(),
            ReplyBody::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            ReplyBody::Chunks(c) => f.debug_tuple("Chunks").field(c).finish(),
            ReplyBody::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl From<StaticBody> for ReplyBody {
    fn from(body: StaticBody) -> Self {
        match body {
            StaticBody::Empty => ReplyBody::Empty,
            StaticBody::Text(t) => ReplyBody::Text(t),
            StaticBody::Json(v) => ReplyBody::Json(v),
            StaticBody::Chunks(c) => ReplyBody::Chunks(c),
        }
    }
}

impl From<&str> for ReplyBody {
    fn from(text: &str) -> Self {
        ReplyBody::Text(text.to_string())
    }
}

impl From<String> for ReplyBody {
    fn from(text: String) -> Self {
        ReplyBody::Text(text)
    }
}

impl From<Value> for ReplyBody {
    fn from(value: Value) -> Self {
        ReplyBody::Json(value)
    }
}

impl From<Bytes> for ReplyBody {
    fn from(bytes: Bytes) -> Self {
        ReplyBody::Bytes(bytes)
    }
}

/// Callback computing only the body; status comes from the expectation.
#[derive(Clone)]
pub enum BodyCallback {
    Sync(SyncBodyFn),
    Async(AsyncBodyFn),
}

/// Callback computing the whole reply as `[status, body?, headers?]`.
#[derive(Clone)]
pub enum FullReplyCallback {
    Sync(SyncFullFn),
    Async(AsyncFullFn),
}

/// What a matched expectation replies with.
#[derive(Clone)]
pub enum Reply {
    Static { status: u16, body: StaticBody },
    Buffer { status: u16, bytes: Bytes },
    Stream { status: u16, factory: StreamFactory },
    Callback { status: u16, callback: BodyCallback },
    FullReply(FullReplyCallback),
    /// Raise this error instead of replying
    Error(InterceptError),
}

impl Default for Reply {
    fn default() -> Self {
        Reply::Static {
            status: 200,
            body: StaticBody::Empty,
        }
    }
}

impl Reply {
    pub fn status(status: u16, body: impl Into<StaticBody>) -> Self {
        Reply::Static {
            status,
            body: body.into(),
        }
    }

    pub fn with<F>(status: u16, f: F) -> Self
    where
        F: Fn(&CapturedRequest) -> Result<ReplyBody, BoxError> + Send + Sync + 'static,
    {
        Reply::Callback {
            status,
            callback: BodyCallback::Sync(Arc::new(f)),
        }
    }

    pub fn with_async<F, Fut>(status: u16, f: F) -> Self
    where
        F: Fn(CapturedRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ReplyBody, BoxError>> + Send + 'static,
    {
        Reply::Callback {
            status,
            callback: BodyCallback::Async(Arc::new(move |req| f(req).boxed())),
        }
    }

    pub fn full<F>(f: F) -> Self
    where
        F: Fn(&CapturedRequest) -> Result<Value, BoxError> + Send + Sync + 'static,
    {
        Reply::FullReply(FullReplyCallback::Sync(Arc::new(f)))
    }

    pub fn full_async<F, Fut>(f: F) -> Self
    where
        F: Fn(CapturedRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
    {
        Reply::FullReply(FullReplyCallback::Async(Arc::new(move |req| f(req).boxed())))
    }

    pub fn stream<F>(status: u16, factory: F) -> Self
    where
        F: Fn() -> BodyStream + Send + Sync + 'static,
    {
        Reply::Stream {
            status,
            factory: Arc::new(factory),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Reply::Static { .. } => "static",
            Reply::Buffer { .. } => "buffer",
            Reply::Stream { .. } => "stream",
            Reply::Callback { .. } => "callback",
            Reply::FullReply(_) => "full_reply",
            Reply::Error(_) => "error",
        }
    }
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Static { status, body } => f
                .debug_struct("Static")
                .field("status", status)
                .field("body", body)
                .finish(),
            Reply::Buffer { status, bytes } => f
                .debug_struct("Buffer")
                .field("status", status)
                .field("len", &bytes.len())
                .finish(),
            Reply::Stream { status, .. } => f.debug_struct("Stream").field("status", status).finish(),
            Reply::Callback { status, .. } => {
                f.debug_struct("Callback").field("status", status).finish()
            }
            Reply::FullReply(_) => f.write_str("FullReply"),
            Reply::Error(e) => f.debug_tuple("Error").field(e).finish(),
        }
    }
}
