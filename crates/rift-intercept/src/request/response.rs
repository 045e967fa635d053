//! Responses handed back to the caller.

use crate::error::InterceptError;
use crate::headers::HeaderList;
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use serde::Serialize;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// Status and ordered raw header pairs of a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponseHead {
    pub status: u16,
    pub headers: HeaderList,
}

impl ResponseHead {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HeaderList::new(),
        }
    }
}

pub(crate) type BodySender = mpsc::UnboundedSender<Result<Bytes, InterceptError>>;

/// Response body, delivered chunk by chunk.
///
/// Ends with `None` after the last chunk, or yields one `Err` if the request
/// is aborted or the stream fails mid-body.
#[derive(Debug)]
pub struct ResponseBody {
    rx: mpsc::UnboundedReceiver<Result<Bytes, InterceptError>>,
}

impl ResponseBody {
    pub(crate) fn channel() -> (BodySender, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }

    pub fn empty() -> Self {
        let (_, body) = Self::channel();
        body
    }

    /// Collect the remaining chunks into one buffer.
    pub async fn collect(mut self) -> Result<Bytes, InterceptError> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }
}

impl Stream for ResponseBody {
    type Item = Result<Bytes, InterceptError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// A response produced either by a matched expectation or by the real transport.
#[derive(Debug)]
pub struct InterceptedResponse {
    pub head: ResponseHead,
    pub body: ResponseBody,
}

impl InterceptedResponse {
    pub fn status(&self) -> u16 {
        self.head.status
    }

    pub fn headers(&self) -> &HeaderList {
        &self.head.headers
    }

    pub fn into_body(self) -> ResponseBody {
        self.body
    }

    pub async fn bytes(self) -> Result<Bytes, InterceptError> {
        self.body.collect().await
    }

    /// Body as text; invalid UTF-8 is replaced lossily.
    pub async fn text(self) -> Result<String, InterceptError> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}
