//! Transports requests can be sent through.
//!
//! Calling code depends on [`HttpTransport`] and is handed either the real
//! [`HyperTransport`] or an [`InterceptContext`](crate::InterceptContext),
//! which simulates responses and falls back to a real transport when policy
//! allows.

mod hyper_client;
mod socket;
mod tls;

pub use hyper_client::HyperTransport;
pub use socket::SyntheticSocket;

use crate::error::InterceptError;
use crate::request::InterceptedResponse;
use crate::target::RequestHead;
use async_trait::async_trait;
use bytes::Bytes;

/// A complete outgoing request: head plus the full body.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub head: RequestHead,
    pub body: Bytes,
}

impl OutboundRequest {
    pub fn new(head: RequestHead) -> Self {
        Self {
            head,
            body: Bytes::new(),
        }
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: OutboundRequest) -> Result<InterceptedResponse, InterceptError>;
}
