//! Observability notifications emitted while requests are resolved.

use crate::request::CapturedRequest;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// Emitted on a scope's channel.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ScopeEvent {
    /// A request matched one of the scope's expectations, before any reply is generated
    #[serde(rename_all = "camelCase")]
    Request {
        request: CapturedRequest,
        expectation_id: u64,
        expectation: String,
        body: Value,
    },
    /// The reply for a matched request finished streaming
    #[serde(rename_all = "camelCase")]
    Replied {
        request: CapturedRequest,
        expectation_id: u64,
        expectation: String,
        status: u16,
    },
}

impl ScopeEvent {
    pub fn expectation_id(&self) -> u64 {
        match self {
            ScopeEvent::Request { expectation_id, .. }
            | ScopeEvent::Replied { expectation_id, .. } => *expectation_id,
        }
    }

    pub fn request(&self) -> &CapturedRequest {
        match self {
            ScopeEvent::Request { request, .. } | ScopeEvent::Replied { request, .. } => request,
        }
    }
}

/// Emitted on the context-wide channel when a request matched nothing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NoMatchEvent {
    pub request: CapturedRequest,
    pub at: DateTime<Utc>,
}
