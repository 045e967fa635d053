//! Outbound HTTP request interception for tests.
//!
//! Tests declare expectations on a [`Scope`], register them with an
//! [`InterceptContext`], and hand the context to the code under test as its
//! [`HttpTransport`]. Matching requests get synthesized responses (with
//! optional delays, streamed bodies or injected errors); everything else is
//! rejected or passed to the real transport according to the network policy.

pub mod config;
pub mod context;
pub mod error;
pub mod expectation;
pub mod headers;
pub mod matcher;
pub mod metrics;
pub mod notify;
pub mod policy;
pub mod predicate;
pub mod registry;
pub mod reply;
pub mod request;
pub mod schedule;
pub mod target;
pub mod telemetry;
pub mod transport;

pub use config::{InterceptConfig, NetConnectConfig, PassthroughConfig};
pub use context::InterceptContext;
pub use error::{ErrorKind, InterceptError};
pub use expectation::{Expectation, ExpectationBuilder, Scope, ScopeBuilder};
pub use headers::HeaderList;
pub use notify::{NoMatchEvent, ScopeEvent};
pub use policy::{NetConnectMatcher, NetworkPolicy};
pub use reply::{Reply, ReplyBody};
pub use request::{
    AbortHandle, CapturedRequest, InterceptedRequest, InterceptedResponse, RequestEvent,
    RequestState, ResponseBody, ResponseHead,
};
pub use target::{Protocol, RequestHead, TargetKey};
pub use transport::{HttpTransport, HyperTransport, OutboundRequest};
