//! Interception context: registry, network policy and activation state.
//!
//! One context is shared (cheaply cloned) by everything that sends requests
//! in a test. It implements [`HttpTransport`], so code under test that sends
//! through a transport can be handed a context instead of a real client.

use crate::config::InterceptConfig;
use crate::error::InterceptError;
use crate::expectation::Expectation;
use crate::matcher::find_match;
use crate::notify::NoMatchEvent;
use crate::policy::{NetConnectMatcher, NetworkPolicy};
use crate::registry::{Lookup, Registry};
use crate::request::{self, CapturedRequest, InterceptedRequest, InterceptedResponse};
use crate::target::RequestHead;
use crate::transport::{HttpTransport, HyperTransport, OutboundRequest};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

const NO_MATCH_CAPACITY: usize = 256;

/// Outcome of matching a finalized request.
pub(crate) enum Resolution {
    /// The record was consumed for this request
    Matched(Arc<Expectation>),
    /// Nothing matched; `pass_through` says whether the target lets unmatched
    /// requests reach the network (policy still applies)
    Unmatched { pass_through: bool },
}

struct ContextInner {
    active: AtomicBool,
    bypass: AtomicBool,
    registry: Mutex<Registry>,
    policy: RwLock<NetworkPolicy>,
    transport: Arc<dyn HttpTransport>,
    no_match: broadcast::Sender<NoMatchEvent>,
}

#[derive(Clone)]
pub struct InterceptContext {
    inner: Arc<ContextInner>,
}

impl fmt::Debug for InterceptContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptContext")
            .field("active", &self.inner.active.load(Ordering::SeqCst))
            .field("bypass", &self.is_bypassed())
            .field("policy", &*self.inner.policy.read())
            .finish()
    }
}

impl InterceptContext {
    /// Create an inactive context. Requests not handled by an expectation go
    /// to `transport`.
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        let (no_match, _) = broadcast::channel(NO_MATCH_CAPACITY);
        Self {
            inner: Arc::new(ContextInner {
                active: AtomicBool::new(false),
                bypass: AtomicBool::new(false),
                registry: Mutex::new(Registry::new()),
                policy: RwLock::new(NetworkPolicy::default()),
                transport,
                no_match,
            }),
        }
    }

    /// Build a context from configuration, activating it when `enabled`.
    ///
    /// `RIFT_INTERCEPT_OFF` is applied on top of `config`.
    pub fn from_config(config: &InterceptConfig) -> Result<Self, anyhow::Error> {
        let mut config = config.clone();
        config.apply_env_overrides();
        config.validate()?;
        let transport = HyperTransport::new(&config.passthrough)
            .map_err(|e| anyhow::anyhow!("Failed to create pass-through transport: {e}"))?;
        let ctx = Self::new(Arc::new(transport));
        *ctx.inner.policy.write() = config.net_connect.to_policy()?;
        ctx.set_bypass(config.bypass);
        if config.enabled {
            ctx.activate()?;
        }
        Ok(ctx)
    }

    pub fn activate(&self) -> Result<(), InterceptError> {
        self.inner
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| InterceptError::AlreadyActive)?;
        info!("Request interception activated");
        Ok(())
    }

    pub fn deactivate(&self) {
        if self.inner.active.swap(false, Ordering::SeqCst) {
            info!("Request interception deactivated");
        }
    }

    /// Active and not bypassed.
    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst) && !self.is_bypassed()
    }

    /// While bypassed, every request goes to the real transport regardless of policy.
    pub fn set_bypass(&self, bypass: bool) {
        self.inner.bypass.store(bypass, Ordering::SeqCst);
        if bypass {
            info!("Request interception bypassed");
        }
    }

    pub fn is_bypassed(&self) -> bool {
        self.inner.bypass.load(Ordering::SeqCst)
    }

    /// Allow unmatched requests to hosts accepted by `matcher`.
    pub fn enable_net_connect(&self, matcher: impl Into<NetConnectMatcher>) {
        let matcher = matcher.into();
        debug!("Net connect enabled for {:?}", matcher);
        *self.inner.policy.write() = NetworkPolicy::allow(matcher);
    }

    pub fn disable_net_connect(&self) {
        debug!("Net connect disabled");
        *self.inner.policy.write() = NetworkPolicy::deny_all();
    }

    /// `authority` is `host:port`.
    pub fn is_net_connect_allowed(&self, authority: &str) -> bool {
        self.inner.policy.read().is_allowed(authority)
    }

    pub fn register(&self, expectation: Arc<Expectation>) {
        expectation.scope().track(&expectation);
        self.inner.registry.lock().add(expectation);
    }

    pub fn remove_interceptor(&self, expectation: &Arc<Expectation>) -> bool {
        self.inner.registry.lock().remove_interceptor(expectation)
    }

    /// Drop every registered expectation.
    pub fn clean_all(&self) {
        self.inner.registry.lock().remove_all();
        debug!("Removed all expectations");
    }

    pub fn is_done(&self) -> bool {
        self.inner.registry.lock().pending().is_empty()
    }

    pub fn pending_mocks(&self) -> Vec<String> {
        self.inner
            .registry
            .lock()
            .pending()
            .iter()
            .map(|e| e.describe())
            .collect()
    }

    pub fn active_mocks(&self) -> Vec<String> {
        self.inner
            .registry
            .lock()
            .active()
            .iter()
            .map(|e| e.describe())
            .collect()
    }

    /// Receive a notification for every request no expectation matched.
    pub fn subscribe_no_match(&self) -> broadcast::Receiver<NoMatchEvent> {
        self.inner.no_match.subscribe()
    }

    /// Start an outgoing request. Must be called inside a tokio runtime.
    pub fn request(&self, head: RequestHead) -> Result<InterceptedRequest, InterceptError> {
        request::start(self.clone(), head)
    }

    /// Start an outgoing request from a method and absolute URL.
    pub fn request_url(&self, method: &str, url: &str) -> Result<InterceptedRequest, InterceptError> {
        self.request(RequestHead::new(method, url)?)
    }

    pub(crate) fn transport(&self) -> Arc<dyn HttpTransport> {
        Arc::clone(&self.inner.transport)
    }

    pub(crate) fn notify_no_match(&self, request: CapturedRequest) {
        let _ = self.inner.no_match.send(NoMatchEvent {
            request,
            at: chrono::Utc::now(),
        });
    }

    /// Match a finalized request and consume the winning record.
    ///
    /// Matching runs outside the registry lock (predicates are user code);
    /// consumption re-validates under the lock and matching starts over when
    /// the record was taken by a concurrent request.
    pub(crate) fn resolve(&self, head: &RequestHead, captured: &CapturedRequest) -> Resolution {
        let body = captured.body_view();
        loop {
            let lookup = self.inner.registry.lock().lookup(&head.target);
            let (records, filtered, allow_unmocked) = match lookup {
                Lookup::Candidates {
                    records,
                    filtered,
                    allow_unmocked,
                } => (records, filtered, allow_unmocked),
                Lookup::AllowUnmockedOnly | Lookup::Unregistered => {
                    return Resolution::Unmatched { pass_through: true }
                }
            };
            let Some(record) = find_match(&records, filtered, head, &body) else {
                return Resolution::Unmatched {
                    pass_through: allow_unmocked,
                };
            };
            if self.inner.registry.lock().consume(&record) {
                return Resolution::Matched(record);
            }
            debug!(
                "Expectation {} was consumed concurrently, matching again",
                record.id()
            );
        }
    }
}

#[async_trait]
impl HttpTransport for InterceptContext {
    async fn send(&self, request: OutboundRequest) -> Result<InterceptedResponse, InterceptError> {
        let mut pending = self.request(request.head)?;
        if !request.body.is_empty() {
            pending.write(request.body).await?;
        }
        pending.end().await
    }
}
