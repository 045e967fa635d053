//! Scopes: a target plus options shared by the expectations declared on it.

use super::types::ExpectationBuilder;
use crate::error::InterceptError;
use crate::headers::{HeaderValueSource, ReplyHeaders};
use crate::notify::ScopeEvent;
use crate::predicate::{HeaderMatcher, PathMatcher, ValueMatcher};
use crate::request::{CapturedRequest, ResponseHead};
use crate::target::TargetKey;
use parking_lot::Mutex;
use regex::Regex;
use std::fmt;
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;

use super::types::Expectation;

pub type ScopeFilterFn = Arc<dyn Fn(&str) -> bool + Send + Sync>;
pub type PathFilterFn = Arc<dyn Fn(&str) -> String + Send + Sync>;
pub type BodyFilterFn = Arc<dyn Fn(&str) -> String + Send + Sync>;

const SCOPE_EVENT_CAPACITY: usize = 256;

/// Target of a scope: one exact protocol/host/port, or a pattern over
/// `protocol://host:port`.
#[derive(Debug, Clone)]
pub enum TargetPattern {
    Exact(TargetKey),
    Pattern(Arc<Regex>),
}

impl TargetPattern {
    /// Registry slot key.
    pub fn key(&self) -> String {
        match self {
            TargetPattern::Exact(target) => target.to_string(),
            TargetPattern::Pattern(regex) => format!("/{}/", regex.as_str()),
        }
    }

    pub fn matches(&self, target: &TargetKey) -> bool {
        match self {
            TargetPattern::Exact(expected) => expected == target,
            TargetPattern::Pattern(regex) => regex.is_match(&target.to_string()),
        }
    }
}

/// Options applied to every expectation of a scope.
#[derive(Clone, Default)]
pub struct ScopeOptions {
    /// Unmatched requests to this target may pass through (policy permitting)
    pub allow_unmocked: bool,
    /// Appended to replies that lack a header of the same name
    pub default_reply_headers: ReplyHeaders,
    /// Claims requests to other targets when it returns true for their `protocol://host:port`
    pub filtering_scope: Option<ScopeFilterFn>,
    pub filtering_path: Option<PathFilterFn>,
    pub filtering_request_body: Option<BodyFilterFn>,
    pub req_headers: Vec<HeaderMatcher>,
    pub bad_headers: Vec<String>,
}

impl fmt::Debug for ScopeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeOptions")
            .field("allow_unmocked", &self.allow_unmocked)
            .field("default_reply_headers", &self.default_reply_headers)
            .field("filtering_scope", &self.filtering_scope.is_some())
            .field("filtering_path", &self.filtering_path.is_some())
            .field("filtering_request_body", &self.filtering_request_body.is_some())
            .field("req_headers", &self.req_headers)
            .field("bad_headers", &self.bad_headers)
            .finish()
    }
}

pub struct Scope {
    target: TargetPattern,
    options: ScopeOptions,
    events: broadcast::Sender<ScopeEvent>,
    expectations: Mutex<Vec<Weak<Expectation>>>,
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("target", &self.target.key())
            .field("options", &self.options)
            .finish()
    }
}

impl Scope {
    /// Start a scope for a base URL such as `http://x.test` or `https://api.test:8443`.
    pub fn builder(base: &str) -> Result<ScopeBuilder, InterceptError> {
        Ok(ScopeBuilder::new(TargetPattern::Exact(TargetKey::parse(base)?)))
    }

    /// Start a scope matching every target whose `protocol://host:port` matches `pattern`.
    pub fn builder_matching(pattern: Regex) -> ScopeBuilder {
        ScopeBuilder::new(TargetPattern::Pattern(Arc::new(pattern)))
    }

    /// Shorthand for a scope with default options.
    pub fn new(base: &str) -> Result<Arc<Self>, InterceptError> {
        Ok(Self::builder(base)?.build())
    }

    pub fn target(&self) -> &TargetPattern {
        &self.target
    }

    pub fn options(&self) -> &ScopeOptions {
        &self.options
    }

    pub fn key(&self) -> String {
        self.target.key()
    }

    /// Host header substituted for requests claimed through `filtering_scope`.
    pub fn canonical_host(&self) -> Option<String> {
        match &self.target {
            TargetPattern::Exact(target) => Some(target.host_header()),
            TargetPattern::Pattern(_) => None,
        }
    }

    /// Declare an expectation for `method` and `path`.
    pub fn intercept(
        self: &Arc<Self>,
        method: &str,
        path: impl Into<PathMatcher>,
    ) -> ExpectationBuilder {
        ExpectationBuilder::new(Arc::clone(self), method, path.into())
    }

    pub fn get(self: &Arc<Self>, path: impl Into<PathMatcher>) -> ExpectationBuilder {
        self.intercept("GET", path)
    }

    pub fn post(self: &Arc<Self>, path: impl Into<PathMatcher>) -> ExpectationBuilder {
        self.intercept("POST", path)
    }

    pub fn put(self: &Arc<Self>, path: impl Into<PathMatcher>) -> ExpectationBuilder {
        self.intercept("PUT", path)
    }

    pub fn patch(self: &Arc<Self>, path: impl Into<PathMatcher>) -> ExpectationBuilder {
        self.intercept("PATCH", path)
    }

    pub fn delete(self: &Arc<Self>, path: impl Into<PathMatcher>) -> ExpectationBuilder {
        self.intercept("DELETE", path)
    }

    pub fn head(self: &Arc<Self>, path: impl Into<PathMatcher>) -> ExpectationBuilder {
        self.intercept("HEAD", path)
    }

    pub fn options_request(self: &Arc<Self>, path: impl Into<PathMatcher>) -> ExpectationBuilder {
        self.intercept("OPTIONS", path)
    }

    /// Receive "request" and "replied" notifications for this scope.
    pub fn subscribe(&self) -> broadcast::Receiver<ScopeEvent> {
        self.events.subscribe()
    }

    pub(crate) fn notify(&self, event: ScopeEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    pub(crate) fn track(&self, expectation: &Arc<Expectation>) {
        let mut tracked = self.expectations.lock();
        tracked.retain(|weak| weak.strong_count() > 0);
        tracked.push(Arc::downgrade(expectation));
    }

    fn live_expectations(&self) -> Vec<Arc<Expectation>> {
        self.expectations
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    /// Every expectation declared on this scope has been satisfied.
    pub fn is_done(&self) -> bool {
        self.live_expectations().iter().all(|e| !e.is_pending())
    }

    pub fn pending_mocks(&self) -> Vec<String> {
        self.live_expectations()
            .iter()
            .filter(|e| e.is_pending())
            .map(|e| e.describe())
            .collect()
    }
}

/// Builder for [`Scope`].
pub struct ScopeBuilder {
    target: TargetPattern,
    options: ScopeOptions,
}

impl ScopeBuilder {
    fn new(target: TargetPattern) -> Self {
        Self {
            target,
            options: ScopeOptions::default(),
        }
    }

    pub fn allow_unmocked(mut self) -> Self {
        self.options.allow_unmocked = true;
        self
    }

    pub fn default_reply_header(
        mut self,
        name: impl Into<String>,
        value: impl Into<HeaderValueSource>,
    ) -> Self {
        self.options
            .default_reply_headers
            .push((name.into(), value.into()));
        self
    }

    pub fn default_reply_header_fn<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&CapturedRequest, &ResponseHead, &[u8]) -> String + Send + Sync + 'static,
    {
        self.default_reply_header(name, HeaderValueSource::dynamic(f))
    }

    pub fn filtering_scope<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.options.filtering_scope = Some(Arc::new(f));
        self
    }

    pub fn filtering_path<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.options.filtering_path = Some(Arc::new(f));
        self
    }

    pub fn filtering_request_body<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.options.filtering_request_body = Some(Arc::new(f));
        self
    }

    pub fn match_header(mut self, name: impl Into<String>, value: impl Into<ValueMatcher>) -> Self {
        self.options.req_headers.push(HeaderMatcher::new(name, value));
        self
    }

    pub fn bad_header(mut self, name: impl Into<String>) -> Self {
        self.options.bad_headers.push(name.into());
        self
    }

    pub fn build(self) -> Arc<Scope> {
        let (events, _) = broadcast::channel(SCOPE_EVENT_CAPACITY);
        Arc::new(Scope {
            target: self.target,
            options: self.options,
            events,
            expectations: Mutex::new(Vec::new()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_target_key() {
        let scope = Scope::new("http://X.test").unwrap();
        assert_eq!(scope.key(), "http://x.test:80");
        assert_eq!(scope.canonical_host(), Some("x.test".to_string()));
    }

    #[test]
    fn test_pattern_target() {
        let scope = Scope::builder_matching(Regex::new(r"^https://.*\.example\.com").unwrap()).build();
        let target = TargetKey::parse("https://api.example.com").unwrap();
        assert!(scope.target().matches(&target));
        assert!(!scope
            .target()
            .matches(&TargetKey::parse("http://api.example.com").unwrap()));
        assert_eq!(scope.canonical_host(), None);
    }

    #[test]
    fn test_empty_base_is_setup_error() {
        assert!(matches!(
            Scope::builder(""),
            Err(InterceptError::EmptyTarget)
        ));
    }

    #[test]
    fn test_builder_options() {
        let scope = Scope::builder("http://x.test")
            .unwrap()
            .allow_unmocked()
            .default_reply_header("X-Powered-By", "rift")
            .match_header("authorization", "Bearer t")
            .bad_header("cookie")
            .build();
        let options = scope.options();
        assert!(options.allow_unmocked);
        assert_eq!(options.default_reply_headers.len(), 1);
        assert_eq!(options.req_headers.len(), 1);
        assert_eq!(options.bad_headers, vec!["cookie".to_string()]);
    }

    #[test]
    fn test_scope_without_expectations_is_done() {
        let scope = Scope::new("http://x.test").unwrap();
        assert!(scope.is_done());
        assert!(scope.pending_mocks().is_empty());
    }
}
