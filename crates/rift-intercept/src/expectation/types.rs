//! Expectation records and their builder.

use super::scope::Scope;
use crate::context::InterceptContext;
use crate::error::{BoxError, InterceptError};
use crate::headers::{HeaderList, HeaderValueSource, ReplyHeaders};
use crate::predicate::{
    headers_satisfied, BodyMatcher, BodyView, HeaderMatcher, PathMatcher, QueryMatcher,
    ValueMatcher,
};
use crate::reply::{BodyStream, Reply, ReplyBody, StaticBody};
use crate::request::{CapturedRequest, ResponseHead};
use crate::target::{split_path, RequestHead};
use bytes::Bytes;
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

static NEXT_EXPECTATION_ID: AtomicU64 = AtomicU64::new(1);

/// Per-expectation options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpectationOptions {
    /// Never consumed; replies to every matching request
    pub persist: bool,
    /// Number of matching requests served before the record is removed
    pub times: u32,
    /// Wait before the response head is delivered
    pub delay_connection: Duration,
    /// Wait between the response head and the first body chunk
    pub delay_body: Duration,
    /// Virtual delay counted against the socket timeout; never sleeps
    pub delay_socket: Duration,
}

impl Default for ExpectationOptions {
    fn default() -> Self {
        Self {
            persist: false,
            times: 1,
            delay_connection: Duration::ZERO,
            delay_body: Duration::ZERO,
            delay_socket: Duration::ZERO,
        }
    }
}

/// One expectation: predicates, a reply and usage bookkeeping.
#[derive(Debug)]
pub struct Expectation {
    id: u64,
    scope: Arc<Scope>,
    method: String,
    path: PathMatcher,
    query: Option<QueryMatcher>,
    body: Option<BodyMatcher>,
    req_headers: Vec<HeaderMatcher>,
    bad_headers: Vec<String>,
    reply: Reply,
    headers: ReplyHeaders,
    options: ExpectationOptions,
    remaining: AtomicU32,
    interceptions: AtomicU64,
    registered: AtomicBool,
}

impl Expectation {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn scope(&self) -> &Arc<Scope> {
        &self.scope
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn reply(&self) -> &Reply {
        &self.reply
    }

    pub fn reply_headers(&self) -> &ReplyHeaders {
        &self.headers
    }

    pub fn options(&self) -> &ExpectationOptions {
        &self.options
    }

    /// Uses left before removal. Meaningless for persisted records.
    pub fn remaining(&self) -> u32 {
        self.remaining.load(Ordering::SeqCst)
    }

    /// How many requests this record has served.
    pub fn interceptions(&self) -> u64 {
        self.interceptions.load(Ordering::SeqCst)
    }

    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }

    pub(crate) fn set_registered(&self, registered: bool) {
        self.registered.store(registered, Ordering::SeqCst);
    }

    /// Record one use. Returns true when the record is now exhausted.
    ///
    /// Must be called with the registry lock held.
    pub(crate) fn consume_use(&self) -> bool {
        self.interceptions.fetch_add(1, Ordering::SeqCst);
        if self.options.persist {
            return false;
        }
        let left = self.remaining.load(Ordering::SeqCst).saturating_sub(1);
        self.remaining.store(left, Ordering::SeqCst);
        left == 0
    }

    /// Still expects at least one request.
    pub fn is_pending(&self) -> bool {
        if !self.is_registered() {
            return false;
        }
        if self.options.persist {
            self.interceptions() == 0
        } else {
            self.remaining() > 0
        }
    }

    /// `METHOD protocol://host:port/path`, used in listings and logs.
    pub fn describe(&self) -> String {
        format!("{} {}{}", self.method, self.scope.key(), self.path.describe())
    }

    /// Evaluate this record's predicates. `headers` are the derived request headers.
    pub(crate) fn matches(&self, head: &RequestHead, headers: &HeaderList, body: &BodyView<'_>) -> bool {
        if !self.method.eq_ignore_ascii_case(&head.method) {
            return false;
        }

        let scope = self.scope.options();
        if !headers_satisfied(headers, &scope.req_headers, &scope.bad_headers)
            || !headers_satisfied(headers, &self.req_headers, &self.bad_headers)
        {
            return false;
        }

        let path = match &scope.filtering_path {
            Some(filter) => filter(&head.path),
            None => head.path.clone(),
        };
        let path_ok = match &self.query {
            Some(query) => {
                let (pathname, raw_query) = split_path(&path);
                self.path.matches(pathname) && query.matches(raw_query)
            }
            None => self.path.matches(&path),
        };
        if !path_ok {
            return false;
        }

        match (&self.body, &scope.filtering_request_body) {
            (None, _) => true,
            (Some(matcher), Some(filter)) => {
                let filtered = filter(body.text);
                matcher.matches(&BodyView {
                    text: &filtered,
                    ..*body
                })
            }
            (Some(matcher), None) => matcher.matches(body),
        }
    }
}

/// Builder for [`Expectation`], created from [`Scope::intercept`].
pub struct ExpectationBuilder {
    scope: Arc<Scope>,
    method: String,
    path: PathMatcher,
    query: Option<QueryMatcher>,
    body: Option<BodyMatcher>,
    req_headers: Vec<HeaderMatcher>,
    bad_headers: Vec<String>,
    reply: Option<Reply>,
    headers: ReplyHeaders,
    options: ExpectationOptions,
}

impl ExpectationBuilder {
    pub(crate) fn new(scope: Arc<Scope>, method: &str, path: PathMatcher) -> Self {
        Self {
            scope,
            method: method.trim().to_uppercase(),
            path,
            query: None,
            body: None,
            req_headers: Vec::new(),
            bad_headers: Vec::new(),
            reply: None,
            headers: Vec::new(),
            options: ExpectationOptions::default(),
        }
    }

    /// Match the query separately; the path matcher then sees only the pathname.
    pub fn query(mut self, query: QueryMatcher) -> Self {
        self.query = Some(query);
        self
    }

    pub fn body(mut self, body: impl Into<BodyMatcher>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn match_header(mut self, name: impl Into<String>, value: impl Into<ValueMatcher>) -> Self {
        self.req_headers.push(HeaderMatcher::new(name, value));
        self
    }

    pub fn bad_header(mut self, name: impl Into<String>) -> Self {
        self.bad_headers.push(name.into());
        self
    }

    /// Serve `n` matching requests. Zero is ignored.
    pub fn times(mut self, n: u32) -> Self {
        if n > 0 {
            self.options.times = n;
        }
        self
    }

    pub fn once(self) -> Self {
        self.times(1)
    }

    pub fn twice(self) -> Self {
        self.times(2)
    }

    pub fn thrice(self) -> Self {
        self.times(3)
    }

    pub fn persist(mut self) -> Self {
        self.options.persist = true;
        self
    }

    /// Same as [`delay_connection`](Self::delay_connection).
    pub fn delay(self, delay: Duration) -> Self {
        self.delay_connection(delay)
    }

    pub fn delay_connection(mut self, delay: Duration) -> Self {
        self.options.delay_connection = delay;
        self
    }

    pub fn delay_body(mut self, delay: Duration) -> Self {
        self.options.delay_body = delay;
        self
    }

    pub fn delay_socket(mut self, delay: Duration) -> Self {
        self.options.delay_socket = delay;
        self
    }

    pub fn reply(mut self, status: u16, body: impl Into<StaticBody>) -> Self {
        self.reply = Some(Reply::status(status, body));
        self
    }

    pub fn reply_status(mut self, status: u16) -> Self {
        self.reply = Some(Reply::status(status, StaticBody::Empty));
        self
    }

    pub fn reply_buffer(mut self, status: u16, bytes: impl Into<Bytes>) -> Self {
        self.reply = Some(Reply::Buffer {
            status,
            bytes: bytes.into(),
        });
        self
    }

    pub fn reply_stream<F>(mut self, status: u16, factory: F) -> Self
    where
        F: Fn() -> BodyStream + Send + Sync + 'static,
    {
        self.reply = Some(Reply::stream(status, factory));
        self
    }

    pub fn reply_with<F>(mut self, status: u16, f: F) -> Self
    where
        F: Fn(&CapturedRequest) -> Result<ReplyBody, BoxError> + Send + Sync + 'static,
    {
        self.reply = Some(Reply::with(status, f));
        self
    }

    pub fn reply_with_async<F, Fut>(mut self, status: u16, f: F) -> Self
    where
        F: Fn(CapturedRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ReplyBody, BoxError>> + Send + 'static,
    {
        self.reply = Some(Reply::with_async(status, f));
        self
    }

    pub fn reply_full<F>(mut self, f: F) -> Self
    where
        F: Fn(&CapturedRequest) -> Result<Value, BoxError> + Send + Sync + 'static,
    {
        self.reply = Some(Reply::full(f));
        self
    }

    pub fn reply_full_async<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(CapturedRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
    {
        self.reply = Some(Reply::full_async(f));
        self
    }

    /// Fail matching requests with this error instead of replying.
    pub fn reply_with_error(mut self, error: InterceptError) -> Self {
        self.reply = Some(Reply::Error(error));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<HeaderValueSource>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Header computed from the request, response head and final body.
    pub fn header_fn<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&CapturedRequest, &ResponseHead, &[u8]) -> String + Send + Sync + 'static,
    {
        self.header(name, HeaderValueSource::dynamic(f))
    }

    /// Finish the record without registering it. Replies `200` with an empty
    /// body when no reply was given.
    pub fn build(self) -> Arc<Expectation> {
        Arc::new(Expectation {
            id: NEXT_EXPECTATION_ID.fetch_add(1, Ordering::Relaxed),
            scope: self.scope,
            method: self.method,
            path: self.path,
            query: self.query,
            body: self.body,
            req_headers: self.req_headers,
            bad_headers: self.bad_headers,
            reply: self.reply.unwrap_or_default(),
            headers: self.headers,
            remaining: AtomicU32::new(self.options.times),
            interceptions: AtomicU64::new(0),
            registered: AtomicBool::new(false),
            options: self.options,
        })
    }

    /// Build and register with `ctx`.
    pub fn register(self, ctx: &InterceptContext) -> Arc<Expectation> {
        let expectation = self.build();
        ctx.register(Arc::clone(&expectation));
        expectation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;
    use serde_json::json;

    fn view(text: &str) -> BodyView<'_> {
        BodyView {
            text,
            binary: false,
            content_type: None,
        }
    }

    fn matches(expectation: &Expectation, head: &RequestHead, body: &str) -> bool {
        expectation.matches(head, &head.headers, &view(body))
    }

    #[test]
    fn test_defaults() {
        let scope = Scope::new("http://x.test").unwrap();
        let expectation = scope.get("/a").build();
        assert_eq!(expectation.options().times, 1);
        assert_eq!(expectation.remaining(), 1);
        assert!(!expectation.options().persist);
        assert!(matches!(expectation.reply(), Reply::Static { status: 200, .. }));
        assert_eq!(expectation.describe(), "GET http://x.test:80/a");
    }

    #[test]
    fn test_times_zero_is_ignored() {
        let scope = Scope::new("http://x.test").unwrap();
        assert_eq!(scope.get("/").times(3).times(0).build().remaining(), 3);
    }

    #[test]
    fn test_method_and_path() {
        let scope = Scope::new("http://x.test").unwrap();
        let expectation = scope.get("/a").reply(200, "ok").build();
        assert!(matches(&expectation, &RequestHead::get("http://x.test/a").unwrap(), ""));
        assert!(!matches(&expectation, &RequestHead::post("http://x.test/a").unwrap(), ""));
        assert!(!matches(&expectation, &RequestHead::get("http://x.test/b").unwrap(), ""));
        // Without a query matcher the query is part of the path
        assert!(!matches(&expectation, &RequestHead::get("http://x.test/a?x=1").unwrap(), ""));
    }

    #[test]
    fn test_query_matcher_splits_path() {
        let scope = Scope::new("http://x.test").unwrap();
        let expectation = scope
            .get("/search")
            .query(QueryMatcher::exact([("q", "rust lang")]))
            .build();
        let head = RequestHead::get("http://x.test/search?q=rust%20lang").unwrap();
        assert!(matches(&expectation, &head, ""));
        let head = RequestHead::get("http://x.test/search?q=go").unwrap();
        assert!(!matches(&expectation, &head, ""));
    }

    #[test]
    fn test_body_and_header_predicates() {
        let scope = Scope::builder("http://x.test")
            .unwrap()
            .match_header("x-api-key", "secret")
            .build();
        let expectation = scope
            .post("/items")
            .body(json!({"name": "widget"}))
            .bad_header("cookie")
            .build();

        let head = RequestHead::post("http://x.test/items")
            .unwrap()
            .header("X-Api-Key", "secret");
        assert!(matches(&expectation, &head, r#"{"name":"widget"}"#));
        assert!(!matches(&expectation, &head, r#"{"name":"gadget"}"#));

        let with_cookie = head.clone().header("Cookie", "a=b");
        assert!(!matches(&expectation, &with_cookie, r#"{"name":"widget"}"#));

        let no_key = RequestHead::post("http://x.test/items").unwrap();
        assert!(!matches(&expectation, &no_key, r#"{"name":"widget"}"#));
    }

    #[test]
    fn test_scope_filters_apply_before_matching() {
        let scope = Scope::builder("http://x.test")
            .unwrap()
            .filtering_path(|p| Regex::new(r"/\d+").unwrap().replace_all(p, "/ID").into_owned())
            .filtering_request_body(|b| b.replace("secret", "XXX"))
            .build();
        let expectation = scope.post("/users/ID").body("token=XXX").build();
        let head = RequestHead::post("http://x.test/users/42").unwrap();
        assert!(matches(&expectation, &head, "token=secret"));
    }

    #[test]
    fn test_consume_use() {
        let scope = Scope::new("http://x.test").unwrap();
        let expectation = scope.get("/").twice().build();
        assert!(!expectation.consume_use());
        assert!(expectation.consume_use());
        assert_eq!(expectation.interceptions(), 2);

        let persisted = scope.get("/").persist().build();
        for _ in 0..5 {
            assert!(!persisted.consume_use());
        }
    }
}
