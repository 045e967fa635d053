use super::*;
use crate::expectation::Scope;
use crate::notify::ScopeEvent;
use crate::transport::{HttpTransport, OutboundRequest};
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::mpsc::UnboundedReceiver;

/// Stands in for the network: records what it was sent and answers 203 "real".
#[derive(Default)]
struct RecordingTransport {
    sent: Mutex<Vec<OutboundRequest>>,
}

#[async_trait]
impl HttpTransport for RecordingTransport {
    async fn send(&self, request: OutboundRequest) -> Result<InterceptedResponse, InterceptError> {
        self.sent.lock().push(request);
        let (tx, body) = ResponseBody::channel();
        let _ = tx.send(Ok(Bytes::from_static(b"real")));
        Ok(InterceptedResponse {
            head: ResponseHead::new(203),
            body,
        })
    }
}

fn setup() -> (InterceptContext, Arc<RecordingTransport>) {
    let transport = Arc::new(RecordingTransport::default());
    let ctx = InterceptContext::new(transport.clone());
    ctx.activate().unwrap();
    (ctx, transport)
}

fn event_names(rx: &mut UnboundedReceiver<RequestEvent>) -> Vec<&'static str> {
    let mut names = Vec::new();
    while let Ok(event) = rx.try_recv() {
        names.push(event.name());
    }
    names
}

async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn test_get_replies_and_notifies_once() {
    let (ctx, transport) = setup();
    let scope = Scope::new("http://x.test").unwrap();
    let mut notes = scope.subscribe();
    scope.get("/a").reply(200, "ok").register(&ctx);

    let response = ctx.request_url("GET", "http://x.test/a").unwrap().end().await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "ok");

    assert!(matches!(notes.recv().await.unwrap(), ScopeEvent::Request { .. }));
    assert!(matches!(
        notes.recv().await.unwrap(),
        ScopeEvent::Replied { status: 200, .. }
    ));
    settle().await;
    assert!(notes.try_recv().is_err());
    assert!(ctx.is_done());
    assert!(transport.sent.lock().is_empty());
}

#[tokio::test]
async fn test_event_order_for_synthesized_reply() {
    let (ctx, _) = setup();
    let scope = Scope::new("https://x.test").unwrap();
    scope.get("/a").reply(200, "ok").register(&ctx);

    let mut request = ctx.request_url("GET", "https://x.test/a").unwrap();
    let mut events = request.take_events().unwrap();
    assert!(request.take_events().is_none());
    let response = request.end().await.unwrap();
    response.bytes().await.unwrap();

    assert_eq!(
        event_names(&mut events),
        vec!["connect", "secureConnect", "response", "data", "end", "close"]
    );
}

#[tokio::test]
async fn test_method_mismatch_is_unmatched() {
    let (ctx, transport) = setup();
    let scope = Scope::new("http://x.test").unwrap();
    scope.get("/a").reply(200, "ok").register(&ctx);
    ctx.disable_net_connect();

    let err = ctx
        .request_url("POST", "http://x.test/a")
        .unwrap()
        .end()
        .await
        .unwrap_err();
    assert!(matches!(err, InterceptError::UnmatchedRequest { .. }));
    assert_eq!(err.status(), Some(404));
    assert!(transport.sent.lock().is_empty());
    assert!(!ctx.is_done());
}

#[tokio::test]
async fn test_allow_unmocked_delegates_literal_request() {
    let (ctx, transport) = setup();
    let scope = Scope::builder("http://x.test").unwrap().allow_unmocked().build();
    scope.get("/a").reply(200, "ok").register(&ctx);

    let response = ctx
        .request_url("POST", "http://x.test/a")
        .unwrap()
        .send("payload")
        .await
        .unwrap();
    assert_eq!(response.status(), 203);
    assert_eq!(response.text().await.unwrap(), "real");

    let sent = transport.sent.lock();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].head.method, "POST");
    assert_eq!(sent[0].body, Bytes::from_static(b"payload"));
}

#[tokio::test]
async fn test_allow_unmocked_still_obeys_policy() {
    let (ctx, transport) = setup();
    let scope = Scope::builder("http://x.test").unwrap().allow_unmocked().build();
    scope.get("/a").register(&ctx);
    ctx.disable_net_connect();

    let err = ctx
        .request_url("GET", "http://x.test/other")
        .unwrap()
        .end()
        .await
        .unwrap_err();
    match err {
        InterceptError::NetworkPolicyViolation { host } => assert_eq!(host, "x.test:80"),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(transport.sent.lock().is_empty());
}

#[tokio::test]
async fn test_unregistered_host_follows_policy() {
    let (ctx, transport) = setup();
    ctx.enable_net_connect("allowed.test");

    let err = ctx
        .request_url("GET", "http://blocked.test/")
        .unwrap()
        .end()
        .await
        .unwrap_err();
    assert!(matches!(err, InterceptError::NetworkPolicyViolation { .. }));

    let response = ctx
        .request_url("GET", "http://allowed.test/")
        .unwrap()
        .end()
        .await
        .unwrap();
    assert_eq!(response.status(), 203);
    assert_eq!(transport.sent.lock().len(), 1);
}

#[tokio::test]
async fn test_no_match_notification() {
    let (ctx, _) = setup();
    let mut no_match = ctx.subscribe_no_match();
    let scope = Scope::new("http://x.test").unwrap();
    scope.get("/a").register(&ctx);

    let _ = ctx.request_url("GET", "http://x.test/b").unwrap().end().await;
    let event = no_match.recv().await.unwrap();
    assert_eq!(event.request.path, "/b");
}

#[tokio::test]
async fn test_full_reply() {
    let (ctx, _) = setup();
    let scope = Scope::new("http://x.test").unwrap();
    scope
        .post("/items")
        .reply_full(|_| Ok(json!([201, "created", {"x": "y"}])))
        .register(&ctx);

    let response = ctx
        .request_url("POST", "http://x.test/items")
        .unwrap()
        .end()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    assert_eq!(response.headers().get("x"), Some("y"));
    assert_eq!(response.text().await.unwrap(), "created");
}

#[tokio::test]
async fn test_malformed_full_reply_emits_no_response() {
    let (ctx, _) = setup();
    let scope = Scope::new("http://x.test").unwrap();
    scope
        .get("/")
        .reply_full(|_| Ok(json!([200, "a", {}, "extra"])))
        .register(&ctx);

    let mut request = ctx.request_url("GET", "http://x.test/").unwrap();
    let mut events = request.take_events().unwrap();
    let err = request.end().await.unwrap_err();
    assert!(matches!(err, InterceptError::MalformedReply(_)));
    assert_eq!(event_names(&mut events), vec!["connect", "error", "close"]);
}

#[tokio::test]
async fn test_times_limits_matches() {
    let (ctx, _) = setup();
    let scope = Scope::new("http://x.test").unwrap();
    scope.get("/a").times(2).reply(200, "ok").register(&ctx);

    for _ in 0..2 {
        let response = ctx.request_url("GET", "http://x.test/a").unwrap().end().await.unwrap();
        assert_eq!(response.status(), 200);
    }
    let err = ctx
        .request_url("GET", "http://x.test/a")
        .unwrap()
        .end()
        .await
        .unwrap_err();
    assert!(matches!(err, InterceptError::UnmatchedRequest { .. }));
    assert!(ctx.is_done());
}

#[tokio::test]
async fn test_registration_order_wins() {
    let (ctx, _) = setup();
    let scope = Scope::new("http://x.test").unwrap();
    scope.get("/a").reply(200, "first").register(&ctx);
    scope.get("/a").reply(200, "second").register(&ctx);

    for expected in ["first", "second"] {
        let response = ctx.request_url("GET", "http://x.test/a").unwrap().end().await.unwrap();
        assert_eq!(response.text().await.unwrap(), expected);
    }
}

#[tokio::test]
async fn test_header_set_before_end_is_matched() {
    let (ctx, _) = setup();
    let scope = Scope::new("http://x.test").unwrap();
    scope
        .get("/")
        .match_header("authorization", "Bearer t")
        .reply(200, "ok")
        .register(&ctx);

    let request = ctx.request_url("GET", "http://x.test/").unwrap();
    request.set_header("Authorization", "Bearer t");
    assert_eq!(request.end().await.unwrap().status(), 200);
}

#[tokio::test]
async fn test_written_body_is_matched() {
    let (ctx, _) = setup();
    let scope = Scope::new("http://x.test").unwrap();
    scope
        .post("/")
        .body(json!({"a": 1}))
        .reply(201, "")
        .register(&ctx);

    let mut request = ctx.request_url("POST", "http://x.test/").unwrap();
    request.write(r#"{"a":"#).await.unwrap();
    request.write("1}").await.unwrap();
    assert_eq!(request.end().await.unwrap().status(), 201);
}

#[tokio::test]
async fn test_abort_is_idempotent() {
    let (ctx, _) = setup();
    let mut request = ctx.request_url("GET", "http://x.test/").unwrap();
    let mut events = request.take_events().unwrap();
    assert!(request.abort());
    assert!(!request.abort());
    assert!(request.is_aborted());
    assert!(request.aborted_at().is_some());
    assert!(request.socket().is_destroyed());

    let err = request.end().await.unwrap_err();
    assert!(matches!(err, InterceptError::AbortedRequest));
    settle().await;
    assert_eq!(event_names(&mut events), vec!["abort", "error", "close"]);
}

#[tokio::test]
async fn test_abort_before_end_still_consumes() {
    let (ctx, _) = setup();
    let scope = Scope::new("http://x.test").unwrap();
    let record = scope.get("/a").reply(200, "ok").register(&ctx);

    let request = ctx.request_url("GET", "http://x.test/a").unwrap();
    request.abort_handle().abort();
    drop(request);
    settle().await;
    assert_eq!(record.remaining(), 0);
    assert!(ctx.is_done());
}

#[tokio::test]
async fn test_write_after_abort_fails() {
    let (ctx, _) = setup();
    let mut request = ctx.request_url("POST", "http://x.test/").unwrap();
    request.abort();
    let err = request.write("late").await.unwrap_err();
    assert!(matches!(err, InterceptError::AbortedRequest));
}

#[tokio::test]
async fn test_abort_mid_stream() {
    let (ctx, _) = setup();
    let scope = Scope::new("http://x.test").unwrap();
    scope
        .get("/stream")
        .reply_stream(200, || {
            futures::stream::once(async { Ok(Bytes::from_static(b"first")) })
                .chain(futures::stream::pending())
                .boxed()
        })
        .register(&ctx);

    let mut request = ctx.request_url("GET", "http://x.test/stream").unwrap();
    let mut events = request.take_events().unwrap();
    let abort = request.abort_handle();
    let mut body = request.end().await.unwrap().into_body();

    assert_eq!(body.next().await.unwrap().unwrap(), Bytes::from_static(b"first"));
    assert!(abort.abort());
    assert!(matches!(
        body.next().await,
        Some(Err(InterceptError::AbortedRequest))
    ));
    assert!(body.next().await.is_none());
    assert_eq!(
        event_names(&mut events),
        vec!["connect", "response", "data", "abort", "error", "close"]
    );
}

#[tokio::test]
async fn test_reply_stream_failure_is_a_callback_failure() {
    let (ctx, transport) = setup();
    let scope = Scope::new("http://x.test").unwrap();
    scope
        .get("/stream")
        .reply_stream(200, || {
            futures::stream::iter(vec![
                Ok(Bytes::from_static(b"a")),
                Err(std::io::Error::other("user stream broke")),
            ])
            .boxed()
        })
        .register(&ctx);

    let mut body = ctx
        .request_url("GET", "http://x.test/stream")
        .unwrap()
        .end()
        .await
        .unwrap()
        .into_body();
    assert_eq!(body.next().await.unwrap().unwrap(), Bytes::from_static(b"a"));
    let err = body.next().await.unwrap().unwrap_err();
    assert_eq!(err.kind(), crate::ErrorKind::UserCallbackFailure);
    assert!(err.to_string().contains("user stream broke"));
    assert!(transport.sent.lock().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_use_record_serves_one_concurrent_request() {
    let (ctx, _) = setup();
    ctx.disable_net_connect();
    let scope = Scope::new("http://x.test").unwrap();
    scope
        .get("/once")
        .reply_with_async(200, |_| async {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            Ok::<_, crate::error::BoxError>(crate::reply::ReplyBody::from("slow"))
        })
        .register(&ctx);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let ctx = ctx.clone();
            tokio::spawn(async move { ctx.request_url("GET", "http://x.test/once").unwrap().end().await })
        })
        .collect();

    let mut successes = 0;
    let mut unmatched = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(response) => {
                assert_eq!(response.text().await.unwrap(), "slow");
                successes += 1;
            }
            Err(InterceptError::UnmatchedRequest { .. }) => unmatched += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(successes, 1);
    assert_eq!(unmatched, 7);
    assert!(ctx.is_done());
}

#[tokio::test]
async fn test_resolve_retries_when_record_taken_during_matching() {
    use crate::context::Resolution;
    use crate::expectation::Expectation;
    use crate::predicate::PathMatcher;
    use std::sync::OnceLock;

    let (ctx, _) = setup();
    let scope = Scope::new("http://x.test").unwrap();
    let raced: Arc<OnceLock<Arc<Expectation>>> = Arc::new(OnceLock::new());

    // Unregisters itself while being matched, as a concurrent request would
    let first = {
        let closure_ctx = ctx.clone();
        let raced = Arc::clone(&raced);
        scope
            .get(PathMatcher::custom(move |path| {
                if let Some(record) = raced.get() {
                    closure_ctx.remove_interceptor(record);
                }
                path == "/r"
            }))
            .reply(200, "first")
            .register(&ctx)
    };
    raced.set(Arc::clone(&first)).unwrap();
    let second = scope.get("/r").reply(200, "second").register(&ctx);

    let head = crate::target::RequestHead::get("http://x.test/r").unwrap();
    let captured = CapturedRequest::capture(&head, b"");
    match ctx.resolve(&head, &captured) {
        Resolution::Matched(record) => assert_eq!(record.id(), second.id()),
        Resolution::Unmatched { .. } => panic!("expected the second record to match"),
    }
    assert!(ctx.is_done());
}

#[tokio::test(start_paused = true)]
async fn test_connection_and_body_delays() {
    let (ctx, _) = setup();
    let scope = Scope::new("http://x.test").unwrap();
    scope
        .get("/slow")
        .delay_connection(Duration::from_millis(200))
        .delay_body(Duration::from_millis(300))
        .reply(200, "late")
        .register(&ctx);

    let start = tokio::time::Instant::now();
    let response = ctx.request_url("GET", "http://x.test/slow").unwrap().end().await.unwrap();
    assert!(start.elapsed() >= Duration::from_millis(200));
    assert!(start.elapsed() < Duration::from_millis(500));
    assert_eq!(response.text().await.unwrap(), "late");
    assert!(start.elapsed() >= Duration::from_millis(500));
}

#[tokio::test(start_paused = true)]
async fn test_error_reply_after_delay() {
    let (ctx, _) = setup();
    let scope = Scope::new("http://x.test").unwrap();
    scope
        .get("/")
        .delay(Duration::from_millis(100))
        .reply_with_error(InterceptError::injected("boom"))
        .register(&ctx);

    let start = tokio::time::Instant::now();
    let err = ctx.request_url("GET", "http://x.test/").unwrap().end().await.unwrap_err();
    assert!(start.elapsed() >= Duration::from_millis(100));
    assert!(matches!(err, InterceptError::InjectedError { ref message, .. } if message == "boom"));
}

#[tokio::test(start_paused = true)]
async fn test_abort_during_delay_skips_reply() {
    let (ctx, _) = setup();
    let scope = Scope::new("http://x.test").unwrap();
    scope
        .get("/")
        .delay_connection(Duration::from_secs(10))
        .reply(200, "never")
        .register(&ctx);

    let request = ctx.request_url("GET", "http://x.test/").unwrap();
    let abort = request.abort_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        abort.abort();
    });
    let err = request.end().await.unwrap_err();
    assert!(matches!(err, InterceptError::AbortedRequest));
}

#[tokio::test]
async fn test_socket_delay_emits_timeout() {
    let (ctx, _) = setup();
    let scope = Scope::new("http://x.test").unwrap();
    scope
        .get("/")
        .delay_socket(Duration::from_millis(200))
        .reply(200, "ok")
        .register(&ctx);

    let mut request = ctx.request_url("GET", "http://x.test/").unwrap();
    request.set_timeout(Duration::from_millis(100));
    let mut events = request.take_events().unwrap();
    let response = request.end().await.unwrap();
    response.bytes().await.unwrap();

    let names = event_names(&mut events);
    assert_eq!(&names[..3], &["connect", "timeout", "response"]);
}

#[tokio::test]
async fn test_encoded_chunks_emitted_exactly() {
    let (ctx, _) = setup();
    let scope = Scope::new("http://x.test").unwrap();
    scope
        .get("/gz")
        .header("Content-Encoding", "gzip")
        .reply(200, vec!["1f8b".to_string(), "0800".to_string()])
        .register(&ctx);

    let mut body = ctx
        .request_url("GET", "http://x.test/gz")
        .unwrap()
        .end()
        .await
        .unwrap()
        .into_body();
    assert_eq!(body.next().await.unwrap().unwrap(), Bytes::from_static(&[0x1f, 0x8b]));
    assert_eq!(body.next().await.unwrap().unwrap(), Bytes::from_static(&[0x08, 0x00]));
    assert!(body.next().await.is_none());
}

#[tokio::test]
async fn test_bypass_passes_everything_through() {
    let (ctx, transport) = setup();
    let scope = Scope::new("http://x.test").unwrap();
    scope.get("/a").reply(200, "ok").register(&ctx);
    ctx.disable_net_connect();
    ctx.set_bypass(true);

    let response = ctx.request_url("GET", "http://x.test/a").unwrap().end().await.unwrap();
    assert_eq!(response.status(), 203);
    assert_eq!(transport.sent.lock().len(), 1);
    assert!(!ctx.is_done());
}

#[tokio::test]
async fn test_double_activation_fails() {
    let (ctx, _) = setup();
    assert!(matches!(ctx.activate(), Err(InterceptError::AlreadyActive)));
    ctx.deactivate();
    assert!(ctx.activate().is_ok());
}

#[test]
fn test_request_outside_runtime() {
    let ctx = InterceptContext::new(Arc::new(RecordingTransport::default()));
    assert!(matches!(
        ctx.request_url("GET", "http://x.test/"),
        Err(InterceptError::NoRuntime)
    ));
}

#[tokio::test]
async fn test_context_as_transport() {
    let (ctx, _) = setup();
    let scope = Scope::new("http://x.test").unwrap();
    scope.post("/echo").reply_with(200, |req| Ok(req.body.clone().into())).register(&ctx);

    let transport: Arc<dyn HttpTransport> = Arc::new(ctx.clone());
    let request = OutboundRequest::new(crate::target::RequestHead::post("http://x.test/echo").unwrap())
        .with_body("hello");
    let response = transport.send(request).await.unwrap();
    assert_eq!(response.text().await.unwrap(), "hello");
}

#[tokio::test]
#[tracing_test::traced_test]
async fn test_blocked_request_is_logged() {
    let (ctx, _) = setup();
    ctx.disable_net_connect();
    let _ = ctx.request_url("GET", "http://blocked.test/").unwrap().end().await;
    assert!(logs_contain("Net connect not allowed for blocked.test:80"));
}
