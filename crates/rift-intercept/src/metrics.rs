//! Prometheus metrics for request interception.
//!
//! Counts how requests were resolved, aborts, synthesized replies and the
//! artificial delay injected by expectations.
use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram_vec, Counter, CounterVec,
    Encoder, HistogramVec, TextEncoder,
};
use std::time::Duration;

lazy_static! {
    /// Intercepted requests by how they were resolved
    pub static ref REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "rift_intercept_requests_total",
        "Total number of intercepted requests",
        &["method", "outcome"]  // outcome: matched|passthrough|unmatched|blocked|aborted
    )
    .unwrap();

    pub static ref ABORTS_TOTAL: Counter = register_counter!(
        "rift_intercept_aborts_total",
        "Total number of aborted requests"
    )
    .unwrap();

    /// Completed synthesized replies
    pub static ref REPLIES_TOTAL: CounterVec = register_counter_vec!(
        "rift_intercept_replies_total",
        "Total number of synthesized replies",
        &["status"]
    )
    .unwrap();

    pub static ref REPLY_DELAY_MS: HistogramVec = register_histogram_vec!(
        "rift_intercept_reply_delay_ms",
        "Histogram of artificial reply delay in milliseconds",
        &["kind"],  // kind: connection|body|socket
        vec![10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0]
    )
    .unwrap();
}

/// Collect and return all metrics in Prometheus text format
pub fn collect_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

pub fn record_request(method: &str, outcome: &str) {
    REQUESTS_TOTAL.with_label_values(&[method, outcome]).inc();
}

pub fn record_abort() {
    ABORTS_TOTAL.inc();
}

pub fn record_reply(status: u16) {
    REPLIES_TOTAL
        .with_label_values(&[&status.to_string()])
        .inc();
}

/// Zero delays are not recorded.
pub fn record_delay(kind: &str, delay: Duration) {
    if delay.is_zero() {
        return;
    }
    REPLY_DELAY_MS
        .with_label_values(&[kind])
        .observe(delay.as_secs_f64() * 1000.0);
}
