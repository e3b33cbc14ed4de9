//! Metric families for the gateway pipeline.
//!
//! Everything registers against the default registry on first use. Path
//! labels must already be normalized (`{id}` placeholders) before they get
//! here; raw paths would explode cardinality.

use std::sync::OnceLock;

use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    register_int_gauge_vec, Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge,
    IntGaugeVec, TextEncoder,
};

fn http_requests() -> &'static IntCounterVec {
    static METRIC: OnceLock<IntCounterVec> = OnceLock::new();
    METRIC.get_or_init(|| {
        register_int_counter_vec!(
            "gateway_http_requests_total",
            "Requests handled, by method, normalized path, and status",
            &["method", "path", "status"]
        )
        .expect("metric registration")
    })
}

fn http_duration() -> &'static HistogramVec {
    static METRIC: OnceLock<HistogramVec> = OnceLock::new();
    METRIC.get_or_init(|| {
        register_histogram_vec!(
            "gateway_http_request_duration_seconds",
            "End-to-end request latency, by method and normalized path",
            &["method", "path"]
        )
        .expect("metric registration")
    })
}

fn http_in_flight() -> &'static IntGauge {
    static METRIC: OnceLock<IntGauge> = OnceLock::new();
    METRIC.get_or_init(|| {
        register_int_gauge!(
            "gateway_http_in_flight",
            "Requests currently inside the pipeline"
        )
        .expect("metric registration")
    })
}

fn stage_duration() -> &'static HistogramVec {
    static METRIC: OnceLock<HistogramVec> = OnceLock::new();
    METRIC.get_or_init(|| {
        register_histogram_vec!(
            "gateway_stage_duration_seconds",
            "Per-stage latency of the request pipeline",
            &["stage"]
        )
        .expect("metric registration")
    })
}

fn admission_total() -> &'static IntCounterVec {
    static METRIC: OnceLock<IntCounterVec> = OnceLock::new();
    METRIC.get_or_init(|| {
        register_int_counter_vec!(
            "gateway_admission_total",
            "Admission decisions, by stage and outcome",
            &["stage", "outcome"]
        )
        .expect("metric registration")
    })
}

fn auth_total() -> &'static IntCounterVec {
    static METRIC: OnceLock<IntCounterVec> = OnceLock::new();
    METRIC.get_or_init(|| {
        register_int_counter_vec!(
            "gateway_auth_total",
            "Identity resolution outcomes",
            &["outcome"]
        )
        .expect("metric registration")
    })
}

fn rate_limit_total() -> &'static IntCounterVec {
    static METRIC: OnceLock<IntCounterVec> = OnceLock::new();
    METRIC.get_or_init(|| {
        register_int_counter_vec!(
            "gateway_rate_limit_total",
            "Rate-limit checks, by strategy and outcome",
            &["strategy", "outcome"]
        )
        .expect("metric registration")
    })
}

fn threats_total() -> &'static IntCounterVec {
    static METRIC: OnceLock<IntCounterVec> = OnceLock::new();
    METRIC.get_or_init(|| {
        register_int_counter_vec!(
            "gateway_threats_total",
            "Scanner detections, by threat type",
            &["kind"]
        )
        .expect("metric registration")
    })
}

fn breaker_transitions() -> &'static IntCounterVec {
    static METRIC: OnceLock<IntCounterVec> = OnceLock::new();
    METRIC.get_or_init(|| {
        register_int_counter_vec!(
            "gateway_breaker_transitions_total",
            "Circuit breaker transitions, by breaker and target state",
            &["breaker", "to"]
        )
        .expect("metric registration")
    })
}

fn bulkhead_queue_depth() -> &'static IntGaugeVec {
    static METRIC: OnceLock<IntGaugeVec> = OnceLock::new();
    METRIC.get_or_init(|| {
        register_int_gauge_vec!(
            "gateway_bulkhead_queue_depth",
            "Waiters queued on each bulkhead",
            &["bulkhead"]
        )
        .expect("metric registration")
    })
}

fn bulkhead_rejections() -> &'static IntCounterVec {
    static METRIC: OnceLock<IntCounterVec> = OnceLock::new();
    METRIC.get_or_init(|| {
        register_int_counter_vec!(
            "gateway_bulkhead_rejections_total",
            "Calls rejected because no permit arrived within the max wait",
            &["bulkhead"]
        )
        .expect("metric registration")
    })
}

fn upstream_status() -> &'static IntCounterVec {
    static METRIC: OnceLock<IntCounterVec> = OnceLock::new();
    METRIC.get_or_init(|| {
        register_int_counter_vec!(
            "gateway_upstream_status_total",
            "Upstream response statuses, by upstream",
            &["upstream", "status"]
        )
        .expect("metric registration")
    })
}

fn retries_total() -> &'static IntCounterVec {
    static METRIC: OnceLock<IntCounterVec> = OnceLock::new();
    METRIC.get_or_init(|| {
        register_int_counter_vec!(
            "gateway_retries_total",
            "Retry attempts scheduled, by upstream",
            &["upstream"]
        )
        .expect("metric registration")
    })
}

fn reputation_failures() -> &'static IntCounter {
    static METRIC: OnceLock<IntCounter> = OnceLock::new();
    METRIC.get_or_init(|| {
        register_int_counter!(
            "gateway_reputation_failures_total",
            "Reputation lookups that failed open"
        )
        .expect("metric registration")
    })
}

pub fn record_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    http_requests()
        .with_label_values(&[method, path, &status.to_string()])
        .inc();
    http_duration()
        .with_label_values(&[method, path])
        .observe(duration_secs);
}

pub fn inc_in_flight() {
    http_in_flight().inc();
}

pub fn dec_in_flight() {
    http_in_flight().dec();
}

pub fn record_stage(stage: &str, duration_secs: f64) {
    stage_duration().with_label_values(&[stage]).observe(duration_secs);
}

pub fn record_admission(stage: &str, outcome: &str) {
    admission_total().with_label_values(&[stage, outcome]).inc();
}

pub fn record_auth(outcome: &str) {
    auth_total().with_label_values(&[outcome]).inc();
}

pub fn record_rate_limit(strategy: &str, allowed: bool) {
    let outcome = if allowed { "allowed" } else { "blocked" };
    rate_limit_total()
        .with_label_values(&[strategy, outcome])
        .inc();
}

pub fn record_threat(kind: &str) {
    threats_total().with_label_values(&[kind]).inc();
}

pub fn record_breaker_transition(breaker: &str, to: &str) {
    breaker_transitions().with_label_values(&[breaker, to]).inc();
}

pub fn set_bulkhead_queue_depth(bulkhead: &str, depth: usize) {
    bulkhead_queue_depth()
        .with_label_values(&[bulkhead])
        .set(depth as i64);
}

pub fn record_bulkhead_rejection(bulkhead: &str) {
    bulkhead_rejections().with_label_values(&[bulkhead]).inc();
}

pub fn record_upstream_status(upstream: &str, status: u16) {
    upstream_status()
        .with_label_values(&[upstream, &status.to_string()])
        .inc();
}

pub fn record_retry(upstream: &str) {
    retries_total().with_label_values(&[upstream]).inc();
}

pub fn record_reputation_failure() {
    reputation_failures().inc();
}

/// Encode the default registry in Prometheus text format.
pub fn encode_metrics() -> String {
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Which paths the request-tracking layer skips.
#[derive(Clone)]
pub struct MetricsConfig {
    pub exclude_paths: Vec<String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        MetricsConfig {
            exclude_paths: vec!["/metrics".to_string(), "/health".to_string()],
        }
    }
}
