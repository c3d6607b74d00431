//! Fan-out Metrics
//!
//! Prometheus metrics for the news feed materializer, plus the `/metrics`
//! endpoint rendering the default registry.

use actix_web::HttpResponse;
use once_cell::sync::Lazy;
use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter, register_int_counter_vec,
    register_int_gauge, Encoder, Histogram, HistogramVec, IntCounter, IntCounterVec, IntGauge,
    TextEncoder,
};
use std::time::Duration;

static FANOUT_JOBS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "fanout_jobs_total",
        "Fan-out job attempts by outcome (completed/partially_failed/failed)",
        &["status"]
    )
    .expect("Failed to register fanout jobs metric")
});

static FANOUT_ENTRIES_WRITTEN_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "fanout_entries_written_total",
        "Feed entries newly written by fan-out"
    )
    .expect("Failed to register fanout entries metric")
});

static FANOUT_WRITE_FAILURES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "fanout_write_failures_total",
        "Feed entries that could not be written after retries"
    )
    .expect("Failed to register fanout write failures metric")
});

static FANOUT_JOB_DURATION_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "fanout_job_duration_seconds",
        "Duration of a single fan-out attempt",
        vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0]
    )
    .expect("Failed to register fanout duration metric")
});

static FANOUT_QUEUE_DEPTH: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "fanout_queue_depth",
        "Fan-out jobs waiting in the dispatcher queue"
    )
    .expect("Failed to register fanout queue depth metric")
});

static FANOUT_QUEUE_OVERFLOW_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "fanout_queue_overflow_total",
        "Fan-out jobs that found the queue full and had to wait for room"
    )
    .expect("Failed to register fanout queue overflow metric")
});

static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "feed_service_http_requests_total",
        "Total HTTP requests handled by feed-service",
        &["method", "path", "status"]
    )
    .expect("Failed to register http requests metric")
});

static HTTP_REQUEST_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "feed_service_http_request_duration_seconds",
        "HTTP request latencies for feed-service",
        &["method", "path", "status"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .expect("Failed to register http duration metric")
});

/// `path` should be the matched route pattern, not the raw path
pub fn observe_http_request(method: &str, path: &str, status: u16, duration: Duration) {
    let status = status.to_string();
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path, &status])
        .observe(duration.as_secs_f64());
}

pub fn record_job(status: &str) {
    FANOUT_JOBS_TOTAL.with_label_values(&[status]).inc();
}

pub fn record_entries_written(count: usize) {
    FANOUT_ENTRIES_WRITTEN_TOTAL.inc_by(count as u64);
}

pub fn record_write_failures(count: usize) {
    FANOUT_WRITE_FAILURES_TOTAL.inc_by(count as u64);
}

pub fn observe_job_duration(duration: Duration) {
    FANOUT_JOB_DURATION_SECONDS.observe(duration.as_secs_f64());
}

pub fn set_queue_depth(depth: usize) {
    FANOUT_QUEUE_DEPTH.set(depth as i64);
}

pub fn record_queue_overflow() {
    FANOUT_QUEUE_OVERFLOW_TOTAL.inc();
}

/// Render every registered metric in the Prometheus text format
pub async fn serve_metrics() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %err, "Failed to encode metrics");
        return HttpResponse::InternalServerError().body(err.to_string());
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}
