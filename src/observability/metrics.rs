//! # Broker Metrics
//!
//! Prometheus metrics for credential minting, the credential cache, the metadata
//! surface and the watch bridges.

use anyhow::Result;
use prometheus::{Encoder, Histogram, IntCounter, IntCounterVec, Registry, TextEncoder};
use std::sync::LazyLock;

/// Global Prometheus metrics registry
pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Upstream STS metrics
static STS_REQUEST_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "iam_broker_sts_request_duration_seconds",
            "Duration of upstream AssumeRole calls in seconds",
        )
        .buckets(vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]),
    )
    .expect("Failed to create STS_REQUEST_DURATION metric - this should never happen")
});

static ASSUME_ROLE_RESULTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "iam_broker_assume_role_results_total",
            "Total number of upstream AssumeRole calls by result code",
        ),
        &["code"],
    )
    .expect("Failed to create ASSUME_ROLE_RESULTS_TOTAL metric - this should never happen")
});

// Credential cache metrics
static CREDENTIAL_CACHE_HITS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "iam_broker_credential_cache_hits_total",
        "Total number of credential requests served from cache",
    )
    .expect("Failed to create CREDENTIAL_CACHE_HITS_TOTAL metric - this should never happen")
});

static CREDENTIAL_CACHE_MISSES_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "iam_broker_credential_cache_misses_total",
        "Total number of credential requests that started an upstream fetch",
    )
    .expect("Failed to create CREDENTIAL_CACHE_MISSES_TOTAL metric - this should never happen")
});

// Metadata surface metrics
static HTTP_RESPONSES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "iam_broker_http_responses_total",
            "Total number of metadata responses by handler and status",
        ),
        &["handler", "status"],
    )
    .expect("Failed to create HTTP_RESPONSES_TOTAL metric - this should never happen")
});

// Watch metrics
static WATCH_EVENTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "iam_broker_watch_events_total",
            "Total number of processed watch events by resource and kind",
        ),
        &["resource", "kind"],
    )
    .expect("Failed to create WATCH_EVENTS_TOTAL metric - this should never happen")
});

/// Register all metrics with the Prometheus registry
#[allow(
    clippy::missing_errors_doc,
    reason = "Error documentation is provided in doc comments"
)]
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(STS_REQUEST_DURATION.clone()))?;
    REGISTRY.register(Box::new(ASSUME_ROLE_RESULTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CREDENTIAL_CACHE_HITS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CREDENTIAL_CACHE_MISSES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(HTTP_RESPONSES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(WATCH_EVENTS_TOTAL.clone()))?;
    Ok(())
}

/// Render every registered metric in the Prometheus text format
pub fn gather_text() -> Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

pub fn observe_sts_request_duration(seconds: f64) {
    STS_REQUEST_DURATION.observe(seconds);
}

pub fn increment_assume_role_results(code: &str) {
    ASSUME_ROLE_RESULTS_TOTAL.with_label_values(&[code]).inc();
}

pub fn increment_credential_cache_hits() {
    CREDENTIAL_CACHE_HITS_TOTAL.inc();
}

pub fn increment_credential_cache_misses() {
    CREDENTIAL_CACHE_MISSES_TOTAL.inc();
}

pub fn increment_http_responses(handler: &str, status: u16) {
    let status = status.to_string();
    HTTP_RESPONSES_TOTAL
        .with_label_values(&[handler, status.as_str()])
        .inc();
}

pub fn increment_watch_events(resource: &str, kind: &str) {
    WATCH_EVENTS_TOTAL.with_label_values(&[resource, kind]).inc();
}
