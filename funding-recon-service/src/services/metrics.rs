//! Prometheus metrics for funding-recon-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};

/// Histogram for database query duration by operation.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "funding_recon_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Counter for leg upserts by leg kind.
pub static LEG_UPSERTS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "funding_recon_leg_upserts_total",
        "Total number of leg upserts",
        &["leg"]
    )
    .expect("Failed to register LEG_UPSERTS")
});

/// Counter for sync cycles by outcome.
pub static SYNC_CYCLES: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "funding_recon_sync_cycles_total",
        "Total number of sync cycles",
        &["outcome"]
    )
    .expect("Failed to register SYNC_CYCLES")
});

/// Counter for per-source sync step results.
pub static SYNC_SOURCE_RESULTS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "funding_recon_sync_source_results_total",
        "Per-source sync step results",
        &["source", "status"]
    )
    .expect("Failed to register SYNC_SOURCE_RESULTS")
});

/// Counter for funding matches by method.
pub static FUNDING_MATCHES: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "funding_recon_funding_matches_total",
        "Total number of funding match decisions",
        &["method"]
    )
    .expect("Failed to register FUNDING_MATCHES")
});

/// Counter for errors.
pub static ERRORS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "funding_recon_errors_total",
        "Total number of errors",
        &["error_type"]
    )
    .expect("Failed to register ERRORS")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&DB_QUERY_DURATION);
    Lazy::force(&LEG_UPSERTS);
    Lazy::force(&SYNC_CYCLES);
    Lazy::force(&SYNC_SOURCE_RESULTS);
    Lazy::force(&FUNDING_MATCHES);
    Lazy::force(&ERRORS);
}

/// Get all metrics as Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

/// Record a leg upsert.
pub fn record_leg_upsert(leg: &str) {
    LEG_UPSERTS.with_label_values(&[leg]).inc();
}

/// Record a sync cycle outcome.
pub fn record_sync_cycle(outcome: &str) {
    SYNC_CYCLES.with_label_values(&[outcome]).inc();
}

/// Record a per-source sync step result.
pub fn record_sync_source(source: &str, status: &str) {
    SYNC_SOURCE_RESULTS.with_label_values(&[source, status]).inc();
}

/// Record a funding match decision.
pub fn record_funding_match(method: &str) {
    FUNDING_MATCHES.with_label_values(&[method]).inc();
}

/// Record an error.
pub fn record_error(error_type: &str) {
    ERRORS.with_label_values(&[error_type]).inc();
}
