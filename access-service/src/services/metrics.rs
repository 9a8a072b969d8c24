//! Prometheus metrics for access-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, HistogramVec, IntCounterVec, TextEncoder,
};

/// Database query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "access_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register db_query_duration")
});

/// Webhook deliveries by outcome (rejected, ignored, provisioned, conflict, error).
pub static WEBHOOK_EVENTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "access_webhook_events_total",
        "Total number of contract webhook deliveries",
        &["outcome"]
    )
    .expect("Failed to register webhook_events_total")
});

/// Mutations refused because they would break a group invariant.
pub static INVARIANT_REJECTIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "access_invariant_rejections_total",
        "Total number of mutations rejected by a group invariant",
        &["operation"]
    )
    .expect("Failed to register invariant_rejections_total")
});

/// Background job attempts by job name and final status.
pub static BACKGROUND_JOBS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "access_background_jobs_total",
        "Total number of background jobs by final status",
        &["job", "status"]
    )
    .expect("Failed to register background_jobs_total")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&DB_QUERY_DURATION);
    Lazy::force(&WEBHOOK_EVENTS_TOTAL);
    Lazy::force(&INVARIANT_REJECTIONS_TOTAL);
    Lazy::force(&BACKGROUND_JOBS_TOTAL);
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_are_exposed() {
        init_metrics();
        WEBHOOK_EVENTS_TOTAL.with_label_values(&["ignored"]).inc();
        let text = get_metrics();
        assert!(text.contains("access_webhook_events_total"));
    }
}
