//! Prometheus metrics for the payroll gateway.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter, register_counter_vec, register_histogram_vec, Counter, CounterVec,
    HistogramVec, TextEncoder,
};

/// Payroll operation counter.
pub static PAYROLLS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "payroll_operations_total",
        "Total number of payroll operations",
        &["operation"] // created, approved, paid, cancelled, replay
    )
    .expect("Failed to register payroll_operations_total")
});

/// Advance installments recorded through payroll runs.
pub static ADVANCE_INSTALLMENTS_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "payroll_advance_installments_total",
        "Total number of advance installments deducted"
    )
    .expect("Failed to register advance_installments_total")
});

/// Error counter for alerting.
pub static ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "payroll_errors_total",
        "Total number of errors by type",
        &["error_type"]
    )
    .expect("Failed to register payroll_errors_total")
});

/// Database query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "payroll_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register payroll_db_query_duration")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&PAYROLLS_TOTAL);
    Lazy::force(&ADVANCE_INSTALLMENTS_TOTAL);
    Lazy::force(&ERRORS_TOTAL);
    Lazy::force(&DB_QUERY_DURATION);
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}
