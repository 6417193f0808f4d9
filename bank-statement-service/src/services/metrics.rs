//! Prometheus metrics for bank-statement-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};

/// Histogram for database query duration.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "bank_statement_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Counter for import jobs by final status.
pub static STATEMENT_IMPORTS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "bank_statement_imports_total",
        "Total number of statement import jobs",
        &["status"]
    )
    .expect("Failed to register STATEMENT_IMPORTS")
});

/// Histogram for end-to-end import job duration.
pub static IMPORT_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "bank_statement_import_duration_seconds",
        "Statement import job duration in seconds",
        &["status"],
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]
    )
    .expect("Failed to register IMPORT_DURATION")
});

/// Counter for parsed statement lines by outcome (inserted, duplicate).
pub static STATEMENT_LINES: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "bank_statement_lines_total",
        "Total number of parsed statement lines",
        &["outcome"]
    )
    .expect("Failed to register STATEMENT_LINES")
});

/// Counter for reconciliation outcomes by method (auto, retry, manual).
pub static RECONCILIATIONS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "bank_statement_reconciliations_total",
        "Total number of statement reconciliation attempts",
        &["method", "result"]
    )
    .expect("Failed to register RECONCILIATIONS")
});

/// Counter for errors.
pub static ERRORS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "bank_statement_errors_total",
        "Total number of errors",
        &["error_type"]
    )
    .expect("Failed to register ERRORS")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&DB_QUERY_DURATION);
    Lazy::force(&STATEMENT_IMPORTS);
    Lazy::force(&IMPORT_DURATION);
    Lazy::force(&STATEMENT_LINES);
    Lazy::force(&RECONCILIATIONS);
    Lazy::force(&ERRORS);
}

/// Get all metrics as Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Record an error.
pub fn record_error(error_type: &str) {
    ERRORS.with_label_values(&[error_type]).inc();
}

/// Record a finished import job.
pub fn record_statement_import(status: &str, duration_secs: f64) {
    STATEMENT_IMPORTS.with_label_values(&[status]).inc();
    IMPORT_DURATION
        .with_label_values(&[status])
        .observe(duration_secs);
}

/// Record parsed lines by outcome.
pub fn record_statement_lines(outcome: &str, count: usize) {
    STATEMENT_LINES
        .with_label_values(&[outcome])
        .inc_by(count as f64);
}

/// Record a reconciliation attempt.
pub fn record_reconciliation(method: &str, matched: bool) {
    let result = if matched { "matched" } else { "unmatched" };
    RECONCILIATIONS.with_label_values(&[method, result]).inc();
}
