//! Prometheus metrics for crop-ledger-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, HistogramVec, TextEncoder,
};

/// Journal entries written, by source and status.
pub static JOURNAL_ENTRIES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "crop_ledger_journal_entries_total",
        "Total number of journal entries written",
        &["source_type", "status"]
    )
    .expect("Failed to register journal_entries_total")
});

/// Cardex movements appended, by movement type.
pub static INVENTORY_MOVEMENTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "crop_ledger_inventory_movements_total",
        "Total number of inventory movements recorded",
        &["movement_type"]
    )
    .expect("Failed to register inventory_movements_total")
});

/// Guarded deletions by entity kind and outcome.
pub static DELETIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "crop_ledger_deletions_total",
        "Total number of master record deletion attempts",
        &["entity_type", "outcome"] // deleted, conflicted, migrated, forced, cancelled
    )
    .expect("Failed to register deletions_total")
});

/// Error counter for alerting.
pub static ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "crop_ledger_errors_total",
        "Total number of errors by type",
        &["error_type"]
    )
    .expect("Failed to register errors_total")
});

/// Database query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "crop_ledger_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register db_query_duration")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&JOURNAL_ENTRIES_TOTAL);
    Lazy::force(&INVENTORY_MOVEMENTS_TOTAL);
    Lazy::force(&DELETIONS_TOTAL);
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
