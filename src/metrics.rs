//! Metrics helpers for sluice.
//!
//! Thin wrappers over the `metrics` crate macros. No exporter is embedded; the
//! application installs whichever recorder it wants and these calls become
//! no-ops when none is installed.
//!
//! Provided metrics:
//! * `sluice_filter_excessive_seconds` (histogram, labels: id, status)
//! * `sluice_filter_chain_hanging_total` (counter, labels: kind, message)
//! * `sluice_filter_executions_total` (counter, labels: id, type, status)
//! * `sluice_exchanges_total` (counter, labels: method, status)
//! * `sluice_exchange_duration_seconds` (histogram, labels: method)
//! * `sluice_active_exchanges` (gauge)
use std::time::{Duration, Instant};

use metrics::{Unit, counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use once_cell::sync::Lazy;

pub const SLUICE_FILTER_EXCESSIVE_SECONDS: &str = "sluice_filter_excessive_seconds";
pub const SLUICE_FILTER_CHAIN_HANGING_TOTAL: &str = "sluice_filter_chain_hanging_total";
pub const SLUICE_FILTER_EXECUTIONS_TOTAL: &str = "sluice_filter_executions_total";
pub const SLUICE_EXCHANGES_TOTAL: &str = "sluice_exchanges_total";
pub const SLUICE_EXCHANGE_DURATION_SECONDS: &str = "sluice_exchange_duration_seconds";
pub const SLUICE_ACTIVE_EXCHANGES: &str = "sluice_active_exchanges";

static DESCRIPTIONS: Lazy<()> = Lazy::new(|| {
    describe_histogram!(
        SLUICE_FILTER_EXCESSIVE_SECONDS,
        Unit::Seconds,
        "Execution time of filters that ran longer than the excessive threshold."
    );
    describe_counter!(
        SLUICE_FILTER_CHAIN_HANGING_TOTAL,
        Unit::Count,
        "Messages or chunks that reached the end of the pipeline after the client disconnected."
    );
    describe_counter!(
        SLUICE_FILTER_EXECUTIONS_TOTAL,
        Unit::Count,
        "Filter invocations by terminal status."
    );
    describe_counter!(
        SLUICE_EXCHANGES_TOTAL,
        Unit::Count,
        "Total number of exchanges answered."
    );
    describe_histogram!(
        SLUICE_EXCHANGE_DURATION_SECONDS,
        Unit::Seconds,
        "Time from request head to response head."
    );
    describe_gauge!(
        SLUICE_ACTIVE_EXCHANGES,
        "Number of exchanges currently in flight."
    );
});

/// Record a filter execution that took at least the excessive threshold.
pub fn record_filter_excessive_time(filter: &str, status: &str, elapsed: Duration) {
    histogram!(
        SLUICE_FILTER_EXCESSIVE_SECONDS,
        "id" => filter.to_string(),
        "status" => status.to_string()
    )
    .record(elapsed.as_secs_f64());
}

/// Count output dropped because the connection was gone.
pub fn increment_chain_hanging(kind: &str, message: &str) {
    counter!(
        SLUICE_FILTER_CHAIN_HANGING_TOTAL,
        "kind" => kind.to_string(),
        "message" => message.to_string()
    )
    .increment(1);
}

/// Count one filter invocation.
pub fn increment_filter_executions(filter: &str, filter_type: &str, status: &str) {
    counter!(
        SLUICE_FILTER_EXECUTIONS_TOTAL,
        "id" => filter.to_string(),
        "type" => filter_type.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

pub fn increment_exchanges_total(method: &str, status: u16) {
    counter!(
        SLUICE_EXCHANGES_TOTAL,
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

pub fn record_exchange_duration(method: &str, duration: Duration) {
    histogram!(SLUICE_EXCHANGE_DURATION_SECONDS, "method" => method.to_string())
        .record(duration.as_secs_f64());
}

/// RAII helper measuring exchange duration and tracking the active gauge.
pub struct ExchangeTimer {
    start: Instant,
    method: String,
}

impl ExchangeTimer {
    pub fn new(method: &str) -> Self {
        gauge!(SLUICE_ACTIVE_EXCHANGES).increment(1.0);
        Self {
            start: Instant::now(),
            method: method.to_string(),
        }
    }
}

impl Drop for ExchangeTimer {
    fn drop(&mut self) {
        gauge!(SLUICE_ACTIVE_EXCHANGES).decrement(1.0);
        record_exchange_duration(&self.method, self.start.elapsed());
    }
}

/// Register metric descriptions (idempotent).
pub fn init_metrics() -> eyre::Result<()> {
    Lazy::force(&DESCRIPTIONS);
    tracing::info!("sluice metrics described");
    Ok(())
}
