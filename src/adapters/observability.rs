//! Metrics- and log-backed implementations of the engine's reporting ports.
use std::time::Duration;

use crate::{
    core::filter::{ExecutionStatus, FilterMeta},
    metrics,
    ports::{
        filter_metrics::{FilterMetrics, HangingKind},
        usage_notifier::FilterUsageNotifier,
    },
};

/// Counts every filter invocation by status.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsUsageNotifier;

impl FilterUsageNotifier for MetricsUsageNotifier {
    fn notify(&self, filter: &dyn FilterMeta, status: ExecutionStatus) {
        metrics::increment_filter_executions(
            filter.filter_name(),
            filter.filter_type().as_str(),
            status.as_str(),
        );
        tracing::trace!(
            filter = filter.filter_name(),
            filter_type = %filter.filter_type(),
            status = %status,
            "Filter usage"
        );
    }
}

/// Forwards engine metrics to the `metrics` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsFilterMetrics;

impl FilterMetrics for MetricsFilterMetrics {
    fn record_excessive_execution(&self, filter_name: &str, status: ExecutionStatus, elapsed: Duration) {
        tracing::debug!(
            filter = filter_name,
            status = %status,
            elapsed_ms = elapsed.as_millis() as u64,
            "Excessive filter execution time"
        );
        metrics::record_filter_excessive_time(filter_name, status.as_str(), elapsed);
    }

    fn increment_hanging(&self, kind: HangingKind, message_kind: &str) {
        metrics::increment_chain_hanging(kind.as_str(), message_kind);
    }
}
