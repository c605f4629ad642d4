use crate::core::filter::{ExecutionStatus, FilterMeta};

/// Receives exactly one notification per filter invocation per exchange.
pub trait FilterUsageNotifier: Send + Sync + 'static {
    fn notify(&self, filter: &dyn FilterMeta, status: ExecutionStatus);
}
