use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::{
    core::{
        filter::{Filter, FilterType},
        message::{HttpRequestMessage, HttpResponseMessage},
    },
    ports::filter_registry::{FilterRegistry, RegisteredFilter},
};

/// Copy-on-write registry of filters keyed by `(name, type)`.
///
/// Readers never block; registering replaces the whole list atomically, so
/// a pipeline built from an older list keeps working unchanged.
#[derive(Default)]
pub struct InMemoryFilterRegistry {
    filters: ArcSwap<Vec<RegisteredFilter>>,
}

impl InMemoryFilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `filter`, replacing any filter with the same name and type.
    pub fn register(&self, filter: RegisteredFilter) {
        self.filters.rcu(|current| {
            let mut next: Vec<RegisteredFilter> = current
                .iter()
                .filter(|f| {
                    !(f.filter_type() == filter.filter_type() && f.filter_name() == filter.filter_name())
                })
                .cloned()
                .collect();
            next.push(filter.clone());
            next
        });
        tracing::debug!(
            filter = filter.filter_name(),
            filter_type = %filter.filter_type(),
            order = filter.filter_order(),
            "Filter registered"
        );
    }

    pub fn register_inbound<F>(&self, filter: F)
    where
        F: Filter<HttpRequestMessage, HttpRequestMessage> + Send + Sync + 'static,
    {
        self.register(RegisteredFilter::Inbound(Arc::new(filter)));
    }

    pub fn register_endpoint<F>(&self, filter: F)
    where
        F: Filter<HttpRequestMessage, HttpResponseMessage> + Send + Sync + 'static,
    {
        self.register(RegisteredFilter::Endpoint(Arc::new(filter)));
    }

    pub fn register_outbound<F>(&self, filter: F)
    where
        F: Filter<HttpResponseMessage, HttpResponseMessage> + Send + Sync + 'static,
    {
        self.register(RegisteredFilter::Outbound(Arc::new(filter)));
    }

    pub fn len(&self) -> usize {
        self.filters.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.load().is_empty()
    }
}

impl FilterRegistry for InMemoryFilterRegistry {
    fn lookup(&self, name: &str, filter_type: FilterType) -> Option<RegisteredFilter> {
        self.filters
            .load()
            .iter()
            .find(|f| f.filter_type() == filter_type && f.filter_name() == name)
            .cloned()
    }

    fn filters_by_type(&self, filter_type: FilterType) -> Vec<RegisteredFilter> {
        let mut filters: Vec<RegisteredFilter> = self
            .filters
            .load()
            .iter()
            .filter(|f| f.filter_type() == filter_type)
            .cloned()
            .collect();
        filters.sort_by_key(RegisteredFilter::filter_order);
        filters
    }
}
