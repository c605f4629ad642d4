use std::sync::Arc;

use crate::core::{
    filter::{Filter, FilterRef, FilterType},
    message::{HttpRequestMessage, HttpResponseMessage},
};

/// A filter shared across event loops.
pub type SharedFilter<I, O> = Arc<dyn Filter<I, O> + Send + Sync>;

/// A registered filter of any stage.
#[derive(Clone)]
pub enum RegisteredFilter {
    Inbound(SharedFilter<HttpRequestMessage, HttpRequestMessage>),
    Endpoint(SharedFilter<HttpRequestMessage, HttpResponseMessage>),
    Outbound(SharedFilter<HttpResponseMessage, HttpResponseMessage>),
}

impl RegisteredFilter {
    pub fn filter_type(&self) -> FilterType {
        match self {
            RegisteredFilter::Inbound(_) => FilterType::Inbound,
            RegisteredFilter::Endpoint(_) => FilterType::Endpoint,
            RegisteredFilter::Outbound(_) => FilterType::Outbound,
        }
    }

    pub fn filter_name(&self) -> &str {
        match self {
            RegisteredFilter::Inbound(f) => f.filter_name(),
            RegisteredFilter::Endpoint(f) => f.filter_name(),
            RegisteredFilter::Outbound(f) => f.filter_name(),
        }
    }

    pub fn filter_order(&self) -> i32 {
        match self {
            RegisteredFilter::Inbound(f) => f.filter_order(),
            RegisteredFilter::Endpoint(f) => f.filter_order(),
            RegisteredFilter::Outbound(f) => f.filter_order(),
        }
    }

    pub fn into_inbound(self) -> Option<FilterRef<HttpRequestMessage, HttpRequestMessage>> {
        match self {
            RegisteredFilter::Inbound(f) => {
                let filter: FilterRef<HttpRequestMessage, HttpRequestMessage> = f;
                Some(filter)
            }
            _ => None,
        }
    }

    pub fn into_endpoint(self) -> Option<FilterRef<HttpRequestMessage, HttpResponseMessage>> {
        match self {
            RegisteredFilter::Endpoint(f) => {
                let filter: FilterRef<HttpRequestMessage, HttpResponseMessage> = f;
                Some(filter)
            }
            _ => None,
        }
    }

    pub fn into_outbound(self) -> Option<FilterRef<HttpResponseMessage, HttpResponseMessage>> {
        match self {
            RegisteredFilter::Outbound(f) => {
                let filter: FilterRef<HttpResponseMessage, HttpResponseMessage> = f;
                Some(filter)
            }
            _ => None,
        }
    }
}

impl std::fmt::Debug for RegisteredFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredFilter")
            .field("name", &self.filter_name())
            .field("type", &self.filter_type())
            .field("order", &self.filter_order())
            .finish()
    }
}

/// FilterRegistry defines the port (interface) for looking up filters by
/// name and stage.
pub trait FilterRegistry: Send + Sync + 'static {
    /// Find the filter registered under `name` for the given stage.
    fn lookup(&self, name: &str, filter_type: FilterType) -> Option<RegisteredFilter>;

    /// Every filter of a stage, sorted by ascending order.
    fn filters_by_type(&self, filter_type: FilterType) -> Vec<RegisteredFilter>;
}
