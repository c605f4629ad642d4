use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::core::{
    attrs::AttrKey,
    error::FilterResult,
    filter::{Filter, FilterMeta, FilterType},
    message::{HttpRequestMessage, Message},
};

/// Route prefix the request matched, stored on the exchange.
pub static MATCHED_ROUTE: Lazy<AttrKey<String>> = Lazy::new(|| AttrKey::new("route.prefix"));

/// Longest-prefix route table mapping request paths to endpoint names.
#[derive(Debug, Clone)]
pub struct RouteFilter {
    routes: Vec<(String, String)>,
    disabled: bool,
}

impl RouteFilter {
    pub const NAME: &'static str = "inbound.Route";

    pub fn new(routes: &HashMap<String, String>) -> Self {
        let mut routes: Vec<(String, String)> = routes
            .iter()
            .map(|(prefix, endpoint)| (prefix.clone(), endpoint.clone()))
            .collect();
        routes.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
        Self {
            routes,
            disabled: false,
        }
    }

    pub fn disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    /// Prefix and endpoint name of the most specific route matching `path`.
    pub fn route_for(&self, path: &str) -> Option<(&str, &str)> {
        self.routes
            .iter()
            .find(|(prefix, _)| prefix_matches(prefix, path))
            .map(|(prefix, endpoint)| (prefix.as_str(), endpoint.as_str()))
    }
}

fn prefix_matches(prefix: &str, path: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || prefix.ends_with('/') || rest.starts_with('/'),
        None => false,
    }
}

impl FilterMeta for RouteFilter {
    fn filter_name(&self) -> &str {
        Self::NAME
    }

    fn filter_type(&self) -> FilterType {
        FilterType::Inbound
    }

    fn filter_order(&self) -> i32 {
        10
    }
}

impl Filter<HttpRequestMessage, HttpRequestMessage> for RouteFilter {
    fn is_disabled(&self) -> bool {
        self.disabled
    }

    fn should_filter(&self, input: &HttpRequestMessage) -> bool {
        input.context().endpoint().is_none()
    }

    fn apply(&self, input: &HttpRequestMessage) -> FilterResult<Option<HttpRequestMessage>> {
        let path = input.path();
        if let Some((prefix, endpoint)) = self.route_for(&path) {
            let context = input.context();
            context.put(&MATCHED_ROUTE, prefix.to_string());
            context.set_endpoint(endpoint);
        }
        Ok(None)
    }

    fn default_output(&self, input: &HttpRequestMessage) -> HttpRequestMessage {
        input.clone()
    }
}
