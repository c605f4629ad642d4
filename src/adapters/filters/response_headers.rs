use http::{HeaderName, HeaderValue};

use crate::core::{
    error::FilterResult,
    filter::{Filter, FilterMeta, FilterType},
    message::{HttpResponseMessage, Message},
};

/// Response header carrying the exchange id.
pub const EXCHANGE_ID_HEADER: &str = "x-exchange-id";

/// Stamps the exchange id and configured headers on every response.
#[derive(Debug, Clone, Default)]
pub struct ResponseHeadersFilter {
    headers: Vec<(HeaderName, HeaderValue)>,
    disabled: bool,
}

impl ResponseHeadersFilter {
    pub const NAME: &'static str = "outbound.ResponseHeaders";

    /// Entries that are not valid header names or values are ignored.
    pub fn new<'a>(headers: impl IntoIterator<Item = (&'a String, &'a String)>) -> Self {
        let headers = headers
            .into_iter()
            .filter_map(|(name, value)| {
                let name = HeaderName::try_from(name.as_str()).ok()?;
                let value = HeaderValue::try_from(value.as_str()).ok()?;
                Some((name, value))
            })
            .collect();
        Self {
            headers,
            disabled: false,
        }
    }

    pub fn disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }
}

impl FilterMeta for ResponseHeadersFilter {
    fn filter_name(&self) -> &str {
        Self::NAME
    }

    fn filter_type(&self) -> FilterType {
        FilterType::Outbound
    }

    fn filter_order(&self) -> i32 {
        100
    }
}

impl Filter<HttpResponseMessage, HttpResponseMessage> for ResponseHeadersFilter {
    fn is_disabled(&self) -> bool {
        self.disabled
    }

    // Error responses get the exchange id too.
    fn override_stop_filter_processing(&self) -> bool {
        true
    }

    fn apply(&self, input: &HttpResponseMessage) -> FilterResult<Option<HttpResponseMessage>> {
        let context = input.context();
        let mut headers = input.headers_mut();
        if let Ok(id) = HeaderValue::try_from(context.uuid().to_string()) {
            headers.insert(HeaderName::from_static(EXCHANGE_ID_HEADER), id);
        }
        for (name, value) in &self.headers {
            headers.insert(name.clone(), value.clone());
        }
        drop(headers);

        if context.debug_routing() {
            tracing::debug!(
                uuid = %context.uuid(),
                routing = ?context.routing_debug(),
                "Routing debug"
            );
        }
        Ok(None)
    }

    fn default_output(&self, input: &HttpResponseMessage) -> HttpResponseMessage {
        input.clone()
    }
}
