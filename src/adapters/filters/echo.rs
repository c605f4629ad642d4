use http::{HeaderValue, StatusCode, header::CONTENT_TYPE};

use crate::{
    config::models::SharedSettings,
    core::{
        error::FilterResult,
        filter::{ConcurrencyCounter, Filter, FilterFuture, FilterMeta, FilterSyncType, FilterType},
        message::{HttpRequestMessage, HttpResponseMessage, Message},
    },
};

/// Asynchronous endpoint that answers with the full request body.
///
/// In-flight echoes are bounded by the concurrency settings current at the
/// time each one starts, so a settings reload applies to the next request.
#[derive(Debug)]
pub struct EchoEndpoint {
    concurrency: ConcurrencyCounter,
    settings: SharedSettings,
    disabled: bool,
}

impl EchoEndpoint {
    pub const NAME: &'static str = "endpoint.Echo";

    pub fn new(settings: SharedSettings) -> Self {
        Self {
            concurrency: ConcurrencyCounter::unbounded(),
            settings,
            disabled: false,
        }
    }

    pub fn disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    pub fn in_flight(&self) -> usize {
        self.concurrency.current()
    }
}

impl FilterMeta for EchoEndpoint {
    fn filter_name(&self) -> &str {
        Self::NAME
    }

    fn filter_type(&self) -> FilterType {
        FilterType::Endpoint
    }
}

impl Filter<HttpRequestMessage, HttpResponseMessage> for EchoEndpoint {
    fn is_disabled(&self) -> bool {
        self.disabled
    }

    fn needs_body_buffered(&self, _input: &HttpRequestMessage) -> bool {
        true
    }

    fn sync_type(&self) -> FilterSyncType {
        FilterSyncType::Async
    }

    fn apply_async(&self, input: &HttpRequestMessage) -> FilterResult<FilterFuture<HttpResponseMessage>> {
        let response = HttpResponseMessage::new(input.context().clone(), input, StatusCode::OK);
        let content_type = input
            .head()
            .headers
            .get(CONTENT_TYPE)
            .cloned()
            .unwrap_or_else(|| HeaderValue::from_static("application/octet-stream"));
        response.set_header(CONTENT_TYPE, content_type);
        let body = input.body_bytes();

        Ok(Box::pin(async move {
            tokio::task::yield_now().await;
            response.set_body(body);
            Ok(Some(response))
        }))
    }

    fn default_output(&self, input: &HttpRequestMessage) -> HttpResponseMessage {
        HttpResponseMessage::default_error_response(input)
    }

    fn increment_concurrency(&self) -> FilterResult<()> {
        let limit = self.settings.load().concurrency_limit_for(Self::NAME);
        self.concurrency.increment_within(Self::NAME, limit)
    }

    fn decrement_concurrency(&self) {
        self.concurrency.decrement();
    }
}
