//! Endpoints the runner substitutes when no registered endpoint applies.
use std::rc::Rc;

use http::StatusCode;
use tracing::error;

use crate::core::{
    error::{FilterError, FilterResult},
    filter::{Filter, FilterMeta, FilterType},
    message::{HttpRequestMessage, HttpResponseMessage, Message},
};

/// Emits the response a filter stashed on the exchange context.
#[derive(Debug, Default, Clone, Copy)]
pub struct StaticResponseEndpoint;

impl StaticResponseEndpoint {
    pub const NAME: &'static str = "endpoint.StaticResponse";
}

impl FilterMeta for StaticResponseEndpoint {
    fn filter_name(&self) -> &str {
        Self::NAME
    }

    fn filter_type(&self) -> FilterType {
        FilterType::Endpoint
    }
}

impl Filter<HttpRequestMessage, HttpResponseMessage> for StaticResponseEndpoint {
    fn apply(&self, input: &HttpRequestMessage) -> FilterResult<Option<HttpResponseMessage>> {
        let response = input.context().static_response();
        if let Some(response) = &response {
            response.finish_buffered_body_if_incomplete();
        }
        Ok(response)
    }

    fn default_output(&self, input: &HttpRequestMessage) -> HttpResponseMessage {
        HttpResponseMessage::default_error_response(input)
    }
}

/// Stand-in for an endpoint name with nothing registered under it.
///
/// Always answers with a well-formed 500 and flags the exchange as having
/// sent its error response.
#[derive(Debug, Clone)]
pub struct MissingEndpoint {
    endpoint_name: String,
    filter_name: String,
}

impl MissingEndpoint {
    pub fn new(endpoint_name: impl Into<String>) -> Self {
        let endpoint_name = endpoint_name.into();
        Self {
            filter_name: format!("MissingEndpoint:{endpoint_name}"),
            endpoint_name,
        }
    }

    pub fn endpoint_name(&self) -> &str {
        &self.endpoint_name
    }
}

impl FilterMeta for MissingEndpoint {
    fn filter_name(&self) -> &str {
        &self.filter_name
    }

    fn filter_type(&self) -> FilterType {
        FilterType::Endpoint
    }
}

impl Filter<HttpRequestMessage, HttpResponseMessage> for MissingEndpoint {
    fn apply(&self, input: &HttpRequestMessage) -> FilterResult<Option<HttpResponseMessage>> {
        let context = input.context();
        context.set_error_response_sent(true);

        let cause = FilterError::gateway(
            format!("Missing Endpoint filter, name = {}", self.endpoint_name),
            StatusCode::INTERNAL_SERVER_ERROR,
            true,
        );
        error!(
            uuid = %context.uuid(),
            endpoint = %self.endpoint_name,
            request_info = %input.info_for_logging(),
            "Endpoint filter not found"
        );
        context.set_error(Rc::new(cause));

        Ok(Some(self.default_output(input)))
    }

    fn default_output(&self, input: &HttpRequestMessage) -> HttpResponseMessage {
        HttpResponseMessage::default_error_response(input)
    }
}
