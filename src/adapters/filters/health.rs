use http::{HeaderValue, StatusCode, header::CONTENT_TYPE};

use crate::core::{
    error::FilterResult,
    filter::{Filter, FilterMeta, FilterType},
    message::{HttpRequestMessage, HttpResponseMessage, Message},
};

/// Liveness endpoint answering `{"status":"UP"}`.
#[derive(Debug, Default, Clone)]
pub struct HealthEndpoint;

impl HealthEndpoint {
    pub const NAME: &'static str = "endpoint.Health";
}

impl FilterMeta for HealthEndpoint {
    fn filter_name(&self) -> &str {
        Self::NAME
    }

    fn filter_type(&self) -> FilterType {
        FilterType::Endpoint
    }
}

impl Filter<HttpRequestMessage, HttpResponseMessage> for HealthEndpoint {
    fn apply(&self, input: &HttpRequestMessage) -> FilterResult<Option<HttpResponseMessage>> {
        let response = HttpResponseMessage::new(input.context().clone(), input, StatusCode::OK);
        response.set_header(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        response.set_body(serde_json::json!({ "status": "UP" }).to_string());
        Ok(Some(response))
    }

    fn default_output(&self, input: &HttpRequestMessage) -> HttpResponseMessage {
        HttpResponseMessage::default_error_response(input)
    }
}
