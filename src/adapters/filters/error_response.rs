use http::{HeaderValue, StatusCode, header::CONTENT_TYPE};
use serde::Serialize;

use crate::core::{
    error::FilterResult,
    filter::{Filter, FilterMeta, FilterType},
    message::{HttpRequestMessage, HttpResponseMessage, Message},
};

#[derive(Debug, Serialize)]
struct ErrorBody {
    status: u16,
    exchange: String,
    errors: Vec<ErrorEntry>,
}

#[derive(Debug, Serialize)]
struct ErrorEntry {
    filter: String,
    #[serde(rename = "type")]
    filter_type: String,
    cause: &'static str,
    message: String,
}

/// Renders the exchange's recorded filter errors as a JSON error response.
///
/// The status comes from the last error set on the exchange (500 if none).
#[derive(Debug, Default, Clone)]
pub struct ErrorResponseEndpoint;

impl ErrorResponseEndpoint {
    pub const NAME: &'static str = "endpoint.ErrorResponse";
}

impl FilterMeta for ErrorResponseEndpoint {
    fn filter_name(&self) -> &str {
        Self::NAME
    }

    fn filter_type(&self) -> FilterType {
        FilterType::Endpoint
    }
}

impl Filter<HttpRequestMessage, HttpResponseMessage> for ErrorResponseEndpoint {
    fn apply(&self, input: &HttpRequestMessage) -> FilterResult<Option<HttpResponseMessage>> {
        let context = input.context();
        let status = context
            .error()
            .map(|e| e.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let body = ErrorBody {
            status: status.as_u16(),
            exchange: context.uuid().to_string(),
            errors: context
                .filter_errors()
                .into_iter()
                .map(|record| ErrorEntry {
                    filter: record.filter_name,
                    filter_type: record.filter_type.as_str().to_string(),
                    cause: record.cause.cause_name(),
                    message: record.cause.to_string(),
                })
                .collect(),
        };
        let rendered = serde_json::to_vec(&body).map_err(eyre::Report::from)?;

        let response = HttpResponseMessage::new(context.clone(), input, status);
        response.set_header(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        response.set_body(rendered);
        Ok(Some(response))
    }

    fn default_output(&self, input: &HttpRequestMessage) -> HttpResponseMessage {
        HttpResponseMessage::default_error_response(input)
    }
}
