use crate::core::{
    error::FilterResult,
    filter::{Filter, FilterMeta, FilterType},
    message::{HttpRequestMessage, Message},
};

/// Request header switching on per-exchange routing debug.
pub const DEBUG_HEADER: &str = "x-sluice-debug";

/// Turns on routing debug for requests carrying `x-sluice-debug: true`.
#[derive(Debug, Default, Clone)]
pub struct DebugRoutingFilter {
    disabled: bool,
}

impl DebugRoutingFilter {
    pub const NAME: &'static str = "inbound.DebugRouting";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }
}

impl FilterMeta for DebugRoutingFilter {
    fn filter_name(&self) -> &str {
        Self::NAME
    }

    fn filter_type(&self) -> FilterType {
        FilterType::Inbound
    }

    fn filter_order(&self) -> i32 {
        -100
    }
}

impl Filter<HttpRequestMessage, HttpRequestMessage> for DebugRoutingFilter {
    fn is_disabled(&self) -> bool {
        self.disabled
    }

    fn should_filter(&self, input: &HttpRequestMessage) -> bool {
        input
            .header(DEBUG_HEADER)
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
    }

    fn apply(&self, input: &HttpRequestMessage) -> FilterResult<Option<HttpRequestMessage>> {
        input.context().set_debug_routing(true);
        Ok(None)
    }

    fn default_output(&self, input: &HttpRequestMessage) -> HttpRequestMessage {
        input.clone()
    }
}
