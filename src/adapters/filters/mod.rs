//! Built-in filters shipped with the server binary.
pub mod debug;
pub mod echo;
pub mod error_response;
pub mod health;
pub mod response_headers;
pub mod route;

pub use debug::DebugRoutingFilter;
pub use echo::EchoEndpoint;
pub use error_response::ErrorResponseEndpoint;
pub use health::HealthEndpoint;
pub use response_headers::ResponseHeadersFilter;
pub use route::RouteFilter;

use crate::{
    adapters::registry::InMemoryFilterRegistry,
    config::models::{ServerConfig, SharedSettings},
};

/// Register every built-in filter configured by `config`.
///
/// Filters reading dynamic settings share `settings` with the engine.
pub fn register_builtin_filters(
    registry: &InMemoryFilterRegistry,
    config: &ServerConfig,
    settings: &SharedSettings,
) {
    registry.register_inbound(
        DebugRoutingFilter::new().disabled(config.is_filter_disabled(DebugRoutingFilter::NAME)),
    );
    registry.register_inbound(
        RouteFilter::new(&config.routes).disabled(config.is_filter_disabled(RouteFilter::NAME)),
    );

    registry.register_endpoint(HealthEndpoint);
    registry.register_endpoint(ErrorResponseEndpoint);
    registry.register_endpoint(
        EchoEndpoint::new(settings.clone())
            .disabled(config.is_filter_disabled(EchoEndpoint::NAME)),
    );

    registry.register_outbound(
        ResponseHeadersFilter::new(&config.response_headers)
            .disabled(config.is_filter_disabled(ResponseHeadersFilter::NAME)),
    );

    tracing::info!(filters = registry.len(), "Built-in filters registered");
}
