pub mod filters;
pub mod http_server;
pub mod observability;
pub mod registry;

/// Re-export commonly used types from adapters
pub use filters::register_builtin_filters;
pub use http_server::{BoundServer, ExchangeTransport, HttpServer};
pub use observability::{MetricsFilterMetrics, MetricsUsageNotifier};
pub use registry::InMemoryFilterRegistry;
