//! Sluice - the filter execution engine of an event-driven HTTP gateway.
//!
//! Every exchange flows through three stages of filters: **inbound** filters
//! transform the request, one **endpoint** filter turns it into a response,
//! and **outbound** filters transform that response before it is written to
//! the client. Filters may be synchronous or asynchronous, may ask for the
//! whole body before running, and may be skipped or administratively
//! disabled. The engine tracks per-exchange state, concurrency limits,
//! execution timing and errors, and routes failures to an error endpoint.
//!
//! # Architecture
//! The crate separates **ports** (traits) from **adapters** (implementations)
//! while keeping the engine inside `core`:
//! - [`core`]: messages, exchange context, the filter trait, the three
//!   runners and the [`core::Pipeline`] that links them.
//! - [`ports`]: filter registry, transport, usage notifier, metrics sink and
//!   proxy endpoint factory.
//! - [`adapters`]: an in-memory registry, built-in filters, a metrics-backed
//!   notifier and the hyper HTTP/1.1 server.
//!
//! # Execution model
//! Each exchange is pinned to one event loop (a current-thread runtime plus a
//! [`tokio::task::LocalSet`]). Exchange state is therefore `Rc`/`RefCell`
//! based and never crosses threads; only the registry, settings and
//! reporting sinks are shared between loops.
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use sluice::{
//!     adapters::{HttpServer, InMemoryFilterRegistry, MetricsFilterMetrics, MetricsUsageNotifier},
//!     core::RunnerServices,
//! };
//!
//! # fn main() -> eyre::Result<()> {
//! let config = Arc::new(sluice::config::load_config("config.toml")?);
//! let settings = config.shared_filter_settings();
//! let registry = Arc::new(InMemoryFilterRegistry::new());
//! sluice::adapters::register_builtin_filters(&registry, &config, &settings);
//! let services = RunnerServices::new(
//!     Arc::new(MetricsUsageNotifier),
//!     Arc::new(MetricsFilterMetrics),
//!     settings,
//! );
//! HttpServer::new(config, registry, services).run(tokio_util::sync::CancellationToken::new())?;
//! # Ok(()) }
//! ```
//!
//! # Error Handling
//! Filters fail with [`core::FilterError`]; engine plumbing fails with
//! [`core::PipelineError`]. Application-level APIs return `eyre::Result<T>`
//! with context attached through `WrapErr`.
pub mod config;
pub mod metrics;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

pub use crate::{
    adapters::{HttpServer, InMemoryFilterRegistry},
    core::{Filter, FilterMeta, FilterType, HttpRequestMessage, HttpResponseMessage, Pipeline, RunnerServices},
    utils::GracefulShutdown,
};
