use eyre::{Result, WrapErr};
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::models::LoggingConfig;

/// Initialize structured logging with JSON output
pub fn init_tracing() -> Result<()> {
    Registry::default()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(true)
                .with_target(true)
                .with_thread_names(true)
                .with_file(true)
                .with_line_number(true),
        )
        .try_init()
        .wrap_err("Failed to install JSON subscriber")?;

    tracing::info!("sluice structured logging initialized");
    Ok(())
}

/// Initialize console-friendly logging for development
pub fn init_console_tracing() -> Result<()> {
    Registry::default()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .pretty()
                .with_target(true)
                .with_thread_names(true),
        )
        .try_init()
        .wrap_err("Failed to install console subscriber")?;

    tracing::info!("sluice console logging initialized");
    Ok(())
}

/// Initialize tracing from the `[logging]` section. `RUST_LOG` wins over
/// the configured level when set.
pub fn init_tracing_with_config(logging: &LoggingConfig) -> Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&logging.level)
            .wrap_err_with(|| format!("Invalid log level: {}", logging.level))?,
    };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_names(true);

    let installed = if logging.json {
        Registry::default()
            .with(env_filter)
            .with(
                fmt_layer
                    .json()
                    .with_current_span(logging.spans)
                    .with_span_list(logging.spans),
            )
            .try_init()
    } else {
        Registry::default()
            .with(env_filter)
            .with(fmt_layer.compact())
            .try_init()
    };
    installed.wrap_err("Failed to install subscriber")?;

    tracing::info!(
        level = %logging.level,
        json = logging.json,
        spans = logging.spans,
        "sluice logging initialized"
    );
    Ok(())
}

/// Span covering one request/response exchange.
pub fn create_exchange_span(method: &str, path: &str, exchange_id: &str) -> tracing::Span {
    tracing::info_span!(
        "exchange",
        http.method = method,
        http.path = path,
        exchange.id = exchange_id,
        http.status_code = tracing::field::Empty,
    )
}

/// Span covering one event loop thread.
pub fn create_event_loop_span(index: usize) -> tracing::Span {
    tracing::info_span!("event_loop", index)
}
