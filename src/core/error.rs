//! Error types raised while running filters and forwarding their results.
use http::StatusCode;
use thiserror::Error;

use crate::ports::transport::TransportError;

/// Failure produced by a filter transform (synchronous or asynchronous).
///
/// Filter errors never escape the engine: they are recorded on the exchange,
/// logged, and replaced by the filter's default output.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum FilterError {
    /// A filter decided the exchange cannot continue normally.
    #[error("{message}")]
    Gateway {
        message: String,
        status: StatusCode,
        /// Whether the failure deserves an error-level log line with detail.
        log_as_error: bool,
    },

    /// Too many in-flight asynchronous invocations of the same filter.
    #[error("filter {filter} exceeded its concurrency limit of {limit}")]
    ConcurrencyExceeded { filter: String, limit: usize },

    /// Any other failure, with its cause chain.
    #[error(transparent)]
    Other(#[from] eyre::Report),
}

impl FilterError {
    /// Convenience constructor for [`FilterError::Gateway`].
    pub fn gateway(message: impl Into<String>, status: StatusCode, log_as_error: bool) -> Self {
        Self::Gateway {
            message: message.into(),
            status,
            log_as_error,
        }
    }

    /// Errors that self-identify as non-fatal are logged as warnings only.
    pub fn should_log_as_error(&self) -> bool {
        match self {
            Self::Gateway { log_as_error, .. } => *log_as_error,
            Self::ConcurrencyExceeded { .. } => false,
            Self::Other(_) => true,
        }
    }

    /// HTTP status an error-rendering endpoint should use for this failure.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Gateway { status, .. } => *status,
            Self::ConcurrencyExceeded { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short machine-friendly name of the failure class.
    pub fn cause_name(&self) -> &'static str {
        match self {
            Self::Gateway { .. } => "GATEWAY_ERROR",
            Self::ConcurrencyExceeded { .. } => "FILTER_CONCURRENCY_EXCEEDED",
            Self::Other(_) => "UNHANDLED_FILTER_ERROR",
        }
    }
}

/// Result alias for filter transforms.
pub type FilterResult<T> = Result<T, FilterError>;

/// Failure while moving a message or chunk along the pipeline.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum PipelineError {
    /// The final hand-off to the transport failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A chunk arrived for a request whose endpoint was never resolved.
    #[error("no endpoint resolved for exchange {0}")]
    EndpointNotResolved(String),

    /// The pipeline stage that owns an async filter went away before it completed.
    #[error("pipeline stage dropped before filter {0} completed")]
    StageGone(String),
}
