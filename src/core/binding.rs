//! Wrapping of asynchronous continuations in ambient per-exchange state.
use crate::core::{context::ExchangeContext, error::PipelineError};

/// Continuation resumed after an asynchronous filter completes.
pub type Continuation<'a> = Box<dyn FnOnce() -> Result<(), PipelineError> + 'a>;

/// Re-establishes exchange-scoped ambient state around a resumed continuation.
pub trait MethodBinding: Send + Sync {
    fn bind<'a>(
        &self,
        context: &ExchangeContext,
        continuation: Continuation<'a>,
    ) -> Result<(), PipelineError>;
}

/// Runs the continuation as is.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBinding;

impl MethodBinding for NoopBinding {
    fn bind<'a>(
        &self,
        _context: &ExchangeContext,
        continuation: Continuation<'a>,
    ) -> Result<(), PipelineError> {
        continuation()
    }
}

/// Enters the exchange's tracing span for the duration of the continuation.
#[derive(Debug, Default, Clone, Copy)]
pub struct SpanBinding;

impl MethodBinding for SpanBinding {
    fn bind<'a>(
        &self,
        context: &ExchangeContext,
        continuation: Continuation<'a>,
    ) -> Result<(), PipelineError> {
        context.span().in_scope(continuation)
    }
}
