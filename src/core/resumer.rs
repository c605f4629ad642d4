//! Subscription to the signal of one asynchronous filter invocation.
use std::{rc::Weak, time::Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::{
    engine::Stage,
    error::{FilterError, PipelineError},
    filter::{ExecutionStatus, FilterFuture, FilterRef},
    message::Message,
    once::OnceFlag,
};

/// Waits for an asynchronous filter and resumes its stage with the result.
///
/// The concurrency slot taken before the filter was invoked is released
/// exactly once: on completion, on error, or when the subscription is
/// dropped because the exchange was cancelled.
pub(crate) struct FilterChainResumer<I: Message, O: Message> {
    stage: Weak<dyn Stage<I, O>>,
    input: I,
    filter: FilterRef<I, O>,
    snapshot: Option<I>,
    start: Instant,
    concurrency_released: OnceFlag,
    completed: OnceFlag,
    output: Option<O>,
}

impl<I: Message, O: Message> FilterChainResumer<I, O> {
    pub(crate) fn new(
        stage: Weak<dyn Stage<I, O>>,
        input: I,
        filter: FilterRef<I, O>,
        snapshot: Option<I>,
        start: Instant,
    ) -> Self {
        Self {
            stage,
            input,
            filter,
            snapshot,
            start,
            concurrency_released: OnceFlag::new(),
            completed: OnceFlag::new(),
            output: None,
        }
    }

    pub(crate) fn decrement_concurrency(&self) {
        if self.concurrency_released.claim() {
            self.filter.decrement_concurrency();
        }
    }

    /// Drive `signal` to completion unless the exchange is cancelled first.
    pub(crate) async fn subscribe(mut self, signal: FilterFuture<O>, cancellation: CancellationToken) {
        tokio::select! {
            biased;
            _ = cancellation.cancelled() => {
                debug!(
                    uuid = %self.input.context().uuid(),
                    filter = self.filter.filter_name(),
                    "Exchange cancelled, unsubscribing from filter"
                );
            }
            result = signal => match result {
                Ok(value) => {
                    if let Some(output) = value {
                        self.on_next(output);
                    }
                    self.on_completed();
                }
                Err(err) => self.on_error(err),
            },
        }
    }

    fn on_next(&mut self, output: O) {
        self.output = Some(output);
    }

    fn on_error(&mut self, err: FilterError) {
        self.decrement_concurrency();
        if !self.completed.claim() {
            return;
        }
        let Some(stage) = self.stage.upgrade() else {
            warn!(filter = self.filter.filter_name(), error = %err, "Stage gone before filter failed");
            self.report_stage_gone();
            return;
        };
        let engine = stage.engine();
        engine.record_filter_completion(
            ExecutionStatus::Failed,
            self.filter.as_ref(),
            self.start,
            &self.input,
            self.snapshot.as_ref(),
        );
        let output = engine.handle_filter_exception(&self.input, self.filter.as_ref(), err);
        output.finish_buffered_body_if_incomplete();
        engine.resume_in_binding_context(stage.as_ref(), output, self.filter.filter_name());
    }

    fn on_completed(&mut self) {
        self.decrement_concurrency();
        if !self.completed.claim() {
            return;
        }
        let Some(stage) = self.stage.upgrade() else {
            warn!(filter = self.filter.filter_name(), "Stage gone before filter completed");
            self.report_stage_gone();
            return;
        };
        let engine = stage.engine();
        let output = self
            .output
            .take()
            .unwrap_or_else(|| self.filter.default_output(&self.input));
        engine.record_filter_completion(
            ExecutionStatus::Success,
            self.filter.as_ref(),
            self.start,
            &self.input,
            self.snapshot.as_ref(),
        );
        engine.resume_in_binding_context(stage.as_ref(), output, self.filter.filter_name());
    }
}

impl<I: Message, O: Message> FilterChainResumer<I, O> {
    /// Nothing is left to resume, so the exchange can only fail.
    fn report_stage_gone(&self) {
        self.input
            .context()
            .transport()
            .exception_caught(PipelineError::StageGone(self.filter.filter_name().to_string()));
    }
}

impl<I: Message, O: Message> Drop for FilterChainResumer<I, O> {
    fn drop(&mut self) {
        self.decrement_concurrency();
    }
}
