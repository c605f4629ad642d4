//! Per-filter execution shared by every pipeline stage.
//!
//! [`FilterEngine::run_filter`] decides whether a filter runs at all, waits
//! for the body when the filter needs it, runs the transform synchronously or
//! hands it to a [`FilterChainResumer`], and records exactly one terminal
//! status per invocation. Errors are absorbed here: a failing filter yields
//! its default output and the exchange continues.
use std::{
    marker::PhantomData,
    rc::{Rc, Weak},
    sync::Arc,
    time::Instant,
};

use tracing::{Level, debug, error, warn};

use crate::{
    config::models::{FilterSettings, SharedSettings},
    core::{
        binding::{MethodBinding, NoopBinding},
        context::{ExchangeContext, FilterErrorRecord, compare_context_state},
        error::{FilterError, FilterResult, PipelineError},
        filter::{ExecutionStatus, Filter, FilterRef, FilterSyncType, FilterType},
        message::{HttpContent, Message},
        resumer::FilterChainResumer,
        runner::{FilterOutcome, NextStage},
    },
    ports::{
        filter_metrics::{FilterMetrics, HangingKind},
        usage_notifier::FilterUsageNotifier,
    },
};

/// Process-wide collaborators handed to every runner.
#[derive(Clone)]
pub struct RunnerServices {
    pub usage_notifier: Arc<dyn FilterUsageNotifier>,
    pub metrics: Arc<dyn FilterMetrics>,
    pub settings: SharedSettings,
    pub binding: Arc<dyn MethodBinding>,
}

impl RunnerServices {
    pub fn new(
        usage_notifier: Arc<dyn FilterUsageNotifier>,
        metrics: Arc<dyn FilterMetrics>,
        settings: SharedSettings,
    ) -> Self {
        Self {
            usage_notifier,
            metrics,
            settings,
            binding: Arc::new(NoopBinding),
        }
    }

    pub fn with_binding(mut self, binding: Arc<dyn MethodBinding>) -> Self {
        self.binding = binding;
        self
    }
}

/// A runner that suspended filters can resume.
pub trait Stage<I: Message, O: Message> {
    fn engine(&self) -> &FilterEngine<I, O>;

    /// Continue the stage with the output of the filter that suspended it.
    fn resume(&self, output: O) -> Result<(), PipelineError>;
}

/// Shared execution logic of a stage turning `I` messages into `O` messages.
pub struct FilterEngine<I, O> {
    stage_type: FilterType,
    services: RunnerServices,
    next_stage: NextStage<O>,
    _input: PhantomData<fn(I)>,
}

impl<I: Message, O: Message> FilterEngine<I, O> {
    pub fn new(stage_type: FilterType, services: RunnerServices, next_stage: NextStage<O>) -> Self {
        Self {
            stage_type,
            services,
            next_stage,
            _input: PhantomData,
        }
    }

    pub fn stage_type(&self) -> FilterType {
        self.stage_type
    }

    pub fn next_stage(&self) -> &NextStage<O> {
        &self.next_stage
    }

    pub fn settings(&self) -> Arc<FilterSettings> {
        self.services.settings.load_full()
    }

    pub fn is_filter_awaiting_body(&self, context: &ExchangeContext) -> bool {
        context.is_awaiting_body(self.stage_type)
    }

    pub fn init_running_filter_index(&self, context: &ExchangeContext) {
        context.init_running_filter_index(self.stage_type);
    }

    pub fn running_filter_index(&self, context: &ExchangeContext) -> usize {
        context.running_filter_index(self.stage_type)
    }

    pub fn advance_running_filter_index(&self, context: &ExchangeContext) -> usize {
        context.advance_running_filter_index(self.stage_type)
    }

    /// Whether `filter` should be bypassed for this message.
    ///
    /// Endpoints are never skipped.
    pub fn should_skip_filter(&self, input: &I, filter: &dyn Filter<I, O>) -> bool {
        if filter.filter_type() == FilterType::Endpoint {
            return false;
        }
        let context = input.context();
        (context.stop_filter_processing() && !filter.override_stop_filter_processing())
            || context.is_cancelled()
            || !filter.should_filter(input)
    }

    /// Status recorded without running the transform, if any. Disabled wins
    /// over skipped.
    fn pre_run_status(&self, input: &I, filter: &dyn Filter<I, O>) -> Option<ExecutionStatus> {
        // Requests head straight for the error endpoint once an error response is due.
        let error_pending =
            filter.filter_type() == FilterType::Inbound && input.context().should_send_error_response();
        if filter.is_disabled() {
            Some(ExecutionStatus::Disabled)
        } else if error_pending || self.should_skip_filter(input, filter) {
            Some(ExecutionStatus::Skipped)
        } else {
            None
        }
    }

    fn is_message_body_ready_for_filter(&self, filter: &dyn Filter<I, O>, input: &I) -> bool {
        input.has_complete_body() || !filter.needs_body_buffered(input)
    }

    /// Run one filter against `input` on behalf of `stage`.
    pub fn run_filter(
        &self,
        stage: &Weak<dyn Stage<I, O>>,
        filter: &FilterRef<I, O>,
        input: &I,
    ) -> FilterOutcome<O> {
        let start = Instant::now();
        let snapshot = input.context().debug_routing().then(|| input.snapshot());

        match self.try_run_filter(stage, filter, input, start, snapshot.as_ref()) {
            Ok(outcome) => outcome,
            Err(err) => {
                let output = self.handle_filter_exception(input, filter.as_ref(), err);
                output.finish_buffered_body_if_incomplete();
                self.record_filter_completion(
                    ExecutionStatus::Failed,
                    filter.as_ref(),
                    start,
                    input,
                    snapshot.as_ref(),
                );
                FilterOutcome::Ready(output)
            }
        }
    }

    fn try_run_filter(
        &self,
        stage: &Weak<dyn Stage<I, O>>,
        filter: &FilterRef<I, O>,
        input: &I,
        start: Instant,
        snapshot: Option<&I>,
    ) -> FilterResult<FilterOutcome<O>> {
        let context = input.context();

        if let Some(status) = self.pre_run_status(input, filter.as_ref()) {
            self.record_filter_completion(status, filter.as_ref(), start, input, snapshot);
            return Ok(FilterOutcome::Ready(filter.default_output(input)));
        }

        if !self.is_message_body_ready_for_filter(filter.as_ref(), input) {
            context.set_awaiting_body(self.stage_type, true);
            debug!(
                uuid = %context.uuid(),
                filter = filter.filter_name(),
                "Filter waiting for body"
            );
            return Ok(FilterOutcome::Suspended);
        }
        context.set_awaiting_body(self.stage_type, false);

        if snapshot.is_some() {
            context.add_routing_debug(format!(
                "Filter {} {} {}",
                filter.filter_type(),
                filter.filter_order(),
                filter.filter_name()
            ));
        }

        input.run_buffered_body_content_through_filter(filter.as_ref());

        match filter.sync_type() {
            FilterSyncType::Sync => {
                let output = filter.apply(input)?;
                self.record_filter_completion(
                    ExecutionStatus::Success,
                    filter.as_ref(),
                    start,
                    input,
                    snapshot,
                );
                Ok(FilterOutcome::Ready(
                    output.unwrap_or_else(|| filter.default_output(input)),
                ))
            }
            FilterSyncType::Async => self.run_async_filter(stage, filter, input, start, snapshot),
        }
    }

    fn run_async_filter(
        &self,
        stage: &Weak<dyn Stage<I, O>>,
        filter: &FilterRef<I, O>,
        input: &I,
        start: Instant,
        snapshot: Option<&I>,
    ) -> FilterResult<FilterOutcome<O>> {
        filter.increment_concurrency()?;

        let resumer = FilterChainResumer::new(
            stage.clone(),
            input.clone(),
            filter.clone(),
            snapshot.cloned(),
            start,
        );
        let signal = match filter.apply_async(input) {
            Ok(signal) => signal,
            Err(err) => {
                resumer.decrement_concurrency();
                return Err(err);
            }
        };

        let context = input.context();
        let cancellation = context.cancellation_token();
        context
            .event_loop()
            .spawn(resumer.subscribe(signal, cancellation));
        Ok(FilterOutcome::Suspended)
    }

    /// Record a failure on the exchange and return the filter's default output.
    pub(crate) fn handle_filter_exception(
        &self,
        input: &I,
        filter: &dyn Filter<I, O>,
        err: FilterError,
    ) -> O {
        let err = Rc::new(err);
        let context = input.context();
        context.set_error(err.clone());
        if filter.filter_type() == FilterType::Endpoint {
            context.set_should_send_error_response(true);
        }
        self.record_filter_error(input, filter, err);
        filter.default_output(input)
    }

    fn record_filter_error(&self, input: &I, filter: &dyn Filter<I, O>, err: Rc<FilterError>) {
        let context = input.context();
        if err.should_log_as_error() {
            error!(
                uuid = %context.uuid(),
                filter = filter.filter_name(),
                request_info = %input.info_for_logging(),
                error = ?err,
                "Filter exception"
            );
        } else {
            warn!(
                uuid = %context.uuid(),
                filter = filter.filter_name(),
                request_info = %input.info_for_logging(),
                error = %err,
                "Filter exception"
            );
        }

        if context.debug_routing() {
            context.add_routing_debug(format!(
                "Running Filter failed {} type:{} order:{} {}",
                filter.filter_name(),
                filter.filter_type(),
                filter.filter_order(),
                err
            ));
        }

        context.add_filter_error(FilterErrorRecord {
            filter_name: filter.filter_name().to_string(),
            filter_type: filter.filter_type(),
            cause: err,
        });
    }

    /// Record the terminal status of one invocation and notify usage listeners.
    pub(crate) fn record_filter_completion(
        &self,
        status: ExecutionStatus,
        filter: &dyn Filter<I, O>,
        start: Instant,
        input: &I,
        snapshot: Option<&I>,
    ) {
        let context = input.context();
        let elapsed = start.elapsed();
        let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);

        if elapsed_ms >= self.services.settings.load().excessive_exec_time_ms {
            self.services
                .metrics
                .record_excessive_execution(filter.filter_name(), status, elapsed);
        }

        match status {
            ExecutionStatus::Failed => {
                if tracing::enabled!(Level::DEBUG) {
                    context.add_filter_execution_summary(filter.filter_name(), status, elapsed);
                }
            }
            ExecutionStatus::Success => {
                if tracing::enabled!(Level::DEBUG) {
                    context.add_filter_execution_summary(filter.filter_name(), status, elapsed);
                }
                if let Some(snapshot) = snapshot {
                    context.add_routing_debug(format!(
                        "Filter {{{} TYPE:{} ORDER:{}}} Execution time = {}ms",
                        filter.filter_name(),
                        filter.filter_type(),
                        filter.filter_order(),
                        elapsed_ms
                    ));
                    compare_context_state(filter.filter_name(), context, snapshot.context());
                }
            }
            ExecutionStatus::Skipped | ExecutionStatus::Disabled => {}
        }

        debug!(
            uuid = %context.uuid(),
            filter = filter.filter_name(),
            status = %status,
            elapsed_ms,
            "Filter finished"
        );

        self.services.usage_notifier.notify(filter, status);
    }

    /// Hand `output` to the next stage, or to the transport at the end of the pipeline.
    pub fn invoke_next_stage(&self, output: O) -> Result<(), PipelineError> {
        if let Some(next) = &self.next_stage {
            next.filter(output);
            return Ok(());
        }

        let context = output.context().clone();
        let transport = context.transport();
        if !transport.is_active() {
            context.cancel();
            output.dispose_buffered_body();
            self.services
                .metrics
                .increment_hanging(HangingKind::Message, output.kind());
            debug!(
                uuid = %context.uuid(),
                message_kind = output.kind(),
                "Connection inactive, dropping message"
            );
            return Ok(());
        }

        transport.write_message(output.into())?;
        Ok(())
    }

    /// Chunk counterpart of [`FilterEngine::invoke_next_stage`].
    pub fn invoke_next_stage_chunk(&self, output: O, chunk: HttpContent) -> Result<(), PipelineError> {
        if let Some(next) = &self.next_stage {
            next.filter_chunk(output, chunk);
            return Ok(());
        }

        let context = output.context().clone();
        let transport = context.transport();
        if !transport.is_active() {
            context.cancel();
            output.dispose_buffered_body();
            drop(chunk);
            self.services
                .metrics
                .increment_hanging(HangingKind::Chunk, output.kind());
            debug!(
                uuid = %context.uuid(),
                message_kind = output.kind(),
                "Connection inactive, dropping chunk"
            );
            return Ok(());
        }

        transport.write_chunk(chunk)?;
        Ok(())
    }

    /// Report a failure that escaped the pipeline to the transport.
    pub fn handle_exception<M: Message>(&self, message: &M, filter_name: &str, err: PipelineError) {
        error!(
            uuid = %message.context().uuid(),
            filter = filter_name,
            stage = %self.stage_type,
            request_info = %message.info_for_logging(),
            error = %err,
            "Error with filter"
        );
        message.context().transport().exception_caught(err);
    }

    /// Resume `stage` with `output` inside the exchange's ambient state.
    pub(crate) fn resume_in_binding_context(&self, stage: &dyn Stage<I, O>, output: O, filter_name: &str) {
        let context = output.context().clone();
        let probe = output.clone();
        if let Err(err) = self
            .services
            .binding
            .bind(&context, Box::new(move || stage.resume(output)))
        {
            self.handle_exception(&probe, filter_name, err);
        }
    }
}
