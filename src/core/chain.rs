//! Ordered chains of same-typed filters (inbound and outbound stages).
use std::rc::{Rc, Weak};

use tracing::debug;

use crate::core::{
    engine::{FilterEngine, RunnerServices, Stage},
    error::PipelineError,
    filter::{FilterRef, FilterType},
    message::{HttpContent, Message},
    runner::{FilterOutcome, FilterRunner, NextStage},
};

/// Runs every filter of one stage in order, then forwards to the next stage.
///
/// The position of the running filter is kept on the exchange context, so a
/// suspended chain picks up exactly where it stopped.
pub struct ChainRunner<T: Message> {
    me: Weak<ChainRunner<T>>,
    engine: FilterEngine<T, T>,
    filters: Vec<FilterRef<T, T>>,
}

impl<T: Message> ChainRunner<T> {
    pub fn new(
        stage_type: FilterType,
        services: RunnerServices,
        mut filters: Vec<FilterRef<T, T>>,
        next_stage: NextStage<T>,
    ) -> Rc<Self> {
        filters.sort_by_key(|f| f.filter_order());
        Rc::new_cyclic(|me| Self {
            me: me.clone(),
            engine: FilterEngine::new(stage_type, services, next_stage),
            filters,
        })
    }

    pub fn filters(&self) -> &[FilterRef<T, T>] {
        &self.filters
    }

    fn stage(&self) -> Weak<dyn Stage<T, T>> {
        self.me.clone()
    }

    fn run_filters(&self, mut message: T) -> Result<(), PipelineError> {
        let stage = self.stage();
        let mut index = self.engine.running_filter_index(message.context());
        while let Some(filter) = self.filters.get(index) {
            match self.engine.run_filter(&stage, filter, &message) {
                FilterOutcome::Ready(output) => {
                    message = output;
                    index = self.engine.advance_running_filter_index(message.context());
                }
                FilterOutcome::Suspended => return Ok(()),
            }
        }
        self.engine.invoke_next_stage(message)
    }

    fn run_filters_or_report(&self, message: T) {
        let probe = message.clone();
        if let Err(err) = self.run_filters(message) {
            self.engine.handle_exception(&probe, "-", err);
        }
    }
}

impl<T: Message> FilterRunner<T> for ChainRunner<T> {
    fn filter(&self, message: T) {
        self.engine.init_running_filter_index(message.context());
        self.run_filters_or_report(message);
    }

    fn filter_chunk(&self, message: T, chunk: HttpContent) {
        let context = message.context().clone();
        let running = self.engine.running_filter_index(&context);

        // Chunks pass through the filters the message already went through.
        let mut chunk = Some(chunk);
        for filter in self.filters.iter().take(running) {
            let Some(current) = chunk.take() else { break };
            chunk = if self.engine.should_skip_filter(&message, filter.as_ref()) {
                Some(current)
            } else {
                filter.process_content_chunk(&message, current)
            };
        }
        let Some(chunk) = chunk else {
            debug!(uuid = %context.uuid(), stage = %self.engine.stage_type(), "Chunk consumed by filter");
            return;
        };

        if running >= self.filters.len() {
            if let Err(err) = self.engine.invoke_next_stage_chunk(message.clone(), chunk) {
                self.engine.handle_exception(&message, "-", err);
            }
            return;
        }

        message.buffer_body_contents(chunk);
        if self.engine.is_filter_awaiting_body(&context) && message.has_complete_body() {
            self.run_filters_or_report(message);
        }
    }
}

impl<T: Message> Stage<T, T> for ChainRunner<T> {
    fn engine(&self) -> &FilterEngine<T, T> {
        &self.engine
    }

    fn resume(&self, output: T) -> Result<(), PipelineError> {
        self.engine.advance_running_filter_index(output.context());
        self.run_filters(output)
    }
}
