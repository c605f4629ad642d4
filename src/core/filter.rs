//! The filter contract: typed, ordered units of request/response transformation.
//!
//! A filter consumes an input message (`I`) and produces an output message
//! (`O`). Inbound filters map requests to requests, endpoints map requests to
//! responses and outbound filters map responses to responses. Filters are
//! shared process-wide, so any per-filter mutable state must be atomic; the
//! only such state the engine relies on is the [`ConcurrencyCounter`].
use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use futures_util::future::{self, LocalBoxFuture};
use serde::{Deserialize, Serialize};

use crate::core::{
    error::{FilterError, FilterResult},
    message::{HttpContent, Message},
};

/// Pipeline stage a filter belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterType {
    Inbound,
    Endpoint,
    Outbound,
}

impl FilterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterType::Inbound => "in",
            FilterType::Endpoint => "end",
            FilterType::Outbound => "out",
        }
    }
}

impl fmt::Display for FilterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a filter transforms in place or completes later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterSyncType {
    Sync,
    Async,
}

/// Terminal outcome of one filter invocation on one exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionStatus {
    Success,
    Failed,
    Skipped,
    Disabled,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Success => "SUCCESS",
            ExecutionStatus::Failed => "FAILED",
            ExecutionStatus::Skipped => "SKIPPED",
            ExecutionStatus::Disabled => "DISABLED",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Single-value-or-error signal returned by an asynchronous filter.
///
/// `Ok(None)` completes without a value; the engine then substitutes the
/// filter's default output.
pub type FilterFuture<O> = LocalBoxFuture<'static, FilterResult<Option<O>>>;

/// Identity shared by every filter regardless of its message types.
pub trait FilterMeta {
    fn filter_name(&self) -> &str;

    fn filter_type(&self) -> FilterType;

    fn filter_order(&self) -> i32 {
        0
    }
}

/// A request/response transformation unit.
pub trait Filter<I: Message, O: Message>: FilterMeta {
    /// Administratively disabled filters are never applied.
    fn is_disabled(&self) -> bool {
        false
    }

    fn should_filter(&self, _input: &I) -> bool {
        true
    }

    /// Whether the transform must wait until the whole body is buffered.
    fn needs_body_buffered(&self, _input: &I) -> bool {
        false
    }

    /// Run even when the exchange asked to stop filter processing.
    fn override_stop_filter_processing(&self) -> bool {
        false
    }

    fn sync_type(&self) -> FilterSyncType {
        FilterSyncType::Sync
    }

    /// Synchronous transform. `Ok(None)` means "use the default output".
    fn apply(&self, _input: &I) -> FilterResult<Option<O>> {
        Ok(None)
    }

    /// Asynchronous transform. An `Err` here means subscribing failed outright.
    fn apply_async(&self, input: &I) -> FilterResult<FilterFuture<O>> {
        Ok(Box::pin(future::ready(self.apply(input))))
    }

    /// Inspect or replace one body chunk. `None` consumes the chunk.
    fn process_content_chunk(&self, _input: &I, chunk: HttpContent) -> Option<HttpContent> {
        Some(chunk)
    }

    /// Output used whenever the transform is not run or fails.
    fn default_output(&self, input: &I) -> O;

    /// Take a concurrency slot before an asynchronous invocation.
    fn increment_concurrency(&self) -> FilterResult<()> {
        Ok(())
    }

    /// Return a slot taken by [`Filter::increment_concurrency`].
    fn decrement_concurrency(&self) {}
}

/// Shared handle to a filter.
pub type FilterRef<I, O> = Arc<dyn Filter<I, O>>;

/// In-flight counter bounding concurrent asynchronous invocations of one filter.
#[derive(Debug)]
pub struct ConcurrencyCounter {
    in_flight: AtomicUsize,
    limit: Option<usize>,
}

impl ConcurrencyCounter {
    /// `limit` of `None` disables protection; the count is still tracked.
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            in_flight: AtomicUsize::new(0),
            limit,
        }
    }

    pub fn unbounded() -> Self {
        Self::new(None)
    }

    pub fn increment(&self, filter_name: &str) -> FilterResult<()> {
        self.increment_within(filter_name, self.limit)
    }

    /// Like [`ConcurrencyCounter::increment`], against a limit read by the caller.
    pub fn increment_within(&self, filter_name: &str, limit: Option<usize>) -> FilterResult<()> {
        let current = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        if let Some(limit) = limit
            && current > limit
        {
            self.decrement();
            return Err(FilterError::ConcurrencyExceeded {
                filter: filter_name.to_string(),
                limit,
            });
        }
        Ok(())
    }

    /// Saturates at zero so an unbalanced release can never go negative.
    pub fn decrement(&self) {
        let _ = self
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    pub fn current(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }
}

impl Default for ConcurrencyCounter {
    fn default() -> Self {
        Self::unbounded()
    }
}
