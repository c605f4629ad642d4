//! Per-exchange state shared by every message and filter of one request.
use std::{
    cell::{Ref, RefCell},
    collections::{HashMap, HashSet},
    fmt,
    rc::Rc,
    time::Duration,
};

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    core::{
        attrs::{AttrKey, Attrs},
        endpoint::ResolvedEndpoint,
        error::FilterError,
        event_loop::EventLoop,
        filter::{ExecutionStatus, FilterType},
        message::HttpResponseMessage,
    },
    ports::transport::Transport,
};

/// Shared handle to the context of one exchange.
pub type SessionContext = Rc<ExchangeContext>;

/// One failure recorded against the exchange.
#[derive(Debug, Clone)]
pub struct FilterErrorRecord {
    pub filter_name: String,
    pub filter_type: FilterType,
    pub cause: Rc<FilterError>,
}

/// Timing line kept when debug logging is enabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterExecutionSummary {
    pub filter_name: String,
    pub status: ExecutionStatus,
    pub elapsed: Duration,
}

impl fmt::Display for FilterExecutionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[{}]{}ms",
            self.filter_name,
            self.status,
            self.elapsed.as_millis()
        )
    }
}

#[derive(Clone, Default)]
struct ContextState {
    attrs: Attrs,
    awaiting_body: HashSet<FilterType>,
    running_filter_index: HashMap<FilterType, usize>,
    filter_errors: Vec<FilterErrorRecord>,
    error: Option<Rc<FilterError>>,
    debug_routing: bool,
    routing_debug: Vec<String>,
    execution_summary: Vec<FilterExecutionSummary>,
    stop_filter_processing: bool,
    should_send_error_response: bool,
    error_response_sent: bool,
    static_response: Option<HttpResponseMessage>,
    endpoint: Option<String>,
    error_endpoint: Option<String>,
    resolved_endpoint: Option<ResolvedEndpoint>,
    span: Option<tracing::Span>,
}

impl ContextState {
    /// `(key, rendered value)` for everything a filter may observably change.
    fn observable(&self) -> Vec<(String, String)> {
        let mut entries: Vec<(String, String)> = self
            .attrs
            .rendered()
            .into_iter()
            .map(|(id, name, value)| (format!("{name}#{id}"), value))
            .collect();

        let flags = [
            ("stopFilterProcessing", self.stop_filter_processing),
            ("shouldSendErrorResponse", self.should_send_error_response),
            ("errorResponseSent", self.error_response_sent),
            ("staticResponse", self.static_response.is_some()),
        ];
        for (name, set) in flags {
            if set {
                entries.push((name.to_string(), "true".to_string()));
            }
        }
        if let Some(endpoint) = &self.endpoint {
            entries.push(("endpoint".to_string(), endpoint.clone()));
        }
        if let Some(endpoint) = &self.error_endpoint {
            entries.push(("errorEndpoint".to_string(), endpoint.clone()));
        }
        if let Some(error) = &self.error {
            entries.push(("error".to_string(), error.to_string()));
        }
        entries
    }
}

/// Context of one request/response exchange.
///
/// Owned by a single event loop. The cancellation token is the only piece
/// that may be signalled from elsewhere.
pub struct ExchangeContext {
    uuid: Uuid,
    cancellation: CancellationToken,
    event_loop: EventLoop,
    transport: Rc<dyn Transport>,
    state: RefCell<ContextState>,
}

impl ExchangeContext {
    pub fn new(event_loop: EventLoop, transport: Rc<dyn Transport>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            cancellation: CancellationToken::new(),
            event_loop,
            transport,
            state: RefCell::new(ContextState::default()),
        }
    }

    /// Independent copy of the current state. The copy shares the identity,
    /// cancellation token, event loop and transport of the original.
    pub fn snapshot(&self) -> Self {
        Self {
            uuid: self.uuid,
            cancellation: self.cancellation.clone(),
            event_loop: self.event_loop.clone(),
            transport: self.transport.clone(),
            state: RefCell::new(self.state.borrow().clone()),
        }
    }

    /// Drop references that may point back at this context.
    pub fn close(&self) {
        let mut state = self.state.borrow_mut();
        state.resolved_endpoint = None;
        state.static_response = None;
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn event_loop(&self) -> &EventLoop {
        &self.event_loop
    }

    pub fn transport(&self) -> Rc<dyn Transport> {
        self.transport.clone()
    }

    pub fn span(&self) -> tracing::Span {
        self.state
            .borrow()
            .span
            .clone()
            .unwrap_or_else(tracing::Span::none)
    }

    pub fn set_span(&self, span: tracing::Span) {
        self.state.borrow_mut().span = Some(span);
    }

    // --- cancellation ---

    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    // --- attributes ---

    pub fn put<T>(&self, key: &AttrKey<T>, value: T)
    where
        T: std::any::Any + Clone + fmt::Debug,
    {
        self.state.borrow_mut().attrs.put(key, value);
    }

    pub fn get<T>(&self, key: &AttrKey<T>) -> Option<T>
    where
        T: std::any::Any + Clone,
    {
        self.state.borrow().attrs.get(key).cloned()
    }

    pub fn remove<T: std::any::Any>(&self, key: &AttrKey<T>) -> Option<T> {
        self.state.borrow_mut().attrs.remove(key)
    }

    pub fn attrs(&self) -> Ref<'_, Attrs> {
        Ref::map(self.state.borrow(), |s| &s.attrs)
    }

    // --- per-stage bookkeeping ---

    pub fn is_awaiting_body(&self, stage: FilterType) -> bool {
        self.state.borrow().awaiting_body.contains(&stage)
    }

    pub fn set_awaiting_body(&self, stage: FilterType, awaiting: bool) {
        let mut state = self.state.borrow_mut();
        if awaiting {
            state.awaiting_body.insert(stage);
        } else {
            state.awaiting_body.remove(&stage);
        }
    }

    pub fn init_running_filter_index(&self, stage: FilterType) {
        self.state.borrow_mut().running_filter_index.insert(stage, 0);
    }

    pub fn running_filter_index(&self, stage: FilterType) -> usize {
        self.state
            .borrow()
            .running_filter_index
            .get(&stage)
            .copied()
            .unwrap_or(0)
    }

    /// Move to the next filter of `stage` and return the new index.
    pub fn advance_running_filter_index(&self, stage: FilterType) -> usize {
        let mut state = self.state.borrow_mut();
        let index = state.running_filter_index.entry(stage).or_insert(0);
        *index += 1;
        *index
    }

    // --- errors ---

    pub fn add_filter_error(&self, record: FilterErrorRecord) {
        self.state.borrow_mut().filter_errors.push(record);
    }

    pub fn filter_errors(&self) -> Vec<FilterErrorRecord> {
        self.state.borrow().filter_errors.clone()
    }

    pub fn set_error(&self, error: Rc<FilterError>) {
        self.state.borrow_mut().error = Some(error);
    }

    pub fn error(&self) -> Option<Rc<FilterError>> {
        self.state.borrow().error.clone()
    }

    // --- debugging ---

    pub fn debug_routing(&self) -> bool {
        self.state.borrow().debug_routing
    }

    pub fn set_debug_routing(&self, enabled: bool) {
        self.state.borrow_mut().debug_routing = enabled;
    }

    pub fn add_routing_debug(&self, line: impl Into<String>) {
        self.state.borrow_mut().routing_debug.push(line.into());
    }

    pub fn routing_debug(&self) -> Vec<String> {
        self.state.borrow().routing_debug.clone()
    }

    pub fn add_filter_execution_summary(
        &self,
        filter_name: &str,
        status: ExecutionStatus,
        elapsed: Duration,
    ) {
        self.state
            .borrow_mut()
            .execution_summary
            .push(FilterExecutionSummary {
                filter_name: filter_name.to_string(),
                status,
                elapsed,
            });
    }

    pub fn filter_execution_summary(&self) -> Vec<FilterExecutionSummary> {
        self.state.borrow().execution_summary.clone()
    }

    // --- routing flags ---

    pub fn stop_filter_processing(&self) -> bool {
        self.state.borrow().stop_filter_processing
    }

    pub fn set_stop_filter_processing(&self, stop: bool) {
        self.state.borrow_mut().stop_filter_processing = stop;
    }

    pub fn should_send_error_response(&self) -> bool {
        self.state.borrow().should_send_error_response
    }

    pub fn set_should_send_error_response(&self, value: bool) {
        self.state.borrow_mut().should_send_error_response = value;
    }

    pub fn error_response_sent(&self) -> bool {
        self.state.borrow().error_response_sent
    }

    pub fn set_error_response_sent(&self, value: bool) {
        self.state.borrow_mut().error_response_sent = value;
    }

    pub fn static_response(&self) -> Option<HttpResponseMessage> {
        self.state.borrow().static_response.clone()
    }

    pub fn set_static_response(&self, response: HttpResponseMessage) {
        self.state.borrow_mut().static_response = Some(response);
    }

    pub fn endpoint(&self) -> Option<String> {
        self.state.borrow().endpoint.clone()
    }

    pub fn set_endpoint(&self, name: impl Into<String>) {
        self.state.borrow_mut().endpoint = Some(name.into());
    }

    pub fn error_endpoint(&self) -> Option<String> {
        self.state.borrow().error_endpoint.clone()
    }

    pub fn set_error_endpoint(&self, name: impl Into<String>) {
        self.state.borrow_mut().error_endpoint = Some(name.into());
    }

    pub fn resolved_endpoint(&self) -> Option<ResolvedEndpoint> {
        self.state.borrow().resolved_endpoint.clone()
    }

    pub fn set_resolved_endpoint(&self, endpoint: ResolvedEndpoint) {
        self.state.borrow_mut().resolved_endpoint = Some(endpoint);
    }
}

impl fmt::Debug for ExchangeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("ExchangeContext")
            .field("uuid", &self.uuid)
            .field("cancelled", &self.is_cancelled())
            .field("attrs", &state.attrs)
            .field("endpoint", &state.endpoint)
            .field("errors", &state.filter_errors.len())
            .finish_non_exhaustive()
    }
}

/// Append to `current`'s routing debug log one line per attribute or flag the
/// named filter added, changed or removed relative to `snapshot`.
pub fn compare_context_state(filter_name: &str, current: &ExchangeContext, snapshot: &ExchangeContext) {
    let before = snapshot.state.borrow().observable();
    let after = current.state.borrow().observable();

    let mut lines = Vec::new();
    for (key, value) in &after {
        match before.iter().find(|(k, _)| k == key) {
            None => lines.push(format!("{{{filter_name}}} added {key}={value}")),
            Some((_, old)) if old != value => {
                lines.push(format!("{{{filter_name}}} changed {key}={old} -> {value}"))
            }
            Some(_) => {}
        }
    }
    for (key, value) in &before {
        if !after.iter().any(|(k, _)| k == key) {
            lines.push(format!("{{{filter_name}}} removed {key}={value}"));
        }
    }

    for line in lines {
        current.add_routing_debug(line);
    }
}
