// Shared fixtures for the pipeline integration tests.
#![allow(dead_code)]

use std::{
    cell::{Cell, RefCell},
    rc::Rc,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use http::{HeaderName, HeaderValue, Method, StatusCode, Uri};
use sluice::{
    adapters::InMemoryFilterRegistry,
    config::models::{FilterSettings, SharedSettings},
    core::{
        ExchangeContext, EventLoop, ExecutionStatus, Filter, FilterError, FilterMeta, FilterType,
        HttpContent, HttpRequestMessage, HttpResponseMessage, Message, PipelineError,
        PipelineMessage, RunnerServices,
        error::FilterResult,
        filter::{ConcurrencyCounter, FilterFuture, FilterRef, FilterSyncType},
        message::RequestHead,
        runner::FilterRunner,
    },
    ports::{
        filter_metrics::{FilterMetrics, HangingKind},
        filter_registry::{RegisteredFilter, SharedFilter},
        transport::{Transport, TransportError},
        usage_notifier::FilterUsageNotifier,
    },
};
use tokio::sync::Notify;

/// Transport that keeps everything written to it.
#[derive(Default)]
pub struct RecordingTransport {
    inactive: Cell<bool>,
    failing: Cell<bool>,
    messages: RefCell<Vec<PipelineMessage>>,
    chunks: RefCell<Vec<HttpContent>>,
    errors: RefCell<Vec<String>>,
}

impl RecordingTransport {
    pub fn set_active(&self, active: bool) {
        self.inactive.set(!active);
    }

    /// Make every following write fail as if the connection had closed.
    pub fn fail_writes(&self) {
        self.failing.set(true);
    }

    pub fn responses(&self) -> Vec<HttpResponseMessage> {
        self.messages
            .borrow()
            .iter()
            .filter_map(|m| match m {
                PipelineMessage::Response(response) => Some(response.clone()),
                PipelineMessage::Request(_) => None,
            })
            .collect()
    }

    pub fn messages_written(&self) -> usize {
        self.messages.borrow().len()
    }

    pub fn chunks(&self) -> Vec<HttpContent> {
        self.chunks.borrow().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.borrow().clone()
    }
}

impl Transport for RecordingTransport {
    fn is_active(&self) -> bool {
        !self.inactive.get()
    }

    fn write_message(&self, message: PipelineMessage) -> Result<(), TransportError> {
        if self.failing.get() {
            return Err(TransportError::ConnectionClosed);
        }
        self.messages.borrow_mut().push(message);
        Ok(())
    }

    fn write_chunk(&self, chunk: HttpContent) -> Result<(), TransportError> {
        if self.failing.get() {
            return Err(TransportError::ConnectionClosed);
        }
        self.chunks.borrow_mut().push(chunk);
        Ok(())
    }

    fn exception_caught(&self, error: PipelineError) {
        self.errors.borrow_mut().push(error.to_string());
    }
}

/// Usage notifier remembering every `(filter, status)` pair.
#[derive(Default)]
pub struct RecordingNotifier {
    calls: Mutex<Vec<(String, ExecutionStatus)>>,
}

impl RecordingNotifier {
    pub fn calls(&self) -> Vec<(String, ExecutionStatus)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn statuses_for(&self, filter: &str) -> Vec<ExecutionStatus> {
        self.calls()
            .into_iter()
            .filter(|(name, _)| name == filter)
            .map(|(_, status)| status)
            .collect()
    }
}

impl FilterUsageNotifier for RecordingNotifier {
    fn notify(&self, filter: &dyn FilterMeta, status: ExecutionStatus) {
        self.calls
            .lock()
            .unwrap()
            .push((filter.filter_name().to_string(), status));
    }
}

#[derive(Default)]
pub struct RecordingMetrics {
    excessive: Mutex<Vec<(String, ExecutionStatus)>>,
    hanging: Mutex<Vec<(HangingKind, String)>>,
}

impl RecordingMetrics {
    pub fn excessive(&self) -> Vec<(String, ExecutionStatus)> {
        self.excessive.lock().unwrap().clone()
    }

    pub fn hanging(&self) -> Vec<(HangingKind, String)> {
        self.hanging.lock().unwrap().clone()
    }
}

impl FilterMetrics for RecordingMetrics {
    fn record_excessive_execution(&self, filter_name: &str, status: ExecutionStatus, _elapsed: Duration) {
        self.excessive
            .lock()
            .unwrap()
            .push((filter_name.to_string(), status));
    }

    fn increment_hanging(&self, kind: HangingKind, message_kind: &str) {
        self.hanging
            .lock()
            .unwrap()
            .push((kind, message_kind.to_string()));
    }
}

/// Collaborators of one test: one event loop, one transport, recording sinks.
pub struct Harness {
    pub event_loop: EventLoop,
    pub transport: Rc<RecordingTransport>,
    pub notifier: Arc<RecordingNotifier>,
    pub metrics: Arc<RecordingMetrics>,
    pub settings: SharedSettings,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(FilterSettings::default())
    }

    pub fn with_settings(settings: FilterSettings) -> Self {
        Self {
            event_loop: EventLoop::new(),
            transport: Rc::new(RecordingTransport::default()),
            notifier: Arc::new(RecordingNotifier::default()),
            metrics: Arc::new(RecordingMetrics::default()),
            settings: Arc::new(arc_swap::ArcSwap::from_pointee(settings)),
        }
    }

    pub fn services(&self) -> RunnerServices {
        RunnerServices::new(self.notifier.clone(), self.metrics.clone(), self.settings.clone())
    }

    /// A request on a fresh exchange bound to this harness.
    pub fn request(&self, method: Method, path: &'static str) -> HttpRequestMessage {
        let context = Rc::new(ExchangeContext::new(
            self.event_loop.clone(),
            self.transport.clone(),
        ));
        HttpRequestMessage::new(context, RequestHead::new(method, Uri::from_static(path)))
    }

    pub fn get(&self, path: &'static str) -> HttpRequestMessage {
        self.request(Method::GET, path)
    }

    /// Let spawned filter subscriptions run to completion.
    pub async fn settle(&self) {
        self.event_loop
            .run_until(async {
                for _ in 0..16 {
                    tokio::task::yield_now().await;
                }
            })
            .await;
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

pub fn header(name: &'static str) -> HeaderName {
    HeaderName::from_static(name)
}

/// Inbound filter appending its name to the `x-seen` request header.
pub struct Stamp {
    pub name: &'static str,
    pub order: i32,
    pub disabled: bool,
    pub should_filter: bool,
    pub override_stop: bool,
    pub applied: AtomicUsize,
}

impl Stamp {
    pub fn new(name: &'static str, order: i32) -> Self {
        Self {
            name,
            order,
            disabled: false,
            should_filter: true,
            override_stop: false,
            applied: AtomicUsize::new(0),
        }
    }

    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }

    pub fn not_applicable(mut self) -> Self {
        self.should_filter = false;
        self
    }

    pub fn override_stop(mut self) -> Self {
        self.override_stop = true;
        self
    }

    pub fn applied(&self) -> usize {
        self.applied.load(Ordering::SeqCst)
    }
}

impl FilterMeta for Stamp {
    fn filter_name(&self) -> &str {
        self.name
    }

    fn filter_type(&self) -> FilterType {
        FilterType::Inbound
    }

    fn filter_order(&self) -> i32 {
        self.order
    }
}

impl Filter<HttpRequestMessage, HttpRequestMessage> for Stamp {
    fn is_disabled(&self) -> bool {
        self.disabled
    }

    fn should_filter(&self, _input: &HttpRequestMessage) -> bool {
        self.should_filter
    }

    fn override_stop_filter_processing(&self) -> bool {
        self.override_stop
    }

    fn apply(&self, input: &HttpRequestMessage) -> FilterResult<Option<HttpRequestMessage>> {
        self.applied.fetch_add(1, Ordering::SeqCst);
        let seen = match input.header("x-seen") {
            Some(seen) => format!("{seen},{}", self.name),
            None => self.name.to_string(),
        };
        let value = HeaderValue::from_str(&seen).map_err(|e| FilterError::Other(e.into()))?;
        input.set_header(header("x-seen"), value);
        Ok(Some(input.clone()))
    }

    fn default_output(&self, input: &HttpRequestMessage) -> HttpRequestMessage {
        input.clone()
    }
}

/// Inbound filter whose transform always fails.
pub struct Explode {
    pub name: &'static str,
    pub log_as_error: bool,
}

impl FilterMeta for Explode {
    fn filter_name(&self) -> &str {
        self.name
    }

    fn filter_type(&self) -> FilterType {
        FilterType::Inbound
    }
}

impl Filter<HttpRequestMessage, HttpRequestMessage> for Explode {
    fn apply(&self, _input: &HttpRequestMessage) -> FilterResult<Option<HttpRequestMessage>> {
        Err(FilterError::gateway("exploded", StatusCode::BAD_REQUEST, self.log_as_error))
    }

    fn default_output(&self, input: &HttpRequestMessage) -> HttpRequestMessage {
        input.clone()
    }
}

/// Inbound filter that needs the whole body and upper-cases chunks as they pass.
#[derive(Default)]
pub struct BodyReader {
    pub seen_body: Mutex<Option<Vec<u8>>>,
    pub chunks_processed: AtomicUsize,
}

impl BodyReader {
    pub fn seen_body(&self) -> Option<Vec<u8>> {
        self.seen_body.lock().unwrap().clone()
    }
}

impl FilterMeta for BodyReader {
    fn filter_name(&self) -> &str {
        "inbound.BodyReader"
    }

    fn filter_type(&self) -> FilterType {
        FilterType::Inbound
    }
}

impl Filter<HttpRequestMessage, HttpRequestMessage> for BodyReader {
    fn needs_body_buffered(&self, _input: &HttpRequestMessage) -> bool {
        true
    }

    fn process_content_chunk(&self, _input: &HttpRequestMessage, chunk: HttpContent) -> Option<HttpContent> {
        self.chunks_processed.fetch_add(1, Ordering::SeqCst);
        let upper = chunk.bytes().to_ascii_uppercase();
        Some(HttpContent::new(upper, chunk.is_last()))
    }

    fn apply(&self, input: &HttpRequestMessage) -> FilterResult<Option<HttpRequestMessage>> {
        *self.seen_body.lock().unwrap() = Some(input.body_bytes().to_vec());
        Ok(Some(input.clone()))
    }

    fn default_output(&self, input: &HttpRequestMessage) -> HttpRequestMessage {
        input.clone()
    }
}

/// How an asynchronous test filter finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncEnding {
    Value,
    Empty,
    Error,
}

/// Asynchronous inbound filter that waits for `gate` before finishing.
pub struct Deferred {
    pub name: &'static str,
    pub ending: AsyncEnding,
    pub gate: Arc<Notify>,
    pub concurrency: ConcurrencyCounter,
    pub subscribe_fails: bool,
}

impl Deferred {
    pub fn new(name: &'static str, ending: AsyncEnding) -> Self {
        Self {
            name,
            ending,
            gate: Arc::new(Notify::new()),
            concurrency: ConcurrencyCounter::unbounded(),
            subscribe_fails: false,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.concurrency = ConcurrencyCounter::new(Some(limit));
        self
    }

    pub fn failing_subscribe(mut self) -> Self {
        self.subscribe_fails = true;
        self
    }

    /// Let one pending invocation finish; a permit is kept if none waits yet.
    pub fn release(&self) {
        self.gate.notify_one();
    }

    pub fn in_flight(&self) -> usize {
        self.concurrency.current()
    }
}

impl FilterMeta for Deferred {
    fn filter_name(&self) -> &str {
        self.name
    }

    fn filter_type(&self) -> FilterType {
        FilterType::Inbound
    }
}

impl Filter<HttpRequestMessage, HttpRequestMessage> for Deferred {
    fn sync_type(&self) -> FilterSyncType {
        FilterSyncType::Async
    }

    fn apply_async(&self, input: &HttpRequestMessage) -> FilterResult<FilterFuture<HttpRequestMessage>> {
        if self.subscribe_fails {
            return Err(FilterError::Other(eyre::eyre!("cannot subscribe")));
        }
        let gate = self.gate.clone();
        let ending = self.ending;
        let output = input.clone();
        let name = self.name;
        Ok(Box::pin(async move {
            gate.notified().await;
            match ending {
                AsyncEnding::Value => {
                    output.set_header(header("x-async"), HeaderValue::from_static(name));
                    Ok(Some(output))
                }
                AsyncEnding::Empty => Ok(None),
                AsyncEnding::Error => Err(FilterError::Other(eyre::eyre!("async failure"))),
            }
        }))
    }

    fn default_output(&self, input: &HttpRequestMessage) -> HttpRequestMessage {
        input.set_header(header("x-default"), HeaderValue::from_static("yes"));
        input.clone()
    }

    fn increment_concurrency(&self) -> FilterResult<()> {
        self.concurrency.increment(self.name)
    }

    fn decrement_concurrency(&self) {
        self.concurrency.decrement();
    }
}

/// Synchronous endpoint answering with a fixed status and body.
pub struct Answer {
    pub name: &'static str,
    pub status: StatusCode,
    pub body: &'static str,
    pub disabled: bool,
    pub fails: bool,
    pub needs_body: bool,
    pub applied: AtomicUsize,
}

impl Answer {
    pub fn new(name: &'static str, status: StatusCode, body: &'static str) -> Self {
        Self {
            name,
            status,
            body,
            disabled: false,
            fails: false,
            needs_body: false,
            applied: AtomicUsize::new(0),
        }
    }

    pub fn failing(mut self) -> Self {
        self.fails = true;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }

    pub fn needing_body(mut self) -> Self {
        self.needs_body = true;
        self
    }

    pub fn applied(&self) -> usize {
        self.applied.load(Ordering::SeqCst)
    }
}

impl FilterMeta for Answer {
    fn filter_name(&self) -> &str {
        self.name
    }

    fn filter_type(&self) -> FilterType {
        FilterType::Endpoint
    }
}

impl Filter<HttpRequestMessage, HttpResponseMessage> for Answer {
    fn is_disabled(&self) -> bool {
        self.disabled
    }

    fn needs_body_buffered(&self, _input: &HttpRequestMessage) -> bool {
        self.needs_body
    }

    fn apply(&self, input: &HttpRequestMessage) -> FilterResult<Option<HttpResponseMessage>> {
        self.applied.fetch_add(1, Ordering::SeqCst);
        if self.fails {
            return Err(FilterError::Other(eyre::eyre!("endpoint {} failed", self.name)));
        }
        let response = HttpResponseMessage::new(input.context().clone(), input, self.status);
        if self.needs_body {
            response.set_body(input.body_bytes());
        } else {
            response.set_body(self.body);
        }
        Ok(Some(response))
    }

    fn default_output(&self, input: &HttpRequestMessage) -> HttpResponseMessage {
        HttpResponseMessage::default_error_response(input)
    }
}

/// Outbound filter setting one response header.
pub struct Decorate {
    pub name: &'static str,
    pub order: i32,
}

impl FilterMeta for Decorate {
    fn filter_name(&self) -> &str {
        self.name
    }

    fn filter_type(&self) -> FilterType {
        FilterType::Outbound
    }

    fn filter_order(&self) -> i32 {
        self.order
    }
}

impl Filter<HttpResponseMessage, HttpResponseMessage> for Decorate {
    fn apply(&self, input: &HttpResponseMessage) -> FilterResult<Option<HttpResponseMessage>> {
        input.set_header(header("x-decorated"), HeaderValue::from_static("yes"));
        Ok(Some(input.clone()))
    }

    fn default_output(&self, input: &HttpResponseMessage) -> HttpResponseMessage {
        input.clone()
    }
}

/// Next stage that keeps what it receives.
pub struct Capture<T> {
    messages: RefCell<Vec<T>>,
    chunks: RefCell<Vec<HttpContent>>,
}

impl<T: Clone> Capture<T> {
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            messages: RefCell::new(Vec::new()),
            chunks: RefCell::new(Vec::new()),
        })
    }

    pub fn messages(&self) -> Vec<T> {
        self.messages.borrow().clone()
    }

    pub fn chunks(&self) -> Vec<HttpContent> {
        self.chunks.borrow().clone()
    }
}

impl<T> FilterRunner<T> for Capture<T> {
    fn filter(&self, message: T) {
        self.messages.borrow_mut().push(message);
    }

    fn filter_chunk(&self, _message: T, chunk: HttpContent) {
        self.chunks.borrow_mut().push(chunk);
    }
}

pub fn inbound<F>(filter: &Arc<F>) -> FilterRef<HttpRequestMessage, HttpRequestMessage>
where
    F: Filter<HttpRequestMessage, HttpRequestMessage> + 'static,
{
    filter.clone()
}

pub fn endpoint<F>(filter: &Arc<F>) -> FilterRef<HttpRequestMessage, HttpResponseMessage>
where
    F: Filter<HttpRequestMessage, HttpResponseMessage> + 'static,
{
    filter.clone()
}

pub fn register_endpoint<F>(registry: &InMemoryFilterRegistry, filter: &Arc<F>)
where
    F: Filter<HttpRequestMessage, HttpResponseMessage> + Send + Sync + 'static,
{
    let shared: SharedFilter<HttpRequestMessage, HttpResponseMessage> = filter.clone();
    registry.register(RegisteredFilter::Endpoint(shared));
}
