//! Messages flowing through the filter pipeline.
//!
//! [`HttpRequestMessage`] and [`HttpResponseMessage`] are cheap reference
//! handles: cloning one shares the same underlying message, the way the
//! transport, the filter chain and a suspended filter all refer to the same
//! in-flight request. [`Message::snapshot`] produces an independent deep copy
//! (including a copy of the exchange context) for debug comparisons.
use std::{
    cell::{Cell, Ref, RefCell, RefMut},
    fmt,
    net::SocketAddr,
    rc::Rc,
};

use bytes::{Bytes, BytesMut};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri, Version};

use crate::core::{
    context::{ExchangeContext, SessionContext},
    filter::Filter,
};

/// One piece of a message body. Dropping a chunk releases it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpContent {
    data: Bytes,
    last: bool,
}

impl HttpContent {
    pub fn new(data: impl Into<Bytes>, last: bool) -> Self {
        Self {
            data: data.into(),
            last,
        }
    }

    /// A non-final chunk.
    pub fn data(data: impl Into<Bytes>) -> Self {
        Self::new(data, false)
    }

    /// The final chunk of a body.
    pub fn last(data: impl Into<Bytes>) -> Self {
        Self::new(data, true)
    }

    /// An empty final chunk, used to terminate a body.
    pub fn empty_last() -> Self {
        Self::new(Bytes::new(), true)
    }

    pub fn bytes(&self) -> &Bytes {
        &self.data
    }

    pub fn into_bytes(self) -> Bytes {
        self.data
    }

    pub fn is_last(&self) -> bool {
        self.last
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Buffered body of a message: chunks received so far plus a completion flag.
#[derive(Debug, Clone, Default)]
pub struct MessageBody {
    chunks: Vec<HttpContent>,
    complete: bool,
}

impl MessageBody {
    /// A body that is already complete with the given contents.
    pub fn complete_with(data: impl Into<Bytes>) -> Self {
        Self {
            chunks: vec![HttpContent::last(data)],
            complete: true,
        }
    }

    /// Append a chunk. Once the body is complete further chunks are refused.
    pub fn buffer(&mut self, chunk: HttpContent) -> bool {
        if self.complete {
            tracing::debug!(
                bytes = chunk.len(),
                "Discarding chunk received after body completion"
            );
            return false;
        }
        self.complete = chunk.is_last();
        self.chunks.push(chunk);
        true
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Release every buffered chunk; completion state is kept.
    pub fn dispose(&mut self) {
        self.chunks.clear();
    }

    pub fn finish_if_incomplete(&mut self) {
        if !self.complete {
            self.buffer(HttpContent::empty_last());
        }
    }

    /// Replace the whole body with `data` and mark it complete.
    pub fn set(&mut self, data: impl Into<Bytes>) {
        *self = Self::complete_with(data);
    }

    pub fn take_chunks(&mut self) -> Vec<HttpContent> {
        std::mem::take(&mut self.chunks)
    }

    /// Put processed chunks back in front of anything buffered meanwhile.
    pub fn restore_chunks(&mut self, mut chunks: Vec<HttpContent>) {
        chunks.append(&mut self.chunks);
        self.chunks = chunks;
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn len(&self) -> usize {
        self.chunks.iter().map(HttpContent::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Concatenated contents of every buffered chunk.
    pub fn to_bytes(&self) -> Bytes {
        match self.chunks.as_slice() {
            [] => Bytes::new(),
            [single] => single.bytes().clone(),
            many => {
                let mut buf = BytesMut::with_capacity(self.len());
                for chunk in many {
                    buf.extend_from_slice(chunk.bytes());
                }
                buf.freeze()
            }
        }
    }
}

/// Behaviour common to every message travelling through the pipeline.
pub trait Message: Clone + Into<PipelineMessage> + 'static {
    fn context(&self) -> &SessionContext;

    /// Run `f` with mutable access to the buffered body.
    fn with_body<R>(&self, f: impl FnOnce(&mut MessageBody) -> R) -> R;

    /// Deep copy of the message and its exchange context.
    fn snapshot(&self) -> Self;

    fn info_for_logging(&self) -> String;

    /// Short type name used to tag metrics.
    fn kind(&self) -> &'static str;

    fn has_complete_body(&self) -> bool {
        self.with_body(|body| body.is_complete())
    }

    fn buffer_body_contents(&self, chunk: HttpContent) {
        self.with_body(|body| body.buffer(chunk));
    }

    fn dispose_buffered_body(&self) {
        self.with_body(MessageBody::dispose);
    }

    fn finish_buffered_body_if_incomplete(&self) {
        self.with_body(MessageBody::finish_if_incomplete);
    }

    fn body_bytes(&self) -> Bytes {
        self.with_body(|body| body.to_bytes())
    }

    /// Pass every chunk buffered so far through `filter`.
    fn run_buffered_body_content_through_filter<O: Message>(&self, filter: &dyn Filter<Self, O>) {
        let chunks = self.with_body(MessageBody::take_chunks);
        if chunks.is_empty() {
            return;
        }
        let processed: Vec<HttpContent> = chunks
            .into_iter()
            .filter_map(|chunk| filter.process_content_chunk(self, chunk))
            .collect();
        self.with_body(|body| body.restore_chunks(processed));
    }
}

/// Anything the pipeline can hand to the transport as a whole message.
#[derive(Debug, Clone)]
pub enum PipelineMessage {
    Request(HttpRequestMessage),
    Response(HttpResponseMessage),
}

impl From<HttpRequestMessage> for PipelineMessage {
    fn from(value: HttpRequestMessage) -> Self {
        PipelineMessage::Request(value)
    }
}

impl From<HttpResponseMessage> for PipelineMessage {
    fn from(value: HttpResponseMessage) -> Self {
        PipelineMessage::Response(value)
    }
}

/// Request line and headers of an inbound request.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: Method,
    pub uri: Uri,
    pub version: Version,
    pub headers: HeaderMap,
    pub client_addr: Option<SocketAddr>,
}

impl RequestHead {
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
            client_addr: None,
        }
    }

    pub fn from_parts(parts: &http::request::Parts, client_addr: Option<SocketAddr>) -> Self {
        Self {
            method: parts.method.clone(),
            uri: parts.uri.clone(),
            version: parts.version,
            headers: parts.headers.clone(),
            client_addr,
        }
    }
}

struct RequestInner {
    context: SessionContext,
    head: RefCell<RequestHead>,
    body: RefCell<MessageBody>,
}

/// Handle to an inbound HTTP request.
#[derive(Clone)]
pub struct HttpRequestMessage {
    inner: Rc<RequestInner>,
}

impl HttpRequestMessage {
    pub fn new(context: SessionContext, head: RequestHead) -> Self {
        Self {
            inner: Rc::new(RequestInner {
                context,
                head: RefCell::new(head),
                body: RefCell::new(MessageBody::default()),
            }),
        }
    }

    pub fn head(&self) -> Ref<'_, RequestHead> {
        self.inner.head.borrow()
    }

    pub fn head_mut(&self) -> RefMut<'_, RequestHead> {
        self.inner.head.borrow_mut()
    }

    pub fn method(&self) -> Method {
        self.head().method.clone()
    }

    pub fn path(&self) -> String {
        self.head().uri.path().to_string()
    }

    pub fn path_and_query(&self) -> String {
        self.head()
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string())
    }

    pub fn header(&self, name: &str) -> Option<String> {
        self.head()
            .headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }

    pub fn set_header(&self, name: HeaderName, value: HeaderValue) {
        self.head_mut().headers.insert(name, value);
    }

    /// Same request, whether or not the handles were cloned from each other.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Message for HttpRequestMessage {
    fn context(&self) -> &SessionContext {
        &self.inner.context
    }

    fn with_body<R>(&self, f: impl FnOnce(&mut MessageBody) -> R) -> R {
        f(&mut self.inner.body.borrow_mut())
    }

    fn snapshot(&self) -> Self {
        Self {
            inner: Rc::new(RequestInner {
                context: Rc::new(self.inner.context.snapshot()),
                head: RefCell::new(self.head().clone()),
                body: RefCell::new(self.inner.body.borrow().clone()),
            }),
        }
    }

    fn info_for_logging(&self) -> String {
        let head = self.head();
        format!(
            "uuid={}, method={}, uri={}, client={}",
            self.inner.context.uuid(),
            head.method,
            head.uri,
            head.client_addr
                .map(|a| a.to_string())
                .unwrap_or_else(|| "-".to_string())
        )
    }

    fn kind(&self) -> &'static str {
        "HttpRequestMessage"
    }
}

impl fmt::Debug for HttpRequestMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let head = self.head();
        f.debug_struct("HttpRequestMessage")
            .field("method", &head.method)
            .field("uri", &head.uri)
            .field("body_complete", &self.has_complete_body())
            .finish()
    }
}

/// The parts of the originating request a response keeps for logging.
#[derive(Debug, Clone)]
pub struct RequestSummary {
    pub method: Method,
    pub path_and_query: String,
}

impl RequestSummary {
    pub fn of(request: &HttpRequestMessage) -> Self {
        Self {
            method: request.method(),
            path_and_query: request.path_and_query(),
        }
    }
}

struct ResponseInner {
    context: SessionContext,
    request: RequestSummary,
    status: Cell<StatusCode>,
    headers: RefCell<HeaderMap>,
    body: RefCell<MessageBody>,
}

/// Handle to an outbound HTTP response.
#[derive(Clone)]
pub struct HttpResponseMessage {
    inner: Rc<ResponseInner>,
}

impl HttpResponseMessage {
    pub fn new(context: SessionContext, request: &HttpRequestMessage, status: StatusCode) -> Self {
        Self {
            inner: Rc::new(ResponseInner {
                context,
                request: RequestSummary::of(request),
                status: Cell::new(status),
                headers: RefCell::new(HeaderMap::new()),
                body: RefCell::new(MessageBody::default()),
            }),
        }
    }

    /// A 500 response with an empty, complete body.
    pub fn default_error_response(request: &HttpRequestMessage) -> Self {
        let response = Self::new(
            request.context().clone(),
            request,
            StatusCode::INTERNAL_SERVER_ERROR,
        );
        response.finish_buffered_body_if_incomplete();
        response
    }

    pub fn status(&self) -> StatusCode {
        self.inner.status.get()
    }

    pub fn set_status(&self, status: StatusCode) {
        self.inner.status.set(status);
    }

    pub fn headers(&self) -> Ref<'_, HeaderMap> {
        self.inner.headers.borrow()
    }

    pub fn headers_mut(&self) -> RefMut<'_, HeaderMap> {
        self.inner.headers.borrow_mut()
    }

    pub fn set_header(&self, name: HeaderName, value: HeaderValue) {
        self.headers_mut().insert(name, value);
    }

    /// Replace the body with `data` and mark it complete.
    pub fn set_body(&self, data: impl Into<Bytes>) {
        self.with_body(|body| body.set(data));
    }

    pub fn inbound_request(&self) -> &RequestSummary {
        &self.inner.request
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Message for HttpResponseMessage {
    fn context(&self) -> &SessionContext {
        &self.inner.context
    }

    fn with_body<R>(&self, f: impl FnOnce(&mut MessageBody) -> R) -> R {
        f(&mut self.inner.body.borrow_mut())
    }

    fn snapshot(&self) -> Self {
        let context: SessionContext = Rc::new(ExchangeContext::snapshot(&self.inner.context));
        Self {
            inner: Rc::new(ResponseInner {
                context,
                request: self.inner.request.clone(),
                status: Cell::new(self.status()),
                headers: RefCell::new(self.headers().clone()),
                body: RefCell::new(self.inner.body.borrow().clone()),
            }),
        }
    }

    fn info_for_logging(&self) -> String {
        format!(
            "uuid={}, status={}, request={} {}",
            self.inner.context.uuid(),
            self.status().as_u16(),
            self.inner.request.method,
            self.inner.request.path_and_query
        )
    }

    fn kind(&self) -> &'static str {
        "HttpResponseMessage"
    }
}

impl fmt::Debug for HttpResponseMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpResponseMessage")
            .field("status", &self.status())
            .field("request", &self.inner.request)
            .field("body_complete", &self.has_complete_body())
            .finish()
    }
}
