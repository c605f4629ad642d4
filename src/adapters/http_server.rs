//! HTTP/1.1 transport.
//!
//! Connections are accepted on `event_loops` threads, each running a
//! current-thread runtime driving one [`EventLoop`]. Every exchange on a
//! connection stays on the loop that accepted it.
use std::{
    cell::RefCell,
    convert::Infallible,
    net::SocketAddr,
    rc::Rc,
    sync::Arc,
    time::Duration,
};

use bytes::Bytes;
use eyre::{Context, Result, eyre};
use http::{HeaderMap, HeaderValue, Request, Response, StatusCode, header::CONTENT_LENGTH};
use http_body_util::{BodyExt, StreamBody};
use hyper::{
    body::{Body as _, Frame, Incoming},
    server::conn::http1,
    service::service_fn,
};
use hyper_util::rt::TokioIo;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{Instrument, debug, error, info, warn};

use crate::{
    config::models::ServerConfig,
    core::{
        context::{ExchangeContext, SessionContext},
        engine::RunnerServices,
        error::PipelineError,
        event_loop::EventLoop,
        message::{HttpContent, HttpRequestMessage, Message, MessageBody, PipelineMessage, RequestHead},
        pipeline::Pipeline,
    },
    metrics,
    ports::{
        filter_registry::FilterRegistry,
        transport::{Transport, TransportError},
    },
    tracing_setup,
};

type BodyFrame = Result<Frame<Bytes>, Infallible>;

/// Streaming response body fed by the exchange transport.
pub type ExchangeBody = StreamBody<UnboundedReceiverStream<BodyFrame>>;

fn empty_response(status: StatusCode) -> Response<ExchangeBody> {
    let (_tx, rx) = mpsc::unbounded_channel();
    let mut response = Response::new(StreamBody::new(UnboundedReceiverStream::new(rx)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_LENGTH, HeaderValue::from_static("0"));
    response
}

/// Transport bound to a single exchange: the response head goes out through
/// a oneshot, body chunks through an unbounded channel feeding the body.
pub struct ExchangeTransport {
    response_tx: RefCell<Option<oneshot::Sender<Response<ExchangeBody>>>>,
    body_rx: RefCell<Option<mpsc::UnboundedReceiver<BodyFrame>>>,
    body_tx: RefCell<Option<mpsc::UnboundedSender<BodyFrame>>>,
}

impl ExchangeTransport {
    pub fn new() -> (Rc<Self>, oneshot::Receiver<Response<ExchangeBody>>) {
        let (response_tx, response_rx) = oneshot::channel();
        let (body_tx, body_rx) = mpsc::unbounded_channel();
        let transport = Rc::new(Self {
            response_tx: RefCell::new(Some(response_tx)),
            body_rx: RefCell::new(Some(body_rx)),
            body_tx: RefCell::new(Some(body_tx)),
        });
        (transport, response_rx)
    }

    fn send_head(&self, status: StatusCode, headers: HeaderMap) -> Result<(), TransportError> {
        let tx = self
            .response_tx
            .borrow_mut()
            .take()
            .ok_or(TransportError::AlreadyCommitted)?;
        let rx = self
            .body_rx
            .borrow_mut()
            .take()
            .ok_or(TransportError::AlreadyCommitted)?;

        let mut response = Response::new(StreamBody::new(UnboundedReceiverStream::new(rx)));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        tx.send(response).map_err(|_| TransportError::ConnectionClosed)
    }

    fn send_data(&self, data: Bytes, last: bool) -> Result<(), TransportError> {
        let mut body_tx = self.body_tx.borrow_mut();
        let tx = body_tx.as_ref().ok_or(TransportError::BodyFinished)?;
        if !data.is_empty() {
            tx.send(Ok(Frame::data(data)))
                .map_err(|_| TransportError::ConnectionClosed)?;
        }
        if last {
            body_tx.take();
        }
        Ok(())
    }
}

impl Transport for ExchangeTransport {
    fn is_active(&self) -> bool {
        match self.response_tx.borrow().as_ref() {
            Some(tx) => !tx.is_closed(),
            None => self.body_tx.borrow().as_ref().is_some_and(|tx| !tx.is_closed()),
        }
    }

    fn write_message(&self, message: PipelineMessage) -> Result<(), TransportError> {
        let PipelineMessage::Response(response) = message else {
            return Err(TransportError::Unsupported("request"));
        };

        let complete = response.has_complete_body();
        let chunks = response.with_body(MessageBody::take_chunks);
        let mut headers = response.headers().clone();
        if complete && !headers.contains_key(CONTENT_LENGTH) {
            let length: usize = chunks.iter().map(HttpContent::len).sum();
            headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
        }

        let status = response.status();
        response
            .context()
            .span()
            .record("http.status_code", status.as_u16());
        self.send_head(status, headers)?;

        for chunk in chunks {
            let last = chunk.is_last();
            self.send_data(chunk.into_bytes(), last)?;
        }
        if complete {
            self.body_tx.borrow_mut().take();
        }
        Ok(())
    }

    fn write_chunk(&self, chunk: HttpContent) -> Result<(), TransportError> {
        let last = chunk.is_last();
        self.send_data(chunk.into_bytes(), last)
    }

    fn exception_caught(&self, error: PipelineError) {
        error!(error = %error, "Exchange failed in pipeline");
        if self.response_tx.borrow().is_some() {
            let mut headers = HeaderMap::new();
            headers.insert(CONTENT_LENGTH, HeaderValue::from_static("0"));
            if let Err(e) = self.send_head(StatusCode::INTERNAL_SERVER_ERROR, headers) {
                debug!(error = %e, "Could not send error response");
            }
        }
        self.body_tx.borrow_mut().take();
    }
}

/// Per-connection request handler.
#[derive(Clone)]
struct ExchangeHandler {
    pipeline: Pipeline,
    event_loop: EventLoop,
    peer: SocketAddr,
    exchange_timeout: Duration,
}

impl ExchangeHandler {
    async fn handle(self, req: Request<Incoming>) -> Response<ExchangeBody> {
        let timer = metrics::ExchangeTimer::new(req.method().as_str());
        let (parts, body) = req.into_parts();

        let (transport, response_rx) = ExchangeTransport::new();
        let context: SessionContext =
            Rc::new(ExchangeContext::new(self.event_loop.clone(), transport));
        let span = tracing_setup::create_exchange_span(
            parts.method.as_str(),
            parts.uri.path(),
            &context.uuid().to_string(),
        );
        context.set_span(span.clone());

        // Cancels the exchange if the connection drops this future.
        let cancel_guard = context.cancellation_token().drop_guard();

        let request = HttpRequestMessage::new(
            context.clone(),
            RequestHead::from_parts(&parts, Some(self.peer)),
        );
        span.in_scope(|| self.pipeline.filter(request.clone()));
        self.event_loop.spawn(
            feed_request_body(self.pipeline.clone(), request, body).instrument(span.clone()),
        );

        let response = match tokio::time::timeout(self.exchange_timeout, response_rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => {
                warn!(parent: &span, "Exchange ended without a response");
                empty_response(StatusCode::BAD_GATEWAY)
            }
            Err(_) => {
                warn!(parent: &span, timeout = ?self.exchange_timeout, "Exchange timed out");
                context.cancel();
                empty_response(StatusCode::GATEWAY_TIMEOUT)
            }
        };

        cancel_guard.disarm();
        metrics::increment_exchanges_total(parts.method.as_str(), response.status().as_u16());
        debug!(parent: &span, status = response.status().as_u16(), "Exchange answered");
        drop(timer);
        response
    }
}

/// Pass the request body to the pipeline, then tear the exchange down.
///
/// The endpoint may answer before the body ends, so the context is closed
/// here rather than when the response head goes out.
async fn feed_request_body(pipeline: Pipeline, request: HttpRequestMessage, body: Incoming) {
    pump_request_body(&pipeline, &request, body).await;
    request.context().close();
}

async fn pump_request_body(pipeline: &Pipeline, request: &HttpRequestMessage, mut body: Incoming) {
    let cancellation = request.context().cancellation_token();
    loop {
        let frame = tokio::select! {
            biased;
            _ = cancellation.cancelled() => return,
            frame = body.frame() => frame,
        };
        match frame {
            Some(Ok(frame)) => {
                if let Ok(data) = frame.into_data() {
                    let last = body.is_end_stream();
                    pipeline.filter_chunk(request.clone(), HttpContent::new(data, last));
                    if last {
                        return;
                    }
                }
            }
            Some(Err(e)) => {
                debug!(error = %e, "Request body failed");
                request.context().cancel();
                return;
            }
            None => {
                pipeline.filter_chunk(request.clone(), HttpContent::empty_last());
                return;
            }
        }
    }
}

/// Accept loop of one event-loop thread.
struct EventLoopWorker {
    index: usize,
    registry: Arc<dyn FilterRegistry>,
    services: RunnerServices,
    exchange_timeout: Duration,
    shutdown: CancellationToken,
}

impl EventLoopWorker {
    fn run(self, listener: std::net::TcpListener) -> Result<()> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("Failed to build event loop runtime")?;
        let event_loop = EventLoop::new();
        let span = tracing_setup::create_event_loop_span(self.index);
        event_loop.block_on(
            &runtime,
            self.accept_loop(listener, event_loop.clone()).instrument(span),
        )
    }

    async fn accept_loop(self, listener: std::net::TcpListener, event_loop: EventLoop) -> Result<()> {
        let listener = tokio::net::TcpListener::from_std(listener)
            .context("Failed to register listener with event loop")?;
        let pipeline = Pipeline::build(self.registry.clone(), self.services.clone(), None);
        let connections = TaskTracker::new();
        debug!("Event loop accepting connections");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let handler = ExchangeHandler {
                            pipeline: pipeline.clone(),
                            event_loop: event_loop.clone(),
                            peer,
                            exchange_timeout: self.exchange_timeout,
                        };
                        event_loop.spawn(connections.track_future(serve_connection(
                            stream,
                            handler,
                            self.shutdown.clone(),
                        )));
                    }
                    Err(e) => warn!(error = %e, "Accept failed"),
                },
            }
        }

        connections.close();
        if tokio::time::timeout(self.exchange_timeout, connections.wait())
            .await
            .is_err()
        {
            warn!(open = connections.len(), "Closing event loop with connections still open");
        }
        debug!("Event loop stopped");
        Ok(())
    }
}

async fn serve_connection(stream: tokio::net::TcpStream, handler: ExchangeHandler, shutdown: CancellationToken) {
    let peer = handler.peer;
    let io = TokioIo::new(stream);
    let service = service_fn(move |req| {
        let handler = handler.clone();
        async move { Ok::<_, Infallible>(handler.handle(req).await) }
    });
    let conn = http1::Builder::new().serve_connection(io, service);
    tokio::pin!(conn);

    let result = tokio::select! {
        result = conn.as_mut() => result,
        _ = shutdown.cancelled() => {
            // Finish the in-flight exchange, then close instead of keeping alive.
            conn.as_mut().graceful_shutdown();
            conn.as_mut().await
        }
    };
    if let Err(e) = result {
        debug!(peer = %peer, error = %e, "Connection closed with error");
    }
}

/// HTTP server running the filter pipeline on a set of event loops.
pub struct HttpServer {
    config: Arc<ServerConfig>,
    registry: Arc<dyn FilterRegistry>,
    services: RunnerServices,
}

impl HttpServer {
    pub fn new(config: Arc<ServerConfig>, registry: Arc<dyn FilterRegistry>, services: RunnerServices) -> Self {
        Self {
            config,
            registry,
            services,
        }
    }

    /// Bind the listening socket without serving yet.
    pub fn bind(self) -> Result<BoundServer> {
        let addr: SocketAddr = self
            .config
            .listen_addr
            .parse()
            .context("Failed to parse listen address")?;
        let listener = std::net::TcpListener::bind(addr)
            .with_context(|| format!("Failed to bind to {addr}"))?;
        listener
            .set_nonblocking(true)
            .context("Failed to make listener non-blocking")?;
        Ok(BoundServer {
            listener,
            server: self,
        })
    }

    /// Bind and serve until `shutdown` is cancelled. Blocks the calling thread.
    pub fn run(self, shutdown: CancellationToken) -> Result<()> {
        self.bind()?.run(shutdown)
    }
}

/// A server whose socket is bound.
pub struct BoundServer {
    listener: std::net::TcpListener,
    server: HttpServer,
}

impl BoundServer {
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("Failed to get local addr")
    }

    /// Serve on `event_loops` threads until `shutdown` is cancelled.
    pub fn run(self, shutdown: CancellationToken) -> Result<()> {
        let config = &self.server.config;
        let event_loops = config.event_loops.max(1);
        info!(
            addr = %self.local_addr()?,
            event_loops,
            "sluice listening"
        );

        let mut handles = Vec::with_capacity(event_loops);
        for index in 0..event_loops {
            let listener = self
                .listener
                .try_clone()
                .context("Failed to clone listener")?;
            let worker = EventLoopWorker {
                index,
                registry: self.server.registry.clone(),
                services: self.server.services.clone(),
                exchange_timeout: Duration::from_secs(config.exchange_timeout_secs),
                shutdown: shutdown.clone(),
            };
            let handle = std::thread::Builder::new()
                .name(format!("sluice-loop-{index}"))
                .spawn(move || worker.run(listener))
                .context("Failed to spawn event loop thread")?;
            handles.push(handle);
        }

        let mut first_error = None;
        for handle in handles {
            let outcome = handle
                .join()
                .map_err(|_| eyre!("event loop thread panicked"))
                .and_then(|result| result);
            if let Err(e) = outcome {
                error!(error = %e, "Event loop failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::message::HttpResponseMessage;

    fn exchange(transport: Rc<ExchangeTransport>) -> HttpRequestMessage {
        let context = Rc::new(ExchangeContext::new(EventLoop::new(), transport));
        HttpRequestMessage::new(
            context,
            RequestHead::new(http::Method::GET, http::Uri::from_static("/t")),
        )
    }

    #[tokio::test]
    async fn test_write_message_sends_head_and_body() {
        let (transport, response_rx) = ExchangeTransport::new();
        let request = exchange(transport.clone());
        let response = HttpResponseMessage::new(request.context().clone(), &request, StatusCode::OK);
        response.set_body("hello");

        assert!(transport.is_active());
        transport.write_message(response.into()).unwrap();

        let response = response_rx.await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_LENGTH], "5");
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn test_second_head_is_rejected() {
        let (transport, _response_rx) = ExchangeTransport::new();
        let request = exchange(transport.clone());
        let first = HttpResponseMessage::default_error_response(&request);
        let second = HttpResponseMessage::default_error_response(&request);

        transport.write_message(first.into()).unwrap();
        assert!(matches!(
            transport.write_message(second.into()),
            Err(TransportError::AlreadyCommitted)
        ));
    }

    #[tokio::test]
    async fn test_inactive_once_client_is_gone() {
        let (transport, response_rx) = ExchangeTransport::new();
        drop(response_rx);
        assert!(!transport.is_active());
    }

    #[tokio::test]
    async fn test_exception_answers_500() {
        let (transport, response_rx) = ExchangeTransport::new();
        transport.exception_caught(PipelineError::EndpointNotResolved("x".to_string()));
        let response = response_rx.await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
