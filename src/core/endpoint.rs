//! The endpoint stage: turns a request into a response.
use std::{
    fmt,
    rc::{Rc, Weak},
    sync::Arc,
};

use tracing::debug;

use crate::{
    core::{
        engine::{FilterEngine, RunnerServices, Stage},
        error::PipelineError,
        fallback::{MissingEndpoint, StaticResponseEndpoint},
        filter::{FilterRef, FilterType},
        message::{HttpContent, HttpRequestMessage, HttpResponseMessage, Message},
        runner::{FilterOutcome, FilterRunner, NextStage},
    },
    ports::{filter_registry::FilterRegistry, proxy::ProxyEndpointFactory},
};

/// Name under which the proxying endpoint is requested.
pub const PROXY_ENDPOINT_FILTER_NAME: &str = "endpoint.ProxyEndpoint";

/// Endpoint name used when the exchange names no endpoint at all.
pub const NO_ENDPOINT_NAME: &str = "NO_ENDPOINT_NAME";

pub type EndpointRef = FilterRef<HttpRequestMessage, HttpResponseMessage>;

/// The endpoint chosen for an exchange.
#[derive(Clone)]
pub struct ResolvedEndpoint {
    filter: EndpointRef,
    forwards_itself: bool,
}

impl ResolvedEndpoint {
    pub fn new(filter: EndpointRef) -> Self {
        Self {
            filter,
            forwards_itself: false,
        }
    }

    /// An endpoint that sends its own response to the next stage.
    pub fn proxy(filter: EndpointRef) -> Self {
        Self {
            filter,
            forwards_itself: true,
        }
    }

    pub fn filter(&self) -> &EndpointRef {
        &self.filter
    }

    pub fn name(&self) -> &str {
        self.filter.filter_name()
    }

    pub fn is_proxy(&self) -> bool {
        self.forwards_itself
    }
}

impl fmt::Debug for ResolvedEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedEndpoint")
            .field("name", &self.name())
            .field("proxy", &self.forwards_itself)
            .finish()
    }
}

/// Strategy mapping an endpoint name to the filter that serves it.
pub trait EndpointResolver {
    fn resolve(
        &self,
        endpoint_name: Option<&str>,
        request: &HttpRequestMessage,
        next_stage: &NextStage<HttpResponseMessage>,
    ) -> ResolvedEndpoint;
}

/// Resolves endpoints from a [`FilterRegistry`], with static-response,
/// proxy and missing-endpoint fallbacks.
pub struct RegistryEndpointResolver {
    registry: Arc<dyn FilterRegistry>,
    proxy_factory: Option<Rc<dyn ProxyEndpointFactory>>,
}

impl RegistryEndpointResolver {
    pub fn new(registry: Arc<dyn FilterRegistry>) -> Self {
        Self {
            registry,
            proxy_factory: None,
        }
    }

    pub fn with_proxy_factory(mut self, factory: Rc<dyn ProxyEndpointFactory>) -> Self {
        self.proxy_factory = Some(factory);
        self
    }
}

impl EndpointResolver for RegistryEndpointResolver {
    fn resolve(
        &self,
        endpoint_name: Option<&str>,
        request: &HttpRequestMessage,
        next_stage: &NextStage<HttpResponseMessage>,
    ) -> ResolvedEndpoint {
        if request.context().static_response().is_some() {
            let filter: EndpointRef = Arc::new(StaticResponseEndpoint);
            return ResolvedEndpoint::new(filter);
        }

        let name = match endpoint_name {
            Some(name) if !name.is_empty() => name,
            _ => {
                let filter: EndpointRef = Arc::new(MissingEndpoint::new(NO_ENDPOINT_NAME));
                return ResolvedEndpoint::new(filter);
            }
        };

        if name == PROXY_ENDPOINT_FILTER_NAME
            && let Some(factory) = &self.proxy_factory
        {
            return ResolvedEndpoint::proxy(factory.new_proxy_endpoint(request, next_stage.clone()));
        }

        match self
            .registry
            .lookup(name, FilterType::Endpoint)
            .and_then(|registered| registered.into_endpoint())
        {
            Some(filter) => ResolvedEndpoint::new(filter),
            None => {
                let filter: EndpointRef = Arc::new(MissingEndpoint::new(name));
                ResolvedEndpoint::new(filter)
            }
        }
    }
}

/// Runs the single endpoint of an exchange and forwards its response.
pub struct EndpointRunner {
    me: Weak<EndpointRunner>,
    engine: FilterEngine<HttpRequestMessage, HttpResponseMessage>,
    resolver: Box<dyn EndpointResolver>,
}

impl EndpointRunner {
    pub fn new(
        services: RunnerServices,
        resolver: impl EndpointResolver + 'static,
        next_stage: NextStage<HttpResponseMessage>,
    ) -> Rc<Self> {
        Rc::new_cyclic(|me| Self {
            me: me.clone(),
            engine: FilterEngine::new(FilterType::Endpoint, services, next_stage),
            resolver: Box::new(resolver),
        })
    }

    /// The endpoint recorded for `request`, if it has been resolved.
    pub fn endpoint(request: &HttpRequestMessage) -> Option<ResolvedEndpoint> {
        request.context().resolved_endpoint()
    }

    fn stage(&self) -> Weak<dyn Stage<HttpRequestMessage, HttpResponseMessage>> {
        self.me.clone()
    }

    /// Name of the endpoint to run, switching to the error endpoint when an
    /// error response was requested.
    fn endpoint_name(&self, request: &HttpRequestMessage) -> Option<String> {
        let context = request.context();
        if context.should_send_error_response() {
            context.set_should_send_error_response(false);
            context.set_error_response_sent(true);
            let name = context
                .error_endpoint()
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| self.engine.settings().default_error_endpoint.clone());
            Some(name)
        } else {
            context.endpoint()
        }
    }

    fn forward(&self, request: &HttpRequestMessage, endpoint_name: &str, response: HttpResponseMessage) {
        debug!(
            uuid = %request.context().uuid(),
            endpoint = endpoint_name,
            "Endpoint calling next stage"
        );
        if let Err(err) = self.engine.invoke_next_stage(response) {
            self.engine.handle_exception(request, endpoint_name, err);
        }
    }
}

impl FilterRunner<HttpRequestMessage> for EndpointRunner {
    fn filter(&self, request: HttpRequestMessage) {
        let context = request.context().clone();
        if context.is_cancelled() {
            request.dispose_buffered_body();
            debug!(uuid = %context.uuid(), "Request was cancelled before the endpoint ran");
            return;
        }

        let endpoint_name = self.endpoint_name(&request);
        let endpoint = self
            .resolver
            .resolve(endpoint_name.as_deref(), &request, self.engine.next_stage());
        debug!(
            uuid = %context.uuid(),
            endpoint = endpoint.name(),
            proxy = endpoint.is_proxy(),
            "Got endpoint"
        );
        context.set_resolved_endpoint(endpoint.clone());

        if let FilterOutcome::Ready(response) =
            self.engine.run_filter(&self.stage(), endpoint.filter(), &request)
            && !endpoint.is_proxy()
        {
            self.forward(&request, endpoint.name(), response);
        }
    }

    fn filter_chunk(&self, request: HttpRequestMessage, chunk: HttpContent) {
        let context = request.context().clone();
        if context.is_cancelled() {
            drop(chunk);
            return;
        }

        let Some(endpoint) = context.resolved_endpoint() else {
            self.engine.handle_exception(
                &request,
                "-",
                PipelineError::EndpointNotResolved(context.uuid().to_string()),
            );
            return;
        };

        // A replaced chunk is released when the endpoint drops it.
        let Some(chunk) = endpoint.filter().process_content_chunk(&request, chunk) else {
            return;
        };
        request.buffer_body_contents(chunk);

        if self.engine.is_filter_awaiting_body(&context)
            && request.has_complete_body()
            && !endpoint.is_proxy()
            && let FilterOutcome::Ready(response) =
                self.engine.run_filter(&self.stage(), endpoint.filter(), &request)
        {
            self.forward(&request, endpoint.name(), response);
        }
    }
}

impl Stage<HttpRequestMessage, HttpResponseMessage> for EndpointRunner {
    fn engine(&self) -> &FilterEngine<HttpRequestMessage, HttpResponseMessage> {
        &self.engine
    }

    fn resume(&self, response: HttpResponseMessage) -> Result<(), PipelineError> {
        if response.context().is_cancelled() {
            return Ok(());
        }
        self.engine.invoke_next_stage(response)
    }
}
