//! Assembly of the inbound, endpoint and outbound stages of one event loop.
use std::{rc::Rc, sync::Arc};

use crate::{
    core::{
        chain::ChainRunner,
        endpoint::{EndpointRunner, RegistryEndpointResolver},
        engine::RunnerServices,
        filter::{FilterRef, FilterType},
        message::{HttpContent, HttpRequestMessage, HttpResponseMessage},
        runner::FilterRunner,
    },
    ports::{
        filter_registry::{FilterRegistry, RegisteredFilter},
        proxy::ProxyEndpointFactory,
    },
};

/// The stages of the pipeline, wired inbound -> endpoint -> outbound -> transport.
#[derive(Clone)]
pub struct Pipeline {
    inbound: Rc<ChainRunner<HttpRequestMessage>>,
    endpoint: Rc<EndpointRunner>,
    outbound: Rc<ChainRunner<HttpResponseMessage>>,
}

impl Pipeline {
    /// Build the stages from the filters currently registered.
    pub fn build(
        registry: Arc<dyn FilterRegistry>,
        services: RunnerServices,
        proxy_factory: Option<Rc<dyn ProxyEndpointFactory>>,
    ) -> Self {
        let inbound_filters: Vec<FilterRef<HttpRequestMessage, HttpRequestMessage>> = registry
            .filters_by_type(FilterType::Inbound)
            .into_iter()
            .filter_map(RegisteredFilter::into_inbound)
            .collect();
        let outbound_filters: Vec<FilterRef<HttpResponseMessage, HttpResponseMessage>> = registry
            .filters_by_type(FilterType::Outbound)
            .into_iter()
            .filter_map(RegisteredFilter::into_outbound)
            .collect();

        let outbound = ChainRunner::new(FilterType::Outbound, services.clone(), outbound_filters, None);

        let mut resolver = RegistryEndpointResolver::new(registry);
        if let Some(factory) = proxy_factory {
            resolver = resolver.with_proxy_factory(factory);
        }
        let outbound_stage: Rc<dyn FilterRunner<HttpResponseMessage>> = outbound.clone();
        let endpoint = EndpointRunner::new(services.clone(), resolver, Some(outbound_stage));

        let endpoint_stage: Rc<dyn FilterRunner<HttpRequestMessage>> = endpoint.clone();
        let inbound = ChainRunner::new(FilterType::Inbound, services, inbound_filters, Some(endpoint_stage));

        Self {
            inbound,
            endpoint,
            outbound,
        }
    }

    /// Start processing a request.
    pub fn filter(&self, request: HttpRequestMessage) {
        self.inbound.filter(request);
    }

    /// Feed one more chunk of the request body.
    pub fn filter_chunk(&self, request: HttpRequestMessage, chunk: HttpContent) {
        self.inbound.filter_chunk(request, chunk);
    }

    pub fn inbound(&self) -> &Rc<ChainRunner<HttpRequestMessage>> {
        &self.inbound
    }

    pub fn endpoint(&self) -> &Rc<EndpointRunner> {
        &self.endpoint
    }

    pub fn outbound(&self) -> &Rc<ChainRunner<HttpResponseMessage>> {
        &self.outbound
    }
}
