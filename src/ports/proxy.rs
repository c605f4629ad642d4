use std::rc::Rc;

use crate::core::{
    filter::FilterRef,
    message::{HttpRequestMessage, HttpResponseMessage},
    runner::FilterRunner,
};

/// Builds the per-request proxying endpoint.
///
/// A proxy endpoint forwards its own response to `next_stage` as it arrives
/// from the origin, so the endpoint runner never forwards on its behalf.
pub trait ProxyEndpointFactory {
    fn new_proxy_endpoint(
        &self,
        request: &HttpRequestMessage,
        next_stage: Option<Rc<dyn FilterRunner<HttpResponseMessage>>>,
    ) -> FilterRef<HttpRequestMessage, HttpResponseMessage>;
}
