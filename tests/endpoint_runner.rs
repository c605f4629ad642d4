// Endpoint resolution and dispatch.
mod common;

#[cfg(test)]
mod test {
    use std::{rc::Rc, sync::Arc};

    use http::{HeaderValue, Method, StatusCode};
    use sluice::{
        adapters::{
            InMemoryFilterRegistry,
            filters::{EchoEndpoint, ErrorResponseEndpoint},
        },
        config::models::FilterSettings,
        core::{
            EndpointRunner, ExecutionStatus, Filter, FilterError, FilterMeta, FilterRef,
            FilterType, HttpContent, HttpRequestMessage, HttpResponseMessage, Message,
            RegistryEndpointResolver,
            endpoint::{NO_ENDPOINT_NAME, PROXY_ENDPOINT_FILTER_NAME},
            error::FilterResult,
            filter::{FilterFuture, FilterSyncType},
            runner::{FilterRunner, NextStage},
        },
        ports::{filter_metrics::HangingKind, proxy::ProxyEndpointFactory},
    };

    use super::common::*;

    struct Fixture {
        harness: Harness,
        registry: Arc<InMemoryFilterRegistry>,
        capture: Rc<Capture<HttpResponseMessage>>,
    }

    impl Fixture {
        fn new() -> Self {
            let registry = Arc::new(InMemoryFilterRegistry::new());
            registry.register_endpoint(ErrorResponseEndpoint);
            Self {
                harness: Harness::new(),
                registry,
                capture: Capture::new(),
            }
        }

        fn runner(&self) -> Rc<EndpointRunner> {
            let next: NextStage<HttpResponseMessage> = Some(self.capture.clone());
            EndpointRunner::new(
                self.harness.services(),
                RegistryEndpointResolver::new(self.registry.clone()),
                next,
            )
        }

        fn request_for(&self, endpoint: &str) -> HttpRequestMessage {
            let request = self.harness.get("/x");
            request.context().set_endpoint(endpoint);
            request
        }
    }

    #[test]
    fn test_named_endpoint_answers() {
        let fixture = Fixture::new();
        let answer = Arc::new(Answer::new("endpoint.Answer", StatusCode::CREATED, "made"));
        register_endpoint(&fixture.registry, &answer);
        let runner = fixture.runner();

        let request = fixture.request_for("endpoint.Answer");
        runner.filter(request.clone());

        let responses = fixture.capture.messages();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].status(), StatusCode::CREATED);
        assert_eq!(responses[0].body_bytes().as_ref(), b"made");
        assert_eq!(
            EndpointRunner::endpoint(&request).map(|e| e.name().to_string()),
            Some("endpoint.Answer".to_string())
        );
        assert_eq!(
            fixture.harness.notifier.statuses_for("endpoint.Answer"),
            vec![ExecutionStatus::Success]
        );
    }

    #[test]
    fn test_unknown_endpoint_uses_missing_fallback() {
        let fixture = Fixture::new();
        let runner = fixture.runner();

        let request = fixture.request_for("foo");
        runner.filter(request.clone());

        let responses = fixture.capture.messages();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(responses[0].has_complete_body());

        let context = request.context();
        assert!(context.error_response_sent());
        let error = context.error().expect("missing endpoint sets an error");
        assert_eq!(error.to_string(), "Missing Endpoint filter, name = foo");
        assert_eq!(
            fixture.harness.notifier.statuses_for("MissingEndpoint:foo"),
            vec![ExecutionStatus::Success]
        );
    }

    #[test]
    fn test_no_endpoint_name() {
        let fixture = Fixture::new();
        let runner = fixture.runner();

        let request = fixture.harness.get("/x");
        runner.filter(request.clone());

        let expected = format!("MissingEndpoint:{NO_ENDPOINT_NAME}");
        assert_eq!(
            EndpointRunner::endpoint(&request).map(|e| e.name().to_string()),
            Some(expected)
        );
        assert_eq!(
            fixture.capture.messages()[0].status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_static_response_wins() {
        let fixture = Fixture::new();
        let answer = Arc::new(Answer::new("endpoint.Answer", StatusCode::OK, "ok"));
        register_endpoint(&fixture.registry, &answer);
        let runner = fixture.runner();

        let request = fixture.request_for("endpoint.Answer");
        let canned = HttpResponseMessage::new(request.context().clone(), &request, StatusCode::NO_CONTENT);
        request.context().set_static_response(canned.clone());
        runner.filter(request);

        let responses = fixture.capture.messages();
        assert_eq!(responses.len(), 1);
        assert!(responses[0].ptr_eq(&canned));
        assert!(canned.has_complete_body());
        assert_eq!(answer.applied(), 0);
    }

    #[test]
    fn test_cancelled_exchange_is_not_forwarded() {
        let fixture = Fixture::new();
        let answer = Arc::new(Answer::new("endpoint.Answer", StatusCode::OK, "ok"));
        register_endpoint(&fixture.registry, &answer);
        let runner = fixture.runner();

        let request = fixture.request_for("endpoint.Answer");
        request.buffer_body_contents(HttpContent::data("buffered"));
        request.context().cancel();
        runner.filter(request.clone());

        assert!(fixture.capture.messages().is_empty());
        assert_eq!(request.with_body(|body| body.chunk_count()), 0);
        assert_eq!(answer.applied(), 0);
        assert!(fixture.harness.notifier.calls().is_empty());
        assert!(fixture.harness.transport.errors().is_empty());

        runner.filter_chunk(request, HttpContent::last("late"));
        assert!(fixture.capture.chunks().is_empty());
    }

    #[test]
    fn test_endpoint_failure_reroutes_to_error_endpoint() {
        let fixture = Fixture::new();
        let broken = Arc::new(Answer::new("endpoint.Broken", StatusCode::OK, "ok").failing());
        register_endpoint(&fixture.registry, &broken);
        let runner = fixture.runner();

        let request = fixture.request_for("endpoint.Broken");
        runner.filter(request.clone());

        let context = request.context().clone();
        assert!(context.should_send_error_response());
        assert_eq!(
            fixture.harness.notifier.statuses_for("endpoint.Broken"),
            vec![ExecutionStatus::Failed]
        );
        let responses = fixture.capture.messages();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].status(), StatusCode::INTERNAL_SERVER_ERROR);

        // The next resolution pass renders the recorded errors.
        runner.filter(request.clone());
        assert!(!context.should_send_error_response());
        assert!(context.error_response_sent());
        assert_eq!(
            EndpointRunner::endpoint(&request).map(|e| e.name().to_string()),
            Some(ErrorResponseEndpoint::NAME.to_string())
        );

        let responses = fixture.capture.messages();
        assert_eq!(responses.len(), 2);
        let rendered: serde_json::Value = serde_json::from_slice(&responses[1].body_bytes()).unwrap();
        assert_eq!(rendered["status"], 500);
        assert_eq!(rendered["errors"][0]["filter"], "endpoint.Broken");
        assert_eq!(rendered["errors"][0]["type"], "end");
    }

    #[test]
    fn test_context_error_endpoint_override() {
        let fixture = Fixture::new();
        let custom = Arc::new(Answer::new("endpoint.CustomError", StatusCode::BAD_GATEWAY, "sorry"));
        register_endpoint(&fixture.registry, &custom);
        let runner = fixture.runner();

        let request = fixture.request_for("endpoint.Whatever");
        let context = request.context();
        context.set_error_endpoint("endpoint.CustomError");
        context.set_should_send_error_response(true);
        runner.filter(request.clone());

        assert_eq!(custom.applied(), 1);
        assert_eq!(fixture.capture.messages()[0].status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_endpoint_ignores_stop_processing() {
        let fixture = Fixture::new();
        let answer = Arc::new(Answer::new("endpoint.Answer", StatusCode::OK, "ok"));
        register_endpoint(&fixture.registry, &answer);
        let runner = fixture.runner();

        let request = fixture.request_for("endpoint.Answer");
        request.context().set_stop_filter_processing(true);
        runner.filter(request);

        assert_eq!(answer.applied(), 1);
        assert_eq!(fixture.capture.messages()[0].status(), StatusCode::OK);
    }

    #[test]
    fn test_disabled_endpoint_returns_default_output() {
        let fixture = Fixture::new();
        let answer = Arc::new(Answer::new("endpoint.Answer", StatusCode::OK, "ok").disabled());
        register_endpoint(&fixture.registry, &answer);
        let runner = fixture.runner();

        runner.filter(fixture.request_for("endpoint.Answer"));

        assert_eq!(answer.applied(), 0);
        assert_eq!(
            fixture.harness.notifier.statuses_for("endpoint.Answer"),
            vec![ExecutionStatus::Disabled]
        );
        assert_eq!(
            fixture.capture.messages()[0].status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_endpoint_waits_for_body() {
        let fixture = Fixture::new();
        let answer = Arc::new(Answer::new("endpoint.Upload", StatusCode::OK, "").needing_body());
        register_endpoint(&fixture.registry, &answer);
        let runner = fixture.runner();

        let request = fixture.request_for("endpoint.Upload");
        runner.filter(request.clone());
        assert!(fixture.capture.messages().is_empty());
        assert!(request.context().is_awaiting_body(FilterType::Endpoint));

        runner.filter_chunk(request.clone(), HttpContent::data("he"));
        assert!(fixture.capture.messages().is_empty());
        runner.filter_chunk(request.clone(), HttpContent::last("llo"));

        let responses = fixture.capture.messages();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].body_bytes().as_ref(), b"hello");
        assert!(!request.context().is_awaiting_body(FilterType::Endpoint));
        assert_eq!(answer.applied(), 1);
        assert_eq!(
            fixture.harness.notifier.statuses_for("endpoint.Upload"),
            vec![ExecutionStatus::Success]
        );
    }

    #[test]
    fn test_chunk_before_resolution_reports_to_transport() {
        let fixture = Fixture::new();
        let runner = fixture.runner();

        runner.filter_chunk(fixture.harness.get("/x"), HttpContent::last("orphan"));

        let errors = fixture.harness.transport.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("no endpoint resolved"));
    }

    #[tokio::test]
    async fn test_async_endpoint_forwards_on_completion() {
        let fixture = Fixture::new();
        let echo = Arc::new(EchoEndpoint::new(fixture.harness.settings.clone()));
        register_endpoint(&fixture.registry, &echo);
        let runner = fixture.runner();

        let request = fixture.harness.request(Method::POST, "/echo");
        request.context().set_endpoint(EchoEndpoint::NAME);
        request.set_header(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain"),
        );
        runner.filter(request.clone());
        runner.filter_chunk(request.clone(), HttpContent::last("ping"));
        assert_eq!(echo.in_flight(), 1);
        assert!(fixture.capture.messages().is_empty());

        fixture.harness.settle().await;

        let responses = fixture.capture.messages();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].body_bytes().as_ref(), b"ping");
        assert_eq!(
            responses[0].headers()[http::header::CONTENT_TYPE],
            "text/plain"
        );
        assert_eq!(echo.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_async_endpoint_cancelled_before_completion() {
        let fixture = Fixture::new();
        let echo = Arc::new(EchoEndpoint::new(fixture.harness.settings.clone()));
        register_endpoint(&fixture.registry, &echo);
        let runner = fixture.runner();

        let request = fixture.harness.request(Method::POST, "/echo");
        request.context().set_endpoint(EchoEndpoint::NAME);
        request.buffer_body_contents(HttpContent::last("ping"));
        runner.filter(request.clone());
        request.context().cancel();
        fixture.harness.settle().await;

        assert!(fixture.capture.messages().is_empty());
        assert_eq!(echo.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_reloaded_concurrency_limit_applies_to_next_request() {
        let fixture = Fixture::new();
        let echo = Arc::new(EchoEndpoint::new(fixture.harness.settings.clone()));
        register_endpoint(&fixture.registry, &echo);
        let runner = fixture.runner();
        let echo_request = || {
            let request = fixture.harness.request(Method::POST, "/echo");
            request.context().set_endpoint(EchoEndpoint::NAME);
            request.buffer_body_contents(HttpContent::last("ping"));
            request
        };

        runner.filter(echo_request());
        runner.filter(echo_request());
        assert_eq!(echo.in_flight(), 2);

        let mut settings = FilterSettings::default();
        settings
            .concurrency_limits
            .insert(EchoEndpoint::NAME.to_string(), 2);
        fixture.harness.settings.store(Arc::new(settings));

        let rejected = echo_request();
        runner.filter(rejected.clone());
        assert_eq!(echo.in_flight(), 2);
        assert!(rejected.context().should_send_error_response());
        assert_eq!(
            rejected.context().error().map(|e| e.status_code()),
            Some(StatusCode::SERVICE_UNAVAILABLE)
        );
        let responses = fixture.capture.messages();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].status(), StatusCode::INTERNAL_SERVER_ERROR);

        fixture.harness.settle().await;
        assert_eq!(echo.in_flight(), 0);
        assert_eq!(fixture.capture.messages().len(), 3);

        // Protection switched off lifts the limit altogether.
        let mut settings = FilterSettings::default();
        settings.concurrency_protect_enabled = false;
        settings
            .concurrency_limits
            .insert(EchoEndpoint::NAME.to_string(), 1);
        fixture.harness.settings.store(Arc::new(settings));
        runner.filter(echo_request());
        runner.filter(echo_request());
        assert_eq!(echo.in_flight(), 2);
        fixture.harness.settle().await;
        assert_eq!(echo.in_flight(), 0);
    }

    /// Asynchronous endpoint whose upstream never answers successfully.
    struct Unreachable;

    impl FilterMeta for Unreachable {
        fn filter_name(&self) -> &str {
            "endpoint.Unreachable"
        }

        fn filter_type(&self) -> FilterType {
            FilterType::Endpoint
        }
    }

    impl Filter<HttpRequestMessage, HttpResponseMessage> for Unreachable {
        fn sync_type(&self) -> FilterSyncType {
            FilterSyncType::Async
        }

        fn apply_async(&self, _input: &HttpRequestMessage) -> FilterResult<FilterFuture<HttpResponseMessage>> {
            Ok(Box::pin(async {
                tokio::task::yield_now().await;
                Err(FilterError::gateway("upstream unreachable", StatusCode::BAD_GATEWAY, false))
            }))
        }

        fn default_output(&self, input: &HttpRequestMessage) -> HttpResponseMessage {
            HttpResponseMessage::default_error_response(input)
        }
    }

    #[tokio::test]
    async fn test_async_endpoint_failure_requests_error_response() {
        let fixture = Fixture::new();
        fixture.registry.register_endpoint(Unreachable);
        let runner = fixture.runner();

        let request = fixture.request_for("endpoint.Unreachable");
        runner.filter(request.clone());
        assert!(fixture.capture.messages().is_empty());
        assert!(!request.context().should_send_error_response());

        fixture.harness.settle().await;

        let context = request.context();
        assert!(context.should_send_error_response());
        assert_eq!(
            context.error().map(|e| e.status_code()),
            Some(StatusCode::BAD_GATEWAY)
        );
        assert_eq!(
            fixture.harness.notifier.statuses_for("endpoint.Unreachable"),
            vec![ExecutionStatus::Failed]
        );
        let responses = fixture.capture.messages();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(responses[0].has_complete_body());
    }

    #[tokio::test]
    async fn test_failed_resumption_is_reported_once() {
        let harness = Harness::new();
        let registry = Arc::new(InMemoryFilterRegistry::new());
        let echo = Arc::new(EchoEndpoint::new(harness.settings.clone()));
        register_endpoint(&registry, &echo);
        let runner = EndpointRunner::new(
            harness.services(),
            RegistryEndpointResolver::new(registry),
            None,
        );

        let request = harness.request(Method::POST, "/echo");
        request.context().set_endpoint(EchoEndpoint::NAME);
        request.buffer_body_contents(HttpContent::last("ping"));
        runner.filter(request.clone());
        harness.transport.fail_writes();

        harness.settle().await;
        harness.settle().await;

        assert_eq!(harness.transport.messages_written(), 0);
        assert_eq!(
            harness.transport.errors(),
            vec!["transport error: connection closed".to_string()]
        );
        assert_eq!(
            harness.notifier.statuses_for(EchoEndpoint::NAME),
            vec![ExecutionStatus::Success]
        );
        assert_eq!(echo.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_dropped_stage_fails_exchange() {
        let harness = Harness::new();
        let registry = Arc::new(InMemoryFilterRegistry::new());
        let echo = Arc::new(EchoEndpoint::new(harness.settings.clone()));
        register_endpoint(&registry, &echo);
        let runner = EndpointRunner::new(
            harness.services(),
            RegistryEndpointResolver::new(registry),
            None,
        );

        let request = harness.request(Method::POST, "/echo");
        request.context().set_endpoint(EchoEndpoint::NAME);
        request.buffer_body_contents(HttpContent::last("ping"));
        runner.filter(request.clone());
        drop(runner);

        harness.settle().await;

        assert!(harness.transport.responses().is_empty());
        assert_eq!(
            harness.transport.errors(),
            vec![format!(
                "pipeline stage dropped before filter {} completed",
                EchoEndpoint::NAME
            )]
        );
        assert_eq!(echo.in_flight(), 0);
    }

    #[test]
    fn test_final_stage_writes_to_transport() {
        let harness = Harness::new();
        let registry = Arc::new(InMemoryFilterRegistry::new());
        let answer = Arc::new(Answer::new("endpoint.Answer", StatusCode::OK, "ok"));
        register_endpoint(&registry, &answer);
        let runner = EndpointRunner::new(
            harness.services(),
            RegistryEndpointResolver::new(registry),
            None,
        );

        let request = harness.get("/x");
        request.context().set_endpoint("endpoint.Answer");
        runner.filter(request.clone());
        assert_eq!(harness.transport.responses().len(), 1);

        harness.transport.set_active(false);
        let request = harness.get("/x");
        request.context().set_endpoint("endpoint.Answer");
        runner.filter(request.clone());
        assert_eq!(harness.transport.responses().len(), 1);
        assert!(request.context().is_cancelled());
        assert_eq!(
            harness.metrics.hanging(),
            vec![(HangingKind::Message, "HttpResponseMessage".to_string())]
        );
    }

    /// Endpoint that sends its response downstream itself.
    struct SelfForwarding {
        next: NextStage<HttpResponseMessage>,
    }

    impl FilterMeta for SelfForwarding {
        fn filter_name(&self) -> &str {
            PROXY_ENDPOINT_FILTER_NAME
        }

        fn filter_type(&self) -> FilterType {
            FilterType::Endpoint
        }
    }

    impl Filter<HttpRequestMessage, HttpResponseMessage> for SelfForwarding {
        fn apply(&self, input: &HttpRequestMessage) -> FilterResult<Option<HttpResponseMessage>> {
            let response = HttpResponseMessage::new(input.context().clone(), input, StatusCode::ACCEPTED);
            response.set_body("proxied");
            if let Some(next) = &self.next {
                next.filter(response.clone());
            }
            Ok(Some(response))
        }

        fn default_output(&self, input: &HttpRequestMessage) -> HttpResponseMessage {
            HttpResponseMessage::default_error_response(input)
        }
    }

    struct SelfForwardingFactory;

    impl ProxyEndpointFactory for SelfForwardingFactory {
        fn new_proxy_endpoint(
            &self,
            _request: &HttpRequestMessage,
            next_stage: Option<Rc<dyn FilterRunner<HttpResponseMessage>>>,
        ) -> FilterRef<HttpRequestMessage, HttpResponseMessage> {
            Arc::new(SelfForwarding { next: next_stage })
        }
    }

    #[test]
    fn test_proxy_endpoint_forwards_itself() {
        let fixture = Fixture::new();
        let next: NextStage<HttpResponseMessage> = Some(fixture.capture.clone());
        let resolver = RegistryEndpointResolver::new(fixture.registry.clone())
            .with_proxy_factory(Rc::new(SelfForwardingFactory));
        let runner = EndpointRunner::new(fixture.harness.services(), resolver, next);

        let request = fixture.request_for(PROXY_ENDPOINT_FILTER_NAME);
        runner.filter(request.clone());

        let responses = fixture.capture.messages();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].status(), StatusCode::ACCEPTED);
        assert!(EndpointRunner::endpoint(&request).is_some_and(|e| e.is_proxy()));

        // Chunks reach the proxy, which owns completion of the exchange.
        runner.filter_chunk(request.clone(), HttpContent::last("tail"));
        assert_eq!(fixture.capture.messages().len(), 1);
    }

    #[test]
    fn test_proxy_name_without_factory_uses_registry() {
        let fixture = Fixture::new();
        let runner = fixture.runner();

        let request = fixture.request_for(PROXY_ENDPOINT_FILTER_NAME);
        runner.filter(request.clone());

        let endpoint = EndpointRunner::endpoint(&request).expect("resolved");
        assert!(!endpoint.is_proxy());
        assert_eq!(
            endpoint.name(),
            format!("MissingEndpoint:{PROXY_ENDPOINT_FILTER_NAME}")
        );
    }
}
