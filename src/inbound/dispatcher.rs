//! `InboundDispatcher`: the HTTP server handler adapter (spec §4.7).

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use tracing::warn;

use crate::config::InboundConfig;
use crate::context::Context;
use crate::error::ErrorStatus;
use crate::header::{
    decode_application_headers, CONTEXT_TTL_MS, RPC_APPLICATION_ERROR_CODE,
    RPC_APPLICATION_ERROR_DETAILS, RPC_APPLICATION_ERROR_NAME, RPC_BOTH_RESPONSE_ERROR,
    RPC_CALLER, RPC_CALLER_PROCEDURE, RPC_ENCODING, RPC_ERROR_CODE, RPC_ERROR_MESSAGE,
    RPC_ERROR_NAME, RPC_PROCEDURE, RPC_ROUTING_DELEGATE, RPC_ROUTING_KEY, RPC_SERVICE,
    RPC_SHARD_KEY, RPC_STATUS, RPC_ACCEPTS_BOTH_RESPONSE_ERROR,
};
use crate::inbound::interceptor::{Handler, HttpResponse};
use crate::inbound::router::{HandlerSpec, ProcedureRouter};
use crate::request::Request;
use crate::response::ResponseSink;
use crate::ttl::{parse_ttl, CallKind};

/// The HTTP server handler adapter (spec §4.7). Generic over the router so
/// the dispatcher never has to pick one policy for everyone, mirroring the
/// outbound side's generic [`crate::outbound::PeerChooser`].
pub struct InboundDispatcher<R: ProcedureRouter> {
    config: InboundConfig,
    router: R,
}

impl<R: ProcedureRouter> InboundDispatcher<R> {
    #[must_use]
    pub fn new(config: InboundConfig, router: R) -> Self {
        Self { config, router }
    }

    /// `Serve(httpReq, httpResp)` (spec §4.7 steps 1–9).
    pub async fn serve(&self, req: http::Request<Incoming>) -> HttpResponse {
        if req.method() != Method::POST {
            return empty_response(StatusCode::NOT_FOUND);
        }

        let (parts, body) = req.into_parts();
        let service = header_str(&parts.headers, RPC_SERVICE).unwrap_or_default();
        let procedure = header_str(&parts.headers, RPC_PROCEDURE).unwrap_or_default();
        let caller = header_str(&parts.headers, RPC_CALLER).unwrap_or_default();
        let encoding = header_str(&parts.headers, RPC_ENCODING).unwrap_or_default();

        // Parsed leniently (`Oneway`) here: whether a malformed or absent TTL
        // is actually fatal depends on what the router hands back, so the
        // decision is deferred to the `HandlerSpec::Unary` arm below (spec
        // §4.7 step 4: "only unary requires a deadline").
        let ttl_raw = header_str(&parts.headers, CONTEXT_TTL_MS);
        let base = Context::background();
        let (ctx, _cancel_guard, ttl_result) =
            parse_ttl(&base, CallKind::Oneway, ttl_raw.as_deref(), &service, &procedure);

        let body_bytes = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(err) => {
                warn!(error = %err, "failed to read inbound request body");
                return self.write_error(
                    &service,
                    ErrorStatus::internal(err.to_string()),
                    false,
                    Bytes::new(),
                );
            }
        };

        let mut headers = decode_application_headers(&parts.headers);
        for grab in &self.config.grab_headers {
            if let Some(value) = header_str(&parts.headers, grab) {
                headers.insert(grab.clone(), value);
            }
        }

        let mut request = Request::new(caller, service.clone(), procedure.clone(), encoding, body_bytes)
            .with_headers(headers);
        if let Some(v) = header_str(&parts.headers, RPC_CALLER_PROCEDURE) {
            request = request.with_caller_procedure(v);
        }
        if let Some(v) = header_str(&parts.headers, RPC_SHARD_KEY) {
            request = request.with_shard_key(v);
        }
        if let Some(v) = header_str(&parts.headers, RPC_ROUTING_KEY) {
            request = request.with_routing_key(v);
        }
        if let Some(v) = header_str(&parts.headers, RPC_ROUTING_DELEGATE) {
            request = request.with_routing_delegate(v);
        }

        let missing = request.missing_fields();
        if !missing.is_empty() {
            let message = format!("missing required field(s): {}", missing.join(", "));
            return self.write_error(
                &service,
                ErrorStatus::invalid_argument(message),
                false,
                Bytes::new(),
            );
        }

        let both_mode_requested = header_str(&parts.headers, RPC_ACCEPTS_BOTH_RESPONSE_ERROR)
            .as_deref()
            == Some("true");

        let handler_spec = self.router.choose(&ctx, &request).await;
        match handler_spec {
            HandlerSpec::Unary(handler) => {
                if let Err(status) = ttl_result {
                    // The TTL header was present but malformed; unlike oneway,
                    // unary dispatch can't silently proceed without a deadline.
                    return self.write_error(&service, status, both_mode_requested, Bytes::new());
                }
                if ctx.deadline().is_none() {
                    let (_, _, result) =
                        parse_ttl(&base, CallKind::Unary, None, &service, &procedure);
                    let status = result.expect_err("unary dispatch requires a deadline");
                    return self.write_error(&service, status, both_mode_requested, Bytes::new());
                }

                let mut sink = ResponseSink::new();
                match handler.handle_box(&ctx, &request, &mut sink).await {
                    Ok(()) => self.write_success(&service, &request.encoding, sink),
                    Err(status) => {
                        // Both-response-error mode keeps the handler's partial
                        // body (spec §4.7 step 9); otherwise `ResetBuffer`
                        // discards it before the plain-text error is written
                        // (spec §4.8).
                        if !both_mode_requested {
                            sink.reset_buffer();
                        }
                        let body = sink.close().body;
                        self.write_error(&service, status, both_mode_requested, body)
                    }
                }
            }
            HandlerSpec::Oneway(handler) => {
                let background_ctx = Context::background();
                tokio::spawn(async move {
                    handler.handle_box(background_ctx, request).await;
                });
                self.write_success(&service, "raw", ResponseSink::new())
            }
            HandlerSpec::Unimplemented => self.write_error(
                &service,
                ErrorStatus::unimplemented(format!(
                    "procedure \"{procedure}\" of service \"{service}\" is not implemented"
                )),
                both_mode_requested,
                Bytes::new(),
            ),
            HandlerSpec::NotFound => self.write_error(
                &service,
                ErrorStatus::not_found(format!(
                    "no route for procedure \"{procedure}\" of service \"{service}\""
                )),
                both_mode_requested,
                Bytes::new(),
            ),
        }
    }

    /// Spec §4.7 step 8.
    fn write_success(&self, service: &str, encoding: &str, sink: ResponseSink) -> HttpResponse {
        let response = sink.close();
        let mut builder = http::Response::builder().status(StatusCode::OK);
        {
            let headers = builder.headers_mut().expect("fresh builder has headers");
            headers.insert(RPC_SERVICE, header_value(service));

            if response.application_error {
                // The handler returned `Ok(())` but flagged an application-level
                // error via the sink rather than a transport-level `ErrorStatus`.
                headers.insert(RPC_STATUS, HeaderValue::from_static("error"));
                if let Some(meta) = &response.application_error_meta {
                    if let Some(name) = &meta.name {
                        headers.insert(RPC_APPLICATION_ERROR_NAME, header_value(name));
                    }
                    if let Some(code) = &meta.code {
                        headers.insert(RPC_APPLICATION_ERROR_CODE, header_value(code));
                    }
                    if let Some(details) = &meta.details {
                        headers.insert(RPC_APPLICATION_ERROR_DETAILS, header_value(details));
                    }
                }
            } else {
                headers.insert(RPC_STATUS, HeaderValue::from_static("success"));
                if let Some(content_type) = content_type_for(encoding) {
                    headers.insert(http::header::CONTENT_TYPE, HeaderValue::from_static(content_type));
                }
            }

            for (key, value) in response.headers.iter() {
                if let (Ok(name), Ok(val)) = (
                    HeaderName::from_bytes(format!("rpc-header-{key}").as_bytes()),
                    HeaderValue::from_str(value),
                ) {
                    headers.insert(name, val);
                }
            }
        }
        builder
            .body(Full::new(response.body))
            .unwrap_or_else(|_| empty_response(StatusCode::INTERNAL_SERVER_ERROR))
    }

    /// Spec §4.7 step 9. `body` is the handler's partial output, used only
    /// in both-response-error mode; the plain-text path writes `status`'s
    /// message instead, regardless of what's passed here.
    fn write_error(
        &self,
        service: &str,
        status: ErrorStatus,
        both_mode: bool,
        body: Bytes,
    ) -> HttpResponse {
        let http_status = status.code().to_status();
        let mut builder = http::Response::builder().status(http_status);
        {
            let headers = builder.headers_mut().expect("fresh builder has headers");
            headers.insert(RPC_SERVICE, header_value(service));
            headers.insert(RPC_STATUS, HeaderValue::from_static("error"));
            headers.insert(RPC_ERROR_CODE, header_value(status.code().as_str()));
            if let Some(name) = status.name() {
                headers.insert(RPC_ERROR_NAME, header_value(name));
            }
        }

        let supports_both = both_mode && self.config.both_response_error;
        if supports_both {
            let headers = builder.headers_mut().expect("fresh builder has headers");
            headers.insert(RPC_BOTH_RESPONSE_ERROR, HeaderValue::from_static("true"));
            headers.insert(RPC_ERROR_MESSAGE, header_value(status.message()));
            if let Some(details) = status.details() {
                headers.insert(
                    RPC_APPLICATION_ERROR_DETAILS,
                    header_value(&String::from_utf8_lossy(details)),
                );
            }
            builder
                .body(Full::new(body))
                .unwrap_or_else(|_| empty_response(StatusCode::INTERNAL_SERVER_ERROR))
        } else {
            let headers = builder.headers_mut().expect("fresh builder has headers");
            headers.insert(
                http::header::CONTENT_TYPE,
                HeaderValue::from_static("text/plain; charset=utf8"),
            );
            builder
                .body(Full::new(Bytes::from(status.message().to_owned())))
                .unwrap_or_else(|_| empty_response(StatusCode::INTERNAL_SERVER_ERROR))
        }
    }
}

fn content_type_for(encoding: &str) -> Option<&'static str> {
    match encoding {
        "json" => Some("application/json"),
        "raw" => Some("application/octet-stream"),
        "thrift" => Some("application/vnd.apache.thrift.binary"),
        "proto" => Some("application/x-protobuf"),
        _ => None,
    }
}

fn header_value(s: &str) -> HeaderValue {
    HeaderValue::from_str(s).unwrap_or_else(|_| HeaderValue::from_static(""))
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers.get(name)?.to_str().ok().map(str::to_owned)
}

fn empty_response(status: StatusCode) -> HttpResponse {
    http::Response::builder()
        .status(status)
        .body(Full::new(Bytes::new()))
        .expect("status-only response is always valid")
}

impl<R: ProcedureRouter> Handler<Incoming> for InboundDispatcher<R> {
    fn serve(
        &self,
        req: http::Request<Incoming>,
    ) -> impl std::future::Future<Output = HttpResponse> + Send + '_ {
        InboundDispatcher::serve(self, req)
    }
}

/// Lets a dispatcher sit behind `tower::ServiceBuilder` middleware (timeouts,
/// concurrency limits, load shedding) before being handed to
/// `hyper_util`'s connection builder via `TowerToHyperService`.
impl<R: ProcedureRouter> tower::Service<http::Request<Incoming>> for std::sync::Arc<InboundDispatcher<R>> {
    type Response = HttpResponse;
    type Error = std::convert::Infallible;
    type Future = std::pin::Pin<Box<dyn std::future::Future<Output = Result<HttpResponse, Self::Error>> + Send>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<Incoming>) -> Self::Future {
        let this = self.clone();
        Box::pin(async move { Ok(InboundDispatcher::serve(&this, req).await) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inbound::router::{DynUnaryHandler, UnaryHandler};
    use std::sync::Arc;

    struct Echo;
    impl UnaryHandler for Echo {
        async fn handle(
            &self,
            _ctx: &Context,
            req: &Request,
            sink: &mut ResponseSink,
        ) -> Result<(), ErrorStatus> {
            sink.set_header("foo", "bar");
            sink.write(&req.body[..]);
            Ok(())
        }
    }

    struct AlwaysNotFound;
    impl UnaryHandler for AlwaysNotFound {
        async fn handle(
            &self,
            _ctx: &Context,
            _req: &Request,
            sink: &mut ResponseSink,
        ) -> Result<(), ErrorStatus> {
            sink.write(b"partial");
            Err(ErrorStatus::not_found("foo"))
        }
    }

    struct SingleProcedureRouter {
        handler: Arc<dyn DynUnaryHandler>,
    }

    impl ProcedureRouter for SingleProcedureRouter {
        async fn choose(&self, _ctx: &Context, _req: &Request) -> HandlerSpec {
            HandlerSpec::Unary(self.handler.clone())
        }

        fn procedures(&self) -> Vec<crate::inbound::router::Procedure> {
            vec![]
        }
    }

    #[test]
    fn content_type_mapping_matches_spec() {
        assert_eq!(content_type_for("json"), Some("application/json"));
        assert_eq!(content_type_for("raw"), Some("application/octet-stream"));
        assert_eq!(content_type_for("bogus"), None);
    }

    #[test]
    fn write_error_body_mode_uses_plain_text() {
        let dispatcher = InboundDispatcher::new(
            InboundConfig::new("127.0.0.1:0"),
            SingleProcedureRouter { handler: Arc::new(Echo) },
        );
        let resp = dispatcher.write_error("S", ErrorStatus::not_found("foo"), false, Bytes::new());
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            resp.headers().get(crate::header::RPC_ERROR_CODE).unwrap(),
            "not-found"
        );
    }

    #[tokio::test]
    async fn write_error_both_mode_sets_negotiation_header() {
        let mut config = InboundConfig::new("127.0.0.1:0");
        config.both_response_error = true;
        let dispatcher = InboundDispatcher::new(
            config,
            SingleProcedureRouter { handler: Arc::new(AlwaysNotFound) },
        );
        let resp = dispatcher.write_error(
            "S",
            ErrorStatus::not_found("foo"),
            true,
            Bytes::from_static(b"partial"),
        );
        assert_eq!(
            resp.headers().get(RPC_BOTH_RESPONSE_ERROR).unwrap(),
            "true"
        );
        assert_eq!(
            resp.headers().get(crate::header::RPC_ERROR_MESSAGE).unwrap(),
            "foo"
        );
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"partial");
    }

    #[tokio::test]
    async fn tower_service_impl_is_ready_immediately() {
        use tower::Service;

        let dispatcher = Arc::new(InboundDispatcher::new(
            InboundConfig::new("127.0.0.1:0"),
            SingleProcedureRouter { handler: Arc::new(Echo) },
        ));
        let mut svc = dispatcher.clone();
        assert!(std::future::poll_fn(|cx| svc.poll_ready(cx)).await.is_ok());
    }

    #[test]
    fn write_success_mirrors_service_and_content_type() {
        let dispatcher = InboundDispatcher::new(
            InboundConfig::new("127.0.0.1:0"),
            SingleProcedureRouter { handler: Arc::new(Echo) },
        );
        let mut sink = ResponseSink::new();
        sink.write(b"hi");
        let resp = dispatcher.write_success("S", "json", sink);
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers().get(RPC_SERVICE).unwrap(), "S");
        assert_eq!(
            resp.headers().get(http::header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
    }
}
