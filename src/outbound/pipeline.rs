//! `OutboundPipeline`: builds HTTP requests, invokes the peer chooser,
//! sends via the shared client, and interprets the response (spec §4.6).

use std::fmt;
use std::time::{Instant, SystemTime};

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use http_body_util::{BodyExt, Full};
use tracing::{debug, warn};

use crate::config::OutboundConfig;
use crate::context::Context;
use crate::error::{Code, ErrorStatus, TransportError};
use crate::header::{
    encode_application_headers, decode_application_headers, ReservedKeyPolicy,
    CONTEXT_TTL_MS, RPC_ACCEPTS_BOTH_RESPONSE_ERROR, RPC_APPLICATION_ERROR_CODE,
    RPC_APPLICATION_ERROR_DETAILS, RPC_APPLICATION_ERROR_NAME, RPC_BOTH_RESPONSE_ERROR,
    RPC_CALLER, RPC_CALLER_PROCEDURE, RPC_ENCODING, RPC_ERROR_CODE, RPC_ERROR_MESSAGE,
    RPC_ERROR_NAME, RPC_PROCEDURE, RPC_ROUTING_DELEGATE, RPC_ROUTING_KEY, RPC_SERVICE,
    RPC_SHARD_KEY, RPC_STATUS,
};
use crate::outbound::chooser::PeerChooser;
use crate::peer::{PeerEntry, PeerPool};
use crate::request::Request;
use crate::response::{ApplicationErrorMeta, Response};

/// The result of a failed call: an RPC-level [`ErrorStatus`], plus — in
/// both-response-error mode — the response the server still sent alongside
/// it (spec §4.6 step 8: "the body is preserved").
#[derive(Debug)]
pub struct CallError {
    pub status: ErrorStatus,
    pub response: Option<Response>,
}

impl CallError {
    fn new(status: ErrorStatus) -> Self {
        Self { status, response: None }
    }

    fn with_response(status: ErrorStatus, response: Response) -> Self {
        Self { status, response: Some(response) }
    }
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.status, f)
    }
}

impl std::error::Error for CallError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.status)
    }
}

/// Builds requests for one logical outbound (one URL template, one chooser)
/// against the pool's shared HTTP client (spec §4.6).
pub struct OutboundPipeline<C: PeerChooser> {
    config: OutboundConfig,
    pool: std::sync::Arc<PeerPool>,
    chooser: C,
    header_policy: ReservedKeyPolicy,
}

enum SendOutcome {
    Completed(Result<hyper::Response<hyper::body::Incoming>, hyper_util::client::legacy::Error>),
    TimedOut,
    Cancelled,
}

impl<C: PeerChooser> OutboundPipeline<C> {
    #[must_use]
    pub fn new(config: OutboundConfig, pool: std::sync::Arc<PeerPool>, chooser: C) -> Self {
        Self {
            config,
            pool,
            chooser,
            header_policy: ReservedKeyPolicy::Reject,
        }
    }

    /// Opt into silently passing through reserved-prefix application headers
    /// instead of rejecting them (spec §9 "open question — strict header
    /// policy": exposed as a flag, strict is the default).
    #[must_use]
    pub fn with_header_policy(mut self, policy: ReservedKeyPolicy) -> Self {
        self.header_policy = policy;
        self
    }

    async fn wait_until_running(&self, ctx: &Context) -> bool {
        if self.pool.is_running() {
            return true;
        }
        match ctx.remaining() {
            Some(remaining) => {
                tokio::select! {
                    running = self.pool.wait_until_started() => running,
                    () = tokio::time::sleep(remaining) => false,
                    () = ctx.cancelled() => false,
                }
            }
            None => self.pool.wait_until_started().await,
        }
    }

    /// `Call(ctx, req)` (spec §4.6 steps 1–10).
    pub async fn call(&self, ctx: &Context, req: &Request) -> Result<Response, CallError> {
        if ctx.deadline().is_none() {
            return Err(CallError::new(ErrorStatus::invalid_argument(
                "a unary call requires a context deadline",
            )));
        }

        if !self.wait_until_running(ctx).await {
            return Err(CallError::new(ErrorStatus::failed_precondition(
                "outbound pool is not running",
            )));
        }

        let (peer_handle, on_finish) = self
            .chooser
            .choose(ctx, req)
            .await
            .map_err(|err| CallError::new(ErrorStatus::internal(err.to_string())))?;

        let Some(entry) = peer_handle.as_any().downcast_ref::<PeerEntry>() else {
            let status = ErrorStatus::internal(
                "chooser returned a peer not owned by this transport",
            )
            .with_source(TransportError::InvalidPeerConversion);
            on_finish(Some(&status));
            return Err(CallError::new(status));
        };

        let outcome = self.perform(ctx, req, entry).await;
        on_finish(outcome.as_ref().err().map(|e| &e.status));
        outcome
    }

    /// `CallOneway(ctx, req)` (spec §4.6): requires a deadline, discards the
    /// response body, returns an opaque send-timestamp acknowledgement.
    pub async fn call_oneway(
        &self,
        ctx: &Context,
        req: &Request,
    ) -> Result<SystemTime, CallError> {
        if ctx.deadline().is_none() {
            return Err(CallError::new(ErrorStatus::invalid_argument(
                "a oneway call requires a context deadline",
            )));
        }
        let sent_at = SystemTime::now();
        self.call(ctx, req).await?;
        Ok(sent_at)
    }

    /// Adapts the pipeline as a standard HTTP round-tripper (spec §4.6):
    /// synthesizes a [`Request`] from `Rpc-*` headers on an already-built
    /// HTTP request, then delegates to [`Self::call`]. Rejects requests
    /// without a deadline, matching `Call`'s own requirement.
    pub async fn round_trip(
        &self,
        ctx: &Context,
        hreq: http::Request<Full<Bytes>>,
    ) -> Result<Response, CallError> {
        if ctx.deadline().is_none() {
            return Err(CallError::new(ErrorStatus::invalid_argument(
                "round-trip requires a context deadline",
            )));
        }
        let (parts, body) = hreq.into_parts();
        let caller = header_str(&parts.headers, RPC_CALLER).unwrap_or_default();
        let service = header_str(&parts.headers, RPC_SERVICE).unwrap_or_default();
        let procedure = header_str(&parts.headers, RPC_PROCEDURE).unwrap_or_default();
        let encoding = header_str(&parts.headers, RPC_ENCODING).unwrap_or_default();
        let body = body
            .collect()
            .await
            .map_err(|e| CallError::new(ErrorStatus::internal(e.to_string())))?
            .to_bytes();

        let mut req = Request::new(caller, service, procedure, encoding, body)
            .with_headers(decode_application_headers(&parts.headers));
        if let Some(v) = header_str(&parts.headers, RPC_CALLER_PROCEDURE) {
            req = req.with_caller_procedure(v);
        }
        if let Some(v) = header_str(&parts.headers, RPC_SHARD_KEY) {
            req = req.with_shard_key(v);
        }
        if let Some(v) = header_str(&parts.headers, RPC_ROUTING_KEY) {
            req = req.with_routing_key(v);
        }
        if let Some(v) = header_str(&parts.headers, RPC_ROUTING_DELEGATE) {
            req = req.with_routing_delegate(v);
        }

        self.call(ctx, &req).await
    }

    async fn perform(
        &self,
        ctx: &Context,
        req: &Request,
        entry: &PeerEntry,
    ) -> Result<Response, CallError> {
        let http_req = self
            .build_request(ctx, req, entry)
            .map_err(CallError::new)?;

        let start = Instant::now();
        let send_outcome = match ctx.remaining() {
            Some(remaining) => tokio::select! {
                biased;
                () = ctx.cancelled() => SendOutcome::Cancelled,
                () = tokio::time::sleep(remaining) => SendOutcome::TimedOut,
                res = self.pool.http_client().request(http_req) => SendOutcome::Completed(res),
            },
            None => SendOutcome::Completed(self.pool.http_client().request(http_req).await),
        };

        let response = match send_outcome {
            SendOutcome::Cancelled => {
                return Err(CallError::new(ErrorStatus::cancelled(format!(
                    "call cancelled for procedure \"{}\" of service \"{}\"",
                    req.procedure, req.service
                ))));
            }
            SendOutcome::TimedOut => {
                entry.on_suspect();
                let elapsed = start.elapsed();
                return Err(CallError::new(ErrorStatus::deadline_exceeded(format!(
                    "client timeout for procedure \"{}\" of service \"{}\" after {elapsed:?}",
                    req.procedure, req.service
                ))));
            }
            SendOutcome::Completed(Err(err)) => {
                entry.on_disconnected();
                warn!(address = %entry.address(), error = %err, "outbound send failed");
                return Err(CallError::new(ErrorStatus::unknown(err.to_string())));
            }
            SendOutcome::Completed(Ok(resp)) => resp,
        };

        self.interpret_response(req, response).await
    }

    fn build_request(
        &self,
        ctx: &Context,
        req: &Request,
        entry: &PeerEntry,
    ) -> Result<http::Request<Full<Bytes>>, ErrorStatus> {
        let mut headers = HeaderMap::new();
        encode_application_headers(&req.headers, self.header_policy, &mut headers)
            .map_err(|e| ErrorStatus::internal(e.to_string()))?;

        insert(&mut headers, RPC_CALLER, &req.caller)?;
        insert(&mut headers, RPC_SERVICE, &req.service)?;
        insert(&mut headers, RPC_PROCEDURE, &req.procedure)?;
        insert(&mut headers, RPC_ENCODING, &req.encoding)?;
        if let Some(v) = &req.caller_procedure {
            insert(&mut headers, RPC_CALLER_PROCEDURE, v)?;
        }
        if let Some(v) = &req.shard_key {
            insert(&mut headers, RPC_SHARD_KEY, v)?;
        }
        if let Some(v) = &req.routing_key {
            insert(&mut headers, RPC_ROUTING_KEY, v)?;
        }
        if let Some(v) = &req.routing_delegate {
            insert(&mut headers, RPC_ROUTING_DELEGATE, v)?;
        }
        if let Some(remaining) = ctx.remaining() {
            insert(
                &mut headers,
                CONTEXT_TTL_MS,
                &remaining.as_millis().max(1).to_string(),
            )?;
        }
        for (key, value) in &self.config.add_headers {
            insert(&mut headers, key, value)?;
        }
        if self.config.both_response_error {
            insert(&mut headers, RPC_ACCEPTS_BOTH_RESPONSE_ERROR, "true")?;
        }

        let uri = format!(
            "{}://{}{}",
            self.config.url_scheme,
            entry.address(),
            self.config.url_path
        );
        let builder = http::Request::builder()
            .method(http::Method::POST)
            .uri(uri);
        let http_req = builder
            .body(Full::new(req.body.clone()))
            .map_err(|e| ErrorStatus::internal(e.to_string()))?;
        let (mut parts, body) = http_req.into_parts();
        parts.headers = headers;
        Ok(http::Request::from_parts(parts, body))
    }

    /// Spec §4.6 step 8 and 9.
    async fn interpret_response(
        &self,
        req: &Request,
        response: hyper::Response<hyper::body::Incoming>,
    ) -> Result<Response, CallError> {
        let (parts, body) = response.into_parts();

        if let Some(service) = header_str(&parts.headers, RPC_SERVICE) {
            if service != req.service {
                return Err(CallError::new(ErrorStatus::internal(format!(
                    "server identity mismatch: expected service \"{}\", got \"{service}\"",
                    req.service
                ))));
            }
        }

        let app_headers = decode_application_headers(&parts.headers);
        let is_application_error =
            header_str(&parts.headers, RPC_STATUS).as_deref() == Some("error");
        let application_error_meta = if is_application_error {
            Some(ApplicationErrorMeta {
                name: header_str(&parts.headers, RPC_APPLICATION_ERROR_NAME),
                code: header_str(&parts.headers, RPC_APPLICATION_ERROR_CODE),
                details: header_str(&parts.headers, RPC_APPLICATION_ERROR_DETAILS),
            })
        } else {
            None
        };

        let both_mode_advertised = header_str(&parts.headers, RPC_BOTH_RESPONSE_ERROR)
            .is_some_and(|v| !v.is_empty());
        let both_mode = self.config.both_response_error && both_mode_advertised;

        let body_bytes = body
            .collect()
            .await
            .map_err(|e| CallError::new(ErrorStatus::unknown(e.to_string())))?
            .to_bytes();

        let response = Response {
            headers: app_headers,
            body: body_bytes.clone(),
            application_error: is_application_error,
            application_error_meta,
        };

        if both_mode {
            if parts.status.as_u16() >= 300 {
                let status = self.error_from_response(&parts.headers, parts.status, &body_bytes, true);
                debug!(status = %parts.status, "both-response-error: error with preserved body");
                return Err(CallError::with_response(status, response));
            }
            return Ok(response);
        }

        if parts.status.is_success() {
            Ok(response)
        } else {
            let status = self.error_from_response(&parts.headers, parts.status, &body_bytes, false);
            Err(CallError::new(status))
        }
    }

    /// `errorFromResponse(bothMode)` (spec §4.6 step 9).
    fn error_from_response(
        &self,
        headers: &HeaderMap,
        status: StatusCode,
        body: &Bytes,
        both_mode: bool,
    ) -> ErrorStatus {
        let code = header_str(headers, RPC_ERROR_CODE)
            .map(|v| Code::from_str_lenient(&v))
            .unwrap_or_else(|| Code::from_status(status));

        let message = if both_mode {
            header_str(headers, RPC_ERROR_MESSAGE).unwrap_or_default()
        } else {
            String::from_utf8_lossy(body).trim_end_matches('\n').to_owned()
        };

        let mut err = ErrorStatus::new(code, message);
        if let Some(name) = header_str(headers, RPC_ERROR_NAME) {
            err = err.with_name(name);
        }
        err
    }
}

fn insert(headers: &mut HeaderMap, name: &str, value: &str) -> Result<(), ErrorStatus> {
    let name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| ErrorStatus::internal(format!("invalid header name {name:?}: {e}")))?;
    let value = HeaderValue::from_str(value)
        .map_err(|e| ErrorStatus::internal(format!("invalid header value for {name:?}: {e}")))?;
    headers.insert(name, value);
    Ok(())
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers.get(name)?.to_str().ok().map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportConfig;
    use crate::header::Headers;
    use crate::outbound::chooser::{OnFinish, Peer};
    use crate::peer::{PeerAddress, ProbeConfig};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// A chooser that always returns the one peer it was built with. Test
    /// tooling only, not a shipped policy (spec §1 non-goal).
    struct FixedChooser {
        entry: Arc<PeerEntry>,
        finishes: Arc<AtomicUsize>,
    }

    impl PeerChooser for FixedChooser {
        fn start(&self) {}
        fn stop(&self) {}

        async fn choose(
            &self,
            _ctx: &Context,
            _req: &Request,
        ) -> Result<(Arc<dyn Peer>, OnFinish), crate::error::TransportError> {
            let finishes = self.finishes.clone();
            let peer: Arc<dyn Peer> = self.entry.clone();
            Ok((
                peer,
                Box::new(move |_err| {
                    finishes.fetch_add(1, Ordering::SeqCst);
                }),
            ))
        }
    }

    async fn echo_server() -> (std::net::SocketAddr, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let n = socket.read(&mut buf).await.unwrap();
            let _request_text = String::from_utf8_lossy(&buf[..n]);
            let body = b"great success";
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nRpc-Status: success\r\nRpc-Header-Foo: bar\r\nConnection: close\r\n\r\n",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.write_all(body).await.unwrap();
            socket.shutdown().await.ok();
        });
        (addr, handle)
    }

    #[tokio::test]
    async fn happy_path_unary_call() {
        let (addr, server) = echo_server().await;
        let pool = PeerPool::new(&TransportConfig::default());
        pool.start();
        let entry = PeerEntry::new(PeerAddress::from(addr.to_string()), ProbeConfig::default());

        let finishes = Arc::new(AtomicUsize::new(0));
        let chooser = FixedChooser { entry, finishes: finishes.clone() };
        let pipeline = OutboundPipeline::new(OutboundConfig::default(), pool.clone(), chooser);

        let base = Context::background();
        let (ctx, _guard) =
            base.with_deadline(tokio::time::Instant::now() + std::time::Duration::from_secs(1));

        let mut headers = Headers::new();
        headers.insert("x-ignored", "n/a");
        let req = Request::new("C", "S", "P", "raw", Bytes::from_static(b"world"))
            .with_headers(headers);

        let resp = pipeline.call(&ctx, &req).await.expect("call succeeds");
        assert_eq!(&resp.body[..], b"great success");
        assert_eq!(resp.headers.get("foo"), Some("bar"));
        assert!(!resp.application_error);
        assert_eq!(finishes.load(Ordering::SeqCst), 1);

        pool.stop().await;
        server.abort();
    }

    #[tokio::test]
    async fn call_without_deadline_is_rejected() {
        let pool = PeerPool::new(&TransportConfig::default());
        let entry = PeerEntry::new(PeerAddress::from("127.0.0.1:1"), ProbeConfig::default());
        let chooser = FixedChooser { entry, finishes: Arc::new(AtomicUsize::new(0)) };
        let pipeline = OutboundPipeline::new(OutboundConfig::default(), pool, chooser);

        let ctx = Context::background();
        let req = Request::new("C", "S", "P", "raw", Bytes::new());
        let err = pipeline.call(&ctx, &req).await.unwrap_err();
        assert_eq!(err.status.code(), Code::InvalidArgument);
    }

    #[tokio::test]
    async fn dial_failure_suspects_peer_and_surfaces_unknown() {
        let pool = PeerPool::new(&TransportConfig::default());
        pool.start();
        // Port 1 is reserved and never accepts connections.
        let entry = PeerEntry::new(PeerAddress::from("127.0.0.1:1"), ProbeConfig::default());
        let chooser = FixedChooser { entry: entry.clone(), finishes: Arc::new(AtomicUsize::new(0)) };
        let pipeline = OutboundPipeline::new(OutboundConfig::default(), pool.clone(), chooser);

        let base = Context::background();
        let (ctx, _guard) =
            base.with_deadline(tokio::time::Instant::now() + std::time::Duration::from_secs(2));
        let req = Request::new("C", "S", "P", "raw", Bytes::new());

        let err = pipeline.call(&ctx, &req).await.unwrap_err();
        assert_eq!(err.status.code(), Code::Unknown);
        pool.stop().await;
    }
}
