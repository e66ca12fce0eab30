//! Interceptor chaining (spec §4.7, "Interceptor"): the dispatcher may be
//! wrapped by zero or more `Handler -> Handler` functions, applied in
//! reverse registration order so the first one registered ends up outermost
//! (an interceptor may delegate to `next` or serve its own response, e.g.
//! for a `/health` check).
//!
//! Generic over the request body type so tests can drive the chain with a
//! plain [`Full<Bytes>`] body instead of a live hyper connection; the real
//! dispatcher instantiates it with `hyper::body::Incoming`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::Full;

pub type HttpResponse = http::Response<Full<Bytes>>;

/// Anything that can serve an HTTP request, statically known at the call
/// site (the dispatcher itself implements this directly).
pub trait Handler<B>: Send + Sync + 'static
where
    B: http_body::Body<Data = Bytes> + Send + 'static,
    B::Error: std::error::Error + Send + Sync + 'static,
{
    fn serve(&self, req: http::Request<B>) -> impl Future<Output = HttpResponse> + Send + '_;
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Object-safe companion to [`Handler`], letting interceptors hold the next
/// handler in the chain as `Arc<dyn DynHandler<B>>`.
pub trait DynHandler<B>: Send + Sync + 'static
where
    B: http_body::Body<Data = Bytes> + Send + 'static,
    B::Error: std::error::Error + Send + Sync + 'static,
{
    fn serve_box<'a>(&'a self, req: http::Request<B>) -> BoxFuture<'a, HttpResponse>;
}

impl<B, T> DynHandler<B> for T
where
    T: Handler<B>,
    B: http_body::Body<Data = Bytes> + Send + 'static,
    B::Error: std::error::Error + Send + Sync + 'static,
{
    fn serve_box<'a>(&'a self, req: http::Request<B>) -> BoxFuture<'a, HttpResponse> {
        Box::pin(self.serve(req))
    }
}

/// A registered interceptor: wraps the handler that follows it in the
/// chain, producing a new handler.
pub trait Interceptor<B>: Send + Sync + 'static
where
    B: http_body::Body<Data = Bytes> + Send + 'static,
    B::Error: std::error::Error + Send + Sync + 'static,
{
    fn wrap(&self, next: Arc<dyn DynHandler<B>>) -> Arc<dyn DynHandler<B>>;
}

/// Builds the final handler from a base dispatcher and a list of
/// interceptors registered in the order the caller added them. The first
/// registered interceptor ends up outermost: it sees the request first and
/// the response last.
#[must_use]
pub fn chain<B>(
    base: Arc<dyn DynHandler<B>>,
    interceptors: &[Arc<dyn Interceptor<B>>],
) -> Arc<dyn DynHandler<B>>
where
    B: http_body::Body<Data = Bytes> + Send + 'static,
    B::Error: std::error::Error + Send + Sync + 'static,
{
    interceptors
        .iter()
        .rev()
        .fold(base, |next, interceptor| interceptor.wrap(next))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    struct Echo;
    impl Handler<Full<Bytes>> for Echo {
        async fn serve(&self, _req: http::Request<Full<Bytes>>) -> HttpResponse {
            http::Response::new(Full::new(Bytes::from_static(b"base")))
        }
    }

    struct Tagger(&'static str);
    struct TaggerHandler {
        tag: &'static str,
        next: Arc<dyn DynHandler<Full<Bytes>>>,
    }
    impl Interceptor<Full<Bytes>> for Tagger {
        fn wrap(&self, next: Arc<dyn DynHandler<Full<Bytes>>>) -> Arc<dyn DynHandler<Full<Bytes>>> {
            Arc::new(TaggerHandler { tag: self.0, next })
        }
    }
    impl Handler<Full<Bytes>> for TaggerHandler {
        async fn serve(&self, req: http::Request<Full<Bytes>>) -> HttpResponse {
            let resp = self.next.serve_box(req).await;
            let (parts, body) = resp.into_parts();
            let mut bytes = body.collect().await.unwrap().to_bytes().to_vec();
            bytes.splice(0..0, self.tag.as_bytes().iter().copied());
            http::Response::from_parts(parts, Full::new(Bytes::from(bytes)))
        }
    }

    #[tokio::test]
    async fn first_registered_interceptor_runs_outermost() {
        let base: Arc<dyn DynHandler<Full<Bytes>>> = Arc::new(Echo);
        let interceptors: Vec<Arc<dyn Interceptor<Full<Bytes>>>> =
            vec![Arc::new(Tagger("A:")), Arc::new(Tagger("B:"))];
        let handler = chain(base, &interceptors);

        let req = http::Request::new(Full::new(Bytes::new()));
        let resp = handler.serve_box(req).await;
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"A:B:base");
    }
}
