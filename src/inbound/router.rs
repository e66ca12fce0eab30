//! The inbound router contract (spec §6 "Router contract" / §4.7 step 6).
//!
//! Mirrors the split the teacher uses for its own `Service` trait
//! (`rama_core::service::svc`): a primary trait with a native `async fn`
//! for generic, statically-known callers, plus a `Dyn*` companion trait —
//! blanket-implemented for anything implementing the primary one — so the
//! router can still hold handlers as trait objects.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::Context;
use crate::error::ErrorStatus;
use crate::request::Request;
use crate::response::ResponseSink;

/// A procedure name for introspection (`Procedures()` in spec §6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Procedure {
    pub service: String,
    pub name: String,
}

/// A unary handler: writes into the [`ResponseSink`] and returns an error
/// status on failure (spec §4.7 step 7, "Unary").
pub trait UnaryHandler: Send + Sync + 'static {
    fn handle(
        &self,
        ctx: &Context,
        req: &Request,
        sink: &mut ResponseSink,
    ) -> impl Future<Output = Result<(), ErrorStatus>> + Send + '_;
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Object-safe companion to [`UnaryHandler`], for storing handlers behind
/// `Arc<dyn DynUnaryHandler>` in a router registry.
pub trait DynUnaryHandler: Send + Sync + 'static {
    fn handle_box<'a>(
        &'a self,
        ctx: &'a Context,
        req: &'a Request,
        sink: &'a mut ResponseSink,
    ) -> BoxFuture<'a, Result<(), ErrorStatus>>;
}

impl<T: UnaryHandler> DynUnaryHandler for T {
    fn handle_box<'a>(
        &'a self,
        ctx: &'a Context,
        req: &'a Request,
        sink: &'a mut ResponseSink,
    ) -> BoxFuture<'a, Result<(), ErrorStatus>> {
        Box::pin(self.handle(ctx, req, sink))
    }
}

/// A oneway handler: runs detached from the originating HTTP request, with
/// its own owned context (spec §4.7 step 7, "Oneway").
pub trait OnewayHandler: Send + Sync + 'static {
    fn handle(&self, ctx: Context, req: Request) -> impl Future<Output = ()> + Send + 'static;
}

/// Object-safe companion to [`OnewayHandler`].
pub trait DynOnewayHandler: Send + Sync + 'static {
    fn handle_box(&self, ctx: Context, req: Request) -> BoxFuture<'static, ()>;
}

impl<T: OnewayHandler> DynOnewayHandler for T {
    fn handle_box(&self, ctx: Context, req: Request) -> BoxFuture<'static, ()> {
        Box::pin(self.handle(ctx, req))
    }
}

/// What the router decided to do with a request (spec §4.7 step 6/7).
pub enum HandlerSpec {
    Unary(Arc<dyn DynUnaryHandler>),
    Oneway(Arc<dyn DynOnewayHandler>),
    /// The router matched a procedure it doesn't know how to dispatch.
    Unimplemented,
    /// No procedure matched at all.
    NotFound,
}

impl std::fmt::Debug for HandlerSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self {
            Self::Unary(_) => "Unary",
            Self::Oneway(_) => "Oneway",
            Self::Unimplemented => "Unimplemented",
            Self::NotFound => "NotFound",
        };
        f.debug_tuple("HandlerSpec").field(&tag).finish()
    }
}

/// Routes a validated request to a handler (spec §6 "Router contract",
/// external to this crate — consuming applications implement this).
pub trait ProcedureRouter: Send + Sync + 'static {
    fn choose(&self, ctx: &Context, req: &Request) -> impl Future<Output = HandlerSpec> + Send + '_;

    fn procedures(&self) -> Vec<Procedure>;
}
