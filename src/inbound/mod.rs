//! Inbound request dispatch: header parsing, validation, routing, and
//! response writing (spec §4.7).

mod dispatcher;
mod interceptor;
mod router;

pub use dispatcher::InboundDispatcher;
pub use interceptor::{chain, DynHandler, Handler, HttpResponse, Interceptor};
pub use router::{
    DynOnewayHandler, DynUnaryHandler, HandlerSpec, OnewayHandler, Procedure, ProcedureRouter,
    UnaryHandler,
};
