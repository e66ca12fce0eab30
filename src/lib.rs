//! HTTP/1.1 and HTTP/2 RPC transport core: a peer pool with liveness
//! probing, a unary/oneway outbound pipeline, and an inbound request
//! dispatcher, sharing one `Rpc-*` header protocol and error taxonomy.
//!
//! This crate does not define a wire encoding, a peer-selection policy, or
//! a procedure router — those are the [`outbound::PeerChooser`] and
//! [`inbound::ProcedureRouter`] seams a consuming application implements.

pub mod backoff;
pub mod config;
pub mod context;
pub mod error;
pub mod header;
pub mod inbound;
pub mod outbound;
pub mod peer;
pub mod request;
pub mod response;
pub mod ttl;

pub use config::{InboundConfig, OutboundConfig, TransportConfig};
pub use context::Context;
pub use error::{Code, ErrorStatus, TransportError};
pub use peer::{PeerAddress, PeerPool};
pub use request::Request;
pub use response::{Response, ResponseSink};
