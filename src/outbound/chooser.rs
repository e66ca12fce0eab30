//! The peer-chooser contract (spec §6 "Peer chooser contract" / §4.6 step 6).
//!
//! Choosing *which* peer to send to is a policy decision this crate
//! deliberately does not make (round-robin, least-pending, etc. are out of
//! scope per spec §1); [`PeerChooser`] is the seam a consuming application
//! implements, and the outbound pipeline only knows how to ask it for a
//! peer and cast the answer back to a concrete [`crate::peer::PeerEntry`].

use std::any::Any;
use std::future::Future;
use std::sync::Arc;

use crate::context::Context;
use crate::error::{ErrorStatus, TransportError};
use crate::request::Request;

/// A peer handle returned by a [`PeerChooser`]. [`crate::peer::PeerEntry`]
/// implements this; the pipeline downcasts back to it via [`Peer::as_any`]
/// and fails with [`TransportError::InvalidPeerConversion`] if the chooser
/// handed back something this transport didn't create.
pub trait Peer: Send + Sync + 'static {
    fn identifier(&self) -> String;
    fn as_any(&self) -> &dyn Any;
}

/// Invoked exactly once per `choose()`, after the response (or failure) to
/// that call has been observed, with the RPC-level error if any.
pub type OnFinish = Box<dyn FnOnce(Option<&ErrorStatus>) + Send>;

/// A pluggable peer-selection policy, external to this crate. Produced and
/// owned by the caller; the pool does not coordinate policy (spec glossary:
/// "Chooser").
pub trait PeerChooser: Send + Sync + 'static {
    fn start(&self);
    fn stop(&self);

    /// Select a peer for `req`. The returned `OnFinish` must be invoked by
    /// the pipeline exactly once, regardless of outcome.
    fn choose(
        &self,
        ctx: &Context,
        req: &Request,
    ) -> impl Future<Output = Result<(Arc<dyn Peer>, OnFinish), TransportError>> + Send + '_;
}
