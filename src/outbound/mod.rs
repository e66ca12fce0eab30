//! The unary/oneway outbound call path (spec §4.6).

mod chooser;
mod pipeline;

pub use chooser::{OnFinish, Peer, PeerChooser};
pub use pipeline::{CallError, OutboundPipeline};
