//! Peer identity, per-peer liveness state, and the process-wide pool that
//! owns them (spec §4.4 / §4.5).

mod address;
mod entry;
mod pool;
mod signal;

pub use address::PeerAddress;
pub use entry::{PeerEntry, PeerStatus, ProbeConfig, SubscriberId};
pub use pool::PeerPool;
pub use signal::{ChangeSignal, OneShot};
