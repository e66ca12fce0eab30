//! `PeerEntry`: per-address liveness state and the probe loop that keeps it
//! honest (spec §4.4).

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::time::{Duration, Instant};
use tracing::{debug, trace, warn};

use crate::backoff::backoff_duration;
use crate::config::ConnBackoff;
use crate::peer::address::PeerAddress;
use crate::peer::signal::{ChangeSignal, OneShot};

/// A peer's current reachability, as observed by the probe loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerStatus {
    Available,
    Connecting,
    Unavailable,
}

impl PeerStatus {
    fn to_u8(self) -> u8 {
        match self {
            Self::Available => 0,
            Self::Connecting => 1,
            Self::Unavailable => 2,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Available,
            2 => Self::Unavailable,
            _ => Self::Connecting,
        }
    }
}

#[derive(Debug, Default)]
struct AtomicStatus(AtomicU8);

impl AtomicStatus {
    fn new(initial: PeerStatus) -> Self {
        Self(AtomicU8::new(initial.to_u8()))
    }

    fn load(&self) -> PeerStatus {
        PeerStatus::from_u8(self.0.load(Ordering::Acquire))
    }

    fn store(&self, status: PeerStatus) {
        self.0.store(status.to_u8(), Ordering::Release);
    }
}

/// An opaque handle identifying a chooser's registration against a peer, for
/// reference counting (spec glossary: "Subscriber").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl SubscriberId {
    #[must_use]
    pub fn new() -> Self {
        static NEXT: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

/// Parameters the probe loop needs, independent of any particular pool
/// instance (so `PeerEntry` can be unit-tested without one).
#[derive(Clone)]
pub struct ProbeConfig {
    pub conn_timeout: Duration,
    pub innocence_window: Duration,
    pub backoff: ConnBackoff,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            conn_timeout: Duration::from_millis(500),
            innocence_window: Duration::from_secs(5),
            backoff: ConnBackoff::default(),
        }
    }
}

/// Per-peer state: identity, status, subscriber set, and the signals the
/// probe loop and the pool coordinate through.
pub struct PeerEntry {
    address: PeerAddress,
    status: AtomicStatus,
    subscribers: Mutex<HashSet<SubscriberId>>,
    change_signal: ChangeSignal,
    released: OneShot,
    epoch: Instant,
    innocent_until_nanos: AtomicU64,
    config: ProbeConfig,
}

impl PeerEntry {
    #[must_use]
    pub fn new(address: PeerAddress, config: ProbeConfig) -> Arc<Self> {
        Arc::new(Self {
            address,
            status: AtomicStatus::new(PeerStatus::Connecting),
            subscribers: Mutex::new(HashSet::new()),
            change_signal: ChangeSignal::new(),
            released: OneShot::new(),
            epoch: Instant::now(),
            innocent_until_nanos: AtomicU64::new(0),
            config,
        })
    }

    #[must_use]
    pub fn address(&self) -> &PeerAddress {
        &self.address
    }

    #[must_use]
    pub fn status(&self) -> PeerStatus {
        self.status.load()
    }

    /// Idempotent: adding a subscriber already present is a no-op.
    pub fn subscribe(&self, sub: SubscriberId) {
        self.subscribers.lock().insert(sub);
    }

    /// Idempotent: removing an absent subscriber is a no-op and reports it
    /// via the `bool` return (`false` if `sub` wasn't registered).
    pub fn unsubscribe(&self, sub: SubscriberId) -> bool {
        self.subscribers.lock().remove(&sub)
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Forces `Connecting` and raises the change signal (spec §4.4).
    pub fn on_disconnected(&self) {
        debug!(address = %self.address, "peer disconnected, forcing reconnect probe");
        self.status.store(PeerStatus::Connecting);
        self.change_signal.raise();
    }

    /// Rate-limited liveness suspicion: does **not** demote the peer, only
    /// kicks the probe loop, and only if the innocence window has elapsed.
    pub fn on_suspect(&self) {
        let now_nanos = self.nanos_since_epoch(Instant::now());
        let current_until = self.innocent_until_nanos.load(Ordering::Acquire);
        if now_nanos < current_until {
            trace!(address = %self.address, "suspicion within innocence window, ignoring");
            return;
        }

        let jitter_span = self.config.innocence_window.as_nanos().min(u128::from(u64::MAX)) as u64;
        let extension = self.config.backoff.jitter.jitter(jitter_span.max(1));
        let new_until = now_nanos.saturating_add(extension);
        // Plain store, not compare-and-swap: concurrent racing suspicions
        // settle on one of two similar values, which is harmless (spec §9).
        self.innocent_until_nanos.store(new_until, Ordering::Release);
        warn!(address = %self.address, "peer suspected, extending innocence window");
        self.change_signal.raise();
    }

    #[must_use]
    pub fn is_innocent(&self) -> bool {
        self.nanos_since_epoch(Instant::now()) < self.innocent_until_nanos.load(Ordering::Acquire)
    }

    fn nanos_since_epoch(&self, at: Instant) -> u64 {
        at.saturating_duration_since(self.epoch).as_nanos().min(u128::from(u64::MAX)) as u64
    }

    /// Unblocks the probe loop permanently.
    pub fn release(&self) {
        self.released.fire();
    }

    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released.is_fired()
    }

    /// Dial the peer with `conn_timeout`, closing the connection immediately
    /// on success. A fresh dial every probe, never a held-open connection
    /// (spec §4.4: servers may misbehave on idle sockets).
    async fn probe(&self) -> bool {
        let outcome = tokio::time::timeout(
            self.config.conn_timeout,
            TcpStream::connect(self.address.as_str()),
        )
        .await;
        matches!(outcome, Ok(Ok(_stream)))
    }

    /// The probe loop (spec §4.4's pseudocode), run until released or the
    /// pool is stopping, whichever comes first.
    pub async fn maintain_conn(self: Arc<Self>, started: Arc<OneShot>, stopping: Arc<OneShot>) {
        started.fired().await;

        self.status.store(PeerStatus::Connecting);
        let mut attempts: u32 = 0;

        loop {
            if self.probe().await {
                self.status.store(PeerStatus::Available);
                attempts = 0;
                debug!(address = %self.address, "probe succeeded, peer available");

                tokio::select! {
                    () = self.change_signal.notified() => {}
                    () = self.released.fired() => break,
                    () = stopping.fired() => break,
                }
            } else {
                self.status.store(PeerStatus::Unavailable);
                let delay = backoff_duration(
                    attempts,
                    self.config.backoff.first,
                    self.config.backoff.max,
                    self.config.backoff.jitter.as_ref(),
                );
                trace!(address = %self.address, ?delay, attempts, "probe failed, backing off");

                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    () = self.released.fired() => break,
                    () = stopping.fired() => break,
                }

                attempts = attempts.saturating_add(1);
                self.status.store(PeerStatus::Connecting);
            }
        }

        self.status.store(PeerStatus::Unavailable);
        debug!(address = %self.address, "probe loop exiting");
    }
}

impl crate::outbound::Peer for PeerEntry {
    fn identifier(&self) -> String {
        self.address.to_string()
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    fn entry() -> Arc<PeerEntry> {
        PeerEntry::new(PeerAddress::from("127.0.0.1:1"), ProbeConfig::default())
    }

    #[test]
    fn subscribe_unsubscribe_is_idempotent() {
        let entry = entry();
        let sub = SubscriberId::new();
        entry.subscribe(sub);
        entry.subscribe(sub);
        assert_eq!(entry.subscriber_count(), 1);
        assert!(entry.unsubscribe(sub));
        assert!(!entry.unsubscribe(sub));
        assert_eq!(entry.subscriber_count(), 0);
    }

    #[test]
    fn on_disconnected_forces_connecting() {
        let entry = entry();
        entry.status.store(PeerStatus::Available);
        entry.on_disconnected();
        assert_eq!(entry.status(), PeerStatus::Connecting);
    }

    #[test]
    fn suspect_does_not_demote_available_peer() {
        let entry = entry();
        entry.status.store(PeerStatus::Available);
        entry.on_suspect();
        assert_eq!(entry.status(), PeerStatus::Available);
        assert!(entry.is_innocent());
    }

    #[test]
    fn repeated_suspect_within_window_does_not_extend_again() {
        let entry = entry();
        entry.on_suspect();
        let first = entry.innocent_until_nanos.load(Ordering::Acquire);
        entry.on_suspect();
        let second = entry.innocent_until_nanos.load(Ordering::Acquire);
        assert_eq!(first, second, "second suspicion within window must be a no-op");
    }

    #[tokio::test]
    async fn probe_against_closed_port_fails_quickly() {
        let entry = PeerEntry::new(
            PeerAddress::from("127.0.0.1:1"),
            ProbeConfig {
                conn_timeout: StdDuration::from_millis(200),
                ..ProbeConfig::default()
            },
        );
        assert!(!entry.probe().await);
    }

    #[test]
    fn released_and_fired_signals_are_independent() {
        let entry = entry();
        assert!(!entry.is_released());
        entry.release();
        assert!(entry.is_released());
    }
}
