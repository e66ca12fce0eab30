//! Single-slot coalescing signals (spec §3 / §9: "change-signal is not a
//! queue; repeated sends coalesce"). Built on [`tokio::sync::Notify`], whose
//! `notify_one` already stores at most one pending permit — exactly the
//! "at most one pending kick at a time" contract the spec asks for.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// An edge-triggered, coalescing wakeup signal.
#[derive(Debug, Default)]
pub struct ChangeSignal {
    notify: Notify,
}

impl ChangeSignal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal. If one is already pending, this is a no-op.
    pub fn raise(&self) {
        self.notify.notify_one();
    }

    /// Wait for the signal to be raised.
    pub async fn notified(&self) {
        self.notify.notified().await;
    }
}

/// A one-shot "released" signal: fires once, stays fired, can be awaited
/// any number of times (including after it already fired).
#[derive(Debug, Default)]
pub struct OneShot {
    fired: AtomicBool,
    notify: Notify,
}

impl OneShot {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fire(&self) {
        if !self.fired.swap(true, Ordering::AcqRel) {
            self.notify.notify_waiters();
        }
    }

    #[must_use]
    pub fn is_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    pub async fn fired(&self) {
        if self.is_fired() {
            return;
        }
        self.notify.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn rapid_raises_coalesce_into_one_wakeup() {
        let signal = Arc::new(ChangeSignal::new());
        signal.raise();
        signal.raise();
        signal.raise();

        tokio::time::timeout(Duration::from_millis(50), signal.notified())
            .await
            .expect("first wait resolves");

        let result = tokio::time::timeout(Duration::from_millis(20), signal.notified()).await;
        assert!(result.is_err(), "no second wakeup should be pending");
    }

    #[tokio::test]
    async fn oneshot_fires_once_and_stays_fired() {
        let signal = OneShot::new();
        signal.fire();
        signal.fire();
        signal.fired().await;
        assert!(signal.is_fired());
    }
}
