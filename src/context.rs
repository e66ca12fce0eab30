//! A minimal deadline + cancellation context threaded through outbound calls
//! and inbound handler invocations.
//!
//! Rust has no built-in analogue of Go's `context.Context`; this is a thin,
//! cloneable handle around a deadline and a cooperative cancellation flag,
//! sized for what the outbound pipeline (§4.6) and inbound dispatcher (§4.7)
//! actually need: "does this call still have time left" and "has the caller
//! given up".

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Debug, Default)]
struct Cancel {
    flag: AtomicBool,
    notify: Notify,
}

/// A deadline and cancellation handle passed alongside a request.
#[derive(Debug, Clone)]
pub struct Context {
    deadline: Option<Instant>,
    cancel: Arc<Cancel>,
}

impl Context {
    /// A context with no deadline and no cancellation yet observed.
    #[must_use]
    pub fn background() -> Self {
        Self {
            deadline: None,
            cancel: Arc::new(Cancel::default()),
        }
    }

    /// Derive a child context with `deadline` layered on top of `self`'s
    /// (the tighter of the two wins, matching Go context semantics).
    #[must_use]
    pub fn with_deadline(&self, deadline: Instant) -> (Self, CancelGuard) {
        let tighter = match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        };
        let cancel = Arc::new(Cancel::default());
        let ctx = Self {
            deadline: Some(tighter),
            cancel: cancel.clone(),
        };
        (ctx, CancelGuard { cancel })
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time remaining until the deadline, or `None` if there is none.
    /// A past deadline yields `Duration::ZERO`.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline.map(|d| d.saturating_duration_since(Instant::now()))
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| d <= Instant::now())
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.flag.load(Ordering::Acquire)
    }

    /// Resolve once the context is cancelled (does not resolve on deadline
    /// expiry by itself — callers race this against `tokio::time::sleep_until`).
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        self.cancel.notify.notified().await;
    }
}

/// The handle returned alongside a derived [`Context`]; cancels the context
/// when invoked. Always callable, including on error paths (spec §4.3).
pub struct CancelGuard {
    cancel: Arc<Cancel>,
}

impl CancelGuard {
    pub fn cancel(&self) {
        if !self.cancel.flag.swap(true, Ordering::AcqRel) {
            self.cancel.notify.notify_waiters();
        }
    }

    /// A no-op guard, for code paths that fail before a real context exists
    /// but still need to return a callable cancel function.
    #[must_use]
    pub fn noop() -> Self {
        Self {
            cancel: Arc::new(Cancel::default()),
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deadline_tightens_on_child() {
        let parent = Context::background();
        let far = Instant::now() + Duration::from_secs(10);
        let (child, _guard) = parent.with_deadline(far);
        assert_eq!(child.deadline(), Some(far));

        let near = Instant::now() + Duration::from_millis(1);
        let (grandchild, _guard2) = child.with_deadline(near);
        assert_eq!(grandchild.deadline(), Some(near));
    }

    #[tokio::test]
    async fn cancel_guard_is_always_callable() {
        let guard = CancelGuard::noop();
        guard.cancel();
        guard.cancel();
    }

    #[tokio::test]
    async fn cancelled_resolves_after_cancel() {
        let ctx = Context::background();
        let (child, guard) = ctx.with_deadline(Instant::now() + Duration::from_secs(60));
        guard.cancel();
        child.cancelled().await;
        assert!(child.is_cancelled());
    }
}
