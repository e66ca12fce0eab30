//! Exponential backoff with full jitter (spec §4.4 / §9), grounded on
//! `rama_core::utils::backoff`'s `Backoff` trait shape.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use rand::Rng;

/// A generic backoff session. Implementors are expected to reset any
/// internal state on `Clone`, so that each clone starts from a clean slate
/// (mirrors the teacher's documented contract).
pub trait Backoff: Send + Sync + 'static {
    /// Initiate the next backoff in the sequence, sleeping for it.
    /// Returns `false` once no further backoff is possible (never, for the
    /// unbounded exponential backoff used here).
    fn next_backoff(&self) -> impl Future<Output = bool> + Send + '_;

    /// Reset to the initial state.
    fn reset(&self) -> impl Future<Output = ()> + Send + '_;
}

/// A max-nanosecond-span jitter function: `jitter(max)` returns a value in
/// `[0, max)`. Pluggable so tests can supply a deterministic jitter.
pub trait Jitter: Send + Sync + 'static {
    fn jitter(&self, max_nanos: u64) -> u64;
}

/// The default jitter: a uniform random draw from `[0, max)` via `rand`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandJitter;

impl Jitter for RandJitter {
    fn jitter(&self, max_nanos: u64) -> u64 {
        if max_nanos == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..max_nanos)
        }
    }
}

/// Pure function form of the backoff curve used by the probe loop
/// (spec's pseudocode calls `backoff(attempts)` directly): exponential growth
/// from `first`, capped at `max`, with full jitter applied by `jitter`.
#[must_use]
pub fn backoff_duration(
    attempt: u32,
    first: Duration,
    max: Duration,
    jitter: &dyn Jitter,
) -> Duration {
    let exp = first.as_nanos().saturating_mul(1u128 << attempt.min(32));
    let capped = exp.min(max.as_nanos());
    let capped_u64 = u64::try_from(capped).unwrap_or(u64::MAX);
    Duration::from_nanos(jitter.jitter(capped_u64.max(1)))
}

/// Exponential-with-full-jitter [`Backoff`], defaults `first=10ms`, `max=30s`.
pub struct ExponentialBackoff {
    first: Duration,
    max: Duration,
    jitter: Arc<dyn Jitter>,
    attempt: AtomicU32,
}

impl ExponentialBackoff {
    #[must_use]
    pub fn new(first: Duration, max: Duration, jitter: Arc<dyn Jitter>) -> Self {
        Self {
            first,
            max,
            jitter,
            attempt: AtomicU32::new(0),
        }
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(10),
            Duration::from_secs(30),
            Arc::new(RandJitter),
        )
    }
}

impl Clone for ExponentialBackoff {
    fn clone(&self) -> Self {
        Self {
            first: self.first,
            max: self.max,
            jitter: self.jitter.clone(),
            attempt: AtomicU32::new(0),
        }
    }
}

impl Backoff for ExponentialBackoff {
    async fn next_backoff(&self) -> bool {
        let attempt = self.attempt.fetch_add(1, Ordering::AcqRel);
        let delay = backoff_duration(attempt, self.first, self.max, self.jitter.as_ref());
        tokio::time::sleep(delay).await;
        true
    }

    async fn reset(&self) {
        self.attempt.store(0, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MaxJitter;
    impl Jitter for MaxJitter {
        fn jitter(&self, max_nanos: u64) -> u64 {
            max_nanos.saturating_sub(1)
        }
    }

    struct ZeroJitter;
    impl Jitter for ZeroJitter {
        fn jitter(&self, _max_nanos: u64) -> u64 {
            0
        }
    }

    #[test]
    fn grows_exponentially_and_caps() {
        let first = Duration::from_millis(10);
        let max = Duration::from_secs(30);
        let j = MaxJitter;

        let d0 = backoff_duration(0, first, max, &j);
        let d1 = backoff_duration(1, first, max, &j);
        let d2 = backoff_duration(2, first, max, &j);
        assert!(d0 < d1);
        assert!(d1 < d2);

        let d_huge = backoff_duration(40, first, max, &j);
        assert!(d_huge <= max);
    }

    #[test]
    fn zero_jitter_yields_zero_delay() {
        let d = backoff_duration(5, Duration::from_millis(10), Duration::from_secs(30), &ZeroJitter);
        assert_eq!(d, Duration::from_nanos(0));
    }

    #[tokio::test]
    async fn clone_resets_attempt_counter() {
        let backoff = ExponentialBackoff::new(
            Duration::from_nanos(1),
            Duration::from_millis(1),
            Arc::new(RandJitter),
        );
        backoff.next_backoff().await;
        backoff.next_backoff().await;
        let cloned = backoff.clone();
        assert_eq!(cloned.attempt.load(Ordering::Acquire), 0);
    }
}
