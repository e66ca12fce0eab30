//! `PeerPool`: the process-wide registry of [`PeerEntry`] values and the
//! shared HTTP client state outbound calls draw from (spec §4.5, "Transport"
//! in the glossary).

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::Full;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use parking_lot::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::config::TransportConfig;
use crate::error::TransportError;
use crate::peer::address::PeerAddress;
use crate::peer::entry::{PeerEntry, ProbeConfig};
use crate::peer::signal::OneShot;

pub use crate::peer::entry::SubscriberId;

/// The shared HTTP/1 and HTTP/2 client every outbound call dials through.
/// Kept as a type alias rather than a newtype: it's just configuration for
/// `hyper_util`'s pooling connector, not a type we add behavior to.
pub type HttpClient = Client<HttpConnector, Full<Bytes>>;

fn build_http_client(config: &TransportConfig) -> HttpClient {
    let mut connector = HttpConnector::new();
    connector.set_connect_timeout(Some(config.conn_timeout));
    connector.set_keepalive(if config.keep_alive {
        Some(config.idle_conn_timeout)
    } else {
        None
    });

    let mut builder = Client::builder(TokioExecutor::new());
    builder
        .pool_max_idle_per_host(config.max_idle_conns_per_host)
        .pool_idle_timeout(config.idle_conn_timeout);
    // Cleartext HTTP/2 needs prior-knowledge negotiation to even start; we
    // never force it, so `disable_http2` only matters on the inbound side
    // (spec §6) where the listener decides which protocols to accept.
    builder.build(connector)
}

struct PoolInner {
    peers: HashMap<PeerAddress, Arc<PeerEntry>>,
    probes: JoinSet<()>,
}

/// Owns every [`PeerEntry`] the process currently cares about, plus the
/// shared HTTP client outbound pipelines use to actually speak to them.
///
/// Lifecycle is "once": the first `start()` publishes the `started` signal
/// and every later call is a no-op observing the same state; `stop()` works
/// the same way, and additionally waits for every probe loop it spawned to
/// exit before returning.
pub struct PeerPool {
    inner: Mutex<PoolInner>,
    started: Arc<OneShot>,
    stopping: Arc<OneShot>,
    probe_config: ProbeConfig,
    http_client: HttpClient,
}

impl PeerPool {
    #[must_use]
    pub fn new(config: &TransportConfig) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(PoolInner {
                peers: HashMap::new(),
                probes: JoinSet::new(),
            }),
            started: Arc::new(OneShot::new()),
            stopping: Arc::new(OneShot::new()),
            probe_config: ProbeConfig {
                conn_timeout: config.conn_timeout,
                innocence_window: config.innocence_window,
                backoff: config.conn_backoff.clone(),
            },
            http_client: build_http_client(config),
        })
    }

    #[must_use]
    pub fn http_client(&self) -> &HttpClient {
        &self.http_client
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.started.is_fired() && !self.stopping.is_fired()
    }

    /// Publishes the `started` signal that every probe loop waits on before
    /// dialing for the first time. Idempotent.
    pub fn start(&self) {
        if !self.started.is_fired() {
            info!("peer pool starting");
        }
        self.started.fire();
    }

    /// Waits (cooperatively, no busy loop) until either the pool has started
    /// or `stopping` fires, whichever comes first. Returns whether the pool
    /// ended up running.
    pub async fn wait_until_started(&self) -> bool {
        tokio::select! {
            () = self.started.fired() => {}
            () = self.stopping.fired() => {}
        }
        self.is_running()
    }

    /// Retain a reference to the peer at `address` on behalf of `subscriber`,
    /// spawning its probe loop on first retain. Safe to call before
    /// `start()`: the spawned loop just waits for the `started` signal.
    pub fn retain_peer(&self, address: PeerAddress, subscriber: SubscriberId) -> Arc<PeerEntry> {
        let mut inner = self.inner.lock();
        if !inner.peers.contains_key(&address) {
            let entry = PeerEntry::new(address.clone(), self.probe_config.clone());
            let task_entry = entry.clone();
            let started = self.started.clone();
            let stopping = self.stopping.clone();
            inner.probes.spawn(async move {
                task_entry.maintain_conn(started, stopping).await;
            });
            inner.peers.insert(address.clone(), entry);
            debug!(%address, "retained new peer, probe loop spawned");
        }
        let entry = inner.peers.get(&address).expect("just inserted above").clone();
        entry.subscribe(subscriber);
        entry
    }

    /// Releases `subscriber`'s hold on the peer at `address`. When the last
    /// subscriber releases, the entry is dropped from the registry and its
    /// probe loop is unblocked to exit (spec §4.5).
    pub fn release_peer(
        &self,
        address: &PeerAddress,
        subscriber: SubscriberId,
    ) -> Result<(), TransportError> {
        let mut inner = self.inner.lock();
        let Some(entry) = inner.peers.get(address).cloned() else {
            return Err(TransportError::NoReferenceToPeer);
        };
        if !entry.unsubscribe(subscriber) {
            return Err(TransportError::NoReferenceToSubscriber);
        }
        if entry.subscriber_count() == 0 {
            inner.peers.remove(address);
            entry.release();
            debug!(%address, "last subscriber released, peer entry retired");
        }
        Ok(())
    }

    #[must_use]
    pub fn peer(&self, address: &PeerAddress) -> Option<Arc<PeerEntry>> {
        self.inner.lock().peers.get(address).cloned()
    }

    /// Publishes the `stopping` signal, unblocking every probe loop at its
    /// next select point, then waits for all of them to actually exit.
    /// Idempotent: a second call observes the same drained state.
    pub async fn stop(&self) {
        self.stopping.fire();
        let mut probes = {
            let mut inner = self.inner.lock();
            std::mem::replace(&mut inner.probes, JoinSet::new())
        };
        while probes.join_next().await.is_some() {}
        info!("peer pool stopped, all probe loops exited");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::entry::PeerStatus;

    fn pool() -> Arc<PeerPool> {
        PeerPool::new(&TransportConfig::default())
    }

    #[tokio::test]
    async fn retain_then_release_retires_the_entry() {
        let pool = pool();
        pool.start();
        let address = PeerAddress::from("127.0.0.1:1");
        let sub = SubscriberId::new();

        let entry = pool.retain_peer(address.clone(), sub);
        assert_eq!(entry.subscriber_count(), 1);
        assert!(pool.peer(&address).is_some());

        pool.release_peer(&address, sub).expect("release succeeds");
        assert!(pool.peer(&address).is_none());
        assert!(entry.is_released());

        pool.stop().await;
    }

    #[tokio::test]
    async fn release_without_retain_is_reported() {
        let pool = pool();
        let address = PeerAddress::from("127.0.0.1:1");
        let err = pool.release_peer(&address, SubscriberId::new()).unwrap_err();
        assert!(matches!(err, TransportError::NoReferenceToPeer));
        pool.stop().await;
    }

    #[tokio::test]
    async fn release_unknown_subscriber_is_reported() {
        let pool = pool();
        let address = PeerAddress::from("127.0.0.1:1");
        let owner = SubscriberId::new();
        let stranger = SubscriberId::new();
        pool.retain_peer(address.clone(), owner);

        let err = pool.release_peer(&address, stranger).unwrap_err();
        assert!(matches!(err, TransportError::NoReferenceToSubscriber));

        pool.release_peer(&address, owner).unwrap();
        pool.stop().await;
    }

    #[tokio::test]
    async fn shared_peer_survives_until_last_subscriber_releases() {
        let pool = pool();
        let address = PeerAddress::from("127.0.0.1:1");
        let a = SubscriberId::new();
        let b = SubscriberId::new();

        pool.retain_peer(address.clone(), a);
        pool.retain_peer(address.clone(), b);
        assert_eq!(pool.peer(&address).unwrap().subscriber_count(), 2);

        pool.release_peer(&address, a).unwrap();
        assert!(pool.peer(&address).is_some(), "still held by b");

        pool.release_peer(&address, b).unwrap();
        assert!(pool.peer(&address).is_none());
        pool.stop().await;
    }

    #[tokio::test]
    async fn stop_drains_probe_loops_and_leaves_peers_unavailable() {
        let pool = pool();
        pool.start();
        let address = PeerAddress::from("127.0.0.1:1");
        let entry = pool.retain_peer(address, SubscriberId::new());
        // Give the spawned task a chance to run at least one probe attempt.
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        pool.stop().await;
        assert_eq!(entry.status(), PeerStatus::Unavailable);
    }
}
