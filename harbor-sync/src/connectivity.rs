//! Online/offline state tracking.
//!
//! The monitor turns a platform reachability signal into a boolean state and
//! an edge-triggered "became online" event. Going offline is silent. Coming
//! back online is announced after `reconnect_delay`, and only if the device
//! stayed online for the whole delay, so a flapping link does not trigger a
//! burst of drains.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// On-demand reachability check against the remote store.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn is_reachable(&self) -> bool;
}

/// Two-state connectivity monitor.
pub struct ConnectivityMonitor {
    online: AtomicBool,
    /// Bumped on every transition; a pending online announcement is dropped
    /// if the generation moved while it waited.
    generation: AtomicU64,
    reconnect_delay: Duration,
    probe: Option<Arc<dyn ReachabilityProbe>>,
    online_tx: broadcast::Sender<()>,
}

impl ConnectivityMonitor {
    /// Creates a monitor in the given initial state.
    pub fn new(initially_online: bool, reconnect_delay: Duration) -> Self {
        let (online_tx, _) = broadcast::channel(16);
        Self {
            online: AtomicBool::new(initially_online),
            generation: AtomicU64::new(0),
            reconnect_delay,
            probe: None,
            online_tx,
        }
    }

    /// Attaches a probe used by [`refresh`](Self::refresh).
    #[must_use]
    pub fn with_probe(mut self, probe: Arc<dyn ReachabilityProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Subscribes to debounced Offline→Online edges.
    pub fn subscribe_online(&self) -> broadcast::Receiver<()> {
        self.online_tx.subscribe()
    }

    /// Feeds a reachability observation into the state machine.
    pub fn set_reachable(self: &Arc<Self>, reachable: bool) {
        let was_online = self.online.swap(reachable, Ordering::SeqCst);
        if was_online == reachable {
            return;
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        if !reachable {
            info!("Connectivity lost");
            return;
        }

        info!("Connectivity restored, announcing in {:?}", self.reconnect_delay);
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(monitor.reconnect_delay).await;
            if monitor.is_online() && monitor.generation.load(Ordering::SeqCst) == generation {
                // No receivers is not an error: nobody is waiting for edges yet.
                let _ = monitor.online_tx.send(());
            } else {
                debug!("Connectivity flapped during reconnect delay, edge suppressed");
            }
        });
    }

    /// Polls the probe, if any, and returns the resulting state.
    pub async fn refresh(self: &Arc<Self>) -> bool {
        if let Some(probe) = &self.probe {
            let reachable = probe.is_reachable().await;
            self.set_reachable(reachable);
        }
        self.is_online()
    }

    /// Consumes a platform signal stream of connected/disconnected values.
    pub fn watch_signal(self: &Arc<Self>, mut signal: mpsc::Receiver<bool>) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(reachable) = signal.recv().await {
                monitor.set_reachable(reachable);
            }
            debug!("Connectivity signal closed");
        })
    }
}

impl std::fmt::Debug for ConnectivityMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectivityMonitor")
            .field("online", &self.is_online())
            .field("reconnect_delay", &self.reconnect_delay)
            .field("has_probe", &self.probe.is_some())
            .finish()
    }
}

/// Probes for testing.
pub mod mock {
    use super::*;

    /// A probe whose answer is set by hand.
    #[derive(Debug)]
    pub struct ManualProbe {
        reachable: AtomicBool,
    }

    impl ManualProbe {
        pub fn new(reachable: bool) -> Self {
            Self {
                reachable: AtomicBool::new(reachable),
            }
        }

        pub fn set(&self, reachable: bool) {
            self.reachable.store(reachable, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl ReachabilityProbe for ManualProbe {
        async fn is_reachable(&self) -> bool {
            self.reachable.load(Ordering::SeqCst)
        }
    }
}
