//! Online/offline tracking and the backend health supervisor.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use tokio::{sync::watch, time::sleep};
use tracing::{info, warn};

use crate::dao::backend::ScoringBackend;

const INITIAL_DELAY: Duration = Duration::from_millis(1_000);
const MAX_DELAY: Duration = Duration::from_secs(10);

/// Effective connectivity: online when the presentation layer reports a network and the last
/// backend probe succeeded.
#[derive(Clone)]
pub struct Connectivity {
    inner: Arc<Inner>,
}

struct Inner {
    reported: AtomicBool,
    probe_ok: AtomicBool,
    online: watch::Sender<bool>,
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new()
    }
}

impl Connectivity {
    /// Start online.
    pub fn new() -> Self {
        let (online, _rx) = watch::channel(true);
        Self {
            inner: Arc::new(Inner {
                reported: AtomicBool::new(true),
                probe_ok: AtomicBool::new(true),
                online,
            }),
        }
    }

    /// Effective connectivity right now.
    pub fn is_online(&self) -> bool {
        *self.inner.online.borrow()
    }

    /// Subscribe to effective connectivity changes.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.inner.online.subscribe()
    }

    /// Network state reported by the presentation layer.
    pub fn set_online(&self, online: bool) -> bool {
        self.inner.reported.store(online, Ordering::SeqCst);
        self.recompute()
    }

    /// Outcome of a backend health probe.
    pub fn report_probe(&self, healthy: bool) -> bool {
        self.inner.probe_ok.store(healthy, Ordering::SeqCst);
        self.recompute()
    }

    /// Publish the effective flag, returning whether it changed.
    fn recompute(&self) -> bool {
        let online = self.inner.reported.load(Ordering::SeqCst)
            && self.inner.probe_ok.load(Ordering::SeqCst);
        let changed = self.inner.online.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            if online {
                info!("connectivity restored");
            } else {
                warn!("connectivity lost; scoring continues offline");
            }
        }
        changed
    }
}

/// Probe the backend forever, flipping connectivity as probes fail or recover.
///
/// Failed probes back off exponentially before the next attempt.
pub async fn supervise(
    connectivity: Connectivity,
    backend: Arc<dyn ScoringBackend>,
    probe_interval: Duration,
) {
    let mut delay = INITIAL_DELAY;

    loop {
        match backend.health_check().await {
            Ok(()) => {
                connectivity.report_probe(true);
                delay = INITIAL_DELAY;
                sleep(probe_interval).await;
            }
            Err(err) => {
                if connectivity.report_probe(false) {
                    warn!(error = %err, "scoring backend health probe failed");
                }
                sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::backend::InMemoryBackend;

    #[test]
    fn either_signal_takes_the_session_offline() {
        let connectivity = Connectivity::new();
        assert!(connectivity.is_online());

        assert!(connectivity.report_probe(false));
        assert!(!connectivity.set_online(false));
        assert!(!connectivity.report_probe(true));
        assert!(!connectivity.is_online());

        assert!(connectivity.set_online(true));
        assert!(connectivity.is_online());
    }

    #[tokio::test(start_paused = true)]
    async fn supervisor_follows_backend_health() {
        let backend = InMemoryBackend::new();
        let connectivity = Connectivity::new();
        let mut changes = connectivity.subscribe();
        backend.set_reachable(false);

        let task = tokio::spawn(supervise(
            connectivity.clone(),
            Arc::new(backend.clone()),
            Duration::from_secs(5),
        ));

        changes.changed().await.unwrap();
        assert!(!*changes.borrow_and_update());

        backend.set_reachable(true);
        changes.changed().await.unwrap();
        assert!(*changes.borrow_and_update());
        task.abort();
    }
}
