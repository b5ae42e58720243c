use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::store::{GroupScope, WallStore};

/// Holds back the first load until the store has no unfetched gaps left in
/// any of the watched chat-list groups.
///
/// Polls immediately, then every `timeout`. Errors count as "not ready yet".
/// Fires once; after that `start` is a no-op.
pub struct ReadinessGate {
    store: Arc<dyn WallStore>,
    scopes: Vec<GroupScope>,
    timeout: Duration,
    ready_tx: Arc<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

impl ReadinessGate {
    pub fn new(store: Arc<dyn WallStore>, scopes: Vec<GroupScope>, timeout: Duration) -> Self {
        let (ready_tx, _) = watch::channel(false);
        Self {
            store,
            scopes,
            timeout,
            ready_tx: Arc::new(ready_tx),
            task: None,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.ready_tx.subscribe()
    }

    pub fn is_ready(&self) -> bool {
        *self.ready_tx.borrow()
    }

    pub fn is_polling(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    pub fn start(&mut self) {
        if self.is_ready() || self.is_polling() {
            return;
        }

        let store = self.store.clone();
        let scopes = self.scopes.clone();
        let timeout = self.timeout;
        let ready_tx = self.ready_tx.clone();

        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(timeout);
            loop {
                ticker.tick().await;
                if sources_loaded(store.as_ref(), &scopes).await {
                    tracing::info!("wall: sources loaded, releasing first load");
                    ready_tx.send_replace(true);
                    break;
                }
            }
        }));
    }

    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for ReadinessGate {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn sources_loaded(store: &dyn WallStore, scopes: &[GroupScope]) -> bool {
    for &scope in scopes {
        match store.has_unfetched_gaps(scope).await {
            Ok(false) => {}
            Ok(true) => {
                tracing::debug!("wall: {:?} still has unfetched gaps", scope);
                return false;
            }
            Err(e) => {
                tracing::warn!("wall: gap check for {:?} failed: {}", scope, e);
                return false;
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SourceId, SourceKind};
    use crate::store::{MemoryStore, SourceRecord};

    const TICK: Duration = Duration::from_millis(10);

    fn gate_for(store: &MemoryStore) -> ReadinessGate {
        ReadinessGate::new(
            Arc::new(store.clone()),
            vec![GroupScope::Root, GroupScope::Archive],
            TICK,
        )
    }

    #[tokio::test]
    async fn test_fires_immediately_without_gaps() {
        let store = MemoryStore::new();
        let mut gate = gate_for(&store);
        let mut ready = gate.subscribe();

        gate.start();
        tokio::time::timeout(Duration::from_secs(2), ready.wait_for(|r| *r))
            .await
            .expect("gate should fire")
            .unwrap();
        assert!(gate.is_ready());
    }

    #[tokio::test]
    async fn test_waits_for_gaps_to_resolve() {
        let store = MemoryStore::new();
        store.insert_source(SourceRecord::new(SourceId(1), "A", SourceKind::Channel).archived(true));
        store.set_pending_gap(SourceId(1), true).unwrap();

        let mut gate = gate_for(&store);
        gate.start();
        tokio::time::sleep(TICK * 5).await;
        assert!(!gate.is_ready());
        assert!(store.gap_checks() >= 2);

        store.set_pending_gap(SourceId(1), false).unwrap();
        let mut ready = gate.subscribe();
        tokio::time::timeout(Duration::from_secs(2), ready.wait_for(|r| *r))
            .await
            .expect("gate should fire after gaps resolve")
            .unwrap();
    }

    #[tokio::test]
    async fn test_errors_are_retried() {
        let store = MemoryStore::new();
        store.set_failing(true);
        let mut gate = gate_for(&store);
        gate.start();
        tokio::time::sleep(TICK * 3).await;
        assert!(!gate.is_ready());

        store.set_failing(false);
        let mut ready = gate.subscribe();
        tokio::time::timeout(Duration::from_secs(2), ready.wait_for(|r| *r))
            .await
            .expect("gate should recover")
            .unwrap();
    }

    #[tokio::test]
    async fn test_start_and_stop_are_idempotent() {
        let store = MemoryStore::new();
        store.insert_source(SourceRecord::new(SourceId(1), "A", SourceKind::Channel));
        store.set_pending_gap(SourceId(1), true).unwrap();

        let mut gate = gate_for(&store);
        gate.start();
        gate.start();
        assert!(gate.is_polling());

        gate.stop();
        gate.stop();
        assert!(!gate.is_polling());
        assert!(!gate.is_ready());
    }
}
