use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::models::{classify_update, HistoryUpdate, MergedHistoryView};
use crate::store::{StoreError, WallStore, WindowRequest, WindowSnapshot};

/// Store emission routed back onto the engine task, tagged with the request
/// generation it belongs to.
#[derive(Debug)]
pub struct WindowEvent {
    pub generation: u64,
    pub result: Result<WindowSnapshot, StoreError>,
}

/// Outcome of feeding one store emission through the loader.
#[derive(Debug, Default)]
pub struct Commit {
    /// Set when the view changed structurally and must be republished.
    pub update: Option<HistoryUpdate>,
    pub is_loading: bool,
}

/// Keeps exactly one live windowed-merge subscription and filters its
/// emissions before they reach subscribers.
#[derive(Default)]
pub struct WindowedHistoryLoader {
    generation: u64,
    task: Option<JoinHandle<()>>,
    awaiting_first: bool,
    current: Option<Arc<MergedHistoryView>>,
}

impl WindowedHistoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<Arc<MergedHistoryView>> {
        self.current.clone()
    }

    /// A request was issued and has not delivered a settled snapshot yet.
    pub fn is_in_flight(&self) -> bool {
        self.task.is_some() && self.awaiting_first
    }

    /// Subscribe to `request`, superseding any live subscription.
    pub fn query(
        &mut self,
        store: Arc<dyn WallStore>,
        request: WindowRequest,
        events: mpsc::UnboundedSender<WindowEvent>,
    ) -> u64 {
        self.cancel();
        self.awaiting_first = true;
        let generation = self.generation;

        tracing::debug!(
            "wall: window query #{} over {} sources ({:?}, page {})",
            generation,
            request.sources.len(),
            request.direction,
            request.page_size
        );

        self.task = Some(tokio::spawn(async move {
            let mut stream = store.windowed_merge(request);
            while let Some(result) = stream.next().await {
                if events.send(WindowEvent { generation, result }).is_err() {
                    break;
                }
            }
        }));
        generation
    }

    /// Drop the live subscription. Late emissions from it are ignored.
    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.generation += 1;
        self.awaiting_first = false;
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.task.is_some() && generation == self.generation
    }

    /// Feed one emission of the live subscription. Stale generations yield
    /// `None`.
    pub fn accept(&mut self, event: WindowEvent) -> Option<Result<Commit, StoreError>> {
        if !self.is_current(event.generation) {
            tracing::trace!("wall: dropping stale window emission #{}", event.generation);
            return None;
        }

        let snapshot = match event.result {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.awaiting_first = false;
                return Some(Err(e));
            }
        };

        if !snapshot.is_loading {
            self.awaiting_first = false;
        }
        let is_loading = snapshot.is_loading;
        let view = MergedHistoryView {
            entries: snapshot.entries,
            hole_earlier: snapshot.hole_earlier,
            hole_later: snapshot.hole_later,
            is_loading,
        };
        Some(Ok(Commit {
            update: self.commit(view),
            is_loading,
        }))
    }

    /// Make `view` current. Returns the update to publish, or `None` when it
    /// renders the same as what subscribers already have. Changed hole
    /// flags are still kept, pagination reads them.
    pub fn commit(&mut self, view: MergedHistoryView) -> Option<HistoryUpdate> {
        if let Some(current) = &self.current {
            if current.renders_same_as(&view) {
                if current.hole_earlier != view.hole_earlier || current.hole_later != view.hole_later {
                    self.current = Some(Arc::new(view));
                }
                return None;
            }
        }
        let update_type = classify_update(self.current.as_deref(), &view);

        let view = Arc::new(view);
        self.current = Some(view.clone());
        Some(HistoryUpdate { view, update_type })
    }
}

impl Drop for WindowedHistoryLoader {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HistoryEntry, Message, MessageId, MessageIndex, Namespace, SourceId, UpdateType};

    fn entry(id: i32, timestamp: i32) -> HistoryEntry {
        let index = MessageIndex::new(SourceId(1), Namespace::CLOUD, MessageId(id), timestamp);
        HistoryEntry::new(Arc::new(Message::new(index, "")))
    }

    fn view(entries: Vec<HistoryEntry>) -> MergedHistoryView {
        MergedHistoryView::new(entries, false, false)
    }

    #[test]
    fn test_commit_suppresses_structurally_equal_views() {
        let mut loader = WindowedHistoryLoader::new();
        let first = loader.commit(view(vec![entry(1, 10)])).expect("first view publishes");
        assert_eq!(first.update_type, UpdateType::Initial);

        assert!(loader.commit(view(vec![entry(1, 10)])).is_none());

        let grown = loader
            .commit(view(vec![entry(1, 10), entry(2, 20)]))
            .expect("grown view publishes");
        assert_eq!(grown.update_type, UpdateType::FillHole);
    }

    #[test]
    fn test_suppressed_view_still_refreshes_hole_flags() {
        let mut loader = WindowedHistoryLoader::new();
        loader.commit(view(vec![entry(1, 10)]));

        let mut flagged = view(vec![entry(1, 10)]);
        flagged.hole_later = true;
        assert!(loader.commit(flagged).is_none());
        assert!(loader.current().unwrap().hole_later);
    }

    #[test]
    fn test_accept_ignores_without_live_request() {
        let mut loader = WindowedHistoryLoader::new();
        let event = WindowEvent {
            generation: 0,
            result: Ok(WindowSnapshot::default()),
        };
        assert!(loader.accept(event).is_none());
    }

    #[tokio::test]
    async fn test_superseded_generation_is_stale() {
        let store = Arc::new(crate::store::MemoryStore::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let request = WindowRequest {
            sources: Default::default(),
            anchors: Default::default(),
            lower_bound: Default::default(),
            pivot: None,
            direction: crate::store::WindowDirection::Forward,
            page_size: 4,
            clip_gaps: false,
        };

        let mut loader = WindowedHistoryLoader::new();
        let first = loader.query(store.clone(), request.clone(), tx.clone());
        let second = loader.query(store, request, tx);
        assert_ne!(first, second);
        assert!(loader.is_in_flight());

        let event = rx.recv().await.expect("live query emits");
        assert_eq!(event.generation, second);
        let commit = loader.accept(event).expect("current generation").unwrap();
        assert!(!commit.is_loading);
        assert!(!loader.is_in_flight());

        let stale = WindowEvent {
            generation: first,
            result: Ok(WindowSnapshot::default()),
        };
        assert!(loader.accept(stale).is_none());
    }
}
