//! In-memory `WallStore` used by the CLI and by tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::{self, BoxFuture, FutureExt};
use futures::stream::BoxStream;
use parking_lot::RwLock;
use tokio::sync::watch;

use super::{GroupScope, StoreError, WallStore, WindowDirection, WindowRequest, WindowSnapshot};
use crate::filter::FilterPredicate;
use crate::models::{
    AnchorMap, EntryLocation, HistoryEntry, Message, MessageIndex, Namespace, SourceId, SourceKind,
};

/// One chat source with its full retained history.
#[derive(Debug, Clone)]
pub struct SourceRecord {
    pub id: SourceId,
    pub title: String,
    pub kind: SourceKind,
    pub archived: bool,
    /// Sorted by index.
    messages: Vec<Arc<Message>>,
    pub read_up_to: Option<MessageIndex>,
    /// History still being fetched from the network.
    pub pending_gap: bool,
}

impl SourceRecord {
    pub fn new(id: SourceId, title: impl Into<String>, kind: SourceKind) -> Self {
        Self {
            id,
            title: title.into(),
            kind,
            archived: false,
            messages: Vec::new(),
            read_up_to: None,
            pending_gap: false,
        }
    }

    pub fn archived(mut self, archived: bool) -> Self {
        self.archived = archived;
        self
    }

    pub fn with_messages(mut self, messages: impl IntoIterator<Item = Message>) -> Self {
        for message in messages {
            self.insert_message(message);
        }
        self
    }

    pub fn messages(&self) -> &[Arc<Message>] {
        &self.messages
    }

    fn insert_message(&mut self, message: Message) {
        let position = self
            .messages
            .partition_point(|existing| existing.index < message.index);
        if self
            .messages
            .get(position)
            .is_some_and(|existing| existing.index == message.index)
        {
            self.messages[position] = Arc::new(message);
        } else {
            self.messages.insert(position, Arc::new(message));
        }
    }

    fn scope(&self) -> GroupScope {
        if self.archived {
            GroupScope::Archive
        } else {
            GroupScope::Root
        }
    }

    fn entry(&self, position: usize) -> HistoryEntry {
        let message = self.messages[position].clone();
        let is_read = self
            .read_up_to
            .is_some_and(|read_up_to| message.index <= read_up_to);
        let mut entry = HistoryEntry::new(message);
        entry.location = Some(EntryLocation {
            index: position,
            count: self.messages.len(),
        });
        entry.is_read = is_read;
        entry
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    sources: BTreeMap<SourceId, SourceRecord>,
    failing: bool,
}

impl MemoryState {
    fn check(&self) -> Result<(), StoreError> {
        if self.failing {
            Err(StoreError::Unavailable("memory store set to fail".to_string()))
        } else {
            Ok(())
        }
    }

    fn window(&self, request: &WindowRequest) -> Result<WindowSnapshot, StoreError> {
        self.check()?;

        let mut selected = Vec::new();
        let mut skipped_older = false;
        let mut skipped_newer = false;
        let mut is_loading = false;

        for source_id in &request.sources {
            let Some(record) = self.sources.get(source_id) else {
                continue;
            };
            if record.pending_gap {
                if request.clip_gaps {
                    continue;
                }
                is_loading = true;
            }

            let floor = request.lower_bound.get(source_id);
            let anchor = request.anchors.get(source_id);

            for (position, message) in record.messages.iter().enumerate() {
                let index = message.index;
                if floor.is_some_and(|floor| index <= *floor) {
                    continue;
                }
                let in_window = match request.direction {
                    WindowDirection::Forward => {
                        anchor.map_or(true, |anchor| index >= *anchor)
                            && request.pivot.map_or(true, |pivot| index >= pivot)
                    }
                    WindowDirection::Backward => {
                        anchor.map_or(true, |anchor| index <= *anchor)
                            && request.pivot.map_or(true, |pivot| index <= pivot)
                    }
                };
                if in_window {
                    selected.push(record.entry(position));
                } else {
                    match request.direction {
                        WindowDirection::Forward => skipped_older = true,
                        WindowDirection::Backward => skipped_newer = true,
                    }
                }
            }
        }

        selected.sort_by_key(HistoryEntry::index);
        let overflow = selected.len() > request.page_size;

        let (hole_earlier, hole_later) = match request.direction {
            WindowDirection::Forward => {
                selected.truncate(request.page_size);
                (skipped_older, overflow)
            }
            WindowDirection::Backward => {
                if overflow {
                    selected.drain(..selected.len() - request.page_size);
                }
                (overflow, skipped_newer)
            }
        };

        Ok(WindowSnapshot {
            entries: selected,
            hole_earlier,
            hole_later,
            is_loading,
        })
    }
}

#[derive(Debug, Default)]
struct CallCounters {
    list_sources: AtomicUsize,
    max_read_index: AtomicUsize,
    top_index: AtomicUsize,
    gap_checks: AtomicUsize,
    windows: AtomicUsize,
    read_writes: AtomicUsize,
}

struct MemoryInner {
    state: RwLock<MemoryState>,
    revision: watch::Sender<u64>,
    calls: CallCounters,
}

impl MemoryInner {
    fn snapshot(&self, request: &WindowRequest) -> Result<WindowSnapshot, StoreError> {
        self.state.read().window(request)
    }

    fn bump(&self) {
        self.revision.send_modify(|revision| *revision += 1);
    }
}

/// Thread-safe in-memory store. Cloning shares the same data.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            inner: Arc::new(MemoryInner {
                state: RwLock::new(MemoryState::default()),
                revision,
                calls: CallCounters::default(),
            }),
        }
    }

    pub fn insert_source(&self, record: SourceRecord) {
        self.inner.state.write().sources.insert(record.id, record);
        self.inner.bump();
    }

    pub fn append_message(&self, message: Message) -> Result<(), StoreError> {
        {
            let mut state = self.inner.state.write();
            let source_id = message.source_id();
            let record = state
                .sources
                .get_mut(&source_id)
                .ok_or(StoreError::UnknownSource(source_id))?;
            record.insert_message(message);
        }
        self.inner.bump();
        Ok(())
    }

    pub fn set_pending_gap(&self, source: SourceId, pending: bool) -> Result<(), StoreError> {
        {
            let mut state = self.inner.state.write();
            let record = state
                .sources
                .get_mut(&source)
                .ok_or(StoreError::UnknownSource(source))?;
            record.pending_gap = pending;
        }
        self.inner.bump();
        Ok(())
    }

    /// Make every subsequent call fail with `StoreError::Unavailable`.
    pub fn set_failing(&self, failing: bool) {
        self.inner.state.write().failing = failing;
    }

    pub fn read_position(&self, source: SourceId) -> Option<MessageIndex> {
        self.inner
            .state
            .read()
            .sources
            .get(&source)
            .and_then(|record| record.read_up_to)
    }

    pub fn source(&self, source: SourceId) -> Option<SourceRecord> {
        self.inner.state.read().sources.get(&source).cloned()
    }

    pub fn list_sources_calls(&self) -> usize {
        self.inner.calls.list_sources.load(Ordering::SeqCst)
    }

    pub fn max_read_index_calls(&self) -> usize {
        self.inner.calls.max_read_index.load(Ordering::SeqCst)
    }

    pub fn top_index_calls(&self) -> usize {
        self.inner.calls.top_index.load(Ordering::SeqCst)
    }

    pub fn gap_checks(&self) -> usize {
        self.inner.calls.gap_checks.load(Ordering::SeqCst)
    }

    pub fn window_calls(&self) -> usize {
        self.inner.calls.windows.load(Ordering::SeqCst)
    }

    pub fn read_writes(&self) -> usize {
        self.inner.calls.read_writes.load(Ordering::SeqCst)
    }
}

impl WallStore for MemoryStore {
    fn list_sources(
        &self,
        scope: GroupScope,
        filter: FilterPredicate,
    ) -> BoxFuture<'_, Result<BTreeSet<SourceId>, StoreError>> {
        self.inner.calls.list_sources.fetch_add(1, Ordering::SeqCst);
        let state = self.inner.state.read();
        let result = state.check().map(|()| {
            state
                .sources
                .values()
                .filter(|record| record.scope() == scope)
                .filter(|record| filter.matches(record.id, record.kind, record.archived))
                .map(|record| record.id)
                .collect()
        });
        future::ready(result).boxed()
    }

    fn max_read_index(
        &self,
        sources: BTreeSet<SourceId>,
    ) -> BoxFuture<'_, Result<AnchorMap, StoreError>> {
        self.inner.calls.max_read_index.fetch_add(1, Ordering::SeqCst);
        let state = self.inner.state.read();
        let result = state.check().map(|()| {
            sources
                .iter()
                .filter_map(|id| state.sources.get(id))
                .map(|record| {
                    let read = record
                        .read_up_to
                        .unwrap_or_else(|| MessageIndex::lower_bound(record.id, 0));
                    (record.id, read)
                })
                .collect()
        });
        future::ready(result).boxed()
    }

    fn top_index(
        &self,
        sources: BTreeSet<SourceId>,
        namespace: Namespace,
    ) -> BoxFuture<'_, Result<AnchorMap, StoreError>> {
        self.inner.calls.top_index.fetch_add(1, Ordering::SeqCst);
        let state = self.inner.state.read();
        let result = state.check().map(|()| {
            sources
                .iter()
                .filter_map(|id| state.sources.get(id))
                .filter_map(|record| {
                    record
                        .messages
                        .iter()
                        .rev()
                        .find(|message| message.index.namespace == namespace)
                        .map(|message| (record.id, message.index))
                })
                .collect()
        });
        future::ready(result).boxed()
    }

    fn has_unfetched_gaps(&self, scope: GroupScope) -> BoxFuture<'_, Result<bool, StoreError>> {
        self.inner.calls.gap_checks.fetch_add(1, Ordering::SeqCst);
        let state = self.inner.state.read();
        let result = state.check().map(|()| {
            state
                .sources
                .values()
                .any(|record| record.scope() == scope && record.pending_gap)
        });
        future::ready(result).boxed()
    }

    fn windowed_merge(
        &self,
        request: WindowRequest,
    ) -> BoxStream<'static, Result<WindowSnapshot, StoreError>> {
        self.inner.calls.windows.fetch_add(1, Ordering::SeqCst);
        let inner = self.inner.clone();
        Box::pin(async_stream::stream! {
            let mut revision = inner.revision.subscribe();
            loop {
                let snapshot = inner.snapshot(&request);
                let failed = snapshot.is_err();
                yield snapshot;
                if failed || revision.changed().await.is_err() {
                    break;
                }
            }
        })
    }

    fn apply_read_position(
        &self,
        source: SourceId,
        up_to: MessageIndex,
    ) -> BoxFuture<'_, Result<(), StoreError>> {
        self.inner.calls.read_writes.fetch_add(1, Ordering::SeqCst);
        let result = {
            let mut state = self.inner.state.write();
            state.check().and_then(|()| {
                let record = state
                    .sources
                    .get_mut(&source)
                    .ok_or(StoreError::UnknownSource(source))?;
                let advanced = record.read_up_to.map_or(true, |current| current < up_to);
                if advanced {
                    record.read_up_to = Some(up_to);
                }
                Ok(advanced)
            })
        };
        if let Ok(true) = result {
            self.inner.bump();
        }
        future::ready(result.map(|_| ())).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MessageId;
    use futures::StreamExt;

    fn message(source: i64, id: i32, timestamp: i32) -> Message {
        let index = MessageIndex::new(SourceId(source), Namespace::CLOUD, MessageId(id), timestamp);
        Message::new(index, format!("{source}/{id}"))
    }

    /// A: t=10,20,30; B: t=15,25.
    fn two_source_store() -> MemoryStore {
        let store = MemoryStore::new();
        store.insert_source(
            SourceRecord::new(SourceId(1), "A", SourceKind::Channel).with_messages([
                message(1, 1, 10),
                message(1, 2, 20),
                message(1, 3, 30),
            ]),
        );
        store.insert_source(
            SourceRecord::new(SourceId(2), "B", SourceKind::Channel)
                .with_messages([message(2, 1, 15), message(2, 2, 25)]),
        );
        store
    }

    fn request(direction: WindowDirection, anchors: AnchorMap, page_size: usize) -> WindowRequest {
        WindowRequest {
            sources: [SourceId(1), SourceId(2)].into_iter().collect(),
            anchors,
            lower_bound: AnchorMap::new(),
            pivot: None,
            direction,
            page_size,
            clip_gaps: false,
        }
    }

    fn timestamps(snapshot: &WindowSnapshot) -> Vec<i32> {
        snapshot.entries.iter().map(|e| e.index().timestamp).collect()
    }

    async fn first(store: &MemoryStore, request: WindowRequest) -> WindowSnapshot {
        store
            .windowed_merge(request)
            .next()
            .await
            .expect("stream should emit")
            .expect("window should succeed")
    }

    #[tokio::test]
    async fn test_forward_window_from_unread_floor() {
        let store = two_source_store();
        let sources: BTreeSet<_> = [SourceId(1), SourceId(2)].into_iter().collect();
        let floor = store.max_read_index(sources).await.unwrap();

        let mut req = request(WindowDirection::Forward, floor.clone(), 4);
        req.lower_bound = floor;
        let snapshot = first(&store, req).await;

        assert_eq!(timestamps(&snapshot), vec![10, 15, 20, 25]);
        assert!(snapshot.hole_later);
        assert!(!snapshot.hole_earlier);
    }

    #[tokio::test]
    async fn test_forward_window_respects_pivot() {
        let store = two_source_store();
        let pivot = message(1, 2, 20).index;
        let mut req = request(WindowDirection::Forward, AnchorMap::new(), 4);
        req.pivot = Some(pivot);
        let snapshot = first(&store, req).await;

        assert_eq!(timestamps(&snapshot), vec![20, 25, 30]);
        assert!(snapshot.hole_earlier);
        assert!(!snapshot.hole_later);
    }

    #[tokio::test]
    async fn test_backward_window_keeps_newest_page() {
        let store = two_source_store();
        let snapshot = first(&store, request(WindowDirection::Backward, AnchorMap::new(), 2)).await;

        assert_eq!(timestamps(&snapshot), vec![25, 30]);
        assert!(snapshot.hole_earlier);
        assert!(!snapshot.hole_later);
    }

    #[tokio::test]
    async fn test_lower_bound_excludes_read_messages() {
        let store = two_source_store();
        let mut req = request(WindowDirection::Forward, AnchorMap::new(), 10);
        req.lower_bound.insert(SourceId(1), message(1, 2, 20).index);
        let snapshot = first(&store, req).await;

        assert_eq!(timestamps(&snapshot), vec![15, 25, 30]);
    }

    #[tokio::test]
    async fn test_pending_gap_marks_loading_or_is_clipped() {
        let store = two_source_store();
        store.set_pending_gap(SourceId(2), true).unwrap();

        let loading = first(&store, request(WindowDirection::Forward, AnchorMap::new(), 10)).await;
        assert!(loading.is_loading);
        assert_eq!(loading.entries.len(), 5);

        let mut clipped_req = request(WindowDirection::Forward, AnchorMap::new(), 10);
        clipped_req.clip_gaps = true;
        let clipped = first(&store, clipped_req).await;
        assert!(!clipped.is_loading);
        assert_eq!(timestamps(&clipped), vec![10, 20, 30]);
    }

    #[tokio::test]
    async fn test_window_reemits_on_change() {
        let store = two_source_store();
        let mut stream = store.windowed_merge(request(WindowDirection::Forward, AnchorMap::new(), 10));
        let initial = stream.next().await.unwrap().unwrap();
        assert_eq!(initial.entries.len(), 5);

        store.append_message(message(2, 3, 35)).unwrap();
        let updated = stream.next().await.unwrap().unwrap();
        assert_eq!(timestamps(&updated), vec![10, 15, 20, 25, 30, 35]);
    }

    #[tokio::test]
    async fn test_read_position_only_moves_forward() {
        let store = two_source_store();
        store
            .apply_read_position(SourceId(1), message(1, 2, 20).index)
            .await
            .unwrap();
        store
            .apply_read_position(SourceId(1), message(1, 1, 10).index)
            .await
            .unwrap();
        assert_eq!(store.read_position(SourceId(1)), Some(message(1, 2, 20).index));
        assert_eq!(store.read_writes(), 2);
    }

    #[tokio::test]
    async fn test_list_sources_by_scope_and_filter() {
        let store = two_source_store();
        store.insert_source(SourceRecord::new(SourceId(3), "C", SourceKind::Channel).archived(true));
        store.insert_source(SourceRecord::new(SourceId(4), "D", SourceKind::Group));

        let filter = FilterPredicate::default();
        let root = store.list_sources(GroupScope::Root, filter.clone()).await.unwrap();
        let archive = store.list_sources(GroupScope::Archive, filter).await.unwrap();

        assert_eq!(root.into_iter().collect::<Vec<_>>(), vec![SourceId(1), SourceId(2)]);
        assert_eq!(archive.into_iter().collect::<Vec<_>>(), vec![SourceId(3)]);
    }

    #[tokio::test]
    async fn test_top_index_skips_empty_sources() {
        let store = two_source_store();
        store.insert_source(SourceRecord::new(SourceId(3), "C", SourceKind::Channel));
        let sources = [SourceId(1), SourceId(2), SourceId(3)].into_iter().collect();
        let top = store.top_index(sources, Namespace::CLOUD).await.unwrap();

        assert_eq!(top.len(), 2);
        assert_eq!(top[&SourceId(1)].timestamp, 30);
        assert_eq!(top[&SourceId(2)].timestamp, 25);
    }

    #[tokio::test]
    async fn test_failing_store_reports_unavailable() {
        let store = two_source_store();
        store.set_failing(true);
        let result = store.has_unfetched_gaps(GroupScope::Root).await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
    }
}
