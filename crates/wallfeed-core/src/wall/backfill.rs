//! Load-all: pages backwards from each source's newest message, one page
//! per request, merging pages as it goes.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::models::{AnchorMap, HistoryEntry, MergedHistoryView, MessageIndex, Namespace, SourceId};
use crate::store::{StoreError, WallStore, WindowRequest, WindowSnapshot};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackfillState {
    Idle,
    FetchingTopAnchors,
    PagingBackward { chunk: usize },
    Done,
}

#[derive(Debug)]
pub enum BackfillEvent {
    TopAnchors {
        generation: u64,
        result: Result<AnchorMap, StoreError>,
    },
    Page {
        generation: u64,
        result: Result<WindowSnapshot, StoreError>,
    },
}

impl BackfillEvent {
    pub fn generation(&self) -> u64 {
        match self {
            Self::TopAnchors { generation, .. } | Self::Page { generation, .. } => *generation,
        }
    }
}

/// What one committed page changes.
#[derive(Debug)]
pub struct PageOutcome {
    /// Per source, the index just below its oldest entry in the page.
    pub anchors: AnchorMap,
    /// Index just below the oldest entry of the page.
    pub page_anchor: MessageIndex,
    /// Every page of the session so far, merged.
    pub view: MergedHistoryView,
}

pub struct BackfillController {
    state: BackfillState,
    pages: usize,
    generation: u64,
    task: Option<JoinHandle<()>>,
    top_anchors: AnchorMap,
    accumulated: Vec<HistoryEntry>,
}

impl Default for BackfillController {
    fn default() -> Self {
        Self {
            state: BackfillState::Idle,
            pages: 0,
            generation: 0,
            task: None,
            top_anchors: AnchorMap::new(),
            accumulated: Vec::new(),
        }
    }
}

impl BackfillController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> BackfillState {
        self.state
    }

    /// A page request or top-anchor fetch is outstanding.
    pub fn is_running(&self) -> bool {
        matches!(
            self.state,
            BackfillState::FetchingTopAnchors | BackfillState::PagingBackward { .. }
        )
    }

    /// A session has started and not been reset. Pagination stays off while
    /// this holds.
    pub fn is_active(&self) -> bool {
        self.state != BackfillState::Idle || self.pages > 0
    }

    pub fn pages(&self) -> usize {
        self.pages
    }

    pub fn top_anchors(&self) -> &AnchorMap {
        &self.top_anchors
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.is_running() && generation == self.generation
    }

    /// Step one of every load-all request: fetch the newest index of each
    /// source.
    pub fn start(
        &mut self,
        store: Arc<dyn WallStore>,
        sources: BTreeSet<SourceId>,
        events: mpsc::UnboundedSender<BackfillEvent>,
    ) {
        self.abort_task();
        self.state = BackfillState::FetchingTopAnchors;
        let generation = self.generation;
        tracing::debug!("wall: load-all #{} over {} sources", generation, sources.len());

        self.task = Some(tokio::spawn(async move {
            let result = store.top_index(sources, Namespace::CLOUD).await;
            let _ = events.send(BackfillEvent::TopAnchors { generation, result });
        }));
    }

    pub fn set_top_anchors(&mut self, top_anchors: AnchorMap) {
        self.top_anchors = top_anchors;
    }

    /// Fetch one page. Only the first settled snapshot is used.
    pub fn fetch_page(
        &mut self,
        store: Arc<dyn WallStore>,
        request: WindowRequest,
        events: mpsc::UnboundedSender<BackfillEvent>,
    ) {
        self.abort_task();
        self.state = BackfillState::PagingBackward {
            chunk: self.pages + 1,
        };
        let generation = self.generation;

        self.task = Some(tokio::spawn(async move {
            let mut stream = store.windowed_merge(request);
            let result = loop {
                match stream.next().await {
                    Some(Ok(snapshot)) if snapshot.is_loading => continue,
                    Some(result) => break result,
                    None => break Err(StoreError::Closed),
                }
            };
            let _ = events.send(BackfillEvent::Page { generation, result });
        }));
    }

    /// Merge a fetched page. Returns `None` when it brought nothing new, in
    /// which case the session is finished.
    pub fn absorb_page(&mut self, snapshot: WindowSnapshot) -> Option<PageOutcome> {
        self.task = None;
        let known: BTreeSet<MessageIndex> = self.accumulated.iter().map(HistoryEntry::index).collect();
        let fresh: Vec<HistoryEntry> = snapshot
            .entries
            .iter()
            .filter(|entry| !known.contains(&entry.index()))
            .cloned()
            .collect();

        if fresh.is_empty() {
            tracing::debug!("wall: load-all exhausted after {} pages", self.pages);
            self.state = BackfillState::Done;
            return None;
        }

        // Backward bounds are inclusive; step below the page so the next one
        // starts strictly older.
        let (oldest, page_oldest) = oldest_per_source(&snapshot.entries)?;
        let anchors: AnchorMap = oldest
            .into_iter()
            .map(|(source, index)| (source, index.predecessor()))
            .collect();
        let page_anchor = page_oldest.predecessor();
        self.accumulated.extend(fresh);
        self.accumulated.sort_by_key(HistoryEntry::index);
        self.pages += 1;
        self.state = if snapshot.hole_earlier {
            BackfillState::Idle
        } else {
            BackfillState::Done
        };

        tracing::debug!(
            "wall: load-all page {} committed, {} entries total",
            self.pages,
            self.accumulated.len()
        );
        Some(PageOutcome {
            anchors,
            page_anchor,
            view: MergedHistoryView::new(self.accumulated.clone(), snapshot.hole_earlier, false),
        })
    }

    /// A store error aborted the current step. Prior pages stay committed.
    pub fn fail(&mut self) {
        self.task = None;
        self.state = BackfillState::Idle;
    }

    /// End the session. Returns true when a request was still running, so the
    /// caller can close its loading signal.
    pub fn reset(&mut self) -> bool {
        let was_running = self.is_running();
        self.abort_task();
        self.state = BackfillState::Idle;
        self.pages = 0;
        self.top_anchors.clear();
        self.accumulated.clear();
        was_running
    }

    fn abort_task(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.generation += 1;
    }
}

impl Drop for BackfillController {
    fn drop(&mut self) {
        self.abort_task();
    }
}

/// Oldest index per source and the oldest overall.
pub fn oldest_per_source(entries: &[HistoryEntry]) -> Option<(AnchorMap, MessageIndex)> {
    let mut anchors = AnchorMap::new();
    for index in entries.iter().map(HistoryEntry::index) {
        anchors
            .entry(index.source_id)
            .and_modify(|current| *current = (*current).min(index))
            .or_insert(index);
    }
    let oldest = anchors.values().min().copied()?;
    Some((anchors, oldest))
}
