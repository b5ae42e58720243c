//! The wall actor.
//!
//! All state lives on one tokio task. Public calls become `WallCommand`s,
//! store results come back over internal channels tagged with the
//! generation of the request that produced them, so superseded work is
//! dropped without locking.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::WallConfig;
use crate::events::LoadingAction;
use crate::filter::{FilterPredicate, FilterPredicateManager};
use crate::models::{
    AnchorMap, HistoryUpdate, MergedHistoryView, MessageIndex, Namespace, SourceId, WallSettings,
};
use crate::store::{StoreError, WallStore, WindowDirection, WindowRequest};

use super::anchors::{AnchorTracker, ScrollDirection};
use super::backfill::{BackfillController, BackfillEvent, BackfillState};
use super::loader::{WindowEvent, WindowedHistoryLoader};
use super::pagination::PaginationController;
use super::read_state::ReadStatePropagator;
use super::readiness::ReadinessGate;

#[derive(Debug, Clone)]
pub enum WallCommand {
    Reload,
    LoadMore,
    LoadAll,
    NotifyVisible {
        index: MessageIndex,
        direction: ScrollDirection,
    },
    MarkAllRead {
        older_than: MessageIndex,
    },
    Shutdown,
}

#[derive(Debug, thiserror::Error)]
pub enum WallError {
    #[error("Wall engine stopped")]
    EngineStopped,
}

/// Results of one-shot store calls made by a reload.
#[derive(Debug)]
enum ReloadEvent {
    SourcesResolved {
        generation: u64,
        result: Result<BTreeSet<SourceId>, StoreError>,
    },
    BoundariesResolved {
        generation: u64,
        result: Result<AnchorMap, StoreError>,
    },
}

/// Cloneable handle to a running wall. Dropping every handle does not stop
/// the engine; call `shutdown`.
#[derive(Clone)]
pub struct WallFeed {
    commands: mpsc::UnboundedSender<WallCommand>,
    history: watch::Receiver<Option<HistoryUpdate>>,
    is_loading: watch::Receiver<bool>,
    loading_actions: broadcast::Sender<LoadingAction>,
    filter: watch::Receiver<Arc<FilterPredicate>>,
}

impl WallFeed {
    /// Spawn the engine on the current tokio runtime.
    pub fn spawn(
        store: Arc<dyn WallStore>,
        config: WallConfig,
        settings: watch::Receiver<WallSettings>,
    ) -> Self {
        let (engine, feed) = WallEngine::new(store, config, settings);
        tokio::spawn(engine.run());
        feed
    }

    fn send(&self, command: WallCommand) -> Result<(), WallError> {
        self.commands.send(command).map_err(|_| WallError::EngineStopped)
    }

    /// Re-resolve the source set and reload the window. Deferred until the
    /// store has finished its initial fetch.
    pub fn reload_data(&self) -> Result<(), WallError> {
        self.send(WallCommand::Reload)
    }

    /// Slide the window towards newer messages.
    pub fn load_more(&self) -> Result<(), WallError> {
        self.send(WallCommand::LoadMore)
    }

    /// Fetch one more page of older history across all sources.
    pub fn load_all(&self) -> Result<(), WallError> {
        self.send(WallCommand::LoadAll)
    }

    pub fn notify_visible(
        &self,
        index: MessageIndex,
        direction: ScrollDirection,
    ) -> Result<(), WallError> {
        self.send(WallCommand::NotifyVisible { index, direction })
    }

    /// Mark every message of the current view up to `older_than` as read.
    /// No-op unless read marking is enabled.
    pub fn mark_all_messages_read(&self, older_than: MessageIndex) -> Result<(), WallError> {
        self.send(WallCommand::MarkAllRead { older_than })
    }

    pub fn shutdown(&self) -> Result<(), WallError> {
        self.send(WallCommand::Shutdown)
    }

    /// Latest published view. `None` until the first load lands.
    pub fn history_view(&self) -> watch::Receiver<Option<HistoryUpdate>> {
        self.history.clone()
    }

    pub fn is_loading(&self) -> watch::Receiver<bool> {
        self.is_loading.clone()
    }

    pub fn loading_actions(&self) -> broadcast::Receiver<LoadingAction> {
        self.loading_actions.subscribe()
    }

    pub fn filter_predicate(&self) -> watch::Receiver<Arc<FilterPredicate>> {
        self.filter.clone()
    }
}

struct Publisher {
    history: watch::Sender<Option<HistoryUpdate>>,
    is_loading: watch::Sender<bool>,
    loading_actions: broadcast::Sender<LoadingAction>,
    filter: watch::Sender<Arc<FilterPredicate>>,
}

impl Publisher {
    fn history(&self, update: HistoryUpdate) {
        tracing::debug!(
            "wall: publishing {} entries ({:?})",
            update.view.len(),
            update.update_type
        );
        self.history.send_replace(Some(update));
    }

    fn set_loading(&self, loading: bool) {
        self.is_loading.send_if_modified(|current| {
            if *current == loading {
                false
            } else {
                *current = loading;
                true
            }
        });
    }

    fn action(&self, action: LoadingAction) {
        // No receivers is fine.
        let _ = self.loading_actions.send(action);
    }

    fn filter(&self, predicate: Arc<FilterPredicate>) {
        self.filter.send_replace(predicate);
    }
}

pub struct WallEngine {
    store: Arc<dyn WallStore>,
    config: WallConfig,

    commands: mpsc::UnboundedReceiver<WallCommand>,
    settings: watch::Receiver<WallSettings>,
    settings_open: bool,

    window_tx: mpsc::UnboundedSender<WindowEvent>,
    window_rx: mpsc::UnboundedReceiver<WindowEvent>,
    reload_tx: mpsc::UnboundedSender<ReloadEvent>,
    reload_rx: mpsc::UnboundedReceiver<ReloadEvent>,
    backfill_tx: mpsc::UnboundedSender<BackfillEvent>,
    backfill_rx: mpsc::UnboundedReceiver<BackfillEvent>,

    publisher: Publisher,
    filter: FilterPredicateManager,
    gate: ReadinessGate,
    anchors: AnchorTracker,
    loader: WindowedHistoryLoader,
    pagination: PaginationController,
    backfill: BackfillController,
    read_state: ReadStatePropagator,

    ready: bool,
    reload_pending: bool,
    load_all_pending: bool,
    reloading: bool,
    reload_generation: u64,
    reload_task: Option<JoinHandle<()>>,
}

impl WallEngine {
    pub fn new(
        store: Arc<dyn WallStore>,
        config: WallConfig,
        mut settings: watch::Receiver<WallSettings>,
    ) -> (Self, WallFeed) {
        let config = config.normalized();
        let initial = settings.borrow_and_update().clone();
        let filter = FilterPredicateManager::new(&initial);

        let (command_tx, commands) = mpsc::unbounded_channel();
        let (window_tx, window_rx) = mpsc::unbounded_channel();
        let (reload_tx, reload_rx) = mpsc::unbounded_channel();
        let (backfill_tx, backfill_rx) = mpsc::unbounded_channel();

        let (history_tx, history_rx) = watch::channel(None);
        let (loading_tx, loading_rx) = watch::channel(true);
        let (actions_tx, _) = broadcast::channel(64);
        let (filter_tx, filter_rx) = watch::channel(filter.predicate());

        let feed = WallFeed {
            commands: command_tx,
            history: history_rx,
            is_loading: loading_rx,
            loading_actions: actions_tx.clone(),
            filter: filter_rx,
        };

        let gate = ReadinessGate::new(
            store.clone(),
            filter.predicate().scopes(),
            config.readiness_timeout(),
        );
        let read_state = ReadStatePropagator::new(store.clone(), filter.mark_as_read());

        let engine = Self {
            store,
            config,
            commands,
            settings,
            settings_open: true,
            window_tx,
            window_rx,
            reload_tx,
            reload_rx,
            backfill_tx,
            backfill_rx,
            publisher: Publisher {
                history: history_tx,
                is_loading: loading_tx,
                loading_actions: actions_tx,
                filter: filter_tx,
            },
            filter,
            gate,
            anchors: AnchorTracker::new(),
            loader: WindowedHistoryLoader::new(),
            pagination: PaginationController::new(),
            backfill: BackfillController::new(),
            read_state,
            ready: false,
            // The first load happens on its own once the store is ready.
            reload_pending: true,
            load_all_pending: false,
            reloading: false,
            reload_generation: 0,
            reload_task: None,
        };
        (engine, feed)
    }

    pub async fn run(mut self) {
        tracing::info!(
            "wall: engine started (page {}, max {} sources)",
            self.config.page_size,
            self.config.max_sources
        );

        self.gate.start();
        let mut ready_rx = self.gate.subscribe();
        if *ready_rx.borrow_and_update() {
            self.on_ready();
        }

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(WallCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                Some(event) = self.window_rx.recv() => self.handle_window_event(event),
                Some(event) = self.reload_rx.recv() => self.handle_reload_event(event),
                Some(event) = self.backfill_rx.recv() => self.handle_backfill_event(event),
                changed = ready_rx.changed(), if !self.ready => {
                    if changed.is_ok() && *ready_rx.borrow_and_update() {
                        self.on_ready();
                    }
                }
                changed = self.settings.changed(), if self.settings_open => match changed {
                    Ok(()) => {
                        let settings = self.settings.borrow_and_update().clone();
                        self.apply_settings(&settings);
                    }
                    Err(_) => {
                        tracing::debug!("wall: settings source closed");
                        self.settings_open = false;
                    }
                },
            }
        }

        self.gate.stop();
        self.loader.cancel();
        if self.backfill.reset() {
            self.publisher.action(LoadingAction::Ended { load_all: true });
        }
        self.cancel_reload();
        tracing::info!("wall: engine stopped");
    }

    fn handle_command(&mut self, command: WallCommand) {
        match command {
            WallCommand::Reload => self.reload_data(),
            WallCommand::LoadMore => self.load_more(),
            WallCommand::LoadAll => self.load_all(),
            WallCommand::NotifyVisible { index, direction } => self.notify_visible(index, direction),
            WallCommand::MarkAllRead { older_than } => {
                if let Some(view) = self.loader.current() {
                    let writes = self.read_state.mark_all_messages_read(&view, older_than);
                    tracing::debug!("wall: marking read up to {} ({} sources)", older_than, writes);
                }
            }
            WallCommand::Shutdown => {}
        }
    }

    fn on_ready(&mut self) {
        self.ready = true;
        if self.reload_pending {
            self.reload_pending = false;
            self.begin_reload();
        }
    }

    fn apply_settings(&mut self, settings: &WallSettings) {
        let changed = self.filter.apply(settings);
        self.read_state.set_enabled(self.filter.mark_as_read());

        if let Some(predicate) = changed {
            self.publisher.filter(predicate);
            self.reload_data();
        }
    }

    // ===== Reload =====

    fn reload_data(&mut self) {
        if !self.ready {
            tracing::debug!("wall: store not ready, deferring reload");
            self.reload_pending = true;
            return;
        }
        self.begin_reload();
    }

    fn cancel_reload(&mut self) {
        if let Some(task) = self.reload_task.take() {
            task.abort();
        }
        self.reload_generation += 1;
    }

    fn begin_reload(&mut self) {
        self.cancel_reload();
        self.loader.cancel();
        self.pagination.reset();
        // Anchors left behind by load-all only make sense for paging backwards.
        if self.backfill.is_active() {
            self.anchors.clear();
        }
        if self.backfill.reset() {
            self.publisher.action(LoadingAction::Ended { load_all: true });
        }

        if !self.reloading {
            self.reloading = true;
            self.publisher.action(LoadingAction::Started { load_all: false });
        }
        self.publisher.set_loading(true);

        let store = self.store.clone();
        let predicate = self.filter.predicate();
        let max_sources = self.config.max_sources;
        let events = self.reload_tx.clone();
        let generation = self.reload_generation;

        self.reload_task = Some(tokio::spawn(async move {
            let result = collect_candidates(store.as_ref(), &predicate, max_sources).await;
            let _ = events.send(ReloadEvent::SourcesResolved { generation, result });
        }));
    }

    fn handle_reload_event(&mut self, event: ReloadEvent) {
        match event {
            ReloadEvent::SourcesResolved { generation, result } => {
                if generation != self.reload_generation {
                    return;
                }
                match result {
                    Err(e) => {
                        tracing::warn!("wall: failed to list sources: {}", e);
                        self.finish_reload();
                    }
                    Ok(sources) if sources.is_empty() => {
                        tracing::info!("wall: no sources match the filter");
                        self.anchors.clear();
                        if let Some(update) = self.loader.commit(MergedHistoryView::empty()) {
                            self.publisher.history(update);
                        }
                        self.finish_reload();
                    }
                    Ok(sources) if self.anchors.requires_fresh_window(&sources) => {
                        tracing::debug!("wall: {} sources, resolving boundaries", sources.len());
                        self.resolve_boundaries(generation, sources);
                    }
                    Ok(sources) => {
                        self.anchors.retain_sources(&sources);
                        self.query_window(WindowDirection::Forward);
                    }
                }
            }
            ReloadEvent::BoundariesResolved { generation, result } => {
                if generation != self.reload_generation {
                    return;
                }
                match result {
                    Err(e) => {
                        tracing::warn!("wall: failed to resolve read boundaries: {}", e);
                        self.finish_reload();
                    }
                    Ok(filter_before) => {
                        self.anchors.reset(filter_before);
                        self.query_window(WindowDirection::Forward);
                    }
                }
            }
        }
    }

    fn resolve_boundaries(&mut self, generation: u64, sources: BTreeSet<SourceId>) {
        let store = self.store.clone();
        let events = self.reload_tx.clone();

        self.reload_task = Some(tokio::spawn(async move {
            let result = read_boundaries(store.as_ref(), &sources).await;
            let _ = events.send(ReloadEvent::BoundariesResolved { generation, result });
        }));
    }

    /// Close the loading cycle of a reload and run a load-all that was
    /// requested while it was in progress.
    fn finish_reload(&mut self) {
        self.reload_task = None;
        self.publisher.set_loading(false);
        if self.reloading {
            self.reloading = false;
            self.publisher.action(LoadingAction::Ended { load_all: false });
        }
        if self.load_all_pending {
            self.load_all_pending = false;
            self.load_all();
        }
    }

    // ===== Window =====

    fn query_window(&mut self, direction: WindowDirection) {
        let request = self
            .anchors
            .window_request(direction, self.config.page_size, false);
        self.loader
            .query(self.store.clone(), request, self.window_tx.clone());
        self.publisher.set_loading(true);
    }

    fn handle_window_event(&mut self, event: WindowEvent) {
        match self.loader.accept(event) {
            None => {}
            Some(Err(e)) => {
                tracing::warn!("wall: window query failed: {}", e);
                self.loader.cancel();
                if self.reloading {
                    self.finish_reload();
                } else {
                    self.publisher.set_loading(false);
                }
            }
            Some(Ok(commit)) => {
                if let Some(update) = commit.update {
                    self.publisher.history(update);
                    // Re-emissions caused by our own read writes never get here.
                    if !commit.is_loading {
                        if let Some(view) = self.loader.current() {
                            self.read_state.check_and_mark_as_read_if_needed(&view);
                        }
                    }
                }
                if commit.is_loading {
                    self.publisher.set_loading(true);
                } else if self.reloading {
                    self.finish_reload();
                } else {
                    self.publisher.set_loading(false);
                }
            }
        }
    }

    // ===== Pagination =====

    fn notify_visible(&mut self, index: MessageIndex, direction: ScrollDirection) {
        if !self.ready || self.backfill.is_active() {
            return;
        }
        let Some(view) = self.loader.current() else {
            return;
        };
        if self.pagination.should_paginate(
            &view,
            index,
            direction,
            self.loader.is_in_flight(),
            self.config.page_size,
        ) {
            self.paginate(direction, &view);
        }
    }

    fn load_more(&mut self) {
        if !self.ready || self.backfill.is_active() || self.loader.is_in_flight() {
            return;
        }
        if let Some(view) = self.loader.current() {
            self.paginate(ScrollDirection::Down, &view);
        }
    }

    fn paginate(&mut self, direction: ScrollDirection, view: &MergedHistoryView) {
        let has_more = match direction {
            ScrollDirection::Up => view.hole_earlier,
            ScrollDirection::Down => view.hole_later,
        };
        if !has_more {
            return;
        }
        if self
            .anchors
            .recompute_for_pagination(direction, &view.entries, self.config.page_size)
            .is_some()
        {
            self.query_window(direction.query_direction());
        }
    }

    // ===== Load all =====

    fn load_all(&mut self) {
        if !self.ready || self.reloading {
            tracing::debug!("wall: load-all queued behind the pending load");
            self.load_all_pending = true;
            return;
        }
        if self.backfill.is_running() {
            tracing::debug!("wall: load-all already running");
            return;
        }

        self.publisher.action(LoadingAction::Started { load_all: true });
        let sources = self.anchors.sources();
        if self.backfill.state() == BackfillState::Done || sources.is_empty() {
            self.publisher.action(LoadingAction::Ended { load_all: true });
            return;
        }

        self.loader.cancel();
        self.publisher.set_loading(true);
        self.backfill
            .start(self.store.clone(), sources, self.backfill_tx.clone());
    }

    fn handle_backfill_event(&mut self, event: BackfillEvent) {
        if !self.backfill.is_current(event.generation()) {
            return;
        }

        match event {
            BackfillEvent::TopAnchors { result, .. } => match result {
                Err(e) => {
                    tracing::warn!("wall: load-all failed to fetch newest messages: {}", e);
                    self.end_backfill(false);
                }
                Ok(top) if top.is_empty() => {
                    self.backfill.set_top_anchors(top);
                    self.end_backfill(true);
                }
                Ok(top) => {
                    let (anchors, pivot) = if self.backfill.pages() == 0 {
                        (top.clone(), None)
                    } else {
                        (
                            self.anchors.current_anchors().clone(),
                            self.anchors.page_anchor(),
                        )
                    };
                    self.backfill.set_top_anchors(top);

                    let request = WindowRequest {
                        sources: anchors.keys().copied().collect(),
                        anchors,
                        lower_bound: AnchorMap::new(),
                        pivot,
                        direction: WindowDirection::Backward,
                        page_size: self.config.page_size,
                        clip_gaps: true,
                    };
                    self.backfill
                        .fetch_page(self.store.clone(), request, self.backfill_tx.clone());
                }
            },
            BackfillEvent::Page { result, .. } => match result {
                Err(e) => {
                    tracing::warn!("wall: load-all page failed: {}", e);
                    self.end_backfill(false);
                }
                Ok(snapshot) => {
                    let first_page = self.backfill.pages() == 0;
                    if let Some(outcome) = self.backfill.absorb_page(snapshot) {
                        if first_page {
                            let top = self.backfill.top_anchors().clone();
                            self.anchors.begin_backfill(&top);
                        }
                        self.anchors
                            .commit_backfill_page(outcome.anchors, outcome.page_anchor);
                        if let Some(update) = self.loader.commit(outcome.view) {
                            self.publisher.history(update);
                        }
                    }
                    self.end_backfill(true);
                }
            },
        }
    }

    fn end_backfill(&mut self, succeeded: bool) {
        if succeeded {
            let top = self.backfill.top_anchors().clone();
            self.read_state.apply(top);
            if self.backfill.state() != BackfillState::Done {
                self.backfill.fail();
            }
        } else {
            self.backfill.fail();
        }
        self.publisher.set_loading(false);
        self.publisher.action(LoadingAction::Ended { load_all: true });
    }
}

/// Union of the sources of every scope the filter covers, capped at
/// `max_sources` in id order.
async fn collect_candidates(
    store: &dyn WallStore,
    predicate: &FilterPredicate,
    max_sources: usize,
) -> Result<BTreeSet<SourceId>, StoreError> {
    let mut sources = BTreeSet::new();
    for scope in predicate.scopes() {
        sources.extend(store.list_sources(scope, predicate.clone()).await?);
    }
    if sources.len() > max_sources {
        tracing::warn!(
            "wall: {} sources match, keeping the first {}",
            sources.len(),
            max_sources
        );
        sources = sources.into_iter().take(max_sources).collect();
    }
    Ok(sources)
}

/// Exclusive floor per source: read position, else newest message.
async fn read_boundaries(
    store: &dyn WallStore,
    sources: &BTreeSet<SourceId>,
) -> Result<AnchorMap, StoreError> {
    let max_read = store.max_read_index(sources.clone()).await?;
    let unread: BTreeSet<SourceId> = sources
        .iter()
        .filter(|source| !max_read.contains_key(source))
        .copied()
        .collect();
    let top = if unread.is_empty() {
        AnchorMap::new()
    } else {
        store.top_index(unread, Namespace::CLOUD).await?
    };
    Ok(AnchorTracker::resolve_filter_before(sources, &max_read, &top))
}
