//! Contract of the per-chat message store the wall reads from.
//!
//! The store owns persistence and network backfill. The wall only issues
//! windowed range queries against it and writes read positions back.

pub mod memory;

use std::collections::BTreeSet;

use futures::future::BoxFuture;
use futures::stream::BoxStream;

use crate::filter::FilterPredicate;
use crate::models::{AnchorMap, HistoryEntry, MessageIndex, Namespace, SourceId};

pub use memory::{MemoryStore, SourceRecord};

#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Unknown source: {0}")]
    UnknownSource(SourceId),

    #[error("Store closed")]
    Closed,
}

/// Chat-list group a source lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GroupScope {
    Root,
    Archive,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WindowDirection {
    /// From the anchors towards newer messages.
    Forward,
    /// From the anchors towards older messages.
    Backward,
}

/// One windowed merge query over a set of sources.
#[derive(Clone, Debug, PartialEq)]
pub struct WindowRequest {
    pub sources: BTreeSet<SourceId>,
    pub anchors: AnchorMap,
    /// Exclusive per-source floor; messages at or below it are never returned.
    pub lower_bound: AnchorMap,
    /// Inclusive global bound in the direction opposite to travel.
    pub pivot: Option<MessageIndex>,
    pub direction: WindowDirection,
    pub page_size: usize,
    /// Omit sources that still have unfetched gaps instead of reporting loading.
    pub clip_gaps: bool,
}

/// One emission of a windowed merge subscription.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WindowSnapshot {
    pub entries: Vec<HistoryEntry>,
    pub hole_earlier: bool,
    pub hole_later: bool,
    pub is_loading: bool,
}

pub trait WallStore: Send + Sync + 'static {
    /// Sources in `scope` matching `filter`.
    fn list_sources(
        &self,
        scope: GroupScope,
        filter: FilterPredicate,
    ) -> BoxFuture<'_, Result<BTreeSet<SourceId>, StoreError>>;

    /// Read position per source, across all namespaces.
    fn max_read_index(
        &self,
        sources: BTreeSet<SourceId>,
    ) -> BoxFuture<'_, Result<AnchorMap, StoreError>>;

    /// Newest message per source in `namespace`. Empty sources are omitted.
    fn top_index(
        &self,
        sources: BTreeSet<SourceId>,
        namespace: Namespace,
    ) -> BoxFuture<'_, Result<AnchorMap, StoreError>>;

    fn has_unfetched_gaps(&self, scope: GroupScope) -> BoxFuture<'_, Result<bool, StoreError>>;

    /// Live windowed merge. Re-emits whenever the underlying histories change.
    fn windowed_merge(
        &self,
        request: WindowRequest,
    ) -> BoxStream<'static, Result<WindowSnapshot, StoreError>>;

    fn apply_read_position(
        &self,
        source: SourceId,
        up_to: MessageIndex,
    ) -> BoxFuture<'_, Result<(), StoreError>>;
}
