use std::sync::Arc;

use crate::models::{AnchorMap, HistoryEntry, MergedHistoryView, MessageIndex};
use crate::store::WallStore;

/// Per-source maximum index among entries at or before `threshold`'s timestamp.
pub fn max_read_before(entries: &[HistoryEntry], threshold: MessageIndex) -> AnchorMap {
    let mut positions = AnchorMap::new();
    for index in entries.iter().map(HistoryEntry::index) {
        if index.timestamp > threshold.timestamp {
            continue;
        }
        positions
            .entry(index.source_id)
            .and_modify(|current| *current = (*current).max(index))
            .or_insert(index);
    }
    positions
}

/// Read positions implied by the user seeing `view`, if any.
///
/// A single entry is always considered seen. Several entries are only when,
/// scanning from the newest, they all belong to one album; a window mixing
/// groups may be a swipe-through and stays unread.
pub fn seen_positions(view: &MergedHistoryView) -> Option<AnchorMap> {
    let newest = view.newest()?;
    if view.len() > 1 {
        let group = newest.message.group_key?;
        let single_group = view
            .entries
            .iter()
            .rev()
            .all(|entry| entry.message.group_key == Some(group));
        if !single_group {
            return None;
        }
    }
    Some(max_read_before(&view.entries, newest.index()))
}

/// Writes read positions back to the store when read marking is enabled.
/// Writes are fire-and-forget.
pub struct ReadStatePropagator {
    store: Arc<dyn WallStore>,
    enabled: bool,
}

impl ReadStatePropagator {
    pub fn new(store: Arc<dyn WallStore>, enabled: bool) -> Self {
        Self { store, enabled }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Bulk policy: everything in `view` up to `threshold` becomes read.
    pub fn mark_all_messages_read(&self, view: &MergedHistoryView, older_than: MessageIndex) -> usize {
        self.apply(max_read_before(&view.entries, older_than))
    }

    /// Opportunistic policy for views the user is looking at right now.
    pub fn check_and_mark_as_read_if_needed(&self, view: &MergedHistoryView) -> usize {
        match seen_positions(view) {
            Some(positions) => self.apply(positions),
            None => 0,
        }
    }

    /// Returns the number of writes issued.
    pub fn apply(&self, positions: AnchorMap) -> usize {
        if !self.enabled || positions.is_empty() {
            return 0;
        }

        let count = positions.len();
        for (source, up_to) in positions {
            let store = self.store.clone();
            tokio::spawn(async move {
                if let Err(e) = store.apply_read_position(source, up_to).await {
                    tracing::warn!("wall: failed to mark {} read up to {}: {}", source, up_to, e);
                }
            });
        }
        count
    }
}
