//! Per-source boundaries of the active query window.

use std::collections::BTreeSet;

use crate::models::{AnchorMap, HistoryEntry, MessageIndex, SourceId};
use crate::store::{WindowDirection, WindowRequest};

/// Scroll direction reported by the hosting surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScrollDirection {
    /// Towards older messages.
    Up,
    /// Towards newer messages.
    Down,
}

impl ScrollDirection {
    /// Direction of the query that extends the window past the scrolled-to edge.
    pub fn query_direction(self) -> WindowDirection {
        match self {
            Self::Up => WindowDirection::Backward,
            Self::Down => WindowDirection::Forward,
        }
    }
}

#[derive(Debug, Default)]
pub struct AnchorTracker {
    filter_before: AnchorMap,
    current_anchors: AnchorMap,
    page_anchor: Option<MessageIndex>,
}

impl AnchorTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter_before(&self) -> &AnchorMap {
        &self.filter_before
    }

    pub fn current_anchors(&self) -> &AnchorMap {
        &self.current_anchors
    }

    pub fn page_anchor(&self) -> Option<MessageIndex> {
        self.page_anchor
    }

    pub fn sources(&self) -> BTreeSet<SourceId> {
        self.current_anchors.keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.current_anchors.is_empty()
    }

    /// Whether `candidates` can reuse the current window.
    ///
    /// A source missing from `current_anchors` would leave the merge without
    /// an anchor for it, so any newcomer forces a fresh window.
    pub fn requires_fresh_window(&self, candidates: &BTreeSet<SourceId>) -> bool {
        self.current_anchors.is_empty()
            || candidates
                .iter()
                .any(|source| !self.current_anchors.contains_key(source))
    }

    /// Per-source floor: the read position when known, the newest message
    /// otherwise, and the very beginning for sources with neither.
    pub fn resolve_filter_before(
        candidates: &BTreeSet<SourceId>,
        max_read: &AnchorMap,
        top: &AnchorMap,
    ) -> AnchorMap {
        candidates
            .iter()
            .map(|&source| {
                let boundary = max_read
                    .get(&source)
                    .or_else(|| top.get(&source))
                    .copied()
                    .unwrap_or_else(|| MessageIndex::lower_bound(source, 0));
                (source, boundary)
            })
            .collect()
    }

    /// Start a new load cycle anchored on `filter_before`.
    pub fn reset(&mut self, filter_before: AnchorMap) {
        self.current_anchors = filter_before.clone();
        self.filter_before = filter_before;
        self.page_anchor = None;
    }

    /// Drop sources that no longer match the filter.
    pub fn retain_sources(&mut self, candidates: &BTreeSet<SourceId>) {
        self.filter_before.retain(|source, _| candidates.contains(source));
        self.current_anchors.retain(|source, _| candidates.contains(source));
    }

    pub fn clear(&mut self) {
        self.filter_before.clear();
        self.current_anchors.clear();
        self.page_anchor = None;
    }

    /// Start walking backwards from each source's newest message.
    pub fn begin_backfill(&mut self, top_anchors: &AnchorMap) {
        self.current_anchors = top_anchors.clone();
        self.page_anchor = None;
    }

    pub fn commit_backfill_page(&mut self, anchors: AnchorMap, page_anchor: MessageIndex) {
        self.current_anchors.extend(anchors);
        self.page_anchor = Some(page_anchor);
    }

    /// Re-center the anchors on the part of `entries` the user scrolled to.
    ///
    /// Picks a center entry half a page in from the scrolled-to edge, then
    /// anchors every known source on its own entry nearest to the center's
    /// timestamp. Sources without entries in the window get a placeholder at
    /// that timestamp. Returns the center entry.
    ///
    /// When the center is the window's own edge (single-entry pages) the
    /// pivot steps past it, otherwise the query would return the same page.
    pub fn recompute_for_pagination(
        &mut self,
        direction: ScrollDirection,
        entries: &[HistoryEntry],
        page_size: usize,
    ) -> Option<MessageIndex> {
        if entries.is_empty() {
            return None;
        }

        let half = (page_size / 2).max(1);
        let last = entries.len() - 1;
        let offset = match direction {
            ScrollDirection::Down => entries.len().saturating_sub(half),
            ScrollDirection::Up => half - 1,
        }
        .min(last);
        let center = entries[offset].index();
        let pivot = match direction {
            ScrollDirection::Down if offset == 0 => center.successor(),
            ScrollDirection::Up if offset == last => center.predecessor(),
            _ => center,
        };

        let mut sources = self.sources();
        sources.extend(entries.iter().map(|entry| entry.index().source_id));

        let anchors: AnchorMap = sources
            .into_iter()
            .map(|source| {
                let anchor = nearest_entry(entries, source, center.timestamp).unwrap_or_else(|| {
                    match direction {
                        ScrollDirection::Down => MessageIndex::lower_bound(source, center.timestamp),
                        ScrollDirection::Up => MessageIndex::upper_bound(source, center.timestamp),
                    }
                });
                (source, anchor)
            })
            .collect();

        tracing::debug!(
            "wall: re-anchored {} sources around {} ({:?})",
            anchors.len(),
            center,
            direction
        );
        self.current_anchors = anchors;
        self.page_anchor = Some(pivot);
        Some(center)
    }

    pub fn window_request(
        &self,
        direction: WindowDirection,
        page_size: usize,
        clip_gaps: bool,
    ) -> WindowRequest {
        WindowRequest {
            sources: self.sources(),
            anchors: self.current_anchors.clone(),
            lower_bound: self.filter_before.clone(),
            pivot: self.page_anchor,
            direction,
            page_size,
            clip_gaps,
        }
    }
}

/// Entry of `source` whose timestamp is closest to `timestamp`; ties go to
/// the older entry.
fn nearest_entry(entries: &[HistoryEntry], source: SourceId, timestamp: i32) -> Option<MessageIndex> {
    entries
        .iter()
        .map(HistoryEntry::index)
        .filter(|index| index.source_id == source)
        .min_by_key(|index| (index.timestamp.abs_diff(timestamp), *index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Message, MessageId, Namespace};
    use std::sync::Arc;

    fn idx(source: i64, id: i32, timestamp: i32) -> MessageIndex {
        MessageIndex::new(SourceId(source), Namespace::CLOUD, MessageId(id), timestamp)
    }

    fn entries(indices: &[MessageIndex]) -> Vec<HistoryEntry> {
        indices
            .iter()
            .map(|&index| HistoryEntry::new(Arc::new(Message::new(index, ""))))
            .collect()
    }

    fn set(ids: &[i64]) -> BTreeSet<SourceId> {
        ids.iter().map(|&id| SourceId(id)).collect()
    }

    fn first_window() -> Vec<HistoryEntry> {
        entries(&[idx(1, 1, 10), idx(2, 1, 15), idx(1, 2, 20), idx(2, 2, 25)])
    }

    #[test]
    fn test_new_source_requires_fresh_window() {
        let mut tracker = AnchorTracker::new();
        assert!(tracker.requires_fresh_window(&set(&[1, 2])));

        tracker.reset([(SourceId(1), idx(1, 0, 0)), (SourceId(2), idx(2, 0, 0))].into());
        assert!(!tracker.requires_fresh_window(&set(&[1, 2])));
        assert!(!tracker.requires_fresh_window(&set(&[1])));
        assert!(tracker.requires_fresh_window(&set(&[1, 2, 3])));
    }

    #[test]
    fn test_resolve_filter_before_prefers_read_position() {
        let max_read: AnchorMap = [(SourceId(1), idx(1, 2, 20))].into();
        let top: AnchorMap = [(SourceId(1), idx(1, 3, 30)), (SourceId(2), idx(2, 2, 25))].into();
        let resolved = AnchorTracker::resolve_filter_before(&set(&[1, 2, 3]), &max_read, &top);

        assert_eq!(resolved[&SourceId(1)], idx(1, 2, 20));
        assert_eq!(resolved[&SourceId(2)], idx(2, 2, 25));
        assert_eq!(resolved[&SourceId(3)], MessageIndex::lower_bound(SourceId(3), 0));
    }

    #[test]
    fn test_scroll_down_centers_near_bottom() {
        let mut tracker = AnchorTracker::new();
        tracker.reset(
            [
                (SourceId(1), MessageIndex::lower_bound(SourceId(1), 0)),
                (SourceId(2), MessageIndex::lower_bound(SourceId(2), 0)),
            ]
            .into(),
        );

        let center = tracker.recompute_for_pagination(ScrollDirection::Down, &first_window(), 4);
        assert_eq!(center, Some(idx(1, 2, 20)));
        assert_eq!(tracker.page_anchor(), Some(idx(1, 2, 20)));

        let anchors = tracker.current_anchors();
        assert_eq!(anchors[&SourceId(1)], idx(1, 2, 20));
        // 15 and 25 are equally close to 20; the older one wins.
        assert_eq!(anchors[&SourceId(2)], idx(2, 1, 15));
    }

    #[test]
    fn test_scroll_up_centers_near_top() {
        let mut tracker = AnchorTracker::new();
        let center = tracker.recompute_for_pagination(ScrollDirection::Up, &first_window(), 4);
        assert_eq!(center, Some(idx(2, 1, 15)));
    }

    #[test]
    fn test_anchors_come_from_own_source_or_placeholder() {
        let mut tracker = AnchorTracker::new();
        tracker.reset(
            [
                (SourceId(1), idx(1, 0, 0)),
                (SourceId(2), idx(2, 0, 0)),
                (SourceId(3), idx(3, 0, 0)),
            ]
            .into(),
        );

        tracker.recompute_for_pagination(ScrollDirection::Down, &first_window(), 4);

        for (source, anchor) in tracker.current_anchors() {
            assert_eq!(anchor.source_id, *source);
        }
        let placeholder = tracker.current_anchors()[&SourceId(3)];
        assert!(placeholder.is_placeholder());
        assert_eq!(placeholder.timestamp, 20);
    }

    #[test]
    fn test_scroll_up_anchors_missing_sources_above_center() {
        let mut tracker = AnchorTracker::new();
        tracker.reset(
            [
                (SourceId(1), idx(1, 0, 0)),
                (SourceId(2), idx(2, 0, 0)),
                (SourceId(3), idx(3, 0, 0)),
            ]
            .into(),
        );

        tracker.recompute_for_pagination(ScrollDirection::Up, &first_window(), 4);
        assert_eq!(
            tracker.current_anchors()[&SourceId(3)],
            MessageIndex::upper_bound(SourceId(3), 15)
        );
        assert_eq!(tracker.page_anchor(), Some(idx(2, 1, 15)));
    }

    #[test]
    fn test_single_entry_page_pivots_past_the_edge() {
        let mut tracker = AnchorTracker::new();
        let page = entries(&[idx(1, 2, 20)]);

        let center = tracker.recompute_for_pagination(ScrollDirection::Down, &page, 1);
        assert_eq!(center, Some(idx(1, 2, 20)));
        assert_eq!(tracker.page_anchor(), Some(idx(1, 3, 20)));

        tracker.recompute_for_pagination(ScrollDirection::Up, &page, 1);
        assert_eq!(tracker.page_anchor(), Some(idx(1, 1, 20)));
        assert_eq!(tracker.current_anchors()[&SourceId(1)], idx(1, 2, 20));
    }

    #[test]
    fn test_recompute_keeps_filter_before() {
        let mut tracker = AnchorTracker::new();
        let floor: AnchorMap = [(SourceId(1), idx(1, 0, 0)), (SourceId(2), idx(2, 0, 0))].into();
        tracker.reset(floor.clone());
        tracker.recompute_for_pagination(ScrollDirection::Down, &first_window(), 4);

        let request = tracker.window_request(WindowDirection::Forward, 4, false);
        assert_eq!(request.lower_bound, floor);
        assert_eq!(request.pivot, Some(idx(1, 2, 20)));
        assert_eq!(request.sources, set(&[1, 2]));
    }

    #[test]
    fn test_recompute_on_empty_window_is_noop() {
        let mut tracker = AnchorTracker::new();
        assert_eq!(tracker.recompute_for_pagination(ScrollDirection::Down, &[], 4), None);
        assert!(tracker.page_anchor().is_none());
    }

    #[test]
    fn test_retain_sources_drops_removed() {
        let mut tracker = AnchorTracker::new();
        tracker.reset([(SourceId(1), idx(1, 0, 0)), (SourceId(2), idx(2, 0, 0))].into());
        tracker.retain_sources(&set(&[2]));
        assert_eq!(tracker.sources(), set(&[2]));
        assert_eq!(tracker.filter_before().len(), 1);
    }
}
