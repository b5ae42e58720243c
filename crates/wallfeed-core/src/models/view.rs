use std::collections::HashSet;
use std::sync::Arc;

use super::message::{HistoryEntry, MessageIndex};

/// Hint for consumers about how a new view relates to the previous one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateType {
    Initial,
    Generic,
    FillHole,
}

/// Immutable snapshot of the merged feed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MergedHistoryView {
    pub entries: Vec<HistoryEntry>,
    pub hole_earlier: bool,
    pub hole_later: bool,
    pub is_loading: bool,
}

impl MergedHistoryView {
    pub fn new(entries: Vec<HistoryEntry>, hole_earlier: bool, hole_later: bool) -> Self {
        Self {
            entries,
            hole_earlier,
            hole_later,
            is_loading: false,
        }
    }

    /// The view published when no source matches the filter.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn position(&self, index: &MessageIndex) -> Option<usize> {
        self.entries
            .binary_search_by(|entry| entry.index().cmp(index))
            .ok()
    }

    /// Entries are non-decreasing by `MessageIndex`.
    pub fn is_ordered(&self) -> bool {
        self.entries
            .windows(2)
            .all(|pair| pair[0].index() <= pair[1].index())
    }

    pub fn newest(&self) -> Option<&HistoryEntry> {
        self.entries.last()
    }

    /// Structural equality used to suppress redundant republishing. Hole
    /// flags and the loading flag are not part of it.
    pub fn renders_same_as(&self, other: &MergedHistoryView) -> bool {
        self.entries.len() == other.entries.len()
            && self
                .entries
                .iter()
                .zip(&other.entries)
                .all(|(a, b)| a.renders_same_as(b))
    }
}

/// A published view together with its update hint.
#[derive(Clone, Debug)]
pub struct HistoryUpdate {
    pub view: Arc<MergedHistoryView>,
    pub update_type: UpdateType,
}

/// Classify `next` relative to `previous`.
///
/// A view that keeps every previously shown message (in the same relative
/// order, which the index ordering guarantees) and adds more is a filled hole;
/// anything else is a generic replacement.
pub fn classify_update(previous: Option<&MergedHistoryView>, next: &MergedHistoryView) -> UpdateType {
    let previous = match previous {
        Some(previous) if !previous.is_empty() => previous,
        _ => return UpdateType::Initial,
    };

    let next_ids: HashSet<MessageIndex> = next.entries.iter().map(HistoryEntry::index).collect();
    let kept_all = previous
        .entries
        .iter()
        .all(|entry| next_ids.contains(&entry.index()));

    if kept_all && next.len() > previous.len() {
        UpdateType::FillHole
    } else {
        UpdateType::Generic
    }
}
