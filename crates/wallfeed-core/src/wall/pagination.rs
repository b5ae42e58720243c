use crate::models::{MergedHistoryView, MessageIndex};

use super::anchors::ScrollDirection;

/// Decides from visibility callbacks when the window should slide.
#[derive(Debug, Default)]
pub struct PaginationController {
    last_processed: Option<MessageIndex>,
}

impl PaginationController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.last_processed = None;
    }

    /// Returns true when `index` becoming visible while scrolling in
    /// `direction` should trigger a re-anchor and a new query.
    ///
    /// Only indices within half a page of the edge being approached count,
    /// so small scroll deltas around the middle never re-query.
    pub fn should_paginate(
        &mut self,
        view: &MergedHistoryView,
        index: MessageIndex,
        direction: ScrollDirection,
        in_flight: bool,
        page_size: usize,
    ) -> bool {
        if view.is_empty() || in_flight || self.last_processed == Some(index) {
            return false;
        }
        self.last_processed = Some(index);

        let Some(position) = view.position(&index) else {
            return false;
        };

        let half = (page_size / 2).max(1);
        match direction {
            ScrollDirection::Up => position < half,
            ScrollDirection::Down => view.len() - 1 - position < half,
        }
    }
}
