use std::collections::BTreeSet;
use std::sync::Arc;

use crate::models::{SourceCategory, SourceId, SourceKind, WallSettings};
use crate::store::GroupScope;

/// Which sources participate in the wall. Rebuilt on every settings change,
/// never mutated; consumers compare `Arc` identity to skip re-filtering.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilterPredicate {
    pub category: SourceCategory,
    pub excluded: BTreeSet<SourceId>,
    pub include_archived: bool,
}

impl Default for FilterPredicate {
    fn default() -> Self {
        Self::from_settings(&WallSettings::default())
    }
}

impl FilterPredicate {
    pub fn from_settings(settings: &WallSettings) -> Self {
        Self {
            category: settings.category,
            excluded: settings.excluded_channels.clone(),
            include_archived: settings.show_archived_channels,
        }
    }

    pub fn matches(&self, id: SourceId, kind: SourceKind, archived: bool) -> bool {
        self.category.admits(kind)
            && !self.excluded.contains(&id)
            && (self.include_archived || !archived)
    }

    /// Chat-list groups the candidate sources are collected from.
    pub fn scopes(&self) -> Vec<GroupScope> {
        if self.include_archived {
            vec![GroupScope::Root, GroupScope::Archive]
        } else {
            vec![GroupScope::Root]
        }
    }
}

/// Turns settings snapshots into `FilterPredicate` values.
#[derive(Debug)]
pub struct FilterPredicateManager {
    predicate: Arc<FilterPredicate>,
    mark_as_read: bool,
}

impl FilterPredicateManager {
    pub fn new(settings: &WallSettings) -> Self {
        Self {
            predicate: Arc::new(FilterPredicate::from_settings(settings)),
            mark_as_read: settings.mark_as_read,
        }
    }

    pub fn predicate(&self) -> Arc<FilterPredicate> {
        self.predicate.clone()
    }

    pub fn mark_as_read(&self) -> bool {
        self.mark_as_read
    }

    /// Apply a settings snapshot. Returns the new predicate when the filtered
    /// source set may have changed, `None` otherwise.
    pub fn apply(&mut self, settings: &WallSettings) -> Option<Arc<FilterPredicate>> {
        self.mark_as_read = settings.mark_as_read;

        let candidate = FilterPredicate::from_settings(settings);
        if candidate == *self.predicate {
            return None;
        }

        tracing::info!(
            "filter predicate changed: category={:?} excluded={} include_archived={}",
            candidate.category,
            candidate.excluded.len(),
            candidate.include_archived
        );
        self.predicate = Arc::new(candidate);
        Some(self.predicate.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_predicate_is_channels_with_archive() {
        let predicate = FilterPredicate::default();
        assert_eq!(predicate.category, SourceCategory::Channels);
        assert!(predicate.excluded.is_empty());
        assert!(predicate.include_archived);
        assert_eq!(predicate.scopes(), vec![GroupScope::Root, GroupScope::Archive]);
    }

    #[test]
    fn test_matches_respects_exclusions_and_archive() {
        let mut settings = WallSettings::default();
        settings.excluded_channels.insert(SourceId(2));
        settings.show_archived_channels = false;
        let predicate = FilterPredicate::from_settings(&settings);

        assert!(predicate.matches(SourceId(1), SourceKind::Channel, false));
        assert!(!predicate.matches(SourceId(2), SourceKind::Channel, false));
        assert!(!predicate.matches(SourceId(3), SourceKind::Channel, true));
        assert!(!predicate.matches(SourceId(4), SourceKind::Group, false));
        assert_eq!(predicate.scopes(), vec![GroupScope::Root]);
    }

    #[test]
    fn test_manager_skips_unchanged_settings() {
        let settings = WallSettings::default();
        let mut manager = FilterPredicateManager::new(&settings);
        let before = manager.predicate();

        assert!(manager.apply(&settings).is_none());
        assert!(Arc::ptr_eq(&before, &manager.predicate()));
    }

    #[test]
    fn test_manager_mark_as_read_does_not_rebuild_predicate() {
        let mut settings = WallSettings::default();
        let mut manager = FilterPredicateManager::new(&settings);

        settings.mark_as_read = true;
        assert!(manager.apply(&settings).is_none());
        assert!(manager.mark_as_read());
    }

    #[test]
    fn test_manager_rebuilds_on_exclusion_change() {
        let mut settings = WallSettings::default();
        let mut manager = FilterPredicateManager::new(&settings);
        let before = manager.predicate();

        settings.excluded_channels.insert(SourceId(7));
        let updated = manager.apply(&settings).expect("predicate should change");
        assert!(!Arc::ptr_eq(&before, &updated));
        assert!(updated.excluded.contains(&SourceId(7)));
    }
}
