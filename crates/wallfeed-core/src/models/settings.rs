use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::message::SourceId;

/// Kind of chat a source is; the wall normally shows channels only.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceCategory {
    #[default]
    Channels,
    Groups,
    All,
}

impl SourceCategory {
    pub fn admits(self, kind: SourceKind) -> bool {
        match self {
            Self::Channels => kind == SourceKind::Channel,
            Self::Groups => kind == SourceKind::Group,
            Self::All => true,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Channel,
    Group,
}

/// User-facing wall settings. Every field is optional when decoding.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WallSettings {
    pub mark_as_read: bool,
    pub show_archived_channels: bool,
    pub excluded_channels: BTreeSet<SourceId>,
    pub category: SourceCategory,
}

impl Default for WallSettings {
    fn default() -> Self {
        Self {
            mark_as_read: false,
            show_archived_channels: true,
            excluded_channels: BTreeSet::new(),
            category: SourceCategory::Channels,
        }
    }
}

impl WallSettings {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_settings_minimal() {
        let settings = WallSettings::from_json("{}").unwrap();
        assert_eq!(settings, WallSettings::default());
        assert!(settings.show_archived_channels);
        assert!(!settings.mark_as_read);
    }

    #[test]
    fn test_parse_settings_full() {
        let json = r#"{
            "markAsRead": true,
            "showArchivedChannels": false,
            "excludedChannels": [3, 1],
            "category": "groups"
        }"#;
        let settings = WallSettings::from_json(json).unwrap();
        assert!(settings.mark_as_read);
        assert!(!settings.show_archived_channels);
        assert_eq!(
            settings.excluded_channels.into_iter().collect::<Vec<_>>(),
            vec![SourceId(1), SourceId(3)]
        );
        assert_eq!(settings.category, SourceCategory::Groups);
    }

    #[test]
    fn test_category_admits() {
        assert!(SourceCategory::Channels.admits(SourceKind::Channel));
        assert!(!SourceCategory::Channels.admits(SourceKind::Group));
        assert!(SourceCategory::All.admits(SourceKind::Group));
    }
}
