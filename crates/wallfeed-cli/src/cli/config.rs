use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use wallfeed_core::{WallConfig, WallSettings};

/// CLI configuration that can be loaded from a JSON file
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct CliConfig {
    /// Engine tuning (page size, readiness poll interval, source cap)
    pub wall: WallConfig,

    /// User-facing wall settings
    pub settings: WallSettings,

    /// Fixture with sources and messages to load into the in-memory store
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fixture: Option<PathBuf>,
}

impl CliConfig {
    /// Load config from a JSON file. A relative `fixture` path is resolved
    /// against the config file's directory.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let mut config = Self::from_json(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        if let (Some(fixture), Some(dir)) = (config.fixture.as_mut(), path.parent()) {
            if fixture.is_relative() {
                *fixture = dir.join(&*fixture);
            }
        }
        Ok(config)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to deserialize config")
    }

    /// `<config dir>/wallfeed/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("wallfeed").join("config.json"))
    }

    /// Load the default config file if there is one.
    pub fn load_default() -> Result<Option<Self>> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path).map(Some),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_config_minimal() {
        let config = CliConfig::from_json("{}").unwrap();
        assert_eq!(config.wall, WallConfig::default());
        assert_eq!(config.settings, WallSettings::default());
        assert!(config.fixture.is_none());
    }

    #[test]
    fn test_parse_config_with_settings() {
        let json = r#"{
            "wall": { "pageSize": 4 },
            "settings": { "markAsRead": true, "excludedChannels": [2] }
        }"#;
        let config = CliConfig::from_json(json).unwrap();
        assert_eq!(config.wall.page_size, 4);
        assert!(config.settings.mark_as_read);
        assert_eq!(config.settings.excluded_channels.len(), 1);
    }

    #[test]
    fn test_load_resolves_fixture_next_to_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(file, r#"{{"fixture": "feed.json"}}"#).unwrap();

        let config = CliConfig::load(&path).unwrap();
        assert_eq!(config.fixture, Some(dir.path().join("feed.json")));
    }

    #[test]
    fn test_load_reports_bad_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        let err = CliConfig::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }
}
