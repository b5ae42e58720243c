//! JSON description of sources and their histories, loaded into a
//! `MemoryStore`.

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use wallfeed_core::models::{Message, MessageId, MessageIndex, Namespace, SourceId, SourceKind};
use wallfeed_core::store::{MemoryStore, SourceRecord};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Fixture {
    pub sources: Vec<FixtureSource>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixtureSource {
    pub id: i64,
    pub title: String,
    #[serde(default = "default_kind")]
    pub kind: SourceKind,
    #[serde(default)]
    pub archived: bool,
    /// Id of the newest read message.
    #[serde(default)]
    pub read_up_to: Option<i32>,
    #[serde(default)]
    pub pending_gap: bool,
    #[serde(default)]
    pub messages: Vec<FixtureMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixtureMessage {
    pub id: i32,
    /// Unix seconds.
    pub timestamp: i32,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub group_key: Option<i64>,
    #[serde(default)]
    pub local: bool,
}

fn default_kind() -> SourceKind {
    SourceKind::Channel
}

impl Fixture {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read fixture: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse fixture: {}", path.display()))
    }

    /// Two channels with interleaved posts, used when no fixture is given.
    pub fn demo() -> Self {
        let message = |id, timestamp, text: &str| FixtureMessage {
            id,
            timestamp,
            text: text.to_string(),
            group_key: None,
            local: false,
        };
        let source = |id, title: &str, messages| FixtureSource {
            id,
            title: title.to_string(),
            kind: SourceKind::Channel,
            archived: false,
            read_up_to: None,
            pending_gap: false,
            messages,
        };
        let day = 86_400;
        let base = 1_700_000_000;

        Self {
            sources: vec![
                source(
                    1,
                    "Release notes",
                    (1..=6)
                        .map(|id| message(id, base + id * day, &format!("Release 1.{}", id)))
                        .collect(),
                ),
                source(
                    2,
                    "Status page",
                    (1..=5)
                        .map(|id| message(id, base + id * day + day / 2, &format!("Incident #{}", id)))
                        .collect(),
                ),
            ],
        }
    }

    pub fn into_store(self) -> Result<MemoryStore> {
        let store = MemoryStore::new();
        for source in self.sources {
            let source_id = SourceId(source.id);
            let messages: Vec<Message> = source
                .messages
                .iter()
                .map(|message| {
                    let namespace = if message.local { Namespace::LOCAL } else { Namespace::CLOUD };
                    let index = MessageIndex::new(source_id, namespace, MessageId(message.id), message.timestamp);
                    let built = Message::new(index, message.text.clone());
                    match message.group_key {
                        Some(group) => built.with_group_key(group),
                        None => built,
                    }
                })
                .collect();

            let read_up_to = match source.read_up_to {
                Some(id) => match messages.iter().find(|message| message.id() == MessageId(id)) {
                    Some(message) => Some(message.index),
                    None => bail!("source {} has no message {} to mark read", source.id, id),
                },
                None => None,
            };

            let mut record = SourceRecord::new(source_id, source.title, source.kind)
                .archived(source.archived)
                .with_messages(messages);
            record.read_up_to = read_up_to;
            record.pending_gap = source.pending_gap;
            store.insert_source(record);
        }
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fixture_defaults() {
        let json = r#"{"sources": [{"id": 7, "title": "News", "messages": [{"id": 1, "timestamp": 10}]}]}"#;
        let fixture: Fixture = serde_json::from_str(json).unwrap();
        let source = &fixture.sources[0];
        assert_eq!(source.kind, SourceKind::Channel);
        assert!(!source.archived);
        assert_eq!(source.messages[0].text, "");
    }

    #[test]
    fn test_into_store_resolves_read_position() {
        let json = r#"{"sources": [{
            "id": 1, "title": "A", "readUpTo": 2,
            "messages": [{"id": 1, "timestamp": 10}, {"id": 2, "timestamp": 20}]
        }]}"#;
        let store = serde_json::from_str::<Fixture>(json).unwrap().into_store().unwrap();
        let read = store.read_position(SourceId(1)).unwrap();
        assert_eq!(read.id, MessageId(2));
        assert_eq!(read.timestamp, 20);
    }

    #[test]
    fn test_into_store_rejects_unknown_read_position() {
        let json = r#"{"sources": [{"id": 1, "title": "A", "readUpTo": 9, "messages": []}]}"#;
        let fixture: Fixture = serde_json::from_str(json).unwrap();
        assert!(fixture.into_store().is_err());
    }

    #[test]
    fn test_demo_fixture_builds() {
        let store = Fixture::demo().into_store().unwrap();
        assert_eq!(store.source(SourceId(1)).unwrap().messages().len(), 6);
        assert_eq!(store.source(SourceId(2)).unwrap().messages().len(), 5);
    }
}
