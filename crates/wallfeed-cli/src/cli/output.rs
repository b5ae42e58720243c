//! JSON shapes printed by the CLI.

use chrono::DateTime;
use serde::Serialize;
use wallfeed_core::models::{HistoryEntry, HistoryUpdate, MergedHistoryView, UpdateType};
use wallfeed_core::store::SourceRecord;
use wallfeed_core::FilterPredicate;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryOutput {
    pub source_id: i64,
    pub id: i32,
    pub timestamp: i32,
    /// RFC 3339, UTC.
    pub time: Option<String>,
    pub text: String,
    pub is_read: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_key: Option<i64>,
}

impl From<&HistoryEntry> for EntryOutput {
    fn from(entry: &HistoryEntry) -> Self {
        let index = entry.index();
        Self {
            source_id: index.source_id.0,
            id: index.id.0,
            timestamp: index.timestamp,
            time: DateTime::from_timestamp(i64::from(index.timestamp), 0).map(|time| time.to_rfc3339()),
            text: entry.message.text.clone(),
            is_read: entry.is_read,
            group_key: entry.message.group_key,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewOutput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_type: Option<&'static str>,
    pub hole_earlier: bool,
    pub hole_later: bool,
    pub entries: Vec<EntryOutput>,
}

impl ViewOutput {
    pub fn from_view(view: &MergedHistoryView) -> Self {
        Self {
            update_type: None,
            hole_earlier: view.hole_earlier,
            hole_later: view.hole_later,
            entries: view.entries.iter().map(EntryOutput::from).collect(),
        }
    }

    pub fn from_update(update: &HistoryUpdate) -> Self {
        let mut output = Self::from_view(&update.view);
        output.update_type = Some(match update.update_type {
            UpdateType::Initial => "initial",
            UpdateType::Generic => "generic",
            UpdateType::FillHole => "fillHole",
        });
        output
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceOutput {
    pub id: i64,
    pub title: String,
    pub kind: wallfeed_core::models::SourceKind,
    pub archived: bool,
    pub messages: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_up_to: Option<i32>,
    pub included: bool,
}

impl SourceOutput {
    pub fn new(record: &SourceRecord, predicate: &FilterPredicate) -> Self {
        Self {
            id: record.id.0,
            title: record.title.clone(),
            kind: record.kind,
            archived: record.archived,
            messages: record.messages().len(),
            read_up_to: record.read_up_to.map(|index| index.id.0),
            included: predicate.matches(record.id, record.kind, record.archived),
        }
    }
}

pub fn print_json<T: Serialize>(value: &T, pretty: bool) -> anyhow::Result<()> {
    let text = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{}", text);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use wallfeed_core::models::{Message, MessageId, MessageIndex, Namespace, SourceId};

    #[test]
    fn test_entry_output_formats_time() {
        let index = MessageIndex::new(SourceId(3), Namespace::CLOUD, MessageId(9), 0);
        let entry = HistoryEntry::new(Arc::new(Message::new(index, "hello")));
        let output = EntryOutput::from(&entry);
        assert_eq!(output.time.as_deref(), Some("1970-01-01T00:00:00+00:00"));

        let json = serde_json::to_value(&output).unwrap();
        assert_eq!(json["sourceId"], 3);
        assert_eq!(json["isRead"], false);
        assert!(json.get("groupKey").is_none());
    }
}
