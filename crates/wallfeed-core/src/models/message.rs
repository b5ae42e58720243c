use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Datelike};
use serde::{Deserialize, Serialize};

/// Identifier of a chat source (channel, group) whose history feeds the wall.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(pub i64);

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Message id namespace inside a source (cloud vs. local messages).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Namespace(pub i32);

impl Namespace {
    pub const CLOUD: Namespace = Namespace(0);
    pub const LOCAL: Namespace = Namespace(1);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub i32);

/// Position of a message in the merged feed.
///
/// Ordered by timestamp first; `(source_id, namespace, id)` break ties. The
/// field order below is what the derived `Ord` relies on, so it must not be
/// rearranged.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageIndex {
    pub timestamp: i32,
    pub source_id: SourceId,
    pub namespace: Namespace,
    pub id: MessageId,
}

impl MessageIndex {
    pub fn new(source_id: SourceId, namespace: Namespace, id: MessageId, timestamp: i32) -> Self {
        Self {
            timestamp,
            source_id,
            namespace,
            id,
        }
    }

    /// Smallest possible index of `source_id` at `timestamp`.
    pub fn lower_bound(source_id: SourceId, timestamp: i32) -> Self {
        Self::new(source_id, Namespace(i32::MIN), MessageId(i32::MIN), timestamp)
    }

    /// Largest possible index of `source_id` at `timestamp`.
    pub fn upper_bound(source_id: SourceId, timestamp: i32) -> Self {
        Self::new(source_id, Namespace(i32::MAX), MessageId(i32::MAX), timestamp)
    }

    /// True for synthesized bounds that cannot name a real message.
    pub fn is_placeholder(&self) -> bool {
        matches!(self.namespace, Namespace(i32::MIN) | Namespace(i32::MAX))
    }

    /// Largest index that sorts strictly before `self`, so an inclusive
    /// bound on it excludes `self`.
    pub fn predecessor(&self) -> Self {
        let mut index = *self;
        if let Some(id) = index.id.0.checked_sub(1) {
            index.id = MessageId(id);
            return index;
        }
        index.id = MessageId(i32::MAX);
        if let Some(namespace) = index.namespace.0.checked_sub(1) {
            index.namespace = Namespace(namespace);
            return index;
        }
        index.namespace = Namespace(i32::MAX);
        if let Some(source) = index.source_id.0.checked_sub(1) {
            index.source_id = SourceId(source);
            return index;
        }
        index.source_id = SourceId(i64::MAX);
        index.timestamp = index.timestamp.saturating_sub(1);
        index
    }

    /// Smallest index that sorts strictly after `self`.
    pub fn successor(&self) -> Self {
        let mut index = *self;
        if let Some(id) = index.id.0.checked_add(1) {
            index.id = MessageId(id);
            return index;
        }
        index.id = MessageId(i32::MIN);
        if let Some(namespace) = index.namespace.0.checked_add(1) {
            index.namespace = Namespace(namespace);
            return index;
        }
        index.namespace = Namespace(i32::MIN);
        if let Some(source) = index.source_id.0.checked_add(1) {
            index.source_id = SourceId(source);
            return index;
        }
        index.source_id = SourceId(i64::MIN);
        index.timestamp = index.timestamp.saturating_add(1);
        index
    }
}

impl fmt::Display for MessageIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}@{}",
            self.source_id, self.namespace.0, self.id.0, self.timestamp
        )
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct MessageFlags(pub u32);

impl MessageFlags {
    pub const INCOMING: MessageFlags = MessageFlags(1 << 0);
    pub const UNSENT: MessageFlags = MessageFlags(1 << 1);
    pub const FAILED: MessageFlags = MessageFlags(1 << 2);

    pub fn contains(self, other: MessageFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

/// Bit set of media tags (photo, video, file, ...) used for tag-filtered views.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct MessageTags(pub u32);

impl MessageTags {
    pub const PHOTO: MessageTags = MessageTags(1 << 0);
    pub const VIDEO: MessageTags = MessageTags(1 << 1);
    pub const FILE: MessageTags = MessageTags(1 << 2);
    pub const WEB_PAGE: MessageTags = MessageTags(1 << 3);
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessageAttribute {
    ReplyTo(MessageId),
    ForwardedFrom(SourceId),
    Views(u32),
    Reactions(u32),
    EditedAt(i32),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaKind {
    Photo,
    Video,
    File,
    WebPage,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Media {
    pub id: i64,
    pub kind: MediaKind,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThreadInfo {
    pub reply_count: u32,
    pub max_message_id: Option<MessageId>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub index: MessageIndex,
    /// Store-local id that survives id reassignment after sending.
    pub stable_id: u32,
    pub flags: MessageFlags,
    pub text: String,
    pub tags: MessageTags,
    pub custom_tags: Vec<String>,
    pub attributes: Vec<MessageAttribute>,
    pub media: Vec<Media>,
    pub thread_info: Option<ThreadInfo>,
    /// Album/grouped-media key. Messages sharing a key are shown as one unit.
    pub group_key: Option<i64>,
}

impl Message {
    pub fn new(index: MessageIndex, text: impl Into<String>) -> Self {
        Self {
            index,
            stable_id: index.id.0 as u32,
            flags: MessageFlags::INCOMING,
            text: text.into(),
            tags: MessageTags::default(),
            custom_tags: Vec::new(),
            attributes: Vec::new(),
            media: Vec::new(),
            thread_info: None,
            group_key: None,
        }
    }

    pub fn with_group_key(mut self, group_key: i64) -> Self {
        self.group_key = Some(group_key);
        self
    }

    pub fn id(&self) -> MessageId {
        self.index.id
    }

    pub fn source_id(&self) -> SourceId {
        self.index.source_id
    }

    pub fn timestamp(&self) -> i32 {
        self.index.timestamp
    }
}

/// Position of an entry inside its own source's history.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntryLocation {
    pub index: usize,
    pub count: usize,
}

/// Calendar month bucket (`year * 100 + month`) used for date headers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MonthLocation(pub u32);

impl MonthLocation {
    pub fn from_timestamp(timestamp: i32) -> Option<Self> {
        let date = DateTime::from_timestamp(i64::from(timestamp), 0)?;
        Some(Self(date.year() as u32 * 100 + date.month()))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EntryAttributes {
    pub author_is_contact: bool,
}

/// A message as it appears in a history view.
#[derive(Clone, Debug, PartialEq)]
pub struct HistoryEntry {
    pub message: Arc<Message>,
    pub location: Option<EntryLocation>,
    pub month_location: Option<MonthLocation>,
    pub attributes: EntryAttributes,
    pub is_read: bool,
}

impl HistoryEntry {
    pub fn new(message: Arc<Message>) -> Self {
        let month_location = MonthLocation::from_timestamp(message.timestamp());
        Self {
            message,
            location: None,
            month_location,
            attributes: EntryAttributes::default(),
            is_read: false,
        }
    }

    pub fn index(&self) -> MessageIndex {
        self.message.index
    }

    /// Field-by-field comparison of everything a rendered row depends on.
    ///
    /// Message bodies are compared by attribute and media counts rather than
    /// deeply, matching what invalidates a row.
    pub fn renders_same_as(&self, other: &HistoryEntry) -> bool {
        let (a, b) = (&self.message, &other.message);
        self.index() == other.index()
            && self.location == other.location
            && self.month_location == other.month_location
            && self.attributes == other.attributes
            && a.stable_id == b.stable_id
            && a.id() == b.id()
            && a.timestamp() == b.timestamp()
            && a.flags == b.flags
            && a.text == b.text
            && a.tags == b.tags
            && a.custom_tags == b.custom_tags
            && a.attributes.len() == b.attributes.len()
            && a.media.len() == b.media.len()
            && a.thread_info == b.thread_info
    }
}
