pub mod message;
pub mod settings;
pub mod view;

pub use message::{
    EntryAttributes, EntryLocation, HistoryEntry, Media, MediaKind, Message, MessageAttribute,
    MessageFlags, MessageId, MessageIndex, MessageTags, MonthLocation, Namespace, SourceId,
    ThreadInfo,
};
pub use settings::{SourceCategory, SourceKind, WallSettings};
pub use view::{classify_update, HistoryUpdate, MergedHistoryView, UpdateType};

use std::collections::BTreeMap;

/// One boundary per participating source.
pub type AnchorMap = BTreeMap<SourceId, MessageIndex>;
