pub mod config;
pub mod constants;
pub mod events;
pub mod filter;
pub mod models;
pub mod store;
pub mod tracing_setup;
pub mod wall;

pub use config::WallConfig;
pub use events::LoadingAction;
pub use filter::FilterPredicate;
pub use models::{HistoryEntry, HistoryUpdate, MergedHistoryView, MessageIndex, WallSettings};
pub use store::{MemoryStore, StoreError, WallStore};
pub use wall::{ScrollDirection, WallError, WallFeed};
