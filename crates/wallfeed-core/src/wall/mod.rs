//! The unified wall: one time-ordered window merged from many sources.

pub mod anchors;
pub mod backfill;
pub mod engine;
pub mod loader;
pub mod pagination;
pub mod read_state;
pub mod readiness;

pub use anchors::{AnchorTracker, ScrollDirection};
pub use backfill::{BackfillController, BackfillState};
pub use engine::{WallCommand, WallEngine, WallError, WallFeed};
pub use loader::WindowedHistoryLoader;
pub use pagination::PaginationController;
pub use read_state::ReadStatePropagator;
pub use readiness::ReadinessGate;
