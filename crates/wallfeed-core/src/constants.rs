//! Engine-wide defaults
//!
//! Centralized so the config layer, the CLI and the tests agree on them.

/// Entries per window query
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Readiness poll interval in milliseconds
pub const READINESS_POLL_MS: u64 = 15_000;

/// Upper bound on sources merged into one wall
pub const MAX_SOURCES: usize = 100;

/// Environment variable naming an optional debug log file
pub const LOG_FILE_ENV: &str = "WALLFEED_LOG_FILE";
